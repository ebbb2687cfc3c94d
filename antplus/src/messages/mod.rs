// Copyright 2023 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Typed ANT wire messages.
//!
//! Every message travels as `[SYNC, LEN, ID, payload.., XOR]` where `LEN`
//! counts payload bytes only and the checksum is the XOR of everything
//! before it. The structs here model the payloads; framing lives in
//! [`crate::drivers`].

use channel::{ChannelEvent, ChannelResponse};
use config::ChannelId;
use data::{AcknowledgedData, BroadcastData, BurstTransferData};
use notifications::{SerialErrorMessage, StartUpMessage};
use packed_struct::prelude::*;
use requested_response::Capabilities;

pub mod channel;
pub mod config;
pub mod control;
pub mod data;
pub mod notifications;
pub mod requested_response;

/// Largest payload the framing can carry (`LEN` is a single byte).
pub const MAX_MESSAGE_DATA_SIZE: usize = 255;

/// All inbound messages the driver understands.
#[derive(Clone, Debug, PartialEq)]
pub enum RxMessage {
    // Notification Messages
    StartUpMessage(StartUpMessage),
    SerialErrorMessage(SerialErrorMessage),
    // Data Messages
    BroadcastData(BroadcastData),
    AcknowledgedData(AcknowledgedData),
    BurstTransferData(BurstTransferData),
    // Channel Messages
    ChannelEvent(ChannelEvent),
    ChannelResponse(ChannelResponse),
    // Requested Response Messages
    ChannelId(ChannelId),
    Capabilities(Capabilities),
}

impl RxMessage {
    /// Channel the message belongs to, if it is channel scoped.
    pub fn channel(&self) -> Option<u8> {
        match self {
            RxMessage::BroadcastData(msg) => Some(msg.payload.channel_number),
            RxMessage::AcknowledgedData(msg) => Some(msg.payload.channel_number),
            RxMessage::BurstTransferData(msg) => Some(msg.payload.channel_number),
            RxMessage::ChannelEvent(msg) => Some(msg.channel_number),
            RxMessage::ChannelResponse(msg) => Some(msg.channel_number),
            RxMessage::ChannelId(msg) => Some(msg.channel_number),
            RxMessage::StartUpMessage(_)
            | RxMessage::SerialErrorMessage(_)
            | RxMessage::Capabilities(_) => None,
        }
    }
}

/// All outbound messages.
#[derive(Clone, Debug, PartialEq)]
pub enum TxMessage {
    // Config Messages
    UnAssignChannel(config::UnAssignChannel),
    AssignChannel(config::AssignChannel),
    ChannelId(config::ChannelId),
    ChannelPeriod(config::ChannelPeriod),
    SearchTimeout(config::SearchTimeout),
    ChannelRfFrequency(config::ChannelRfFrequency),
    SetNetworkKey(config::SetNetworkKey),
    EnableExtRxMessages(config::EnableExtRxMessages),
    LibConfig(config::LibConfig),
    // Control Messages
    ResetSystem(control::ResetSystem),
    OpenChannel(control::OpenChannel),
    CloseChannel(control::CloseChannel),
    OpenRxScanMode(control::OpenRxScanMode),
    RequestMessage(control::RequestMessage),
    // Data Messages
    BroadcastData(BroadcastData),
    AcknowledgedData(AcknowledgedData),
    BurstTransferData(BurstTransferData),
}

impl TransmitableMessage for TxMessage {
    fn serialize_message(&self, buf: &mut [u8]) -> Result<usize, PackingError> {
        match self {
            TxMessage::UnAssignChannel(uc) => uc.serialize_message(buf),
            TxMessage::AssignChannel(ac) => ac.serialize_message(buf),
            TxMessage::ChannelId(id) => id.serialize_message(buf),
            TxMessage::ChannelPeriod(cp) => cp.serialize_message(buf),
            TxMessage::SearchTimeout(st) => st.serialize_message(buf),
            TxMessage::ChannelRfFrequency(cr) => cr.serialize_message(buf),
            TxMessage::SetNetworkKey(nk) => nk.serialize_message(buf),
            TxMessage::EnableExtRxMessages(ee) => ee.serialize_message(buf),
            TxMessage::LibConfig(lc) => lc.serialize_message(buf),
            TxMessage::ResetSystem(rs) => rs.serialize_message(buf),
            TxMessage::OpenChannel(oc) => oc.serialize_message(buf),
            TxMessage::CloseChannel(cc) => cc.serialize_message(buf),
            TxMessage::OpenRxScanMode(or) => or.serialize_message(buf),
            TxMessage::RequestMessage(rm) => rm.serialize_message(buf),
            TxMessage::BroadcastData(bd) => bd.serialize_message(buf),
            TxMessage::AcknowledgedData(ad) => ad.serialize_message(buf),
            TxMessage::BurstTransferData(bt) => bt.serialize_message(buf),
        }
    }

    fn get_tx_msg_id(&self) -> TxMessageId {
        match self {
            TxMessage::UnAssignChannel(uc) => uc.get_tx_msg_id(),
            TxMessage::AssignChannel(ac) => ac.get_tx_msg_id(),
            TxMessage::ChannelId(id) => id.get_tx_msg_id(),
            TxMessage::ChannelPeriod(cp) => cp.get_tx_msg_id(),
            TxMessage::SearchTimeout(st) => st.get_tx_msg_id(),
            TxMessage::ChannelRfFrequency(cr) => cr.get_tx_msg_id(),
            TxMessage::SetNetworkKey(nk) => nk.get_tx_msg_id(),
            TxMessage::EnableExtRxMessages(ee) => ee.get_tx_msg_id(),
            TxMessage::LibConfig(lc) => lc.get_tx_msg_id(),
            TxMessage::ResetSystem(rs) => rs.get_tx_msg_id(),
            TxMessage::OpenChannel(oc) => oc.get_tx_msg_id(),
            TxMessage::CloseChannel(cc) => cc.get_tx_msg_id(),
            TxMessage::OpenRxScanMode(or) => or.get_tx_msg_id(),
            TxMessage::RequestMessage(rm) => rm.get_tx_msg_id(),
            TxMessage::BroadcastData(bd) => bd.get_tx_msg_id(),
            TxMessage::AcknowledgedData(ad) => ad.get_tx_msg_id(),
            TxMessage::BurstTransferData(bt) => bt.get_tx_msg_id(),
        }
    }
}

/// The subset of [`TxMessage`] a sensor may push through its send queue.
#[derive(Clone, Debug, PartialEq)]
pub enum TxMessageData {
    BroadcastData(BroadcastData),
    AcknowledgedData(AcknowledgedData),
    BurstTransferData(BurstTransferData),
}

impl TxMessageData {
    /// Helper for sensors to stamp their assigned channel before queueing.
    pub(crate) fn set_channel(&mut self, channel: u8) {
        match self {
            TxMessageData::BroadcastData(bd) => bd.payload.channel_number = channel,
            TxMessageData::AcknowledgedData(ad) => ad.payload.channel_number = channel,
            TxMessageData::BurstTransferData(bt) => bt.payload.channel_number = channel,
        }
    }
}

impl From<TxMessageData> for TxMessage {
    fn from(msg: TxMessageData) -> TxMessage {
        match msg {
            TxMessageData::BroadcastData(bd) => bd.into(),
            TxMessageData::AcknowledgedData(ad) => ad.into(),
            TxMessageData::BurstTransferData(bt) => bt.into(),
        }
    }
}

impl TransmitableMessage for TxMessageData {
    fn serialize_message(&self, buf: &mut [u8]) -> Result<usize, PackingError> {
        match self {
            TxMessageData::BroadcastData(bd) => bd.serialize_message(buf),
            TxMessageData::AcknowledgedData(ad) => ad.serialize_message(buf),
            TxMessageData::BurstTransferData(bt) => bt.serialize_message(buf),
        }
    }

    fn get_tx_msg_id(&self) -> TxMessageId {
        match self {
            TxMessageData::BroadcastData(bd) => bd.get_tx_msg_id(),
            TxMessageData::AcknowledgedData(ad) => ad.get_tx_msg_id(),
            TxMessageData::BurstTransferData(bt) => bt.get_tx_msg_id(),
        }
    }
}

/// Represents a generic ANT radio message
#[derive(Clone, Debug, PartialEq)]
pub struct AntMessage {
    pub header: RxMessageHeader,
    pub message: RxMessage,
    /// XOR of all prior bytes should match this
    pub checksum: u8,
}

/// Trait for any TX message type
pub trait TransmitableMessage {
    fn serialize_message(&self, buf: &mut [u8]) -> Result<usize, PackingError>;
    fn get_tx_msg_id(&self) -> TxMessageId;
}

#[derive(PrimitiveEnum_u8, Clone, Copy, PartialEq, Debug)]
pub enum SyncByte {
    Value = 0xA4,
}

#[derive(PackedStruct, Debug, PartialEq, Clone, Copy)]
#[packed_struct(bit_numbering = "msb0", endian = "lsb", size_bytes = "3")]
pub struct RxMessageHeader {
    #[packed_field(bytes = "0", ty = "enum")]
    pub sync: SyncByte,
    #[packed_field(bytes = "1")]
    pub msg_length: u8,
    #[packed_field(bytes = "2", ty = "enum")]
    pub msg_id: RxMessageId,
}

#[derive(PackedStruct, Debug, PartialEq)]
#[packed_struct(bit_numbering = "msb0", endian = "lsb", size_bytes = "3")]
pub struct TxMessageHeader {
    #[packed_field(bytes = "0", ty = "enum")]
    pub sync: SyncByte,
    #[packed_field(bytes = "1")]
    pub msg_length: u8,
    #[packed_field(bytes = "2", ty = "enum")]
    pub msg_id: TxMessageId,
}

#[derive(PrimitiveEnum_u8, Clone, Copy, Debug, PartialEq)]
pub enum RxMessageId {
    // Notification Messages
    StartUpMessage = 0x6F,
    SerialErrorMessage = 0xAE,
    // Data Messages
    BroadcastData = 0x4E,
    AcknowledgedData = 0x4F,
    BurstTransferData = 0x50,
    // Channel Messages
    ChannelEvent = 0x40,
    // Requested Response Messages
    ChannelId = 0x51,
    Capabilities = 0x54,
}

#[derive(PrimitiveEnum_u8, Clone, Copy, PartialEq, Debug)]
pub enum TxMessageId {
    // Config Messages
    UnAssignChannel = 0x41,
    AssignChannel = 0x42,
    ChannelId = 0x51,
    ChannelPeriod = 0x43,
    SearchTimeout = 0x44,
    ChannelRfFrequency = 0x45,
    SetNetworkKey = 0x46,
    EnableExtRxMessages = 0x66,
    LibConfig = 0x6E,
    // Control Messages
    ResetSystem = 0x4A,
    OpenChannel = 0x4B,
    CloseChannel = 0x4C,
    RequestMessage = 0x4D,
    OpenRxScanMode = 0x5B,
    // Data Messages
    BroadcastData = 0x4E,
    AcknowledgedData = 0x4F,
    BurstTransferData = 0x50,
}
