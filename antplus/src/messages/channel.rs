// Copyright 2023 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Channel events and command responses.
//!
//! Both arrive under message id 0x40. Payload byte 1 discriminates: 0x01
//! marks an RF event, anything else echoes the command the stick is
//! responding to.

use crate::messages::TxMessageId;
use packed_struct::prelude::*;

/// Payload byte 1 value marking an RF event rather than a command response.
pub(crate) const MESSAGE_RF: u8 = 0x01;

#[derive(PrimitiveEnum_u8, Clone, Copy, Debug, PartialEq)]
pub enum MessageCode {
    ResponseNoError = 0x00,
    EventRxSearchTimeout = 0x01,
    EventRxFailed = 0x02,
    EventTx = 0x03,
    EventTransferRxFailed = 0x04,
    EventTransferTxCompleted = 0x05,
    EventTransferTxFailed = 0x06,
    EventChannelClosed = 0x07,
    EventRxFailGoToSearch = 0x08,
    EventChannelCollision = 0x09,
    EventTransferTxStart = 0x0A,
    ChannelInWrongState = 0x15,
    ChannelNotOpened = 0x16,
    ChannelIdNotSet = 0x18,
    CloseAllChannels = 0x19,
    TransferInProgress = 0x1F,
    TransferSequenceNumberError = 0x20,
    TransferInError = 0x21,
    MessageSizeExceedsLimit = 0x27,
    InvalidMessage = 0x28,
    InvalidNetworkNumber = 0x29,
    InvalidListId = 0x30,
    InvalidScanTxChannel = 0x31,
    InvalidParameterProvided = 0x33,
    EventQueueOverflow = 0x35,
    UsbStringWriteFail = 0x70,
}

/// Asynchronous radio-layer notification for a channel.
#[derive(PackedStruct, Copy, Clone, Debug, PartialEq)]
#[packed_struct(bit_numbering = "msb0", size_bytes = "3")]
pub struct ChannelEvent {
    #[packed_field(bytes = "0")]
    pub channel_number: u8,
    #[packed_field(bits = "8:14")]
    _reserved0: ReservedZeroes<packed_bits::Bits<7>>,
    #[packed_field(bits = "15")]
    _reserved1: ReservedOnes<packed_bits::Bits<1>>,
    #[packed_field(bytes = "2", ty = "enum")]
    pub message_code: MessageCode,
}

/// Response to a host command, echoing the triggering message id.
#[derive(PackedStruct, Debug, Clone, Copy, PartialEq)]
#[packed_struct(bit_numbering = "msb0", endian = "lsb", size_bytes = "3")]
pub struct ChannelResponse {
    #[packed_field(bytes = "0")]
    pub channel_number: u8,
    #[packed_field(bytes = "1", ty = "enum")]
    pub message_id: TxMessageId,
    #[packed_field(bytes = "2", ty = "enum")]
    pub message_code: MessageCode,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_response() -> Result<(), PackingError> {
        let unpacked = ChannelResponse::unpack(&[1, 0x6E, 0x00])?;
        assert_eq!(unpacked.channel_number, 1);
        assert_eq!(unpacked.message_id, TxMessageId::LibConfig);
        assert_eq!(unpacked.message_code, MessageCode::ResponseNoError);
        Ok(())
    }

    #[test]
    fn channel_event() -> Result<(), PackingError> {
        let unpacked = ChannelEvent::unpack(&[0, 0x01, 0x07])?;
        assert_eq!(unpacked.channel_number, 0);
        assert_eq!(unpacked.message_code, MessageCode::EventChannelClosed);
        Ok(())
    }
}
