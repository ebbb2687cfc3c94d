// Copyright 2023 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Control commands: reset, channel open/close, requested responses.

use crate::messages::{TransmitableMessage, TxMessage, TxMessageId};
use antplus_derive::AntTx;
use derive_new::new;
use packed_struct::prelude::*;

#[derive(PackedStruct, AntTx, new, Debug, Default, Clone, Copy, PartialEq)]
#[packed_struct(bit_numbering = "msb0", endian = "lsb", size_bytes = "1")]
pub struct ResetSystem {
    #[new(default)]
    #[packed_field(bytes = "0")]
    filler: ReservedZeroes<packed_bits::Bits<8>>,
}

#[derive(PackedStruct, AntTx, new, Debug, Default, Clone, Copy, PartialEq)]
#[packed_struct(bit_numbering = "msb0", endian = "lsb", size_bytes = "1")]
pub struct OpenChannel {
    #[packed_field(bytes = "0")]
    pub channel_number: u8,
}

#[derive(PackedStruct, AntTx, new, Debug, Default, Clone, Copy, PartialEq)]
#[packed_struct(bit_numbering = "msb0", endian = "lsb", size_bytes = "1")]
pub struct CloseChannel {
    #[packed_field(bytes = "0")]
    pub channel_number: u8,
}

/// Puts channel 0 into continuous scanning mode. The second payload byte
/// restricts reception to synchronous channel packets and must be set for
/// stick firmware to accept the command.
#[derive(PackedStruct, AntTx, Debug, Clone, Copy, PartialEq)]
#[packed_struct(bit_numbering = "msb0", endian = "lsb", size_bytes = "2")]
pub struct OpenRxScanMode {
    #[packed_field(bytes = "0")]
    filler: ReservedZeroes<packed_bits::Bits<8>>,
    #[packed_field(bits = "15")]
    pub synchronous_channel_packets_only: bool,
}

impl OpenRxScanMode {
    pub fn new() -> Self {
        OpenRxScanMode {
            filler: Default::default(),
            synchronous_channel_packets_only: true,
        }
    }
}

impl Default for OpenRxScanMode {
    fn default() -> Self {
        OpenRxScanMode::new()
    }
}

#[derive(PrimitiveEnum_u8, Clone, Copy, Debug, PartialEq)]
pub enum RequestableMessageId {
    ChannelId = 0x51,
    Capabilities = 0x54,
}

#[derive(PackedStruct, AntTx, new, Clone, Copy, Debug, PartialEq)]
#[packed_struct(bit_numbering = "msb0", endian = "lsb", size_bytes = "2")]
pub struct RequestMessage {
    #[packed_field(bytes = "0")]
    pub channel: u8,
    #[packed_field(bytes = "1", ty = "enum")]
    pub message_id: RequestableMessageId,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pack<T: TransmitableMessage>(msg: &T) -> Vec<u8> {
        let mut buf = [0u8; 8];
        let len = msg.serialize_message(&mut buf).unwrap();
        buf[..len].to_vec()
    }

    #[test]
    fn reset_system() {
        let msg = ResetSystem::new();
        assert_eq!(msg.get_tx_msg_id(), TxMessageId::ResetSystem);
        assert_eq!(pack(&msg), [0x00]);
    }

    #[test]
    fn open_rx_scan_mode() {
        let msg = OpenRxScanMode::new();
        assert_eq!(msg.get_tx_msg_id(), TxMessageId::OpenRxScanMode);
        assert_eq!(pack(&msg), [0x00, 0x01]);
    }

    #[test]
    fn request_capabilities() {
        let msg = RequestMessage::new(0, RequestableMessageId::Capabilities);
        assert_eq!(pack(&msg), [0x00, 0x54]);
    }
}
