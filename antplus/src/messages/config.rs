// Copyright 2023 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Channel configuration commands.

use crate::messages::{TransmitableMessage, TxMessage, TxMessageId};
use antplus_derive::AntTx;
use derive_new::new;
use packed_struct::prelude::*;

/// Search timeout value that disables the timeout entirely.
pub const SEARCH_TIMEOUT_NEVER: u8 = 0xFF;

/// Channel type byte written into [`AssignChannel`].
#[derive(PrimitiveEnum_u8, Clone, Copy, Debug, PartialEq)]
pub enum ChannelType {
    BidirectionalSlave = 0x00,
    BidirectionalMaster = 0x10,
    SharedBidirectionalSlave = 0x20,
    SharedBidirectionalMaster = 0x30,
    SlaveReceiveOnly = 0x40,
    MasterTransmitOnly = 0x50,
}

#[derive(PackedStruct, AntTx, new, Clone, Copy, Debug, Default, PartialEq)]
#[packed_struct(bit_numbering = "msb0", endian = "lsb", size_bytes = "1")]
pub struct UnAssignChannel {
    #[packed_field(bytes = "0")]
    pub channel_number: u8,
}

#[derive(PackedStruct, AntTx, new, Clone, Copy, Debug, PartialEq)]
#[packed_struct(bit_numbering = "msb0", endian = "lsb", size_bytes = "3")]
pub struct AssignChannel {
    #[packed_field(bytes = "0")]
    pub channel_number: u8,
    #[packed_field(bytes = "1", ty = "enum")]
    pub channel_type: ChannelType,
    #[packed_field(bytes = "2")]
    pub network_number: u8,
}

/// Channel id assignment. Also the payload of the requested-response
/// message of the same id, so it is re-exported from
/// [`crate::messages::requested_response`].
#[derive(PackedStruct, AntTx, new, Clone, Copy, Debug, Default, PartialEq)]
#[packed_struct(bit_numbering = "msb0", endian = "lsb", size_bytes = "5")]
pub struct ChannelId {
    #[packed_field(bytes = "0")]
    pub channel_number: u8,
    #[packed_field(bytes = "1:2")]
    pub device_number: u16,
    #[packed_field(bytes = "3")]
    pub device_type: u8,
    #[packed_field(bytes = "4")]
    pub transmission_type: u8,
}

/// Channel message period in 1/32768s counts, 16-bit little-endian on the
/// wire.
#[derive(PackedStruct, AntTx, new, Clone, Copy, Debug, Default, PartialEq)]
#[packed_struct(bit_numbering = "msb0", endian = "lsb", size_bytes = "3")]
pub struct ChannelPeriod {
    #[packed_field(bytes = "0")]
    pub channel_number: u8,
    #[packed_field(bytes = "1:2")]
    pub channel_period: u16,
}

#[derive(PackedStruct, AntTx, new, Clone, Copy, Debug, Default, PartialEq)]
#[packed_struct(bit_numbering = "msb0", endian = "lsb", size_bytes = "2")]
pub struct SearchTimeout {
    #[packed_field(bytes = "0")]
    pub channel_number: u8,
    #[packed_field(bytes = "1")]
    pub search_timeout: u8,
}

#[derive(PackedStruct, AntTx, new, Clone, Copy, Debug, Default, PartialEq)]
#[packed_struct(bit_numbering = "msb0", endian = "lsb", size_bytes = "2")]
pub struct ChannelRfFrequency {
    #[packed_field(bytes = "0")]
    pub channel_number: u8,
    /// Offset from 2400 MHz. ANT+ uses 57.
    #[packed_field(bytes = "1")]
    pub rf_frequency: u8,
}

#[derive(PackedStruct, AntTx, new, Clone, Copy, Debug, Default, PartialEq)]
#[packed_struct(bit_numbering = "msb0", endian = "lsb", size_bytes = "9")]
pub struct SetNetworkKey {
    #[packed_field(bytes = "0")]
    pub network_number: u8,
    #[packed_field(bytes = "1:8")]
    pub network_key: [u8; 8],
}

#[derive(PackedStruct, AntTx, new, Clone, Copy, Debug, Default, PartialEq)]
#[packed_struct(bit_numbering = "msb0", endian = "lsb", size_bytes = "2")]
pub struct EnableExtRxMessages {
    #[new(default)]
    #[packed_field(bytes = "0")]
    filler: ReservedZeroes<packed_bits::Bits<8>>,
    #[packed_field(bits = "15")]
    pub enable: bool,
}

/// Requests the extended data appendix on received data messages.
/// All three flags set corresponds to the wire byte `0xE0`.
#[derive(PackedStruct, AntTx, new, Clone, Copy, Debug, Default, PartialEq)]
#[packed_struct(bit_numbering = "msb0", endian = "lsb", size_bytes = "2")]
pub struct LibConfig {
    #[packed_field(bytes = "0")]
    pub channel_number: u8,
    #[packed_field(bits = "8")]
    pub enable_rx_timestamp_output: bool,
    #[packed_field(bits = "9")]
    pub enable_rssi_output: bool,
    #[packed_field(bits = "10")]
    pub enable_channel_id_output: bool,
    #[new(default)]
    #[packed_field(bits = "11:15")]
    _reserved: ReservedZeroes<packed_bits::Bits<5>>,
}

impl LibConfig {
    /// Config requesting every extended field the stick can append.
    pub fn new_all_enabled(channel_number: u8) -> Self {
        LibConfig::new(channel_number, true, true, true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pack<T: TransmitableMessage>(msg: &T) -> Vec<u8> {
        let mut buf = [0u8; 16];
        let len = msg.serialize_message(&mut buf).unwrap();
        buf[..len].to_vec()
    }

    #[test]
    fn assign_channel() {
        let msg = AssignChannel::new(2, ChannelType::BidirectionalSlave, 0);
        assert_eq!(msg.get_tx_msg_id(), TxMessageId::AssignChannel);
        assert_eq!(pack(&msg), [2, 0x00, 0]);
    }

    #[test]
    fn channel_id_is_little_endian() {
        let msg = ChannelId::new(1, 0x1234, 120, 5);
        assert_eq!(pack(&msg), [1, 0x34, 0x12, 120, 5]);
    }

    #[test]
    fn channel_period_is_sixteen_bits() {
        let msg = ChannelPeriod::new(0, 8070);
        assert_eq!(pack(&msg), [0, 0x86, 0x1F]);
    }

    #[test]
    fn network_key() {
        let msg = SetNetworkKey::new(0, [0xB9, 0xA5, 0x21, 0xFB, 0xBD, 0x72, 0xC3, 0x45]);
        assert_eq!(
            pack(&msg),
            [0x00, 0xB9, 0xA5, 0x21, 0xFB, 0xBD, 0x72, 0xC3, 0x45]
        );
    }

    #[test]
    fn lib_config_all_extended_fields() {
        let msg = LibConfig::new_all_enabled(0);
        assert_eq!(pack(&msg), [0, 0xE0]);
    }

    #[test]
    fn enable_ext_rx_messages() {
        let msg = EnableExtRxMessages::new(true);
        assert_eq!(pack(&msg), [0x00, 0x01]);
    }
}
