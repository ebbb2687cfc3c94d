// Copyright 2023 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Data messages and the extended RX appendix.
//!
//! With [`crate::messages::config::LibConfig`] fully enabled the stick
//! appends `[flags, device id, device type, transmission type, rssi block,
//! timestamp]` after the 8 data bytes. Scanners rely on the appendix to
//! tell peers apart.

use crate::messages::{TransmitableMessage, TxMessage, TxMessageId};
use packed_struct::prelude::*;

#[derive(PackedStruct, Clone, Copy, Debug, PartialEq)]
#[packed_struct(bit_numbering = "msb0", endian = "lsb", size_bytes = "4")]
pub struct ChannelIdOutput {
    #[packed_field(bytes = "0:1")]
    pub device_number: u16,
    #[packed_field(bytes = "2")]
    pub device_type: u8,
    #[packed_field(bytes = "3")]
    pub transmission_type: u8,
}

impl ChannelIdOutput {
    const PACKING_SIZE: usize = 4;
}

/// RSSI measurement type reported in the extended appendix. Only the dBm
/// form carries a threshold the scanner records.
pub const RSSI_MEASUREMENT_DBM: u8 = 0x20;

#[derive(PackedStruct, Clone, Copy, Debug, PartialEq)]
#[packed_struct(bit_numbering = "msb0", endian = "lsb", size_bytes = "3")]
pub struct RssiOutput {
    #[packed_field(bytes = "0")]
    pub measurement_type: u8,
    #[packed_field(bytes = "1")]
    pub rssi_value: u8,
    #[packed_field(bytes = "2")]
    pub threshold_configuration_value: u8,
}

impl RssiOutput {
    const PACKING_SIZE: usize = 3;

    pub fn is_dbm(&self) -> bool {
        self.measurement_type == RSSI_MEASUREMENT_DBM
    }
}

#[derive(PackedStruct, Clone, Copy, Debug, PartialEq)]
#[packed_struct(bit_numbering = "msb0", endian = "lsb", size_bytes = "2")]
pub struct TimestampOutput {
    #[packed_field(bytes = "0:1")]
    pub rx_timestamp: u16,
}

impl TimestampOutput {
    const PACKING_SIZE: usize = 2;
}

#[derive(PackedStruct, Clone, Copy, Debug, PartialEq)]
#[packed_struct(bit_numbering = "lsb0", size_bytes = "1")]
pub struct FlagByte {
    #[packed_field(bits = "7")]
    pub channel_id_output: bool,
    #[packed_field(bits = "6")]
    pub rssi_output: bool,
    #[packed_field(bits = "5")]
    pub timestamp_output: bool,
    #[packed_field(bits = "0:4")]
    _reserved: ReservedZeroes<packed_bits::Bits<5>>,
}

impl FlagByte {
    const PACKING_SIZE: usize = 1;
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ExtendedInfo {
    pub flag_byte: FlagByte,
    pub channel_id_output: Option<ChannelIdOutput>,
    pub rssi_output: Option<RssiOutput>,
    pub timestamp_output: Option<TimestampOutput>,
}

impl ExtendedInfo {
    /// Parses the appendix after the 8 data bytes. Sticks older than the
    /// requested lib config may append fewer blocks, and some firmwares pad
    /// the transfer, so trailing bytes are tolerated.
    pub(crate) fn unpack_from_slice(data: &[u8]) -> Result<Option<ExtendedInfo>, PackingError> {
        if data.is_empty() {
            return Ok(None);
        }

        let (flag_buf, data) = data.split_at(FlagByte::PACKING_SIZE);
        let flag_byte = FlagByte::unpack_from_slice(flag_buf)?;

        let mut extended_info = ExtendedInfo {
            flag_byte,
            channel_id_output: None,
            rssi_output: None,
            timestamp_output: None,
        };

        let data = if flag_byte.channel_id_output {
            if data.len() < ChannelIdOutput::PACKING_SIZE {
                return Err(PackingError::BufferSizeMismatch {
                    expected: ChannelIdOutput::PACKING_SIZE,
                    actual: data.len(),
                });
            }
            let (msg_data, data) = data.split_at(ChannelIdOutput::PACKING_SIZE);
            extended_info.channel_id_output = Some(ChannelIdOutput::unpack_from_slice(msg_data)?);
            data
        } else {
            data
        };

        let data = if flag_byte.rssi_output {
            if data.len() < RssiOutput::PACKING_SIZE {
                return Err(PackingError::BufferSizeMismatch {
                    expected: RssiOutput::PACKING_SIZE,
                    actual: data.len(),
                });
            }
            let (msg_data, data) = data.split_at(RssiOutput::PACKING_SIZE);
            extended_info.rssi_output = Some(RssiOutput::unpack_from_slice(msg_data)?);
            data
        } else {
            data
        };

        if flag_byte.timestamp_output && data.len() >= TimestampOutput::PACKING_SIZE {
            let (msg_data, _) = data.split_at(TimestampOutput::PACKING_SIZE);
            extended_info.timestamp_output = Some(TimestampOutput::unpack_from_slice(msg_data)?);
        }

        Ok(Some(extended_info))
    }
}

#[derive(PackedStruct, Copy, Clone, Debug, Default, PartialEq)]
#[packed_struct(bit_numbering = "msb0", size_bytes = "9")]
pub struct DataPayload {
    #[packed_field(bytes = "0")]
    pub channel_number: u8,
    /// Eight page bytes; byte 0 is the page number with the toggle bit.
    #[packed_field(bytes = "1:8")]
    pub data: [u8; 8],
}

impl DataPayload {
    const PACKING_SIZE: usize = 9;
}

macro_rules! data_message {
    ($(#[$meta:meta])* $msg_type:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, Default, PartialEq)]
        pub struct $msg_type {
            pub payload: DataPayload,
            pub extended_info: Option<ExtendedInfo>,
        }

        impl TransmitableMessage for $msg_type {
            fn serialize_message(&self, buf: &mut [u8]) -> Result<usize, PackingError> {
                // Extended fields only exist on RX, never serialized
                self.payload
                    .pack_to_slice(&mut buf[..DataPayload::PACKING_SIZE])?;
                Ok(DataPayload::PACKING_SIZE)
            }

            fn get_tx_msg_id(&self) -> TxMessageId {
                TxMessageId::$msg_type
            }
        }

        impl From<$msg_type> for TxMessage {
            fn from(msg: $msg_type) -> TxMessage {
                TxMessage::$msg_type(msg)
            }
        }

        impl $msg_type {
            pub fn new(channel_number: u8, data: [u8; 8]) -> Self {
                Self {
                    payload: DataPayload {
                        channel_number,
                        data,
                    },
                    extended_info: None,
                }
            }

            pub(crate) fn unpack_from_slice(data: &[u8]) -> Result<$msg_type, PackingError> {
                if data.len() < DataPayload::PACKING_SIZE {
                    return Err(PackingError::BufferSizeMismatch {
                        expected: DataPayload::PACKING_SIZE,
                        actual: data.len(),
                    });
                }
                let (payload, extended) = data.split_at(DataPayload::PACKING_SIZE);
                Ok($msg_type {
                    payload: DataPayload::unpack_from_slice(payload)?,
                    extended_info: ExtendedInfo::unpack_from_slice(extended)?,
                })
            }
        }
    };
}

data_message!(BroadcastData);
data_message!(AcknowledgedData);
data_message!(
    /// Burst packets reuse the broadcast payload shape; the sequence bits in
    /// the channel byte are left to the caller.
    BurstTransferData
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broadcast_without_extension() {
        let msg =
            BroadcastData::unpack_from_slice(&[0, 1, 2, 3, 4, 5, 6, 7, 8]).unwrap();
        assert_eq!(msg.payload.channel_number, 0);
        assert_eq!(msg.payload.data, [1, 2, 3, 4, 5, 6, 7, 8]);
        assert!(msg.extended_info.is_none());
    }

    #[test]
    fn broadcast_serializes_payload_only() {
        let mut msg = BroadcastData::new(2, [9; 8]);
        msg.extended_info = ExtendedInfo::unpack_from_slice(&[0x80, 0x34, 0x12, 0x78, 1])
            .unwrap();
        let mut buf = [0u8; 16];
        let len = msg.serialize_message(&mut buf).unwrap();
        assert_eq!(&buf[..len], [2, 9, 9, 9, 9, 9, 9, 9, 9]);
    }

    #[test]
    fn extended_device_id_and_rssi() {
        // flags 0xC0: channel id + rssi blocks, dBm measurement
        let data = [
            0, 0x02, 0, 0, 0, 0, 0, 0, 0, // payload
            0xC0, 0x34, 0x12, 0x78, 0x05, 0x20, 200, 5,
        ];
        let msg = BroadcastData::unpack_from_slice(&data).unwrap();
        let ext = msg.extended_info.unwrap();
        let id = ext.channel_id_output.unwrap();
        assert_eq!(id.device_number, 0x1234);
        assert_eq!(id.device_type, 0x78);
        assert_eq!(id.transmission_type, 0x05);
        let rssi = ext.rssi_output.unwrap();
        assert!(rssi.is_dbm());
        assert_eq!(rssi.rssi_value, 200);
        assert_eq!(rssi.threshold_configuration_value, 5);
        assert!(ext.timestamp_output.is_none());
    }

    #[test]
    fn extended_flag_clear_yields_no_blocks() {
        let data = [0, 0x02, 0, 0, 0, 0, 0, 0, 0, 0x00];
        let msg = BroadcastData::unpack_from_slice(&data).unwrap();
        let ext = msg.extended_info.unwrap();
        assert!(ext.channel_id_output.is_none());
        assert!(ext.rssi_output.is_none());
    }

    #[test]
    fn truncated_extension_is_an_error() {
        let data = [0, 0x02, 0, 0, 0, 0, 0, 0, 0, 0x80, 0x34];
        assert!(BroadcastData::unpack_from_slice(&data).is_err());
    }
}
