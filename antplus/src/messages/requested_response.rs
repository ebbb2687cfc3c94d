// Copyright 2023 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Responses to [`crate::messages::control::RequestMessage`].

use packed_struct::prelude::*;

// The channel id requested response shares its payload with the config
// command of the same id.
pub use crate::messages::config::ChannelId;

#[derive(PackedStruct, Clone, Copy, Debug, PartialEq)]
#[packed_struct(bit_numbering = "lsb0", size_bytes = "1")]
pub struct AdvancedOptions2 {
    #[packed_field(bits = "0")]
    pub led_enabled: bool,
    #[packed_field(bits = "1")]
    pub ext_message_enabled: bool,
    #[packed_field(bits = "2")]
    pub scan_mode_enabled: bool,
    #[packed_field(bits = "3")]
    _reserved: ReservedZeroes<packed_bits::Bits<1>>,
    #[packed_field(bits = "4")]
    pub prox_search_enabled: bool,
    #[packed_field(bits = "5")]
    pub ext_assign_enabled: bool,
    #[packed_field(bits = "6")]
    pub fs_antfs_enabled: bool,
    #[packed_field(bits = "7")]
    pub fit1_enabled: bool,
}

/// Stick capability report. The driver keys off `max_channels` and the
/// extended-message/scan-mode bits.
#[derive(PackedStruct, Clone, Copy, Debug, PartialEq)]
#[packed_struct(bit_numbering = "msb0", endian = "lsb", size_bytes = "8")]
pub struct Capabilities {
    #[packed_field(bytes = "0")]
    pub max_channels: u8,
    #[packed_field(bytes = "1")]
    pub max_networks: u8,
    #[packed_field(bytes = "2")]
    pub standard_options: u8,
    #[packed_field(bytes = "3")]
    pub advanced_options: u8,
    #[packed_field(bytes = "4")]
    pub advanced_options_2: AdvancedOptions2,
    #[packed_field(bytes = "5")]
    pub max_sensrcore_channels: u8,
    #[packed_field(bytes = "6")]
    pub advanced_options_3: u8,
    #[packed_field(bytes = "7")]
    pub advanced_options_4: u8,
}

impl Capabilities {
    const PACKING_SIZE: usize = 8;

    /// Scanning needs both the extended message format and the continuous
    /// scan mode.
    pub fn can_scan(&self) -> bool {
        self.advanced_options_2.ext_message_enabled && self.advanced_options_2.scan_mode_enabled
    }

    /// Older sticks report fewer option bytes; missing ones read as zero.
    pub(crate) fn unpack_from_slice(data: &[u8]) -> Result<Self, PackingError> {
        if data.len() < 4 {
            return Err(PackingError::BufferSizeMismatch {
                expected: Self::PACKING_SIZE,
                actual: data.len(),
            });
        }
        let mut padded = [0u8; Self::PACKING_SIZE];
        let len = data.len().min(Self::PACKING_SIZE);
        padded[..len].copy_from_slice(&data[..len]);
        Capabilities::unpack(&padded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capabilities_with_scan_support() {
        let caps =
            Capabilities::unpack_from_slice(&[8, 0, 0x02, 0x06, 0x06, 0, 0, 0]).unwrap();
        assert_eq!(caps.max_channels, 8);
        assert!(caps.advanced_options_2.ext_message_enabled);
        assert!(caps.advanced_options_2.scan_mode_enabled);
        assert!(caps.can_scan());
    }

    #[test]
    fn capabilities_without_scan_support() {
        let caps =
            Capabilities::unpack_from_slice(&[4, 3, 0, 0xBA, 0x02, 0, 0, 0]).unwrap();
        assert_eq!(caps.max_channels, 4);
        assert!(!caps.can_scan());
    }

    #[test]
    fn short_capabilities_pad_with_zeroes() {
        let caps = Capabilities::unpack_from_slice(&[8, 3, 0, 0xBA]).unwrap();
        assert_eq!(caps.max_channels, 8);
        assert!(!caps.can_scan());
    }
}
