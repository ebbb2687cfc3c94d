// Copyright 2023 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Unsolicited notifications from the stick.

use packed_struct::prelude::*;

/// Sent by the stick after any reset. A payload of all zeroes means
/// power-on reset.
#[derive(PackedStruct, Clone, Copy, Debug, PartialEq)]
#[packed_struct(bit_numbering = "lsb0", size_bytes = "1")]
pub struct StartUpMessage {
    #[packed_field(bits = "0")]
    pub hardware_reset_line: bool,
    #[packed_field(bits = "1")]
    pub watch_dog_reset: bool,
    #[packed_field(bits = "2:4")]
    _reserved: ReservedZeroes<packed_bits::Bits<3>>,
    #[packed_field(bits = "5")]
    pub command_reset: bool,
    #[packed_field(bits = "6")]
    pub synchronous_reset: bool,
    #[packed_field(bits = "7")]
    pub suspend_reset: bool,
}

impl StartUpMessage {
    pub fn is_power_on_reset(&self) -> bool {
        !(self.hardware_reset_line
            || self.watch_dog_reset
            || self.command_reset
            || self.synchronous_reset
            || self.suspend_reset)
    }
}

/// Reported when the stick could not parse a frame the host wrote.
#[derive(PackedStruct, Clone, Copy, Debug, PartialEq)]
#[packed_struct(bit_numbering = "msb0", size_bytes = "1")]
pub struct SerialErrorMessage {
    #[packed_field(bytes = "0")]
    pub error_number: u8,
}

impl SerialErrorMessage {
    pub(crate) fn unpack_from_slice(data: &[u8]) -> Result<Self, PackingError> {
        // The stick echoes the offending frame after the error number
        let error = data.first().ok_or(PackingError::BufferTooSmall)?;
        SerialErrorMessage::unpack(&[*error])
    }
}
