// Copyright 2023 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! ANT+ layer: device profiles, paging discipline, sensor and scanner
//! wrappers around the driver core.

use crate::plus::pages::Page;

pub mod pages;
pub mod profiles;
pub mod scanner;
pub mod sensor;

pub use scanner::{AntPlusScanner, ScannerState};
pub use sensor::{AntPlusSensor, SensorConfig};

/// ANT+ RF channel, offset from 2400 MHz.
pub const NETWORK_RF_FREQUENCY: u8 = 57;

/// The public ANT+ managed network key.
pub const ANT_PLUS_NETWORK_KEY: [u8; 8] = [0xB9, 0xA5, 0x21, 0xFB, 0xBD, 0x72, 0xC3, 0x45];

/// An ANT+ device profile: the device type it filters on and how its
/// periodic data pages fold into a typed state snapshot.
pub trait Profile: Send + 'static {
    /// Decoded state handed to listeners after every frame.
    type State: Clone + Send + 'static;

    /// ANT+ device type this profile matches.
    const DEVICE_TYPE: u8;

    fn new_state(device_id: u32) -> Self::State;

    /// Adopts a device id discovered after a wildcard search.
    fn set_device_id(state: &mut Self::State, device_id: u32);

    /// Folds one 8-byte data page into the state. `data[0]` is the page
    /// number including the toggle bit; `page` carries the per-peer paging
    /// discipline.
    fn update(state: &mut Self::State, page: &mut Page, data: &[u8; 8]);
}
