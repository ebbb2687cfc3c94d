// Copyright 2023 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! # Host-side ANT/ANT+ driver for USB radio sticks
//!
//! This crate talks to ANT USB sticks (Garmin/Dynastream Stick2 and
//! Stick3) over their bulk endpoints and decodes the ANT+ device profiles
//! broadcast by short-range wireless sensors: heart rate straps, bike
//! speed sensors, bike radars and stride/speed/distance footpods.
//!
//! The stick multiplexes up to its reported channel count of logical
//! channels over one radio. A [`router::Router`] owns the stick, runs the
//! reader thread and routes frames; each [`plus::AntPlusSensor`] tracks one
//! peer on one channel, while an [`plus::AntPlusScanner`] puts the whole
//! stick into promiscuous scanning mode and tracks every peer of one
//! profile at once.
//!
//! ```no_run
//! use antplus::drivers::USB_M_STICK;
//! use antplus::plus::profiles::heart_rate::HeartRateScanner;
//! use antplus::router::Router;
//!
//! # fn main() -> Result<(), antplus::Error> {
//! let router = Router::open(USB_M_STICK)?;
//! let scanner = HeartRateScanner::new(&router);
//! scanner.on_data(|reading| {
//!     println!("{}: {} bpm", reading.state.device_id, reading.state.computed_heart_rate);
//! });
//! let handle = scanner.clone();
//! router.on_startup(move || {
//!     handle.scan().expect("stick cannot scan");
//! });
//! router.wait_until_closed();
//! # Ok(())
//! # }
//! ```
//!
//! For documentation of the underlying radio protocol and the device
//! profiles see [thisisant.com](https://www.thisisant.com/).

pub mod channel;
pub mod drivers;
pub mod error;
pub mod messages;
pub mod plus;
pub mod router;

pub use error::Error;
