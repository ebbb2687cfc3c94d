// Copyright 2023 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use packed_struct::PackingError;
use thiserror::Error;

/// Unified error type for the driver.
///
/// Synchronous configuration failures come back from API calls directly;
/// transport failures terminate the reader and surface through
/// [`crate::router::Router::wait_until_closed`]. Radio-layer events are not
/// errors and flow through the channel event callbacks instead.
#[derive(Debug, Error)]
pub enum Error {
    #[error("sensor is already attached")]
    AlreadyAttached,
    #[error("sensor is not attached to a channel")]
    NotAttached,
    #[error("no free channel slots on the stick")]
    OutOfChannels,
    #[error("stick does not support scanning")]
    ScanNotSupported,
    #[error("stick is held in scanning mode")]
    ScanActive,
    #[error("channels are in use, scanning requires an idle stick")]
    ChannelsActive,
    #[error("no matching usb device found")]
    DeviceNotFound,
    #[error("device has no usable interface")]
    NoInterface,
    #[error("missing bulk {0} endpoint")]
    CannotFindEndpoint(&'static str),
    #[error("driver is closed")]
    Closed,
    #[error("lost framing sync, got {0:#04x}")]
    LostSync(u8),
    #[error("bad checksum, expected {expected:#04x} got {actual:#04x}")]
    BadChecksum { expected: u8, actual: u8 },
    #[error("frame length {actual} does not match header, expected {expected}")]
    BadLength { expected: usize, actual: usize },
    #[error("unsupported message id {0:#04x}")]
    UnsupportedMessageId(u8),
    #[error("message packing failed: {0}")]
    Packing(#[from] PackingError),
    #[error("usb error: {0}")]
    Usb(#[from] rusb::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
