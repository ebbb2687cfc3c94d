// Copyright 2023 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Bulk USB transport for ANT radio sticks.

use crate::drivers::Transport;
use crate::error::Error;
use rusb::{Device, DeviceHandle, Direction, GlobalContext, Interface, TransferType, UsbContext};
use std::sync::Mutex;
use std::time::Duration;
use tracing::debug;

/// How long a bulk read may block before the reader loop gets a chance to
/// observe shutdown.
const READ_TIMEOUT: Duration = Duration::from_millis(100);
const WRITE_TIMEOUT: Duration = Duration::from_secs(1);

// One entry per opened stick, keyed by (bus, address), so a second driver
// instance in this process cannot grab the same hardware.
static DEVICES_IN_USE: Mutex<Vec<(u8, u8)>> = Mutex::new(Vec::new());

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsbDevice {
    pub vendor_id: u16,
    pub product_id: u16,
}

pub const USB_2_STICK: UsbDevice = UsbDevice {
    vendor_id: 0x0FCF,
    product_id: 0x1008,
};

pub const USB_M_STICK: UsbDevice = UsbDevice {
    vendor_id: 0x0FCF,
    product_id: 0x1009,
};

pub fn is_ant_usb_device(vendor_id: u16, product_id: u16) -> bool {
    matches!(
        (UsbDevice {
            vendor_id,
            product_id
        }),
        USB_2_STICK | USB_M_STICK
    )
}

fn find_endpoint(
    interface: &Interface,
    transfer_type: TransferType,
    endpoint_direction: Direction,
) -> Result<(u8, usize), Error> {
    for interface_desc in interface.descriptors() {
        for endpoint_desc in interface_desc.endpoint_descriptors() {
            if endpoint_desc.direction() == endpoint_direction
                && endpoint_desc.transfer_type() == transfer_type
            {
                return Ok((
                    endpoint_desc.address(),
                    endpoint_desc.max_packet_size() as usize,
                ));
            }
        }
    }
    Err(Error::CannotFindEndpoint(match endpoint_direction {
        Direction::In => "in",
        Direction::Out => "out",
    }))
}

/// Bulk-endpoint pipe to one stick.
pub struct UsbTransport<T: UsbContext> {
    handle: DeviceHandle<T>,
    iface: u8,
    in_address: u8,
    out_address: u8,
    in_max_packet_size: usize,
    // Serializes writers so concurrent frames never interleave
    write_lock: Mutex<()>,
    registry_key: (u8, u8),
}

impl UsbTransport<GlobalContext> {
    /// Opens the first matching stick not already in use by this process.
    pub fn open(device: UsbDevice) -> Result<Self, Error> {
        for candidate in rusb::devices()?.iter() {
            let desc = match candidate.device_descriptor() {
                Ok(d) => d,
                Err(_) => continue,
            };
            if desc.vendor_id() != device.vendor_id || desc.product_id() != device.product_id {
                continue;
            }
            let key = (candidate.bus_number(), candidate.address());
            if DEVICES_IN_USE.lock().unwrap().contains(&key) {
                continue;
            }
            return UsbTransport::new(candidate);
        }
        Err(Error::DeviceNotFound)
    }
}

impl<T: UsbContext> UsbTransport<T> {
    pub fn new(device: Device<T>) -> Result<Self, Error> {
        let mut handle = device.open()?;

        // Unsupported on some platforms; claiming will fail loudly there if
        // a kernel driver really is in the way.
        let _ = handle.set_auto_detach_kernel_driver(true);

        let config = device.config_descriptor(0)?;
        let iface = config.interfaces().next().ok_or(Error::NoInterface)?;

        let (in_address, in_max_packet_size) =
            find_endpoint(&iface, TransferType::Bulk, Direction::In)?;
        let (out_address, _) = find_endpoint(&iface, TransferType::Bulk, Direction::Out)?;

        handle.claim_interface(iface.number())?;

        let registry_key = (device.bus_number(), device.address());
        DEVICES_IN_USE.lock().unwrap().push(registry_key);
        debug!(
            bus = registry_key.0,
            address = registry_key.1,
            "claimed ant stick"
        );

        Ok(Self {
            handle,
            iface: iface.number(),
            in_address,
            out_address,
            in_max_packet_size,
            write_lock: Mutex::new(()),
            registry_key,
        })
    }
}

impl<T: UsbContext> Transport for UsbTransport<T> {
    fn read_chunk(&self, buf: &mut [u8]) -> Result<usize, Error> {
        match self.handle.read_bulk(self.in_address, buf, READ_TIMEOUT) {
            Ok(len) => Ok(len),
            Err(rusb::Error::Timeout) => Ok(0),
            Err(err) => Err(err.into()),
        }
    }

    fn write(&self, data: &[u8]) -> Result<(), Error> {
        let _guard = self.write_lock.lock().unwrap();
        let mut written = 0;
        while written < data.len() {
            written += self
                .handle
                .write_bulk(self.out_address, &data[written..], WRITE_TIMEOUT)?;
        }
        Ok(())
    }

    fn max_packet_size(&self) -> usize {
        self.in_max_packet_size
    }
}

impl<T: UsbContext> Drop for UsbTransport<T> {
    fn drop(&mut self) {
        let _ = self.handle.release_interface(self.iface);
        DEVICES_IN_USE
            .lock()
            .unwrap()
            .retain(|key| *key != self.registry_key);
    }
}
