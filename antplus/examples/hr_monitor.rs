// Copyright 2023 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Tracks a single heart rate strap on a dedicated channel. Pass a device
//! number to pair with a specific strap, or nothing to take the first one
//! found.

use antplus::channel::duration_to_search_timeout;
use antplus::drivers::USB_M_STICK;
use antplus::messages::config::ChannelType;
use antplus::plus::profiles::heart_rate::HeartRateSensor;
use antplus::plus::SensorConfig;
use antplus::router::Router;

use std::env;
use std::time::Duration;

fn main() -> Result<(), antplus::Error> {
    tracing_subscriber::fmt::init();

    let device_number: u16 = env::args()
        .nth(1)
        .map(|arg| arg.parse().expect("device number must be numeric"))
        .unwrap_or(0);

    let router = Router::open(USB_M_STICK)?;
    let sensor = HeartRateSensor::new(&router);
    sensor.on_data(|state| {
        println!(
            "{:>3} bpm  beat count {:>3}  battery {:?}",
            state.computed_heart_rate, state.beat_count, state.battery_status,
        );
    });
    sensor.on_detached(|| println!("channel closed"));

    let handle = sensor.clone();
    router.on_startup(move || {
        let config = SensorConfig {
            device_number,
            transmission_type: 0,
            channel_type: ChannelType::BidirectionalSlave,
            timeout_duration: duration_to_search_timeout(Duration::from_secs(30)),
            channel_period: 8070, // 4.06 Hz, the heart rate master rate
        };
        if let Err(e) = handle.attach(0, &config) {
            eprintln!("attach failed: {e}");
        }
    });

    router.wait_until_closed();
    Ok(())
}
