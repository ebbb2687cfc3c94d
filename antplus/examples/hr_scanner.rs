// Copyright 2023 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Scans for every heart rate strap in range and prints readings with
//! signal strength.

use antplus::drivers::USB_M_STICK;
use antplus::plus::profiles::heart_rate::HeartRateScanner;
use antplus::router::Router;

fn main() -> Result<(), antplus::Error> {
    tracing_subscriber::fmt::init();

    let router = Router::open(USB_M_STICK)?;
    let scanner = HeartRateScanner::new(&router);
    scanner.on_data(|reading| {
        println!(
            "device {:>5}  {:>3} bpm  beats {:>3}  rssi {}",
            reading.state.device_id,
            reading.state.computed_heart_rate,
            reading.state.beat_count,
            reading.rssi,
        );
    });

    let handle = scanner.clone();
    router.on_startup(move || {
        println!("stick ready, scanning for heart rate monitors");
        if let Err(e) = handle.scan() {
            eprintln!("scan failed: {e}");
        }
    });

    router.wait_until_closed();
    Ok(())
}
