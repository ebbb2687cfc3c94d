// Copyright 2023 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Displays approaching vehicles reported by a bike radar.

use antplus::drivers::USB_M_STICK;
use antplus::plus::profiles::bike_radar::BikeRadarScanner;
use antplus::router::Router;

fn main() -> Result<(), antplus::Error> {
    tracing_subscriber::fmt::init();

    let router = Router::open(USB_M_STICK)?;
    let scanner = BikeRadarScanner::new(&router);
    scanner.on_data(|reading| {
        let targets: Vec<String> = reading
            .state
            .targets
            .iter()
            .flatten()
            .map(|t| format!("{:.0}m @ {:.1}m/s (threat {})", t.range, t.speed, t.threat_level))
            .collect();
        if targets.is_empty() {
            println!("device {:>5}: all clear", reading.state.device_id);
        } else {
            println!("device {:>5}: {}", reading.state.device_id, targets.join(", "));
        }
    });

    let handle = scanner.clone();
    router.on_startup(move || {
        if let Err(e) = handle.scan() {
            eprintln!("scan failed: {e}");
        }
    });

    router.wait_until_closed();
    Ok(())
}
