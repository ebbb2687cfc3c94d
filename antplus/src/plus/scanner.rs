// Copyright 2023 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Promiscuous ANT+ scanner.
//!
//! A scanner holds the stick's single scanning channel and tracks every
//! broadcasting peer of its profile's device type, keyed by the device id
//! extracted from the extended message appendix.

use crate::channel::{ChannelSession, EventCallback, ScanConfig, SessionOutcome, TxSink};
use crate::error::Error;
use crate::messages::config::ChannelType;
use crate::messages::data::{DataPayload, ExtendedInfo};
use crate::messages::{AntMessage, RxMessage};
use crate::plus::pages::Page;
use crate::plus::{Profile, NETWORK_RF_FREQUENCY};
use crate::router::{Router, SensorDispatch, SharedSensor};

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

/// Everything known about one scanned peer.
#[derive(Clone, Debug)]
pub struct ScannerState<S> {
    pub state: S,
    /// Raw RSSI register value from the last dBm measurement.
    pub rssi: u8,
    pub threshold: u8,
}

struct ScannerEntry<S> {
    state: ScannerState<S>,
    page: Page,
}

type ScanListener<S> = Box<dyn Fn(&ScannerState<S>) + Send>;

pub(crate) struct ScannerInner<P: Profile> {
    session: ChannelSession,
    entries: HashMap<u32, ScannerEntry<P::State>>,
    listeners: Vec<ScanListener<P::State>>,
    rx_message_callback: Option<fn(&AntMessage)>,
    detached_callback: Option<Box<dyn Fn() + Send>>,
}

impl<P: Profile> ScannerInner<P> {
    fn decode(&mut self, payload: &DataPayload, extended: Option<&ExtendedInfo>) {
        let channel_id = match extended.and_then(|ext| ext.channel_id_output) {
            Some(id) => id,
            None => {
                debug!("scan frame without extended device id, dropping");
                return;
            }
        };
        if channel_id.device_type != P::DEVICE_TYPE {
            return;
        }
        let device_id = channel_id.device_number as u32;

        let entry = self.entries.entry(device_id).or_insert_with(|| {
            debug!(device_id, "tracking new peer");
            ScannerEntry {
                state: ScannerState {
                    state: P::new_state(device_id),
                    rssi: 0,
                    threshold: 0,
                },
                page: Page::new(),
            }
        });

        if let Some(rssi) = extended.and_then(|ext| ext.rssi_output) {
            if rssi.is_dbm() {
                entry.state.rssi = rssi.rssi_value;
                entry.state.threshold = rssi.threshold_configuration_value;
            }
        }

        P::update(&mut entry.state.state, &mut entry.page, &payload.data);
        for listener in &self.listeners {
            listener(&entry.state);
        }
    }

    fn notify_detached(&mut self) {
        if let Some(f) = &self.detached_callback {
            f();
        }
    }
}

impl<P: Profile> SensorDispatch for ScannerInner<P> {
    fn channel(&self) -> Option<u8> {
        self.session.channel()
    }

    fn handle_frame(&mut self, msg: &AntMessage, sink: &dyn TxSink) -> SessionOutcome {
        if let Some(f) = self.rx_message_callback {
            f(msg);
        }
        let outcome = match &msg.message {
            RxMessage::ChannelResponse(resp) => {
                self.session.handle_response(resp, sink).unwrap_or_else(|e| {
                    warn!(error = %e, "session response handling failed");
                    SessionOutcome::Continue
                })
            }
            RxMessage::ChannelEvent(event) => {
                self.session.handle_event(event, sink).unwrap_or_else(|e| {
                    warn!(error = %e, "session event handling failed");
                    SessionOutcome::Continue
                })
            }
            RxMessage::BroadcastData(data) => {
                self.decode(&data.payload, data.extended_info.as_ref());
                SessionOutcome::Continue
            }
            RxMessage::AcknowledgedData(data) => {
                self.decode(&data.payload, data.extended_info.as_ref());
                SessionOutcome::Continue
            }
            RxMessage::BurstTransferData(data) => {
                self.decode(&data.payload, data.extended_info.as_ref());
                SessionOutcome::Continue
            }
            _ => SessionOutcome::Continue,
        };
        if outcome == SessionOutcome::Detached {
            self.notify_detached();
        }
        outcome
    }

    fn force_detach(&mut self) {
        if self.session.is_attached() {
            self.session.reset();
            self.notify_detached();
        }
    }
}

/// Promiscuous receiver for every peer of one profile. Cheap to clone.
pub struct AntPlusScanner<P: Profile> {
    inner: Arc<Mutex<ScannerInner<P>>>,
    router: Router,
}

impl<P: Profile> Clone for AntPlusScanner<P> {
    fn clone(&self) -> Self {
        AntPlusScanner {
            inner: Arc::clone(&self.inner),
            router: self.router.clone(),
        }
    }
}

impl<P: Profile> AntPlusScanner<P> {
    pub fn new(router: &Router) -> Self {
        AntPlusScanner {
            inner: Arc::new(Mutex::new(ScannerInner {
                session: ChannelSession::new(),
                entries: HashMap::new(),
                listeners: Vec::new(),
                rx_message_callback: None,
                detached_callback: None,
            })),
            router: router.clone(),
        }
    }

    /// Takes the stick into scanning mode on channel 0. Fails when any
    /// regular channel is attached or the stick cannot scan.
    pub fn scan(&self) -> Result<(), Error> {
        let mut inner = self.inner.lock().unwrap();
        if inner.session.is_attached() {
            return Err(Error::AlreadyAttached);
        }
        let shared: SharedSensor = Arc::clone(&self.inner) as SharedSensor;
        self.router.attach(shared.clone(), true)?;

        let result = inner.session.begin_scan(
            ScanConfig {
                channel_type: ChannelType::BidirectionalSlave,
                radio_frequency: NETWORK_RF_FREQUENCY,
            },
            self.router.sink(),
        );
        if result.is_err() {
            self.router.detach(&shared);
        }
        result
    }

    /// Stops scanning; teardown completes asynchronously.
    pub fn close(&self) -> Result<(), Error> {
        self.inner.lock().unwrap().session.close(self.router.sink())
    }

    /// Registers a listener invoked with a peer's updated state after every
    /// frame from it. Runs on the reader thread; return promptly.
    pub fn on_data(&self, f: impl Fn(&ScannerState<P::State>) + Send + 'static) {
        self.inner.lock().unwrap().listeners.push(Box::new(f));
    }

    pub fn on_detached(&self, f: impl Fn() + Send + 'static) {
        self.inner.lock().unwrap().detached_callback = Some(Box::new(f));
    }

    pub fn set_rx_message_callback(&self, f: Option<fn(&AntMessage)>) {
        self.inner.lock().unwrap().rx_message_callback = f;
    }

    pub fn set_event_callback(&self, f: Option<EventCallback>) {
        self.inner.lock().unwrap().session.set_event_callback(f);
    }

    /// Device ids of every peer seen so far.
    pub fn known_devices(&self) -> Vec<u32> {
        self.inner.lock().unwrap().entries.keys().copied().collect()
    }

    /// Snapshot of one peer's state.
    pub fn device_state(&self, device_id: u32) -> Option<ScannerState<P::State>> {
        self.inner
            .lock()
            .unwrap()
            .entries
            .get(&device_id)
            .map(|entry| entry.state.clone())
    }

    pub(crate) fn with_device_state<R>(
        &self,
        device_id: u32,
        f: impl FnOnce(&mut P::State) -> R,
    ) -> Option<R> {
        self.inner
            .lock()
            .unwrap()
            .entries
            .get_mut(&device_id)
            .map(|entry| f(&mut entry.state.state))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::parse_frame;
    use crate::router::tests::frame;

    struct NullSink;

    impl TxSink for NullSink {
        fn write_frame(&self, _frame: &[u8]) -> Result<(), Error> {
            Ok(())
        }
    }

    struct TestProfile;

    #[derive(Clone, Debug, Default)]
    struct TestState {
        device_id: u32,
        frames: u32,
    }

    impl Profile for TestProfile {
        type State = TestState;
        const DEVICE_TYPE: u8 = 0x78;

        fn new_state(device_id: u32) -> TestState {
            TestState {
                device_id,
                frames: 0,
            }
        }

        fn set_device_id(state: &mut TestState, device_id: u32) {
            state.device_id = device_id;
        }

        fn update(state: &mut TestState, _page: &mut Page, _data: &[u8; 8]) {
            state.frames += 1;
        }
    }

    fn inner() -> ScannerInner<TestProfile> {
        ScannerInner {
            session: ChannelSession::new(),
            entries: HashMap::new(),
            listeners: Vec::new(),
            rx_message_callback: None,
            detached_callback: None,
        }
    }

    fn broadcast_with_ext(ext: &[u8]) -> AntMessage {
        let mut payload = vec![0u8, 0x04, 1, 2, 3, 4, 5, 6, 7];
        payload.extend_from_slice(ext);
        parse_frame(&frame(0x4E, &payload)).unwrap()
    }

    #[test]
    fn extended_message_populates_device_entry() {
        let mut scanner = inner();
        let msg = broadcast_with_ext(&[0xC0, 0x34, 0x12, 0x78, 0x05, 0x20, 200, 5]);
        scanner.handle_frame(&msg, &NullSink);

        let entry = scanner.entries.get(&0x1234).expect("entry created");
        assert_eq!(entry.state.state.device_id, 0x1234);
        assert_eq!(entry.state.rssi, 200);
        assert_eq!(entry.state.threshold, 5);
        assert_eq!(entry.state.state.frames, 1);
    }

    #[test]
    fn wrong_device_type_is_filtered() {
        let mut scanner = inner();
        let msg = broadcast_with_ext(&[0xC0, 0x34, 0x12, 0x7B, 0x05, 0x20, 200, 5]);
        scanner.handle_frame(&msg, &NullSink);
        assert!(scanner.entries.is_empty());
    }

    #[test]
    fn missing_extension_is_dropped() {
        let mut scanner = inner();
        let msg = broadcast_with_ext(&[]);
        scanner.handle_frame(&msg, &NullSink);
        assert!(scanner.entries.is_empty());
    }

    #[test]
    fn rssi_ignored_for_non_dbm_measurements() {
        let mut scanner = inner();
        let msg = broadcast_with_ext(&[0xC0, 0x34, 0x12, 0x78, 0x05, 0x10, 200, 5]);
        scanner.handle_frame(&msg, &NullSink);
        let entry = scanner.entries.get(&0x1234).unwrap();
        assert_eq!(entry.state.rssi, 0);
        assert_eq!(entry.state.threshold, 0);
    }

    #[test]
    fn paging_state_is_per_device() {
        let mut scanner = inner();
        for device in [[0x34u8, 0x12], [0x35, 0x12]] {
            let msg = broadcast_with_ext(&[0x80, device[0], device[1], 0x78, 0x05]);
            scanner.handle_frame(&msg, &NullSink);
        }
        assert_eq!(scanner.entries.len(), 2);
        assert_eq!(scanner.entries.get(&0x1234).unwrap().state.state.frames, 1);
        assert_eq!(scanner.entries.get(&0x1235).unwrap().state.state.frames, 1);
    }
}
