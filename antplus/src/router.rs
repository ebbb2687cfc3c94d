// Copyright 2023 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Driver core: owns the stick, runs the reader, multiplexes channels.
//!
//! One reader thread per stick performs reassembly, parsing and dispatch,
//! so every sensor callback runs sequentially in arrival order. Application
//! threads are marshalled in through the router state lock.

use crate::channel::{SessionOutcome, TxSink, DEFAULT_NETWORK_NUMBER};
use crate::drivers::{parse_frame, FrameSplitter, Transport, UsbDevice, UsbTransport};
use crate::error::Error;
use crate::messages::config::SetNetworkKey;
use crate::messages::control::{RequestMessage, RequestableMessageId, ResetSystem};
use crate::messages::{AntMessage, RxMessage, TxMessageId};
use crate::plus::ANT_PLUS_NETWORK_KEY;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use tracing::{debug, error, trace, warn};

/// A channel owner registered with the router. Implemented by the ANT+
/// sensor and scanner wrappers.
pub(crate) trait SensorDispatch: Send {
    /// Channel this sensor currently owns, if any.
    fn channel(&self) -> Option<u8>;

    /// Delivers one frame addressed to this sensor's channel.
    fn handle_frame(&mut self, msg: &AntMessage, sink: &dyn TxSink) -> SessionOutcome;

    /// Drops channel state without radio traffic; the transport is gone.
    fn force_detach(&mut self);
}

pub(crate) type SharedSensor = Arc<Mutex<dyn SensorDispatch>>;

// Compare by allocation address; trait-object vtable pointers are not
// stable across codegen units.
fn same_sensor(a: &SharedSensor, b: &SharedSensor) -> bool {
    Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
}

/// Channel slot bookkeeping. Scanning owns the whole stick, so it is a
/// dedicated variant rather than a count.
#[derive(Clone, Copy, Debug, PartialEq)]
enum Allocation {
    Channels(u8),
    Scanning,
}

impl Allocation {
    fn release_one(self) -> Allocation {
        match self {
            Allocation::Scanning => Allocation::Channels(0),
            Allocation::Channels(n) => Allocation::Channels(n.saturating_sub(1)),
        }
    }
}

struct RouterState {
    max_channels: u8,
    can_scan: bool,
    network_ready: bool,
    allocation: Allocation,
    sensors: Vec<SharedSensor>,
    startup_callbacks: Vec<Box<dyn FnOnce() + Send>>,
}

pub(crate) struct RouterInner {
    transport: Box<dyn Transport>,
    state: Mutex<RouterState>,
    shutdown: AtomicBool,
    closed: Mutex<bool>,
    closed_cond: Condvar,
}

impl TxSink for RouterInner {
    fn write_frame(&self, frame: &[u8]) -> Result<(), Error> {
        trace!(frame = ?frame, "writing frame");
        self.transport.write(frame)
    }
}

impl RouterInner {
    fn dispatch_frame(&self, frame: &[u8]) {
        let msg = match parse_frame(frame) {
            Ok(msg) => msg,
            Err(e) => {
                warn!(error = %e, "dropping undecodable frame");
                return;
            }
        };
        self.handle_message(&msg);
    }

    fn handle_message(&self, msg: &AntMessage) {
        match &msg.message {
            RxMessage::StartUpMessage(startup) => {
                debug!(power_on = startup.is_power_on_reset(), "stick started up");
                if let Err(e) = self.send_message(&RequestMessage::new(
                    0,
                    RequestableMessageId::Capabilities,
                )) {
                    error!(error = %e, "capabilities request failed");
                }
            }
            RxMessage::Capabilities(caps) => {
                {
                    let mut state = self.state.lock().unwrap();
                    state.max_channels = caps.max_channels;
                    state.can_scan = caps.can_scan();
                }
                debug!(
                    max_channels = caps.max_channels,
                    can_scan = caps.can_scan(),
                    "capabilities received"
                );
                if let Err(e) = self.send_message(&SetNetworkKey::new(
                    DEFAULT_NETWORK_NUMBER,
                    ANT_PLUS_NETWORK_KEY,
                )) {
                    error!(error = %e, "network key configuration failed");
                }
            }
            RxMessage::ChannelResponse(resp)
                if resp.message_id == TxMessageId::SetNetworkKey =>
            {
                let callbacks = {
                    let mut state = self.state.lock().unwrap();
                    state.network_ready = true;
                    std::mem::take(&mut state.startup_callbacks)
                };
                debug!("network key configured, driver ready");
                for callback in callbacks {
                    callback();
                }
            }
            RxMessage::SerialErrorMessage(err) => {
                warn!(error_number = err.error_number, "stick rejected a frame");
            }
            _ => match msg.message.channel() {
                Some(channel) => self.fan_out(channel, msg),
                None => trace!("ignoring driver-level message"),
            },
        }
    }

    fn fan_out(&self, channel: u8, msg: &AntMessage) {
        // Snapshot so listener callbacks never run under the router lock
        let sensors: Vec<SharedSensor> = self.state.lock().unwrap().sensors.clone();
        for sensor in sensors {
            let outcome = {
                let mut guard = sensor.lock().unwrap();
                if guard.channel() != Some(channel) {
                    continue;
                }
                guard.handle_frame(msg, self)
            };
            if outcome == SessionOutcome::Detached {
                self.detach(&sensor);
            }
        }
    }

    pub(crate) fn attach(&self, sensor: SharedSensor, for_scan: bool) -> Result<(), Error> {
        let mut state = self.state.lock().unwrap();
        match (state.allocation, for_scan) {
            (Allocation::Scanning, _) => return Err(Error::ScanActive),
            (Allocation::Channels(used), true) => {
                if !state.can_scan {
                    return Err(Error::ScanNotSupported);
                }
                if used != 0 {
                    return Err(Error::ChannelsActive);
                }
                state.allocation = Allocation::Scanning;
            }
            (Allocation::Channels(used), false) => {
                if used >= state.max_channels {
                    return Err(Error::OutOfChannels);
                }
                state.allocation = Allocation::Channels(used + 1);
            }
        }
        state.sensors.push(sensor);
        Ok(())
    }

    pub(crate) fn detach(&self, sensor: &SharedSensor) {
        let mut state = self.state.lock().unwrap();
        let before = state.sensors.len();
        state.sensors.retain(|other| !same_sensor(other, sensor));
        if state.sensors.len() != before {
            state.allocation = state.allocation.release_one();
        }
    }

    fn finish(&self) {
        let sensors = {
            let mut state = self.state.lock().unwrap();
            state.allocation = Allocation::Channels(0);
            std::mem::take(&mut state.sensors)
        };
        for sensor in &sensors {
            sensor.lock().unwrap().force_detach();
        }
        let mut closed = self.closed.lock().unwrap();
        *closed = true;
        self.closed_cond.notify_all();
    }
}

fn reader_loop(inner: &RouterInner) {
    let mut splitter = FrameSplitter::new();
    let mut buf = vec![0u8; inner.transport.max_packet_size().max(64)];

    while !inner.shutdown.load(Ordering::Acquire) {
        match inner.transport.read_chunk(&mut buf) {
            Ok(0) => continue,
            Ok(n) => {
                if let Err(e) = splitter.push(&buf[..n], |frame| inner.dispatch_frame(frame)) {
                    error!(error = %e, "byte stream desynchronized, closing driver");
                    break;
                }
            }
            Err(e) => {
                if !inner.shutdown.load(Ordering::Acquire) {
                    error!(error = %e, "usb read failed, closing driver");
                }
                break;
            }
        }
    }
    inner.finish();
}

/// Handle to one opened stick. Cheap to clone; every sensor keeps one.
#[derive(Clone)]
pub struct Router {
    inner: Arc<RouterInner>,
    reader: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl Router {
    /// Takes ownership of a transport, resets the stick and starts the
    /// reader. The driver is usable once the startup sequence completes;
    /// register [`Router::on_startup`] to learn when.
    pub fn new(transport: Box<dyn Transport>) -> Result<Self, Error> {
        let inner = Arc::new(RouterInner {
            transport,
            state: Mutex::new(RouterState {
                max_channels: 0,
                can_scan: false,
                network_ready: false,
                allocation: Allocation::Channels(0),
                sensors: Vec::new(),
                startup_callbacks: Vec::new(),
            }),
            shutdown: AtomicBool::new(false),
            closed: Mutex::new(false),
            closed_cond: Condvar::new(),
        });

        inner.send_message(&ResetSystem::new())?;

        let reader_inner = Arc::clone(&inner);
        let handle = std::thread::Builder::new()
            .name("ant-reader".into())
            .spawn(move || reader_loop(&reader_inner))?;

        Ok(Router {
            inner,
            reader: Arc::new(Mutex::new(Some(handle))),
        })
    }

    /// Opens the first free stick matching `device` on USB.
    pub fn open(device: UsbDevice) -> Result<Self, Error> {
        Router::new(Box::new(UsbTransport::open(device)?))
    }

    /// Runs `f` once the network key is configured. Fires immediately when
    /// the driver is already up.
    pub fn on_startup(&self, f: impl FnOnce() + Send + 'static) {
        {
            let mut state = self.inner.state.lock().unwrap();
            if !state.network_ready {
                state.startup_callbacks.push(Box::new(f));
                return;
            }
        }
        f();
    }

    /// Channel count reported by the stick, 0 until capabilities arrive.
    pub fn max_channels(&self) -> u8 {
        self.inner.state.lock().unwrap().max_channels
    }

    pub fn can_scan(&self) -> bool {
        self.inner.state.lock().unwrap().can_scan
    }

    pub fn is_scanning(&self) -> bool {
        self.inner.state.lock().unwrap().allocation == Allocation::Scanning
    }

    /// Detaches every sensor, stops the reader and releases the stick.
    pub fn close(&self) {
        let sensors = {
            let mut state = self.inner.state.lock().unwrap();
            state.allocation = Allocation::Channels(0);
            std::mem::take(&mut state.sensors)
        };
        for sensor in &sensors {
            sensor.lock().unwrap().force_detach();
        }
        self.inner.shutdown.store(true, Ordering::Release);
        if let Some(handle) = self.reader.lock().unwrap().take() {
            let _ = handle.join();
        }
    }

    /// Blocks until the reader has exited, either through [`Router::close`]
    /// or a fatal transport error.
    pub fn wait_until_closed(&self) {
        let mut closed = self.inner.closed.lock().unwrap();
        while !*closed {
            closed = self.inner.closed_cond.wait(closed).unwrap();
        }
    }

    pub(crate) fn attach(&self, sensor: SharedSensor, for_scan: bool) -> Result<(), Error> {
        self.inner.attach(sensor, for_scan)
    }

    pub(crate) fn detach(&self, sensor: &SharedSensor) {
        self.inner.detach(sensor)
    }

    pub(crate) fn sink(&self) -> &dyn TxSink {
        &*self.inner
    }
}

impl TxSink for Router {
    fn write_frame(&self, frame: &[u8]) -> Result<(), Error> {
        self.inner.write_frame(frame)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::drivers::calculate_checksum;
    use std::collections::VecDeque;
    use std::time::{Duration, Instant};

    #[derive(Default)]
    pub(crate) struct MockState {
        inbox: Mutex<VecDeque<Vec<u8>>>,
        inbox_cond: Condvar,
        writes: Mutex<Vec<Vec<u8>>>,
        writes_cond: Condvar,
    }

    impl MockState {
        /// Queues raw bytes for the next bulk-in read.
        pub fn push_chunk(&self, chunk: Vec<u8>) {
            self.inbox.lock().unwrap().push_back(chunk);
            self.inbox_cond.notify_all();
        }

        /// Blocks until at least `count` frames were written to the stick.
        pub fn wait_for_writes(&self, count: usize) -> Vec<Vec<u8>> {
            let deadline = Instant::now() + Duration::from_secs(5);
            let mut writes = self.writes.lock().unwrap();
            while writes.len() < count {
                let timeout = deadline
                    .checked_duration_since(Instant::now())
                    .expect("timed out waiting for writes");
                let (guard, _) = self.writes_cond.wait_timeout(writes, timeout).unwrap();
                writes = guard;
            }
            writes.clone()
        }
    }

    pub(crate) struct MockTransport(pub Arc<MockState>);

    impl Transport for MockTransport {
        fn read_chunk(&self, buf: &mut [u8]) -> Result<usize, Error> {
            let mut inbox = self.0.inbox.lock().unwrap();
            if inbox.is_empty() {
                let (guard, _) = self
                    .0
                    .inbox_cond
                    .wait_timeout(inbox, Duration::from_millis(10))
                    .unwrap();
                inbox = guard;
            }
            match inbox.pop_front() {
                Some(chunk) => {
                    buf[..chunk.len()].copy_from_slice(&chunk);
                    Ok(chunk.len())
                }
                None => Ok(0),
            }
        }

        fn write(&self, data: &[u8]) -> Result<(), Error> {
            self.0.writes.lock().unwrap().push(data.to_vec());
            self.0.writes_cond.notify_all();
            Ok(())
        }

        fn max_packet_size(&self) -> usize {
            64
        }
    }

    pub(crate) fn mock_router() -> (Router, Arc<MockState>) {
        let state = Arc::new(MockState::default());
        let router = Router::new(Box::new(MockTransport(Arc::clone(&state)))).unwrap();
        (router, state)
    }

    /// Feeds the full startup handshake and waits for it to finish.
    pub(crate) fn start_up(router: &Router, mock: &Arc<MockState>, max_channels: u8) {
        mock.push_chunk(frame(0x6F, &[0x20]));
        mock.push_chunk(frame(0x54, &[max_channels, 0, 0x02, 0x06, 0x06, 0, 0, 0]));
        // ack the network key so startup callbacks run
        mock.push_chunk(frame(0x40, &[0, 0x46, 0x00]));
        let deadline = Instant::now() + Duration::from_secs(5);
        while !router.inner.state.lock().unwrap().network_ready {
            assert!(Instant::now() < deadline, "startup never completed");
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    pub(crate) fn frame(msg_id: u8, payload: &[u8]) -> Vec<u8> {
        let mut out = vec![0xA4, payload.len() as u8, msg_id];
        out.extend_from_slice(payload);
        out.push(calculate_checksum(&out));
        out
    }

    struct TestSensor {
        channel: Option<u8>,
        received: Vec<AntMessage>,
    }

    impl TestSensor {
        fn shared(channel: u8) -> Arc<Mutex<TestSensor>> {
            Arc::new(Mutex::new(TestSensor {
                channel: Some(channel),
                received: Vec::new(),
            }))
        }
    }

    impl SensorDispatch for TestSensor {
        fn channel(&self) -> Option<u8> {
            self.channel
        }

        fn handle_frame(&mut self, msg: &AntMessage, _sink: &dyn TxSink) -> SessionOutcome {
            self.received.push(msg.clone());
            SessionOutcome::Continue
        }

        fn force_detach(&mut self) {
            self.channel = None;
        }
    }

    #[test]
    fn startup_requests_capabilities() {
        let (router, mock) = mock_router();
        let writes = mock.wait_for_writes(1);
        assert_eq!(writes[0], frame(0x4A, &[0x00]));

        mock.push_chunk(frame(0x6F, &[0x20]));
        let writes = mock.wait_for_writes(2);
        assert_eq!(writes[1], [0xA4, 0x02, 0x4D, 0x00, 0x54, 0xBF]);
        router.close();
    }

    #[test]
    fn capabilities_store_limits_and_set_network_key() {
        let (router, mock) = mock_router();
        mock.push_chunk(frame(0x54, &[8, 0, 0x02, 0x06, 0x06, 0, 0, 0]));
        let writes = mock.wait_for_writes(2);
        assert_eq!(
            writes[1],
            frame(0x46, &[0x00, 0xB9, 0xA5, 0x21, 0xFB, 0xBD, 0x72, 0xC3, 0x45])
        );
        assert_eq!(router.max_channels(), 8);
        assert!(router.can_scan());
        router.close();
    }

    #[test]
    fn startup_callbacks_fire_on_network_key_ack() {
        let (router, mock) = mock_router();
        let fired = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&fired);
        router.on_startup(move || flag.store(true, Ordering::SeqCst));

        start_up(&router, &mock, 8);
        assert!(fired.load(Ordering::SeqCst));

        // late registration fires immediately
        let fired_late = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&fired_late);
        router.on_startup(move || flag.store(true, Ordering::SeqCst));
        assert!(fired_late.load(Ordering::SeqCst));
        router.close();
    }

    #[test]
    fn channel_allocation_limits() {
        let (router, mock) = mock_router();
        start_up(&router, &mock, 2);

        let first = TestSensor::shared(0);
        let second = TestSensor::shared(1);
        let third = TestSensor::shared(2);
        router.attach(first.clone(), false).unwrap();
        router.attach(second.clone(), false).unwrap();
        assert!(matches!(
            router.attach(third.clone(), false),
            Err(Error::OutOfChannels)
        ));

        // scanning requires an idle stick
        let scanner = TestSensor::shared(0);
        assert!(matches!(
            router.attach(scanner.clone(), true),
            Err(Error::ChannelsActive)
        ));

        // detach restores capacity exactly
        let first: SharedSensor = first;
        router.inner.detach(&first);
        router.attach(third, false).unwrap();
        router.close();
    }

    #[test]
    fn scan_holds_the_whole_stick() {
        let (router, mock) = mock_router();
        start_up(&router, &mock, 8);

        let scanner = TestSensor::shared(0);
        router.attach(scanner.clone(), true).unwrap();
        assert!(router.is_scanning());

        let sensor = TestSensor::shared(1);
        assert!(matches!(
            router.attach(sensor.clone(), false),
            Err(Error::ScanActive)
        ));
        let second_scanner = TestSensor::shared(0);
        assert!(matches!(
            router.attach(second_scanner, true),
            Err(Error::ScanActive)
        ));

        let scanner: SharedSensor = scanner;
        router.inner.detach(&scanner);
        assert!(!router.is_scanning());
        router.attach(sensor, false).unwrap();
        router.close();
    }

    #[test]
    fn scan_rejected_without_capability() {
        let (router, mock) = mock_router();
        // capabilities without the scan bits
        mock.push_chunk(frame(0x54, &[8, 0, 0x02, 0x06, 0x02, 0, 0, 0]));
        mock.wait_for_writes(2);

        let scanner = TestSensor::shared(0);
        assert!(matches!(
            router.attach(scanner, true),
            Err(Error::ScanNotSupported)
        ));
        router.close();
    }

    #[test]
    fn frames_fan_out_to_matching_channel() {
        let (router, mock) = mock_router();
        start_up(&router, &mock, 8);

        let on_zero = TestSensor::shared(0);
        let on_one = TestSensor::shared(1);
        router.attach(on_zero.clone(), false).unwrap();
        router.attach(on_one.clone(), false).unwrap();

        // two broadcast frames for channel 0 aggregated into one usb read
        let mut chunk = frame(0x4E, &[0, 0x04, 1, 2, 3, 4, 5, 6, 7]);
        chunk.extend(frame(0x4E, &[0, 0x84, 1, 2, 3, 4, 5, 6, 7]));
        mock.push_chunk(chunk);
        // and one for channel 1
        mock.push_chunk(frame(0x4E, &[1, 0x04, 9, 9, 9, 9, 9, 9, 9]));

        let deadline = Instant::now() + Duration::from_secs(5);
        while on_one.lock().unwrap().received.len() < 1 {
            assert!(Instant::now() < deadline, "fan out never happened");
            std::thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(on_zero.lock().unwrap().received.len(), 2);
        assert_eq!(on_one.lock().unwrap().received.len(), 1);
        router.close();
    }

    #[test]
    fn close_detaches_and_signals_done() {
        let (router, mock) = mock_router();
        start_up(&router, &mock, 8);

        let sensor = TestSensor::shared(0);
        router.attach(sensor.clone(), false).unwrap();
        router.close();
        assert_eq!(sensor.lock().unwrap().channel(), None);
        router.wait_until_closed();
    }
}
