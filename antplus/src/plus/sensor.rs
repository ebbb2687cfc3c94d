// Copyright 2023 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Single-peer ANT+ sensor channel.

use crate::channel::{
    ChannelConfig, ChannelSession, EventCallback, SendCallback, SessionOutcome, TxSink,
};
use crate::error::Error;
use crate::messages::config::ChannelType;
use crate::messages::control::{RequestMessage, RequestableMessageId};
use crate::messages::data::DataPayload;
use crate::messages::{AntMessage, RxMessage, TxMessageData};
use crate::plus::pages::Page;
use crate::plus::{Profile, NETWORK_RF_FREQUENCY};
use crate::router::{Router, SensorDispatch, SharedSensor};

use std::sync::{Arc, Mutex};
use tracing::warn;

/// Peer and timing parameters for [`AntPlusSensor::attach`]. The radio
/// frequency and device type come from the network and the profile.
#[derive(Clone, Copy, Debug)]
pub struct SensorConfig {
    /// Peer device number; 0 searches for any device of the profile's type.
    pub device_number: u16,
    /// Transmission type; 0 to wildcard.
    pub transmission_type: u8,
    pub channel_type: ChannelType,
    /// Search timeout in 2.5 s counts.
    pub timeout_duration: u8,
    /// Channel period in 1/32768 s counts.
    pub channel_period: u16,
}

type DataListener<S> = Box<dyn Fn(&S) + Send>;

pub(crate) struct SensorInner<P: Profile> {
    session: ChannelSession,
    device_id: u32,
    transmission_type: u8,
    pub(crate) state: P::State,
    page: Page,
    listeners: Vec<DataListener<P::State>>,
    detached_callback: Option<Box<dyn Fn() + Send>>,
    rx_message_callback: Option<fn(&AntMessage)>,
}

impl<P: Profile> SensorInner<P> {
    fn decode(&mut self, payload: &DataPayload, sink: &dyn TxSink) {
        if self.device_id == 0 {
            // Bonded to a wildcard search; ask the stick who we found
            if let Some(channel) = self.session.channel() {
                if let Err(e) = sink.send_message(&RequestMessage::new(
                    channel,
                    RequestableMessageId::ChannelId,
                )) {
                    warn!(error = %e, "channel id request failed");
                }
            }
        }
        P::update(&mut self.state, &mut self.page, &payload.data);
        for listener in &self.listeners {
            listener(&self.state);
        }
    }

    fn notify_detached(&mut self) {
        if let Some(f) = &self.detached_callback {
            f();
        }
    }
}

impl<P: Profile> SensorDispatch for SensorInner<P> {
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
                self.decode(&data.payload, sink);
                SessionOutcome::Continue
            }
            RxMessage::AcknowledgedData(data) => {
                self.decode(&data.payload, sink);
                SessionOutcome::Continue
            }
            RxMessage::BurstTransferData(data) => {
                self.decode(&data.payload, sink);
                SessionOutcome::Continue
            }
            RxMessage::ChannelId(id) => {
                self.device_id = id.device_number as u32;
                self.transmission_type = id.transmission_type;
                P::set_device_id(&mut self.state, self.device_id);
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

/// One ANT+ peer tracked on a dedicated channel. Cheap to clone; all clones
/// observe the same channel.
pub struct AntPlusSensor<P: Profile> {
    inner: Arc<Mutex<SensorInner<P>>>,
    router: Router,
}

impl<P: Profile> Clone for AntPlusSensor<P> {
    fn clone(&self) -> Self {
        AntPlusSensor {
            inner: Arc::clone(&self.inner),
            router: self.router.clone(),
        }
    }
}

impl<P: Profile> AntPlusSensor<P> {
    pub fn new(router: &Router) -> Self {
        AntPlusSensor {
            inner: Arc::new(Mutex::new(SensorInner {
                session: ChannelSession::new(),
                device_id: 0,
                transmission_type: 0,
                state: P::new_state(0),
                page: Page::new(),
                listeners: Vec::new(),
                detached_callback: None,
                rx_message_callback: None,
            })),
            router: router.clone(),
        }
    }

    /// Claims a channel slot and starts the configuration cascade. Data
    /// flows once the stick acknowledges the open.
    pub fn attach(&self, channel: u8, config: &SensorConfig) -> Result<(), Error> {
        let mut inner = self.inner.lock().unwrap();
        if inner.session.is_attached() {
            return Err(Error::AlreadyAttached);
        }
        let shared: SharedSensor = Arc::clone(&self.inner) as SharedSensor;
        self.router.attach(shared.clone(), false)?;

        inner.device_id = config.device_number as u32;
        inner.transmission_type = config.transmission_type;
        let device_id = inner.device_id;
        P::set_device_id(&mut inner.state, device_id);
        inner.page = Page::new();

        let result = inner.session.begin(
            channel,
            ChannelConfig {
                device_number: config.device_number,
                device_type: P::DEVICE_TYPE,
                transmission_type: config.transmission_type,
                channel_type: config.channel_type,
                radio_frequency: NETWORK_RF_FREQUENCY,
                timeout_duration: config.timeout_duration,
                channel_period: config.channel_period,
            },
            self.router.sink(),
        );
        if result.is_err() {
            self.router.detach(&shared);
        }
        result
    }

    /// Asks the stick to close the channel. Teardown completes
    /// asynchronously; register [`AntPlusSensor::on_detached`] to observe it.
    pub fn close(&self) -> Result<(), Error> {
        self.inner.lock().unwrap().session.close(self.router.sink())
    }

    /// Queues an acknowledged or broadcast transmission to the peer.
    pub fn send(&self, msg: TxMessageData, callback: Option<SendCallback>) -> Result<(), Error> {
        self.inner
            .lock()
            .unwrap()
            .session
            .send(msg, callback, self.router.sink())
    }

    /// Registers a listener invoked with the updated state after every
    /// received data page. Listeners run on the reader thread and must
    /// return promptly.
    pub fn on_data(&self, f: impl Fn(&P::State) + Send + 'static) {
        self.inner.lock().unwrap().listeners.push(Box::new(f));
    }

    /// Runs after the channel has fully unwound back to unassigned.
    pub fn on_detached(&self, f: impl Fn() + Send + 'static) {
        self.inner.lock().unwrap().detached_callback = Some(Box::new(f));
    }

    /// Observes every raw message routed to this channel.
    pub fn set_rx_message_callback(&self, f: Option<fn(&AntMessage)>) {
        self.inner.lock().unwrap().rx_message_callback = f;
    }

    /// Receives `(message id, code)` for channel events the session machine
    /// does not consume.
    pub fn set_event_callback(&self, f: Option<EventCallback>) {
        self.inner.lock().unwrap().session.set_event_callback(f);
    }

    pub fn is_attached(&self) -> bool {
        self.inner.lock().unwrap().session.is_attached()
    }

    /// Peer device number, either configured or discovered after a
    /// wildcard search.
    pub fn device_id(&self) -> u32 {
        self.inner.lock().unwrap().device_id
    }

    pub fn transmission_type(&self) -> u8 {
        self.inner.lock().unwrap().transmission_type
    }

    pub(crate) fn with_state<R>(&self, f: impl FnOnce(&mut P::State) -> R) -> R {
        f(&mut self.inner.lock().unwrap().state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::tests::{frame, mock_router, start_up};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::{Duration, Instant};

    struct TestProfile;

    #[derive(Clone, Debug, Default)]
    struct TestState {
        device_id: u32,
        last_page: [u8; 8],
        frames: u32,
    }

    impl Profile for TestProfile {
        type State = TestState;
        const DEVICE_TYPE: u8 = 0x78;

        fn new_state(device_id: u32) -> TestState {
            TestState {
                device_id,
                ..TestState::default()
            }
        }

        fn set_device_id(state: &mut TestState, device_id: u32) {
            state.device_id = device_id;
        }

        fn update(state: &mut TestState, _page: &mut Page, data: &[u8; 8]) {
            state.last_page = *data;
            state.frames += 1;
        }
    }

    fn config() -> SensorConfig {
        SensorConfig {
            device_number: 1234,
            transmission_type: 0,
            channel_type: ChannelType::BidirectionalSlave,
            timeout_duration: 12,
            channel_period: 8070,
        }
    }

    fn wait_until(mut done: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !done() {
            assert!(Instant::now() < deadline, "condition never became true");
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn attach_walks_cascade_and_delivers_data() {
        let (router, mock) = mock_router();
        start_up(&router, &mock, 8);

        let sensor: AntPlusSensor<TestProfile> = AntPlusSensor::new(&router);
        let frames_seen = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&frames_seen);
        sensor.on_data(move |state: &TestState| {
            counter.store(state.frames, Ordering::SeqCst);
        });
        sensor.attach(0, &config()).unwrap();

        // ack each cascade step as the stick would
        for id in [0x42u8, 0x51, 0x44, 0x45, 0x43, 0x6E, 0x4B] {
            mock.push_chunk(frame(0x40, &[0, id, 0x00]));
        }
        mock.push_chunk(frame(0x4E, &[0, 0x04, 1, 2, 3, 4, 5, 6, 7]));

        wait_until(|| frames_seen.load(Ordering::SeqCst) == 1);
        assert!(sensor.is_attached());
        router.close();
        assert!(!sensor.is_attached());
    }

    #[test]
    fn double_attach_is_rejected() {
        let (router, mock) = mock_router();
        start_up(&router, &mock, 8);

        let sensor: AntPlusSensor<TestProfile> = AntPlusSensor::new(&router);
        sensor.attach(0, &config()).unwrap();
        assert!(matches!(
            sensor.attach(1, &config()),
            Err(Error::AlreadyAttached)
        ));
        router.close();
    }

    #[test]
    fn wildcard_bond_requests_channel_id() {
        let (router, mock) = mock_router();
        start_up(&router, &mock, 8);

        let sensor: AntPlusSensor<TestProfile> = AntPlusSensor::new(&router);
        sensor.attach(
            0,
            &SensorConfig {
                device_number: 0,
                ..config()
            },
        )
        .unwrap();
        let writes_before = mock.wait_for_writes(4).len();

        mock.push_chunk(frame(0x4E, &[0, 0x04, 1, 2, 3, 4, 5, 6, 7]));
        let writes = mock.wait_for_writes(writes_before + 1);
        // request for the bonded channel id
        assert_eq!(&writes[writes.len() - 1][2..5], [0x4D, 0x00, 0x51]);

        mock.push_chunk(frame(0x51, &[0, 0x34, 0x12, 0x78, 5]));
        wait_until(|| sensor.device_id() == 0x1234);
        router.close();
    }
}
