// Copyright 2023 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Per-channel session bring-up and the acknowledged-data send queue.
//!
//! Every command in the configuration cascade must be acknowledged by the
//! stick before the next one goes out, so the session walks one state per
//! [`ChannelResponse`]. RF events drive teardown and resolve in-flight
//! transfers.

use crate::drivers::{create_packed_message, MAX_FRAME_SIZE};
use crate::error::Error;
use crate::messages::channel::{ChannelEvent, ChannelResponse, MessageCode, MESSAGE_RF};
use crate::messages::config::{
    AssignChannel, ChannelId, ChannelPeriod, ChannelRfFrequency, ChannelType, EnableExtRxMessages,
    LibConfig, SearchTimeout, UnAssignChannel,
};
use crate::messages::control::{CloseChannel, OpenChannel, OpenRxScanMode};
use crate::messages::{TransmitableMessage, TxMessageData, TxMessageId};

use arrayvec::ArrayVec;
use std::collections::VecDeque;
use std::time::Duration;
use tracing::{debug, warn};

/// Network number the driver configures the ANT+ key on.
pub const DEFAULT_NETWORK_NUMBER: u8 = 0x00;

// Data frames are always channel + 8 bytes of payload
const DATA_FRAME_SIZE: usize = 13;

/// Helper to convert durations to search timeouts.
/// Anything greater than or equal to 637.5s saturates to the never-timeout
/// value per the ANT spec.
pub const fn duration_to_search_timeout(t: Duration) -> u8 {
    // Scale up by 10 to avoid floating point math as ratio is 2.5s to 1 count
    let counts = (t.as_secs() * 10) / 25;
    if counts > 255 {
        255
    } else {
        counts as u8
    }
}

/// Outbound frame sink. The router implements this over the USB transport;
/// tests substitute a recorder.
pub trait TxSink {
    /// Writes an already framed message.
    fn write_frame(&self, frame: &[u8]) -> Result<(), Error>;

    /// Frames and writes a message.
    fn send_message(&self, msg: &dyn TransmitableMessage) -> Result<(), Error> {
        let mut buf = [0u8; MAX_FRAME_SIZE];
        let frame = create_packed_message(&mut buf, msg)?;
        self.write_frame(frame)
    }
}

/// Completion handler for an acknowledged transmission. Receives `true`
/// only when the stick reported the transfer completed.
pub type SendCallback = Box<dyn FnOnce(bool) + Send>;

/// Opaque channel event hook: raw triggering message id (0x01 for RF
/// events) and response code, for anything the session does not consume.
pub type EventCallback = fn(u8, MessageCode);

struct QueuedMessage {
    frame: ArrayVec<u8, DATA_FRAME_SIZE>,
    callback: Option<SendCallback>,
}

/// Static configuration for a single-peer channel.
#[derive(Clone, Copy, Debug)]
pub struct ChannelConfig {
    /// Peer device number, 0 to wildcard-search.
    pub device_number: u16,
    pub device_type: u8,
    /// 0 to wildcard.
    pub transmission_type: u8,
    pub channel_type: ChannelType,
    /// Offset from 2400 MHz.
    pub radio_frequency: u8,
    /// Search timeout in 2.5s counts, 0xFF disables.
    pub timeout_duration: u8,
    /// Message period in 1/32768s counts.
    pub channel_period: u16,
}

/// Configuration for the promiscuous scanning channel.
#[derive(Clone, Copy, Debug)]
pub struct ScanConfig {
    pub channel_type: ChannelType,
    pub radio_frequency: u8,
}

#[derive(Clone, Copy)]
enum SessionMode {
    Standard(ChannelConfig),
    Scan(ScanConfig),
}

/// Bring-up progress. States named `*Pending` are waiting for the stick to
/// acknowledge the command of the same name.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum SessionState {
    Idle,
    AssignPending,
    ChannelIdPending,
    TimeoutPending,
    RfFrequencyPending,
    PeriodPending,
    RxExtPending,
    LibConfigPending,
    OpenPending,
    Open,
    Scanning,
    Closing,
    Failed,
}

/// What the dispatcher should do with the sensor after a frame.
#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) enum SessionOutcome {
    Continue,
    /// Unassign acknowledged, the channel slot is free again.
    Detached,
}

pub(crate) struct ChannelSession {
    channel: Option<u8>,
    state: SessionState,
    mode: Option<SessionMode>,
    queue: VecDeque<QueuedMessage>,
    event_callback: Option<EventCallback>,
}

impl ChannelSession {
    pub fn new() -> Self {
        Self {
            channel: None,
            state: SessionState::Idle,
            mode: None,
            queue: VecDeque::new(),
            event_callback: None,
        }
    }

    pub fn channel(&self) -> Option<u8> {
        self.channel
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_attached(&self) -> bool {
        self.channel.is_some()
    }

    pub fn set_event_callback(&mut self, f: Option<EventCallback>) {
        self.event_callback = f;
    }

    /// Starts the bring-up cascade for a single-peer channel.
    pub fn begin(
        &mut self,
        channel: u8,
        config: ChannelConfig,
        sink: &dyn TxSink,
    ) -> Result<(), Error> {
        if self.channel.is_some() {
            return Err(Error::AlreadyAttached);
        }
        sink.send_message(&AssignChannel::new(
            channel,
            config.channel_type,
            DEFAULT_NETWORK_NUMBER,
        ))?;
        self.channel = Some(channel);
        self.mode = Some(SessionMode::Standard(config));
        self.state = SessionState::AssignPending;
        Ok(())
    }

    /// Starts the bring-up cascade for the scanning channel (always 0).
    pub fn begin_scan(&mut self, config: ScanConfig, sink: &dyn TxSink) -> Result<(), Error> {
        if self.channel.is_some() {
            return Err(Error::AlreadyAttached);
        }
        sink.send_message(&AssignChannel::new(
            0,
            config.channel_type,
            DEFAULT_NETWORK_NUMBER,
        ))?;
        self.channel = Some(0);
        self.mode = Some(SessionMode::Scan(config));
        self.state = SessionState::AssignPending;
        Ok(())
    }

    /// Requests channel shutdown; the stick answers with an
    /// EventChannelClosed which finishes the teardown.
    pub fn close(&mut self, sink: &dyn TxSink) -> Result<(), Error> {
        let channel = self.channel.ok_or(Error::NotAttached)?;
        sink.send_message(&CloseChannel::new(channel))
    }

    /// Drops all session state without touching the radio. Used when the
    /// transport is already gone.
    pub fn reset(&mut self) {
        self.channel = None;
        self.mode = None;
        self.state = SessionState::Idle;
        self.queue.clear();
    }

    /// Queues an acknowledged/broadcast transmission. The head of the queue
    /// is the only message in flight; everything else waits for the stick
    /// to resolve it.
    pub fn send(
        &mut self,
        mut msg: TxMessageData,
        callback: Option<SendCallback>,
        sink: &dyn TxSink,
    ) -> Result<(), Error> {
        let channel = self.channel.ok_or(Error::NotAttached)?;
        msg.set_channel(channel);

        let mut frame = ArrayVec::from([0u8; DATA_FRAME_SIZE]);
        create_packed_message(&mut frame, &msg)?;
        self.queue.push_back(QueuedMessage { frame, callback });

        if self.queue.len() == 1 {
            if let Some(head) = self.queue.front() {
                sink.write_frame(&head.frame)?;
            }
        }
        Ok(())
    }

    #[cfg(test)]
    fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// Walks the cascade on a command acknowledgement.
    pub fn handle_response(
        &mut self,
        resp: &ChannelResponse,
        sink: &dyn TxSink,
    ) -> Result<SessionOutcome, Error> {
        use SessionState::*;

        let ok = resp.message_code == MessageCode::ResponseNoError;
        let channel = match self.channel {
            Some(c) => c,
            None => return Ok(SessionOutcome::Continue),
        };

        match (resp.message_id, self.state, self.mode) {
            (TxMessageId::AssignChannel, AssignPending, Some(mode)) => {
                if !ok {
                    return self.fail(resp);
                }
                match mode {
                    SessionMode::Standard(c) => sink.send_message(&ChannelId::new(
                        channel,
                        c.device_number,
                        c.device_type,
                        c.transmission_type,
                    ))?,
                    SessionMode::Scan(_) => {
                        sink.send_message(&ChannelId::new(channel, 0, 0, 0))?
                    }
                }
                self.state = ChannelIdPending;
            }
            (TxMessageId::ChannelId, ChannelIdPending, Some(mode)) => {
                if !ok {
                    return self.fail(resp);
                }
                match mode {
                    SessionMode::Standard(c) => {
                        sink.send_message(&SearchTimeout::new(channel, c.timeout_duration))?;
                        self.state = TimeoutPending;
                    }
                    SessionMode::Scan(c) => {
                        sink.send_message(&ChannelRfFrequency::new(channel, c.radio_frequency))?;
                        self.state = RfFrequencyPending;
                    }
                }
            }
            (TxMessageId::SearchTimeout, TimeoutPending, Some(SessionMode::Standard(c))) => {
                if !ok {
                    return self.fail(resp);
                }
                sink.send_message(&ChannelRfFrequency::new(channel, c.radio_frequency))?;
                self.state = RfFrequencyPending;
            }
            (TxMessageId::ChannelRfFrequency, RfFrequencyPending, Some(mode)) => {
                if !ok {
                    return self.fail(resp);
                }
                match mode {
                    SessionMode::Standard(c) => {
                        sink.send_message(&ChannelPeriod::new(channel, c.channel_period))?;
                        self.state = PeriodPending;
                    }
                    SessionMode::Scan(_) => {
                        sink.send_message(&EnableExtRxMessages::new(true))?;
                        self.state = RxExtPending;
                    }
                }
            }
            (TxMessageId::ChannelPeriod, PeriodPending, _) => {
                if !ok {
                    return self.fail(resp);
                }
                sink.send_message(&LibConfig::new_all_enabled(channel))?;
                self.state = LibConfigPending;
            }
            (TxMessageId::EnableExtRxMessages, RxExtPending, _) => {
                if !ok {
                    return self.fail(resp);
                }
                sink.send_message(&LibConfig::new_all_enabled(channel))?;
                self.state = LibConfigPending;
            }
            (TxMessageId::LibConfig, LibConfigPending, Some(mode)) => {
                if !ok {
                    return self.fail(resp);
                }
                match mode {
                    SessionMode::Standard(_) => {
                        sink.send_message(&OpenChannel::new(channel))?;
                    }
                    SessionMode::Scan(_) => {
                        sink.send_message(&OpenRxScanMode::new())?;
                    }
                }
                self.state = OpenPending;
            }
            (TxMessageId::OpenChannel, OpenPending, _) => {
                if !ok {
                    return self.fail(resp);
                }
                debug!(channel, "channel open");
                self.state = Open;
            }
            (TxMessageId::OpenRxScanMode, OpenPending, _) => {
                if !ok {
                    return self.fail(resp);
                }
                debug!("scanning mode open");
                self.state = Scanning;
            }
            (TxMessageId::CloseChannel, _, _) => {
                // Teardown continues on the EventChannelClosed RF event
            }
            (TxMessageId::UnAssignChannel, _, _) => {
                debug!(channel, "channel unassigned");
                self.reset();
                return Ok(SessionOutcome::Detached);
            }
            (TxMessageId::AcknowledgedData, _, _)
                if resp.message_code == MessageCode::TransferInProgress =>
            {
                // Transient while a transfer is pending, the terminal RF
                // event resolves the queue
            }
            _ => self.surface(resp.message_id as u8, resp.message_code),
        }
        Ok(SessionOutcome::Continue)
    }

    /// Handles asynchronous RF events.
    pub fn handle_event(
        &mut self,
        event: &ChannelEvent,
        sink: &dyn TxSink,
    ) -> Result<SessionOutcome, Error> {
        let channel = match self.channel {
            Some(c) => c,
            None => return Ok(SessionOutcome::Continue),
        };

        match event.message_code {
            MessageCode::EventChannelClosed | MessageCode::EventRxFailGoToSearch => {
                sink.send_message(&UnAssignChannel::new(channel))?;
                self.state = SessionState::Closing;
            }
            MessageCode::EventTransferTxCompleted
            | MessageCode::EventTransferTxFailed
            | MessageCode::EventRxFailed
            | MessageCode::InvalidScanTxChannel => {
                self.resolve_queue(event.message_code, sink);
            }
            code => self.surface(MESSAGE_RF, code),
        }
        Ok(SessionOutcome::Continue)
    }

    fn resolve_queue(&mut self, code: MessageCode, sink: &dyn TxSink) {
        let Some(message) = self.queue.pop_front() else {
            return;
        };
        if let Some(callback) = message.callback {
            callback(code == MessageCode::EventTransferTxCompleted);
        }
        if let Some(next) = self.queue.front() {
            if let Err(e) = sink.write_frame(&next.frame) {
                warn!(error = %e, "failed to write queued message");
            }
        }
    }

    fn fail(&mut self, resp: &ChannelResponse) -> Result<SessionOutcome, Error> {
        warn!(
            msg_id = resp.message_id as u8,
            code = resp.message_code as u8,
            "channel configuration rejected"
        );
        self.state = SessionState::Failed;
        self.surface(resp.message_id as u8, resp.message_code);
        Ok(SessionOutcome::Continue)
    }

    fn surface(&self, msg_id: u8, code: MessageCode) {
        debug!(msg_id, code = code as u8, "unhandled channel event");
        if let Some(f) = self.event_callback {
            f(msg_id, code);
        }
    }
}
