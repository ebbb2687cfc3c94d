// Copyright 2023 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Byte transport: framing, checksums and stream reassembly.
//!
//! Frames are `[SYNC=0xA4][LEN][ID][payload 0..LEN][XOR]` and arrive packed
//! back to back in bulk-in transfers, split at arbitrary boundaries.
//! [`FrameSplitter`] reconstructs whole frames across reads and
//! [`parse_frame`] turns them into typed [`AntMessage`]s.

mod usb;

pub use usb::*;

use crate::error::Error;
use crate::messages::channel::{ChannelEvent, ChannelResponse, MESSAGE_RF};
use crate::messages::data::{AcknowledgedData, BroadcastData, BurstTransferData};
use crate::messages::notifications::{SerialErrorMessage, StartUpMessage};
use crate::messages::requested_response::{Capabilities, ChannelId};
use crate::messages::{
    AntMessage, RxMessage, RxMessageHeader, RxMessageId, SyncByte, TransmitableMessage,
    TxMessageHeader, MAX_MESSAGE_DATA_SIZE,
};

use packed_struct::prelude::*;

pub(crate) const SYNC_BYTE: u8 = SyncByte::Value as u8;
pub(crate) const HEADER_SIZE: usize = 3;
pub(crate) const CHECKSUM_SIZE: usize = 1;

/// Largest possible on-wire frame.
pub const MAX_FRAME_SIZE: usize = MAX_MESSAGE_DATA_SIZE + HEADER_SIZE + CHECKSUM_SIZE;

/// A byte pipe to the stick. One reader thread polls [`Transport::read_chunk`];
/// writers may call [`Transport::write`] from any thread, implementations
/// must not interleave partial frames.
pub trait Transport: Send + Sync {
    /// Blocking bulk read into `buf`. `Ok(0)` means the poll interval
    /// elapsed without data; an error is fatal for the stream.
    fn read_chunk(&self, buf: &mut [u8]) -> Result<usize, Error>;

    /// Writes one complete frame.
    fn write(&self, data: &[u8]) -> Result<(), Error>;

    /// Largest chunk a single bulk-in read can produce.
    fn max_packet_size(&self) -> usize;
}

pub(crate) fn calculate_checksum(buf: &[u8]) -> u8 {
    buf.iter().fold(0, |acc, x| acc ^ x)
}

/// Frames `msg` into `buf` and returns the written slice.
pub fn create_packed_message<'a>(
    buf: &'a mut [u8],
    msg: &dyn TransmitableMessage,
) -> Result<&'a [u8], PackingError> {
    let msg_len = msg.serialize_message(&mut buf[HEADER_SIZE..])?;
    let header = TxMessageHeader {
        sync: SyncByte::Value,
        msg_length: msg_len as u8,
        msg_id: msg.get_tx_msg_id(),
    };

    let padded_len = msg_len + HEADER_SIZE;
    header.pack_to_slice(&mut buf[..HEADER_SIZE])?;
    buf[padded_len] = calculate_checksum(&buf[..padded_len]);

    Ok(&buf[..padded_len + CHECKSUM_SIZE])
}

/// Verifies and decodes one complete frame.
pub(crate) fn parse_frame(frame: &[u8]) -> Result<AntMessage, Error> {
    if frame.len() < HEADER_SIZE + CHECKSUM_SIZE {
        return Err(Error::BadLength {
            expected: HEADER_SIZE + CHECKSUM_SIZE,
            actual: frame.len(),
        });
    }
    let msg_length = frame[1] as usize;
    if frame.len() != msg_length + HEADER_SIZE + CHECKSUM_SIZE {
        return Err(Error::BadLength {
            expected: msg_length + HEADER_SIZE + CHECKSUM_SIZE,
            actual: frame.len(),
        });
    }

    let expected = calculate_checksum(&frame[..frame.len() - CHECKSUM_SIZE]);
    let checksum = frame[frame.len() - CHECKSUM_SIZE];
    if expected != checksum {
        return Err(Error::BadChecksum {
            expected,
            actual: checksum,
        });
    }

    let msg_id =
        RxMessageId::from_primitive(frame[2]).ok_or(Error::UnsupportedMessageId(frame[2]))?;
    let msg_slice = &frame[HEADER_SIZE..HEADER_SIZE + msg_length];

    let body = match msg_id {
        RxMessageId::StartUpMessage => {
            RxMessage::StartUpMessage(StartUpMessage::unpack_from_slice(msg_slice)?)
        }
        RxMessageId::SerialErrorMessage => {
            RxMessage::SerialErrorMessage(SerialErrorMessage::unpack_from_slice(msg_slice)?)
        }

        RxMessageId::BroadcastData => {
            RxMessage::BroadcastData(BroadcastData::unpack_from_slice(msg_slice)?)
        }
        RxMessageId::AcknowledgedData => {
            RxMessage::AcknowledgedData(AcknowledgedData::unpack_from_slice(msg_slice)?)
        }
        RxMessageId::BurstTransferData => {
            RxMessage::BurstTransferData(BurstTransferData::unpack_from_slice(msg_slice)?)
        }

        RxMessageId::ChannelEvent => {
            if msg_slice.len() > 1 && msg_slice[1] == MESSAGE_RF {
                RxMessage::ChannelEvent(ChannelEvent::unpack_from_slice(msg_slice)?)
            } else {
                RxMessage::ChannelResponse(ChannelResponse::unpack_from_slice(msg_slice)?)
            }
        }
        RxMessageId::ChannelId => RxMessage::ChannelId(ChannelId::unpack_from_slice(msg_slice)?),
        RxMessageId::Capabilities => {
            RxMessage::Capabilities(Capabilities::unpack_from_slice(msg_slice)?)
        }
    };

    Ok(AntMessage {
        header: RxMessageHeader {
            sync: SyncByte::Value,
            msg_length: msg_length as u8,
            msg_id,
        },
        message: body,
        checksum,
    })
}

/// Reassembles frames out of arbitrarily partitioned bulk-in chunks.
///
/// A non-SYNC byte at a frame boundary means the stream is unrecoverably
/// desynchronized and the driver must shut down.
#[derive(Default)]
pub struct FrameSplitter {
    leftover: Vec<u8>,
}

impl FrameSplitter {
    pub fn new() -> Self {
        FrameSplitter::default()
    }

    /// Feeds one chunk, invoking `handle` once per completed frame.
    pub fn push<F: FnMut(&[u8])>(&mut self, chunk: &[u8], mut handle: F) -> Result<(), Error> {
        if chunk.is_empty() {
            return Ok(());
        }

        let owned;
        let buf: &[u8] = if self.leftover.is_empty() {
            chunk
        } else {
            self.leftover.extend_from_slice(chunk);
            owned = std::mem::take(&mut self.leftover);
            &owned
        };

        let mut begin = 0;
        while begin < buf.len() {
            if buf[begin] != SYNC_BYTE {
                return Err(Error::LostSync(buf[begin]));
            }
            if begin + 1 == buf.len() {
                // length byte not in yet
                self.leftover = buf[begin..].to_vec();
                break;
            }
            let end = begin + buf[begin + 1] as usize + HEADER_SIZE + CHECKSUM_SIZE;
            if end > buf.len() {
                self.leftover = buf[begin..].to_vec();
                break;
            }
            handle(&buf[begin..end]);
            begin = end;
        }
        Ok(())
    }

    #[cfg(test)]
    fn leftover_len(&self) -> usize {
        self.leftover.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::config::SetNetworkKey;
    use crate::messages::control::{RequestMessage, RequestableMessageId};
    use crate::messages::TxMessageId;

    fn encode(msg: &dyn TransmitableMessage) -> Vec<u8> {
        let mut buf = [0u8; MAX_FRAME_SIZE];
        create_packed_message(&mut buf, msg).unwrap().to_vec()
    }

    #[test]
    fn checksum() {
        let data = [0xA4, 6, 0x59, 2, 0x44, 0x33, 120, 34, 2];
        assert_eq!(calculate_checksum(&data), 214);
    }

    #[test]
    fn checksum_closes_the_frame() {
        let frame = encode(&RequestMessage::new(0, RequestableMessageId::Capabilities));
        assert_eq!(frame, [0xA4, 0x02, 0x4D, 0x00, 0x54, 0xBF]);
        assert_eq!(
            calculate_checksum(&frame[..frame.len() - 1]),
            frame[frame.len() - 1]
        );
    }

    #[test]
    fn encode_decode_roundtrip() {
        let msg = ChannelId::new(2, 0xBEEF, 120, 5);
        let frame = encode(&msg);
        let parsed = parse_frame(&frame).unwrap();
        assert_eq!(parsed.header.msg_id as u8, TxMessageId::ChannelId as u8);
        assert_eq!(parsed.header.msg_length, 5);
        assert_eq!(parsed.message, RxMessage::ChannelId(msg));
    }

    #[test]
    fn payload_survives_roundtrip() {
        let payload: [u8; 8] = [0x10, 0x32, 0x54, 0x76, 0x98, 0xBA, 0xDC, 0xFE];
        let frame = encode(&crate::messages::data::BroadcastData::new(5, payload));
        let parsed = parse_frame(&frame).unwrap();
        match parsed.message {
            RxMessage::BroadcastData(data) => {
                assert_eq!(data.payload.channel_number, 5);
                assert_eq!(data.payload.data, payload);
            }
            other => panic!("unexpected message {other:?}"),
        }
    }

    #[test]
    fn single_bit_corruption_is_detected() {
        let frame = encode(&crate::messages::data::BroadcastData::new(0, [1, 2, 3, 4, 5, 6, 7, 8]));
        // Byte 0 flips are caught by the splitter as sync loss; everything
        // else must fail the checksum or length validation.
        for byte in 1..frame.len() {
            for bit in 0..8 {
                let mut corrupted = frame.clone();
                corrupted[byte] ^= 1 << bit;
                assert!(
                    parse_frame(&corrupted).is_err(),
                    "flip at byte {byte} bit {bit} went undetected"
                );
            }
        }
    }

    #[test]
    fn any_payload_length_frames_and_verifies() {
        for len in [0usize, 1, 8, 127, 255] {
            let mut frame = vec![SYNC_BYTE, len as u8, 0x4E];
            frame.extend((0..len).map(|i| i as u8));
            frame.push(calculate_checksum(&frame));

            let mut splitter = FrameSplitter::new();
            let mut seen = Vec::new();
            splitter.push(&frame, |f| seen.push(f.to_vec())).unwrap();
            assert_eq!(seen, vec![frame.clone()], "length {len}");
            assert_eq!(
                calculate_checksum(&frame[..frame.len() - 1]),
                frame[frame.len() - 1]
            );
        }
    }

    #[test]
    fn reassembly_is_partition_invariant() {
        let mut stream = Vec::new();
        let frames: Vec<Vec<u8>> = vec![
            encode(&RequestMessage::new(0, RequestableMessageId::Capabilities)),
            encode(&SetNetworkKey::new(0, [9, 8, 7, 6, 5, 4, 3, 2])),
            encode(&crate::messages::control::OpenChannel::new(1)),
            encode(&crate::messages::data::BroadcastData::new(0, [1; 8])),
        ];
        for f in &frames {
            stream.extend_from_slice(f);
        }

        for chunk_size in 1..=stream.len() {
            let mut splitter = FrameSplitter::new();
            let mut out: Vec<Vec<u8>> = Vec::new();
            for chunk in stream.chunks(chunk_size) {
                splitter.push(chunk, |frame| out.push(frame.to_vec())).unwrap();
            }
            assert_eq!(out, frames, "chunk size {chunk_size}");
            assert_eq!(splitter.leftover_len(), 0);
        }
    }

    #[test]
    fn aggregated_read_dispatches_each_frame() {
        let a = encode(&crate::messages::control::OpenChannel::new(0));
        let b = encode(&crate::messages::control::CloseChannel::new(0));
        let mut both = a.clone();
        both.extend_from_slice(&b);

        let mut splitter = FrameSplitter::new();
        let mut count = 0;
        splitter.push(&both, |_| count += 1).unwrap();
        assert_eq!(count, 2);
    }

    #[test]
    fn split_across_sync_boundary() {
        let frame = encode(&SetNetworkKey::new(0, [1, 2, 3, 4, 5, 6, 7, 8]));
        let mut splitter = FrameSplitter::new();
        let mut out = Vec::new();

        // everything up to and including the sync byte of the second frame
        let mut first_read = frame.clone();
        first_read.push(SYNC_BYTE);
        splitter
            .push(&first_read, |f| out.push(f.to_vec()))
            .unwrap();
        assert_eq!(out.len(), 1);

        splitter
            .push(&frame[1..], |f| out.push(f.to_vec()))
            .unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[1], frame);
        assert_eq!(splitter.leftover_len(), 0);
    }

    #[test]
    fn non_sync_byte_is_fatal() {
        let mut splitter = FrameSplitter::new();
        let result = splitter.push(&[0xA5, 0x01, 0x6F, 0x20, 0x6A], |_| {});
        assert!(matches!(result, Err(Error::LostSync(0xA5))));
    }

    #[test]
    fn desync_after_a_valid_frame_is_fatal() {
        let mut frame = encode(&crate::messages::control::OpenChannel::new(0));
        frame.push(0x00);
        frame.push(0x00);
        let mut splitter = FrameSplitter::new();
        let mut count = 0;
        let result = splitter.push(&frame, |_| count += 1);
        assert_eq!(count, 1);
        assert!(matches!(result, Err(Error::LostSync(0x00))));
    }
}
