//! Ordered reassembly of inbound frames into messages.

use std::collections::BTreeMap;

use bytes::{Bytes, BytesMut};
use tracing::trace;

use crate::channel::ChannelId;
use crate::codec::DEFAULT_MAX_PAYLOAD;
use crate::error::{FrameError, Result};
use crate::frame::{Frame, Message};

/// Per-channel reassembly buffer.
///
/// Holds at most one incomplete message. Senders never interleave two
/// messages on one channel, so a frame for another sequence while a message
/// is incomplete is a protocol violation rather than something to recover.
#[derive(Debug)]
pub struct Reassembler {
    channel: ChannelId,
    max_message_size: usize,
    partial: Option<Partial>,
}

#[derive(Debug)]
struct Partial {
    sequence: u64,
    total: u32,
    parts: BTreeMap<u32, Bytes>,
    saw_final: bool,
    size: usize,
}

impl Reassembler {
    /// Create a reassembler for `channel` with the default message bound.
    pub fn new(channel: ChannelId) -> Self {
        Self::with_max_message_size(channel, DEFAULT_MAX_PAYLOAD)
    }

    /// Create a reassembler that refuses messages larger than `max_message_size`.
    pub fn with_max_message_size(channel: ChannelId, max_message_size: usize) -> Self {
        Self {
            channel,
            max_message_size,
            partial: None,
        }
    }

    /// The channel whose frames this buffer accepts.
    pub fn channel(&self) -> &ChannelId {
        &self.channel
    }

    /// Sequence number of the message currently being reassembled, if any.
    pub fn in_progress(&self) -> Option<u64> {
        self.partial.as_ref().map(|p| p.sequence)
    }

    /// Drop any partially received message.
    pub fn clear(&mut self) {
        self.partial = None;
    }

    /// Feed one frame.
    ///
    /// Returns the reconstructed message once its last missing frame arrives.
    /// Any error leaves the buffer empty; callers treat it as fatal.
    pub fn push(&mut self, frame: Frame) -> Result<Option<Message>> {
        let result = self.accept(frame);
        if result.is_err() {
            self.partial = None;
        }
        result
    }

    fn accept(&mut self, frame: Frame) -> Result<Option<Message>> {
        if frame.channel != self.channel {
            return Err(FrameError::ChannelMismatch {
                expected: self.channel.clone(),
                actual: frame.channel,
            });
        }
        check_shape(&frame)?;

        if let Some(partial) = &self.partial {
            if partial.sequence != frame.sequence {
                return Err(FrameError::SequenceConflict {
                    in_progress: partial.sequence,
                    received: frame.sequence,
                });
            }
        }

        // Single-frame messages skip the buffer entirely.
        if frame.total == 1 && self.partial.is_none() {
            self.check_size(frame.payload.len())?;
            return Ok(Some(Message::new(frame.sequence, frame.payload)));
        }

        // Every frame but the last carries at least one byte, so the declared
        // count alone can rule a message out before anything is stored.
        if self.partial.is_none() {
            self.check_size(frame.total as usize - 1)?;
        }

        let partial = self.partial.get_or_insert_with(|| Partial {
            sequence: frame.sequence,
            total: frame.total,
            parts: BTreeMap::new(),
            saw_final: false,
            size: 0,
        });

        if partial.total != frame.total {
            return Err(FrameError::MalformedFrame(format!(
                "sequence {} changed frame count from {} to {}",
                frame.sequence, partial.total, frame.total
            )));
        }

        if partial.parts.contains_key(&frame.index) {
            return Err(FrameError::MalformedFrame(format!(
                "duplicate frame {} for sequence {}",
                frame.index, frame.sequence
            )));
        }

        let size = partial.size + frame.payload.len();
        if size > self.max_message_size {
            return Err(FrameError::MessageTooLarge {
                size,
                max: self.max_message_size,
            });
        }

        partial.size = size;
        partial.saw_final |= frame.is_final;
        partial.parts.insert(frame.index, frame.payload);

        if (partial.parts.len() as u64) < u64::from(partial.total) || !partial.saw_final {
            return Ok(None);
        }

        let Some(done) = self.partial.take() else {
            return Ok(None);
        };
        let mut payload = BytesMut::with_capacity(done.size);
        for part in done.parts.into_values() {
            payload.extend_from_slice(&part);
        }
        trace!(
            channel = %self.channel,
            sequence = done.sequence,
            frames = done.total,
            size = done.size,
            "message reassembled"
        );
        Ok(Some(Message::new(done.sequence, payload.freeze())))
    }

    fn check_size(&self, size: usize) -> Result<()> {
        if size > self.max_message_size {
            return Err(FrameError::MessageTooLarge {
                size,
                max: self.max_message_size,
            });
        }
        Ok(())
    }
}

fn check_shape(frame: &Frame) -> Result<()> {
    if frame.total == 0 {
        return Err(FrameError::MalformedFrame(format!(
            "sequence {} declares zero frames",
            frame.sequence
        )));
    }
    if frame.index >= frame.total {
        return Err(FrameError::MalformedFrame(format!(
            "frame index {} out of range for {} frames",
            frame.index, frame.total
        )));
    }
    let last = frame.index + 1 == frame.total;
    if frame.is_final != last {
        return Err(FrameError::MalformedFrame(format!(
            "final flag {} on frame {} of {}",
            frame.is_final, frame.index, frame.total
        )));
    }
    if !last && frame.payload.is_empty() {
        return Err(FrameError::MalformedFrame(format!(
            "empty frame {} of {} for sequence {}",
            frame.index, frame.total, frame.sequence
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::split_message;

    fn channel(name: &str) -> ChannelId {
        ChannelId::new(name).unwrap()
    }

    fn frames_for(name: &str, sequence: u64, payload: &[u8], max: usize) -> Vec<Frame> {
        let msg = Message::new(sequence, Bytes::copy_from_slice(payload));
        split_message(&channel(name), &msg, max).unwrap()
    }

    #[test]
    fn reassembles_two_frames() {
        let mut reasm = Reassembler::new(channel("A"));
        let mut frames = frames_for("A", 0, b"abcdefgh", 4).into_iter();

        assert_eq!(reasm.push(frames.next().unwrap()).unwrap(), None);
        assert_eq!(reasm.in_progress(), Some(0));

        let msg = reasm.push(frames.next().unwrap()).unwrap().unwrap();
        assert_eq!(msg.sequence, 0);
        assert_eq!(msg.payload.as_ref(), b"abcdefgh");
        assert_eq!(reasm.in_progress(), None);
    }

    #[test]
    fn roundtrip_all_sizes() {
        for max in [1usize, 2, 3, 5, 8, 13] {
            let mut reasm = Reassembler::new(channel("A"));
            for (sequence, size) in (0..40usize).enumerate() {
                let payload: Vec<u8> = (0..size).map(|i| (i * 31 % 251) as u8).collect();
                let mut out = None;
                for frame in frames_for("A", sequence as u64, &payload, max) {
                    assert!(out.is_none(), "message completed early");
                    out = reasm.push(frame).unwrap();
                }
                let msg = out.expect("message should complete on last frame");
                assert_eq!(msg.sequence, sequence as u64);
                assert_eq!(msg.payload.as_ref(), payload.as_slice());
            }
        }
    }

    #[test]
    fn empty_message_roundtrip() {
        let mut reasm = Reassembler::new(channel("B"));
        let frames = frames_for("B", 0, b"", 4);
        assert_eq!(frames.len(), 1);

        let msg = reasm.push(frames[0].clone()).unwrap().unwrap();
        assert!(msg.payload.is_empty());
    }

    #[test]
    fn channel_mismatch_rejected() {
        let mut reasm = Reassembler::new(channel("A"));
        let frame = Frame::single(channel("B"), 0, "x");

        let err = reasm.push(frame).unwrap_err();
        assert!(matches!(err, FrameError::ChannelMismatch { .. }));
        assert!(err.is_protocol_violation());
    }

    #[test]
    fn new_sequence_while_incomplete_conflicts() {
        let mut reasm = Reassembler::new(channel("A"));
        let first = frames_for("A", 0, b"abcdefgh", 4);
        let second = frames_for("A", 1, b"ijkl", 4);

        assert_eq!(reasm.push(first[0].clone()).unwrap(), None);
        let err = reasm.push(second[0].clone()).unwrap_err();
        assert!(matches!(
            err,
            FrameError::SequenceConflict {
                in_progress: 0,
                received: 1
            }
        ));
        assert_eq!(reasm.in_progress(), None);
    }

    #[test]
    fn out_of_order_frames_within_message_still_complete() {
        let mut reasm = Reassembler::new(channel("A"));
        let frames = frames_for("A", 4, b"abcdefghij", 4);

        assert_eq!(reasm.push(frames[2].clone()).unwrap(), None);
        assert_eq!(reasm.push(frames[0].clone()).unwrap(), None);
        let msg = reasm.push(frames[1].clone()).unwrap().unwrap();
        assert_eq!(msg.payload.as_ref(), b"abcdefghij");
    }

    #[test]
    fn duplicate_index_is_malformed() {
        let mut reasm = Reassembler::new(channel("A"));
        let frames = frames_for("A", 0, b"abcdefghij", 4);

        reasm.push(frames[0].clone()).unwrap();
        let err = reasm.push(frames[0].clone()).unwrap_err();
        assert!(matches!(err, FrameError::MalformedFrame(_)));
    }

    #[test]
    fn inconsistent_metadata_is_malformed() {
        let mut reasm = Reassembler::new(channel("A"));

        let mut zero_total = Frame::single(channel("A"), 0, "x");
        zero_total.total = 0;
        assert!(matches!(
            reasm.push(zero_total),
            Err(FrameError::MalformedFrame(_))
        ));

        let mut out_of_range = Frame::single(channel("A"), 0, "x");
        out_of_range.index = 1;
        assert!(matches!(
            reasm.push(out_of_range),
            Err(FrameError::MalformedFrame(_))
        ));

        let mut missing_final = Frame::single(channel("A"), 0, "x");
        missing_final.is_final = false;
        assert!(matches!(
            reasm.push(missing_final),
            Err(FrameError::MalformedFrame(_))
        ));
    }

    #[test]
    fn total_change_mid_message_is_malformed() {
        let mut reasm = Reassembler::new(channel("A"));
        let frames = frames_for("A", 0, b"abcdefghij", 4);
        reasm.push(frames[0].clone()).unwrap();

        let mut bad = frames[1].clone();
        bad.total = 4;
        assert!(matches!(reasm.push(bad), Err(FrameError::MalformedFrame(_))));
    }

    #[test]
    fn message_size_bound_enforced() {
        let mut reasm = Reassembler::with_max_message_size(channel("A"), 6);
        let frames = frames_for("A", 0, b"abcdefgh", 4);

        reasm.push(frames[0].clone()).unwrap();
        let err = reasm.push(frames[1].clone()).unwrap_err();
        assert!(matches!(err, FrameError::MessageTooLarge { size: 8, max: 6 }));

        let err = reasm
            .push(Frame::single(channel("A"), 1, "0123456"))
            .unwrap_err();
        assert!(matches!(err, FrameError::MessageTooLarge { .. }));
    }

    #[test]
    fn huge_declared_frame_count_is_refused_up_front() {
        let mut reasm = Reassembler::with_max_message_size(channel("A"), 1024);
        let frame = Frame {
            channel: channel("A"),
            sequence: 0,
            index: 0,
            total: u32::MAX,
            is_final: false,
            payload: Bytes::from_static(b"x"),
        };

        let err = reasm.push(frame).unwrap_err();
        assert!(matches!(err, FrameError::MessageTooLarge { max: 1024, .. }));
        assert!(err.is_protocol_violation());
        assert_eq!(reasm.in_progress(), None);
    }

    #[test]
    fn declared_frame_count_is_checked_against_size_bound() {
        let frames = frames_for("A", 0, b"abcd", 1);
        assert_eq!(frames.len(), 4);

        let mut reasm = Reassembler::with_max_message_size(channel("A"), 2);
        let err = reasm.push(frames[0].clone()).unwrap_err();
        assert!(matches!(err, FrameError::MessageTooLarge { size: 3, max: 2 }));

        let mut reasm = Reassembler::with_max_message_size(channel("A"), 4);
        let mut out = None;
        for frame in frames {
            out = reasm.push(frame).unwrap();
        }
        assert_eq!(out.unwrap().payload.as_ref(), b"abcd");
    }

    #[test]
    fn empty_non_final_frame_is_malformed() {
        let mut reasm = Reassembler::new(channel("A"));
        let frame = Frame {
            channel: channel("A"),
            sequence: 0,
            index: 0,
            total: 2,
            is_final: false,
            payload: Bytes::new(),
        };
        assert!(matches!(reasm.push(frame), Err(FrameError::MalformedFrame(_))));
    }

    #[test]
    fn clear_discards_partial_message() {
        let mut reasm = Reassembler::new(channel("A"));
        let frames = frames_for("A", 0, b"abcdefgh", 4);
        reasm.push(frames[0].clone()).unwrap();

        reasm.clear();
        assert_eq!(reasm.in_progress(), None);
        let msg = reasm
            .push(Frame::single(channel("A"), 1, "next"))
            .unwrap()
            .unwrap();
        assert_eq!(msg.sequence, 1);
    }
}
