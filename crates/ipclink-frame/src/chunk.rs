//! Splitting outbound messages into frames.

use crate::channel::ChannelId;
use crate::error::{FrameError, Result};
use crate::frame::{Frame, Message};

/// Number of frames a payload of `len` bytes needs at `max_frame_size`.
///
/// An empty payload still needs one frame.
pub fn frame_count(len: usize, max_frame_size: usize) -> Result<u32> {
    if max_frame_size == 0 {
        return Err(FrameError::InvalidFrameSize);
    }
    let count = len.div_ceil(max_frame_size).max(1);
    u32::try_from(count).map_err(|_| FrameError::PayloadTooLarge {
        size: len,
        max: max_frame_size.saturating_mul(u32::MAX as usize),
    })
}

/// Split a message into frames of at most `max_frame_size` payload bytes.
///
/// Frames are returned in index order. Each frame's payload is a zero-copy
/// slice of the message payload.
pub fn split_message(
    channel: &ChannelId,
    message: &Message,
    max_frame_size: usize,
) -> Result<Vec<Frame>> {
    let total = frame_count(message.payload.len(), max_frame_size)?;
    let len = message.payload.len();

    let frames = (0..total)
        .map(|index| {
            let start = (index as usize) * max_frame_size;
            let end = (start + max_frame_size).min(len);
            Frame {
                channel: channel.clone(),
                sequence: message.sequence,
                index,
                total,
                is_final: index + 1 == total,
                payload: message.payload.slice(start..end),
            }
        })
        .collect();

    Ok(frames)
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;

    fn channel(name: &str) -> ChannelId {
        ChannelId::new(name).unwrap()
    }

    #[test]
    fn splits_on_frame_boundary() {
        let msg = Message::new(0, Bytes::from_static(b"abcdefgh"));
        let frames = split_message(&channel("A"), &msg, 4).unwrap();

        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].payload.as_ref(), b"abcd");
        assert_eq!(frames[1].payload.as_ref(), b"efgh");
        assert_eq!((frames[0].index, frames[0].total), (0, 2));
        assert_eq!((frames[1].index, frames[1].total), (1, 2));
        assert!(!frames[0].is_final);
        assert!(frames[1].is_final);
    }

    #[test]
    fn last_frame_carries_remainder() {
        let msg = Message::new(3, Bytes::from_static(b"abcdefghij"));
        let frames = split_message(&channel("A"), &msg, 4).unwrap();

        let sizes: Vec<usize> = frames.iter().map(|f| f.payload.len()).collect();
        assert_eq!(sizes, vec![4, 4, 2]);
        assert!(frames.iter().all(|f| f.sequence == 3));
        assert_eq!(frames.iter().filter(|f| f.is_final).count(), 1);
    }

    #[test]
    fn empty_payload_is_one_final_frame() {
        let msg = Message::new(0, Bytes::new());
        let frames = split_message(&channel("B"), &msg, 16).unwrap();

        assert_eq!(frames.len(), 1);
        let frame = &frames[0];
        assert_eq!((frame.index, frame.total, frame.is_final), (0, 1, true));
        assert!(frame.payload.is_empty());
    }

    #[test]
    fn small_payload_is_single_frame() {
        let msg = Message::new(1, Bytes::from_static(b"hi"));
        let frames = split_message(&channel("A"), &msg, 400_000).unwrap();
        assert_eq!(frames, vec![Frame::single(channel("A"), 1, "hi")]);
    }

    #[test]
    fn zero_frame_size_rejected() {
        let msg = Message::new(0, Bytes::from_static(b"x"));
        let err = split_message(&channel("A"), &msg, 0).unwrap_err();
        assert!(matches!(err, FrameError::InvalidFrameSize));
    }

    #[test]
    fn frame_size_never_exceeded() {
        let payload = Bytes::from(vec![7u8; 1000]);
        let msg = Message::new(0, payload);
        for max in [1, 3, 7, 64, 999, 1000, 1001] {
            let frames = split_message(&channel("A"), &msg, max).unwrap();
            assert!(frames.iter().all(|f| f.payload.len() <= max));
            assert_eq!(frames.len() as u32, frame_count(1000, max).unwrap());
        }
    }
}
