use bytes::Bytes;

use crate::channel::ChannelId;

/// A logical message: an opaque payload plus its per-channel sequence number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Assigned at enqueue time; strictly increasing within one binding.
    pub sequence: u64,
    /// The message payload.
    pub payload: Bytes,
}

impl Message {
    /// Create a new message.
    pub fn new(sequence: u64, payload: impl Into<Bytes>) -> Self {
        Self {
            sequence,
            payload: payload.into(),
        }
    }
}

/// One bounded-size piece of a message as handed to the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// The channel this frame belongs to.
    pub channel: ChannelId,
    /// Sequence number of the owning message.
    pub sequence: u64,
    /// Position of this frame within the message, starting at 0.
    pub index: u32,
    /// Number of frames the message was split into.
    pub total: u32,
    /// Set only on the last frame of a message.
    pub is_final: bool,
    /// This frame's slice of the message payload.
    pub payload: Bytes,
}

impl Frame {
    /// A frame carrying a whole message on its own.
    pub fn single(channel: ChannelId, sequence: u64, payload: impl Into<Bytes>) -> Self {
        Self {
            channel,
            sequence,
            index: 0,
            total: 1,
            is_final: true,
            payload: payload.into(),
        }
    }
}
