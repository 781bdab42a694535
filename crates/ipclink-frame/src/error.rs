use crate::channel::ChannelId;

/// Errors that can occur while chunking, reassembling or framing messages.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The packet header contains an invalid magic number.
    #[error("invalid packet magic (expected 0x494C \"IL\")")]
    InvalidMagic,

    /// The packet header carries a kind byte this version does not know.
    #[error("unknown packet kind {0}")]
    UnknownPacketKind(u8),

    /// A channel name is empty, too long or not valid UTF-8.
    #[error("invalid channel name: {0}")]
    InvalidChannelName(String),

    /// The maximum frame size must be at least one byte.
    #[error("maximum frame size must be greater than zero")]
    InvalidFrameSize,

    /// The payload exceeds the configured maximum size.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// A frame was routed to a reassembly buffer owned by another channel.
    #[error("frame for channel '{actual}' routed to channel '{expected}'")]
    ChannelMismatch {
        expected: ChannelId,
        actual: ChannelId,
    },

    /// A frame for a new message arrived while another message is incomplete.
    #[error("frame for sequence {received} arrived while sequence {in_progress} is incomplete")]
    SequenceConflict { in_progress: u64, received: u64 },

    /// Frame metadata is inconsistent with the message it belongs to.
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    /// The reassembled message would exceed the configured bound.
    #[error("reassembled message too large ({size} bytes, max {max})")]
    MessageTooLarge { size: usize, max: usize },

    /// An I/O error occurred while reading or writing packets.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The connection was closed before a complete packet was received.
    #[error("connection closed (incomplete packet)")]
    ConnectionClosed,
}

impl FrameError {
    /// True for errors that mean a channel's receive state can no longer be trusted.
    pub fn is_protocol_violation(&self) -> bool {
        matches!(
            self,
            FrameError::ChannelMismatch { .. }
                | FrameError::SequenceConflict { .. }
                | FrameError::MalformedFrame(_)
                | FrameError::MessageTooLarge { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, FrameError>;
