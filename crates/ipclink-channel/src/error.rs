use std::path::PathBuf;
use std::time::Duration;

use ipclink_frame::FrameError;

/// Errors raised by a [`FrameTransport`](crate::FrameTransport).
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// An I/O error occurred on the underlying connection.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to bind a listening socket.
    #[error("failed to bind to {path}: {source}")]
    Bind {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to connect to a listening socket.
    #[error("failed to connect to {path}: {source}")]
    Connect {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The socket path is too long for the platform.
    #[error("socket path too long ({len} bytes, max {max}): {path}")]
    PathTooLong {
        path: PathBuf,
        len: usize,
        max: usize,
    },

    /// The peer refused to open the channel.
    #[error("peer rejected channel: {0}")]
    Rejected(String),

    /// The peer did not answer in time.
    #[error("transport operation timed out after {0:?}")]
    Timeout(Duration),

    /// The connection is gone.
    #[error("transport closed")]
    Closed,

    /// A control packet could not be produced or understood.
    #[error("control packet error: {0}")]
    Control(String),

    /// Packet framing failed on the wire.
    #[error("wire framing error: {0}")]
    Frame(#[from] FrameError),
}

impl TransportError {
    /// Fold wire-level closure into [`TransportError::Closed`].
    pub(crate) fn from_wire(err: FrameError) -> Self {
        match err {
            FrameError::ConnectionClosed => TransportError::Closed,
            FrameError::Io(io) => TransportError::Io(io),
            other => TransportError::Frame(other),
        }
    }
}

/// Errors surfaced to callers of [`Link`](crate::Link) and [`Channel`](crate::Channel).
#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    /// The name is already bound or a bind for it is in flight.
    #[error("channel '{0}' is already bound")]
    AlreadyBound(String),

    /// No binding exists for the name.
    #[error("channel '{0}' is not bound")]
    NotBound(String),

    /// The channel's outbound queue is full. Nothing was enqueued.
    #[error("channel '{channel}' outbound queue is full ({capacity} messages)")]
    Backpressure { channel: String, capacity: usize },

    /// The transport did not open the channel within the bind timeout.
    #[error("binding channel '{channel}' timed out after {timeout:?}")]
    BindTimeout { channel: String, timeout: Duration },

    /// A frame could not be transmitted within the retry budget.
    #[error("channel '{channel}' failed to transmit after {attempts} attempts: {source}")]
    TransportFailure {
        channel: String,
        attempts: u32,
        #[source]
        source: TransportError,
    },

    /// The channel was torn down before the message could be delivered.
    #[error("channel '{0}' was torn down")]
    ChannelTornDown(String),

    /// Chunking or reassembly failed.
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    /// The transport refused an operation outright.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// A configuration value is out of range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A channel worker thread could not be started.
    #[error("failed to start worker thread: {0}")]
    Spawn(std::io::Error),

    /// The link has been shut down.
    #[error("link is shut down")]
    Shutdown,
}

pub type Result<T> = std::result::Result<T, LinkError>;
