//! Named message channels between local processes.
//!
//! Payloads of any size travel over a transport that only carries frames of
//! a bounded size: senders chunk, receivers reassemble, and each channel has
//! its own delivery workers so one slow consumer never holds up another.
//!
//! # Crate Structure
//!
//! - [`frame`]: frame model, chunking, reassembly and the byte-stream wire codec
//! - [`channel`]: channel registry, delivery pipelines, teardown, and transports

/// Re-export frame types.
pub mod frame {
    pub use ipclink_frame::*;
}

/// Re-export channel types.
pub mod channel {
    pub use ipclink_channel::*;
}

pub use ipclink_channel::{
    Channel, ChannelId, ChannelState, DeliveryReceipt, FrameTransport, InboundRouter,
    LifecycleListener, Link, LinkConfig, LinkError, MemoryTransport, MessageHandler,
    StatsSnapshot, StreamProvider, StreamReader, StreamWriter, Streams, TeardownReason,
};
#[cfg(unix)]
pub use ipclink_channel::{SocketConfig, SocketListener, SocketTransport};
