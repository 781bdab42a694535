//! Named message channels over a size-limited transport.
//!
//! A [`Link`] owns every channel bound over one [`FrameTransport`]. Each bound
//! channel gets its own outbound and inbound worker thread connected by
//! bounded queues, so a slow consumer on one channel never stalls another.
//! Messages larger than the channel's frame size are chunked on the way out
//! and reassembled in order on the way in. Fatal conditions tear the channel
//! down and are reported to its [`LifecycleListener`]. Byte streams of any
//! length can be fetched from or pushed to the peer through [`Streams`].
//!
//! ```no_run
//! use bytes::Bytes;
//! use ipclink_channel::{ChannelId, Link, LinkConfig, MemoryTransport, TeardownReason};
//!
//! let (left, right) = MemoryTransport::pair();
//! let a = Link::new(left.clone(), LinkConfig::default())?;
//! let b = Link::new(right.clone(), LinkConfig::default())?;
//! left.attach(a.router());
//! right.attach(b.router());
//!
//! let quiet = |_: &ChannelId, _: TeardownReason| {};
//! b.bind("events", 4, |payload: Bytes| println!("{payload:?}"), quiet)?;
//! let events = a.bind("events", 4, |_: Bytes| {}, quiet)?;
//! events.send("abcdefgh")?.wait()?;
//! # Ok::<(), ipclink_channel::LinkError>(())
//! ```

use std::sync::{Mutex, MutexGuard, PoisonError};

mod channel;
pub mod config;
pub mod control;
pub mod error;
pub mod handler;
mod inbound;
mod link;
pub mod memory;
mod outbound;
pub mod receipt;
mod registry;
mod reliability;
#[cfg(unix)]
pub mod socket;
pub mod stats;
pub mod stream;
pub mod transport;

pub use channel::Channel;
pub use config::{LinkConfig, SocketConfig, DEFAULT_MAX_FRAME_SIZE};
pub use control::ControlMessage;
pub use error::{LinkError, Result, TransportError};
pub use handler::{LifecycleListener, MessageHandler, TeardownReason};
pub use link::Link;
pub use memory::MemoryTransport;
pub use receipt::DeliveryReceipt;
pub use registry::ChannelState;
#[cfg(unix)]
pub use socket::{SocketListener, SocketTransport};
pub use stats::{ChannelStats, StatsSnapshot};
pub use stream::{StreamProvider, StreamReader, StreamRequest, StreamWriter, Streams};
pub use transport::{FrameTransport, InboundRouter};

pub use ipclink_frame::{ChannelId, Frame, FrameError, Message};

/// Lock a mutex, recovering the data if a panicking thread poisoned it.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
