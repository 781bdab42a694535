//! Callbacks a channel owner supplies at bind time.

use std::fmt;

use bytes::Bytes;
use ipclink_frame::ChannelId;
use serde::Serialize;

/// Receives complete messages for one channel.
///
/// Called on the channel's inbound worker thread, one message at a time and
/// in sequence order. A handler that blocks stalls only its own channel.
pub trait MessageHandler: Send + 'static {
    fn on_message(&mut self, payload: Bytes);
}

impl<F> MessageHandler for F
where
    F: FnMut(Bytes) + Send + 'static,
{
    fn on_message(&mut self, payload: Bytes) {
        self(payload)
    }
}

/// Why a channel stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TeardownReason {
    /// Frames could not be handed to the transport, or inbound frames overflowed.
    TransportFailure,
    /// The peer sent frames that cannot be reassembled.
    ProtocolViolation,
    /// The peer closed the channel or the connection died.
    PeerDisconnected,
    /// The local side called `unbind` or shut the link down.
    ExplicitUnbind,
}

impl TeardownReason {
    pub fn as_str(self) -> &'static str {
        match self {
            TeardownReason::TransportFailure => "transport_failure",
            TeardownReason::ProtocolViolation => "protocol_violation",
            TeardownReason::PeerDisconnected => "peer_disconnected",
            TeardownReason::ExplicitUnbind => "explicit_unbind",
        }
    }
}

impl fmt::Display for TeardownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Observes a channel binding's lifecycle.
///
/// `on_teardown` is called exactly once per binding, after the registry entry
/// is gone, so a send from inside the callback already sees `NotBound`.
/// `unbind` and `shutdown` call it on the caller's thread; teardowns caused by
/// faults or the peer call it on a thread of its own, so a listener that
/// blocks there does not delay other channels.
pub trait LifecycleListener: Send + Sync + 'static {
    fn on_bound(&self, _channel: &ChannelId) {}

    fn on_teardown(&self, channel: &ChannelId, reason: TeardownReason);
}

impl<F> LifecycleListener for F
where
    F: Fn(&ChannelId, TeardownReason) + Send + Sync + 'static,
{
    fn on_teardown(&self, channel: &ChannelId, reason: TeardownReason) {
        self(channel, reason)
    }
}
