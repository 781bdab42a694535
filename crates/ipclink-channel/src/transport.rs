//! The contract between the channel core and whatever moves frames.

use std::sync::Arc;

use ipclink_frame::{ChannelId, Frame};
use tracing::{debug, error, warn};

use crate::channel::Refused;
use crate::error::TransportError;
use crate::handler::TeardownReason;
use crate::registry::{Registry, Route};
use crate::reliability::{Event, EventSender};

/// Moves frames to the peer.
///
/// Implementations deliver frames received from the peer by calling the
/// [`InboundRouter`] obtained from [`Link::router`](crate::Link::router).
pub trait FrameTransport: Send + Sync + 'static {
    /// Establish the channel with the peer. May block; bind bounds it with a timeout.
    fn open_channel(&self, channel: &ChannelId) -> Result<(), TransportError>;

    /// Hand one frame to the peer. Errors are retried by the caller.
    fn transmit_frame(&self, frame: &Frame) -> Result<(), TransportError>;

    /// The local side is done with the channel.
    fn close_channel(&self, _channel: &ChannelId) {}
}

impl<T: FrameTransport + ?Sized> FrameTransport for Arc<T> {
    fn open_channel(&self, channel: &ChannelId) -> Result<(), TransportError> {
        (**self).open_channel(channel)
    }

    fn transmit_frame(&self, frame: &Frame) -> Result<(), TransportError> {
        (**self).transmit_frame(frame)
    }

    fn close_channel(&self, channel: &ChannelId) {
        (**self).close_channel(channel)
    }
}

/// Entry point for frames and peer events arriving from a transport.
///
/// Every call returns without waiting on a channel's handler.
#[derive(Clone)]
pub struct InboundRouter {
    registry: Arc<Registry>,
    events: EventSender,
}

impl InboundRouter {
    pub(crate) fn new(registry: Arc<Registry>, events: EventSender) -> Self {
        Self { registry, events }
    }

    /// Route one frame to its channel's inbound queue.
    ///
    /// Frames for a name that is still connecting are held until the bind
    /// completes; past the held limit the bind ends in a teardown. Frames for
    /// names without a binding are dropped. A full
    /// inbound queue tears the channel down, since dropping a frame would
    /// corrupt the stream.
    pub fn on_frame_received(&self, frame: Frame) {
        let (binding, frame) = match self.registry.route(frame) {
            Route::Deliver(binding, frame) => (binding, frame),
            Route::Held => return,
            Route::Overflow(frame) => {
                error!(
                    channel = %frame.channel,
                    sequence = frame.sequence,
                    index = frame.index,
                    "held frame limit reached while binding; dropping frame"
                );
                return;
            }
            Route::Drop(frame) => {
                warn!(
                    channel = %frame.channel,
                    sequence = frame.sequence,
                    index = frame.index,
                    "dropping frame for unbound channel"
                );
                return;
            }
        };

        let sequence = frame.sequence;
        match binding.core().deliver(frame) {
            Ok(()) => {}
            Err(Refused::Overflow) => {
                error!(channel = %binding.id(), sequence, "inbound queue overflow");
                self.events.report(Event::Fault {
                    channel: binding.id().clone(),
                    generation: Some(binding.generation()),
                    reason: TeardownReason::TransportFailure,
                    detail: "inbound queue overflow".to_string(),
                });
            }
            Err(Refused::Closed) => {
                debug!(channel = %binding.id(), sequence, "frame for closing channel dropped");
            }
        }
    }

    /// The peer closed `channel`.
    pub fn on_peer_disconnected(&self, channel: &ChannelId) {
        self.events.report(Event::Fault {
            channel: channel.clone(),
            generation: None,
            reason: TeardownReason::PeerDisconnected,
            detail: "peer closed the channel".to_string(),
        });
    }

    /// The whole connection to the peer is gone.
    pub fn on_peer_lost(&self) {
        self.events.report(Event::PeerLost);
    }

    /// Whether the owning link still processes events.
    pub fn is_open(&self) -> bool {
        self.events.is_open()
    }
}

impl std::fmt::Debug for InboundRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InboundRouter")
            .field("channels", &self.registry.channels())
            .field("open", &self.is_open())
            .finish()
    }
}
