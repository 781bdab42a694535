//! In-process transport joining two links directly.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use ipclink_frame::{ChannelId, Frame};
use tracing::debug;

use crate::error::TransportError;
use crate::lock;
use crate::transport::{FrameTransport, InboundRouter};

/// One end of an in-process connection.
///
/// Frames transmitted on one end are handed synchronously to the router
/// attached to the other end. Cloning yields another handle to the same end.
#[derive(Clone)]
pub struct MemoryTransport {
    end: Arc<End>,
}

struct End {
    router: Mutex<Option<InboundRouter>>,
    peer: Mutex<Weak<End>>,
    connected: Arc<AtomicBool>,
}

impl MemoryTransport {
    /// Create two connected ends.
    pub fn pair() -> (Self, Self) {
        let connected = Arc::new(AtomicBool::new(true));
        let left = Arc::new(End {
            router: Mutex::new(None),
            peer: Mutex::new(Weak::new()),
            connected: Arc::clone(&connected),
        });
        let right = Arc::new(End {
            router: Mutex::new(None),
            peer: Mutex::new(Arc::downgrade(&left)),
            connected,
        });
        *lock(&left.peer) = Arc::downgrade(&right);
        (Self { end: left }, Self { end: right })
    }

    /// Deliver traffic arriving at this end to `router`.
    pub fn attach(&self, router: InboundRouter) {
        *lock(&self.end.router) = Some(router);
    }

    pub fn is_connected(&self) -> bool {
        self.end.connected.load(Ordering::Acquire)
    }

    /// Sever the connection, as if the peer process died.
    ///
    /// Both ends report peer loss to their routers and further transmits fail.
    pub fn disconnect(&self) {
        if !self.end.connected.swap(false, Ordering::AcqRel) {
            return;
        }
        debug!("memory transport disconnected");
        let peer = lock(&self.end.peer).upgrade();
        for end in std::iter::once(&self.end).chain(peer.as_ref()) {
            if let Some(router) = lock(&end.router).clone() {
                router.on_peer_lost();
            }
        }
    }

    fn peer_router(&self) -> Result<InboundRouter, TransportError> {
        if !self.is_connected() {
            return Err(TransportError::Closed);
        }
        let peer = lock(&self.end.peer)
            .upgrade()
            .ok_or(TransportError::Closed)?;
        let router = lock(&peer.router).clone();
        router.ok_or(TransportError::Closed)
    }
}

impl FrameTransport for MemoryTransport {
    fn open_channel(&self, _channel: &ChannelId) -> Result<(), TransportError> {
        self.peer_router().map(|_| ())
    }

    fn transmit_frame(&self, frame: &Frame) -> Result<(), TransportError> {
        self.peer_router()?.on_frame_received(frame.clone());
        Ok(())
    }

    fn close_channel(&self, channel: &ChannelId) {
        if let Ok(router) = self.peer_router() {
            router.on_peer_disconnected(channel);
        }
    }
}

impl std::fmt::Debug for MemoryTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryTransport")
            .field("connected", &self.is_connected())
            .field("attached", &lock(&self.end.router).is_some())
            .finish()
    }
}
