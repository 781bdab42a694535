#![allow(dead_code)]

use std::sync::mpsc::{self, Receiver};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use ipclink_channel::{
    ChannelId, Frame, FrameTransport, Link, LinkConfig, MemoryTransport, TeardownReason,
    TransportError,
};

pub const WAIT: Duration = Duration::from_secs(5);

pub fn fast_config() -> LinkConfig {
    LinkConfig {
        retry_backoff: Duration::ZERO,
        bind_timeout: Duration::from_secs(2),
        ..LinkConfig::default()
    }
}

/// Two links joined by an in-process transport, routers attached.
pub struct Pair {
    pub left: Link,
    pub right: Link,
    pub left_transport: MemoryTransport,
    pub right_transport: MemoryTransport,
}

pub fn linked_pair(config: LinkConfig) -> Pair {
    let (left_transport, right_transport) = MemoryTransport::pair();
    let left = Link::new(left_transport.clone(), config.clone()).expect("left link");
    let right = Link::new(right_transport.clone(), config).expect("right link");
    left_transport.attach(left.router());
    right_transport.attach(right.router());
    Pair {
        left,
        right,
        left_transport,
        right_transport,
    }
}

/// Handler that forwards every payload to the returned receiver.
pub fn collector() -> (impl FnMut(Bytes) + Send + 'static, Receiver<Bytes>) {
    let (tx, rx) = mpsc::channel();
    (
        move |payload: Bytes| {
            let _ = tx.send(payload);
        },
        rx,
    )
}

/// Listener that forwards teardown reports to the returned receiver.
pub fn teardowns() -> (
    impl Fn(&ChannelId, TeardownReason) + Send + Sync + 'static,
    Receiver<(ChannelId, TeardownReason)>,
) {
    let (tx, rx) = mpsc::channel();
    (
        move |channel: &ChannelId, reason: TeardownReason| {
            let _ = tx.send((channel.clone(), reason));
        },
        rx,
    )
}

pub fn quiet(_: &ChannelId, _: TeardownReason) {}

pub fn ignore(_: Bytes) {}

/// Wraps a transport and records every frame that was transmitted successfully.
#[derive(Clone)]
pub struct Recording<T> {
    pub inner: T,
    pub frames: Arc<Mutex<Vec<Frame>>>,
}

impl<T> Recording<T> {
    pub fn new(inner: T) -> Self {
        Self {
            inner,
            frames: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn frames(&self) -> Vec<Frame> {
        self.frames.lock().expect("frames lock").clone()
    }
}

impl<T: FrameTransport> FrameTransport for Recording<T> {
    fn open_channel(&self, channel: &ChannelId) -> Result<(), TransportError> {
        self.inner.open_channel(channel)
    }

    fn transmit_frame(&self, frame: &Frame) -> Result<(), TransportError> {
        self.inner.transmit_frame(frame)?;
        self.frames.lock().expect("frames lock").push(frame.clone());
        Ok(())
    }

    fn close_channel(&self, channel: &ChannelId) {
        self.inner.close_channel(channel)
    }
}

/// Accepts everything and goes nowhere.
#[derive(Clone, Default)]
pub struct NullTransport;

impl FrameTransport for NullTransport {
    fn open_channel(&self, _channel: &ChannelId) -> Result<(), TransportError> {
        Ok(())
    }

    fn transmit_frame(&self, _frame: &Frame) -> Result<(), TransportError> {
        Ok(())
    }
}
