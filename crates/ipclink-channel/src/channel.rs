//! Per-binding channel state shared by the workers, the registry and
//! caller-held [`Channel`] handles.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use bytes::Bytes;
use ipclink_frame::{ChannelId, Frame, Message};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, error, warn};

use crate::error::{LinkError, Result};
use crate::handler::{LifecycleListener, TeardownReason};
use crate::lock;
use crate::receipt::{DeliveryReceipt, ReceiptSender};
use crate::stats::{ChannelStats, StatsSnapshot};

/// A message waiting for the outbound worker.
pub(crate) struct Outgoing {
    pub(crate) message: Message,
    pub(crate) reply: ReceiptSender,
}

struct SendSide {
    next_sequence: u64,
    queue: Option<mpsc::Sender<Outgoing>>,
}

/// Why an inbound frame was not queued.
pub(crate) enum Refused {
    /// The inbound queue is full.
    Overflow,
    /// The channel no longer accepts frames.
    Closed,
}

/// State of one binding that workers are allowed to see.
pub(crate) struct ChannelCore {
    id: ChannelId,
    generation: u64,
    max_frame_size: usize,
    queue_capacity: usize,
    accepting: AtomicBool,
    discard_inbound: AtomicBool,
    send: Mutex<SendSide>,
    inbound: Mutex<Option<mpsc::Sender<Frame>>>,
    stats: ChannelStats,
}

impl ChannelCore {
    pub(crate) fn new(
        id: ChannelId,
        generation: u64,
        max_frame_size: usize,
        outbound: mpsc::Sender<Outgoing>,
        inbound: mpsc::Sender<Frame>,
    ) -> Self {
        Self {
            id,
            generation,
            max_frame_size,
            queue_capacity: outbound.max_capacity(),
            accepting: AtomicBool::new(true),
            discard_inbound: AtomicBool::new(false),
            send: Mutex::new(SendSide {
                next_sequence: 0,
                queue: Some(outbound),
            }),
            inbound: Mutex::new(Some(inbound)),
            stats: ChannelStats::default(),
        }
    }

    pub(crate) fn id(&self) -> &ChannelId {
        &self.id
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }

    pub(crate) fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }

    pub(crate) fn stats(&self) -> &ChannelStats {
        &self.stats
    }

    pub(crate) fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::Acquire)
    }

    /// Refuse further sends and inbound frames. Queued work is left to the workers.
    pub(crate) fn stop_accepting(&self) {
        self.accepting.store(false, Ordering::Release);
    }

    /// Drop frames still waiting in the inbound queue instead of handing
    /// them to the handler.
    pub(crate) fn discard_inbound(&self) {
        self.discard_inbound.store(true, Ordering::Release);
    }

    pub(crate) fn is_discarding_inbound(&self) -> bool {
        self.discard_inbound.load(Ordering::Acquire)
    }

    /// Stop accepting and close both queues so the workers wind down.
    pub(crate) fn close(&self) {
        self.stop_accepting();
        lock(&self.send).queue.take();
        lock(&self.inbound).take();
    }

    /// Assign the next sequence number and queue the payload.
    ///
    /// The send lock covers both steps, so sequence order equals queue order.
    /// A full queue consumes no sequence number.
    pub(crate) fn enqueue(&self, payload: Bytes) -> Result<DeliveryReceipt> {
        let mut guard = lock(&self.send);
        let side = &mut *guard;
        let torn_down = || LinkError::ChannelTornDown(self.id.to_string());
        if !self.is_accepting() {
            return Err(torn_down());
        }
        let Some(queue) = side.queue.as_ref() else {
            return Err(torn_down());
        };

        let permit = match queue.try_reserve() {
            Ok(permit) => permit,
            Err(TrySendError::Full(())) => {
                self.stats.record_backpressure();
                warn!(channel = %self.id, capacity = self.queue_capacity, "outbound queue full");
                return Err(LinkError::Backpressure {
                    channel: self.id.to_string(),
                    capacity: self.queue_capacity,
                });
            }
            Err(TrySendError::Closed(())) => return Err(torn_down()),
        };

        let sequence = side.next_sequence;
        side.next_sequence += 1;
        let (reply, receipt) = DeliveryReceipt::new(self.id.clone(), sequence);
        let size = payload.len();
        permit.send(Outgoing {
            message: Message::new(sequence, payload),
            reply,
        });
        debug!(channel = %self.id, sequence, size, "message queued");
        Ok(receipt)
    }

    /// Hand a frame from the transport to the inbound worker without blocking.
    pub(crate) fn deliver(&self, frame: Frame) -> std::result::Result<(), Refused> {
        if !self.is_accepting() {
            return Err(Refused::Closed);
        }
        let inbound = lock(&self.inbound);
        let Some(queue) = inbound.as_ref() else {
            return Err(Refused::Closed);
        };
        queue.try_send(frame).map_err(|err| match err {
            TrySendError::Full(_) => Refused::Overflow,
            TrySendError::Closed(_) => Refused::Closed,
        })
    }
}

/// Registry-side record of a bound channel.
pub(crate) struct Binding {
    core: Arc<ChannelCore>,
    listener: Box<dyn LifecycleListener>,
    outbound: Mutex<Option<JoinHandle<()>>>,
    torn_down: AtomicBool,
}

impl Binding {
    pub(crate) fn new(
        core: Arc<ChannelCore>,
        listener: Box<dyn LifecycleListener>,
        outbound: JoinHandle<()>,
    ) -> Self {
        Self {
            core,
            listener,
            outbound: Mutex::new(Some(outbound)),
            torn_down: AtomicBool::new(false),
        }
    }

    pub(crate) fn core(&self) -> &Arc<ChannelCore> {
        &self.core
    }

    pub(crate) fn id(&self) -> &ChannelId {
        self.core.id()
    }

    pub(crate) fn generation(&self) -> u64 {
        self.core.generation()
    }

    /// Close the queues. Returns false if teardown already started elsewhere.
    pub(crate) fn begin_teardown(&self) -> bool {
        if self.torn_down.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.core.close();
        true
    }

    /// Wait for the outbound worker to finish its in-flight message and fail
    /// the rest of its queue.
    pub(crate) fn join_outbound(&self) {
        let Some(handle) = lock(&self.outbound).take() else {
            return;
        };
        if handle.thread().id() == thread::current().id() {
            return;
        }
        if handle.join().is_err() {
            error!(channel = %self.id(), "outbound worker panicked");
        }
    }

    pub(crate) fn notify_bound(&self) {
        let listener = &self.listener;
        let id = self.core.id();
        if panic::catch_unwind(AssertUnwindSafe(|| listener.on_bound(id))).is_err() {
            error!(channel = %id, "lifecycle listener panicked in on_bound");
        }
    }

    pub(crate) fn notify_teardown(&self, reason: TeardownReason) {
        let listener = &self.listener;
        let id = self.core.id();
        if panic::catch_unwind(AssertUnwindSafe(|| listener.on_teardown(id, reason))).is_err() {
            error!(channel = %id, %reason, "lifecycle listener panicked in on_teardown");
        }
    }
}

/// Caller-held handle to one channel binding.
///
/// The handle stays valid after teardown; sends through it then fail with
/// [`LinkError::ChannelTornDown`]. Binding the same name again yields a new,
/// independent handle.
#[derive(Clone)]
pub struct Channel {
    core: Arc<ChannelCore>,
}

impl Channel {
    pub(crate) fn new(core: Arc<ChannelCore>) -> Self {
        Self { core }
    }

    pub(crate) fn generation(&self) -> u64 {
        self.core.generation()
    }

    /// The channel name.
    pub fn id(&self) -> &ChannelId {
        self.core.id()
    }

    /// Largest payload carried by one frame of this binding.
    pub fn max_frame_size(&self) -> usize {
        self.core.max_frame_size()
    }

    /// Whether this binding still accepts sends.
    pub fn is_open(&self) -> bool {
        self.core.is_accepting()
    }

    /// Queue a message without blocking.
    ///
    /// Fails with [`LinkError::Backpressure`] when the outbound queue is full
    /// and with [`LinkError::ChannelTornDown`] once the binding is gone.
    pub fn send(&self, payload: impl Into<Bytes>) -> Result<DeliveryReceipt> {
        self.core.enqueue(payload.into())
    }

    /// Current counters for this binding.
    pub fn stats(&self) -> StatsSnapshot {
        self.core.stats().snapshot()
    }
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("id", self.core.id())
            .field("generation", &self.core.generation())
            .field("max_frame_size", &self.core.max_frame_size())
            .field("open", &self.core.is_accepting())
            .finish()
    }
}
