//! Fault escalation and teardown.
//!
//! Workers and the inbound router report faults into one queue. A single
//! supervisor thread per link drains it and owns the registry side of
//! teardown, so workers never need a handle on the registry.

use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use ipclink_frame::ChannelId;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::channel::Binding;
use crate::handler::TeardownReason;
use crate::registry::Registry;
use crate::transport::FrameTransport;

pub(crate) enum Event {
    /// A channel hit a fatal condition. `generation: None` targets whatever
    /// binding currently holds the name.
    Fault {
        channel: ChannelId,
        generation: Option<u64>,
        reason: TeardownReason,
        detail: String,
    },
    /// The connection to the peer died; every bound channel goes down.
    PeerLost,
    Shutdown,
}

#[derive(Clone)]
pub(crate) struct EventSender(mpsc::UnboundedSender<Event>);

impl EventSender {
    pub(crate) fn report(&self, event: Event) {
        if self.0.send(event).is_err() {
            debug!("supervisor stopped; event dropped");
        }
    }

    pub(crate) fn is_open(&self) -> bool {
        !self.0.is_closed()
    }
}

pub(crate) fn event_queue() -> (EventSender, mpsc::UnboundedReceiver<Event>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (EventSender(tx), rx)
}

/// Fault reporting handle given to one binding's workers.
#[derive(Clone)]
pub(crate) struct FaultReporter {
    events: EventSender,
    channel: ChannelId,
    generation: u64,
}

impl FaultReporter {
    pub(crate) fn new(events: EventSender, channel: ChannelId, generation: u64) -> Self {
        Self {
            events,
            channel,
            generation,
        }
    }

    pub(crate) fn report(&self, reason: TeardownReason, detail: impl Into<String>) {
        self.events.report(Event::Fault {
            channel: self.channel.clone(),
            generation: Some(self.generation),
            reason,
            detail: detail.into(),
        });
    }
}

pub(crate) struct Supervisor {
    registry: Arc<Registry>,
    transport: Arc<dyn FrameTransport>,
    events: mpsc::UnboundedReceiver<Event>,
}

impl Supervisor {
    pub(crate) fn new(
        registry: Arc<Registry>,
        transport: Arc<dyn FrameTransport>,
        events: mpsc::UnboundedReceiver<Event>,
    ) -> Self {
        Self {
            registry,
            transport,
            events,
        }
    }

    pub(crate) fn spawn(self) -> io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name("ipclink-supervisor".to_string())
            .spawn(move || self.run())
    }

    fn run(mut self) {
        while let Some(event) = self.events.blocking_recv() {
            match event {
                Event::Fault {
                    channel,
                    generation,
                    reason,
                    detail,
                } => {
                    let Some(binding) = self
                        .registry
                        .remove_generation(channel.as_str(), generation)
                    else {
                        debug!(%channel, ?generation, %reason, "fault for stale binding ignored");
                        continue;
                    };
                    warn!(%channel, %reason, %detail, "channel fault");
                    self.tear_down(binding, reason);
                }
                Event::PeerLost => {
                    let bindings = self.registry.take_bound();
                    warn!(channels = bindings.len(), "peer connection lost");
                    for binding in bindings {
                        self.tear_down(binding, TeardownReason::PeerDisconnected);
                    }
                }
                Event::Shutdown => break,
            }
        }
        debug!("supervisor stopped");
    }

    /// Tear down without waiting on the binding's workers, then notify its
    /// listener from a thread of its own. A listener that blocks holds up
    /// nothing but itself.
    fn tear_down(&self, binding: Arc<Binding>, reason: TeardownReason) {
        if !tear_down(&binding, self.transport.as_ref(), reason, false) {
            return;
        }
        let notifier = Arc::clone(&binding);
        let spawned = thread::Builder::new()
            .name(format!("ipclink-notify-{}", binding.id()))
            .spawn(move || notifier.notify_teardown(reason));
        if let Err(err) = spawned {
            warn!(channel = %binding.id(), error = %err, "notifier thread failed to start");
            binding.notify_teardown(reason);
        }
    }
}

/// Stop a binding that has already left the registry.
///
/// Runs at most once per binding; returns true for the call that did the
/// work, which then owes the listener its `on_teardown`. With
/// `wait_for_in_flight` the caller blocks until the outbound worker has
/// finished the message it is transmitting.
pub(crate) fn tear_down(
    binding: &Binding,
    transport: &dyn FrameTransport,
    reason: TeardownReason,
    wait_for_in_flight: bool,
) -> bool {
    // Messages the peer completed before closing are still handed over;
    // every other teardown discards what is queued.
    if reason != TeardownReason::PeerDisconnected {
        binding.core().discard_inbound();
    }
    if !binding.begin_teardown() {
        return false;
    }
    if wait_for_in_flight {
        binding.join_outbound();
    }
    if reason != TeardownReason::PeerDisconnected {
        transport.close_channel(binding.id());
    }
    match reason {
        TeardownReason::ExplicitUnbind => info!(channel = %binding.id(), "channel unbound"),
        _ => warn!(channel = %binding.id(), %reason, "channel torn down"),
    }
    true
}
