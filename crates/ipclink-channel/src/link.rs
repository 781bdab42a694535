use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self as std_mpsc, RecvTimeoutError};
use std::sync::{Arc, Mutex, Weak};
use std::thread::{self, JoinHandle};

use bytes::Bytes;
use ipclink_frame::{ChannelId, FrameError};
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::channel::{Binding, Channel, ChannelCore};
use crate::config::LinkConfig;
use crate::error::{LinkError, Result, TransportError};
use crate::handler::{LifecycleListener, MessageHandler, TeardownReason};
use crate::inbound;
use crate::lock;
use crate::outbound::{self, RetryPolicy};
use crate::receipt::DeliveryReceipt;
use crate::registry::{ChannelState, Promotion, Registry};
use crate::reliability::{event_queue, tear_down, Event, EventSender, FaultReporter, Supervisor};
use crate::transport::{FrameTransport, InboundRouter};

/// One side of an IPC connection carrying any number of named channels.
///
/// Cloning is cheap; all clones share the same channels. The link shuts down
/// when [`shutdown`](Self::shutdown) is called or the last clone is dropped.
#[derive(Clone)]
pub struct Link {
    inner: Arc<LinkInner>,
}

/// Handle that does not keep a [`Link`] alive. Given to callbacks that
/// themselves live inside the link.
#[derive(Clone)]
pub(crate) struct WeakLink(Weak<LinkInner>);

impl WeakLink {
    pub(crate) fn upgrade(&self) -> Option<Link> {
        self.0.upgrade().map(|inner| Link { inner })
    }
}

struct LinkInner {
    config: LinkConfig,
    registry: Arc<Registry>,
    transport: Arc<dyn FrameTransport>,
    events: EventSender,
    supervisor: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl Link {
    /// Create a link over `transport`.
    ///
    /// Frames from the peer only flow once the transport has been handed
    /// [`router`](Self::router).
    pub fn new(transport: impl FrameTransport, config: LinkConfig) -> Result<Self> {
        config.validate()?;

        let registry = Arc::new(Registry::new(config.inbound_capacity));
        let transport: Arc<dyn FrameTransport> = Arc::new(transport);
        let (events, event_rx) = event_queue();
        let supervisor = Supervisor::new(Arc::clone(&registry), Arc::clone(&transport), event_rx)
            .spawn()
            .map_err(LinkError::Spawn)?;

        Ok(Self {
            inner: Arc::new(LinkInner {
                config,
                registry,
                transport,
                events,
                supervisor: Mutex::new(Some(supervisor)),
                closed: AtomicBool::new(false),
            }),
        })
    }

    pub fn config(&self) -> &LinkConfig {
        &self.inner.config
    }

    pub(crate) fn downgrade(&self) -> WeakLink {
        WeakLink(Arc::downgrade(&self.inner))
    }

    /// Callback surface the transport uses to deliver inbound traffic.
    pub fn router(&self) -> InboundRouter {
        InboundRouter::new(Arc::clone(&self.inner.registry), self.inner.events.clone())
    }

    /// Bind `name` with an explicit frame size.
    ///
    /// Fails with [`LinkError::AlreadyBound`] if the name is bound or another
    /// bind for it is in flight, and with [`LinkError::BindTimeout`] if the
    /// transport does not open the channel within `bind_timeout`.
    ///
    /// If more frames arrived while connecting than `inbound_capacity` can
    /// hold, the bind still returns the channel but it is torn down right
    /// away with [`TeardownReason::TransportFailure`].
    pub fn bind<H, L>(
        &self,
        name: &str,
        max_frame_size: usize,
        handler: H,
        listener: L,
    ) -> Result<Channel>
    where
        H: MessageHandler,
        L: LifecycleListener,
    {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(LinkError::Shutdown);
        }
        let id = ChannelId::new(name)?;
        if max_frame_size == 0 {
            return Err(FrameError::InvalidFrameSize.into());
        }

        let registry = &self.inner.registry;
        let generation = registry.reserve(&id)?;
        debug!(channel = %id, generation, "binding channel");

        if let Err(err) = self.open(&id) {
            registry.release(&id, generation);
            return Err(err);
        }

        let binding = match self.start(&id, generation, max_frame_size, handler, listener) {
            Ok(binding) => binding,
            Err(err) => {
                registry.release(&id, generation);
                self.inner.transport.close_channel(&id);
                return Err(err);
            }
        };

        let lossy = match registry.promote(Arc::clone(&binding)) {
            Promotion::Bound => false,
            Promotion::Lossy => true,
            Promotion::Gone => {
                // The link shut down while the transport was opening the channel.
                binding.begin_teardown();
                binding.join_outbound();
                self.inner.transport.close_channel(&id);
                return Err(LinkError::Shutdown);
            }
        };

        info!(channel = %id, max_frame_size, "channel bound");
        binding.notify_bound();
        if lossy {
            error!(channel = %id, "inbound frames lost while binding");
            self.inner.events.report(Event::Fault {
                channel: id.clone(),
                generation: Some(generation),
                reason: TeardownReason::TransportFailure,
                detail: "held frames overflowed while binding".to_string(),
            });
        }
        Ok(Channel::new(Arc::clone(binding.core())))
    }

    /// Bind `name` using the configured default frame size.
    pub fn bind_default<H, L>(&self, name: &str, handler: H, listener: L) -> Result<Channel>
    where
        H: MessageHandler,
        L: LifecycleListener,
    {
        self.bind(name, self.inner.config.default_max_frame_size, handler, listener)
    }

    /// Ask the transport to open `id`, giving up after `bind_timeout`.
    fn open(&self, id: &ChannelId) -> Result<()> {
        let timeout = self.inner.config.bind_timeout;
        let (tx, rx) = std_mpsc::channel();
        let transport = Arc::clone(&self.inner.transport);
        let channel = id.clone();

        thread::Builder::new()
            .name(format!("ipclink-open-{id}"))
            .spawn(move || {
                let result = transport.open_channel(&channel);
                let opened = result.is_ok();
                if tx.send(result).is_err() && opened {
                    debug!(%channel, "channel opened after bind gave up; closing");
                    transport.close_channel(&channel);
                }
            })
            .map_err(LinkError::Spawn)?;

        match rx.recv_timeout(timeout) {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(err.into()),
            Err(RecvTimeoutError::Timeout) => {
                error!(channel = %id, ?timeout, "bind timed out");
                Err(LinkError::BindTimeout {
                    channel: id.to_string(),
                    timeout,
                })
            }
            Err(RecvTimeoutError::Disconnected) => Err(TransportError::Closed.into()),
        }
    }

    /// Create the queues and both workers for a fresh binding.
    fn start<H, L>(
        &self,
        id: &ChannelId,
        generation: u64,
        max_frame_size: usize,
        handler: H,
        listener: L,
    ) -> Result<Arc<Binding>>
    where
        H: MessageHandler,
        L: LifecycleListener,
    {
        let config = &self.inner.config;
        let (out_tx, out_rx) = mpsc::channel(config.queue_capacity);
        let (in_tx, in_rx) = mpsc::channel(config.inbound_capacity);
        let core = Arc::new(ChannelCore::new(
            id.clone(),
            generation,
            max_frame_size,
            out_tx,
            in_tx,
        ));
        let faults = FaultReporter::new(self.inner.events.clone(), id.clone(), generation);

        let outbound = outbound::spawn(
            Arc::clone(&core),
            out_rx,
            Arc::clone(&self.inner.transport),
            RetryPolicy::from(config),
            faults.clone(),
        )
        .map_err(LinkError::Spawn)?;

        if let Err(err) = inbound::spawn(
            Arc::clone(&core),
            in_rx,
            handler,
            config.max_message_size,
            faults,
        ) {
            core.close();
            let _ = outbound.join();
            return Err(LinkError::Spawn(err));
        }

        Ok(Arc::new(Binding::new(core, Box::new(listener), outbound)))
    }

    /// Tear down a bound channel.
    ///
    /// Queued messages fail with [`LinkError::ChannelTornDown`]; the message
    /// being transmitted finishes first. The listener sees
    /// [`TeardownReason::ExplicitUnbind`].
    pub fn unbind(&self, name: &str) -> Result<()> {
        let binding = self.inner.registry.remove(name)?;
        let reason = TeardownReason::ExplicitUnbind;
        if tear_down(&binding, self.inner.transport.as_ref(), reason, true) {
            binding.notify_teardown(reason);
        }
        Ok(())
    }

    /// Unbind `channel` unless its name has since been bound again.
    pub(crate) fn release(&self, channel: &Channel) {
        let Some(binding) = self
            .inner
            .registry
            .remove_generation(channel.id().as_str(), Some(channel.generation()))
        else {
            return;
        };
        let reason = TeardownReason::ExplicitUnbind;
        if tear_down(&binding, self.inner.transport.as_ref(), reason, true) {
            binding.notify_teardown(reason);
        }
    }

    /// Queue a message on the channel bound to `name`.
    pub fn send(&self, name: &str, payload: impl Into<Bytes>) -> Result<DeliveryReceipt> {
        let binding = self
            .inner
            .registry
            .lookup(name)
            .ok_or_else(|| LinkError::NotBound(name.to_string()))?;
        binding.core().enqueue(payload.into())
    }

    /// Handle to the channel bound to `name`.
    pub fn lookup(&self, name: &str) -> Result<Channel> {
        self.inner
            .registry
            .lookup(name)
            .map(|binding| Channel::new(Arc::clone(binding.core())))
            .ok_or_else(|| LinkError::NotBound(name.to_string()))
    }

    /// Names of all bound channels, sorted.
    pub fn channels(&self) -> Vec<ChannelId> {
        self.inner.registry.channels()
    }

    /// Binding state of `name`; `None` when unbound.
    pub fn state(&self, name: &str) -> Option<ChannelState> {
        self.inner.registry.state(name)
    }

    /// Unbind every channel and stop the supervisor. Idempotent.
    pub fn shutdown(&self) {
        self.inner.shutdown();
    }
}

impl LinkInner {
    fn shutdown(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let bindings = self.registry.take_all();
        info!(channels = bindings.len(), "shutting down link");
        let reason = TeardownReason::ExplicitUnbind;
        for binding in bindings {
            if tear_down(&binding, self.transport.as_ref(), reason, true) {
                binding.notify_teardown(reason);
            }
        }

        self.events.report(Event::Shutdown);
        if let Some(handle) = lock(&self.supervisor).take() {
            if handle.thread().id() != thread::current().id() && handle.join().is_err() {
                error!("supervisor thread panicked");
            }
        }
    }
}

impl Drop for LinkInner {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for Link {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Link")
            .field("channels", &self.channels())
            .field("closed", &self.inner.closed.load(Ordering::Relaxed))
            .finish()
    }
}
