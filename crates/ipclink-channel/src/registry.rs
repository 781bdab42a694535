//! Name-to-binding map. All mutations go through one mutex, so the first
//! caller to reach a slot wins it.
//!
//! Frames that arrive while a name is still connecting are held in its slot
//! and handed to the inbound queue when the binding is promoted. A name
//! whose held frames overflow is marked lossy and is torn down once bound.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use ipclink_frame::{ChannelId, Frame};
use serde::Serialize;
use tracing::{debug, warn};

use crate::channel::Binding;
use crate::error::{LinkError, Result};
use crate::lock;

/// Binding state of a channel name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelState {
    /// The transport is opening the channel.
    Connecting,
    /// Workers are running and sends are accepted.
    Bound,
}

enum Slot {
    Connecting {
        generation: u64,
        held: Vec<Frame>,
        overflowed: bool,
    },
    Bound(Arc<Binding>),
}

/// Where an inbound frame goes.
pub(crate) enum Route {
    Deliver(Arc<Binding>, Frame),
    Held,
    /// The name is connecting and its held frames are at the limit.
    Overflow(Frame),
    Drop(Frame),
}

/// Outcome of [`Registry::promote`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Promotion {
    Bound,
    /// Bound, but frames from the peer were lost while connecting.
    Lossy,
    /// The reservation was dropped meanwhile (link shutdown).
    Gone,
}

pub(crate) struct Registry {
    slots: Mutex<HashMap<ChannelId, Slot>>,
    next_generation: AtomicU64,
    held_limit: usize,
}

impl Registry {
    /// `held_limit` caps the frames kept for one connecting name.
    pub(crate) fn new(held_limit: usize) -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            next_generation: AtomicU64::new(1),
            held_limit,
        }
    }

    /// Claim `id` for a bind attempt and return the new binding's generation.
    pub(crate) fn reserve(&self, id: &ChannelId) -> Result<u64> {
        let mut slots = lock(&self.slots);
        if slots.contains_key(id.as_str()) {
            return Err(LinkError::AlreadyBound(id.to_string()));
        }
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        slots.insert(
            id.clone(),
            Slot::Connecting {
                generation,
                held: Vec::new(),
                overflowed: false,
            },
        );
        Ok(generation)
    }

    /// Give up a reservation made by [`reserve`](Self::reserve).
    pub(crate) fn release(&self, id: &ChannelId, generation: u64) {
        let mut slots = lock(&self.slots);
        if matches!(slots.get(id.as_str()), Some(Slot::Connecting { generation: g, .. }) if *g == generation)
        {
            slots.remove(id.as_str());
        }
    }

    /// Turn a reservation into a live binding, releasing any held frames
    /// into its inbound queue first.
    ///
    /// A lossy binding is still installed, but it neither accepts nor
    /// delivers anything; the caller is expected to tear it down.
    pub(crate) fn promote(&self, binding: Arc<Binding>) -> Promotion {
        let mut slots = lock(&self.slots);
        let Some(slot) = slots.get_mut(binding.id().as_str()) else {
            return Promotion::Gone;
        };
        let (held, mut lossy) = match slot {
            Slot::Connecting {
                generation,
                held,
                overflowed,
            } if *generation == binding.generation() => (std::mem::take(held), *overflowed),
            _ => return Promotion::Gone,
        };

        if !lossy && !held.is_empty() {
            debug!(channel = %binding.id(), frames = held.len(), "releasing held frames");
            for frame in held {
                if binding.core().deliver(frame).is_err() {
                    lossy = true;
                    break;
                }
            }
        }
        if lossy {
            warn!(channel = %binding.id(), "frames were lost while binding");
            binding.core().stop_accepting();
            binding.core().discard_inbound();
        }

        *slot = Slot::Bound(binding);
        if lossy {
            Promotion::Lossy
        } else {
            Promotion::Bound
        }
    }

    /// Find the binding for an inbound frame, holding it if the name is
    /// still connecting.
    pub(crate) fn route(&self, frame: Frame) -> Route {
        let mut slots = lock(&self.slots);
        match slots.get_mut(frame.channel.as_str()) {
            Some(Slot::Bound(binding)) => Route::Deliver(Arc::clone(binding), frame),
            Some(Slot::Connecting {
                held, overflowed, ..
            }) => {
                if !*overflowed && held.len() < self.held_limit {
                    held.push(frame);
                    Route::Held
                } else {
                    *overflowed = true;
                    held.clear();
                    Route::Overflow(frame)
                }
            }
            None => Route::Drop(frame),
        }
    }

    pub(crate) fn lookup(&self, name: &str) -> Option<Arc<Binding>> {
        match lock(&self.slots).get(name) {
            Some(Slot::Bound(binding)) => Some(Arc::clone(binding)),
            _ => None,
        }
    }

    pub(crate) fn state(&self, name: &str) -> Option<ChannelState> {
        lock(&self.slots).get(name).map(|slot| match slot {
            Slot::Connecting { .. } => ChannelState::Connecting,
            Slot::Bound(_) => ChannelState::Bound,
        })
    }

    /// Names of bound channels, sorted.
    pub(crate) fn channels(&self) -> Vec<ChannelId> {
        let mut names: Vec<ChannelId> = lock(&self.slots)
            .iter()
            .filter(|(_, slot)| matches!(slot, Slot::Bound(_)))
            .map(|(id, _)| id.clone())
            .collect();
        names.sort();
        names
    }

    /// Remove a bound channel. A name that is only connecting is not bound.
    pub(crate) fn remove(&self, name: &str) -> Result<Arc<Binding>> {
        let mut slots = lock(&self.slots);
        match slots.get(name) {
            Some(Slot::Bound(_)) => match slots.remove(name) {
                Some(Slot::Bound(binding)) => Ok(binding),
                _ => Err(LinkError::NotBound(name.to_string())),
            },
            _ => Err(LinkError::NotBound(name.to_string())),
        }
    }

    /// Remove the binding of `name` if it is still the one identified by
    /// `generation`. `None` matches whichever binding is current.
    pub(crate) fn remove_generation(
        &self,
        name: &str,
        generation: Option<u64>,
    ) -> Option<Arc<Binding>> {
        let mut slots = lock(&self.slots);
        let current = match slots.get(name) {
            Some(Slot::Bound(binding)) => binding.generation(),
            _ => return None,
        };
        if generation.is_some_and(|g| g != current) {
            return None;
        }
        match slots.remove(name) {
            Some(Slot::Bound(binding)) => Some(binding),
            _ => None,
        }
    }

    /// Remove every bound channel, leaving reservations in place.
    pub(crate) fn take_bound(&self) -> Vec<Arc<Binding>> {
        let mut slots = lock(&self.slots);
        let names: Vec<ChannelId> = slots
            .iter()
            .filter(|(_, slot)| matches!(slot, Slot::Bound(_)))
            .map(|(id, _)| id.clone())
            .collect();
        names
            .iter()
            .filter_map(|id| match slots.remove(id.as_str()) {
                Some(Slot::Bound(binding)) => Some(binding),
                _ => None,
            })
            .collect()
    }

    /// Remove everything, including in-flight reservations.
    pub(crate) fn take_all(&self) -> Vec<Arc<Binding>> {
        lock(&self.slots)
            .drain()
            .filter_map(|(_, slot)| match slot {
                Slot::Bound(binding) => Some(binding),
                Slot::Connecting { .. } => None,
            })
            .collect()
    }
}
