//! Callback relay: native events into host callables.
//!
//! Native objects that fire events own an [`EventSource`]. Firing an event
//! never calls into the host directly, whatever thread it happens on: the
//! event is queued on an unbounded channel and delivered later, on the host
//! thread, by the bridge's dispatch loop. This keeps the host strictly
//! single-threaded.
//!
//! Registrations live here, on the host side, keyed by source and slot. Each
//! slot holds at most one callable. A registration keeps its callable alive
//! until the slot is cleared or the source is dropped; once a source is dead
//! its pending events are discarded instead of delivered.
//!
//! A dead source's registrations are released by [`CallbackRelay::prune_dead`],
//! which the bridge runs right after anything that can destroy native
//! objects, or at the latest when the source's `Dropped` message is dequeued.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use tether_core::{FunctionRef, HandleTable, HostValue, NativeValue};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, trace};

use crate::marshal::encode_value;

/// Identifier of an event source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourceId(u64);

impl SourceId {
    /// The raw numeric id.
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "source#{}", self.0)
    }
}

/// Name of an event slot on a source, e.g. `"tick"`.
pub type EventSlot = &'static str;

/// Message queued for the host thread.
#[derive(Debug)]
pub enum RelayMessage {
    /// A native event fired.
    Event {
        /// The firing source.
        source: SourceId,
        /// The slot that fired.
        slot: EventSlot,
        /// Event arguments, translated on delivery.
        args: Vec<NativeValue>,
    },
    /// The source was destroyed.
    Dropped(SourceId),
    /// Stop a running event loop.
    ExitLoop,
}

#[derive(Debug)]
struct SourceShared {
    alive: AtomicBool,
}

/// Producer side of the relay. Cheap to clone and usable from any thread.
#[derive(Clone)]
pub struct RelaySender {
    tx: UnboundedSender<RelayMessage>,
    next_source: Arc<AtomicU64>,
}

impl RelaySender {
    /// Create a new event source for a native object.
    pub fn source(&self) -> EventSource {
        let id = SourceId(self.next_source.fetch_add(1, Ordering::Relaxed));
        EventSource {
            id,
            shared: Arc::new(SourceShared {
                alive: AtomicBool::new(true),
            }),
            tx: self.tx.clone(),
        }
    }

    /// Ask a running event loop to return.
    pub fn post_exit(&self) -> bool {
        self.tx.send(RelayMessage::ExitLoop).is_ok()
    }
}

impl fmt::Debug for RelaySender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelaySender")
            .field("closed", &self.tx.is_closed())
            .finish()
    }
}

/// Event-firing capability owned by a native object.
///
/// Dropping it marks the source dead: registrations for it are released and
/// events still in flight are discarded.
pub struct EventSource {
    id: SourceId,
    shared: Arc<SourceShared>,
    tx: UnboundedSender<RelayMessage>,
}

impl EventSource {
    /// The source id.
    pub fn id(&self) -> SourceId {
        self.id
    }

    /// Queue an event for delivery on the host thread.
    ///
    /// Returns `false` if the host side of the relay is gone.
    pub fn emit(&self, slot: EventSlot, args: Vec<NativeValue>) -> bool {
        self.tx
            .send(RelayMessage::Event {
                source: self.id,
                slot,
                args,
            })
            .is_ok()
    }
}

impl Drop for EventSource {
    fn drop(&mut self) {
        self.shared.alive.store(false, Ordering::Release);
        let _ = self.tx.send(RelayMessage::Dropped(self.id));
    }
}

impl fmt::Debug for EventSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventSource").field("id", &self.id).finish()
    }
}

/// Registration state of one slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationState {
    /// No callable registered.
    Unregistered,
    /// A callable is registered and retained.
    Registered,
}

/// Outcome of routing one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// The registered callable was invoked.
    Delivered,
    /// Nothing was registered for the slot.
    Unregistered,
    /// The source is dead; its registrations were released.
    Released,
}

/// An event ready to be delivered: the callable plus translated arguments.
#[derive(Debug)]
pub struct PreparedCall {
    /// The registered callable.
    pub callable: FunctionRef,
    /// Arguments already encoded as host values.
    pub args: Vec<HostValue>,
}

/// What the dispatch loop should do with a dequeued message.
#[derive(Debug)]
pub enum Prepared {
    /// Call this callable.
    Call(PreparedCall),
    /// Nothing to call.
    Skip(Delivery),
    /// Leave the event loop.
    Exit,
}

/// Delivery counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayStats {
    /// Events handed to a callable.
    pub delivered: u64,
    /// Events with no registered callable.
    pub unregistered: u64,
    /// Events discarded because their source was dead.
    pub released: u64,
    /// Current number of registered slots.
    pub registrations: usize,
}

struct SourceSlots {
    shared: Arc<SourceShared>,
    slots: HashMap<EventSlot, FunctionRef>,
}

/// Host side of the relay: registrations plus the event queue.
pub struct CallbackRelay {
    tx: UnboundedSender<RelayMessage>,
    rx: UnboundedReceiver<RelayMessage>,
    next_source: Arc<AtomicU64>,
    sources: HashMap<SourceId, SourceSlots>,
    // Pruned sources whose `Dropped` message is still queued.
    retired: HashSet<SourceId>,
    stats: RelayStats,
}

impl CallbackRelay {
    /// Create an empty relay.
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx,
            next_source: Arc::new(AtomicU64::new(1)),
            sources: HashMap::new(),
            retired: HashSet::new(),
            stats: RelayStats::default(),
        }
    }

    /// A producer handle for native code.
    pub fn sender(&self) -> RelaySender {
        RelaySender {
            tx: self.tx.clone(),
            next_source: Arc::clone(&self.next_source),
        }
    }

    /// Register `callable` on `slot` of `source`, returning the callable it
    /// replaces.
    pub fn register(
        &mut self,
        source: &EventSource,
        slot: EventSlot,
        callable: FunctionRef,
    ) -> Option<FunctionRef> {
        let entry = self.sources.entry(source.id).or_insert_with(|| SourceSlots {
            shared: Arc::clone(&source.shared),
            slots: HashMap::new(),
        });
        let previous = entry.slots.insert(slot, callable);
        debug!(source = %source.id, slot, replaced = previous.is_some(), "Registered callback");
        previous
    }

    /// Clear a slot. Returns whether a callable was registered.
    pub fn clear(&mut self, source: SourceId, slot: EventSlot) -> bool {
        let Some(entry) = self.sources.get_mut(&source) else {
            return false;
        };
        let removed = entry.slots.remove(slot).is_some();
        if entry.slots.is_empty() {
            self.sources.remove(&source);
        }
        removed
    }

    /// Drop every registration of a source. Returns how many were dropped.
    pub fn release_source(&mut self, source: SourceId) -> usize {
        let released = self
            .sources
            .remove(&source)
            .map(|entry| entry.slots.len())
            .unwrap_or(0);
        if released > 0 {
            debug!(%source, released, "Released callbacks of destroyed source");
        }
        released
    }

    /// Release the registrations of every source that has been destroyed,
    /// without waiting for its `Dropped` message. Returns how many
    /// registrations were dropped.
    pub fn prune_dead(&mut self) -> usize {
        let dead: Vec<SourceId> = self
            .sources
            .iter()
            .filter(|(_, entry)| !entry.shared.alive.load(Ordering::Acquire))
            .map(|(id, _)| *id)
            .collect();

        dead.into_iter().map(|source| self.retire(source)).sum()
    }

    fn retire(&mut self, source: SourceId) -> usize {
        self.retired.insert(source);
        self.release_source(source)
    }

    /// Registration state of a slot.
    pub fn state(&self, source: SourceId, slot: EventSlot) -> RegistrationState {
        let registered = self
            .sources
            .get(&source)
            .is_some_and(|entry| entry.slots.contains_key(slot));
        if registered {
            RegistrationState::Registered
        } else {
            RegistrationState::Unregistered
        }
    }

    /// Number of registered slots across all sources.
    pub fn registration_count(&self) -> usize {
        self.sources.values().map(|entry| entry.slots.len()).sum()
    }

    /// Dequeue the next message without blocking.
    pub fn try_next(&mut self) -> Option<RelayMessage> {
        self.rx.try_recv().ok()
    }

    /// Dequeue the next message, blocking the current thread until one arrives.
    ///
    /// Must not be called from inside an async runtime.
    pub fn wait_next(&mut self) -> Option<RelayMessage> {
        self.rx.blocking_recv()
    }

    /// Resolve a message into the call to make, translating event arguments
    /// into host values.
    pub fn prepare(&mut self, handles: &mut HandleTable, message: RelayMessage) -> Prepared {
        match message {
            RelayMessage::ExitLoop => Prepared::Exit,
            RelayMessage::Dropped(source) => {
                self.retired.remove(&source);
                self.release_source(source);
                Prepared::Skip(Delivery::Released)
            }
            RelayMessage::Event { source, slot, args } => {
                let delivery = self.route(source, slot);
                match delivery {
                    Ok(callable) => {
                        self.stats.delivered += 1;
                        let args = args
                            .into_iter()
                            .map(|arg| encode_value(handles, arg))
                            .collect();
                        trace!(%source, slot, "Delivering event");
                        Prepared::Call(PreparedCall { callable, args })
                    }
                    Err(outcome) => {
                        match outcome {
                            Delivery::Released => self.stats.released += 1,
                            _ => self.stats.unregistered += 1,
                        }
                        trace!(%source, slot, ?outcome, "Discarding event");
                        Prepared::Skip(outcome)
                    }
                }
            }
        }
    }

    fn route(&mut self, source: SourceId, slot: EventSlot) -> Result<FunctionRef, Delivery> {
        if self.retired.contains(&source) {
            return Err(Delivery::Released);
        }
        let Some(entry) = self.sources.get(&source) else {
            return Err(Delivery::Unregistered);
        };
        if !entry.shared.alive.load(Ordering::Acquire) {
            self.retire(source);
            return Err(Delivery::Released);
        }
        entry
            .slots
            .get(slot)
            .cloned()
            .ok_or(Delivery::Unregistered)
    }

    /// Current counters.
    pub fn stats(&self) -> RelayStats {
        RelayStats {
            registrations: self.registration_count(),
            ..self.stats
        }
    }
}

impl Default for CallbackRelay {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CallbackRelay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackRelay")
            .field("sources", &self.sources.len())
            .field("registrations", &self.registration_count())
            .finish()
    }
}
