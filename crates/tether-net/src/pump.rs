//! The event pump.
//!
//! An [`EventPump`] is the native object behind the `global_eventpump`
//! export. Events are queued on the bridge's relay and delivered when the
//! host ticks the pump or runs its event loop, so the pump itself only keeps
//! counters.

use std::sync::atomic::{AtomicU64, Ordering};

/// A native event pump.
#[derive(Debug, Default)]
pub struct EventPump {
    ticks: AtomicU64,
    loops: AtomicU64,
}

impl EventPump {
    /// Create a pump.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a tick.
    pub fn record_tick(&self) {
        self.ticks.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an event loop run.
    pub fn record_loop(&self) {
        self.loops.fetch_add(1, Ordering::Relaxed);
    }

    /// Number of ticks so far.
    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }

    /// Number of event loop runs so far.
    pub fn loops(&self) -> u64 {
        self.loops.load(Ordering::Relaxed)
    }
}
