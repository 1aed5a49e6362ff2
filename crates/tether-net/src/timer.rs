//! Periodic timers.
//!
//! A [`Timer`] ticks on its own background thread. Each tick bumps the tick
//! counter and fires the `tick` event through the relay, so host callbacks
//! only ever run when the host pumps events.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tether_core::{BridgeError, BridgeResult};
use tether_host::{EventSlot, EventSource};
use tracing::{debug, warn};

/// Slot fired on every tick.
pub const TICK: EventSlot = "tick";

#[derive(Debug, Default)]
struct TimerState {
    interval: Option<Duration>,
    shutdown: bool,
}

struct TimerShared {
    events: EventSource,
    state: Mutex<TimerState>,
    wake: Condvar,
    ticks: AtomicU64,
}

impl TimerShared {
    fn tick(&self) {
        self.ticks.fetch_add(1, Ordering::Relaxed);
        self.events.emit(TICK, Vec::new());
    }

    fn run(&self) {
        let mut state = self.state.lock();
        while !state.shutdown {
            match state.interval {
                None => self.wake.wait(&mut state),
                Some(interval) => {
                    let timed_out = self.wake.wait_for(&mut state, interval).timed_out();
                    if timed_out && state.interval.is_some() && !state.shutdown {
                        self.tick();
                    }
                }
            }
        }
    }
}

/// A timer firing `tick` events at a fixed interval.
pub struct Timer {
    shared: Arc<TimerShared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Timer {
    /// Create a stopped timer firing through `events`.
    pub fn new(events: EventSource) -> Self {
        Self {
            shared: Arc::new(TimerShared {
                events,
                state: Mutex::new(TimerState::default()),
                wake: Condvar::new(),
                ticks: AtomicU64::new(0),
            }),
            worker: Mutex::new(None),
        }
    }

    /// The event source ticks are fired on.
    pub fn events(&self) -> &EventSource {
        &self.shared.events
    }

    /// Start ticking every `interval`. Restarting resets the interval.
    pub fn start(&self, interval: Duration) -> BridgeResult<()> {
        if interval.is_zero() {
            return Err(BridgeError::Native("timer interval must be positive".to_string()));
        }

        let mut worker = self.worker.lock();
        if worker.is_none() {
            let shared = Arc::clone(&self.shared);
            let handle = thread::Builder::new()
                .name("tether-timer".to_string())
                .spawn(move || shared.run())
                .map_err(|e| BridgeError::Native(format!("failed to spawn timer thread: {e}")))?;
            *worker = Some(handle);
        }

        self.shared.state.lock().interval = Some(interval);
        self.shared.wake.notify_all();
        debug!(
            source = %self.shared.events.id(),
            interval_ms = interval.as_millis() as u64,
            "Timer started"
        );
        Ok(())
    }

    /// Stop ticking. The worker thread idles until the timer is restarted.
    pub fn stop(&self) {
        self.shared.state.lock().interval = None;
        self.shared.wake.notify_all();
    }

    /// Whether the timer is ticking.
    pub fn started(&self) -> bool {
        self.shared.state.lock().interval.is_some()
    }

    /// Fire a tick now, from the calling thread.
    pub fn force_tick(&self) {
        self.shared.tick();
    }

    /// Ticks fired so far, forced ones included.
    pub fn ticks(&self) -> u64 {
        self.shared.ticks.load(Ordering::Relaxed)
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        self.shared.state.lock().shutdown = true;
        self.shared.wake.notify_all();

        if let Some(handle) = self.worker.lock().take() {
            if let Err(e) = handle.join() {
                warn!("Failed to join timer thread: {:?}", e);
            }
        }
    }
}

impl std::fmt::Debug for Timer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Timer")
            .field("source", &self.shared.events.id())
            .field("started", &self.started())
            .field("ticks", &self.ticks())
            .finish()
    }
}
