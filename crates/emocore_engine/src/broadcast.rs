//! In-process publish/subscribe hub for core update events.
//!
//! The feed distributes [`CoreUpdateEvent`]s to any number of independent
//! subscribers:
//! - Delivery is at-most-once per currently-active subscriber; a
//!   subscriber that attaches after an event was published never receives
//!   it retroactively.
//! - For a single core id, delivery order matches publish order.
//! - Batch publication stamps a shared `batch_id` on every event so
//!   subscribers can tell they originated from one causal update, while
//!   the events themselves are still delivered individually.
//!
//! A bounded history of recent events is kept for building per-core
//! detail contexts; it is a convenience view, not a durable log.

use emocore_model::{CoreId, CoreUpdateEvent};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::time::{Duration, Instant};

/// Distributes core update events to subscribers.
pub struct CoreEventFeed {
    subscribers: RwLock<Vec<Sender<CoreUpdateEvent>>>,
    history: RwLock<Vec<CoreUpdateEvent>>,
    max_history: usize,
    next_batch_id: AtomicU64,
}

impl CoreEventFeed {
    /// Creates a feed retaining up to `max_history` recent events.
    pub fn new(max_history: usize) -> Self {
        Self {
            subscribers: RwLock::new(Vec::new()),
            history: RwLock::new(Vec::new()),
            max_history,
            next_batch_id: AtomicU64::new(1),
        }
    }

    /// Subscribes to all future events.
    pub fn subscribe(&self) -> Receiver<CoreUpdateEvent> {
        let (tx, rx) = mpsc::channel();
        self.subscribers.write().push(tx);
        rx
    }

    /// Publishes one event to all active subscribers.
    pub fn publish(&self, event: CoreUpdateEvent) {
        {
            let mut history = self.history.write();
            history.push(event.clone());
            if history.len() > self.max_history {
                let excess = history.len() - self.max_history;
                history.drain(0..excess);
            }
        }

        // Disconnected subscribers are dropped on send failure
        let mut subscribers = self.subscribers.write();
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Publishes a batch of events from one causal update.
    ///
    /// Every event is stamped with the same fresh batch id and delivered
    /// individually in order.
    pub fn publish_batch(&self, events: Vec<CoreUpdateEvent>) {
        if events.is_empty() {
            return;
        }
        let batch_id = self.next_batch_id.fetch_add(1, Ordering::SeqCst);
        for mut event in events {
            event.batch_id = Some(batch_id);
            self.publish(event);
        }
    }

    /// Returns up to `limit` retained events for one core, most recent
    /// first.
    pub fn events_for(&self, id: &CoreId, limit: usize) -> Vec<CoreUpdateEvent> {
        self.history
            .read()
            .iter()
            .rev()
            .filter(|e| &e.core_id == id)
            .take(limit)
            .cloned()
            .collect()
    }

    /// Number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }

    /// Number of retained events.
    pub fn history_len(&self) -> usize {
        self.history.read().len()
    }
}

struct ThrottleState {
    last_emit: Option<Instant>,
    pending: bool,
}

/// Coalesces bursts of "something changed" signals.
///
/// A tick is emitted immediately when the previous one is older than the
/// window; ticks inside the window are collapsed into a single pending
/// tick released by [`flush`](Self::flush) once the window elapses.
/// Subscribers therefore observe at most one tick per window even across
/// rapid write bursts, while the update events themselves flow through
/// [`CoreEventFeed`] individually.
pub struct ChangeThrottle {
    window: Duration,
    state: Mutex<ThrottleState>,
    subscribers: RwLock<Vec<Sender<()>>>,
}

impl ChangeThrottle {
    /// Creates a throttle with the given coalescing window.
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            state: Mutex::new(ThrottleState {
                last_emit: None,
                pending: false,
            }),
            subscribers: RwLock::new(Vec::new()),
        }
    }

    /// Subscribes to coalesced change ticks.
    pub fn subscribe(&self) -> Receiver<()> {
        let (tx, rx) = mpsc::channel();
        self.subscribers.write().push(tx);
        rx
    }

    /// Signals that something changed.
    pub fn notify(&self) {
        let mut state = self.state.lock();
        let emit_now = match state.last_emit {
            Some(last) => last.elapsed() >= self.window,
            None => true,
        };

        if emit_now {
            state.last_emit = Some(Instant::now());
            state.pending = false;
            drop(state);
            self.emit();
        } else {
            state.pending = true;
        }
    }

    /// Releases a pending tick if the window has elapsed.
    ///
    /// Returns true if a tick was emitted.
    pub fn flush(&self) -> bool {
        let mut state = self.state.lock();
        let window_open = match state.last_emit {
            Some(last) => last.elapsed() >= self.window,
            None => true,
        };
        if state.pending && window_open {
            state.last_emit = Some(Instant::now());
            state.pending = false;
            drop(state);
            self.emit();
            true
        } else {
            false
        }
    }

    fn emit(&self) {
        let mut subscribers = self.subscribers.write();
        subscribers.retain(|tx| tx.send(()).is_ok());
    }
}
