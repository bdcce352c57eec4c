//! Offline queue of pending core mutations.
//!
//! While the engine is in offline mode, accepted writes are appended here
//! instead of reaching the store. On reconnect (or explicit drain) the
//! orchestrator replays entries in FIFO order through the normal write
//! path. A failed replay is rescheduled with exponential backoff; entries
//! exceeding the attempt ceiling move to a dead-letter log and leave the
//! active queue.
//!
//! Per-core submission order is preserved: an entry is never released
//! ahead of an earlier entry for the same core id, so a conflict-resolved-
//! away update can never land after the authoritative newer one.

use crate::resolver::CoreCandidate;
use emocore_model::Timestamp;
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::time::Instant;

/// A core mutation waiting to be replayed.
#[derive(Debug, Clone)]
pub struct PendingWrite {
    /// The candidate version and its provenance.
    pub candidate: CoreCandidate,
    /// Journal entry the write relates to, if any.
    pub related_entry_id: Option<String>,
    /// Analysis metadata to announce once the write commits, if the
    /// write came from an analysis run.
    pub analysis_data: Option<BTreeMap<String, String>>,
}

/// A queued pending write with retry bookkeeping.
#[derive(Debug, Clone)]
pub struct QueueEntry {
    /// The pending mutation.
    pub write: PendingWrite,
    /// When the write was first accepted into the queue.
    pub first_attempt: Timestamp,
    /// Failed replay attempts so far.
    pub retries: u32,
    /// Earliest time the next replay may run. `None` means immediately.
    pub not_before: Option<Instant>,
}

impl QueueEntry {
    fn new(write: PendingWrite) -> Self {
        Self {
            write,
            first_attempt: Timestamp::now(),
            retries: 0,
            not_before: None,
        }
    }

    fn is_ready(&self, now: Instant) -> bool {
        match self.not_before {
            Some(at) => at <= now,
            None => true,
        }
    }
}

/// FIFO queue of pending mutations accumulated while offline.
#[derive(Default)]
pub struct OfflineQueue {
    entries: RwLock<VecDeque<QueueEntry>>,
    dead: RwLock<Vec<QueueEntry>>,
}

impl OfflineQueue {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a pending write.
    pub fn enqueue(&self, write: PendingWrite) {
        self.entries.write().push_back(QueueEntry::new(write));
    }

    /// Returns true if no writes are pending.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Number of pending writes.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Removes and returns the entries eligible to replay now, in FIFO
    /// order.
    ///
    /// An entry still waiting on backoff holds back every later entry for
    /// the same core id; those stay queued in their original order.
    pub fn take_ready(&self, now: Instant) -> Vec<QueueEntry> {
        let mut entries = self.entries.write();
        let mut ready = Vec::new();
        let mut held = VecDeque::new();
        let mut blocked: BTreeSet<String> = BTreeSet::new();

        for entry in entries.drain(..) {
            let id = entry.write.candidate.core.id.as_str().to_string();
            if entry.is_ready(now) && !blocked.contains(&id) {
                ready.push(entry);
            } else {
                blocked.insert(id);
                held.push_back(entry);
            }
        }

        *entries = held;
        ready
    }

    /// Puts entries back at the front of the queue, preserving their
    /// relative order ahead of everything currently queued.
    pub fn restore(&self, entries: Vec<QueueEntry>) {
        let mut queue = self.entries.write();
        for entry in entries.into_iter().rev() {
            queue.push_front(entry);
        }
    }

    /// Moves an entry to the dead-letter log.
    pub fn push_dead(&self, entry: QueueEntry) {
        self.dead.write().push(entry);
    }

    /// Entries dropped after exhausting their retries.
    pub fn dead_letters(&self) -> Vec<QueueEntry> {
        self.dead.read().clone()
    }

    /// Drops everything, active and dead.
    pub fn clear(&self) {
        self.entries.write().clear();
        self.dead.write().clear();
    }
}

impl std::fmt::Debug for OfflineQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OfflineQueue")
            .field("len", &self.len())
            .field("dead", &self.dead.read().len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use emocore_model::{source, Core};
    use std::time::Duration;

    fn pending(id: &str, level: f64) -> PendingWrite {
        PendingWrite {
            candidate: CoreCandidate::new(
                Core::new(id, id).with_level(level),
                source::MANUAL,
            ),
            related_entry_id: None,
            analysis_data: None,
        }
    }

    #[test]
    fn enqueue_take_fifo() {
        let queue = OfflineQueue::new();
        queue.enqueue(pending("optimism", 0.1));
        queue.enqueue(pending("resilience", 0.2));
        queue.enqueue(pending("optimism", 0.3));

        assert_eq!(queue.len(), 3);

        let ready = queue.take_ready(Instant::now());
        assert_eq!(ready.len(), 3);
        assert_eq!(ready[0].write.candidate.core.current_level, 0.1);
        assert_eq!(ready[1].write.candidate.core.current_level, 0.2);
        assert_eq!(ready[2].write.candidate.core.current_level, 0.3);
        assert!(queue.is_empty());
    }

    #[test]
    fn backoff_holds_back_same_core_entries() {
        let queue = OfflineQueue::new();

        let mut delayed = QueueEntry::new(pending("optimism", 0.1));
        delayed.retries = 1;
        delayed.not_before = Some(Instant::now() + Duration::from_secs(60));
        queue.restore(vec![delayed]);

        queue.enqueue(pending("optimism", 0.2));
        queue.enqueue(pending("resilience", 0.3));

        let ready = queue.take_ready(Instant::now());

        // Only the resilience entry is released; both optimism entries
        // stay queued in order behind the delayed one.
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].write.candidate.core.id.as_str(), "resilience");
        assert_eq!(queue.len(), 2);

        let later = queue.take_ready(Instant::now() + Duration::from_secs(120));
        assert_eq!(later.len(), 2);
        assert_eq!(later[0].write.candidate.core.current_level, 0.1);
        assert_eq!(later[1].write.candidate.core.current_level, 0.2);
    }

    #[test]
    fn restore_preserves_order_ahead_of_queue() {
        let queue = OfflineQueue::new();
        queue.enqueue(pending("optimism", 0.9));

        let a = QueueEntry::new(pending("resilience", 0.1));
        let b = QueueEntry::new(pending("resilience", 0.2));
        queue.restore(vec![a, b]);

        let ready = queue.take_ready(Instant::now());
        assert_eq!(ready[0].write.candidate.core.current_level, 0.1);
        assert_eq!(ready[1].write.candidate.core.current_level, 0.2);
        assert_eq!(ready[2].write.candidate.core.current_level, 0.9);
    }

    #[test]
    fn dead_letter_log() {
        let queue = OfflineQueue::new();
        let mut entry = QueueEntry::new(pending("optimism", 0.5));
        entry.retries = 5;

        queue.push_dead(entry);

        assert!(queue.is_empty());
        assert_eq!(queue.dead_letters().len(), 1);
        assert_eq!(queue.dead_letters()[0].retries, 5);
    }

    #[test]
    fn entries_record_first_attempt_time() {
        let queue = OfflineQueue::new();
        queue.enqueue(pending("optimism", 0.5));

        let ready = queue.take_ready(Instant::now());
        assert!(ready[0].first_attempt.as_millis() > 0);
        assert_eq!(ready[0].retries, 0);
    }
}
