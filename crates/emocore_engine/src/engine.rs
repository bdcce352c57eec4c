//! The synchronization orchestrator.
//!
//! [`CoreSyncEngine`] is the single public-facing coordinator: it accepts
//! read and write requests, consults the cache with store fallback, runs
//! conflict resolution on the write path, routes writes to the offline
//! queue when offline, manages navigation and error state, and announces
//! accepted changes through the event feed.
//!
//! All writes for a core are serialized through one write gate, so two
//! near-simultaneous updates always meet in the conflict resolver instead
//! of silently overwriting one another. The queue drain never runs
//! concurrently with itself.

use crate::broadcast::{ChangeThrottle, CoreEventFeed};
use crate::cache::{CoreCache, DetailContext};
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::queue::{OfflineQueue, PendingWrite, QueueEntry};
use crate::resolver::{self, CoreCandidate};
use emocore_model::{
    source, Core, CoreId, CoreNavigationContext, CoreUpdateEvent, Timestamp, Trend,
};
use emocore_store::CoreStore;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// Lifecycle state of an engine instance.
///
/// `Ready` and `Degraded` both accept operations; degraded mode serves
/// cached data and records the triggering error. There is no terminal
/// state short of process shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// `initialize` has not been called.
    Uninitialized,
    /// `initialize` is in progress.
    Initializing,
    /// Fully operational.
    Ready,
    /// Operating on last-known-good data after an error.
    Degraded,
}

impl EngineState {
    /// Returns true if the engine accepts operations.
    pub fn is_operational(&self) -> bool {
        matches!(self, EngineState::Ready | EngineState::Degraded)
    }
}

/// Recovery actions callers can request to clear the current error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryAction {
    /// Force-reload all cores from the store.
    RefreshData,
    /// Drain the offline queue again.
    RetrySync,
    /// Drop the cache and reload from the store.
    ResetCache,
}

/// Per-core outcome of a batch update.
#[derive(Debug, Clone, Default)]
pub struct BatchUpdateReport {
    /// Cores whose writes were accepted.
    pub applied: Vec<CoreId>,
    /// Cores whose writes failed, with the failure.
    pub failed: Vec<(CoreId, EngineError)>,
}

impl BatchUpdateReport {
    /// Returns true if every write in the batch was accepted.
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Outcome of one offline queue drain pass.
#[derive(Debug, Clone, Copy, Default)]
pub struct DrainReport {
    /// Entries replayed successfully.
    pub replayed: usize,
    /// Entries rescheduled with backoff after a failed attempt.
    pub requeued: usize,
    /// Entries dropped after exhausting their retries.
    pub dead_lettered: usize,
    /// Entries still queued after the pass.
    pub remaining: usize,
}

impl DrainReport {
    /// Returns true if nothing failed during the pass.
    pub fn is_clean(&self) -> bool {
        self.requeued == 0 && self.dead_lettered == 0
    }
}

struct NavigationState {
    current: Option<CoreNavigationContext>,
    history: VecDeque<CoreId>,
}

/// The emotional core synchronization engine.
///
/// Constructed explicitly by the host's composition root with its store
/// collaborator injected; tests get isolated instances the same way.
pub struct CoreSyncEngine<S: CoreStore> {
    config: EngineConfig,
    store: Arc<S>,
    cache: CoreCache,
    feed: CoreEventFeed,
    throttle: ChangeThrottle,
    queue: OfflineQueue,
    state: RwLock<EngineState>,
    last_error: RwLock<Option<EngineError>>,
    offline: AtomicBool,
    navigation: RwLock<NavigationState>,
    last_sources: RwLock<BTreeMap<CoreId, String>>,
    write_gate: Mutex<()>,
    drain_gate: Mutex<()>,
}

impl<S: CoreStore> CoreSyncEngine<S> {
    /// Creates an engine over the given store.
    pub fn new(config: EngineConfig, store: S) -> Self {
        let cache = CoreCache::new(config.cache_validity);
        let feed = CoreEventFeed::new(config.event_history_limit);
        let throttle = ChangeThrottle::new(config.throttle_window);
        Self {
            config,
            store: Arc::new(store),
            cache,
            feed,
            throttle,
            queue: OfflineQueue::new(),
            state: RwLock::new(EngineState::Uninitialized),
            last_error: RwLock::new(None),
            offline: AtomicBool::new(false),
            navigation: RwLock::new(NavigationState {
                current: None,
                history: VecDeque::new(),
            }),
            last_sources: RwLock::new(BTreeMap::new()),
            write_gate: Mutex::new(()),
            drain_gate: Mutex::new(()),
        }
    }

    /// The underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Loads all cores into the cache, seeding the defaults if the store
    /// is empty.
    pub fn initialize(&self) -> EngineResult<()> {
        *self.state.write() = EngineState::Initializing;

        let cores = match self.store.list() {
            Ok(cores) => cores,
            Err(e) => {
                let err = EngineError::from_store_read(e);
                self.record_error(&err);
                return Err(err);
            }
        };

        let cores = if cores.is_empty() {
            let seeds = Core::seed_set();
            for core in &seeds {
                if let Err(e) = self.store.put(core.clone()) {
                    let err = EngineError::from_store_write(e, &core.id);
                    self.record_error(&err);
                    return Err(err);
                }
            }
            debug!(count = seeds.len(), "seeded default core set");
            seeds
        } else {
            cores
        };

        self.cache.put_all(cores);
        *self.last_error.write() = None;
        *self.state.write() = EngineState::Ready;
        Ok(())
    }

    /// Returns the full core set, bypassing the cache if forced.
    ///
    /// If the store is unreachable but cached data exists, the stale
    /// cache is returned and a recoverable `DataLoadFailure` is recorded.
    pub fn load_all_cores(&self, force_refresh: bool) -> EngineResult<Vec<Core>> {
        self.throttle.flush();

        // Offline-first: while offline the cache (including optimistic
        // writes) is authoritative, never the store.
        if self.is_offline() {
            let cached = self.cache.get_all_stale();
            if !cached.is_empty() {
                return Ok(cached);
            }
        }

        if !force_refresh {
            if let Some(cores) = self.cache.get_all() {
                return Ok(cores);
            }
        }

        match self.store.list() {
            Ok(cores) => {
                self.cache.put_all(cores.clone());
                self.note_success();
                Ok(cores)
            }
            Err(e) => {
                let err = EngineError::from_store_read(e);
                self.record_error(&err);
                let stale = self.cache.get_all_stale();
                if err.is_recoverable() && !stale.is_empty() {
                    Ok(stale)
                } else {
                    Err(err)
                }
            }
        }
    }

    /// Returns up to `limit` cores sorted by `current_level` descending,
    /// ties broken by id ascending. A limit of zero yields an empty set.
    pub fn load_top_cores(&self, limit: usize) -> EngineResult<Vec<Core>> {
        let mut cores = self.load_all_cores(false)?;
        cores.sort_by(|a, b| {
            b.current_level
                .partial_cmp(&a.current_level)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        cores.truncate(limit);
        Ok(cores)
    }

    /// Gets a single core by id. Absence is not an error; store failures
    /// are recorded as engine state and last-known-good data is served.
    pub fn get_core_by_id(&self, id: &CoreId) -> Option<Core> {
        self.throttle.flush();

        if self.is_offline() {
            if let Some(core) = self.cache.get_stale(id) {
                return Some(core);
            }
        }

        if let Some(core) = self.cache.get(id) {
            return Some(core);
        }

        match self.store.get(id) {
            Ok(Some(core)) => {
                self.cache.put(core.clone());
                Some(core)
            }
            Ok(None) => None,
            Err(e) => {
                self.record_error(&EngineError::from_store_read(e));
                self.cache.get_stale(id)
            }
        }
    }

    /// Gets a single core by display name, case-insensitively.
    pub fn get_core_by_name(&self, name: &str) -> Option<Core> {
        let cores = self.load_all_cores(false).ok()?;
        cores
            .into_iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
    }

    /// Submits a full core value as a write with the given provenance.
    ///
    /// The write is conflict-resolved against the current version,
    /// persisted, cached, and announced. Out-of-range levels are rejected
    /// before any state is touched. While offline the write is queued and
    /// the optimistically updated core is returned.
    pub fn update_core(&self, core: Core, update_source: &str) -> EngineResult<Core> {
        self.throttle.flush();
        self.submit_write(CoreCandidate::new(core, update_source), None, None)
    }

    /// Applies an analysis result to one core, recording the journal
    /// entry that produced it.
    ///
    /// Behaves like [`update_core`](Self::update_core) with source
    /// `ai_analysis` (overridable via a `source` key in `additional`),
    /// attaches `related_entry_id` to the emitted events and the core's
    /// detail context, and follows up with an `AnalysisCompleted` event
    /// carrying `additional`.
    pub fn update_core_with_context(
        &self,
        id: &CoreId,
        new_level: f64,
        related_entry_id: Option<&str>,
        additional: BTreeMap<String, String>,
    ) -> EngineResult<Core> {
        self.throttle.flush();

        let Some(current) = self.get_core_by_id(id) else {
            let err = EngineError::unknown_core(id);
            self.record_error(&err);
            return Err(err);
        };

        let update_source = additional
            .get("source")
            .cloned()
            .unwrap_or_else(|| source::AI_ANALYSIS.to_string());
        let candidate_core = current
            .with_level(new_level)
            .with_last_updated(Timestamp::now());

        self.submit_write(
            CoreCandidate::new(candidate_core, update_source),
            related_entry_id,
            Some(additional),
        )
    }

    /// Applies a set of writes, each independently conflict-resolved, and
    /// publishes the resulting events as one causal batch.
    ///
    /// Per-core failures are reported in the result and are not mutually
    /// fatal.
    pub fn batch_update_cores(&self, cores: Vec<Core>, update_source: &str) -> BatchUpdateReport {
        self.throttle.flush();

        let mut report = BatchUpdateReport::default();
        let mut batch_events = Vec::new();

        for core in cores {
            let id = core.id.clone();
            if !Core::level_in_range(core.current_level) {
                let err = EngineError::level_out_of_range(&id, core.current_level);
                self.record_error(&err);
                report.failed.push((id, err));
                continue;
            }

            let candidate = Self::normalize(CoreCandidate::new(core, update_source));
            if self.is_offline() {
                self.write_offline(candidate, None, None);
                report.applied.push(id);
                continue;
            }

            match self.write_online(candidate, None) {
                Ok((_, events)) => {
                    batch_events.extend(events);
                    report.applied.push(id);
                }
                Err(err) => {
                    self.record_error(&err);
                    report.failed.push((id, err));
                }
            }
        }

        if !batch_events.is_empty() {
            self.feed.publish_batch(batch_events);
            self.throttle.notify();
        }
        if report.is_complete() && !report.applied.is_empty() {
            self.note_success();
        }
        report
    }

    /// Resolves a batch of same-id candidate versions and writes the
    /// winner. Returns `None` for an empty batch.
    pub fn resolve_core_conflicts(
        &self,
        candidates: Vec<CoreCandidate>,
    ) -> EngineResult<Option<Core>> {
        let Some(winner) = resolver::resolve(&candidates) else {
            return Ok(None);
        };
        self.submit_write(winner, None, None).map(Some)
    }

    /// Updates the navigation state to focus `id`.
    pub fn navigate_to_core(
        &self,
        id: &CoreId,
        context: Option<CoreNavigationContext>,
    ) -> EngineResult<()> {
        if self.get_core_by_id(id).is_none() {
            let err = EngineError::unknown_core(id);
            self.record_error(&err);
            return Err(err);
        }

        let context = context.unwrap_or_else(|| CoreNavigationContext::new(id.clone()));
        let mut nav = self.navigation.write();
        nav.current = Some(context);
        nav.history.push_back(id.clone());
        while nav.history.len() > self.config.nav_history_limit {
            nav.history.pop_front();
        }
        Ok(())
    }

    /// Snapshot of the current navigation context.
    pub fn navigation(&self) -> Option<CoreNavigationContext> {
        self.navigation.read().current.clone()
    }

    /// Snapshot of the bounded navigation history, oldest first.
    pub fn navigation_history(&self) -> Vec<CoreId> {
        self.navigation.read().history.iter().cloned().collect()
    }

    /// Warms detail-context cache entries for the given cores.
    ///
    /// Best-effort: unknown or unloadable ids are skipped. Returns the
    /// number of contexts warmed.
    pub fn preload_core_details(&self, ids: &[CoreId]) -> usize {
        let mut warmed = 0;
        for id in ids {
            if self.get_core_by_id(id).is_none() {
                continue;
            }

            let recent_events = self.feed.events_for(id, 20);
            let mut related_entry_ids: Vec<String> = self
                .cache
                .detail(id)
                .map(|d| d.related_entry_ids)
                .unwrap_or_default();
            for event in &recent_events {
                if let Some(entry) = &event.related_entry_id {
                    if !related_entry_ids.contains(entry) {
                        related_entry_ids.push(entry.clone());
                    }
                }
            }

            self.cache.put_detail(
                id.clone(),
                DetailContext {
                    related_entry_ids,
                    recent_events,
                },
            );
            warmed += 1;
        }
        warmed
    }

    /// Snapshot of a core's cached detail context.
    pub fn core_details(&self, id: &CoreId) -> Option<DetailContext> {
        self.cache.detail(id)
    }

    /// Toggles offline routing. Coming back online drains the queue.
    pub fn set_offline_mode(&self, offline: bool) {
        let was_offline = self.offline.swap(offline, Ordering::SeqCst);
        if was_offline && !offline {
            self.drain_offline_queue();
        }
    }

    /// Returns true if writes are currently being queued.
    pub fn is_offline(&self) -> bool {
        self.offline.load(Ordering::SeqCst)
    }

    /// Replays queued writes through the normal write path in FIFO order.
    ///
    /// A failed entry is rescheduled with exponential backoff and holds
    /// back later entries for the same core; an entry exhausting its
    /// retries is dead-lettered and surfaces a non-recoverable
    /// `SyncFailure`. Only one drain runs at a time; a concurrent call
    /// returns an empty report.
    pub fn drain_offline_queue(&self) -> DrainReport {
        let Some(_gate) = self.drain_gate.try_lock() else {
            return DrainReport::default();
        };

        let now = Instant::now();
        let ready = self.queue.take_ready(now);
        let mut report = DrainReport::default();
        let mut blocked: BTreeSet<CoreId> = BTreeSet::new();
        let mut restore: Vec<QueueEntry> = Vec::new();

        debug!(ready = ready.len(), "draining offline queue");

        for mut entry in ready {
            let id = entry.write.candidate.core.id.clone();
            if blocked.contains(&id) {
                restore.push(entry);
                continue;
            }

            let outcome = self.replay_write(
                entry.write.candidate.clone(),
                entry.write.related_entry_id.as_deref(),
            );
            match outcome {
                Ok((accepted, events)) => {
                    for event in events {
                        self.feed.publish(event);
                    }
                    if let Some(data) = entry.write.analysis_data.clone() {
                        let mut event = CoreUpdateEvent::analysis_completed(
                            accepted.id.clone(),
                            data,
                            accepted.last_updated,
                            entry.write.candidate.source.clone(),
                        );
                        event.related_entry_id = entry.write.related_entry_id.clone();
                        self.feed.publish(event);
                    }
                    self.throttle.notify();
                    report.replayed += 1;
                }
                Err(err) => {
                    entry.retries += 1;
                    blocked.insert(id.clone());

                    if entry.retries >= self.config.retry.max_attempts {
                        warn!(
                            core = %id,
                            retries = entry.retries,
                            "dropping offline write after exhausting retries"
                        );
                        let sync_err = EngineError::SyncFailure {
                            message: format!(
                                "offline write for {id} dropped after {} attempts: {err}",
                                entry.retries
                            ),
                            recoverable: false,
                            core_id: Some(id),
                        };
                        self.record_error(&sync_err);
                        self.queue.push_dead(entry);
                        report.dead_lettered += 1;
                    } else {
                        entry.not_before =
                            Some(now + self.config.retry.delay_for_attempt(entry.retries));
                        restore.push(entry);
                        report.requeued += 1;
                    }
                }
            }
        }

        self.queue.restore(restore);
        report.remaining = self.queue.len();
        report
    }

    /// Number of writes waiting in the offline queue.
    pub fn pending_writes(&self) -> usize {
        self.queue.len()
    }

    /// Offline writes dropped after exhausting their retries.
    pub fn dead_letters(&self) -> Vec<QueueEntry> {
        self.queue.dead_letters()
    }

    /// Attempts to clear the current error by retrying the failed class
    /// of operation. Returns whether the attempt succeeded; never errors.
    pub fn execute_recovery_action(&self, action: RecoveryAction) -> bool {
        let ok = match action {
            RecoveryAction::RefreshData => self.refresh_from_store(),
            RecoveryAction::RetrySync => self.drain_offline_queue().is_clean(),
            RecoveryAction::ResetCache => {
                self.cache.invalidate_all();
                self.refresh_from_store()
            }
        };
        if ok {
            self.clear_error();
        }
        ok
    }

    /// The most recent error, retained until cleared or superseded.
    pub fn last_error(&self) -> Option<EngineError> {
        self.last_error.read().clone()
    }

    /// Drops the current error state.
    pub fn clear_error(&self) {
        *self.last_error.write() = None;
        let mut state = self.state.write();
        if *state == EngineState::Degraded {
            *state = EngineState::Ready;
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> EngineState {
        *self.state.read()
    }

    /// Subscribes to individual core update events.
    pub fn subscribe(&self) -> Receiver<CoreUpdateEvent> {
        self.feed.subscribe()
    }

    /// Subscribes to coalesced "something changed" ticks.
    pub fn subscribe_changes(&self) -> Receiver<()> {
        self.throttle.subscribe()
    }

    // --- write path -----------------------------------------------------

    /// Validation, offline routing, and announcement around one write.
    fn submit_write(
        &self,
        candidate: CoreCandidate,
        related: Option<&str>,
        analysis_data: Option<BTreeMap<String, String>>,
    ) -> EngineResult<Core> {
        let id = candidate.core.id.clone();
        if !Core::level_in_range(candidate.core.current_level) {
            let err = EngineError::level_out_of_range(&id, candidate.core.current_level);
            self.record_error(&err);
            return Err(err);
        }

        let candidate = Self::normalize(candidate);
        let update_source = candidate.source.clone();

        if self.is_offline() {
            let accepted = self.write_offline(candidate, related, analysis_data);
            return Ok(accepted);
        }

        match self.write_online(candidate, related) {
            Ok((accepted, events)) => {
                for event in events {
                    self.feed.publish(event);
                }
                if let Some(data) = analysis_data {
                    let mut event = CoreUpdateEvent::analysis_completed(
                        id.clone(),
                        data,
                        accepted.last_updated,
                        update_source,
                    );
                    event.related_entry_id = related.map(String::from);
                    self.feed.publish(event);
                }
                if let Some(entry) = related {
                    self.cache.record_related_entry(&id, entry);
                }
                self.throttle.notify();
                self.note_success();
                Ok(accepted)
            }
            Err(err) => {
                self.record_error(&err);
                Err(err)
            }
        }
    }

    /// The serialized read-resolve-write-cache sequence.
    ///
    /// Returns the post-write core and the events describing the accepted
    /// changes; a candidate that loses to the current version is a no-op
    /// with no events.
    fn write_online(
        &self,
        candidate: CoreCandidate,
        related: Option<&str>,
    ) -> EngineResult<(Core, Vec<CoreUpdateEvent>)> {
        let _gate = self.write_gate.lock();
        let current = self.current_version(&candidate.core.id);
        self.resolve_and_commit(candidate, current, related)
    }

    /// Replay variant of the write path.
    ///
    /// Resolves against the store's committed state rather than the
    /// cache, which already holds the optimistic result of the queued
    /// write; resolving against the cache would make the replay a no-op
    /// and swallow its events.
    fn replay_write(
        &self,
        candidate: CoreCandidate,
        related: Option<&str>,
    ) -> EngineResult<(Core, Vec<CoreUpdateEvent>)> {
        let _gate = self.write_gate.lock();
        let current = self
            .store
            .get(&candidate.core.id)
            .map_err(EngineError::from_store_read)?;
        self.resolve_and_commit(candidate, current, related)
    }

    fn resolve_and_commit(
        &self,
        candidate: CoreCandidate,
        current: Option<Core>,
        related: Option<&str>,
    ) -> EngineResult<(Core, Vec<CoreUpdateEvent>)> {
        let id = candidate.core.id.clone();
        let mut candidates = Vec::with_capacity(2);
        if let Some(cur) = &current {
            candidates.push(CoreCandidate::new(cur.clone(), self.last_source_for(&id)));
        }
        candidates.push(candidate);

        let Some(winner) = resolver::resolve(&candidates) else {
            // Unreachable: candidates is never empty.
            return Err(EngineError::AnalysisError {
                message: "conflict resolution over empty candidate set".into(),
            });
        };

        if let Some(cur) = &current {
            if winner == candidates[0] {
                debug!(core = %id, "incoming write lost conflict resolution, keeping current");
                return Ok((cur.clone(), Vec::new()));
            }
        }

        let (accepted, events) = self.accept(winner.core, current.as_ref(), &winner.source, related);

        self.store
            .put(accepted.clone())
            .map_err(|e| EngineError::from_store_write(e, &id))?;
        self.cache.put(accepted.clone());
        self.last_sources.write().insert(id.clone(), winner.source);

        debug!(
            core = %id,
            level = accepted.current_level,
            events = events.len(),
            "accepted write"
        );
        Ok((accepted, events))
    }

    /// Queues a write and optimistically applies it to the cache only.
    fn write_offline(
        &self,
        candidate: CoreCandidate,
        related: Option<&str>,
        analysis_data: Option<BTreeMap<String, String>>,
    ) -> Core {
        let _gate = self.write_gate.lock();
        let id = candidate.core.id.clone();

        let current = self.cache.get_stale(&id);
        let mut candidates = Vec::with_capacity(2);
        if let Some(cur) = &current {
            candidates.push(CoreCandidate::new(cur.clone(), self.last_source_for(&id)));
        }
        candidates.push(candidate.clone());

        let winner = match resolver::resolve(&candidates) {
            Some(winner) => winner,
            None => candidate.clone(),
        };

        if let Some(cur) = &current {
            if winner == candidates[0] {
                // Lost to the cached version already; nothing to queue.
                return cur.clone();
            }
        }

        // Events are produced on replay, once the write is committed to
        // the store; the throttled change signal still fires now.
        let (accepted, _events) =
            self.accept(winner.core.clone(), current.as_ref(), &winner.source, related);
        self.cache.put(accepted.clone());
        self.last_sources.write().insert(id.clone(), winner.source);

        self.queue.enqueue(PendingWrite {
            candidate,
            related_entry_id: related.map(String::from),
            analysis_data,
        });
        if let Some(entry) = related {
            self.cache.record_related_entry(&id, entry);
        }
        self.throttle.notify();

        debug!(core = %id, queued = self.queue.len(), "queued offline write");
        accepted
    }

    /// Applies the acceptance transformation: `previous_level` and trend
    /// maintenance, monotonic `last_updated`, milestone crossings, and
    /// insight capture. Produces the events describing the change.
    fn accept(
        &self,
        incoming: Core,
        current: Option<&Core>,
        update_source: &str,
        related: Option<&str>,
    ) -> (Core, Vec<CoreUpdateEvent>) {
        let mut accepted = incoming;
        let id = accepted.id.clone();

        let pre_level = current
            .map(|c| c.current_level)
            .unwrap_or(accepted.previous_level);
        let pre_trend = current.map(|c| c.trend).unwrap_or(accepted.trend);
        let pre_insight = current.map(|c| c.insight.clone()).unwrap_or_default();

        if let Some(current) = current {
            // Milestone achievements and insight history never revert.
            accepted.milestones = current.milestones.clone();
            accepted.recent_insights = current.recent_insights.clone();
            if accepted.last_updated < current.last_updated {
                accepted.last_updated = current.last_updated;
            }
        }

        accepted.previous_level = pre_level;
        accepted.trend = Trend::from_levels(
            accepted.current_level,
            pre_level,
            self.config.trend_threshold,
        );

        let at = accepted.last_updated;
        let mut events = Vec::new();

        if accepted.current_level != pre_level {
            events.push(CoreUpdateEvent::level_changed(
                id.clone(),
                pre_level,
                accepted.current_level,
                at,
                update_source,
            ));
        }
        if accepted.trend != pre_trend {
            events.push(CoreUpdateEvent::trend_changed(
                id.clone(),
                pre_trend,
                accepted.trend,
                at,
                update_source,
            ));
        }
        for milestone in &mut accepted.milestones {
            if !milestone.achieved && accepted.current_level >= milestone.threshold {
                milestone.achieved = true;
                milestone.achieved_at = Some(at);
                events.push(CoreUpdateEvent::milestone_achieved(
                    id.clone(),
                    milestone.threshold,
                    milestone.label.clone(),
                    at,
                    update_source,
                ));
            }
        }
        if !accepted.insight.is_empty() && accepted.insight != pre_insight {
            let insight = accepted.insight.clone();
            accepted.push_insight(insight.clone(), self.config.recent_insights_limit);
            events.push(CoreUpdateEvent::insight_generated(
                id, insight, at, update_source,
            ));
        }

        if let Some(entry) = related {
            for event in &mut events {
                event.related_entry_id = Some(entry.to_string());
            }
        }

        (accepted, events)
    }

    /// Current committed version for the write path: cache first, store
    /// fallback, last-known-good on store failure.
    fn current_version(&self, id: &CoreId) -> Option<Core> {
        if let Some(core) = self.cache.get(id) {
            return Some(core);
        }
        match self.store.get(id) {
            Ok(found) => found,
            // The subsequent put will surface the store failure.
            Err(_) => self.cache.get_stale(id),
        }
    }

    /// Reloads the cache from the store, requiring a genuine store
    /// success (unlike reads, which fall back to stale data).
    fn refresh_from_store(&self) -> bool {
        match self.store.list() {
            Ok(cores) => {
                self.cache.put_all(cores);
                self.note_success();
                true
            }
            Err(e) => {
                self.record_error(&EngineError::from_store_read(e));
                false
            }
        }
    }

    fn last_source_for(&self, id: &CoreId) -> String {
        self.last_sources.read().get(id).cloned().unwrap_or_default()
    }

    /// Stamps unset candidate timestamps with the current time.
    fn normalize(mut candidate: CoreCandidate) -> CoreCandidate {
        if candidate.core.last_updated == Timestamp::default() {
            candidate.core.last_updated = Timestamp::now();
        }
        candidate
    }

    fn record_error(&self, err: &EngineError) {
        *self.last_error.write() = Some(err.clone());
        *self.state.write() = EngineState::Degraded;
    }

    /// A fresh successful operation supersedes the retained error.
    fn note_success(&self) {
        let mut state = self.state.write();
        if *state == EngineState::Degraded {
            *state = EngineState::Ready;
        }
        drop(state);
        *self.last_error.write() = None;
    }
}

impl<S: CoreStore> std::fmt::Debug for CoreSyncEngine<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoreSyncEngine")
            .field("state", &self.state())
            .field("offline", &self.is_offline())
            .field("pending_writes", &self.pending_writes())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use emocore_model::CoreUpdateKind;
    use emocore_store::{MemoryCoreStore, MockCoreStore};
    use std::time::Duration;

    fn ready_engine() -> CoreSyncEngine<MemoryCoreStore> {
        let engine = CoreSyncEngine::new(EngineConfig::new(), MemoryCoreStore::new());
        engine.initialize().unwrap();
        engine
    }

    #[test]
    fn initialize_seeds_empty_store() {
        let engine = ready_engine();
        assert_eq!(engine.state(), EngineState::Ready);

        let cores = engine.load_all_cores(false).unwrap();
        assert_eq!(cores.len(), 6);
        assert!(cores.iter().all(|c| c.current_level == 0.0));
    }

    #[test]
    fn initialize_keeps_existing_data() {
        let store = MemoryCoreStore::new();
        store
            .put(Core::new("optimism", "Optimism").with_level(0.7))
            .unwrap();

        let engine = CoreSyncEngine::new(EngineConfig::new(), store);
        engine.initialize().unwrap();

        let cores = engine.load_all_cores(false).unwrap();
        assert_eq!(cores.len(), 1);
        assert_eq!(cores[0].current_level, 0.7);
    }

    #[test]
    fn initialize_failure_degrades() {
        let store = MockCoreStore::new();
        store.set_fail_reads(true);

        let engine = CoreSyncEngine::new(EngineConfig::new(), store);
        let result = engine.initialize();

        assert!(result.is_err());
        assert_eq!(engine.state(), EngineState::Degraded);
        assert!(engine.last_error().unwrap().is_recoverable());
    }

    #[test]
    fn update_core_maintains_previous_level_and_trend() {
        let engine = ready_engine();
        let core = engine.get_core_by_id(&"optimism".into()).unwrap();

        let accepted = engine
            .update_core(core.with_level(0.35), source::AI_ANALYSIS)
            .unwrap();

        assert_eq!(accepted.current_level, 0.35);
        assert_eq!(accepted.previous_level, 0.0);
        assert_eq!(accepted.trend, Trend::Rising);
    }

    #[test]
    fn out_of_range_level_rejected_before_store() {
        let engine = ready_engine();
        let core = engine.get_core_by_id(&"optimism".into()).unwrap();

        let result = engine.update_core(core.with_level(1.5), source::MANUAL);

        assert!(matches!(
            result,
            Err(EngineError::PersistenceError { .. })
        ));
        // Invalid state never becomes visible
        let visible = engine.get_core_by_id(&"optimism".into()).unwrap();
        assert_eq!(visible.current_level, 0.0);
        assert!(engine.last_error().is_some());
    }

    #[test]
    fn stale_candidate_loses_to_current() {
        let engine = ready_engine();
        let base = engine.get_core_by_id(&"optimism".into()).unwrap();

        engine
            .update_core(
                base.clone()
                    .with_level(0.6)
                    .with_last_updated(Timestamp::from_millis(100)),
                source::MANUAL,
            )
            .unwrap();

        // An older write arrives late and must not clobber the newer one
        let result = engine
            .update_core(
                base.with_level(0.1)
                    .with_last_updated(Timestamp::from_millis(90)),
                source::MANUAL,
            )
            .unwrap();

        assert_eq!(result.current_level, 0.6);
        assert_eq!(
            engine
                .get_core_by_id(&"optimism".into())
                .unwrap()
                .current_level,
            0.6
        );
    }

    #[test]
    fn milestone_crossing_emits_event() {
        let engine = ready_engine();
        let rx = engine.subscribe();
        let core = engine.get_core_by_id(&"resilience".into()).unwrap();

        engine
            .update_core(core.with_level(0.6), source::AI_ANALYSIS)
            .unwrap();

        let kinds: Vec<CoreUpdateKind> = rx.try_iter().map(|e| e.kind).collect();
        assert!(kinds.contains(&CoreUpdateKind::LevelChanged));
        assert!(kinds.contains(&CoreUpdateKind::TrendChanged));
        // 0.25 and 0.5 both crossed
        assert_eq!(
            kinds
                .iter()
                .filter(|k| **k == CoreUpdateKind::MilestoneAchieved)
                .count(),
            2
        );

        let updated = engine.get_core_by_id(&"resilience".into()).unwrap();
        assert!(updated.milestones[0].achieved);
        assert!(updated.milestones[1].achieved);
        assert!(!updated.milestones[2].achieved);
    }

    #[test]
    fn insight_capture_updates_history() {
        let engine = ready_engine();
        let core = engine.get_core_by_id(&"creativity".into()).unwrap();

        engine
            .update_core(
                core.with_level(0.2).with_insight("tried a new medium"),
                source::AI_ANALYSIS,
            )
            .unwrap();

        let updated = engine.get_core_by_id(&"creativity".into()).unwrap();
        assert_eq!(updated.recent_insights, vec!["tried a new medium"]);
    }

    #[test]
    fn cache_consistent_after_write() {
        let engine = ready_engine();
        let core = engine.get_core_by_id(&"optimism".into()).unwrap();

        engine
            .update_core(core.with_level(0.42), source::MANUAL)
            .unwrap();

        let read = engine.get_core_by_id(&"optimism".into()).unwrap();
        assert_eq!(read.current_level, 0.42);
    }

    #[test]
    fn load_top_cores_sorted_with_stable_ties() {
        let engine = ready_engine();
        for (id, level) in [("optimism", 0.8), ("resilience", 0.3), ("creativity", 0.8)] {
            let core = engine.get_core_by_id(&id.into()).unwrap();
            engine
                .update_core(core.with_level(level), source::MANUAL)
                .unwrap();
        }

        let top = engine.load_top_cores(3).unwrap();
        // Equal levels tie-break by id ascending
        assert_eq!(top[0].id.as_str(), "creativity");
        assert_eq!(top[1].id.as_str(), "optimism");
        assert_eq!(top[2].id.as_str(), "resilience");

        assert!(engine.load_top_cores(0).unwrap().is_empty());
    }

    #[test]
    fn get_core_by_name_is_case_insensitive() {
        let engine = ready_engine();

        let core = engine.get_core_by_name("GROWTH MINDSET").unwrap();
        assert_eq!(core.id.as_str(), "growth_mindset");
        assert!(engine.get_core_by_name("no such core").is_none());
    }

    #[test]
    fn navigation_tracks_context_and_history() {
        let engine = ready_engine();

        let context = CoreNavigationContext::new("optimism")
            .with_source_screen("journal")
            .with_triggered_by("entry_tap");
        engine
            .navigate_to_core(&"optimism".into(), Some(context))
            .unwrap();
        engine.navigate_to_core(&"resilience".into(), None).unwrap();

        let nav = engine.navigation().unwrap();
        assert_eq!(nav.target_core_id.as_str(), "resilience");

        let history = engine.navigation_history();
        let history: Vec<&str> = history.iter().map(|id| id.as_str()).collect();
        assert_eq!(history, vec!["optimism", "resilience"]);
    }

    #[test]
    fn navigation_history_is_bounded() {
        let config = EngineConfig::new().with_nav_history_limit(3);
        let engine = CoreSyncEngine::new(config, MemoryCoreStore::new());
        engine.initialize().unwrap();

        for _ in 0..5 {
            engine.navigate_to_core(&"optimism".into(), None).unwrap();
        }
        assert_eq!(engine.navigation_history().len(), 3);
    }

    #[test]
    fn navigate_to_unknown_core_fails() {
        let engine = ready_engine();

        let result = engine.navigate_to_core(&"mystery".into(), None);
        assert!(matches!(result, Err(EngineError::NavigationError { .. })));
        assert_eq!(engine.state(), EngineState::Degraded);
    }

    #[test]
    fn update_with_context_records_related_entry() {
        let engine = ready_engine();
        let rx = engine.subscribe();

        engine
            .update_core_with_context(
                &"optimism".into(),
                0.4,
                Some("entry-7"),
                BTreeMap::new(),
            )
            .unwrap();

        let events: Vec<CoreUpdateEvent> = rx.try_iter().collect();
        assert!(events
            .iter()
            .all(|e| e.related_entry_id.as_deref() == Some("entry-7")));
        assert!(events
            .iter()
            .any(|e| e.kind == CoreUpdateKind::AnalysisCompleted));

        let detail = engine.core_details(&"optimism".into()).unwrap();
        assert_eq!(detail.related_entry_ids, vec!["entry-7"]);
    }

    #[test]
    fn update_with_context_unknown_core() {
        let engine = ready_engine();

        let result = engine.update_core_with_context(
            &"mystery".into(),
            0.4,
            None,
            BTreeMap::new(),
        );
        assert!(matches!(result, Err(EngineError::NavigationError { .. })));
    }

    #[test]
    fn batch_update_reports_per_core_failures() {
        let engine = ready_engine();
        let optimism = engine.get_core_by_id(&"optimism".into()).unwrap();
        let resilience = engine.get_core_by_id(&"resilience".into()).unwrap();

        let report = engine.batch_update_cores(
            vec![optimism.with_level(0.5), resilience.with_level(2.0)],
            source::AI_ANALYSIS,
        );

        assert_eq!(report.applied.len(), 1);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0.as_str(), "resilience");
        assert!(!report.is_complete());

        // The valid write landed regardless
        assert_eq!(
            engine
                .get_core_by_id(&"optimism".into())
                .unwrap()
                .current_level,
            0.5
        );
    }

    #[test]
    fn batch_events_share_batch_id() {
        let engine = ready_engine();
        let rx = engine.subscribe();
        let optimism = engine.get_core_by_id(&"optimism".into()).unwrap();
        let resilience = engine.get_core_by_id(&"resilience".into()).unwrap();

        engine.batch_update_cores(
            vec![optimism.with_level(0.4), resilience.with_level(0.6)],
            source::AI_ANALYSIS,
        );

        let events: Vec<CoreUpdateEvent> = rx.try_iter().collect();
        assert!(events.len() >= 2);
        let batch_id = events[0].batch_id.unwrap();
        assert!(events.iter().all(|e| e.batch_id == Some(batch_id)));
    }

    #[test]
    fn resolve_conflicts_writes_winner() {
        let engine = ready_engine();
        let base = engine.get_core_by_id(&"optimism".into()).unwrap();

        let winner = engine
            .resolve_core_conflicts(vec![
                CoreCandidate::new(
                    base.clone()
                        .with_level(0.2)
                        .with_last_updated(Timestamp::from_millis(100)),
                    source::AI_ANALYSIS,
                ),
                CoreCandidate::new(
                    base.with_level(0.9)
                        .with_last_updated(Timestamp::from_millis(200)),
                    source::BACKGROUND_SYNC,
                ),
            ])
            .unwrap()
            .unwrap();

        assert_eq!(winner.current_level, 0.9);
        assert!(engine
            .resolve_core_conflicts(Vec::new())
            .unwrap()
            .is_none());
    }

    #[test]
    fn offline_write_queues_and_serves_optimistically() {
        let engine = ready_engine();
        engine.set_offline_mode(true);

        let core = engine.get_core_by_id(&"resilience".into()).unwrap();
        let accepted = engine
            .update_core(core.with_level(0.2), source::MANUAL)
            .unwrap();

        assert_eq!(accepted.current_level, 0.2);
        assert_eq!(engine.pending_writes(), 1);
        assert_eq!(
            engine
                .get_core_by_id(&"resilience".into())
                .unwrap()
                .current_level,
            0.2
        );
    }

    #[test]
    fn offline_analysis_metadata_survives_replay() {
        let engine = ready_engine();
        let rx = engine.subscribe();
        engine.set_offline_mode(true);

        let mut additional = BTreeMap::new();
        additional.insert("confidence".to_string(), "0.9".to_string());
        engine
            .update_core_with_context(&"optimism".into(), 0.4, Some("entry-3"), additional)
            .unwrap();

        // Queued writes announce nothing until they commit
        assert!(rx.try_recv().is_err());

        engine.set_offline_mode(false);

        let events: Vec<CoreUpdateEvent> = rx.try_iter().collect();
        let analysis = events
            .iter()
            .find(|e| e.kind == CoreUpdateKind::AnalysisCompleted)
            .expect("analysis event replayed");
        assert_eq!(
            analysis.data.get("confidence").map(String::as_str),
            Some("0.9")
        );
        assert_eq!(analysis.related_entry_id.as_deref(), Some("entry-3"));
        assert_eq!(analysis.update_source, "ai_analysis");
    }

    #[test]
    fn going_online_drains_queue() {
        let engine = ready_engine();
        engine.set_offline_mode(true);
        let core = engine.get_core_by_id(&"resilience".into()).unwrap();
        engine
            .update_core(core.with_level(0.2), source::MANUAL)
            .unwrap();

        engine.set_offline_mode(false);

        assert_eq!(engine.pending_writes(), 0);
        // Store now reflects the write
        assert_eq!(
            engine.store.get(&"resilience".into()).unwrap().unwrap().current_level,
            0.2
        );
    }

    #[test]
    fn drain_retries_then_dead_letters() {
        let store = MockCoreStore::new();
        let config = EngineConfig::new().with_retry(
            crate::config::RetryConfig::new(2)
                .with_initial_delay(Duration::ZERO)
                .without_jitter(),
        );
        let engine = CoreSyncEngine::new(config, store);
        engine.initialize().unwrap();

        engine.set_offline_mode(true);
        let core = engine.get_core_by_id(&"optimism".into()).unwrap();
        engine
            .update_core(core.with_level(0.3), source::MANUAL)
            .unwrap();

        engine.store.set_fail_writes(true);

        let first = engine.drain_offline_queue();
        assert_eq!(first.requeued, 1);
        assert_eq!(first.remaining, 1);

        let second = engine.drain_offline_queue();
        assert_eq!(second.dead_lettered, 1);
        assert_eq!(second.remaining, 0);
        assert_eq!(engine.dead_letters().len(), 1);

        let err = engine.last_error().unwrap();
        assert!(matches!(err, EngineError::SyncFailure { .. }));
        assert!(!err.is_recoverable());
    }

    #[test]
    fn degraded_reads_serve_stale_cache() {
        let store = MockCoreStore::new();
        let config = EngineConfig::new().with_cache_validity(Duration::from_millis(10));
        let engine = CoreSyncEngine::new(config, store);
        engine.initialize().unwrap();

        engine.store.set_fail_reads(true);
        std::thread::sleep(Duration::from_millis(25));

        // Cache is stale and the store is down; last-known-good served
        let cores = engine.load_all_cores(false).unwrap();
        assert_eq!(cores.len(), 6);
        assert_eq!(engine.state(), EngineState::Degraded);
        assert!(engine.last_error().unwrap().is_recoverable());
    }

    #[test]
    fn recovery_action_clears_error() {
        let store = MockCoreStore::new();
        let engine = CoreSyncEngine::new(EngineConfig::new(), store);
        engine.initialize().unwrap();

        engine.store.set_fail_reads(true);
        let _ = engine.load_all_cores(true);
        assert_eq!(engine.state(), EngineState::Degraded);

        // Still failing: recovery fails, error retained
        assert!(!engine.execute_recovery_action(RecoveryAction::RefreshData));
        assert!(engine.last_error().is_some());

        engine.store.set_fail_reads(false);
        assert!(engine.execute_recovery_action(RecoveryAction::RefreshData));
        assert!(engine.last_error().is_none());
        assert_eq!(engine.state(), EngineState::Ready);
    }

    #[test]
    fn clear_error_restores_ready() {
        let engine = ready_engine();
        let _ = engine.navigate_to_core(&"mystery".into(), None);
        assert_eq!(engine.state(), EngineState::Degraded);

        engine.clear_error();
        assert!(engine.last_error().is_none());
        assert_eq!(engine.state(), EngineState::Ready);
    }

    #[test]
    fn preload_details_is_best_effort() {
        let engine = ready_engine();
        engine
            .update_core_with_context(
                &"optimism".into(),
                0.4,
                Some("entry-1"),
                BTreeMap::new(),
            )
            .unwrap();

        let warmed = engine.preload_core_details(&[
            "optimism".into(),
            "resilience".into(),
            "mystery".into(),
        ]);

        assert_eq!(warmed, 2);
        let detail = engine.core_details(&"optimism".into()).unwrap();
        assert!(detail.related_entry_ids.contains(&"entry-1".to_string()));
        assert!(!detail.recent_events.is_empty());
    }
}
