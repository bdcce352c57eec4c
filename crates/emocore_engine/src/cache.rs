//! Time-bounded in-memory cache of cores and detail contexts.

use emocore_model::{Core, CoreId, CoreUpdateEvent};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

/// Cached auxiliary data for one core beyond its base fields.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DetailContext {
    /// Journal entries that have touched this core.
    pub related_entry_ids: Vec<String>,
    /// Recent update events for this core, most recent first.
    pub recent_events: Vec<CoreUpdateEvent>,
}

struct CacheEntry {
    core: Core,
    filled_at: Instant,
}

struct DetailEntry {
    context: DetailContext,
    filled_at: Instant,
}

/// In-memory cache of core entities.
///
/// The core set is small and fixed, so there is no eviction by size: the
/// cache holds the full set permanently once warmed. Entries carry a fill
/// time; reads return only entries younger than the validity window, and
/// the orchestrator repopulates from the store on a stale or absent hit.
/// All reads are non-blocking.
pub struct CoreCache {
    entries: RwLock<BTreeMap<CoreId, CacheEntry>>,
    details: RwLock<BTreeMap<CoreId, DetailEntry>>,
    warmed: RwLock<bool>,
    validity: Duration,
}

impl CoreCache {
    /// Creates an empty cache with the given validity window.
    pub fn new(validity: Duration) -> Self {
        Self {
            entries: RwLock::new(BTreeMap::new()),
            details: RwLock::new(BTreeMap::new()),
            warmed: RwLock::new(false),
            validity,
        }
    }

    /// Gets a core if cached and fresh.
    pub fn get(&self, id: &CoreId) -> Option<Core> {
        let entries = self.entries.read();
        let entry = entries.get(id)?;
        if entry.filled_at.elapsed() <= self.validity {
            Some(entry.core.clone())
        } else {
            None
        }
    }

    /// Gets a core regardless of freshness.
    ///
    /// Used to serve last-known-good data when the store is unreachable.
    pub fn get_stale(&self, id: &CoreId) -> Option<Core> {
        self.entries.read().get(id).map(|e| e.core.clone())
    }

    /// Gets the full core set if it has been warmed and no entry is stale.
    pub fn get_all(&self) -> Option<Vec<Core>> {
        if !*self.warmed.read() {
            return None;
        }
        let entries = self.entries.read();
        if entries
            .values()
            .any(|e| e.filled_at.elapsed() > self.validity)
        {
            return None;
        }
        Some(entries.values().map(|e| e.core.clone()).collect())
    }

    /// Gets whatever cores are cached, regardless of freshness.
    pub fn get_all_stale(&self) -> Vec<Core> {
        self.entries
            .read()
            .values()
            .map(|e| e.core.clone())
            .collect()
    }

    /// Inserts or refreshes one core.
    ///
    /// Called immediately after every accepted write so readers never
    /// observe a miss for data just written by the same process.
    pub fn put(&self, core: Core) {
        self.entries.write().insert(
            core.id.clone(),
            CacheEntry {
                core,
                filled_at: Instant::now(),
            },
        );
    }

    /// Replaces the cached set with `cores` and marks the cache warmed.
    pub fn put_all(&self, cores: Vec<Core>) {
        let now = Instant::now();
        let mut entries = self.entries.write();
        entries.clear();
        for core in cores {
            entries.insert(
                core.id.clone(),
                CacheEntry {
                    core,
                    filled_at: now,
                },
            );
        }
        drop(entries);
        *self.warmed.write() = true;
    }

    /// Gets a core's detail context if cached and fresh.
    pub fn detail(&self, id: &CoreId) -> Option<DetailContext> {
        let details = self.details.read();
        let entry = details.get(id)?;
        if entry.filled_at.elapsed() <= self.validity {
            Some(entry.context.clone())
        } else {
            None
        }
    }

    /// Inserts or refreshes a core's detail context.
    pub fn put_detail(&self, id: CoreId, context: DetailContext) {
        self.details.write().insert(
            id,
            DetailEntry {
                context,
                filled_at: Instant::now(),
            },
        );
    }

    /// Appends a related entry id to a core's detail context, creating
    /// the context if absent.
    pub fn record_related_entry(&self, id: &CoreId, entry_id: &str) {
        let mut details = self.details.write();
        let entry = details.entry(id.clone()).or_insert_with(|| DetailEntry {
            context: DetailContext::default(),
            filled_at: Instant::now(),
        });
        if !entry
            .context
            .related_entry_ids
            .iter()
            .any(|e| e == entry_id)
        {
            entry.context.related_entry_ids.push(entry_id.to_string());
        }
        entry.filled_at = Instant::now();
    }

    /// Drops one core's entry and detail context.
    pub fn invalidate(&self, id: &CoreId) {
        self.entries.write().remove(id);
        self.details.write().remove(id);
        *self.warmed.write() = false;
    }

    /// Drops everything.
    pub fn invalidate_all(&self) {
        self.entries.write().clear();
        self.details.write().clear();
        *self.warmed.write() = false;
    }

    /// Number of cached cores.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Returns true if no cores are cached.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Returns true if the full set has been loaded at least once.
    pub fn is_warmed(&self) -> bool {
        *self.warmed.read()
    }
}

impl std::fmt::Debug for CoreCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoreCache")
            .field("len", &self.len())
            .field("warmed", &self.is_warmed())
            .field("validity", &self.validity)
            .finish_non_exhaustive()
    }
}
