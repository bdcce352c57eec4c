//! Process-local core store.

use crate::{CoreStore, StoreResult};
use emocore_model::{Core, CoreId};
use parking_lot::RwLock;
use std::collections::BTreeMap;

/// An in-memory core store.
///
/// Holds the full core set in a `BTreeMap`, so `list` is naturally
/// ordered by id. Suitable for production use in hosts that delegate
/// durability elsewhere, and as the baseline store in tests.
#[derive(Default)]
pub struct MemoryCoreStore {
    cores: RwLock<BTreeMap<CoreId, Core>>,
}

impl MemoryCoreStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored cores.
    pub fn len(&self) -> usize {
        self.cores.read().len()
    }

    /// Returns true if the store holds no cores.
    pub fn is_empty(&self) -> bool {
        self.cores.read().is_empty()
    }

    /// Removes all cores.
    pub fn clear(&self) {
        self.cores.write().clear();
    }
}

impl CoreStore for MemoryCoreStore {
    fn get(&self, id: &CoreId) -> StoreResult<Option<Core>> {
        Ok(self.cores.read().get(id).cloned())
    }

    fn list(&self) -> StoreResult<Vec<Core>> {
        Ok(self.cores.read().values().cloned().collect())
    }

    fn put(&self, core: Core) -> StoreResult<()> {
        self.cores.write().insert(core.id.clone(), core);
        Ok(())
    }
}

impl std::fmt::Debug for MemoryCoreStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryCoreStore")
            .field("len", &self.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_then_get() {
        let store = MemoryCoreStore::new();
        let core = Core::new("optimism", "Optimism");

        store.put(core.clone()).unwrap();

        let loaded = store.get(&"optimism".into()).unwrap();
        assert_eq!(loaded, Some(core));
    }

    #[test]
    fn get_missing_is_none() {
        let store = MemoryCoreStore::new();
        assert_eq!(store.get(&"resilience".into()).unwrap(), None);
    }

    #[test]
    fn put_replaces_existing() {
        let store = MemoryCoreStore::new();
        store.put(Core::new("optimism", "Optimism")).unwrap();
        store
            .put(Core::new("optimism", "Optimism").with_level(0.5))
            .unwrap();

        assert_eq!(store.len(), 1);
        let loaded = store.get(&"optimism".into()).unwrap().unwrap();
        assert_eq!(loaded.current_level, 0.5);
    }

    #[test]
    fn list_is_ordered_by_id() {
        let store = MemoryCoreStore::new();
        for core in Core::seed_set() {
            store.put(core).unwrap();
        }

        let cores = store.list().unwrap();
        let ids: Vec<&str> = cores.iter().map(|c| c.id.as_str()).collect();
        let mut sorted = ids.clone();
        sorted.sort_unstable();
        assert_eq!(ids, sorted);
    }
}
