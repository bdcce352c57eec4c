//! Scriptable core store for tests.

use crate::{CoreStore, MemoryCoreStore, StoreError, StoreResult};
use emocore_model::{Core, CoreId};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// A core store with fault injection and call counters.
///
/// Wraps a [`MemoryCoreStore`]; reads and writes can be made to fail
/// independently, simulating an unreachable backend while the in-memory
/// contents stay intact for later recovery.
#[derive(Debug, Default)]
pub struct MockCoreStore {
    inner: MemoryCoreStore,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    get_calls: AtomicU64,
    list_calls: AtomicU64,
    put_calls: AtomicU64,
}

impl MockCoreStore {
    /// Creates an empty mock store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a mock store pre-populated with `cores`.
    pub fn with_cores(cores: Vec<Core>) -> Self {
        let store = Self::new();
        for core in cores {
            store.inner.put(core).unwrap();
        }
        store
    }

    /// Makes subsequent `get`/`list` calls fail with `Unavailable`.
    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Makes subsequent `put` calls fail with `Unavailable`.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of `get` calls observed.
    pub fn get_calls(&self) -> u64 {
        self.get_calls.load(Ordering::SeqCst)
    }

    /// Number of `list` calls observed.
    pub fn list_calls(&self) -> u64 {
        self.list_calls.load(Ordering::SeqCst)
    }

    /// Number of `put` calls observed.
    pub fn put_calls(&self) -> u64 {
        self.put_calls.load(Ordering::SeqCst)
    }

    /// Returns the number of stored cores.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Returns true if the store holds no cores.
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl CoreStore for MockCoreStore {
    fn get(&self, id: &CoreId) -> StoreResult<Option<Core>> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StoreError::unavailable("mock read failure"));
        }
        self.inner.get(id)
    }

    fn list(&self) -> StoreResult<Vec<Core>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StoreError::unavailable("mock read failure"));
        }
        self.inner.list()
    }

    fn put(&self, core: Core) -> StoreResult<()> {
        self.put_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::unavailable("mock write failure"));
        }
        self.inner.put(core)
    }
}
