//! # Emocore Store
//!
//! The Core Store collaborator boundary for the emotional core sync
//! engine.
//!
//! The engine delegates durability to a [`CoreStore`] implementation and
//! assumes basic read-after-write consistency within a single process.
//! This crate provides:
//! - [`CoreStore`] — the trait the engine consumes
//! - [`MemoryCoreStore`] — a process-local store
//! - [`MockCoreStore`] — a scriptable store for tests (fault injection,
//!   call counters)

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod memory;
mod mock;

pub use error::{StoreError, StoreResult};
pub use memory::MemoryCoreStore;
pub use mock::MockCoreStore;

use emocore_model::{Core, CoreId};

/// Durable key-value persistence for core entities.
///
/// Implementations own row-level persistence and schema concerns; the
/// engine only requires get/list/put with read-after-write consistency
/// for a single process.
pub trait CoreStore: Send + Sync {
    /// Gets a core by id. Absence is not an error.
    fn get(&self, id: &CoreId) -> StoreResult<Option<Core>>;

    /// Lists all cores, ordered by id.
    fn list(&self) -> StoreResult<Vec<Core>>;

    /// Inserts or replaces a core.
    fn put(&self, core: Core) -> StoreResult<()>;
}
