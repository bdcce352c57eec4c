//! Emotional core synchronization engine.
//!
//! This crate keeps a small fixed set of core metric entities consistent
//! across concurrent callers: a time-bounded cache over a pluggable
//! store, deterministic last-writer-wins conflict resolution, an
//! in-process event feed with batching and change throttling, and an
//! offline queue that replays queued writes with exponential backoff.
//!
//! [`CoreSyncEngine`] is the entry point; everything else supports it.
//!
//! ```no_run
//! use emocore_engine::{CoreSyncEngine, EngineConfig};
//! use emocore_model::source;
//! use emocore_store::MemoryCoreStore;
//!
//! # fn main() -> Result<(), emocore_engine::EngineError> {
//! let engine = CoreSyncEngine::new(EngineConfig::new(), MemoryCoreStore::new());
//! engine.initialize()?;
//!
//! let optimism = engine.get_core_by_id(&"optimism".into()).unwrap();
//! let updated = engine.update_core(optimism.with_level(0.35), source::AI_ANALYSIS)?;
//! assert_eq!(updated.previous_level, 0.0);
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod broadcast;
mod cache;
mod config;
mod engine;
mod error;
mod queue;
mod resolver;

pub use broadcast::{ChangeThrottle, CoreEventFeed};
pub use cache::{CoreCache, DetailContext};
pub use config::{EngineConfig, RetryConfig};
pub use engine::{
    BatchUpdateReport, CoreSyncEngine, DrainReport, EngineState, RecoveryAction,
};
pub use error::{EngineError, EngineResult, ErrorKind};
pub use queue::{OfflineQueue, PendingWrite, QueueEntry};
pub use resolver::{provenance_rank, resolve, CoreCandidate};
