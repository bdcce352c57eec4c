//! # Emocore Model
//!
//! Data model for the emotional core synchronization engine.
//!
//! This crate defines the entities shared by the engine, the store
//! collaborator, and UI callers:
//! - [`Core`] — a named metric with bounded progress in `[0.0, 1.0]`
//! - [`CoreUpdateEvent`] — immutable change notifications
//! - [`CoreNavigationContext`] — per-request navigation metadata
//! - [`Timestamp`] and [`CoreId`] — shared primitive types
//!
//! The model carries no engine logic. Cores are mutated only by the
//! orchestrator in `emocore_engine`; everything else treats them as
//! read-only snapshots.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod core;
mod event;
mod navigation;
mod types;

pub use crate::core::{Core, Milestone, Trend, DEFAULT_LEVEL, SEED_CORE_IDS};
pub use event::{source, CoreUpdateEvent, CoreUpdateKind};
pub use navigation::CoreNavigationContext;
pub use types::{CoreId, Timestamp};
