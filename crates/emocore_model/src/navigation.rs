//! Navigation context metadata.

use crate::types::{CoreId, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Why and how a caller is requesting focus on a particular core.
///
/// Created per navigation request and held by the orchestrator until
/// superseded; never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoreNavigationContext {
    /// Screen the navigation originated from.
    pub source_screen: String,
    /// What triggered the navigation (tap, deep link, notification).
    pub triggered_by: String,
    /// The core being navigated to.
    pub target_core_id: CoreId,
    /// Journal entry associated with the navigation, if any.
    pub related_entry_id: Option<String>,
    /// Additional caller-supplied metadata.
    pub additional_data: BTreeMap<String, String>,
    /// When the navigation was requested.
    pub timestamp: Timestamp,
}

impl CoreNavigationContext {
    /// Creates a context targeting `core_id` with no further metadata.
    pub fn new(core_id: impl Into<CoreId>) -> Self {
        Self {
            source_screen: String::new(),
            triggered_by: String::new(),
            target_core_id: core_id.into(),
            related_entry_id: None,
            additional_data: BTreeMap::new(),
            timestamp: Timestamp::now(),
        }
    }

    /// Sets the originating screen.
    pub fn with_source_screen(mut self, screen: impl Into<String>) -> Self {
        self.source_screen = screen.into();
        self
    }

    /// Sets the trigger description.
    pub fn with_triggered_by(mut self, trigger: impl Into<String>) -> Self {
        self.triggered_by = trigger.into();
        self
    }

    /// Sets the associated journal entry.
    pub fn with_related_entry(mut self, entry_id: impl Into<String>) -> Self {
        self.related_entry_id = Some(entry_id.into());
        self
    }

    /// Adds one metadata entry.
    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.additional_data.insert(key.into(), value.into());
        self
    }
}
