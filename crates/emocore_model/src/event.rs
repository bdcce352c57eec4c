//! Update events emitted by the engine.

use crate::core::Trend;
use crate::types::{CoreId, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Well-known provenance tags.
///
/// `update_source` is free-form; these constants cover the sources the
/// engine itself distinguishes (the conflict tie-break ranks them).
pub mod source {
    /// A manual correction applied by the user.
    pub const MANUAL: &str = "manual";
    /// A completed text-analysis run.
    pub const AI_ANALYSIS: &str = "ai_analysis";
    /// A periodic background refresh.
    pub const BACKGROUND_SYNC: &str = "background_sync";
}

/// Kind of change an update event describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoreUpdateKind {
    /// `current_level` changed.
    LevelChanged,
    /// The derived trend changed.
    TrendChanged,
    /// A milestone threshold was crossed.
    MilestoneAchieved,
    /// A new insight was recorded.
    InsightGenerated,
    /// An analysis run finished for this core.
    AnalysisCompleted,
}

/// An immutable notification of one accepted change to a core.
///
/// Events are created once per accepted write, delivered at-most-once to
/// each active subscriber, and never persisted. For a single core id,
/// delivery order matches write acceptance order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoreUpdateEvent {
    /// The core the event concerns.
    pub core_id: CoreId,
    /// Kind of change.
    pub kind: CoreUpdateKind,
    /// Opaque payload describing the change.
    pub data: BTreeMap<String, String>,
    /// When the change was accepted.
    pub timestamp: Timestamp,
    /// Provenance tag of the originating write.
    pub update_source: String,
    /// Journal entry that triggered the change, if any.
    pub related_entry_id: Option<String>,
    /// Shared id for events that originated from one batch update.
    pub batch_id: Option<u64>,
}

impl CoreUpdateEvent {
    /// Creates an event with an empty payload.
    pub fn new(
        core_id: CoreId,
        kind: CoreUpdateKind,
        timestamp: Timestamp,
        update_source: impl Into<String>,
    ) -> Self {
        Self {
            core_id,
            kind,
            data: BTreeMap::new(),
            timestamp,
            update_source: update_source.into(),
            related_entry_id: None,
            batch_id: None,
        }
    }

    /// Creates a level-change event.
    pub fn level_changed(
        core_id: CoreId,
        previous: f64,
        current: f64,
        timestamp: Timestamp,
        update_source: impl Into<String>,
    ) -> Self {
        let mut event = Self::new(core_id, CoreUpdateKind::LevelChanged, timestamp, update_source);
        event.data.insert("previous_level".into(), previous.to_string());
        event.data.insert("current_level".into(), current.to_string());
        event
    }

    /// Creates a trend-change event.
    pub fn trend_changed(
        core_id: CoreId,
        previous: Trend,
        current: Trend,
        timestamp: Timestamp,
        update_source: impl Into<String>,
    ) -> Self {
        let mut event = Self::new(core_id, CoreUpdateKind::TrendChanged, timestamp, update_source);
        event.data.insert("previous_trend".into(), previous.as_str().into());
        event.data.insert("current_trend".into(), current.as_str().into());
        event
    }

    /// Creates a milestone-achieved event.
    pub fn milestone_achieved(
        core_id: CoreId,
        threshold: f64,
        label: impl Into<String>,
        timestamp: Timestamp,
        update_source: impl Into<String>,
    ) -> Self {
        let mut event = Self::new(
            core_id,
            CoreUpdateKind::MilestoneAchieved,
            timestamp,
            update_source,
        );
        event.data.insert("threshold".into(), threshold.to_string());
        event.data.insert("label".into(), label.into());
        event
    }

    /// Creates an insight-generated event.
    pub fn insight_generated(
        core_id: CoreId,
        insight: impl Into<String>,
        timestamp: Timestamp,
        update_source: impl Into<String>,
    ) -> Self {
        let mut event = Self::new(
            core_id,
            CoreUpdateKind::InsightGenerated,
            timestamp,
            update_source,
        );
        event.data.insert("insight".into(), insight.into());
        event
    }

    /// Creates an analysis-completed event carrying the analysis metadata.
    pub fn analysis_completed(
        core_id: CoreId,
        data: BTreeMap<String, String>,
        timestamp: Timestamp,
        update_source: impl Into<String>,
    ) -> Self {
        let mut event = Self::new(
            core_id,
            CoreUpdateKind::AnalysisCompleted,
            timestamp,
            update_source,
        );
        event.data = data;
        event
    }

    /// Attaches the journal entry that triggered the change.
    pub fn with_related_entry(mut self, entry_id: impl Into<String>) -> Self {
        self.related_entry_id = Some(entry_id.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_changed_payload() {
        let event = CoreUpdateEvent::level_changed(
            "optimism".into(),
            0.0,
            0.35,
            Timestamp::from_millis(100),
            source::AI_ANALYSIS,
        );

        assert_eq!(event.kind, CoreUpdateKind::LevelChanged);
        assert_eq!(event.data.get("previous_level").unwrap(), "0");
        assert_eq!(event.data.get("current_level").unwrap(), "0.35");
        assert_eq!(event.update_source, "ai_analysis");
        assert_eq!(event.batch_id, None);
    }

    #[test]
    fn trend_changed_payload() {
        let event = CoreUpdateEvent::trend_changed(
            "resilience".into(),
            Trend::Stable,
            Trend::Rising,
            Timestamp::from_millis(1),
            source::MANUAL,
        );

        assert_eq!(event.data.get("previous_trend").unwrap(), "stable");
        assert_eq!(event.data.get("current_trend").unwrap(), "rising");
    }

    #[test]
    fn related_entry_attachment() {
        let event = CoreUpdateEvent::insight_generated(
            "creativity".into(),
            "sketching daily",
            Timestamp::from_millis(7),
            source::AI_ANALYSIS,
        )
        .with_related_entry("entry-42");

        assert_eq!(event.related_entry_id.as_deref(), Some("entry-42"));
        assert_eq!(event.data.get("insight").unwrap(), "sketching daily");
    }
}
