//! The core metric entity.

use crate::types::{CoreId, Timestamp};
use serde::{Deserialize, Serialize};

/// Level assigned to every core when the set is first seeded.
pub const DEFAULT_LEVEL: f64 = 0.0;

/// The fixed set of core ids seeded at first run.
pub const SEED_CORE_IDS: [&str; 6] = [
    "optimism",
    "resilience",
    "self_awareness",
    "creativity",
    "social_connection",
    "growth_mindset",
];

/// Direction a core's level is moving in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    /// Level increased by more than the threshold.
    Rising,
    /// Level is within the threshold of its previous value.
    Stable,
    /// Level decreased by more than the threshold.
    Declining,
}

impl Trend {
    /// Derives the trend from a level transition.
    ///
    /// Movements within `threshold` of the previous value count as stable.
    pub fn from_levels(current: f64, previous: f64, threshold: f64) -> Self {
        let delta = current - previous;
        if delta > threshold {
            Trend::Rising
        } else if delta < -threshold {
            Trend::Declining
        } else {
            Trend::Stable
        }
    }

    /// Returns the lowercase name of the trend.
    pub fn as_str(&self) -> &'static str {
        match self {
            Trend::Rising => "rising",
            Trend::Stable => "stable",
            Trend::Declining => "declining",
        }
    }
}

/// An achievement threshold on a core's progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Milestone {
    /// Level at which the milestone is achieved.
    pub threshold: f64,
    /// Display label.
    pub label: String,
    /// Whether the milestone has been achieved.
    pub achieved: bool,
    /// When the milestone was achieved, if it has been.
    pub achieved_at: Option<Timestamp>,
}

impl Milestone {
    /// Creates an unachieved milestone.
    pub fn new(threshold: f64, label: impl Into<String>) -> Self {
        Self {
            threshold,
            label: label.into(),
            achieved: false,
            achieved_at: None,
        }
    }
}

/// A named metric with bounded progress.
///
/// Levels are constrained to `[0.0, 1.0]`; writes outside that range are
/// rejected by the engine and never become visible. `previous_level`
/// always holds the `current_level` that was in effect immediately before
/// the most recent accepted write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Core {
    /// Stable identifier.
    pub id: CoreId,
    /// Display name.
    pub name: String,
    /// Display description.
    pub description: String,
    /// Current progress level in `[0.0, 1.0]`.
    pub current_level: f64,
    /// Level in effect before the most recent accepted write.
    pub previous_level: f64,
    /// Direction of the most recent level change.
    pub trend: Trend,
    /// Time of the most recent accepted write. Non-decreasing per core.
    pub last_updated: Timestamp,
    /// Presentation color, opaque to the engine.
    pub color: String,
    /// Presentation icon path, opaque to the engine.
    pub icon_path: String,
    /// Latest insight text, opaque to the engine.
    pub insight: String,
    /// Related core ids, informational only.
    pub related_cores: Vec<CoreId>,
    /// Ordered achievement thresholds.
    pub milestones: Vec<Milestone>,
    /// Bounded most-recent-first insight history.
    pub recent_insights: Vec<String>,
}

impl Core {
    /// Creates a core at the default level with the standard milestone
    /// ladder and empty presentation metadata.
    pub fn new(id: impl Into<CoreId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            current_level: DEFAULT_LEVEL,
            previous_level: DEFAULT_LEVEL,
            trend: Trend::Stable,
            last_updated: Timestamp::default(),
            color: String::new(),
            icon_path: String::new(),
            insight: String::new(),
            related_cores: Vec::new(),
            milestones: default_milestones(),
            recent_insights: Vec::new(),
        }
    }

    /// Sets the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Sets the presentation color.
    pub fn with_color(mut self, color: impl Into<String>) -> Self {
        self.color = color.into();
        self
    }

    /// Sets the presentation icon path.
    pub fn with_icon_path(mut self, icon_path: impl Into<String>) -> Self {
        self.icon_path = icon_path.into();
        self
    }

    /// Sets the related core ids.
    pub fn with_related_cores(mut self, related: Vec<CoreId>) -> Self {
        self.related_cores = related;
        self
    }

    /// Sets the current level without any bookkeeping.
    ///
    /// This only builds a candidate value; range validation, trend
    /// derivation and `previous_level` maintenance happen when the engine
    /// accepts the write.
    pub fn with_level(mut self, level: f64) -> Self {
        self.current_level = level;
        self
    }

    /// Sets `last_updated`.
    pub fn with_last_updated(mut self, at: Timestamp) -> Self {
        self.last_updated = at;
        self
    }

    /// Sets the insight text.
    pub fn with_insight(mut self, insight: impl Into<String>) -> Self {
        self.insight = insight.into();
        self
    }

    /// Returns true if `level` is a valid core level.
    pub fn level_in_range(level: f64) -> bool {
        level.is_finite() && (0.0..=1.0).contains(&level)
    }

    /// Pushes an insight onto the most-recent-first history, truncating
    /// to `limit` entries.
    pub fn push_insight(&mut self, insight: impl Into<String>, limit: usize) {
        self.recent_insights.insert(0, insight.into());
        self.recent_insights.truncate(limit);
    }

    /// Builds the full seeded core set, all at the default level.
    pub fn seed_set() -> Vec<Core> {
        vec![
            Core::new("optimism", "Optimism")
                .with_description("Hopeful outlook and positive reframing")
                .with_color("#F6B93B")
                .with_icon_path("icons/cores/optimism.svg")
                .with_related_cores(vec!["resilience".into(), "growth_mindset".into()]),
            Core::new("resilience", "Resilience")
                .with_description("Recovery and persistence through setbacks")
                .with_color("#E55039")
                .with_icon_path("icons/cores/resilience.svg")
                .with_related_cores(vec!["optimism".into(), "self_awareness".into()]),
            Core::new("self_awareness", "Self-Awareness")
                .with_description("Recognition of one's own emotional patterns")
                .with_color("#4A69BD")
                .with_icon_path("icons/cores/self_awareness.svg")
                .with_related_cores(vec!["resilience".into()]),
            Core::new("creativity", "Creativity")
                .with_description("Novel expression and flexible thinking")
                .with_color("#78E08F")
                .with_icon_path("icons/cores/creativity.svg")
                .with_related_cores(vec!["growth_mindset".into()]),
            Core::new("social_connection", "Social Connection")
                .with_description("Engagement and belonging with others")
                .with_color("#38ADA9")
                .with_icon_path("icons/cores/social_connection.svg")
                .with_related_cores(vec!["self_awareness".into()]),
            Core::new("growth_mindset", "Growth Mindset")
                .with_description("Openness to learning and change")
                .with_color("#8E44AD")
                .with_icon_path("icons/cores/growth_mindset.svg")
                .with_related_cores(vec!["optimism".into(), "creativity".into()]),
        ]
    }
}

/// The standard milestone ladder applied to every seeded core.
fn default_milestones() -> Vec<Milestone> {
    vec![
        Milestone::new(0.25, "Emerging"),
        Milestone::new(0.50, "Developing"),
        Milestone::new(0.75, "Established"),
        Milestone::new(1.00, "Mastered"),
    ]
}
