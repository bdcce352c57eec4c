//! Conflict resolution between competing core versions.
//!
//! Resolution is a pure function over a batch of same-id candidates, so
//! it is unit-testable independent of the rest of the engine. The policy
//! is last-writer-wins by `last_updated`; equal timestamps fall back to a
//! fixed provenance ranking, and a still-tied pair is ordered by the bit
//! pattern of `current_level`. The outcome never depends on submission
//! order. Losers are discarded whole; sub-fields are never merged.

use emocore_model::{source, Core};

/// A core version competing for acceptance, tagged with its provenance.
#[derive(Debug, Clone, PartialEq)]
pub struct CoreCandidate {
    /// The proposed core value.
    pub core: Core,
    /// Provenance tag of the writer.
    pub source: String,
}

impl CoreCandidate {
    /// Creates a candidate.
    pub fn new(core: Core, source: impl Into<String>) -> Self {
        Self {
            core,
            source: source.into(),
        }
    }
}

/// Ranks a provenance tag for timestamp tie-breaking. Higher wins.
///
/// Manual edits outrank automated ones; unknown tags rank lowest.
pub fn provenance_rank(tag: &str) -> u8 {
    match tag {
        source::MANUAL => 3,
        source::AI_ANALYSIS => 2,
        source::BACKGROUND_SYNC => 1,
        _ => 0,
    }
}

/// Picks the winning version from a batch of same-id candidates.
///
/// Returns `None` for an empty batch. Candidates whose id differs from
/// the first candidate's are ignored (mixed-id input is a caller bug,
/// asserted in debug builds).
pub fn resolve(candidates: &[CoreCandidate]) -> Option<CoreCandidate> {
    let first_id = &candidates.first()?.core.id;
    debug_assert!(
        candidates.iter().all(|c| &c.core.id == first_id),
        "conflict candidates must share one core id"
    );

    candidates
        .iter()
        .filter(|c| &c.core.id == first_id)
        .max_by(|a, b| {
            a.core
                .last_updated
                .cmp(&b.core.last_updated)
                .then_with(|| provenance_rank(&a.source).cmp(&provenance_rank(&b.source)))
                .then_with(|| {
                    a.core
                        .current_level
                        .to_bits()
                        .cmp(&b.core.current_level.to_bits())
                })
        })
        .cloned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use emocore_model::Timestamp;
    use proptest::prelude::*;

    fn candidate(level: f64, at: u64, src: &str) -> CoreCandidate {
        CoreCandidate::new(
            Core::new("optimism", "Optimism")
                .with_level(level)
                .with_last_updated(Timestamp::from_millis(at)),
            src,
        )
    }

    #[test]
    fn empty_batch_resolves_to_none() {
        assert_eq!(resolve(&[]), None);
    }

    #[test]
    fn newest_timestamp_wins() {
        let older = candidate(0.9, 100, source::MANUAL);
        let newer = candidate(0.2, 200, source::BACKGROUND_SYNC);

        let winner = resolve(&[older.clone(), newer.clone()]).unwrap();
        assert_eq!(winner, newer);

        // Submission order does not matter
        let winner = resolve(&[newer.clone(), older]).unwrap();
        assert_eq!(winner, newer);
    }

    #[test]
    fn equal_timestamps_fall_back_to_provenance() {
        let manual = candidate(0.3, 100, source::MANUAL);
        let automated = candidate(0.8, 100, source::AI_ANALYSIS);

        let winner = resolve(&[automated.clone(), manual.clone()]).unwrap();
        assert_eq!(winner, manual);

        let winner = resolve(&[manual.clone(), automated]).unwrap();
        assert_eq!(winner, manual);
    }

    #[test]
    fn unknown_sources_rank_below_known() {
        let known = candidate(0.1, 100, source::BACKGROUND_SYNC);
        let unknown = candidate(0.9, 100, "migration_tool");

        let winner = resolve(&[unknown, known.clone()]).unwrap();
        assert_eq!(winner, known);
    }

    #[test]
    fn full_tie_breaks_on_level_bits() {
        let low = candidate(0.2, 100, source::MANUAL);
        let high = candidate(0.7, 100, source::MANUAL);

        let winner = resolve(&[low.clone(), high.clone()]).unwrap();
        assert_eq!(winner, high);

        let winner = resolve(&[high.clone(), low]).unwrap();
        assert_eq!(winner, high);
    }

    #[test]
    fn single_candidate_wins() {
        let only = candidate(0.5, 42, source::MANUAL);
        assert_eq!(resolve(&[only.clone()]).unwrap(), only);
    }

    proptest! {
        #[test]
        fn resolution_is_order_independent(
            level_a in 0.0f64..=1.0,
            level_b in 0.0f64..=1.0,
            at_a in 0u64..1000,
            at_b in 0u64..1000,
            src_a in 0usize..4,
            src_b in 0usize..4,
        ) {
            let sources = ["manual", "ai_analysis", "background_sync", "unknown"];
            let a = candidate(level_a, at_a, sources[src_a]);
            let b = candidate(level_b, at_b, sources[src_b]);

            let forward = resolve(&[a.clone(), b.clone()]).unwrap();
            let backward = resolve(&[b, a]).unwrap();
            prop_assert_eq!(forward, backward);
        }

        #[test]
        fn later_timestamp_always_wins(
            at_a in 0u64..1000,
            at_b in 0u64..1000,
        ) {
            prop_assume!(at_a != at_b);
            let a = candidate(0.1, at_a, "manual");
            let b = candidate(0.9, at_b, "background_sync");

            let winner = resolve(&[a, b]).unwrap();
            prop_assert_eq!(winner.core.last_updated.as_millis(), at_a.max(at_b));
        }
    }
}
