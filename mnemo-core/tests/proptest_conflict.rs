//! Property-based tests for conflict detection.
//!
//! Uses `proptest` to verify the resolver's structural invariants under
//! random inputs: similarity stays in range and symmetric, resolutions are
//! deterministic, and batch resolution is shape-preserving.

use std::collections::HashMap;

use proptest::prelude::*;

use mnemo_core::config::ConflictConfig;
use mnemo_core::conflict::{ConflictResolver, ConflictStrategy};
use mnemo_core::types::MemoryRecord;

fn resolver() -> ConflictResolver {
    ConflictResolver::new(ConflictConfig::default())
}

fn arb_content() -> impl Strategy<Value = String> {
    // Lowercase word soup resembling stored memory content.
    proptest::collection::vec("[a-z]{1,10}", 0..20).prop_map(|words| words.join(" "))
}

// ---------------------------------------------------------------------------
// Property: similarity is bounded and symmetric
// ---------------------------------------------------------------------------

proptest! {
    #[test]
    fn similarity_stays_in_unit_interval(a in arb_content(), b in arb_content()) {
        let s = resolver().similarity(&a, &b);
        prop_assert!((0.0..=1.0).contains(&s));
    }

    #[test]
    fn similarity_is_symmetric(a in arb_content(), b in arb_content()) {
        let r = resolver();
        let forward = r.similarity(&a, &b);
        let backward = r.similarity(&b, &a);
        prop_assert!((forward - backward).abs() < f64::EPSILON);
    }

    #[test]
    fn identical_nonempty_content_scores_one(a in "[a-z ]{1,60}") {
        prop_assert!((resolver().similarity(&a, &a) - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn similar_content_check_is_symmetric(a in arb_content(), b in arb_content()) {
        let r = resolver();
        prop_assert_eq!(r.is_similar_content(&a, &b), r.is_similar_content(&b, &a));
    }
}

// ---------------------------------------------------------------------------
// Property: resolution is deterministic for a fixed input
// ---------------------------------------------------------------------------

proptest! {
    #[test]
    fn creation_resolution_is_deterministic(
        new_content in arb_content(),
        existing_content in arb_content(),
    ) {
        let r = resolver();
        let existing = MemoryRecord::new(existing_content, "u1", HashMap::new());
        let first = r.resolve_creation_conflict(&new_content, "u1", &existing);
        let second = r.resolve_creation_conflict(&new_content, "u1", &existing);
        prop_assert_eq!(first.strategy, second.strategy);
        prop_assert_eq!(first.existing_memory_id, second.existing_memory_id);
        prop_assert_eq!(first.merged_content, second.merged_content);
    }

    #[test]
    fn resolution_never_produces_empty_content_from_nonempty_inputs(
        new_content in "[a-z]{3,10}( [a-z]{3,10}){2,10}",
        existing_content in "[a-z]{3,10}( [a-z]{3,10}){2,10}",
    ) {
        let r = resolver();
        let existing = MemoryRecord::new(existing_content, "u1", HashMap::new());
        let resolution = r.resolve_creation_conflict(&new_content, "u1", &existing);
        prop_assert!(!resolution.merged_content.is_empty());
    }
}

// ---------------------------------------------------------------------------
// Property: batch resolution is shape-preserving
// ---------------------------------------------------------------------------

proptest! {
    #[test]
    fn batch_resolution_matches_input_length(
        contents in proptest::collection::vec(arb_content(), 0..10),
        existing_contents in proptest::collection::vec(arb_content(), 0..5),
    ) {
        let r = resolver();
        let existing: Vec<MemoryRecord> = existing_contents
            .into_iter()
            .map(|c| MemoryRecord::new(c, "u1", HashMap::new()))
            .collect();
        let resolutions = r.resolve_batch_conflicts(&contents, "u1", &existing);
        prop_assert_eq!(resolutions.len(), contents.len());
    }

    #[test]
    fn batch_with_no_existing_memories_always_creates(
        contents in proptest::collection::vec(arb_content(), 1..10),
    ) {
        let resolutions = resolver().resolve_batch_conflicts(&contents, "u1", &[]);
        for resolution in resolutions {
            prop_assert_eq!(resolution.strategy, ConflictStrategy::CreateNew);
            prop_assert!(resolution.existing_memory_id.is_none());
        }
    }
}
