//! Property-based tests for combining partial results.

use proptest::prelude::*;

use skill_basin::stats::{merge_results, FilterReason, PartialResult};

/// Samples in tenths of a length, so sums stay exact enough to compare.
fn samples_strategy() -> impl Strategy<Value = Vec<f64>> {
    prop::collection::vec((-50i32..=50).prop_map(|v| f64::from(v) / 10.0), 0..40)
}

fn close(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-9
}

proptest! {
    // merging summaries equals summarizing the concatenated samples
    #[test]
    fn merge_matches_direct_summary(a in samples_strategy(), b in samples_strategy()) {
        let merged = merge_results(
            &PartialResult::from_samples(a.clone()),
            &PartialResult::from_samples(b.clone()),
        );
        let direct = PartialResult::from_samples(a.into_iter().chain(b).collect());
        prop_assert_eq!(merged.sample_count, direct.sample_count);
        prop_assert_eq!(&merged.samples, &direct.samples);
        prop_assert!(close(merged.mean, direct.mean));
        prop_assert!(close(merged.median, direct.median));
        prop_assert_eq!(merged.min, direct.min);
        prop_assert_eq!(merged.max, direct.max);
    }

    #[test]
    fn merge_is_associative(
        a in samples_strategy(),
        b in samples_strategy(),
        c in samples_strategy(),
    ) {
        let (a, b, c) = (
            PartialResult::from_samples(a),
            PartialResult::from_samples(b),
            PartialResult::from_samples(c),
        );
        let left = merge_results(&merge_results(&a, &b), &c);
        let right = merge_results(&a, &merge_results(&b, &c));
        prop_assert_eq!(left.sample_count, right.sample_count);
        prop_assert_eq!(&left.samples, &right.samples);
        prop_assert!(close(left.mean, right.mean));
        prop_assert_eq!(left.min, right.min);
        prop_assert_eq!(left.max, right.max);
    }

    #[test]
    fn empty_side_is_identity(a in samples_strategy()) {
        let a = PartialResult::from_samples(a);
        let empty = PartialResult::empty();
        prop_assert_eq!(&merge_results(&a, &empty), &a);
        prop_assert_eq!(&merge_results(&empty, &a), &a);
    }

    #[test]
    fn filter_reason_survives_later_merges(a in samples_strategy(), b in samples_strategy()) {
        let mut filtered = PartialResult::from_samples(a);
        filtered.filter_reason = Some(FilterReason::LowVariance);
        let merged = merge_results(&filtered, &PartialResult::from_samples(b));
        prop_assert_eq!(merged.filter_reason, Some(FilterReason::LowVariance));
    }
}
