//! Combining two summaries of the same candidate without going back to the
//! simulator. Mean, min and max combine from the summaries; the median is taken
//! from the merged sorted samples.

use super::{PartialResult, ResultSet, RunTrace};

/// Median of an ascending slice. Even length averages the two middle values.
pub fn median_of_sorted(sorted: &[f64]) -> f64 {
    let len = sorted.len();
    if len == 0 {
        return 0.0;
    }
    let mid = len / 2;
    if len % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

/// Merge `b` into `a`. `b` is treated as the later partial: its `filter_reason`
/// wins when present.
pub fn merge_results(a: &PartialResult, b: &PartialResult) -> PartialResult {
    let filter_reason = b.filter_reason.or(a.filter_reason);
    if b.sample_count == 0 {
        return PartialResult {
            filter_reason,
            ..a.clone()
        };
    }
    if a.sample_count == 0 {
        return PartialResult {
            filter_reason,
            ..b.clone()
        };
    }

    let count_a = a.sample_count as f64;
    let count_b = b.sample_count as f64;
    let samples = merge_sorted(&a.samples, &b.samples);
    let mean = (a.mean * count_a + b.mean * count_b) / (count_a + count_b);

    let min_run = extreme_trace(
        a.min.total_cmp(&b.min),
        a.min_run.as_ref(),
        b.min_run.as_ref(),
    );
    let max_run = extreme_trace(
        b.max.total_cmp(&a.max),
        a.max_run.as_ref(),
        b.max_run.as_ref(),
    );

    PartialResult {
        sample_count: a.sample_count + b.sample_count,
        median: median_of_sorted(&samples),
        samples,
        mean,
        min: a.min.min(b.min),
        max: a.max.max(b.max),
        min_run,
        max_run,
        filter_reason,
    }
}

/// Merge every entry of `update` into `into`. Candidates not yet present are
/// inserted as-is.
pub fn merge_result_sets(into: &mut ResultSet, update: ResultSet) {
    for (id, incoming) in update {
        match into.get_mut(&id) {
            Some(existing) => *existing = merge_results(existing, &incoming),
            None => {
                into.insert(id, incoming);
            }
        }
    }
}

/// `ordering` is `Less` when `a` owns the extreme, `Greater` when `b` does.
/// Ties go to whichever side carries a trace, `a` first. When the owning side
/// recorded no trace the other side's is kept.
fn extreme_trace(
    ordering: std::cmp::Ordering,
    a: Option<&RunTrace>,
    b: Option<&RunTrace>,
) -> Option<RunTrace> {
    use std::cmp::Ordering;

    let (owner, other) = match ordering {
        Ordering::Less => (a, b),
        Ordering::Greater => (b, a),
        Ordering::Equal => {
            if a.is_some() {
                (a, b)
            } else {
                (b, a)
            }
        }
    };
    owner.or(other).cloned()
}

fn merge_sorted(left: &[f64], right: &[f64]) -> Vec<f64> {
    let mut merged = Vec::with_capacity(left.len() + right.len());
    let (mut i, mut j) = (0, 0);
    while i < left.len() && j < right.len() {
        if left[i].total_cmp(&right[j]).is_le() {
            merged.push(left[i]);
            i += 1;
        } else {
            merged.push(right[j]);
            j += 1;
        }
    }
    merged.extend_from_slice(&left[i..]);
    merged.extend_from_slice(&right[j..]);
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::FilterReason;

    fn trace(seed: u64, value: f64) -> RunTrace {
        RunTrace {
            seed,
            value,
            points: Vec::new(),
        }
    }

    #[test]
    fn median_even_and_odd() {
        assert_eq!(median_of_sorted(&[1.0, 2.0, 3.0]), 2.0);
        assert_eq!(median_of_sorted(&[1.0, 2.0, 3.0, 10.0]), 2.5);
        assert_eq!(median_of_sorted(&[]), 0.0);
    }

    #[test]
    fn merge_combines_summary_fields() {
        let a = PartialResult::from_samples(vec![0.2, 0.4]);
        let b = PartialResult::from_samples(vec![0.1, 0.9, 0.5]);
        let merged = merge_results(&a, &b);

        assert_eq!(merged.sample_count, 5);
        assert_eq!(merged.samples, vec![0.1, 0.2, 0.4, 0.5, 0.9]);
        assert!((merged.mean - 0.42).abs() < 1e-12);
        assert_eq!(merged.median, 0.4);
        assert_eq!(merged.min, 0.1);
        assert_eq!(merged.max, 0.9);
    }

    #[test]
    fn min_and_max_traces_are_tracked_independently() {
        let a = PartialResult::from_samples(vec![0.0, 2.0])
            .with_traces(Some(trace(1, 0.0)), Some(trace(2, 2.0)));
        let b = PartialResult::from_samples(vec![0.5, 3.0])
            .with_traces(Some(trace(3, 0.5)), Some(trace(4, 3.0)));
        let merged = merge_results(&a, &b);

        assert_eq!(merged.min_run.map(|t| t.seed), Some(1));
        assert_eq!(merged.max_run.map(|t| t.seed), Some(4));
    }

    #[test]
    fn trace_falls_back_when_owner_has_none() {
        let a = PartialResult::from_samples(vec![0.0, 1.0]);
        let b = PartialResult::from_samples(vec![0.5, 0.8])
            .with_traces(Some(trace(7, 0.5)), Some(trace(8, 0.8)));
        let merged = merge_results(&a, &b);

        assert_eq!(merged.min_run.map(|t| t.seed), Some(7));
        assert_eq!(merged.max_run.map(|t| t.seed), Some(8));
    }

    #[test]
    fn later_filter_reason_wins() {
        let mut a = PartialResult::from_samples(vec![0.0]);
        a.filter_reason = Some(FilterReason::NegligibleEffect);
        let mut b = PartialResult::from_samples(vec![0.0]);
        assert_eq!(
            merge_results(&a, &b).filter_reason,
            Some(FilterReason::NegligibleEffect)
        );
        b.filter_reason = Some(FilterReason::LowVariance);
        assert_eq!(
            merge_results(&a, &b).filter_reason,
            Some(FilterReason::LowVariance)
        );
    }

    #[test]
    fn empty_side_is_identity() {
        let a = PartialResult::from_samples(vec![0.3, 0.6]);
        assert_eq!(merge_results(&a, &PartialResult::empty()), a);
        assert_eq!(merge_results(&PartialResult::empty(), &a), a);
    }

    #[test]
    fn merge_result_sets_inserts_and_merges() {
        let mut into = ResultSet::new();
        into.insert("a".into(), PartialResult::from_samples(vec![1.0]));
        let mut update = ResultSet::new();
        update.insert("a".into(), PartialResult::from_samples(vec![3.0]));
        update.insert("b".into(), PartialResult::from_samples(vec![2.0]));

        merge_result_sets(&mut into, update);

        assert_eq!(into["a"].sample_count, 2);
        assert_eq!(into["a"].mean, 2.0);
        assert_eq!(into["b"].sample_count, 1);
    }
}
