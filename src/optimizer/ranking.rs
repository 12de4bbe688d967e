use serde::Serialize;

use crate::stats::{CandidateId, FilterReason, ResultSet};

#[derive(Debug, Clone, Serialize)]
pub struct RankedCandidate {
    pub rank: usize,
    pub candidate: CandidateId,
    pub sample_count: usize,
    pub mean: f64,
    pub median: f64,
    pub min: f64,
    pub max: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter_reason: Option<FilterReason>,
}

/// Order candidates best first: survivors before filtered ones, then by mean,
/// then median, then id.
pub fn rank_results(results: &ResultSet) -> Vec<RankedCandidate> {
    let mut ranked: Vec<RankedCandidate> = results
        .iter()
        .map(|(id, result)| RankedCandidate {
            rank: 0,
            candidate: id.clone(),
            sample_count: result.sample_count,
            mean: result.mean,
            median: result.median,
            min: result.min,
            max: result.max,
            filter_reason: result.filter_reason,
        })
        .collect();

    ranked.sort_by(|left, right| {
        left.filter_reason
            .is_some()
            .cmp(&right.filter_reason.is_some())
            .then_with(|| right.mean.total_cmp(&left.mean))
            .then_with(|| right.median.total_cmp(&left.median))
            .then_with(|| left.candidate.cmp(&right.candidate))
    });
    for (index, entry) in ranked.iter_mut().enumerate() {
        entry.rank = index + 1;
    }

    ranked
}
