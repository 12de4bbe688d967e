//! Per-candidate statistical summaries produced by the simulator and accumulated
//! across batches and stages.

pub mod export;
pub mod merge;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub use export::write_results_csv;
pub use merge::{median_of_sorted, merge_result_sets, merge_results};

/// Opaque identifier of one unit of comparison (e.g. a skill id).
pub type CandidateId = String;

/// Accumulated results keyed by candidate. Ordered so callback payloads and
/// exports are deterministic.
pub type ResultSet = BTreeMap<CandidateId, PartialResult>;

/// Terminal annotation recorded when a candidate leaves the funnel early.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FilterReason {
    NegligibleEffect,
    LowVariance,
    /// The simulator kept failing on this candidate; it was given up on.
    SimulationFailed,
}

impl FilterReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NegligibleEffect => "negligible-effect",
            Self::LowVariance => "low-variance",
            Self::SimulationFailed => "simulation-failed",
        }
    }
}

/// One point along a recorded race.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TracePoint {
    pub elapsed_s: f64,
    pub position_m: f64,
    pub speed_mps: f64,
}

/// Detailed record of a single sample, kept for the runs that produced the
/// extreme values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunTrace {
    pub seed: u64,
    pub value: f64,
    #[serde(default)]
    pub points: Vec<TracePoint>,
}

/// Statistical summary of the samples run so far for one candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartialResult {
    pub sample_count: usize,
    /// Always sorted ascending.
    pub samples: Vec<f64>,
    pub mean: f64,
    pub median: f64,
    pub min: f64,
    pub max: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_run: Option<RunTrace>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_run: Option<RunTrace>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter_reason: Option<FilterReason>,
}

impl PartialResult {
    /// Summarize raw samples. An empty sample list yields an all-zero summary.
    pub fn from_samples(mut samples: Vec<f64>) -> Self {
        samples.sort_by(f64::total_cmp);
        let sample_count = samples.len();
        if sample_count == 0 {
            return Self::empty();
        }
        let mean = samples.iter().sum::<f64>() / sample_count as f64;
        Self {
            sample_count,
            mean,
            median: median_of_sorted(&samples),
            min: samples[0],
            max: samples[sample_count - 1],
            samples,
            min_run: None,
            max_run: None,
            filter_reason: None,
        }
    }

    pub fn empty() -> Self {
        Self {
            sample_count: 0,
            samples: Vec::new(),
            mean: 0.0,
            median: 0.0,
            min: 0.0,
            max: 0.0,
            min_run: None,
            max_run: None,
            filter_reason: None,
        }
    }

    pub fn with_traces(mut self, min_run: Option<RunTrace>, max_run: Option<RunTrace>) -> Self {
        self.min_run = min_run;
        self.max_run = max_run;
        self
    }

    pub fn spread(&self) -> f64 {
        (self.max - self.min).abs()
    }
}
