//! Tiered sampling plan: cheap scouting stages prune the candidate list before
//! the expensive confirmation stages run.
//!
//! A [ScheduleConfig] is the ordered list of stages plus the [FilterPolicy]
//! applied when leaving each one. The default plan is 5 → 20 → 50 → 200 samples,
//! dropping negligible effects after stage 1 and flat distributions after stage 2.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::stats::{FilterReason, PartialResult};

/// Default threshold (in lengths) for both built-in filters.
pub const DEFAULT_FILTER_EPSILON: f64 = 0.1;

/// Above this many candidates the adaptive plan switches to lighter stages.
pub const LARGE_CANDIDATE_SET: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageConfig {
    pub stage: u8,
    pub sample_count: usize,
    #[serde(default)]
    pub include_trace: bool,
}

impl StageConfig {
    pub const fn new(stage: u8, sample_count: usize, include_trace: bool) -> Self {
        Self {
            stage,
            sample_count,
            include_trace,
        }
    }
}

pub const DEFAULT_STAGES: [StageConfig; 4] = [
    StageConfig::new(1, 5, false),
    StageConfig::new(2, 20, false),
    StageConfig::new(3, 50, false),
    StageConfig::new(4, 200, true),
];

/// What a candidate must show to survive a stage boundary.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum FilterKind {
    /// Keep iff `max > threshold`.
    NegligibleEffect { threshold: f64 },
    /// Keep iff `max - min > threshold`.
    LowVariance { threshold: f64 },
}

impl FilterKind {
    pub fn keeps(&self, result: &PartialResult) -> bool {
        match *self {
            Self::NegligibleEffect { threshold } => result.max > threshold,
            Self::LowVariance { threshold } => result.spread() > threshold,
        }
    }

    pub fn reason(&self) -> FilterReason {
        match self {
            Self::NegligibleEffect { .. } => FilterReason::NegligibleEffect,
            Self::LowVariance { .. } => FilterReason::LowVariance,
        }
    }

    fn threshold(&self) -> f64 {
        match *self {
            Self::NegligibleEffect { threshold } | Self::LowVariance { threshold } => threshold,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FilterRule {
    /// The rule runs when this stage is left.
    pub after_stage: u8,
    #[serde(flatten)]
    pub kind: FilterKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterPolicy {
    #[serde(default)]
    pub rules: Vec<FilterRule>,
}

impl Default for FilterPolicy {
    fn default() -> Self {
        Self {
            rules: vec![
                FilterRule {
                    after_stage: 1,
                    kind: FilterKind::NegligibleEffect {
                        threshold: DEFAULT_FILTER_EPSILON,
                    },
                },
                FilterRule {
                    after_stage: 2,
                    kind: FilterKind::LowVariance {
                        threshold: DEFAULT_FILTER_EPSILON,
                    },
                },
            ],
        }
    }
}

impl FilterPolicy {
    /// Keep everything at every boundary.
    pub fn keep_all() -> Self {
        Self { rules: Vec::new() }
    }

    /// First rule for `stage` that rejects `result`, if any.
    pub fn rejection(&self, stage: u8, result: &PartialResult) -> Option<FilterReason> {
        self.rules
            .iter()
            .filter(|rule| rule.after_stage == stage)
            .find(|rule| !rule.kind.keeps(result))
            .map(|rule| rule.kind.reason())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleConfig {
    pub stages: Vec<StageConfig>,
    #[serde(default)]
    pub filters: FilterPolicy,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            stages: DEFAULT_STAGES.to_vec(),
            filters: FilterPolicy::default(),
        }
    }
}

impl ScheduleConfig {
    /// Lighter stages for big candidate sets: 3/10/30/100 above
    /// [LARGE_CANDIDATE_SET] candidates, 5/15/50/200 otherwise.
    pub fn for_candidate_count(count: usize) -> Self {
        let samples: [usize; 4] = if count > LARGE_CANDIDATE_SET {
            [3, 10, 30, 100]
        } else {
            [5, 15, 50, 200]
        };
        let stages = samples
            .iter()
            .zip(1u8..)
            .map(|(&sample_count, stage)| StageConfig::new(stage, sample_count, stage == 4))
            .collect();
        Self {
            stages,
            filters: FilterPolicy::default(),
        }
    }

    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    /// Samples a candidate accumulates if it survives every stage.
    pub fn total_samples_per_candidate(&self) -> usize {
        self.stages.iter().map(|s| s.sample_count).sum()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.stages.is_empty() {
            return Err(ConfigError::Invalid("at least one stage is required".into()));
        }
        for (index, stage) in self.stages.iter().enumerate() {
            let expected = index + 1;
            if usize::from(stage.stage) != expected {
                return Err(ConfigError::Invalid(format!(
                    "stage at position {expected} is numbered {}",
                    stage.stage
                )));
            }
            if stage.sample_count == 0 {
                return Err(ConfigError::Invalid(format!(
                    "stage {} has a sample count of 0",
                    stage.stage
                )));
            }
        }
        for rule in &self.filters.rules {
            let threshold = rule.kind.threshold();
            if !threshold.is_finite() || threshold < 0.0 {
                return Err(ConfigError::Invalid(format!(
                    "filter after stage {} has threshold {threshold}",
                    rule.after_stage
                )));
            }
        }
        Ok(())
    }
}
