//! Boundary to the single-race simulation. The scheduler treats everything in
//! [SimulationParams] as opaque and hands it to a [RaceSimulator] unchanged.

pub mod rng;
pub mod synthetic;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::SimulationError;
use crate::stats::PartialResult;

pub use rng::Rng;
pub use synthetic::SyntheticRaceSimulator;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CourseData {
    pub id: String,
    pub distance_m: f64,
    #[serde(default)]
    pub surface: Surface,
    #[serde(default)]
    pub corners: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Surface {
    #[default]
    Turf,
    Dirt,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroundCondition {
    #[default]
    Firm,
    Good,
    Soft,
    Heavy,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RaceParameters {
    #[serde(default)]
    pub ground: GroundCondition,
    #[serde(default)]
    pub season: Option<String>,
    #[serde(default)]
    pub weather: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    FrontRunner,
    #[default]
    PaceChaser,
    LateSurger,
    EndCloser,
}

/// Base runner the candidates are evaluated against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunnerConfig {
    pub name: String,
    pub speed: f64,
    pub stamina: f64,
    pub power: f64,
    pub guts: f64,
    pub wisdom: f64,
    #[serde(default)]
    pub strategy: Strategy,
    #[serde(default)]
    pub skills: Vec<String>,
    #[serde(default)]
    pub forced_skill_positions: HashMap<String, f64>,
}

impl RunnerConfig {
    pub fn has_skill(&self, id: &str) -> bool {
        self.skills.iter().any(|s| s == id)
    }
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            name: "runner".to_string(),
            speed: 1200.0,
            stamina: 900.0,
            power: 1000.0,
            guts: 600.0,
            wisdom: 900.0,
            strategy: Strategy::PaceChaser,
            skills: Vec::new(),
            forced_skill_positions: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationOptions {
    pub seed: u64,
    pub accuracy_mode: bool,
    pub pacemaker_count: u32,
}

impl Default for SimulationOptions {
    fn default() -> Self {
        Self {
            seed: 0,
            accuracy_mode: false,
            pacemaker_count: 1,
        }
    }
}

/// Everything a unit needs to run a race. Sent once per unit at init.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationParams {
    pub course: CourseData,
    #[serde(default)]
    pub race: RaceParameters,
    pub base_runner: RunnerConfig,
    #[serde(default)]
    pub pacer: Option<RunnerConfig>,
    #[serde(default)]
    pub options: SimulationOptions,
}

impl Default for SimulationParams {
    fn default() -> Self {
        Self {
            course: CourseData {
                id: "tokyo-2400".to_string(),
                distance_m: 2400.0,
                surface: Surface::Turf,
                corners: 3,
            },
            race: RaceParameters::default(),
            base_runner: RunnerConfig::default(),
            pacer: None,
            options: SimulationOptions::default(),
        }
    }
}

/// One simulator call: `samples` races for `candidate` against a working copy
/// of the base runner.
#[derive(Debug)]
pub struct SampleRequest<'a> {
    pub course: &'a CourseData,
    pub race: &'a RaceParameters,
    /// Per-batch snapshot of the base runner; the simulator may mutate it.
    pub runner: &'a mut RunnerConfig,
    pub pacer: Option<&'a RunnerConfig>,
    pub options: &'a SimulationOptions,
    pub candidate: &'a str,
    pub samples: usize,
    pub seed: u64,
    pub include_trace: bool,
}

/// The single-race simulation collaborator.
pub trait RaceSimulator: Send + Sync {
    fn run_samples(&self, request: SampleRequest<'_>) -> Result<PartialResult, SimulationError>;
}

/// Stable seed for one candidate at one stage, so a retried batch reproduces
/// the same samples.
pub fn sample_seed(base: u64, stage: u8, candidate: &str) -> u64 {
    let hashed = hash_identifier(candidate);
    base.wrapping_mul(0x9e37_79b9_7f4a_7c15)
        .wrapping_add(hashed)
        .rotate_left(u32::from(stage) * 7 + 1)
        ^ u64::from(stage)
}

/// FNV-1a.
pub fn hash_identifier(value: &str) -> u64 {
    value.bytes().fold(14695981039346656037u64, |acc, b| {
        (acc ^ u64::from(b)).wrapping_mul(1099511628211)
    })
}
