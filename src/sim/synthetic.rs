//! Deterministic stand-in for the race engine. Each candidate id maps to a
//! fixed effect size and activation chance; samples are lengths gained over the
//! base runner. Used by the CLI, the benches and tests that need realistic
//! spreads without the real physics.

use crate::error::SimulationError;
use crate::sim::{hash_identifier, CourseData, RaceSimulator, Rng, RunnerConfig, SampleRequest};
use crate::stats::{PartialResult, RunTrace, TracePoint};

const TRACE_POINTS: usize = 12;

#[derive(Debug, Clone, Default)]
pub struct SyntheticRaceSimulator {
    /// Busy-work per sample, to make benches CPU-bound.
    pub work_per_sample: u32,
}

impl SyntheticRaceSimulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_work_per_sample(work_per_sample: u32) -> Self {
        Self { work_per_sample }
    }
}

struct CandidateProfile {
    effect: f64,
    activation_chance: f64,
}

fn profile_for(candidate: &str, runner: &RunnerConfig, course: &CourseData) -> CandidateProfile {
    let hash = hash_identifier(candidate);
    // a quarter of all ids barely move the needle
    let effect = if hash % 4 == 0 {
        (hash >> 8) as f64 / u64::MAX as f64 * 0.05
    } else {
        0.15 + ((hash >> 16) % 2000) as f64 / 1000.0
    };
    let distance_scale = (course.distance_m / 2000.0).clamp(0.5, 2.0);
    let wisdom_bonus = (runner.wisdom / 1200.0).clamp(0.0, 1.0) * 0.15;
    CandidateProfile {
        effect: effect * distance_scale,
        activation_chance: (0.55 + ((hash >> 32) % 40) as f64 / 100.0 + wisdom_bonus).min(1.0),
    }
}

fn burn(work: u32, seed: u64) -> u64 {
    let mut rng = Rng::new(seed);
    let mut acc = 0u64;
    for _ in 0..work {
        acc ^= rng.next_u64();
    }
    acc
}

fn race_trace(seed: u64, value: f64, course: &CourseData, runner: &RunnerConfig) -> RunTrace {
    let mut rng = Rng::new(seed ^ 0x5eed);
    let base_speed = 16.0 + runner.speed / 400.0;
    let mut position = 0.0;
    let mut elapsed = 0.0;
    let leg = course.distance_m / TRACE_POINTS as f64;
    let points = (0..TRACE_POINTS)
        .map(|_| {
            let speed = base_speed + rng.between(-0.5, 0.5);
            position += leg;
            elapsed += leg / speed;
            TracePoint {
                elapsed_s: elapsed,
                position_m: position,
                speed_mps: speed,
            }
        })
        .collect();
    RunTrace {
        seed,
        value,
        points,
    }
}

impl RaceSimulator for SyntheticRaceSimulator {
    fn run_samples(&self, request: SampleRequest<'_>) -> Result<PartialResult, SimulationError> {
        if request.course.distance_m <= 0.0 {
            return Err(SimulationError::failed(
                request.candidate,
                format!("course '{}' has no distance", request.course.id),
            ));
        }
        if request.runner.has_skill(request.candidate) {
            return Ok(PartialResult::from_samples(vec![0.0; request.samples]));
        }

        request.runner.skills.push(request.candidate.to_string());
        let profile = profile_for(request.candidate, request.runner, request.course);

        let mut rng = Rng::new(request.seed);
        let mut samples = Vec::with_capacity(request.samples);
        let mut min_seed = request.seed;
        let mut max_seed = request.seed;
        let mut lowest = f64::INFINITY;
        let mut highest = f64::NEG_INFINITY;
        for _ in 0..request.samples {
            let sample_seed = rng.next_u64();
            let mut sample_rng = Rng::new(sample_seed);
            std::hint::black_box(burn(self.work_per_sample, sample_seed));
            let value = if sample_rng.chance(profile.activation_chance) {
                profile.effect * sample_rng.between(0.6, 1.4)
            } else {
                0.0
            };
            if value < lowest {
                lowest = value;
                min_seed = sample_seed;
            }
            if value > highest {
                highest = value;
                max_seed = sample_seed;
            }
            samples.push(value);
        }

        let mut result = PartialResult::from_samples(samples);
        request.runner.skills.pop();
        if request.include_trace && result.sample_count > 0 {
            result.min_run = Some(race_trace(min_seed, result.min, request.course, request.runner));
            result.max_run = Some(race_trace(max_seed, result.max, request.course, request.runner));
        }
        Ok(result)
    }
}
