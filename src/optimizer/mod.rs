pub mod ranking;
pub mod tiered;

use std::sync::Arc;

use crossbeam_channel::unbounded;
use tracing::warn;

use crate::config::SchedulerConfig;
use crate::error::SchedulerError;
use crate::optimizer::ranking::{rank_results, RankedCandidate};
use crate::parallel::{PoolCallbacks, PoolManager, RunMetrics};
use crate::sim::{RaceSimulator, SimulationParams};
use crate::stats::{CandidateId, ResultSet};

/// Everything a finished blocking run produced.
#[derive(Debug, Clone)]
pub struct StagedOutcome {
    pub results: ResultSet,
    pub metrics: RunMetrics,
    /// Unit crashes the run recovered from.
    pub errors: Vec<SchedulerError>,
}

impl StagedOutcome {
    pub fn ranked(&self) -> Vec<RankedCandidate> {
        rank_results(&self.results)
    }
}

/// Run the staged scheduler to completion on the calling thread.
///
/// Recovered unit failures are collected into [StagedOutcome::errors]; a run
/// that cannot finish (every unit gone) returns the terminal error instead.
pub fn run_staged(
    simulator: Arc<dyn RaceSimulator>,
    config: SchedulerConfig,
    candidates: Vec<CandidateId>,
    params: SimulationParams,
) -> Result<StagedOutcome, SchedulerError> {
    run_staged_with_progress(simulator, config, candidates, params, |_, _| {})
}

/// Like [run_staged] but reports `(stage, active_candidates)` at each stage boundary.
pub fn run_staged_with_progress<F>(
    simulator: Arc<dyn RaceSimulator>,
    config: SchedulerConfig,
    candidates: Vec<CandidateId>,
    params: SimulationParams,
    mut on_stage: F,
) -> Result<StagedOutcome, SchedulerError>
where
    F: FnMut(u8, usize),
{
    let manager = PoolManager::new(simulator, config);
    let (done_tx, done_rx) = unbounded();
    let (error_tx, error_rx) = unbounded();
    let (stage_tx, stage_rx) = unbounded();

    manager.run(
        candidates,
        params,
        PoolCallbacks::new()
            .on_stage_complete(move |stage, _, progress| {
                let _ = stage_tx.send((stage, progress.total));
            })
            .on_error(move |err| {
                let _ = error_tx.send(err);
            })
            .on_complete(move |results, metrics| {
                let _ = done_tx.send((results, metrics));
            }),
    )?;
    manager.wait();

    for (stage, active) in stage_rx.try_iter() {
        on_stage(stage, active);
    }
    let mut errors: Vec<SchedulerError> = error_rx.try_iter().collect();
    if let Some(pos) = errors
        .iter()
        .position(|e| matches!(e, SchedulerError::PoolExhausted { .. }))
    {
        return Err(errors.swap_remove(pos));
    }

    match done_rx.try_recv() {
        Ok((results, metrics)) => Ok(StagedOutcome {
            results,
            metrics,
            errors,
        }),
        Err(_) => {
            warn!("staged run ended without completing");
            Err(SchedulerError::Cancelled)
        }
    }
}
