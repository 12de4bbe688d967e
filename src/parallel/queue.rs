//! Work queue for one staged run.
//!
//! Owns the remaining candidates of the active stage, the batches in flight and
//! the accumulated result map. The map is only written by [WorkQueue::complete_batch],
//! [WorkQueue::fail_batch] and [WorkQueue::advance_stage]; everything else reads it.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::optimizer::tiered::{ScheduleConfig, StageConfig};
use crate::parallel::batch::{BatchId, WorkBatch};
use crate::stats::{merge_results, CandidateId, FilterReason, PartialResult, ResultSet};

/// Failures a single candidate may cause before it is retired instead of retried.
pub const MAX_CANDIDATE_ATTEMPTS: u32 = 2;

/// Candidates of the current stage whose batch has completed, out of all
/// candidates entering it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Progress {
    pub stage: u8,
    pub processed: usize,
    pub total: usize,
}

/// What happened to a batch whose unit died.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchFailure {
    /// Candidates put back at the front of the queue.
    pub requeued: usize,
    /// Candidate dropped from the run with [FilterReason::SimulationFailed].
    pub retired: Option<CandidateId>,
}

#[derive(Debug)]
pub struct WorkQueue {
    schedule: ScheduleConfig,
    stage_index: usize,
    batch_size: usize,
    remaining: VecDeque<CandidateId>,
    stage_members: Vec<CandidateId>,
    in_flight: BTreeMap<BatchId, Vec<CandidateId>>,
    next_batch_id: BatchId,
    processed: usize,
    results: ResultSet,
    failures: HashMap<CandidateId, u32>,
}

impl WorkQueue {
    /// Seed stage 1 with `candidates`. Repeated ids are kept once, in first-seen order.
    pub fn new(candidates: Vec<CandidateId>, batch_size: usize, schedule: ScheduleConfig) -> Self {
        let mut seen = HashSet::with_capacity(candidates.len());
        let members: Vec<CandidateId> = candidates
            .into_iter()
            .filter(|id| seen.insert(id.clone()))
            .collect();
        debug!(
            candidates = members.len(),
            batch_size,
            stages = schedule.stage_count(),
            "work queue created"
        );
        Self {
            schedule,
            stage_index: 0,
            batch_size: batch_size.max(1),
            remaining: members.iter().cloned().collect(),
            stage_members: members,
            in_flight: BTreeMap::new(),
            next_batch_id: 0,
            processed: 0,
            results: ResultSet::new(),
            failures: HashMap::new(),
        }
    }

    pub fn current_stage(&self) -> StageConfig {
        self.schedule.stages[self.stage_index]
    }

    pub fn stage_number(&self) -> u8 {
        self.current_stage().stage
    }

    /// Next batch at the configured batch size.
    pub fn next_batch(&mut self) -> Option<WorkBatch> {
        self.next_batch_of(self.batch_size)
    }

    /// Take up to `max` candidates from the front of the remaining list.
    /// `None` once the list is empty; in-flight batches may still be pending.
    pub fn next_batch_of(&mut self, max: usize) -> Option<WorkBatch> {
        if self.remaining.is_empty() || max == 0 {
            return None;
        }
        let take = max.min(self.remaining.len());
        let candidates: Vec<CandidateId> = self.remaining.drain(..take).collect();
        let batch_id = self.next_batch_id;
        self.next_batch_id += 1;
        self.in_flight.insert(batch_id, candidates.clone());

        let stage = self.current_stage();
        Some(WorkBatch {
            batch_id,
            candidates,
            stage: stage.stage,
            sample_count: stage.sample_count,
            include_trace: stage.include_trace,
        })
    }

    /// Merge a finished batch. Unknown ids (late, duplicate or from an earlier
    /// stage) are logged and ignored; returns whether anything was applied.
    pub fn complete_batch(&mut self, batch_id: BatchId, mut results: ResultSet) -> bool {
        let Some(candidates) = self.in_flight.remove(&batch_id) else {
            warn!(batch_id, "ignoring completion for unknown batch");
            return false;
        };

        for id in &candidates {
            match results.remove(id) {
                Some(partial) => match self.results.get_mut(id) {
                    Some(existing) => *existing = merge_results(existing, &partial),
                    None => {
                        self.results.insert(id.clone(), partial);
                    }
                },
                None => warn!(batch_id, candidate = %id, "batch completed without a result"),
            }
        }
        if !results.is_empty() {
            warn!(
                batch_id,
                extra = results.len(),
                "dropping results for candidates outside the batch"
            );
        }

        self.processed += candidates.len();
        true
    }

    /// Return a batch whose unit died while simulating `failed`. That candidate's
    /// failure is counted; once it reaches [MAX_CANDIDATE_ATTEMPTS] it leaves the
    /// run with [FilterReason::SimulationFailed] and the rest of the batch is
    /// requeued without it. `None` for an unknown batch.
    pub fn fail_batch(&mut self, batch_id: BatchId, failed: Option<&str>) -> Option<BatchFailure> {
        let mut candidates = self.in_flight.remove(&batch_id)?;
        let mut retired = None;
        if let Some(pos) = failed.and_then(|id| candidates.iter().position(|c| c == id)) {
            let attempts = self.failures.entry(candidates[pos].clone()).or_insert(0);
            *attempts += 1;
            if *attempts >= MAX_CANDIDATE_ATTEMPTS {
                let id = candidates.remove(pos);
                self.retire(&id);
                retired = Some(id);
            }
        }

        let requeued = candidates.len();
        for id in candidates.into_iter().rev() {
            self.remaining.push_front(id);
        }
        debug!(batch_id, requeued, "batch returned to queue");
        Some(BatchFailure { requeued, retired })
    }

    fn retire(&mut self, id: &str) {
        warn!(candidate = %id, "giving up on candidate after repeated failures");
        self.stage_members.retain(|member| member != id);
        self.results
            .entry(id.to_string())
            .or_insert_with(PartialResult::empty)
            .filter_reason = Some(FilterReason::SimulationFailed);
    }

    pub fn is_stage_complete(&self) -> bool {
        self.remaining.is_empty() && self.in_flight.is_empty()
    }

    pub fn is_last_stage(&self) -> bool {
        self.stage_index + 1 >= self.schedule.stages.len()
    }

    /// Filter the stage being left and load the survivors as the next stage's
    /// work. Returns `false` without changing anything at the last stage.
    pub fn advance_stage(&mut self) -> bool {
        if self.is_last_stage() {
            return false;
        }
        debug_assert!(self.in_flight.is_empty(), "advancing with batches in flight");

        let leaving = self.stage_number();
        let mut survivors = Vec::with_capacity(self.stage_members.len());
        let mut dropped = 0usize;
        for id in self.stage_members.drain(..) {
            let Some(result) = self.results.get_mut(&id) else {
                survivors.push(id);
                continue;
            };
            match self.schedule.filters.rejection(leaving, result) {
                Some(reason) => {
                    result.filter_reason = Some(reason);
                    dropped += 1;
                }
                None => survivors.push(id),
            }
        }

        self.stage_index += 1;
        self.remaining = survivors.iter().cloned().collect();
        self.stage_members = survivors;
        self.in_flight.clear();
        self.processed = 0;

        info!(
            from_stage = leaving,
            to_stage = self.stage_number(),
            kept = self.stage_members.len(),
            dropped,
            "stage advanced"
        );
        true
    }

    pub fn results(&self) -> &ResultSet {
        &self.results
    }

    pub fn progress(&self) -> Progress {
        Progress {
            stage: self.stage_number(),
            processed: self.processed,
            total: self.stage_members.len(),
        }
    }

    /// Candidates still in the funnel for the current stage.
    pub fn active_candidates(&self) -> &[CandidateId] {
        &self.stage_members
    }

    pub fn remaining_count(&self) -> usize {
        self.remaining.len()
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    /// Candidates not yet merged for the current stage, queued or in flight.
    pub fn pending_candidates(&self) -> usize {
        self.remaining.len() + self.in_flight.values().map(Vec::len).sum::<usize>()
    }

    /// Samples merged so far across all candidates.
    pub fn total_samples(&self) -> usize {
        self.results.values().map(|r| r.sample_count).sum()
    }
}
