//! Work batches and batch sizing.
//!
//! A batch is a slice of the current stage's candidate list handed to one
//! execution unit. Sizing trades message overhead against load balance: large
//! candidate sets get bigger batches, small ones fall back to a floor so every
//! unit still gets work.

use serde::{Deserialize, Serialize};

use crate::stats::CandidateId;

pub type BatchId = u64;

/// Smallest batch the pool hands out.
pub const MIN_BATCH_SIZE: usize = 5;

/// Target number of batches per unit per stage.
pub const BATCHES_PER_UNIT: usize = 4;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkBatch {
    pub batch_id: BatchId,
    pub candidates: Vec<CandidateId>,
    pub stage: u8,
    pub sample_count: usize,
    pub include_trace: bool,
}

/// `max(min_batch, ceil(candidates / (units * batches_per_unit)))`.
///
/// # Example
/// ```
/// # use skill_basin::parallel::batch_size_for;
/// assert_eq!(batch_size_for(12, 2, 5, 4), 5);
/// assert_eq!(batch_size_for(1000, 8, 5, 4), 32);
/// ```
pub fn batch_size_for(
    candidates: usize,
    units: usize,
    min_batch: usize,
    batches_per_unit: usize,
) -> usize {
    let slots = units.max(1) * batches_per_unit.max(1);
    candidates.div_ceil(slots).max(min_batch.max(1))
}
