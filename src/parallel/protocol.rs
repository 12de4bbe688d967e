//! Messages exchanged between the pool coordinator and its execution units.
//! Units never share state with the coordinator; these enums are the only
//! boundary.

use std::sync::Arc;

use crate::parallel::batch::{BatchId, WorkBatch};
use crate::sim::SimulationParams;
use crate::stats::{CandidateId, ResultSet};

pub type WorkerId = usize;

/// Coordinator → unit.
#[derive(Debug, Clone)]
pub enum WorkerInMessage {
    Init {
        worker_id: WorkerId,
        params: Arc<SimulationParams>,
    },
    WorkBatch(WorkBatch),
    Terminate,
}

/// Unit → coordinator.
#[derive(Debug, Clone)]
pub enum WorkerOutMessage {
    WorkerReady {
        worker_id: WorkerId,
    },
    BatchComplete {
        worker_id: WorkerId,
        batch_id: BatchId,
        results: ResultSet,
    },
    /// The unit has stopped. `candidate` is the one it was simulating, if any.
    WorkerError {
        worker_id: WorkerId,
        error: String,
        candidate: Option<CandidateId>,
    },
}

impl WorkerOutMessage {
    pub fn worker_id(&self) -> WorkerId {
        match self {
            Self::WorkerReady { worker_id }
            | Self::BatchComplete { worker_id, .. }
            | Self::WorkerError { worker_id, .. } => *worker_id,
        }
    }
}

/// Coordinator's view of one unit. `Terminated` is final.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitState {
    Idle,
    Busy { batch_id: BatchId },
    Terminated,
}

impl UnitState {
    pub fn is_idle(self) -> bool {
        matches!(self, Self::Idle)
    }

    pub fn is_live(self) -> bool {
        !matches!(self, Self::Terminated)
    }
}
