//! Execution unit: the per-thread side of the pool protocol.
//!
//! A unit stores the simulation parameters it receives at init, then runs each
//! batch against a fresh copy of the base runner so nothing one batch does to
//! the runner is visible to the next. Simulator errors and panics end the unit
//! with a `WorkerError`.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender, TryRecvError};
use tracing::{debug, error, trace, warn};

use crate::error::SimulationError;
use crate::parallel::batch::WorkBatch;
use crate::parallel::protocol::{WorkerId, WorkerInMessage, WorkerOutMessage};
use crate::sim::{sample_seed, RaceSimulator, SampleRequest, SimulationParams};
use crate::stats::ResultSet;

pub struct ExecutionUnit {
    worker_id: WorkerId,
    simulator: Arc<dyn RaceSimulator>,
    params: Option<Arc<SimulationParams>>,
}

impl ExecutionUnit {
    pub fn new(worker_id: WorkerId, simulator: Arc<dyn RaceSimulator>) -> Self {
        Self {
            worker_id,
            simulator,
            params: None,
        }
    }

    pub fn worker_id(&self) -> WorkerId {
        self.worker_id
    }

    /// Serve messages until `Terminate`, a fatal batch error, or the
    /// coordinator hanging up.
    pub fn run(mut self, inbox: Receiver<WorkerInMessage>, outbox: Sender<WorkerOutMessage>) {
        while let Ok(message) = inbox.recv() {
            let reply = match message {
                WorkerInMessage::Init { worker_id, params } => {
                    self.worker_id = worker_id;
                    self.params = Some(params);
                    debug!(worker_id, "unit initialized");
                    WorkerOutMessage::WorkerReady { worker_id }
                }
                WorkerInMessage::WorkBatch(batch) => {
                    let stop_requested = || match inbox.try_recv() {
                        Ok(WorkerInMessage::Terminate) | Err(TryRecvError::Disconnected) => true,
                        Ok(other) => {
                            warn!(worker_id = self.worker_id, ?other, "message dropped while busy");
                            false
                        }
                        Err(TryRecvError::Empty) => false,
                    };
                    match self.process_batch(&batch, stop_requested) {
                        Ok(Some(results)) => WorkerOutMessage::BatchComplete {
                            worker_id: self.worker_id,
                            batch_id: batch.batch_id,
                            results,
                        },
                        Ok(None) => {
                            debug!(worker_id = self.worker_id, "terminated mid-batch");
                            return;
                        }
                        Err(err) => {
                            error!(worker_id = self.worker_id, batch_id = batch.batch_id, %err, "batch failed");
                            let _ = outbox.send(WorkerOutMessage::WorkerError {
                                worker_id: self.worker_id,
                                error: err.to_string(),
                                candidate: err.candidate().map(str::to_string),
                            });
                            return;
                        }
                    }
                }
                WorkerInMessage::Terminate => {
                    debug!(worker_id = self.worker_id, "unit terminated");
                    return;
                }
            };
            if outbox.send(reply).is_err() {
                return;
            }
        }
    }

    /// Run every candidate of `batch`. `stop_requested` is polled between
    /// candidates; returns `Ok(None)` if it fired.
    pub fn process_batch<F>(
        &self,
        batch: &WorkBatch,
        mut stop_requested: F,
    ) -> Result<Option<ResultSet>, SimulationError>
    where
        F: FnMut() -> bool,
    {
        let params = self.params.as_ref().ok_or(SimulationError::NotInitialized)?;
        let mut runner = params.base_runner.clone();
        let mut results = ResultSet::new();

        for candidate in &batch.candidates {
            if stop_requested() {
                return Ok(None);
            }
            let request = SampleRequest {
                course: &params.course,
                race: &params.race,
                runner: &mut runner,
                pacer: params.pacer.as_ref(),
                options: &params.options,
                candidate,
                samples: batch.sample_count,
                seed: sample_seed(params.options.seed, batch.stage, candidate),
                include_trace: batch.include_trace,
            };
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                self.simulator.run_samples(request)
            }))
            .map_err(|payload| SimulationError::Panicked {
                candidate: candidate.clone(),
                message: panic_message(payload.as_ref()),
            })?;
            let partial = outcome?;
            trace!(
                worker_id = self.worker_id,
                candidate = %candidate,
                samples = partial.sample_count,
                "candidate simulated"
            );
            results.insert(candidate.clone(), partial);
        }
        Ok(Some(results))
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
