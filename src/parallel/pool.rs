//! Pool manager: a fixed set of execution units fed by a pull protocol.
//!
//! Units run on a dedicated Rayon thread pool, one long-lived job per unit, and
//! talk to a coordinator thread over crossbeam channels. The coordinator owns
//! the [WorkQueue]; it hands a unit at most one batch at a time, re-feeds it
//! when the batch comes back, and advances the stage once the queue reports the
//! barrier reached. Callbacks run on the coordinator thread.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::Instant;

use crossbeam_channel::{bounded, select, unbounded, Receiver, Sender};
use rayon::ThreadPoolBuilder;
use serde::Serialize;
use tracing::{debug, error, info, info_span, warn};
use uuid::Uuid;

use crate::config::SchedulerConfig;
use crate::error::{ConfigError, SchedulerError};
use crate::parallel::batch::batch_size_for;
use crate::parallel::protocol::{UnitState, WorkerId, WorkerInMessage, WorkerOutMessage};
use crate::parallel::queue::{Progress, WorkQueue};
use crate::parallel::unit::ExecutionUnit;
use crate::sim::{RaceSimulator, SimulationParams};
use crate::stats::{CandidateId, ResultSet};

type ProgressFn = Box<dyn FnMut(&ResultSet, Progress) + Send>;
type StageCompleteFn = Box<dyn FnMut(u8, &ResultSet, Progress) + Send>;
type CompleteFn = Box<dyn FnOnce(ResultSet, RunMetrics) + Send>;
type ErrorFn = Box<dyn FnMut(SchedulerError) + Send>;

/// Observers for one run. Every callback is optional.
#[derive(Default)]
pub struct PoolCallbacks {
    on_progress: Option<ProgressFn>,
    on_stage_complete: Option<StageCompleteFn>,
    on_complete: Option<CompleteFn>,
    on_error: Option<ErrorFn>,
}

impl PoolCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fires after every merged batch.
    pub fn on_progress<F>(mut self, f: F) -> Self
    where
        F: FnMut(&ResultSet, Progress) + Send + 'static,
    {
        self.on_progress = Some(Box::new(f));
        self
    }

    /// Fires once per stage boundary, before the stage filter runs.
    pub fn on_stage_complete<F>(mut self, f: F) -> Self
    where
        F: FnMut(u8, &ResultSet, Progress) + Send + 'static,
    {
        self.on_stage_complete = Some(Box::new(f));
        self
    }

    /// Fires exactly once when the last stage finishes.
    pub fn on_complete<F>(mut self, f: F) -> Self
    where
        F: FnOnce(ResultSet, RunMetrics) + Send + 'static,
    {
        self.on_complete = Some(Box::new(f));
        self
    }

    /// Unit crashes and pool exhaustion. Unit crashes do not end the run.
    pub fn on_error<F>(mut self, f: F) -> Self
    where
        F: FnMut(SchedulerError) + Send + 'static,
    {
        self.on_error = Some(Box::new(f));
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunMetrics {
    pub run_id: Uuid,
    pub elapsed_ms: u64,
    pub total_samples_run: usize,
    pub unit_count: usize,
    pub candidates_processed: usize,
    pub failed_units: usize,
}

struct RunHandle {
    run_id: Uuid,
    generation: u64,
    cancelled: Arc<AtomicBool>,
    cancel_tx: Sender<()>,
    coordinator: Option<JoinHandle<()>>,
}

/// Runs staged candidate evaluations on a fixed pool of execution units.
/// One run at a time; `run` returns immediately and results arrive through
/// [PoolCallbacks].
pub struct PoolManager {
    simulator: Arc<dyn RaceSimulator>,
    config: SchedulerConfig,
    pool_size: usize,
    /// Generation of the active run, 0 when idle.
    active_run: Arc<AtomicU64>,
    generations: AtomicU64,
    current: Mutex<Option<RunHandle>>,
}

impl PoolManager {
    pub fn new(simulator: Arc<dyn RaceSimulator>, config: SchedulerConfig) -> Self {
        let pool_size = config.resolved_pool_size();
        Self {
            simulator,
            config,
            pool_size,
            active_run: Arc::new(AtomicU64::new(0)),
            generations: AtomicU64::new(0),
            current: Mutex::new(None),
        }
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    pub fn is_running(&self) -> bool {
        self.active_run.load(Ordering::SeqCst) != 0
    }

    /// Start a run. Fails with [SchedulerError::InvalidConfig] if the config
    /// does not validate, and with [SchedulerError::AlreadyRunning] while another
    /// run is active; the active run is left untouched.
    pub fn run(
        &self,
        candidates: Vec<CandidateId>,
        params: SimulationParams,
        callbacks: PoolCallbacks,
    ) -> Result<Uuid, SchedulerError> {
        self.config.validate().map_err(|err| match err {
            ConfigError::Invalid(message) => SchedulerError::InvalidConfig(message),
            other => SchedulerError::InvalidConfig(other.to_string()),
        })?;

        let generation = self.generations.fetch_add(1, Ordering::SeqCst) + 1;
        if self
            .active_run
            .compare_exchange(0, generation, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            warn!("rejecting run: simulation already running");
            return Err(SchedulerError::AlreadyRunning);
        }

        match self.start(generation, candidates, params, callbacks) {
            Ok(run_id) => Ok(run_id),
            Err(err) => {
                let _ = self.active_run.compare_exchange(
                    generation,
                    0,
                    Ordering::SeqCst,
                    Ordering::SeqCst,
                );
                Err(err)
            }
        }
    }

    fn start(
        &self,
        generation: u64,
        candidates: Vec<CandidateId>,
        params: SimulationParams,
        callbacks: PoolCallbacks,
    ) -> Result<Uuid, SchedulerError> {
        let run_id = Uuid::new_v4();
        let batch_size = batch_size_for(
            candidates.len(),
            self.pool_size,
            self.config.min_batch_size,
            self.config.batches_per_unit,
        );
        let queue = WorkQueue::new(candidates, batch_size, self.config.schedule.clone());
        let candidate_count = queue.active_candidates().len();

        let threads = ThreadPoolBuilder::new()
            .num_threads(self.pool_size)
            .thread_name(|i| format!("pool-worker-{i}"))
            .build()
            .map_err(|e| SchedulerError::Spawn(e.to_string()))?;

        let (out_tx, out_rx) = unbounded::<WorkerOutMessage>();
        let params = Arc::new(params);
        let mut units = Vec::with_capacity(self.pool_size);
        for worker_id in 0..self.pool_size {
            let (in_tx, in_rx) = unbounded::<WorkerInMessage>();
            let unit = ExecutionUnit::new(worker_id, Arc::clone(&self.simulator));
            let outbox = out_tx.clone();
            threads.spawn(move || unit.run(in_rx, outbox));
            let _ = in_tx.send(WorkerInMessage::Init {
                worker_id,
                params: Arc::clone(&params),
            });
            units.push(UnitSlot {
                inbox: in_tx,
                state: UnitState::Idle,
            });
        }
        drop(out_tx);

        let (cancel_tx, cancel_rx) = bounded::<()>(1);
        let cancelled = Arc::new(AtomicBool::new(false));
        let coordinator = Coordinator {
            run_id,
            generation,
            queue,
            units,
            callbacks,
            active_run: Arc::clone(&self.active_run),
            cancelled: Arc::clone(&cancelled),
            started: Instant::now(),
            failed_units: 0,
            candidate_count,
            _threads: threads,
        };

        info!(
            %run_id,
            candidates = candidate_count,
            units = self.pool_size,
            batch_size,
            "starting staged run"
        );
        let handle = std::thread::Builder::new()
            .name("pool-coordinator".to_string())
            .spawn(move || coordinator.run(out_rx, cancel_rx))
            .map_err(|e| SchedulerError::Spawn(e.to_string()))?;

        *self.lock_current() = Some(RunHandle {
            run_id,
            generation,
            cancelled,
            cancel_tx,
            coordinator: Some(handle),
        });
        Ok(run_id)
    }

    /// Stop the active run immediately. In-flight batches are discarded and no
    /// further callbacks fire. Safe to call repeatedly or with nothing running.
    pub fn cancel(&self) {
        let current = self.lock_current();
        let Some(run) = current.as_ref() else {
            return;
        };
        if run.cancelled.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = run.cancel_tx.try_send(());
        let _ = self.active_run.compare_exchange(
            run.generation,
            0,
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
        info!(run_id = %run.run_id, "run cancelled");
    }

    /// Block until the most recent run's coordinator has exited.
    pub fn wait(&self) {
        let handle = self
            .lock_current()
            .as_mut()
            .and_then(|run| run.coordinator.take());
        if let Some(handle) = handle {
            if handle.join().is_err() {
                error!("pool coordinator panicked");
            }
        }
    }

    fn lock_current(&self) -> MutexGuard<'_, Option<RunHandle>> {
        self.current
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

struct UnitSlot {
    inbox: Sender<WorkerInMessage>,
    state: UnitState,
}

enum Flow {
    Continue,
    Finished,
}

struct Coordinator {
    run_id: Uuid,
    generation: u64,
    queue: WorkQueue,
    units: Vec<UnitSlot>,
    callbacks: PoolCallbacks,
    active_run: Arc<AtomicU64>,
    cancelled: Arc<AtomicBool>,
    started: Instant,
    failed_units: usize,
    candidate_count: usize,
    _threads: rayon::ThreadPool,
}

impl Coordinator {
    fn run(mut self, events: Receiver<WorkerOutMessage>, cancel: Receiver<()>) {
        let span = info_span!("staged_run", run_id = %self.run_id);
        let _entered = span.enter();

        // Init is always ahead of any batch in a unit's inbox, so work can go
        // out before the ready replies arrive.
        if matches!(self.settle(), Flow::Finished) {
            return;
        }
        loop {
            let flow = select! {
                recv(cancel) -> _ => Flow::Finished,
                recv(events) -> message => match message {
                    Ok(message) => self.handle(message),
                    Err(_) => self.exhausted(),
                },
            };
            if matches!(flow, Flow::Finished) || self.is_cancelled() {
                break;
            }
        }
    }

    fn handle(&mut self, message: WorkerOutMessage) -> Flow {
        let worker_id = message.worker_id();
        if worker_id >= self.units.len() {
            warn!(worker_id, "message from unknown unit");
            return Flow::Continue;
        }
        match message {
            WorkerOutMessage::WorkerReady { worker_id } => {
                debug!(worker_id, "unit ready");
                self.settle()
            }
            WorkerOutMessage::BatchComplete {
                worker_id,
                batch_id,
                results,
            } => {
                let applied = self.queue.complete_batch(batch_id, results);
                if self.units[worker_id].state.is_live() {
                    self.units[worker_id].state = UnitState::Idle;
                }
                if applied {
                    self.emit_progress();
                }
                if self.queue.is_stage_complete() {
                    self.settle()
                } else {
                    self.assign(worker_id);
                    Flow::Continue
                }
            }
            WorkerOutMessage::WorkerError {
                worker_id,
                error,
                candidate,
            } => {
                self.unit_failed(worker_id, error, candidate.as_deref());
                if self.live_units() == 0 {
                    return self.exhausted();
                }
                self.settle()
            }
        }
    }

    /// Advance through every completed stage, then feed idle units.
    fn settle(&mut self) -> Flow {
        while self.queue.is_stage_complete() {
            let stage = self.queue.stage_number();
            let progress = self.queue.progress();
            self.emit_stage_complete(stage, progress);
            if !self.queue.advance_stage() {
                self.finish();
                return Flow::Finished;
            }
        }
        self.dispatch_idle();
        Flow::Continue
    }

    fn dispatch_idle(&mut self) {
        for worker_id in 0..self.units.len() {
            if self.queue.remaining_count() == 0 {
                break;
            }
            self.assign(worker_id);
        }
    }

    fn assign(&mut self, worker_id: WorkerId) {
        if !self.units[worker_id].state.is_idle() {
            return;
        }
        let Some(batch) = self.queue.next_batch() else {
            return;
        };
        let batch_id = batch.batch_id;
        debug!(worker_id, batch_id, size = batch.candidates.len(), "assigning batch");
        if self.units[worker_id]
            .inbox
            .send(WorkerInMessage::WorkBatch(batch))
            .is_err()
        {
            self.units[worker_id].state = UnitState::Busy { batch_id };
            self.unit_failed(worker_id, "unit disconnected".to_string(), None);
            return;
        }
        self.units[worker_id].state = UnitState::Busy { batch_id };
    }

    /// Terminate a unit and return its batch, if any, to the queue. A candidate
    /// that keeps taking units down is retired rather than retried.
    fn unit_failed(&mut self, worker_id: WorkerId, message: String, candidate: Option<&str>) {
        let previous = std::mem::replace(&mut self.units[worker_id].state, UnitState::Terminated);
        if previous == UnitState::Terminated {
            return;
        }
        self.failed_units += 1;
        error!(worker_id, %message, "execution unit failed");
        self.emit_error(SchedulerError::UnitCrashed { worker_id, message });

        if let UnitState::Busy { batch_id } = previous {
            if let Some(failure) = self.queue.fail_batch(batch_id, candidate) {
                warn!(
                    worker_id,
                    batch_id,
                    requeued = failure.requeued,
                    retired = ?failure.retired,
                    "reassigning batch from failed unit"
                );
            }
        }
        self.dispatch_idle();
    }

    fn live_units(&self) -> usize {
        self.units.iter().filter(|u| u.state.is_live()).count()
    }

    fn exhausted(&mut self) -> Flow {
        if !self.is_cancelled() {
            let remaining = self.queue.pending_candidates();
            error!(remaining, "no execution units left");
            self.release();
            self.emit_error(SchedulerError::PoolExhausted { remaining });
        }
        Flow::Finished
    }

    fn finish(&mut self) {
        if self.is_cancelled() {
            return;
        }
        let metrics = RunMetrics {
            run_id: self.run_id,
            elapsed_ms: self.started.elapsed().as_millis() as u64,
            total_samples_run: self.queue.total_samples(),
            unit_count: self.units.len(),
            candidates_processed: self.candidate_count,
            failed_units: self.failed_units,
        };
        info!(
            elapsed_ms = metrics.elapsed_ms,
            total_samples = metrics.total_samples_run,
            failed_units = metrics.failed_units,
            "staged run complete"
        );
        self.release();
        if let Some(on_complete) = self.callbacks.on_complete.take() {
            on_complete(self.queue.results().clone(), metrics);
        }
    }

    /// Clear the manager's running flag if it still belongs to this run.
    fn release(&self) {
        let _ = self.active_run.compare_exchange(
            self.generation,
            0,
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
    }

    fn shutdown(&mut self) {
        for unit in &mut self.units {
            if unit.state.is_live() {
                let _ = unit.inbox.send(WorkerInMessage::Terminate);
                unit.state = UnitState::Terminated;
            }
        }
        debug!("execution units terminated");
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    fn emit_progress(&mut self) {
        if self.is_cancelled() {
            return;
        }
        let progress = self.queue.progress();
        if let Some(cb) = self.callbacks.on_progress.as_mut() {
            cb(self.queue.results(), progress);
        }
    }

    fn emit_stage_complete(&mut self, stage: u8, progress: Progress) {
        if self.is_cancelled() {
            return;
        }
        info!(stage, active = self.queue.active_candidates().len(), "stage complete");
        if let Some(cb) = self.callbacks.on_stage_complete.as_mut() {
            cb(stage, self.queue.results(), progress);
        }
    }

    fn emit_error(&mut self, err: SchedulerError) {
        if self.is_cancelled() {
            return;
        }
        if let Some(cb) = self.callbacks.on_error.as_mut() {
            cb(err);
        }
    }
}

/// Terminates the units and clears the running flag however the coordinator
/// exits, including a panicking callback.
impl Drop for Coordinator {
    fn drop(&mut self) {
        if std::thread::panicking() {
            error!(run_id = %self.run_id, "pool coordinator unwinding");
        }
        self.shutdown();
        self.release();
    }
}
