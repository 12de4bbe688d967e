use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use skill_basin::config::SchedulerConfig;
use skill_basin::error::{SchedulerError, SimulationError};
use skill_basin::optimizer::run_staged;
use skill_basin::parallel::{PoolCallbacks, PoolManager, Progress, RunMetrics};
use skill_basin::sim::{RaceSimulator, SampleRequest, SimulationParams, SyntheticRaceSimulator};
use skill_basin::stats::{CandidateId, FilterReason, PartialResult, ResultSet};

/// Outcome picked by id prefix: `neg-` never clears the effect threshold,
/// `flat-` clears it with no spread, anything else alternates 0.0 and 1.0.
struct ScriptedSimulator {
    /// Candidate whose first evaluation fails, and how.
    fail_once: Option<(&'static str, FailMode)>,
    tripped: AtomicBool,
    always_fail: bool,
    /// Candidate that fails on every evaluation.
    broken: Option<&'static str>,
    delay: Duration,
    calls: AtomicUsize,
}

#[derive(Clone, Copy)]
enum FailMode {
    Error,
    Panic,
}

impl ScriptedSimulator {
    fn new() -> Self {
        Self {
            fail_once: None,
            tripped: AtomicBool::new(false),
            always_fail: false,
            broken: None,
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        }
    }

    fn failing_once(candidate: &'static str, mode: FailMode) -> Self {
        Self {
            fail_once: Some((candidate, mode)),
            ..Self::new()
        }
    }

    fn slow(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::new()
        }
    }
}

impl RaceSimulator for ScriptedSimulator {
    fn run_samples(&self, request: SampleRequest<'_>) -> Result<PartialResult, SimulationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        if self.always_fail || self.broken == Some(request.candidate) {
            return Err(SimulationError::failed(request.candidate, "engine offline"));
        }
        if let Some((target, mode)) = self.fail_once {
            if request.candidate == target && !self.tripped.swap(true, Ordering::SeqCst) {
                match mode {
                    FailMode::Error => {
                        return Err(SimulationError::failed(request.candidate, "transient fault"))
                    }
                    FailMode::Panic => panic!("transient fault"),
                }
            }
        }

        let samples = if request.candidate.starts_with("neg-") {
            vec![0.05; request.samples]
        } else if request.candidate.starts_with("flat-") {
            vec![0.5; request.samples]
        } else {
            (0..request.samples).map(|i| (i % 2) as f64).collect()
        };
        Ok(PartialResult::from_samples(samples))
    }
}

fn scripted_candidates() -> Vec<CandidateId> {
    let mut ids = Vec::new();
    ids.extend((0..3).map(|i| format!("neg-{i}")));
    ids.extend((0..2).map(|i| format!("flat-{i}")));
    ids.extend((0..7).map(|i| format!("full-{i}")));
    ids
}

#[derive(Default)]
struct Recorded {
    progress: Vec<Progress>,
    stages: Vec<(u8, usize)>,
    errors: Vec<SchedulerError>,
    completed: Vec<(ResultSet, RunMetrics)>,
}

fn recording_callbacks(log: &Arc<Mutex<Recorded>>) -> PoolCallbacks {
    let (p, s, e, c) = (log.clone(), log.clone(), log.clone(), log.clone());
    PoolCallbacks::new()
        .on_progress(move |_, progress| p.lock().unwrap().progress.push(progress))
        .on_stage_complete(move |stage, results, _| {
            s.lock().unwrap().stages.push((stage, results.len()))
        })
        .on_error(move |err| e.lock().unwrap().errors.push(err))
        .on_complete(move |results, metrics| c.lock().unwrap().completed.push((results, metrics)))
}

fn assert_scripted_funnel(results: &ResultSet) {
    assert_eq!(results.len(), 12);
    for (id, result) in results {
        if id.starts_with("neg-") {
            assert_eq!(result.sample_count, 5, "{id}");
            assert_eq!(result.filter_reason, Some(FilterReason::NegligibleEffect));
        } else if id.starts_with("flat-") {
            assert_eq!(result.sample_count, 25, "{id}");
            assert_eq!(result.filter_reason, Some(FilterReason::LowVariance));
        } else {
            assert_eq!(result.sample_count, 275, "{id}");
            assert_eq!(result.filter_reason, None);
            assert_eq!(result.samples.len(), 275);
        }
    }
}

#[test]
fn twelve_candidates_on_two_units_follow_the_funnel() {
    let manager = PoolManager::new(
        Arc::new(ScriptedSimulator::new()),
        SchedulerConfig::default().with_pool_size(2),
    );
    let log = Arc::new(Mutex::new(Recorded::default()));
    manager
        .run(scripted_candidates(), SimulationParams::default(), recording_callbacks(&log))
        .unwrap();
    manager.wait();

    let log = log.lock().unwrap();
    assert!(log.errors.is_empty());
    assert_eq!(log.completed.len(), 1);
    let (results, metrics) = &log.completed[0];
    assert_scripted_funnel(results);
    assert_eq!(metrics.total_samples_run, 3 * 5 + 2 * 25 + 7 * 275);
    assert_eq!(metrics.unit_count, 2);
    assert_eq!(metrics.candidates_processed, 12);
    assert_eq!(metrics.failed_units, 0);

    let stages: Vec<u8> = log.stages.iter().map(|(stage, _)| *stage).collect();
    assert_eq!(stages, vec![1, 2, 3, 4]);

    let last_of_stage: Vec<Progress> = log
        .progress
        .windows(2)
        .filter(|w| w[0].stage != w[1].stage)
        .map(|w| w[0])
        .chain(log.progress.last().copied())
        .collect();
    let totals: Vec<usize> = last_of_stage.iter().map(|p| p.total).collect();
    assert_eq!(totals, vec![12, 9, 7, 7]);
    assert!(last_of_stage.iter().all(|p| p.processed == p.total));
    assert!(!manager.is_running());
}

#[test]
fn failed_unit_is_replaced_by_reassigning_its_batch() {
    let manager = PoolManager::new(
        Arc::new(ScriptedSimulator::failing_once("full-3", FailMode::Error)),
        SchedulerConfig::default().with_pool_size(4),
    );
    let log = Arc::new(Mutex::new(Recorded::default()));
    manager
        .run(scripted_candidates(), SimulationParams::default(), recording_callbacks(&log))
        .unwrap();
    manager.wait();

    let log = log.lock().unwrap();
    assert_eq!(log.errors.len(), 1);
    assert!(matches!(log.errors[0], SchedulerError::UnitCrashed { .. }));
    assert_eq!(log.completed.len(), 1);
    let (results, metrics) = &log.completed[0];
    assert_scripted_funnel(results);
    assert_eq!(metrics.failed_units, 1);
}

#[test]
fn panicking_simulator_counts_as_a_unit_crash() {
    let outcome = run_staged(
        Arc::new(ScriptedSimulator::failing_once("neg-1", FailMode::Panic)),
        SchedulerConfig::default().with_pool_size(3),
        scripted_candidates(),
        SimulationParams::default(),
    )
    .unwrap();

    assert_eq!(outcome.errors.len(), 1);
    match &outcome.errors[0] {
        SchedulerError::UnitCrashed { message, .. } => assert!(message.contains("transient fault")),
        other => panic!("unexpected error {other:?}"),
    }
    assert_scripted_funnel(&outcome.results);
}

#[test]
fn losing_every_unit_exhausts_the_pool() {
    let simulator = ScriptedSimulator {
        always_fail: true,
        ..ScriptedSimulator::new()
    };
    let manager = PoolManager::new(Arc::new(simulator), SchedulerConfig::default().with_pool_size(2));
    let log = Arc::new(Mutex::new(Recorded::default()));
    manager
        .run(scripted_candidates(), SimulationParams::default(), recording_callbacks(&log))
        .unwrap();
    manager.wait();

    let log = log.lock().unwrap();
    assert!(log.completed.is_empty());
    let crashes = log
        .errors
        .iter()
        .filter(|e| matches!(e, SchedulerError::UnitCrashed { .. }))
        .count();
    assert_eq!(crashes, 2);
    assert!(matches!(
        log.errors.last(),
        Some(SchedulerError::PoolExhausted { remaining }) if *remaining > 0
    ));
    assert!(!manager.is_running());
}

#[test]
fn candidate_that_always_fails_is_retired_after_one_retry() {
    let simulator = ScriptedSimulator {
        broken: Some("full-broken"),
        ..ScriptedSimulator::new()
    };
    let mut candidates: Vec<CandidateId> = (0..19).map(|i| format!("full-{i:02}")).collect();
    candidates.insert(7, "full-broken".to_string());
    let manager = PoolManager::new(Arc::new(simulator), SchedulerConfig::default().with_pool_size(4));
    let log = Arc::new(Mutex::new(Recorded::default()));
    manager
        .run(candidates, SimulationParams::default(), recording_callbacks(&log))
        .unwrap();
    manager.wait();

    let log = log.lock().unwrap();
    assert_eq!(log.errors.len(), 2);
    assert!(log
        .errors
        .iter()
        .all(|e| matches!(e, SchedulerError::UnitCrashed { .. })));
    assert_eq!(log.completed.len(), 1);

    let (results, metrics) = &log.completed[0];
    assert_eq!(results.len(), 20);
    assert_eq!(metrics.failed_units, 2);
    let broken = &results["full-broken"];
    assert_eq!(broken.filter_reason, Some(FilterReason::SimulationFailed));
    assert_eq!(broken.sample_count, 0);
    let survivors = results
        .values()
        .filter(|r| r.filter_reason.is_none())
        .count();
    assert_eq!(survivors, 19);
    assert!(results
        .iter()
        .filter(|(id, _)| id.as_str() != "full-broken")
        .all(|(_, r)| r.sample_count == 275));
    assert!(!manager.is_running());
}

#[test]
fn second_run_is_rejected_while_active() {
    let manager = PoolManager::new(
        Arc::new(ScriptedSimulator::slow(Duration::from_millis(5))),
        SchedulerConfig::default().with_pool_size(2),
    );
    let log = Arc::new(Mutex::new(Recorded::default()));
    manager
        .run(scripted_candidates(), SimulationParams::default(), recording_callbacks(&log))
        .unwrap();
    assert!(manager.is_running());

    let second = manager.run(
        vec!["other".into()],
        SimulationParams::default(),
        PoolCallbacks::new(),
    );
    assert_eq!(second, Err(SchedulerError::AlreadyRunning));
    assert!(manager.is_running());

    manager.wait();
    let log = log.lock().unwrap();
    assert_eq!(log.completed.len(), 1);
    assert_eq!(log.completed[0].0.len(), 12);
}

#[test]
fn cancel_is_immediate_idempotent_and_silent() {
    let simulator = Arc::new(ScriptedSimulator::slow(Duration::from_millis(10)));
    let manager = PoolManager::new(simulator.clone(), SchedulerConfig::default().with_pool_size(2));
    let log = Arc::new(Mutex::new(Recorded::default()));
    let candidates: Vec<CandidateId> = (0..60).map(|i| format!("full-{i}")).collect();
    manager
        .run(candidates, SimulationParams::default(), recording_callbacks(&log))
        .unwrap();

    std::thread::sleep(Duration::from_millis(30));
    manager.cancel();
    assert!(!manager.is_running());
    manager.cancel();
    manager.wait();

    let seen = {
        let log = log.lock().unwrap();
        assert!(log.completed.is_empty());
        assert!(log.errors.is_empty());
        log.progress.len()
    };
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(log.lock().unwrap().progress.len(), seen);
    assert!(simulator.calls.load(Ordering::SeqCst) < 60 * 4);

    // the manager is reusable after a cancel
    let done = Arc::new(AtomicBool::new(false));
    let flag = done.clone();
    manager
        .run(
            vec!["full-a".into()],
            SimulationParams::default(),
            PoolCallbacks::new().on_complete(move |_, _| flag.store(true, Ordering::SeqCst)),
        )
        .unwrap();
    manager.wait();
    assert!(done.load(Ordering::SeqCst));
}

#[test]
fn empty_run_completes_without_work() {
    let simulator = Arc::new(ScriptedSimulator::new());
    let outcome = run_staged(
        simulator.clone(),
        SchedulerConfig::default().with_pool_size(2),
        Vec::new(),
        SimulationParams::default(),
    )
    .unwrap();
    assert!(outcome.results.is_empty());
    assert_eq!(outcome.metrics.total_samples_run, 0);
    assert_eq!(simulator.calls.load(Ordering::SeqCst), 0);
}

#[test]
fn synthetic_run_is_complete_and_monotonic() {
    let candidates: Vec<CandidateId> = (0..40).map(|i| format!("skill-{i:03}")).collect();
    let manager = PoolManager::new(
        Arc::new(SyntheticRaceSimulator::new()),
        SchedulerConfig::default().with_pool_size(4),
    );
    let log = Arc::new(Mutex::new(Recorded::default()));
    manager
        .run(candidates.clone(), SimulationParams::default(), recording_callbacks(&log))
        .unwrap();
    manager.wait();

    let log = log.lock().unwrap();
    let (results, _) = &log.completed[0];
    let ids: HashSet<&CandidateId> = results.keys().collect();
    assert_eq!(ids, candidates.iter().collect());

    for result in results.values() {
        match result.filter_reason {
            Some(FilterReason::NegligibleEffect) => assert_eq!(result.sample_count, 5),
            Some(FilterReason::LowVariance) => assert_eq!(result.sample_count, 25),
            Some(FilterReason::SimulationFailed) => panic!("synthetic engine never fails"),
            None => {
                assert_eq!(result.sample_count, 275);
                assert!(result.min_run.is_some());
                assert!(result.max_run.is_some());
            }
        }
        assert!(result.samples.windows(2).all(|w| w[0] <= w[1]));
    }

    let mut by_stage: Vec<usize> = Vec::new();
    for progress in &log.progress {
        let stage = usize::from(progress.stage);
        if by_stage.len() < stage {
            by_stage.push(progress.total);
        }
    }
    assert!(by_stage.windows(2).all(|w| w[1] <= w[0]));
}

#[test]
fn results_do_not_depend_on_pool_size() {
    let candidates: Vec<CandidateId> = (0..25).map(|i| format!("skill-{i:03}")).collect();
    let mut params = SimulationParams::default();
    params.options.seed = 99;
    let run = |units| {
        run_staged(
            Arc::new(SyntheticRaceSimulator::new()),
            SchedulerConfig::default().with_pool_size(units),
            candidates.clone(),
            params.clone(),
        )
        .unwrap()
        .results
    };
    let narrow = run(2);
    let wide = run(6);
    for (id, a) in &narrow {
        let b = &wide[id];
        assert_eq!(a.sample_count, b.sample_count);
        assert_eq!(a.samples, b.samples);
        assert_eq!(a.filter_reason, b.filter_reason);
    }
}
