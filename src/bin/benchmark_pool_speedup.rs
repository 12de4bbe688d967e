//! Run the staged scheduler with a two-unit pool and with a wider pool, then
//! print timings and speedup.
//!
//! Usage: cargo run --release --bin benchmark_pool_speedup [candidates] [units]

use std::env;
use std::sync::Arc;
use std::time::Instant;

use skill_basin::config::SchedulerConfig;
use skill_basin::optimizer::run_staged;
use skill_basin::sim::{SimulationParams, SyntheticRaceSimulator};
use skill_basin::stats::CandidateId;

fn main() {
    skill_basin::logging::init_logging_with_filter("warn");
    let args: Vec<String> = env::args().collect();
    let count = args.get(1).and_then(|v| v.parse().ok()).unwrap_or(64usize);
    let wide = args.get(2).and_then(|v| v.parse().ok()).unwrap_or(8usize);

    let candidates: Vec<CandidateId> = (0..count).map(|i| format!("skill-{i:04}")).collect();
    let simulator = Arc::new(SyntheticRaceSimulator::with_work_per_sample(2_000));
    let mut params = SimulationParams::default();
    params.options.seed = 12345;

    println!("Staged run: {count} candidates, 2 units vs {wide} units");
    println!();

    let mut timings = Vec::new();
    let mut outcomes = Vec::new();
    for units in [2, wide] {
        let t0 = Instant::now();
        let outcome = match run_staged(
            simulator.clone(),
            SchedulerConfig::default().with_pool_size(units),
            candidates.clone(),
            params.clone(),
        ) {
            Ok(outcome) => outcome,
            Err(err) => {
                eprintln!("run with {units} units failed: {err}");
                std::process::exit(1);
            }
        };
        let elapsed = t0.elapsed();
        let samples = outcome.metrics.total_samples_run;
        println!(
            "{units:>2} units:  {:.2} ms  ({:.1} samples/s)",
            elapsed.as_secs_f64() * 1000.0,
            samples as f64 / elapsed.as_secs_f64()
        );
        timings.push(elapsed.as_secs_f64());
        outcomes.push(outcome);
    }

    println!();
    println!("Speedup:   {:.2}x ({wide} units vs 2)", timings[0] / timings[1]);

    let (narrow, wide_run) = (&outcomes[0].results, &outcomes[1].results);
    assert_eq!(narrow.len(), wide_run.len());
    for (id, a) in narrow {
        let b = &wide_run[id];
        assert_eq!(a.sample_count, b.sample_count, "{id} sample count mismatch");
        assert!((a.mean - b.mean).abs() < 1e-9, "{id} mean mismatch");
    }
    println!("(Results match across pool sizes)");
}
