use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;

use crate::config::{config_path_from_env, load_config, load_config_or_default, SchedulerConfig};
use crate::optimizer::ranking::RankedCandidate;
use crate::optimizer::run_staged_with_progress;
use crate::optimizer::tiered::ScheduleConfig;
use crate::parallel::RunMetrics;
use crate::sim::{SimulationParams, SyntheticRaceSimulator};
use crate::stats::{write_results_csv, CandidateId};

const USAGE: &str = "usage: skill-basin <run|stages|validate-config>";
const RUN_USAGE: &str =
    "usage: skill-basin run <count|candidates-file> [--config path] [--params path] [--seed n] [--pool-size n] [--csv path]";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Run,
    Stages,
    ValidateConfig,
}

pub fn parse_command(args: &[String]) -> Option<Command> {
    match args.get(1).map(String::as_str) {
        Some("run") => Some(Command::Run),
        Some("stages") => Some(Command::Stages),
        Some("validate-config") => Some(Command::ValidateConfig),
        _ => None,
    }
}

pub fn run_with_args(args: &[String]) -> i32 {
    match parse_command(args) {
        Some(Command::Run) => handle_run(args),
        Some(Command::Stages) => handle_stages(args),
        Some(Command::ValidateConfig) => handle_validate_config(args),
        None => {
            eprintln!("{USAGE}");
            2
        }
    }
}

#[derive(Debug, Serialize)]
struct RunReport {
    metrics: RunMetrics,
    recovered_errors: Vec<String>,
    ranked: Vec<RankedCandidate>,
}

fn handle_run(args: &[String]) -> i32 {
    let Some(source) = args.get(2).filter(|arg| !arg.starts_with("--")) else {
        eprintln!("{RUN_USAGE}");
        return 2;
    };

    let candidates = match load_candidates(source) {
        Ok(candidates) => candidates,
        Err(err) => {
            eprintln!("failed to load candidates: {err}");
            return 1;
        }
    };

    let config_path = flag_value(args, "--config")
        .map(PathBuf::from)
        .unwrap_or_else(config_path_from_env);
    let mut config = match load_config_or_default(&config_path) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("{err}");
            return 1;
        }
    };
    if let Some(raw) = flag_value(args, "--pool-size") {
        match raw.parse::<usize>() {
            Ok(n) => config = config.with_pool_size(n),
            Err(_) => eprintln!("invalid pool size '{raw}', ignoring"),
        }
    }

    let mut params = match flag_value(args, "--params") {
        Some(path) => match load_params(Path::new(path)) {
            Ok(params) => params,
            Err(err) => {
                eprintln!("failed to load params: {err}");
                return 1;
            }
        },
        None => SimulationParams::default(),
    };
    params.options.seed = parse_u64_arg(flag_value(args, "--seed"), "seed", params.options.seed);

    let outcome = match run_staged_with_progress(
        Arc::new(SyntheticRaceSimulator::new()),
        config,
        candidates,
        params,
        |stage, active| eprintln!("stage {stage} complete: {active} candidate(s) evaluated"),
    ) {
        Ok(outcome) => outcome,
        Err(err) => {
            eprintln!("run failed: {err}");
            return 1;
        }
    };

    if let Some(path) = flag_value(args, "--csv") {
        let written = fs::File::create(path)
            .map_err(csv::Error::from)
            .and_then(|file| write_results_csv(&outcome.results, file));
        if let Err(err) = written {
            eprintln!("failed to write csv '{path}': {err}");
            return 1;
        }
    }

    let report = RunReport {
        ranked: outcome.ranked(),
        recovered_errors: outcome.errors.iter().map(ToString::to_string).collect(),
        metrics: outcome.metrics,
    };
    match serde_json::to_string_pretty(&report) {
        Ok(payload) => {
            println!("{payload}");
            0
        }
        Err(err) => {
            eprintln!("failed to serialize run result: {err}");
            1
        }
    }
}

fn handle_stages(args: &[String]) -> i32 {
    let plan = match args.get(2) {
        Some(raw) => match raw.parse::<usize>() {
            Ok(count) => ScheduleConfig::for_candidate_count(count),
            Err(_) => {
                eprintln!("usage: skill-basin stages [candidate-count]");
                return 2;
            }
        },
        None => ScheduleConfig::default(),
    };

    match serde_json::to_string_pretty(&plan) {
        Ok(payload) => {
            println!("{payload}");
            0
        }
        Err(err) => {
            eprintln!("failed to serialize stage plan: {err}");
            1
        }
    }
}

fn handle_validate_config(args: &[String]) -> i32 {
    let Some(path) = args.get(2) else {
        eprintln!("usage: skill-basin validate-config <path>");
        return 2;
    };

    match load_config(Path::new(path)) {
        Ok(config) => {
            println!("{}", describe_config(path, &config));
            0
        }
        Err(err) => {
            eprintln!("validation failed: {err}");
            1
        }
    }
}

fn describe_config(path: &str, config: &SchedulerConfig) -> String {
    let samples: Vec<String> = config
        .schedule
        .stages
        .iter()
        .map(|stage| stage.sample_count.to_string())
        .collect();
    format!(
        "config valid: {path} (units={}, stages={}, filters={})",
        config.resolved_pool_size(),
        samples.join("/"),
        config.schedule.filters.rules.len()
    )
}

/// A bare number generates that many ids; anything else is read as a file
/// with one id per line. Blank lines and `#` comments are skipped.
fn load_candidates(source: &str) -> Result<Vec<CandidateId>, String> {
    if let Ok(count) = source.parse::<usize>() {
        return Ok((0..count).map(|i| format!("skill-{i:04}")).collect());
    }
    let raw = fs::read_to_string(source).map_err(|err| format!("{source}: {err}"))?;
    Ok(raw
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect())
}

fn load_params(path: &Path) -> Result<SimulationParams, String> {
    let raw = fs::read_to_string(path).map_err(|err| format!("{}: {err}", path.display()))?;
    serde_json::from_str(&raw).map_err(|err| format!("{}: {err}", path.display()))
}

fn flag_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.iter()
        .position(|arg| arg == flag)
        .and_then(|index| args.get(index + 1))
        .map(String::as_str)
}

fn parse_u64_arg(raw: Option<&str>, name: &str, default: u64) -> u64 {
    raw.and_then(|value| value.parse::<u64>().ok())
        .unwrap_or_else(|| {
            if let Some(value) = raw {
                eprintln!("invalid {name} '{value}', defaulting to {default}");
            }
            default
        })
}
