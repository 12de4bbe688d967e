//! Error types shared by the scheduler, the execution units and config loading.

use std::path::PathBuf;

/// Failure reported by a [crate::sim::RaceSimulator] for one candidate.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SimulationError {
    #[error("execution unit received a batch before init")]
    NotInitialized,
    #[error("simulation of '{candidate}' failed: {message}")]
    Failed { candidate: String, message: String },
    #[error("simulation of '{candidate}' panicked: {message}")]
    Panicked { candidate: String, message: String },
}

impl SimulationError {
    /// Candidate being simulated when the error happened, if any.
    pub fn candidate(&self) -> Option<&str> {
        match self {
            Self::NotInitialized => None,
            Self::Failed { candidate, .. } | Self::Panicked { candidate, .. } => Some(candidate),
        }
    }

    pub fn failed(candidate: &str, message: impl Into<String>) -> Self {
        Self::Failed {
            candidate: candidate.to_string(),
            message: message.into(),
        }
    }
}

/// Errors surfaced by [crate::parallel::PoolManager] either as a `run` return value
/// or through the `on_error` callback.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SchedulerError {
    #[error("simulation already running")]
    AlreadyRunning,
    #[error("invalid scheduler config: {0}")]
    InvalidConfig(String),
    #[error("execution unit {worker_id} crashed: {message}")]
    UnitCrashed { worker_id: usize, message: String },
    #[error("all execution units terminated with {remaining} candidate(s) still pending")]
    PoolExhausted { remaining: usize },
    #[error("failed to start execution units: {0}")]
    Spawn(String),
    #[error("run cancelled")]
    Cancelled,
}

/// Config file loading and validation failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {message}")]
    Parse { path: PathBuf, message: String },
    #[error("invalid scheduler config: {0}")]
    Invalid(String),
}
