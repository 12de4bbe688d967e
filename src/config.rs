//! Scheduler configuration: pool sizing, batch sizing and the stage plan.
//!
//! Loaded from YAML or JSON (by extension) at [DEFAULT_CONFIG_PATH] unless
//! `SKILL_BASIN_CONFIG` points elsewhere. A missing file means defaults; a file
//! that exists but does not parse or validate is an error.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::ConfigError;
use crate::optimizer::tiered::ScheduleConfig;
use crate::parallel::batch::{BATCHES_PER_UNIT, MIN_BATCH_SIZE};

pub const DEFAULT_CONFIG_PATH: &str = "config/scheduler.yaml";
pub const CONFIG_PATH_ENV: &str = "SKILL_BASIN_CONFIG";
pub const POOL_SIZE_ENV: &str = "SKILL_BASIN_POOL_SIZE";

pub const MIN_POOL_SIZE: usize = 2;
pub const MAX_POOL_SIZE: usize = 16;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Requested unit count; `None` uses the machine's parallelism. Always
    /// clamped to `[MIN_POOL_SIZE, MAX_POOL_SIZE]`.
    pub pool_size: Option<usize>,
    pub min_batch_size: usize,
    pub batches_per_unit: usize,
    pub schedule: ScheduleConfig,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            pool_size: None,
            min_batch_size: MIN_BATCH_SIZE,
            batches_per_unit: BATCHES_PER_UNIT,
            schedule: ScheduleConfig::default(),
        }
    }
}

impl SchedulerConfig {
    pub fn with_pool_size(mut self, pool_size: usize) -> Self {
        self.pool_size = Some(pool_size);
        self
    }

    pub fn with_schedule(mut self, schedule: ScheduleConfig) -> Self {
        self.schedule = schedule;
        self
    }

    pub fn resolved_pool_size(&self) -> usize {
        let requested = self.pool_size.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4)
        });
        requested.clamp(MIN_POOL_SIZE, MAX_POOL_SIZE)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batches_per_unit == 0 {
            return Err(ConfigError::Invalid("batches_per_unit must be at least 1".into()));
        }
        if self.min_batch_size == 0 {
            return Err(ConfigError::Invalid("min_batch_size must be at least 1".into()));
        }
        self.schedule.validate()
    }

    /// Apply `SKILL_BASIN_POOL_SIZE` if set. Unparseable values are ignored with a warning.
    pub fn apply_env_overrides(mut self) -> Self {
        if let Ok(raw) = env::var(POOL_SIZE_ENV) {
            match raw.trim().parse::<usize>() {
                Ok(n) => self.pool_size = Some(n),
                Err(_) => warn!(value = %raw, "ignoring invalid {POOL_SIZE_ENV}"),
            }
        }
        self
    }
}

/// Config path from the environment, falling back to [DEFAULT_CONFIG_PATH].
pub fn config_path_from_env() -> PathBuf {
    env::var(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH))
}

/// Parse and validate a config file. `.json` is read as JSON, anything else as YAML.
pub fn load_config(path: &Path) -> Result<SchedulerConfig, ConfigError> {
    let raw = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let is_json = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
    let config: SchedulerConfig = if is_json {
        serde_json::from_str(&raw).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?
    } else {
        serde_yaml::from_str(&raw).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?
    };
    config.validate()?;
    debug!(path = %path.display(), "scheduler config loaded");
    Ok(config)
}

/// Like [load_config] but a missing file yields defaults. Env overrides are applied last.
pub fn load_config_or_default(path: &Path) -> Result<SchedulerConfig, ConfigError> {
    let config = if path.exists() {
        load_config(path)?
    } else {
        debug!(path = %path.display(), "no scheduler config, using defaults");
        SchedulerConfig::default()
    };
    Ok(config.apply_env_overrides())
}
