//! Forecast service configuration.
//!
//! Every value can be overridden through a `HERD_*` environment variable;
//! [`ForecastConfig::default`] reads them, so `from_env` and `default` agree.

use std::str::FromStr;
use std::time::Duration;

use herd_sim::ScenarioLimits;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{ForecastError, Result};

/// Global configuration of a [`crate::JobManager`]. Never mutated by a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastConfig {
    /// Worker slots shared by all jobs.
    pub max_workers: usize,
    /// Runs dispatched per batch.
    pub batch_size: usize,
    /// When false, runs execute one at a time regardless of `max_workers`.
    pub parallel_enabled: bool,
    pub max_concurrent_jobs: usize,
    pub stuck_job_timeout: Duration,
    pub watchdog_interval: Duration,
    pub heartbeat_interval: Duration,
    /// How long a finished job stays queryable in memory. The job store
    /// keeps the durable copy.
    pub job_retention: Duration,
    /// Upper bound on finished jobs kept in memory; the oldest go first.
    pub max_retained_jobs: usize,
    pub limits: ScenarioLimits,
    /// Reported in result metadata.
    pub simulation_version: String,
}

impl Default for ForecastConfig {
    fn default() -> Self {
        let workers = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        let defaults = ScenarioLimits::default();

        ForecastConfig {
            max_workers: env_or("HERD_MC_MAX_WORKERS", workers),
            batch_size: env_or("HERD_MC_BATCH_SIZE", 8),
            parallel_enabled: env_or("HERD_MC_PARALLEL", true),
            max_concurrent_jobs: env_or("HERD_MAX_CONCURRENT_JOBS", 2),
            stuck_job_timeout: Duration::from_secs(env_or("HERD_STUCK_JOB_TIMEOUT_SECS", 30 * 60)),
            watchdog_interval: Duration::from_secs(env_or("HERD_WATCHDOG_INTERVAL_SECS", 5)),
            heartbeat_interval: Duration::from_secs(env_or("HERD_HEARTBEAT_SECS", 15)),
            job_retention: Duration::from_secs(env_or("HERD_JOB_RETENTION_SECS", 60 * 60)),
            max_retained_jobs: env_or("HERD_MAX_RETAINED_JOBS", 1000),
            limits: ScenarioLimits {
                max_horizon_months: env_or("HERD_MAX_HORIZON_MONTHS", defaults.max_horizon_months),
                max_mc_runs: env_or("HERD_MAX_MC_RUNS", defaults.max_mc_runs),
            },
            simulation_version: format!("herd-sim/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl ForecastConfig {
    /// Create a config from environment variables.
    pub fn from_env() -> Self {
        Self::default()
    }

    /// Worker slots actually used for Monte Carlo runs.
    pub fn effective_workers(&self) -> usize {
        if self.parallel_enabled {
            self.max_workers.max(1)
        } else {
            1
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_workers == 0 {
            return Err(ForecastError::Config("max_workers must be positive".into()));
        }
        if self.batch_size == 0 {
            return Err(ForecastError::Config("batch_size must be positive".into()));
        }
        if self.max_concurrent_jobs == 0 {
            return Err(ForecastError::Config(
                "max_concurrent_jobs must be positive".into(),
            ));
        }
        for (name, value) in [
            ("stuck_job_timeout", self.stuck_job_timeout),
            ("watchdog_interval", self.watchdog_interval),
            ("heartbeat_interval", self.heartbeat_interval),
        ] {
            if value.is_zero() {
                return Err(ForecastError::Config(format!("{name} must be non-zero")));
            }
        }
        if self.limits.max_horizon_months == 0 || self.limits.max_mc_runs == 0 {
            return Err(ForecastError::Config("scenario limits must be positive".into()));
        }
        Ok(())
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.max_workers = workers;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_parallel(mut self, enabled: bool) -> Self {
        self.parallel_enabled = enabled;
        self
    }

    pub fn with_max_concurrent_jobs(mut self, jobs: usize) -> Self {
        self.max_concurrent_jobs = jobs;
        self
    }

    pub fn with_stuck_job_timeout(mut self, timeout: Duration) -> Self {
        self.stuck_job_timeout = timeout;
        self
    }

    pub fn with_watchdog_interval(mut self, interval: Duration) -> Self {
        self.watchdog_interval = interval;
        self
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    pub fn with_job_retention(mut self, retention: Duration) -> Self {
        self.job_retention = retention;
        self
    }

    pub fn with_max_retained_jobs(mut self, jobs: usize) -> Self {
        self.max_retained_jobs = jobs;
        self
    }

    pub fn with_limits(mut self, limits: ScenarioLimits) -> Self {
        self.limits = limits;
        self
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => match raw.trim().parse() {
            Ok(value) => value,
            Err(_) => {
                warn!(key, value = %raw, "ignoring unparsable environment override");
                default
            }
        },
        Err(_) => default,
    }
}

/// Caller context passed explicitly with every job submission.
///
/// Recorded on the job for auditing; the simulation never reads it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestContext {
    pub requested_by: Option<String>,
    pub locale: Option<String>,
}

impl RequestContext {
    pub fn new(requested_by: impl Into<String>) -> Self {
        Self {
            requested_by: Some(requested_by.into()),
            locale: None,
        }
    }

    pub fn with_locale(mut self, locale: impl Into<String>) -> Self {
        self.locale = Some(locale.into());
        self
    }
}
