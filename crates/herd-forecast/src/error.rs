//! Job-level error taxonomy.

use herd_sim::ValidationError;
use serde::{Deserialize, Serialize};

use crate::job::{JobId, JobStatus};

/// Errors surfaced by the forecast layer.
#[derive(Debug, thiserror::Error)]
pub enum ForecastError {
    /// Scenario parameters rejected before a job is queued.
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    /// A single realization failed; the whole ensemble is discarded.
    #[error("run {run_index} failed: {message}")]
    Run { run_index: u32, message: String },

    #[error("job exceeded the stuck-job timeout of {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("job was canceled")]
    Canceled,

    #[error("job not found: {0}")]
    JobNotFound(JobId),

    #[error("job {id} has no result yet (status: {status})")]
    ResultNotReady { id: JobId, status: JobStatus },

    #[error("job {id} finished without a result (status: {status})")]
    NoResult { id: JobId, status: JobStatus },

    #[error("worker pool error: {0}")]
    Pool(String),

    #[error("job store error: {0}")]
    Store(#[from] StoreError),

    #[error("invalid configuration: {0}")]
    Config(String),
}

/// Errors from a [`crate::store::JobStore`] backend.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("job record not found: {0}")]
    NotFound(String),

    #[error("store backend failed: {0}")]
    Backend(String),
}

/// Result type for forecast operations.
pub type Result<T> = std::result::Result<T, ForecastError>;

/// Category of a job failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Validation,
    Run,
    Timeout,
    Internal,
}

/// The single human-readable failure signal recorded on a failed job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl JobFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl From<&ForecastError> for JobFailure {
    fn from(err: &ForecastError) -> Self {
        let kind = match err {
            ForecastError::Validation(_) => FailureKind::Validation,
            ForecastError::Run { .. } => FailureKind::Run,
            ForecastError::Timeout { .. } => FailureKind::Timeout,
            _ => FailureKind::Internal,
        };
        JobFailure::new(kind, err.to_string())
    }
}

impl std::fmt::Display for JobFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_kind_from_error() {
        let err = ForecastError::Run {
            run_index: 3,
            message: "sampler misconfigured".into(),
        };
        let failure = JobFailure::from(&err);
        assert_eq!(failure.kind, FailureKind::Run);
        assert!(failure.message.contains("run 3"));

        let failure = JobFailure::from(&ForecastError::Timeout { timeout_secs: 60 });
        assert_eq!(failure.kind, FailureKind::Timeout);
        assert!(failure.to_string().contains("60s"));
    }

    #[test]
    fn test_validation_converts() {
        let err: ForecastError = ValidationError::NonPositiveLeadTime.into();
        assert!(matches!(err, ForecastError::Validation(_)));
        assert_eq!(JobFailure::from(&err).kind, FailureKind::Validation);
    }

    #[test]
    fn test_failure_serializes_snake_case() {
        let json = serde_json::to_value(JobFailure::new(FailureKind::Timeout, "late")).unwrap();
        assert_eq!(json["kind"], "timeout");
        assert_eq!(json["message"], "late");
    }
}
