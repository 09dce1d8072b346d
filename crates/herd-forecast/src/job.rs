//! Forecast job model and its state machine.
//!
//! ```text
//! queued -> running -> succeeded
//!    |         |----> failed
//!    |         '----> canceled
//!    '--> failed | canceled
//! ```
//!
//! Terminal states never change. Mutating a terminal job is a no-op that
//! reports the existing status.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::JobFailure;
use crate::result::ForecastResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
    Canceled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Succeeded | JobStatus::Failed | JobStatus::Canceled
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
            JobStatus::Canceled => "canceled",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Externally visible state of a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub id: JobId,
    pub status: JobStatus,
    pub completed_runs: u32,
    pub total_runs: u32,
    pub queued_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JobFailure>,
}

/// Outcome of a state-machine call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    /// Status after the call.
    pub status: JobStatus,
    /// Whether the call changed anything.
    pub applied: bool,
}

impl Transition {
    fn applied(status: JobStatus) -> Self {
        Self {
            status,
            applied: true,
        }
    }

    fn unchanged(status: JobStatus) -> Self {
        Self {
            status,
            applied: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ForecastJob {
    snapshot: JobSnapshot,
    result: Option<Arc<ForecastResult>>,
}

impl ForecastJob {
    pub fn new(id: JobId, total_runs: u32) -> Self {
        Self {
            snapshot: JobSnapshot {
                id,
                status: JobStatus::Queued,
                completed_runs: 0,
                total_runs,
                queued_at: Utc::now(),
                started_at: None,
                finished_at: None,
                error: None,
            },
            result: None,
        }
    }

    pub fn id(&self) -> JobId {
        self.snapshot.id
    }

    pub fn status(&self) -> JobStatus {
        self.snapshot.status
    }

    pub fn snapshot(&self) -> &JobSnapshot {
        &self.snapshot
    }

    /// Present only once the job has succeeded.
    pub fn result(&self) -> Option<&Arc<ForecastResult>> {
        self.result.as_ref()
    }

    /// `queued -> running`.
    pub fn start(&mut self) -> Transition {
        if self.snapshot.status != JobStatus::Queued {
            return Transition::unchanged(self.snapshot.status);
        }
        self.snapshot.status = JobStatus::Running;
        self.snapshot.started_at = Some(Utc::now());
        Transition::applied(JobStatus::Running)
    }

    /// Raise the completed-run counter of a running job. Never decreases it.
    pub fn record_progress(&mut self, completed_runs: u32) -> Transition {
        let completed_runs = completed_runs.min(self.snapshot.total_runs);
        if self.snapshot.status != JobStatus::Running
            || completed_runs <= self.snapshot.completed_runs
        {
            return Transition::unchanged(self.snapshot.status);
        }
        self.snapshot.completed_runs = completed_runs;
        Transition::applied(JobStatus::Running)
    }

    /// `running -> succeeded`, attaching the result.
    pub fn succeed(&mut self, result: Arc<ForecastResult>) -> Transition {
        if self.snapshot.status != JobStatus::Running {
            return Transition::unchanged(self.snapshot.status);
        }
        self.snapshot.status = JobStatus::Succeeded;
        self.snapshot.completed_runs = self.snapshot.total_runs;
        self.snapshot.finished_at = Some(Utc::now());
        self.result = Some(result);
        Transition::applied(JobStatus::Succeeded)
    }

    /// `queued | running -> failed`.
    pub fn fail(&mut self, failure: JobFailure) -> Transition {
        if self.snapshot.status.is_terminal() {
            return Transition::unchanged(self.snapshot.status);
        }
        self.snapshot.status = JobStatus::Failed;
        self.snapshot.finished_at = Some(Utc::now());
        self.snapshot.error = Some(failure);
        Transition::applied(JobStatus::Failed)
    }

    /// `queued | running -> canceled`.
    pub fn cancel(&mut self) -> Transition {
        if self.snapshot.status.is_terminal() {
            return Transition::unchanged(self.snapshot.status);
        }
        self.snapshot.status = JobStatus::Canceled;
        self.snapshot.finished_at = Some(Utc::now());
        Transition::applied(JobStatus::Canceled)
    }
}
