//! Structured observability hooks for forecast job lifecycle events.
//!
//! - Job-scoped spans via the [`JobSpan`] RAII guard, or [`job_span`] for
//!   instrumenting futures
//! - Emission functions for queue, start, progress, finish, timeout and cancel
//!
//! Events are emitted at `info!` level with an `event` field; failures and
//! timeouts at `warn!`.

use tracing::{debug, info, warn, Span};

use crate::job::JobId;

/// RAII guard that enters a job-scoped span while held.
///
/// ```ignore
/// let _span = JobSpan::enter(&job_id);
/// // tracing calls here carry job_id
/// ```
pub struct JobSpan {
    _span: tracing::span::EnteredSpan,
}

impl JobSpan {
    pub fn enter(job_id: &JobId) -> Self {
        Self {
            _span: job_span(job_id).entered(),
        }
    }
}

/// The span a job's driver future is instrumented with.
pub fn job_span(job_id: &JobId) -> Span {
    tracing::info_span!("herd.job", job_id = %job_id)
}

pub fn emit_job_queued(job_id: &JobId, total_runs: u32, scenario_digest: &str) {
    info!(
        event = "job.queued",
        job_id = %job_id,
        total_runs = total_runs,
        scenario_digest = %scenario_digest,
    );
}

pub fn emit_job_started(job_id: &JobId, queued_ms: u64) {
    info!(event = "job.started", job_id = %job_id, queued_ms = queued_ms);
}

/// Progress is chatty; logged at debug.
pub fn emit_job_progress(job_id: &JobId, completed_runs: u32, total_runs: u32) {
    debug!(
        event = "job.progress",
        job_id = %job_id,
        completed_runs = completed_runs,
        total_runs = total_runs,
    );
}

/// Emit event: job reached `succeeded` or `failed`.
pub fn emit_job_finished(job_id: &JobId, status: &str, duration_ms: u64, error: Option<&str>) {
    match error {
        None => info!(
            event = "job.finished",
            job_id = %job_id,
            status = status,
            duration_ms = duration_ms,
        ),
        Some(error) => warn!(
            event = "job.finished",
            job_id = %job_id,
            status = status,
            duration_ms = duration_ms,
            error = %error,
        ),
    }
}

pub fn emit_job_timeout(job_id: &JobId, elapsed_secs: u64, timeout_secs: u64) {
    warn!(
        event = "job.timeout",
        job_id = %job_id,
        elapsed_secs = elapsed_secs,
        timeout_secs = timeout_secs,
    );
}

pub fn emit_job_canceled(job_id: &JobId, completed_runs: u32) {
    info!(event = "job.canceled", job_id = %job_id, completed_runs = completed_runs);
}

/// A job outcome arrived after the job was already terminal and was dropped.
pub fn emit_late_outcome(job_id: &JobId, status: &str) {
    debug!(event = "job.late_outcome", job_id = %job_id, status = status);
}

/// A finished job was dropped from memory after `age_ms` in a terminal state.
pub fn emit_job_evicted(job_id: &JobId, age_ms: u64) {
    debug!(event = "job.evicted", job_id = %job_id, age_ms = age_ms);
}

/// Emit event: the job store rejected a write (warning level).
pub fn emit_store_error(job_id: &JobId, error: &dyn std::fmt::Display) {
    warn!(event = "job.store_error", job_id = %job_id, error = %error);
}
