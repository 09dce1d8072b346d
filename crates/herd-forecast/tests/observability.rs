//! Observability smoke tests: spans, lifecycle events, counters.

mod common;

use common::{config, herd, small_params};
use herd_forecast::obs::{
    emit_job_canceled, emit_job_finished, emit_job_queued, emit_job_started, emit_job_timeout,
    emit_store_error, JobSpan,
};
use herd_forecast::{JobId, JobManager, JobStatus, RequestContext, METRICS};
use tracing_test::traced_test;

/// Test: lifecycle emitters run inside a job span
#[traced_test]
#[test]
fn test_emitters_inside_job_span() {
    let id = JobId::new();
    let _span = JobSpan::enter(&id);
    emit_job_queued(&id, 50, "0f3a");
    emit_job_started(&id, 12);
    emit_job_finished(&id, "succeeded", 1500, None);
}

/// Test: failure paths emit at warn level without panicking
#[traced_test]
#[test]
fn test_warning_emitters() {
    let id = JobId::new();
    emit_job_timeout(&id, 1801, 1800);
    emit_job_canceled(&id, 7);
    emit_job_finished(&id, "failed", 20, Some("run 4 failed: sampler error"));
    let err = herd_forecast::StoreError::Backend("connection refused".into());
    emit_store_error(&id, &err);
}

/// Test: a finished job moves the global counters
#[tokio::test]
#[traced_test]
async fn test_job_updates_metrics() {
    let submitted_before = METRICS.jobs_submitted();
    let runs_before = METRICS.runs_completed();

    let manager = JobManager::new(config()).unwrap();
    let id = manager
        .submit(herd(15), small_params(4), RequestContext::default())
        .await
        .unwrap();
    assert_eq!(manager.wait(&id).await.unwrap().status, JobStatus::Succeeded);

    // Other tests in this binary may run concurrently.
    assert!(METRICS.jobs_submitted() > submitted_before);
    assert!(METRICS.runs_completed() >= runs_before + 4);
    assert!(METRICS.jobs_succeeded() >= 1);
    METRICS.flush();
}
