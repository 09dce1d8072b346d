//! Global atomic counters for forecast jobs.
//!
//! Counters are incremented silently at the call site. Call
//! [`Metrics::flush`] to emit current values as one `tracing::info!` event.

use std::sync::atomic::{AtomicU64, Ordering};

/// Global metrics singleton.
pub static METRICS: Metrics = Metrics::new();

pub struct Metrics {
    jobs_submitted: AtomicU64,
    jobs_succeeded: AtomicU64,
    jobs_failed: AtomicU64,
    jobs_canceled: AtomicU64,
    jobs_timed_out: AtomicU64,
    runs_completed: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            jobs_submitted: AtomicU64::new(0),
            jobs_succeeded: AtomicU64::new(0),
            jobs_failed: AtomicU64::new(0),
            jobs_canceled: AtomicU64::new(0),
            jobs_timed_out: AtomicU64::new(0),
            runs_completed: AtomicU64::new(0),
        }
    }

    pub fn inc_jobs_submitted(&self) {
        self.jobs_submitted.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "jobs_submitted", "counter incremented");
    }

    pub fn inc_jobs_succeeded(&self) {
        self.jobs_succeeded.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "jobs_succeeded", "counter incremented");
    }

    pub fn inc_jobs_failed(&self) {
        self.jobs_failed.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "jobs_failed", "counter incremented");
    }

    pub fn inc_jobs_canceled(&self) {
        self.jobs_canceled.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "jobs_canceled", "counter incremented");
    }

    /// Timed-out jobs also count as failed.
    pub fn inc_jobs_timed_out(&self) {
        self.jobs_timed_out.fetch_add(1, Ordering::Relaxed);
        self.jobs_failed.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "jobs_timed_out", "counter incremented");
    }

    pub fn add_runs_completed(&self, n: u64) {
        self.runs_completed.fetch_add(n, Ordering::Relaxed);
        tracing::trace!(metric = "runs_completed", n, "counter incremented");
    }

    /// Emit all current counter values as a single `info!` event.
    pub fn flush(&self) {
        tracing::info!(
            metric = "flush",
            jobs_submitted = self.jobs_submitted(),
            jobs_succeeded = self.jobs_succeeded(),
            jobs_failed = self.jobs_failed(),
            jobs_canceled = self.jobs_canceled(),
            jobs_timed_out = self.jobs_timed_out(),
            runs_completed = self.runs_completed(),
        );
    }

    pub fn jobs_submitted(&self) -> u64 {
        self.jobs_submitted.load(Ordering::Relaxed)
    }

    pub fn jobs_succeeded(&self) -> u64 {
        self.jobs_succeeded.load(Ordering::Relaxed)
    }

    pub fn jobs_failed(&self) -> u64 {
        self.jobs_failed.load(Ordering::Relaxed)
    }

    pub fn jobs_canceled(&self) -> u64 {
        self.jobs_canceled.load(Ordering::Relaxed)
    }

    pub fn jobs_timed_out(&self) -> u64 {
        self.jobs_timed_out.load(Ordering::Relaxed)
    }

    pub fn runs_completed(&self) -> u64 {
        self.runs_completed.load(Ordering::Relaxed)
    }

    /// Reset all counters to zero (useful in tests).
    pub fn reset(&self) {
        self.jobs_submitted.store(0, Ordering::Relaxed);
        self.jobs_succeeded.store(0, Ordering::Relaxed);
        self.jobs_failed.store(0, Ordering::Relaxed);
        self.jobs_canceled.store(0, Ordering::Relaxed);
        self.jobs_timed_out.store(0, Ordering::Relaxed);
        self.runs_completed.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_increment() {
        let m = Metrics::new();
        m.inc_jobs_submitted();
        m.inc_jobs_submitted();
        assert_eq!(m.jobs_submitted(), 2);

        m.add_runs_completed(8);
        m.add_runs_completed(2);
        assert_eq!(m.runs_completed(), 10);

        m.inc_jobs_succeeded();
        m.inc_jobs_canceled();
        assert_eq!(m.jobs_succeeded(), 1);
        assert_eq!(m.jobs_canceled(), 1);
    }

    #[test]
    fn timeout_counts_as_failure() {
        let m = Metrics::new();
        m.inc_jobs_timed_out();
        assert_eq!(m.jobs_timed_out(), 1);
        assert_eq!(m.jobs_failed(), 1);
    }

    #[test]
    fn reset_zeroes_all() {
        let m = Metrics::new();
        m.inc_jobs_submitted();
        m.inc_jobs_failed();
        m.add_runs_completed(3);
        m.reset();
        assert_eq!(m.jobs_submitted(), 0);
        assert_eq!(m.jobs_failed(), 0);
        assert_eq!(m.runs_completed(), 0);
    }
}
