//! Boundary to the job persistence collaborator.
//!
//! The manager writes a [`JobRecord`] after every transition. Records carry a
//! monotonically increasing revision so a backend can drop stale writes that
//! arrive out of order.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::config::RequestContext;
use crate::error::StoreError;
use crate::job::{JobId, JobSnapshot};

pub type StoreResult<T> = std::result::Result<T, StoreError>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub snapshot: JobSnapshot,
    pub context: RequestContext,
    pub scenario_digest: String,
    pub revision: u64,
}

/// Persistence for job metadata. Results are not stored here.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert or replace the record for `record.snapshot.id`.
    async fn put(&self, record: &JobRecord) -> StoreResult<()>;

    async fn get(&self, id: &JobId) -> StoreResult<JobRecord>;

    /// Records whose status is not terminal.
    async fn list_active(&self) -> StoreResult<Vec<JobRecord>>;
}

/// In-memory store backed by a `HashMap<JobId, JobRecord>`.
#[derive(Debug, Default)]
pub struct MemoryJobStore {
    records: Mutex<HashMap<JobId, JobRecord>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn put(&self, record: &JobRecord) -> StoreResult<()> {
        let mut records = self.records.lock();
        match records.get(&record.snapshot.id) {
            Some(existing) if existing.revision >= record.revision => {}
            _ => {
                records.insert(record.snapshot.id, record.clone());
            }
        }
        Ok(())
    }

    async fn get(&self, id: &JobId) -> StoreResult<JobRecord> {
        self.records
            .lock()
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    async fn list_active(&self) -> StoreResult<Vec<JobRecord>> {
        let mut active: Vec<JobRecord> = self
            .records
            .lock()
            .values()
            .filter(|r| !r.snapshot.status.is_terminal())
            .cloned()
            .collect();
        active.sort_by_key(|r| r.snapshot.queued_at);
        Ok(active)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{ForecastJob, JobStatus};

    fn record(job: &ForecastJob, revision: u64) -> JobRecord {
        JobRecord {
            snapshot: job.snapshot().clone(),
            context: RequestContext::new("tester"),
            scenario_digest: "digest".into(),
            revision,
        }
    }

    #[tokio::test]
    async fn test_put_get() {
        let store = MemoryJobStore::new();
        let job = ForecastJob::new(JobId::new(), 3);
        store.put(&record(&job, 1)).await.unwrap();
        let got = store.get(&job.id()).await.unwrap();
        assert_eq!(got.snapshot.status, JobStatus::Queued);
        assert_eq!(got.context.requested_by.as_deref(), Some("tester"));
    }

    #[tokio::test]
    async fn test_stale_revision_is_ignored() {
        let store = MemoryJobStore::new();
        let mut job = ForecastJob::new(JobId::new(), 3);
        let queued = record(&job, 1);
        job.start();
        store.put(&record(&job, 2)).await.unwrap();
        store.put(&queued).await.unwrap();
        let got = store.get(&job.id()).await.unwrap();
        assert_eq!(got.snapshot.status, JobStatus::Running);
        assert_eq!(got.revision, 2);
    }

    #[tokio::test]
    async fn test_list_active_excludes_terminal() {
        let store = MemoryJobStore::new();
        let running = {
            let mut j = ForecastJob::new(JobId::new(), 1);
            j.start();
            j
        };
        let canceled = {
            let mut j = ForecastJob::new(JobId::new(), 1);
            j.cancel();
            j
        };
        store.put(&record(&running, 1)).await.unwrap();
        store.put(&record(&canceled, 1)).await.unwrap();

        let active = store.list_active().await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].snapshot.id, running.id());
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn test_missing_record() {
        let store = MemoryJobStore::new();
        let err = store.get(&JobId::new()).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }
}
