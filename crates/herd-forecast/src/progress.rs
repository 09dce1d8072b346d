//! Per-job progress pub/sub.
//!
//! One writer (the job driver, through the manager) appends events to an
//! append-only log; any number of [`Subscription`]s read it independently
//! with their own cursor. A subscriber that attaches late starts at the most
//! recent event, so it always sees the last known status and everything
//! after it, including the terminal event. Idle subscribers receive a
//! synthesized heartbeat every `heartbeat_interval`.
//!
//! Only the newest `progress` event keeps its partial result; publishing any
//! later event strips the payload from the one before it.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::Stream;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::error::JobFailure;
use crate::job::{JobId, JobStatus};
use crate::result::ForecastResult;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    Progress {
        job_id: JobId,
        status: JobStatus,
        completed_runs: u32,
        total_runs: u32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        partial: Option<Arc<ForecastResult>>,
    },
    /// Liveness only; carries no state change.
    Heartbeat {
        job_id: JobId,
        status: JobStatus,
        completed_runs: u32,
        total_runs: u32,
        at: DateTime<Utc>,
    },
    Succeeded {
        job_id: JobId,
        completed_runs: u32,
        total_runs: u32,
        result: Arc<ForecastResult>,
    },
    Failed {
        job_id: JobId,
        completed_runs: u32,
        total_runs: u32,
        error: JobFailure,
    },
    Canceled {
        job_id: JobId,
        completed_runs: u32,
        total_runs: u32,
    },
}

impl ProgressEvent {
    pub fn job_id(&self) -> JobId {
        match self {
            ProgressEvent::Progress { job_id, .. }
            | ProgressEvent::Heartbeat { job_id, .. }
            | ProgressEvent::Succeeded { job_id, .. }
            | ProgressEvent::Failed { job_id, .. }
            | ProgressEvent::Canceled { job_id, .. } => *job_id,
        }
    }

    pub fn completed_runs(&self) -> u32 {
        match self {
            ProgressEvent::Progress { completed_runs, .. }
            | ProgressEvent::Heartbeat { completed_runs, .. }
            | ProgressEvent::Succeeded { completed_runs, .. }
            | ProgressEvent::Failed { completed_runs, .. }
            | ProgressEvent::Canceled { completed_runs, .. } => *completed_runs,
        }
    }

    pub fn total_runs(&self) -> u32 {
        match self {
            ProgressEvent::Progress { total_runs, .. }
            | ProgressEvent::Heartbeat { total_runs, .. }
            | ProgressEvent::Succeeded { total_runs, .. }
            | ProgressEvent::Failed { total_runs, .. }
            | ProgressEvent::Canceled { total_runs, .. } => *total_runs,
        }
    }

    pub fn status(&self) -> JobStatus {
        match self {
            ProgressEvent::Progress { status, .. } | ProgressEvent::Heartbeat { status, .. } => {
                *status
            }
            ProgressEvent::Succeeded { .. } => JobStatus::Succeeded,
            ProgressEvent::Failed { .. } => JobStatus::Failed,
            ProgressEvent::Canceled { .. } => JobStatus::Canceled,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status().is_terminal()
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ProgressEvent::Progress { .. } => "progress",
            ProgressEvent::Heartbeat { .. } => "heartbeat",
            ProgressEvent::Succeeded { .. } => "succeeded",
            ProgressEvent::Failed { .. } => "failed",
            ProgressEvent::Canceled { .. } => "canceled",
        }
    }
}

#[derive(Debug)]
struct ChannelState {
    events: Vec<Arc<ProgressEvent>>,
    status: JobStatus,
    completed_runs: u32,
    closed: bool,
}

/// Append-only event log for one job.
#[derive(Debug)]
pub struct ProgressChannel {
    job_id: JobId,
    total_runs: u32,
    heartbeat_interval: Duration,
    state: Mutex<ChannelState>,
    notify: watch::Sender<usize>,
}

impl ProgressChannel {
    pub fn new(job_id: JobId, total_runs: u32, heartbeat_interval: Duration) -> Self {
        let (notify, _) = watch::channel(0);
        Self {
            job_id,
            total_runs,
            heartbeat_interval,
            state: Mutex::new(ChannelState {
                events: Vec::new(),
                status: JobStatus::Queued,
                completed_runs: 0,
                closed: false,
            }),
            notify,
        }
    }

    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    /// Append an event and wake subscribers.
    ///
    /// Returns `false` when the event was dropped: the log already holds a
    /// terminal event, the event is a heartbeat, or it would move
    /// `completed_runs` backwards. A partial result on the previous event is
    /// released.
    pub fn publish(&self, event: ProgressEvent) -> bool {
        let mut state = self.state.lock();
        if state.closed || matches!(event, ProgressEvent::Heartbeat { .. }) {
            return false;
        }
        if !event.is_terminal() && event.completed_runs() < state.completed_runs {
            return false;
        }

        state.status = event.status();
        state.completed_runs = state.completed_runs.max(event.completed_runs());
        state.closed = event.is_terminal();
        if let Some(last) = state.events.last_mut() {
            if let ProgressEvent::Progress {
                partial: Some(_), ..
            } = &**last
            {
                let mut stripped = ProgressEvent::clone(last);
                if let ProgressEvent::Progress { partial, .. } = &mut stripped {
                    *partial = None;
                }
                *last = Arc::new(stripped);
            }
        }
        state.events.push(Arc::new(event));
        self.notify.send_replace(state.events.len());
        true
    }

    /// Subscribe starting at the most recent event.
    pub fn subscribe(self: &Arc<Self>) -> Subscription {
        let state = self.state.lock();
        let cursor = state.events.len().saturating_sub(1);
        Subscription::new(Arc::clone(self), cursor)
    }

    /// Subscribe and replay the whole log.
    pub fn subscribe_from_start(self: &Arc<Self>) -> Subscription {
        let _state = self.state.lock();
        Subscription::new(Arc::clone(self), 0)
    }

    pub fn latest(&self) -> Option<Arc<ProgressEvent>> {
        self.state.lock().events.last().cloned()
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    pub fn len(&self) -> usize {
        self.state.lock().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn event_at(&self, index: usize) -> Option<Arc<ProgressEvent>> {
        self.state.lock().events.get(index).cloned()
    }

    fn heartbeat(&self) -> ProgressEvent {
        let state = self.state.lock();
        ProgressEvent::Heartbeat {
            job_id: self.job_id,
            status: state.status,
            completed_runs: state.completed_runs,
            total_runs: self.total_runs,
            at: Utc::now(),
        }
    }
}

/// An independent reader of one job's events.
#[derive(Debug)]
pub struct Subscription {
    channel: Arc<ProgressChannel>,
    cursor: usize,
    wake: watch::Receiver<usize>,
    finished: bool,
}

impl Subscription {
    // Callers hold the channel lock so the receiver and cursor agree.
    fn new(channel: Arc<ProgressChannel>, cursor: usize) -> Self {
        let wake = channel.notify.subscribe();
        Self {
            channel,
            cursor,
            wake,
            finished: false,
        }
    }

    pub fn job_id(&self) -> JobId {
        self.channel.job_id
    }

    /// Next event, a heartbeat after an idle interval, or `None` once the
    /// terminal event has been delivered.
    pub async fn next(&mut self) -> Option<Arc<ProgressEvent>> {
        if self.finished {
            return None;
        }
        loop {
            if let Some(event) = self.channel.event_at(self.cursor) {
                self.cursor += 1;
                if event.is_terminal() {
                    self.finished = true;
                }
                return Some(event);
            }

            match tokio::time::timeout(self.channel.heartbeat_interval, self.wake.changed()).await
            {
                Ok(Ok(())) => continue,
                Ok(Err(_)) => {
                    self.finished = true;
                    return None;
                }
                Err(_) => return Some(Arc::new(self.channel.heartbeat())),
            }
        }
    }

    pub fn into_stream(self) -> impl Stream<Item = Arc<ProgressEvent>> + Send {
        futures::stream::unfold(self, |mut sub| async move {
            let event = sub.next().await?;
            Some((event, sub))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FailureKind;
    use crate::result::ResultMeta;
    use futures::StreamExt;

    fn progress(job_id: JobId, completed: u32) -> ProgressEvent {
        ProgressEvent::Progress {
            job_id,
            status: JobStatus::Running,
            completed_runs: completed,
            total_runs: 4,
            partial: None,
        }
    }

    fn failed(job_id: JobId) -> ProgressEvent {
        ProgressEvent::Failed {
            job_id,
            completed_runs: 2,
            total_runs: 4,
            error: JobFailure::new(FailureKind::Run, "run 2 failed"),
        }
    }

    fn channel() -> Arc<ProgressChannel> {
        Arc::new(ProgressChannel::new(JobId::new(), 4, Duration::from_secs(15)))
    }

    #[tokio::test]
    async fn test_subscriber_receives_events_in_order() {
        let ch = channel();
        let id = ch.job_id();
        let mut sub = ch.subscribe();

        assert!(ch.publish(progress(id, 1)));
        assert!(ch.publish(progress(id, 2)));
        assert!(ch.publish(failed(id)));

        assert_eq!(sub.next().await.unwrap().completed_runs(), 1);
        assert_eq!(sub.next().await.unwrap().completed_runs(), 2);
        assert_eq!(sub.next().await.unwrap().kind(), "failed");
        assert!(sub.next().await.is_none());
    }

    #[tokio::test]
    async fn test_late_subscriber_starts_at_last_event() {
        let ch = channel();
        let id = ch.job_id();
        ch.publish(progress(id, 1));
        ch.publish(progress(id, 3));

        let mut late = ch.subscribe();
        assert_eq!(late.next().await.unwrap().completed_runs(), 3);

        ch.publish(failed(id));
        assert!(late.next().await.unwrap().is_terminal());

        let mut replay = ch.subscribe_from_start();
        assert_eq!(replay.next().await.unwrap().completed_runs(), 1);
    }

    #[tokio::test]
    async fn test_nothing_after_terminal() {
        let ch = channel();
        let id = ch.job_id();
        assert!(ch.publish(failed(id)));
        assert!(!ch.publish(progress(id, 3)));
        assert!(!ch.publish(failed(id)));
        assert_eq!(ch.len(), 1);
        assert!(ch.is_closed());
    }

    #[tokio::test]
    async fn test_regressing_progress_is_dropped() {
        let ch = channel();
        let id = ch.job_id();
        assert!(ch.publish(progress(id, 3)));
        assert!(!ch.publish(progress(id, 2)));
        assert_eq!(ch.latest().unwrap().completed_runs(), 3);
    }

    fn partial(completed_runs: u32) -> Arc<ForecastResult> {
        Arc::new(ForecastResult {
            series_p10: Vec::new(),
            series_p50: Vec::new(),
            series_p90: Vec::new(),
            events: Vec::new(),
            future_point: None,
            meta: ResultMeta {
                engine: "agent_based_monthly".into(),
                mode: Default::default(),
                dim_mode: Default::default(),
                purchase_policy: Default::default(),
                confidence_central: 0.8,
                lower_quantile: 0.1,
                upper_quantile: 0.9,
                completed_runs,
                base_seed: 42,
                scenario_digest: "digest".into(),
                simulation_version: "test".into(),
                assumptions: Vec::new(),
                warnings: Vec::new(),
            },
        })
    }

    fn progress_with_partial(job_id: JobId, completed: u32) -> ProgressEvent {
        ProgressEvent::Progress {
            job_id,
            status: JobStatus::Running,
            completed_runs: completed,
            total_runs: 4,
            partial: Some(partial(completed)),
        }
    }

    fn carries_partial(event: &ProgressEvent) -> bool {
        matches!(event, ProgressEvent::Progress { partial: Some(_), .. })
    }

    #[tokio::test]
    async fn test_only_newest_progress_keeps_partial() {
        let ch = channel();
        let id = ch.job_id();
        let mut early = ch.subscribe_from_start();

        ch.publish(progress_with_partial(id, 1));
        let delivered = early.next().await.unwrap();
        ch.publish(progress(id, 2));
        ch.publish(progress_with_partial(id, 3));

        // Already delivered events are left alone.
        assert!(carries_partial(&delivered));

        let mut replay = ch.subscribe_from_start();
        let first = replay.next().await.unwrap();
        assert_eq!(first.completed_runs(), 1);
        assert!(!carries_partial(&first));
        assert!(carries_partial(&ch.latest().unwrap()));

        ch.publish(failed(id));
        let logged: Vec<bool> = {
            let mut all = ch.subscribe_from_start();
            let mut out = Vec::new();
            while let Some(event) = all.next().await {
                out.push(carries_partial(&event));
            }
            out
        };
        assert_eq!(logged, vec![false, false, false, false]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_subscriber_gets_heartbeat() {
        let ch = Arc::new(ProgressChannel::new(JobId::new(), 4, Duration::from_millis(50)));
        let id = ch.job_id();
        ch.publish(progress(id, 2));
        let mut sub = ch.subscribe();
        assert_eq!(sub.next().await.unwrap().kind(), "progress");

        let beat = sub.next().await.unwrap();
        assert_eq!(beat.kind(), "heartbeat");
        assert_eq!(beat.completed_runs(), 2);
        assert_eq!(beat.status(), JobStatus::Running);
        assert_eq!(ch.len(), 1, "heartbeats are not logged");
    }

    #[tokio::test]
    async fn test_stream_ends_after_terminal() {
        let ch = channel();
        let id = ch.job_id();
        let stream = ch.subscribe().into_stream();
        ch.publish(progress(id, 1));
        ch.publish(ProgressEvent::Canceled {
            job_id: id,
            completed_runs: 1,
            total_runs: 4,
        });
        let kinds: Vec<&str> = stream.map(|e| e.kind()).collect().await;
        assert_eq!(kinds, vec!["progress", "canceled"]);
    }

    #[test]
    fn test_event_serializes_with_type_tag() {
        let event = progress(JobId::new(), 1);
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "progress");
        assert_eq!(json["status"], "running");
        assert!(json.get("partial").is_none());
    }
}
