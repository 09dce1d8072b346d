//! herd-forecast: Monte Carlo forecasting jobs over herd-sim (Layer 1)
//!
//! Runs many independent realizations of a [`herd_sim::Engine`] on a bounded
//! worker pool, reduces them to percentile bands, and wraps each request in a
//! cancellable job whose progress is published to any number of subscribers.

pub mod config;
pub mod error;
pub mod job;
pub mod manager;
pub mod metrics;
pub mod monte_carlo;
pub mod obs;
pub mod percentile;
pub mod pool;
pub mod progress;
pub mod result;
pub mod store;
pub mod telemetry;

pub use config::{ForecastConfig, RequestContext};
pub use error::{FailureKind, ForecastError, JobFailure, Result, StoreError};
pub use job::{ForecastJob, JobId, JobSnapshot, JobStatus, Transition};
pub use manager::JobManager;
pub use metrics::METRICS;
pub use monte_carlo::{MonteCarloRunner, ProgressUpdate};
pub use percentile::{quantile_sorted, quantiles};
pub use pool::WorkerPool;
pub use progress::{ProgressChannel, ProgressEvent, Subscription};
pub use result::{Ensemble, EventsByMonth, ForecastPoint, ForecastResult, ForecastSeries, ResultMeta};
pub use store::{JobRecord, JobStore, MemoryJobStore};
pub use telemetry::init_tracing;
