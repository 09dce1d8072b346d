//! Monte Carlo orchestration over the shared worker pool.
//!
//! Runs are dispatched in fixed-size batches. Within a batch results are
//! folded in run-index order, so the ensemble does not depend on which
//! worker finishes first. Cancellation is checked before each batch and
//! while waiting on in-flight runs; runs already handed to the pool finish
//! in the background and are discarded.

use std::sync::Arc;

use futures::stream::{FuturesOrdered, StreamExt};
use herd_sim::{Engine, SimulationRun};
use tokio::sync::watch;
use tracing::{debug, instrument};

use crate::error::{ForecastError, Result};
use crate::metrics::METRICS;
use crate::pool::WorkerPool;
use crate::result::{Ensemble, ForecastResult};

/// Reported after every completed run except the last.
///
/// `partial` is attached when a batch has fully drained.
#[derive(Debug, Clone)]
pub struct ProgressUpdate {
    pub completed: u32,
    pub total: u32,
    pub partial: Option<ForecastResult>,
}

/// Produces one realization from `(engine, run_index, seed)` on a worker.
pub type RunFn =
    Arc<dyn Fn(&Engine, u32, u64) -> herd_sim::Result<SimulationRun> + Send + Sync>;

#[derive(Clone)]
pub struct MonteCarloRunner {
    pool: WorkerPool,
    batch_size: usize,
    simulation_version: String,
    run_fn: RunFn,
}

impl std::fmt::Debug for MonteCarloRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MonteCarloRunner")
            .field("pool", &self.pool)
            .field("batch_size", &self.batch_size)
            .field("simulation_version", &self.simulation_version)
            .finish_non_exhaustive()
    }
}

impl MonteCarloRunner {
    pub fn new(pool: WorkerPool, batch_size: usize, simulation_version: impl Into<String>) -> Self {
        Self {
            pool,
            batch_size: batch_size.max(1),
            simulation_version: simulation_version.into(),
            run_fn: Arc::new(|engine: &Engine, _index: u32, seed: u64| engine.run(seed)),
        }
    }

    /// Replace [`Engine::run`] as the per-realization step.
    pub fn with_run_fn(mut self, run_fn: RunFn) -> Self {
        self.run_fn = run_fn;
        self
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    /// Run every realization of `engine`'s scenario and reduce the ensemble.
    ///
    /// The first failing run fails the whole call; no partial ensemble is
    /// returned as a success. A `true` on `cancel` yields
    /// [`ForecastError::Canceled`].
    #[instrument(skip_all, fields(total_runs = engine.scenario().mc_runs()))]
    pub async fn run<F>(
        &self,
        engine: Arc<Engine>,
        mut cancel: watch::Receiver<bool>,
        mut on_progress: F,
    ) -> Result<ForecastResult>
    where
        F: FnMut(ProgressUpdate),
    {
        let total = engine.scenario().mc_runs();
        let mut ensemble = Ensemble::new(&engine, &self.simulation_version);
        let indices: Vec<u32> = (0..total).collect();

        for (batch_no, batch) in indices.chunks(self.batch_size).enumerate() {
            if *cancel.borrow() {
                debug!(completed = ensemble.completed(), "cancel observed between batches");
                return Err(ForecastError::Canceled);
            }
            debug!(batch = batch_no, size = batch.len(), "dispatching batch");

            let mut pending: FuturesOrdered<_> = batch
                .iter()
                .map(|&index| {
                    let engine = Arc::clone(&engine);
                    let run_fn = Arc::clone(&self.run_fn);
                    let pool = self.pool.clone();
                    async move {
                        let seed = engine.scenario().run_seed(index);
                        let outcome = pool.execute(move || run_fn(&engine, index, seed)).await;
                        (index, outcome)
                    }
                })
                .collect();

            loop {
                let next = tokio::select! {
                    biased;
                    _ = canceled(&mut cancel) => {
                        debug!(completed = ensemble.completed(), "cancel observed mid-batch");
                        return Err(ForecastError::Canceled);
                    }
                    next = pending.next() => next,
                };
                let Some((run_index, outcome)) = next else {
                    break;
                };

                let run = match outcome {
                    Ok(Ok(run)) => run,
                    Ok(Err(e)) => {
                        return Err(ForecastError::Run {
                            run_index,
                            message: e.to_string(),
                        })
                    }
                    Err(e) => {
                        return Err(ForecastError::Run {
                            run_index,
                            message: e.to_string(),
                        })
                    }
                };

                ensemble.add(&run);
                METRICS.add_runs_completed(1);

                let completed = ensemble.completed();
                if completed < total {
                    let partial = pending.is_empty().then(|| ensemble.assemble());
                    on_progress(ProgressUpdate {
                        completed,
                        total,
                        partial,
                    });
                }
            }
        }

        Ok(ensemble.assemble())
    }
}

/// Resolves once `rx` reads `true`. Never resolves if the sender is gone.
pub(crate) async fn canceled(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
