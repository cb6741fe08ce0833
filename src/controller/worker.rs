//! Worker pool and sweep loops
//!
//! N workers and the two sweep loops run as tokio tasks sharing one
//! controller. Every loop checks the cancellation token at the top of each
//! iteration and while waiting.

use super::{Controller, WorkOutcome};
use crate::{LoomError, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy)]
enum Sweep {
    Cron,
    Retry,
}

impl Controller {
    /// Runs the worker pool and both sweep loops until `token` is cancelled
    ///
    /// Waits for every loop to exit, then calls [`Controller::finish`].
    pub async fn run(self: Arc<Self>, token: CancellationToken) -> Result<()> {
        self.ensure_initialized()?;

        let worker_count = self.config.worker_count;
        tracing::info!(
            "Starting {} workers, sweeps every {}s",
            worker_count,
            self.config.sweep_interval
        );

        let mut loops = JoinSet::new();
        for worker_id in 0..worker_count {
            let controller = self.clone();
            let token = token.clone();
            loops.spawn(async move { controller.worker_loop(worker_id, token).await });
        }
        for sweep in [Sweep::Cron, Sweep::Retry] {
            let controller = self.clone();
            let token = token.clone();
            loops.spawn(async move { controller.sweep_loop(sweep, token).await });
        }

        while let Some(joined) = loops.join_next().await {
            if let Err(e) = joined {
                tracing::error!("Controller loop aborted: {}", e);
            }
        }

        self.finish().await;
        Ok(())
    }

    async fn worker_loop(&self, worker_id: i64, token: CancellationToken) {
        let backoff = Duration::from_millis(self.config.idle_backoff);
        tracing::debug!("Worker {} started", worker_id);

        while !token.is_cancelled() {
            let idle = match self.work_once().await {
                Ok(outcome) => {
                    if let WorkOutcome::Finished { state, url, .. } = &outcome {
                        tracing::trace!("Worker {}: {} {}", worker_id, state, url);
                    }
                    outcome.is_idle()
                }
                Err(LoomError::NotInitialized) => break,
                Err(e) => {
                    tracing::warn!("Worker {}: {}", worker_id, e);
                    true
                }
            };

            if idle {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(backoff) => {}
                }
            }
        }

        tracing::debug!("Worker {} stopped", worker_id);
    }

    async fn sweep_loop(&self, sweep: Sweep, token: CancellationToken) {
        let mut ticker = tokio::time::interval(Duration::from_secs(self.config.sweep_interval));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let result = match sweep {
                Sweep::Cron => self.cron_sweep(),
                Sweep::Retry => self.retry_sweep(),
            };
            match result {
                Ok(_) => {}
                Err(LoomError::NotInitialized) => break,
                Err(e) => tracing::warn!("{:?} sweep failed: {}", sweep, e),
            }
        }

        tracing::debug!("{:?} sweep stopped", sweep);
    }
}
