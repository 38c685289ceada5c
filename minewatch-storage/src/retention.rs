//! Background pruning of rows older than the retention window.

use std::sync::Arc;
use std::time::Duration;

use minewatch_types::current_timestamp_ms;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::backend::window_start;
use crate::{PruneOutcome, StorageBackend};

/// How much history to keep and how often to enforce it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    /// Rows older than `now - window` are deleted.
    pub window: Duration,
    /// Time between prunes.
    pub interval: Duration,
}

/// Handle to a running retention job.
///
/// The job stops when [`stop`](Self::stop) is called or the handle is dropped.
#[derive(Debug)]
pub struct RetentionHandle {
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl RetentionHandle {
    /// Signal the job to stop after its current prune.
    pub fn stop(&self) {
        let _ = self.stop_tx.send(true);
    }

    /// Stop the job and wait for it to exit.
    pub async fn shutdown(self) {
        self.stop();
        let _ = self.task.await;
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// Spawn a task that calls [`StorageBackend::prune_before`] every
/// `policy.interval`, starting immediately.
///
/// `on_tick` sees the outcome of every successful prune. Failures are logged
/// and the job keeps running.
pub fn start_retention_job<F>(
    backend: Arc<dyn StorageBackend>,
    policy: RetentionPolicy,
    on_tick: F,
) -> RetentionHandle
where
    F: Fn(PruneOutcome) + Send + 'static,
{
    let (stop_tx, mut stop_rx) = watch::channel(false);
    let period = policy.interval.max(Duration::from_millis(1));

    let task = tokio::spawn(async move {
        let mut interval_timer = tokio::time::interval(period);
        interval_timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = interval_timer.tick() => {
                    let cutoff = window_start(current_timestamp_ms(), policy.window);
                    match backend.prune_before(cutoff).await {
                        Ok(outcome) => {
                            match outcome {
                                PruneOutcome::Deleted(0) => {
                                    debug!(backend = backend.name(), "Nothing to prune");
                                }
                                PruneOutcome::Deleted(rows) => {
                                    info!(backend = backend.name(), rows, cutoff, "Pruned old samples");
                                }
                                PruneOutcome::Skipped => {
                                    debug!(backend = backend.name(), "Previous prune still running, skipped");
                                }
                            }
                            on_tick(outcome);
                        }
                        Err(e) => {
                            warn!(backend = backend.name(), error = %e, "Prune failed");
                        }
                    }
                }
                changed = stop_rx.changed() => {
                    if changed.is_err() || *stop_rx.borrow() {
                        break;
                    }
                }
            }
        }
        debug!("Retention job stopped");
    });

    RetentionHandle { stop_tx, task }
}
