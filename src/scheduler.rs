//! The perpetual probe → record → persist → publish loop.

use std::sync::Arc;
use std::time::{Duration, Instant};

use minewatch_storage::{SampleBatch, StorageBackend};
use minewatch_types::{AggregatePoint, Sample, UpdatePayload};
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::{AggregateReducer, Settings};
use crate::hub::NotificationHub;
use crate::probe::{ProbeError, ProbeResponse, Prober};
use crate::registry::TargetRegistry;
use crate::tracker::TimeTracker;

/// Marker recorded when a probe task dies without an outcome.
pub const PROBE_TASK_FAILED: &str = "probe task failed";

/// Timing and reduction knobs for the loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerOptions {
    /// Delay after each cycle.
    pub ping_interval: Duration,
    /// Per-target probe timeout.
    pub probe_timeout: Duration,
    pub reducer: AggregateReducer,
}

impl SchedulerOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            ping_interval: settings.rates.ping_interval,
            probe_timeout: settings.rates.probe_timeout,
            reducer: settings.graph.reducer,
        }
    }
}

/// How a call to [`Scheduler::schedule`] ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Probes resolved, results recorded, inter-cycle delay observed.
    Completed,
    /// Shutdown arrived while probes were in flight; nothing was recorded.
    Cancelled,
}

/// Drives probing for every registered target.
#[derive(Debug)]
pub struct Scheduler {
    registry: Arc<TargetRegistry>,
    tracker: Arc<TimeTracker>,
    hub: Arc<NotificationHub>,
    prober: Arc<dyn Prober>,
    storage: Arc<dyn StorageBackend>,
    clock: Arc<dyn Clock>,
    options: SchedulerOptions,
}

impl Scheduler {
    pub fn new(
        hub: Arc<NotificationHub>,
        prober: Arc<dyn Prober>,
        storage: Arc<dyn StorageBackend>,
        options: SchedulerOptions,
    ) -> Self {
        Self {
            registry: Arc::clone(hub.registry()),
            tracker: Arc::clone(hub.tracker()),
            hub,
            prober,
            storage,
            clock: Arc::new(SystemClock),
            options,
        }
    }

    /// Replace the wall clock used for cycle timestamps.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn options(&self) -> &SchedulerOptions {
        &self.options
    }

    /// Run one cycle and wait out the inter-cycle delay.
    ///
    /// Probe failures never surface here; they are recorded as error-marker
    /// samples. Each outcome becomes the target's `latest` as soon as it
    /// arrives; series entries, the axis point and the aggregate are
    /// committed together once every probe has resolved.
    ///
    /// If `shutdown` flips (or its sender goes away) while probes are in
    /// flight, they are aborted and nothing from the cycle reaches the
    /// series, the axis or storage.
    pub async fn schedule(&self, shutdown: &mut watch::Receiver<bool>) -> CycleOutcome {
        if *shutdown.borrow() {
            return CycleOutcome::Cancelled;
        }

        let started = Instant::now();
        let point = self.tracker.peek_cycle_point(self.clock.now_ms());
        let timestamp = point.timestamp_ms;

        let mut probes = JoinSet::new();
        for (index, target) in self.registry.iter().enumerate() {
            let prober = Arc::clone(&self.prober);
            let info = target.info().clone();
            let timeout = self.options.probe_timeout;
            probes.spawn(async move {
                let outcome = match tokio::time::timeout(timeout, prober.probe(&info)).await {
                    Ok(result) => result,
                    Err(_) => Err(ProbeError::Timeout(timeout)),
                };
                (index, outcome)
            });
        }

        let targets: Vec<_> = self.registry.iter().collect();
        let mut staged: Vec<Option<(Sample, Option<String>)>> = vec![None; targets.len()];

        loop {
            tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        probes.abort_all();
                        debug!(timestamp, "Cycle cancelled by shutdown");
                        return CycleOutcome::Cancelled;
                    }
                }
                joined = probes.join_next() => {
                    let Some(joined) = joined else { break };
                    match joined {
                        Ok((index, outcome)) => {
                            let target_id = targets[index].id();
                            let (sample, version) = sample_from(timestamp, outcome, target_id);
                            self.registry
                                .observe_server_point(target_id, &sample, version.as_deref());
                            staged[index] = Some((sample, version));
                        }
                        Err(e) => warn!(error = %e, "Probe task ended without an outcome"),
                    }
                }
            }
        }

        // Series entries and the axis point become visible together.
        let mut values = Vec::with_capacity(targets.len());
        let mut batch = SampleBatch::new();
        let committed = self.tracker.commit_cycle(&point, || {
            let mut updates = Vec::with_capacity(targets.len());
            for (target, outcome) in targets.iter().zip(staged) {
                let (sample, version) =
                    outcome.unwrap_or_else(|| (Sample::error(timestamp, PROBE_TASK_FAILED), None));
                if let Some(players) = sample.reading.value() {
                    values.push(players);
                }
                if let Some(update) =
                    self.registry
                        .record_server_point(target.id(), sample.clone(), version)
                {
                    updates.push(update);
                }
                batch.push_sample(target.id(), sample);
            }
            updates
        });
        let Some(updates) = committed else {
            warn!(timestamp, "Cycle timestamp already on the axis, dropping cycle");
            return CycleOutcome::Completed;
        };

        let mut aggregate = None;
        if point.update_graph {
            let value = self.options.reducer.reduce(&values);
            if self.tracker.record_aggregate_point(timestamp, value) {
                let recorded = AggregatePoint::new(timestamp, value);
                batch.set_aggregate(recorded);
                aggregate = Some(recorded);
            }
        }

        if let Err(e) = self.storage.append_batch(&batch).await {
            warn!(
                backend = self.storage.name(),
                rows = batch.len(),
                error = %e,
                "Failed to persist cycle"
            );
        }

        let receivers = self.hub.publish(UpdatePayload {
            timestamp,
            update_history_graph: aggregate.is_some(),
            aggregate,
            updates,
        });

        debug!(
            timestamp,
            answered = values.len(),
            targets = targets.len(),
            aggregate = ?aggregate.and_then(|p| p.value),
            receivers,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Cycle complete"
        );

        if !self.options.ping_interval.is_zero() {
            tokio::select! {
                _ = tokio::time::sleep(self.options.ping_interval) => {}
                _ = shutdown.changed() => {}
            }
        }
        CycleOutcome::Completed
    }

    /// Cycle until `shutdown` is set or its sender is dropped.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            targets = self.registry.len(),
            interval = ?self.options.ping_interval,
            timeout = ?self.options.probe_timeout,
            "Scheduler started"
        );
        loop {
            if self.schedule(&mut shutdown).await == CycleOutcome::Cancelled {
                break;
            }
            if *shutdown.borrow() || shutdown.has_changed().is_err() {
                break;
            }
        }
        info!("Scheduler stopped");
    }

    /// Start [`run`](Self::run) on its own task.
    pub fn spawn(self) -> SchedulerHandle {
        let (stop_tx, stop_rx) = watch::channel(false);
        let task = tokio::spawn(async move { self.run(stop_rx).await });
        SchedulerHandle { stop_tx, task }
    }
}

fn sample_from(
    timestamp: u64,
    outcome: Result<ProbeResponse, ProbeError>,
    target_id: &str,
) -> (Sample, Option<String>) {
    match outcome {
        Ok(response) => (
            Sample::value(timestamp, response.players_online),
            response.version,
        ),
        Err(e) => {
            debug!(target_id, error = %e, "Probe failed");
            (Sample::error(timestamp, e.to_string()), None)
        }
    }
}

/// Handle to a spawned scheduler.
#[derive(Debug)]
pub struct SchedulerHandle {
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Signal the loop to stop. In-flight probes are abandoned.
    pub fn stop(&self) {
        let _ = self.stop_tx.send(true);
    }

    /// Stop and wait for the loop to exit.
    pub async fn shutdown(self) {
        self.stop();
        let _ = self.task.await;
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}
