//! Bounded time axes for the aggregate and per-target series.
//!
//! The tracker owns two axes:
//!
//! - the **server axis**, one timestamp per scheduling cycle, shared by every
//!   per-target series so clients can zip timestamps with samples;
//! - the **aggregate series**, at most one point per `update_gap`, covering
//!   the long graph window.
//!
//! Both are FIFO-capped by [`SeriesLimits`] and read through copies.

use std::time::Duration;

use minewatch_storage::{StorageBackend, StorageResult};
use minewatch_types::AggregatePoint;
use parking_lot::RwLock;
use tracing::debug;

use crate::series::BoundedSeries;

/// Maximum retained points, fixed at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeriesLimits {
    pub max_graph_length: usize,
    pub max_server_graph_length: usize,
}

impl SeriesLimits {
    /// `ceil(graph_duration / max(update_gap, ping_interval))` aggregate
    /// points and `ceil(server_duration / ping_interval)` per-target points,
    /// each at least one.
    pub fn derive(
        graph_duration: Duration,
        server_duration: Duration,
        update_gap: Duration,
        ping_interval: Duration,
    ) -> Self {
        let graph_step = update_gap.max(ping_interval);
        Self {
            max_graph_length: ceil_div(graph_duration, graph_step),
            max_server_graph_length: ceil_div(server_duration, ping_interval),
        }
    }
}

fn ceil_div(total: Duration, step: Duration) -> usize {
    let step = step.as_millis();
    if step == 0 {
        return 1;
    }
    let points = total.as_millis().div_ceil(step);
    usize::try_from(points).unwrap_or(usize::MAX).max(1)
}

/// The timestamp assigned to one scheduling cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CyclePoint {
    pub timestamp_ms: u64,
    /// Whether this cycle is far enough from the last aggregate point to add
    /// a new one.
    pub update_graph: bool,
}

#[derive(Debug)]
struct Axes {
    server: BoundedSeries<u64>,
    aggregate: BoundedSeries<AggregatePoint>,
}

/// Owns the shared timestamp axes and the aggregate values.
#[derive(Debug)]
pub struct TimeTracker {
    limits: SeriesLimits,
    update_gap_ms: u64,
    axes: RwLock<Axes>,
}

impl TimeTracker {
    pub fn new(limits: SeriesLimits, update_gap: Duration) -> Self {
        Self {
            limits,
            update_gap_ms: u64::try_from(update_gap.as_millis()).unwrap_or(u64::MAX),
            axes: RwLock::new(Axes {
                server: BoundedSeries::new(limits.max_server_graph_length),
                aggregate: BoundedSeries::new(limits.max_graph_length),
            }),
        }
    }

    pub fn limits(&self) -> SeriesLimits {
        self.limits
    }

    /// The timestamp the next cycle will use if it started at `now_ms`.
    ///
    /// Nothing is recorded; the axis only grows in
    /// [`commit_cycle`](Self::commit_cycle). Timestamps are strictly
    /// increasing: a clock that stalls or steps backwards yields the previous
    /// timestamp plus 1 ms.
    pub fn peek_cycle_point(&self, now_ms: u64) -> CyclePoint {
        let axes = self.axes.read();

        let timestamp_ms = match axes.server.last() {
            Some(&last) if now_ms <= last => last + 1,
            _ => now_ms,
        };

        let update_graph = match axes.aggregate.last() {
            None => true,
            Some(last) => timestamp_ms.saturating_sub(last.timestamp_ms) >= self.update_gap_ms,
        };

        CyclePoint {
            timestamp_ms,
            update_graph,
        }
    }

    /// Append `point` to the server axis and run `record` while the axis is
    /// still locked, so per-target samples land together with their
    /// timestamp.
    ///
    /// Returns `None` without calling `record` if the point is not after the
    /// current end of the axis.
    pub fn commit_cycle<R>(&self, point: &CyclePoint, record: impl FnOnce() -> R) -> Option<R> {
        let mut axes = self.axes.write();
        if axes
            .server
            .last()
            .is_some_and(|&last| point.timestamp_ms <= last)
        {
            return None;
        }
        axes.server.push(point.timestamp_ms);
        Some(record())
    }

    /// Copy the server axis and run `read` before any cycle can commit.
    ///
    /// Per-target series read inside `read` line up index for index with
    /// the axis.
    pub fn with_server_axis<R>(&self, read: impl FnOnce(Vec<u64>) -> R) -> R {
        let axes = self.axes.read();
        read(axes.server.to_vec())
    }

    /// Append an aggregate point. Returns `false`, leaving the series
    /// untouched, if `timestamp_ms` is not after the last point.
    pub fn record_aggregate_point(&self, timestamp_ms: u64, value: Option<f64>) -> bool {
        let mut axes = self.axes.write();
        if axes
            .aggregate
            .last()
            .is_some_and(|last| timestamp_ms <= last.timestamp_ms)
        {
            return false;
        }
        axes.aggregate.push(AggregatePoint::new(timestamp_ms, value));
        true
    }

    /// Timestamps of the aggregate series.
    pub fn graph_points(&self) -> Vec<u64> {
        self.axes
            .read()
            .aggregate
            .iter()
            .map(|p| p.timestamp_ms)
            .collect()
    }

    pub fn aggregate_points(&self) -> Vec<AggregatePoint> {
        self.axes.read().aggregate.to_vec()
    }

    /// The shared per-target axis.
    pub fn server_graph_points(&self) -> Vec<u64> {
        self.axes.read().server.to_vec()
    }

    pub fn last_aggregate(&self) -> Option<AggregatePoint> {
        self.axes.read().aggregate.last().copied()
    }

    /// Seed the aggregate series from the trailing `duration` of storage.
    ///
    /// Returns how many points were kept.
    pub async fn load_graph_points(
        &self,
        duration: Duration,
        backend: &dyn StorageBackend,
    ) -> StorageResult<usize> {
        let rows = backend.load_graph_points(duration).await?;
        let loaded = rows.len();
        let kept = self.seed_graph_points(rows);
        debug!(loaded, kept, "Seeded aggregate series from storage");
        Ok(kept)
    }

    /// Replace the aggregate series with `rows`: sorted, thinned so that
    /// consecutive points are at least `update_gap` apart, then trimmed to
    /// the newest `max_graph_length`.
    pub fn seed_graph_points(&self, mut rows: Vec<AggregatePoint>) -> usize {
        rows.sort_by_key(|p| p.timestamp_ms);

        let mut thinned: Vec<AggregatePoint> = Vec::with_capacity(rows.len());
        for row in rows {
            let keep = match thinned.last() {
                None => true,
                Some(prev) => {
                    row.timestamp_ms > prev.timestamp_ms
                        && row.timestamp_ms - prev.timestamp_ms >= self.update_gap_ms
                }
            };
            if keep {
                thinned.push(row);
            }
        }

        let mut axes = self.axes.write();
        axes.aggregate.reset_from(thinned);
        axes.aggregate.len()
    }
}
