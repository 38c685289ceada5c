//! The storage contract shared by every backend.

use std::collections::BTreeMap;
use std::fmt::Debug;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use minewatch_types::{AggregatePoint, Reading, Sample, TargetRecord};

use crate::{StorageError, StorageResult};

/// Everything one scheduling cycle wants persisted.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SampleBatch {
    /// Set when the cycle also extended the aggregate series.
    pub aggregate: Option<AggregatePoint>,
    /// `(target id, sample)` pairs.
    pub samples: Vec<(String, Sample)>,
}

impl SampleBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_sample(&mut self, target_id: impl Into<String>, sample: Sample) {
        self.samples.push((target_id.into(), sample));
    }

    pub fn set_aggregate(&mut self, point: AggregatePoint) {
        self.aggregate = Some(point);
    }

    /// Number of rows this batch writes.
    pub fn len(&self) -> usize {
        self.samples.len() + usize::from(self.aggregate.is_some())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Result of a prune request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PruneOutcome {
    /// Rows older than the cutoff were removed.
    Deleted(u64),
    /// Another prune was still running, so this one did nothing.
    Skipped,
}

/// Persists samples and aggregate points, and answers the startup queries.
///
/// Implementations must be safe to call from several tasks at once. Appends
/// from the scheduler and deletes from the retention job can overlap.
#[async_trait]
pub trait StorageBackend: Send + Sync + Debug {
    /// Short name for logs (`memory`, `sqlite`, ...).
    fn name(&self) -> &'static str;

    /// Open the store and create the tables. Idempotent.
    async fn initialize(&self) -> StorageResult<()>;

    /// Create secondary indexes. Idempotent.
    async fn ensure_indexes(&self) -> StorageResult<()>;

    /// Aggregate points from the trailing `duration`, oldest first.
    async fn load_graph_points(&self, duration: Duration) -> StorageResult<Vec<AggregatePoint>>;

    /// Latest and peak sample for every target that has rows.
    async fn load_records(&self) -> StorageResult<BTreeMap<String, TargetRecord>>;

    async fn append_sample(&self, target_id: &str, sample: &Sample) -> StorageResult<()>;

    async fn append_aggregate(&self, point: &AggregatePoint) -> StorageResult<()>;

    /// Persist a whole cycle.
    ///
    /// The default writes row by row. A failed row does not stop the
    /// remaining rows from being attempted; the first error is reported.
    async fn append_batch(&self, batch: &SampleBatch) -> StorageResult<()> {
        let mut failed = 0usize;
        let mut first_error = None;

        if let Some(point) = &batch.aggregate {
            if let Err(e) = self.append_aggregate(point).await {
                failed += 1;
                first_error.get_or_insert(e);
            }
        }
        for (target_id, sample) in &batch.samples {
            if let Err(e) = self.append_sample(target_id, sample).await {
                failed += 1;
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            None => Ok(()),
            Some(e) if failed == 1 => Err(e),
            Some(e) => Err(StorageError::Write(format!(
                "{failed} of {} rows failed, first: {e}",
                batch.len()
            ))),
        }
    }

    /// Delete every sample and aggregate point with a timestamp strictly
    /// before `cutoff_ms`.
    ///
    /// Returns [`PruneOutcome::Skipped`] when a prune is already running.
    async fn prune_before(&self, cutoff_ms: u64) -> StorageResult<PruneOutcome>;
}

/// Lets at most one prune run per backend.
#[derive(Debug, Default)]
pub struct PruneGate {
    busy: AtomicBool,
}

/// Held while a prune runs. Reopens the gate on drop.
#[derive(Debug)]
pub struct PrunePermit<'a> {
    gate: &'a PruneGate,
}

impl PruneGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the gate, or `None` when a prune is in flight.
    pub fn try_enter(&self) -> Option<PrunePermit<'_>> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| PrunePermit { gate: self })
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }
}

impl Drop for PrunePermit<'_> {
    fn drop(&mut self) {
        self.gate.busy.store(false, Ordering::Release);
    }
}

/// Start of a trailing window ending at `now_ms`.
pub(crate) fn window_start(now_ms: u64, duration: Duration) -> u64 {
    now_ms.saturating_sub(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
}

/// Split a reading into the `(player_count, error)` column pair.
#[cfg_attr(not(any(feature = "sqlite", feature = "clickhouse")), allow(dead_code))]
pub(crate) fn reading_columns(reading: &Reading) -> (Option<u64>, Option<String>) {
    match reading {
        Reading::Value(v) => (Some(*v), None),
        Reading::Error(e) => (None, Some(e.clone())),
    }
}

/// Rebuild a reading from its column pair. An error column wins.
#[cfg_attr(not(any(feature = "sqlite", feature = "clickhouse")), allow(dead_code))]
pub(crate) fn reading_from_columns(player_count: Option<u64>, error: Option<String>) -> Reading {
    match (player_count, error) {
        (_, Some(e)) => Reading::Error(e),
        (Some(v), None) => Reading::Value(v),
        (None, None) => Reading::Error("no reading recorded".to_string()),
    }
}

/// Fold a row into a target's record: newest timestamp becomes `latest`,
/// highest value becomes `peak` (ties go to the newer sample).
pub(crate) fn fold_record(record: &mut TargetRecord, sample: &Sample) {
    let newer = record
        .latest
        .as_ref()
        .map_or(true, |l| sample.timestamp_ms >= l.timestamp_ms);
    if newer {
        record.latest = Some(sample.clone());
    }

    if let Some(value) = sample.reading.value() {
        let higher = match record.peak.as_ref() {
            None => true,
            Some(peak) => {
                let best = peak.reading.value().unwrap_or(0);
                value > best || (value == best && sample.timestamp_ms >= peak.timestamp_ms)
            }
        };
        if higher {
            record.peak = Some(sample.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Default)]
    struct Flaky {
        written: parking_lot::Mutex<Vec<String>>,
    }

    #[async_trait]
    impl StorageBackend for Flaky {
        fn name(&self) -> &'static str {
            "flaky"
        }
        async fn initialize(&self) -> StorageResult<()> {
            Ok(())
        }
        async fn ensure_indexes(&self) -> StorageResult<()> {
            Ok(())
        }
        async fn load_graph_points(&self, _: Duration) -> StorageResult<Vec<AggregatePoint>> {
            Ok(Vec::new())
        }
        async fn load_records(&self) -> StorageResult<BTreeMap<String, TargetRecord>> {
            Ok(BTreeMap::new())
        }
        async fn append_sample(&self, target_id: &str, _: &Sample) -> StorageResult<()> {
            if target_id == "bad" {
                return Err(StorageError::Write("rejected".into()));
            }
            self.written.lock().push(target_id.to_string());
            Ok(())
        }
        async fn append_aggregate(&self, _: &AggregatePoint) -> StorageResult<()> {
            Ok(())
        }
        async fn prune_before(&self, _: u64) -> StorageResult<PruneOutcome> {
            Ok(PruneOutcome::Deleted(0))
        }
    }

    #[tokio::test]
    async fn default_batch_keeps_going_after_a_failed_row() {
        let backend = Flaky::default();
        let mut batch = SampleBatch::new();
        batch.push_sample("a", Sample::value(1, 1));
        batch.push_sample("bad", Sample::value(1, 2));
        batch.push_sample("c", Sample::value(1, 3));

        let err = backend.append_batch(&batch).await.unwrap_err();
        assert!(matches!(err, StorageError::Write(_)));
        assert_eq!(*backend.written.lock(), vec!["a", "c"]);
    }

    #[test]
    fn prune_gate_admits_one_holder() {
        let gate = PruneGate::new();
        let permit = gate.try_enter();
        assert!(permit.is_some());
        assert!(gate.is_busy());
        assert!(gate.try_enter().is_none());

        drop(permit);
        assert!(!gate.is_busy());
        assert!(gate.try_enter().is_some());
    }

    #[test]
    fn fold_tracks_latest_and_peak() {
        let mut record = TargetRecord::default();
        fold_record(&mut record, &Sample::value(10, 5));
        fold_record(&mut record, &Sample::value(20, 9));
        fold_record(&mut record, &Sample::error(30, "timeout"));
        fold_record(&mut record, &Sample::value(15, 9));

        assert_eq!(record.latest, Some(Sample::error(30, "timeout")));
        assert_eq!(record.peak, Some(Sample::value(20, 9)));
    }

    #[test]
    fn columns_roundtrip_error_marker() {
        let (count, error) = reading_columns(&Reading::Error("refused".into()));
        assert_eq!(count, None);
        assert_eq!(
            reading_from_columns(count, error),
            Reading::Error("refused".into())
        );
        assert_eq!(reading_from_columns(Some(4), None), Reading::Value(4));
    }

    #[test]
    fn window_start_saturates() {
        assert_eq!(window_start(1_000, Duration::from_secs(60)), 0);
        assert_eq!(window_start(61_000, Duration::from_secs(60)), 1_000);
    }
}
