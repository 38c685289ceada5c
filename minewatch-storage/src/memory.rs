//! In-process backend. Nothing survives a restart.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use minewatch_types::{current_timestamp_ms, AggregatePoint, Sample, TargetRecord};
use parking_lot::RwLock;

use crate::backend::{fold_record, window_start};
use crate::{PruneGate, PruneOutcome, SampleBatch, StorageBackend, StorageResult};

#[derive(Debug, Default)]
struct Tables {
    aggregate: Vec<AggregatePoint>,
    pings: Vec<(String, Sample)>,
}

/// Stores rows in memory.
///
/// Used when no durable backend is configured, when the operator chose to
/// start without an unreachable store, and in tests.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    tables: RwLock<Tables>,
    gate: PruneGate,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored samples across all targets.
    pub fn sample_count(&self) -> usize {
        self.tables.read().pings.len()
    }

    /// Number of stored aggregate points.
    pub fn aggregate_count(&self) -> usize {
        self.tables.read().aggregate.len()
    }

    /// Stored samples for one target, in insertion order.
    pub fn samples_for(&self, target_id: &str) -> Vec<Sample> {
        self.tables
            .read()
            .pings
            .iter()
            .filter(|(id, _)| id == target_id)
            .map(|(_, s)| s.clone())
            .collect()
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn initialize(&self) -> StorageResult<()> {
        Ok(())
    }

    async fn ensure_indexes(&self) -> StorageResult<()> {
        Ok(())
    }

    async fn load_graph_points(&self, duration: Duration) -> StorageResult<Vec<AggregatePoint>> {
        let now = current_timestamp_ms();
        let start = window_start(now, duration);
        let mut points: Vec<AggregatePoint> = self
            .tables
            .read()
            .aggregate
            .iter()
            .filter(|p| p.timestamp_ms >= start && p.timestamp_ms <= now)
            .copied()
            .collect();
        points.sort_by_key(|p| p.timestamp_ms);
        Ok(points)
    }

    async fn load_records(&self) -> StorageResult<BTreeMap<String, TargetRecord>> {
        let tables = self.tables.read();
        let mut records: BTreeMap<String, TargetRecord> = BTreeMap::new();
        for (id, sample) in &tables.pings {
            fold_record(records.entry(id.clone()).or_default(), sample);
        }
        Ok(records)
    }

    async fn append_sample(&self, target_id: &str, sample: &Sample) -> StorageResult<()> {
        self.tables
            .write()
            .pings
            .push((target_id.to_string(), sample.clone()));
        Ok(())
    }

    async fn append_aggregate(&self, point: &AggregatePoint) -> StorageResult<()> {
        self.tables.write().aggregate.push(*point);
        Ok(())
    }

    async fn append_batch(&self, batch: &SampleBatch) -> StorageResult<()> {
        let mut tables = self.tables.write();
        if let Some(point) = batch.aggregate {
            tables.aggregate.push(point);
        }
        tables.pings.extend(batch.samples.iter().cloned());
        Ok(())
    }

    async fn prune_before(&self, cutoff_ms: u64) -> StorageResult<PruneOutcome> {
        let Some(_permit) = self.gate.try_enter() else {
            return Ok(PruneOutcome::Skipped);
        };

        let mut tables = self.tables.write();
        let before = tables.pings.len() + tables.aggregate.len();
        tables.pings.retain(|(_, s)| s.timestamp_ms >= cutoff_ms);
        tables.aggregate.retain(|p| p.timestamp_ms >= cutoff_ms);
        let after = tables.pings.len() + tables.aggregate.len();
        Ok(PruneOutcome::Deleted((before - after) as u64))
    }
}
