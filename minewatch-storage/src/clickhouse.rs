//! ClickHouse backend, for deployments that keep history on a shared server.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use clickhouse::{Client, Row};
use minewatch_types::{current_timestamp_ms, AggregatePoint, Sample, TargetRecord};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

use crate::backend::{fold_record, reading_columns, reading_from_columns, window_start};
use crate::{
    PruneGate, PruneOutcome, SampleBatch, StorageBackend, StorageError, StorageResult,
};

const CREATE_PINGS: &str = "
    CREATE TABLE IF NOT EXISTS pings (
        timestamp Int64,
        target String,
        player_count Nullable(UInt64),
        error Nullable(String)
    )
    ENGINE = MergeTree
    ORDER BY (target, timestamp)
";

const CREATE_AGGREGATE: &str = "
    CREATE TABLE IF NOT EXISTS aggregate_points (
        timestamp Int64,
        value Nullable(Float64)
    )
    ENGINE = MergeTree
    ORDER BY timestamp
";

const PINGS_TIMESTAMP_INDEX: &str = "
    ALTER TABLE pings
    ADD INDEX IF NOT EXISTS pings_timestamp_idx timestamp TYPE minmax GRANULARITY 4
";

/// Connection settings for [`ClickHouseBackend`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClickHouseConfig {
    pub url: String,
    pub user: String,
    pub password: Option<String>,
    pub database: String,
}

impl Default for ClickHouseConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:8123".to_string(),
            user: "default".to_string(),
            password: None,
            database: "default".to_string(),
        }
    }
}

#[derive(Debug, Clone, Row, Serialize, Deserialize)]
struct PingRow {
    timestamp: i64,
    target: String,
    player_count: Option<u64>,
    error: Option<String>,
}

impl PingRow {
    fn new(target_id: &str, sample: &Sample) -> Self {
        let (player_count, error) = reading_columns(&sample.reading);
        Self {
            timestamp: to_column(sample.timestamp_ms),
            target: target_id.to_string(),
            player_count,
            error,
        }
    }

    fn into_sample(self) -> (String, Sample) {
        let reading = reading_from_columns(self.player_count, self.error);
        (
            self.target,
            Sample::new(from_column(self.timestamp), reading),
        )
    }
}

#[derive(Debug, Clone, Row, Serialize, Deserialize)]
struct AggregateRow {
    timestamp: i64,
    value: Option<f64>,
}

impl From<&AggregatePoint> for AggregateRow {
    fn from(point: &AggregatePoint) -> Self {
        Self {
            timestamp: to_column(point.timestamp_ms),
            value: point.value,
        }
    }
}

impl From<AggregateRow> for AggregatePoint {
    fn from(row: AggregateRow) -> Self {
        AggregatePoint::new(from_column(row.timestamp), row.value)
    }
}

/// Persists samples in ClickHouse over its HTTP interface.
#[derive(Clone)]
pub struct ClickHouseBackend {
    client: Client,
    // Deletes wait for the mutation to finish so the reported count holds.
    mutations: Client,
    url: String,
    database: String,
    write_lock: Arc<Mutex<()>>,
    gate: Arc<PruneGate>,
}

impl fmt::Debug for ClickHouseBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClickHouseBackend")
            .field("url", &self.url)
            .field("database", &self.database)
            .finish_non_exhaustive()
    }
}

impl ClickHouseBackend {
    pub fn new(config: &ClickHouseConfig) -> Self {
        let mut client = Client::default()
            .with_url(config.url.clone())
            .with_user(config.user.clone())
            .with_database(config.database.clone());

        if let Some(password) = &config.password {
            client = client.with_password(password.clone());
        }

        let mutations = client.clone().with_option("mutations_sync", "1");

        Self {
            client,
            mutations,
            url: config.url.clone(),
            database: config.database.clone(),
            write_lock: Arc::new(Mutex::new(())),
            gate: Arc::new(PruneGate::new()),
        }
    }

    async fn count_before(&self, table: &str, cutoff: i64) -> StorageResult<u64> {
        self.client
            .query(&format!("SELECT count() FROM {table} WHERE timestamp < ?"))
            .bind(cutoff)
            .fetch_one::<u64>()
            .await
            .map_err(read_error)
    }

    async fn fetch_pings(&self, query: &str) -> StorageResult<Vec<PingRow>> {
        self.client
            .query(query)
            .fetch_all::<PingRow>()
            .await
            .map_err(read_error)
    }
}

#[async_trait]
impl StorageBackend for ClickHouseBackend {
    fn name(&self) -> &'static str {
        "clickhouse"
    }

    async fn initialize(&self) -> StorageResult<()> {
        self.client
            .query("SELECT 1")
            .execute()
            .await
            .map_err(|e| StorageError::Connection(format!("{}: {e}", self.url)))?;

        for statement in [CREATE_PINGS, CREATE_AGGREGATE] {
            self.client
                .query(statement)
                .execute()
                .await
                .map_err(|e| StorageError::Schema(e.to_string()))?;
        }
        Ok(())
    }

    async fn ensure_indexes(&self) -> StorageResult<()> {
        self.client
            .query(PINGS_TIMESTAMP_INDEX)
            .execute()
            .await
            .map_err(|e| StorageError::Schema(e.to_string()))
    }

    async fn load_graph_points(&self, duration: Duration) -> StorageResult<Vec<AggregatePoint>> {
        let now = current_timestamp_ms();
        let rows: Vec<AggregateRow> = self
            .client
            .query(
                "SELECT timestamp, value FROM aggregate_points
                 WHERE timestamp >= ? AND timestamp <= ?
                 ORDER BY timestamp ASC",
            )
            .bind(to_column(window_start(now, duration)))
            .bind(to_column(now))
            .fetch_all()
            .await
            .map_err(read_error)?;

        Ok(rows.into_iter().map(AggregatePoint::from).collect())
    }

    async fn load_records(&self) -> StorageResult<BTreeMap<String, TargetRecord>> {
        let latest = self
            .fetch_pings(
                "SELECT timestamp, target, player_count, error FROM pings
                 ORDER BY target, timestamp DESC
                 LIMIT 1 BY target",
            )
            .await?;
        let peaks = self
            .fetch_pings(
                "SELECT timestamp, target, player_count, error FROM pings
                 WHERE player_count IS NOT NULL
                 ORDER BY target, player_count DESC, timestamp DESC
                 LIMIT 1 BY target",
            )
            .await?;

        let mut records: BTreeMap<String, TargetRecord> = BTreeMap::new();
        for row in latest.into_iter().chain(peaks) {
            let (target, sample) = row.into_sample();
            fold_record(records.entry(target).or_default(), &sample);
        }
        Ok(records)
    }

    async fn append_sample(&self, target_id: &str, sample: &Sample) -> StorageResult<()> {
        let _guard = self.write_lock.lock().await;
        let mut insert = self.client.insert("pings").map_err(write_error)?;
        insert
            .write(&PingRow::new(target_id, sample))
            .await
            .map_err(write_error)?;
        insert.end().await.map_err(write_error)
    }

    async fn append_aggregate(&self, point: &AggregatePoint) -> StorageResult<()> {
        let _guard = self.write_lock.lock().await;
        let mut insert = self.client.insert("aggregate_points").map_err(write_error)?;
        insert
            .write(&AggregateRow::from(point))
            .await
            .map_err(write_error)?;
        insert.end().await.map_err(write_error)
    }

    async fn append_batch(&self, batch: &SampleBatch) -> StorageResult<()> {
        let _guard = self.write_lock.lock().await;

        if let Some(point) = &batch.aggregate {
            let mut insert = self.client.insert("aggregate_points").map_err(write_error)?;
            insert
                .write(&AggregateRow::from(point))
                .await
                .map_err(write_error)?;
            insert.end().await.map_err(write_error)?;
        }

        if !batch.samples.is_empty() {
            let mut insert = self.client.insert("pings").map_err(write_error)?;
            for (target_id, sample) in &batch.samples {
                insert
                    .write(&PingRow::new(target_id, sample))
                    .await
                    .map_err(write_error)?;
            }
            insert.end().await.map_err(write_error)?;
        }
        Ok(())
    }

    async fn prune_before(&self, cutoff_ms: u64) -> StorageResult<PruneOutcome> {
        let Some(_permit) = self.gate.try_enter() else {
            return Ok(PruneOutcome::Skipped);
        };
        let cutoff = to_column(cutoff_ms);
        let _guard = self.write_lock.lock().await;

        let mut deleted = 0;
        for table in ["pings", "aggregate_points"] {
            let rows = self.count_before(table, cutoff).await?;
            if rows == 0 {
                continue;
            }
            self.mutations
                .query(&format!("ALTER TABLE {table} DELETE WHERE timestamp < ?"))
                .bind(cutoff)
                .execute()
                .await
                .map_err(write_error)?;
            debug!(table, rows, "Deleted rows before cutoff");
            deleted += rows;
        }
        Ok(PruneOutcome::Deleted(deleted))
    }
}

fn to_column(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn from_column(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}

fn read_error(error: clickhouse::error::Error) -> StorageError {
    StorageError::Read(error.to_string())
}

fn write_error(error: clickhouse::error::Error) -> StorageError {
    StorageError::Write(error.to_string())
}
