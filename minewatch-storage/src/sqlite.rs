//! Embedded SQLite backend.
//!
//! One connection per backend, opened lazily and guarded by a mutex, so the
//! retention job and the scheduler never write at the same time. Queries run
//! on the blocking pool.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use minewatch_types::{current_timestamp_ms, AggregatePoint, Sample, TargetRecord};
use parking_lot::Mutex;
use rusqlite::{params, Connection};

use crate::backend::{fold_record, reading_columns, reading_from_columns, window_start};
use crate::{
    PruneGate, PruneOutcome, SampleBatch, StorageBackend, StorageError, StorageResult,
};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS pings (
    timestamp INTEGER NOT NULL,
    target TEXT NOT NULL,
    player_count INTEGER,
    error TEXT
);

CREATE TABLE IF NOT EXISTS aggregate_points (
    timestamp INTEGER NOT NULL PRIMARY KEY,
    value REAL
);
"#;

const INDEXES: &str = r#"
CREATE INDEX IF NOT EXISTS idx_pings_target_timestamp ON pings(target, timestamp);
CREATE INDEX IF NOT EXISTS idx_pings_timestamp ON pings(timestamp);
"#;

/// Persists samples in a single SQLite database file.
#[derive(Debug, Clone)]
pub struct SqliteBackend {
    db_path: PathBuf,
    connection: Arc<Mutex<Option<Connection>>>,
    gate: Arc<PruneGate>,
}

impl SqliteBackend {
    pub fn new(db_path: impl AsRef<Path>) -> Self {
        Self {
            db_path: db_path.as_ref().to_path_buf(),
            connection: Arc::new(Mutex::new(None)),
            gate: Arc::new(PruneGate::new()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    async fn with_connection<T, F>(&self, func: F) -> StorageResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> StorageResult<T> + Send + 'static,
    {
        let db_path = self.db_path.clone();
        let connection = Arc::clone(&self.connection);
        tokio::task::spawn_blocking(move || {
            let mut guard = connection.lock();
            if guard.is_none() {
                *guard = Some(open_connection(&db_path)?);
            }
            match guard.as_mut() {
                Some(connection) => func(connection),
                None => Err(StorageError::Connection(format!(
                    "{}: not open",
                    db_path.display()
                ))),
            }
        })
        .await
        .map_err(|error| StorageError::Task(error.to_string()))?
    }
}

#[async_trait]
impl StorageBackend for SqliteBackend {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    async fn initialize(&self) -> StorageResult<()> {
        self.with_connection(|connection| {
            connection
                .execute_batch(SCHEMA)
                .map_err(|e| StorageError::Schema(e.to_string()))
        })
        .await
    }

    async fn ensure_indexes(&self) -> StorageResult<()> {
        self.with_connection(|connection| {
            connection
                .execute_batch(INDEXES)
                .map_err(|e| StorageError::Schema(e.to_string()))
        })
        .await
    }

    async fn load_graph_points(&self, duration: Duration) -> StorageResult<Vec<AggregatePoint>> {
        let now = current_timestamp_ms();
        let start = to_sql(window_start(now, duration));
        let end = to_sql(now);

        self.with_connection(move |connection| {
            let mut stmt = connection
                .prepare(
                    "SELECT timestamp, value FROM aggregate_points
                     WHERE timestamp >= ?1 AND timestamp <= ?2
                     ORDER BY timestamp ASC",
                )
                .map_err(read_error)?;
            let points = stmt
                .query_map(params![start, end], |row| {
                    Ok(AggregatePoint::new(
                        from_sql(row.get(0)?),
                        row.get::<_, Option<f64>>(1)?,
                    ))
                })
                .map_err(read_error)?
                .collect::<Result<Vec<_>, _>>()
                .map_err(read_error)?;
            Ok(points)
        })
        .await
    }

    async fn load_records(&self) -> StorageResult<BTreeMap<String, TargetRecord>> {
        self.with_connection(|connection| {
            let mut records: BTreeMap<String, TargetRecord> = BTreeMap::new();

            let mut latest = connection
                .prepare(
                    "SELECT p.target, p.timestamp, p.player_count, p.error
                     FROM pings p
                     JOIN (SELECT target, MAX(timestamp) AS ts FROM pings GROUP BY target) last
                       ON p.target = last.target AND p.timestamp = last.ts",
                )
                .map_err(read_error)?;
            let rows = latest
                .query_map([], read_ping_row)
                .map_err(read_error)?
                .collect::<Result<Vec<_>, _>>()
                .map_err(read_error)?;
            for (target, sample) in rows {
                fold_record(records.entry(target).or_default(), &sample);
            }

            let mut peaks = connection
                .prepare(
                    "SELECT p.target, p.timestamp, p.player_count, p.error
                     FROM pings p
                     JOIN (SELECT target, MAX(player_count) AS best FROM pings
                           WHERE player_count IS NOT NULL GROUP BY target) peak
                       ON p.target = peak.target AND p.player_count = peak.best
                     ORDER BY p.timestamp ASC",
                )
                .map_err(read_error)?;
            let rows = peaks
                .query_map([], read_ping_row)
                .map_err(read_error)?
                .collect::<Result<Vec<_>, _>>()
                .map_err(read_error)?;
            for (target, sample) in rows {
                fold_record(records.entry(target).or_default(), &sample);
            }

            Ok(records)
        })
        .await
    }

    async fn append_sample(&self, target_id: &str, sample: &Sample) -> StorageResult<()> {
        let target_id = target_id.to_string();
        let sample = sample.clone();
        self.with_connection(move |connection| insert_ping(connection, &target_id, &sample))
            .await
    }

    async fn append_aggregate(&self, point: &AggregatePoint) -> StorageResult<()> {
        let point = *point;
        self.with_connection(move |connection| insert_aggregate(connection, &point))
            .await
    }

    async fn append_batch(&self, batch: &SampleBatch) -> StorageResult<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let batch = batch.clone();
        self.with_connection(move |connection| {
            let tx = connection.transaction().map_err(write_error)?;
            if let Some(point) = &batch.aggregate {
                insert_aggregate(&tx, point)?;
            }
            for (target_id, sample) in &batch.samples {
                insert_ping(&tx, target_id, sample)?;
            }
            tx.commit().map_err(write_error)
        })
        .await
    }

    async fn prune_before(&self, cutoff_ms: u64) -> StorageResult<PruneOutcome> {
        let Some(_permit) = self.gate.try_enter() else {
            return Ok(PruneOutcome::Skipped);
        };
        let cutoff = to_sql(cutoff_ms);

        self.with_connection(move |connection| {
            let tx = connection.transaction().map_err(write_error)?;
            let pings = tx
                .execute("DELETE FROM pings WHERE timestamp < ?1", params![cutoff])
                .map_err(write_error)?;
            let points = tx
                .execute(
                    "DELETE FROM aggregate_points WHERE timestamp < ?1",
                    params![cutoff],
                )
                .map_err(write_error)?;
            tx.commit().map_err(write_error)?;
            Ok(PruneOutcome::Deleted((pings + points) as u64))
        })
        .await
    }
}

fn open_connection(path: &Path) -> StorageResult<Connection> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .map_err(|e| StorageError::Connection(format!("{}: {e}", parent.display())))?;
    }
    let connection = Connection::open(path)
        .map_err(|e| StorageError::Connection(format!("{}: {e}", path.display())))?;
    connection
        .execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA busy_timeout = 5000;
            "#,
        )
        .map_err(|e| StorageError::Connection(e.to_string()))?;
    Ok(connection)
}

fn insert_ping(connection: &Connection, target_id: &str, sample: &Sample) -> StorageResult<()> {
    let (player_count, error) = reading_columns(&sample.reading);
    connection
        .execute(
            "INSERT INTO pings (timestamp, target, player_count, error) VALUES (?1, ?2, ?3, ?4)",
            params![
                to_sql(sample.timestamp_ms),
                target_id,
                player_count.map(to_sql),
                error
            ],
        )
        .map_err(write_error)?;
    Ok(())
}

fn insert_aggregate(connection: &Connection, point: &AggregatePoint) -> StorageResult<()> {
    connection
        .execute(
            "INSERT OR REPLACE INTO aggregate_points (timestamp, value) VALUES (?1, ?2)",
            params![to_sql(point.timestamp_ms), point.value],
        )
        .map_err(write_error)?;
    Ok(())
}

fn read_ping_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<(String, Sample)> {
    let target: String = row.get(0)?;
    let timestamp: i64 = row.get(1)?;
    let player_count: Option<i64> = row.get(2)?;
    let error: Option<String> = row.get(3)?;
    let reading = reading_from_columns(player_count.map(from_sql), error);
    Ok((target, Sample::new(from_sql(timestamp), reading)))
}

// SQLite integers are signed.
fn to_sql(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn from_sql(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}

fn read_error(error: rusqlite::Error) -> StorageError {
    StorageError::Read(error.to_string())
}

fn write_error(error: rusqlite::Error) -> StorageError {
    StorageError::Write(error.to_string())
}
