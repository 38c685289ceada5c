//! Backend selection and startup preparation.

use std::sync::Arc;
use std::time::Duration;

use minewatch_storage::{MemoryBackend, StorageBackend, StorageError};
use tracing::{info, warn};

use crate::config::{ConfigError, StorageKind, StorageSettings};
use crate::registry::TargetRegistry;
use crate::tracker::TimeTracker;

/// Build the configured backend. Nothing is opened yet.
pub fn open_backend(settings: &StorageSettings) -> Result<Arc<dyn StorageBackend>, ConfigError> {
    match settings.backend {
        StorageKind::Memory => Ok(Arc::new(MemoryBackend::new())),
        StorageKind::Sqlite => sqlite_backend(settings),
        StorageKind::Clickhouse => clickhouse_backend(settings),
    }
}

#[cfg(feature = "sqlite")]
fn sqlite_backend(settings: &StorageSettings) -> Result<Arc<dyn StorageBackend>, ConfigError> {
    Ok(Arc::new(minewatch_storage::sqlite::SqliteBackend::new(
        &settings.sqlite_path,
    )))
}

#[cfg(not(feature = "sqlite"))]
fn sqlite_backend(_: &StorageSettings) -> Result<Arc<dyn StorageBackend>, ConfigError> {
    Err(ConfigError::BackendUnavailable("sqlite"))
}

#[cfg(feature = "clickhouse")]
fn clickhouse_backend(settings: &StorageSettings) -> Result<Arc<dyn StorageBackend>, ConfigError> {
    use minewatch_storage::clickhouse::{ClickHouseBackend, ClickHouseConfig};

    let ch = &settings.clickhouse;
    Ok(Arc::new(ClickHouseBackend::new(&ClickHouseConfig {
        url: ch.url.clone(),
        user: ch.user.clone(),
        password: ch.password.clone().filter(|p| !p.is_empty()),
        database: ch.database.clone(),
    })))
}

#[cfg(not(feature = "clickhouse"))]
fn clickhouse_backend(_: &StorageSettings) -> Result<Arc<dyn StorageBackend>, ConfigError> {
    Err(ConfigError::BackendUnavailable("clickhouse"))
}

/// Initialize the schema and indexes.
///
/// With `allow_unavailable`, an unreachable store is replaced by an
/// in-memory backend. Schema failures are always returned.
pub async fn prepare_backend(
    backend: Arc<dyn StorageBackend>,
    allow_unavailable: bool,
) -> Result<Arc<dyn StorageBackend>, StorageError> {
    match backend.initialize().await {
        Ok(()) => {}
        Err(e) if e.is_unavailable() && allow_unavailable => {
            warn!(
                backend = backend.name(),
                error = %e,
                "Storage unavailable, continuing with in-memory history only"
            );
            return Ok(Arc::new(MemoryBackend::new()));
        }
        Err(e) => return Err(e),
    }
    backend.ensure_indexes().await?;
    info!(backend = backend.name(), "Storage ready");
    Ok(backend)
}

/// Seed in-memory state from storage: the aggregate series for the trailing
/// `graph_duration`, then each target's latest sample and peak.
pub async fn restore_history(
    backend: &dyn StorageBackend,
    tracker: &TimeTracker,
    registry: &TargetRegistry,
    graph_duration: Duration,
) -> Result<(), StorageError> {
    let points = tracker.load_graph_points(graph_duration, backend).await?;
    let records = backend.load_records().await?;
    let applied = registry.apply_records(&records);
    info!(
        graph_points = points,
        records = applied,
        "Restored history from storage"
    );
    Ok(())
}
