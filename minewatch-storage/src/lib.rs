//! # minewatch-storage
//!
//! Durable persistence for minewatch sample history.
//!
//! Every backend implements [`StorageBackend`]: schema setup, reload of the
//! aggregate series and per-target records at startup, appends from the
//! scheduler, and pruning of rows older than a retention horizon.
//!
//! ## Backends
//!
//! - [`MemoryBackend`] (always available) - in-process tables, no durability
//! - **SQLite** (`sqlite` feature) - embedded store via `rusqlite`
//! - **ClickHouse** (`clickhouse` feature) - networked store over HTTP
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use std::time::Duration;
//! use minewatch_storage::{MemoryBackend, StorageBackend};
//! use minewatch_types::Sample;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), minewatch_storage::StorageError> {
//!     let backend: Arc<dyn StorageBackend> = Arc::new(MemoryBackend::new());
//!     backend.initialize().await?;
//!     backend.ensure_indexes().await?;
//!
//!     let now = minewatch_types::current_timestamp_ms();
//!     backend.append_sample("play.example.net", &Sample::value(now, 12)).await?;
//!
//!     let records = backend.load_records().await?;
//!     assert_eq!(records["play.example.net"].peak, Some(Sample::value(now, 12)));
//!
//!     let points = backend.load_graph_points(Duration::from_secs(3600)).await?;
//!     assert!(points.is_empty());
//!     Ok(())
//! }
//! ```

mod backend;
pub mod error;
mod memory;
mod retention;

#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(feature = "clickhouse")]
pub mod clickhouse;

pub use backend::{PruneGate, PruneOutcome, PrunePermit, SampleBatch, StorageBackend};
pub use error::{StorageError, StorageResult};
pub use memory::MemoryBackend;
pub use retention::{start_retention_job, RetentionHandle, RetentionPolicy};

// Re-export types for convenience
pub use minewatch_types::{AggregatePoint, Reading, Sample, TargetRecord};
