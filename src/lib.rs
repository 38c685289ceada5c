//! # minewatch
//!
//! Polls a fixed set of game servers for their player counts, keeps a
//! bounded live history of the results, persists it, and serves it to
//! connected clients.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────┐  probe   ┌───────────┐
//! │ Scheduler │─────────▶│  Prober   │  Java SLP / Bedrock RakNet
//! └─────┬─────┘          └───────────┘
//!       │ record
//!       ├──────────▶ TimeTracker      (shared axes, aggregate series)
//!       ├──────────▶ TargetRegistry   (per-target series, peaks)
//!       ├──────────▶ StorageBackend   (memory | sqlite | clickhouse)
//!       ▼ publish
//! ┌──────────────────┐
//! │ NotificationHub  │──▶ HTTP pull API, NDJSON feed
//! └──────────────────┘
//! ```
//!
//! - **[`scheduler`]**: the perpetual probe → record → persist → publish loop
//! - **[`tracker`]**: bounded timestamp axes and the aggregate series
//! - **[`registry`]**: the fixed set of targets and their series
//! - **[`hub`]**: payloads for clients and the broadcast channel
//! - **[`storage`]**: backend selection and startup restore
//! - **[`probe`]**: the [`Prober`] trait and Minecraft implementations
//! - **[`transport`]**: HTTP and feed servers
//!
//! ## Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use minewatch::{MinecraftProber, NotificationHub, Scheduler, SchedulerOptions, Settings,
//!                 TargetRegistry, TimeTracker};
//! use minewatch_storage::MemoryBackend;
//!
//! # tokio_test::block_on(async {
//! let settings = Settings::load(None)?;
//! let limits = settings.series_limits();
//!
//! let registry = Arc::new(TargetRegistry::new(settings.targets()?, limits.max_server_graph_length)?);
//! let tracker = Arc::new(TimeTracker::new(limits, settings.graph.update_gap));
//! let hub = Arc::new(NotificationHub::new(registry, tracker, settings.graph.duration));
//!
//! let scheduler = Scheduler::new(
//!     hub,
//!     Arc::new(MinecraftProber::new()),
//!     Arc::new(MemoryBackend::new()),
//!     SchedulerOptions::from_settings(&settings),
//! );
//! let handle = scheduler.spawn();
//! handle.shutdown().await;
//! # Ok::<(), minewatch::ConfigError>(())
//! # }).unwrap();
//! ```

pub mod clock;
pub mod config;
pub mod duration;
pub mod hub;
pub mod logging;
pub mod probe;
pub mod registry;
pub mod scheduler;
pub mod series;
pub mod storage;
pub mod tracker;
pub mod transport;

// Re-export main types for convenience
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{AggregateReducer, ConfigError, Settings, StorageKind};
pub use hub::NotificationHub;
pub use probe::{MinecraftProber, ProbeError, ProbeResponse, Prober};
pub use registry::{Target, TargetRegistry};
pub use scheduler::{CycleOutcome, Scheduler, SchedulerHandle, SchedulerOptions};
pub use series::BoundedSeries;
pub use tracker::{CyclePoint, SeriesLimits, TimeTracker};
