//! # minewatch-types
//!
//! Core types for game-server status tracking. This crate defines the data
//! that flows between the scheduler, the in-memory series, the storage
//! backends and connected clients.
//!
//! ## Design Goals
//!
//! - **No required dependencies**: the types work without a serialization framework
//! - **Optional serialization**: enable the `serde` feature for JSON payloads
//! - **Errors are data**: a failed probe is a [`Sample`] carrying [`Reading::Error`],
//!   so history shows gaps instead of silently dropping points
//!
//! ## Example
//!
//! ```rust
//! use minewatch_types::{Reading, Sample};
//!
//! let ok = Sample::value(1_703_160_000_000, 42);
//! let failed = Sample::error(1_703_160_003_000, "timed out");
//!
//! assert_eq!(ok.reading.value(), Some(42));
//! assert!(failed.reading.is_error());
//! ```

mod message;
mod sample;
mod target;

pub use message::*;
pub use sample::*;
pub use target::*;

/// Current wall-clock time in milliseconds since the Unix epoch.
pub fn current_timestamp_ms() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
