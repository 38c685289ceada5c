//! Client-facing servers.
//!
//! - [`http`]: pull API (`/api/init`, `/api/history`), Prometheus `/metrics`,
//!   and health checks.
//! - [`feed`]: newline-delimited JSON push feed over TCP.
//!
//! Both accept an already-bound listener and stop when the shutdown channel
//! flips.

use std::io;
use std::time::Duration;

use tracing::warn;

pub mod feed;
pub mod http;

pub use feed::serve_feed;
pub use http::{format_prometheus, serve_http};

/// Pause after a failed accept, so a full descriptor table is not spun on.
pub(crate) const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Pass an accepted connection through. Accept errors are logged and
/// followed by [`ACCEPT_BACKOFF`]; the server keeps listening.
pub(crate) async fn accepted<T>(result: io::Result<T>, server: &'static str) -> Option<T> {
    match result {
        Ok(conn) => Some(conn),
        Err(e) => {
            warn!(server, error = %e, "Failed to accept connection");
            tokio::time::sleep(ACCEPT_BACKOFF).await;
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn accept_errors_back_off_and_continue() {
        let started = tokio::time::Instant::now();
        let result: io::Result<u8> = Err(io::Error::from_raw_os_error(24));

        assert_eq!(accepted(result, "test").await, None);
        assert!(started.elapsed() >= ACCEPT_BACKOFF);

        assert_eq!(accepted(Ok(3u8), "test").await, Some(3));
    }
}
