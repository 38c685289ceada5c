//! Status probes for Minecraft servers.
//!
//! [`Prober`] is the seam between the scheduler and the network: the
//! scheduler only sees `Result<ProbeResponse, ProbeError>` and records
//! failures as error-marker samples.

mod bedrock;
mod java;

use std::fmt::Debug;
use std::io;
use std::time::Duration;

use async_trait::async_trait;
use minewatch_types::{TargetInfo, TargetKind};
use thiserror::Error;

pub use bedrock::{parse_pong, ping_packet, BedrockPong};
pub use java::{decode_varint, encode_varint, handshake_packet, parse_status};

/// What a successful probe reports.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeResponse {
    pub players_online: u64,
    pub players_max: Option<u64>,
    /// Server software version string, e.g. `Paper 1.21.1`.
    pub version: Option<String>,
    pub latency: Duration,
    /// Base64 data URI, Java edition only.
    pub favicon: Option<String>,
}

/// Why a probe failed. Rendered into the sample's error marker.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("{0}")]
    Io(#[from] io::Error),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("malformed status: {0}")]
    Parse(#[from] serde_json::Error),
}

impl ProbeError {
    pub(crate) fn protocol(message: impl Into<String>) -> Self {
        ProbeError::Protocol(message.into())
    }
}

/// Probes one target.
#[async_trait]
pub trait Prober: Send + Sync + Debug {
    async fn probe(&self, target: &TargetInfo) -> Result<ProbeResponse, ProbeError>;
}

/// Speaks Server List Ping to Java targets and RakNet unconnected ping to
/// Bedrock targets.
#[derive(Debug, Clone, Default)]
pub struct MinecraftProber;

impl MinecraftProber {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Prober for MinecraftProber {
    async fn probe(&self, target: &TargetInfo) -> Result<ProbeResponse, ProbeError> {
        match target.kind {
            TargetKind::Java => java::ping(&target.host, target.port).await,
            TargetKind::Bedrock => bedrock::ping(&target.host, target.port).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_markers_are_readable() {
        assert_eq!(
            ProbeError::Timeout(Duration::from_millis(2500)).to_string(),
            "timed out after 2.5s"
        );
        let refused = ProbeError::from(io::Error::new(
            io::ErrorKind::ConnectionRefused,
            "connection refused",
        ));
        assert_eq!(refused.to_string(), "connection refused");
    }

    #[tokio::test]
    async fn unreachable_java_target_is_an_io_error() {
        // Bind then drop to get a port nobody listens on.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let target = TargetInfo {
            id: format!("127.0.0.1:{port}"),
            name: "closed".to_string(),
            host: "127.0.0.1".to_string(),
            port,
            kind: TargetKind::Java,
            color: None,
        };
        let err = MinecraftProber::new().probe(&target).await.unwrap_err();
        assert!(matches!(err, ProbeError::Io(_)), "unexpected: {err}");
    }
}
