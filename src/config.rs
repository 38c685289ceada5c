//! Runtime configuration.
//!
//! Settings are layered with the `config` crate: an optional TOML file, then
//! environment variables prefixed `MINEWATCH` with `__` between sections
//! (e.g. `MINEWATCH__RATES__PING_INTERVAL=5s`).
//!
//! ```toml
//! [rates]
//! ping_interval = "3s"
//! probe_timeout = "2500ms"
//!
//! [graph]
//! duration = "24h"
//! update_gap = "1m"
//!
//! [[servers]]
//! name = "Example"
//! address = "play.example.net"
//! ```

use std::collections::{BTreeMap, HashSet};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use config::{Config, Environment, File, FileFormat};
use minewatch_storage::RetentionPolicy;
use minewatch_types::{TargetInfo, TargetKind};
use serde::{Deserialize, Deserializer};
use thiserror::Error;

use crate::duration::parse_duration;
use crate::tracker::SeriesLimits;

/// Config file looked up in the working directory when `--config` is not given.
pub const DEFAULT_CONFIG_FILE: &str = "minewatch";

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "MINEWATCH";

/// Errors that stop the process before scheduling begins.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("no servers configured")]
    NoTargets,

    #[error("server `{0}` is configured more than once")]
    DuplicateTarget(String),

    #[error("invalid server address `{address}`: {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("invalid listen address `{0}`")]
    InvalidListenAddress(String),

    #[error("`{0}` must be greater than zero")]
    ZeroDuration(&'static str),

    #[error("storage backend `{0}` is not compiled in; rebuild with `--features {0}`")]
    BackendUnavailable(&'static str),
}

/// Top-level settings.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub site: SiteSettings,
    pub rates: RateSettings,
    pub graph: GraphSettings,
    pub storage: StorageSettings,
    pub retention: RetentionSettings,
    pub servers: Vec<ServerEntry>,
    /// Version names per edition, shown by clients, e.g.
    /// `java = ["1.20.4", "1.21"]`.
    pub minecraft_versions: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SiteSettings {
    /// Pull API and `/metrics`.
    pub http_listen: String,
    /// Newline-delimited JSON push feed.
    pub feed_listen: String,
}

impl Default for SiteSettings {
    fn default() -> Self {
        Self {
            http_listen: "0.0.0.0:8080".to_string(),
            feed_listen: "0.0.0.0:8081".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RateSettings {
    /// Delay between probing cycles.
    #[serde(deserialize_with = "human_duration")]
    pub ping_interval: Duration,
    /// Per-target probe timeout.
    #[serde(deserialize_with = "human_duration")]
    pub probe_timeout: Duration,
}

impl Default for RateSettings {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(3),
            probe_timeout: Duration::from_millis(2500),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GraphSettings {
    /// Window covered by the aggregate series.
    #[serde(deserialize_with = "human_duration")]
    pub duration: Duration,
    /// Window covered by each per-target series.
    #[serde(deserialize_with = "human_duration")]
    pub server_duration: Duration,
    /// Minimum spacing between aggregate points.
    #[serde(deserialize_with = "human_duration")]
    pub update_gap: Duration,
    pub reducer: AggregateReducer,
    /// Label shown to clients instead of the formatted `duration`.
    pub duration_label: Option<String>,
    /// Serve the aggregate history to clients. Defaults to on for durable
    /// backends and off for `memory`.
    pub visible: Option<bool>,
}

impl Default for GraphSettings {
    fn default() -> Self {
        Self {
            duration: Duration::from_secs(24 * 60 * 60),
            server_duration: Duration::from_secs(3 * 60),
            update_gap: Duration::from_secs(60),
            reducer: AggregateReducer::default(),
            duration_label: None,
            visible: None,
        }
    }
}

/// How the per-target values of one cycle collapse into an aggregate point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregateReducer {
    #[default]
    Mean,
    Sum,
    Max,
}

impl AggregateReducer {
    /// Reduce the successful readings of a cycle. `None` when nothing answered.
    pub fn reduce(&self, values: &[u64]) -> Option<f64> {
        if values.is_empty() {
            return None;
        }
        let sum: u64 = values.iter().sum();
        Some(match self {
            AggregateReducer::Mean => sum as f64 / values.len() as f64,
            AggregateReducer::Sum => sum as f64,
            AggregateReducer::Max => values.iter().copied().max().unwrap_or(0) as f64,
        })
    }
}

/// Which storage backend to open at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    Memory,
    Sqlite,
    Clickhouse,
}

impl Default for StorageKind {
    fn default() -> Self {
        if cfg!(feature = "sqlite") {
            StorageKind::Sqlite
        } else {
            StorageKind::Memory
        }
    }
}

impl StorageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageKind::Memory => "memory",
            StorageKind::Sqlite => "sqlite",
            StorageKind::Clickhouse => "clickhouse",
        }
    }

    pub fn is_compiled_in(&self) -> bool {
        match self {
            StorageKind::Memory => true,
            StorageKind::Sqlite => cfg!(feature = "sqlite"),
            StorageKind::Clickhouse => cfg!(feature = "clickhouse"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    pub backend: StorageKind,
    pub sqlite_path: String,
    /// Start with in-memory storage when the configured store is unreachable.
    pub allow_unavailable: bool,
    pub clickhouse: ClickHouseSettings,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            backend: StorageKind::default(),
            sqlite_path: "minewatch.db".to_string(),
            allow_unavailable: false,
            clickhouse: ClickHouseSettings::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClickHouseSettings {
    pub url: String,
    pub user: String,
    pub password: Option<String>,
    pub database: String,
}

impl Default for ClickHouseSettings {
    fn default() -> Self {
        Self {
            url: "http://localhost:8123".to_string(),
            user: "default".to_string(),
            password: None,
            database: "default".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetentionSettings {
    pub enabled: bool,
    #[serde(deserialize_with = "human_duration")]
    pub interval: Duration,
    /// Defaults to `graph.duration`.
    #[serde(deserialize_with = "optional_human_duration")]
    pub window: Option<Duration>,
}

impl Default for RetentionSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_secs(60 * 60),
            window: None,
        }
    }
}

/// One `[[servers]]` entry.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerEntry {
    pub name: String,
    /// `host` or `host:port`; also the target's id.
    pub address: String,
    #[serde(default)]
    pub kind: TargetKind,
    #[serde(default)]
    pub color: Option<String>,
}

impl Settings {
    /// Load from `path` (or `minewatch.toml` in the working directory when
    /// present), layer environment variables on top, and validate.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let file = match path {
            Some(path) => File::from(path).required(true),
            None => File::with_name(DEFAULT_CONFIG_FILE).required(false),
        };

        let settings: Settings = Config::builder()
            .add_source(file)
            .add_source(Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?
            .try_deserialize()?;

        settings.validate()?;
        Ok(settings)
    }

    /// Parse and validate a TOML document. Environment variables are ignored.
    pub fn from_toml_str(toml: &str) -> Result<Self, ConfigError> {
        let settings: Settings = Config::builder()
            .add_source(File::from_str(toml, FileFormat::Toml))
            .build()?
            .try_deserialize()?;

        settings.validate()?;
        Ok(settings)
    }

    /// Check everything that would otherwise fail after startup.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("rates.ping_interval", self.rates.ping_interval),
            ("rates.probe_timeout", self.rates.probe_timeout),
            ("graph.duration", self.graph.duration),
            ("graph.server_duration", self.graph.server_duration),
        ] {
            if value.is_zero() {
                return Err(ConfigError::ZeroDuration(name));
            }
        }
        if self.retention.enabled {
            if self.retention.interval.is_zero() {
                return Err(ConfigError::ZeroDuration("retention.interval"));
            }
            if self.retention.window.is_some_and(|w| w.is_zero()) {
                return Err(ConfigError::ZeroDuration("retention.window"));
            }
        }

        for addr in [&self.site.http_listen, &self.site.feed_listen] {
            addr.parse::<SocketAddr>()
                .map_err(|_| ConfigError::InvalidListenAddress(addr.clone()))?;
        }

        if !self.storage.backend.is_compiled_in() {
            return Err(ConfigError::BackendUnavailable(self.storage.backend.as_str()));
        }

        self.targets().map(|_| ())
    }

    /// Resolve `[[servers]]` into target identities.
    pub fn targets(&self) -> Result<Vec<TargetInfo>, ConfigError> {
        if self.servers.is_empty() {
            return Err(ConfigError::NoTargets);
        }

        let mut seen = HashSet::new();
        let mut targets = Vec::with_capacity(self.servers.len());
        for entry in &self.servers {
            let id = entry.address.trim().to_string();
            if !seen.insert(id.clone()) {
                return Err(ConfigError::DuplicateTarget(id));
            }
            let (host, port) = parse_address(&id, entry.kind)?;
            targets.push(TargetInfo {
                name: if entry.name.trim().is_empty() {
                    id.clone()
                } else {
                    entry.name.clone()
                },
                id,
                host,
                port,
                kind: entry.kind,
                color: entry.color.clone(),
            });
        }
        Ok(targets)
    }

    pub fn series_limits(&self) -> SeriesLimits {
        SeriesLimits::derive(
            self.graph.duration,
            self.graph.server_duration,
            self.graph.update_gap,
            self.rates.ping_interval,
        )
    }

    /// Whether clients are offered the aggregate history.
    pub fn graph_visible(&self) -> bool {
        self.graph
            .visible
            .unwrap_or(self.storage.backend != StorageKind::Memory)
    }

    /// The retention job's policy, or `None` when retention is disabled.
    pub fn retention_policy(&self) -> Option<RetentionPolicy> {
        self.retention.enabled.then(|| RetentionPolicy {
            window: self.retention.window.unwrap_or(self.graph.duration),
            interval: self.retention.interval,
        })
    }
}

/// Split `host`, `host:port` or `[v6]:port`, falling back to the kind's
/// default port.
pub fn parse_address(address: &str, kind: TargetKind) -> Result<(String, u16), ConfigError> {
    let invalid = |reason: &str| ConfigError::InvalidAddress {
        address: address.to_string(),
        reason: reason.to_string(),
    };

    if address.is_empty() {
        return Err(invalid("empty"));
    }

    let (host, port) = if let Some(rest) = address.strip_prefix('[') {
        let (host, tail) = rest.split_once(']').ok_or_else(|| invalid("unclosed `[`"))?;
        match tail.strip_prefix(':') {
            Some(port) => (host, Some(port)),
            None if tail.is_empty() => (host, None),
            None => return Err(invalid("unexpected text after `]`")),
        }
    } else {
        match address.split_once(':') {
            // Bare IPv6 without brackets
            Some(_) if address.matches(':').count() > 1 => (address, None),
            Some((host, port)) => (host, Some(port)),
            None => (address, None),
        }
    };

    if host.is_empty() {
        return Err(invalid("missing host"));
    }
    let port = match port {
        Some(p) => p.parse::<u16>().map_err(|_| invalid("port is not a number"))?,
        None => kind.default_port(),
    };
    if port == 0 {
        return Err(invalid("port must be non-zero"));
    }
    Ok((host.to_string(), port))
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawDuration {
    Millis(u64),
    Text(String),
}

impl RawDuration {
    fn into_duration(self) -> Result<Duration, String> {
        match self {
            RawDuration::Millis(ms) => Ok(Duration::from_millis(ms)),
            // Environment values arrive as strings
            RawDuration::Text(s) if !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()) => s
                .parse::<u64>()
                .map(Duration::from_millis)
                .map_err(|e| e.to_string()),
            RawDuration::Text(s) => parse_duration(&s).map_err(|e| e.to_string()),
        }
    }
}

/// Accepts `"3s"`-style strings or a bare number of milliseconds.
fn human_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    RawDuration::deserialize(deserializer)?
        .into_duration()
        .map_err(serde::de::Error::custom)
}

fn optional_human_duration<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<RawDuration>::deserialize(deserializer)?
        .map(RawDuration::into_duration)
        .transpose()
        .map_err(serde::de::Error::custom)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
        [[servers]]
        name = "Example"
        address = "play.example.net"
    "#;

    #[test]
    fn defaults_apply_to_minimal_file() {
        let settings = Settings::from_toml_str(MINIMAL).unwrap();
        assert_eq!(settings.rates.ping_interval, Duration::from_secs(3));
        assert_eq!(settings.graph.duration, Duration::from_secs(86_400));
        assert_eq!(settings.graph.reducer, AggregateReducer::Mean);
        assert!(settings.retention.enabled);

        let targets = settings.targets().unwrap();
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].id, "play.example.net");
        assert_eq!(targets[0].port, 25565);
    }

    #[test]
    fn durations_accept_human_and_millis() {
        let settings = Settings::from_toml_str(
            r##"
            [rates]
            ping_interval = "5s"
            probe_timeout = 1500

            [graph]
            duration = "1h"
            update_gap = "30s"

            [storage]
            backend = "memory"

            [[servers]]
            name = "A"
            address = "a.example.net:25570"
            kind = "java"

            [[servers]]
            name = "B"
            address = "b.example.net"
            kind = "bedrock"
            color = "#00ff00"
        "##,
        )
        .unwrap();

        assert_eq!(settings.rates.ping_interval, Duration::from_secs(5));
        assert_eq!(settings.rates.probe_timeout, Duration::from_millis(1500));
        assert_eq!(settings.storage.backend, StorageKind::Memory);

        let targets = settings.targets().unwrap();
        assert_eq!(targets[0].port, 25570);
        assert_eq!(targets[1].port, 19132);
        assert_eq!(targets[1].color.as_deref(), Some("#00ff00"));

        let limits = settings.series_limits();
        assert_eq!(limits.max_graph_length, 120);
        assert_eq!(limits.max_server_graph_length, 36);
    }

    #[test]
    fn graph_visibility_follows_backend_unless_set() {
        let memory = format!("[storage]\nbackend = \"memory\"\n{MINIMAL}");
        assert!(!Settings::from_toml_str(&memory).unwrap().graph_visible());

        let forced = format!("[storage]\nbackend = \"memory\"\n[graph]\nvisible = true\n{MINIMAL}");
        assert!(Settings::from_toml_str(&forced).unwrap().graph_visible());
    }

    #[test]
    fn client_display_settings() {
        let toml = format!(
            "[graph]\nduration_label = \"a day\"\n\n[minecraft_versions]\njava = [\"1.20.4\", \"1.21\"]\n{MINIMAL}"
        );
        let settings = Settings::from_toml_str(&toml).unwrap();

        assert_eq!(settings.graph.duration_label.as_deref(), Some("a day"));
        assert_eq!(settings.minecraft_versions["java"], vec!["1.20.4", "1.21"]);
    }

    #[test]
    fn retention_window_defaults_to_graph_duration() {
        let settings = Settings::from_toml_str(MINIMAL).unwrap();
        let policy = settings.retention_policy().unwrap();
        assert_eq!(policy.window, settings.graph.duration);

        let disabled = Settings::from_toml_str(&format!(
            "[retention]\nenabled = false\n{MINIMAL}"
        ))
        .unwrap();
        assert!(disabled.retention_policy().is_none());
    }

    #[test]
    fn rejects_missing_and_duplicate_targets() {
        assert!(matches!(
            Settings::from_toml_str("[rates]\nping_interval = \"3s\"\n"),
            Err(ConfigError::NoTargets)
        ));

        let dup = r#"
            [[servers]]
            name = "One"
            address = "same.example.net"
            [[servers]]
            name = "Two"
            address = "same.example.net"
        "#;
        assert!(matches!(
            Settings::from_toml_str(dup),
            Err(ConfigError::DuplicateTarget(id)) if id == "same.example.net"
        ));
    }

    #[test]
    fn rejects_zero_and_garbage_durations() {
        let zero = format!("[rates]\nping_interval = \"0s\"\n{MINIMAL}");
        assert!(matches!(
            Settings::from_toml_str(&zero),
            Err(ConfigError::ZeroDuration("rates.ping_interval"))
        ));

        let garbage = format!("[rates]\nping_interval = \"often\"\n{MINIMAL}");
        assert!(matches!(
            Settings::from_toml_str(&garbage),
            Err(ConfigError::Load(_))
        ));
    }

    #[cfg(not(feature = "clickhouse"))]
    #[test]
    fn rejects_backend_not_compiled_in() {
        let toml = format!("[storage]\nbackend = \"clickhouse\"\n{MINIMAL}");
        assert!(matches!(
            Settings::from_toml_str(&toml),
            Err(ConfigError::BackendUnavailable("clickhouse"))
        ));
    }

    #[test]
    fn parses_addresses() {
        assert_eq!(
            parse_address("mc.example.net", TargetKind::Java).unwrap(),
            ("mc.example.net".to_string(), 25565)
        );
        assert_eq!(
            parse_address("10.0.0.5:19133", TargetKind::Bedrock).unwrap(),
            ("10.0.0.5".to_string(), 19133)
        );
        assert_eq!(
            parse_address("[::1]:25566", TargetKind::Java).unwrap(),
            ("::1".to_string(), 25566)
        );
        assert_eq!(
            parse_address("::1", TargetKind::Bedrock).unwrap(),
            ("::1".to_string(), 19132)
        );
        assert!(parse_address("host:notaport", TargetKind::Java).is_err());
        assert!(parse_address(":25565", TargetKind::Java).is_err());
        assert!(parse_address("host:0", TargetKind::Java).is_err());
    }

    #[test]
    fn reducers() {
        assert_eq!(AggregateReducer::Mean.reduce(&[1, 2, 6]), Some(3.0));
        assert_eq!(AggregateReducer::Sum.reduce(&[1, 2, 6]), Some(9.0));
        assert_eq!(AggregateReducer::Max.reduce(&[1, 2, 6]), Some(6.0));
        assert_eq!(AggregateReducer::Mean.reduce(&[]), None);
    }

    #[cfg(feature = "sqlite")]
    #[test]
    fn example_file_is_valid() {
        let settings = Settings::from_toml_str(include_str!("../minewatch.example.toml")).unwrap();
        let targets = settings.targets().unwrap();
        assert_eq!(targets.len(), 2);
        assert_eq!(targets[1].kind, TargetKind::Bedrock);
        assert_eq!(targets[1].port, 19132);
        assert_eq!(settings.storage.backend, StorageKind::Sqlite);
        assert!(settings.graph_visible());
        assert_eq!(settings.minecraft_versions["java"].len(), 3);
    }
}
