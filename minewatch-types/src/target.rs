//! Probe targets and the views of them that are safe to hand to clients.

use crate::Sample;

/// Which status protocol a target speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum TargetKind {
    /// Java Edition, Server List Ping over TCP.
    #[default]
    Java,
    /// Bedrock Edition, RakNet unconnected ping over UDP.
    Bedrock,
}

impl TargetKind {
    /// Port used when the configuration does not name one.
    pub const fn default_port(&self) -> u16 {
        match self {
            TargetKind::Java => 25565,
            TargetKind::Bedrock => 19132,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TargetKind::Java => "java",
            TargetKind::Bedrock => "bedrock",
        }
    }
}

/// Immutable identity of a probe target.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TargetInfo {
    /// Stable identifier, used as the storage key.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Host name or IP address.
    pub host: String,
    pub port: u16,
    pub kind: TargetKind,
    /// Optional display color for graphs (e.g. `#ff9900`).
    #[cfg_attr(feature = "serde", serde(skip_serializing_if = "Option::is_none"))]
    pub color: Option<String>,
}

/// A client-safe snapshot of a target: identity plus the latest known state.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct PublicTarget {
    #[cfg_attr(feature = "serde", serde(flatten))]
    pub info: TargetInfo,
    pub latest: Option<Sample>,
    pub peak: Option<Sample>,
    #[cfg_attr(feature = "serde", serde(skip_serializing_if = "Option::is_none"))]
    pub version: Option<String>,
}

/// The per-target series, as handed to clients.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct PingHistory {
    pub id: String,
    pub samples: Vec<Sample>,
    pub peak: Option<Sample>,
}

/// What changed for one target during a cycle.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct TargetUpdate {
    pub id: String,
    pub sample: Sample,
    /// Set when this sample raised the target's peak.
    #[cfg_attr(feature = "serde", serde(skip_serializing_if = "Option::is_none"))]
    pub new_peak: Option<Sample>,
    #[cfg_attr(feature = "serde", serde(skip_serializing_if = "Option::is_none"))]
    pub version: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_ports() {
        assert_eq!(TargetKind::Java.default_port(), 25565);
        assert_eq!(TargetKind::Bedrock.default_port(), 19132);
        assert_eq!(TargetKind::default(), TargetKind::Java);
    }

    #[cfg(feature = "serde")]
    #[test]
    fn public_target_flattens_identity() {
        let target = PublicTarget {
            info: TargetInfo {
                id: "play.example.net".to_string(),
                name: "Example".to_string(),
                host: "play.example.net".to_string(),
                port: 25565,
                kind: TargetKind::Java,
                color: None,
            },
            latest: Some(Sample::value(10, 3)),
            peak: None,
            version: None,
        };

        let json = serde_json::to_value(&target).unwrap();
        assert_eq!(json["id"], "play.example.net");
        assert_eq!(json["kind"], "java");
        assert_eq!(json["latest"]["value"], 3);
        assert!(json.get("color").is_none());
        assert!(json.get("version").is_none());
    }
}
