//! Messages exchanged with connected clients.
//!
//! With the `serde` feature every message serializes as a JSON object with a
//! `message` discriminator, e.g. `{"message":"init", ...}`.

use std::collections::BTreeMap;

use crate::{AggregatePoint, PingHistory, PublicTarget, TargetUpdate};

/// Rendering hints sent to clients when they connect.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct PublicConfig {
    /// Human readable aggregate window, e.g. `24h`.
    pub graph_duration_label: String,
    pub graph_max_length: usize,
    pub server_graph_max_length: usize,
    pub servers: Vec<PublicTarget>,
    /// Known version names per edition, newest last.
    pub minecraft_versions: BTreeMap<String, Vec<String>>,
    /// False when history is not being kept and clients should hide the graph.
    pub is_graph_visible: bool,
}

/// Initial state pushed to a client on connect.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct InitPayload {
    pub config: PublicConfig,
    /// The shared per-target timestamp axis.
    pub timestamp_points: Vec<u64>,
    pub servers: Vec<PingHistory>,
}

/// Delta pushed after every scheduling cycle.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct UpdatePayload {
    pub timestamp: u64,
    /// True when this cycle also added a point to the aggregate series.
    pub update_history_graph: bool,
    #[cfg_attr(feature = "serde", serde(skip_serializing_if = "Option::is_none"))]
    pub aggregate: Option<AggregatePoint>,
    pub updates: Vec<TargetUpdate>,
}

/// Full history, sent on request.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct HistoryPayload {
    /// The aggregate series on its own (coarser) axis.
    pub graph: Vec<AggregatePoint>,
    /// The shared per-target timestamp axis.
    pub timestamp_axis: Vec<u64>,
    pub per_target_series: Vec<PingHistory>,
}

/// Outbound message envelope.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(
    feature = "serde",
    serde(tag = "message", rename_all = "camelCase")
)]
pub enum Message {
    Init(InitPayload),
    UpdateServers(UpdatePayload),
    HistoryGraph(HistoryPayload),
}

impl Message {
    /// The wire name of this message.
    pub fn name(&self) -> &'static str {
        match self {
            Message::Init(_) => "init",
            Message::UpdateServers(_) => "updateServers",
            Message::HistoryGraph(_) => "historyGraph",
        }
    }
}

/// Requests a client may send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientRequest {
    /// Ask for the full aggregate and per-target history.
    HistoryGraph,
}

impl ClientRequest {
    /// Parse a raw client line. Unknown requests return `None`.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "requestHistoryGraph" => Some(ClientRequest::HistoryGraph),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_client_request() {
        assert_eq!(
            ClientRequest::parse("requestHistoryGraph\n"),
            Some(ClientRequest::HistoryGraph)
        );
        assert_eq!(ClientRequest::parse("hello"), None);
        assert_eq!(ClientRequest::parse(""), None);
    }

    #[test]
    fn message_names() {
        let update = Message::UpdateServers(UpdatePayload {
            timestamp: 1,
            update_history_graph: false,
            aggregate: None,
            updates: Vec::new(),
        });
        assert_eq!(update.name(), "updateServers");
    }

    #[cfg(feature = "serde")]
    #[test]
    fn public_config_field_names() {
        let config = PublicConfig {
            graph_duration_label: "24h".to_string(),
            graph_max_length: 1440,
            server_graph_max_length: 60,
            servers: Vec::new(),
            minecraft_versions: BTreeMap::from([("java".to_string(), vec!["1.21".to_string()])]),
            is_graph_visible: false,
        };

        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["graphDurationLabel"], "24h");
        assert_eq!(json["minecraftVersions"]["java"][0], "1.21");
        assert_eq!(json["isGraphVisible"], false);
    }

    #[cfg(feature = "serde")]
    #[test]
    fn message_is_tagged() {
        let message = Message::HistoryGraph(HistoryPayload {
            graph: vec![AggregatePoint::new(1000, Some(2.5))],
            timestamp_axis: vec![1000],
            per_target_series: Vec::new(),
        });

        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(json["message"], "historyGraph");
        assert_eq!(json["graph"][0]["timestamp"], 1000);
        assert_eq!(json["timestampAxis"][0], 1000);
    }
}
