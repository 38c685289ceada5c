//! Fan-out of current and historical state to connected clients.
//!
//! The hub builds payloads; transports own the sockets. Pushes go through a
//! `tokio::sync::broadcast` channel, so a slow client lags and skips updates
//! instead of holding up the scheduler.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use minewatch_types::{
    ClientRequest, HistoryPayload, InitPayload, Message, PublicConfig, UpdatePayload,
};
use tokio::sync::broadcast;

use crate::duration::format_duration;
use crate::registry::TargetRegistry;
use crate::tracker::TimeTracker;

/// Updates buffered per subscriber before it starts lagging.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug)]
pub struct NotificationHub {
    registry: Arc<TargetRegistry>,
    tracker: Arc<TimeTracker>,
    graph_duration_label: String,
    graph_visible: bool,
    minecraft_versions: BTreeMap<String, Vec<String>>,
    sender: broadcast::Sender<Message>,
}

impl NotificationHub {
    pub fn new(
        registry: Arc<TargetRegistry>,
        tracker: Arc<TimeTracker>,
        graph_duration: Duration,
    ) -> Self {
        Self::with_capacity(registry, tracker, graph_duration, DEFAULT_CHANNEL_CAPACITY)
    }

    pub fn with_capacity(
        registry: Arc<TargetRegistry>,
        tracker: Arc<TimeTracker>,
        graph_duration: Duration,
        capacity: usize,
    ) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            registry,
            tracker,
            graph_duration_label: format_duration(graph_duration),
            graph_visible: true,
            minecraft_versions: BTreeMap::new(),
            sender,
        }
    }

    /// Replace the derived `graph_duration_label`.
    pub fn with_duration_label(mut self, label: impl Into<String>) -> Self {
        self.graph_duration_label = label.into();
        self
    }

    /// Whether clients get the aggregate history. When off, history
    /// requests go unanswered and clients are told to hide the graph.
    pub fn with_graph_visible(mut self, visible: bool) -> Self {
        self.graph_visible = visible;
        self
    }

    /// Version names per edition, passed through to clients.
    pub fn with_minecraft_versions(mut self, versions: BTreeMap<String, Vec<String>>) -> Self {
        self.minecraft_versions = versions;
        self
    }

    pub fn graph_visible(&self) -> bool {
        self.graph_visible
    }

    pub fn registry(&self) -> &Arc<TargetRegistry> {
        &self.registry
    }

    pub fn tracker(&self) -> &Arc<TimeTracker> {
        &self.tracker
    }

    pub fn public_config(&self) -> PublicConfig {
        let limits = self.tracker.limits();
        PublicConfig {
            graph_duration_label: self.graph_duration_label.clone(),
            graph_max_length: limits.max_graph_length,
            server_graph_max_length: limits.max_server_graph_length,
            servers: self.registry.public_data(),
            minecraft_versions: self.minecraft_versions.clone(),
            is_graph_visible: self.graph_visible,
        }
    }

    /// Sent to every client on connect.
    pub fn init_message(&self) -> Message {
        let (timestamp_points, servers) = self
            .tracker
            .with_server_axis(|axis| (axis, self.registry.ping_history()));
        Message::Init(InitPayload {
            config: self.public_config(),
            timestamp_points,
            servers,
        })
    }

    /// The full aggregate and per-target history, or `None` when the graph
    /// is hidden.
    pub fn history_message(&self) -> Option<Message> {
        if !self.graph_visible {
            return None;
        }
        let (timestamp_axis, per_target_series) = self
            .tracker
            .with_server_axis(|axis| (axis, self.registry.ping_history()));
        Some(Message::HistoryGraph(HistoryPayload {
            graph: self.tracker.aggregate_points(),
            timestamp_axis,
            per_target_series,
        }))
    }

    /// Answer a raw client request line. `None` for anything unrecognised.
    pub fn handle_request(&self, raw: &str) -> Option<Message> {
        match ClientRequest::parse(raw)? {
            ClientRequest::HistoryGraph => self.history_message(),
        }
    }

    /// Push a cycle's update. Returns how many subscribers will receive it.
    pub fn publish(&self, update: UpdatePayload) -> usize {
        self.sender.send(Message::UpdateServers(update)).unwrap_or(0)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Message> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}
