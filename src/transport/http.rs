//! HTTP pull API and Prometheus exposition.

use std::convert::Infallible;
use std::fmt::Write as _;
use std::sync::Arc;

use http_body_util::Full;
use hyper::body::Bytes;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use minewatch_types::Message;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, info};

use super::accepted;
use crate::hub::NotificationHub;

const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Serve HTTP on `listener` until `shutdown` is set.
pub async fn serve_http(
    listener: TcpListener,
    hub: Arc<NotificationHub>,
    mut shutdown: watch::Receiver<bool>,
) -> std::io::Result<()> {
    info!(addr = %listener.local_addr()?, "HTTP server listening");

    loop {
        let result = tokio::select! {
            result = listener.accept() => result,
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
                continue;
            }
        };
        let Some((stream, peer)) = accepted(result, "http").await else {
            continue;
        };
        let io = TokioIo::new(stream);
        let hub = Arc::clone(&hub);

        tokio::spawn(async move {
            let service = service_fn(move |req: Request<hyper::body::Incoming>| {
                let hub = Arc::clone(&hub);
                async move { handle_request(&req, &hub) }
            });

            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                debug!(%peer, error = %e, "HTTP connection error");
            }
        });
    }

    info!("HTTP server stopped");
    Ok(())
}

fn handle_request<B>(
    req: &Request<B>,
    hub: &NotificationHub,
) -> Result<Response<Full<Bytes>>, Infallible> {
    if req.method() != Method::GET {
        return Ok(respond(
            StatusCode::METHOD_NOT_ALLOWED,
            "text/plain",
            "Method Not Allowed",
        ));
    }

    Ok(match req.uri().path() {
        "/api/init" => json_response(&hub.init_message()),
        "/api/history" => match hub.history_message() {
            Some(history) => json_response(&history),
            None => respond(StatusCode::NOT_FOUND, "text/plain", "Graph history disabled"),
        },
        "/metrics" => respond(StatusCode::OK, PROMETHEUS_CONTENT_TYPE, format_prometheus(hub)),
        "/health" | "/healthz" => respond(StatusCode::OK, "text/plain", "OK"),
        _ => respond(StatusCode::NOT_FOUND, "text/plain", "Not Found"),
    })
}

fn json_response(message: &Message) -> Response<Full<Bytes>> {
    match serde_json::to_vec(message) {
        Ok(body) => respond(StatusCode::OK, "application/json", body),
        Err(e) => respond(
            StatusCode::INTERNAL_SERVER_ERROR,
            "text/plain",
            format!("failed to encode {}: {e}", message.name()),
        ),
    }
}

fn respond(
    status: StatusCode,
    content_type: &'static str,
    body: impl Into<Bytes>,
) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body.into()));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    response
}

/// Render the latest sample of every target, plus the latest aggregate
/// point, in Prometheus text format.
pub fn format_prometheus(hub: &NotificationHub) -> String {
    let mut output = String::new();

    output.push_str("# HELP minewatch_players_online Players online at the last probe\n");
    output.push_str("# TYPE minewatch_players_online gauge\n");
    output.push_str("# HELP minewatch_players_peak Highest player count observed\n");
    output.push_str("# TYPE minewatch_players_peak gauge\n");
    output.push_str("# HELP minewatch_probe_up Whether the last probe succeeded\n");
    output.push_str("# TYPE minewatch_probe_up gauge\n");
    output.push_str("# HELP minewatch_last_probe_timestamp_seconds Unix time of the last probe\n");
    output.push_str("# TYPE minewatch_last_probe_timestamp_seconds gauge\n");

    for target in hub.registry().public_data() {
        let labels = format!(
            "target=\"{}\",name=\"{}\",kind=\"{}\"",
            escape_label_value(&target.info.id),
            escape_label_value(&target.info.name),
            target.info.kind.as_str()
        );

        if let Some(latest) = &target.latest {
            let up = u8::from(!latest.reading.is_error());
            if let Some(players) = latest.reading.value() {
                let _ = writeln!(output, "minewatch_players_online{{{labels}}} {players}");
            }
            let _ = writeln!(output, "minewatch_probe_up{{{labels}}} {up}");
            let _ = writeln!(
                output,
                "minewatch_last_probe_timestamp_seconds{{{labels}}} {:.3}",
                latest.timestamp_ms as f64 / 1000.0
            );
        }
        if let Some(players) = target.peak.as_ref().and_then(|p| p.reading.value()) {
            let _ = writeln!(output, "minewatch_players_peak{{{labels}}} {players}");
        }
    }

    if let Some(value) = hub.tracker().last_aggregate().and_then(|p| p.value) {
        output.push_str("# HELP minewatch_aggregate_players Latest aggregate across all targets\n");
        output.push_str("# TYPE minewatch_aggregate_players gauge\n");
        let _ = writeln!(output, "minewatch_aggregate_players {value:.2}");
    }

    output
}

/// Escape a label value for Prometheus format.
/// Backslash, double-quote, and newline must be escaped.
fn escape_label_value(s: &str) -> String {
    s.replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::TargetRegistry;
    use crate::tracker::{SeriesLimits, TimeTracker};
    use http_body_util::BodyExt;
    use minewatch_types::{Sample, TargetInfo, TargetKind};
    use std::time::Duration;

    fn hub() -> NotificationHub {
        let registry = TargetRegistry::new(
            vec![
                TargetInfo {
                    id: "play.example.net".into(),
                    name: "Example \"EU\"".into(),
                    host: "play.example.net".into(),
                    port: 25565,
                    kind: TargetKind::Java,
                    color: None,
                },
                TargetInfo {
                    id: "pe.example.net".into(),
                    name: "Pocket".into(),
                    host: "pe.example.net".into(),
                    port: 19132,
                    kind: TargetKind::Bedrock,
                    color: None,
                },
            ],
            4,
        )
        .unwrap();
        registry.record_server_point("play.example.net", Sample::value(2_000, 17), None);
        registry.record_server_point("pe.example.net", Sample::error(2_000, "timeout"), None);

        let tracker = TimeTracker::new(
            SeriesLimits {
                max_graph_length: 4,
                max_server_graph_length: 4,
            },
            Duration::ZERO,
        );
        tracker.record_aggregate_point(2_000, Some(17.0));

        NotificationHub::new(Arc::new(registry), Arc::new(tracker), Duration::from_secs(3600))
    }

    fn get(path: &str) -> Request<()> {
        Request::builder().uri(path).body(()).unwrap()
    }

    async fn body_string(response: Response<Full<Bytes>>) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[test]
    fn test_format_prometheus() {
        let output = format_prometheus(&hub());

        assert!(output.contains("# TYPE minewatch_players_online gauge"));
        assert!(output.contains(
            "minewatch_players_online{target=\"play.example.net\",name=\"Example \\\"EU\\\"\",kind=\"java\"} 17"
        ));
        assert!(output.contains(
            "minewatch_probe_up{target=\"pe.example.net\",name=\"Pocket\",kind=\"bedrock\"} 0"
        ));
        assert!(!output.contains("minewatch_players_online{target=\"pe.example.net\""));
        assert!(output.contains("minewatch_aggregate_players 17.00"));
        assert!(output.contains("minewatch_last_probe_timestamp_seconds{target=\"play.example.net\",name=\"Example \\\"EU\\\"\",kind=\"java\"} 2.000"));
    }

    #[test]
    fn test_escape_label_value() {
        assert_eq!(escape_label_value("simple"), "simple");
        assert_eq!(escape_label_value("with\"quote"), "with\\\"quote");
        assert_eq!(escape_label_value("with\\backslash"), "with\\\\backslash");
        assert_eq!(escape_label_value("with\nnewline"), "with\\nnewline");
    }

    #[tokio::test]
    async fn routes() {
        let hub = hub();

        let init = handle_request(&get("/api/init"), &hub).unwrap();
        assert_eq!(init.status(), StatusCode::OK);
        assert_eq!(init.headers()[CONTENT_TYPE], "application/json");
        let json: serde_json::Value = serde_json::from_str(&body_string(init).await).unwrap();
        assert_eq!(json["message"], "init");
        assert_eq!(json["config"]["graphDurationLabel"], "1h");

        let history = handle_request(&get("/api/history"), &hub).unwrap();
        let json: serde_json::Value = serde_json::from_str(&body_string(history).await).unwrap();
        assert_eq!(json["message"], "historyGraph");
        assert_eq!(json["graph"][0]["value"], 17.0);

        let health = handle_request(&get("/healthz"), &hub).unwrap();
        assert_eq!(body_string(health).await, "OK");

        let missing = handle_request(&get("/nope"), &hub).unwrap();
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);

        let post = Request::builder()
            .method(Method::POST)
            .uri("/api/init")
            .body(())
            .unwrap();
        assert_eq!(
            handle_request(&post, &hub).unwrap().status(),
            StatusCode::METHOD_NOT_ALLOWED
        );
    }

    #[tokio::test]
    async fn history_is_not_served_when_graph_hidden() {
        let hub = hub().with_graph_visible(false);

        let history = handle_request(&get("/api/history"), &hub).unwrap();
        assert_eq!(history.status(), StatusCode::NOT_FOUND);

        let init = handle_request(&get("/api/init"), &hub).unwrap();
        let json: serde_json::Value = serde_json::from_str(&body_string(init).await).unwrap();
        assert_eq!(json["config"]["isGraphVisible"], false);
    }
}
