use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use minewatch::storage::{open_backend, prepare_backend, restore_history};
use minewatch::transport::{serve_feed, serve_http};
use minewatch::{
    logging, MinecraftProber, NotificationHub, Scheduler, SchedulerOptions, Settings,
    TargetRegistry, TimeTracker,
};
use minewatch_storage::start_retention_job;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "minewatch")]
#[command(about = "Polls game servers for player counts and serves live history")]
#[command(version)]
struct Args {
    /// Path to a TOML config file (defaults to ./minewatch.toml when present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long)]
    verbose: bool,

    /// Start with in-memory history if the configured store is unreachable
    #[arg(long)]
    allow_storage_outage: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    logging::init(args.verbose);

    let settings = Settings::load(args.config.as_deref()).context("invalid configuration")?;
    let limits = settings.series_limits();
    info!(
        servers = settings.servers.len(),
        graph_points = limits.max_graph_length,
        server_points = limits.max_server_graph_length,
        backend = settings.storage.backend.as_str(),
        "Configuration loaded"
    );

    let registry = Arc::new(TargetRegistry::new(
        settings.targets()?,
        limits.max_server_graph_length,
    )?);
    let tracker = Arc::new(TimeTracker::new(limits, settings.graph.update_gap));
    let mut hub = NotificationHub::new(
        Arc::clone(&registry),
        Arc::clone(&tracker),
        settings.graph.duration,
    )
    .with_graph_visible(settings.graph_visible())
    .with_minecraft_versions(settings.minecraft_versions.clone());
    if let Some(label) = &settings.graph.duration_label {
        hub = hub.with_duration_label(label.clone());
    }
    let hub = Arc::new(hub);

    let allow_outage = args.allow_storage_outage || settings.storage.allow_unavailable;
    let storage = prepare_backend(open_backend(&settings.storage)?, allow_outage)
        .await
        .context("failed to prepare storage")?;
    restore_history(
        storage.as_ref(),
        &tracker,
        &registry,
        settings.graph.duration,
    )
    .await
    .context("failed to load history from storage")?;

    let retention = settings.retention_policy().map(|policy| {
        info!(window = ?policy.window, interval = ?policy.interval, "Retention enabled");
        start_retention_job(Arc::clone(&storage), policy, |_| {})
    });

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let http_listener = TcpListener::bind(&settings.site.http_listen)
        .await
        .with_context(|| format!("failed to bind {}", settings.site.http_listen))?;
    let feed_listener = TcpListener::bind(&settings.site.feed_listen)
        .await
        .with_context(|| format!("failed to bind {}", settings.site.feed_listen))?;
    let http = tokio::spawn(serve_http(
        http_listener,
        Arc::clone(&hub),
        shutdown_rx.clone(),
    ));
    let feed = tokio::spawn(serve_feed(feed_listener, Arc::clone(&hub), shutdown_rx));

    let scheduler = Scheduler::new(
        hub,
        Arc::new(MinecraftProber::new()),
        storage,
        SchedulerOptions::from_settings(&settings),
    )
    .spawn();

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    info!("Shutting down");

    scheduler.shutdown().await;
    if let Some(retention) = retention {
        retention.shutdown().await;
    }
    let _ = shutdown_tx.send(true);
    for (name, server) in [("http", http), ("feed", feed)] {
        match server.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(server = name, error = %e, "Server exited with error"),
            Err(e) => warn!(server = name, error = %e, "Server task failed"),
        }
    }

    Ok(())
}
