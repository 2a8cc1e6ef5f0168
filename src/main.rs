//! health-watch daemon
//!
//! Watches the configured services and logs every node status change.
//!
//! # Architecture Overview
//!
//! ```text
//!   ┌──────────────┐      ┌───────────────────────────────┐
//!   │  KV store    │─────▶│ ShadowTrafficChecker          │
//!   │ health/...   │      │  per service:                 │      ┌──────────────┐
//!   └──────────────┘      │   store poller ─┐             │─────▶│  reporter    │──▶ logs, metrics
//!   ┌──────────────┐      │   probe monitors┴▶ snapshots  │      └──────────────┘
//!   │status        │◀────▶│   reconciler + heartbeat      │
//!   │endpoints     │      └──────────────▲────────────────┘
//!   └──────────────┘                     │ node sets
//!                          ┌─────────────┴─────┐
//!                          │ config watcher    │◀── health-watch.toml
//!                          └───────────────────┘
//! ```

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use futures_util::future::join_all;
use tokio::sync::mpsc;

use health_watch::config::loader::load_config;
use health_watch::config::watcher::{diff_services, ConfigWatcher};
use health_watch::config::WatcherConfig;
use health_watch::error::HealthError;
use health_watch::health::{
    Buffers, HealthStatus, NodeName, ServiceSnapshot, ShadowTimings, ShadowTrafficChecker,
    ShadowWatchRequest, SnapshotReceiver,
};
use health_watch::lifecycle::signals::shutdown_on_signal;
use health_watch::lifecycle::Shutdown;
use health_watch::observability::{logging, metrics};
use health_watch::probe::{HealthClient, HttpHealthClient};
use health_watch::resources::Unwired;
use health_watch::store::{ConsulKv, HealthKv};

#[derive(Parser)]
#[command(name = "health-watch")]
#[command(about = "Watch service health from the KV store and status endpoints", long_about = None)]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "health-watch.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let config = load_config(&args.config)?;

    logging::init_logging(&config.observability)?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        store = %config.store.address,
        services = config.services.len(),
        "health-watch starting"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse::<SocketAddr>() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let kv: Arc<dyn HealthKv> = Arc::new(ConsulKv::new(&config.store)?);
    let client: Arc<dyn HealthClient> = Arc::new(HttpHealthClient::new(&config.probe)?);
    let checker = ShadowTrafficChecker::new(
        client,
        Arc::new(Unwired),
        kv,
        Arc::new(Unwired),
        config.shadow.use_health_service,
        config.shadow.use_only_health_service,
    )
    .with_timings(ShadowTimings::from(&config.shadow))
    .with_buffers(Buffers::from(&config.watch));

    let shutdown = Shutdown::new();
    let mut node_updates = HashMap::new();
    let mut tasks = Vec::with_capacity(config.services.len() * 2);

    for service in &config.services {
        let (update_tx, update_rx) = mpsc::channel(1);
        let req = ShadowWatchRequest::new(
            service.id.clone(),
            service.nodes.clone(),
            service.status.clone(),
        )
        .with_node_updates(update_rx)
        .with_watch_delay(Duration::from_secs(config.watch.delay_secs))
        .with_health_service(service.use_health_service)
        .with_only_health_service(service.use_only_health_service);

        let watch = checker.watch_service(req, shutdown.token());
        node_updates.insert(service.id.clone(), update_tx);
        tasks.push(watch.task);
        tasks.push(tokio::spawn(report_service(
            service.id.clone(),
            watch.results,
            watch.errors,
        )));
    }

    // The notify watcher stops when dropped; hold it until exit.
    let (config_watcher, reloads) = ConfigWatcher::new(&args.config);
    let _file_watcher = match config_watcher.run() {
        Ok(watcher) => Some(watcher),
        Err(e) => {
            tracing::warn!(error = %e, "Config hot reload disabled");
            None
        }
    };
    tasks.push(tokio::spawn(apply_reloads(
        config,
        reloads,
        node_updates,
        shutdown.clone(),
    )));

    shutdown_on_signal(shutdown).await;

    for joined in join_all(tasks).await {
        if let Err(e) = joined {
            tracing::error!(error = %e, "Watch task failed");
        }
    }

    tracing::info!("Shutdown complete");
    Ok(())
}

/// Log status transitions of one service until its watch closes.
async fn report_service(
    service_id: String,
    mut results: SnapshotReceiver<ServiceSnapshot>,
    mut errors: mpsc::Receiver<HealthError>,
) {
    let mut known: HashMap<NodeName, HealthStatus> = HashMap::new();

    loop {
        tokio::select! {
            snapshot = results.recv() => match snapshot {
                Some(snapshot) => {
                    for (node, res) in &snapshot {
                        let previous = known.insert(node.clone(), res.status);
                        if previous != Some(res.status) {
                            tracing::info!(
                                service = %service_id,
                                node = %node,
                                status = %res.status,
                                previous = previous.map(|s| s.as_str()).unwrap_or("none"),
                                "Node status changed"
                            );
                        }
                        metrics::record_node_status(&service_id, node.as_str(), res.status.is_passing());
                    }
                }
                None => break,
            },
            Some(err) = errors.recv() => {
                tracing::debug!(service = %service_id, kind = err.kind(), "Watch error drained");
            }
        }
    }

    tracing::debug!(service = %service_id, "Service watch closed");
}

/// Push node-set changes from reloaded configs into running watches.
async fn apply_reloads(
    mut current: WatcherConfig,
    mut reloads: mpsc::UnboundedReceiver<WatcherConfig>,
    node_updates: HashMap<String, mpsc::Sender<Vec<NodeName>>>,
    shutdown: Shutdown,
) {
    loop {
        let next = tokio::select! {
            _ = shutdown.triggered() => return,
            next = reloads.recv() => match next {
                Some(next) => next,
                None => return,
            },
        };

        let diff = diff_services(&current, &next);
        for (service_id, nodes) in diff.node_sets {
            let Some(updates) = node_updates.get(&service_id) else {
                continue;
            };
            tracing::info!(service = %service_id, nodes = nodes.len(), "Applying new node set");
            if updates.send(nodes).await.is_err() {
                tracing::warn!(service = %service_id, "Watch no longer accepts node updates");
            }
        }
        for service_id in diff.added.iter().chain(diff.removed.iter()) {
            tracing::warn!(service = %service_id, "Service added or removed; restart to apply");
        }

        current = next;
    }
}
