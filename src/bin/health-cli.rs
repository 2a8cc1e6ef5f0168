use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde::Serialize;

use health_watch::config::loader::load_config;
use health_watch::config::WatcherConfig;
use health_watch::health::{HealthChecker, NodeName, PodId, ShadowTrafficChecker, StatusStanza};
use health_watch::probe::{HealthClient, HttpHealthClient};
use health_watch::resources::Unwired;
use health_watch::store::{ConsulKv, HealthKv};

#[derive(Parser)]
#[command(name = "health-cli")]
#[command(about = "One-shot health lookups against the KV store and status endpoints", long_about = None)]
struct Cli {
    /// Configuration file to take store and probe settings from.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the store address.
    #[arg(short, long)]
    address: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Stored health of every instance of a service
    Service { id: String },
    /// Stored health of one service instance on one node
    Node { service: String, node: String },
    /// Probe the status endpoints of a service directly
    Probe {
        service: String,
        /// Comma-separated node names.
        #[arg(long, value_delimiter = ',', required = true)]
        nodes: Vec<String>,
        /// Status port; 0 reports every node passing without probing.
        #[arg(long)]
        port: u16,
        #[arg(long)]
        path: Option<String>,
        /// Use plain HTTP instead of HTTPS.
        #[arg(long)]
        http: bool,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => WatcherConfig::default(),
    };
    if let Some(address) = cli.address {
        config.store.address = address;
    }

    let kv: Arc<dyn HealthKv> = Arc::new(ConsulKv::new(&config.store)?);

    match cli.command {
        Commands::Service { id } => {
            let snapshot = HealthChecker::new(kv).service(&id).await?;
            print_json(&snapshot)?;
        }
        Commands::Node { service, node } => {
            let res = HealthChecker::new(kv)
                .node_health(&PodId::from(service), &NodeName::from(node))
                .await?;
            print_json(&res)?;
        }
        Commands::Probe {
            service,
            nodes,
            port,
            path,
            http,
        } => {
            let client: Arc<dyn HealthClient> = Arc::new(HttpHealthClient::new(&config.probe)?);
            let checker = ShadowTrafficChecker::new(
                client,
                Arc::new(Unwired),
                kv,
                Arc::new(Unwired),
                true,
                false,
            );
            let nodes: Vec<NodeName> = nodes.into_iter().map(NodeName::from).collect();
            let status = StatusStanza { port, path, http };
            let snapshot = checker.service(&service, &nodes, true, &status).await?;
            print_json(&snapshot)?;
        }
    }

    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<(), serde_json::Error> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
