//! Blob node binary

use blobsync::common::{Config, CoordinationBackend};
use blobsync::BlobNode;
use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "blobsync-node")]
#[command(about = "blobsync node: replicated blob store kept in sync through a coordination service")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a node
    Serve {
        /// Configuration file (TOML)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Host advertised to peers
        #[arg(long)]
        host: Option<String>,

        /// Port advertised to peers
        #[arg(long)]
        port: Option<u16>,

        /// Bind address for the HTTP API
        #[arg(long)]
        bind: Option<SocketAddr>,

        /// Data directory
        #[arg(long)]
        data: Option<PathBuf>,

        /// Accept writes on this node
        #[arg(long)]
        leader: bool,

        /// host:port of the current leader
        #[arg(long)]
        leader_addr: Option<String>,

        /// etcd endpoints (comma-separated); selects the etcd backend
        #[arg(long, value_delimiter = ',')]
        etcd: Vec<String>,

        /// Seconds between sync passes
        #[arg(long)]
        interval: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            config,
            host,
            port,
            bind,
            data,
            leader,
            leader_addr,
            etcd,
            interval,
        } => {
            // File and environment first, command line wins
            let mut config = Config::load(config.as_deref())?;
            if let Some(host) = host {
                config.node.host = host;
            }
            if let Some(port) = port {
                config.node.port = port;
                if bind.is_none() {
                    config.node.bind_addr.set_port(port);
                }
            }
            if let Some(bind) = bind {
                config.node.bind_addr = bind;
            }
            if let Some(data) = data {
                config.node.data_dir = data;
            }
            if leader {
                config.node.leader = true;
            }
            if leader_addr.is_some() {
                config.node.leader_addr = leader_addr;
            }
            if !etcd.is_empty() {
                config.coordination.backend = CoordinationBackend::Etcd;
                config.coordination.endpoints = etcd;
            }
            if let Some(interval) = interval {
                config.sync.interval_secs = interval;
            }
            config.validate()?;

            tracing_subscriber::registry()
                .with(
                    tracing_subscriber::EnvFilter::try_from_default_env()
                        .unwrap_or_else(|_| config.log_level.as_str().into()),
                )
                .with(tracing_subscriber::fmt::layer())
                .init();

            BlobNode::new(config).serve().await?;
        }
    }

    Ok(())
}
