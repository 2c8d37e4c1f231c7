//! Node server: wires storage, coordination, peers and the HTTP API

use crate::blobstore::{AclAuthorizer, BlobStore, LocalFsBlobStore};
use crate::cluster::{ClusterContext, LeaderElector, NodeInfo, StaticLeader};
use crate::common::{Config, Error, Result};
use crate::coordination::{self, ClusterState};
use crate::node::http::create_router;
use crate::node::service::BlobService;
use crate::peer::HttpPeerConnector;
use std::sync::Arc;

pub struct BlobNode {
    config: Config,
}

impl BlobNode {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    pub async fn serve(self) -> Result<()> {
        let node = NodeInfo::new(self.config.node.host.clone(), self.config.node.port);
        tracing::info!("Starting blob node: {}", node);
        tracing::info!("  HTTP API: {}", self.config.node.bind_addr);
        tracing::info!("  Data dir: {}", self.config.node.data_dir.display());
        tracing::info!("  Coordination: {:?}", self.config.coordination.backend);
        tracing::info!("  Sync interval: {:?}", self.config.sync.interval());

        let leader_addr = self
            .config
            .node
            .leader_addr
            .as_deref()
            .map(str::parse::<NodeInfo>)
            .transpose()?;
        let elector: Arc<dyn LeaderElector> = Arc::new(StaticLeader::new(
            node.clone(),
            self.config.node.leader,
            leader_addr,
        ));

        let coord = coordination::connect(&self.config.coordination).await?;
        let state = ClusterState::new(coord);
        let peers = Arc::new(HttpPeerConnector::new(
            node.clone(),
            self.config.sync.peer_timeout(),
        )?);

        let store = LocalFsBlobStore::open_clustered(
            &self.config.node.data_dir,
            Arc::new(AclAuthorizer),
            ClusterContext {
                node: node.clone(),
                state: state.clone(),
                leader: elector.clone(),
                peers,
                interval: self.config.sync.interval(),
            },
        )?;
        let store: Arc<dyn BlobStore> = store;
        store.start_sync().await?;

        let service = BlobService::new(store.clone(), Some(state), node.clone(), elector.clone());
        let router = create_router(service);

        let listener = tokio::net::TcpListener::bind(self.config.node.bind_addr).await?;
        tracing::info!(
            "✓ Blob node ready ({})",
            if elector.is_leader() { "leader" } else { "follower" }
        );

        let served = axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal())
            .await;

        store.shutdown().await;
        served.map_err(|e| Error::Internal(format!("HTTP server error: {}", e)))?;
        tracing::info!("Blob node {} stopped", node);
        Ok(())
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown requested");
}
