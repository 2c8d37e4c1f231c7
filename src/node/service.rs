//! Client-facing blob operations of a node
//!
//! Writes are accepted by the leader only. A successful commit is followed
//! by publishing the leader's new version record, which is what followers
//! pick up on their next reconciliation pass. Reads are served everywhere.

use crate::blobstore::{BlobKey, BlobReader, BlobStore, Caller, ReadableBlobMeta, SettableBlobMeta};
use crate::cluster::{LeaderElector, NodeInfo};
use crate::common::{Error, Result};
use crate::coordination::{key_path, ClusterState};
use std::sync::Arc;

#[derive(Clone)]
pub struct BlobService {
    store: Arc<dyn BlobStore>,
    /// `None` for a standalone node that records no versions.
    state: Option<ClusterState>,
    node: NodeInfo,
    leader: Arc<dyn LeaderElector>,
}

impl BlobService {
    pub fn new(
        store: Arc<dyn BlobStore>,
        state: Option<ClusterState>,
        node: NodeInfo,
        leader: Arc<dyn LeaderElector>,
    ) -> Self {
        Self {
            store,
            state,
            node,
            leader,
        }
    }

    pub fn node(&self) -> &NodeInfo {
        &self.node
    }

    pub fn store(&self) -> &Arc<dyn BlobStore> {
        &self.store
    }

    pub fn is_leader(&self) -> bool {
        self.leader.is_leader()
    }

    pub fn leader(&self) -> Option<NodeInfo> {
        self.leader.leader()
    }

    fn ensure_leader(&self) -> Result<()> {
        if self.leader.is_leader() {
            return Ok(());
        }
        let leader = self
            .leader
            .leader()
            .map(|n| n.to_string())
            .unwrap_or_else(|| "unknown".to_string());
        Err(Error::NotLeader(leader))
    }

    async fn publish_new_version(&self, key: &BlobKey) -> Result<u64> {
        match &self.state {
            Some(state) => state.publish_new_version(key, &self.node).await,
            None => Ok(0),
        }
    }

    /// Create a blob and register this node as holding its first version.
    /// Returns the published sequence number (`0` when standalone).
    ///
    /// If the version cannot be published the local copy is removed again,
    /// so the create can simply be retried.
    pub async fn create_blob(
        &self,
        key: &BlobKey,
        data: &[u8],
        meta: SettableBlobMeta,
        caller: &Caller,
    ) -> Result<u64> {
        self.ensure_leader()?;
        self.store.create_blob_from_bytes(key, data, meta, caller).await?;
        let sequence = match self.publish_new_version(key).await {
            Ok(sequence) => sequence,
            Err(e) => {
                tracing::warn!("Could not register {}, rolling back local create: {}", key, e);
                if let Err(undo) = self.store.delete_blob(key, &Caller::Internal).await {
                    tracing::error!("Rollback of {} failed: {}", key, undo);
                }
                return Err(e);
            }
        };
        tracing::info!("Created {} ({} bytes) at sequence {}", key, data.len(), sequence);
        Ok(sequence)
    }

    /// Replace the content. A failed publish leaves the new bytes in place;
    /// retrying the update publishes them.
    pub async fn update_blob(&self, key: &BlobKey, data: &[u8], caller: &Caller) -> Result<u64> {
        self.ensure_leader()?;
        self.store.update_blob_from_bytes(key, data, caller).await?;
        let sequence = self.publish_new_version(key).await?;
        tracing::info!("Updated {} ({} bytes) at sequence {}", key, data.len(), sequence);
        Ok(sequence)
    }

    /// Delete locally, then drop the key from the registry so the other
    /// nodes purge it on their next pass.
    ///
    /// A key already gone locally but still registered (an earlier delete
    /// lost the coordination service halfway) is unregistered.
    pub async fn delete_blob(&self, key: &BlobKey, caller: &Caller) -> Result<()> {
        self.ensure_leader()?;
        if let Err(e) = self.store.delete_blob(key, caller).await {
            if !e.is_key_not_found() || !self.is_registered(key).await? {
                return Err(e);
            }
            tracing::info!("{} is only left in the registry, unregistering", key);
        }
        if let Some(state) = &self.state {
            state.remove_key(key).await?;
        }
        tracing::info!("Deleted {}", key);
        Ok(())
    }

    async fn is_registered(&self, key: &BlobKey) -> Result<bool> {
        match &self.state {
            Some(state) => state.coordination().exists(&key_path(key)).await,
            None => Ok(false),
        }
    }

    pub async fn get_blob(&self, key: &BlobKey, caller: &Caller) -> Result<BlobReader> {
        self.store.get_blob(key, caller).await
    }

    pub async fn get_blob_meta(&self, key: &BlobKey, caller: &Caller) -> Result<ReadableBlobMeta> {
        self.store.get_blob_meta(key, caller).await
    }

    pub async fn set_blob_meta(
        &self,
        key: &BlobKey,
        meta: SettableBlobMeta,
        caller: &Caller,
    ) -> Result<()> {
        self.ensure_leader()?;
        self.store.set_blob_meta(key, meta, caller).await
    }

    pub async fn list_keys(&self) -> Result<Vec<BlobKey>> {
        let mut keys = self.store.list_keys().await?;
        keys.sort();
        Ok(keys)
    }

    pub async fn get_blob_replication(&self, key: &BlobKey, caller: &Caller) -> Result<u32> {
        self.store.get_blob_replication(key, caller).await
    }

    pub async fn update_blob_replication(
        &self,
        key: &BlobKey,
        replication: u32,
        caller: &Caller,
    ) -> Result<u32> {
        self.ensure_leader()?;
        self.store
            .update_blob_replication(key, replication, caller)
            .await
    }
}
