//! Anti-entropy between a node's local store and the coordination service
//!
//! One pass takes an inventory of both sides, then:
//! 1. deletes keys the cluster no longer knows about,
//! 2. refreshes local keys this node is not recorded as holding at the
//!    latest sequence,
//! 3. downloads registered keys the node does not have.
//!
//! Every step works key by key. A key deleted underneath the pass is
//! skipped; a per-key failure is logged and retried on the next pass. Only
//! losing the coordination service aborts the pass as a whole.

use crate::blobstore::{BlobKey, BlobStore, Caller};
use crate::cluster::{LeaderElector, NodeInfo};
use crate::common::{Error, Result};
use crate::coordination::ClusterState;
use crate::peer::PeerConnector;
use crate::sync::download::{download_missing_blob, download_updated_blob};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;

/// Outcome of one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub deleted: Vec<BlobKey>,
    pub updated: Vec<BlobKey>,
    pub downloaded: Vec<BlobKey>,
    /// Keys that vanished mid-pass or had nothing to do
    pub skipped: Vec<BlobKey>,
    /// Keys that could not be converged this pass
    pub failed: Vec<BlobKey>,
}

impl SyncReport {
    /// True when the pass changed nothing locally.
    pub fn is_noop(&self) -> bool {
        self.deleted.is_empty() && self.updated.is_empty() && self.downloaded.is_empty()
    }
}

/// Keys to delete locally: those the cluster does not list. An empty
/// cluster listing means everything goes.
pub fn keys_to_delete(local: &BTreeSet<BlobKey>, remote: &BTreeSet<BlobKey>) -> BTreeSet<BlobKey> {
    if remote.is_empty() {
        return local.clone();
    }
    local.difference(remote).cloned().collect()
}

pub fn keys_to_download(local: &BTreeSet<BlobKey>, remote: &BTreeSet<BlobKey>) -> BTreeSet<BlobKey> {
    remote.difference(local).cloned().collect()
}

enum KeyOutcome {
    Done,
    Skipped,
    Failed,
}

pub struct Synchronizer {
    store: Arc<dyn BlobStore>,
    state: ClusterState,
    peers: Arc<dyn PeerConnector>,
    node: NodeInfo,
    pass: Mutex<()>,
}

impl Synchronizer {
    pub fn new(
        store: Arc<dyn BlobStore>,
        state: ClusterState,
        peers: Arc<dyn PeerConnector>,
        node: NodeInfo,
    ) -> Self {
        Self {
            store,
            state,
            peers,
            node,
            pass: Mutex::new(()),
        }
    }

    pub fn node(&self) -> &NodeInfo {
        &self.node
    }

    /// Run one full pass. Passes on the same synchronizer never overlap.
    pub async fn sync_blobs(&self) -> Result<SyncReport> {
        let _guard = self.pass.lock().await;
        let mut report = SyncReport::default();

        let local: BTreeSet<BlobKey> = self.store.list_keys().await?.into_iter().collect();
        let remote: BTreeSet<BlobKey> = self.state.list_keys().await?.into_iter().collect();
        tracing::debug!(
            "Sync pass on {}: {} local keys, {} registered keys",
            self.node,
            local.len(),
            remote.len()
        );

        let doomed = keys_to_delete(&local, &remote);
        if remote.is_empty() && !local.is_empty() {
            tracing::info!(
                "Coordination service lists no blobs, purging all {} local keys",
                local.len()
            );
        }
        for key in &doomed {
            match self.store.delete_blob(key, &Caller::Internal).await {
                Ok(()) => report.deleted.push(key.clone()),
                Err(Error::KeyNotFound(_)) => report.skipped.push(key.clone()),
                Err(e) => {
                    tracing::warn!("Failed to delete stale blob {}: {}", key, e);
                    report.failed.push(key.clone());
                }
            }
        }

        for key in local.intersection(&remote) {
            let outcome = self.freshen(key).await;
            if self.record(&mut report, key, outcome)? {
                report.updated.push(key.clone());
            }
        }

        for key in keys_to_download(&local, &remote) {
            let outcome = self.fetch(&key).await;
            if self.record(&mut report, &key, outcome)? {
                report.downloaded.push(key);
            }
        }

        if !report.is_noop() || !report.failed.is_empty() {
            tracing::info!(
                "Sync pass on {}: {} deleted, {} updated, {} downloaded, {} failed",
                self.node,
                report.deleted.len(),
                report.updated.len(),
                report.downloaded.len(),
                report.failed.len()
            );
        }
        Ok(report)
    }

    /// File a per-key outcome. `Ok(true)` means the key was converged;
    /// pass-fatal errors are handed back to abort the pass.
    fn record(
        &self,
        report: &mut SyncReport,
        key: &BlobKey,
        outcome: Result<KeyOutcome>,
    ) -> Result<bool> {
        match outcome {
            Ok(KeyOutcome::Done) => return Ok(true),
            Ok(KeyOutcome::Skipped) => report.skipped.push(key.clone()),
            Ok(KeyOutcome::Failed) => report.failed.push(key.clone()),
            Err(e) if e.is_key_not_found() => {
                tracing::info!("{} was deleted during the sync pass, skipping", key);
                report.skipped.push(key.clone());
            }
            Err(e) if e.is_pass_fatal() => {
                tracing::error!("Aborting sync pass on {}: {}", self.node, e);
                return Err(e);
            }
            Err(e) => {
                tracing::warn!("Failed to sync {}: {}", key, e);
                report.failed.push(key.clone());
            }
        }
        Ok(false)
    }

    /// Bring a local key up to the latest registered sequence.
    async fn freshen(&self, key: &BlobKey) -> Result<KeyOutcome> {
        let records = self.state.version_records(key).await?;
        let Some(latest) = records.iter().map(|r| r.sequence).max() else {
            tracing::debug!("{} has no version records yet", key);
            return Ok(KeyOutcome::Skipped);
        };
        let holders: Vec<NodeInfo> = records
            .into_iter()
            .filter(|r| r.sequence == latest)
            .map(|r| r.owner)
            .collect();
        if holders.contains(&self.node) {
            return Ok(KeyOutcome::Skipped);
        }

        let candidates = shuffled(holders);
        tracing::debug!("{} is behind sequence {} for {}", self.node, latest, key);
        if download_updated_blob(self.store.as_ref(), self.peers.as_ref(), key, &candidates).await
        {
            self.state.publish(key, &self.node, latest).await?;
            Ok(KeyOutcome::Done)
        } else {
            Ok(KeyOutcome::Failed)
        }
    }

    /// Download a key registered in the cluster but absent locally.
    async fn fetch(&self, key: &BlobKey) -> Result<KeyOutcome> {
        let records = self.state.version_records(key).await?;
        let latest = records.iter().map(|r| r.sequence).max().unwrap_or(0);
        let candidates: Vec<NodeInfo> = records
            .into_iter()
            .filter(|r| r.sequence == latest && r.owner != self.node)
            .map(|r| r.owner)
            .collect();
        if candidates.is_empty() {
            tracing::warn!("No other node holds the latest version of {}", key);
            return Ok(KeyOutcome::Failed);
        }

        let candidates = shuffled(candidates);
        if download_missing_blob(self.store.as_ref(), self.peers.as_ref(), key, &candidates).await
        {
            self.state.publish(key, &self.node, latest).await?;
            Ok(KeyOutcome::Done)
        } else {
            Ok(KeyOutcome::Failed)
        }
    }
}

fn shuffled(mut nodes: Vec<NodeInfo>) -> Vec<NodeInfo> {
    use rand::seq::SliceRandom;
    nodes.shuffle(&mut rand::thread_rng());
    nodes
}

/// Handle on a running periodic sync task.
pub struct SyncHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SyncHandle {
    /// Stop scheduling passes and wait for the current one to finish.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            tracing::warn!("Sync task ended abnormally: {}", e);
        }
    }
}

/// Run `sync_blobs` every `interval` while this node is not the leader.
///
/// The first pass starts immediately. A failed pass is logged and the task
/// carries on; there is no state to recover between passes.
pub fn start_sync_task(
    synchronizer: Arc<Synchronizer>,
    leader: Arc<dyn LeaderElector>,
    interval: Duration,
) -> SyncHandle {
    let (shutdown, mut shutdown_rx) = watch::channel(false);
    let task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tracing::info!(
            "Blob sync started on {} every {:?}",
            synchronizer.node(),
            interval
        );
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown_rx.changed() => break,
            }
            if leader.is_leader() {
                tracing::debug!("Leader does not reconcile, skipping sync pass");
                continue;
            }
            if let Err(e) = synchronizer.sync_blobs().await {
                tracing::error!("Sync pass failed: {}", e);
            }
        }
        tracing::info!("Blob sync stopped on {}", synchronizer.node());
    });
    SyncHandle { shutdown, task }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(list: &[&str]) -> BTreeSet<BlobKey> {
        list.iter().map(|k| BlobKey::new(*k).unwrap()).collect()
    }

    #[test]
    fn test_keys_to_delete() {
        assert_eq!(
            keys_to_delete(&keys(&["a", "b", "c"]), &keys(&["b", "d"])),
            keys(&["a", "c"])
        );
        assert!(keys_to_delete(&keys(&["a"]), &keys(&["a"])).is_empty());
    }

    #[test]
    fn test_empty_remote_purges_everything() {
        assert_eq!(keys_to_delete(&keys(&["a", "b"]), &keys(&[])), keys(&["a", "b"]));
        assert!(keys_to_delete(&keys(&[]), &keys(&[])).is_empty());
    }

    #[test]
    fn test_keys_to_download() {
        assert_eq!(
            keys_to_download(&keys(&["a"]), &keys(&["a", "b", "c"])),
            keys(&["b", "c"])
        );
    }
}
