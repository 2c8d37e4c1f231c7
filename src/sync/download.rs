//! Pulling blob content from peers that hold the latest version
//!
//! Both entry points walk the candidate list until one peer delivers.
//! A failed candidate is logged and skipped; nothing is retried in place,
//! the next reconciliation pass simply tries again.

use crate::blobstore::{copy_and_commit, BlobKey, BlobStore, Caller};
use crate::cluster::NodeInfo;
use crate::common::{Error, Result};
use crate::peer::PeerConnector;

/// Fetch a key this node does not have. Returns `true` once the key shows
/// up in the local listing, whoever created it.
pub async fn download_missing_blob(
    store: &dyn BlobStore,
    peers: &dyn PeerConnector,
    key: &BlobKey,
    candidates: &[NodeInfo],
) -> bool {
    for node in candidates {
        match fetch_missing_from(store, peers, key, node).await {
            Ok(true) => {
                tracing::info!("Downloaded missing blob {} from {}", key, node);
                return true;
            }
            Ok(false) => {
                tracing::warn!("{} still missing locally after download from {}", key, node)
            }
            Err(Error::KeyNotFound(_)) => {
                tracing::info!("{} no longer has {}, trying next holder", node, key)
            }
            Err(e) => tracing::warn!("Failed to download {} from {}: {}", key, node, e),
        }
    }
    false
}

async fn fetch_missing_from(
    store: &dyn BlobStore,
    peers: &dyn PeerConnector,
    key: &BlobKey,
    node: &NodeInfo,
) -> Result<bool> {
    let client = peers.connect(node).await?;
    let meta = client.get_blob_meta(key).await?;
    let reader = client.get_blob(key).await?;
    tracing::debug!(
        "Fetching {} ({} bytes, version {}) from {}",
        key,
        reader.len(),
        reader.version(),
        client.peer()
    );

    let created = match store.create_blob(key, meta.settable, &Caller::Internal).await {
        Ok(writer) => copy_and_commit(reader, writer).await.map(|_| ()),
        Err(e) => Err(e),
    };
    match created {
        Ok(()) => {}
        Err(Error::KeyAlreadyExists(_)) => {
            tracing::info!("{} was created locally while downloading it", key)
        }
        Err(e) => return Err(e),
    }
    drop(client);

    Ok(store.list_keys().await?.contains(key))
}

/// Replace the local content of `key` with a current holder's copy.
pub async fn download_updated_blob(
    store: &dyn BlobStore,
    peers: &dyn PeerConnector,
    key: &BlobKey,
    candidates: &[NodeInfo],
) -> bool {
    for node in candidates {
        match fetch_update_from(store, peers, key, node).await {
            Ok(bytes) => {
                tracing::info!("Updated {} from {} ({} bytes)", key, node, bytes);
                return true;
            }
            Err(Error::KeyNotFound(_)) => {
                tracing::info!("{} disappeared while updating from {}", key, node)
            }
            Err(e) => tracing::warn!("Failed to update {} from {}: {}", key, node, e),
        }
    }
    false
}

async fn fetch_update_from(
    store: &dyn BlobStore,
    peers: &dyn PeerConnector,
    key: &BlobKey,
    node: &NodeInfo,
) -> Result<u64> {
    let client = peers.connect(node).await?;
    let reader = client.get_blob(key).await?;
    let writer = store.update_blob(key, &Caller::Internal).await?;
    copy_and_commit(reader, writer).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blobstore::{AllowAll, MemBlobStore, SettableBlobMeta};
    use crate::peer::InProcessPeers;
    use std::sync::Arc;

    fn key(k: &str) -> BlobKey {
        BlobKey::new(k).unwrap()
    }

    fn node(name: &str) -> NodeInfo {
        NodeInfo::new(name, 6627)
    }

    async fn peer_with(peers: &InProcessPeers, name: &str, k: &BlobKey, data: &[u8]) {
        let store = Arc::new(MemBlobStore::new(Arc::new(AllowAll)));
        store
            .create_blob_from_bytes(k, data, SettableBlobMeta::default(), &Caller::Internal)
            .await
            .unwrap();
        peers.register(node(name), store);
    }

    #[tokio::test]
    async fn test_missing_falls_through_to_next_candidate() {
        let peers = InProcessPeers::new();
        let k = key("topo1");
        peer_with(&peers, "down", &k, b"unreachable").await;
        peers.set_reachable(&node("down"), false);
        peers.register(node("empty"), Arc::new(MemBlobStore::new(Arc::new(AllowAll))));
        peer_with(&peers, "good", &k, b"payload").await;

        let local = MemBlobStore::new(Arc::new(AllowAll));
        let candidates = vec![node("down"), node("empty"), node("good")];
        assert!(download_missing_blob(&local, &peers, &k, &candidates).await);
        assert_eq!(local.read_blob(&k, &Caller::Internal).await.unwrap(), b"payload");
    }

    #[tokio::test]
    async fn test_missing_tolerates_local_creation_race() {
        let peers = InProcessPeers::new();
        let k = key("topo1");
        peer_with(&peers, "good", &k, b"remote").await;

        let local = MemBlobStore::new(Arc::new(AllowAll));
        local
            .create_blob_from_bytes(&k, b"local", SettableBlobMeta::default(), &Caller::Internal)
            .await
            .unwrap();
        assert!(download_missing_blob(&local, &peers, &k, &[node("good")]).await);
        assert_eq!(local.read_blob(&k, &Caller::Internal).await.unwrap(), b"local");
    }

    #[tokio::test]
    async fn test_all_candidates_failing() {
        let peers = InProcessPeers::new();
        let local = MemBlobStore::new(Arc::new(AllowAll));
        let k = key("gone");
        assert!(!download_missing_blob(&local, &peers, &k, &[node("nobody")]).await);
        assert!(!download_missing_blob(&local, &peers, &k, &[]).await);
        assert!(!local.blob_exists(&k, &Caller::Internal).await.unwrap());
    }

    #[tokio::test]
    async fn test_update_replaces_content() {
        let peers = InProcessPeers::new();
        let k = key("conf");
        peer_with(&peers, "leader", &k, b"new").await;

        let local = MemBlobStore::new(Arc::new(AllowAll));
        local
            .create_blob_from_bytes(&k, b"old", SettableBlobMeta::default(), &Caller::Internal)
            .await
            .unwrap();
        assert!(download_updated_blob(&local, &peers, &k, &[node("leader")]).await);
        assert_eq!(local.read_blob(&k, &Caller::Internal).await.unwrap(), b"new");
    }

    #[tokio::test]
    async fn test_failed_update_keeps_old_content() {
        let peers = InProcessPeers::new();
        peers.register(node("empty"), Arc::new(MemBlobStore::new(Arc::new(AllowAll))));
        let k = key("conf");

        let local = MemBlobStore::new(Arc::new(AllowAll));
        local
            .create_blob_from_bytes(&k, b"old", SettableBlobMeta::default(), &Caller::Internal)
            .await
            .unwrap();
        assert!(!download_updated_blob(&local, &peers, &k, &[node("empty")]).await);
        assert_eq!(local.read_blob(&k, &Caller::Internal).await.unwrap(), b"old");
    }
}
