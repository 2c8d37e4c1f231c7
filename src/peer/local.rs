//! Peers living in the same process

use crate::blobstore::{BlobKey, BlobReader, BlobStore, Caller, ReadableBlobMeta};
use crate::cluster::NodeInfo;
use crate::common::{Error, Result};
use crate::peer::{PeerClient, PeerConnector};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

/// Directory of in-process stores, addressable by node identity.
///
/// Lets several nodes share one process (single-binary demos, tests) and
/// simulates partitions with [`InProcessPeers::set_reachable`].
#[derive(Default)]
pub struct InProcessPeers {
    stores: RwLock<HashMap<NodeInfo, Arc<dyn BlobStore>>>,
    unreachable: RwLock<HashSet<NodeInfo>>,
}

impl InProcessPeers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, node: NodeInfo, store: Arc<dyn BlobStore>) {
        self.stores
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(node, store);
    }

    pub fn set_reachable(&self, node: &NodeInfo, reachable: bool) {
        let mut unreachable = self.unreachable.write().unwrap_or_else(|e| e.into_inner());
        if reachable {
            unreachable.remove(node);
        } else {
            unreachable.insert(node.clone());
        }
    }
}

#[async_trait]
impl PeerConnector for InProcessPeers {
    async fn connect(&self, node: &NodeInfo) -> Result<Box<dyn PeerClient>> {
        let unreachable = self
            .unreachable
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains(node);
        let store = self
            .stores
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(node)
            .cloned();
        match store {
            Some(store) if !unreachable => Ok(Box::new(InProcessClient {
                peer: node.clone(),
                store,
            })),
            Some(_) => Err(Error::Transport {
                peer: node.to_string(),
                reason: "unreachable".to_string(),
            }),
            None => Err(Error::Transport {
                peer: node.to_string(),
                reason: "unknown node".to_string(),
            }),
        }
    }
}

struct InProcessClient {
    peer: NodeInfo,
    store: Arc<dyn BlobStore>,
}

#[async_trait]
impl PeerClient for InProcessClient {
    fn peer(&self) -> &NodeInfo {
        &self.peer
    }

    async fn get_blob_meta(&self, key: &BlobKey) -> Result<ReadableBlobMeta> {
        self.store.get_blob_meta(key, &Caller::Internal).await
    }

    async fn get_blob(&self, key: &BlobKey) -> Result<BlobReader> {
        self.store.get_blob(key, &Caller::Internal).await
    }
}
