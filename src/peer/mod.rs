//! Clients for pulling blobs from other nodes

pub mod http;
pub mod local;

pub use http::HttpPeerConnector;
pub use local::InProcessPeers;

use crate::blobstore::{BlobKey, BlobReader, ReadableBlobMeta};
use crate::cluster::NodeInfo;
use crate::common::Result;
use async_trait::async_trait;

/// A connection to one peer, scoped to a single download attempt.
#[async_trait]
pub trait PeerClient: Send + Sync {
    fn peer(&self) -> &NodeInfo;

    async fn get_blob_meta(&self, key: &BlobKey) -> Result<ReadableBlobMeta>;

    async fn get_blob(&self, key: &BlobKey) -> Result<BlobReader>;
}

#[async_trait]
pub trait PeerConnector: Send + Sync {
    async fn connect(&self, node: &NodeInfo) -> Result<Box<dyn PeerClient>>;
}
