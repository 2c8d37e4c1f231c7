//! Peer downloads over the node HTTP API

use crate::blobstore::{BlobKey, BlobReader, ReadableBlobMeta};
use crate::cluster::NodeInfo;
use crate::common::{Error, Result};
use crate::node::http::{PEER_HEADER, VERSION_HEADER};
use crate::peer::{PeerClient, PeerConnector};
use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use std::time::Duration;

pub struct HttpPeerConnector {
    client: Client,
    this: NodeInfo,
}

impl HttpPeerConnector {
    /// `this` is sent along with every request so the peer can tell
    /// replication traffic from clients.
    pub fn new(this: NodeInfo, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .map_err(|e| Error::Internal(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { client, this })
    }
}

#[async_trait]
impl PeerConnector for HttpPeerConnector {
    async fn connect(&self, node: &NodeInfo) -> Result<Box<dyn PeerClient>> {
        Ok(Box::new(HttpPeerClient {
            client: self.client.clone(),
            peer: node.clone(),
            this: self.this.to_string(),
        }))
    }
}

pub struct HttpPeerClient {
    client: Client,
    peer: NodeInfo,
    this: String,
}

impl HttpPeerClient {
    fn transport(&self, reason: impl std::fmt::Display) -> Error {
        Error::Transport {
            peer: self.peer.to_string(),
            reason: reason.to_string(),
        }
    }

    async fn fetch(&self, key: &BlobKey, suffix: &str) -> Result<Response> {
        let url = format!("{}/blobs/{}{}", self.peer.base_url(), key, suffix);
        let resp = self
            .client
            .get(&url)
            .header(PEER_HEADER, &self.this)
            .send()
            .await
            .map_err(|e| self.transport(e))?;

        match resp.status() {
            s if s.is_success() => Ok(resp),
            StatusCode::NOT_FOUND => Err(Error::KeyNotFound(key.to_string())),
            StatusCode::FORBIDDEN => Err(Error::Unauthorized {
                caller: self.this.clone(),
                key: key.to_string(),
                access: "read".to_string(),
            }),
            s => {
                let body = resp.text().await.unwrap_or_default();
                Err(self.transport(format!("{} {}", s, body.trim())))
            }
        }
    }
}

#[async_trait]
impl PeerClient for HttpPeerClient {
    fn peer(&self) -> &NodeInfo {
        &self.peer
    }

    async fn get_blob_meta(&self, key: &BlobKey) -> Result<ReadableBlobMeta> {
        self.fetch(key, "/meta")
            .await?
            .json::<ReadableBlobMeta>()
            .await
            .map_err(|e| self.transport(e))
    }

    async fn get_blob(&self, key: &BlobKey) -> Result<BlobReader> {
        let resp = self.fetch(key, "").await?;
        let version = resp
            .headers()
            .get(VERSION_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(0);
        let expected = resp.content_length();
        let body = resp.bytes().await.map_err(|e| self.transport(e))?;
        if let Some(expected) = expected {
            if expected != body.len() as u64 {
                return Err(self.transport(format!(
                    "short body: expected {} bytes, got {}",
                    expected,
                    body.len()
                )));
            }
        }
        Ok(BlobReader::from_bytes(body.to_vec(), version))
    }
}
