//! Per-key version records kept in the coordination service
//!
//! For blob `K` the registry holds `/blobstore/K`, with one child per node
//! that has confirmed it holds the content, named `<host:port>-<sequence>`.
//! The largest sequence among the children is the key's latest version and
//! every node recorded at that sequence is an equally good source for it.

use crate::blobstore::BlobKey;
use crate::cluster::NodeInfo;
use crate::common::{Error, Result};
use crate::coordination::{join_path, CoordinationService};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

pub const BLOBSTORE_SUBTREE: &str = "/blobstore";

pub fn key_path(key: &BlobKey) -> String {
    join_path(BLOBSTORE_SUBTREE, key.as_str())
}

/// `(owner, sequence)` as encoded in a child node name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VersionRecord {
    pub owner: NodeInfo,
    pub sequence: u64,
}

impl VersionRecord {
    pub fn new(owner: NodeInfo, sequence: u64) -> Self {
        Self { owner, sequence }
    }
}

impl FromStr for VersionRecord {
    type Err = Error;

    /// Split at the last `-`: host names may contain dashes, sequences never do.
    fn from_str(s: &str) -> Result<Self> {
        let (owner, sequence) = s
            .rsplit_once('-')
            .ok_or_else(|| Error::Corrupted(format!("version record '{}' has no sequence", s)))?;
        let sequence = sequence
            .parse::<u64>()
            .map_err(|e| Error::Corrupted(format!("version record '{}': {}", s, e)))?;
        let owner = owner
            .parse::<NodeInfo>()
            .map_err(|e| Error::Corrupted(format!("version record '{}': {}", s, e)))?;
        Ok(Self { owner, sequence })
    }
}

impl fmt::Display for VersionRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.owner, self.sequence)
    }
}

fn parse_records(children: &[String]) -> Vec<VersionRecord> {
    children
        .iter()
        .filter_map(|child| match child.parse::<VersionRecord>() {
            Ok(record) => Some(record),
            Err(e) => {
                tracing::warn!("Ignoring unparseable version record: {}", e);
                None
            }
        })
        .collect()
}

/// Highest sequence among `children`; `0` when nobody holds the key yet.
pub fn latest_sequence_number(children: &[String]) -> u64 {
    parse_records(children)
        .iter()
        .map(|r| r.sequence)
        .max()
        .unwrap_or(0)
}

/// Owners of every record at the latest sequence.
pub fn holders_at_latest_sequence(children: &[String]) -> HashSet<NodeInfo> {
    let records = parse_records(children);
    let latest = records.iter().map(|r| r.sequence).max().unwrap_or(0);
    records
        .into_iter()
        .filter(|r| r.sequence == latest)
        .map(|r| r.owner)
        .collect()
}

/// The blob version protocol on top of a coordination service.
#[derive(Clone)]
pub struct ClusterState {
    coord: Arc<dyn CoordinationService>,
}

impl ClusterState {
    pub fn new(coord: Arc<dyn CoordinationService>) -> Self {
        Self { coord }
    }

    pub fn coordination(&self) -> &Arc<dyn CoordinationService> {
        &self.coord
    }

    /// Every key registered under `/blobstore`. A missing subtree is an
    /// empty cluster, not an error.
    pub async fn list_keys(&self) -> Result<Vec<BlobKey>> {
        let children = match self.coord.get_children(BLOBSTORE_SUBTREE).await {
            Ok(children) => children,
            Err(Error::NoNode(_)) => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        Ok(children
            .into_iter()
            .filter_map(|name| match BlobKey::new(name) {
                Ok(key) => Some(key),
                Err(e) => {
                    tracing::warn!("Skipping registry entry: {}", e);
                    None
                }
            })
            .collect())
    }

    /// Raw child names under the key. `KeyNotFound` if the key is not
    /// registered, which usually means it was deleted concurrently.
    pub async fn version_children(&self, key: &BlobKey) -> Result<Vec<String>> {
        match self.coord.get_children(&key_path(key)).await {
            Err(Error::NoNode(_)) => Err(Error::KeyNotFound(key.to_string())),
            other => other,
        }
    }

    pub async fn version_records(&self, key: &BlobKey) -> Result<Vec<VersionRecord>> {
        Ok(parse_records(&self.version_children(key).await?))
    }

    pub async fn latest_sequence(&self, key: &BlobKey) -> Result<u64> {
        Ok(latest_sequence_number(&self.version_children(key).await?))
    }

    pub async fn nodes_with_latest_sequence(&self, key: &BlobKey) -> Result<HashSet<NodeInfo>> {
        let children = self.version_children(key).await?;
        tracing::debug!("Version records for {}: {:?}", key, children);
        Ok(holders_at_latest_sequence(&children))
    }

    /// Record that `node` holds `key` at `sequence`, dropping the node's
    /// older records for the key.
    ///
    /// The key must already be registered: a key deleted while a follower
    /// was downloading it fails with `KeyNotFound` and stays deleted.
    pub async fn publish(&self, key: &BlobKey, node: &NodeInfo, sequence: u64) -> Result<()> {
        let parent = key_path(key);
        let record = VersionRecord::new(node.clone(), sequence);
        let stale: Vec<VersionRecord> = parse_records(&self.version_children(key).await?)
            .into_iter()
            .filter(|r| &r.owner == node && r.sequence != sequence)
            .collect();

        match self
            .coord
            .create(&join_path(&parent, &record.to_string()), &[])
            .await
        {
            Err(Error::NoNode(_)) => return Err(Error::KeyNotFound(key.to_string())),
            other => other?,
        }
        for old in stale {
            self.coord
                .delete(&join_path(&parent, &old.to_string()))
                .await?;
        }
        tracing::debug!("Published {} for {}", record, key);
        Ok(())
    }

    /// Register `key` if needed and publish `node` as holding `sequence`.
    /// Only writers register keys.
    pub async fn register(&self, key: &BlobKey, node: &NodeInfo, sequence: u64) -> Result<()> {
        let parent = key_path(key);
        if !self.coord.exists(&parent).await? {
            self.coord.create_or_update(&parent, &[]).await?;
        }
        self.publish(key, node, sequence).await
    }

    /// Allocate the next version of `key` for a writer and publish it.
    /// A key nobody has registered starts at sequence 1.
    pub async fn publish_new_version(&self, key: &BlobKey, node: &NodeInfo) -> Result<u64> {
        let latest = match self.latest_sequence(key).await {
            Ok(latest) => latest,
            Err(Error::KeyNotFound(_)) => 0,
            Err(e) => return Err(e),
        };
        let sequence = latest + 1;
        self.register(key, node, sequence).await?;
        Ok(sequence)
    }

    /// Drop the key and all of its version records.
    pub async fn remove_key(&self, key: &BlobKey) -> Result<()> {
        self.coord.delete(&key_path(key)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordination::MemoryCoordination;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_record_round_trip_with_dashed_hosts() {
        for (host, port, seq) in [
            ("nimbus-1", 6627u16, 1u64),
            ("a-b-c.example-dc.com", 1, 42),
            ("localhost", 65535, 0),
            ("10.0.0.1", 80, u64::MAX),
        ] {
            let record = VersionRecord::new(NodeInfo::new(host, port), seq);
            let encoded = record.to_string();
            let decoded: VersionRecord = encoded.parse().unwrap();
            assert_eq!(decoded, record, "round trip of {}", encoded);
        }
    }

    #[test]
    fn test_record_parse_errors() {
        assert!("nimbus:6627".parse::<VersionRecord>().is_err());
        assert!("nimbus:6627-x".parse::<VersionRecord>().is_err());
        assert!("nimbus-5".parse::<VersionRecord>().is_err());
    }

    #[test]
    fn test_latest_and_holders() {
        let children = names(&["a-1:1-3", "b:2-5", "c:3-5", "garbage"]);
        assert_eq!(latest_sequence_number(&children), 5);
        let holders = holders_at_latest_sequence(&children);
        assert_eq!(holders.len(), 2);
        assert!(holders.contains(&NodeInfo::new("b", 2)));
        assert!(holders.contains(&NodeInfo::new("c", 3)));
        assert!(!holders.contains(&NodeInfo::new("a-1", 1)));
    }

    #[test]
    fn test_empty_children() {
        assert_eq!(latest_sequence_number(&[]), 0);
        assert!(holders_at_latest_sequence(&[]).is_empty());
    }

    #[tokio::test]
    async fn test_cluster_state_publish() {
        let state = ClusterState::new(Arc::new(MemoryCoordination::new()));
        let key = BlobKey::new("topo1").unwrap();
        let leader = NodeInfo::new("leader", 6627);
        let follower = NodeInfo::new("follower", 6627);

        assert!(state.list_keys().await.unwrap().is_empty());
        assert!(matches!(
            state.version_records(&key).await,
            Err(Error::KeyNotFound(_))
        ));

        assert_eq!(state.publish_new_version(&key, &leader).await.unwrap(), 1);
        state.publish(&key, &follower, 1).await.unwrap();
        assert_eq!(state.publish_new_version(&key, &leader).await.unwrap(), 2);

        let records = state.version_records(&key).await.unwrap();
        assert_eq!(records.len(), 2, "leader's old record is replaced");
        let holders = state.nodes_with_latest_sequence(&key).await.unwrap();
        assert_eq!(holders, HashSet::from([leader]));
        assert_eq!(state.list_keys().await.unwrap(), vec![key.clone()]);

        state.remove_key(&key).await.unwrap();
        assert!(state.list_keys().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_publish_does_not_register_keys() {
        let coord = Arc::new(MemoryCoordination::new());
        let state = ClusterState::new(coord.clone());
        let key = BlobKey::new("topo1").unwrap();
        let follower = NodeInfo::new("follower", 6627);

        assert!(matches!(
            state.publish(&key, &follower, 1).await,
            Err(Error::KeyNotFound(_))
        ));
        assert!(state.list_keys().await.unwrap().is_empty());
        assert!(!coord.exists(BLOBSTORE_SUBTREE).await.unwrap());

        state.register(&key, &follower, 4).await.unwrap();
        assert_eq!(state.latest_sequence(&key).await.unwrap(), 4);
    }
}
