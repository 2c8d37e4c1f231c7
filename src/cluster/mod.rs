//! Node identity, leadership and the context a clustered store runs in

use crate::common::{Error, Result};
use crate::coordination::ClusterState;
use crate::peer::PeerConnector;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

/// A node's advertised `host:port`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeInfo {
    pub host: String,
    pub port: u16,
}

impl NodeInfo {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Base URL of the node's HTTP API.
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

impl FromStr for NodeInfo {
    type Err = Error;

    /// Splits at the last `:` so bracket-less IPv6 hosts keep their colons.
    fn from_str(s: &str) -> Result<Self> {
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| Error::Other(format!("'{}' is not a host:port pair", s)))?;
        if host.is_empty() {
            return Err(Error::Other(format!("'{}' has an empty host", s)));
        }
        let port = port
            .parse::<u16>()
            .map_err(|e| Error::Other(format!("bad port in '{}': {}", s, e)))?;
        Ok(Self::new(host, port))
    }
}

impl fmt::Display for NodeInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Answers "am I the leader, and who is".
///
/// Election happens elsewhere; the store only needs to know whether it is
/// the write side (and so skips reconciliation) or a follower.
pub trait LeaderElector: Send + Sync {
    fn is_leader(&self) -> bool;

    fn leader(&self) -> Option<NodeInfo>;
}

/// Leadership fixed by configuration, switchable at runtime.
pub struct StaticLeader {
    this: NodeInfo,
    is_leader: AtomicBool,
    leader: RwLock<Option<NodeInfo>>,
}

impl StaticLeader {
    pub fn new(this: NodeInfo, is_leader: bool, leader: Option<NodeInfo>) -> Self {
        Self {
            this,
            is_leader: AtomicBool::new(is_leader),
            leader: RwLock::new(leader),
        }
    }

    /// Hand leadership to `leader`; `None` means nobody is known to lead.
    pub fn set_leader(&self, leader: Option<NodeInfo>) {
        let is_me = leader.as_ref() == Some(&self.this);
        self.is_leader.store(is_me, Ordering::SeqCst);
        *self.leader.write().unwrap_or_else(|e| e.into_inner()) = leader;
    }
}

impl LeaderElector for StaticLeader {
    fn is_leader(&self) -> bool {
        self.is_leader.load(Ordering::SeqCst)
    }

    fn leader(&self) -> Option<NodeInfo> {
        if self.is_leader() {
            return Some(self.this.clone());
        }
        self.leader
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

/// Everything a store needs to take part in cluster reconciliation.
#[derive(Clone)]
pub struct ClusterContext {
    pub node: NodeInfo,
    pub state: ClusterState,
    pub leader: Arc<dyn LeaderElector>,
    pub peers: Arc<dyn PeerConnector>,
    /// Time between reconciliation passes
    pub interval: Duration,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_info_parse_and_display() {
        let node: NodeInfo = "nimbus-1.example.com:6627".parse().unwrap();
        assert_eq!(node.host, "nimbus-1.example.com");
        assert_eq!(node.port, 6627);
        assert_eq!(node.to_string(), "nimbus-1.example.com:6627");
        assert_eq!(node.base_url(), "http://nimbus-1.example.com:6627");

        assert!("no-port".parse::<NodeInfo>().is_err());
        assert!(":6627".parse::<NodeInfo>().is_err());
        assert!("host:notaport".parse::<NodeInfo>().is_err());
    }

    #[test]
    fn test_static_leader_handover() {
        let me = NodeInfo::new("a", 1);
        let other = NodeInfo::new("b", 2);
        let elector = StaticLeader::new(me.clone(), true, None);
        assert!(elector.is_leader());
        assert_eq!(elector.leader(), Some(me.clone()));

        elector.set_leader(Some(other.clone()));
        assert!(!elector.is_leader());
        assert_eq!(elector.leader(), Some(other));

        elector.set_leader(Some(me));
        assert!(elector.is_leader());
    }
}
