//! Coordination service access
//!
//! The coordination service is an external hierarchical registry. Nodes only
//! need four primitives from it; [`ClusterState`] layers the blob version
//! protocol on top.

pub mod etcd;
pub mod memory;
pub mod state;

pub use etcd::EtcdCoordination;
pub use memory::MemoryCoordination;
pub use state::{
    holders_at_latest_sequence, key_path, latest_sequence_number, ClusterState, VersionRecord,
    BLOBSTORE_SUBTREE,
};

use crate::common::{CoordinationBackend, CoordinationConfig, Error, Result};
use async_trait::async_trait;
use std::sync::Arc;

/// Hierarchical registry with `/`-separated absolute paths.
#[async_trait]
pub trait CoordinationService: Send + Sync {
    /// Names (not paths) of the direct children of `path`.
    /// Fails with `NoNode` if `path` does not exist.
    async fn get_children(&self, path: &str) -> Result<Vec<String>>;

    async fn exists(&self, path: &str) -> Result<bool>;

    /// Create `path` (and any missing ancestors) or overwrite its data.
    async fn create_or_update(&self, path: &str, data: &[u8]) -> Result<()>;

    /// Create or overwrite `path` under an existing parent. Fails with
    /// `NoNode` if the parent is gone; the check and the write are atomic.
    async fn create(&self, path: &str, data: &[u8]) -> Result<()>;

    /// Remove `path` and everything beneath it. Absent paths are not an error.
    async fn delete(&self, path: &str) -> Result<()>;
}

/// Join a parent path and a child name.
pub fn join_path(parent: &str, child: &str) -> String {
    if parent.ends_with('/') {
        format!("{}{}", parent, child)
    } else {
        format!("{}/{}", parent, child)
    }
}

/// Proper ancestors of an absolute path, outermost first.
pub(crate) fn ancestors(path: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut end = 0;
    while let Some(pos) = path[end + 1..].find('/') {
        end += pos + 1;
        out.push(path[..end].to_string());
    }
    out
}

/// Parent of an absolute path; `/` for top-level nodes.
pub(crate) fn parent_path(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) | None => "/",
        Some(pos) => &path[..pos],
    }
}

pub(crate) fn check_path(path: &str) -> Result<()> {
    if !path.starts_with('/') || (path.len() > 1 && path.ends_with('/')) || path.contains("//") {
        return Err(Error::Internal(format!(
            "malformed coordination path '{}'",
            path
        )));
    }
    Ok(())
}

/// Build the configured coordination backend.
pub async fn connect(config: &CoordinationConfig) -> Result<Arc<dyn CoordinationService>> {
    match config.backend {
        CoordinationBackend::Memory => {
            tracing::warn!("Using in-process coordination; state is not shared between processes");
            Ok(Arc::new(MemoryCoordination::new()))
        }
        CoordinationBackend::Etcd => {
            let etcd = EtcdCoordination::connect(&config.endpoints, &config.root).await?;
            Ok(Arc::new(etcd))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_path() {
        assert_eq!(join_path("/blobstore", "topo1"), "/blobstore/topo1");
        assert_eq!(join_path("/", "blobstore"), "/blobstore");
    }

    #[test]
    fn test_ancestors() {
        assert_eq!(
            ancestors("/blobstore/topo1/host:1-2"),
            vec!["/blobstore".to_string(), "/blobstore/topo1".to_string()]
        );
        assert!(ancestors("/blobstore").is_empty());
    }

    #[test]
    fn test_parent_path() {
        assert_eq!(parent_path("/blobstore/topo1/host:1-2"), "/blobstore/topo1");
        assert_eq!(parent_path("/blobstore"), "/");
    }

    #[test]
    fn test_check_path() {
        assert!(check_path("/blobstore/k").is_ok());
        assert!(check_path("/").is_ok());
        assert!(check_path("blobstore").is_err());
        assert!(check_path("/blobstore/").is_err());
        assert!(check_path("/a//b").is_err());
    }
}
