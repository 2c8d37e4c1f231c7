//! In-process coordination registry

use crate::common::{Error, Result};
use crate::coordination::{ancestors, check_path, parent_path, CoordinationService};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

/// Coordination tree held in a single process.
///
/// Shared between every node of an in-process cluster. `set_available(false)`
/// makes every call fail with `CoordinationUnavailable`, like a lost session.
pub struct MemoryCoordination {
    nodes: RwLock<BTreeMap<String, Vec<u8>>>,
    available: AtomicBool,
}

impl Default for MemoryCoordination {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryCoordination {
    pub fn new() -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert("/".to_string(), Vec::new());
        Self {
            nodes: RwLock::new(nodes),
            available: AtomicBool::new(true),
        }
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Data stored at `path`, if it exists.
    pub fn get_data(&self, path: &str) -> Option<Vec<u8>> {
        self.nodes
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(path)
            .cloned()
    }

    fn ensure_available(&self) -> Result<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(Error::CoordinationUnavailable(
                "in-process registry switched off".to_string(),
            ))
        }
    }
}

fn descendant_prefix(path: &str) -> String {
    if path == "/" {
        "/".to_string()
    } else {
        format!("{}/", path)
    }
}

#[async_trait]
impl CoordinationService for MemoryCoordination {
    async fn get_children(&self, path: &str) -> Result<Vec<String>> {
        self.ensure_available()?;
        check_path(path)?;
        let nodes = self.nodes.read().unwrap_or_else(|e| e.into_inner());
        if !nodes.contains_key(path) {
            return Err(Error::NoNode(path.to_string()));
        }
        let prefix = descendant_prefix(path);
        let children = nodes
            .range(prefix.clone()..)
            .take_while(|(k, _)| k.starts_with(&prefix))
            .filter_map(|(k, _)| {
                let rest = &k[prefix.len()..];
                (!rest.is_empty() && !rest.contains('/')).then(|| rest.to_string())
            })
            .collect();
        Ok(children)
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        self.ensure_available()?;
        check_path(path)?;
        Ok(self
            .nodes
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(path))
    }

    async fn create_or_update(&self, path: &str, data: &[u8]) -> Result<()> {
        self.ensure_available()?;
        check_path(path)?;
        let mut nodes = self.nodes.write().unwrap_or_else(|e| e.into_inner());
        for ancestor in ancestors(path) {
            nodes.entry(ancestor).or_default();
        }
        nodes.insert(path.to_string(), data.to_vec());
        Ok(())
    }

    async fn create(&self, path: &str, data: &[u8]) -> Result<()> {
        self.ensure_available()?;
        check_path(path)?;
        let mut nodes = self.nodes.write().unwrap_or_else(|e| e.into_inner());
        let parent = parent_path(path);
        if !nodes.contains_key(parent) {
            return Err(Error::NoNode(parent.to_string()));
        }
        nodes.insert(path.to_string(), data.to_vec());
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<()> {
        self.ensure_available()?;
        check_path(path)?;
        let mut nodes = self.nodes.write().unwrap_or_else(|e| e.into_inner());
        let prefix = descendant_prefix(path);
        nodes.retain(|k, _| k != path && !k.starts_with(&prefix));
        if path == "/" {
            nodes.insert("/".to_string(), Vec::new());
        }
        Ok(())
    }
}
