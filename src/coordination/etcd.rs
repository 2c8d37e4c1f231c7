//! etcd-backed coordination
//!
//! etcd has a flat keyspace, so the tree is emulated: every node is an etcd
//! key `<root><path>` and the children of `P` are the keys directly under
//! `<root>P/`. Ancestors are written as empty keys on create so that an
//! emptied directory still exists, matching a hierarchical registry.

use crate::common::{Error, Result};
use crate::coordination::{ancestors, check_path, parent_path, CoordinationService};
use async_trait::async_trait;
use etcd_client::{Client, Compare, CompareOp, DeleteOptions, GetOptions, KvClient, Txn, TxnOp};
use std::collections::BTreeSet;

pub struct EtcdCoordination {
    kv: KvClient,
    root: String,
}

impl EtcdCoordination {
    pub async fn connect(endpoints: &[String], root: &str) -> Result<Self> {
        if endpoints.is_empty() {
            return Err(Error::InvalidConfig(
                "etcd endpoints cannot be empty for etcd backend".to_string(),
            ));
        }
        let client = Client::connect(endpoints, None).await?;
        tracing::info!("Connected to etcd at {:?}", endpoints);
        Ok(Self {
            kv: client.kv_client(),
            root: root.trim_end_matches('/').to_string(),
        })
    }

    fn full_key(&self, path: &str) -> String {
        if path == "/" {
            self.root.clone()
        } else {
            format!("{}{}", self.root, path)
        }
    }

    fn descendant_prefix(&self, path: &str) -> String {
        format!("{}/", self.full_key(path))
    }

    async fn key_exists(&self, key: &str) -> Result<bool> {
        let mut kv = self.kv.clone();
        let resp = kv
            .get(key, Some(GetOptions::new().with_keys_only().with_count_only()))
            .await?;
        Ok(resp.count() > 0)
    }
}

#[async_trait]
impl CoordinationService for EtcdCoordination {
    async fn get_children(&self, path: &str) -> Result<Vec<String>> {
        check_path(path)?;
        let prefix = self.descendant_prefix(path);
        let mut kv = self.kv.clone();
        let resp = kv
            .get(prefix.as_str(), Some(GetOptions::new().with_prefix().with_keys_only()))
            .await?;

        if resp.kvs().is_empty() && path != "/" && !self.key_exists(&self.full_key(path)).await? {
            return Err(Error::NoNode(path.to_string()));
        }

        let mut children = BTreeSet::new();
        for entry in resp.kvs() {
            let key = entry
                .key_str()
                .map_err(|e| Error::Corrupted(format!("non UTF-8 etcd key: {}", e)))?;
            if let Some(child) = key[prefix.len()..].split('/').next() {
                if !child.is_empty() {
                    children.insert(child.to_string());
                }
            }
        }
        Ok(children.into_iter().collect())
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        check_path(path)?;
        if path == "/" {
            return Ok(true);
        }
        self.key_exists(&self.full_key(path)).await
    }

    async fn create_or_update(&self, path: &str, data: &[u8]) -> Result<()> {
        check_path(path)?;
        let mut kv = self.kv.clone();
        for ancestor in ancestors(path) {
            let key = self.full_key(&ancestor);
            if !self.key_exists(&key).await? {
                kv.put(key, Vec::new(), None).await?;
            }
        }
        kv.put(self.full_key(path), data.to_vec(), None).await?;
        Ok(())
    }

    async fn create(&self, path: &str, data: &[u8]) -> Result<()> {
        check_path(path)?;
        let parent = parent_path(path);
        let mut kv = self.kv.clone();
        if parent == "/" {
            kv.put(self.full_key(path), data.to_vec(), None).await?;
            return Ok(());
        }
        // Write only while the parent key is still there.
        let txn = Txn::new()
            .when([Compare::version(
                self.full_key(parent),
                CompareOp::Greater,
                0,
            )])
            .and_then([TxnOp::put(self.full_key(path), data.to_vec(), None)]);
        if !kv.txn(txn).await?.succeeded() {
            return Err(Error::NoNode(parent.to_string()));
        }
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<()> {
        check_path(path)?;
        let mut kv = self.kv.clone();
        kv.delete(
            self.descendant_prefix(path),
            Some(DeleteOptions::new().with_prefix()),
        )
        .await?;
        kv.delete(self.full_key(path), None).await?;
        Ok(())
    }
}
