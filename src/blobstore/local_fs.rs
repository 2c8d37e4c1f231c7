//! Blob store on the local filesystem
//!
//! Layout:
//! - Content:  `<data>/blobs/<b0>/<b1>/data_<key>`
//! - Metadata: `<data>/blobs/<b0>/<b1>/meta_<key>` (JSON)
//! - Staging:  `<data>/tmp/<uuid>.part`
//!
//! Writes go to a staging file and are published with a rename, which is
//! atomic because staging and blob directories share a filesystem. Readers
//! hold an open handle, so a reader started before a commit keeps seeing the
//! old bytes. A key exists exactly when its data file exists; metadata is
//! written before the data file on create and removed after it on delete.

use crate::blobstore::auth::{Authorizer, Caller};
use crate::blobstore::key::BlobKey;
use crate::blobstore::meta::{Access, ReadableBlobMeta, SettableBlobMeta};
use crate::blobstore::store::{translate_keys, BlobStore};
use crate::blobstore::stream::{BlobPart, BlobReader, BlobWriter};
use crate::cluster::ClusterContext;
use crate::common::{blob_bucket, system_time_millis, Error, Result};
use crate::sync::{start_sync_task, SyncHandle, Synchronizer};
use async_trait::async_trait;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, Weak};

const DATA_PREFIX: &str = "data_";
const META_PREFIX: &str = "meta_";

#[derive(Clone)]
struct Layout {
    blobs_dir: PathBuf,
    tmp_dir: PathBuf,
}

impl Layout {
    fn bucket_dir(&self, key: &BlobKey) -> PathBuf {
        let (b0, b1) = blob_bucket(key.as_str());
        self.blobs_dir.join(b0).join(b1)
    }

    fn data_path(&self, key: &BlobKey) -> PathBuf {
        self.bucket_dir(key).join(format!("{}{}", DATA_PREFIX, key))
    }

    fn meta_path(&self, key: &BlobKey) -> PathBuf {
        self.bucket_dir(key).join(format!("{}{}", META_PREFIX, key))
    }

    fn staging_path(&self) -> PathBuf {
        self.tmp_dir
            .join(format!("{}.part", uuid::Uuid::new_v4().simple()))
    }
}

/// Filesystem-backed store for a single node.
///
/// On its own it replicates nothing. Opened with a [`ClusterContext`] it
/// reports replication from the coordination service and `start_sync`
/// launches the periodic reconciliation against the other nodes.
pub struct LocalFsBlobStore {
    layout: Layout,
    authorizer: Arc<dyn Authorizer>,
    commit_lock: Arc<Mutex<()>>,
    cluster: Option<ClusterContext>,
    sync: tokio::sync::Mutex<Option<SyncHandle>>,
    this: Weak<LocalFsBlobStore>,
}

impl LocalFsBlobStore {
    /// Open (creating if needed) a standalone store under `data_dir`.
    pub fn open(data_dir: impl AsRef<Path>, authorizer: Arc<dyn Authorizer>) -> Result<Arc<Self>> {
        Self::open_inner(data_dir.as_ref(), authorizer, None)
    }

    /// Open a store that takes part in cluster reconciliation.
    pub fn open_clustered(
        data_dir: impl AsRef<Path>,
        authorizer: Arc<dyn Authorizer>,
        cluster: ClusterContext,
    ) -> Result<Arc<Self>> {
        Self::open_inner(data_dir.as_ref(), authorizer, Some(cluster))
    }

    fn open_inner(
        data_dir: &Path,
        authorizer: Arc<dyn Authorizer>,
        cluster: Option<ClusterContext>,
    ) -> Result<Arc<Self>> {
        let layout = Layout {
            blobs_dir: data_dir.join("blobs"),
            tmp_dir: data_dir.join("tmp"),
        };
        fs::create_dir_all(&layout.blobs_dir)?;
        fs::create_dir_all(&layout.tmp_dir)?;

        // Staging files left by a crash were never committed.
        let mut stale = 0;
        for entry in fs::read_dir(&layout.tmp_dir)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                fs::remove_file(entry.path())?;
                stale += 1;
            }
        }
        if stale > 0 {
            tracing::info!("Removed {} abandoned staging files", stale);
        }
        tracing::info!("Local blob store opened at {:?}", data_dir);

        Ok(Arc::new_cyclic(|this| Self {
            layout,
            authorizer,
            commit_lock: Arc::new(Mutex::new(())),
            cluster,
            sync: tokio::sync::Mutex::new(None),
            this: this.clone(),
        }))
    }

    fn read_meta(&self, key: &BlobKey) -> Result<SettableBlobMeta> {
        if !self.layout.data_path(key).exists() {
            return Err(Error::KeyNotFound(key.to_string()));
        }
        match fs::read(self.layout.meta_path(key)) {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                if self.layout.data_path(key).exists() {
                    Err(Error::Corrupted(format!("metadata for {} is missing", key)))
                } else {
                    Err(Error::KeyNotFound(key.to_string()))
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    fn checked_meta(&self, key: &BlobKey, caller: &Caller, access: Access) -> Result<SettableBlobMeta> {
        let meta = self.read_meta(key)?;
        self.authorizer.check(caller, key, &meta.acl, access)?;
        Ok(meta)
    }

    fn open_part(&self, key: &BlobKey, kind: PartKind) -> Result<BlobWriter> {
        let staging = self.layout.staging_path();
        let file = File::create(&staging)?;
        let part = FsPart {
            key: key.clone(),
            kind,
            file: BufWriter::new(file),
            staging,
            layout: self.layout.clone(),
            commit_lock: self.commit_lock.clone(),
        };
        Ok(BlobWriter::new(key.clone(), Box::new(part)))
    }

    fn lock_commits(&self) -> std::sync::MutexGuard<'_, ()> {
        self.commit_lock.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Write `bytes` to `path` through a sibling temp file and a rename.
fn write_atomic(path: &Path, bytes: &[u8], tmp_dir: &Path) -> Result<()> {
    let tmp = tmp_dir.join(format!("{}.meta", uuid::Uuid::new_v4().simple()));
    let result = (|| -> Result<()> {
        let mut file = File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_data()?;
        fs::rename(&tmp, path)?;
        Ok(())
    })();
    if result.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    result
}

enum PartKind {
    Create(SettableBlobMeta),
    Update,
}

struct FsPart {
    key: BlobKey,
    kind: PartKind,
    file: BufWriter<File>,
    staging: PathBuf,
    layout: Layout,
    commit_lock: Arc<Mutex<()>>,
}

impl FsPart {
    fn publish(&mut self) -> Result<()> {
        self.file.flush()?;
        self.file.get_ref().sync_data()?;

        let data_path = self.layout.data_path(&self.key);
        let _guard = self.commit_lock.lock().unwrap_or_else(|e| e.into_inner());
        match &self.kind {
            PartKind::Create(meta) => {
                if data_path.exists() {
                    return Err(Error::KeyAlreadyExists(self.key.to_string()));
                }
                fs::create_dir_all(self.layout.bucket_dir(&self.key))?;
                write_atomic(
                    &self.layout.meta_path(&self.key),
                    &serde_json::to_vec(meta)?,
                    &self.layout.tmp_dir,
                )?;
            }
            PartKind::Update => {
                if !data_path.exists() {
                    return Err(Error::KeyNotFound(self.key.to_string()));
                }
            }
        }
        fs::rename(&self.staging, &data_path)?;
        Ok(())
    }
}

impl Write for FsPart {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.file.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

impl BlobPart for FsPart {
    fn commit(mut self: Box<Self>) -> Result<()> {
        let result = self.publish();
        if result.is_err() {
            let _ = fs::remove_file(&self.staging);
        }
        result
    }

    fn cancel(self: Box<Self>) -> Result<()> {
        let FsPart { file, staging, .. } = *self;
        drop(file);
        match fs::remove_file(&staging) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl BlobStore for LocalFsBlobStore {
    async fn create_blob(
        &self,
        key: &BlobKey,
        meta: SettableBlobMeta,
        caller: &Caller,
    ) -> Result<BlobWriter> {
        let meta = self.authorizer.normalize_for_create(caller, key, meta)?;
        if self.layout.data_path(key).exists() {
            return Err(Error::KeyAlreadyExists(key.to_string()));
        }
        self.open_part(key, PartKind::Create(meta))
    }

    async fn update_blob(&self, key: &BlobKey, caller: &Caller) -> Result<BlobWriter> {
        self.checked_meta(key, caller, Access::WRITE)?;
        self.open_part(key, PartKind::Update)
    }

    async fn get_blob_meta(&self, key: &BlobKey, caller: &Caller) -> Result<ReadableBlobMeta> {
        let settable = self.checked_meta(key, caller, Access::READ)?;
        let modified = match fs::metadata(self.layout.data_path(key)) {
            Ok(m) => m.modified()?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(Error::KeyNotFound(key.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        Ok(ReadableBlobMeta {
            settable,
            version: system_time_millis(modified),
        })
    }

    async fn set_blob_meta(
        &self,
        key: &BlobKey,
        meta: SettableBlobMeta,
        caller: &Caller,
    ) -> Result<()> {
        let current = self.checked_meta(key, caller, Access::ADMIN)?;
        let mut meta = meta;
        if meta.replication_factor.is_none() {
            meta.replication_factor = current.replication_factor;
        }
        let _guard = self.lock_commits();
        if !self.layout.data_path(key).exists() {
            return Err(Error::KeyNotFound(key.to_string()));
        }
        write_atomic(
            &self.layout.meta_path(key),
            &serde_json::to_vec(&meta)?,
            &self.layout.tmp_dir,
        )
    }

    async fn delete_blob(&self, key: &BlobKey, caller: &Caller) -> Result<()> {
        self.checked_meta(key, caller, Access::WRITE)?;
        let _guard = self.lock_commits();
        match fs::remove_file(self.layout.data_path(key)) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(Error::KeyNotFound(key.to_string()))
            }
            Err(e) => return Err(e.into()),
        }
        match fs::remove_file(self.layout.meta_path(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn get_blob(&self, key: &BlobKey, caller: &Caller) -> Result<BlobReader> {
        self.checked_meta(key, caller, Access::READ)?;
        let file = match File::open(self.layout.data_path(key)) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(Error::KeyNotFound(key.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        let stat = file.metadata()?;
        let version = system_time_millis(stat.modified()?);
        Ok(BlobReader::new(
            Box::new(io::BufReader::new(file)),
            stat.len(),
            version,
        ))
    }

    async fn list_keys(&self) -> Result<Vec<BlobKey>> {
        let mut names = Vec::new();
        for outer in fs::read_dir(&self.layout.blobs_dir)? {
            let outer = outer?;
            if !outer.file_type()?.is_dir() {
                continue;
            }
            for inner in fs::read_dir(outer.path())? {
                let inner = inner?;
                if !inner.file_type()?.is_dir() {
                    continue;
                }
                for entry in fs::read_dir(inner.path())? {
                    if let Some(name) = entry?.file_name().to_str() {
                        names.push(name.to_string());
                    }
                }
            }
        }
        Ok(translate_keys(names, DATA_PREFIX)
            .filter_map(|name| BlobKey::new(name).ok())
            .collect())
    }

    async fn get_blob_replication(&self, key: &BlobKey, caller: &Caller) -> Result<u32> {
        self.checked_meta(key, caller, Access::READ)?;
        match &self.cluster {
            Some(cluster) => {
                let holders = cluster.state.nodes_with_latest_sequence(key).await?;
                Ok(holders.len() as u32)
            }
            None => Ok(1),
        }
    }

    async fn update_blob_replication(
        &self,
        _key: &BlobKey,
        _replication: u32,
        _caller: &Caller,
    ) -> Result<u32> {
        Err(Error::Unsupported(
            "replication of a local filesystem store follows the number of nodes holding the blob"
                .to_string(),
        ))
    }

    async fn start_sync(&self) -> Result<()> {
        let Some(cluster) = &self.cluster else {
            tracing::debug!("Standalone store, nothing to synchronize");
            return Ok(());
        };
        let mut running = self.sync.lock().await;
        if running.is_some() {
            return Ok(());
        }
        let store: Arc<dyn BlobStore> = self
            .this
            .upgrade()
            .ok_or_else(|| Error::Internal("blob store is shutting down".to_string()))?;
        let synchronizer = Synchronizer::new(
            store,
            cluster.state.clone(),
            cluster.peers.clone(),
            cluster.node.clone(),
        );
        *running = Some(start_sync_task(
            Arc::new(synchronizer),
            cluster.leader.clone(),
            cluster.interval,
        ));
        Ok(())
    }

    async fn shutdown(&self) {
        if let Some(handle) = self.sync.lock().await.take() {
            handle.stop().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blobstore::auth::AllowAll;
    use std::io::Read;
    use tempfile::TempDir;

    fn open() -> (TempDir, Arc<LocalFsBlobStore>) {
        let dir = TempDir::new().unwrap();
        let store = LocalFsBlobStore::open(dir.path(), Arc::new(AllowAll)).unwrap();
        (dir, store)
    }

    fn key(k: &str) -> BlobKey {
        BlobKey::new(k).unwrap()
    }

    fn staging_files(dir: &TempDir) -> usize {
        fs::read_dir(dir.path().join("tmp")).unwrap().count()
    }

    #[tokio::test]
    async fn test_create_and_read() {
        let (_dir, store) = open();
        let k = key("topo-1-stormjar.jar");
        store
            .create_blob_from_bytes(&k, b"jar bytes", SettableBlobMeta::default(), &Caller::Internal)
            .await
            .unwrap();

        assert_eq!(store.read_blob(&k, &Caller::Internal).await.unwrap(), b"jar bytes");
        let meta = store.get_blob_meta(&k, &Caller::Internal).await.unwrap();
        assert_eq!(meta.settable, SettableBlobMeta::world_everything());
        assert!(meta.version > 0);
        assert_eq!(store.list_keys().await.unwrap(), vec![k]);
    }

    #[tokio::test]
    async fn test_uncommitted_write_is_invisible() {
        let (dir, store) = open();
        let k = key("pending");
        let mut writer = store
            .create_blob(&k, SettableBlobMeta::default(), &Caller::Internal)
            .await
            .unwrap();
        writer.write_all(b"half").unwrap();

        assert!(!store.blob_exists(&k, &Caller::Internal).await.unwrap());
        assert!(store.list_keys().await.unwrap().is_empty());

        drop(writer);
        assert_eq!(staging_files(&dir), 0);
        assert!(!store.blob_exists(&k, &Caller::Internal).await.unwrap());
    }

    #[tokio::test]
    async fn test_cancelled_update_keeps_old_bytes() {
        let (dir, store) = open();
        let k = key("conf");
        store
            .create_blob_from_bytes(&k, b"original", SettableBlobMeta::default(), &Caller::Internal)
            .await
            .unwrap();

        let mut writer = store.update_blob(&k, &Caller::Internal).await.unwrap();
        writer.write_all(b"replacement that never lands").unwrap();
        writer.cancel().unwrap();

        assert_eq!(store.read_blob(&k, &Caller::Internal).await.unwrap(), b"original");
        assert_eq!(staging_files(&dir), 0);
    }

    #[tokio::test]
    async fn test_reader_survives_update() {
        let (_dir, store) = open();
        let k = key("snap");
        store
            .create_blob_from_bytes(&k, b"before", SettableBlobMeta::default(), &Caller::Internal)
            .await
            .unwrap();
        let mut reader = store.get_blob(&k, &Caller::Internal).await.unwrap();
        store
            .update_blob_from_bytes(&k, b"after!!", &Caller::Internal)
            .await
            .unwrap();

        let mut old = Vec::new();
        reader.read_to_end(&mut old).unwrap();
        assert_eq!(old, b"before");
        assert_eq!(store.read_blob(&k, &Caller::Internal).await.unwrap(), b"after!!");
    }

    #[tokio::test]
    async fn test_second_create_loses_at_commit() {
        let (_dir, store) = open();
        let k = key("race");
        let mut first = store
            .create_blob(&k, SettableBlobMeta::default(), &Caller::Internal)
            .await
            .unwrap();
        let mut second = store
            .create_blob(&k, SettableBlobMeta::default(), &Caller::Internal)
            .await
            .unwrap();
        first.write_all(b"first").unwrap();
        second.write_all(b"second").unwrap();
        first.commit().unwrap();
        assert!(matches!(second.commit(), Err(Error::KeyAlreadyExists(_))));
        assert_eq!(store.read_blob(&k, &Caller::Internal).await.unwrap(), b"first");
    }

    #[tokio::test]
    async fn test_delete_and_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let store = LocalFsBlobStore::open(dir.path(), Arc::new(AllowAll)).unwrap();
            for k in ["keep", "drop"] {
                store
                    .create_blob_from_bytes(&key(k), k.as_bytes(), SettableBlobMeta::default(), &Caller::Internal)
                    .await
                    .unwrap();
            }
            store.delete_blob(&key("drop"), &Caller::Internal).await.unwrap();
            assert!(matches!(
                store.delete_blob(&key("drop"), &Caller::Internal).await,
                Err(Error::KeyNotFound(_))
            ));
        }

        let store = LocalFsBlobStore::open(dir.path(), Arc::new(AllowAll)).unwrap();
        assert_eq!(store.list_keys().await.unwrap(), vec![key("keep")]);
        assert_eq!(store.read_blob(&key("keep"), &Caller::Internal).await.unwrap(), b"keep");
    }

    #[tokio::test]
    async fn test_set_meta_keeps_replication() {
        let (_dir, store) = open();
        let k = key("meta");
        store
            .create_blob_from_bytes(
                &k,
                b"x",
                SettableBlobMeta::world_everything().with_replication(2),
                &Caller::Internal,
            )
            .await
            .unwrap();
        let acl = crate::blobstore::meta::AccessControl::parse_list("o::r--").unwrap();
        store
            .set_blob_meta(&k, SettableBlobMeta::new(acl.clone()), &Caller::Internal)
            .await
            .unwrap();

        let meta = store.get_blob_meta(&k, &Caller::Internal).await.unwrap();
        assert_eq!(meta.settable.acl, acl);
        assert_eq!(meta.settable.replication_factor, Some(2));
    }

    #[tokio::test]
    async fn test_standalone_replication() {
        let (_dir, store) = open();
        let k = key("rep");
        store
            .create_blob_from_bytes(&k, b"x", SettableBlobMeta::default(), &Caller::Internal)
            .await
            .unwrap();
        assert_eq!(store.get_blob_replication(&k, &Caller::Internal).await.unwrap(), 1);
        assert!(matches!(
            store.update_blob_replication(&k, 3, &Caller::Internal).await,
            Err(Error::Unsupported(_))
        ));
        store.start_sync().await.unwrap();
        store.shutdown().await;
    }

    #[tokio::test]
    async fn test_abandoned_staging_cleaned_on_open() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("tmp")).unwrap();
        fs::write(dir.path().join("tmp").join("crashed.part"), b"junk").unwrap();
        let _store = LocalFsBlobStore::open(dir.path(), Arc::new(AllowAll)).unwrap();
        assert_eq!(staging_files(&dir), 0);
    }
}
