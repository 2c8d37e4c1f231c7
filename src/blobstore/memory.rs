//! In-memory blob store
//!
//! Content lives in a shared map; a write stages bytes in its own buffer and
//! swaps them in under the map lock on commit. The replication factor is
//! stored with the metadata and handed back as-is, the way a store sitting on
//! self-replicating storage reports whatever it was asked for.

use crate::blobstore::auth::{Authorizer, Caller};
use crate::blobstore::key::BlobKey;
use crate::blobstore::meta::{Access, ReadableBlobMeta, SettableBlobMeta};
use crate::blobstore::store::BlobStore;
use crate::blobstore::stream::{BlobPart, BlobReader, BlobWriter};
use crate::common::{timestamp_now_millis, Error, Result};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::io::{self, Write};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

const DEFAULT_REPLICATION: u32 = 1;

#[derive(Debug, Clone)]
struct Entry {
    data: Arc<Vec<u8>>,
    meta: SettableBlobMeta,
    version: i64,
}

#[derive(Default)]
struct Shared {
    entries: Mutex<BTreeMap<BlobKey, Entry>>,
    clock: AtomicI64,
}

impl Shared {
    fn entries(&self) -> MutexGuard<'_, BTreeMap<BlobKey, Entry>> {
        // A poisoned map only means another writer panicked mid-commit;
        // commits are single inserts so the map itself is consistent.
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Strictly increasing version marker, seeded from wall-clock millis.
    fn next_version(&self) -> i64 {
        let now = timestamp_now_millis() as i64;
        let prev = self
            .clock
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| Some(now.max(v + 1)))
            .unwrap_or(now);
        now.max(prev + 1)
    }
}

/// Blob store kept entirely in memory.
pub struct MemBlobStore {
    shared: Arc<Shared>,
    authorizer: Arc<dyn Authorizer>,
}

impl MemBlobStore {
    pub fn new(authorizer: Arc<dyn Authorizer>) -> Self {
        Self {
            shared: Arc::new(Shared::default()),
            authorizer,
        }
    }

    fn entry(&self, key: &BlobKey) -> Result<Entry> {
        self.shared
            .entries()
            .get(key)
            .cloned()
            .ok_or_else(|| Error::KeyNotFound(key.to_string()))
    }

    fn checked_entry(&self, key: &BlobKey, caller: &Caller, access: Access) -> Result<Entry> {
        let entry = self.entry(key)?;
        self.authorizer.check(caller, key, &entry.meta.acl, access)?;
        Ok(entry)
    }
}

enum PartKind {
    Create(SettableBlobMeta),
    Update,
}

struct MemPart {
    key: BlobKey,
    kind: PartKind,
    buf: Vec<u8>,
    shared: Arc<Shared>,
}

impl Write for MemPart {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl BlobPart for MemPart {
    fn commit(self: Box<Self>) -> Result<()> {
        let MemPart {
            key,
            kind,
            buf,
            shared,
        } = *self;
        let version = shared.next_version();
        let mut entries = shared.entries();
        match kind {
            PartKind::Create(meta) => {
                if entries.contains_key(&key) {
                    return Err(Error::KeyAlreadyExists(key.to_string()));
                }
                entries.insert(
                    key,
                    Entry {
                        data: Arc::new(buf),
                        meta,
                        version,
                    },
                );
            }
            PartKind::Update => {
                let entry = entries
                    .get_mut(&key)
                    .ok_or_else(|| Error::KeyNotFound(key.to_string()))?;
                entry.data = Arc::new(buf);
                entry.version = version;
            }
        }
        Ok(())
    }

    fn cancel(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

/// Reader over a shared, immutable content snapshot.
struct SnapshotReader {
    data: Arc<Vec<u8>>,
    pos: usize,
}

impl io::Read for SnapshotReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let remaining = &self.data[self.pos.min(self.data.len())..];
        let n = remaining.len().min(buf.len());
        buf[..n].copy_from_slice(&remaining[..n]);
        self.pos += n;
        Ok(n)
    }
}

#[async_trait]
impl BlobStore for MemBlobStore {
    async fn create_blob(
        &self,
        key: &BlobKey,
        meta: SettableBlobMeta,
        caller: &Caller,
    ) -> Result<BlobWriter> {
        let meta = self.authorizer.normalize_for_create(caller, key, meta)?;
        if self.shared.entries().contains_key(key) {
            return Err(Error::KeyAlreadyExists(key.to_string()));
        }
        let part = MemPart {
            key: key.clone(),
            kind: PartKind::Create(meta),
            buf: Vec::new(),
            shared: self.shared.clone(),
        };
        Ok(BlobWriter::new(key.clone(), Box::new(part)))
    }

    async fn update_blob(&self, key: &BlobKey, caller: &Caller) -> Result<BlobWriter> {
        self.checked_entry(key, caller, Access::WRITE)?;
        let part = MemPart {
            key: key.clone(),
            kind: PartKind::Update,
            buf: Vec::new(),
            shared: self.shared.clone(),
        };
        Ok(BlobWriter::new(key.clone(), Box::new(part)))
    }

    async fn get_blob_meta(&self, key: &BlobKey, caller: &Caller) -> Result<ReadableBlobMeta> {
        let entry = self.checked_entry(key, caller, Access::READ)?;
        Ok(ReadableBlobMeta {
            settable: entry.meta,
            version: entry.version,
        })
    }

    async fn set_blob_meta(
        &self,
        key: &BlobKey,
        meta: SettableBlobMeta,
        caller: &Caller,
    ) -> Result<()> {
        let entry = self.checked_entry(key, caller, Access::ADMIN)?;
        let mut meta = meta;
        if meta.replication_factor.is_none() {
            meta.replication_factor = entry.meta.replication_factor;
        }
        let mut entries = self.shared.entries();
        let current = entries
            .get_mut(key)
            .ok_or_else(|| Error::KeyNotFound(key.to_string()))?;
        current.meta = meta;
        Ok(())
    }

    async fn delete_blob(&self, key: &BlobKey, caller: &Caller) -> Result<()> {
        self.checked_entry(key, caller, Access::WRITE)?;
        self.shared
            .entries()
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| Error::KeyNotFound(key.to_string()))
    }

    async fn get_blob(&self, key: &BlobKey, caller: &Caller) -> Result<BlobReader> {
        let entry = self.checked_entry(key, caller, Access::READ)?;
        let len = entry.data.len() as u64;
        let reader = SnapshotReader {
            data: entry.data,
            pos: 0,
        };
        Ok(BlobReader::new(Box::new(reader), len, entry.version))
    }

    async fn list_keys(&self) -> Result<Vec<BlobKey>> {
        Ok(self.shared.entries().keys().cloned().collect())
    }

    async fn get_blob_replication(&self, key: &BlobKey, caller: &Caller) -> Result<u32> {
        let entry = self.checked_entry(key, caller, Access::READ)?;
        Ok(entry.meta.replication_factor.unwrap_or(DEFAULT_REPLICATION))
    }

    async fn update_blob_replication(
        &self,
        key: &BlobKey,
        replication: u32,
        caller: &Caller,
    ) -> Result<u32> {
        self.checked_entry(key, caller, Access::ADMIN)?;
        if replication == 0 {
            return Err(Error::Other("replication factor must be positive".into()));
        }
        let mut entries = self.shared.entries();
        let entry = entries
            .get_mut(key)
            .ok_or_else(|| Error::KeyNotFound(key.to_string()))?;
        entry.meta.replication_factor = Some(replication);
        Ok(replication)
    }
}
