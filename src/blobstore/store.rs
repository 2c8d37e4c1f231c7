//! The blob store operation set

use crate::blobstore::auth::Caller;
use crate::blobstore::key::BlobKey;
use crate::blobstore::meta::{ReadableBlobMeta, SettableBlobMeta};
use crate::blobstore::stream::{BlobReader, BlobWriter};
use crate::common::{Error, Result};
use async_trait::async_trait;
use std::collections::HashSet;
use std::hash::Hash;
use std::io::{Read, Write};

/// Keyed, versioned byte storage with ACL-carrying metadata.
///
/// Writes go through [`BlobWriter`] handles so content only becomes visible
/// on commit. Backends that replicate on their own make [`start_sync`]
/// a no-op; the others use it to start reconciling with the cluster.
///
/// [`start_sync`]: BlobStore::start_sync
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Start writing a new blob. Fails with `KeyAlreadyExists` if it exists.
    async fn create_blob(
        &self,
        key: &BlobKey,
        meta: SettableBlobMeta,
        caller: &Caller,
    ) -> Result<BlobWriter>;

    /// Start replacing the content of an existing blob.
    async fn update_blob(&self, key: &BlobKey, caller: &Caller) -> Result<BlobWriter>;

    async fn get_blob_meta(&self, key: &BlobKey, caller: &Caller) -> Result<ReadableBlobMeta>;

    async fn set_blob_meta(
        &self,
        key: &BlobKey,
        meta: SettableBlobMeta,
        caller: &Caller,
    ) -> Result<()>;

    /// Remove content and metadata together.
    async fn delete_blob(&self, key: &BlobKey, caller: &Caller) -> Result<()>;

    async fn get_blob(&self, key: &BlobKey, caller: &Caller) -> Result<BlobReader>;

    /// Snapshot of the keys currently stored, in no particular order.
    async fn list_keys(&self) -> Result<Vec<BlobKey>>;

    async fn get_blob_replication(&self, key: &BlobKey, caller: &Caller) -> Result<u32>;

    async fn update_blob_replication(
        &self,
        key: &BlobKey,
        replication: u32,
        caller: &Caller,
    ) -> Result<u32>;

    /// Begin keeping this store in sync with the rest of the cluster.
    async fn start_sync(&self) -> Result<()> {
        Ok(())
    }

    /// Stop background work started by [`BlobStore::start_sync`].
    async fn shutdown(&self) {}

    async fn blob_exists(&self, key: &BlobKey, caller: &Caller) -> Result<bool> {
        match self.get_blob_meta(key, caller).await {
            Ok(_) => Ok(true),
            Err(Error::KeyNotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Create a blob from an in-memory buffer.
    async fn create_blob_from_bytes(
        &self,
        key: &BlobKey,
        data: &[u8],
        meta: SettableBlobMeta,
        caller: &Caller,
    ) -> Result<()> {
        let mut out = self.create_blob(key, meta, caller).await?;
        out.write_all(data)?;
        out.commit()
    }

    /// Create a blob by draining a reader.
    async fn create_blob_from_reader(
        &self,
        key: &BlobKey,
        reader: BlobReader,
        meta: SettableBlobMeta,
        caller: &Caller,
    ) -> Result<u64> {
        let out = self.create_blob(key, meta, caller).await?;
        crate::blobstore::stream::copy_and_commit(reader, out).await
    }

    /// Replace a blob's content with an in-memory buffer.
    async fn update_blob_from_bytes(
        &self,
        key: &BlobKey,
        data: &[u8],
        caller: &Caller,
    ) -> Result<()> {
        let mut out = self.update_blob(key, caller).await?;
        out.write_all(data)?;
        out.commit()
    }

    /// Stream a blob's content into `out`.
    async fn read_blob_to(
        &self,
        key: &BlobKey,
        out: &mut (dyn Write + Send),
        caller: &Caller,
    ) -> Result<u64> {
        let mut input = self.get_blob(key, caller).await?;
        let copied = std::io::copy(&mut input, out)?;
        out.flush()?;
        Ok(copied)
    }

    /// Read a whole blob into memory.
    async fn read_blob(&self, key: &BlobKey, caller: &Caller) -> Result<Vec<u8>> {
        let mut input = self.get_blob(key, caller).await?;
        let mut buf = Vec::with_capacity(input.len() as usize);
        input.read_to_end(&mut buf)?;
        Ok(buf)
    }

    /// Map every key through `filter`, keeping the `Some` results.
    async fn filter_and_list_keys<R, F>(&self, filter: F) -> Result<HashSet<R>>
    where
        R: Eq + Hash + Send,
        F: Fn(&BlobKey) -> Option<R> + Send,
        Self: Sized,
    {
        Ok(self.list_keys().await?.iter().filter_map(filter).collect())
    }
}

/// Lazily strip `prefix` from every name that carries it, skipping the rest.
///
/// Backends that keep several kinds of entries side by side (`data_<key>`,
/// `meta_<key>`) use this to turn a directory listing into a key listing.
pub fn translate_keys<'a, I>(names: I, prefix: &'a str) -> impl Iterator<Item = String> + 'a
where
    I: IntoIterator<Item = String>,
    I::IntoIter: 'a,
{
    names
        .into_iter()
        .filter_map(move |name| name.strip_prefix(prefix).map(str::to_string))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_translate_keys_filters_and_strips() {
        let names = vec![
            "data_topo1".to_string(),
            "meta_topo1".to_string(),
            "data_topo2".to_string(),
            "lost+found".to_string(),
        ];
        let keys: Vec<String> = translate_keys(names, "data_").collect();
        assert_eq!(keys, vec!["topo1".to_string(), "topo2".to_string()]);
    }

    #[test]
    fn test_translate_keys_empty_and_restartable() {
        let names = vec!["data_a".to_string(), "data_b".to_string()];
        assert_eq!(translate_keys(names.clone(), "data_").count(), 2);
        assert_eq!(translate_keys(names, "data_").count(), 2);
        assert_eq!(translate_keys(Vec::<String>::new(), "data_").count(), 0);
    }
}
