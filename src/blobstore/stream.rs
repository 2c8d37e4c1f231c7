//! Commit-or-cancel write handles and versioned read handles
//!
//! A [`BlobWriter`] stages bytes in a backend-specific [`BlobPart`]. Nothing
//! is visible to readers until [`BlobWriter::commit`] returns `Ok`; dropping
//! a writer without committing cancels it. `commit` and `cancel` consume the
//! writer, so a second commit or a commit after cancel does not compile.

use crate::blobstore::key::BlobKey;
use crate::common::{Error, Result};
use std::io::{self, Read, Write};

/// Backend side of a pending write.
pub trait BlobPart: Write + Send {
    /// Atomically replace the visible content with what was written.
    /// On failure the part must leave the previous content untouched.
    fn commit(self: Box<Self>) -> Result<()>;

    /// Discard everything written so far.
    fn cancel(self: Box<Self>) -> Result<()>;
}

/// Write handle returned by `create_blob` / `update_blob`.
pub struct BlobWriter {
    key: BlobKey,
    part: Option<Box<dyn BlobPart>>,
    written: u64,
}

impl BlobWriter {
    pub fn new(key: BlobKey, part: Box<dyn BlobPart>) -> Self {
        Self {
            key,
            part: Some(part),
            written: 0,
        }
    }

    pub fn key(&self) -> &BlobKey {
        &self.key
    }

    pub fn bytes_written(&self) -> u64 {
        self.written
    }

    /// Flush and publish the staged content.
    pub fn commit(mut self) -> Result<()> {
        let mut part = self.take_part()?;
        if let Err(e) = part.flush() {
            part.cancel()?;
            return Err(e.into());
        }
        part.commit()?;
        tracing::debug!("Committed {} bytes for {}", self.written, self.key);
        Ok(())
    }

    /// Throw away the staged content; the previous version stays as it was.
    pub fn cancel(mut self) -> Result<()> {
        let part = self.take_part()?;
        tracing::debug!("Cancelled write of {} after {} bytes", self.key, self.written);
        part.cancel()
    }

    fn take_part(&mut self) -> Result<Box<dyn BlobPart>> {
        self.part
            .take()
            .ok_or_else(|| Error::Internal(format!("write handle for {} already closed", self.key)))
    }
}

impl Write for BlobWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let part = self
            .part
            .as_mut()
            .ok_or_else(|| io::Error::other("write after close"))?;
        let n = part.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.part.as_mut() {
            Some(part) => part.flush(),
            None => Ok(()),
        }
    }
}

impl Drop for BlobWriter {
    fn drop(&mut self) {
        if let Some(part) = self.part.take() {
            tracing::warn!(
                "Write handle for {} dropped without commit, cancelling",
                self.key
            );
            if let Err(e) = part.cancel() {
                tracing::warn!("Failed to cancel abandoned write for {}: {}", self.key, e);
            }
        }
    }
}

impl std::fmt::Debug for BlobWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlobWriter")
            .field("key", &self.key)
            .field("open", &self.part.is_some())
            .field("written", &self.written)
            .finish()
    }
}

/// Read handle: a byte stream plus its total length and version marker.
pub struct BlobReader {
    inner: Box<dyn Read + Send>,
    len: u64,
    version: i64,
}

impl BlobReader {
    pub fn new(inner: Box<dyn Read + Send>, len: u64, version: i64) -> Self {
        Self {
            inner,
            len,
            version,
        }
    }

    pub fn from_bytes(bytes: impl Into<Vec<u8>>, version: i64) -> Self {
        let bytes = bytes.into();
        let len = bytes.len() as u64;
        Self::new(Box::new(io::Cursor::new(bytes)), len, version)
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn version(&self) -> i64 {
        self.version
    }

    pub fn read_to_vec(mut self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(self.len as usize);
        self.read_to_end(&mut buf)?;
        Ok(buf)
    }
}

impl Read for BlobReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

impl std::fmt::Debug for BlobReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlobReader")
            .field("len", &self.len)
            .field("version", &self.version)
            .finish()
    }
}

/// Copy `reader` into `writer` and commit. Any failure cancels the write.
///
/// Runs on the blocking pool: both ends are synchronous streams.
pub async fn copy_and_commit(mut reader: BlobReader, mut writer: BlobWriter) -> Result<u64> {
    tokio::task::spawn_blocking(move || {
        let copied = match io::copy(&mut reader, &mut writer) {
            Ok(n) => n,
            Err(e) => {
                writer.cancel()?;
                return Err(Error::from(e));
            }
        };
        writer.commit()?;
        Ok(copied)
    })
    .await
    .map_err(|e| Error::Internal(format!("blob copy task failed: {}", e)))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct Outcome {
        committed: Option<Vec<u8>>,
        cancelled: bool,
    }

    struct RecordingPart {
        buf: Vec<u8>,
        outcome: Arc<Mutex<Outcome>>,
    }

    impl Write for RecordingPart {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.buf.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl BlobPart for RecordingPart {
        fn commit(self: Box<Self>) -> Result<()> {
            self.outcome.lock().unwrap().committed = Some(self.buf);
            Ok(())
        }

        fn cancel(self: Box<Self>) -> Result<()> {
            self.outcome.lock().unwrap().cancelled = true;
            Ok(())
        }
    }

    fn writer() -> (BlobWriter, Arc<Mutex<Outcome>>) {
        let outcome = Arc::new(Mutex::new(Outcome::default()));
        let part = RecordingPart {
            buf: Vec::new(),
            outcome: outcome.clone(),
        };
        (
            BlobWriter::new(BlobKey::new("k").unwrap(), Box::new(part)),
            outcome,
        )
    }

    struct FailingReader;

    impl Read for FailingReader {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::ConnectionReset, "peer went away"))
        }
    }

    #[test]
    fn test_commit_publishes_bytes() {
        let (mut w, outcome) = writer();
        w.write_all(b"hello ").unwrap();
        w.write_all(b"world").unwrap();
        assert_eq!(w.bytes_written(), 11);
        w.commit().unwrap();

        let outcome = outcome.lock().unwrap();
        assert_eq!(outcome.committed.as_deref(), Some(&b"hello world"[..]));
        assert!(!outcome.cancelled);
    }

    #[test]
    fn test_drop_without_commit_cancels() {
        let (mut w, outcome) = writer();
        w.write_all(b"partial").unwrap();
        drop(w);

        let outcome = outcome.lock().unwrap();
        assert!(outcome.cancelled);
        assert!(outcome.committed.is_none());
    }

    #[test]
    fn test_explicit_cancel() {
        let (w, outcome) = writer();
        w.cancel().unwrap();
        assert!(outcome.lock().unwrap().cancelled);
    }

    #[tokio::test]
    async fn test_copy_failure_cancels() {
        let (w, outcome) = writer();
        let reader = BlobReader::new(Box::new(FailingReader), 10, 1);
        assert!(copy_and_commit(reader, w).await.is_err());

        let outcome = outcome.lock().unwrap();
        assert!(outcome.cancelled);
        assert!(outcome.committed.is_none());
    }

    #[tokio::test]
    async fn test_copy_and_commit() {
        let (w, outcome) = writer();
        let reader = BlobReader::from_bytes(b"payload".to_vec(), 7);
        assert_eq!(reader.len(), 7);
        assert_eq!(copy_and_commit(reader, w).await.unwrap(), 7);
        assert_eq!(
            outcome.lock().unwrap().committed.as_deref(),
            Some(&b"payload"[..])
        );
    }
}
