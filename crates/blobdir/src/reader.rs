//! Read half of a cached remote file.
//!
//! Opening a reader always refetches the remote object: the remote store is
//! the source of truth at open time, and the fetched bytes replace the
//! cache entry before any byte is served. All reads afterwards come from
//! the cached copy.

use std::io;
use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, warn};

use crate::cache::validate_name;
use crate::directory::DirectoryInner;
use crate::error::{DirectoryError, Result};

/// A random-access byte source over one synced cache entry.
///
/// Clones share the same bytes but keep their own cursor.
#[derive(Debug)]
pub struct CachedReader {
    inner: Arc<DirectoryInner>,
    name: String,
    data: Option<Bytes>,
    len: u64,
    pos: u64,
}

impl CachedReader {
    pub(crate) async fn open(inner: Arc<DirectoryInner>, name: &str) -> Result<Self> {
        validate_name(name)?;
        let _guard = inner.mutexes.lock(name).await;

        let remote = inner
            .store
            .download(&inner.container, name)
            .await
            .map_err(|e| DirectoryError::remote_or_missing("download", name, e))?;
        let fetched = remote.len();

        let plain = match inner.codecs.codec_for(name) {
            Some(codec) => codec
                .decode(&remote)
                .map(Bytes::from)
                .map_err(|e| DirectoryError::cache("decode", name, e))?,
            None => remote,
        };

        inner.cache.write(name, &plain).await?;
        let data = inner.cache.read(name).await?;
        debug!(
            name = %name,
            fetched = fetched,
            size = data.len(),
            "cache synced for read"
        );

        Ok(Self {
            len: data.len() as u64,
            data: Some(data),
            inner: inner.clone(),
            name: name.to_string(),
            pos: 0,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Logical length of the file.
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn position(&self) -> u64 {
        self.pos
    }

    pub fn is_closed(&self) -> bool {
        self.data.is_none()
    }

    fn contents(&self) -> Result<&Bytes> {
        self.data
            .as_ref()
            .ok_or_else(|| DirectoryError::Closed(self.name.clone()))
    }

    fn past_eof(&self, wanted: u64) -> DirectoryError {
        DirectoryError::ReadPastEof {
            name: self.name.clone(),
            pos: self.pos.saturating_add(wanted),
            len: self.len,
        }
    }

    pub fn read_byte(&mut self) -> Result<u8> {
        let data = self.contents()?;
        let byte = match usize::try_from(self.pos).ok().and_then(|p| data.get(p)) {
            Some(byte) => *byte,
            None => return Err(self.past_eof(1)),
        };
        self.pos += 1;
        Ok(byte)
    }

    /// Fill `buf` completely or fail without moving the cursor.
    pub fn read_bytes(&mut self, buf: &mut [u8]) -> Result<()> {
        let data = self.contents()?;
        let start = usize::try_from(self.pos).unwrap_or(usize::MAX);
        let slice = start
            .checked_add(buf.len())
            .and_then(|end| data.get(start..end));
        match slice {
            Some(slice) => {
                buf.copy_from_slice(slice);
                self.pos += buf.len() as u64;
                Ok(())
            }
            None => Err(self.past_eof(buf.len() as u64)),
        }
    }

    /// Move the cursor to an absolute position within the file.
    pub fn seek(&mut self, pos: u64) -> Result<()> {
        self.contents()?;
        if pos > self.len {
            return Err(DirectoryError::ReadPastEof {
                name: self.name.clone(),
                pos,
                len: self.len,
            });
        }
        self.pos = pos;
        Ok(())
    }

    /// A second reader over the same bytes, positioned where this one is.
    ///
    /// A closed reader no longer holds its bytes; cloning it falls back to
    /// reading the cache entry again and fails only if that entry is gone.
    pub async fn try_clone(&self) -> Result<Self> {
        let data = match &self.data {
            Some(data) => data.clone(),
            None => {
                warn!(name = %self.name, "cloning closed reader, rereading cache entry");
                let _guard = self.inner.mutexes.lock(&self.name).await;
                self.inner.cache.read(&self.name).await?
            }
        };

        Ok(Self {
            inner: self.inner.clone(),
            name: self.name.clone(),
            len: data.len() as u64,
            data: Some(data),
            pos: self.pos,
        })
    }

    /// Release the cached bytes. Closing twice is a no-op.
    pub async fn close(&mut self) -> Result<()> {
        if self.data.is_none() {
            return Ok(());
        }
        let _guard = self.inner.mutexes.lock(&self.name).await;
        self.data = None;
        debug!(name = %self.name, "reader closed");
        Ok(())
    }
}

impl io::Read for CachedReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let data = self.contents()?;
        let start = usize::try_from(self.pos).unwrap_or(usize::MAX).min(data.len());
        let n = buf.len().min(data.len() - start);
        buf[..n].copy_from_slice(&data[start..start + n]);
        self.pos += n as u64;
        Ok(n)
    }
}

impl io::Seek for CachedReader {
    fn seek(&mut self, pos: io::SeekFrom) -> io::Result<u64> {
        let target = match pos {
            io::SeekFrom::Start(offset) => Some(offset),
            io::SeekFrom::End(delta) => self.len.checked_add_signed(delta),
            io::SeekFrom::Current(delta) => self.pos.checked_add_signed(delta),
        };
        match target {
            Some(target) => {
                self.pos = target;
                Ok(target)
            }
            None => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek before start of file",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Seek, SeekFrom};

    use blob_store::{BlobStore, RemoteBlobStore};

    use super::*;
    use crate::{DirectoryConfig, VirtualDirectory};

    async fn directory_with(name: &str, content: &[u8]) -> (VirtualDirectory, tempfile::TempDir) {
        let temp = tempfile::tempdir().unwrap();
        let store = Arc::new(BlobStore::new_ephemeral().await.unwrap());
        let config = DirectoryConfig::default().with_cache_dir(temp.path());
        let dir = VirtualDirectory::open(store.clone(), config).await.unwrap();
        store
            .upload("index", name, Bytes::copy_from_slice(content))
            .await
            .unwrap();
        (dir, temp)
    }

    #[tokio::test]
    async fn test_read_and_seek() {
        let (dir, _temp) = directory_with("_0.tis", b"0123456789").await;
        let mut reader = dir.open_input("_0.tis").await.unwrap();

        assert_eq!(reader.len(), 10);
        assert_eq!(reader.read_byte().unwrap(), b'0');

        let mut buf = [0u8; 3];
        reader.read_bytes(&mut buf).unwrap();
        assert_eq!(&buf, b"123");
        assert_eq!(reader.position(), 4);

        reader.seek(8).unwrap();
        let mut tail = [0u8; 2];
        reader.read_bytes(&mut tail).unwrap();
        assert_eq!(&tail, b"89");

        assert!(matches!(
            reader.read_byte(),
            Err(DirectoryError::ReadPastEof { pos: 11, len: 10, .. })
        ));
        assert!(reader.seek(11).is_err());
    }

    #[tokio::test]
    async fn test_short_read_keeps_cursor() {
        let (dir, _temp) = directory_with("_0.frq", b"abc").await;
        let mut reader = dir.open_input("_0.frq").await.unwrap();
        reader.seek(1).unwrap();

        let mut buf = [0u8; 5];
        assert!(reader.read_bytes(&mut buf).is_err());
        assert_eq!(reader.position(), 1);
    }

    #[tokio::test]
    async fn test_open_writes_cache_entry() {
        let (dir, _temp) = directory_with("segments_2", b"fresh").await;
        dir.cache().write("segments_2", b"stale bytes").await.unwrap();

        let reader = dir.open_input("segments_2").await.unwrap();
        assert_eq!(reader.len(), 5);
        assert_eq!(
            dir.cache().read("segments_2").await.unwrap(),
            Bytes::from("fresh")
        );
    }

    #[tokio::test]
    async fn test_std_io_adaptor() {
        let (dir, _temp) = directory_with("_1.fdt", b"hello world").await;
        let mut reader = dir.open_input("_1.fdt").await.unwrap();

        Seek::seek(&mut reader, SeekFrom::End(-5)).unwrap();
        let mut rest = String::new();
        reader.read_to_string(&mut rest).unwrap();
        assert_eq!(rest, "world");

        assert_eq!(Seek::seek(&mut reader, SeekFrom::Current(-11)).unwrap(), 0);
        assert!(Seek::seek(&mut reader, SeekFrom::Current(-1)).is_err());
    }

    #[tokio::test]
    async fn test_std_read_after_close_fails() {
        let (dir, _temp) = directory_with("_1.tvd", b"vectors").await;
        let mut reader = dir.open_input("_1.tvd").await.unwrap();

        let mut buf = [0u8; 3];
        assert_eq!(Read::read(&mut reader, &mut buf).unwrap(), 3);
        assert_eq!(&buf, b"vec");

        reader.close().await.unwrap();
        let err = Read::read(&mut reader, &mut buf).unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::Other);
        assert!(err.to_string().contains("closed"));
    }

    #[tokio::test]
    async fn test_clone_after_close_rereads_cache() {
        let (dir, _temp) = directory_with("_2.prx", b"positions").await;
        let mut reader = dir.open_input("_2.prx").await.unwrap();
        reader.seek(3).unwrap();
        reader.close().await.unwrap();
        reader.close().await.unwrap();
        assert!(matches!(reader.read_byte(), Err(DirectoryError::Closed(_))));

        let mut clone = reader.try_clone().await.unwrap();
        assert_eq!(clone.position(), 3);
        assert_eq!(clone.read_byte().unwrap(), b'i');

        dir.cache().delete("_2.prx").await.unwrap();
        assert!(reader.try_clone().await.is_err());
    }
}
