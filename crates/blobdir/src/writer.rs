//! Write half of a cached remote file.
//!
//! Writes go to a private working entry (`<name>.tmp`) in the cache, so a
//! reader syncing `<name>` in the meantime never sees or clobbers them. On
//! [`CachedWriter::close`] the working entry replaces `<name>`, the content
//! is uploaded, and a separate metadata call records the logical length as
//! [`CACHED_LENGTH_KEY`].

use std::collections::HashMap;
use std::io::{self, SeekFrom};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::Bytes;
use tokio::fs::File;
use tokio::io::{AsyncSeekExt, AsyncWrite, AsyncWriteExt, BufWriter};
use tracing::{debug, warn};

use crate::cache::validate_name;
use crate::codec::staging_name;
use crate::directory::DirectoryInner;
use crate::error::{DirectoryError, Result};

/// Metadata key holding the decoded byte length of a file.
pub const CACHED_LENGTH_KEY: &str = "CachedLength";

/// Suffix of the cache entry an open writer writes into.
pub const WORKING_SUFFIX: &str = ".tmp";

/// Cache name of the working entry for `name`.
pub fn working_name(name: &str) -> String {
    format!("{}{}", name, WORKING_SUFFIX)
}

/// A seekable byte sink that uploads its content when closed.
///
/// Also usable as a [`tokio::io::AsyncWrite`] stream; shutting the stream
/// down only flushes, the upload still happens in `close`.
#[derive(Debug)]
pub struct CachedWriter {
    inner: Arc<DirectoryInner>,
    name: String,
    // Taken by `close`. Still `Some` in `Drop` means the writer was abandoned.
    file: Option<BufWriter<File>>,
    pos: u64,
    len: u64,
}

impl CachedWriter {
    pub(crate) async fn create(inner: Arc<DirectoryInner>, name: &str) -> Result<Self> {
        validate_name(name)?;
        let file = {
            let _guard = inner.mutexes.lock(name).await;
            inner.cache.create(&working_name(name)).await?
        };
        debug!(name = %name, "writer created");

        Ok(Self {
            inner,
            name: name.to_string(),
            file: Some(BufWriter::new(file)),
            pos: 0,
            len: 0,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn position(&self) -> u64 {
        self.pos
    }

    /// Bytes written so far, including any gaps left by seeking.
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn file(&mut self) -> Result<&mut BufWriter<File>> {
        self.file
            .as_mut()
            .ok_or_else(|| DirectoryError::Closed(self.name.clone()))
    }

    fn advance(&mut self, written: usize) {
        self.pos += written as u64;
        self.len = self.len.max(self.pos);
    }

    pub async fn write_byte(&mut self, byte: u8) -> Result<()> {
        self.write_bytes(&[byte]).await
    }

    pub async fn write_bytes(&mut self, buf: &[u8]) -> Result<()> {
        let file = self.file()?;
        if let Err(e) = file.write_all(buf).await {
            return Err(DirectoryError::cache("write", &self.name, e));
        }
        self.advance(buf.len());
        Ok(())
    }

    pub async fn seek(&mut self, pos: u64) -> Result<()> {
        let file = self.file()?;
        if let Err(e) = file.seek(SeekFrom::Start(pos)).await {
            return Err(DirectoryError::cache("seek", &self.name, e));
        }
        self.pos = pos;
        Ok(())
    }

    /// Push buffered bytes to the working entry. Nothing goes remote.
    pub async fn flush(&mut self) -> Result<()> {
        let file = self.file()?;
        if let Err(e) = file.flush().await {
            return Err(DirectoryError::cache("flush", &self.name, e));
        }
        Ok(())
    }

    /// Finish the file: publish it to the cache, upload, then record its length.
    ///
    /// On failure `<name>` in the cache already holds the new content and is
    /// left in place as the latest local copy.
    pub async fn close(mut self) -> Result<()> {
        let Some(mut file) = self.file.take() else {
            return Err(DirectoryError::Closed(self.name.clone()));
        };
        let inner = self.inner.clone();
        let name = self.name.clone();
        let _guard = inner.mutexes.lock(&name).await;

        file.flush()
            .await
            .map_err(|e| DirectoryError::cache("flush", &name, e))?;
        let file = file.into_inner();
        file.sync_all()
            .await
            .map_err(|e| DirectoryError::cache("sync", &name, e))?;
        drop(file);

        inner.cache.rename(&working_name(&name), &name).await?;
        let plain = inner.cache.read(&name).await?;
        let original_length = plain.len() as u64;

        let staged = match inner.codecs.codec_for(&name) {
            Some(codec) => {
                let encoded = codec
                    .encode(&plain)
                    .map_err(|e| DirectoryError::cache("encode", &name, e))?;
                let staging = staging_name(&name);
                inner.cache.write(&staging, &encoded).await?;
                Some((staging, Bytes::from(encoded)))
            }
            None => None,
        };
        let payload = match &staged {
            Some((_, encoded)) => encoded.clone(),
            None => plain,
        };
        let uploaded = payload.len();

        inner
            .store
            .upload(&inner.container, &name, payload)
            .await
            .map_err(|e| DirectoryError::remote("upload", &name, e))?;

        let metadata = HashMap::from([(
            CACHED_LENGTH_KEY.to_string(),
            original_length.to_string(),
        )]);
        inner
            .store
            .set_metadata(&inner.container, &name, metadata)
            .await
            .map_err(|e| DirectoryError::remote("set_metadata", &name, e))?;

        if let Some((staging, _)) = staged {
            inner.cache.delete(&staging).await?;
        }

        debug!(
            name = %name,
            size = original_length,
            uploaded = uploaded,
            "writer closed"
        );
        Ok(())
    }
}

impl AsyncWrite for CachedWriter {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        let file = this.file()?;
        match Pin::new(file).poll_write(cx, buf) {
            Poll::Ready(Ok(written)) => {
                this.advance(written);
                Poll::Ready(Ok(written))
            }
            other => other,
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let file = self.get_mut().file()?;
        Pin::new(file).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.poll_flush(cx)
    }
}

impl Drop for CachedWriter {
    fn drop(&mut self) {
        if self.file.is_some() {
            warn!(name = %self.name, "writer dropped without close, nothing was uploaded");
        }
    }
}
