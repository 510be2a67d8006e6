//! VirtualDirectory - a flat file namespace over one remote container.
//!
//! The remote container is authoritative. The local cache mirrors the
//! content of files that were read or written through this directory, and
//! is never consulted to answer existence or length queries.

use std::collections::HashMap;
use std::sync::Arc;

use blob_store::{BlobStore, RemoteBlobStore};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::cache::{validate_name, LocalCache};
use crate::codec::{staging_name, CodecPolicy};
use crate::config::DirectoryConfig;
use crate::error::{DirectoryError, Result};
use crate::lock::DistributedLock;
use crate::mutex::FileMutexes;
use crate::reader::CachedReader;
use crate::writer::{working_name, CachedWriter, CACHED_LENGTH_KEY};

/// State shared by a directory and every file handle it hands out.
#[derive(Debug)]
pub(crate) struct DirectoryInner {
    pub(crate) store: Arc<dyn RemoteBlobStore>,
    pub(crate) container: String,
    pub(crate) cache: LocalCache,
    pub(crate) mutexes: FileMutexes,
    pub(crate) codecs: CodecPolicy,
    pub(crate) config: DirectoryConfig,
}

/// A directory of logical files stored remotely and cached locally.
///
/// Several directories, in one process or many, may share a container.
/// Writers must coordinate through [`make_lock`](Self::make_lock); the
/// directory itself only serializes access to a name within itself.
#[derive(Debug)]
pub struct VirtualDirectory {
    inner: Arc<DirectoryInner>,
    locks: Mutex<HashMap<String, Arc<DistributedLock>>>,
}

impl VirtualDirectory {
    /// Open a directory over an existing store, creating the container if needed.
    pub async fn open(store: Arc<dyn RemoteBlobStore>, config: DirectoryConfig) -> Result<Self> {
        config.validate()?;
        let container = config.container();

        store
            .create_container(&container)
            .await
            .map_err(|e| DirectoryError::remote("create_container", &container, e))?;
        let cache = LocalCache::open(config.cache_path()).await?;
        let codecs = CodecPolicy::from_config(&config.compression);

        info!(
            container = %container,
            cache = %cache.root().display(),
            compression = config.compression.enabled,
            "directory opened"
        );

        Ok(Self {
            inner: Arc::new(DirectoryInner {
                store,
                container,
                cache,
                mutexes: FileMutexes::new(),
                codecs,
                config,
            }),
            locks: Mutex::new(HashMap::new()),
        })
    }

    /// Build the remote store described by `config.remote` and open over it.
    pub async fn connect(config: DirectoryConfig) -> Result<Self> {
        let container = config.container();
        let store = BlobStore::from_config(config.remote.clone())
            .await
            .map_err(|e| DirectoryError::remote("connect", &container, e))?;
        Self::open(Arc::new(store), config).await
    }

    /// Name of the remote container.
    pub fn container(&self) -> &str {
        &self.inner.container
    }

    pub fn cache(&self) -> &LocalCache {
        &self.inner.cache
    }

    pub fn config(&self) -> &DirectoryConfig {
        &self.inner.config
    }

    /// Names of every file in the container, lock objects included.
    pub async fn list_all(&self) -> Result<Vec<String>> {
        self.inner
            .store
            .list(&self.inner.container)
            .await
            .map_err(|e| DirectoryError::remote("list", &self.inner.container, e))
    }

    /// Whether the file exists remotely.
    pub async fn file_exists(&self, name: &str) -> Result<bool> {
        match self
            .inner
            .store
            .properties(&self.inner.container, name)
            .await
        {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(DirectoryError::remote("properties", name, e)),
        }
    }

    /// Remove the file remotely, then its cache entries.
    pub async fn delete_file(&self, name: &str) -> Result<()> {
        validate_name(name)?;
        let _guard = self.inner.mutexes.lock(name).await;

        let existed = self
            .inner
            .store
            .delete_if_exists(&self.inner.container, name)
            .await
            .map_err(|e| DirectoryError::remote("delete", name, e))?;

        self.inner.cache.delete(&staging_name(name)).await?;
        self.inner.cache.delete(&working_name(name)).await?;
        self.inner.cache.delete(name).await?;

        debug!(name = %name, existed = existed, "file deleted");
        Ok(())
    }

    /// Logical length of the file, from metadata only.
    ///
    /// Falls back to the stored size when `CachedLength` is missing or
    /// malformed.
    pub async fn file_length(&self, name: &str) -> Result<u64> {
        let props = self
            .inner
            .store
            .properties(&self.inner.container, name)
            .await
            .map_err(|e| DirectoryError::remote_or_missing("properties", name, e))?;

        match props.metadata.get(CACHED_LENGTH_KEY) {
            Some(value) => match value.trim().parse::<u64>() {
                Ok(length) => Ok(length),
                Err(_) => {
                    debug!(name = %name, value = %value, "unparseable cached length, using stored size");
                    Ok(props.size)
                }
            },
            None => Ok(props.size),
        }
    }

    /// Create or replace a file. Content goes remote when the writer is closed.
    pub async fn create_output(&self, name: &str) -> Result<CachedWriter> {
        CachedWriter::create(self.inner.clone(), name).await
    }

    /// Fetch a file into the cache and open it for reading.
    pub async fn open_input(&self, name: &str) -> Result<CachedReader> {
        CachedReader::open(self.inner.clone(), name).await
    }

    /// The lock for `name`. Repeated calls return the same instance.
    pub fn make_lock(&self, name: &str) -> Arc<DistributedLock> {
        self.locks
            .lock()
            .entry(name.to_string())
            .or_insert_with(|| {
                Arc::new(DistributedLock::new(
                    name,
                    self.inner.container.clone(),
                    self.inner.store.clone(),
                    self.inner.config.lease.clone(),
                    self.inner.config.lock_poll_interval,
                ))
            })
            .clone()
    }

    /// Break the lock's lease, whoever holds it, and drop local lock state.
    pub async fn clear_lock(&self, name: &str) -> Result<()> {
        validate_name(name)?;
        let lock = self.make_lock(name);
        lock.force_break().await;
        self.inner.cache.clear_lock(name).await
    }

    /// Delete every local cache entry. Remote files are untouched.
    pub async fn clear_cache(&self) -> Result<usize> {
        let removed = self.inner.cache.clear().await?;
        debug!(removed = removed, "cache cleared");
        Ok(removed)
    }

    /// Release locks still held by this directory and let go of the store.
    ///
    /// The local cache is left as is.
    pub async fn close(self) -> Result<()> {
        let locks: Vec<_> = self.locks.lock().drain().map(|(_, lock)| lock).collect();

        let releases = locks.iter().map(|lock| async move {
            if let Err(e) = lock.release().await {
                warn!(name = %lock.name(), error = %e, "failed to release lock on close");
            }
        });
        futures::future::join_all(releases).await;

        info!(container = %self.inner.container, "directory closed");
        Ok(())
    }
}
