//! Shared test utilities for directory integration tests
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use blob_store::{BlobProperties, BlobStore, LeaseId, RemoteBlobStore, StoreError};
use blobdir::{DirectoryConfig, VirtualDirectory};
use bytes::Bytes;
use tempfile::TempDir;

/// Install a log subscriber once, honoring `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// One remote store shared by several "processes", each with its own cache.
pub struct Cluster {
    pub store: Arc<BlobStore>,
    pub temp_dir: TempDir,
}

impl Cluster {
    pub async fn new() -> Self {
        init_tracing();
        Self {
            store: Arc::new(BlobStore::new_ephemeral().await.unwrap()),
            temp_dir: TempDir::new().unwrap(),
        }
    }

    pub fn config(&self, node: &str) -> DirectoryConfig {
        DirectoryConfig::default()
            .with_cache_dir(self.temp_dir.path().join(node))
            .with_lock_poll_interval(Duration::from_millis(20))
    }

    /// Open a directory with its own cache, as a separate process would.
    pub async fn directory(&self, node: &str) -> VirtualDirectory {
        self.open(self.config(node)).await
    }

    pub async fn open(&self, config: DirectoryConfig) -> VirtualDirectory {
        VirtualDirectory::open(self.store.clone(), config)
            .await
            .unwrap()
    }
}

/// Write `content` to `name` through the directory and close the writer.
pub async fn write_file(dir: &VirtualDirectory, name: &str, content: &[u8]) {
    let mut writer = dir.create_output(name).await.unwrap();
    writer.write_bytes(content).await.unwrap();
    writer.close().await.unwrap();
}

/// Read the whole of `name` through the directory.
pub async fn read_file(dir: &VirtualDirectory, name: &str) -> Vec<u8> {
    let mut reader = dir.open_input(name).await.unwrap();
    let mut buf = vec![0u8; reader.len() as usize];
    reader.read_bytes(&mut buf).unwrap();
    reader.close().await.unwrap();
    buf
}

/// A store whose uploads can be made to fail on demand.
#[derive(Debug)]
pub struct FlakyStore {
    inner: BlobStore,
    fail_uploads: AtomicBool,
}

impl FlakyStore {
    pub async fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: BlobStore::new_ephemeral().await.unwrap(),
            fail_uploads: AtomicBool::new(false),
        })
    }

    pub fn fail_uploads(&self, fail: bool) {
        self.fail_uploads.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl RemoteBlobStore for FlakyStore {
    async fn create_container(&self, container: &str) -> blob_store::Result<bool> {
        self.inner.create_container(container).await
    }

    async fn list(&self, container: &str) -> blob_store::Result<Vec<String>> {
        self.inner.list(container).await
    }

    async fn properties(&self, container: &str, name: &str) -> blob_store::Result<BlobProperties> {
        self.inner.properties(container, name).await
    }

    async fn download(&self, container: &str, name: &str) -> blob_store::Result<Bytes> {
        self.inner.download(container, name).await
    }

    async fn upload(&self, container: &str, name: &str, data: Bytes) -> blob_store::Result<()> {
        if self.fail_uploads.load(Ordering::SeqCst) {
            return Err(StoreError::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "connection reset by peer",
            )));
        }
        self.inner.upload(container, name, data).await
    }

    async fn set_metadata(
        &self,
        container: &str,
        name: &str,
        metadata: HashMap<String, String>,
    ) -> blob_store::Result<()> {
        self.inner.set_metadata(container, name, metadata).await
    }

    async fn delete_if_exists(&self, container: &str, name: &str) -> blob_store::Result<bool> {
        self.inner.delete_if_exists(container, name).await
    }

    async fn acquire_lease(
        &self,
        container: &str,
        name: &str,
        duration: Duration,
        proposed: Option<&LeaseId>,
    ) -> blob_store::Result<LeaseId> {
        self.inner
            .acquire_lease(container, name, duration, proposed)
            .await
    }

    async fn renew_lease(
        &self,
        container: &str,
        name: &str,
        lease: &LeaseId,
    ) -> blob_store::Result<()> {
        self.inner.renew_lease(container, name, lease).await
    }

    async fn release_lease(
        &self,
        container: &str,
        name: &str,
        lease: &LeaseId,
    ) -> blob_store::Result<()> {
        self.inner.release_lease(container, name, lease).await
    }

    async fn break_lease(&self, container: &str, name: &str) -> blob_store::Result<()> {
        self.inner.break_lease(container, name).await
    }
}
