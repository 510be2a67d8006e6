//! Content storage for blob bytes, behind the `object_store` crate.
//!
//! Objects live at `<container>/<name>`. Which objects *exist* is decided by
//! the metadata database, not by this layer.

use std::path::PathBuf;
use std::sync::Arc;

use bytes::Bytes;
use futures::TryStreamExt;
use object_store::aws::AmazonS3Builder;
use object_store::local::LocalFileSystem;
use object_store::memory::InMemory;
use object_store::path::Path as ObjectPath;
use object_store::ObjectStore;
use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};

const DEFAULT_S3_REGION: &str = "us-east-1";

/// Where blob content is kept.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ObjectStoreConfig {
    /// Process-local memory, gone when the store is dropped
    #[default]
    Memory,

    /// A directory on the local filesystem
    Local { path: PathBuf },

    /// An S3-compatible bucket. The bucket must already exist.
    S3 {
        bucket: String,
        /// Custom endpoint such as a MinIO server; AWS when unset
        #[serde(default)]
        endpoint: Option<String>,
        #[serde(default)]
        region: Option<String>,
        access_key: String,
        secret_key: String,
    },
}

/// Full configuration of a remote store: where content goes and where
/// metadata and leases are tracked.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct RemoteConfig {
    /// SQLite file holding object metadata and leases. Every process that
    /// shares the container must point at the same file. In-memory if unset.
    pub metadata_db: Option<PathBuf>,
    /// Content storage backend
    pub storage: ObjectStoreConfig,
}

fn invalid(e: object_store::Error) -> StoreError {
    StoreError::InvalidConfig(e.to_string())
}

fn looks_like_missing_bucket(err: &object_store::Error) -> bool {
    match err {
        object_store::Error::NotFound { .. } => true,
        other => {
            let msg = other.to_string();
            msg.contains("NoSuchBucket") || (msg.contains("bucket") && msg.contains("not"))
        }
    }
}

/// Fail early if `bucket` cannot be listed.
async fn ensure_bucket(store: &dyn ObjectStore, bucket: &str) -> Result<()> {
    let mut listing = store.list(None);
    match listing.try_next().await {
        Ok(_) => Ok(()),
        Err(e) if looks_like_missing_bucket(&e) => Err(StoreError::BucketNotFound(bucket.to_string())),
        Err(e) => Err(e.into()),
    }
}

/// Byte storage shared by every container.
#[derive(Debug, Clone)]
pub(crate) struct Storage {
    inner: Arc<dyn ObjectStore>,
}

impl Storage {
    pub async fn new(config: ObjectStoreConfig) -> Result<Self> {
        let inner: Arc<dyn ObjectStore> = match config {
            ObjectStoreConfig::Memory => Arc::new(InMemory::new()),
            ObjectStoreConfig::Local { path } => {
                tokio::fs::create_dir_all(&path).await?;
                Arc::new(LocalFileSystem::new_with_prefix(&path).map_err(invalid)?)
            }
            ObjectStoreConfig::S3 {
                bucket,
                endpoint,
                region,
                access_key,
                secret_key,
            } => {
                let mut builder = AmazonS3Builder::new()
                    .with_bucket_name(&bucket)
                    .with_region(region.as_deref().unwrap_or(DEFAULT_S3_REGION))
                    .with_access_key_id(access_key)
                    .with_secret_access_key(secret_key);
                if let Some(endpoint) = &endpoint {
                    builder = builder
                        .with_endpoint(endpoint)
                        .with_allow_http(endpoint.starts_with("http://"));
                }
                let s3 = builder.build().map_err(invalid)?;
                ensure_bucket(&s3, &bucket).await?;
                Arc::new(s3)
            }
        };

        Ok(Self { inner })
    }

    fn location(container: &str, name: &str) -> ObjectPath {
        ObjectPath::from(format!("{}/{}", container, name))
    }

    /// Store `data`, replacing any previous content.
    pub async fn put_object(&self, container: &str, name: &str, data: Bytes) -> Result<()> {
        self.inner
            .put(&Self::location(container, name), data.into())
            .await?;
        Ok(())
    }

    /// Fetch content; `None` if nothing is stored under that name.
    pub async fn get_object(&self, container: &str, name: &str) -> Result<Option<Bytes>> {
        let fetched = match self.inner.get(&Self::location(container, name)).await {
            Ok(fetched) => fetched,
            Err(object_store::Error::NotFound { .. }) => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(fetched.bytes().await?))
    }

    /// Remove content. Already absent is fine.
    pub async fn delete_object(&self, container: &str, name: &str) -> Result<()> {
        match self.inner.delete(&Self::location(container, name)).await {
            Ok(()) | Err(object_store::Error::NotFound { .. }) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
impl Storage {
    pub fn memory() -> Self {
        Self {
            inner: Arc::new(InMemory::new()),
        }
    }

    pub async fn has_object(&self, container: &str, name: &str) -> Result<bool> {
        match self.inner.head(&Self::location(container, name)).await {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn list_objects(&self, container: &str) -> Result<Vec<String>> {
        let prefix = ObjectPath::from(container);
        let listed: Vec<_> = self.inner.list(Some(&prefix)).try_collect().await?;
        Ok(listed
            .into_iter()
            .filter_map(|meta| meta.location.filename().map(str::to_string))
            .collect())
    }
}
