//! BlobStore - the [`RemoteBlobStore`] backed by SQLite + object storage.
//!
//! Content bytes go to object storage under `<container>/<name>`. SQLite
//! tracks which containers and objects exist, their custom metadata and
//! their leases. Processes sharing a container must share both.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, TimeZone, Utc};
use tracing::{debug, info, warn};

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::remote::{BlobProperties, LeaseId, RemoteBlobStore};
use crate::storage::{ObjectStoreConfig, RemoteConfig, Storage};

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

fn from_ms(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or_default()
}

/// Remote blob store combining SQLite metadata with object storage.
#[derive(Debug, Clone)]
pub struct BlobStore {
    db: Database,
    storage: Storage,
}

impl BlobStore {
    /// Create a new BlobStore with a file-based SQLite database.
    pub async fn new(db_path: &Path, config: ObjectStoreConfig) -> Result<Self> {
        let db = Database::new(db_path).await?;
        let storage = Storage::new(config).await?;
        Ok(Self { db, storage })
    }

    /// Create a new BlobStore with an in-memory SQLite database.
    pub async fn in_memory(config: ObjectStoreConfig) -> Result<Self> {
        let db = Database::in_memory().await?;
        let storage = Storage::new(config).await?;
        Ok(Self { db, storage })
    }

    /// Create a new BlobStore backed by local filesystem.
    ///
    /// The database lives at `data_dir/blobs.db`, objects under `data_dir/objects/`.
    pub async fn new_local(data_dir: &Path) -> Result<Self> {
        let db_path = data_dir.join("blobs.db");
        let objects_path = data_dir.join("objects");
        let config = ObjectStoreConfig::Local { path: objects_path };
        Self::new(&db_path, config).await
    }

    /// Create a fully ephemeral BlobStore (in-memory DB + in-memory object storage).
    ///
    /// Data will be lost when the last clone is dropped. Useful for testing.
    pub async fn new_ephemeral() -> Result<Self> {
        Self::in_memory(ObjectStoreConfig::Memory).await
    }

    /// Create a BlobStore from a [`RemoteConfig`].
    pub async fn from_config(config: RemoteConfig) -> Result<Self> {
        match config.metadata_db {
            Some(path) => Self::new(&path, config.storage).await,
            None => Self::in_memory(config.storage).await,
        }
    }

    async fn require_container(&self, container: &str) -> Result<()> {
        if self.db.has_container(container).await? {
            Ok(())
        } else {
            Err(StoreError::ContainerNotFound(container.to_string()))
        }
    }

    async fn require_object(&self, container: &str, name: &str) -> Result<()> {
        self.require_container(container).await?;
        if self.db.has_object(container, name).await? {
            Ok(())
        } else {
            Err(StoreError::not_found(container, name))
        }
    }
}

#[async_trait]
impl RemoteBlobStore for BlobStore {
    async fn create_container(&self, container: &str) -> Result<bool> {
        let created = self.db.insert_container(container).await?;
        if created {
            info!(container = %container, "container created");
        }
        Ok(created)
    }

    async fn list(&self, container: &str) -> Result<Vec<String>> {
        self.require_container(container).await?;
        self.db.list_objects(container).await
    }

    async fn properties(&self, container: &str, name: &str) -> Result<BlobProperties> {
        self.require_container(container).await?;
        let record = self
            .db
            .get_object(container, name)
            .await?
            .ok_or_else(|| StoreError::not_found(container, name))?;
        let metadata = self.db.get_metadata(container, name).await?;
        let lease = self.db.active_lease(container, name, now_ms()).await?;

        Ok(BlobProperties {
            name: name.to_string(),
            size: record.size.max(0) as u64,
            metadata,
            last_modified: from_ms(record.updated_at),
            lease_expires_at: lease.map(|l| from_ms(l.expires_at)),
        })
    }

    async fn download(&self, container: &str, name: &str) -> Result<Bytes> {
        self.require_object(container, name).await?;
        match self.storage.get_object(container, name).await? {
            Some(bytes) => {
                debug!(container = %container, name = %name, size = bytes.len(), "blob downloaded");
                Ok(bytes)
            }
            None => {
                warn!(container = %container, name = %name, "blob recorded but missing from storage");
                Err(StoreError::not_found(container, name))
            }
        }
    }

    async fn upload(&self, container: &str, name: &str, data: Bytes) -> Result<()> {
        self.require_container(container).await?;
        let size = data.len();
        self.storage.put_object(container, name, data).await?;
        self.db.upsert_object(container, name, size as i64).await?;
        debug!(container = %container, name = %name, size = size, "blob uploaded");
        Ok(())
    }

    async fn set_metadata(
        &self,
        container: &str,
        name: &str,
        metadata: HashMap<String, String>,
    ) -> Result<()> {
        self.require_object(container, name).await?;
        self.db.replace_metadata(container, name, &metadata).await
    }

    async fn delete_if_exists(&self, container: &str, name: &str) -> Result<bool> {
        self.require_container(container).await?;
        let existed = self.db.delete_object(container, name).await?;
        self.storage.delete_object(container, name).await?;
        if existed {
            debug!(container = %container, name = %name, "blob deleted");
        }
        Ok(existed)
    }

    async fn acquire_lease(
        &self,
        container: &str,
        name: &str,
        duration: Duration,
        proposed: Option<&LeaseId>,
    ) -> Result<LeaseId> {
        self.require_object(container, name).await?;
        let lease = proposed.cloned().unwrap_or_else(LeaseId::generate);
        let duration_ms = i64::try_from(duration.as_millis()).unwrap_or(i64::MAX);

        if self
            .db
            .acquire_lease(container, name, lease.as_str(), duration_ms, now_ms())
            .await?
        {
            debug!(container = %container, name = %name, lease = %lease, "lease acquired");
            Ok(lease)
        } else {
            Err(StoreError::LeaseAlreadyPresent {
                container: container.to_string(),
                name: name.to_string(),
            })
        }
    }

    async fn renew_lease(&self, container: &str, name: &str, lease: &LeaseId) -> Result<()> {
        self.require_object(container, name).await?;
        if self
            .db
            .renew_lease(container, name, lease.as_str(), now_ms())
            .await?
        {
            Ok(())
        } else {
            Err(StoreError::LeaseIdMismatch {
                container: container.to_string(),
                name: name.to_string(),
            })
        }
    }

    async fn release_lease(&self, container: &str, name: &str, lease: &LeaseId) -> Result<()> {
        self.require_object(container, name).await?;
        if self.db.release_lease(container, name, lease.as_str()).await? {
            debug!(container = %container, name = %name, lease = %lease, "lease released");
            Ok(())
        } else {
            Err(StoreError::LeaseIdMismatch {
                container: container.to_string(),
                name: name.to_string(),
            })
        }
    }

    async fn break_lease(&self, container: &str, name: &str) -> Result<()> {
        self.require_object(container, name).await?;
        if self.db.break_lease(container, name, now_ms()).await? {
            info!(container = %container, name = %name, "lease broken");
            Ok(())
        } else {
            Err(StoreError::LeaseNotPresent {
                container: container.to_string(),
                name: name.to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store_with_container() -> BlobStore {
        let store = BlobStore::new_ephemeral().await.unwrap();
        assert!(store.create_container("index").await.unwrap());
        store
    }

    #[tokio::test]
    async fn test_ephemeral_store() {
        let store = store_with_container().await;

        let data = Bytes::from_static(b"hello world");
        store.upload("index", "segments_1", data.clone()).await.unwrap();

        let retrieved = store.download("index", "segments_1").await.unwrap();
        assert_eq!(retrieved, data);

        let props = store.properties("index", "segments_1").await.unwrap();
        assert_eq!(props.size, 11);
        assert!(props.metadata.is_empty());
        assert!(!props.is_leased());
    }

    #[tokio::test]
    async fn test_local_store() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = BlobStore::new_local(temp_dir.path()).await.unwrap();
        store.create_container("catalog").await.unwrap();

        let data = Bytes::from_static(b"test local storage");
        store.upload("catalog", "_0.fdt", data.clone()).await.unwrap();

        assert!(temp_dir.path().join("blobs.db").exists());
        assert!(temp_dir
            .path()
            .join("objects")
            .join("catalog")
            .join("_0.fdt")
            .exists());

        let retrieved = store.download("catalog", "_0.fdt").await.unwrap();
        assert_eq!(retrieved, data);
    }

    #[tokio::test]
    async fn test_create_container_is_idempotent() {
        let store = store_with_container().await;
        assert!(!store.create_container("index").await.unwrap());
        assert!(store.list("index").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_container_is_not_found() {
        let store = BlobStore::new_ephemeral().await.unwrap();

        let err = store.list("nope").await.unwrap_err();
        assert!(matches!(err, StoreError::ContainerNotFound(_)));
        assert!(err.is_not_found());

        let err = store
            .upload("nope", "a", Bytes::from_static(b"a"))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_missing_object_is_not_found() {
        let store = store_with_container().await;

        assert!(store.download("index", "missing").await.unwrap_err().is_not_found());
        assert!(store.properties("index", "missing").await.unwrap_err().is_not_found());
        assert!(store
            .acquire_lease("index", "missing", Duration::from_secs(60), None)
            .await
            .unwrap_err()
            .is_not_found());
        assert!(!store.delete_if_exists("index", "missing").await.unwrap());
    }

    #[tokio::test]
    async fn test_metadata_is_replaced_by_upload() {
        let store = store_with_container().await;
        store
            .upload("index", "_1.cfs", Bytes::from_static(b"abc"))
            .await
            .unwrap();

        let mut metadata = HashMap::new();
        metadata.insert("CachedLength".to_string(), "3".to_string());
        store.set_metadata("index", "_1.cfs", metadata).await.unwrap();
        let props = store.properties("index", "_1.cfs").await.unwrap();
        assert_eq!(props.metadata.get("CachedLength").map(String::as_str), Some("3"));

        store
            .upload("index", "_1.cfs", Bytes::from_static(b"abcdef"))
            .await
            .unwrap();
        let props = store.properties("index", "_1.cfs").await.unwrap();
        assert_eq!(props.size, 6);
        assert!(props.metadata.is_empty());
    }

    #[tokio::test]
    async fn test_list_and_delete() {
        let store = store_with_container().await;
        for name in ["b", "a", "c"] {
            store
                .upload("index", name, Bytes::from_static(b"x"))
                .await
                .unwrap();
        }
        store.create_container("other").await.unwrap();
        store
            .upload("other", "z", Bytes::from_static(b"x"))
            .await
            .unwrap();

        assert_eq!(store.list("index").await.unwrap(), vec!["a", "b", "c"]);

        assert!(store.delete_if_exists("index", "b").await.unwrap());
        assert_eq!(store.list("index").await.unwrap(), vec!["a", "c"]);
        assert!(store.download("index", "b").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_lease_lifecycle() {
        let store = store_with_container().await;
        store
            .upload("index", "write.lock", Bytes::from_static(b"write.lock"))
            .await
            .unwrap();
        let ttl = Duration::from_secs(60);

        let lease = store
            .acquire_lease("index", "write.lock", ttl, None)
            .await
            .unwrap();
        assert!(store.properties("index", "write.lock").await.unwrap().is_leased());

        // A second acquirer conflicts
        let err = store
            .acquire_lease("index", "write.lock", ttl, None)
            .await
            .unwrap_err();
        assert!(err.is_lease_conflict());

        // Re-acquiring with the held id is allowed
        let again = store
            .acquire_lease("index", "write.lock", ttl, Some(&lease))
            .await
            .unwrap();
        assert_eq!(again, lease);

        store.renew_lease("index", "write.lock", &lease).await.unwrap();

        // Releasing with a foreign id fails, with the right id succeeds
        let foreign = LeaseId::generate();
        assert!(store
            .release_lease("index", "write.lock", &foreign)
            .await
            .unwrap_err()
            .is_lease_conflict());
        store.release_lease("index", "write.lock", &lease).await.unwrap();
        assert!(!store.properties("index", "write.lock").await.unwrap().is_leased());

        // Nothing left to break
        assert!(matches!(
            store.break_lease("index", "write.lock").await.unwrap_err(),
            StoreError::LeaseNotPresent { .. }
        ));
    }

    #[tokio::test]
    async fn test_break_lease_frees_object() {
        let store = store_with_container().await;
        store
            .upload("index", "write.lock", Bytes::from_static(b"write.lock"))
            .await
            .unwrap();
        let ttl = Duration::from_secs(60);

        let lease = store
            .acquire_lease("index", "write.lock", ttl, None)
            .await
            .unwrap();
        store.break_lease("index", "write.lock").await.unwrap();

        let other = store
            .acquire_lease("index", "write.lock", ttl, None)
            .await
            .unwrap();
        assert_ne!(other, lease);
        assert!(store
            .renew_lease("index", "write.lock", &lease)
            .await
            .unwrap_err()
            .is_lease_conflict());
    }

    #[tokio::test]
    async fn test_expired_lease_can_be_taken() {
        let store = store_with_container().await;
        store
            .upload("index", "write.lock", Bytes::from_static(b"write.lock"))
            .await
            .unwrap();

        let first = store
            .acquire_lease("index", "write.lock", Duration::from_millis(20), None)
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let second = store
            .acquire_lease("index", "write.lock", Duration::from_secs(60), None)
            .await
            .unwrap();
        assert_ne!(first, second);
    }

    #[tokio::test]
    async fn test_shared_between_clones() {
        let store = store_with_container().await;
        let other = store.clone();

        store
            .upload("index", "segments_2", Bytes::from_static(b"shared"))
            .await
            .unwrap();
        assert_eq!(
            other.download("index", "segments_2").await.unwrap(),
            Bytes::from_static(b"shared")
        );
    }
}
