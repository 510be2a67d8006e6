//! The remote blob store interface consumed by the cached directory.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};

use crate::error::Result;

/// Opaque token identifying an acquired lease on one object.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LeaseId(String);

impl LeaseId {
    /// Generate a fresh, random lease id.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for LeaseId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for LeaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Everything known about an object without transferring its content.
#[derive(Debug, Clone)]
pub struct BlobProperties {
    pub name: String,
    /// Physical size of the stored content in bytes
    pub size: u64,
    /// Custom string metadata
    pub metadata: HashMap<String, String>,
    pub last_modified: DateTime<Utc>,
    /// Expiry of the active lease, `None` when the object is not leased
    pub lease_expires_at: Option<DateTime<Utc>>,
}

impl BlobProperties {
    pub fn is_leased(&self) -> bool {
        self.lease_expires_at.is_some()
    }
}

/// A shared, strongly consistent object store holding one container per
/// catalog, with per-object metadata and exclusive leases.
///
/// Missing containers and objects surface as 404-class errors
/// (see [`StoreError::is_not_found`](crate::StoreError::is_not_found)).
#[async_trait]
pub trait RemoteBlobStore: Send + Sync + fmt::Debug {
    /// Create a container if it does not exist. Returns true if created.
    async fn create_container(&self, container: &str) -> Result<bool>;

    /// List object names in a container.
    async fn list(&self, container: &str) -> Result<Vec<String>>;

    /// Fetch size, metadata and lease state of an object.
    async fn properties(&self, container: &str, name: &str) -> Result<BlobProperties>;

    /// Download the full content of an object.
    async fn download(&self, container: &str, name: &str) -> Result<Bytes>;

    /// Upload the full content of an object, replacing content and metadata.
    async fn upload(&self, container: &str, name: &str, data: Bytes) -> Result<()>;

    /// Replace the custom metadata of an existing object.
    async fn set_metadata(
        &self,
        container: &str,
        name: &str,
        metadata: HashMap<String, String>,
    ) -> Result<()>;

    /// Delete an object if present. Returns true if something was deleted.
    async fn delete_if_exists(&self, container: &str, name: &str) -> Result<bool>;

    /// Acquire an exclusive lease for `duration`.
    ///
    /// Passing the id of the lease currently held re-acquires it.
    async fn acquire_lease(
        &self,
        container: &str,
        name: &str,
        duration: Duration,
        proposed: Option<&LeaseId>,
    ) -> Result<LeaseId>;

    /// Extend a held lease by its original duration.
    async fn renew_lease(&self, container: &str, name: &str, lease: &LeaseId) -> Result<()>;

    /// Give up a held lease.
    async fn release_lease(&self, container: &str, name: &str, lease: &LeaseId) -> Result<()>;

    /// End whatever lease is active, regardless of who holds it.
    async fn break_lease(&self, container: &str, name: &str) -> Result<()>;
}
