//! Error types for the remote blob store.

/// Errors that can occur when working with the blob store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Database error
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Object storage error
    #[error("object storage error: {0}")]
    ObjectStore(#[from] object_store::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Migration error
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// Object not found in its container
    #[error("blob not found: {container}/{name}")]
    NotFound { container: String, name: String },

    /// Container has not been created
    #[error("container not found: {0}")]
    ContainerNotFound(String),

    /// Another unexpired lease is held on the object
    #[error("lease already present on {container}/{name}")]
    LeaseAlreadyPresent { container: String, name: String },

    /// The supplied lease id does not match the object's lease
    #[error("lease id mismatch on {container}/{name}")]
    LeaseIdMismatch { container: String, name: String },

    /// Break requested but no active lease exists
    #[error("no lease present on {container}/{name}")]
    LeaseNotPresent { container: String, name: String },

    /// Invalid configuration
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// S3 bucket not found - must be created before use
    #[error("S3 bucket '{0}' does not exist. Create it before opening the store.")]
    BucketNotFound(String),
}

impl StoreError {
    /// Whether this is a 404-class condition (missing object or container).
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            StoreError::NotFound { .. }
                | StoreError::ContainerNotFound(_)
                | StoreError::ObjectStore(object_store::Error::NotFound { .. })
        )
    }

    /// Whether this is a lease conflict, i.e. someone else holds the object.
    pub fn is_lease_conflict(&self) -> bool {
        matches!(
            self,
            StoreError::LeaseAlreadyPresent { .. } | StoreError::LeaseIdMismatch { .. }
        )
    }

    pub(crate) fn not_found(container: &str, name: &str) -> Self {
        StoreError::NotFound {
            container: container.to_string(),
            name: name.to_string(),
        }
    }
}

/// Result type alias for blob store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
