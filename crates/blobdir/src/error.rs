//! Error types for the virtual directory.

use std::time::Duration;

use blob_store::StoreError;

/// Errors surfaced by the directory, its files and its locks.
///
/// Every variant names the file it concerns so failures can be traced back
/// to one logical file and operation.
#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    /// The file does not exist in the remote container
    #[error("file not found: {0}")]
    NotFound(String),

    /// A remote store call failed for a reason other than absence
    #[error("remote {op} failed for {name}: {source}")]
    Remote {
        op: &'static str,
        name: String,
        #[source]
        source: StoreError,
    },

    /// The local cache could not be read or written
    #[error("cache {op} failed for {name}: {source}")]
    Cache {
        op: &'static str,
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("read past end of {name}: position {pos}, length {len}")]
    ReadPastEof { name: String, pos: u64, len: u64 },

    /// The handle was already closed
    #[error("file handle closed: {0}")]
    Closed(String),

    /// Names must be plain file names, never paths
    #[error("invalid file name: {0:?}")]
    InvalidName(String),

    #[error("timed out after {waited:?} waiting for lock {name}")]
    LockObtainTimeout { name: String, waited: Duration },

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl DirectoryError {
    pub(crate) fn remote(op: &'static str, name: &str, source: StoreError) -> Self {
        DirectoryError::Remote {
            op,
            name: name.to_string(),
            source,
        }
    }

    /// Like [`DirectoryError::remote`] but folds 404-class errors into
    /// [`DirectoryError::NotFound`].
    pub(crate) fn remote_or_missing(op: &'static str, name: &str, source: StoreError) -> Self {
        if source.is_not_found() {
            DirectoryError::NotFound(name.to_string())
        } else {
            Self::remote(op, name, source)
        }
    }

    pub(crate) fn cache(op: &'static str, name: &str, source: std::io::Error) -> Self {
        DirectoryError::Cache {
            op,
            name: name.to_string(),
            source,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, DirectoryError::NotFound(_))
    }
}

impl From<DirectoryError> for std::io::Error {
    fn from(err: DirectoryError) -> Self {
        use std::io::ErrorKind;

        let kind = match &err {
            DirectoryError::NotFound(_) => ErrorKind::NotFound,
            DirectoryError::ReadPastEof { .. } => ErrorKind::UnexpectedEof,
            DirectoryError::InvalidName(_) | DirectoryError::Config(_) => ErrorKind::InvalidInput,
            DirectoryError::LockObtainTimeout { .. } => ErrorKind::TimedOut,
            DirectoryError::Cache { source, .. } => source.kind(),
            _ => ErrorKind::Other,
        };
        std::io::Error::new(kind, err)
    }
}

/// Result type alias for directory operations.
pub type Result<T> = std::result::Result<T, DirectoryError>;
