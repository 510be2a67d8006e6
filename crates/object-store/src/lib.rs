//! SQLite + Object Storage Remote Blob Store
//!
//! This crate provides the remote side of a cached blob directory: a store
//! of named objects grouped into containers, each object carrying custom
//! string metadata and supporting exclusive, expiring leases.
//!
//! # Features
//!
//! - SQLite for containers, object metadata and lease records
//! - Multiple content backends: S3, MinIO, local filesystem, in-memory
//! - Leases with wall-clock expiry, so every process sharing the metadata
//!   database agrees on who holds an object
//!
//! # Example
//!
//! ```rust,no_run
//! use blob_store::{BlobStore, RemoteBlobStore};
//! use std::path::Path;
//!
//! # async fn example() -> Result<(), blob_store::StoreError> {
//! let store = BlobStore::new_local(Path::new("/tmp/blobs")).await?;
//! store.create_container("index").await?;
//! store.upload("index", "segments_1", "hello".into()).await?;
//! # Ok(())
//! # }
//! ```

mod blob_store;
mod database;
mod error;
mod remote;
mod storage;

pub use blob_store::BlobStore;
pub use error::{Result, StoreError};
pub use remote::{BlobProperties, LeaseId, RemoteBlobStore};
pub use storage::{ObjectStoreConfig, RemoteConfig};
