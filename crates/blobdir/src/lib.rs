//! A virtual directory of files kept in a shared remote blob store and
//! mirrored in a local cache.
//!
//! - Reads always refetch the remote object, then serve bytes from the cache.
//! - Writes go to the cache and are uploaded when the writer is closed,
//!   together with the file's logical length as metadata.
//! - Operations on one name are serialized within a directory.
//! - Processes coordinate writers through [`DistributedLock`], a renewable
//!   lease on a remote lock object.
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use blob_store::BlobStore;
//! use blobdir::{DirectoryConfig, VirtualDirectory};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(BlobStore::new_local("/srv/blobdir".as_ref()).await?);
//! let dir = VirtualDirectory::open(store, DirectoryConfig::new("products")).await?;
//!
//! let lock = dir.make_lock("write.lock");
//! lock.obtain(Duration::from_secs(5)).await?;
//!
//! let mut out = dir.create_output("segments_1").await?;
//! out.write_bytes(b"segment header").await?;
//! out.close().await?;
//!
//! lock.release().await?;
//! assert_eq!(dir.file_length("segments_1").await?, 14);
//! # Ok(())
//! # }
//! ```

mod cache;
mod codec;
mod config;
mod directory;
mod error;
mod lock;
mod mutex;
mod reader;
mod writer;

pub use cache::LocalCache;
pub use codec::{CodecPolicy, Deflate, PayloadCodec, DEFAULT_COMPRESSED_EXTENSIONS};
pub use config::{CompressionConfig, DirectoryConfig, LeaseConfig, DEFAULT_CATALOG};
pub use directory::VirtualDirectory;
pub use error::{DirectoryError, Result};
pub use lock::DistributedLock;
pub use mutex::{FileGuard, FileMutexes};
pub use reader::CachedReader;
pub use writer::{CachedWriter, CACHED_LENGTH_KEY};
