//! Per-name exclusive locks for in-process serialization.
//!
//! Every operation that touches a logical file (open, close, delete of
//! cache state) runs while holding that file's mutex. The registry only
//! takes its coarse lock for lookup-or-insert, so holding the mutex of one
//! name never blocks another.
//!
//! Entries are never evicted. The set of names is bounded by the files the
//! directory has ever touched.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Guard held for the duration of a per-name critical section.
pub type FileGuard = OwnedMutexGuard<()>;

/// Registry of per-name async mutexes, owned by one directory.
#[derive(Debug, Default)]
pub struct FileMutexes {
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl FileMutexes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the mutex for `name`, creating it on first use.
    ///
    /// Every caller asking for the same name gets the same mutex.
    pub fn handle(&self, name: &str) -> Arc<AsyncMutex<()>> {
        self.locks
            .lock()
            .entry(name.to_string())
            .or_default()
            .clone()
    }

    /// Wait for exclusive access to `name`.
    pub async fn lock(&self, name: &str) -> FileGuard {
        self.handle(name).lock_owned().await
    }

    /// Number of names seen so far.
    pub fn len(&self) -> usize {
        self.locks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.lock().is_empty()
    }
}
