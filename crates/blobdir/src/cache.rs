//! Local on-disk mirror of remote file content.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use tokio::fs;

use crate::error::{DirectoryError, Result};

/// A flat directory of cache entries, one file per logical name.
#[derive(Debug, Clone)]
pub struct LocalCache {
    root: PathBuf,
}

/// Reject anything that is not a plain file name.
pub(crate) fn validate_name(name: &str) -> Result<()> {
    if name.is_empty()
        || name == "."
        || name == ".."
        || name.contains(['/', '\\', '\0'])
    {
        return Err(DirectoryError::InvalidName(name.to_string()));
    }
    Ok(())
}

impl LocalCache {
    /// Open a cache rooted at `root`, creating the directory if needed.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)
            .await
            .map_err(|e| DirectoryError::cache("create", &root.display().to_string(), e))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the cache entry for `name`.
    pub fn path(&self, name: &str) -> Result<PathBuf> {
        validate_name(name)?;
        Ok(self.root.join(name))
    }

    pub async fn exists(&self, name: &str) -> Result<bool> {
        let path = self.path(name)?;
        fs::try_exists(&path)
            .await
            .map_err(|e| DirectoryError::cache("exists", name, e))
    }

    /// Names of all cache entries, sorted.
    pub async fn list(&self) -> Result<Vec<String>> {
        let root = self.root.display().to_string();
        let mut entries = fs::read_dir(&self.root)
            .await
            .map_err(|e| DirectoryError::cache("list", &root, e))?;

        let mut names = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| DirectoryError::cache("list", &root, e))?
        {
            let is_file = entry
                .file_type()
                .await
                .map(|t| t.is_file())
                .unwrap_or(false);
            if is_file {
                if let Some(name) = entry.file_name().to_str() {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    /// Remove an entry. Absence is not an error; returns whether a file was removed.
    pub async fn delete(&self, name: &str) -> Result<bool> {
        let path = self.path(name)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(DirectoryError::cache("delete", name, e)),
        }
    }

    /// Replace the entry's content.
    pub async fn write(&self, name: &str, data: &[u8]) -> Result<()> {
        let path = self.path(name)?;
        fs::write(&path, data)
            .await
            .map_err(|e| DirectoryError::cache("write", name, e))
    }

    pub async fn read(&self, name: &str) -> Result<Bytes> {
        let path = self.path(name)?;
        fs::read(&path)
            .await
            .map(Bytes::from)
            .map_err(|e| DirectoryError::cache("read", name, e))
    }

    /// Create or truncate the entry and open it for writing.
    pub async fn create(&self, name: &str) -> Result<fs::File> {
        let path = self.path(name)?;
        fs::File::create(&path)
            .await
            .map_err(|e| DirectoryError::cache("create", name, e))
    }

    /// Move entry `from` onto `to`, replacing `to` if present.
    pub async fn rename(&self, from: &str, to: &str) -> Result<()> {
        let source = self.path(from)?;
        let target = self.path(to)?;
        fs::rename(&source, &target)
            .await
            .map_err(|e| DirectoryError::cache("rename", from, e))
    }

    /// Size of the entry on disk.
    pub async fn len(&self, name: &str) -> Result<u64> {
        let path = self.path(name)?;
        fs::metadata(&path)
            .await
            .map(|m| m.len())
            .map_err(|e| DirectoryError::cache("stat", name, e))
    }

    /// Remove every entry. Returns how many were removed.
    pub async fn clear(&self) -> Result<usize> {
        let mut removed = 0;
        for name in self.list().await? {
            if self.delete(&name).await? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Drop any local state left behind for a lock name.
    pub async fn clear_lock(&self, name: &str) -> Result<()> {
        self.delete(name).await.map(|_| ())
    }
}
