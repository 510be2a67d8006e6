//! Directory configuration, loadable from TOML.
//!
//! ```toml
//! catalog = "products"
//! cache_dir = "/var/cache/blobdir/products"
//! lock_poll_interval = 500
//!
//! [lease]
//! duration = 60000
//! renew_interval = 30000
//!
//! [compression]
//! enabled = true
//! level = 6
//!
//! [remote]
//! metadata_db = "/srv/blobdir/blobs.db"
//!
//! [remote.storage]
//! type = "local"
//! path = "/srv/blobdir/objects"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use blob_store::RemoteConfig;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds};

use crate::error::{DirectoryError, Result};

pub const DEFAULT_CATALOG: &str = "index";

/// Lease timing for distributed locks.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LeaseConfig {
    /// How long an acquired lease stays valid without renewal
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub duration: Duration,
    /// How often a held lease is renewed. Must be shorter than `duration`.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub renew_interval: Duration,
}

impl Default for LeaseConfig {
    fn default() -> Self {
        Self {
            duration: Duration::from_secs(60),
            renew_interval: Duration::from_secs(30),
        }
    }
}

/// Optional compression of remote payloads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressionConfig {
    pub enabled: bool,
    /// Deflate level, 0-9
    pub level: u32,
    /// File extensions (without the dot) that get compressed
    pub extensions: Vec<String>,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            level: 6,
            extensions: crate::codec::DEFAULT_COMPRESSED_EXTENSIONS
                .iter()
                .map(|ext| ext.to_string())
                .collect(),
        }
    }
}

/// Configuration of one [`VirtualDirectory`](crate::VirtualDirectory).
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectoryConfig {
    /// Catalog name, used (lower-cased) as the remote container name
    pub catalog: String,
    /// Local cache directory. Defaults to `<tmp>/blobdir/<catalog>`.
    pub cache_dir: Option<PathBuf>,
    pub lease: LeaseConfig,
    /// Delay between attempts when blocking on a lock
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub lock_poll_interval: Duration,
    pub compression: CompressionConfig,
    pub remote: RemoteConfig,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            catalog: DEFAULT_CATALOG.to_string(),
            cache_dir: None,
            lease: LeaseConfig::default(),
            lock_poll_interval: Duration::from_secs(1),
            compression: CompressionConfig::default(),
            remote: RemoteConfig::default(),
        }
    }
}

impl DirectoryConfig {
    pub fn new(catalog: impl Into<String>) -> Self {
        Self {
            catalog: catalog.into(),
            ..Default::default()
        }
    }

    pub fn with_cache_dir(mut self, cache_dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = Some(cache_dir.into());
        self
    }

    pub fn with_lease(mut self, duration: Duration, renew_interval: Duration) -> Self {
        self.lease = LeaseConfig {
            duration,
            renew_interval,
        };
        self
    }

    pub fn with_lock_poll_interval(mut self, interval: Duration) -> Self {
        self.lock_poll_interval = interval;
        self
    }

    pub fn with_compression(mut self, enabled: bool) -> Self {
        self.compression.enabled = enabled;
        self
    }

    /// Parse a configuration from a TOML document and validate it.
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(s).map_err(|e| DirectoryError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration from a TOML file and validate it.
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| DirectoryError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&contents)
    }

    /// Name of the remote container backing this catalog.
    pub fn container(&self) -> String {
        self.catalog.to_lowercase()
    }

    /// Resolved local cache directory.
    pub fn cache_path(&self) -> PathBuf {
        match &self.cache_dir {
            Some(dir) => dir.clone(),
            None => std::env::temp_dir().join("blobdir").join(self.container()),
        }
    }

    pub fn validate(&self) -> Result<()> {
        let container = self.container();
        if container.is_empty() || container.contains(['/', '\\']) {
            return Err(DirectoryError::Config(format!(
                "catalog name {:?} is not a valid container name",
                self.catalog
            )));
        }
        if self.lease.duration.is_zero() || self.lease.renew_interval.is_zero() {
            return Err(DirectoryError::Config(
                "lease duration and renew interval must be non-zero".to_string(),
            ));
        }
        if self.lease.renew_interval >= self.lease.duration {
            return Err(DirectoryError::Config(format!(
                "lease renew interval {:?} must be shorter than the lease duration {:?}",
                self.lease.renew_interval, self.lease.duration
            )));
        }
        if self.lock_poll_interval.is_zero() {
            return Err(DirectoryError::Config(
                "lock poll interval must be non-zero".to_string(),
            ));
        }
        if self.compression.level > 9 {
            return Err(DirectoryError::Config(format!(
                "compression level {} is out of range 0-9",
                self.compression.level
            )));
        }
        Ok(())
    }
}
