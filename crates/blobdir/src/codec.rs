//! Optional payload transforms between the local cache and the remote store.
//!
//! The cache always holds plain bytes. When a codec applies to a name, the
//! remote object holds the encoded bytes and `CachedLength` still records
//! the plain length.

use std::fmt;
use std::io::{self, Read, Write};
use std::sync::Arc;

use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;

use crate::config::CompressionConfig;

/// Large, compressible index file kinds.
pub const DEFAULT_COMPRESSED_EXTENSIONS: &[&str] = &[
    "cfs", "fdt", "fdx", "frq", "tis", "tii", "nrm", "tvx", "tvd", "tvf", "prx",
];

/// Suffix of the cache entry holding an encoded payload in flight.
pub const STAGING_SUFFIX: &str = ".blob";

/// Cache name used to stage the encoded payload of `name`.
pub fn staging_name(name: &str) -> String {
    format!("{}{}", name, STAGING_SUFFIX)
}

/// A reversible byte transform.
pub trait PayloadCodec: Send + Sync + fmt::Debug {
    fn name(&self) -> &'static str;

    fn encode(&self, plain: &[u8]) -> io::Result<Vec<u8>>;

    fn decode(&self, encoded: &[u8]) -> io::Result<Vec<u8>>;
}

/// Raw deflate (no zlib or gzip framing).
#[derive(Debug, Clone, Copy)]
pub struct Deflate {
    level: Compression,
}

impl Deflate {
    pub fn new(level: u32) -> Self {
        Self {
            level: Compression::new(level.min(9)),
        }
    }
}

impl Default for Deflate {
    fn default() -> Self {
        Self {
            level: Compression::default(),
        }
    }
}

impl PayloadCodec for Deflate {
    fn name(&self) -> &'static str {
        "deflate"
    }

    fn encode(&self, plain: &[u8]) -> io::Result<Vec<u8>> {
        let mut encoder = DeflateEncoder::new(Vec::with_capacity(plain.len() / 2), self.level);
        encoder.write_all(plain)?;
        encoder.finish()
    }

    fn decode(&self, encoded: &[u8]) -> io::Result<Vec<u8>> {
        let mut plain = Vec::with_capacity(encoded.len() * 2);
        DeflateDecoder::new(encoded).read_to_end(&mut plain)?;
        Ok(plain)
    }
}

/// Chooses the codec, if any, for a file name.
#[derive(Debug, Clone, Default)]
pub struct CodecPolicy {
    codec: Option<Arc<dyn PayloadCodec>>,
    extensions: Vec<String>,
}

impl CodecPolicy {
    /// A policy that never transforms anything.
    pub fn none() -> Self {
        Self::default()
    }

    /// Apply `codec` to names with one of `extensions` (matched without case).
    pub fn by_extension<I, S>(codec: Arc<dyn PayloadCodec>, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            codec: Some(codec),
            extensions: extensions
                .into_iter()
                .map(|ext| ext.as_ref().trim_start_matches('.').to_ascii_lowercase())
                .collect(),
        }
    }

    pub fn from_config(config: &CompressionConfig) -> Self {
        if !config.enabled {
            return Self::none();
        }
        Self::by_extension(Arc::new(Deflate::new(config.level)), &config.extensions)
    }

    /// The codec to use for `name`, if any.
    pub fn codec_for(&self, name: &str) -> Option<&dyn PayloadCodec> {
        let codec = self.codec.as_deref()?;
        let (_, ext) = name.rsplit_once('.')?;
        let ext = ext.to_ascii_lowercase();
        self.extensions.iter().any(|e| *e == ext).then_some(codec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deflate_shrinks_repetitive_data() {
        let codec = Deflate::new(6);
        let plain = b"term term term term term term term term term term".repeat(50);

        let encoded = codec.encode(&plain).unwrap();
        assert!(encoded.len() < plain.len() / 4);
        assert_eq!(codec.decode(&encoded).unwrap(), plain);
    }

    #[test]
    fn test_deflate_rejects_garbage() {
        let codec = Deflate::default();
        assert!(codec.decode(&[0xff; 16]).is_err());
    }

    #[test]
    fn test_policy_matches_extension_case_insensitively() {
        let policy = CodecPolicy::by_extension(Arc::new(Deflate::default()), ["cfs", ".FDT"]);

        assert!(policy.codec_for("_0.cfs").is_some());
        assert!(policy.codec_for("_0.CFS").is_some());
        assert!(policy.codec_for("_3.fdt").is_some());
        assert!(policy.codec_for("segments_1").is_none());
        assert!(policy.codec_for("_0.del").is_none());
        assert!(CodecPolicy::none().codec_for("_0.cfs").is_none());
    }

    #[test]
    fn test_policy_from_config() {
        let mut config = CompressionConfig::default();
        assert!(CodecPolicy::from_config(&config).codec_for("_0.cfs").is_none());

        config.enabled = true;
        let policy = CodecPolicy::from_config(&config);
        assert_eq!(policy.codec_for("_0.tis").map(|c| c.name()), Some("deflate"));
        assert!(policy.codec_for("segments.gen").is_none());
    }

    #[test]
    fn test_staging_name() {
        assert_eq!(staging_name("_0.cfs"), "_0.cfs.blob");
    }
}
