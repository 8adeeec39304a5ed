//! Gzip variants of cached layers.

use super::build_cache::{BuildCache, BuildOutcome, CacheStats};
use super::layer_cache::LayerArtifact;
use crate::constants::GZIP_KEY_PREFIX;
use crate::core::{AggregatorError, AggregatorResult};
use flate2::Compression;
use flate2::write::GzEncoder;
use regex::Regex;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

/// Gzip key for one layer artifact: `gzip:<layer key>#<artifact id>`.
pub fn gzip_key(layer: &LayerArtifact) -> String {
    format!("{GZIP_KEY_PREFIX}{}#{}", layer.key, layer.id)
}

/// Compress bytes with the default gzip level.
pub fn compress(content: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::with_capacity(content.len() / 2), Compression::default());
    encoder.write_all(content)?;
    encoder.finish()
}

/// Cache of compressed layer bytes.
pub struct GzipCache {
    cache: BuildCache<Vec<u8>>,
}

impl GzipCache {
    /// Empty gzip cache.
    pub fn new(pending_timeout: Duration) -> Self {
        Self {
            cache: BuildCache::new("gzip", pending_timeout),
        }
    }

    /// Compressed bytes for a layer artifact. Error layers are compressed but
    /// never stored.
    pub async fn get_or_compress(&self, layer: &Arc<LayerArtifact>) -> AggregatorResult<Arc<Vec<u8>>> {
        let key = gzip_key(layer);
        let cacheable = !layer.error;
        self.cache
            .get_or_build(&key, || async {
                let source = Arc::clone(layer);
                let compressed = tokio::task::spawn_blocking(move || compress(&source.content))
                    .await
                    .map_err(|e| AggregatorError::Other {
                        message: format!("gzip task failed: {e}"),
                    })?
                    .map_err(|e| AggregatorError::Other {
                        message: format!("gzip failed for layer '{}': {e}", layer.key),
                    })?;
                tracing::debug!(
                    target: "cache::gzip",
                    "Compressed layer '{}' {} -> {} bytes",
                    layer.key,
                    layer.content.len(),
                    compressed.len()
                );
                Ok(if cacheable {
                    BuildOutcome::cached(compressed)
                } else {
                    BuildOutcome::uncached(compressed)
                })
            })
            .await
    }

    /// Remove every variant of a layer key.
    pub fn remove_layer(&self, layer_key: &str) {
        let prefix = format!("{GZIP_KEY_PREFIX}{layer_key}#");
        self.cache.retain(|key, _| !key.starts_with(&prefix));
    }

    /// Cached bytes by gzip key.
    pub fn get(&self, key: &str) -> Option<Arc<Vec<u8>>> {
        self.cache.get(key)
    }

    /// Cached keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        self.cache.keys()
    }

    /// Drop every entry.
    pub fn clear(&self) {
        self.cache.clear();
    }

    /// Number of cached entries.
    pub fn len(&self) -> usize {
        self.cache.len()
    }

    /// Whether nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    /// Counters.
    pub fn stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Write cached entries matching `filter`.
    pub fn dump(&self, sink: &mut dyn Write, filter: Option<&Regex>) -> std::io::Result<()> {
        self.cache.dump(sink, filter, |bytes| format!("bytes={}", bytes.len()))
    }
}
