//! Assembled layer cache.
//!
//! A layer is the ordered concatenation of module builds for one request.
//! Each artifact records the effective dependency time of every module it
//! contains; a lookup compares those stamps with the current tree and evicts
//! the entry on any mismatch. Staleness is detected by comparison only.

use super::build_cache::{BuildCache, BuildOutcome, CacheStats};
use crate::constants::{LAYER_KEY_PREFIX, NOT_PARSED};
use crate::core::AggregatorResult;
use crate::deps::DepTree;
use crate::request::RequestContext;
use chrono::{DateTime, Utc};
use regex::Regex;
use sha2::{Digest, Sha256};
use std::future::Future;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// One assembled layer.
#[derive(Debug, Clone)]
pub struct LayerArtifact {
    /// Unique per build; ties gzip variants to this exact artifact
    pub id: Uuid,
    /// Layer cache key
    pub key: String,
    /// Modules in output order
    pub modules: Vec<String>,
    /// `(module, effective dependency time)` captured at build time
    pub stamps: Vec<(String, i64)>,
    /// Layer bytes
    pub content: Vec<u8>,
    /// SHA-256 of `content`, hex encoded
    pub digest: String,
    /// Some module in the layer is an error artifact
    pub error: bool,
    /// Build time
    pub created: DateTime<Utc>,
}

impl LayerArtifact {
    /// New artifact with a fresh id and computed digest.
    pub fn new(
        key: impl Into<String>,
        modules: Vec<String>,
        stamps: Vec<(String, i64)>,
        content: Vec<u8>,
        error: bool,
    ) -> Self {
        let digest = hex::encode(Sha256::digest(&content));
        Self {
            id: Uuid::new_v4(),
            key: key.into(),
            modules,
            stamps,
            content,
            digest,
            error,
            created: Utc::now(),
        }
    }

    /// Whether every captured stamp still matches the tree.
    pub fn is_current(&self, tree: &DepTree) -> bool {
        self.stamps.iter().all(|(module_id, stamp)| {
            tree.effective_dependency_time(module_id).unwrap_or(NOT_PARSED) == *stamp
        })
    }
}

/// Layer cache key for a request (features already merged with defaults).
/// Module ids are written as a JSON array so separators inside an id cannot
/// make two module lists collide.
pub fn layer_key(request: &RequestContext) -> String {
    format!(
        "{LAYER_KEY_PREFIX}{}|features:{}|{}",
        serde_json::Value::from(request.modules.clone()),
        request.feature_fragment(),
        request.transport_fragment()
    )
}

/// Cache of assembled layers.
pub struct LayerCache {
    cache: BuildCache<LayerArtifact>,
}

impl LayerCache {
    /// Empty layer cache.
    pub fn new(pending_timeout: Duration) -> Self {
        Self {
            cache: BuildCache::new("layers", pending_timeout),
        }
    }

    /// Remove the entry for `key` when its stamps no longer match the tree.
    /// Returns the evicted artifact.
    pub fn evict_if_stale(&self, key: &str, tree: &DepTree) -> Option<Arc<LayerArtifact>> {
        let cached = self.cache.get(key)?;
        if cached.is_current(tree) {
            return None;
        }
        if self.cache.remove_if(key, |artifact| artifact.id == cached.id) {
            tracing::warn!(
                target: "cache::layer",
                "Layer '{key}' is stale (dependency times changed); evicted"
            );
            Some(cached)
        } else {
            None
        }
    }

    /// Return the layer for `key`, assembling it with `build` on a miss.
    pub async fn get_or_build<F, Fut>(&self, key: &str, build: F) -> AggregatorResult<Arc<LayerArtifact>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = AggregatorResult<BuildOutcome<LayerArtifact>>>,
    {
        self.cache.get_or_build(key, build).await
    }

    /// Cached layer by key.
    pub fn get(&self, key: &str) -> Option<Arc<LayerArtifact>> {
        self.cache.get(key)
    }

    /// Cached keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        self.cache.keys()
    }

    /// Drop every layer.
    pub fn clear(&self) {
        self.cache.clear();
    }

    /// Number of cached layers.
    pub fn len(&self) -> usize {
        self.cache.len()
    }

    /// Whether no layer is cached.
    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    /// Counters.
    pub fn stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Write cached layers matching `filter`.
    pub fn dump(&self, sink: &mut dyn Write, filter: Option<&Regex>) -> std::io::Result<()> {
        self.cache.dump(sink, filter, |layer| {
            format!(
                "id={} modules={} bytes={} sha256={}",
                layer.id,
                layer.modules.len(),
                layer.content.len(),
                &layer.digest[..12]
            )
        })
    }
}
