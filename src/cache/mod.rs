//! In-memory build caches.
//!
//! Three caches sit behind one [`Cache`] container:
//!
//! - [`ModuleCache`]: built modules, keyed by module id, builder key
//!   contribution and dependency/content stamp;
//! - [`LayerCache`]: assembled layers, keyed by requested modules, features
//!   and transport options, validated against the dependency tree on lookup;
//! - [`GzipCache`]: compressed layer bytes, tied to one layer artifact.
//!
//! All three share [`BuildCache`], a `DashMap` of `Pending(Notify)` / `Ready`
//! entries that runs at most one build per key and lets every concurrent
//! requester share its outcome. A [`Cache`] is one configuration generation:
//! the aggregator swaps in a new container with a fresh control token when it
//! reloads its configuration.

pub mod build_cache;
pub mod gzip_cache;
pub mod layer_cache;
pub mod module_cache;

pub use build_cache::{BuildCache, BuildOutcome, CacheEntry, CacheStats};
pub use gzip_cache::{GzipCache, gzip_key};
pub use layer_cache::{LayerArtifact, LayerCache, layer_key};
pub use module_cache::{ModuleArtifact, ModuleCache};

use crate::constants::PENDING_STATE_TIMEOUT;
use chrono::{DateTime, Utc};
use regex::Regex;
use std::io::Write;
use std::time::Duration;
use uuid::Uuid;

/// One generation of the module, layer and gzip caches.
pub struct Cache {
    modules: ModuleCache,
    layers: LayerCache,
    gzip: GzipCache,
    control: Uuid,
    created: DateTime<Utc>,
}

impl Cache {
    /// Empty caches for the configuration generation `control`.
    pub fn new(control: Uuid) -> Self {
        Self::with_pending_timeout(control, PENDING_STATE_TIMEOUT)
    }

    /// Empty caches whose waiters warn every `pending_timeout`.
    pub fn with_pending_timeout(control: Uuid, pending_timeout: Duration) -> Self {
        Self {
            modules: ModuleCache::new(pending_timeout),
            layers: LayerCache::new(pending_timeout),
            gzip: GzipCache::new(pending_timeout),
            control,
            created: Utc::now(),
        }
    }

    /// Built modules.
    pub const fn modules(&self) -> &ModuleCache {
        &self.modules
    }

    /// Assembled layers.
    pub const fn layers(&self) -> &LayerCache {
        &self.layers
    }

    /// Compressed layers.
    pub const fn gzip(&self) -> &GzipCache {
        &self.gzip
    }

    /// Configuration generation token.
    pub const fn control(&self) -> Uuid {
        self.control
    }

    /// When this generation was created.
    pub const fn created(&self) -> DateTime<Utc> {
        self.created
    }

    /// Empty all three caches.
    pub fn clear(&self) {
        self.layers.clear();
        self.modules.clear();
        self.gzip.clear();
        tracing::info!(target: "cache", "Cleared caches (control {})", self.control);
    }

    /// Dump layers, modules and gzip entries, in that order.
    pub fn dump(&self, sink: &mut dyn Write, filter: Option<&Regex>) -> std::io::Result<()> {
        writeln!(sink, "control={} created={}", self.control, self.created.to_rfc3339())?;
        self.layers.dump(sink, filter)?;
        self.modules.dump(sink, filter)?;
        self.gzip.dump(sink, filter)
    }
}

impl std::fmt::Debug for Cache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cache")
            .field("control", &self.control)
            .field("created", &self.created)
            .field("layers", &self.layers.len())
            .field("modules", &self.modules.len())
            .field("gzip", &self.gzip.len())
            .finish()
    }
}
