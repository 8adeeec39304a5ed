//! In-process resource provider for embedders and tests.

use super::{Resource, ResourceProvider, ResourceRef};
use crate::core::{AggregatorError, AggregatorResult};
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Resources held in a sorted map, keyed by URI.
///
/// Clones share the same map, so a test can keep a handle and edit sources
/// while an aggregator owns another.
#[derive(Debug, Clone, Default)]
pub struct MemoryResourceProvider {
    resources: Arc<RwLock<BTreeMap<String, Resource>>>,
}

impl MemoryResourceProvider {
    /// Create an empty provider.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a resource.
    pub fn insert(&self, uri: impl Into<String>, content: impl Into<Vec<u8>>, last_modified: i64) {
        let resource = Resource::new(uri, content, last_modified);
        self.write().insert(resource.uri.clone(), resource);
    }

    /// Remove a resource, returning it if present.
    pub fn remove(&self, uri: &str) -> Option<Resource> {
        self.write().remove(uri)
    }

    /// Number of resources.
    pub fn len(&self) -> usize {
        self.read_map().len()
    }

    /// Whether the provider holds no resources.
    pub fn is_empty(&self) -> bool {
        self.read_map().is_empty()
    }

    // A poisoned lock only means a writer panicked between two map calls; the
    // map itself is always consistent.
    fn read_map(&self) -> RwLockReadGuard<'_, BTreeMap<String, Resource>> {
        self.resources.read().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<String, Resource>> {
        self.resources.write().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl ResourceProvider for MemoryResourceProvider {
    fn read(&self, uri: &str) -> AggregatorResult<Resource> {
        self.read_map().get(uri).cloned().ok_or_else(|| AggregatorError::ResourceNotFound {
            uri: uri.to_string(),
        })
    }

    fn stat(&self, uri: &str) -> AggregatorResult<ResourceRef> {
        self.read_map().get(uri).map(Resource::reference).ok_or_else(|| {
            AggregatorError::ResourceNotFound {
                uri: uri.to_string(),
            }
        })
    }

    fn visit(&self, root: &str, visitor: &mut dyn FnMut(ResourceRef)) -> AggregatorResult<()> {
        let prefix = match root.trim_end_matches('/') {
            "" => String::new(),
            dir => format!("{dir}/"),
        };
        // snapshot first so the visitor may call back into the provider
        let refs: Vec<ResourceRef> = self
            .read_map()
            .values()
            .filter(|r| r.uri.starts_with(&prefix))
            .map(Resource::reference)
            .collect();
        refs.into_iter().for_each(visitor);
        Ok(())
    }
}
