//! The aggregator: dependency index, builder registry and caches behind one
//! handle.
//!
//! A layer request is served in four steps:
//!
//! 1. merge the configured `has` defaults under the request features;
//! 2. evict the cached layer if its captured dependency stamps no longer
//!    match the published tree;
//! 3. on a miss, expand the requested modules into their ordered closure and
//!    build every module through the module cache in parallel;
//! 4. optionally return the gzip variant.
//!
//! [`Aggregator::scan`] refreshes the dependency tree; [`Aggregator::reload`]
//! applies a new configuration and starts a new cache generation.

use crate::builder::{BuilderRegistry, ModuleBuild};
use crate::cache::{BuildOutcome, Cache, LayerArtifact, ModuleArtifact, layer_key};
use crate::config::AggregatorConfig;
use crate::constants::LAYER_SEPARATOR;
use crate::core::{AggregatorError, AggregatorResult};
use crate::deps::{DepIndex, DepScanner, DepTree, DependencyGraph, ScanStats};
use crate::request::RequestContext;
use crate::resource::{FileResourceProvider, ResourceProvider};
use anyhow::{Context, Result};
use futures::future::{BoxFuture, FutureExt};
use futures::stream::{self, StreamExt};
use regex::Regex;
use std::io::Write;
use std::sync::{Arc, PoisonError, RwLock};
use uuid::Uuid;

/// A served layer.
#[derive(Debug, Clone)]
pub struct LayerResponse {
    /// Layer cache key
    pub key: String,
    /// Response body (gzip-compressed when `gzip` is set)
    pub bytes: Vec<u8>,
    /// Whether `bytes` is gzip-compressed
    pub gzip: bool,
    /// Whether some module was replaced by an error artifact
    pub error: bool,
    /// SHA-256 of the uncompressed layer, hex encoded
    pub digest: String,
    /// Modules in output order
    pub modules: Vec<String>,
}

/// Module aggregator; see the module docs.
pub struct Aggregator {
    config: RwLock<Arc<AggregatorConfig>>,
    provider: Arc<dyn ResourceProvider>,
    builders: RwLock<Arc<BuilderRegistry>>,
    deps: DepIndex,
    cache: RwLock<Arc<Cache>>,
}

fn snapshot<T: ?Sized>(lock: &RwLock<Arc<T>>) -> Arc<T> {
    Arc::clone(&*lock.read().unwrap_or_else(PoisonError::into_inner))
}

fn publish<T: ?Sized>(lock: &RwLock<Arc<T>>, value: Arc<T>) -> Arc<T> {
    let mut guard = lock.write().unwrap_or_else(PoisonError::into_inner);
    std::mem::replace(&mut *guard, value)
}

impl Aggregator {
    /// Aggregator over `provider` with the builders named in the
    /// configuration.
    pub fn new(config: AggregatorConfig, provider: Arc<dyn ResourceProvider>) -> AggregatorResult<Self> {
        let builders = BuilderRegistry::from_config(&config.builders);
        Self::with_builders(config, provider, builders)
    }

    /// Aggregator over the configured `root` directory.
    pub fn from_config(config: AggregatorConfig) -> AggregatorResult<Self> {
        let provider = Arc::new(FileResourceProvider::new(config.root.clone()));
        Self::new(config, provider)
    }

    /// Aggregator with an explicit builder registry.
    pub fn with_builders(
        config: AggregatorConfig,
        provider: Arc<dyn ResourceProvider>,
        builders: BuilderRegistry,
    ) -> AggregatorResult<Self> {
        config.validate()?;
        let cache = Cache::with_pending_timeout(Uuid::new_v4(), config.pending_timeout());
        tracing::debug!(
            "Aggregator ready: builders [{}], cache control {}",
            builders.names().join(", "),
            cache.control()
        );
        Ok(Self {
            config: RwLock::new(Arc::new(config)),
            provider,
            builders: RwLock::new(Arc::new(builders)),
            deps: DepIndex::new(),
            cache: RwLock::new(Arc::new(cache)),
        })
    }

    /// Current configuration.
    pub fn config(&self) -> Arc<AggregatorConfig> {
        snapshot(&self.config)
    }

    /// Current cache generation.
    pub fn cache(&self) -> Arc<Cache> {
        snapshot(&self.cache)
    }

    /// Current builder registry.
    pub fn builders(&self) -> Arc<BuilderRegistry> {
        snapshot(&self.builders)
    }

    /// Published dependency tree.
    pub fn tree(&self) -> Arc<DepTree> {
        self.deps.current()
    }

    /// Resource provider.
    pub fn provider(&self) -> &Arc<dyn ResourceProvider> {
        &self.provider
    }

    /// Rescan the resources and publish the new dependency tree.
    ///
    /// # Errors
    ///
    /// Returns an error if the resources cannot be enumerated. Individual
    /// parse failures are logged and counted in the stats.
    pub async fn scan(&self) -> Result<ScanStats> {
        let options = self.config().scan_options()?;
        let previous = self.deps.current();
        let scanner = DepScanner::new(Arc::clone(&self.provider), options);
        let (tree, stats) = scanner.scan(Some(&previous)).await.context("Dependency scan failed")?;

        if !stats.advanced.is_empty() {
            let graph = DependencyGraph::from_tree(&tree);
            for module_id in &stats.advanced {
                let dependents = graph.dependents(module_id);
                if !dependents.is_empty() {
                    tracing::debug!(
                        target: "deps::scan",
                        "Dependency change in '{module_id}' affects {}",
                        dependents.join(", ")
                    );
                }
            }
        }

        self.deps.swap(tree);
        Ok(stats)
    }

    /// Apply a new configuration: rebuild the builder registry and start an
    /// empty cache generation. The resource provider is kept.
    pub fn reload(&self, config: AggregatorConfig) -> AggregatorResult<Uuid> {
        config.validate()?;
        let control = Uuid::new_v4();
        let cache = Cache::with_pending_timeout(control, config.pending_timeout());
        publish(&self.builders, Arc::new(BuilderRegistry::from_config(&config.builders)));
        publish(&self.config, Arc::new(config));
        let previous = publish(&self.cache, Arc::new(cache));
        tracing::info!(
            target: "cache",
            "Configuration reloaded; cache generation {} replaces {}",
            control,
            previous.control()
        );
        previous.clear();
        Ok(control)
    }

    /// Build one module for a request.
    pub async fn build_module(
        &self,
        module_id: &str,
        request: &RequestContext,
    ) -> AggregatorResult<Arc<ModuleArtifact>> {
        let request = self.effective_request(request);
        let tree = self.deps.current();
        let builders = self.builders();
        self.cache()
            .modules()
            .get_or_build(module_id, &request, &tree, &self.provider, &builders)
            .await
    }

    /// Ordered module list a layer request expands to.
    pub fn layer_modules(&self, request: &RequestContext) -> Vec<String> {
        let request = self.effective_request(request);
        expand(&request, &self.deps.current())
    }

    /// Serve a layer.
    ///
    /// # Errors
    ///
    /// - [`ProtocolViolation`](AggregatorError::ProtocolViolation) from any
    ///   builder;
    /// - a resource error for an explicitly requested module.
    ///
    /// Other module failures are replaced by error artifacts; the layer is
    /// then flagged as an error and not cached.
    pub async fn build_layer(&self, request: &RequestContext) -> AggregatorResult<LayerResponse> {
        if request.modules.is_empty() {
            return Err(AggregatorError::Other {
                message: "No modules requested".to_string(),
            });
        }
        let request = self.effective_request(request);
        let tree = self.deps.current();
        let cache = self.cache();
        let key = layer_key(&request);

        if let Some(stale) = cache.layers().evict_if_stale(&key, &tree) {
            cache.gzip().remove_layer(&stale.key);
        }

        let layer = cache
            .layers()
            .get_or_build(&key, || self.assemble(&key, &request, &tree, &cache))
            .await?;

        let (bytes, gzip) = if request.accept_gzip {
            (cache.gzip().get_or_compress(&layer).await?.as_ref().clone(), true)
        } else {
            (layer.content.clone(), false)
        };

        Ok(LayerResponse {
            key,
            bytes,
            gzip,
            error: layer.error,
            digest: layer.digest.clone(),
            modules: layer.modules.clone(),
        })
    }

    async fn assemble(
        &self,
        key: &str,
        request: &RequestContext,
        tree: &DepTree,
        cache: &Cache,
    ) -> AggregatorResult<BuildOutcome<LayerArtifact>> {
        let modules = expand(request, tree);
        let builders = self.builders();
        tracing::debug!(target: "cache::layer", "Assembling '{key}' from {} modules", modules.len());

        // in layer order, at most `parallelism` module builds at a time
        let parallelism = self.config().parallelism.max(1);
        let builds: Vec<BoxFuture<'_, _>> = modules
            .iter()
            .map(|module_id| cache.modules().get_or_build(module_id, request, tree, &self.provider, &builders).boxed())
            .collect();
        let results: Vec<_> = stream::iter(builds)
            .buffered(parallelism)
            .collect()
            .await;

        let mut error = false;
        let mut parts = Vec::with_capacity(modules.len());
        for (module_id, result) in modules.iter().zip(results) {
            match result {
                Ok(artifact) => {
                    error |= artifact.error;
                    parts.push(artifact.content.clone());
                }
                Err(failure) if failure.is_fatal() => return Err(failure),
                Err(failure)
                    if failure.is_resource_error() && request.modules.contains(module_id) =>
                {
                    return Err(failure);
                }
                Err(failure) => {
                    tracing::warn!(target: "cache::layer", "{failure}; substituting an error module");
                    error = true;
                    let fallback =
                        ModuleBuild::error_build(module_id, &failure.to_string(), request.export_names);
                    parts.push(fallback.content);
                }
            }
        }

        let stamps = tree.dependency_stamp(modules.as_slice());
        let content = parts.join(LAYER_SEPARATOR).into_bytes();
        let artifact = LayerArtifact::new(key, modules, stamps, content, error);
        Ok(if error {
            BuildOutcome::uncached(artifact)
        } else {
            BuildOutcome::cached(artifact)
        })
    }

    /// Write the current cache contents. `filter` is a regular expression
    /// matched against cache keys.
    pub fn dump(&self, sink: &mut dyn Write, filter: Option<&str>) -> AggregatorResult<()> {
        let filter = filter
            .map(|pattern| {
                Regex::new(pattern).map_err(|e| AggregatorError::InvalidFilter {
                    pattern: pattern.to_string(),
                    reason: e.to_string(),
                })
            })
            .transpose()?;
        self.cache().dump(sink, filter.as_ref()).map_err(|e| AggregatorError::Other {
            message: format!("Failed to write cache dump: {e}"),
        })
    }

    /// The request as served: static feature defaults merged in and the
    /// configured `expand_requires` applied.
    fn effective_request(&self, request: &RequestContext) -> RequestContext {
        let config = self.config();
        let mut effective = request.clone();
        effective.merge_defaults(&config.has);
        effective.expand_requires |= config.expand_requires;
        effective
    }
}

/// Modules a request pulls in, in output order without duplicates.
fn expand(request: &RequestContext, tree: &DepTree) -> Vec<String> {
    if request.expand_dependencies {
        tree.resolve_all(request.modules.as_slice(), &request.features, request.expand_requires)
    } else {
        let mut seen = std::collections::HashSet::new();
        request.modules.iter().filter(|m| seen.insert(m.as_str())).cloned().collect()
    }
}
