//! Built module cache.
//!
//! Keys are `module id | builder key contribution @ stamp`, where the stamp is
//! `"{dependency time}/{content last_modified}"`. The dependency time
//! invalidates a module when anything it depends on changes its dependency
//! list; the content time invalidates it when its own body changes.
//!
//! Before a module's first build the builder may only offer provisional key
//! generators. The key built from them is used to single-flight the first
//! build, and the artifact is stored under both that key and the final key
//! derived from the generators the build returned. The final generators are
//! remembered per module (together with the stamp they were computed for) and
//! used for every later lookup. Another build for the same stamp merges its
//! generators into the remembered ones, class by class, so the key covers
//! everything either build depended on.
//!
//! Both of those stores happen outside the build slot, so they carry the
//! cache generation they started in; [`ModuleCache::clear`] bumps it and a
//! build that straddles a clear stores nothing.

use super::build_cache::{BuildCache, BuildOutcome, CacheStats};
use crate::builder::{BuilderContext, BuilderRegistry, ModuleBuild, ModuleBuilder};
use crate::constants::NOT_PARSED;
use crate::core::{AggregatorError, AggregatorResult};
use crate::deps::DepTree;
use crate::keygen::{KeyGen, combine_all, describe, has_provisional, module_key};
use crate::request::RequestContext;
use crate::resource::{ResourceProvider, ResourceRef, module_uri};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use regex::Regex;
use std::io::Write;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// One built module.
#[derive(Debug, Clone)]
pub struct ModuleArtifact {
    /// Module id
    pub module_id: String,
    /// Built JavaScript
    pub content: String,
    /// Final cache key
    pub key: String,
    /// Builder that produced the content
    pub builder: String,
    /// Error artifact (never cached)
    pub error: bool,
    /// Build time
    pub created: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct RememberedGenerators {
    stamp: String,
    generators: Vec<KeyGen>,
    generation: u64,
}

/// Cache of built modules.
pub struct ModuleCache {
    cache: BuildCache<ModuleArtifact>,
    generators: DashMap<String, RememberedGenerators>,
    generation: AtomicU64,
}

impl ModuleCache {
    /// Empty module cache.
    pub fn new(pending_timeout: Duration) -> Self {
        Self {
            cache: BuildCache::new("modules", pending_timeout),
            generators: DashMap::new(),
            generation: AtomicU64::new(0),
        }
    }

    /// Return the built module, building it when no entry matches.
    ///
    /// Errors are returned for resource failures (not found, unreadable, no
    /// builder) and for protocol violations. A builder that fails or panics
    /// yields an uncached error artifact instead.
    pub async fn get_or_build(
        &self,
        module_id: &str,
        request: &RequestContext,
        tree: &DepTree,
        provider: &Arc<dyn ResourceProvider>,
        builders: &BuilderRegistry,
    ) -> AggregatorResult<Arc<ModuleArtifact>> {
        let uri = module_uri(module_id);
        let reference = {
            let provider = Arc::clone(provider);
            let target = uri.clone();
            tokio::task::spawn_blocking(move || provider.stat(&target)).await.map_err(|e| {
                AggregatorError::ProviderFailure {
                    uri: uri.clone(),
                    reason: e.to_string(),
                }
            })??
        };

        let builder = builders.select(module_id, &reference).ok_or_else(|| {
            AggregatorError::NoBuilder {
                module: module_id.to_string(),
            }
        })?;

        let dep_time = tree.effective_dependency_time(module_id).unwrap_or(NOT_PARSED);
        let stamp = format!("{dep_time}/{}", reference.last_modified);
        let generators = self.generators_for(module_id, &stamp, tree, &reference, builder.as_ref());
        let key = module_key(module_id, &generators, request, &stamp);
        let generation = self.generation.load(Ordering::SeqCst);

        let artifact = self
            .cache
            .get_or_build(&key, || {
                self.build(
                    module_id,
                    &uri,
                    &stamp,
                    generation,
                    request,
                    generators.clone(),
                    Arc::clone(provider),
                    Arc::clone(&builder),
                )
            })
            .await?;

        if !artifact.error && artifact.key != key && self.is_current(generation) {
            let ours = |stored: &ModuleArtifact| std::ptr::eq(stored, Arc::as_ptr(&artifact));
            // Final generators narrower than the build needed: the lookup key
            // is too coarse to hold this artifact. Provisional keys are not.
            if !has_provisional(&generators) {
                self.cache.remove_if(&key, ours);
            }
            self.cache.insert(&artifact.key, Arc::clone(&artifact));
            // a clear() that ran after the check above has to win
            if !self.is_current(generation) {
                self.cache.remove_if(&artifact.key, ours);
            }
        }
        Ok(artifact)
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    /// Remember the final generators a build returned, merged with those
    /// already remembered for the same stamp, and return the generators the
    /// artifact is keyed on. Nothing is remembered when the cache was cleared
    /// since the build started.
    fn remember(&self, module_id: &str, stamp: &str, generators: Vec<KeyGen>, generation: u64) -> Vec<KeyGen> {
        if !self.is_current(generation) {
            return generators;
        }
        let merged = match self.generators.entry(module_id.to_string()) {
            Entry::Occupied(mut entry) => {
                let merged = if entry.get().stamp == stamp {
                    combine_all(&entry.get().generators, &generators)
                } else {
                    generators
                };
                entry.insert(RememberedGenerators {
                    stamp: stamp.to_string(),
                    generators: merged.clone(),
                    generation,
                });
                merged
            }
            Entry::Vacant(entry) => {
                entry.insert(RememberedGenerators {
                    stamp: stamp.to_string(),
                    generators: generators.clone(),
                    generation,
                });
                generators
            }
        };
        if !self.is_current(generation) {
            self.generators.remove_if(module_id, |_, r| r.generation == generation);
        }
        merged
    }

    /// Key generators for a lookup: the remembered final ones when they were
    /// computed for this stamp, otherwise the builder's pre-build ones.
    fn generators_for(
        &self,
        module_id: &str,
        stamp: &str,
        tree: &DepTree,
        reference: &ResourceRef,
        builder: &dyn ModuleBuilder,
    ) -> Vec<KeyGen> {
        if let Some(remembered) = self.generators.get(module_id)
            && remembered.stamp == stamp
        {
            return remembered.generators.clone();
        }

        // Tree features only describe the content the tree parsed.
        let known_features = tree
            .node(module_id)
            .filter(|node| node.is_parsed() && node.last_modified == reference.last_modified)
            .map(|node| &node.features);
        builder
            .cache_key_generators(&BuilderContext {
                module_id,
                known_features,
            })
            .unwrap_or_default()
    }

    #[allow(clippy::too_many_arguments)]
    async fn build(
        &self,
        module_id: &str,
        uri: &str,
        stamp: &str,
        generation: u64,
        request: &RequestContext,
        generators: Vec<KeyGen>,
        provider: Arc<dyn ResourceProvider>,
        builder: Arc<dyn ModuleBuilder>,
    ) -> AggregatorResult<BuildOutcome<ModuleArtifact>> {
        let builder_name = builder.name().to_string();
        tracing::debug!(
            target: "cache::module",
            "Building '{module_id}' with {builder_name} [{}]",
            describe(&generators)
        );

        let joined = {
            let module_id = module_id.to_string();
            let uri = uri.to_string();
            let request = request.clone();
            tokio::task::spawn_blocking(move || {
                let resource = provider.read(&uri)?;
                Ok::<_, AggregatorError>(builder.build(&module_id, &resource, &request, &generators))
            })
            .await
        };

        let built = match joined {
            Ok(read) => read?,
            Err(join_error) => Err(anyhow::anyhow!("builder panicked: {join_error}")),
        };

        let artifact = |content: String, key: String, error: bool| ModuleArtifact {
            module_id: module_id.to_string(),
            content,
            key,
            builder: builder_name.clone(),
            error,
            created: Utc::now(),
        };

        let build = match built {
            Ok(build) => build,
            Err(error) => {
                let failure = AggregatorError::BuildFailure {
                    module: module_id.to_string(),
                    reason: format!("{error:#}"),
                };
                tracing::warn!(target: "cache::module", "{failure}");
                let fallback =
                    ModuleBuild::error_build(module_id, &failure.to_string(), request.export_names);
                return Ok(BuildOutcome::uncached(artifact(fallback.content, String::new(), true)));
            }
        };

        if build.error {
            tracing::warn!(target: "cache::module", "Builder {builder_name} flagged '{module_id}' as an error");
            return Ok(BuildOutcome::uncached(artifact(build.content, String::new(), true)));
        }

        if has_provisional(&build.key_generators) {
            return Err(AggregatorError::ProtocolViolation {
                builder: builder_name.clone(),
                module: module_id.to_string(),
            });
        }

        let generators = self.remember(module_id, stamp, build.key_generators, generation);
        let final_key = module_key(module_id, &generators, request, stamp);
        Ok(BuildOutcome::cached(artifact(build.content, final_key, false)))
    }

    /// Final generators remembered for a module.
    pub fn remembered_generators(&self, module_id: &str) -> Option<Vec<KeyGen>> {
        self.generators.get(module_id).map(|r| r.generators.clone())
    }

    /// Cached artifact by key.
    pub fn get(&self, key: &str) -> Option<Arc<ModuleArtifact>> {
        self.cache.get(key)
    }

    /// Cached keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        self.cache.keys()
    }

    /// Drop every cached module and remembered generator. Builds already
    /// running deliver their artifact but store nothing.
    pub fn clear(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.cache.clear();
        self.generators.clear();
    }

    /// Number of cached entries (an artifact first built under a provisional
    /// key counts twice).
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
        self.cache.dump(sink, filter, |artifact| {
            format!("builder={} bytes={}", artifact.builder, artifact.content.len())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::TextModuleBuilder;
    use crate::deps::DependencyExtractor;
    use crate::keygen::FeatureSetKeyGenerator;
    use crate::config::AggregatorConfig;
    use crate::resource::{MemoryResourceProvider, Resource};
    use crate::test_utils::CountingBuilder;
    use std::sync::atomic::AtomicUsize;

    fn setup() -> (MemoryResourceProvider, Arc<dyn ResourceProvider>, BuilderRegistry) {
        let memory = MemoryResourceProvider::new();
        let provider: Arc<dyn ResourceProvider> = Arc::new(memory.clone());
        let builders = BuilderRegistry::from_config(&AggregatorConfig::default().builders);
        (memory, provider, builders)
    }

    fn tree_with(memory: &MemoryResourceProvider, ids: &[&str]) -> DepTree {
        let mut tree = DepTree::new();
        for id in ids {
            let resource = memory_read(memory, &module_uri(id));
            let parsed = DependencyExtractor.extract(&resource).unwrap();
            tree.update(id, parsed, resource.last_modified);
        }
        tree
    }

    fn memory_read(memory: &MemoryResourceProvider, uri: &str) -> Resource {
        ResourceProvider::read(memory, uri).unwrap()
    }

    #[tokio::test]
    async fn test_build_then_hit() {
        let (memory, provider, builders) = setup();
        memory.insert("app/a.js", "define([], function () { return has('ie'); });", 100);
        let tree = tree_with(&memory, &["app/a"]);
        let cache = ModuleCache::new(Duration::from_secs(10));
        let request = RequestContext::default().with_feature("ie", true).with_feature("x", false);

        let first = cache.get_or_build("app/a", &request, &tree, &provider, &builders).await.unwrap();
        assert!(!first.error);
        assert_eq!(first.builder, "javascript");
        assert_eq!(first.key, "app/a|features:ie;options:export_names=false@100/100");

        let second = cache.get_or_build("app/a", &request, &tree, &provider, &builders).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.stats().builds, 1);
    }

    #[tokio::test]
    async fn test_unscanned_module_uses_provisional_then_final_key() {
        let (memory, provider, builders) = setup();
        memory.insert("app/a.js", "if (has('ie')) {}", 5);
        let tree = DepTree::new();
        let cache = ModuleCache::new(Duration::from_secs(10));
        let request = RequestContext::default().with_feature("ie", true).with_feature("x", true);

        let artifact = cache.get_or_build("app/a", &request, &tree, &provider, &builders).await.unwrap();
        assert_eq!(artifact.key, "app/a|features:ie;options:export_names=false@-1/5");
        // stored under the provisional key and the final one
        assert_eq!(cache.len(), 2);
        assert!(!has_provisional(&cache.remembered_generators("app/a").unwrap()));

        // a request differing only in an untested feature hits
        let other = RequestContext::default().with_feature("ie", true).with_feature("x", false);
        let hit = cache.get_or_build("app/a", &other, &tree, &provider, &builders).await.unwrap();
        assert!(Arc::ptr_eq(&artifact, &hit));
        assert_eq!(cache.stats().builds, 1);
    }

    #[tokio::test]
    async fn test_body_edit_rebuilds() {
        let (memory, provider, builders) = setup();
        memory.insert("t.html", "<p>1</p>", 1);
        let tree = DepTree::new();
        let cache = ModuleCache::new(Duration::from_secs(10));
        let request = RequestContext::default();

        let old = cache.get_or_build("t.html", &request, &tree, &provider, &builders).await.unwrap();
        memory.insert("t.html", "<p>2</p>", 2);
        let new = cache.get_or_build("t.html", &request, &tree, &provider, &builders).await.unwrap();
        assert_ne!(old.content, new.content);
        assert!(new.content.contains("<p>2</p>"));
    }

    #[tokio::test]
    async fn test_missing_and_unhandled_resources() {
        let (memory, provider, builders) = setup();
        memory.insert("img/logo.png", vec![0u8, 1, 2], 1);
        let cache = ModuleCache::new(Duration::from_secs(10));
        let tree = DepTree::new();
        let request = RequestContext::default();

        let missing = cache.get_or_build("app/none", &request, &tree, &provider, &builders).await;
        assert!(matches!(missing, Err(AggregatorError::ResourceNotFound { .. })));

        let unhandled = cache.get_or_build("img/logo.png", &request, &tree, &provider, &builders).await;
        assert!(matches!(unhandled, Err(AggregatorError::NoBuilder { .. })));
    }

    #[tokio::test]
    async fn test_failed_build_becomes_uncached_error_artifact() {
        let (memory, provider, builders) = setup();
        memory.insert("app/bad.js", "define([", 1);
        let cache = ModuleCache::new(Duration::from_secs(10));
        let mut request = RequestContext::default();
        request.export_names = true;

        let artifact =
            cache.get_or_build("app/bad", &request, &DepTree::new(), &provider, &builders).await.unwrap();
        assert!(artifact.error);
        assert!(artifact.content.starts_with("console.error("));
        assert!(artifact.content.ends_with("define(\"app/bad\", [], \"\");"));
        assert!(cache.is_empty());
    }

    #[derive(Debug)]
    struct ProvisionalForever {
        calls: AtomicUsize,
    }

    impl ModuleBuilder for ProvisionalForever {
        fn name(&self) -> &str {
            "provisional-forever"
        }

        fn handles(&self, _module_id: &str, _resource: &ResourceRef) -> bool {
            true
        }

        fn cache_key_generators(&self, _context: &BuilderContext<'_>) -> Option<Vec<KeyGen>> {
            Some(vec![Arc::new(FeatureSetKeyGenerator::provisional())])
        }

        fn build(
            &self,
            _module_id: &str,
            _resource: &Resource,
            _request: &RequestContext,
            key_gens: &[KeyGen],
        ) -> anyhow::Result<ModuleBuild> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(ModuleBuild::new("x", key_gens.to_vec()))
        }
    }

    #[tokio::test]
    async fn test_provisional_generators_from_build_are_rejected() {
        let memory = MemoryResourceProvider::new();
        memory.insert("a.js", "x", 1);
        let provider: Arc<dyn ResourceProvider> = Arc::new(memory);
        let mut builders = BuilderRegistry::new();
        builders.register(Arc::new(ProvisionalForever {
            calls: AtomicUsize::new(0),
        }));
        let cache = ModuleCache::new(Duration::from_secs(10));

        let result =
            cache.get_or_build("a", &RequestContext::default(), &DepTree::new(), &provider, &builders).await;
        assert_eq!(
            result.unwrap_err(),
            AggregatorError::ProtocolViolation {
                builder: "provisional-forever".to_string(),
                module: "a".to_string(),
            }
        );
        assert!(cache.is_empty());
        assert!(cache.remembered_generators("a").is_none());
    }

    #[tokio::test]
    async fn test_text_builder_and_dump() {
        let memory = MemoryResourceProvider::new();
        memory.insert("t.html", "hi", 1);
        let provider: Arc<dyn ResourceProvider> = Arc::new(memory);
        let mut builders = BuilderRegistry::new();
        builders.register(Arc::new(TextModuleBuilder::new(vec!["html".to_string()])));
        let cache = ModuleCache::new(Duration::from_secs(10));

        cache.get_or_build("t.html", &RequestContext::default(), &DepTree::new(), &provider, &builders)
            .await
            .unwrap();
        let mut out = Vec::new();
        cache.dump(&mut out, None).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("t.html|options:export_names=false@-1/1"));
        assert!(text.contains("builder=text"));

        cache.clear();
        assert!(cache.is_empty());
        assert!(cache.remembered_generators("t.html").is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_clear_during_build_stores_nothing() {
        let memory = MemoryResourceProvider::new();
        memory.insert("a.js", "define([], 1);", 1);
        let provider: Arc<dyn ResourceProvider> = Arc::new(memory);
        let mut builders = BuilderRegistry::new();
        builders.register(Arc::new(CountingBuilder::new(&["js"]).with_delay(Duration::from_millis(200))));
        let cache = Arc::new(ModuleCache::new(Duration::from_secs(10)));

        let handle = {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move {
                // provisional and final keys differ once a feature is set
                let request = RequestContext::default().with_feature("ie", true);
                cache.get_or_build("a", &request, &DepTree::new(), &provider, &builders).await
            })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        cache.clear();

        let artifact = handle.await.unwrap().unwrap();
        assert!(!artifact.error);
        assert_eq!(artifact.key, "a|features:@-1/1");
        assert!(cache.is_empty(), "{:?}", cache.keys());
        assert!(cache.get(&artifact.key).is_none());
        assert!(cache.remembered_generators("a").is_none());
    }

    /// Final generators cover only the features the request turned on.
    #[derive(Debug)]
    struct EnabledFeatures;

    impl ModuleBuilder for EnabledFeatures {
        fn name(&self) -> &str {
            "enabled-features"
        }

        fn handles(&self, _module_id: &str, _resource: &ResourceRef) -> bool {
            true
        }

        fn cache_key_generators(&self, _context: &BuilderContext<'_>) -> Option<Vec<KeyGen>> {
            Some(vec![Arc::new(FeatureSetKeyGenerator::provisional())])
        }

        fn build(
            &self,
            _module_id: &str,
            _resource: &Resource,
            request: &RequestContext,
            _key_gens: &[KeyGen],
        ) -> anyhow::Result<ModuleBuild> {
            let enabled = request.features.iter().filter(|(_, on)| **on).map(|(name, _)| name.clone());
            Ok(ModuleBuild::new("x", vec![Arc::new(FeatureSetKeyGenerator::new(enabled))]))
        }
    }

    #[tokio::test]
    async fn test_rebuild_for_same_stamp_merges_generators() {
        let memory = MemoryResourceProvider::new();
        memory.insert("a.js", "x", 1);
        let provider: Arc<dyn ResourceProvider> = Arc::new(memory);
        let mut builders = BuilderRegistry::new();
        builders.register(Arc::new(EnabledFeatures));
        let cache = ModuleCache::new(Duration::from_secs(10));
        let tree = DepTree::new();

        let ie = RequestContext::default().with_feature("ie", true);
        let first = cache.get_or_build("a", &ie, &tree, &provider, &builders).await.unwrap();
        assert_eq!(first.key, "a|features:ie@-1/1");

        // misses under the remembered {ie} generators, builds, and widens them
        let touch = RequestContext::default().with_feature("touch", true);
        let second = cache.get_or_build("a", &touch, &tree, &provider, &builders).await.unwrap();
        assert_eq!(second.key, "a|features:touch@-1/1");

        let remembered = cache.remembered_generators("a").unwrap();
        assert_eq!(remembered.len(), 1);
        let features = remembered[0]
            .as_any()
            .downcast_ref::<FeatureSetKeyGenerator>()
            .and_then(FeatureSetKeyGenerator::features)
            .cloned();
        assert_eq!(features, Some(["ie".to_string(), "touch".to_string()].into_iter().collect()));

        let again = cache.get_or_build("a", &touch, &tree, &provider, &builders).await.unwrap();
        assert!(Arc::ptr_eq(&second, &again));
        assert_eq!(cache.stats().builds, 2);

        // the touch build is not served to requests without features
        assert!(cache.get("a|features:@-1/1").is_none());
        let plain = cache.get_or_build("a", &RequestContext::default(), &tree, &provider, &builders).await.unwrap();
        assert!(!Arc::ptr_eq(&plain, &second));
        assert_eq!(plain.key, "a|features:@-1/1");
        assert_eq!(cache.stats().builds, 3);
    }
}
