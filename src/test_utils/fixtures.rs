//! Fixtures: in-memory source trees and an instrumented builder.

use crate::aggregator::Aggregator;
use crate::builder::{BuilderContext, BuilderRegistry, ModuleBuild, ModuleBuilder, has_extension};
use crate::config::AggregatorConfig;
use crate::keygen::{FeatureSetKeyGenerator, KeyGen};
use crate::request::RequestContext;
use crate::resource::{MemoryResourceProvider, Resource, ResourceRef};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// How a [`CountingBuilder`] behaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildMode {
    /// Build successfully with a final key generator
    Normal,
    /// Return the provisional generators it was given (protocol violation)
    ProvisionalViolation,
    /// Return an error
    Fail,
    /// Return an error-flagged build
    ErrorFlag,
    /// Panic inside `build`
    Panic,
}

/// Builder that records how often it ran and how many of its builds
/// overlapped.
///
/// Pre-build it always offers a provisional feature generator; in
/// [`BuildMode::Normal`] the build returns a final generator over no
/// features. Content is `/* builder:<id> */` followed by the resource text.
#[derive(Debug)]
pub struct CountingBuilder {
    extensions: Vec<String>,
    calls: AtomicUsize,
    running: AtomicUsize,
    max_running: AtomicUsize,
    delay: Duration,
    mode: BuildMode,
}

impl CountingBuilder {
    /// Normal-mode builder for the given extensions, no delay.
    pub fn new(extensions: &[&str]) -> Self {
        Self {
            extensions: extensions.iter().map(|e| (*e).to_string()).collect(),
            calls: AtomicUsize::new(0),
            running: AtomicUsize::new(0),
            max_running: AtomicUsize::new(0),
            delay: Duration::ZERO,
            mode: BuildMode::Normal,
        }
    }

    /// Sleep this long inside every build.
    #[must_use]
    pub const fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Behave according to `mode`.
    #[must_use]
    pub const fn with_mode(mut self, mode: BuildMode) -> Self {
        self.mode = mode;
        self
    }

    /// Number of `build` calls so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Most `build` calls that were running at the same time.
    pub fn max_concurrency(&self) -> usize {
        self.max_running.load(Ordering::SeqCst)
    }
}

impl ModuleBuilder for CountingBuilder {
    fn name(&self) -> &str {
        "counting"
    }

    fn handles(&self, _module_id: &str, resource: &ResourceRef) -> bool {
        has_extension(resource, &self.extensions)
    }

    fn cache_key_generators(&self, _context: &BuilderContext<'_>) -> Option<Vec<KeyGen>> {
        Some(vec![Arc::new(FeatureSetKeyGenerator::provisional())])
    }

    fn build(
        &self,
        module_id: &str,
        resource: &Resource,
        _request: &RequestContext,
        key_gens: &[KeyGen],
    ) -> anyhow::Result<ModuleBuild> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(running, Ordering::SeqCst);
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        self.running.fetch_sub(1, Ordering::SeqCst);

        match self.mode {
            BuildMode::Normal => Ok(ModuleBuild::new(
                format!("/* builder:{module_id} */\n{}", resource.text()),
                vec![Arc::new(FeatureSetKeyGenerator::new(Vec::new()))],
            )),
            BuildMode::ProvisionalViolation => Ok(ModuleBuild::new("/* provisional */", key_gens.to_vec())),
            BuildMode::Fail => anyhow::bail!("counting builder configured to fail on '{module_id}'"),
            BuildMode::ErrorFlag => Ok(ModuleBuild::error(format!("console.error(\"flagged {module_id}\");"))),
            BuildMode::Panic => panic!("counting builder panicked on '{module_id}'"),
        }
    }
}

/// In-memory provider holding `(uri, content, last_modified)` entries.
pub fn memory_provider(files: &[(&str, &str, i64)]) -> MemoryResourceProvider {
    let provider = MemoryResourceProvider::new();
    for (uri, content, last_modified) in files {
        provider.insert(*uri, *content, *last_modified);
    }
    provider
}

/// Aggregator over `provider` with `builder` as its only builder.
///
/// # Panics
///
/// Panics if the default configuration is rejected.
pub fn aggregator_with(provider: &MemoryResourceProvider, builder: Arc<dyn ModuleBuilder>) -> Aggregator {
    aggregator_with_config(provider, AggregatorConfig::default(), builder)
}

/// Aggregator over `provider` using `config`, with `builder` as its only
/// builder.
///
/// # Panics
///
/// Panics if `config` is rejected.
pub fn aggregator_with_config(
    provider: &MemoryResourceProvider,
    config: AggregatorConfig,
    builder: Arc<dyn ModuleBuilder>,
) -> Aggregator {
    let mut builders = BuilderRegistry::new();
    builders.register(builder);
    Aggregator::with_builders(config, Arc::new(provider.clone()), builders).expect("configuration is valid")
}

/// Aggregator over `provider` with the default builders.
///
/// # Panics
///
/// Panics if the default configuration is rejected.
pub fn default_aggregator(provider: &MemoryResourceProvider) -> Aggregator {
    Aggregator::new(AggregatorConfig::default(), Arc::new(provider.clone()))
        .expect("default configuration is valid")
}

/// A small application: `app/main` depends on `app/util` and `app/widget`;
/// the widget picks `app/touch` or `app/mouse` through `dojo/has!touch`.
pub fn sample_app() -> Vec<(&'static str, &'static str, i64)> {
    vec![
        ("app/main.js", "define(['./util', './widget'], function (util, widget) {\n  return widget(util);\n});\n", 100),
        ("app/util.js", "define([], function () {\n  // helpers\n  return {};\n});\n", 100),
        (
            "app/widget.js",
            "define(['dojo/has!touch?./touch:./mouse', 'dojo/text!./widget.html'], function (input, tpl) {\n  return has('ie') ? null : input;\n});\n",
            100,
        ),
        ("app/touch.js", "define([], 'touch');\n", 100),
        ("app/mouse.js", "define([], 'mouse');\n", 100),
        ("app/widget.html", "<div class=\"widget\"></div>", 100),
        ("dojo/has.js", "define([], function () { return function () {}; });\n", 50),
        ("dojo/text.js", "define([], { load: function () {} });\n", 50),
    ]
}
