//! Module builders and builder selection.
//!
//! A builder turns one module resource into loader-ready JavaScript. The
//! [`BuilderRegistry`] is an ordered list built once at startup from
//! configuration; the first builder whose [`ModuleBuilder::handles`] returns
//! true builds the module.
//!
//! Every build output is an AMD module. Non-JavaScript resources are wrapped
//! as strings: `define([], "content");`, or `define("id", [], "content");`
//! when the request asks for exported module names.

mod javascript;
mod text;

pub use javascript::JavaScriptModuleBuilder;
pub use text::TextModuleBuilder;

use crate::config::{BuilderConfig, BuilderKind};
use crate::keygen::KeyGen;
use crate::request::RequestContext;
use crate::resource::{Resource, ResourceRef};
use std::collections::BTreeSet;
use std::sync::Arc;

/// Output of a builder.
#[derive(Debug, Clone)]
pub struct ModuleBuild {
    /// Built JavaScript
    pub content: String,
    /// Final key generators for the build (must not be provisional)
    pub key_generators: Vec<KeyGen>,
    /// Error output: delivered to the client, never cached
    pub error: bool,
}

impl ModuleBuild {
    /// Successful build.
    pub fn new(content: impl Into<String>, key_generators: Vec<KeyGen>) -> Self {
        Self {
            content: content.into(),
            key_generators,
            error: false,
        }
    }

    /// Build flagged as an error; the content is still sent to the client.
    pub fn error(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            key_generators: Vec::new(),
            error: true,
        }
    }

    /// Error artifact for a failed build: logs `message` with `console.error`
    /// on the client and defines the module as an empty string.
    pub fn error_build(module_id: &str, message: &str, export_names: bool) -> Self {
        Self::error(format!(
            "console.error({});\n{}",
            js_string(message),
            define_string(module_id, "", export_names)
        ))
    }
}

/// What a builder knows about a module before building it.
#[derive(Debug, Clone, Copy)]
pub struct BuilderContext<'a> {
    /// Module id
    pub module_id: &'a str,
    /// Features the module tests, when the dependency tree has parsed it
    pub known_features: Option<&'a BTreeSet<String>>,
}

/// A pluggable builder.
///
/// Methods may be called concurrently for the same or different modules.
/// `build` runs on the blocking thread pool.
pub trait ModuleBuilder: Send + Sync {
    /// Name used in logs, dumps and protocol errors.
    fn name(&self) -> &str;

    /// Whether this builder builds the module. Decided from the id and URI
    /// only, so a cache hit never reads the resource.
    fn handles(&self, module_id: &str, resource: &ResourceRef) -> bool;

    /// Key generators to use before building (may be provisional). `None`
    /// when the output does not depend on the request.
    fn cache_key_generators(&self, context: &BuilderContext<'_>) -> Option<Vec<KeyGen>>;

    /// Build the module. When `key_gens` contains a provisional generator the
    /// returned build must carry final ones.
    fn build(
        &self,
        module_id: &str,
        resource: &Resource,
        request: &RequestContext,
        key_gens: &[KeyGen],
    ) -> anyhow::Result<ModuleBuild>;
}

/// Ordered builder list; first match wins.
#[derive(Clone, Default)]
pub struct BuilderRegistry {
    builders: Vec<Arc<dyn ModuleBuilder>>,
}

impl BuilderRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry for configured builder entries, in order.
    pub fn from_config(entries: &[BuilderConfig]) -> Self {
        let mut registry = Self::new();
        for entry in entries {
            let extensions = entry.extensions.clone();
            match entry.kind {
                BuilderKind::Javascript => {
                    registry.register(Arc::new(JavaScriptModuleBuilder::new(extensions)));
                }
                BuilderKind::Text => {
                    registry.register(Arc::new(TextModuleBuilder::new(extensions)));
                }
            }
        }
        registry
    }

    /// Append a builder.
    pub fn register(&mut self, builder: Arc<dyn ModuleBuilder>) {
        self.builders.push(builder);
    }

    /// First builder that handles the module.
    pub fn select(&self, module_id: &str, resource: &ResourceRef) -> Option<Arc<dyn ModuleBuilder>> {
        self.builders.iter().find(|b| b.handles(module_id, resource)).cloned()
    }

    /// Builder names in order.
    pub fn names(&self) -> Vec<String> {
        self.builders.iter().map(|b| b.name().to_string()).collect()
    }

    /// Number of builders.
    pub fn len(&self) -> usize {
        self.builders.len()
    }

    /// Whether no builder is registered.
    pub fn is_empty(&self) -> bool {
        self.builders.is_empty()
    }
}

/// JavaScript string literal for arbitrary text.
///
/// JSON escaping plus U+2028/U+2029, which JSON allows in strings but older
/// JavaScript engines treat as line terminators.
pub fn js_string(text: &str) -> String {
    serde_json::Value::from(text)
        .to_string()
        .replace('\u{2028}', "\\u2028")
        .replace('\u{2029}', "\\u2029")
}

/// `define([], "text");`, named when `export_names` is set.
pub fn define_string(module_id: &str, text: &str, export_names: bool) -> String {
    if export_names {
        format!("define({}, [], {});", js_string(module_id), js_string(text))
    } else {
        format!("define([], {});", js_string(text))
    }
}

/// Whether a resource URI has one of the given extensions.
pub(crate) fn has_extension(resource: &ResourceRef, extensions: &[String]) -> bool {
    crate::resource::extension(&resource.uri)
        .is_some_and(|ext| extensions.iter().any(|e| e.eq_ignore_ascii_case(ext)))
}
