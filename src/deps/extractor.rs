//! Dependency extraction: tokenize, build the syntax tree, and pattern-match
//! `define`, `require` and `has` calls. The script is never executed.

use super::has_plugin::HasExpr;
use super::lexer::tokenize;
use super::parser::{CallExpr, Expr, SyntaxTree, parse};
use super::tree::split_plugin;
use crate::core::{AggregatorError, AggregatorResult};
use crate::resource::Resource;
use std::collections::BTreeSet;

/// Dependency information extracted from one module.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParseResult {
    /// String elements of `define` dependency arrays, in call-site order
    pub define_deps: Vec<String>,
    /// String elements of `require` dependency arrays, in call-site order
    pub require_deps: Vec<String>,
    /// Features tested with `has("...")` or referenced by `has!` ids
    pub features: BTreeSet<String>,
}

/// Stateless extractor; see the module docs.
#[derive(Debug, Clone, Copy, Default)]
pub struct DependencyExtractor;

impl DependencyExtractor {
    /// Extract the dependencies of a resource.
    pub fn extract(&self, resource: &Resource) -> AggregatorResult<ParseResult> {
        self.extract_source(&resource.uri, &resource.text())
    }

    /// Extract the dependencies of JavaScript source text.
    pub fn extract_source(&self, uri: &str, source: &str) -> AggregatorResult<ParseResult> {
        let tree = syntax_tree(uri, source)?;
        let mut result = ParseResult::default();

        tree.walk_calls(&mut |call| match call.callee.as_deref() {
            Some("define") => {
                if let Some(deps) = call.args.iter().take(2).find_map(Expr::as_array) {
                    result.define_deps.extend(string_elements(deps));
                }
            }
            Some("require" | "requirejs") => {
                if let Some(deps) = call.args.first().and_then(Expr::as_array) {
                    result.require_deps.extend(string_elements(deps));
                }
            }
            _ if call.method() == Some("has") => {
                if let Some(feature) = first_string(call) {
                    result.features.insert(feature.to_string());
                }
            }
            _ => {}
        });

        for dep in result.define_deps.iter().chain(&result.require_deps) {
            result.features.extend(has_plugin_features(dep));
        }

        Ok(result)
    }

    /// Features tested by `has()` calls only (no dependency arrays).
    pub fn has_features(&self, uri: &str, source: &str) -> AggregatorResult<BTreeSet<String>> {
        self.extract_source(uri, source).map(|result| result.features)
    }
}

/// Tokenize and parse, mapping failures to [`AggregatorError::ParseFailure`].
pub fn syntax_tree(uri: &str, source: &str) -> AggregatorResult<SyntaxTree> {
    let failure = |reason: String| AggregatorError::ParseFailure {
        uri: uri.to_string(),
        reason,
    };
    let tokens = tokenize(source).map_err(|e| failure(e.to_string()))?;
    parse(&tokens).map_err(|e| failure(e.to_string()))
}

fn string_elements(items: &[Expr]) -> impl Iterator<Item = String> + '_ {
    items.iter().filter_map(Expr::as_str).map(str::to_string)
}

fn first_string(call: &CallExpr) -> Option<&str> {
    call.args.first().and_then(Expr::as_str)
}

/// Features referenced by a `has!` plugin id; empty for any other id.
pub fn has_plugin_features(dep: &str) -> BTreeSet<String> {
    match split_plugin(dep) {
        Some((plugin, resource)) if is_has_plugin(plugin) => HasExpr::parse(resource).features(),
        _ => BTreeSet::new(),
    }
}

/// Whether a plugin id names the `has` loader plugin (`has`, `dojo/has`).
pub fn is_has_plugin(plugin: &str) -> bool {
    plugin == "has" || plugin.ends_with("/has")
}
