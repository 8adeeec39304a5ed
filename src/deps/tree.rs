//! Path-indexed dependency tree.
//!
//! Module id `a/b/c` owns nodes `a`, `a/b` and `a/b/c`; nodes live in a flat
//! map keyed by full id and parents are looked up in a separate child→parent
//! map, so no node holds a reference to another.
//!
//! Each parsed node tracks two times:
//! - `last_modified`: the content time of the resource at the last parse;
//! - `last_modified_dep`: the *effective dependency time*, which only moves to
//!   `last_modified` when the dependency arrays or the feature set change.
//!   Layer caches compare against it, so a body-only edit keeps layers valid.

use super::extractor::{ParseResult, is_has_plugin};
use super::has_plugin::HasExpr;
use crate::constants::NOT_PARSED;
use crate::request::Features;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap, HashSet};

/// AMD pseudo-dependencies provided by the loader itself.
const LOADER_PSEUDO_MODULES: &[&str] = &["require", "exports", "module"];

/// One path segment of the tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DepTreeNode {
    /// Full module id (`a/b/c`)
    pub name: String,
    /// `define` dependencies in call-site order
    pub define_deps: Vec<String>,
    /// `require` dependencies in call-site order
    pub require_deps: Vec<String>,
    /// Features the module tests
    pub features: BTreeSet<String>,
    /// Content time at the last successful parse
    pub last_modified: i64,
    /// Effective dependency time
    pub last_modified_dep: i64,
    /// Child segment names
    pub children: BTreeSet<String>,
}

impl DepTreeNode {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            define_deps: Vec::new(),
            require_deps: Vec::new(),
            features: BTreeSet::new(),
            last_modified: NOT_PARSED,
            last_modified_dep: NOT_PARSED,
            children: BTreeSet::new(),
        }
    }

    /// Whether the node carries parse results (as opposed to being a path
    /// segment only).
    pub fn is_parsed(&self) -> bool {
        self.last_modified_dep != NOT_PARSED
    }

    fn differs_from(&self, result: &ParseResult) -> bool {
        self.define_deps != result.define_deps
            || self.require_deps != result.require_deps
            || self.features != result.features
    }
}

/// Registry of parsed modules; see the module docs.
#[derive(Debug, Clone, Default)]
pub struct DepTree {
    nodes: HashMap<String, DepTreeNode>,
    parents: HashMap<String, String>,
}

impl DepTree {
    /// Empty tree.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a parse result for a module.
    ///
    /// The effective dependency time moves to `last_modified` on the first
    /// parse or when the arrays/feature set differ from the stored ones;
    /// otherwise it is kept. A content time that moved backwards pulls it down
    /// so that it never exceeds `last_modified`. Returns whether the effective
    /// dependency time changed.
    pub fn update(&mut self, module_id: &str, result: ParseResult, last_modified: i64) -> bool {
        let node = self.ensure_node(module_id);
        let previous = node.last_modified_dep;
        let changed = !node.is_parsed() || node.differs_from(&result);

        node.define_deps = result.define_deps;
        node.require_deps = result.require_deps;
        node.features = result.features;
        node.last_modified = last_modified;
        if changed || node.last_modified_dep > last_modified {
            node.last_modified_dep = last_modified;
        }
        node.last_modified_dep != previous
    }

    /// Copy the parse data of a node from an earlier tree (unchanged or
    /// unparseable resources during a rescan).
    pub fn carry_over(&mut self, previous: &DepTreeNode) {
        let node = self.ensure_node(&previous.name);
        node.define_deps.clone_from(&previous.define_deps);
        node.require_deps.clone_from(&previous.require_deps);
        node.features.clone_from(&previous.features);
        node.last_modified = previous.last_modified;
        node.last_modified_dep = previous.last_modified_dep;
    }

    fn ensure_node(&mut self, module_id: &str) -> &mut DepTreeNode {
        let mut path = String::new();
        for segment in module_id.split('/').filter(|s| !s.is_empty()) {
            let parent = (!path.is_empty()).then(|| path.clone());
            if !path.is_empty() {
                path.push('/');
            }
            path.push_str(segment);

            if !self.nodes.contains_key(&path) {
                self.nodes.insert(path.clone(), DepTreeNode::new(&path));
                if let Some(parent) = parent {
                    if let Some(parent_node) = self.nodes.get_mut(&parent) {
                        parent_node.children.insert(segment.to_string());
                    }
                    self.parents.insert(path.clone(), parent);
                }
            }
        }
        self.nodes.entry(path.clone()).or_insert_with(|| DepTreeNode::new(&path))
    }

    /// Node for a module id.
    pub fn node(&self, module_id: &str) -> Option<&DepTreeNode> {
        self.nodes.get(module_id)
    }

    /// Parent node id.
    pub fn parent(&self, module_id: &str) -> Option<&str> {
        self.parents.get(module_id).map(String::as_str)
    }

    /// Full ids of the child nodes, sorted.
    pub fn children(&self, module_id: &str) -> Vec<String> {
        self.nodes
            .get(module_id)
            .map(|node| node.children.iter().map(|c| format!("{module_id}/{c}")).collect())
            .unwrap_or_default()
    }

    /// Ids of every node that carries parse results, sorted.
    pub fn module_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> =
            self.nodes.values().filter(|n| n.is_parsed()).map(|n| n.name.clone()).collect();
        ids.sort();
        ids
    }

    /// Number of nodes, path segments included.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the tree has no nodes.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Effective dependency time of a parsed module.
    pub fn effective_dependency_time(&self, module_id: &str) -> Option<i64> {
        self.nodes.get(module_id).filter(|n| n.is_parsed()).map(|n| n.last_modified_dep)
    }

    /// Ordered transitive closure over `define` dependencies; `has!` ids
    /// contribute both branches.
    pub fn resolve(&self, module_id: &str) -> Vec<String> {
        self.resolve_all(&[module_id], &Features::new(), false)
    }

    /// Ordered transitive closure with `has!` ids evaluated against `features`.
    pub fn resolve_with_features(&self, module_id: &str, features: &Features) -> Vec<String> {
        self.resolve_all(&[module_id], features, false)
    }

    /// Union of the closures of several roots in first-seen order.
    ///
    /// Dependencies come before their dependents and each root after its own
    /// closure. A module already visited is not descended again, which makes
    /// the walk cycle-safe. Ids without a node are included as leaves.
    pub fn resolve_all<S: AsRef<str>>(
        &self,
        roots: &[S],
        features: &Features,
        include_require: bool,
    ) -> Vec<String> {
        let mut visited = HashSet::new();
        let mut order = Vec::new();
        for root in roots {
            self.visit(root.as_ref(), features, include_require, &mut visited, &mut order);
        }
        order
    }

    fn visit(
        &self,
        module_id: &str,
        features: &Features,
        include_require: bool,
        visited: &mut HashSet<String>,
        order: &mut Vec<String>,
    ) {
        if !visited.insert(module_id.to_string()) {
            return;
        }
        if let Some(node) = self.nodes.get(module_id) {
            let deps = node.define_deps.iter();
            let requires = node.require_deps.iter().filter(|_| include_require);
            for dep in deps.chain(requires) {
                for target in dependency_targets(dep, module_id, features) {
                    self.visit(&target, features, include_require, visited, order);
                }
            }
        }
        order.push(module_id.to_string());
    }

    /// Current effective dependency time for each module (`-1` when the module
    /// is unknown or unparsed).
    pub fn dependency_stamp<S: AsRef<str>>(&self, module_ids: &[S]) -> Vec<(String, i64)> {
        module_ids
            .iter()
            .map(|id| {
                let id = id.as_ref();
                (id.to_string(), self.effective_dependency_time(id).unwrap_or(NOT_PARSED))
            })
            .collect()
    }
}

/// Split `plugin!resource`.
pub fn split_plugin(dep: &str) -> Option<(&str, &str)> {
    dep.split_once('!')
}

/// Normalize a dependency id against the module that references it.
///
/// `./x` and `../x` resolve against the referrer's directory; `..` segments
/// that would climb above the root are dropped. Other ids are returned as is.
pub fn normalize_id(dep: &str, referrer: &str) -> String {
    if !(dep.starts_with("./") || dep.starts_with("../")) {
        return dep.to_string();
    }
    let mut segments: Vec<&str> = referrer.split('/').collect();
    segments.pop();
    for part in dep.split('/') {
        match part {
            "." | "" => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }
    segments.join("/")
}

/// Module ids a dependency string pulls into a layer.
///
/// Plugin ids contribute the plugin module and, except for `has!` (whose
/// resource is evaluated against the features), the normalized resource.
/// Loader pseudo-modules contribute nothing.
pub fn dependency_targets(dep: &str, referrer: &str, features: &Features) -> Vec<String> {
    match split_plugin(dep) {
        Some((plugin, resource)) => {
            let plugin_id = normalize_id(plugin, referrer);
            let mut targets = vec![plugin_id.clone()];
            if is_has_plugin(&plugin_id) {
                targets.extend(
                    HasExpr::parse(resource)
                        .evaluate(features)
                        .iter()
                        .flat_map(|id| dependency_targets(id, referrer, features)),
                );
            } else if !resource.is_empty() {
                targets.push(normalize_id(resource, referrer));
            }
            targets
        }
        None if LOADER_PSEUDO_MODULES.contains(&dep) || dep.is_empty() => Vec::new(),
        None => vec![normalize_id(dep, referrer)],
    }
}
