//! Graph view of a dependency tree for diagnostics.
//!
//! The tree answers "what does this module pull in"; this graph answers the
//! reverse questions: which modules form cycles (legal in AMD but worth
//! reporting) and which modules are affected when one module's dependency
//! list changes.

use super::tree::{DepTree, dependency_targets};
use crate::request::Features;
use petgraph::Direction;
use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

/// Directed graph of `define` dependencies (edge `a → b`: `a` depends on `b`).
pub struct DependencyGraph {
    /// The underlying directed graph.
    graph: DiGraph<String, ()>,
    /// Map from module ids to their graph indices.
    node_map: HashMap<String, NodeIndex>,
}

impl DependencyGraph {
    /// Create a new empty dependency graph.
    pub fn new() -> Self {
        Self {
            graph: DiGraph::new(),
            node_map: HashMap::new(),
        }
    }

    /// Build the graph for every parsed module of a tree. `has!` ids
    /// contribute all of their branches.
    pub fn from_tree(tree: &DepTree) -> Self {
        let mut graph = Self::new();
        let features = Features::new();
        for module_id in tree.module_ids() {
            graph.ensure_node(&module_id);
            let Some(node) = tree.node(&module_id) else {
                continue;
            };
            for dep in &node.define_deps {
                for target in dependency_targets(dep, &module_id, &features) {
                    graph.add_dependency(&module_id, &target);
                }
            }
        }
        graph
    }

    fn ensure_node(&mut self, module_id: &str) -> NodeIndex {
        if let Some(&index) = self.node_map.get(module_id) {
            index
        } else {
            let index = self.graph.add_node(module_id.to_string());
            self.node_map.insert(module_id.to_string(), index);
            index
        }
    }

    /// Record that `from` depends on `to`.
    pub fn add_dependency(&mut self, from: &str, to: &str) {
        let from_idx = self.ensure_node(from);
        let to_idx = self.ensure_node(to);

        if !self.graph.contains_edge(from_idx, to_idx) {
            self.graph.add_edge(from_idx, to_idx, ());
        }
    }

    /// Every dependency cycle, as sorted module-id lists (strongly connected
    /// components with more than one member, or a module depending on itself).
    /// Cycles are sorted by their first member.
    pub fn detect_cycles(&self) -> Vec<Vec<String>> {
        let mut cycles: Vec<Vec<String>> = tarjan_scc(&self.graph)
            .into_iter()
            .filter(|scc| {
                scc.len() > 1 || scc.first().is_some_and(|&n| self.graph.contains_edge(n, n))
            })
            .map(|scc| {
                let mut ids: Vec<String> = scc.iter().map(|&n| self.graph[n].clone()).collect();
                ids.sort();
                ids
            })
            .collect();
        cycles.sort();
        cycles
    }

    /// Modules whose dependency closure contains `module_id` (the module
    /// itself excluded unless it sits on a cycle), sorted.
    pub fn dependents(&self, module_id: &str) -> Vec<String> {
        self.reachable(module_id, Direction::Incoming)
    }

    fn reachable(&self, module_id: &str, direction: Direction) -> Vec<String> {
        let mut found = BTreeSet::new();
        let mut seen = HashSet::new();
        let mut queue = VecDeque::new();

        if let Some(&start) = self.node_map.get(module_id) {
            queue.push_back(start);
            while let Some(current) = queue.pop_front() {
                for neighbor in self.graph.neighbors_directed(current, direction) {
                    if seen.insert(neighbor) {
                        found.insert(self.graph[neighbor].clone());
                        queue.push_back(neighbor);
                    }
                }
            }
        }

        found.into_iter().collect()
    }

    /// Direct dependencies of a module, sorted.
    pub fn direct_deps(&self, module_id: &str) -> Vec<String> {
        let mut deps: Vec<String> = self
            .node_map
            .get(module_id)
            .map(|&idx| self.graph.neighbors(idx).map(|n| self.graph[n].clone()).collect())
            .unwrap_or_default();
        deps.sort();
        deps
    }

    /// Total number of nodes.
    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Total number of edges.
    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Human-readable dependency hierarchy below `root`.
    pub fn to_tree_string(&self, root: &str) -> String {
        let mut result = format!("{root}\n");
        let mut visited = HashSet::from([root.to_string()]);
        let deps = self.direct_deps(root);
        for (i, dep) in deps.iter().enumerate() {
            self.build_tree_string(dep, &mut result, "", i == deps.len() - 1, &mut visited);
        }
        result
    }

    fn build_tree_string(
        &self,
        module_id: &str,
        result: &mut String,
        prefix: &str,
        is_last: bool,
        visited: &mut HashSet<String>,
    ) {
        let connector = if is_last {
            "└── "
        } else {
            "├── "
        };
        let child_prefix = if is_last {
            format!("{prefix}    ")
        } else {
            format!("{prefix}│   ")
        };

        if !visited.insert(module_id.to_string()) {
            result.push_str(&format!("{prefix}{connector}{module_id} (seen)\n"));
            return;
        }
        result.push_str(&format!("{prefix}{connector}{module_id}\n"));

        let deps = self.direct_deps(module_id);
        for (i, dep) in deps.iter().enumerate() {
            self.build_tree_string(dep, result, &child_prefix, i == deps.len() - 1, visited);
        }
    }
}

impl Default for DependencyGraph {
    fn default() -> Self {
        Self::new()
    }
}
