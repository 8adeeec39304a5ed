//! Dependency scanning: enumerate resources, parse them in parallel, publish a
//! new tree.
//!
//! A scan never mutates the published tree. It builds a fresh [`DepTree`],
//! carrying over nodes whose resources did not change since `previous`, and
//! returns it once every parse task has finished. Resources that disappeared
//! since the last scan simply do not make it into the new tree. The caller
//! publishes the result with [`DepIndex::swap`].

use super::extractor::{DependencyExtractor, ParseResult};
use super::tree::{DepTree, DepTreeNode};
use crate::core::AggregatorError;
use crate::resource::{ResourceProvider, ResourceRef, module_id_for};
use anyhow::{Context, Result};
use futures::stream::{self, StreamExt};
use glob::{MatchOptions, Pattern};
use serde::Serialize;
use std::sync::{Arc, RwLock};

const GLOB_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

/// What to scan and how wide.
#[derive(Debug, Clone)]
pub struct ScanOptions {
    /// Provider-relative directory to scan (`""` for everything)
    pub root: String,
    /// A resource is scanned when it matches any of these
    pub include: Vec<Pattern>,
    /// ...and none of these
    pub exclude: Vec<Pattern>,
    /// Maximum concurrent parse tasks
    pub parallelism: usize,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            root: String::new(),
            include: Pattern::new("**/*.js").into_iter().collect(),
            exclude: Vec::new(),
            parallelism: crate::constants::default_parallelism(),
        }
    }
}

impl ScanOptions {
    /// Whether a URI passes the include/exclude filters.
    pub fn accepts(&self, uri: &str) -> bool {
        self.include.iter().any(|p| p.matches_with(uri, GLOB_OPTIONS))
            && !self.exclude.iter().any(|p| p.matches_with(uri, GLOB_OPTIONS))
    }
}

/// Summary of one scan.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScanStats {
    /// Resources that passed the filters
    pub visited: usize,
    /// Resources parsed successfully
    pub parsed: usize,
    /// Resources skipped because their content time did not change
    pub skipped: usize,
    /// Resources that failed to read or parse
    pub failed: usize,
    /// Modules whose effective dependency time changed, sorted
    pub advanced: Vec<String>,
}

/// Parallel dependency scanner.
pub struct DepScanner {
    provider: Arc<dyn ResourceProvider>,
    extractor: DependencyExtractor,
    options: ScanOptions,
}

enum Outcome {
    Skipped(DepTreeNode),
    Parsed {
        module_id: String,
        result: ParseResult,
        last_modified: i64,
    },
    Failed {
        module_id: String,
        error: AggregatorError,
    },
}

impl DepScanner {
    /// Create a scanner over a provider.
    pub fn new(provider: Arc<dyn ResourceProvider>, options: ScanOptions) -> Self {
        Self {
            provider,
            extractor: DependencyExtractor,
            options,
        }
    }

    /// Scan every accepted resource and build a new tree.
    ///
    /// Parse failures are logged and leave the module's previous node in
    /// place (or absent); only a failure to enumerate resources fails the scan.
    pub async fn scan(&self, previous: Option<&DepTree>) -> Result<(DepTree, ScanStats)> {
        let refs = self.enumerate().await?;
        let mut stats = ScanStats {
            visited: refs.len(),
            ..ScanStats::default()
        };

        let concurrency = self.options.parallelism.max(1);
        let outcomes: Vec<Outcome> = stream::iter(refs)
            .map(|resource_ref| {
                let module_id = module_id_for(&resource_ref.uri);
                let unchanged = previous
                    .and_then(|tree| tree.node(&module_id))
                    .filter(|node| {
                        node.is_parsed() && node.last_modified == resource_ref.last_modified
                    })
                    .cloned();
                let provider = Arc::clone(&self.provider);
                let extractor = self.extractor;

                async move {
                    if let Some(node) = unchanged {
                        return Outcome::Skipped(node);
                    }
                    let uri = resource_ref.uri.clone();
                    let task = tokio::task::spawn_blocking(move || {
                        let resource = provider.read(&resource_ref.uri)?;
                        let result = extractor.extract(&resource)?;
                        Ok::<_, AggregatorError>((result, resource.last_modified))
                    });
                    match task.await {
                        Ok(Ok((result, last_modified))) => Outcome::Parsed {
                            module_id,
                            result,
                            last_modified,
                        },
                        Ok(Err(error)) => Outcome::Failed {
                            module_id,
                            error,
                        },
                        Err(join_error) => Outcome::Failed {
                            module_id,
                            error: AggregatorError::ParseFailure {
                                uri,
                                reason: format!("parse task failed: {join_error}"),
                            },
                        },
                    }
                }
            })
            .buffer_unordered(concurrency)
            .collect()
            .await;

        // every task has finished; assemble the new tree
        let mut tree = DepTree::new();
        for outcome in outcomes {
            match outcome {
                Outcome::Skipped(node) => {
                    stats.skipped += 1;
                    tree.carry_over(&node);
                }
                Outcome::Parsed {
                    module_id,
                    result,
                    last_modified,
                } => {
                    stats.parsed += 1;
                    if let Some(node) = previous.and_then(|p| p.node(&module_id)) {
                        tree.carry_over(node);
                    }
                    if tree.update(&module_id, result, last_modified) {
                        stats.advanced.push(module_id);
                    }
                }
                Outcome::Failed {
                    module_id,
                    error,
                } => {
                    stats.failed += 1;
                    tracing::warn!(target: "deps::scan", "{error}; keeping previous dependency info");
                    if let Some(node) = previous.and_then(|p| p.node(&module_id)) {
                        tree.carry_over(node);
                    }
                }
            }
        }
        stats.advanced.sort();

        tracing::info!(
            target: "deps::scan",
            "Scanned {} resources: {} parsed, {} unchanged, {} failed, {} dependency changes",
            stats.visited,
            stats.parsed,
            stats.skipped,
            stats.failed,
            stats.advanced.len()
        );
        Ok((tree, stats))
    }

    async fn enumerate(&self) -> Result<Vec<ResourceRef>> {
        let provider = Arc::clone(&self.provider);
        let root = self.options.root.clone();
        let refs = tokio::task::spawn_blocking(move || {
            let mut refs = Vec::new();
            provider.visit(&root, &mut |r| refs.push(r))?;
            Ok::<_, AggregatorError>(refs)
        })
        .await
        .context("Resource enumeration task failed")?
        .with_context(|| format!("Failed to enumerate resources under '{}'", self.options.root))?;

        Ok(refs.into_iter().filter(|r| self.options.accepts(&r.uri)).collect())
    }
}

/// The published dependency tree.
///
/// Readers take an [`Arc`] snapshot and keep using it for the whole request,
/// so they see either the old or the new tree, never a mix.
#[derive(Debug, Default)]
pub struct DepIndex {
    current: RwLock<Arc<DepTree>>,
}

impl DepIndex {
    /// Index publishing an empty tree.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the current tree.
    pub fn current(&self) -> Arc<DepTree> {
        let guard = self.current.read().unwrap_or_else(std::sync::PoisonError::into_inner);
        Arc::clone(&*guard)
    }

    /// Publish a new tree, returning the previous one.
    pub fn swap(&self, tree: DepTree) -> Arc<DepTree> {
        let mut guard = self.current.write().unwrap_or_else(std::sync::PoisonError::into_inner);
        std::mem::replace(&mut *guard, Arc::new(tree))
    }
}
