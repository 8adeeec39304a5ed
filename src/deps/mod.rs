//! Dependency extraction and the dependency tree.
//!
//! The pipeline runs independently of request serving:
//!
//! ```text
//! ResourceProvider ──visit/read──▶ DependencyExtractor ──ParseResult──▶ DepTree
//!                                  (lexer → parser → call matcher)       │
//!                                                          DepIndex::swap ▼
//!                                                          requests read Arc<DepTree>
//! ```
//!
//! - [`lexer`] and [`parser`] turn source into a bracket-structured syntax tree.
//! - [`extractor`] pattern-matches `define`/`require`/`has` calls on that tree.
//! - [`tree`] stores the results and tracks effective dependency times.
//! - [`scanner`] runs extraction over all resources in parallel.
//! - [`graph`] offers cycle and reverse-dependency diagnostics.

pub mod extractor;
pub mod graph;
pub mod has_plugin;
pub mod lexer;
pub mod parser;
pub mod scanner;
pub mod tree;

pub use extractor::{DependencyExtractor, ParseResult};
pub use graph::DependencyGraph;
pub use scanner::{DepIndex, DepScanner, ScanOptions, ScanStats};
pub use tree::{DepTree, DepTreeNode};
