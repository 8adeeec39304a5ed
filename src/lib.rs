//! amdagg - AMD module aggregator
//!
//! Serves layers of AMD JavaScript modules: a request names some modules and
//! a feature set, and the aggregator returns one response body containing
//! those modules and everything they depend on, in dependency order.
//!
//! # Architecture Overview
//!
//! - A **dependency scan** parses every JavaScript resource, extracting the
//!   `define`/`require` dependency arrays and the `has()` features it tests,
//!   and publishes an immutable dependency tree. Each module carries an
//!   *effective dependency time* that only moves when its dependency list
//!   changes, so comment and body edits do not invalidate layers.
//! - **Builders** turn one resource into loader-ready JavaScript. They
//!   describe what a build depends on through **cache key generators**, which
//!   may be provisional before the first build and must be final after it.
//! - **Caches** for modules, layers and gzip variants run at most one build
//!   per key; concurrent requesters share its outcome.
//!
//! # Core Modules
//!
//! - [`aggregator`] - The [`Aggregator`](aggregator::Aggregator) handle
//! - [`deps`] - Dependency extraction, tree, scanning and graph diagnostics
//! - [`keygen`] - Cache key generator protocol
//! - [`builder`] - Module builders and builder selection
//! - [`cache`] - Single-flight module, layer and gzip caches
//! - [`resource`] - Resource providers (file system, in memory)
//! - [`request`] - Per-request features and transport options
//! - [`config`] - TOML configuration
//! - [`core`] - Error types and user-facing error formatting
//! - [`cli`] - Command-line interface
//!
//! # Example
//!
//! ```rust,no_run
//! use amdagg::aggregator::Aggregator;
//! use amdagg::config::AggregatorConfig;
//! use amdagg::request::RequestContext;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let aggregator = Aggregator::from_config(AggregatorConfig::default())?;
//! aggregator.scan().await?;
//!
//! let request = RequestContext::for_modules(["app/main"]).with_feature("ie", false);
//! let layer = aggregator.build_layer(&request).await?;
//! println!("{} modules, {} bytes", layer.modules.len(), layer.bytes.len());
//! # Ok(())
//! # }
//! ```

// Core functionality modules
pub mod aggregator;
pub mod builder;
pub mod cache;
pub mod deps;
pub mod keygen;

// Inputs
pub mod request;
pub mod resource;

// Supporting modules
pub mod cli;
pub mod config;
pub mod constants;
pub mod core;

// test_utils module is available for both unit tests and integration tests
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
