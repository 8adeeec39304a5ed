//! Integration test suite for amdagg
//!
//! End-to-end tests through the public API (`Aggregator`, caches, builders)
//! and through the `amdagg` binary.
//!
//! # Running Integration Tests
//!
//! ```bash
//! cargo test --test integration
//! ```
//!
//! # Test Organization
//!
//! - **dependency_scan**: scanning, rescans and effective dependency times
//! - **single_flight**: concurrent requests share one build
//! - **key_protocol**: provisional/final key generators and error artifacts
//! - **layer_invalidation**: stale layers, comment-only edits, clearing
//! - **cli**: the `amdagg` command line

// Shared test utilities (from parent tests/ directory)
#[path = "../common/mod.rs"]
mod common;

mod cli;
mod dependency_scan;
mod key_protocol;
mod layer_invalidation;
mod single_flight;
