//! Test utilities for amdagg
//!
//! Shared by unit tests and, through the `test-utils` feature, by the
//! integration suite:
//!
//! - [`init_test_logging`] installs a test-writer tracing subscriber once;
//! - [`fixtures`] provides in-memory source trees and [`CountingBuilder`], a
//!   builder that counts its invocations and can be told to misbehave.
//!
//! # Example
//!
//! ```rust,no_run
//! use amdagg::test_utils::{CountingBuilder, fixtures};
//! use std::sync::Arc;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let provider = fixtures::memory_provider(&[("app/main.js", "define([], 1);", 1)]);
//! let builder = Arc::new(CountingBuilder::new(&["js"]));
//! let aggregator = fixtures::aggregator_with(&provider, builder.clone());
//! aggregator.scan().await?;
//! # Ok(())
//! # }
//! ```

pub mod fixtures;

pub use fixtures::{BuildMode, CountingBuilder};

use std::sync::Once;
use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Global flag to ensure logging is only initialized once in tests
static INIT_LOGGING: Once = Once::new();

/// Initialize logging for tests.
///
/// Uses `level` when given, otherwise `RUST_LOG`; with neither, tests run
/// without a subscriber.
///
/// ```bash
/// RUST_LOG=cache=debug cargo test
/// ```
pub fn init_test_logging(level: Option<Level>) {
    INIT_LOGGING.call_once(|| {
        let filter = if let Some(level) = level {
            EnvFilter::new(level.to_string())
        } else if std::env::var("RUST_LOG").is_ok() {
            EnvFilter::from_default_env()
        } else {
            return;
        };

        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .with_target(true)
            .with_thread_ids(false)
            .try_init();
    });
}
