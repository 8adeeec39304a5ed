//! Global constants used throughout the amdagg codebase.
//!
//! This module contains timeouts, parallelism parameters, and key-format
//! constants that are shared by the scanner, the caches, and the CLI.
//! Defining them centrally keeps magic numbers discoverable.

use std::time::Duration;

/// Interval after which a request waiting on an in-flight build logs a
/// warning (10 seconds).
///
/// Waiters keep waiting after the warning; a slow build is never duplicated.
pub const PENDING_STATE_TIMEOUT: Duration = Duration::from_secs(10);

/// Minimum number of parallel scan/build workers regardless of CPU count.
pub const MIN_PARALLELISM: usize = 4;

/// Multiplier applied to CPU core count for default parallelism.
///
/// Parsing is mostly CPU bound but resource reads block on I/O, so a small
/// oversubscription keeps the pool busy.
pub const PARALLELISM_CORE_MULTIPLIER: usize = 2;

/// Default CPU core count when detection fails.
///
/// Used as a fallback when `std::thread::available_parallelism()` returns an error.
pub const FALLBACK_CORE_COUNT: usize = 4;

/// Dependency time of a node that has never been parsed successfully.
pub const NOT_PARSED: i64 = -1;

/// Prefix tagging gzip cache keys.
pub const GZIP_KEY_PREFIX: &str = "gzip:";

/// Prefix tagging layer cache keys.
pub const LAYER_KEY_PREFIX: &str = "layer:";

/// Separator placed between module builds inside a layer.
pub const LAYER_SEPARATOR: &str = "\n";

/// Directory (under the home directory) holding the default configuration.
pub const CONFIG_DIR_NAME: &str = ".amdagg";

/// File name of the default configuration.
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Environment variable overriding the default configuration path.
pub const CONFIG_PATH_ENV: &str = "AMDAGG_CONFIG_PATH";

/// Default worker bound for scans and layer assembly.
pub fn default_parallelism() -> usize {
    let cores = std::thread::available_parallelism()
        .map(std::num::NonZeroUsize::get)
        .unwrap_or(FALLBACK_CORE_COUNT);
    (cores * PARALLELISM_CORE_MULTIPLIER).max(MIN_PARALLELISM)
}
