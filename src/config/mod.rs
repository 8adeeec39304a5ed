//! Aggregator configuration.
//!
//! Configuration is a single TOML file. Every field has a default, so an empty
//! file (or no file at all) is a valid configuration:
//!
//! ```toml
//! root = "web/js"
//! parallelism = 8
//! include = ["**/*.js"]
//! exclude = ["**/tests/**"]
//! expand_requires = false
//! pending_timeout_secs = 10
//!
//! [has]
//! "dom-addeventlistener" = true
//!
//! [[builders]]
//! kind = "javascript"
//! extensions = ["js"]
//!
//! [[builders]]
//! kind = "text"
//! extensions = ["html", "txt", "css", "json"]
//! ```
//!
//! # Location
//!
//! The CLI reads the file given with `--config`, falling back to
//! `$AMDAGG_CONFIG_PATH` and then `~/.amdagg/config.toml`. A missing file
//! yields the defaults.

use crate::constants::{CONFIG_DIR_NAME, CONFIG_FILE_NAME, CONFIG_PATH_ENV, default_parallelism};
use crate::core::{AggregatorError, AggregatorResult};
use crate::deps::ScanOptions;
use crate::request::Features;
use anyhow::{Context, Result};
use glob::Pattern;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;

/// Kind of a configured builder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuilderKind {
    /// [`JavaScriptModuleBuilder`](crate::builder::JavaScriptModuleBuilder)
    Javascript,
    /// [`TextModuleBuilder`](crate::builder::TextModuleBuilder)
    Text,
}

/// One `[[builders]]` entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuilderConfig {
    /// Builder implementation
    pub kind: BuilderKind,
    /// File extensions (without the dot) the builder handles
    pub extensions: Vec<String>,
}

impl BuilderConfig {
    fn new(kind: BuilderKind, extensions: &[&str]) -> Self {
        Self {
            kind,
            extensions: extensions.iter().map(|e| (*e).to_string()).collect(),
        }
    }
}

/// Aggregator configuration; see the module docs for the file format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregatorConfig {
    /// Source directory
    pub root: PathBuf,
    /// Scan and build worker bound
    pub parallelism: usize,
    /// Glob patterns a scanned resource must match (one of)
    pub include: Vec<String>,
    /// Glob patterns that exclude a resource from scanning
    pub exclude: Vec<String>,
    /// Static feature defaults, merged under request features
    pub has: Features,
    /// Follow `require()` dependencies when expanding layers
    pub expand_requires: bool,
    /// Ordered builder list; first match wins
    pub builders: Vec<BuilderConfig>,
    /// Interval at which a waiter logs that a build is still running
    pub pending_timeout_secs: u64,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            parallelism: default_parallelism(),
            include: vec!["**/*.js".to_string()],
            exclude: Vec::new(),
            has: Features::new(),
            expand_requires: false,
            builders: vec![
                BuilderConfig::new(BuilderKind::Javascript, &["js"]),
                BuilderConfig::new(BuilderKind::Text, &["html", "txt", "css", "json"]),
            ],
            pending_timeout_secs: 10,
        }
    }
}

impl AggregatorConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The file cannot be read
    /// - The file is not valid TOML or does not match the schema
    /// - The values fail [`validate`](Self::validate)
    pub async fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config from {}", path.display()))?;

        let config = Self::from_toml_str(&content)
            .with_context(|| format!("Failed to parse config from {}", path.display()))?;
        tracing::debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Load from `path`, or from the default location when `None`; a missing
    /// file yields the defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be loaded.
    pub async fn load_or_default(path: Option<PathBuf>) -> Result<Self> {
        let path = match path {
            Some(path) => path,
            None => match Self::default_path() {
                Some(path) => path,
                None => return Ok(Self::default()),
            },
        };
        if fs::try_exists(&path).await.unwrap_or(false) {
            Self::load(&path).await
        } else {
            tracing::debug!("No config at {}; using defaults", path.display());
            Ok(Self::default())
        }
    }

    /// Parse and validate TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// `$AMDAGG_CONFIG_PATH` when set, otherwise `~/.amdagg/config.toml` when
    /// the home directory is known.
    pub fn default_path() -> Option<PathBuf> {
        if let Ok(path) = std::env::var(CONFIG_PATH_ENV)
            && !path.is_empty()
        {
            return Some(PathBuf::from(path));
        }
        dirs::home_dir().map(|home| home.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
    }

    /// Check value ranges and patterns.
    pub fn validate(&self) -> AggregatorResult<()> {
        if self.parallelism == 0 {
            return Err(config_error("parallelism must be at least 1"));
        }
        if self.pending_timeout_secs == 0 {
            return Err(config_error("pending_timeout_secs must be at least 1"));
        }
        if self.builders.is_empty() {
            return Err(config_error("at least one [[builders]] entry is required"));
        }
        if let Some(entry) = self.builders.iter().find(|b| b.extensions.is_empty()) {
            return Err(config_error(format!("builder '{:?}' has no extensions", entry.kind)));
        }
        compile_patterns(&self.include)?;
        compile_patterns(&self.exclude)?;
        Ok(())
    }

    /// Scanner options derived from the configuration.
    pub fn scan_options(&self) -> AggregatorResult<ScanOptions> {
        Ok(ScanOptions {
            root: String::new(),
            include: compile_patterns(&self.include)?,
            exclude: compile_patterns(&self.exclude)?,
            parallelism: self.parallelism,
        })
    }

    /// Waiter warning interval.
    pub const fn pending_timeout(&self) -> Duration {
        Duration::from_secs(self.pending_timeout_secs)
    }
}

fn config_error(message: impl Into<String>) -> AggregatorError {
    AggregatorError::ConfigError {
        message: message.into(),
    }
}

fn compile_patterns(patterns: &[String]) -> AggregatorResult<Vec<Pattern>> {
    patterns
        .iter()
        .map(|p| {
            Pattern::new(p).map_err(|e| config_error(format!("invalid glob pattern '{p}': {e}")))
        })
        .collect()
}
