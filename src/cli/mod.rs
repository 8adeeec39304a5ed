//! Command-line interface for amdagg.
//!
//! # Available Commands
//!
//! - `scan` - Scan the source tree and print per-module dependency data
//! - `resolve` - Print the ordered dependency closure of a module
//! - `build` - Build a layer and write its bytes
//! - `dump` - Print cache contents, optionally after warming some layers
//!
//! # Global Options
//!
//! - `--config <path>` - Configuration file (default `~/.amdagg/config.toml`)
//! - `--root <dir>` - Source directory, overriding the configured `root`
//! - `--verbose` / `--quiet` - Log level (`debug` / `error`); without either
//!   flag `RUST_LOG` is honored, falling back to `info`
//!
//! # Examples
//!
//! ```bash
//! amdagg --root web/js scan --format json
//! amdagg resolve app/main --feature ie=false
//! amdagg build app/main app/extra --feature touch --gzip --output layer.js.gz
//! amdagg dump --warm app/main --filter '^layer:'
//! ```

mod build;
mod dump;
mod resolve;
mod scan;

use crate::aggregator::Aggregator;
use crate::config::AggregatorConfig;
use crate::request::RequestContext;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

pub use build::BuildCommand;
pub use dump::DumpCommand;
pub use resolve::ResolveCommand;
pub use scan::{OutputFormat, ScanCommand};

/// Settings derived from the global flags, separated from [`Cli`] so tests
/// can inject them.
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    /// Log filter; `None` honors `RUST_LOG` (falling back to `info`)
    pub log_level: Option<String>,

    /// Configuration file; `None` uses the default location
    pub config_path: Option<PathBuf>,

    /// Source directory overriding the configured one
    pub root: Option<PathBuf>,
}

impl CliConfig {
    /// Install the global tracing subscriber (stderr). Later calls are no-ops.
    pub fn init_logging(&self) {
        let filter = match &self.log_level {
            Some(level) => EnvFilter::new(level),
            None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        };
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(true)
            .try_init();
    }

    /// Load the configuration and create the aggregator.
    pub async fn aggregator(&self) -> Result<Aggregator> {
        let mut config = AggregatorConfig::load_or_default(self.config_path.clone()).await?;
        if let Some(root) = &self.root {
            config.root.clone_from(root);
        }
        if !config.root.is_dir() {
            anyhow::bail!("Source directory not found: {}", config.root.display());
        }
        let root = config.root.display().to_string();
        Aggregator::from_config(config)
            .with_context(|| format!("Failed to set up the aggregator for {root}"))
    }
}

/// Root command and global options.
#[derive(Parser)]
#[command(
    name = "amdagg",
    about = "AMD module aggregator - build dependency-ordered JavaScript layers",
    version,
    long_about = "amdagg scans AMD JavaScript sources, tracks module dependencies and builds \
                  cached, feature-aware layers of modules."
)]
pub struct Cli {
    /// Command to execute
    #[command(subcommand)]
    command: Commands,

    /// Path to the configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Source directory (overrides `root` from the configuration)
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,

    /// Only log errors
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan sources and print per-module dependencies, features and times
    Scan(ScanCommand),

    /// Print the ordered dependency closure of a module
    Resolve(ResolveCommand),

    /// Build a layer
    Build(BuildCommand),

    /// Print cache contents
    Dump(DumpCommand),
}

impl Cli {
    /// Execute the parsed command.
    pub async fn execute(self) -> Result<()> {
        let config = self.build_config();
        self.execute_with_config(config).await
    }

    /// Translate the global flags into a [`CliConfig`].
    #[must_use]
    pub fn build_config(&self) -> CliConfig {
        let log_level = if self.verbose {
            Some("debug".to_string())
        } else if self.quiet {
            Some("error".to_string())
        } else {
            None
        };

        CliConfig {
            log_level,
            config_path: self.config.clone(),
            root: self.root.clone(),
        }
    }

    /// Execute with an explicit configuration.
    pub async fn execute_with_config(self, config: CliConfig) -> Result<()> {
        config.init_logging();
        let aggregator = config.aggregator().await?;

        match self.command {
            Commands::Scan(cmd) => cmd.execute(&aggregator).await,
            Commands::Resolve(cmd) => cmd.execute(&aggregator).await,
            Commands::Build(cmd) => cmd.execute(&aggregator).await,
            Commands::Dump(cmd) => cmd.execute(&aggregator).await,
        }
    }
}

/// Parse a `--feature` value: `name`, `!name`, `name=true` or `name=false`.
pub fn parse_feature(value: &str) -> std::result::Result<(String, bool), String> {
    let (name, enabled) = match value.split_once('=') {
        Some((name, "true" | "1")) => (name, true),
        Some((name, "false" | "0")) => (name, false),
        Some((_, other)) => return Err(format!("expected true or false, got '{other}'")),
        None => match value.strip_prefix('!') {
            Some(name) => (name, false),
            None => (value, true),
        },
    };
    let name = name.trim();
    if name.is_empty() {
        return Err("feature name is empty".to_string());
    }
    Ok((name.to_string(), enabled))
}

/// Request for `modules` with the given feature flags.
pub(crate) fn request_for(modules: &[String], features: &[(String, bool)]) -> RequestContext {
    features
        .iter()
        .fold(RequestContext::for_modules(modules.iter().cloned()), |request, (name, value)| {
            request.with_feature(name.clone(), *value)
        })
}
