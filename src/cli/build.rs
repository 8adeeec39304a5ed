//! `amdagg build`: build a layer.

use super::{parse_feature, request_for};
use crate::aggregator::Aggregator;
use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use std::io::Write;
use std::path::PathBuf;

/// Build a layer for one or more modules and write its bytes to stdout or a
/// file.
#[derive(Args, Debug)]
pub struct BuildCommand {
    /// Module ids, in layer order
    #[arg(required = true)]
    modules: Vec<String>,

    /// Feature value: `name`, `!name` or `name=true|false` (repeatable)
    #[arg(long = "feature", value_parser = parse_feature)]
    features: Vec<(String, bool)>,

    /// Write the gzip-compressed layer
    #[arg(long)]
    gzip: bool,

    /// Only the listed modules, without their dependencies
    #[arg(long)]
    no_expand: bool,

    /// Emit named `define("id", ...)` calls
    #[arg(long)]
    export_names: bool,

    /// Also follow `require()` dependencies
    #[arg(long)]
    requires: bool,

    /// Output file (default: stdout)
    #[arg(short, long)]
    output: Option<PathBuf>,
}

impl BuildCommand {
    /// Run the command.
    pub async fn execute(self, aggregator: &Aggregator) -> Result<()> {
        aggregator.scan().await?;

        let mut request = request_for(&self.modules, &self.features);
        request.accept_gzip = self.gzip;
        request.expand_dependencies = !self.no_expand;
        request.export_names = self.export_names;
        request.expand_requires = self.requires;

        let layer = aggregator.build_layer(&request).await?;
        tracing::info!(
            "Built layer of {} modules ({} bytes, sha256 {})",
            layer.modules.len(),
            layer.bytes.len(),
            layer.digest
        );
        if layer.error {
            eprintln!("{} layer contains modules that failed to build", "Warning:".yellow().bold());
        }

        match &self.output {
            Some(path) => tokio::fs::write(path, &layer.bytes)
                .await
                .with_context(|| format!("Failed to write layer to {}", path.display()))?,
            None => {
                let mut stdout = std::io::stdout().lock();
                stdout.write_all(&layer.bytes).context("Failed to write layer to stdout")?;
                stdout.flush()?;
            }
        }
        Ok(())
    }
}
