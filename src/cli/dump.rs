//! `amdagg dump`: print cache contents.

use super::{parse_feature, request_for};
use crate::aggregator::Aggregator;
use anyhow::Result;
use clap::Args;

/// Scan, optionally build some layers, then print the layer, module and gzip
/// caches.
#[derive(Args, Debug)]
pub struct DumpCommand {
    /// Only entries whose key matches this regular expression
    #[arg(long)]
    filter: Option<String>,

    /// Build the layer for this module first (repeatable)
    #[arg(long = "warm")]
    warm: Vec<String>,

    /// Feature value used when warming (repeatable)
    #[arg(long = "feature", value_parser = parse_feature)]
    features: Vec<(String, bool)>,
}

impl DumpCommand {
    /// Run the command.
    pub async fn execute(self, aggregator: &Aggregator) -> Result<()> {
        aggregator.scan().await?;

        for module_id in &self.warm {
            let request = request_for(std::slice::from_ref(module_id), &self.features);
            let layer = aggregator.build_layer(&request).await?;
            tracing::debug!("Warmed '{}' ({} modules)", module_id, layer.modules.len());
        }

        let mut stdout = std::io::stdout().lock();
        aggregator.dump(&mut stdout, self.filter.as_deref())?;
        Ok(())
    }
}
