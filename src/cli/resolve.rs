//! `amdagg resolve`: print a module's ordered dependency closure.

use super::{parse_feature, request_for};
use crate::aggregator::Aggregator;
use crate::deps::DependencyGraph;
use anyhow::Result;
use clap::Args;

/// Print the modules a layer for `module` would contain, dependencies first.
#[derive(Args, Debug)]
pub struct ResolveCommand {
    /// Module id (e.g. `app/main`)
    module: String,

    /// Feature value: `name`, `!name` or `name=true|false` (repeatable)
    #[arg(long = "feature", value_parser = parse_feature)]
    features: Vec<(String, bool)>,

    /// Also follow `require()` dependencies
    #[arg(long)]
    requires: bool,

    /// Print the dependency tree instead of the flat list
    #[arg(long)]
    tree: bool,
}

impl ResolveCommand {
    /// Run the command.
    pub async fn execute(self, aggregator: &Aggregator) -> Result<()> {
        aggregator.scan().await?;

        if self.tree {
            let graph = DependencyGraph::from_tree(&aggregator.tree());
            print!("{}", graph.to_tree_string(&self.module));
            return Ok(());
        }

        let mut request = request_for(std::slice::from_ref(&self.module), &self.features);
        request.expand_requires = self.requires;
        for module_id in aggregator.layer_modules(&request) {
            println!("{module_id}");
        }
        Ok(())
    }
}
