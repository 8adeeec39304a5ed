//! `amdagg scan`: scan sources and report dependency data.

use crate::aggregator::Aggregator;
use crate::deps::{DependencyGraph, DepTreeNode};
use anyhow::Result;
use clap::{Args, ValueEnum};
use colored::Colorize;

/// Output format for `scan`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable listing
    Text,
    /// JSON document with modules, stats and cycles
    Json,
}

/// Scan the source tree and print per-module dependencies, features and
/// times, followed by scan statistics and dependency cycles.
#[derive(Args, Debug)]
pub struct ScanCommand {
    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,
}

impl ScanCommand {
    /// Run the command.
    pub async fn execute(self, aggregator: &Aggregator) -> Result<()> {
        let stats = aggregator.scan().await?;
        let tree = aggregator.tree();
        let cycles = DependencyGraph::from_tree(&tree).detect_cycles();
        let modules: Vec<&DepTreeNode> =
            tree.module_ids().iter().filter_map(|id| tree.node(id)).collect();

        match self.format {
            OutputFormat::Json => {
                let document = serde_json::json!({
                    "modules": modules,
                    "stats": stats,
                    "cycles": cycles,
                });
                println!("{}", serde_json::to_string_pretty(&document)?);
            }
            OutputFormat::Text => {
                for node in &modules {
                    println!(
                        "{}  {}",
                        node.name.bold(),
                        format!("deps={} modified={}", node.last_modified_dep, node.last_modified)
                            .dimmed()
                    );
                    print_list("define", &node.define_deps);
                    print_list("require", &node.require_deps);
                    let features: Vec<String> = node.features.iter().cloned().collect();
                    print_list("features", &features);
                }
                println!(
                    "\n{} {} resources: {} parsed, {} unchanged, {} failed",
                    "Scanned".green().bold(),
                    stats.visited,
                    stats.parsed,
                    stats.skipped,
                    stats.failed
                );
                for cycle in &cycles {
                    println!("{} {}", "Cycle:".yellow(), cycle.join(" -> "));
                }
            }
        }
        Ok(())
    }
}

fn print_list(label: &str, items: &[String]) {
    if !items.is_empty() {
        println!("  {label}: {}", items.join(", "));
    }
}
