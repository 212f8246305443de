//! Export the causality network of a configuration.

use anyhow::{Context, Result};
use cellsim::prelude::*;
use colored::Colorize;
use std::path::Path;

use crate::config;

pub fn run(path: &Path, output: Option<&Path>) -> Result<()> {
    let config = config::load(path)?;
    let assembly = Assembly::from_config(&config, &default_registry())
        .with_context(|| format!("{} does not assemble", path.display()))?;

    let network = CausalityNetwork::from_assembly(&assembly);
    let json = network.to_json_pretty().context("Failed to serialize network")?;

    match output {
        None => println!("{}", json),
        Some(output) => {
            std::fs::write(output, json)
                .with_context(|| format!("Failed to write {}", output.display()))?;
            println!(
                "{} Exported {} process nodes, {} state nodes, {} edges to {}",
                "✓".green(),
                network.count(NodeKind::Process).to_string().cyan(),
                network.count(NodeKind::State).to_string().cyan(),
                network.edges.len().to_string().cyan(),
                output.display()
            );
        }
    }
    Ok(())
}
