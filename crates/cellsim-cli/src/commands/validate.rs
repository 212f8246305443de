//! Check a configuration by assembling it.

use anyhow::{Context, Result};
use cellsim::prelude::*;
use colored::Colorize;
use std::path::Path;

use crate::config;

pub fn run(path: &Path) -> Result<()> {
    let config = config::load(path)?;
    let registry = default_registry();

    println!("{} Assembling {}...", "→".blue(), path.display());
    let env = Environment::from_config(&config, &registry)
        .with_context(|| format!("{} does not assemble", path.display()))?;
    let assembly = env.assembly();

    println!("{}", "Processes".blue().bold());
    for process in assembly.processes() {
        println!(
            "  {:<20} {:<12} every {}",
            process.id.to_string().cyan(),
            process.kind,
            process.timestep
        );
    }
    println!();

    println!("{}", "State".blue().bold());
    println!("  Leaves:            {}", config.state.len().to_string().cyan());
    println!("  Resources:         {}", assembly.resources().len().to_string().cyan());
    println!("  Flow edges:        {}", assembly.schedule().edges().len().to_string().cyan());
    println!("  Seeded agents:     {}", env.alive_count().to_string().cyan());
    if let Some(lattice) = env.lattice() {
        let [nx, ny] = lattice.shape();
        println!("  Field:             {}×{} cells, {} species", nx, ny, lattice.species().len());
    }
    println!();

    println!("{} Configuration is valid", "✓".green().bold());
    Ok(())
}
