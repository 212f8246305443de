//! Write a starter configuration.

use anyhow::{bail, Result};
use cellsim::prelude::*;
use colored::Colorize;
use std::path::Path;

use crate::config;

pub fn run(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        bail!(
            "{} already exists (use {} to overwrite)",
            path.display(),
            "--force".cyan()
        );
    }

    println!("{} Writing glucose colony configuration...", "→".blue());
    let colony = glucose_colony();
    config::save(&colony, path)?;
    println!("  {} Created {}", "✓".green(), path.display());
    println!(
        "  {} processes, {} leaves, {} resources",
        colony.processes.len().to_string().cyan(),
        colony.state.len().to_string().cyan(),
        colony.resources.len().to_string().cyan()
    );

    println!();
    println!("Next steps:");
    println!("  {} cellsim validate {}", "1.".blue(), path.display());
    println!("  {} cellsim run {} --output run.jsonl", "2.".blue(), path.display());
    println!("  {} cellsim network {}", "3.".blue(), path.display());

    Ok(())
}
