//! Compare two emitted runs.

use anyhow::{bail, Context, Result};
use cellsim::prelude::*;
use colored::Colorize;
use std::path::Path;

pub fn run(first: &Path, second: &Path, tolerance: f64, limit: usize) -> Result<()> {
    let before = read_json_lines(first).with_context(|| format!("Failed to read {}", first.display()))?;
    let after = read_json_lines(second).with_context(|| format!("Failed to read {}", second.display()))?;

    let diff = diff_runs(&before, &after, tolerance);
    println!("{}", diff.summary());

    if diff.is_identical() {
        println!("{} Runs are identical", "✓".green().bold());
        return Ok(());
    }

    for (tick, agent) in diff.missing.iter().take(limit) {
        println!("  {} tick {} {} only in {}", "-".red(), tick, agent, first.display());
    }
    for (tick, agent) in diff.extra.iter().take(limit) {
        println!("  {} tick {} {} only in {}", "+".green(), tick, agent, second.display());
    }
    for (tick, agent, snapshot) in diff.differing.iter().take(limit) {
        println!("  {} tick {} {}: {}", "~".yellow(), tick, agent, snapshot.summary());
        for change in snapshot.changed.iter().take(limit) {
            println!("      {}: {} → {}", change.path, change.before, change.after);
        }
    }

    bail!("runs differ");
}
