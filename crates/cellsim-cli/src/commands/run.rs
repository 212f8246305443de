//! Run a simulation.

use anyhow::{Context, Result};
use cellsim::prelude::*;
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::Path;

use crate::config;

pub fn run(path: &Path, ticks: u64, output: Option<&Path>, sequential: bool, verbose: bool) -> Result<()> {
    let mut config = config::load(path)?;
    if sequential {
        config.environment.parallel = false;
    }

    println!("{} Assembling {}...", "→".blue(), path.display());
    let mut env = Environment::from_config(&config, &default_registry())
        .with_context(|| format!("{} does not assemble", path.display()))?;
    if let Some(output) = output {
        let emitter = JsonLinesEmitter::create(output)
            .with_context(|| format!("Failed to create {}", output.display()))?;
        env.set_emitter(Box::new(emitter));
    }

    let initial = env.stats();
    println!(
        "  Seeded: {} agents, {} processes",
        initial.agents_alive.to_string().cyan(),
        env.assembly().len().to_string().cyan()
    );
    println!("{} Running {} sub-ticks...", "→".blue(), ticks.to_string().cyan());

    let pb = ProgressBar::new(ticks);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} sub-ticks {msg}")
            .context("Invalid progress template")?
            .progress_chars("#>-"),
    );

    let cancel = CancelToken::new();
    let mut outcome = RunOutcome::Completed;
    for _ in 0..ticks {
        let seen = env.event_history().len();
        outcome = env.run(1, &cancel)?;
        if outcome != RunOutcome::Completed {
            break;
        }
        if verbose {
            for (tick, event) in &env.event_history()[seen..] {
                if let Some(line) = describe(event) {
                    pb.println(format!("  [{}] {}", tick, line));
                }
            }
        }
        pb.set_message(format!("{} alive", env.alive_count()));
        pb.inc(1);
    }
    pb.finish_and_clear();

    let stats = env.stats();
    println!();
    match outcome {
        RunOutcome::Completed => println!("{} Simulation complete!", "✓".green().bold()),
        RunOutcome::Extinct => println!(
            "{} Population extinct at sub-tick {}",
            "•".yellow().bold(),
            stats.tick
        ),
        RunOutcome::Cancelled => println!("{} Run cancelled", "•".yellow().bold()),
    }
    println!("  Time:      {:.3}", stats.time);
    println!(
        "  Agents:    {} → {}",
        initial.agents_alive.to_string().yellow(),
        stats.agents_alive.to_string().green()
    );
    println!("  Divided:   {}", stats.total_divided.to_string().cyan());
    println!("  Lysed:     {}", stats.total_lysed.to_string().cyan());
    if stats.total_isolated > 0 {
        println!("  Isolated:  {}", stats.total_isolated.to_string().red());
    }
    for (species, total) in &stats.field_totals {
        let before = initial.field_totals.get(species).copied().unwrap_or(0.0);
        println!("  Field {:<10} {:.3} → {:.3}", species, before, total);
    }
    if let Some(output) = output {
        println!("  Snapshots written to {}", output.display().to_string().cyan());
    }

    Ok(())
}

fn describe(event: &EnvironmentEvent) -> Option<String> {
    match event {
        EnvironmentEvent::Divided { parent, children } => Some(format!(
            "{} divided into {} and {}",
            parent, children[0], children[1]
        )),
        EnvironmentEvent::Lysed { id, .. } => Some(format!("{} lysed", id)),
        EnvironmentEvent::Isolated { id, error } => Some(format!("{} isolated: {}", id, error.red())),
        _ => None,
    }
}
