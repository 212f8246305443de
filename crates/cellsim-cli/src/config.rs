//! Configuration files for the cellsim CLI.
//!
//! A simulation is described by one [`SimulationConfig`] document, stored as
//! TOML or JSON. The file extension picks the format.

use anyhow::{bail, Context, Result};
use cellsim::prelude::SimulationConfig;
use std::path::Path;
use tracing::debug;

/// File used when no configuration path is given.
pub const DEFAULT_CONFIG_FILE: &str = "cellsim.toml";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Toml,
    Json,
}

impl Format {
    pub fn from_path(path: &Path) -> Result<Self> {
        match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => Ok(Format::Toml),
            Some("json") => Ok(Format::Json),
            _ => bail!(
                "Cannot tell the format of {}: use a .toml or .json extension",
                path.display()
            ),
        }
    }
}

/// Load and sanity-check a configuration file.
pub fn load(path: &Path) -> Result<SimulationConfig> {
    let format = Format::from_path(path)?;
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config: {}", path.display()))?;
    let config = parse(&content, format)
        .with_context(|| format!("Failed to parse config: {}", path.display()))?;
    config
        .validate()
        .with_context(|| format!("Invalid config: {}", path.display()))?;
    debug!(
        path = %path.display(),
        processes = config.processes.len(),
        leaves = config.state.len(),
        "loaded configuration"
    );
    Ok(config)
}

pub fn parse(content: &str, format: Format) -> Result<SimulationConfig> {
    Ok(match format {
        Format::Toml => toml::from_str(content)?,
        Format::Json => SimulationConfig::from_json_str(content)?,
    })
}

/// Render a configuration in `format`.
pub fn render(config: &SimulationConfig, format: Format) -> Result<String> {
    match format {
        Format::Json => Ok(config.to_json_pretty()?),
        Format::Toml => {
            // TOML has no null; unset optional fields are simply left out.
            let mut value = serde_json::to_value(config).context("Failed to serialize config")?;
            strip_nulls(&mut value);
            toml::to_string_pretty(&value).context("Failed to serialize config as TOML")
        }
    }
}

/// Save a configuration; the extension of `path` picks the format.
pub fn save(config: &SimulationConfig, path: &Path) -> Result<()> {
    let content = render(config, Format::from_path(path)?)?;
    std::fs::write(path, content)
        .with_context(|| format!("Failed to write config: {}", path.display()))?;
    Ok(())
}

fn strip_nulls(value: &mut serde_json::Value) {
    match value {
        serde_json::Value::Object(fields) => {
            fields.retain(|_, v| !v.is_null());
            fields.values_mut().for_each(strip_nulls);
        }
        serde_json::Value::Array(items) => items.iter_mut().for_each(strip_nulls),
        _ => {}
    }
}
