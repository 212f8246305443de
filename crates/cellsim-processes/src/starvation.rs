//! Starvation - raises the lysis flag once a nutrient has stayed below a
//! threshold for `patience` time units in a row.
//!
//! The elapsed starvation time lives in the `starved` leaf (replace merge)
//! and is emitted with the rest of the cell state.

use crate::quantity::{parse_config, require};
use cellsim_core::error::ProcessFailure;
use cellsim_core::process::{Intent, PortSpec, Ports, Process, Update};
use cellsim_core::value::{Shape, Value};
use serde::{Deserialize, Serialize};

fn default_threshold() -> f64 {
    1.0
}

fn default_patience() -> f64 {
    5.0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StarvationConfig {
    #[serde(default = "default_threshold")]
    pub threshold: f64,
    #[serde(default = "default_patience")]
    pub patience: f64,
}

impl Default for StarvationConfig {
    fn default() -> Self {
        Self {
            threshold: default_threshold(),
            patience: default_patience(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Starvation {
    config: StarvationConfig,
}

impl Starvation {
    pub const KIND: &'static str = "starvation";

    pub fn new(config: StarvationConfig) -> Result<Self, ProcessFailure> {
        require(config.threshold.is_finite(), "threshold must be finite")?;
        require(config.patience > 0.0, "patience must be positive")?;
        Ok(Self { config })
    }

    pub fn from_config(config: &serde_json::Value) -> Result<Self, ProcessFailure> {
        Self::new(parse_config(config)?)
    }
}

impl Process for Starvation {
    fn kind(&self) -> &str {
        Self::KIND
    }

    fn ports(&self) -> Vec<PortSpec> {
        vec![
            PortSpec::read("nutrient", Shape::Number),
            PortSpec::read_write("starved", Shape::Number),
            PortSpec::write("lyse", Shape::Bool),
        ]
    }

    fn request(&self, ports: &Ports<'_>, dt: f64) -> Result<Intent, ProcessFailure> {
        let nutrient = ports.real("nutrient")?;
        let starved = if nutrient < self.config.threshold {
            ports.real("starved")? + dt
        } else {
            0.0
        };
        Ok(Update::new()
            .set("starved", Value::Real(starved))
            .set("lyse", starved >= self.config.patience)
            .into())
    }
}
