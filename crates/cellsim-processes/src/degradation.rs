//! First-order decay of a pool.
//!
//! The decayed amount over one step is `v · (1 − e^(−k·dt))`, rounded to the
//! nearest unit for count leaves. Decay is a claim like any other consumer,
//! so it competes with metabolism for the same substrate.

use crate::quantity::{amount_like, parse_config, require};
use cellsim_core::error::ProcessFailure;
use cellsim_core::process::{Grants, Intent, PortSpec, Ports, Process, ResourceRequest, Update};
use cellsim_core::value::{Shape, Value};
use serde::{Deserialize, Serialize};

fn default_rate() -> f64 {
    0.1
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DegradationConfig {
    /// First-order rate constant, per unit time.
    #[serde(default = "default_rate")]
    pub rate: f64,
    /// Units written to the optional `product` port per decayed unit.
    #[serde(default)]
    pub product_yield: f64,
}

impl Default for DegradationConfig {
    fn default() -> Self {
        Self {
            rate: default_rate(),
            product_yield: 0.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Degradation {
    config: DegradationConfig,
}

impl Degradation {
    pub const KIND: &'static str = "degradation";

    pub fn new(config: DegradationConfig) -> Result<Self, ProcessFailure> {
        require(config.rate >= 0.0 && config.rate.is_finite(), "rate must be non-negative")?;
        require(
            config.product_yield >= 0.0 && config.product_yield.is_finite(),
            "product_yield must be non-negative",
        )?;
        Ok(Self { config })
    }

    pub fn from_config(config: &serde_json::Value) -> Result<Self, ProcessFailure> {
        Self::new(parse_config(config)?)
    }

    fn has_product(&self) -> bool {
        self.config.product_yield > 0.0
    }

    /// Amount lost from `current` over `dt`.
    pub fn decayed(&self, current: &Value, dt: f64) -> f64 {
        let level = current.as_f64().unwrap_or(0.0).max(0.0);
        let amount = level * (1.0 - (-self.config.rate * dt).exp());
        match current {
            Value::Count(_) => amount.round(),
            _ => amount,
        }
    }
}

impl Process for Degradation {
    fn kind(&self) -> &str {
        Self::KIND
    }

    fn ports(&self) -> Vec<PortSpec> {
        let mut ports = vec![PortSpec::consumes("substrate")];
        if self.has_product() {
            ports.push(PortSpec::write("product", Shape::Number));
        }
        ports
    }

    fn request(&self, ports: &Ports<'_>, dt: f64) -> Result<Intent, ProcessFailure> {
        let amount = self.decayed(ports.value("substrate")?, dt);
        if amount <= 0.0 {
            return Ok(Update::new().into());
        }
        Ok(ResourceRequest::new().consume("substrate", amount).into())
    }

    fn apply(&self, ports: &Ports<'_>, grants: &Grants, _dt: f64) -> Result<Update, ProcessFailure> {
        let granted = grants.granted("substrate");
        if granted == 0.0 {
            return Ok(Update::new());
        }
        let mut update = Update::new().set("substrate", amount_like(ports.value("substrate")?, granted));
        if self.has_product() {
            update = update.set(
                "product",
                amount_like(ports.value("product")?, -granted * self.config.product_yield),
            );
        }
        Ok(update)
    }
}
