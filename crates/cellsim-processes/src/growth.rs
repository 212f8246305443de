//! Exponential growth that raises the division flag.

use crate::quantity::{amount_like, parse_config, require};
use cellsim_core::error::ProcessFailure;
use cellsim_core::process::{Intent, PortSpec, Ports, Process, Update};
use cellsim_core::value::{Shape, Value};
use serde::{Deserialize, Serialize};

fn default_rate() -> f64 {
    0.1
}

fn default_division_mass() -> f64 {
    2.0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GrowthConfig {
    /// Specific growth rate, per unit time.
    #[serde(default = "default_rate")]
    pub rate: f64,
    /// Mass at which the division flag is raised.
    #[serde(default = "default_division_mass")]
    pub division_mass: f64,
}

impl Default for GrowthConfig {
    fn default() -> Self {
        Self {
            rate: default_rate(),
            division_mass: default_division_mass(),
        }
    }
}

/// Adds `m · (e^(rate·dt) − 1)` to the mass leaf, which must use the `add`
/// merge operator, and writes whether the new mass reaches `division_mass`.
#[derive(Debug, Clone)]
pub struct Growth {
    config: GrowthConfig,
}

impl Growth {
    pub const KIND: &'static str = "growth";

    pub fn new(config: GrowthConfig) -> Result<Self, ProcessFailure> {
        require(config.rate.is_finite(), "rate must be finite")?;
        require(config.division_mass > 0.0, "division_mass must be positive")?;
        Ok(Self { config })
    }

    pub fn from_config(config: &serde_json::Value) -> Result<Self, ProcessFailure> {
        Self::new(parse_config(config)?)
    }
}

impl Process for Growth {
    fn kind(&self) -> &str {
        Self::KIND
    }

    fn ports(&self) -> Vec<PortSpec> {
        vec![
            PortSpec::read_write("mass", Shape::Number),
            PortSpec::write("divide", Shape::Bool),
        ]
    }

    fn request(&self, ports: &Ports<'_>, dt: f64) -> Result<Intent, ProcessFailure> {
        let like = ports.value("mass")?;
        let mass = ports.real("mass")?;
        let mut gain = mass * ((self.config.rate * dt).exp() - 1.0);
        if matches!(like, Value::Count(_)) {
            gain = gain.round();
        }
        Ok(Update::new()
            .set("mass", amount_like(like, gain))
            .set("divide", mass + gain >= self.config.division_mass)
            .into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cellsim_core::path::StatePath;
    use cellsim_core::tree::{LeafDecl, StateTree};
    use std::collections::BTreeMap;

    fn step(growth: &Growth, mass: Value, dt: f64) -> Update {
        let tree = StateTree::from_leaves(&[
            LeafDecl::new("mass", mass),
            LeafDecl::new("divide", Value::Bool(false)),
        ])
        .unwrap();
        let bindings: BTreeMap<String, StatePath> = [("mass", "mass"), ("divide", "divide")]
            .into_iter()
            .map(|(p, s)| (p.to_string(), StatePath::parse(s)))
            .collect();
        match growth.request(&Ports::new(&tree, &bindings), dt).unwrap() {
            Intent::Update(update) => update,
            Intent::Request(_) => panic!("growth never requests resources"),
        }
    }

    #[test]
    fn doubles_in_ln2_over_rate() {
        let growth = Growth::from_config(&serde_json::json!({"rate": 1.0, "division_mass": 2.0})).unwrap();
        let update = step(&growth, Value::Real(1.0), std::f64::consts::LN_2);

        let gain = update.writes[0].value.as_f64().unwrap();
        assert!((gain - 1.0).abs() < 1e-12);

        let small = step(&growth, Value::Real(1.0), 0.1);
        assert_eq!(small.writes[1].value, Value::Bool(false));
    }

    #[test]
    fn raises_the_flag_past_division_mass() {
        let growth = Growth::from_config(&serde_json::json!({"rate": 0.5, "division_mass": 10.0})).unwrap();
        let update = step(&growth, Value::Count(9), 1.0);
        // 9 · (e^0.5 − 1) ≈ 5.84 → 6
        assert_eq!(update.writes[0].value, Value::Count(6));
        assert_eq!(update.writes[1].value, Value::Bool(true));
    }
}
