//! Saturable transport across the cell boundary.
//!
//! Transport never touches the field directly. It writes a signed demand to
//! the agent's exchange leaf and the environment settles it against the
//! lattice at the end of the sub-tick: positive values draw from the field,
//! negative values release into it.
//!
//! The flux is `vmax · s / (km + s)` per unit time, where `s` is the external
//! concentration for uptake and the internal amount for secretion. A `km` of
//! zero gives a constant flux of `vmax`. Several transporters may share one
//! exchange leaf if it uses the `add` merge operator.

use crate::quantity::{parse_config, require};
use cellsim_core::error::ProcessFailure;
use cellsim_core::process::{Intent, PortSpec, Ports, Process, Update};
use cellsim_core::value::{Shape, Value};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    #[default]
    Uptake,
    Secretion,
}

fn default_vmax() -> f64 {
    1.0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransportConfig {
    #[serde(default)]
    pub mode: Direction,
    #[serde(default = "default_vmax")]
    pub vmax: f64,
    #[serde(default)]
    pub km: f64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            mode: Direction::default(),
            vmax: default_vmax(),
            km: 0.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Transport {
    config: TransportConfig,
}

impl Transport {
    pub const KIND: &'static str = "transport";

    pub fn new(config: TransportConfig) -> Result<Self, ProcessFailure> {
        require(config.vmax >= 0.0 && config.vmax.is_finite(), "vmax must be non-negative")?;
        require(config.km >= 0.0 && config.km.is_finite(), "km must be non-negative")?;
        Ok(Self { config })
    }

    pub fn from_config(config: &serde_json::Value) -> Result<Self, ProcessFailure> {
        Self::new(parse_config(config)?)
    }

    /// Flux per unit time at driving level `level`.
    pub fn rate(&self, level: f64) -> f64 {
        let level = level.max(0.0);
        if self.config.km > 0.0 {
            self.config.vmax * level / (self.config.km + level)
        } else {
            self.config.vmax
        }
    }

    fn source_port(&self) -> &'static str {
        match self.config.mode {
            Direction::Uptake => "external",
            Direction::Secretion => "internal",
        }
    }
}

impl Process for Transport {
    fn kind(&self) -> &str {
        Self::KIND
    }

    fn ports(&self) -> Vec<PortSpec> {
        vec![
            PortSpec::read(self.source_port(), Shape::Number),
            PortSpec::write("exchange", Shape::Number),
        ]
    }

    fn request(&self, ports: &Ports<'_>, dt: f64) -> Result<Intent, ProcessFailure> {
        let level = ports.real(self.source_port())?;
        let flux = self.rate(level) * dt;
        let demand = match self.config.mode {
            Direction::Uptake => flux,
            Direction::Secretion => -flux.min(level.max(0.0)),
        };
        Ok(Update::new().set("exchange", Value::Real(demand)).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cellsim_core::path::StatePath;
    use cellsim_core::tree::{LeafDecl, StateTree};
    use std::collections::BTreeMap;

    fn demand(transport: &Transport, port: &str, level: f64) -> Value {
        let tree = StateTree::from_leaves(&[
            LeafDecl::new("level", Value::Real(level)),
            LeafDecl::new("exchange", Value::Real(0.0)),
        ])
        .unwrap();
        let bindings: BTreeMap<String, StatePath> = [(port, "level"), ("exchange", "exchange")]
            .into_iter()
            .map(|(p, s)| (p.to_string(), StatePath::parse(s)))
            .collect();
        let Intent::Update(update) = transport.request(&Ports::new(&tree, &bindings), 1.0).unwrap() else {
            panic!("transport never requests resources");
        };
        update.writes[0].value.clone()
    }

    #[test]
    fn uptake_saturates() {
        let transport = Transport::from_config(&serde_json::json!({"vmax": 2.0, "km": 1.0})).unwrap();
        assert_eq!(demand(&transport, "external", 1.0), Value::Real(1.0));
        assert_eq!(demand(&transport, "external", 0.0), Value::Real(0.0));
    }

    #[test]
    fn secretion_never_exceeds_holdings() {
        let transport = Transport::from_config(&serde_json::json!({"mode": "secretion", "vmax": 5.0})).unwrap();
        assert_eq!(demand(&transport, "internal", 3.0), Value::Real(-3.0));
        assert_eq!(demand(&transport, "internal", 10.0), Value::Real(-5.0));
    }

    #[test]
    fn unknown_mode_is_rejected() {
        assert!(Transport::from_config(&serde_json::json!({"mode": "sideways"})).is_err());
    }
}
