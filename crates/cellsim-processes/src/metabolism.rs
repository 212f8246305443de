//! Metabolism - rationed conversion of a substrate into a product.
//!
//! Each time step the process asks for `rate × dt` units of substrate and,
//! when configured, `cofactor_per_unit` units of cofactor per substrate unit.
//! Both are claims on shared pools, so competing processes may be granted
//! less than they asked for. The conversion runs at the smallest granted
//! fraction; unused grants are simply not taken.
//!
//! The product leaf must use the `add` merge operator.

use crate::quantity::{amount_like, claimable, parse_config, require};
use cellsim_core::error::ProcessFailure;
use cellsim_core::process::{Grants, Intent, PortSpec, Ports, Process, ResourceRequest, Update};
use cellsim_core::value::Shape;
use serde::{Deserialize, Serialize};

fn default_rate() -> f64 {
    1.0
}

fn default_yield() -> f64 {
    1.0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetabolismConfig {
    /// Substrate units converted per unit time at full supply.
    #[serde(default = "default_rate")]
    pub rate: f64,
    /// Product units per substrate unit.
    #[serde(default = "default_yield")]
    pub product_yield: f64,
    /// Cofactor units spent per substrate unit; zero means no cofactor port.
    #[serde(default)]
    pub cofactor_per_unit: f64,
}

impl Default for MetabolismConfig {
    fn default() -> Self {
        Self {
            rate: default_rate(),
            product_yield: default_yield(),
            cofactor_per_unit: 0.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Metabolism {
    config: MetabolismConfig,
}

impl Metabolism {
    pub const KIND: &'static str = "metabolism";

    pub fn new(config: MetabolismConfig) -> Result<Self, ProcessFailure> {
        require(config.rate >= 0.0 && config.rate.is_finite(), "rate must be non-negative")?;
        require(
            config.product_yield >= 0.0 && config.product_yield.is_finite(),
            "product_yield must be non-negative",
        )?;
        require(
            config.cofactor_per_unit >= 0.0 && config.cofactor_per_unit.is_finite(),
            "cofactor_per_unit must be non-negative",
        )?;
        Ok(Self { config })
    }

    pub fn from_config(config: &serde_json::Value) -> Result<Self, ProcessFailure> {
        Self::new(parse_config(config)?)
    }

    fn uses_cofactor(&self) -> bool {
        self.config.cofactor_per_unit > 0.0
    }
}

impl Process for Metabolism {
    fn kind(&self) -> &str {
        Self::KIND
    }

    fn ports(&self) -> Vec<PortSpec> {
        let mut ports = vec![
            PortSpec::consumes("substrate"),
            PortSpec::write("product", Shape::Number),
        ];
        if self.uses_cofactor() {
            ports.push(PortSpec::consumes("cofactor"));
        }
        ports
    }

    fn request(&self, ports: &Ports<'_>, dt: f64) -> Result<Intent, ProcessFailure> {
        let want = claimable(ports.value("substrate")?, self.config.rate * dt);
        if want <= 0.0 {
            return Ok(Update::new().into());
        }

        let mut request = ResourceRequest::new().consume("substrate", want);
        if self.uses_cofactor() {
            let cofactor = claimable(ports.value("cofactor")?, want * self.config.cofactor_per_unit);
            if cofactor > 0.0 {
                request = request.consume("cofactor", cofactor);
            }
        }
        Ok(request.into())
    }

    fn apply(&self, ports: &Ports<'_>, grants: &Grants, _dt: f64) -> Result<Update, ProcessFailure> {
        let Some(substrate) = grants.get("substrate") else {
            return Ok(Update::new());
        };
        let substrate_like = ports.value("substrate")?;
        let want = -substrate.requested;
        let converted = claimable(substrate_like, want * grants.min_fraction());
        if converted <= 0.0 {
            return Ok(Update::new());
        }

        let mut update = Update::new()
            .set("substrate", amount_like(substrate_like, -converted))
            .set(
                "product",
                amount_like(ports.value("product")?, converted * self.config.product_yield),
            );
        if let Some(cofactor) = grants.get("cofactor") {
            let cofactor_like = ports.value("cofactor")?;
            let spent = claimable(cofactor_like, converted * self.config.cofactor_per_unit)
                .min(-cofactor.granted);
            if spent > 0.0 {
                update = update.set("cofactor", amount_like(cofactor_like, -spent));
            }
        }
        Ok(update)
    }
}
