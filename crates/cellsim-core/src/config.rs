//! Resolved simulation configuration.
//!
//! The engine consumes one flattened document: process descriptors, the
//! topology binding their ports to paths, flow edges, resource pools, the
//! state schema with initial values, and the environment and spatial field
//! settings. Layered configuration is resolved before it reaches this type.

use crate::error::AssemblyError;
use crate::path::StatePath;
use crate::tree::LeafDecl;
use crate::types::ProcessId;
use crate::value::{PoolKind, Value};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Port bindings of every process: process → port → path.
pub type Topology = BTreeMap<ProcessId, BTreeMap<String, StatePath>>;

fn default_timestep() -> f64 {
    1.0
}

fn default_dt() -> f64 {
    1.0
}

fn default_emit_every() -> u64 {
    1
}

fn default_parallel() -> bool {
    true
}

fn default_max_agents() -> usize {
    10_000
}

fn default_seeds() -> Vec<AgentSeed> {
    vec![AgentSeed::default()]
}

fn default_cell_size() -> f64 {
    1.0
}

fn default_cell_volume() -> f64 {
    1.0
}

/// A process to instantiate from the registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessDescriptor {
    pub id: ProcessId,
    /// Registry key.
    pub kind: String,
    /// Simulation-time interval at which the process is due.
    #[serde(default = "default_timestep")]
    pub timestep: f64,
    /// Opaque configuration handed to the process factory.
    #[serde(default)]
    pub config: serde_json::Value,
}

impl ProcessDescriptor {
    pub fn new(id: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            id: ProcessId::new(id),
            kind: kind.into(),
            timestep: default_timestep(),
            config: serde_json::Value::Null,
        }
    }

    pub fn with_timestep(mut self, timestep: f64) -> Self {
        self.timestep = timestep;
        self
    }

    pub fn with_config(mut self, config: serde_json::Value) -> Self {
        self.config = config;
        self
    }
}

/// Within one tick, `after` observes the merged output of `before`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowEdge {
    pub before: ProcessId,
    pub after: ProcessId,
}

/// A path declared as a finite, non-negative pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceDecl {
    pub path: StatePath,
    #[serde(default)]
    pub pool: PoolKind,
}

/// What the environment does when one agent's tick fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorPolicy {
    /// Remove the failing agent, log, and continue.
    #[default]
    Isolate,
    /// Abort the whole run.
    Strict,
}

/// Initial agent placed at simulation start.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentSeed {
    #[serde(default)]
    pub location: Option<[f64; 2]>,
    /// Leaf values replacing the schema defaults for this agent.
    #[serde(default)]
    pub overrides: BTreeMap<StatePath, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentConfig {
    /// Duration of one sub-tick.
    #[serde(default = "default_dt")]
    pub dt: f64,
    /// Emit snapshots every this many sub-ticks.
    #[serde(default = "default_emit_every")]
    pub emit_every: u64,
    /// Tick agents on the rayon pool.
    #[serde(default = "default_parallel")]
    pub parallel: bool,
    #[serde(default)]
    pub error_policy: ErrorPolicy,
    /// Boolean leaf that marks an agent ready to divide.
    #[serde(default)]
    pub division_flag: Option<StatePath>,
    /// Boolean leaf that marks an agent for lysis.
    #[serde(default)]
    pub lysis_flag: Option<StatePath>,
    /// Leaf holding the agent's position in the field.
    #[serde(default)]
    pub location_path: Option<StatePath>,
    /// Division is suppressed once the population reaches this size.
    #[serde(default = "default_max_agents")]
    pub max_agents: usize,
    #[serde(default = "default_seeds")]
    pub seeds: Vec<AgentSeed>,
}

impl Default for EnvironmentConfig {
    fn default() -> Self {
        Self {
            dt: default_dt(),
            emit_every: default_emit_every(),
            parallel: default_parallel(),
            error_policy: ErrorPolicy::default(),
            division_flag: None,
            lysis_flag: None,
            location_path: None,
            max_agents: default_max_agents(),
            seeds: default_seeds(),
        }
    }
}

/// A species living in the shared field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeciesDecl {
    pub name: String,
    /// Uniform initial concentration.
    #[serde(default)]
    pub initial: f64,
    /// Diffusion coefficient in cell-size units squared per unit time.
    #[serde(default)]
    pub diffusion: f64,
}

/// Rate law of a field reaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum KineticLaw {
    /// `kcat × [catalyst] × [S] / (Km + [S])`; without a catalyst `kcat` acts as Vmax.
    MichaelisMenten {
        kcat: f64,
        km: f64,
        substrate: String,
        #[serde(default)]
        catalyst: Option<String>,
    },
    /// `k × Π [r]^order`.
    MassAction {
        k: f64,
        #[serde(default)]
        reactants: BTreeMap<String, f64>,
    },
}

/// A reaction evaluated independently in every field cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReactionDecl {
    pub id: String,
    /// Species → coefficient; negative consumes, positive produces.
    pub stoichiometry: BTreeMap<String, f64>,
    pub law: KineticLaw,
}

/// How a field species maps onto each agent's state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeciesBinding {
    pub species: String,
    /// Internal amount: credited on uptake, injected into the field on lysis.
    pub internal: StatePath,
    /// Exchange leaf written by processes: positive draws from the field,
    /// negative releases into it. Reset to zero after every exchange.
    #[serde(default)]
    pub exchange: Option<StatePath>,
    /// Leaf refreshed with the local field concentration each sub-tick.
    #[serde(default)]
    pub external: Option<StatePath>,
}

/// Largest per-substep diffusion number; four neighbors keep this below 1/4.
pub const MAX_DIFFUSION_NUMBER: f64 = 0.2;

/// Most substeps one diffusion step may be split into.
pub const MAX_DIFFUSION_SUBSTEPS: usize = 10_000;

/// Substeps needed to diffuse with coefficient `diffusion` over `dt` on a
/// grid of spacing `cell_size` while staying stable.
pub fn diffusion_substeps(diffusion: f64, dt: f64, cell_size: f64) -> f64 {
    let number = diffusion * dt / (cell_size * cell_size);
    (number / MAX_DIFFUSION_NUMBER).ceil().max(1.0)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpatialConfig {
    /// Grid size in cells, `[nx, ny]`.
    pub shape: [usize; 2],
    #[serde(default = "default_cell_size")]
    pub cell_size: f64,
    /// Volume of one cell; amount = concentration × volume.
    #[serde(default = "default_cell_volume")]
    pub cell_volume: f64,
    #[serde(default)]
    pub species: Vec<SpeciesDecl>,
    #[serde(default)]
    pub reactions: Vec<ReactionDecl>,
    #[serde(default)]
    pub bindings: Vec<SpeciesBinding>,
}

impl SpatialConfig {
    pub fn new(nx: usize, ny: usize) -> Self {
        Self {
            shape: [nx, ny],
            cell_size: default_cell_size(),
            cell_volume: default_cell_volume(),
            species: Vec::new(),
            reactions: Vec::new(),
            bindings: Vec::new(),
        }
    }

    pub fn with_species(mut self, name: impl Into<String>, initial: f64, diffusion: f64) -> Self {
        self.species.push(SpeciesDecl {
            name: name.into(),
            initial,
            diffusion,
        });
        self
    }

    pub fn with_binding(mut self, binding: SpeciesBinding) -> Self {
        self.bindings.push(binding);
        self
    }

    fn validate(&self) -> Result<(), AssemblyError> {
        let bad = |msg: String| Err(AssemblyError::Config(msg));

        if self.shape[0] == 0 || self.shape[1] == 0 {
            return bad(format!("spatial grid {:?} has no cells", self.shape));
        }
        if !(self.cell_size > 0.0 && self.cell_size.is_finite()) {
            return bad(format!("cell_size must be positive, got {}", self.cell_size));
        }
        if !(self.cell_volume > 0.0 && self.cell_volume.is_finite()) {
            return bad(format!("cell_volume must be positive, got {}", self.cell_volume));
        }

        let mut names = BTreeSet::new();
        for species in &self.species {
            if !names.insert(species.name.as_str()) {
                return bad(format!("species `{}` declared twice", species.name));
            }
            if !(species.diffusion >= 0.0 && species.diffusion.is_finite()) {
                return bad(format!(
                    "species `{}` has invalid diffusion {}",
                    species.name, species.diffusion
                ));
            }
            if !(species.initial >= 0.0 && species.initial.is_finite()) {
                return bad(format!(
                    "species `{}` has invalid initial concentration {}",
                    species.name, species.initial
                ));
            }
        }

        for reaction in &self.reactions {
            let mut referenced: Vec<&str> =
                reaction.stoichiometry.keys().map(String::as_str).collect();
            match &reaction.law {
                KineticLaw::MichaelisMenten {
                    kcat,
                    km,
                    substrate,
                    catalyst,
                } => {
                    if *kcat < 0.0 || *km <= 0.0 {
                        return bad(format!("reaction `{}` has invalid kinetics", reaction.id));
                    }
                    referenced.push(substrate);
                    referenced.extend(catalyst.as_deref());
                }
                KineticLaw::MassAction { k, reactants } => {
                    if *k < 0.0 {
                        return bad(format!("reaction `{}` has negative rate", reaction.id));
                    }
                    referenced.extend(reactants.keys().map(String::as_str));
                }
            }
            if let Some(unknown) = referenced.iter().find(|s| !names.contains(**s)) {
                return bad(format!(
                    "reaction `{}` references unknown species `{}`",
                    reaction.id, unknown
                ));
            }
        }

        for binding in &self.bindings {
            if !names.contains(binding.species.as_str()) {
                return bad(format!(
                    "binding references unknown species `{}`",
                    binding.species
                ));
            }
        }
        Ok(())
    }
}

/// The fully resolved configuration the engine consumes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Process descriptors in declaration order.
    #[serde(default)]
    pub processes: Vec<ProcessDescriptor>,
    #[serde(default)]
    pub topology: Topology,
    #[serde(default)]
    pub flow: Vec<FlowEdge>,
    #[serde(default)]
    pub resources: Vec<ResourceDecl>,
    /// State schema and initial snapshot.
    #[serde(default)]
    pub state: Vec<LeafDecl>,
    #[serde(default)]
    pub environment: EnvironmentConfig,
    #[serde(default)]
    pub spatial: Option<SpatialConfig>,
}

impl SimulationConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a JSON document.
    pub fn from_json_str(text: &str) -> crate::error::Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn to_json_pretty(&self) -> crate::error::Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Add a process together with its port bindings.
    pub fn with_process<P, S>(mut self, descriptor: ProcessDescriptor, bindings: P) -> Self
    where
        P: IntoIterator<Item = (S, S)>,
        S: AsRef<str>,
    {
        let ports = bindings
            .into_iter()
            .map(|(port, path)| (port.as_ref().to_string(), StatePath::parse(path.as_ref())))
            .collect();
        self.topology.insert(descriptor.id.clone(), ports);
        self.processes.push(descriptor);
        self
    }

    pub fn with_flow(mut self, before: &str, after: &str) -> Self {
        self.flow.push(FlowEdge {
            before: ProcessId::new(before),
            after: ProcessId::new(after),
        });
        self
    }

    pub fn with_resource(mut self, path: &str, pool: PoolKind) -> Self {
        self.resources.push(ResourceDecl {
            path: StatePath::parse(path),
            pool,
        });
        self
    }

    pub fn with_leaf(mut self, decl: LeafDecl) -> Self {
        self.state.push(decl);
        self
    }

    pub fn with_environment(mut self, environment: EnvironmentConfig) -> Self {
        self.environment = environment;
        self
    }

    pub fn with_spatial(mut self, spatial: SpatialConfig) -> Self {
        self.spatial = Some(spatial);
        self
    }

    /// Numeric sanity checks that do not need the process registry.
    pub fn validate(&self) -> Result<(), AssemblyError> {
        let env = &self.environment;
        if !(env.dt > 0.0 && env.dt.is_finite()) {
            return Err(AssemblyError::Config(format!(
                "environment.dt must be positive, got {}",
                env.dt
            )));
        }
        if env.emit_every == 0 {
            return Err(AssemblyError::Config(
                "environment.emit_every must be at least 1".into(),
            ));
        }
        if env.max_agents == 0 {
            return Err(AssemblyError::Config(
                "environment.max_agents must be at least 1".into(),
            ));
        }
        for process in &self.processes {
            if !(process.timestep > 0.0 && process.timestep.is_finite()) {
                return Err(AssemblyError::InvalidTimestep {
                    process: process.id.clone(),
                    timestep: process.timestep,
                });
            }
        }
        if let Some(spatial) = &self.spatial {
            spatial.validate()?;
            for species in &spatial.species {
                let substeps = diffusion_substeps(species.diffusion, env.dt, spatial.cell_size);
                if substeps > MAX_DIFFUSION_SUBSTEPS as f64 {
                    return Err(AssemblyError::Config(format!(
                        "species `{}` needs {} diffusion substeps per step (limit {}); lower its diffusion or environment.dt",
                        species.name, substeps, MAX_DIFFUSION_SUBSTEPS
                    )));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::MergeOp;

    #[test]
    fn defaults_fill_missing_sections() {
        let config = SimulationConfig::from_json_str(
            r#"{
                "processes": [{"id": "decay", "kind": "degradation"}],
                "topology": {"decay": {"substrate": "bulk/rna"}},
                "state": [{"path": "bulk/rna", "value": 40, "merge": "add"}]
            }"#,
        )
        .unwrap();

        assert_eq!(config.processes[0].timestep, 1.0);
        assert_eq!(config.environment.dt, 1.0);
        assert_eq!(config.environment.seeds.len(), 1);
        assert_eq!(config.state[0].merge, MergeOp::Add);
        assert_eq!(
            config.topology[&ProcessId::new("decay")]["substrate"],
            StatePath::parse("bulk/rna")
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn validate_rejects_bad_numbers() {
        let config = SimulationConfig::new().with_process(
            ProcessDescriptor::new("p", "k").with_timestep(0.0),
            Vec::<(&str, &str)>::new(),
        );
        assert!(matches!(
            config.validate(),
            Err(AssemblyError::InvalidTimestep { .. })
        ));

        let mut config = SimulationConfig::new();
        config.environment.dt = -1.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn stiff_diffusion_is_rejected() {
        // D·dt/h² = 100 needs 500 substeps, well inside the limit.
        let config = SimulationConfig::new()
            .with_spatial(SpatialConfig::new(4, 4).with_species("glc", 1.0, 100.0));
        assert!(config.validate().is_ok());

        let config = SimulationConfig::new()
            .with_spatial(SpatialConfig::new(4, 4).with_species("glc", 1.0, 1e9));
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("diffusion substeps"), "got: {}", err);
    }

    #[test]
    fn spatial_validation_checks_species_references() {
        let mut spatial = SpatialConfig::new(4, 4).with_species("glc", 1.0, 0.1);
        spatial.reactions.push(ReactionDecl {
            id: "r".into(),
            stoichiometry: [("glc".to_string(), -1.0)].into_iter().collect(),
            law: KineticLaw::MichaelisMenten {
                kcat: 1.0,
                km: 0.5,
                substrate: "glc".into(),
                catalyst: Some("enzyme".into()),
            },
        });
        let config = SimulationConfig::new().with_spatial(spatial);
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("enzyme"), "got: {}", err);
    }

    #[test]
    fn kinetic_law_is_internally_tagged() {
        let law: KineticLaw =
            serde_json::from_str(r#"{"type": "mass_action", "k": 0.2, "reactants": {"a": 1.0}}"#)
                .unwrap();
        assert!(matches!(law, KineticLaw::MassAction { k, .. } if k == 0.2));
    }
}
