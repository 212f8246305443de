//! Assembly - turns a resolved configuration into a runnable process set.
//!
//! Assembly is all-or-nothing: processes are built from the registry, ports
//! are wired, resource pools are checked, and flow edges are ordered. Any
//! failure returns an [`AssemblyError`] and nothing is kept.

use crate::registry::ProcessRegistry;
use crate::scheduler::Schedule;
use crate::wiring::{PortDeclaration, Wiring};
use cellsim_core::config::{FlowEdge, ProcessDescriptor, ResourceDecl, SimulationConfig, Topology};
use cellsim_core::error::AssemblyError;
use cellsim_core::path::StatePath;
use cellsim_core::process::{ClaimRole, PortSpec, Process};
use cellsim_core::tree::StateTree;
use cellsim_core::types::ProcessId;
use cellsim_core::value::{MergeOp, PoolKind, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

/// A built process together with its descriptor data.
#[derive(Clone)]
pub struct AssembledProcess {
    pub id: ProcessId,
    pub kind: String,
    pub timestep: f64,
    pub ports: Vec<PortSpec>,
    pub process: Arc<dyn Process>,
}

impl std::fmt::Debug for AssembledProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AssembledProcess")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("timestep", &self.timestep)
            .finish()
    }
}

/// Everything an executor needs, shared read-only between agents.
#[derive(Debug, Clone)]
pub struct Assembly {
    processes: Vec<AssembledProcess>,
    wiring: Wiring,
    schedule: Schedule,
    resources: BTreeMap<StatePath, PoolKind>,
    schema: StateTree,
}

impl Assembly {
    /// Build every process through `registry` and assemble.
    pub fn from_config(
        config: &SimulationConfig,
        registry: &ProcessRegistry,
    ) -> Result<Self, AssemblyError> {
        config.validate()?;
        let schema = StateTree::from_leaves(&config.state)?;

        let mut built = Vec::with_capacity(config.processes.len());
        for descriptor in &config.processes {
            let process = registry
                .build(&descriptor.kind, &descriptor.config)
                .ok_or_else(|| AssemblyError::UnknownKind {
                    process: descriptor.id.clone(),
                    kind: descriptor.kind.clone(),
                })?
                .map_err(|failure| AssemblyError::InvalidProcessConfig {
                    process: descriptor.id.clone(),
                    reason: failure.to_string(),
                })?;
            built.push((descriptor.clone(), process));
        }

        Self::from_parts(built, &config.topology, &config.flow, &config.resources, schema)
    }

    /// Assemble already-built processes.
    pub fn from_parts(
        processes: Vec<(ProcessDescriptor, Arc<dyn Process>)>,
        topology: &Topology,
        flow: &[FlowEdge],
        resources: &[ResourceDecl],
        schema: StateTree,
    ) -> Result<Self, AssemblyError> {
        let processes: Vec<AssembledProcess> = processes
            .into_iter()
            .map(|(descriptor, process)| AssembledProcess {
                ports: process.ports(),
                id: descriptor.id,
                kind: descriptor.kind,
                timestep: descriptor.timestep,
                process,
            })
            .collect();

        for p in &processes {
            if !(p.timestep > 0.0 && p.timestep.is_finite()) {
                return Err(AssemblyError::InvalidTimestep {
                    process: p.id.clone(),
                    timestep: p.timestep,
                });
            }
        }

        let declarations: Vec<PortDeclaration> = processes
            .iter()
            .map(|p| PortDeclaration {
                id: p.id.clone(),
                ports: p.ports.clone(),
            })
            .collect();
        let wiring = Wiring::build(&declarations, topology, &schema)?;

        let resources = check_resources(resources, &schema)?;
        check_resource_ports(&processes, &wiring, &resources)?;

        let ids: Vec<ProcessId> = processes.iter().map(|p| p.id.clone()).collect();
        let timesteps: Vec<f64> = processes.iter().map(|p| p.timestep).collect();
        let schedule = Schedule::build(&ids, &timesteps, flow)?
            .with_contention(&claimants(&processes, &wiring))?;

        Ok(Self {
            processes,
            wiring,
            schedule,
            resources,
            schema,
        })
    }

    pub fn len(&self) -> usize {
        self.processes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processes.is_empty()
    }

    pub fn process(&self, idx: usize) -> &AssembledProcess {
        &self.processes[idx]
    }

    pub fn processes(&self) -> &[AssembledProcess] {
        &self.processes
    }

    pub fn index_of(&self, id: &ProcessId) -> Option<usize> {
        self.wiring.index_of(id)
    }

    pub fn wiring(&self) -> &Wiring {
        &self.wiring
    }

    pub fn schedule(&self) -> &Schedule {
        &self.schedule
    }

    /// Pool kind of `path`, if it is a declared resource.
    pub fn pool(&self, path: &StatePath) -> Option<PoolKind> {
        self.resources.get(path).copied()
    }

    pub fn resources(&self) -> &BTreeMap<StatePath, PoolKind> {
        &self.resources
    }

    /// The validated schema with its initial values.
    pub fn schema(&self) -> &StateTree {
        &self.schema
    }
}

fn check_resources(
    decls: &[ResourceDecl],
    schema: &StateTree,
) -> Result<BTreeMap<StatePath, PoolKind>, AssemblyError> {
    let mut resources = BTreeMap::new();
    for decl in decls {
        let invalid = |reason: &str| AssemblyError::InvalidResource {
            path: decl.path.clone(),
            reason: reason.to_string(),
        };

        let leaf = schema.leaf(&decl.path).map_err(|e| invalid(&e.to_string()))?;
        if leaf.merge != MergeOp::Add {
            return Err(invalid("resource leaves must use the `add` merge operator"));
        }
        match (decl.pool, &leaf.value) {
            (PoolKind::Integer, Value::Count(n)) if *n >= 0 => {}
            (PoolKind::Real, Value::Real(x)) if *x >= 0.0 && x.is_finite() => {}
            (PoolKind::Integer, Value::Count(_)) | (PoolKind::Real, Value::Real(_)) => {
                return Err(invalid("initial value is negative"));
            }
            (PoolKind::Integer, _) => return Err(invalid("integer pools must be count leaves")),
            (PoolKind::Real, _) => return Err(invalid("real pools must be real leaves")),
        }
        if resources.insert(decl.path.clone(), decl.pool).is_some() {
            return Err(invalid("declared twice"));
        }
    }
    Ok(resources)
}

/// Claiming ports must target resources, and resources may only be written
/// through claiming ports.
fn check_resource_ports(
    processes: &[AssembledProcess],
    wiring: &Wiring,
    resources: &BTreeMap<StatePath, PoolKind>,
) -> Result<(), AssemblyError> {
    for (idx, process) in processes.iter().enumerate() {
        for spec in &process.ports {
            let Some(path) = wiring.bindings(idx).get(&spec.name) else {
                continue;
            };
            let is_resource = resources.contains_key(path);
            if spec.claims != ClaimRole::None && !is_resource {
                return Err(AssemblyError::InvalidResource {
                    path: path.clone(),
                    reason: format!(
                        "port `{}` of `{}` claims it, but it is not a declared resource",
                        spec.name, process.id
                    ),
                });
            }
            if is_resource && spec.access.can_write() && spec.claims == ClaimRole::None {
                return Err(AssemblyError::InvalidResource {
                    path: path.clone(),
                    reason: format!(
                        "port `{}` of `{}` writes it without claiming",
                        spec.name, process.id
                    ),
                });
            }
        }
    }
    Ok(())
}

/// Per claimed path, the processes holding a claiming port on it.
fn claimants(processes: &[AssembledProcess], wiring: &Wiring) -> Vec<Vec<usize>> {
    let mut by_path: BTreeMap<&StatePath, Vec<usize>> = BTreeMap::new();
    for (idx, process) in processes.iter().enumerate() {
        for spec in process.ports.iter().filter(|s| s.claims != ClaimRole::None) {
            if let Some(path) = wiring.bindings(idx).get(&spec.name) {
                let members = by_path.entry(path).or_default();
                if !members.contains(&idx) {
                    members.push(idx);
                }
            }
        }
    }
    by_path.into_values().collect()
}
