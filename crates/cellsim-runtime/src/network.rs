//! Causality network export.
//!
//! Turns an assembled topology into a bipartite graph of process nodes and
//! state nodes, plus the flow edges between processes, ready to be written
//! as JSON for visualisation.

use crate::assembly::Assembly;
use cellsim_core::process::ClaimRole;
use cellsim_core::value::PoolKind;
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Process,
    State,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    /// State → process.
    Read,
    /// Process → state, through a direct update.
    Write,
    /// Process → state, through a resource claim.
    Claim,
    /// Process → process; the target observes the source's merges.
    Flow,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NetworkNode {
    pub id: String,
    pub kind: NodeKind,
    pub label: String,
    /// Registry kind, for process nodes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub process_kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestep: Option<f64>,
    /// Pool kind, for state nodes declared as resources.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource: Option<PoolKind>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NetworkEdge {
    pub source: String,
    pub target: String,
    pub kind: EdgeKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<String>,
}

/// Nodes and edges of the causality network.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CausalityNetwork {
    pub nodes: Vec<NetworkNode>,
    pub edges: Vec<NetworkEdge>,
}

fn process_node_id(id: &str) -> String {
    format!("process:{}", id)
}

fn state_node_id(path: &str) -> String {
    format!("state:{}", path)
}

impl CausalityNetwork {
    pub fn from_assembly(assembly: &Assembly) -> Self {
        let wiring = assembly.wiring();
        let mut network = Self::default();

        for process in assembly.processes() {
            network.nodes.push(NetworkNode {
                id: process_node_id(process.id.as_str()),
                kind: NodeKind::Process,
                label: process.id.to_string(),
                process_kind: Some(process.kind.clone()),
                timestep: Some(process.timestep),
                resource: None,
            });
        }

        let mut states = BTreeMap::new();
        for path in wiring.paths() {
            states.insert(path.to_string(), assembly.pool(path));
        }
        for (path, resource) in &states {
            network.nodes.push(NetworkNode {
                id: state_node_id(path),
                kind: NodeKind::State,
                label: path.clone(),
                process_kind: None,
                timestep: None,
                resource: *resource,
            });
        }

        for (idx, process) in assembly.processes().iter().enumerate() {
            let pid = process_node_id(process.id.as_str());
            for spec in wiring.specs(idx) {
                let Some(path) = wiring.bindings(idx).get(&spec.name) else {
                    continue;
                };
                let sid = state_node_id(&path.to_string());
                let edge = |source: &str, target: &str, kind| NetworkEdge {
                    source: source.to_string(),
                    target: target.to_string(),
                    kind,
                    port: Some(spec.name.clone()),
                };

                if spec.access.can_read() {
                    network.edges.push(edge(&sid, &pid, EdgeKind::Read));
                }
                if spec.claims != ClaimRole::None {
                    network.edges.push(edge(&pid, &sid, EdgeKind::Claim));
                } else if spec.access.can_write() {
                    network.edges.push(edge(&pid, &sid, EdgeKind::Write));
                }
            }
        }

        for (before, after) in assembly.schedule().edges() {
            network.edges.push(NetworkEdge {
                source: process_node_id(assembly.process(before).id.as_str()),
                target: process_node_id(assembly.process(after).id.as_str()),
                kind: EdgeKind::Flow,
                port: None,
            });
        }

        network
    }

    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn count(&self, kind: NodeKind) -> usize {
        self.nodes.iter().filter(|n| n.kind == kind).count()
    }

    pub fn edges_of(&self, kind: EdgeKind) -> impl Iterator<Item = &NetworkEdge> {
        self.edges.iter().filter(move |e| e.kind == kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cellsim_core::config::{ProcessDescriptor, SimulationConfig};
    use cellsim_core::error::ProcessFailure;
    use cellsim_core::process::{Intent, PortSpec, Ports, Process, Update};
    use cellsim_core::tree::LeafDecl;
    use cellsim_core::value::{MergeOp, Shape, Value};
    use crate::registry::ProcessRegistry;
    use std::sync::Arc;

    struct Stub(Vec<PortSpec>);

    impl Process for Stub {
        fn kind(&self) -> &str {
            "stub"
        }

        fn ports(&self) -> Vec<PortSpec> {
            self.0.clone()
        }

        fn request(&self, _ports: &Ports<'_>, _dt: f64) -> Result<Intent, ProcessFailure> {
            Ok(Update::new().into())
        }
    }

    #[test]
    fn exports_reads_writes_claims_and_flow() {
        let registry = ProcessRegistry::new()
            .with("eat", |_| {
                Ok(Arc::new(Stub(vec![
                    PortSpec::consumes("food"),
                    PortSpec::write("signal", Shape::Bool),
                ])))
            })
            .with("watch", |_| Ok(Arc::new(Stub(vec![PortSpec::read("signal", Shape::Bool)]))));

        let config = SimulationConfig::new()
            .with_leaf(LeafDecl::new("food", Value::Count(5)).with_merge(MergeOp::Add))
            .with_leaf(LeafDecl::new("signal", Value::Bool(false)))
            .with_process(
                ProcessDescriptor::new("eater", "eat"),
                [("food", "food"), ("signal", "signal")],
            )
            .with_process(ProcessDescriptor::new("watcher", "watch"), [("signal", "signal")])
            .with_resource("food", PoolKind::Integer)
            .with_flow("eater", "watcher");
        let assembly = Assembly::from_config(&config, &registry).unwrap();

        let network = CausalityNetwork::from_assembly(&assembly);
        assert_eq!(network.count(NodeKind::Process), 2);
        assert_eq!(network.count(NodeKind::State), 2);
        assert_eq!(network.edges_of(EdgeKind::Claim).count(), 1);
        assert_eq!(network.edges_of(EdgeKind::Write).count(), 1);
        // food is read by its consumer, signal by the watcher
        assert_eq!(network.edges_of(EdgeKind::Read).count(), 2);

        let flow: Vec<&NetworkEdge> = network.edges_of(EdgeKind::Flow).collect();
        assert_eq!(flow.len(), 1);
        assert_eq!(flow[0].source, "process:eater");
        assert_eq!(flow[0].target, "process:watcher");

        let json = network.to_json_pretty().unwrap();
        assert!(json.contains("\"resource\": \"integer\""), "json was: {}", json);
    }
}
