//! Dependency scheduler - which processes run in a tick, and in what order.
//!
//! Flow edges form a DAG over processes (cycles are rejected at assembly).
//! The execution order is a topological order with ties broken by
//! declaration order. Each process keeps its own elapsed-time accumulator:
//!
//! - it is **due** once the accumulator reaches its time step
//! - running subtracts exactly one time step, carrying the remainder
//! - a due process whose flow predecessor does not run this tick is
//!   **deferred**, and deferral propagates down flow edges
//!
//! Running processes are grouped into **stages**: a process sits one stage
//! after its latest running predecessor, so everything it depends on has
//! been merged before its request phase starts. Processes that claim the
//! same resource are **rivals** and always share a stage, so a contested
//! pool is split across every claimant that runs in the tick.

use cellsim_core::config::FlowEdge;
use cellsim_core::error::AssemblyError;
use cellsim_core::types::ProcessId;
use petgraph::algo::{tarjan_scc, toposort};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::{BTreeMap, BinaryHeap};

/// Relative tolerance when comparing accumulated time against a time step.
const DUE_EPSILON: f64 = 1e-9;

/// The static ordering of a set of processes.
#[derive(Debug, Clone)]
pub struct Schedule {
    graph: DiGraph<ProcessId, ()>,
    order: Vec<usize>,
    timesteps: Vec<f64>,
    rivals: Vec<Vec<usize>>,
}

/// Per-process elapsed-time accumulators. Owned per agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Clocks {
    elapsed: Vec<f64>,
}

impl Clocks {
    pub fn new(processes: usize) -> Self {
        Self {
            elapsed: vec![0.0; processes],
        }
    }

    pub fn elapsed(&self, idx: usize) -> f64 {
        self.elapsed[idx]
    }
}

/// What runs in one tick.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Activation {
    /// Processes that run, in scheduler order.
    pub running: Vec<usize>,
    /// Due processes held back because a flow predecessor does not run.
    pub deferred: Vec<usize>,
    /// `running`, grouped so that every flow predecessor of a stage's
    /// members ran in an earlier stage. Each stage is in scheduler order.
    pub stages: Vec<Vec<usize>>,
}

impl Activation {
    pub fn is_idle(&self) -> bool {
        self.running.is_empty()
    }
}

impl Schedule {
    /// Build the DAG and its stable topological order.
    ///
    /// `ids` and `timesteps` are in declaration order.
    pub fn build(
        ids: &[ProcessId],
        timesteps: &[f64],
        flow: &[FlowEdge],
    ) -> Result<Self, AssemblyError> {
        let mut graph = DiGraph::with_capacity(ids.len(), flow.len());
        let mut lookup = BTreeMap::new();
        for id in ids {
            let node = graph.add_node(id.clone());
            lookup.insert(id.clone(), node);
        }

        for edge in flow {
            let before = *lookup
                .get(&edge.before)
                .ok_or_else(|| AssemblyError::UnknownFlowProcess(edge.before.clone()))?;
            let after = *lookup
                .get(&edge.after)
                .ok_or_else(|| AssemblyError::UnknownFlowProcess(edge.after.clone()))?;
            graph.update_edge(before, after, ());
        }

        if toposort(&graph, None).is_err() {
            return Err(AssemblyError::FlowCycle {
                processes: cycle_members(&graph),
            });
        }

        let order = stable_order(&graph);
        Ok(Self {
            graph,
            order,
            timesteps: timesteps.to_vec(),
            rivals: Vec::new(),
        })
    }

    /// Make processes that claim the same resource run in one stage.
    ///
    /// `claimants` lists, per resource, the processes with a claiming port
    /// bound to it. Lists that share a process are joined. A rival group
    /// whose members are ordered by flow, directly or through other
    /// processes, can never share a stage and is rejected.
    pub fn with_contention(mut self, claimants: &[Vec<usize>]) -> Result<Self, AssemblyError> {
        let n = self.order.len();
        let mut label: Vec<usize> = (0..n).collect();
        for members in claimants {
            let Some(target) = members.iter().map(|&m| label[m]).min() else {
                continue;
            };
            let joined: Vec<usize> = members.iter().map(|&m| label[m]).collect();
            for l in label.iter_mut() {
                if joined.contains(l) {
                    *l = target;
                }
            }
        }

        let mut condensed: DiGraph<usize, ()> = DiGraph::new();
        let mut node_of: BTreeMap<usize, NodeIndex> = BTreeMap::new();
        for &l in &label {
            node_of.entry(l).or_insert_with(|| condensed.add_node(l));
        }
        for (before, after) in self.edges() {
            condensed.update_edge(node_of[&label[before]], node_of[&label[after]], ());
        }

        let mut groups: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for (idx, &l) in label.iter().enumerate() {
            groups.entry(l).or_default().push(idx);
        }

        if toposort(&condensed, None).is_err() {
            let mut processes: Vec<usize> = tarjan_scc(&condensed)
                .into_iter()
                .filter(|scc| scc.len() > 1 || condensed.contains_edge(scc[0], scc[0]))
                .flatten()
                .flat_map(|node| groups[&condensed[node]].clone())
                .filter(|&idx| groups[&label[idx]].len() > 1)
                .collect();
            processes.sort_unstable();
            return Err(AssemblyError::ContendedFlow {
                processes: processes.iter().map(|&i| self.graph[NodeIndex::new(i)].clone()).collect(),
            });
        }

        self.rivals = groups.into_values().filter(|g| g.len() > 1).collect();
        Ok(self)
    }

    /// Groups of processes that always share a stage when they run.
    pub fn rivals(&self) -> &[Vec<usize>] {
        &self.rivals
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Execution order over process indices.
    pub fn order(&self) -> &[usize] {
        &self.order
    }

    pub fn timestep(&self, idx: usize) -> f64 {
        self.timesteps[idx]
    }

    /// Direct flow predecessors of `idx`.
    pub fn predecessors(&self, idx: usize) -> Vec<usize> {
        let mut preds: Vec<usize> = self
            .graph
            .neighbors_directed(NodeIndex::new(idx), Direction::Incoming)
            .map(NodeIndex::index)
            .collect();
        preds.sort_unstable();
        preds
    }

    /// Flow edges as `(before, after)` index pairs.
    pub fn edges(&self) -> Vec<(usize, usize)> {
        let mut edges: Vec<(usize, usize)> = self
            .graph
            .edge_indices()
            .filter_map(|e| self.graph.edge_endpoints(e))
            .map(|(a, b)| (a.index(), b.index()))
            .collect();
        edges.sort_unstable();
        edges
    }

    /// Advance every clock by `dt` and decide what runs this tick.
    ///
    /// Processes that run have one time step subtracted. Deferred processes
    /// keep at most one time step of backlog.
    pub fn activate(&self, clocks: &mut Clocks, dt: f64) -> Activation {
        let n = self.order.len();
        let mut due = vec![false; n];
        for idx in 0..n {
            clocks.elapsed[idx] += dt;
            let step = self.timesteps[idx];
            due[idx] = clocks.elapsed[idx] + DUE_EPSILON * step.max(1.0) >= step;
        }

        let mut runs = vec![false; n];
        let mut activation = Activation::default();
        for &idx in &self.order {
            if !due[idx] {
                continue;
            }
            if self.predecessors(idx).iter().all(|&p| runs[p]) {
                runs[idx] = true;
                activation.running.push(idx);
            } else {
                activation.deferred.push(idx);
            }
        }

        // Raise stages until every process follows its predecessors and
        // running rivals agree. Assembly rejected rivals ordered by flow,
        // so this settles.
        let mut stage_of = vec![0usize; n];
        loop {
            let mut changed = false;
            for &idx in &activation.running {
                let floor = self
                    .predecessors(idx)
                    .iter()
                    .map(|&p| stage_of[p] + 1)
                    .max()
                    .unwrap_or(0);
                if floor > stage_of[idx] {
                    stage_of[idx] = floor;
                    changed = true;
                }
            }
            for group in &self.rivals {
                let shared = group.iter().filter(|&&i| runs[i]).map(|&i| stage_of[i]).max();
                let Some(shared) = shared else {
                    continue;
                };
                for &i in group {
                    if runs[i] && stage_of[i] < shared {
                        stage_of[i] = shared;
                        changed = true;
                    }
                }
            }
            if !changed {
                break;
            }
        }

        for &idx in &activation.running {
            let stage = stage_of[idx];
            if activation.stages.len() <= stage {
                activation.stages.resize_with(stage + 1, Vec::new);
            }
            activation.stages[stage].push(idx);
            clocks.elapsed[idx] -= self.timesteps[idx];
        }
        activation.stages.retain(|stage| !stage.is_empty());
        for &idx in &activation.deferred {
            clocks.elapsed[idx] = clocks.elapsed[idx].min(self.timesteps[idx]);
        }

        activation
    }
}

/// Kahn's algorithm, always taking the lowest declaration index available.
fn stable_order(graph: &DiGraph<ProcessId, ()>) -> Vec<usize> {
    let mut indegree: Vec<usize> = graph
        .node_indices()
        .map(|n| graph.neighbors_directed(n, Direction::Incoming).count())
        .collect();
    let mut ready: BinaryHeap<Reverse<usize>> = indegree
        .iter()
        .enumerate()
        .filter(|(_, d)| **d == 0)
        .map(|(i, _)| Reverse(i))
        .collect();

    let mut order = Vec::with_capacity(indegree.len());
    while let Some(Reverse(idx)) = ready.pop() {
        order.push(idx);
        for next in graph.neighbors_directed(NodeIndex::new(idx), Direction::Outgoing) {
            let d = &mut indegree[next.index()];
            *d -= 1;
            if *d == 0 {
                ready.push(Reverse(next.index()));
            }
        }
    }
    order
}

/// Members of the first cycle found, in declaration order, closed by
/// repeating the first member.
fn cycle_members(graph: &DiGraph<ProcessId, ()>) -> Vec<ProcessId> {
    let mut cycles: Vec<Vec<NodeIndex>> = tarjan_scc(graph)
        .into_iter()
        .filter(|scc| scc.len() > 1 || graph.contains_edge(scc[0], scc[0]))
        .collect();
    for scc in &mut cycles {
        scc.sort_unstable();
    }
    cycles.sort();

    let Some(members) = cycles.into_iter().next() else {
        return Vec::new();
    };
    let mut ids: Vec<ProcessId> = members.iter().map(|n| graph[*n].clone()).collect();
    ids.push(graph[members[0]].clone());
    ids
}
