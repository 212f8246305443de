//! Tick executor - drives one agent through one tick.
//!
//! Each tick walks the state machine
//! `Assembled → Requesting → Partitioning → Updating → Merging`, once per
//! scheduler stage:
//!
//! 1. **Requesting** - every running process of the stage sees the merged
//!    output of all earlier stages and yields an update or a request
//! 2. **Partitioning** - claims on each resource path are allotted together
//! 3. **Updating** - requesting processes are called again with their grants
//! 4. **Merging** - updates land in scheduler order through each leaf's
//!    merge operator, then every resource is checked for non-negativity
//!
//! A tick works on a copy of the tree and commits only if every stage
//! succeeds. Any error moves the executor to `Terminated`.

use crate::assembly::Assembly;
use crate::partition::{allot, PoolClaim, REAL_TOLERANCE};
use crate::scheduler::Clocks;
use cellsim_core::error::{
    AgentRuntimeError, ConservationViolation, RequestError, RequestFault, RuntimeFault, SimError,
};
use cellsim_core::path::StatePath;
use cellsim_core::process::{Grant, Grants, Intent, Update};
use cellsim_core::tree::StateTree;
use cellsim_core::types::{AgentId, ProcessId, SimClock};
use cellsim_core::value::{PoolKind, Value};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::trace;

/// Phase of the executor state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ExecutorState {
    Assembled,
    Requesting,
    Partitioning,
    Updating,
    Merging,
    Terminated,
}

/// Who is ticking, and when.
#[derive(Debug, Clone, Copy)]
pub struct TickContext {
    pub agent: AgentId,
    pub clock: SimClock,
}

/// Summary of one completed tick.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TickReport {
    pub ran: Vec<ProcessId>,
    pub deferred: Vec<ProcessId>,
    /// Resource paths where consumers were rationed.
    pub rationed: Vec<StatePath>,
}

/// Per-agent executor. The assembly is shared; clocks and phase are owned.
#[derive(Debug, Clone)]
pub struct TickExecutor {
    assembly: Arc<Assembly>,
    clocks: Clocks,
    state: ExecutorState,
}

struct Claimed {
    slot: usize,
    port: String,
    delta: f64,
}

impl TickExecutor {
    pub fn new(assembly: Arc<Assembly>) -> Self {
        let clocks = Clocks::new(assembly.len());
        Self {
            assembly,
            clocks,
            state: ExecutorState::Assembled,
        }
    }

    /// An executor for a child agent: same assembly, inherited clocks.
    pub fn fork(&self) -> Self {
        Self {
            assembly: Arc::clone(&self.assembly),
            clocks: self.clocks.clone(),
            state: ExecutorState::Assembled,
        }
    }

    pub fn state(&self) -> ExecutorState {
        self.state
    }

    pub fn clocks(&self) -> &Clocks {
        &self.clocks
    }

    pub fn assembly(&self) -> &Arc<Assembly> {
        &self.assembly
    }

    pub fn is_terminated(&self) -> bool {
        self.state == ExecutorState::Terminated
    }

    /// Explicit stop. The executor refuses further ticks.
    pub fn stop(&mut self) {
        self.transition(ExecutorState::Terminated);
    }

    fn transition(&mut self, next: ExecutorState) {
        if self.state != next {
            trace!(from = ?self.state, to = ?next, "executor phase");
            self.state = next;
        }
    }

    /// Advance `tree` by one tick of `ctx.clock.dt`.
    ///
    /// On error `tree` is left untouched and the executor is terminated.
    pub fn tick(&mut self, tree: &mut StateTree, ctx: &TickContext) -> Result<TickReport, SimError> {
        if self.is_terminated() {
            return Err(SimError::Terminated(ctx.agent));
        }

        let assembly = Arc::clone(&self.assembly);
        let mut clocks = self.clocks.clone();
        let activation = assembly.schedule().activate(&mut clocks, ctx.clock.dt);

        let mut work = tree.clone();
        let mut report = TickReport {
            ran: activation
                .running
                .iter()
                .map(|&i| assembly.process(i).id.clone())
                .collect(),
            deferred: activation
                .deferred
                .iter()
                .map(|&i| assembly.process(i).id.clone())
                .collect(),
            rationed: Vec::new(),
        };

        for stage in &activation.stages {
            if let Err(e) = self.run_stage(&assembly, &mut work, stage, ctx, &mut report) {
                self.transition(ExecutorState::Terminated);
                return Err(e);
            }
        }

        *tree = work;
        self.clocks = clocks;
        Ok(report)
    }

    fn run_stage(
        &mut self,
        assembly: &Assembly,
        work: &mut StateTree,
        stage: &[usize],
        ctx: &TickContext,
        report: &mut TickReport,
    ) -> Result<(), SimError> {
        let wiring = assembly.wiring();
        let runtime_error = |idx: usize, fault: RuntimeFault| AgentRuntimeError {
            tick: ctx.clock.tick,
            agent: ctx.agent,
            process: assembly.process(idx).id.clone(),
            fault,
        };

        // Requesting
        self.transition(ExecutorState::Requesting);
        let mut intents = Vec::with_capacity(stage.len());
        for &idx in stage {
            let entry = assembly.process(idx);
            let ports = wiring.views(idx, work);
            let intent = entry
                .process
                .request(&ports, entry.timestep)
                .map_err(|f| runtime_error(idx, RuntimeFault::Failed(f)))?;
            self.check_intent(assembly, idx, &intent, ctx)?;
            intents.push((idx, intent));
        }

        // Partitioning
        self.transition(ExecutorState::Partitioning);
        let mut claims: BTreeMap<StatePath, Vec<Claimed>> = BTreeMap::new();
        for (slot, (idx, intent)) in intents.iter().enumerate() {
            if let Intent::Request(request) = intent {
                for claim in &request.claims {
                    let path = wiring.bindings(*idx)[&claim.port].clone();
                    claims.entry(path).or_default().push(Claimed {
                        slot,
                        port: claim.port.clone(),
                        delta: claim.delta,
                    });
                }
            }
        }

        let mut grants: Vec<Grants> = vec![Grants::new(); intents.len()];
        for (path, claimed) in &claims {
            let pool = assembly.pool(path).unwrap_or_default();
            let current = work.value(path).and_then(Value::as_f64).unwrap_or(0.0);
            let pool_claims: Vec<PoolClaim> = claimed
                .iter()
                .enumerate()
                .map(|(order, c)| PoolClaim {
                    order,
                    delta: c.delta,
                })
                .collect();

            let allotment = allot(pool, current, &pool_claims).map_err(|fault| {
                let claimants: Vec<String> = claimed
                    .iter()
                    .map(|c| assembly.process(intents[c.slot].0).id.to_string())
                    .collect();
                ConservationViolation {
                    tick: ctx.clock.tick,
                    agent: ctx.agent,
                    path: path.clone(),
                    detail: format!("{} (claimants: {})", fault, claimants.join(", ")),
                }
            })?;

            if allotment.rationed {
                report.rationed.push(path.clone());
            }
            for (c, granted) in claimed.iter().zip(allotment.grants) {
                grants[c.slot].insert(
                    c.port.clone(),
                    Grant {
                        requested: c.delta,
                        granted,
                    },
                );
            }
        }

        // Updating
        self.transition(ExecutorState::Updating);
        let mut updates: Vec<(usize, Update)> = Vec::with_capacity(intents.len());
        for (slot, (idx, intent)) in intents.into_iter().enumerate() {
            let update = match intent {
                Intent::Update(update) => update,
                Intent::Request(_) => {
                    let entry = assembly.process(idx);
                    let ports = wiring.views(idx, work);
                    let update = entry
                        .process
                        .apply(&ports, &grants[slot], entry.timestep)
                        .map_err(|f| runtime_error(idx, RuntimeFault::Failed(f)))?;
                    check_grant_accounting(assembly, idx, &update, &grants[slot])
                        .map_err(|fault| runtime_error(idx, fault))?;
                    update
                }
            };
            updates.push((idx, update));
        }

        // Merging
        self.transition(ExecutorState::Merging);
        for (idx, update) in updates {
            let bindings = wiring.bindings(idx);
            for write in update.writes {
                let spec = wiring
                    .spec(idx, &write.port)
                    .ok_or_else(|| runtime_error(idx, RuntimeFault::UndeclaredPort(write.port.clone())))?;
                if !spec.access.can_write() {
                    return Err(runtime_error(idx, RuntimeFault::ReadOnlyPort(write.port)).into());
                }
                let path = bindings[&write.port].extend(write.key.as_slice());
                work.merge(&path, write.value).map_err(|source| {
                    runtime_error(
                        idx,
                        RuntimeFault::Merge {
                            port: write.port.clone(),
                            source,
                        },
                    )
                })?;
            }
        }

        check_non_negative(assembly, work, ctx)
    }

    /// Validate a request-phase intent against the port declarations.
    fn check_intent(
        &self,
        assembly: &Assembly,
        idx: usize,
        intent: &Intent,
        ctx: &TickContext,
    ) -> Result<(), SimError> {
        let wiring = assembly.wiring();
        let bindings = wiring.bindings(idx);
        let request_error = |fault: RequestFault| RequestError {
            tick: ctx.clock.tick,
            agent: ctx.agent,
            process: assembly.process(idx).id.clone(),
            fault,
        };

        match intent {
            Intent::Update(update) => {
                for write in &update.writes {
                    let Some(base) = bindings.get(&write.port) else {
                        continue;
                    };
                    let path = base.extend(write.key.as_slice());
                    if assembly.pool(&path).is_some() {
                        return Err(request_error(RequestFault::DirectWriteToResource {
                            port: write.port.clone(),
                            path,
                        })
                        .into());
                    }
                }
            }
            Intent::Request(request) => {
                let mut seen = BTreeSet::new();
                for claim in &request.claims {
                    let port = claim.port.clone();
                    let spec = wiring
                        .spec(idx, &claim.port)
                        .ok_or_else(|| request_error(RequestFault::UnknownPort(port.clone())))?;
                    let path = &bindings[&claim.port];
                    let pool = assembly.pool(path).ok_or_else(|| {
                        request_error(RequestFault::NotAResource {
                            port: port.clone(),
                            path: path.clone(),
                        })
                    })?;
                    if !claim.delta.is_finite() {
                        return Err(request_error(RequestFault::NonFinite { port }).into());
                    }
                    if pool == PoolKind::Integer && claim.delta.fract() != 0.0 {
                        return Err(request_error(RequestFault::NonIntegral {
                            port,
                            delta: claim.delta,
                        })
                        .into());
                    }
                    if !spec.claims.permits(claim.delta) {
                        return Err(request_error(RequestFault::RoleMismatch {
                            port,
                            delta: claim.delta,
                        })
                        .into());
                    }
                    if !seen.insert(claim.port.as_str()) {
                        return Err(request_error(RequestFault::DuplicateClaim { port }).into());
                    }
                }
            }
        }
        Ok(())
    }
}

/// Writes on resource paths must stay within what was granted, in the
/// granted direction.
fn check_grant_accounting(
    assembly: &Assembly,
    idx: usize,
    update: &Update,
    grants: &Grants,
) -> Result<(), RuntimeFault> {
    let bindings = assembly.wiring().bindings(idx);

    let mut granted: BTreeMap<StatePath, f64> = BTreeMap::new();
    for (port, grant) in grants.iter() {
        *granted.entry(bindings[port].clone()).or_default() += grant.granted;
    }

    let mut written: BTreeMap<StatePath, (f64, &str)> = BTreeMap::new();
    for write in &update.writes {
        let Some(base) = bindings.get(&write.port) else {
            continue;
        };
        let path = base.extend(write.key.as_slice());
        if assembly.pool(&path).is_none() {
            continue;
        }
        let amount = write.value.as_f64().unwrap_or(0.0);
        let entry = written.entry(path).or_insert((0.0, write.port.as_str()));
        entry.0 += amount;
    }

    for (path, (amount, port)) in written {
        let allowed = granted.get(&path).copied().unwrap_or(0.0);
        let slack = match assembly.pool(&path) {
            Some(PoolKind::Real) => REAL_TOLERANCE * allowed.abs().max(1.0),
            _ => 0.0,
        };
        let same_direction = amount == 0.0 || amount.signum() == allowed.signum();
        if !same_direction || amount.abs() > allowed.abs() + slack {
            return Err(RuntimeFault::GrantExceeded {
                port: port.to_string(),
                granted: allowed,
                written: amount,
            });
        }
    }
    Ok(())
}

/// Every resource must be non-negative after a merge. Real pools may carry
/// rounding dust below zero, which is snapped to zero.
fn check_non_negative(
    assembly: &Assembly,
    work: &mut StateTree,
    ctx: &TickContext,
) -> Result<(), SimError> {
    for (path, pool) in assembly.resources() {
        let Some(value) = work.value(path).and_then(Value::as_f64) else {
            continue;
        };
        if value >= 0.0 {
            continue;
        }
        if *pool == PoolKind::Real && value > -REAL_TOLERANCE {
            work.set_value(path, Value::Real(0.0))
                .map_err(|e| SimError::Field(e.to_string()))?;
            continue;
        }
        return Err(ConservationViolation {
            tick: ctx.clock.tick,
            agent: ctx.agent,
            path: path.clone(),
            detail: format!("value {} after merge", value),
        }
        .into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use cellsim_core::config::{ProcessDescriptor, ResourceDecl};
    use cellsim_core::error::ProcessFailure;
    use cellsim_core::process::{PortSpec, Ports, Process, ResourceRequest};
    use cellsim_core::tree::LeafDecl;
    use cellsim_core::value::{MergeOp, Shape};
    use cellsim_core::config::{FlowEdge, Topology};
    use std::sync::Mutex;

    /// Consumes `want` units and records the grant it received.
    struct Eater {
        want: f64,
        seen: Arc<Mutex<Vec<f64>>>,
    }

    impl Process for Eater {
        fn kind(&self) -> &str {
            "eater"
        }

        fn ports(&self) -> Vec<PortSpec> {
            vec![PortSpec::consumes("food")]
        }

        fn request(&self, _ports: &Ports<'_>, _dt: f64) -> Result<Intent, ProcessFailure> {
            Ok(ResourceRequest::new().consume("food", self.want).into())
        }

        fn apply(&self, _ports: &Ports<'_>, grants: &Grants, _dt: f64) -> Result<Update, ProcessFailure> {
            let granted = grants.granted("food");
            self.seen.lock().unwrap().push(granted);
            Ok(Update::new().set("food", Value::Count(granted as i64)))
        }
    }

    /// Misbehaves by taking more than granted.
    struct Glutton;

    impl Process for Glutton {
        fn kind(&self) -> &str {
            "glutton"
        }

        fn ports(&self) -> Vec<PortSpec> {
            vec![PortSpec::consumes("food")]
        }

        fn request(&self, _ports: &Ports<'_>, _dt: f64) -> Result<Intent, ProcessFailure> {
            Ok(ResourceRequest::new().consume("food", 1.0).into())
        }

        fn apply(&self, _ports: &Ports<'_>, _grants: &Grants, _dt: f64) -> Result<Update, ProcessFailure> {
            Ok(Update::new().set("food", Value::Count(-50)))
        }
    }

    /// Writes a direct update to whatever its port is wired to.
    struct Setter(Value);

    impl Process for Setter {
        fn kind(&self) -> &str {
            "setter"
        }

        fn ports(&self) -> Vec<PortSpec> {
            vec![PortSpec::write("out", Shape::Any)]
        }

        fn request(&self, _ports: &Ports<'_>, _dt: f64) -> Result<Intent, ProcessFailure> {
            Ok(Update::new().set("out", self.0.clone()).into())
        }
    }

    /// Copies the value of `src` into `dst`.
    struct Copier;

    impl Process for Copier {
        fn kind(&self) -> &str {
            "copier"
        }

        fn ports(&self) -> Vec<PortSpec> {
            vec![
                PortSpec::read("src", Shape::Count),
                PortSpec::write("dst", Shape::Count),
            ]
        }

        fn request(&self, ports: &Ports<'_>, _dt: f64) -> Result<Intent, ProcessFailure> {
            Ok(Update::new().set("dst", ports.count("src")?).into())
        }
    }

    fn schema() -> StateTree {
        StateTree::from_leaves(&[
            LeafDecl::new("food", Value::Count(10)).with_merge(MergeOp::Add),
            LeafDecl::new("v", Value::Count(0)),
            LeafDecl::new("observed", Value::Count(-1)),
        ])
        .unwrap()
    }

    fn topology(entries: &[(&str, &str, &str)]) -> Topology {
        let mut topology = Topology::new();
        for (process, port, path) in entries {
            topology
                .entry(ProcessId::new(*process))
                .or_default()
                .insert(port.to_string(), StatePath::parse(path));
        }
        topology
    }

    fn food_resource() -> Vec<ResourceDecl> {
        vec![ResourceDecl {
            path: StatePath::parse("food"),
            pool: PoolKind::Integer,
        }]
    }

    fn ctx(tick: u64) -> TickContext {
        TickContext {
            agent: AgentId::from_seed(0),
            clock: SimClock {
                tick,
                time: tick as f64,
                dt: 1.0,
            },
        }
    }

    #[test]
    fn contested_pool_is_rationed_exactly() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let processes: Vec<(ProcessDescriptor, Arc<dyn Process>)> = vec![
            (
                ProcessDescriptor::new("a", "eater"),
                Arc::new(Eater { want: 8.0, seen: Arc::clone(&seen) }),
            ),
            (
                ProcessDescriptor::new("b", "eater"),
                Arc::new(Eater { want: 8.0, seen: Arc::clone(&seen) }),
            ),
        ];
        let topo = topology(&[("a", "food", "food"), ("b", "food", "food")]);
        let assembly =
            Assembly::from_parts(processes, &topo, &[], &food_resource(), schema()).unwrap();

        let mut tree = assembly.schema().clone();
        let mut executor = TickExecutor::new(Arc::new(assembly));
        let report = executor.tick(&mut tree, &ctx(0)).unwrap();

        assert_eq!(*seen.lock().unwrap(), vec![-5.0, -5.0]);
        assert_eq!(tree.value(&StatePath::parse("food")), Some(&Value::Count(0)));
        assert_eq!(report.rationed, vec![StatePath::parse("food")]);
        assert_eq!(executor.state(), ExecutorState::Merging);
    }

    #[test]
    fn pool_is_shared_across_stages() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let processes: Vec<(ProcessDescriptor, Arc<dyn Process>)> = vec![
            (
                ProcessDescriptor::new("a", "eater"),
                Arc::new(Eater { want: 10.0, seen: Arc::clone(&seen) }),
            ),
            (
                ProcessDescriptor::new("b", "eater"),
                Arc::new(Eater { want: 10.0, seen: Arc::clone(&seen) }),
            ),
            (ProcessDescriptor::new("w", "setter"), Arc::new(Setter(Value::Count(1)))),
        ];
        let topo = topology(&[("a", "food", "food"), ("b", "food", "food"), ("w", "out", "v")]);
        let flow = vec![FlowEdge {
            before: ProcessId::new("w"),
            after: ProcessId::new("b"),
        }];
        let assembly =
            Assembly::from_parts(processes, &topo, &flow, &food_resource(), schema()).unwrap();

        let mut tree = assembly.schema().clone();
        let mut executor = TickExecutor::new(Arc::new(assembly));
        let report = executor.tick(&mut tree, &ctx(0)).unwrap();

        assert_eq!(*seen.lock().unwrap(), vec![-5.0, -5.0]);
        assert_eq!(tree.value(&StatePath::parse("food")), Some(&Value::Count(0)));
        assert_eq!(report.rationed, vec![StatePath::parse("food")]);
    }

    #[test]
    fn flow_successor_observes_merged_output() {
        let processes: Vec<(ProcessDescriptor, Arc<dyn Process>)> = vec![
            (ProcessDescriptor::new("reader", "copier"), Arc::new(Copier)),
            (ProcessDescriptor::new("writer", "setter"), Arc::new(Setter(Value::Count(42)))),
        ];
        let topo = topology(&[
            ("writer", "out", "v"),
            ("reader", "src", "v"),
            ("reader", "dst", "observed"),
        ]);
        let flow = vec![FlowEdge {
            before: ProcessId::new("writer"),
            after: ProcessId::new("reader"),
        }];
        let assembly = Assembly::from_parts(processes, &topo, &flow, &[], schema()).unwrap();

        let mut tree = assembly.schema().clone();
        let mut executor = TickExecutor::new(Arc::new(assembly));
        executor.tick(&mut tree, &ctx(0)).unwrap();
        assert_eq!(
            tree.value(&StatePath::parse("observed")),
            Some(&Value::Count(42)),
            "reader must see the writer's merge from the same tick"
        );
    }

    #[test]
    fn grant_overrun_terminates_and_leaves_tree_untouched() {
        let processes: Vec<(ProcessDescriptor, Arc<dyn Process>)> =
            vec![(ProcessDescriptor::new("g", "glutton"), Arc::new(Glutton))];
        let topo = topology(&[("g", "food", "food")]);
        let assembly =
            Assembly::from_parts(processes, &topo, &[], &food_resource(), schema()).unwrap();

        let mut tree = assembly.schema().clone();
        let before = tree.clone();
        let mut executor = TickExecutor::new(Arc::new(assembly));
        let err = executor.tick(&mut tree, &ctx(3)).unwrap_err();

        match err {
            SimError::Runtime(e) => {
                assert_eq!(e.tick, 3);
                assert_eq!(e.process, ProcessId::new("g"));
                assert!(matches!(e.fault, RuntimeFault::GrantExceeded { .. }));
            }
            other => panic!("expected runtime error, got {:?}", other),
        }
        assert_eq!(tree, before);
        assert!(executor.is_terminated());
        assert!(matches!(
            executor.tick(&mut tree, &ctx(4)),
            Err(SimError::Terminated(_))
        ));
    }

    #[test]
    fn shape_violating_update_is_reported() {
        let processes: Vec<(ProcessDescriptor, Arc<dyn Process>)> =
            vec![(ProcessDescriptor::new("s", "setter"), Arc::new(Setter(Value::Bool(true))))];
        let topo = topology(&[("s", "out", "v")]);
        let assembly = Assembly::from_parts(processes, &topo, &[], &[], schema()).unwrap();

        let mut tree = assembly.schema().clone();
        let mut executor = TickExecutor::new(Arc::new(assembly));
        let err = executor.tick(&mut tree, &ctx(0)).unwrap_err();
        assert!(matches!(
            err,
            SimError::Runtime(AgentRuntimeError {
                fault: RuntimeFault::Merge { .. },
                ..
            })
        ));
    }

    #[test]
    fn slow_process_runs_on_its_own_period() {
        let processes: Vec<(ProcessDescriptor, Arc<dyn Process>)> = vec![(
            ProcessDescriptor::new("s", "setter").with_timestep(3.0),
            Arc::new(Setter(Value::Count(7))),
        )];
        let topo = topology(&[("s", "out", "v")]);
        let assembly = Assembly::from_parts(processes, &topo, &[], &[], schema()).unwrap();

        let mut tree = assembly.schema().clone();
        let mut executor = TickExecutor::new(Arc::new(assembly));
        let ran: Vec<bool> = (0..6)
            .map(|t| !executor.tick(&mut tree, &ctx(t)).unwrap().ran.is_empty())
            .collect();
        assert_eq!(ran, vec![false, false, true, false, false, true]);
    }
}
