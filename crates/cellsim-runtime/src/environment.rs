//! Environment - the population of agents sharing one field.
//!
//! The environment owns the global clock and advances it in fixed sub-ticks.
//! Each sub-tick runs, in order:
//!
//! 1. every agent's executor, in parallel (agents never share state)
//! 2. boundary exchange between agents and their field cells
//! 3. division of agents whose division flag is set
//! 4. lysis of agents whose lysis flag is set
//! 5. one reaction-diffusion step of the field
//! 6. refresh of each agent's view of its local field concentrations
//!
//! after which the clock advances and, every `emit_every` sub-ticks, one
//! snapshot per agent goes to the emitter. Agents live in an arena keyed by
//! id, so iteration order is the id order and identical runs are identical.

use crate::assembly::Assembly;
use crate::division::{split_tree, LeafSplitter, SplitterRegistry};
use crate::emit::NullEmitter;
use crate::exchange::{exchange, Participant};
use crate::executor::{TickContext, TickExecutor, TickReport};
use crate::lattice::Lattice;
use crate::registry::ProcessRegistry;
use cellsim_core::config::{EnvironmentConfig, ErrorPolicy, SimulationConfig, SpeciesBinding};
use cellsim_core::emitter::{EmitRecord, Emitter};
use cellsim_core::error::{AssemblyError, SimError};
use cellsim_core::path::StatePath;
use cellsim_core::tree::StateTree;
use cellsim_core::types::{AgentId, Position, SimClock, Tick};
use cellsim_core::value::{Shape, Value};
use rayon::prelude::*;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// One simulated cell: its state tree and its executor.
#[derive(Debug, Clone)]
pub struct Agent {
    id: AgentId,
    parent: Option<AgentId>,
    born_at: Tick,
    tree: StateTree,
    executor: TickExecutor,
}

impl Agent {
    pub fn id(&self) -> AgentId {
        self.id
    }

    pub fn parent(&self) -> Option<AgentId> {
        self.parent
    }

    /// Sub-tick at which the agent was created.
    pub fn born_at(&self) -> Tick {
        self.born_at
    }

    pub fn tree(&self) -> &StateTree {
        &self.tree
    }

    pub fn executor(&self) -> &TickExecutor {
        &self.executor
    }
}

/// Events that occur during a sub-tick.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum EnvironmentEvent {
    /// An agent entered the population.
    Spawned { id: AgentId, parent: Option<AgentId> },
    /// A parent split into two children and was destroyed.
    Divided { parent: AgentId, children: [AgentId; 2] },
    /// An agent burst; its contents went into the field.
    Lysed { id: AgentId, injected: BTreeMap<String, f64> },
    /// An agent failed and was removed under the isolate policy.
    Isolated { id: AgentId, error: String },
    /// An agent was removed through the boundary API.
    Removed { id: AgentId },
    /// A sub-tick completed.
    SubTickComplete {
        tick: Tick,
        alive: usize,
        divided: usize,
        lysed: usize,
        isolated: usize,
    },
}

/// Statistics about the environment.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnvironmentStats {
    pub tick: Tick,
    pub time: f64,
    pub agents_alive: usize,
    pub total_spawned: usize,
    pub total_divided: usize,
    pub total_lysed: usize,
    pub total_isolated: usize,
    pub total_removed: usize,
    /// Species → total amount in the field.
    pub field_totals: BTreeMap<String, f64>,
}

/// Cooperative cancellation, checked between sub-ticks.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// How a [`Environment::run`] ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RunOutcome {
    /// Every requested sub-tick ran.
    Completed,
    /// The cancel token fired; all executors are terminated.
    Cancelled,
    /// The population died out before the last sub-tick.
    Extinct,
}

#[derive(Debug, Clone, Copy, Default)]
struct Counters {
    spawned: usize,
    divided: usize,
    lysed: usize,
    isolated: usize,
    removed: usize,
}

/// The multi-agent environment.
pub struct Environment {
    assembly: Arc<Assembly>,
    config: EnvironmentConfig,
    lattice: Option<Lattice>,
    bindings: Vec<SpeciesBinding>,
    agents: BTreeMap<AgentId, Agent>,
    next_agent: u64,
    clock: SimClock,
    splitters: SplitterRegistry,
    emitter: Box<dyn Emitter>,
    event_history: Vec<(Tick, EnvironmentEvent)>,
    counters: Counters,
}

impl Environment {
    /// Assemble the processes, build the field and place the seed agents.
    pub fn from_config(config: &SimulationConfig, registry: &ProcessRegistry) -> Result<Self, SimError> {
        let assembly = Arc::new(Assembly::from_config(config, registry)?);
        check_environment_paths(config, assembly.schema())?;

        let mut env = Self {
            lattice: config.spatial.as_ref().map(Lattice::from_config),
            bindings: config
                .spatial
                .as_ref()
                .map(|s| s.bindings.clone())
                .unwrap_or_default(),
            clock: SimClock::new(config.environment.dt),
            config: config.environment.clone(),
            assembly,
            agents: BTreeMap::new(),
            next_agent: 0,
            splitters: SplitterRegistry::new(),
            emitter: Box::new(NullEmitter),
            event_history: Vec::new(),
            counters: Counters::default(),
        };

        for seed in &config.environment.seeds {
            let mut tree = env.assembly.schema().clone();
            for (path, value) in &seed.overrides {
                tree.set_value(path, value.clone()).map_err(|e| {
                    AssemblyError::Config(format!("seed override at {}: {}", path, e))
                })?;
            }
            if let (Some([x, y]), Some(path)) = (seed.location, &config.environment.location_path) {
                let encoded = match tree.value(path) {
                    Some(Value::Record(_)) => {
                        let mut fields = BTreeMap::new();
                        fields.insert("x".to_string(), Value::Real(x));
                        fields.insert("y".to_string(), Value::Real(y));
                        Value::Record(fields)
                    }
                    _ => Position::new(x, y).to_value(),
                };
                tree.set_value(path, encoded).map_err(|e| {
                    AssemblyError::Config(format!("seed location at {}: {}", path, e))
                })?;
            }
            env.spawn_agent(tree, None)?;
        }
        env.refresh_externals()?;
        Ok(env)
    }

    /// Route snapshots to `emitter`.
    pub fn with_emitter(mut self, emitter: impl Emitter + 'static) -> Self {
        self.emitter = Box::new(emitter);
        self
    }

    pub fn set_emitter(&mut self, emitter: Box<dyn Emitter>) {
        self.emitter = emitter;
    }

    /// Register a custom split rule for structured leaves.
    pub fn with_splitter(mut self, name: impl Into<String>, splitter: impl LeafSplitter + 'static) -> Self {
        self.splitters.register(name, splitter);
        self
    }

    /// Add an agent with a fresh executor.
    ///
    /// The tree must provide every wired path with the schema's shape, and
    /// every declared resource with a finite, non-negative amount.
    pub fn spawn_agent(&mut self, initial_state: StateTree, parent: Option<AgentId>) -> Result<AgentId, SimError> {
        let schema = self.assembly.schema();
        for path in self.assembly.wiring().paths() {
            let expected = schema.shape_at(path);
            let found = initial_state.shape_at(path);
            if found != expected {
                return Err(SimError::Config(format!(
                    "spawned state has {} at {}, expected {}",
                    found.map_or("nothing".to_string(), |s| s.to_string()),
                    path,
                    expected.unwrap_or(Shape::Any),
                )));
            }
        }
        for path in self.assembly.resources().keys() {
            match initial_state.value(path).and_then(Value::as_f64) {
                Some(amount) if amount >= 0.0 && amount.is_finite() => {}
                Some(amount) => {
                    return Err(SimError::Config(format!(
                        "spawned state holds {} at resource {}",
                        amount, path
                    )));
                }
                None => {
                    return Err(SimError::Config(format!(
                        "spawned state has no amount at resource {}",
                        path
                    )));
                }
            }
        }
        let executor = TickExecutor::new(Arc::clone(&self.assembly));
        Ok(self.insert_agent(initial_state, executor, parent))
    }

    fn insert_agent(&mut self, tree: StateTree, executor: TickExecutor, parent: Option<AgentId>) -> AgentId {
        let id = AgentId::from_seed(self.next_agent);
        self.next_agent += 1;
        self.agents.insert(
            id,
            Agent {
                id,
                parent,
                born_at: self.clock.tick,
                tree,
                executor,
            },
        );
        self.counters.spawned += 1;
        self.record(EnvironmentEvent::Spawned { id, parent });
        id
    }

    /// Remove an agent from the population.
    pub fn remove_agent(&mut self, id: AgentId) -> Result<Agent, SimError> {
        let mut agent = self.agents.remove(&id).ok_or(SimError::UnknownAgent(id))?;
        agent.executor.stop();
        self.counters.removed += 1;
        self.record(EnvironmentEvent::Removed { id });
        Ok(agent)
    }

    /// Field concentrations in the cell containing `location`.
    pub fn field_at(&self, location: Position) -> Option<BTreeMap<String, f64>> {
        self.lattice
            .as_ref()
            .map(|lattice| lattice.concentrations_at(lattice.cell_of(location)))
    }

    /// Add amounts (not concentrations) of species to the cell containing
    /// `location`. Nothing changes if any species is unknown or would go
    /// negative.
    pub fn apply_field_delta(&mut self, location: Position, deltas: &BTreeMap<String, f64>) -> Result<(), SimError> {
        let lattice = self
            .lattice
            .as_mut()
            .ok_or_else(|| SimError::Field("no spatial field is configured".into()))?;
        let cell = lattice.cell_of(location);
        for (species, delta) in deltas {
            let held = lattice
                .amount(species, cell)
                .ok_or_else(|| SimError::Field(format!("unknown species `{}`", species)))?;
            if !delta.is_finite() || held + delta < -1e-9 {
                return Err(SimError::Field(format!(
                    "delta {} on `{}` at cell {} would leave {}",
                    delta,
                    species,
                    cell,
                    held + delta
                )));
            }
        }
        for (species, delta) in deltas {
            lattice.add_amount(species, cell, *delta).map_err(SimError::Field)?;
        }
        Ok(())
    }

    /// Advance the whole environment by one sub-tick.
    pub fn step(&mut self) -> Result<Vec<EnvironmentEvent>, SimError> {
        let history_start = self.event_history.len();
        let tick = self.clock.tick;

        // Agents
        let clock = self.clock;
        let tick_one = |(id, agent): (&AgentId, &mut Agent)| {
            let ctx = TickContext { agent: *id, clock };
            (*id, agent.executor.tick(&mut agent.tree, &ctx))
        };
        let mut results: Vec<(AgentId, Result<TickReport, SimError>)> = if self.config.parallel {
            self.agents.par_iter_mut().map(tick_one).collect()
        } else {
            self.agents.iter_mut().map(tick_one).collect()
        };
        results.sort_by_key(|(id, _)| *id);

        let mut processes_ran = 0;
        let mut isolated = 0;
        for (id, result) in results {
            match result {
                Ok(report) => processes_ran += report.ran.len(),
                Err(e) => {
                    self.handle_failure(id, e)?;
                    isolated += 1;
                }
            }
        }

        // Boundary exchange
        if let Some(lattice) = self.lattice.as_mut() {
            let location_path = self.config.location_path.as_ref();
            let mut participants: Vec<Participant<'_>> = self
                .agents
                .values_mut()
                .map(|agent| Participant {
                    agent: agent.id,
                    cell: lattice.cell_of(location_of(&agent.tree, location_path)),
                    tree: &mut agent.tree,
                })
                .collect();
            let report = exchange(lattice, &self.bindings, &mut participants, tick)?;
            if report.rationed > 0 {
                debug!(tick, pools = report.rationed, "field uptake rationed");
            }
        }

        // Division
        let mut divided = 0;
        if let Some(flag) = self.config.division_flag.clone() {
            for id in self.flagged(&flag) {
                if self.agents.len() >= self.config.max_agents {
                    debug!(tick, agent = %id, max = self.config.max_agents, "division suppressed at population cap");
                    continue;
                }
                match self.divide(id, &flag) {
                    Ok(_) => divided += 1,
                    Err(e) => {
                        self.handle_failure(id, e)?;
                        isolated += 1;
                    }
                }
            }
        }

        // Lysis
        let mut lysed = 0;
        if let Some(flag) = self.config.lysis_flag.clone() {
            for id in self.flagged(&flag) {
                self.lyse(id)?;
                lysed += 1;
            }
        }

        // Field
        if let Some(lattice) = self.lattice.as_mut() {
            lattice.step(self.clock.dt);
        }
        self.refresh_externals()?;

        self.clock = self.clock.advanced();
        if self.clock.tick % self.config.emit_every == 0 {
            self.emit_snapshots();
        }

        debug!(
            tick,
            alive = self.agents.len(),
            processes_ran,
            divided,
            lysed,
            isolated,
            "sub-tick complete"
        );
        self.record(EnvironmentEvent::SubTickComplete {
            tick,
            alive: self.agents.len(),
            divided,
            lysed,
            isolated,
        });

        Ok(self.event_history[history_start..]
            .iter()
            .map(|(_, event)| event.clone())
            .collect())
    }

    /// Run up to `ticks` sub-ticks, stopping early on cancellation or
    /// extinction. The emitter is flushed however the run ends.
    pub fn run(&mut self, ticks: u64, cancel: &CancelToken) -> Result<RunOutcome, SimError> {
        let outcome = self.run_inner(ticks, cancel);
        self.emitter.flush();
        outcome
    }

    fn run_inner(&mut self, ticks: u64, cancel: &CancelToken) -> Result<RunOutcome, SimError> {
        for _ in 0..ticks {
            if cancel.is_cancelled() {
                for agent in self.agents.values_mut() {
                    agent.executor.stop();
                }
                info!(tick = self.clock.tick, "run cancelled");
                return Ok(RunOutcome::Cancelled);
            }
            if self.agents.is_empty() {
                info!(tick = self.clock.tick, "population extinct");
                return Ok(RunOutcome::Extinct);
            }
            self.step()?;
        }
        Ok(RunOutcome::Completed)
    }

    /// Send one snapshot per agent to the emitter.
    pub fn emit_snapshots(&mut self) {
        for agent in self.agents.values() {
            self.emitter.emit(EmitRecord {
                time: self.clock.time,
                tick: self.clock.tick,
                agent: agent.id,
                state: agent.tree.to_json(),
            });
        }
    }

    /// Isolate or propagate a failure attributed to `id`.
    fn handle_failure(&mut self, id: AgentId, error: SimError) -> Result<(), SimError> {
        if matches!(error, SimError::Conservation(_)) || self.config.error_policy == ErrorPolicy::Strict {
            return Err(error);
        }
        warn!(agent = %id, %error, "agent isolated");
        self.agents.remove(&id);
        self.counters.isolated += 1;
        self.record(EnvironmentEvent::Isolated {
            id,
            error: error.to_string(),
        });
        Ok(())
    }

    /// Agents whose boolean leaf at `flag` is set, in id order.
    fn flagged(&self, flag: &StatePath) -> Vec<AgentId> {
        self.agents
            .values()
            .filter(|agent| agent.tree.value(flag).and_then(Value::as_bool) == Some(true))
            .map(|agent| agent.id)
            .collect()
    }

    fn divide(&mut self, id: AgentId, flag: &StatePath) -> Result<[AgentId; 2], SimError> {
        let parent = self.agents.remove(&id).ok_or(SimError::UnknownAgent(id))?;
        let (mut first, mut second) =
            split_tree(&parent.tree, &self.splitters).map_err(|failure| SimError::Division {
                agent: id,
                path: failure.path,
                reason: failure.reason,
            })?;
        for child in [&mut first, &mut second] {
            child.set_value(flag, Value::Bool(false)).map_err(|e| SimError::Division {
                agent: id,
                path: flag.clone(),
                reason: e.to_string(),
            })?;
        }

        let a = self.insert_agent(first, parent.executor.fork(), Some(id));
        let b = self.insert_agent(second, parent.executor.fork(), Some(id));
        self.counters.divided += 1;
        info!(tick = self.clock.tick, parent = %id, first = %a, second = %b, "agent divided");
        self.record(EnvironmentEvent::Divided {
            parent: id,
            children: [a, b],
        });
        Ok([a, b])
    }

    fn lyse(&mut self, id: AgentId) -> Result<(), SimError> {
        let agent = self.agents.remove(&id).ok_or(SimError::UnknownAgent(id))?;
        let mut injected = BTreeMap::new();
        if let Some(lattice) = self.lattice.as_mut() {
            let cell = lattice.cell_of(location_of(&agent.tree, self.config.location_path.as_ref()));
            for binding in &self.bindings {
                let amount = agent
                    .tree
                    .value(&binding.internal)
                    .and_then(Value::as_f64)
                    .unwrap_or(0.0);
                if amount > 0.0 {
                    lattice
                        .add_amount(&binding.species, cell, amount)
                        .map_err(SimError::Field)?;
                    *injected.entry(binding.species.clone()).or_default() += amount;
                }
            }
        }
        self.counters.lysed += 1;
        info!(tick = self.clock.tick, agent = %id, ?injected, "agent lysed");
        self.record(EnvironmentEvent::Lysed { id, injected });
        Ok(())
    }

    /// Write each agent's local field concentrations into its external leaves.
    fn refresh_externals(&mut self) -> Result<(), SimError> {
        let Some(lattice) = self.lattice.as_ref() else {
            return Ok(());
        };
        let location_path = self.config.location_path.as_ref();
        for agent in self.agents.values_mut() {
            let cell = lattice.cell_of(location_of(&agent.tree, location_path));
            for binding in &self.bindings {
                let (Some(external), Some(conc)) =
                    (&binding.external, lattice.concentration(&binding.species, cell))
                else {
                    continue;
                };
                agent
                    .tree
                    .set_value(external, Value::Real(conc))
                    .map_err(|e| SimError::Field(e.to_string()))?;
            }
        }
        Ok(())
    }

    fn record(&mut self, event: EnvironmentEvent) {
        self.event_history.push((self.clock.tick, event));
    }

    pub fn stats(&self) -> EnvironmentStats {
        EnvironmentStats {
            tick: self.clock.tick,
            time: self.clock.time,
            agents_alive: self.agents.len(),
            total_spawned: self.counters.spawned,
            total_divided: self.counters.divided,
            total_lysed: self.counters.lysed,
            total_isolated: self.counters.isolated,
            total_removed: self.counters.removed,
            field_totals: self.lattice.as_ref().map(Lattice::totals).unwrap_or_default(),
        }
    }

    pub fn agent(&self, id: AgentId) -> Option<&Agent> {
        self.agents.get(&id)
    }

    /// Agents in id order.
    pub fn agents(&self) -> impl Iterator<Item = &Agent> {
        self.agents.values()
    }

    pub fn agent_ids(&self) -> Vec<AgentId> {
        self.agents.keys().copied().collect()
    }

    pub fn alive_count(&self) -> usize {
        self.agents.len()
    }

    pub fn clock(&self) -> SimClock {
        self.clock
    }

    pub fn lattice(&self) -> Option<&Lattice> {
        self.lattice.as_ref()
    }

    pub fn assembly(&self) -> &Arc<Assembly> {
        &self.assembly
    }

    pub fn config(&self) -> &EnvironmentConfig {
        &self.config
    }

    pub fn event_history(&self) -> &[(Tick, EnvironmentEvent)] {
        &self.event_history
    }
}

impl std::fmt::Debug for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Environment")
            .field("clock", &self.clock)
            .field("agents", &self.agents.len())
            .field("spatial", &self.lattice.is_some())
            .finish()
    }
}

fn location_of(tree: &StateTree, path: Option<&StatePath>) -> Position {
    path.and_then(|p| tree.value(p))
        .and_then(Position::from_value)
        .unwrap_or(Position::new(0.0, 0.0))
}

/// Flags, the location leaf and species bindings must name leaves of the
/// right shape.
fn check_environment_paths(config: &SimulationConfig, schema: &StateTree) -> Result<(), AssemblyError> {
    let require = |what: &str, path: &StatePath, ok: fn(&Value) -> bool, expected: &str| {
        match schema.value(path) {
            Some(value) if ok(value) => Ok(()),
            Some(value) => Err(AssemblyError::Config(format!(
                "{} {} is a {}, expected {}",
                what,
                path,
                value.shape(),
                expected
            ))),
            None => Err(AssemblyError::Config(format!("{} {} is not a leaf", what, path))),
        }
    };

    let env = &config.environment;
    if let Some(flag) = &env.division_flag {
        require("division flag", flag, |v| matches!(v, Value::Bool(_)), "bool")?;
    }
    if let Some(flag) = &env.lysis_flag {
        require("lysis flag", flag, |v| matches!(v, Value::Bool(_)), "bool")?;
    }
    if let Some(path) = &env.location_path {
        require("location", path, |v| Position::from_value(v).is_some(), "a position")?;
    }
    if let Some(spatial) = &config.spatial {
        for binding in &spatial.bindings {
            require("internal amount", &binding.internal, Value::is_numeric, "a number")?;
            if let Some(path) = &binding.exchange {
                require("exchange leaf", path, Value::is_numeric, "a number")?;
            }
            if let Some(path) = &binding.external {
                require("external leaf", path, |v| matches!(v, Value::Real(_)), "real")?;
            }
        }
    }
    Ok(())
}
