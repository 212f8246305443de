//! End-to-end properties of the engine
//!
//! 1. Finite paths stay non-negative; rationing happens only when needed
//!    and then hands out exactly what is available
//! 2. Flow successors observe their predecessors' merges within a tick
//! 3. Flow cycles are rejected at assembly
//! 4. A successor of a slow process waits for it
//! 5. Division conserves even-split quantities and destroys the parent
//! 6. Lysis injects exactly the agent's contents into the field
//! 7. Identical configurations produce byte-identical snapshot streams

use cellsim_core::prelude::*;
use cellsim_runtime::emit::JsonLinesEmitter;
use cellsim_runtime::environment::{CancelToken, Environment, EnvironmentEvent, RunOutcome};
use cellsim_runtime::executor::{TickContext, TickExecutor};
use cellsim_runtime::prelude::{Assembly, ProcessRegistry};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Consumes `want` units from `pool` and records the grant in `got`.
struct Consumer {
    want: f64,
}

impl Process for Consumer {
    fn kind(&self) -> &str {
        "consumer"
    }

    fn ports(&self) -> Vec<PortSpec> {
        vec![PortSpec::consumes("pool"), PortSpec::write("got", Shape::Count)]
    }

    fn request(&self, _ports: &Ports<'_>, _dt: f64) -> Result<Intent, ProcessFailure> {
        Ok(ResourceRequest::new().consume("pool", self.want).into())
    }

    fn apply(&self, _ports: &Ports<'_>, grants: &Grants, _dt: f64) -> Result<Update, ProcessFailure> {
        let granted = grants.granted("pool") as i64;
        Ok(Update::new().set("pool", granted).set("got", -granted))
    }
}

/// Writes a constant into `out`.
struct Constant(i64);

impl Process for Constant {
    fn kind(&self) -> &str {
        "constant"
    }

    fn ports(&self) -> Vec<PortSpec> {
        vec![PortSpec::write("out", Shape::Count)]
    }

    fn request(&self, _ports: &Ports<'_>, _dt: f64) -> Result<Intent, ProcessFailure> {
        Ok(Update::new().set("out", self.0).into())
    }
}

/// Copies `src` into `dst`.
struct Mirror;

impl Process for Mirror {
    fn kind(&self) -> &str {
        "mirror"
    }

    fn ports(&self) -> Vec<PortSpec> {
        vec![PortSpec::read("src", Shape::Count), PortSpec::write("dst", Shape::Count)]
    }

    fn request(&self, ports: &Ports<'_>, _dt: f64) -> Result<Intent, ProcessFailure> {
        Ok(Update::new().set("dst", ports.count("src")?).into())
    }
}

/// Asks to draw `rate` from the field every tick.
struct Uptake {
    rate: f64,
}

impl Process for Uptake {
    fn kind(&self) -> &str {
        "uptake"
    }

    fn ports(&self) -> Vec<PortSpec> {
        vec![PortSpec::write("exchange", Shape::Real)]
    }

    fn request(&self, _ports: &Ports<'_>, _dt: f64) -> Result<Intent, ProcessFailure> {
        Ok(Update::new().set("exchange", self.rate).into())
    }
}

/// Raises the division flag once `amount` reaches `threshold`.
struct Threshold {
    threshold: i64,
}

impl Process for Threshold {
    fn kind(&self) -> &str {
        "threshold"
    }

    fn ports(&self) -> Vec<PortSpec> {
        vec![PortSpec::read("amount", Shape::Count), PortSpec::write("flag", Shape::Bool)]
    }

    fn request(&self, ports: &Ports<'_>, _dt: f64) -> Result<Intent, ProcessFailure> {
        Ok(Update::new()
            .set("flag", ports.count("amount")? >= self.threshold)
            .into())
    }
}

fn registry() -> ProcessRegistry {
    ProcessRegistry::new()
        .with("consumer", |config| {
            let want = config.get("want").and_then(|v| v.as_f64()).unwrap_or(1.0);
            Ok(Arc::new(Consumer { want }))
        })
        .with("constant", |config| {
            Ok(Arc::new(Constant(config.as_i64().unwrap_or(0))))
        })
        .with("mirror", |_| Ok(Arc::new(Mirror)))
        .with("uptake", |config| {
            Ok(Arc::new(Uptake {
                rate: config.as_f64().unwrap_or(1.0),
            }))
        })
        .with("threshold", |config| {
            Ok(Arc::new(Threshold {
                threshold: config.as_i64().unwrap_or(1),
            }))
        })
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

fn consumers(pool: i64, wants: &[f64]) -> (StateTree, TickExecutor) {
    let mut config = SimulationConfig::new()
        .with_leaf(LeafDecl::new("pool", Value::Count(pool)).with_merge(MergeOp::Add))
        .with_resource("pool", PoolKind::Integer);
    for (i, want) in wants.iter().enumerate() {
        let id = format!("c{}", i);
        let got = format!("got/{}", id);
        config = config
            .with_leaf(LeafDecl::new(got.as_str(), Value::Count(0)))
            .with_process(
                ProcessDescriptor::new(id.as_str(), "consumer")
                    .with_config(serde_json::json!({ "want": want })),
                [("pool", "pool"), ("got", got.as_str())],
            );
    }
    let assembly = Assembly::from_config(&config, &registry()).unwrap();
    (assembly.schema().clone(), TickExecutor::new(Arc::new(assembly)))
}

fn got(tree: &StateTree, i: usize) -> i64 {
    tree.value(&StatePath::parse(&format!("got/c{}", i)))
        .and_then(Value::as_i64)
        .unwrap()
}

#[test]
fn sufficient_pool_is_never_rationed() {
    let (mut tree, mut executor) = consumers(20, &[5.0, 7.0, 8.0]);
    let report = executor.tick(&mut tree, &ctx(0)).unwrap();

    assert!(report.rationed.is_empty(), "demand equals availability, nothing to ration");
    assert_eq!((got(&tree, 0), got(&tree, 1), got(&tree, 2)), (5, 7, 8));
    assert_eq!(tree.value(&StatePath::parse("pool")), Some(&Value::Count(0)));
}

#[test]
fn rationing_hands_out_exactly_what_is_available() {
    for (pool, wants) in [
        (10, vec![8.0, 8.0]),
        (7, vec![3.0, 3.0, 3.0]),
        (1, vec![5.0, 5.0]),
        (100, vec![90.0, 30.0, 1.0]),
    ] {
        let (mut tree, mut executor) = consumers(pool, &wants);
        executor.tick(&mut tree, &ctx(0)).unwrap();

        let granted: i64 = (0..wants.len()).map(|i| got(&tree, i)).sum();
        assert_eq!(granted, pool, "grants must sum to the pool for {:?}", wants);
        assert_eq!(tree.value(&StatePath::parse("pool")), Some(&Value::Count(0)));
        for (i, want) in wants.iter().enumerate() {
            assert!(got(&tree, i) <= *want as i64, "no consumer gets more than it asked");
        }
    }
}

#[test]
fn consumers_in_different_stages_share_the_pool() {
    let config = SimulationConfig::new()
        .with_leaf(LeafDecl::new("pool", Value::Count(10)).with_merge(MergeOp::Add))
        .with_leaf(LeafDecl::new("got/a", Value::Count(0)))
        .with_leaf(LeafDecl::new("got/b", Value::Count(0)))
        .with_leaf(LeafDecl::new("signal", Value::Count(0)))
        .with_resource("pool", PoolKind::Integer)
        .with_process(
            ProcessDescriptor::new("a", "consumer").with_config(serde_json::json!({ "want": 10 })),
            [("pool", "pool"), ("got", "got/a")],
        )
        .with_process(
            ProcessDescriptor::new("b", "consumer").with_config(serde_json::json!({ "want": 10 })),
            [("pool", "pool"), ("got", "got/b")],
        )
        .with_process(
            ProcessDescriptor::new("w", "constant").with_config(serde_json::json!(3)),
            [("out", "signal")],
        )
        .with_flow("w", "b");
    let assembly = Assembly::from_config(&config, &registry()).unwrap();
    let mut tree = assembly.schema().clone();
    let mut executor = TickExecutor::new(Arc::new(assembly));

    let report = executor.tick(&mut tree, &ctx(0)).unwrap();
    let count = |path: &str| tree.value(&StatePath::parse(path)).and_then(Value::as_i64);
    assert_eq!((count("got/a"), count("got/b")), (Some(5), Some(5)));
    assert_eq!(count("pool"), Some(0));
    assert_eq!(report.rationed, vec![StatePath::parse("pool")]);
}

#[test]
fn flow_successor_sees_the_same_tick_merge() {
    let config = SimulationConfig::new()
        .with_leaf(LeafDecl::new("signal", Value::Count(0)))
        .with_leaf(LeafDecl::new("seen", Value::Count(-1)))
        .with_process(ProcessDescriptor::new("reader", "mirror"), [("src", "signal"), ("dst", "seen")])
        .with_process(
            ProcessDescriptor::new("writer", "constant").with_config(serde_json::json!(42)),
            [("out", "signal")],
        )
        .with_flow("writer", "reader");
    let assembly = Assembly::from_config(&config, &registry()).unwrap();
    let mut tree = assembly.schema().clone();
    let mut executor = TickExecutor::new(Arc::new(assembly));

    executor.tick(&mut tree, &ctx(0)).unwrap();
    assert_eq!(tree.value(&StatePath::parse("seen")), Some(&Value::Count(42)));
}

#[test]
fn flow_cycle_is_an_assembly_error() {
    let config = SimulationConfig::new()
        .with_leaf(LeafDecl::new("x", Value::Count(0)))
        .with_process(ProcessDescriptor::new("a", "constant"), [("out", "x")])
        .with_process(ProcessDescriptor::new("b", "constant"), [("out", "x")])
        .with_flow("a", "b")
        .with_flow("b", "a");

    match Assembly::from_config(&config, &registry()) {
        Err(AssemblyError::FlowCycle { processes }) => {
            assert!(processes.contains(&ProcessId::new("a")));
            assert!(processes.contains(&ProcessId::new("b")));
        }
        other => panic!("expected a flow cycle, got {:?}", other.map(|a| a.len())),
    }
}

#[test]
fn successor_waits_for_slow_predecessor() {
    let config = SimulationConfig::new()
        .with_leaf(LeafDecl::new("signal", Value::Count(0)))
        .with_leaf(LeafDecl::new("seen", Value::Count(0)))
        .with_process(
            ProcessDescriptor::new("slow", "constant")
                .with_timestep(3.0)
                .with_config(serde_json::json!(1)),
            [("out", "signal")],
        )
        .with_process(ProcessDescriptor::new("fast", "mirror"), [("src", "signal"), ("dst", "seen")])
        .with_flow("slow", "fast");
    let assembly = Assembly::from_config(&config, &registry()).unwrap();
    let mut tree = assembly.schema().clone();
    let mut executor = TickExecutor::new(Arc::new(assembly));

    let fast = ProcessId::new("fast");
    let mut ran_at = Vec::new();
    for t in 0..6 {
        let report = executor.tick(&mut tree, &ctx(t)).unwrap();
        if report.ran.contains(&fast) {
            ran_at.push(t);
        } else {
            assert!(report.deferred.contains(&fast), "fast is due every tick");
        }
    }
    assert_eq!(ran_at, vec![2, 5]);
}

fn spatial_config() -> SimulationConfig {
    let binding = SpeciesBinding {
        species: "glc".into(),
        internal: StatePath::parse("bulk/glc"),
        exchange: Some(StatePath::parse("boundary/glc")),
        external: Some(StatePath::parse("outside/glc")),
    };
    SimulationConfig::new()
        .with_leaf(LeafDecl::new("bulk/glc", Value::Count(0)).with_split(SplitPolicy::Even))
        .with_leaf(LeafDecl::new("boundary/glc", Value::Real(0.0)).with_split(SplitPolicy::Reset))
        .with_leaf(LeafDecl::new("outside/glc", Value::Real(0.0)))
        .with_leaf(
            LeafDecl::new("location", Position::new(0.5, 0.5).to_value())
                .with_split(SplitPolicy::Offset(0.5)),
        )
        .with_leaf(LeafDecl::new("divide", Value::Bool(false)))
        .with_leaf(LeafDecl::new("lysed", Value::Bool(false)))
        .with_spatial(
            SpatialConfig::new(4, 4)
                .with_species("glc", 0.0, 0.0)
                .with_binding(binding),
        )
        .with_environment(EnvironmentConfig {
            division_flag: Some(StatePath::parse("divide")),
            lysis_flag: Some(StatePath::parse("lysed")),
            location_path: Some(StatePath::parse("location")),
            ..EnvironmentConfig::default()
        })
}

#[test]
fn division_splits_evenly_and_removes_parent() {
    let mut config = spatial_config();
    let seed = &mut config.environment.seeds[0];
    seed.overrides.insert(StatePath::parse("bulk/glc"), Value::Count(7));
    seed.overrides.insert(StatePath::parse("divide"), Value::Bool(true));
    seed.location = Some([2.0, 2.0]);

    let mut env = Environment::from_config(&config, &registry()).unwrap();
    let parent = env.agent_ids()[0];
    env.step().unwrap();

    assert!(env.agent(parent).is_none(), "parent must not survive division");
    let glc = StatePath::parse("bulk/glc");
    let halves: Vec<i64> = env
        .agents()
        .map(|a| a.tree().value(&glc).and_then(Value::as_i64).unwrap())
        .collect();
    assert_eq!(halves, vec![4, 3]);

    let location = StatePath::parse("location");
    let xs: Vec<f64> = env
        .agents()
        .map(|a| Position::from_value(a.tree().value(&location).unwrap()).unwrap().x)
        .collect();
    assert_eq!(xs, vec![1.5, 2.5]);
}

#[test]
fn lysis_injects_exact_contents() {
    let mut config = spatial_config();
    let seed = &mut config.environment.seeds[0];
    seed.overrides.insert(StatePath::parse("bulk/glc"), Value::Count(5));
    seed.overrides.insert(StatePath::parse("lysed"), Value::Bool(true));
    seed.location = Some([1.5, 1.5]);

    let mut env = Environment::from_config(&config, &registry()).unwrap();
    let id = env.agent_ids()[0];
    let events = env.step().unwrap();

    let expected: BTreeMap<String, f64> = [("glc".to_string(), 5.0)].into_iter().collect();
    assert!(events.contains(&EnvironmentEvent::Lysed { id, injected: expected }));
    assert_eq!(env.alive_count(), 0);

    let lattice = env.lattice().unwrap();
    assert_eq!(lattice.total_amount("glc"), 5.0);
    let cell = lattice.cell_of(Position::new(1.5, 1.5));
    assert_eq!(lattice.amount("glc", cell), Some(5.0));

    assert_eq!(env.run(3, &CancelToken::new()).unwrap(), RunOutcome::Extinct);
}

fn growing_colony() -> SimulationConfig {
    let mut config = spatial_config()
        .with_process(
            ProcessDescriptor::new("uptake", "uptake").with_config(serde_json::json!(2.0)),
            [("exchange", "boundary/glc")],
        )
        .with_process(
            ProcessDescriptor::new("grow", "threshold").with_config(serde_json::json!(6)),
            [("amount", "bulk/glc"), ("flag", "divide")],
        );
    if let Some(spatial) = config.spatial.as_mut() {
        spatial.species[0].initial = 5.0;
        spatial.species[0].diffusion = 0.3;
    }
    config.environment.max_agents = 12;
    config.environment.seeds = vec![
        AgentSeed {
            location: Some([0.5, 0.5]),
            overrides: BTreeMap::new(),
        },
        AgentSeed {
            location: Some([3.5, 2.5]),
            overrides: BTreeMap::new(),
        },
    ];
    config
}

#[test]
fn identical_runs_emit_identical_bytes() {
    let dir = tempfile::tempdir().unwrap();
    let mut outputs = Vec::new();

    for name in ["first.jsonl", "second.jsonl"] {
        let path = dir.path().join(name);
        let mut env = Environment::from_config(&growing_colony(), &registry())
            .unwrap()
            .with_emitter(JsonLinesEmitter::create(&path).unwrap());
        env.run(15, &CancelToken::new()).unwrap();
        assert!(env.stats().total_divided > 0, "the colony should grow");
        drop(env);
        outputs.push(std::fs::read(&path).unwrap());
    }

    assert!(!outputs[0].is_empty());
    assert_eq!(outputs[0], outputs[1], "snapshot streams must be byte-identical");
}

#[test]
fn uptake_conserves_field_plus_agent_mass() {
    let mut config = growing_colony();
    config.environment.division_flag = None;
    let mut env = Environment::from_config(&config, &registry()).unwrap();

    let before = env.lattice().unwrap().total_amount("glc");
    for _ in 0..10 {
        env.step().unwrap();
    }
    let glc = StatePath::parse("bulk/glc");
    let held: f64 = env
        .agents()
        .map(|a| a.tree().value(&glc).and_then(Value::as_f64).unwrap())
        .sum();
    let after = env.lattice().unwrap().total_amount("glc");
    assert!((before - (after + held)).abs() < 1e-6, "{} != {} + {}", before, after, held);
}
