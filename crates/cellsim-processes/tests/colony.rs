//! Glucose colony integration tests
//!
//! 1. A fed colony grows and divides
//! 2. Competing consumers never drive the glucose pool negative
//! 3. Cells in an empty field starve, lyse, and the run ends extinct
//! 4. Released glucose ends up back in the field

use cellsim_core::prelude::*;
use cellsim_processes::prelude::*;
use cellsim_runtime::environment::{CancelToken, Environment, EnvironmentEvent, RunOutcome};

fn glucose(agent_tree: &StateTree) -> i64 {
    agent_tree
        .value(&StatePath::parse("bulk/glc"))
        .and_then(Value::as_i64)
        .unwrap()
}

#[test]
fn fed_colony_grows_and_divides() {
    let mut env = Environment::from_config(&glucose_colony(), &default_registry()).unwrap();
    let outcome = env.run(30, &CancelToken::new()).unwrap();

    assert_eq!(outcome, RunOutcome::Completed);
    let stats = env.stats();
    assert!(stats.total_divided > 0, "no division in 30 ticks: {:?}", stats);
    assert!(env.alive_count() > 1);
}

#[test]
fn competing_consumers_never_overdraw() {
    let mut env = Environment::from_config(&glucose_colony(), &default_registry()).unwrap();
    for _ in 0..25 {
        env.step().unwrap();
        for agent in env.agents() {
            assert!(glucose(agent.tree()) >= 0, "agent {} overdrew glucose", agent.id());
        }
    }
}

#[test]
fn starving_cells_lyse_and_the_run_ends_extinct() {
    let mut config = glucose_colony();
    if let Some(spatial) = config.spatial.as_mut() {
        spatial.species[0].initial = 0.0;
    }
    config.environment.seeds[0]
        .overrides
        .insert(StatePath::parse("bulk/glc"), Value::Count(0));

    let mut env = Environment::from_config(&config, &default_registry()).unwrap();
    let outcome = env.run(20, &CancelToken::new()).unwrap();

    assert_eq!(outcome, RunOutcome::Extinct);
    assert_eq!(env.stats().total_lysed, 1);
    assert!(env
        .event_history()
        .iter()
        .any(|(_, event)| matches!(event, EnvironmentEvent::Lysed { .. })));
}

#[test]
fn secreted_glucose_returns_to_the_field() {
    let mut config = glucose_colony();
    config.processes.clear();
    config.topology.clear();
    config.flow.clear();
    config = config.with_process(
        ProcessDescriptor::new("glc_secretion", "transport")
            .with_config(serde_json::json!({"mode": "secretion", "vmax": 2.0})),
        [("internal", "bulk/glc"), ("exchange", "boundary/glc")],
    );
    if let Some(spatial) = config.spatial.as_mut() {
        spatial.species[0].initial = 0.0;
        spatial.species[0].diffusion = 0.0;
    }

    let mut env = Environment::from_config(&config, &default_registry()).unwrap();
    let id = env.agent_ids()[0];
    for _ in 0..3 {
        env.step().unwrap();
    }

    let field = env.lattice().unwrap().total_amount("glc");
    let held = glucose(env.agent(id).unwrap().tree());
    assert_eq!(held, 14);
    assert!((field - 6.0).abs() < 1e-9, "field holds {}", field);
}
