//! Ready-made simulation configurations.
//!
//! The glucose colony wires every reference process together. Cells take up
//! glucose from a diffusing field and burn it into biomass. They divide once
//! heavy enough and lyse when the local field runs dry.

use crate::degradation::Degradation;
use crate::growth::Growth;
use crate::metabolism::Metabolism;
use crate::starvation::Starvation;
use crate::transport::Transport;
use cellsim_core::config::{
    AgentSeed, EnvironmentConfig, ProcessDescriptor, SimulationConfig, SpatialConfig, SpeciesBinding,
};
use cellsim_core::path::StatePath;
use cellsim_core::tree::LeafDecl;
use cellsim_core::types::Position;
use cellsim_core::value::{MergeOp, PoolKind, SplitPolicy, Value};
use serde_json::json;

/// Glucose-limited colony on an 8 × 8 field, seeded with one cell in the middle.
pub fn glucose_colony() -> SimulationConfig {
    let spatial = SpatialConfig::new(8, 8)
        .with_species("glc", 10.0, 0.5)
        .with_binding(SpeciesBinding {
            species: "glc".into(),
            internal: StatePath::parse("bulk/glc"),
            exchange: Some(StatePath::parse("boundary/glc")),
            external: Some(StatePath::parse("boundary/external_glc")),
        });

    let environment = EnvironmentConfig {
        division_flag: Some(StatePath::parse("flags/divide")),
        lysis_flag: Some(StatePath::parse("flags/lyse")),
        location_path: Some(StatePath::parse("location")),
        max_agents: 64,
        seeds: vec![AgentSeed {
            location: Some([4.0, 4.0]),
            ..AgentSeed::default()
        }],
        ..EnvironmentConfig::default()
    };

    SimulationConfig::new()
        .with_leaf(
            LeafDecl::new("bulk/glc", Value::Count(20))
                .with_merge(MergeOp::Add)
                .with_split(SplitPolicy::Even),
        )
        .with_leaf(
            LeafDecl::new("mass", Value::Real(1.0))
                .with_merge(MergeOp::Add)
                .with_split(SplitPolicy::Even),
        )
        .with_leaf(
            LeafDecl::new("boundary/glc", Value::Real(0.0))
                .with_merge(MergeOp::Add)
                .with_split(SplitPolicy::Reset),
        )
        .with_leaf(LeafDecl::new("boundary/external_glc", Value::Real(0.0)))
        .with_leaf(LeafDecl::new("starved", Value::Real(0.0)).with_split(SplitPolicy::Reset))
        .with_leaf(LeafDecl::new("flags/divide", Value::Bool(false)).with_split(SplitPolicy::Reset))
        .with_leaf(LeafDecl::new("flags/lyse", Value::Bool(false)).with_split(SplitPolicy::Reset))
        .with_leaf(
            LeafDecl::new("location", Position::new(4.0, 4.0).to_value())
                .with_split(SplitPolicy::Offset(0.25)),
        )
        .with_process(
            ProcessDescriptor::new("glc_uptake", Transport::KIND)
                .with_config(json!({"mode": "uptake", "vmax": 4.0, "km": 2.0})),
            [("external", "boundary/external_glc"), ("exchange", "boundary/glc")],
        )
        .with_process(
            ProcessDescriptor::new("glycolysis", Metabolism::KIND)
                .with_config(json!({"rate": 3.0, "product_yield": 0.1})),
            [("substrate", "bulk/glc"), ("product", "mass")],
        )
        .with_process(
            ProcessDescriptor::new("glc_turnover", Degradation::KIND).with_config(json!({"rate": 0.05})),
            [("substrate", "bulk/glc")],
        )
        .with_process(
            ProcessDescriptor::new("growth", Growth::KIND)
                .with_config(json!({"rate": 0.05, "division_mass": 2.0})),
            [("mass", "mass"), ("divide", "flags/divide")],
        )
        .with_process(
            ProcessDescriptor::new("starvation", Starvation::KIND)
                .with_config(json!({"threshold": 0.5, "patience": 8.0})),
            [
                ("nutrient", "boundary/external_glc"),
                ("starved", "starved"),
                ("lyse", "flags/lyse"),
            ],
        )
        .with_resource("bulk/glc", PoolKind::Integer)
        .with_flow("glycolysis", "growth")
        .with_spatial(spatial)
        .with_environment(environment)
}
