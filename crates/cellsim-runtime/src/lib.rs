//! # cellsim Runtime
//!
//! Assembly, scheduling and the multi-agent loop.
//!
//! The runtime turns a resolved [`SimulationConfig`](cellsim_core::config::SimulationConfig)
//! into something that runs: processes are built from the registry and
//! wired to state paths, flow edges are ordered, contested resources are
//! partitioned each tick, and a population of agents shares a
//! reaction-diffusion field.

pub mod registry;
pub mod wiring;
pub mod scheduler;
pub mod partition;
pub mod assembly;
pub mod executor;
pub mod division;
pub mod lattice;
pub mod exchange;
pub mod environment;
pub mod emit;
pub mod diff;
pub mod network;
pub mod prelude;
