//! # cellsim
//!
//! Composable multi-agent whole-cell simulation.
//!
//! A cell is a hierarchical state tree shared by independent processes. Each
//! process declares typed ports, the topology binds those ports to paths in
//! the tree, and the engine advances every process at its own time step.
//! Processes that consume the same finite pool are rationed deterministically,
//! and a population of cells lives on a shared reaction-diffusion field that
//! they exchange molecules with, divide into, and lyse back into.
//!
//! ## Quick Start
//!
//! ```rust
//! use cellsim::prelude::*;
//!
//! # fn main() -> Result<()> {
//! // A glucose-limited colony built from the reference processes
//! let config = glucose_colony();
//! let mut env = Environment::from_config(&config, &default_registry())?
//!     .with_emitter(MemoryEmitter::new());
//!
//! let outcome = env.run(20, &CancelToken::new())?;
//! assert_eq!(outcome, RunOutcome::Completed);
//! println!("{} cells after {} ticks", env.alive_count(), env.clock().tick);
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`cellsim_core`] - state tree, values, the process contract, configuration and errors
//! - [`cellsim_runtime`] - wiring, scheduling, partitioning, the tick executor and the
//!   multi-agent environment with its spatial field
//! - [`cellsim_processes`] - reference processes and a default registry
//!
//! ## Key Concepts
//!
//! | Concept | What It Does |
//! |---------|--------------|
//! | State tree | Nested map of typed leaves, each with a merge and a split policy |
//! | Port | A named, shaped, access-controlled view a process holds on one path |
//! | Flow | Ordering edge: the successor sees its predecessor's merge in the same tick |
//! | Resource | Finite leaf whose consumers are rationed when they ask for too much |
//! | Sub-tick | One environment step: tick agents, exchange, divide, lyse, diffuse |
//!
//! ### One sub-tick
//!
//! 1. Every agent ticks independently (in parallel unless disabled)
//! 2. Boundary exchange settles uptake and secretion against the field
//! 3. Flagged agents divide into two children, flagged agents lyse
//! 4. The field diffuses and reacts, and agents see their new surroundings

// Re-export all subcrates
pub use cellsim_core as core;
pub use cellsim_runtime as runtime;
pub use cellsim_processes as processes;

/// Prelude module for convenient imports.
///
/// ```rust
/// use cellsim::prelude::*;
/// ```
pub mod prelude {
    // Core types
    pub use cellsim_core::types::{AgentId, Position, ProcessId, SimClock, Tick};
    pub use cellsim_core::path::StatePath;
    pub use cellsim_core::value::{MergeOp, PoolKind, Shape, SplitPolicy, Value};
    pub use cellsim_core::tree::{Leaf, LeafDecl, Node, StateTree};

    // Process contract
    pub use cellsim_core::process::{
        Grant, Grants, Intent, PortSpec, Ports, Process, ResourceRequest, Update,
    };

    // Configuration
    pub use cellsim_core::config::{
        AgentSeed, EnvironmentConfig, ErrorPolicy, KineticLaw, ProcessDescriptor, ReactionDecl,
        SimulationConfig, SpatialConfig, SpeciesBinding,
    };

    // Error types
    pub use cellsim_core::error::{AssemblyError, ProcessFailure, Result, SimError};

    // Emitters
    pub use cellsim_core::emitter::{EmitRecord, Emitter};
    pub use cellsim_runtime::emit::{JsonLinesEmitter, MemoryEmitter, NullEmitter};

    // Runtime
    pub use cellsim_runtime::assembly::Assembly;
    pub use cellsim_runtime::environment::{
        Agent, CancelToken, Environment, EnvironmentEvent, EnvironmentStats, RunOutcome,
    };
    pub use cellsim_runtime::executor::{TickExecutor, TickReport};
    pub use cellsim_runtime::lattice::Lattice;
    pub use cellsim_runtime::registry::ProcessRegistry;

    // Inspection
    pub use cellsim_runtime::diff::{diff_runs, diff_snapshots, read_json_lines, RunDiff, SnapshotDiff};
    pub use cellsim_runtime::network::{CausalityNetwork, EdgeKind, NodeKind};

    // Reference processes
    pub use cellsim_processes::prelude::*;
}

/// Version information.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
