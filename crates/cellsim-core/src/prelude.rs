//! cellsim Core Prelude - convenient imports for common usage.
//!
//! ```rust
//! use cellsim_core::prelude::*;
//! ```

pub use crate::types::{AgentId, Position, ProcessId, SimClock, Tick};

pub use crate::path::StatePath;
pub use crate::value::{MergeOp, PoolKind, Shape, SplitPolicy, Value};
pub use crate::tree::{Leaf, LeafDecl, Node, StateTree};

// Process contract
pub use crate::process::{
    Access, Claim, ClaimRole, Grant, Grants, Intent, PortSpec, Ports, Process, ResourceRequest,
    Update, Write,
};

pub use crate::config::{
    AgentSeed, EnvironmentConfig, ErrorPolicy, FlowEdge, KineticLaw, ProcessDescriptor,
    ReactionDecl, ResourceDecl, SimulationConfig, SpatialConfig, SpeciesBinding, SpeciesDecl,
    Topology,
};

pub use crate::emitter::{EmitRecord, Emitter};

pub use crate::error::{
    AgentRuntimeError, AssemblyError, ConservationViolation, MergeError, PortError,
    ProcessFailure, RequestError, RequestFault, RuntimeFault, ShapeMismatch, SimError, TreeError,
};
