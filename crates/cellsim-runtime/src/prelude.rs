//! cellsim Runtime Prelude - convenient imports for common usage.
//!
//! ```rust
//! use cellsim_runtime::prelude::*;
//! ```

// Environment
pub use crate::environment::{
    Agent, CancelToken, Environment, EnvironmentEvent, EnvironmentStats, RunOutcome,
};

// Assembly and execution
pub use crate::assembly::{AssembledProcess, Assembly};
pub use crate::executor::{ExecutorState, TickContext, TickExecutor, TickReport};
pub use crate::registry::{ProcessFactory, ProcessRegistry};
pub use crate::scheduler::{Activation, Clocks, Schedule};
pub use crate::wiring::{PortDeclaration, Wiring};
pub use crate::partition::{allot, Allotment, PoolClaim};

// Division and the spatial field
pub use crate::division::{split_tree, LeafSplitter, SplitterRegistry};
pub use crate::lattice::Lattice;
pub use crate::exchange::ExchangeReport;

// Emitters
pub use crate::emit::{JsonLinesEmitter, MemoryEmitter, NullEmitter};

// Diff and export
pub use crate::diff::{diff_runs, diff_snapshots, read_json_lines, RunDiff, SnapshotDiff};
pub use crate::network::{CausalityNetwork, EdgeKind, NodeKind};

pub use cellsim_core::prelude::*;
