//! # cellsim Core
//!
//! Core traits and types shared by every cellsim crate.
//!
//! A simulated cell is a **state tree** mutated by independent **processes**.
//! This crate defines the vocabulary both sides agree on:
//!
//! - **StatePath / StateTree** - hierarchical store with per-leaf merge and split policies
//! - **Process** - the capability interface `{request, apply}` every process implements
//! - **Ports** - the read-only view a process gets of its wired paths
//! - **Intent / Update / ResourceRequest / Grants** - what flows between process and engine
//! - **SimulationConfig** - the flattened, fully-resolved configuration the engine consumes
//! - **Emitter** - the sink that receives state snapshots
//! - **Errors** - assembly, request, conservation and runtime failures
//!
//! ## Quick Start
//!
//! ```rust
//! use cellsim_core::prelude::*;
//!
//! let mut tree = StateTree::new();
//! tree.insert_leaf(
//!     &StatePath::parse("bulk/glucose"),
//!     Leaf::new(Value::Count(100)).with_merge(MergeOp::Add),
//! ).unwrap();
//!
//! tree.merge(&StatePath::parse("bulk/glucose"), Value::Count(-10)).unwrap();
//! assert_eq!(tree.value(&StatePath::parse("bulk/glucose")), Some(&Value::Count(90)));
//! ```

pub mod types;
pub mod path;
pub mod value;
pub mod tree;
pub mod process;
pub mod config;
pub mod emitter;
pub mod error;
pub mod prelude;
