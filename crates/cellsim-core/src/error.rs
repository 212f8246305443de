//! Error types for cellsim operations.
//!
//! The taxonomy follows the lifetime of a simulation:
//!
//! - [`AssemblyError`] - configuration rejected, the simulation never starts
//! - [`RequestError`] - a malformed resource request, fatal to the tick
//! - [`ConservationViolation`] - a finite quantity went negative, always fatal
//! - [`AgentRuntimeError`] - a process failed or wrote badly, isolated to its agent by default
//!
//! Every runtime error carries the tick, agent id and process id it happened at.

use crate::path::StatePath;
use crate::types::{AgentId, ProcessId, Tick};
use crate::value::{MergeOp, Shape};
use thiserror::Error;

/// Result type for cellsim operations.
pub type Result<T> = std::result::Result<T, SimError>;

/// A merge whose incoming value does not fit the leaf.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("cannot {op}-merge a {found} value into a {expected} leaf")]
pub struct ShapeMismatch {
    pub op: MergeOp,
    pub expected: Shape,
    pub found: Shape,
}

/// Why a value could not absorb an incoming update.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MergeError {
    #[error(transparent)]
    Shape(#[from] ShapeMismatch),

    #[error("{op}-merge of {incoming} into {current} overflows a count")]
    Overflow {
        op: MergeOp,
        current: i64,
        incoming: i64,
    },
}

/// Structural errors raised by the state tree itself.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TreeError {
    #[error("no node at path {0}")]
    MissingPath(StatePath),

    #[error("path {0} addresses a sub-tree, not a leaf")]
    NotALeaf(StatePath),

    #[error("path {path} passes through the leaf at {leaf}")]
    PathThroughLeaf { path: StatePath, leaf: StatePath },

    #[error("a node already exists at {0}")]
    DuplicateLeaf(StatePath),

    #[error("shape mismatch at {path}: {source}")]
    Shape {
        path: StatePath,
        source: ShapeMismatch,
    },

    #[error("count at {path} would overflow ({current} + {incoming})")]
    Overflow {
        path: StatePath,
        current: i64,
        incoming: i64,
    },
}

impl TreeError {
    /// Attach the leaf path to a failed value merge.
    pub fn from_merge(path: &StatePath, err: MergeError) -> Self {
        match err {
            MergeError::Shape(source) => TreeError::Shape {
                path: path.clone(),
                source,
            },
            MergeError::Overflow {
                current, incoming, ..
            } => TreeError::Overflow {
                path: path.clone(),
                current,
                incoming,
            },
        }
    }
}

/// Errors a process hits while reading its ports.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PortError {
    #[error("port `{0}` is not wired for this process")]
    Unbound(String),

    #[error("port `{port}` has no node at {path}")]
    Missing { port: String, path: StatePath },

    #[error("port `{port}` holds a {found}, expected {expected}")]
    WrongShape {
        port: String,
        expected: Shape,
        found: Shape,
    },
}

/// Failure reported by a process implementation.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{0}")]
pub struct ProcessFailure(pub String);

impl ProcessFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

impl From<PortError> for ProcessFailure {
    fn from(e: PortError) -> Self {
        Self(e.to_string())
    }
}

impl From<serde_json::Error> for ProcessFailure {
    fn from(e: serde_json::Error) -> Self {
        Self(format!("invalid configuration: {}", e))
    }
}

fn display_ids(ids: &[ProcessId]) -> String {
    ids.iter()
        .map(ProcessId::as_str)
        .collect::<Vec<_>>()
        .join(" -> ")
}

fn list_ids(ids: &[ProcessId]) -> String {
    ids.iter()
        .map(ProcessId::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Configuration rejected during assembly. No partial assembly is ever produced.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AssemblyError {
    #[error("duplicate process id `{0}`")]
    DuplicateProcess(ProcessId),

    #[error("process `{process}` has unknown kind `{kind}`")]
    UnknownKind { process: ProcessId, kind: String },

    #[error("process `{process}` rejected its configuration: {reason}")]
    InvalidProcessConfig { process: ProcessId, reason: String },

    #[error("port `{port}` of process `{process}` is not bound to any path")]
    UnboundPort { process: ProcessId, port: String },

    #[error("topology binds port `{port}` which process `{process}` does not declare")]
    UndeclaredPort { process: ProcessId, port: String },

    #[error("topology references unknown process `{0}`")]
    UnknownProcess(ProcessId),

    #[error("port `{port}` of process `{process}` targets missing path {path}")]
    MissingPath {
        process: ProcessId,
        port: String,
        path: StatePath,
    },

    #[error("port `{port}` of process `{process}` expects {expected} but {path} is {found}")]
    ShapeMismatch {
        process: ProcessId,
        port: String,
        path: StatePath,
        expected: Shape,
        found: Shape,
    },

    #[error("flow edges form a cycle through {}", display_ids(.processes))]
    FlowCycle { processes: Vec<ProcessId> },

    #[error("flow edge references unknown process `{0}`")]
    UnknownFlowProcess(ProcessId),

    #[error("{} claim a shared resource but are ordered by flow", list_ids(.processes))]
    ContendedFlow { processes: Vec<ProcessId> },

    #[error("invalid resource at {path}: {reason}")]
    InvalidResource { path: StatePath, reason: String },

    #[error("process `{process}` has invalid time step {timestep}")]
    InvalidTimestep { process: ProcessId, timestep: f64 },

    #[error("invalid initial state: {0}")]
    Schema(#[from] TreeError),

    #[error("invalid configuration: {0}")]
    Config(String),
}

/// What was wrong with a resource request.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RequestFault {
    #[error("claim on undeclared port `{0}`")]
    UnknownPort(String),

    #[error("port `{port}` is wired to {path}, which is not a resource")]
    NotAResource { port: String, path: StatePath },

    #[error("claim on port `{port}` is not finite")]
    NonFinite { port: String },

    #[error("claim of {delta} on integer pool `{port}` is not integral")]
    NonIntegral { port: String, delta: f64 },

    #[error("claim of {delta} on `{port}` contradicts the port's declared role")]
    RoleMismatch { port: String, delta: f64 },

    #[error("port `{port}` claimed more than once")]
    DuplicateClaim { port: String },

    #[error("direct update writes resource path {path} through port `{port}`")]
    DirectWriteToResource { port: String, path: StatePath },
}

/// A malformed request. Fatal to the tick.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("request error at tick {tick} in {agent}, process `{process}`: {fault}")]
pub struct RequestError {
    pub tick: Tick,
    pub agent: AgentId,
    pub process: ProcessId,
    pub fault: RequestFault,
}

/// A finite quantity would become negative, or grants exceeded availability.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("conservation violated at tick {tick} in {agent} on {path}: {detail}")]
pub struct ConservationViolation {
    pub tick: Tick,
    pub agent: AgentId,
    pub path: StatePath,
    pub detail: String,
}

/// What went wrong while a process ran or its update merged.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RuntimeFault {
    #[error("process failed: {0}")]
    Failed(ProcessFailure),

    #[error("update writes undeclared port `{0}`")]
    UndeclaredPort(String),

    #[error("update writes read-only port `{0}`")]
    ReadOnlyPort(String),

    #[error("merge through port `{port}` failed: {source}")]
    Merge { port: String, source: TreeError },

    #[error("update on `{port}` moves {written} but the grant was {granted}")]
    GrantExceeded {
        port: String,
        granted: f64,
        written: f64,
    },
}

/// A process-level failure inside one agent's tick.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("runtime error at tick {tick} in {agent}, process `{process}`: {fault}")]
pub struct AgentRuntimeError {
    pub tick: Tick,
    pub agent: AgentId,
    pub process: ProcessId,
    pub fault: RuntimeFault,
}

/// Errors that can occur while building or running a simulation.
#[derive(Debug, Error)]
pub enum SimError {
    #[error("assembly error: {0}")]
    Assembly(#[from] AssemblyError),

    #[error(transparent)]
    Request(#[from] RequestError),

    #[error(transparent)]
    Conservation(#[from] ConservationViolation),

    #[error(transparent)]
    Runtime(#[from] AgentRuntimeError),

    #[error("executor for {0} is terminated")]
    Terminated(AgentId),

    #[error("unknown agent {0}")]
    UnknownAgent(AgentId),

    #[error("division of {agent} failed at {path}: {reason}")]
    Division {
        agent: AgentId,
        path: StatePath,
        reason: String,
    },

    #[error("field error: {0}")]
    Field(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SimError {
    /// The agent this error is attributed to, if any.
    pub fn agent(&self) -> Option<AgentId> {
        match self {
            SimError::Request(e) => Some(e.agent),
            SimError::Conservation(e) => Some(e.agent),
            SimError::Runtime(e) => Some(e.agent),
            SimError::Terminated(id) | SimError::UnknownAgent(id) => Some(*id),
            SimError::Division { agent, .. } => Some(*agent),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cycle_message_lists_members() {
        let err = AssemblyError::FlowCycle {
            processes: vec![ProcessId::new("a"), ProcessId::new("b")],
        };
        assert_eq!(err.to_string(), "flow edges form a cycle through a -> b");
    }

    #[test]
    fn runtime_errors_carry_context() {
        let err = SimError::from(AgentRuntimeError {
            tick: 4,
            agent: AgentId::from_seed(2),
            process: ProcessId::new("growth"),
            fault: RuntimeFault::ReadOnlyPort("mass".into()),
        });
        let msg = err.to_string();
        assert!(msg.contains("tick 4"), "message was: {}", msg);
        assert!(msg.contains("agent-2"), "message was: {}", msg);
        assert!(msg.contains("growth"), "message was: {}", msg);
        assert_eq!(err.agent(), Some(AgentId::from_seed(2)));
    }
}
