//! Shared identifiers, positions and the simulation clock.

use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// The current sub-tick of the simulation.
pub type Tick = u64;

/// Unique identifier for an agent (one simulated cell).
///
/// Identifiers are derived from a sequence number rather than drawn at
/// random so that two runs of the same configuration allocate the same ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AgentId(pub Uuid);

impl AgentId {
    /// Deterministic identifier for the `seed`-th agent.
    pub fn from_seed(seed: u64) -> Self {
        Self(Uuid::from_u64_pair(0, seed))
    }

    /// The sequence number this id was derived from.
    pub fn seed(&self) -> u64 {
        self.0.as_u64_pair().1
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "agent-{}", self.seed())
    }
}

/// Identifier of a process, unique within an agent.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProcessId(pub String);

impl ProcessId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ProcessId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// A position in the shared spatial field.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance_to(&self, other: &Position) -> f64 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }

    /// Read a position stored in the state tree.
    ///
    /// Accepts a two-element numeric list `[x, y]` or a record with
    /// numeric `x` and `y` fields.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::List(items) if items.len() == 2 => {
                Some(Self::new(items[0].as_f64()?, items[1].as_f64()?))
            }
            Value::Record(fields) => Some(Self::new(
                fields.get("x")?.as_f64()?,
                fields.get("y")?.as_f64()?,
            )),
            _ => None,
        }
    }

    /// Encode as a `[x, y]` list value.
    pub fn to_value(&self) -> Value {
        Value::List(vec![Value::Real(self.x), Value::Real(self.y)])
    }
}

/// The global simulation clock, passed explicitly into every tick.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SimClock {
    /// Sub-ticks completed so far.
    pub tick: Tick,
    /// Simulation time at the start of the current sub-tick.
    pub time: f64,
    /// Duration of one sub-tick.
    pub dt: f64,
}

impl SimClock {
    pub fn new(dt: f64) -> Self {
        Self { tick: 0, time: 0.0, dt }
    }

    /// The clock after one more sub-tick.
    pub fn advanced(&self) -> Self {
        Self {
            tick: self.tick + 1,
            time: self.time + self.dt,
            dt: self.dt,
        }
    }
}
