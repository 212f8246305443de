//! Emitter - the sink that receives state snapshots.

use crate::types::AgentId;
use serde::{Deserialize, Serialize};

/// One agent's state at one emitted sub-tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmitRecord {
    pub time: f64,
    pub tick: u64,
    pub agent: AgentId,
    /// The agent's state tree as plain JSON.
    pub state: serde_json::Value,
}

/// Receives snapshots once per emit interval.
///
/// Delivery is fire-and-forget: an emitter that cannot persist a record
/// reports the failure itself and returns, it never stops the simulation.
pub trait Emitter: Send {
    fn emit(&mut self, record: EmitRecord);

    /// Called once when a run finishes.
    fn flush(&mut self) {}
}
