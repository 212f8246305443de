//! Boundary exchange between agents and the field cell they occupy.
//!
//! Processes express exchange by writing an exchange leaf: a positive value
//! asks to draw that amount from the local field cell, a negative value
//! releases it. After every agent has ticked, the exchange leaves of all
//! agents sharing a cell are collected as claims on that cell's amount and
//! partitioned exactly like a contested resource inside one agent.

use crate::lattice::Lattice;
use crate::partition::{allot, PoolClaim};
use cellsim_core::config::SpeciesBinding;
use cellsim_core::error::{ConservationViolation, SimError};
use cellsim_core::path::StatePath;
use cellsim_core::tree::StateTree;
use cellsim_core::types::{AgentId, Tick};
use cellsim_core::value::{PoolKind, Value};
use serde::Serialize;
use std::collections::BTreeMap;

/// One agent taking part in an exchange round.
#[derive(Debug)]
pub struct Participant<'a> {
    pub agent: AgentId,
    pub cell: usize,
    pub tree: &'a mut StateTree,
}

/// Totals moved in one exchange round.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExchangeReport {
    /// Species → amount moved from the field into agents.
    pub taken: BTreeMap<String, f64>,
    /// Species → amount released into the field.
    pub released: BTreeMap<String, f64>,
    /// Number of (cell, species) pools whose consumers were rationed.
    pub rationed: usize,
}

/// Run one exchange round. `participants` must be ordered by agent id.
pub fn exchange(
    lattice: &mut Lattice,
    bindings: &[SpeciesBinding],
    participants: &mut [Participant<'_>],
    tick: Tick,
) -> Result<ExchangeReport, SimError> {
    let mut report = ExchangeReport::default();

    for binding in bindings {
        let Some(exchange_path) = &binding.exchange else {
            continue;
        };

        // cell → (participant index, signed claim)
        let mut by_cell: BTreeMap<usize, Vec<(usize, f64)>> = BTreeMap::new();
        for (i, p) in participants.iter().enumerate() {
            let requested = match p.tree.value(exchange_path) {
                Some(value) => value.as_f64().ok_or_else(|| {
                    SimError::Field(format!(
                        "exchange leaf {} of {} is a {}, not a number",
                        exchange_path,
                        p.agent,
                        value.shape()
                    ))
                })?,
                None => continue,
            };
            if requested == 0.0 {
                continue;
            }

            let delta = if requested > 0.0 {
                -requested
            } else {
                // An agent can release no more than it holds.
                let held = internal_amount(p.tree, &binding.internal).max(0.0);
                let mut released = (-requested).min(held);
                if is_count(p.tree, &binding.internal) {
                    released = released.floor();
                }
                released
            };
            by_cell.entry(p.cell).or_default().push((i, delta));
        }

        for (cell, claimed) in by_cell {
            let current = lattice.amount(&binding.species, cell).unwrap_or(0.0).max(0.0);
            let claims: Vec<PoolClaim> = claimed
                .iter()
                .enumerate()
                .map(|(order, &(_, delta))| PoolClaim { order, delta })
                .collect();
            let allotment = allot(PoolKind::Real, current, &claims).map_err(|fault| {
                ConservationViolation {
                    tick,
                    agent: participants[claimed[0].0].agent,
                    path: exchange_path.clone(),
                    detail: format!("field cell {} of `{}`: {}", cell, binding.species, fault),
                }
            })?;
            if allotment.rationed {
                report.rationed += 1;
            }

            let mut field_delta = 0.0;
            for (&(i, _), granted) in claimed.iter().zip(allotment.grants) {
                let tree = &mut *participants[i].tree;
                let moved = if granted < 0.0 {
                    let mut credit = -granted;
                    if is_count(tree, &binding.internal) {
                        credit = credit.floor();
                    }
                    *report.taken.entry(binding.species.clone()).or_default() += credit;
                    field_delta -= credit;
                    credit
                } else {
                    *report.released.entry(binding.species.clone()).or_default() += granted;
                    field_delta += granted;
                    -granted
                };
                add_to_leaf(tree, &binding.internal, moved)?;
            }
            lattice
                .add_amount(&binding.species, cell, field_delta)
                .map_err(SimError::Field)?;
        }

        for p in participants.iter_mut() {
            if let Some(value) = p.tree.value(exchange_path) {
                let zero = value.zero_like();
                p.tree
                    .set_value(exchange_path, zero)
                    .map_err(|e| SimError::Field(e.to_string()))?;
            }
        }
    }

    Ok(report)
}

fn internal_amount(tree: &StateTree, path: &StatePath) -> f64 {
    tree.value(path).and_then(Value::as_f64).unwrap_or(0.0)
}

fn is_count(tree: &StateTree, path: &StatePath) -> bool {
    matches!(tree.value(path), Some(Value::Count(_)))
}

/// Add `amount` to a numeric leaf, keeping its shape.
pub(crate) fn add_to_leaf(tree: &mut StateTree, path: &StatePath, amount: f64) -> Result<(), SimError> {
    let next = match tree.value(path) {
        Some(Value::Count(n)) => Value::Count(n + amount.round() as i64),
        Some(Value::Real(x)) => Value::Real((x + amount).max(0.0)),
        Some(other) => {
            return Err(SimError::Field(format!(
                "internal leaf {} is a {}, not a number",
                path,
                other.shape()
            )))
        }
        None => return Err(SimError::Field(format!("internal leaf {} is missing", path))),
    };
    tree.set_value(path, next)
        .map_err(|e| SimError::Field(e.to_string()))
}
