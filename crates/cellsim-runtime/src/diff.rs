//! Snapshot diffing - compare state snapshots and whole emitted runs.
//!
//! Snapshots are compared leaf by leaf on their JSON form, so they can come
//! straight from an emitter. Numbers are equal within a tolerance; anything
//! else must match exactly.
//!
//! # Example
//!
//! ```rust,ignore
//! use cellsim_runtime::diff::{diff_runs, read_json_lines};
//!
//! let first = read_json_lines(Path::new("run_a.jsonl"))?;
//! let second = read_json_lines(Path::new("run_b.jsonl"))?;
//! let diff = diff_runs(&first, &second, 0.0);
//! println!("{}", diff.summary());
//! ```

use cellsim_core::emitter::EmitRecord;
use cellsim_core::error::SimError;
use cellsim_core::types::AgentId;
use serde::Serialize;
use serde_json::Value as Json;
use std::collections::BTreeMap;
use std::io::BufRead;
use std::path::Path;

/// One leaf whose value differs.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LeafChange {
    pub path: String,
    pub before: Json,
    pub after: Json,
}

/// Leaf-level difference between two snapshots.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SnapshotDiff {
    /// Leaves present in `after` but not `before`.
    pub added: Vec<String>,
    /// Leaves present in `before` but not `after`.
    pub removed: Vec<String>,
    pub changed: Vec<LeafChange>,
}

impl SnapshotDiff {
    pub fn summary(&self) -> String {
        format!(
            "+{} leaves, -{} leaves, {} changed",
            self.added.len(),
            self.removed.len(),
            self.changed.len()
        )
    }

    pub fn total_changes(&self) -> usize {
        self.added.len() + self.removed.len() + self.changed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.total_changes() == 0
    }
}

/// Compare two snapshots. Numbers within `tolerance` count as equal.
pub fn diff_snapshots(before: &Json, after: &Json, tolerance: f64) -> SnapshotDiff {
    let mut a = BTreeMap::new();
    let mut b = BTreeMap::new();
    flatten("", before, &mut a);
    flatten("", after, &mut b);

    let mut diff = SnapshotDiff::default();
    for (path, old) in &a {
        match b.get(path) {
            None => diff.removed.push(path.clone()),
            Some(new) if !approx_equal(old, new, tolerance) => diff.changed.push(LeafChange {
                path: path.clone(),
                before: (*old).clone(),
                after: (*new).clone(),
            }),
            Some(_) => {}
        }
    }
    diff.added = b.keys().filter(|p| !a.contains_key(*p)).cloned().collect();
    diff
}

/// Objects are branches; everything else, arrays included, is a leaf.
fn flatten<'a>(prefix: &str, value: &'a Json, out: &mut BTreeMap<String, &'a Json>) {
    match value {
        Json::Object(fields) if !fields.is_empty() => {
            for (key, child) in fields {
                let path = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{}/{}", prefix, key)
                };
                flatten(&path, child, out);
            }
        }
        leaf => {
            out.insert(prefix.to_string(), leaf);
        }
    }
}

fn approx_equal(a: &Json, b: &Json, tolerance: f64) -> bool {
    match (a, b) {
        (Json::Number(x), Json::Number(y)) => match (x.as_f64(), y.as_f64()) {
            (Some(x), Some(y)) => (x - y).abs() <= tolerance,
            _ => x == y,
        },
        (Json::Array(xs), Json::Array(ys)) => {
            xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| approx_equal(x, y, tolerance))
        }
        (Json::Object(xs), Json::Object(ys)) => {
            xs.len() == ys.len()
                && xs
                    .iter()
                    .all(|(k, x)| ys.get(k).is_some_and(|y| approx_equal(x, y, tolerance)))
        }
        _ => a == b,
    }
}

/// Difference between two emitted runs, matched by (tick, agent).
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunDiff {
    pub records_before: usize,
    pub records_after: usize,
    /// Records only in the first run.
    pub missing: Vec<(u64, AgentId)>,
    /// Records only in the second run.
    pub extra: Vec<(u64, AgentId)>,
    /// Records present in both whose state differs.
    pub differing: Vec<(u64, AgentId, SnapshotDiff)>,
}

impl RunDiff {
    pub fn summary(&self) -> String {
        format!(
            "{} vs {} records: {} missing, {} extra, {} differing",
            self.records_before,
            self.records_after,
            self.missing.len(),
            self.extra.len(),
            self.differing.len()
        )
    }

    /// Whether the two runs emitted the same snapshots.
    pub fn is_identical(&self) -> bool {
        self.missing.is_empty() && self.extra.is_empty() && self.differing.is_empty()
    }
}

pub fn diff_runs(before: &[EmitRecord], after: &[EmitRecord], tolerance: f64) -> RunDiff {
    let index = |records: &[EmitRecord]| -> BTreeMap<(u64, AgentId), Json> {
        records
            .iter()
            .map(|r| ((r.tick, r.agent), r.state.clone()))
            .collect()
    };
    let a = index(before);
    let b = index(after);

    let mut diff = RunDiff {
        records_before: before.len(),
        records_after: after.len(),
        ..RunDiff::default()
    };
    for (key, state) in &a {
        match b.get(key) {
            None => diff.missing.push(*key),
            Some(other) => {
                let snapshot = diff_snapshots(state, other, tolerance);
                if !snapshot.is_empty() {
                    diff.differing.push((key.0, key.1, snapshot));
                }
            }
        }
    }
    diff.extra = b.keys().filter(|k| !a.contains_key(*k)).copied().collect();
    diff
}

/// Read a JSON-lines file written by the JSON-lines emitter.
pub fn read_json_lines(path: &Path) -> Result<Vec<EmitRecord>, SimError> {
    let file = std::fs::File::open(path)?;
    let mut records = Vec::new();
    for line in std::io::BufReader::new(file).lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        records.push(serde_json::from_str(&line)?);
    }
    Ok(records)
}
