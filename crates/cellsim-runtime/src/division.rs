//! Division - splitting one agent's state tree into two children.
//!
//! Every leaf is split by its own [`SplitPolicy`]. Structured leaves that
//! need a domain-specific rule use [`SplitPolicy::Custom`], resolved through
//! a [`SplitterRegistry`].

use cellsim_core::path::StatePath;
use cellsim_core::tree::{LeafDecl, StateTree};
use cellsim_core::types::Position;
use cellsim_core::value::{SplitPolicy, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

/// A pluggable split rule for one kind of structured leaf.
pub trait LeafSplitter: Send + Sync {
    /// Produce the values for the first and second child.
    fn split(&self, value: &Value) -> Result<(Value, Value), String>;
}

impl<F> LeafSplitter for F
where
    F: Fn(&Value) -> Result<(Value, Value), String> + Send + Sync,
{
    fn split(&self, value: &Value) -> Result<(Value, Value), String> {
        self(value)
    }
}

/// Named custom splitters.
#[derive(Clone, Default)]
pub struct SplitterRegistry {
    splitters: BTreeMap<String, Arc<dyn LeafSplitter>>,
}

impl SplitterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, splitter: impl LeafSplitter + 'static) {
        self.splitters.insert(name.into(), Arc::new(splitter));
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn LeafSplitter>> {
        self.splitters.get(name)
    }
}

impl std::fmt::Debug for SplitterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SplitterRegistry")
            .field("names", &self.splitters.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Split failure at one leaf.
#[derive(Debug, Clone, PartialEq)]
pub struct SplitFailure {
    pub path: StatePath,
    pub reason: String,
}

/// Split `tree` into the trees of two children.
pub fn split_tree(
    tree: &StateTree,
    splitters: &SplitterRegistry,
) -> Result<(StateTree, StateTree), SplitFailure> {
    let mut first = Vec::new();
    let mut second = Vec::new();

    for decl in tree.decls() {
        let (a, b) = split_value(&decl.split, &decl.value, splitters).map_err(|reason| {
            SplitFailure {
                path: decl.path.clone(),
                reason,
            }
        })?;
        first.push(LeafDecl { value: a, ..decl.clone() });
        second.push(LeafDecl { value: b, ..decl });
    }

    let build = |decls: &[LeafDecl]| {
        StateTree::from_leaves(decls).map_err(|e| SplitFailure {
            path: StatePath::root(),
            reason: e.to_string(),
        })
    };
    Ok((build(&first)?, build(&second)?))
}

/// Split one value by `policy`.
pub fn split_value(
    policy: &SplitPolicy,
    value: &Value,
    splitters: &SplitterRegistry,
) -> Result<(Value, Value), String> {
    match policy {
        SplitPolicy::Duplicate => Ok((value.clone(), value.clone())),
        SplitPolicy::Reset => Ok((value.zero_like(), value.zero_like())),
        SplitPolicy::Even => Ok(split_even(value)),
        SplitPolicy::Offset(d) => {
            let pos = Position::from_value(value)
                .ok_or_else(|| format!("offset split needs a position, found a {}", value.shape()))?;
            Ok((
                with_position(value, Position::new(pos.x - d, pos.y)),
                with_position(value, Position::new(pos.x + d, pos.y)),
            ))
        }
        SplitPolicy::Custom(name) => splitters
            .get(name)
            .ok_or_else(|| format!("no splitter registered as `{}`", name))?
            .split(value),
    }
}

/// Halve counts (the first child takes the odd unit), halve reals, deal
/// list items alternately, and recurse into records. Anything else is copied.
fn split_even(value: &Value) -> (Value, Value) {
    match value {
        Value::Count(n) => {
            let second = n / 2;
            (Value::Count(n - second), Value::Count(second))
        }
        Value::Real(x) => (Value::Real(x / 2.0), Value::Real(x / 2.0)),
        Value::List(items) => {
            let (mut a, mut b) = (Vec::new(), Vec::new());
            for (i, item) in items.iter().enumerate() {
                if i % 2 == 0 {
                    a.push(item.clone());
                } else {
                    b.push(item.clone());
                }
            }
            (Value::List(a), Value::List(b))
        }
        Value::Record(fields) => {
            let (mut a, mut b) = (BTreeMap::new(), BTreeMap::new());
            for (key, field) in fields {
                let (fa, fb) = split_even(field);
                a.insert(key.clone(), fa);
                b.insert(key.clone(), fb);
            }
            (Value::Record(a), Value::Record(b))
        }
        other => (other.clone(), other.clone()),
    }
}

/// Write `pos` back in the same encoding `original` used.
fn with_position(original: &Value, pos: Position) -> Value {
    match original {
        Value::Record(fields) => {
            let mut fields = fields.clone();
            fields.insert("x".into(), Value::Real(pos.x));
            fields.insert("y".into(), Value::Real(pos.y));
            Value::Record(fields)
        }
        _ => pos.to_value(),
    }
}
