//! Leaf values and the policies attached to them.

use crate::error::{MergeError, ShapeMismatch};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A value stored at a leaf of the state tree.
///
/// Serialized untagged, so a snapshot reads as plain JSON: `12` is a count,
/// `12.0` a real, `[..]` a list and `{..}` a structured record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Bool(bool),
    /// A countable, integral quantity (e.g. molecule counts).
    Count(i64),
    Real(f64),
    Text(String),
    List(Vec<Value>),
    /// A structured record stored as a single leaf.
    Record(BTreeMap<String, Value>),
}

impl Value {
    pub fn shape(&self) -> Shape {
        match self {
            Value::Bool(_) => Shape::Bool,
            Value::Count(_) => Shape::Count,
            Value::Real(_) => Shape::Real,
            Value::Text(_) => Shape::Text,
            Value::List(_) => Shape::List,
            Value::Record(_) => Shape::Record,
        }
    }

    /// Numeric view; counts widen to `f64`.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Count(n) => Some(*n as f64),
            Value::Real(x) => Some(*x),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Count(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Value::Count(_) | Value::Real(_))
    }

    /// The empty value of the same shape (`0`, `0.0`, `false`, `""`, `[]`, `{}`).
    pub fn zero_like(&self) -> Value {
        match self {
            Value::Bool(_) => Value::Bool(false),
            Value::Count(_) => Value::Count(0),
            Value::Real(_) => Value::Real(0.0),
            Value::Text(_) => Value::Text(String::new()),
            Value::List(_) => Value::List(Vec::new()),
            Value::Record(_) => Value::Record(BTreeMap::new()),
        }
    }

    /// Combine `incoming` into this value with the given merge operator.
    pub fn merge(&mut self, op: MergeOp, incoming: Value) -> Result<(), MergeError> {
        let mismatch = |current: &Value, incoming: &Value| ShapeMismatch {
            op,
            expected: current.shape(),
            found: incoming.shape(),
        };

        match op {
            MergeOp::Replace => match (&*self, &incoming) {
                (Value::Real(_), Value::Count(n)) => {
                    *self = Value::Real(*n as f64);
                    Ok(())
                }
                (current, new) if current.shape() == new.shape() => {
                    *self = incoming;
                    Ok(())
                }
                (current, new) => Err(mismatch(current, new).into()),
            },
            MergeOp::Add => match (&mut *self, &incoming) {
                (Value::Count(a), Value::Count(b)) => {
                    *a = a.checked_add(*b).ok_or(MergeError::Overflow {
                        op,
                        current: *a,
                        incoming: *b,
                    })?;
                    Ok(())
                }
                (Value::Real(a), Value::Real(b)) => {
                    *a += b;
                    Ok(())
                }
                (Value::Real(a), Value::Count(b)) => {
                    *a += *b as f64;
                    Ok(())
                }
                (current, new) => Err(mismatch(current, new).into()),
            },
            MergeOp::Append => match (&mut *self, incoming) {
                (Value::List(items), Value::List(more)) => {
                    items.extend(more);
                    Ok(())
                }
                (Value::List(items), item) => {
                    items.push(item);
                    Ok(())
                }
                (Value::Text(text), Value::Text(more)) => {
                    text.push_str(&more);
                    Ok(())
                }
                (current, new) => Err(mismatch(current, &new).into()),
            },
        }
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Count(n)
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Real(x)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

/// The structural shape of a node, used to validate port bindings and writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Shape {
    Bool,
    Count,
    Real,
    /// Either a count or a real.
    Number,
    Text,
    List,
    Record,
    /// A nested sub-tree rather than a leaf.
    Tree,
    /// Anything at all.
    Any,
}

impl Shape {
    /// Whether a node of shape `actual` satisfies a port declaring `self`.
    pub fn accepts(&self, actual: Shape) -> bool {
        match self {
            Shape::Any => true,
            Shape::Number => matches!(actual, Shape::Count | Shape::Real | Shape::Number),
            declared => *declared == actual,
        }
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Shape::Bool => "bool",
            Shape::Count => "count",
            Shape::Real => "real",
            Shape::Number => "number",
            Shape::Text => "text",
            Shape::List => "list",
            Shape::Record => "record",
            Shape::Tree => "sub-tree",
            Shape::Any => "any",
        };
        f.write_str(name)
    }
}

/// How an incoming write combines with a leaf's current value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeOp {
    /// The write becomes the new value.
    #[default]
    Replace,
    /// The write is a delta added to the current value.
    Add,
    /// The write is appended (lists and text).
    Append,
}

impl fmt::Display for MergeOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MergeOp::Replace => f.write_str("replace"),
            MergeOp::Add => f.write_str("add"),
            MergeOp::Append => f.write_str("append"),
        }
    }
}

/// How a leaf is divided between the two children of a dividing agent.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SplitPolicy {
    /// Halve countable quantities (the first child receives the odd unit),
    /// halve reals, deal list items alternately.
    Even,
    /// Both children receive a copy.
    #[default]
    Duplicate,
    /// Both children start from the empty value of the leaf's shape.
    Reset,
    /// Spatial state: children are displaced by `-d` and `+d` along x.
    Offset(f64),
    /// Delegate to a splitter registered under this name.
    Custom(String),
}

/// Kind of a finite resource pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolKind {
    /// Integral units, apportioned by largest remainder.
    #[default]
    Integer,
    /// Continuous amounts, apportioned proportionally.
    Real,
}
