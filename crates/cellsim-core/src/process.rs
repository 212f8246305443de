//! Process - the unit of behavior wired onto a state tree.
//!
//! A process never touches the tree directly. Each tick the engine hands it a
//! read-only [`Ports`] view restricted to its wired paths, and the process
//! answers in one of two ways:
//! - a direct [`Update`] for paths nobody else contends for
//! - a [`ResourceRequest`] against finite pools, after which it is called
//!   again with the [`Grants`] the partitioner decided on

use crate::error::{PortError, ProcessFailure};
use crate::path::StatePath;
use crate::tree::{Node, StateTree};
use crate::value::{Shape, Value};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Whether a port may be read, written, or both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Access {
    Read,
    Write,
    ReadWrite,
}

impl Access {
    pub fn can_write(&self) -> bool {
        matches!(self, Access::Write | Access::ReadWrite)
    }

    pub fn can_read(&self) -> bool {
        matches!(self, Access::Read | Access::ReadWrite)
    }
}

/// The direction in which a port may claim a finite resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimRole {
    /// The port never appears in a resource request.
    #[default]
    None,
    /// Only negative deltas.
    Consume,
    /// Only non-negative deltas.
    Produce,
    /// Either sign.
    Exchange,
}

impl ClaimRole {
    /// Whether a claim of `delta` is consistent with this role.
    pub fn permits(&self, delta: f64) -> bool {
        match self {
            ClaimRole::None => false,
            ClaimRole::Consume => delta <= 0.0,
            ClaimRole::Produce => delta >= 0.0,
            ClaimRole::Exchange => true,
        }
    }
}

/// A declared port: name, required shape of the bound node, and access.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortSpec {
    pub name: String,
    pub shape: Shape,
    pub access: Access,
    #[serde(default)]
    pub claims: ClaimRole,
}

impl PortSpec {
    pub fn read(name: impl Into<String>, shape: Shape) -> Self {
        Self {
            name: name.into(),
            shape,
            access: Access::Read,
            claims: ClaimRole::None,
        }
    }

    pub fn write(name: impl Into<String>, shape: Shape) -> Self {
        Self {
            access: Access::Write,
            ..Self::read(name, shape)
        }
    }

    pub fn read_write(name: impl Into<String>, shape: Shape) -> Self {
        Self {
            access: Access::ReadWrite,
            ..Self::read(name, shape)
        }
    }

    /// A read-write numeric port drawn down through resource requests.
    pub fn consumes(name: impl Into<String>) -> Self {
        Self {
            claims: ClaimRole::Consume,
            ..Self::read_write(name, Shape::Number)
        }
    }

    /// A read-write numeric port replenished through resource requests.
    pub fn produces(name: impl Into<String>) -> Self {
        Self {
            claims: ClaimRole::Produce,
            ..Self::read_write(name, Shape::Number)
        }
    }

    /// A read-write numeric port that may be claimed in either direction.
    pub fn exchanges(name: impl Into<String>) -> Self {
        Self {
            claims: ClaimRole::Exchange,
            ..Self::read_write(name, Shape::Number)
        }
    }
}

/// Read-only view of the state a process is wired to.
///
/// Lookups go through port names; paths outside the process's bindings are
/// unreachable.
#[derive(Debug, Clone, Copy)]
pub struct Ports<'a> {
    tree: &'a StateTree,
    bindings: &'a BTreeMap<String, StatePath>,
}

impl<'a> Ports<'a> {
    pub fn new(tree: &'a StateTree, bindings: &'a BTreeMap<String, StatePath>) -> Self {
        Self { tree, bindings }
    }

    /// Names of the wired ports.
    pub fn names(&self) -> impl Iterator<Item = &'a str> {
        self.bindings.keys().map(String::as_str)
    }

    pub fn path(&self, port: &str) -> Result<&'a StatePath, PortError> {
        self.bindings
            .get(port)
            .ok_or_else(|| PortError::Unbound(port.to_string()))
    }

    pub fn node(&self, port: &str) -> Result<&'a Node, PortError> {
        let path = self.path(port)?;
        self.tree.get(path).ok_or_else(|| PortError::Missing {
            port: port.to_string(),
            path: path.clone(),
        })
    }

    /// A node beneath a sub-tree port.
    pub fn child(&self, port: &str, keys: &[&str]) -> Result<&'a Node, PortError> {
        let path = self.path(port)?.extend(keys);
        self.tree.get(&path).ok_or_else(|| PortError::Missing {
            port: port.to_string(),
            path,
        })
    }

    pub fn value(&self, port: &str) -> Result<&'a Value, PortError> {
        match self.node(port)? {
            Node::Leaf(leaf) => Ok(&leaf.value),
            Node::Branch(_) => Err(PortError::WrongShape {
                port: port.to_string(),
                expected: Shape::Any,
                found: Shape::Tree,
            }),
        }
    }

    pub fn count(&self, port: &str) -> Result<i64, PortError> {
        let value = self.value(port)?;
        value.as_i64().ok_or_else(|| PortError::WrongShape {
            port: port.to_string(),
            expected: Shape::Count,
            found: value.shape(),
        })
    }

    /// Numeric value of a port; counts widen to `f64`.
    pub fn real(&self, port: &str) -> Result<f64, PortError> {
        let value = self.value(port)?;
        value.as_f64().ok_or_else(|| PortError::WrongShape {
            port: port.to_string(),
            expected: Shape::Number,
            found: value.shape(),
        })
    }

    pub fn flag(&self, port: &str) -> Result<bool, PortError> {
        let value = self.value(port)?;
        value.as_bool().ok_or_else(|| PortError::WrongShape {
            port: port.to_string(),
            expected: Shape::Bool,
            found: value.shape(),
        })
    }
}

/// One write: a value for a port, or for a node beneath a sub-tree port.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Write {
    pub port: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub key: Vec<String>,
    pub value: Value,
}

/// Writes produced by a process, merged in order with each leaf's operator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Update {
    pub writes: Vec<Write>,
}

impl Update {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, port: impl Into<String>, value: impl Into<Value>) -> Self {
        self.writes.push(Write {
            port: port.into(),
            key: Vec::new(),
            value: value.into(),
        });
        self
    }

    pub fn set_at(mut self, port: impl Into<String>, key: &[&str], value: impl Into<Value>) -> Self {
        self.writes.push(Write {
            port: port.into(),
            key: key.iter().map(|k| k.to_string()).collect(),
            value: value.into(),
        });
        self
    }

    pub fn push(&mut self, write: Write) {
        self.writes.push(write);
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.writes.len()
    }
}

/// A signed claim on a resource port: negative consumes, non-negative produces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claim {
    pub port: String,
    pub delta: f64,
}

/// Claims against finite pools, submitted in the request phase.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceRequest {
    pub claims: Vec<Claim>,
}

impl ResourceRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn claim(mut self, port: impl Into<String>, delta: f64) -> Self {
        self.claims.push(Claim {
            port: port.into(),
            delta,
        });
        self
    }

    /// Ask to remove `amount` from the pool behind `port`.
    pub fn consume(self, port: impl Into<String>, amount: f64) -> Self {
        self.claim(port, -amount.abs())
    }

    /// Announce `amount` added to the pool behind `port`.
    pub fn produce(self, port: impl Into<String>, amount: f64) -> Self {
        self.claim(port, amount.abs())
    }

    pub fn is_empty(&self) -> bool {
        self.claims.is_empty()
    }
}

/// What a process yields in the request phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    /// Final for this tick; the process is not called again.
    Update(Update),
    /// The process is called again through [`Process::apply`] with its grants.
    Request(ResourceRequest),
}

impl From<Update> for Intent {
    fn from(update: Update) -> Self {
        Intent::Update(update)
    }
}

impl From<ResourceRequest> for Intent {
    fn from(request: ResourceRequest) -> Self {
        Intent::Request(request)
    }
}

/// Outcome of one claim after partitioning.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Grant {
    pub requested: f64,
    pub granted: f64,
}

impl Grant {
    /// Granted share of the request, in `[0, 1]`.
    pub fn fraction(&self) -> f64 {
        if self.requested == 0.0 {
            1.0
        } else {
            self.granted / self.requested
        }
    }

    pub fn is_full(&self) -> bool {
        self.granted == self.requested
    }
}

/// Grants for one process, keyed by port.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Grants(BTreeMap<String, Grant>);

impl Grants {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, port: impl Into<String>, grant: Grant) {
        self.0.insert(port.into(), grant);
    }

    pub fn get(&self, port: &str) -> Option<&Grant> {
        self.0.get(port)
    }

    /// Granted delta for `port`; zero if the port was not claimed.
    pub fn granted(&self, port: &str) -> f64 {
        self.0.get(port).map(|g| g.granted).unwrap_or(0.0)
    }

    /// Granted fraction for `port`; one if the port was not claimed.
    pub fn fraction(&self, port: &str) -> f64 {
        self.0.get(port).map(Grant::fraction).unwrap_or(1.0)
    }

    /// The smallest granted fraction over all claims.
    pub fn min_fraction(&self) -> f64 {
        self.0.values().map(Grant::fraction).fold(1.0, f64::min)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Grant)> {
        self.0.iter().map(|(port, grant)| (port.as_str(), grant))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// The capability interface every process implements.
///
/// Processes are pure with respect to anything outside their ports: the same
/// view and duration must produce the same intent. Implementations hold only
/// immutable configuration and are shared between agents behind an `Arc`.
pub trait Process: Send + Sync {
    /// Registry key this process was built from (for display and logging).
    fn kind(&self) -> &str;

    /// Ports the process needs wired.
    fn ports(&self) -> Vec<PortSpec>;

    /// Request phase: produce a direct update or a resource request.
    fn request(&self, ports: &Ports<'_>, dt: f64) -> Result<Intent, ProcessFailure>;

    /// Update phase, only called after a [`Intent::Request`]. Must respect
    /// the grants: resource ports may move at most by the granted delta.
    fn apply(&self, ports: &Ports<'_>, grants: &Grants, dt: f64) -> Result<Update, ProcessFailure> {
        let _ = (ports, grants, dt);
        Ok(Update::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::LeafDecl;

    fn tree() -> StateTree {
        StateTree::from_leaves(&[
            LeafDecl::new("bulk/glc", Value::Count(12)),
            LeafDecl::new("mass", Value::Real(1.5)),
            LeafDecl::new("flags/divide", Value::Bool(true)),
            LeafDecl::new("secret", Value::Count(99)),
        ])
        .unwrap()
    }

    #[test]
    fn ports_only_reach_bound_paths() {
        let tree = tree();
        let mut bindings = BTreeMap::new();
        bindings.insert("glucose".to_string(), StatePath::parse("bulk/glc"));
        bindings.insert("mass".to_string(), StatePath::parse("mass"));
        bindings.insert("bulk".to_string(), StatePath::parse("bulk"));
        let ports = Ports::new(&tree, &bindings);

        assert_eq!(ports.count("glucose").unwrap(), 12);
        assert_eq!(ports.real("glucose").unwrap(), 12.0);
        assert_eq!(ports.real("mass").unwrap(), 1.5);
        assert!(ports.child("bulk", &["glc"]).is_ok());
        assert!(matches!(ports.value("secret"), Err(PortError::Unbound(_))));
        assert!(matches!(
            ports.count("mass"),
            Err(PortError::WrongShape { .. })
        ));
    }

    #[test]
    fn claim_roles() {
        assert!(ClaimRole::Consume.permits(-3.0));
        assert!(!ClaimRole::Consume.permits(1.0));
        assert!(ClaimRole::Produce.permits(0.0));
        assert!(ClaimRole::Exchange.permits(-1.0));
        assert!(!ClaimRole::None.permits(-1.0));
    }

    #[test]
    fn grants_default_for_unclaimed_ports() {
        let mut grants = Grants::new();
        grants.insert(
            "glc",
            Grant {
                requested: -10.0,
                granted: -4.0,
            },
        );
        assert_eq!(grants.granted("glc"), -4.0);
        assert!((grants.fraction("glc") - 0.4).abs() < 1e-12);
        assert_eq!(grants.granted("other"), 0.0);
        assert_eq!(grants.fraction("other"), 1.0);
        assert!((grants.min_fraction() - 0.4).abs() < 1e-12);
    }

    #[test]
    fn request_builders_normalize_sign() {
        let request = ResourceRequest::new().consume("a", 5.0).produce("b", -2.0);
        assert_eq!(request.claims[0].delta, -5.0);
        assert_eq!(request.claims[1].delta, 2.0);
    }
}
