//! The per-agent hierarchical state store.
//!
//! A [`StateTree`] maps [`StatePath`]s to leaves. Every leaf carries its own
//! [`MergeOp`] (applied when updates land) and [`SplitPolicy`] (applied when
//! the owning agent divides). Keys are kept in `BTreeMap`s so that every
//! traversal, and therefore every snapshot, has a fixed order.

use crate::error::TreeError;
use crate::path::StatePath;
use crate::value::{MergeOp, Shape, SplitPolicy, Value};
use serde::{Deserialize, Serialize, Serializer};
use std::collections::BTreeMap;

/// A leaf: the value plus the policies that govern it.
#[derive(Debug, Clone, PartialEq)]
pub struct Leaf {
    pub value: Value,
    pub merge: MergeOp,
    pub split: SplitPolicy,
}

impl Leaf {
    pub fn new(value: Value) -> Self {
        Self {
            value,
            merge: MergeOp::default(),
            split: SplitPolicy::default(),
        }
    }

    pub fn with_merge(mut self, merge: MergeOp) -> Self {
        self.merge = merge;
        self
    }

    pub fn with_split(mut self, split: SplitPolicy) -> Self {
        self.split = split;
        self
    }
}

/// A node of the tree: either a leaf or a branch of named children.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Leaf(Leaf),
    Branch(BTreeMap<String, Node>),
}

impl Node {
    pub fn shape(&self) -> Shape {
        match self {
            Node::Leaf(leaf) => leaf.value.shape(),
            Node::Branch(_) => Shape::Tree,
        }
    }

    pub fn as_leaf(&self) -> Option<&Leaf> {
        match self {
            Node::Leaf(leaf) => Some(leaf),
            Node::Branch(_) => None,
        }
    }

    /// Child `key` of a branch.
    pub fn child(&self, key: &str) -> Option<&Node> {
        match self {
            Node::Branch(children) => children.get(key),
            Node::Leaf(_) => None,
        }
    }

    fn collect_leaves<'a>(&'a self, at: &StatePath, out: &mut Vec<(StatePath, &'a Leaf)>) {
        match self {
            Node::Leaf(leaf) => out.push((at.clone(), leaf)),
            Node::Branch(children) => {
                for (key, child) in children {
                    child.collect_leaves(&at.join(key.as_str()), out);
                }
            }
        }
    }
}

impl Serialize for Node {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Node::Leaf(leaf) => leaf.value.serialize(serializer),
            Node::Branch(children) => children.serialize(serializer),
        }
    }
}

/// One leaf of the schema and initial snapshot, as it appears in configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeafDecl {
    pub path: StatePath,
    pub value: Value,
    #[serde(default)]
    pub merge: MergeOp,
    #[serde(default)]
    pub split: SplitPolicy,
}

impl LeafDecl {
    pub fn new(path: impl Into<StatePath>, value: Value) -> Self {
        Self {
            path: path.into(),
            value,
            merge: MergeOp::default(),
            split: SplitPolicy::default(),
        }
    }

    pub fn with_merge(mut self, merge: MergeOp) -> Self {
        self.merge = merge;
        self
    }

    pub fn with_split(mut self, split: SplitPolicy) -> Self {
        self.split = split;
        self
    }

    fn to_leaf(&self) -> Leaf {
        Leaf {
            value: self.value.clone(),
            merge: self.merge,
            split: self.split.clone(),
        }
    }
}

/// Hierarchical state of one agent.
///
/// Serializes as nested plain JSON (leaves become their bare values), which
/// is the snapshot format handed to emitters.
#[derive(Debug, Clone, PartialEq)]
pub struct StateTree {
    root: Node,
}

impl Default for StateTree {
    fn default() -> Self {
        Self::new()
    }
}

impl Serialize for StateTree {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.root.serialize(serializer)
    }
}

impl StateTree {
    pub fn new() -> Self {
        Self {
            root: Node::Branch(BTreeMap::new()),
        }
    }

    /// Build a tree from a list of leaf declarations.
    pub fn from_leaves(decls: &[LeafDecl]) -> Result<Self, TreeError> {
        let mut tree = Self::new();
        for decl in decls {
            tree.insert_leaf(&decl.path, decl.to_leaf())?;
        }
        Ok(tree)
    }

    /// Insert a new leaf, creating intermediate branches as needed.
    pub fn insert_leaf(&mut self, path: &StatePath, leaf: Leaf) -> Result<(), TreeError> {
        let Some((last, parents)) = path.keys().split_last() else {
            return Err(TreeError::DuplicateLeaf(path.clone()));
        };

        let mut node = &mut self.root;
        for (depth, key) in parents.iter().enumerate() {
            let children = match node {
                Node::Branch(children) => children,
                Node::Leaf(_) => {
                    return Err(TreeError::PathThroughLeaf {
                        path: path.clone(),
                        leaf: StatePath::new(path.keys()[..depth].iter().cloned()),
                    })
                }
            };
            node = children
                .entry(key.clone())
                .or_insert_with(|| Node::Branch(BTreeMap::new()));
        }

        match node {
            Node::Branch(children) => {
                if children.contains_key(last) {
                    return Err(TreeError::DuplicateLeaf(path.clone()));
                }
                children.insert(last.clone(), Node::Leaf(leaf));
                Ok(())
            }
            Node::Leaf(_) => Err(TreeError::PathThroughLeaf {
                path: path.clone(),
                leaf: StatePath::new(parents.iter().cloned()),
            }),
        }
    }

    /// The node at `path`, if any. The root path returns the whole tree.
    pub fn get(&self, path: &StatePath) -> Option<&Node> {
        let mut node = &self.root;
        for key in path.keys() {
            node = node.child(key)?;
        }
        Some(node)
    }

    fn get_mut(&mut self, path: &StatePath) -> Option<&mut Node> {
        let mut node = &mut self.root;
        for key in path.keys() {
            node = match node {
                Node::Branch(children) => children.get_mut(key)?,
                Node::Leaf(_) => return None,
            };
        }
        Some(node)
    }

    pub fn contains(&self, path: &StatePath) -> bool {
        self.get(path).is_some()
    }

    /// Shape of the node at `path`: the leaf's value shape, or [`Shape::Tree`].
    pub fn shape_at(&self, path: &StatePath) -> Option<Shape> {
        self.get(path).map(Node::shape)
    }

    pub fn leaf(&self, path: &StatePath) -> Result<&Leaf, TreeError> {
        match self.get(path) {
            Some(Node::Leaf(leaf)) => Ok(leaf),
            Some(Node::Branch(_)) => Err(TreeError::NotALeaf(path.clone())),
            None => Err(TreeError::MissingPath(path.clone())),
        }
    }

    fn leaf_mut(&mut self, path: &StatePath) -> Result<&mut Leaf, TreeError> {
        match self.get_mut(path) {
            Some(Node::Leaf(leaf)) => Ok(leaf),
            Some(Node::Branch(_)) => Err(TreeError::NotALeaf(path.clone())),
            None => Err(TreeError::MissingPath(path.clone())),
        }
    }

    pub fn value(&self, path: &StatePath) -> Option<&Value> {
        self.get(path).and_then(Node::as_leaf).map(|leaf| &leaf.value)
    }

    /// Apply `incoming` to the leaf at `path` using the leaf's merge operator.
    pub fn merge(&mut self, path: &StatePath, incoming: Value) -> Result<(), TreeError> {
        let leaf = self.leaf_mut(path)?;
        leaf.value
            .merge(leaf.merge, incoming)
            .map_err(|e| TreeError::from_merge(path, e))
    }

    /// Overwrite the leaf at `path` regardless of its merge operator.
    /// The new value must keep the leaf's shape.
    pub fn set_value(&mut self, path: &StatePath, value: Value) -> Result<(), TreeError> {
        let leaf = self.leaf_mut(path)?;
        leaf.value
            .merge(MergeOp::Replace, value)
            .map_err(|e| TreeError::from_merge(path, e))
    }

    /// Every leaf with its canonical path, in key order.
    pub fn leaves(&self) -> Vec<(StatePath, &Leaf)> {
        let mut out = Vec::new();
        self.root.collect_leaves(&StatePath::root(), &mut out);
        out
    }

    /// Detach the node at `path`.
    pub fn remove(&mut self, path: &StatePath) -> Option<Node> {
        let (last, _) = path.keys().split_last()?;
        match self.get_mut(&path.parent()?)? {
            Node::Branch(children) => children.remove(last),
            Node::Leaf(_) => None,
        }
    }

    /// The tree as a list of leaf declarations (schema plus current values).
    pub fn decls(&self) -> Vec<LeafDecl> {
        self.leaves()
            .into_iter()
            .map(|(path, leaf)| LeafDecl {
                path,
                value: leaf.value.clone(),
                merge: leaf.merge,
                split: leaf.split.clone(),
            })
            .collect()
    }

    /// Snapshot as plain JSON.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }

    pub fn is_empty(&self) -> bool {
        matches!(&self.root, Node::Branch(children) if children.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> StateTree {
        StateTree::from_leaves(&[
            LeafDecl::new("bulk/glucose", Value::Count(100)).with_merge(MergeOp::Add),
            LeafDecl::new("bulk/atp", Value::Real(2.5)).with_merge(MergeOp::Add),
            LeafDecl::new("flags/divide", Value::Bool(false)),
            LeafDecl::new("log", Value::List(vec![])).with_merge(MergeOp::Append),
        ])
        .unwrap()
    }

    #[test]
    fn merge_uses_leaf_operator() {
        let mut tree = sample();
        let glc = StatePath::parse("bulk/glucose");
        tree.merge(&glc, Value::Count(-30)).unwrap();
        assert_eq!(tree.value(&glc), Some(&Value::Count(70)));

        let flag = StatePath::parse("flags/divide");
        tree.merge(&flag, Value::Bool(true)).unwrap();
        assert_eq!(tree.value(&flag), Some(&Value::Bool(true)));

        let log = StatePath::parse("log");
        tree.merge(&log, Value::Text("a".into())).unwrap();
        assert_eq!(tree.value(&log), Some(&Value::List(vec![Value::Text("a".into())])));
    }

    #[test]
    fn shape_violations_are_reported_not_coerced() {
        let mut tree = sample();
        let err = tree
            .merge(&StatePath::parse("flags/divide"), Value::Count(1))
            .unwrap_err();
        assert!(matches!(err, TreeError::Shape { .. }));
        assert_eq!(
            tree.value(&StatePath::parse("flags/divide")),
            Some(&Value::Bool(false))
        );
    }

    #[test]
    fn structural_errors() {
        let mut tree = sample();
        assert!(matches!(
            tree.insert_leaf(&StatePath::parse("bulk/glucose"), Leaf::new(Value::Count(1))),
            Err(TreeError::DuplicateLeaf(_))
        ));
        assert!(matches!(
            tree.insert_leaf(&StatePath::parse("bulk/glucose/x"), Leaf::new(Value::Count(1))),
            Err(TreeError::PathThroughLeaf { .. })
        ));
        assert!(matches!(
            tree.leaf(&StatePath::parse("bulk")),
            Err(TreeError::NotALeaf(_))
        ));
        assert!(matches!(
            tree.merge(&StatePath::parse("nope"), Value::Count(1)),
            Err(TreeError::MissingPath(_))
        ));
    }

    #[test]
    fn leaves_are_in_key_order() {
        let tree = sample();
        let paths: Vec<String> = tree.leaves().iter().map(|(p, _)| p.to_string()).collect();
        assert_eq!(paths, vec!["bulk/atp", "bulk/glucose", "flags/divide", "log"]);
        assert_eq!(tree.shape_at(&StatePath::parse("bulk")), Some(Shape::Tree));
    }

    #[test]
    fn snapshot_is_plain_nested_json() {
        let tree = sample();
        let json = serde_json::to_string(&tree).unwrap();
        assert_eq!(
            json,
            r#"{"bulk":{"atp":2.5,"glucose":100},"flags":{"divide":false},"log":[]}"#
        );
    }

    #[test]
    fn decls_rebuild_an_equal_tree() {
        let tree = sample();
        let rebuilt = StateTree::from_leaves(&tree.decls()).unwrap();
        assert_eq!(tree, rebuilt);
    }

    #[test]
    fn remove_detaches_subtrees() {
        let mut tree = sample();
        assert!(tree.remove(&StatePath::parse("bulk")).is_some());
        assert!(!tree.contains(&StatePath::parse("bulk/atp")));
        assert!(tree.remove(&StatePath::root()).is_none());
    }
}
