//! Hierarchical paths into the state tree.
//!
//! A path is an ordered sequence of string keys. The textual form joins
//! keys with `/` (`bulk/glucose`); the root is written `/`.

use serde::de::{self, SeqAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// An ordered sequence of keys addressing a node in a [`StateTree`](crate::tree::StateTree).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct StatePath(Vec<String>);

impl StatePath {
    /// The empty path, addressing the root of a tree.
    pub fn root() -> Self {
        Self(Vec::new())
    }

    pub fn new<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(keys.into_iter().map(Into::into).collect())
    }

    /// Parse the `/`-separated textual form. Empty segments are ignored.
    pub fn parse(text: &str) -> Self {
        Self(
            text.split('/')
                .map(str::trim)
                .filter(|k| !k.is_empty())
                .map(String::from)
                .collect(),
        )
    }

    pub fn keys(&self) -> &[String] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// A new path with `key` appended.
    pub fn join(&self, key: impl Into<String>) -> Self {
        let mut keys = self.0.clone();
        keys.push(key.into());
        Self(keys)
    }

    /// A new path with every key of `suffix` appended.
    pub fn extend<S: AsRef<str>>(&self, suffix: &[S]) -> Self {
        let mut keys = self.0.clone();
        keys.extend(suffix.iter().map(|k| k.as_ref().to_string()));
        Self(keys)
    }

    pub fn parent(&self) -> Option<Self> {
        if self.0.is_empty() {
            None
        } else {
            Some(Self(self.0[..self.0.len() - 1].to_vec()))
        }
    }

    pub fn last(&self) -> Option<&str> {
        self.0.last().map(String::as_str)
    }

    /// Whether `prefix` is an ancestor of (or equal to) this path.
    pub fn starts_with(&self, prefix: &StatePath) -> bool {
        self.0.starts_with(&prefix.0)
    }
}

impl fmt::Display for StatePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            f.write_str("/")
        } else {
            f.write_str(&self.0.join("/"))
        }
    }
}

impl FromStr for StatePath {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::parse(s))
    }
}

impl From<&str> for StatePath {
    fn from(text: &str) -> Self {
        Self::parse(text)
    }
}

impl Serialize for StatePath {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

struct StatePathVisitor;

impl<'de> Visitor<'de> for StatePathVisitor {
    type Value = StatePath;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a `/`-separated path string or a list of keys")
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<StatePath, E> {
        Ok(StatePath::parse(v))
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<StatePath, A::Error> {
        let mut keys = Vec::new();
        while let Some(key) = seq.next_element::<String>()? {
            keys.push(key);
        }
        Ok(StatePath(keys))
    }
}

impl<'de> Deserialize<'de> for StatePath {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(StatePathVisitor)
    }
}
