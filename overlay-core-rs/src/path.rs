//! Node identities and the network path a message has travelled

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of an overlay node
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    /// Reserved identifier naming "the CSMS" as a logical destination
    pub const CSMS: &'static str = "CSMS";

    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The reserved logical CSMS identity
    pub fn csms() -> Self {
        Self(Self::CSMS.to_string())
    }

    pub fn is_csms(&self) -> bool {
        self.0 == Self::CSMS
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for NodeId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&NodeId> for NodeId {
    fn from(id: &NodeId) -> Self {
        id.clone()
    }
}

/// Ordered list of nodes a message has passed through, oldest hop first.
///
/// Paths are values: `append` returns a new path and leaves `self` untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NetworkPath(Vec<NodeId>);

impl NetworkPath {
    pub fn empty() -> Self {
        Self(Vec::new())
    }

    /// Build a path from hops, oldest first
    pub fn from<I, N>(hops: I) -> Self
    where
        I: IntoIterator<Item = N>,
        N: Into<NodeId>,
    {
        Self(hops.into_iter().map(Into::into).collect())
    }

    /// New path with `node` as the most recent hop
    pub fn append(&self, node: impl Into<NodeId>) -> Self {
        let mut hops = Vec::with_capacity(self.0.len() + 1);
        hops.extend(self.0.iter().cloned());
        hops.push(node.into());
        Self(hops)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// First hop (the originator)
    pub fn source(&self) -> Option<&NodeId> {
        self.0.first()
    }

    /// Most recent hop (the immediate sender)
    pub fn last(&self) -> Option<&NodeId> {
        self.0.last()
    }

    pub fn contains(&self, node: &NodeId) -> bool {
        self.0.contains(node)
    }

    pub fn position(&self, node: &NodeId) -> Option<usize> {
        self.0.iter().position(|hop| hop == node)
    }

    pub fn get(&self, index: usize) -> Option<&NodeId> {
        self.0.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &NodeId> {
        self.0.iter()
    }

    /// The same hops, newest first
    pub fn reversed(&self) -> Self {
        Self(self.0.iter().rev().cloned().collect())
    }

    pub fn hops(&self) -> &[NodeId] {
        &self.0
    }
}

impl fmt::Display for NetworkPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for (i, hop) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            f.write_str(hop.as_str())?;
        }
        f.write_str("]")
    }
}

impl<N: Into<NodeId>> FromIterator<N> for NetworkPath {
    fn from_iter<T: IntoIterator<Item = N>>(iter: T) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}
