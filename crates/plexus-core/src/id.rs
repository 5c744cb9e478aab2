//! Stable ID newtypes for graph entities.
//!
//! All IDs are distinct newtype wrappers over `u32`, providing type safety
//! so that a `PlugId` cannot be accidentally used where a `NodeId` is expected.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use petgraph::graph::NodeIndex;
use serde::{Deserialize, Serialize};

/// Stable node identifier, allocated by the owning [`Graph`](crate::graph::Graph).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub u32);

/// Stable plug identifier. Maps to a petgraph `NodeIndex<u32>` in the plug graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PlugId(pub u32);

/// Process-unique identity of a [`Graph`](crate::graph::Graph) instance.
///
/// Several graphs may share one cache service; their hash-cache entries are
/// kept apart by this id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GraphId(pub u64);

static NEXT_GRAPH_ID: AtomicU64 = AtomicU64::new(1);

impl GraphId {
    /// Allocates a fresh id, never returned before in this process.
    pub fn fresh() -> Self {
        GraphId(NEXT_GRAPH_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for PlugId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for GraphId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// Bridge between PlugId and petgraph's NodeIndex<u32>.

impl From<NodeIndex<u32>> for PlugId {
    fn from(idx: NodeIndex<u32>) -> Self {
        PlugId(idx.index() as u32)
    }
}

impl From<PlugId> for NodeIndex<u32> {
    fn from(id: PlugId) -> Self {
        NodeIndex::new(id.0 as usize)
    }
}
