//! Typed input/output slots on nodes.
//!
//! A node declares its plugs as [`PlugDescriptor`]s. When the node is added
//! to a graph each descriptor becomes a [`Plug`]: a vertex of the plug graph
//! carrying the owning node, the local value (for unconnected inputs) and a
//! generation number used to scope cached fingerprints.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::id::NodeId;
use crate::value::{Value, ValueType};

/// Direction of a plug relative to its node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    In,
    Out,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::In => f.write_str("in"),
            Direction::Out => f.write_str("out"),
        }
    }
}

/// Declaration of a plug, supplied by a node's computable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlugDescriptor {
    pub name: String,
    pub direction: Direction,
    pub value_type: ValueType,
    /// Initial local value for inputs. Ignored for outputs.
    pub default: Value,
}

impl PlugDescriptor {
    /// An input plug whose default is the type's zero value.
    pub fn input(name: impl Into<String>, value_type: ValueType) -> Self {
        PlugDescriptor {
            name: name.into(),
            direction: Direction::In,
            value_type,
            default: value_type.default_value(),
        }
    }

    /// An output plug.
    pub fn output(name: impl Into<String>, value_type: ValueType) -> Self {
        PlugDescriptor {
            name: name.into(),
            direction: Direction::Out,
            value_type,
            default: Value::Unit,
        }
    }

    /// Replaces the default local value.
    ///
    /// The default must match `value_type`; the graph rejects mismatches
    /// when the node is added.
    pub fn with_default(mut self, default: impl Into<Value>) -> Self {
        self.default = default.into();
        self
    }

    pub fn is_input(&self) -> bool {
        self.direction == Direction::In
    }

    pub fn is_output(&self) -> bool {
        self.direction == Direction::Out
    }
}

/// A plug as stored in the graph.
#[derive(Debug, Clone)]
pub struct Plug {
    /// Owning node.
    pub node: NodeId,
    pub name: Arc<str>,
    pub direction: Direction,
    pub value_type: ValueType,
    /// Local value, used when the plug has no input connection.
    pub local: Value,
    /// Bumped every time the plug is dirtied. Part of every hash-cache key.
    pub generation: u64,
}

impl Plug {
    pub(crate) fn from_descriptor(node: NodeId, desc: &PlugDescriptor, generation: u64) -> Self {
        Plug {
            node,
            name: Arc::from(desc.name.as_str()),
            direction: desc.direction,
            value_type: desc.value_type,
            local: desc.default.clone(),
            generation,
        }
    }

    pub fn is_input(&self) -> bool {
        self.direction == Direction::In
    }

    pub fn is_output(&self) -> bool {
        self.direction == Direction::Out
    }
}

/// Edge weight in the plug graph: a directed connection from an upstream
/// plug to a downstream input plug.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connection;
