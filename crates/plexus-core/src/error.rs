//! Error types for graph editing and evaluation.
//!
//! Uses `thiserror` for structured, matchable error variants:
//! - [`CoreError`] for graph mutations and lookups.
//! - [`EvalError`] for `get_value`/`hash` failures, delivered to every
//!   caller waiting on the same computation (hence `Clone`).
//! - [`NodeError`] for what a node's own `hash`/`compute` can return.

use thiserror::Error;

use crate::id::{NodeId, PlugId};
use crate::value::ValueType;

/// Errors produced by graph mutations and lookups.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CoreError {
    /// A node id was not found in the graph.
    #[error("node not found: NodeId({id})", id = id.0)]
    NodeNotFound { id: NodeId },

    /// A plug id was not found in the graph.
    #[error("plug not found: PlugId({id})", id = id.0)]
    PlugNotFound { id: PlugId },

    /// A node has no plug with the requested name.
    #[error("node '{node}' has no plug named '{name}'")]
    NoSuchPlug { node: String, name: String },

    /// Two plugs on one node share a name.
    #[error("node '{node}' declares plug '{name}' twice")]
    DuplicatePlug { node: String, name: String },

    /// A connection was requested into a plug that cannot accept one.
    #[error("invalid connection: {reason}")]
    InvalidConnection { reason: String },

    /// A value or connection does not match the plug's declared type.
    #[error("type mismatch on '{plug}': expected {expected}, got {got}")]
    TypeMismatch {
        plug: String,
        expected: ValueType,
        got: ValueType,
    },

    /// `set_value` on a plug whose value comes from a connection.
    #[error("plug '{plug}' has an input connection; disconnect it before setting a value")]
    HasInput { plug: String },

    /// `set_value` on an output plug.
    #[error("plug '{plug}' is an output; outputs are computed, not set")]
    NotAnInput { plug: String },
}

/// Failures of `get_value`/`hash`.
///
/// Messages name the originating node, plug and context, never a raw
/// fingerprint.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvalError {
    /// The node's `compute` (or `hash`) failed. Never cached; a later
    /// request retries.
    #[error("error computing {node}.{plug} in context {context}: {message}")]
    Compute {
        node: String,
        plug: String,
        context: String,
        message: String,
    },

    /// A feedback loop: the plug was requested while already being
    /// evaluated in the same context on this call chain.
    #[error("cycle detected evaluating {node}.{plug} in context {context}")]
    Cycle {
        node: String,
        plug: String,
        context: String,
    },

    /// The computation was abandoned through its cancellation token. Not a
    /// failure; callers typically retry.
    #[error("computation cancelled")]
    Cancelled,

    /// A node produced a value of the wrong type for its output plug.
    #[error("{node}.{plug} produced {got}, but the plug is declared {expected}")]
    TypeMismatch {
        node: String,
        plug: String,
        expected: ValueType,
        got: ValueType,
    },

    /// A node asked for an input it does not declare.
    #[error("node '{node}' has no input named '{input}'")]
    MissingInput { node: String, input: String },

    /// A graph lookup failed while evaluating.
    #[error(transparent)]
    Graph(#[from] CoreError),

    /// The thread computing a shared result unwound without producing one.
    #[error("in-flight computation was abandoned without a result")]
    Abandoned,

    /// The cache service was shut down.
    #[error("cache service has been shut down")]
    CacheShutdown,
}

impl EvalError {
    /// Returns `true` for the [`EvalError::Cancelled`] outcome.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, EvalError::Cancelled)
    }
}

/// What a node's `hash`/`compute` may fail with.
///
/// Upstream failures pass through untouched, so the error a caller sees
/// names the node that actually failed rather than each node on the way.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum NodeError {
    /// The node itself failed.
    #[error("{0}")]
    Failed(String),

    /// The node observed cancellation and stopped.
    #[error("cancelled")]
    Cancelled,

    /// An upstream request failed.
    #[error(transparent)]
    Upstream(#[from] EvalError),
}

impl NodeError {
    /// Shorthand for [`NodeError::Failed`].
    pub fn failed(message: impl Into<String>) -> Self {
        NodeError::Failed(message.into())
    }
}
