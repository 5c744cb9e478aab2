//! Nodes and the node-author contract.
//!
//! A [`Node`] is a name, the ids of its plugs, and one [`Computable`]: the
//! capability that declares the plugs and implements `hash`/`compute` for
//! every output. There is no node type hierarchy; behavior lives entirely in
//! the computable.
//!
//! # Contract
//!
//! - `compute` is a pure function of the output name, the context and the
//!   input values it pulls through its [`ComputeScope`]. It must not read any
//!   other ambient state.
//! - `hash` must feed every input and context variable that can affect
//!   `compute` into the hasher. Omissions produce stale cache hits.
//! - Long-running `compute` implementations poll
//!   [`ComputeScope::check_cancelled`] at natural checkpoints.

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;

use crate::context::Context;
use crate::error::{EvalError, NodeError};
use crate::hash::{Fingerprint, FingerprintHasher};
use crate::id::PlugId;
use crate::plug::PlugDescriptor;
use crate::value::Value;

/// Access available to a node while it fingerprints one of its outputs.
pub trait HashScope {
    /// The context the output is being hashed in.
    fn context(&self) -> &Context;

    /// Fingerprint of the named input in the current context.
    fn input_hash(&mut self, input: &str) -> Result<Fingerprint, EvalError>;

    /// Fingerprint of the named input in another context, for nodes that
    /// evaluate upstream under a modified environment.
    fn input_hash_in(&mut self, input: &str, context: &Context) -> Result<Fingerprint, EvalError>;
}

/// Access available to a node while it computes one of its outputs.
///
/// Inputs are resolved on demand through the engine (and so through the
/// cache); a node only pays for the inputs it actually reads.
pub trait ComputeScope {
    /// The context the output is being computed in.
    fn context(&self) -> &Context;

    /// Value of the named input in the current context.
    fn input(&mut self, input: &str) -> Result<Arc<Value>, EvalError>;

    /// Value of the named input in another context.
    fn input_in(&mut self, input: &str, context: &Context) -> Result<Arc<Value>, EvalError>;

    /// Whether the cancellation token of the current call chain has fired.
    fn is_cancelled(&self) -> bool;

    /// Returns `Err(NodeError::Cancelled)` once cancellation has fired, so
    /// long loops can write `scope.check_cancelled()?`.
    fn check_cancelled(&self) -> Result<(), NodeError> {
        if self.is_cancelled() {
            Err(NodeError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// The polymorphic behavior of a node.
pub trait Computable: Send + Sync {
    /// Identity seed mixed into every output fingerprint. Distinct node
    /// kinds must return distinct names.
    fn type_name(&self) -> &'static str;

    /// The plugs this node owns, in declaration order.
    fn plugs(&self) -> Vec<PlugDescriptor>;

    /// Outputs whose values depend on `input`. `None` means every output.
    fn affects(&self, input: &str) -> Option<Vec<String>> {
        let _ = input;
        None
    }

    /// Mixes everything `output` depends on into `hasher`.
    ///
    /// The engine has already seeded the hasher with `type_name` and the
    /// output name, and appends the context hash afterwards. There is no
    /// default: every output-bearing node must describe its inputs.
    fn hash(
        &self,
        output: &str,
        scope: &mut dyn HashScope,
        hasher: &mut FingerprintHasher,
    ) -> Result<(), NodeError>;

    /// Computes the value of `output`.
    fn compute(&self, output: &str, scope: &mut dyn ComputeScope) -> Result<Value, NodeError>;
}

/// A node as stored in the graph.
#[derive(Clone)]
pub struct Node {
    pub name: String,
    /// Plugs by name, in declaration order.
    pub plugs: IndexMap<String, PlugId>,
    pub computable: Arc<dyn Computable>,
}

impl Node {
    /// Looks up one of this node's plugs by name.
    pub fn plug(&self, name: &str) -> Option<PlugId> {
        self.plugs.get(name).copied()
    }

    pub fn type_name(&self) -> &'static str {
        self.computable.type_name()
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("name", &self.name)
            .field("type", &self.computable.type_name())
            .field("plugs", &self.plugs)
            .finish()
    }
}
