//! Graph model, contexts and fingerprints for the plexus evaluation engine.
//!
//! This crate holds everything that describes *what* to compute: typed
//! plugs wired into a DAG of nodes, the immutable [`Context`] parameterizing
//! an evaluation, the 128-bit [`Fingerprint`] summarizing a would-be result,
//! and the dirty propagation that invalidates fingerprints after an edit.
//! Evaluation, caching and cancellation live in `plexus-eval`.

pub mod context;
pub mod dirty;
pub mod error;
pub mod graph;
pub mod hash;
pub mod id;
pub mod node;
pub mod plug;
pub mod value;

// Re-export commonly used types
pub use context::{Context, ContextScope};
pub use dirty::{DirtyEvent, DirtyListener, DirtyPass, ListenerError, ListenerId};
pub use error::{CoreError, EvalError, NodeError};
pub use graph::Graph;
pub use hash::{Fingerprint, FingerprintHasher};
pub use id::{GraphId, NodeId, PlugId};
pub use node::{ComputeScope, Computable, HashScope, Node};
pub use plug::{Direction, Plug, PlugDescriptor};
pub use value::{Value, ValueType};
