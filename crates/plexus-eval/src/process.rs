//! Per-thread process stack.
//!
//! Every `hash`/`compute` invocation pushes a [`ProcessFrame`] for the
//! duration of the call. The stack serves two purposes:
//!
//! - **Cycle detection**: before a frame for `(plug, context)` is pushed, the
//!   stack is searched for an active frame with the same identity. A match
//!   means the plug depends on itself and evaluation fails instead of
//!   overflowing the call stack.
//! - **Cancellation propagation**: nested frames inherit the token of the
//!   outermost call, so node code deep in a chain sees the token the caller
//!   of `get_value` is holding.

use std::cell::RefCell;
use std::marker::PhantomData;

use plexus_core::context::Context;
use plexus_core::hash::Fingerprint;
use plexus_core::id::{GraphId, PlugId};

use crate::cancel::CancellationToken;

/// Which engine operation a frame belongs to. Hash and compute frames are
/// checked for cycles independently: computing a plug legitimately hashes
/// it first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameKind {
    Hash,
    Compute,
}

/// Bookkeeping for one active `hash`/`compute` call.
#[derive(Debug, Clone)]
pub struct ProcessFrame {
    pub graph: GraphId,
    pub plug: PlugId,
    pub context: Context,
    pub context_hash: Fingerprint,
    pub kind: FrameKind,
    pub token: CancellationToken,
}

impl ProcessFrame {
    fn same_identity(
        &self,
        graph: GraphId,
        plug: PlugId,
        context_hash: Fingerprint,
        kind: FrameKind,
    ) -> bool {
        self.graph == graph
            && self.plug == plug
            && self.kind == kind
            && self.context_hash == context_hash
    }
}

thread_local! {
    static STACK: RefCell<Vec<ProcessFrame>> = const { RefCell::new(Vec::new()) };
}

/// The pushed frame would re-enter an active one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleDetected;

/// RAII guard for a pushed frame. `!Send`; popped on drop.
#[must_use = "the frame is popped as soon as the guard is dropped"]
#[derive(Debug)]
pub struct Process {
    depth: usize,
    _not_send: PhantomData<*const ()>,
}

impl Process {
    /// Pushes a frame, failing if an identical one is already active on
    /// this thread.
    pub fn push(
        graph: GraphId,
        plug: PlugId,
        context: &Context,
        kind: FrameKind,
        token: CancellationToken,
    ) -> Result<Process, CycleDetected> {
        let context_hash = context.hash();
        STACK.with(|stack| {
            let mut stack = stack.borrow_mut();
            if stack
                .iter()
                .any(|f| f.same_identity(graph, plug, context_hash, kind))
            {
                return Err(CycleDetected);
            }
            stack.push(ProcessFrame {
                graph,
                plug,
                context: context.clone(),
                context_hash,
                kind,
                token,
            });
            Ok(Process {
                depth: stack.len() - 1,
                _not_send: PhantomData,
            })
        })
    }

    /// Whether a frame with this identity is active on this thread.
    pub fn is_active(graph: GraphId, plug: PlugId, context: &Context, kind: FrameKind) -> bool {
        let context_hash = context.hash();
        STACK.with(|stack| {
            stack
                .borrow()
                .iter()
                .any(|f| f.same_identity(graph, plug, context_hash, kind))
        })
    }
}

impl Drop for Process {
    fn drop(&mut self) {
        STACK.with(|stack| {
            let mut stack = stack.borrow_mut();
            debug_assert_eq!(stack.len(), self.depth + 1, "process frames popped out of order");
            stack.truncate(self.depth);
        });
    }
}

/// Token of the innermost active frame on this thread.
pub fn current_token() -> Option<CancellationToken> {
    STACK.with(|stack| stack.borrow().last().map(|f| f.token.clone()))
}

/// Number of active frames on this thread.
pub fn depth() -> usize {
    STACK.with(|stack| stack.borrow().len())
}
