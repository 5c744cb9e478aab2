//! Pull evaluation: `hash` and `get_value`.
//!
//! An [`Evaluator`] borrows a graph and a cache service and resolves plugs on
//! demand. Resolving an output plug:
//!
//! 1. hash it (memoized per plug generation and context),
//! 2. look the fingerprint up in the cache, or
//! 3. become the single in-flight computation for it: push a compute frame,
//!    let the node pull its inputs back through this evaluator, pop.
//!
//! Input plugs are not cached: a connected input resolves as its upstream
//! source, an unconnected one yields its local value.

use std::sync::Arc;

use plexus_core::context::{Context, ContextScope};
use plexus_core::error::{CoreError, EvalError, NodeError};
use plexus_core::graph::Graph;
use plexus_core::hash::{Fingerprint, FingerprintHasher};
use plexus_core::id::PlugId;
use plexus_core::node::{ComputeScope, HashScope, Node};
use plexus_core::plug::Plug;
use plexus_core::value::Value;

use crate::cache::{CacheService, HashKey, Outcome};
use crate::cancel::CancellationToken;
use crate::config::EvalOptions;
use crate::process::{self, FrameKind, Process};

/// Upper bound on retries after a foreign cancellation, so a stream of
/// cancelled winners cannot keep one caller looping forever.
const MAX_FOREIGN_RETRIES: usize = 16;

/// Seed for fingerprints of unconnected input values.
const LOCAL_VALUE_SEED: &str = "plexus::local-value";

/// Evaluates plugs of one graph against one cache service.
///
/// Cheap to construct; make one per request or per worker thread.
pub struct Evaluator<'a> {
    graph: &'a Graph,
    cache: &'a CacheService,
    options: EvalOptions,
}

impl<'a> Evaluator<'a> {
    /// Evaluator with default options. Inside a running computation the
    /// token of the active frame is inherited, so nested evaluators observe
    /// the caller's cancellation.
    pub fn new(graph: &'a Graph, cache: &'a CacheService) -> Self {
        let options = EvalOptions {
            token: process::current_token().unwrap_or_default(),
            ..EvalOptions::default()
        };
        Evaluator::with_options(graph, cache, options)
    }

    pub fn with_options(graph: &'a Graph, cache: &'a CacheService, options: EvalOptions) -> Self {
        Evaluator {
            graph,
            cache,
            options,
        }
    }

    pub fn with_token(graph: &'a Graph, cache: &'a CacheService, token: CancellationToken) -> Self {
        Evaluator::with_options(graph, cache, EvalOptions::with_token(token))
    }

    pub fn graph(&self) -> &'a Graph {
        self.graph
    }

    pub fn cache(&self) -> &'a CacheService {
        self.cache
    }

    pub fn token(&self) -> &CancellationToken {
        &self.options.token
    }

    // -----------------------------------------------------------------------
    // Hashing
    // -----------------------------------------------------------------------

    /// Fingerprint of the value `plug` would have in `context`.
    pub fn hash(&self, plug: PlugId, context: &Context) -> Result<Fingerprint, EvalError> {
        self.cache.check_open()?;
        let data = self.graph.try_plug(plug)?;

        if data.is_input() {
            let source = self.source(plug, context)?;
            if source != plug {
                return self.hash(source, context);
            }
            let mut hasher = FingerprintHasher::seeded(LOCAL_VALUE_SEED);
            data.local.hash_into(&mut hasher);
            return Ok(hasher.finish());
        }

        let key = HashKey {
            graph: self.graph.id(),
            plug,
            generation: data.generation,
            context: context.hash(),
        };
        if let Some(fingerprint) = self.cache.hash_lookup(&key) {
            return Ok(fingerprint);
        }

        let node = self.owner(data)?;
        let _frame = Process::push(
            self.graph.id(),
            plug,
            context,
            FrameKind::Hash,
            self.options.token.clone(),
        )
        .map_err(|_| self.cycle(plug, context))?;

        let mut hasher = FingerprintHasher::seeded(node.type_name());
        hasher.append_str(&data.name);
        let mut scope = EngineHashScope {
            eval: self,
            node,
            context,
        };
        node.computable
            .hash(&data.name, &mut scope, &mut hasher)
            .map_err(|err| self.wrap(plug, context, err))?;
        hasher.append_fingerprint(&context.hash());

        let fingerprint = hasher.finish();
        self.cache.hash_store(key, fingerprint);
        tracing::trace!(plug = %self.graph.plug_path(plug), %context, %fingerprint, "hashed");
        Ok(fingerprint)
    }

    // -----------------------------------------------------------------------
    // Values
    // -----------------------------------------------------------------------

    /// Value of `plug` in `context`, computing and caching it if needed.
    ///
    /// Concurrent callers asking for the same plug and context share one
    /// computation. A `Cancelled` result caused by another caller's token is
    /// retried while this evaluator's own token is live, unless disabled in
    /// [`EvalOptions`].
    pub fn get_value(&self, plug: PlugId, context: &Context) -> Result<Arc<Value>, EvalError> {
        let mut retries = 0;
        loop {
            match self.resolve(plug, context) {
                Err(EvalError::Cancelled) if self.may_retry(retries) => {
                    retries += 1;
                    tracing::debug!(
                        plug = %self.graph.plug_path(plug),
                        retries,
                        "shared computation was cancelled by another caller; retrying"
                    );
                }
                outcome => return outcome,
            }
        }
    }

    fn may_retry(&self, retries: usize) -> bool {
        self.options.retry_foreign_cancellation
            && !self.options.token.is_cancelled()
            && retries < MAX_FOREIGN_RETRIES
    }

    fn resolve(&self, plug: PlugId, context: &Context) -> Outcome {
        self.options.token.check()?;
        let data = self.graph.try_plug(plug)?;

        if data.is_input() {
            let source = self.source(plug, context)?;
            if source != plug {
                return self.resolve(source, context);
            }
            return Ok(Arc::new(data.local.clone()));
        }

        // Waiting on our own in-flight entry would never return.
        if Process::is_active(self.graph.id(), plug, context, FrameKind::Compute) {
            return Err(self.cycle(plug, context));
        }

        let fingerprint = self.hash(plug, context)?;
        self.cache
            .get_or_compute(fingerprint, &self.options.token, || {
                self.compute(plug, data, context)
            })
    }

    fn compute(&self, plug: PlugId, data: &Plug, context: &Context) -> Outcome {
        let node = self.owner(data)?;
        let _frame = Process::push(
            self.graph.id(),
            plug,
            context,
            FrameKind::Compute,
            self.options.token.clone(),
        )
        .map_err(|_| self.cycle(plug, context))?;
        let _current = ContextScope::enter(context.clone());
        self.options.token.check()?;

        let span = tracing::debug_span!("compute", plug = %self.graph.plug_path(plug), %context);
        let _entered = span.enter();

        let mut scope = EngineComputeScope {
            eval: self,
            node,
            context,
        };
        let value = node
            .computable
            .compute(&data.name, &mut scope)
            .map_err(|err| self.wrap(plug, context, err))?;

        if value.value_type() != data.value_type {
            return Err(EvalError::TypeMismatch {
                node: node.name.clone(),
                plug: data.name.to_string(),
                expected: data.value_type,
                got: value.value_type(),
            });
        }
        tracing::debug!("computed");
        Ok(Arc::new(value))
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn owner(&self, data: &Plug) -> Result<&'a Node, EvalError> {
        self.graph
            .node(data.node)
            .ok_or(EvalError::Graph(CoreError::NodeNotFound { id: data.node }))
    }

    /// End of the input chain feeding `plug`. A chain of inputs that loops
    /// back on itself never reaches a source and is reported as a cycle.
    fn source(&self, plug: PlugId, context: &Context) -> Result<PlugId, EvalError> {
        let source = self.graph.source_of(plug);
        if self.graph.input_of(source).is_some() {
            return Err(self.cycle(plug, context));
        }
        Ok(source)
    }

    fn input_plug(&self, node: &Node, input: &str) -> Result<PlugId, EvalError> {
        node.plug(input)
            .filter(|id| self.graph.plug_data(*id).is_some_and(Plug::is_input))
            .ok_or_else(|| EvalError::MissingInput {
                node: node.name.clone(),
                input: input.to_string(),
            })
    }

    fn names(&self, plug: PlugId) -> (String, String) {
        let node = self
            .graph
            .node_of(plug)
            .map(|n| n.name.clone())
            .unwrap_or_else(|| "<removed>".to_string());
        let name = self
            .graph
            .plug_data(plug)
            .map(|p| p.name.to_string())
            .unwrap_or_else(|| plug.to_string());
        (node, name)
    }

    fn cycle(&self, plug: PlugId, context: &Context) -> EvalError {
        let (node, plug) = self.names(plug);
        tracing::debug!(%node, %plug, %context, "cycle detected");
        EvalError::Cycle {
            node,
            plug,
            context: context.to_string(),
        }
    }

    /// Attributes a node failure to the node and plug that raised it.
    /// Upstream errors already name their origin and pass through.
    fn wrap(&self, plug: PlugId, context: &Context, err: NodeError) -> EvalError {
        match err {
            NodeError::Upstream(inner) => inner,
            NodeError::Cancelled => EvalError::Cancelled,
            NodeError::Failed(message) => {
                let (node, plug) = self.names(plug);
                EvalError::Compute {
                    node,
                    plug,
                    context: context.to_string(),
                    message,
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Scopes handed to node code
// ---------------------------------------------------------------------------

struct EngineHashScope<'e, 'a> {
    eval: &'e Evaluator<'a>,
    node: &'a Node,
    context: &'e Context,
}

impl HashScope for EngineHashScope<'_, '_> {
    fn context(&self) -> &Context {
        self.context
    }

    fn input_hash(&mut self, input: &str) -> Result<Fingerprint, EvalError> {
        let context = self.context;
        self.input_hash_in(input, context)
    }

    fn input_hash_in(&mut self, input: &str, context: &Context) -> Result<Fingerprint, EvalError> {
        let plug = self.eval.input_plug(self.node, input)?;
        self.eval.hash(plug, context)
    }
}

struct EngineComputeScope<'e, 'a> {
    eval: &'e Evaluator<'a>,
    node: &'a Node,
    context: &'e Context,
}

impl ComputeScope for EngineComputeScope<'_, '_> {
    fn context(&self) -> &Context {
        self.context
    }

    fn input(&mut self, input: &str) -> Result<Arc<Value>, EvalError> {
        let context = self.context;
        self.input_in(input, context)
    }

    fn input_in(&mut self, input: &str, context: &Context) -> Result<Arc<Value>, EvalError> {
        let plug = self.eval.input_plug(self.node, input)?;
        self.eval.get_value(plug, context)
    }

    fn is_cancelled(&self) -> bool {
        self.eval.options.token.is_cancelled()
    }
}
