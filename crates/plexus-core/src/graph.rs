//! Graph: nodes, plugs and connections.
//!
//! [`Graph`] is the single entry point for authoring and querying a node
//! graph. Plugs are the vertices of a petgraph `StableGraph`; a connection is
//! an edge from an upstream plug to a downstream input plug. Nodes own their
//! plugs and are kept in a side table.
//!
//! Every mutation (`add_node`, `remove_node`, `set_input`, `set_value`) runs
//! one dirty-propagation pass from the mutated plugs (see [`crate::dirty`]),
//! notifying listeners and bumping plug generations. Nothing is recomputed.
//!
//! Mutation takes `&mut Graph`, evaluation takes `&Graph`: edits and
//! in-flight background computation are serialized by the borrow checker.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use petgraph::stable_graph::StableGraph;
use petgraph::visit::EdgeRef;
use petgraph::{Directed, Direction as EdgeDirection};

use crate::dirty::{DirtyListener, DirtyPass, ListenerId};
use crate::error::CoreError;
use crate::id::{GraphId, NodeId, PlugId};
use crate::node::{Computable, Node};
use crate::plug::{Connection, Plug, PlugDescriptor};
use crate::value::Value;

/// A directed graph of typed computation nodes.
pub struct Graph {
    pub(crate) id: GraphId,
    pub(crate) plugs: StableGraph<Plug, Connection, Directed, u32>,
    pub(crate) nodes: BTreeMap<NodeId, Node>,
    pub(crate) listeners: Vec<(ListenerId, Box<dyn DirtyListener>)>,
    next_node_id: u32,
    next_listener_id: u64,
    next_generation: u64,
}

impl Graph {
    /// Creates an empty graph with a fresh [`GraphId`].
    pub fn new() -> Self {
        Graph {
            id: GraphId::fresh(),
            plugs: StableGraph::new(),
            nodes: BTreeMap::new(),
            listeners: Vec::new(),
            next_node_id: 0,
            next_listener_id: 0,
            next_generation: 1,
        }
    }

    /// Process-unique identity of this graph.
    pub fn id(&self) -> GraphId {
        self.id
    }

    pub(crate) fn next_generation(&mut self) -> u64 {
        let generation = self.next_generation;
        self.next_generation += 1;
        generation
    }

    // -----------------------------------------------------------------------
    // Read-only accessors
    // -----------------------------------------------------------------------

    /// Returns the node with the given id.
    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    /// Ids of all nodes, in creation order.
    pub fn node_ids(&self) -> Vec<NodeId> {
        self.nodes.keys().copied().collect()
    }

    /// Finds a node by name.
    pub fn find_node(&self, name: &str) -> Option<NodeId> {
        self.nodes
            .iter()
            .find(|(_, node)| node.name == name)
            .map(|(id, _)| *id)
    }

    /// Returns the stored plug.
    pub fn plug_data(&self, plug: PlugId) -> Option<&Plug> {
        self.plugs.node_weight(plug.into())
    }

    /// Like [`Graph::plug_data`], but a missing plug is an error.
    pub fn try_plug(&self, plug: PlugId) -> Result<&Plug, CoreError> {
        self.plug_data(plug)
            .ok_or(CoreError::PlugNotFound { id: plug })
    }

    /// Looks up a plug by node and name.
    pub fn plug(&self, node: NodeId, name: &str) -> Result<PlugId, CoreError> {
        let n = self
            .nodes
            .get(&node)
            .ok_or(CoreError::NodeNotFound { id: node })?;
        n.plug(name).ok_or_else(|| CoreError::NoSuchPlug {
            node: n.name.clone(),
            name: name.to_string(),
        })
    }

    /// The node owning `plug`.
    pub fn node_of(&self, plug: PlugId) -> Option<&Node> {
        self.plug_data(plug).and_then(|p| self.nodes.get(&p.node))
    }

    /// Plugs of a node, in declaration order.
    pub fn node_plugs(&self, node: NodeId) -> Result<Vec<PlugId>, CoreError> {
        self.nodes
            .get(&node)
            .map(|n| n.plugs.values().copied().collect())
            .ok_or(CoreError::NodeNotFound { id: node })
    }

    /// Name of the node owning `plug`.
    pub fn node_name(&self, plug: PlugId) -> Option<&str> {
        self.node_of(plug).map(|n| n.name.as_str())
    }

    /// Rebuilds the descriptor of a plug from its current state. The
    /// `default` field holds the current local value.
    pub fn descriptor(&self, plug: PlugId) -> Option<PlugDescriptor> {
        self.plug_data(plug).map(|p| PlugDescriptor {
            name: p.name.to_string(),
            direction: p.direction,
            value_type: p.value_type,
            default: p.local.clone(),
        })
    }

    /// `"node.plug"`, for logging and error messages.
    pub fn plug_path(&self, plug: PlugId) -> String {
        match (self.plug_data(plug), self.node_of(plug)) {
            (Some(p), Some(n)) => format!("{}.{}", n.name, p.name),
            _ => format!("<plug {plug}>"),
        }
    }

    /// The upstream plug feeding `plug`, if connected.
    pub fn input_of(&self, plug: PlugId) -> Option<PlugId> {
        self.plugs
            .edges_directed(plug.into(), EdgeDirection::Incoming)
            .next()
            .map(|e| PlugId::from(e.source()))
    }

    /// Downstream plugs fed by `plug`.
    pub fn outputs_of(&self, plug: PlugId) -> Vec<PlugId> {
        let mut out: Vec<PlugId> = self
            .plugs
            .edges_directed(plug.into(), EdgeDirection::Outgoing)
            .map(|e| PlugId::from(e.target()))
            .collect();
        out.sort();
        out
    }

    /// Follows input connections upstream until reaching a plug with no
    /// input. Returns `plug` itself when it is unconnected. Stops on a
    /// pure input-to-input loop and returns the last plug seen.
    pub fn source_of(&self, plug: PlugId) -> PlugId {
        let mut current = plug;
        let mut hops = 0usize;
        while let Some(upstream) = self.input_of(current) {
            current = upstream;
            hops += 1;
            if hops > self.plugs.node_count() {
                break;
            }
        }
        current
    }

    /// Local value of a plug (meaningful for unconnected inputs).
    pub fn value_of(&self, plug: PlugId) -> Option<&Value> {
        self.plug_data(plug).map(|p| &p.local)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn plug_count(&self) -> usize {
        self.plugs.node_count()
    }

    pub fn connection_count(&self) -> usize {
        self.plugs.edge_count()
    }

    // -----------------------------------------------------------------------
    // Mutations
    // -----------------------------------------------------------------------

    /// Adds a node, creating one plug per descriptor of its computable.
    pub fn add_node(
        &mut self,
        name: impl Into<String>,
        computable: Arc<dyn Computable>,
    ) -> Result<NodeId, CoreError> {
        let name = name.into();
        let descriptors = computable.plugs();

        // Validate before touching the graph.
        let mut seen = std::collections::HashSet::new();
        for desc in &descriptors {
            if !seen.insert(desc.name.as_str()) {
                return Err(CoreError::DuplicatePlug {
                    node: name.clone(),
                    name: desc.name.clone(),
                });
            }
            if desc.is_input() && desc.default.value_type() != desc.value_type {
                return Err(CoreError::TypeMismatch {
                    plug: format!("{name}.{}", desc.name),
                    expected: desc.value_type,
                    got: desc.default.value_type(),
                });
            }
        }

        let node_id = NodeId(self.next_node_id);
        self.next_node_id += 1;

        let mut plugs = IndexMap::new();
        for desc in &descriptors {
            let generation = self.next_generation();
            let idx = self
                .plugs
                .add_node(Plug::from_descriptor(node_id, desc, generation));
            plugs.insert(desc.name.clone(), PlugId::from(idx));
        }

        let seeds: Vec<PlugId> = plugs.values().copied().collect();
        tracing::debug!(node = %name, plugs = seeds.len(), "added node");
        self.nodes.insert(
            node_id,
            Node {
                name,
                plugs,
                computable,
            },
        );
        self.propagate_dirty(&seeds);

        Ok(node_id)
    }

    /// Removes a node and its plugs. Everything downstream is dirtied first.
    pub fn remove_node(&mut self, id: NodeId) -> Result<DirtyPass, CoreError> {
        let seeds: Vec<PlugId> = self
            .nodes
            .get(&id)
            .ok_or(CoreError::NodeNotFound { id })?
            .plugs
            .values()
            .copied()
            .collect();

        let pass = self.propagate_dirty(&seeds);

        if let Some(node) = self.nodes.remove(&id) {
            for plug in node.plugs.values() {
                self.plugs.remove_node((*plug).into());
            }
            tracing::debug!(node = %node.name, dirtied = pass.len(), "removed node");
        }
        Ok(pass)
    }

    /// Connects `upstream -> plug`, replacing any existing input, or
    /// disconnects `plug` when `upstream` is `None`.
    ///
    /// Cycles are accepted here and reported as `EvalError::Cycle` when
    /// evaluated.
    pub fn set_input(
        &mut self,
        plug: PlugId,
        upstream: Option<PlugId>,
    ) -> Result<DirtyPass, CoreError> {
        let dst = self.try_plug(plug)?;
        if !dst.is_input() {
            return Err(CoreError::InvalidConnection {
                reason: format!("'{}' is an output plug", self.plug_path(plug)),
            });
        }
        let dst_type = dst.value_type;

        if let Some(src) = upstream {
            let src_plug = self.try_plug(src)?;
            if src == plug {
                return Err(CoreError::InvalidConnection {
                    reason: format!("'{}' cannot feed itself", self.plug_path(plug)),
                });
            }
            if src_plug.value_type != dst_type {
                return Err(CoreError::TypeMismatch {
                    plug: self.plug_path(plug),
                    expected: dst_type,
                    got: src_plug.value_type,
                });
            }
        }

        let current = self.input_of(plug);
        if current == upstream {
            return Ok(DirtyPass::default());
        }

        let existing: Vec<_> = self
            .plugs
            .edges_directed(plug.into(), EdgeDirection::Incoming)
            .map(|e| e.id())
            .collect();
        for edge in existing {
            self.plugs.remove_edge(edge);
        }
        if let Some(src) = upstream {
            self.plugs.add_edge(src.into(), plug.into(), Connection);
        }

        tracing::debug!(
            plug = %self.plug_path(plug),
            upstream = ?upstream.map(|u| self.plug_path(u)),
            "set input"
        );
        Ok(self.propagate_dirty(&[plug]))
    }

    /// Sets the local value of an unconnected input plug.
    ///
    /// Setting a value equal to the current one is a no-op and dirties
    /// nothing.
    pub fn set_value(
        &mut self,
        plug: PlugId,
        value: impl Into<Value>,
    ) -> Result<DirtyPass, CoreError> {
        self.set_values([(plug, value.into())])
    }

    /// Sets several local values with a single dirty pass.
    pub fn set_values<I>(&mut self, values: I) -> Result<DirtyPass, CoreError>
    where
        I: IntoIterator<Item = (PlugId, Value)>,
    {
        let values: Vec<(PlugId, Value)> = values.into_iter().collect();

        for (plug, value) in &values {
            let p = self.try_plug(*plug)?;
            if !p.is_input() {
                return Err(CoreError::NotAnInput {
                    plug: self.plug_path(*plug),
                });
            }
            if self.input_of(*plug).is_some() {
                return Err(CoreError::HasInput {
                    plug: self.plug_path(*plug),
                });
            }
            if value.value_type() != p.value_type {
                return Err(CoreError::TypeMismatch {
                    plug: self.plug_path(*plug),
                    expected: p.value_type,
                    got: value.value_type(),
                });
            }
        }

        let mut changed = Vec::new();
        for (plug, value) in values {
            if let Some(p) = self.plugs.node_weight_mut(plug.into()) {
                if p.local != value {
                    p.local = value;
                    changed.push(plug);
                }
            }
        }
        if changed.is_empty() {
            return Ok(DirtyPass::default());
        }
        Ok(self.propagate_dirty(&changed))
    }

    /// Dirties plugs whose values depend on something outside the graph
    /// (a file that changed on disk, for instance).
    pub fn mark_dirty(&mut self, plugs: &[PlugId]) -> Result<DirtyPass, CoreError> {
        for plug in plugs {
            self.try_plug(*plug)?;
        }
        Ok(self.propagate_dirty(plugs))
    }

    // -----------------------------------------------------------------------
    // Listeners
    // -----------------------------------------------------------------------

    /// Registers a listener called once per dirtied plug, synchronously
    /// during each pass.
    pub fn subscribe(&mut self, listener: impl DirtyListener + 'static) -> ListenerId {
        let id = ListenerId(self.next_listener_id);
        self.next_listener_id += 1;
        self.listeners.push((id, Box::new(listener)));
        id
    }

    /// Removes a listener. Returns `false` if it was not registered.
    pub fn unsubscribe(&mut self, id: ListenerId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(lid, _)| *lid != id);
        self.listeners.len() != before
    }
}

impl Default for Graph {
    fn default() -> Self {
        Graph::new()
    }
}

impl fmt::Debug for Graph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Graph")
            .field("id", &self.id)
            .field("nodes", &self.nodes)
            .field("connections", &self.plugs.edge_count())
            .field("listeners", &self.listeners.len())
            .finish()
    }
}
