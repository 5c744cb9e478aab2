//! Dirty propagation.
//!
//! After a mutation, [`Graph`] walks forward from the mutated plugs:
//! along connections to downstream plugs, and across a node from an input to
//! the outputs it [`affects`](crate::node::Computable::affects). Each
//! reachable plug is visited exactly once per pass (a visited set keeps
//! diamond-shaped fan-in linear rather than exponential), gets a new
//! generation number, and is reported to every listener.
//!
//! The pass never recomputes anything; the bumped generations simply make
//! the next `hash`/`get_value` miss the stale hash-cache entries.
//!
//! Listener failures are isolated: an `Err` is logged with `warn!`, a panic
//! is caught and logged with `error!`, and the pass continues with the next
//! listener and the next plug.

use std::collections::{HashSet, VecDeque};
use std::panic::{catch_unwind, AssertUnwindSafe};

use petgraph::visit::EdgeRef;
use petgraph::Direction as EdgeDirection;
use serde::{Deserialize, Serialize};

use crate::graph::Graph;
use crate::id::{NodeId, PlugId};

/// Boxed error a listener may return.
pub type ListenerError = Box<dyn std::error::Error + Send + Sync>;

/// Handle for removing a listener with [`Graph::unsubscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ListenerId(pub u64);

/// One "dirtied" notification.
#[derive(Debug, Clone, Copy)]
pub struct DirtyEvent<'a> {
    pub plug: PlugId,
    pub node: NodeId,
    /// `"node.plug"`.
    pub path: &'a str,
}

/// Receiver of dirtied notifications.
///
/// Called synchronously while the graph is mid-edit: implementations must be
/// quick and cannot reach back into the graph.
pub trait DirtyListener: Send + Sync {
    fn plug_dirtied(&self, event: &DirtyEvent<'_>) -> Result<(), ListenerError>;
}

impl<F> DirtyListener for F
where
    F: Fn(&DirtyEvent<'_>) -> Result<(), ListenerError> + Send + Sync,
{
    fn plug_dirtied(&self, event: &DirtyEvent<'_>) -> Result<(), ListenerError> {
        self(event)
    }
}

/// Report of one propagation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirtyPass {
    /// Every plug dirtied, in visit order, each exactly once.
    pub visited: Vec<PlugId>,
}

impl DirtyPass {
    pub fn contains(&self, plug: PlugId) -> bool {
        self.visited.contains(&plug)
    }

    pub fn len(&self) -> usize {
        self.visited.len()
    }

    pub fn is_empty(&self) -> bool {
        self.visited.is_empty()
    }
}

impl Graph {
    /// Runs one dirty-propagation pass from `seeds`.
    pub(crate) fn propagate_dirty(&mut self, seeds: &[PlugId]) -> DirtyPass {
        let mut visited: HashSet<PlugId> = HashSet::new();
        let mut queue: VecDeque<PlugId> = VecDeque::new();
        let mut order = Vec::new();

        for &seed in seeds {
            if self.plug_data(seed).is_some() && visited.insert(seed) {
                queue.push_back(seed);
            }
        }

        while let Some(plug) = queue.pop_front() {
            let generation = self.next_generation();
            if let Some(p) = self.plugs.node_weight_mut(plug.into()) {
                p.generation = generation;
            }
            order.push(plug);
            self.notify_dirtied(plug);

            for next in self.dirty_successors(plug) {
                // Monotonic: a plug already dirtied in this pass is skipped.
                if visited.insert(next) {
                    queue.push_back(next);
                }
            }
        }

        tracing::debug!(seeds = seeds.len(), dirtied = order.len(), "dirty pass");
        DirtyPass { visited: order }
    }

    /// Plugs one step downstream of `plug` for dirtying purposes.
    fn dirty_successors(&self, plug: PlugId) -> Vec<PlugId> {
        let mut next: Vec<PlugId> = self
            .plugs
            .edges_directed(plug.into(), EdgeDirection::Outgoing)
            .map(|e| PlugId::from(e.target()))
            .collect();
        next.sort();

        let Some(p) = self.plug_data(plug) else {
            return next;
        };
        if !p.is_input() {
            return next;
        }
        let Some(node) = self.nodes.get(&p.node) else {
            return next;
        };

        match node.computable.affects(&p.name) {
            None => {
                for id in node.plugs.values() {
                    if self.plug_data(*id).is_some_and(|q| q.is_output()) {
                        next.push(*id);
                    }
                }
            }
            Some(outputs) => {
                for name in outputs {
                    match node.plug(&name) {
                        Some(id) if self.plug_data(id).is_some_and(|q| q.is_output()) => {
                            next.push(id)
                        }
                        _ => tracing::warn!(
                            node = %node.name,
                            input = %p.name,
                            output = %name,
                            "affects() names an output the node does not have"
                        ),
                    }
                }
            }
        }
        next
    }

    fn notify_dirtied(&self, plug: PlugId) {
        if self.listeners.is_empty() {
            return;
        }
        let Some(node) = self.plug_data(plug).map(|p| p.node) else {
            return;
        };
        let path = self.plug_path(plug);
        let event = DirtyEvent {
            plug,
            node,
            path: &path,
        };

        for (id, listener) in &self.listeners {
            match catch_unwind(AssertUnwindSafe(|| listener.plug_dirtied(&event))) {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    tracing::warn!(
                        listener = id.0,
                        plug = %path,
                        error = %err,
                        "dirty listener failed"
                    );
                }
                Err(panic) => {
                    let message = panic
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| panic.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "non-string panic payload".to_string());
                    tracing::error!(
                        listener = id.0,
                        plug = %path,
                        panic = %message,
                        "dirty listener panicked"
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::error::NodeError;
    use crate::hash::FingerprintHasher;
    use crate::node::{ComputeScope, Computable, HashScope};
    use crate::plug::PlugDescriptor;
    use crate::value::{Value, ValueType};

    /// Two inputs, one output: enough to build chains and diamonds.
    struct Pass;

    impl Computable for Pass {
        fn type_name(&self) -> &'static str {
            "test::Pass"
        }

        fn plugs(&self) -> Vec<PlugDescriptor> {
            vec![
                PlugDescriptor::input("in", ValueType::Int),
                PlugDescriptor::input("in2", ValueType::Int),
                PlugDescriptor::output("out", ValueType::Int),
            ]
        }

        fn hash(
            &self,
            _output: &str,
            scope: &mut dyn HashScope,
            hasher: &mut FingerprintHasher,
        ) -> Result<(), NodeError> {
            hasher.append_fingerprint(&scope.input_hash("in")?);
            hasher.append_fingerprint(&scope.input_hash("in2")?);
            Ok(())
        }

        fn compute(&self, _output: &str, scope: &mut dyn ComputeScope) -> Result<Value, NodeError> {
            Ok((*scope.input("in")?).clone())
        }
    }

    /// Two outputs; `a` only affects `x`.
    struct Split;

    impl Computable for Split {
        fn type_name(&self) -> &'static str {
            "test::Split"
        }

        fn plugs(&self) -> Vec<PlugDescriptor> {
            vec![
                PlugDescriptor::input("a", ValueType::Int),
                PlugDescriptor::input("b", ValueType::Int),
                PlugDescriptor::output("x", ValueType::Int),
                PlugDescriptor::output("y", ValueType::Int),
            ]
        }

        fn affects(&self, input: &str) -> Option<Vec<String>> {
            match input {
                "a" => Some(vec!["x".into()]),
                _ => Some(vec!["y".into()]),
            }
        }

        fn hash(
            &self,
            output: &str,
            scope: &mut dyn HashScope,
            hasher: &mut FingerprintHasher,
        ) -> Result<(), NodeError> {
            let input = if output == "x" { "a" } else { "b" };
            hasher.append_fingerprint(&scope.input_hash(input)?);
            Ok(())
        }

        fn compute(&self, output: &str, scope: &mut dyn ComputeScope) -> Result<Value, NodeError> {
            let input = if output == "x" { "a" } else { "b" };
            Ok((*scope.input(input)?).clone())
        }
    }

    fn diamond() -> (Graph, [crate::id::NodeId; 4]) {
        // A -> B, A -> C, B -> D, C -> D
        let mut graph = Graph::new();
        let a = graph.add_node("A", Arc::new(Pass)).unwrap();
        let b = graph.add_node("B", Arc::new(Pass)).unwrap();
        let c = graph.add_node("C", Arc::new(Pass)).unwrap();
        let d = graph.add_node("D", Arc::new(Pass)).unwrap();
        let a_out = graph.plug(a, "out").unwrap();
        let b_out = graph.plug(b, "out").unwrap();
        let c_out = graph.plug(c, "out").unwrap();
        graph.set_input(graph.plug(b, "in").unwrap(), Some(a_out)).unwrap();
        graph.set_input(graph.plug(c, "in").unwrap(), Some(a_out)).unwrap();
        graph.set_input(graph.plug(d, "in").unwrap(), Some(b_out)).unwrap();
        graph.set_input(graph.plug(d, "in2").unwrap(), Some(c_out)).unwrap();
        (graph, [a, b, c, d])
    }

    #[test]
    fn diamond_visits_each_plug_once() {
        let (mut graph, [a, b, c, d]) = diamond();
        let counts: Arc<Mutex<std::collections::HashMap<PlugId, usize>>> = Arc::default();
        let sink = counts.clone();
        graph.subscribe(move |e: &DirtyEvent<'_>| -> Result<(), ListenerError> {
            *sink.lock().unwrap().entry(e.plug).or_default() += 1;
            Ok(())
        });

        let a_in = graph.plug(a, "in").unwrap();
        let pass = graph.set_value(a_in, 1).unwrap();

        let counts = counts.lock().unwrap();
        assert!(counts.values().all(|&n| n == 1), "a plug was visited twice");
        for node in [b, c, d] {
            let out = graph.plug(node, "out").unwrap();
            assert!(pass.contains(out));
            assert_eq!(counts[&out], 1);
        }
        // A.in, A.out, B.in, C.in, B.out, C.out, D.in, D.in2, D.out
        assert_eq!(pass.len(), 9);
        let d_out = graph.plug(d, "out").unwrap();
        assert_eq!(pass.visited.last(), Some(&d_out));
    }

    #[test]
    fn wide_diamond_chain_stays_linear() {
        // 30 stacked diamonds would be 2^30 paths without the visited set.
        let mut graph = Graph::new();
        let root = graph.add_node("root", Arc::new(Pass)).unwrap();
        let mut top = graph.plug(root, "out").unwrap();
        for i in 0..30 {
            let l = graph.add_node(format!("l{i}"), Arc::new(Pass)).unwrap();
            let r = graph.add_node(format!("r{i}"), Arc::new(Pass)).unwrap();
            let j = graph.add_node(format!("j{i}"), Arc::new(Pass)).unwrap();
            graph.set_input(graph.plug(l, "in").unwrap(), Some(top)).unwrap();
            graph.set_input(graph.plug(r, "in").unwrap(), Some(top)).unwrap();
            let l_out = graph.plug(l, "out").unwrap();
            let r_out = graph.plug(r, "out").unwrap();
            graph.set_input(graph.plug(j, "in").unwrap(), Some(l_out)).unwrap();
            graph.set_input(graph.plug(j, "in2").unwrap(), Some(r_out)).unwrap();
            top = graph.plug(j, "out").unwrap();
        }

        let root_in = graph.plug(root, "in").unwrap();
        let pass = graph.set_value(root_in, 7).unwrap();
        // root.in + root.out + 30 * (l.in, l.out, r.in, r.out, j.in, j.in2, j.out)
        assert_eq!(pass.len(), 2 + 30 * 7);
    }

    #[test]
    fn affects_limits_propagation_across_a_node() {
        let mut graph = Graph::new();
        let split = graph.add_node("split", Arc::new(Split)).unwrap();
        let a = graph.plug(split, "a").unwrap();
        let x = graph.plug(split, "x").unwrap();
        let y = graph.plug(split, "y").unwrap();

        let pass = graph.set_value(a, 1).unwrap();
        assert!(pass.contains(x));
        assert!(!pass.contains(y));
    }

    #[test]
    fn generations_advance_on_dirty() {
        let (mut graph, [a, _, _, d]) = diamond();
        let d_out = graph.plug(d, "out").unwrap();
        let before = graph.plug_data(d_out).unwrap().generation;
        graph.set_value(graph.plug(a, "in").unwrap(), 3).unwrap();
        assert!(graph.plug_data(d_out).unwrap().generation > before);
    }

    #[test]
    fn failing_listeners_do_not_stop_the_pass() {
        let (mut graph, [a, _, _, d]) = diamond();
        let seen = Arc::new(AtomicUsize::new(0));

        graph.subscribe(|_: &DirtyEvent<'_>| -> Result<(), ListenerError> {
            Err("listener exploded".into())
        });
        graph.subscribe(|e: &DirtyEvent<'_>| -> Result<(), ListenerError> {
            if e.path.ends_with(".out") {
                panic!("listener panicked on {}", e.path);
            }
            Ok(())
        });
        let counter = seen.clone();
        let last = graph.subscribe(move |_: &DirtyEvent<'_>| -> Result<(), ListenerError> {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        let pass = graph.set_value(graph.plug(a, "in").unwrap(), 5).unwrap();
        assert!(pass.contains(graph.plug(d, "out").unwrap()));
        assert_eq!(seen.load(Ordering::SeqCst), pass.len());

        assert!(graph.unsubscribe(last));
        assert!(!graph.unsubscribe(last));
        graph.set_value(graph.plug(a, "in").unwrap(), 6).unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), pass.len());
    }

    #[test]
    fn mark_dirty_rejects_unknown_plugs() {
        let mut graph = Graph::new();
        assert!(graph.mark_dirty(&[PlugId(12)]).is_err());
    }
}
