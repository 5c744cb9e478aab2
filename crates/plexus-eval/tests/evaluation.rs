//! Single-threaded evaluation: caching, invalidation, contexts and cycles.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use plexus_core::{
    Context, DirtyEvent, EvalError, Graph, ListenerError, NodeId, PlugId, Value,
};
use plexus_eval::nodes::{AddNode, FrameNode, TimeOffsetNode};
use plexus_eval::{CacheConfig, CacheService, Evaluator};

struct AddGraph {
    graph: Graph,
    node: NodeId,
    add: Arc<AddNode>,
}

impl AddGraph {
    fn new(op1: i64, op2: i64) -> Self {
        let mut graph = Graph::new();
        let add = Arc::new(AddNode::new());
        let node = graph.add_node("A", add.clone()).unwrap();
        graph.set_value(graph.plug(node, "op1").unwrap(), op1).unwrap();
        graph.set_value(graph.plug(node, "op2").unwrap(), op2).unwrap();
        AddGraph { graph, node, add }
    }

    fn plug(&self, name: &str) -> PlugId {
        self.graph.plug(self.node, name).unwrap()
    }
}

fn cache() -> Arc<CacheService> {
    CacheService::init(CacheConfig::default())
}

#[test]
fn sum_is_computed_once() {
    let g = AddGraph::new(2, 3);
    let cache = cache();
    let ctx = Context::new();
    let sum = g.plug("sum");

    for _ in 0..5 {
        let value = Evaluator::new(&g.graph, &cache).get_value(sum, &ctx).unwrap();
        assert_eq!(*value, Value::Int(5));
    }
    assert_eq!(g.add.computes(), 1);
}

#[test]
fn repeated_requests_return_equal_values() {
    let g = AddGraph::new(2, 3);
    let cache = cache();
    let ctx = Context::new();
    let eval = Evaluator::new(&g.graph, &cache);

    let first = eval.get_value(g.plug("sum"), &ctx).unwrap();
    let before = g.add.computes();
    let second = eval.get_value(g.plug("sum"), &ctx).unwrap();
    assert_eq!(first, second);
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(g.add.computes(), before);
}

#[test]
fn set_value_invalidates() {
    let mut g = AddGraph::new(2, 3);
    let cache = cache();
    let ctx = Context::new();
    let sum = g.plug("sum");

    assert_eq!(*Evaluator::new(&g.graph, &cache).get_value(sum, &ctx).unwrap(), Value::Int(5));
    assert_eq!(g.add.computes(), 1);

    let op1 = g.plug("op1");
    g.graph.set_value(op1, 4).unwrap();
    assert_eq!(*Evaluator::new(&g.graph, &cache).get_value(sum, &ctx).unwrap(), Value::Int(7));
    assert_eq!(g.add.computes(), 2);

    // Going back to a previous state is a cache hit.
    g.graph.set_value(op1, 2).unwrap();
    assert_eq!(*Evaluator::new(&g.graph, &cache).get_value(sum, &ctx).unwrap(), Value::Int(5));
    assert_eq!(g.add.computes(), 2);
}

#[test]
fn upstream_changes_reach_downstream_values() {
    let mut graph = Graph::new();
    let a = graph.add_node("a", Arc::new(AddNode::new())).unwrap();
    let b_add = Arc::new(AddNode::new());
    let b = graph.add_node("b", b_add.clone()).unwrap();
    graph.set_value(graph.plug(a, "op1").unwrap(), 1).unwrap();
    graph.set_value(graph.plug(a, "op2").unwrap(), 1).unwrap();
    graph.set_value(graph.plug(b, "op2").unwrap(), 10).unwrap();
    graph
        .set_input(graph.plug(b, "op1").unwrap(), Some(graph.plug(a, "sum").unwrap()))
        .unwrap();

    let cache = cache();
    let ctx = Context::new();
    let b_sum = graph.plug(b, "sum").unwrap();
    assert_eq!(*Evaluator::new(&graph, &cache).get_value(b_sum, &ctx).unwrap(), Value::Int(12));

    graph.set_value(graph.plug(a, "op1").unwrap(), 5).unwrap();
    assert_eq!(*Evaluator::new(&graph, &cache).get_value(b_sum, &ctx).unwrap(), Value::Int(16));
    assert_eq!(b_add.computes(), 2);
}

#[test]
fn contexts_partition_the_cache() {
    let mut graph = Graph::new();
    let frame = Arc::new(FrameNode::new());
    let node = graph.add_node("frame", frame.clone()).unwrap();
    graph.set_value(graph.plug(node, "scale").unwrap(), 1.5).unwrap();
    let out = graph.plug(node, "out").unwrap();

    let cache = cache();
    let at10 = Context::new().with_variable("frame", 10);
    let at20 = Context::new().with_variable("frame", 20);

    let eval = Evaluator::new(&graph, &cache);
    assert_eq!(eval.get_value(out, &at10).unwrap().as_float(), Some(15.0));
    assert_eq!(eval.get_value(out, &at20).unwrap().as_float(), Some(30.0));
    assert_eq!(frame.computes(), 2);
    assert_eq!(cache.stats().entries, 2);

    assert_eq!(eval.get_value(out, &at10).unwrap().as_float(), Some(15.0));
    assert_eq!(eval.get_value(out, &at20).unwrap().as_float(), Some(30.0));
    assert_eq!(frame.computes(), 2);
}

#[test]
fn time_offset_evaluates_upstream_in_a_shifted_context() {
    let mut graph = Graph::new();
    let frame = Arc::new(FrameNode::new());
    let f = graph.add_node("frame", frame.clone()).unwrap();
    let offset = graph.add_node("later", Arc::new(TimeOffsetNode::new(5.0))).unwrap();
    let add = graph.add_node("add", Arc::new(AddNode::float())).unwrap();

    let f_out = graph.plug(f, "out").unwrap();
    graph
        .set_input(graph.plug(offset, "input").unwrap(), Some(f_out))
        .unwrap();
    graph.set_input(graph.plug(add, "op1").unwrap(), Some(f_out)).unwrap();
    graph
        .set_input(graph.plug(add, "op2").unwrap(), Some(graph.plug(offset, "out").unwrap()))
        .unwrap();

    let cache = cache();
    let eval = Evaluator::new(&graph, &cache);
    let sum = graph.plug(add, "sum").unwrap();

    let at10 = Context::new().with_variable("frame", 10);
    assert_eq!(eval.get_value(sum, &at10).unwrap().as_float(), Some(25.0));
    assert_eq!(frame.computes(), 2);

    // frame 15 was already computed through the offset branch.
    let at15 = Context::new().with_variable("frame", 15.0);
    assert_eq!(eval.get_value(f_out, &at15).unwrap().as_float(), Some(15.0));
    assert_eq!(frame.computes(), 2);
}

#[test]
fn promoted_inputs_resolve_through_the_chain() {
    let mut graph = Graph::new();
    let a = graph.add_node("a", Arc::new(AddNode::new())).unwrap();
    let b = graph.add_node("b", Arc::new(AddNode::new())).unwrap();
    let a_op1 = graph.plug(a, "op1").unwrap();
    graph.set_value(a_op1, 7).unwrap();
    graph.set_input(graph.plug(b, "op1").unwrap(), Some(a_op1)).unwrap();
    graph.set_value(graph.plug(b, "op2").unwrap(), 1).unwrap();

    let cache = cache();
    let value = Evaluator::new(&graph, &cache)
        .get_value(graph.plug(b, "sum").unwrap(), &Context::new())
        .unwrap();
    assert_eq!(*value, Value::Int(8));
}

#[test]
fn feedback_loop_is_a_cycle_error() {
    let mut graph = Graph::new();
    let a = graph.add_node("A", Arc::new(AddNode::new())).unwrap();
    let b = graph.add_node("B", Arc::new(AddNode::new())).unwrap();
    graph
        .set_input(graph.plug(a, "op1").unwrap(), Some(graph.plug(b, "sum").unwrap()))
        .unwrap();
    graph
        .set_input(graph.plug(b, "op1").unwrap(), Some(graph.plug(a, "sum").unwrap()))
        .unwrap();

    let cache = cache();
    let err = Evaluator::new(&graph, &cache)
        .get_value(graph.plug(a, "sum").unwrap(), &Context::new())
        .unwrap_err();
    assert!(matches!(err, EvalError::Cycle { .. }), "got {err:?}");
    assert_eq!(cache.stats().in_flight, 0);
    assert_eq!(plexus_eval::process::depth(), 0);
}

#[test]
fn input_to_input_loop_is_a_cycle_error() {
    let mut graph = Graph::new();
    let a = graph.add_node("A", Arc::new(AddNode::new())).unwrap();
    let b = graph.add_node("B", Arc::new(AddNode::new())).unwrap();
    let a_op1 = graph.plug(a, "op1").unwrap();
    let b_op1 = graph.plug(b, "op1").unwrap();
    graph.set_input(a_op1, Some(b_op1)).unwrap();
    graph.set_input(b_op1, Some(a_op1)).unwrap();

    let cache = cache();
    let err = Evaluator::new(&graph, &cache)
        .get_value(graph.plug(a, "sum").unwrap(), &Context::new())
        .unwrap_err();
    assert!(matches!(err, EvalError::Cycle { .. }), "got {err:?}");
}

#[test]
fn diamond_dirtying_visits_each_plug_once() {
    // A -> B, A -> C, B -> D, C -> D
    let mut graph = Graph::new();
    let ids: Vec<NodeId> = ["A", "B", "C", "D"]
        .iter()
        .map(|name| graph.add_node(*name, Arc::new(AddNode::new())).unwrap())
        .collect();
    let (a, b, c, d) = (ids[0], ids[1], ids[2], ids[3]);
    let sum = |g: &Graph, n| g.plug(n, "sum").unwrap();
    let input = |g: &Graph, n, name| g.plug(n, name).unwrap();

    graph.set_input(input(&graph, b, "op1"), Some(sum(&graph, a))).unwrap();
    graph.set_input(input(&graph, c, "op1"), Some(sum(&graph, a))).unwrap();
    graph.set_input(input(&graph, d, "op1"), Some(sum(&graph, b))).unwrap();
    graph.set_input(input(&graph, d, "op2"), Some(sum(&graph, c))).unwrap();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let calls = Arc::new(AtomicUsize::new(0));
    {
        let seen = seen.clone();
        let calls = calls.clone();
        graph.subscribe(move |event: &DirtyEvent<'_>| -> Result<(), ListenerError> {
            calls.fetch_add(1, Ordering::SeqCst);
            seen.lock().unwrap().push(event.path.to_string());
            Ok(())
        });
    }

    let pass = graph.set_value(input(&graph, a, "op1"), 1).unwrap();
    assert_eq!(pass.len(), calls.load(Ordering::SeqCst));

    let seen = seen.lock().unwrap();
    for name in ["B.sum", "C.sum", "D.sum"] {
        assert_eq!(seen.iter().filter(|p| *p == name).count(), 1, "{name}");
    }
    assert_eq!(seen.iter().filter(|p| p.starts_with("D.")).count(), 3);
}

#[test]
fn removing_a_node_reports_missing_upstream_as_local_value() {
    let mut graph = Graph::new();
    let a = graph.add_node("a", Arc::new(AddNode::new())).unwrap();
    let b = graph.add_node("b", Arc::new(AddNode::new())).unwrap();
    graph.set_value(graph.plug(a, "op1").unwrap(), 3).unwrap();
    graph
        .set_input(graph.plug(b, "op1").unwrap(), Some(graph.plug(a, "sum").unwrap()))
        .unwrap();
    let b_sum = graph.plug(b, "sum").unwrap();

    let cache = cache();
    let ctx = Context::new();
    assert_eq!(*Evaluator::new(&graph, &cache).get_value(b_sum, &ctx).unwrap(), Value::Int(3));

    graph.remove_node(a).unwrap();
    assert_eq!(*Evaluator::new(&graph, &cache).get_value(b_sum, &ctx).unwrap(), Value::Int(0));
}

#[test]
fn eviction_forces_recompute() {
    let g = AddGraph::new(2, 3);
    let cache = CacheService::init(CacheConfig {
        shards: 1,
        ..CacheConfig::default()
    });
    let ctx = Context::new();
    let sum = g.plug("sum");

    Evaluator::new(&g.graph, &cache).get_value(sum, &ctx).unwrap();
    cache.set_byte_budget(1);
    assert_eq!(cache.stats().entries, 0);
    cache.set_byte_budget(1 << 20);

    Evaluator::new(&g.graph, &cache).get_value(sum, &ctx).unwrap();
    assert_eq!(g.add.computes(), 2);
}
