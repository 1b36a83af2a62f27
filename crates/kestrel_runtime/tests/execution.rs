// SPDX-License-Identifier: MIT OR Apache-2.0
//! End-to-end interpreter tests: scheduling, flow control, suspension,
//! sub-graph calls, and fault isolation.

use kestrel_graph::{
    ActionOp, FlowOp, Graph, GraphLibrary, Node, NodeId, NodeKind, Port, PureOp, Value, ValueType,
};
use kestrel_runtime::{Executor, ExternalAction, ExternalError, FaultKind};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Records the resolved "Tag" input of every activation, in order.
struct Recorder {
    log: Arc<Mutex<Vec<String>>>,
}

impl ExternalAction for Recorder {
    fn run(
        &mut self,
        inputs: &HashMap<String, Value>,
    ) -> Result<HashMap<String, Value>, ExternalError> {
        let tag = inputs.get("Tag").map(Value::display).unwrap_or_default();
        self.log.lock().unwrap().push(tag);
        Ok(HashMap::new())
    }
}

/// Always fails; used to provoke activation faults.
struct Exploder;

impl ExternalAction for Exploder {
    fn run(
        &mut self,
        _inputs: &HashMap<String, Value>,
    ) -> Result<HashMap<String, Value>, ExternalError> {
        Err(ExternalError("boom".to_string()))
    }
}

fn record_node(tag: &str) -> Node {
    Node::new(NodeKind::Action(ActionOp::External {
        behavior: "record".to_string(),
    }))
    .with_input(
        Port::input("Tag", ValueType::String).with_default(Value::String(tag.to_string())),
    )
}

fn executor_with_recorder(
    library: GraphLibrary,
    seed: u64,
) -> (Executor, Arc<Mutex<Vec<String>>>) {
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut executor = Executor::with_seed(library, seed);
    executor.register_external("record", Box::new(Recorder { log: Arc::clone(&log) }));
    (executor, log)
}

fn taken(log: &Arc<Mutex<Vec<String>>>) -> Vec<String> {
    std::mem::take(&mut *log.lock().unwrap())
}

fn event_node() -> Node {
    Node::new(NodeKind::Event {
        name: "Start".to_string(),
    })
}

/// Route executor logs to the test harness when `RUST_LOG` is set.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[test]
fn test_branch_follows_condition() {
    let mut graph = Graph::new("branch");
    let event = graph.add_node(event_node());
    let cond = graph.add_node(Node::new(NodeKind::Pure(PureOp::Literal(Value::Bool(true)))));
    let branch = graph.add_node(Node::new(NodeKind::Flow(FlowOp::Branch)));
    let yes = graph.add_node(record_node("yes"));
    let no = graph.add_node(record_node("no"));
    graph.connect(event, "Exec", branch, "Exec").unwrap();
    graph.connect(cond, "Value", branch, "Condition").unwrap();
    graph.connect(branch, "True", yes, "Exec").unwrap();
    graph.connect(branch, "False", no, "Exec").unwrap();

    let mut library = GraphLibrary::new();
    let graph_id = library.insert(graph);
    let (mut executor, log) = executor_with_recorder(library, 1);

    executor.spawn(graph_id, event);
    executor.tick(0.0);

    assert_eq!(taken(&log), vec!["yes"]);
    assert!(executor.is_idle());
    assert!(executor.faults().is_empty());
}

#[test]
fn test_sequence_fires_outputs_in_declared_order() {
    let mut graph = Graph::new("sequence");
    let event = graph.add_node(event_node());
    let seq = graph.add_node(Node::new(NodeKind::Flow(FlowOp::Sequence { outputs: 3 })));
    let a = graph.add_node(record_node("a"));
    let b = graph.add_node(record_node("b"));
    let c = graph.add_node(record_node("c"));
    graph.connect(event, "Exec", seq, "Exec").unwrap();
    graph.connect(seq, "Then 0", a, "Exec").unwrap();
    graph.connect(seq, "Then 1", b, "Exec").unwrap();
    graph.connect(seq, "Then 2", c, "Exec").unwrap();

    let mut library = GraphLibrary::new();
    let graph_id = library.insert(graph);
    let (mut executor, log) = executor_with_recorder(library, 1);

    executor.spawn(graph_id, event);
    executor.tick(0.0);

    assert_eq!(taken(&log), vec!["a", "b", "c"]);
}

#[test]
fn test_weighted_branch_frequency_converges() {
    // Weights 0.3 and 0.7 connected, plus a heavily weighted output left
    // unconnected: selection must ignore it entirely.
    let mut graph = Graph::new("weighted");
    let event = graph.add_node(event_node());
    let branch = graph.add_node(Node::new(NodeKind::Flow(FlowOp::WeightedBranch {
        weights: vec![0.3, 0.7, 100.0],
    })));
    let a = graph.add_node(record_node("a"));
    let b = graph.add_node(record_node("b"));
    graph.connect(event, "Exec", branch, "Exec").unwrap();
    graph.connect(branch, "Option 0", a, "Exec").unwrap();
    graph.connect(branch, "Option 1", b, "Exec").unwrap();

    let mut library = GraphLibrary::new();
    let graph_id = library.insert(graph);
    let (mut executor, log) = executor_with_recorder(library, 42);

    const TRIALS: usize = 10_000;
    for _ in 0..TRIALS {
        executor.spawn(graph_id, event);
        executor.tick(0.0);
    }

    let picks = taken(&log);
    assert_eq!(picks.len(), TRIALS);
    let a_frequency = picks.iter().filter(|t| *t == "a").count() as f64 / TRIALS as f64;
    assert!(
        (0.25..=0.35).contains(&a_frequency),
        "selection frequency {a_frequency} outside [0.25, 0.35]"
    );
}

#[test]
fn test_for_each_yields_items_then_completed() {
    let mut graph = Graph::new("foreach");
    let event = graph.add_node(event_node());
    let list = graph.add_node(Node::new(NodeKind::Pure(PureOp::Literal(Value::List(vec![
        Value::String("a".to_string()),
        Value::String("b".to_string()),
        Value::String("c".to_string()),
    ])))));
    let for_each = graph.add_node(Node::new(NodeKind::Flow(FlowOp::ForEach)));
    let concat = graph.add_node(Node::new(NodeKind::Pure(PureOp::Concat)));
    let body = graph.add_node(record_node(""));
    let done = graph.add_node(record_node("done"));
    graph.connect(event, "Exec", for_each, "Exec").unwrap();
    graph.connect(list, "Value", for_each, "List").unwrap();
    // Each body token must see its own item and index.
    graph.connect(for_each, "Item", concat, "A").unwrap();
    graph.connect(for_each, "Index", concat, "B").unwrap();
    graph.connect(concat, "Result", body, "Tag").unwrap();
    graph.connect(for_each, "Body", body, "Exec").unwrap();
    graph.connect(for_each, "Completed", done, "Exec").unwrap();

    let mut library = GraphLibrary::new();
    let graph_id = library.insert(graph);
    let (mut executor, log) = executor_with_recorder(library, 1);

    executor.spawn(graph_id, event);
    executor.tick(0.0);

    assert_eq!(taken(&log), vec!["a0", "b1", "c2", "done"]);
    assert!(executor.faults().is_empty());
}

#[test]
fn test_for_each_over_empty_list_only_completes() {
    let mut graph = Graph::new("foreach empty");
    let event = graph.add_node(event_node());
    let list = graph.add_node(Node::new(NodeKind::Pure(PureOp::Literal(Value::List(vec![])))));
    let for_each = graph.add_node(Node::new(NodeKind::Flow(FlowOp::ForEach)));
    let body = graph.add_node(record_node("body"));
    let done = graph.add_node(record_node("done"));
    graph.connect(event, "Exec", for_each, "Exec").unwrap();
    graph.connect(list, "Value", for_each, "List").unwrap();
    graph.connect(for_each, "Body", body, "Exec").unwrap();
    graph.connect(for_each, "Completed", done, "Exec").unwrap();

    let mut library = GraphLibrary::new();
    let graph_id = library.insert(graph);
    let (mut executor, log) = executor_with_recorder(library, 1);

    executor.spawn(graph_id, event);
    executor.tick(0.0);

    assert_eq!(taken(&log), vec!["done"]);
}

/// Build a sub-graph that maps its "X" input to "Y" = X + offset.
fn offset_subgraph(offset: f64) -> Graph {
    let mut graph = Graph::new("offset");
    let entry = graph.add_node(Node::new(NodeKind::Flow(FlowOp::GraphEntry {
        outputs: vec![("X".to_string(), ValueType::Int)],
    })));
    let exit = graph.add_node(Node::new(NodeKind::Flow(FlowOp::GraphExit {
        inputs: vec![("Y".to_string(), ValueType::Int)],
    })));
    let amount = graph.add_node(Node::new(NodeKind::Pure(PureOp::Literal(Value::Double(
        offset,
    )))));
    let add = graph.add_node(Node::new(NodeKind::Pure(PureOp::Add)));
    graph.connect(entry, "X", add, "A").unwrap();
    graph.connect(amount, "Value", add, "B").unwrap();
    graph.connect(add, "Result", exit, "Y").unwrap();
    graph.connect(entry, "Exec", exit, "Exec").unwrap();
    graph
}

#[test]
fn test_subgraph_calls_are_reentrant() {
    init_tracing();
    let mut library = GraphLibrary::new();
    let sub_id = library.insert(offset_subgraph(10.0));

    let mut graph = Graph::new("parent");
    let event = graph.add_node(event_node());
    let seq = graph.add_node(Node::new(NodeKind::Flow(FlowOp::Sequence { outputs: 2 })));

    let mut call_x = Node::new(NodeKind::Flow(FlowOp::CallGraph { target: sub_id }));
    call_x.rebuild_ports(&library);
    let mut call_y = Node::new(NodeKind::Flow(FlowOp::CallGraph { target: sub_id }));
    call_y.rebuild_ports(&library);
    let call_x = graph.add_node(call_x);
    let call_y = graph.add_node(call_y);

    let one = graph.add_node(Node::new(NodeKind::Pure(PureOp::Literal(Value::Int(1)))));
    let two = graph.add_node(Node::new(NodeKind::Pure(PureOp::Literal(Value::Int(2)))));
    let x_prefix = graph.add_node(Node::new(NodeKind::Pure(PureOp::Literal(Value::String(
        "x=".to_string(),
    )))));
    let y_prefix = graph.add_node(Node::new(NodeKind::Pure(PureOp::Literal(Value::String(
        "y=".to_string(),
    )))));
    let concat_x = graph.add_node(Node::new(NodeKind::Pure(PureOp::Concat)));
    let concat_y = graph.add_node(Node::new(NodeKind::Pure(PureOp::Concat)));
    let record_x = graph.add_node(record_node(""));
    let record_y = graph.add_node(record_node(""));

    graph.connect(event, "Exec", seq, "Exec").unwrap();
    graph.connect(seq, "Then 0", call_x, "Exec").unwrap();
    graph.connect(seq, "Then 1", call_y, "Exec").unwrap();
    graph.connect(one, "Value", call_x, "X").unwrap();
    graph.connect(two, "Value", call_y, "X").unwrap();
    graph.connect(call_x, "Exec", record_x, "Exec").unwrap();
    graph.connect(call_y, "Exec", record_y, "Exec").unwrap();
    graph.connect(x_prefix, "Value", concat_x, "A").unwrap();
    graph.connect(call_x, "Y", concat_x, "B").unwrap();
    graph.connect(concat_x, "Result", record_x, "Tag").unwrap();
    graph.connect(y_prefix, "Value", concat_y, "A").unwrap();
    graph.connect(call_y, "Y", concat_y, "B").unwrap();
    graph.connect(concat_y, "Result", record_y, "Tag").unwrap();

    let graph_id = library.insert(graph);
    let (mut executor, log) = executor_with_recorder(library, 1);

    executor.spawn(graph_id, event);
    executor.tick(0.0);

    // Each call site returns with its own mapped output: (1, 2) in must
    // come back as (11, 12), never crossed or duplicated.
    assert_eq!(taken(&log), vec!["x=11", "y=12"]);
    assert!(executor.faults().is_empty());
    assert!(executor.is_idle());
}

#[test]
fn test_top_level_exit_completes_token() {
    let mut library = GraphLibrary::new();
    let sub_id = library.insert(offset_subgraph(1.0));
    let entry = library.get(sub_id).unwrap().entry_node().unwrap().id;

    let mut executor = Executor::with_seed(library, 1);
    executor.spawn(sub_id, entry);
    executor.tick(0.0);

    assert!(executor.is_idle());
    assert!(executor.faults().is_empty());
}

#[test]
fn test_call_into_graph_without_entry_faults() {
    let mut library = GraphLibrary::new();
    let empty_id = library.insert(Graph::new("no entry"));

    let mut graph = Graph::new("parent");
    let event = graph.add_node(event_node());
    let mut call = Node::new(NodeKind::Flow(FlowOp::CallGraph { target: empty_id }));
    call.rebuild_ports(&library);
    let call = graph.add_node(call);
    graph.connect(event, "Exec", call, "Exec").unwrap();

    let graph_id = library.insert(graph);
    let mut executor = Executor::with_seed(library, 1);
    executor.spawn(graph_id, event);
    executor.tick(0.0);

    let faults = executor.take_faults();
    assert_eq!(faults.len(), 1);
    assert_eq!(faults[0].node, call);
    assert!(matches!(faults[0].kind, FaultKind::MissingEntry(_)));
    assert!(executor.is_idle());
}

#[test]
fn test_delay_suspends_across_ticks() {
    let mut graph = Graph::new("delay");
    let event = graph.add_node(event_node());
    let delay = graph.add_node(Node::new(NodeKind::Flow(FlowOp::Delay)));
    let after = graph.add_node(record_node("after"));
    graph.connect(event, "Exec", delay, "Exec").unwrap();
    graph.connect(delay, "Exec", after, "Exec").unwrap();

    let mut library = GraphLibrary::new();
    let graph_id = library.insert(graph);
    let (mut executor, log) = executor_with_recorder(library, 1);

    executor.spawn(graph_id, event);
    executor.tick(0.0);
    assert!(taken(&log).is_empty());
    assert_eq!(executor.wait_count(), 1);

    executor.tick(0.5);
    assert!(taken(&log).is_empty());

    executor.tick(0.6);
    assert_eq!(taken(&log), vec!["after"]);
    assert!(executor.is_idle());
}

#[test]
fn test_timer_restart_cancels_outstanding_wait() {
    let mut graph = Graph::new("timer");
    let event = graph.add_node(event_node());
    let timer = graph.add_node(Node::new(NodeKind::Flow(FlowOp::Timer)));
    let tick = graph.add_node(record_node("tick"));
    graph.connect(event, "Exec", timer, "Start").unwrap();
    graph.connect(timer, "Tick", tick, "Exec").unwrap();

    let mut library = GraphLibrary::new();
    let graph_id = library.insert(graph);
    let (mut executor, log) = executor_with_recorder(library, 1);

    // Start twice: the restart must cancel the first outstanding wait,
    // leaving a single stream of continuations.
    executor.spawn(graph_id, event);
    executor.tick(0.0);
    executor.spawn(graph_id, event);
    executor.tick(0.0);
    assert_eq!(executor.wait_count(), 1);

    for _ in 0..3 {
        executor.tick(1.0);
    }
    assert_eq!(taken(&log), vec!["tick", "tick", "tick"]);
}

#[test]
fn test_timer_stop_cancels_wait() {
    let mut graph = Graph::new("timer stop");
    let start = graph.add_node(event_node());
    let stop = graph.add_node(Node::new(NodeKind::Event {
        name: "Halt".to_string(),
    }));
    let timer = graph.add_node(Node::new(NodeKind::Flow(FlowOp::Timer)));
    let tick = graph.add_node(record_node("tick"));
    graph.connect(start, "Exec", timer, "Start").unwrap();
    graph.connect(stop, "Exec", timer, "Stop").unwrap();
    graph.connect(timer, "Tick", tick, "Exec").unwrap();

    let mut library = GraphLibrary::new();
    let graph_id = library.insert(graph);
    let (mut executor, log) = executor_with_recorder(library, 1);

    executor.fire_event(graph_id, "Start");
    executor.tick(0.0);
    assert_eq!(executor.wait_count(), 1);

    executor.fire_event(graph_id, "Halt");
    executor.tick(0.0);
    assert_eq!(executor.wait_count(), 0);

    executor.tick(5.0);
    assert!(taken(&log).is_empty());
    assert!(executor.is_idle());
}

#[test]
fn test_next_frame_resumes_on_following_tick() {
    let mut graph = Graph::new("next frame");
    let event = graph.add_node(event_node());
    let next = graph.add_node(Node::new(NodeKind::Flow(FlowOp::NextFrame)));
    let after = graph.add_node(record_node("after"));
    graph.connect(event, "Exec", next, "Exec").unwrap();
    graph.connect(next, "Exec", after, "Exec").unwrap();

    let mut library = GraphLibrary::new();
    let graph_id = library.insert(graph);
    let (mut executor, log) = executor_with_recorder(library, 1);

    executor.spawn(graph_id, event);
    executor.tick(0.0);
    assert!(taken(&log).is_empty());

    executor.tick(0.0);
    assert_eq!(taken(&log), vec!["after"]);
}

#[test]
fn test_faulting_token_leaves_others_running() {
    init_tracing();
    let mut graph = Graph::new("faults");
    let event = graph.add_node(event_node());
    let seq = graph.add_node(Node::new(NodeKind::Flow(FlowOp::Sequence { outputs: 2 })));
    let explode = graph.add_node(Node::new(NodeKind::Action(ActionOp::External {
        behavior: "explode".to_string(),
    })));
    let never = graph.add_node(record_node("never"));
    let ok = graph.add_node(record_node("ok"));
    graph.connect(event, "Exec", seq, "Exec").unwrap();
    graph.connect(seq, "Then 0", explode, "Exec").unwrap();
    graph.connect(explode, "Exec", never, "Exec").unwrap();
    graph.connect(seq, "Then 1", ok, "Exec").unwrap();

    let mut library = GraphLibrary::new();
    let graph_id = library.insert(graph);
    let (mut executor, log) = executor_with_recorder(library, 1);
    executor.register_external("explode", Box::new(Exploder));

    executor.spawn(graph_id, event);
    executor.tick(0.0);

    // The faulting chain terminated (no "never"), the sibling continued.
    assert_eq!(taken(&log), vec!["ok"]);
    let faults = executor.take_faults();
    assert_eq!(faults.len(), 1);
    assert_eq!(faults[0].node, explode);
    assert!(executor.is_idle());
}

#[test]
fn test_infinite_loop_stays_cancellable() {
    let mut graph = Graph::new("spin");
    let event = graph.add_node(event_node());
    let a = graph.add_node(Node::new(NodeKind::Flow(FlowOp::Sequence { outputs: 1 })));
    let b = graph.add_node(Node::new(NodeKind::Flow(FlowOp::Sequence { outputs: 1 })));
    graph.connect(event, "Exec", a, "Exec").unwrap();
    graph.connect(a, "Then 0", b, "Exec").unwrap();
    graph.connect(b, "Then 0", a, "Exec").unwrap();

    let mut library = GraphLibrary::new();
    let graph_id = library.insert(graph);
    let mut executor = Executor::with_seed(library, 1);
    executor.set_step_budget(100);

    executor.spawn(graph_id, event);
    // The loop keeps running across ticks instead of hanging one.
    executor.tick(0.0);
    assert!(executor.pending_count() > 0);
    executor.tick(0.0);
    assert!(executor.pending_count() > 0);
    assert!(executor.faults().is_empty());

    executor.stop();
    assert!(executor.is_idle());
}

#[test]
fn test_dropped_tokens_for_removed_nodes_are_tolerated() {
    let mut graph = Graph::new("teardown");
    let event = graph.add_node(event_node());
    let graph_id = graph.id;

    let mut library = GraphLibrary::new();
    library.insert(graph);
    let mut executor = Executor::with_seed(library, 1);

    executor.spawn(graph_id, event);
    // The node is torn down before the tick reaches it.
    executor
        .library_mut()
        .get_mut(graph_id)
        .unwrap()
        .remove_node(event);
    executor.tick(0.0);

    assert!(executor.faults().is_empty());
    assert!(executor.is_idle());
}

#[test]
fn test_spawn_at_unknown_node_is_tolerated() {
    let mut library = GraphLibrary::new();
    let graph_id = library.insert(Graph::new("empty"));
    let mut executor = Executor::with_seed(library, 1);

    executor.spawn(graph_id, NodeId::new());
    executor.tick(0.0);

    assert!(executor.faults().is_empty());
    assert!(executor.is_idle());
}
