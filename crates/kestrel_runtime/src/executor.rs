// SPDX-License-Identifier: MIT OR Apache-2.0
//! The graph interpreter: drives tokens through a graph, resolves data
//! dependencies, and manages suspension and sub-graph calls.
//!
//! Scheduling is single-threaded and cooperative. The host calls
//! [`Executor::tick`] once per frame; one tick first turns elapsed waits
//! into fresh tokens, then drains the pending queue FIFO. Everything a
//! token does completes within the tick it was enqueued, except at
//! suspension points. Faults are isolated per token: a failing node
//! terminates its own chain and never the tick loop.

use crate::external::{ExternalAction, ExternalError, ExternalRegistry};
use crate::suspension::{Wait, WaitKey, WaitKind, WaitTable};
use crate::token::{Frame, Token, TokenId, TokenState};
use kestrel_graph::{
    ActionOp, CoercionError, FlowOp, Graph, GraphId, GraphLibrary, Node, NodeId, NodeKind, Port,
    PureOp, Value,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{HashMap, VecDeque};

/// Default number of scheduling steps one tick may take before deferring
/// the rest of the queue. Keeps intentional infinite loops cooperative.
pub const DEFAULT_STEP_BUDGET: usize = 10_000;

/// A fault raised while advancing a token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fault {
    /// Graph the faulting node lives in
    pub graph: GraphId,
    /// Node whose activation faulted
    pub node: NodeId,
    /// What went wrong
    pub kind: FaultKind,
}

/// Fault taxonomy
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FaultKind {
    /// A call node's target is not in the library
    #[error("called graph {0:?} is not in the library")]
    GraphNotFound(GraphId),

    /// A called graph has no entry node
    #[error("called graph {0:?} has no entry node")]
    MissingEntry(GraphId),

    /// Recursive data resolution revisited a node already being evaluated
    #[error("data cycle detected while resolving input '{port}'")]
    DataCycle {
        /// Input port whose resolution hit the cycle
        port: String,
    },

    /// A resolved value could not be represented as the port's type
    #[error("input '{port}': {source}")]
    BadInput {
        /// Input port being resolved
        port: String,
        /// The failed conversion
        #[source]
        source: CoercionError,
    },

    /// Division by zero in a pure math node
    #[error("division by zero")]
    DivisionByZero,

    /// An external-action node names an unregistered behavior
    #[error("no external behavior registered as '{0}'")]
    UnknownExternal(String),

    /// A registered external behavior reported a failure
    #[error("external behavior failed: {0}")]
    External(#[from] ExternalError),
}

/// The graph interpreter
pub struct Executor {
    library: GraphLibrary,
    externals: ExternalRegistry,
    pending: VecDeque<Token>,
    waits: WaitTable,
    rng: StdRng,
    faults: Vec<Fault>,
    step_budget: usize,
    ticks: u64,
}

impl Executor {
    /// Create an executor over a graph library
    pub fn new(library: GraphLibrary) -> Self {
        Self::with_rng(library, StdRng::from_entropy())
    }

    /// Create an executor with a fixed random seed (deterministic
    /// weighted-branch selection, for tests)
    pub fn with_seed(library: GraphLibrary, seed: u64) -> Self {
        Self::with_rng(library, StdRng::seed_from_u64(seed))
    }

    fn with_rng(library: GraphLibrary, rng: StdRng) -> Self {
        Self {
            library,
            externals: ExternalRegistry::new(),
            pending: VecDeque::new(),
            waits: WaitTable::new(),
            rng,
            faults: Vec::new(),
            step_budget: DEFAULT_STEP_BUDGET,
            ticks: 0,
        }
    }

    /// The graph library being executed
    pub fn library(&self) -> &GraphLibrary {
        &self.library
    }

    /// Mutable access to the library. Topology is read-only during
    /// execution; edit only while no tokens are in flight.
    pub fn library_mut(&mut self) -> &mut GraphLibrary {
        &mut self.library
    }

    /// Register a host behavior for external-action nodes
    pub fn register_external(&mut self, name: impl Into<String>, action: Box<dyn ExternalAction>) {
        self.externals.register(name, action);
    }

    /// Cap the number of scheduling steps per tick
    pub fn set_step_budget(&mut self, steps: usize) {
        self.step_budget = steps.max(1);
    }

    /// Enqueue a token at an entry node
    pub fn spawn(&mut self, graph: GraphId, node: NodeId) -> TokenId {
        let token = Token::new(graph, node);
        let id = token.id;
        tracing::debug!("spawning token {:?} at node {:?}", id, node);
        self.pending.push_back(token);
        id
    }

    /// Enqueue one token per event node matching `event`, returning how
    /// many were spawned
    pub fn fire_event(&mut self, graph_id: GraphId, event: &str) -> usize {
        let Some(graph) = self.library.get(graph_id) else {
            return 0;
        };
        let targets: Vec<NodeId> = graph.event_nodes(event).map(|n| n.id).collect();
        for node in &targets {
            self.pending.push_back(Token::new(graph_id, *node));
        }
        targets.len()
    }

    /// Advance one host frame.
    ///
    /// Elapsed waits resume first (as fresh tokens), then the pending
    /// queue drains FIFO until empty or the step budget runs out;
    /// leftovers stay queued for the next tick.
    pub fn tick(&mut self, dt: f32) {
        self.ticks += 1;

        for resume in self.waits.advance(dt) {
            let Some(graph) = self.library.get(resume.graph) else {
                tracing::debug!("dropping resumption into unloaded graph {:?}", resume.graph);
                continue;
            };
            let mut template = Token::new(resume.graph, resume.node);
            template.set_locals(resume.locals);
            for frame in resume.stack {
                template.push_frame(frame);
            }
            follow(graph, &mut self.pending, &template, resume.node, &resume.output);
        }

        let mut steps = 0;
        while let Some(token) = self.pending.pop_front() {
            self.step(token);
            steps += 1;
            if steps >= self.step_budget {
                if !self.pending.is_empty() {
                    tracing::warn!(
                        "step budget exhausted with {} tokens still pending; deferring to next tick",
                        self.pending.len()
                    );
                }
                break;
            }
        }
    }

    /// Drop all pending tokens and outstanding waits
    pub fn stop(&mut self) {
        let dropped = self.pending.len() + self.waits.len();
        self.pending.clear();
        self.waits.clear();
        if dropped > 0 {
            tracing::info!("execution stopped, {} tokens/waits dropped", dropped);
        }
    }

    /// Whether nothing is pending or suspended
    pub fn is_idle(&self) -> bool {
        self.pending.is_empty() && self.waits.is_empty()
    }

    /// Number of tokens waiting for a scheduling step
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Number of outstanding waits
    pub fn wait_count(&self) -> usize {
        self.waits.len()
    }

    /// Ticks advanced so far
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Faults recorded so far
    pub fn faults(&self) -> &[Fault] {
        &self.faults
    }

    /// Drain the recorded faults
    pub fn take_faults(&mut self) -> Vec<Fault> {
        std::mem::take(&mut self.faults)
    }

    /// Advance one token through its target node.
    fn step(&mut self, mut token: Token) {
        token.state = TokenState::Running;

        let Some(graph) = self.library.get(token.graph) else {
            tracing::debug!("dropping token {:?}: graph unloaded", token.id);
            return;
        };
        // A token targeting a destroyed node is dropped as a no-op, not a
        // fault: teardown races are expected during cancellation.
        let Some(node) = graph.node(token.node) else {
            tracing::debug!("dropping token {:?}: node removed", token.id);
            return;
        };

        match &node.kind {
            NodeKind::Event { .. } => {
                follow(graph, &mut self.pending, &token, node.id, "Exec");
            }

            NodeKind::Pure(_) => {
                tracing::warn!(
                    "token {:?} targets pure node {:?}; pure nodes are pulled, not triggered",
                    token.id,
                    node.id
                );
            }

            NodeKind::Action(op) => {
                let inputs = match resolve_data_inputs(graph, node, &token, &mut self.faults) {
                    Ok(inputs) => inputs,
                    Err(kind) => {
                        record_fault(&mut self.faults, graph.id, node.id, kind);
                        return;
                    }
                };
                match op {
                    ActionOp::Print => {
                        let message = inputs
                            .get("Message")
                            .map(Value::display)
                            .unwrap_or_default();
                        tracing::info!("{}", message);
                    }
                    ActionOp::External { behavior } => {
                        let Some(action) = self.externals.get_mut(behavior) else {
                            record_fault(
                                &mut self.faults,
                                graph.id,
                                node.id,
                                FaultKind::UnknownExternal(behavior.clone()),
                            );
                            return;
                        };
                        match action.run(&inputs) {
                            Ok(outputs) => {
                                for (name, value) in outputs {
                                    token.set_local(name, value);
                                }
                            }
                            Err(e) => {
                                record_fault(
                                    &mut self.faults,
                                    graph.id,
                                    node.id,
                                    FaultKind::External(e),
                                );
                                return;
                            }
                        }
                    }
                }
                follow(graph, &mut self.pending, &token, node.id, "Exec");
            }

            NodeKind::Flow(op) => {
                let op = op.clone();
                self.step_flow(token, op);
            }
        }
    }

    /// Flow-control nodes produce their own successor tokens.
    fn step_flow(&mut self, mut token: Token, op: FlowOp) {
        // Re-borrow; `step` validated both lookups a moment ago.
        let Some(graph) = self.library.get(token.graph) else {
            return;
        };
        let Some(node) = graph.node(token.node) else {
            return;
        };

        match &op {
            FlowOp::Branch => {
                let inputs = match resolve_data_inputs(graph, node, &token, &mut self.faults) {
                    Ok(inputs) => inputs,
                    Err(kind) => {
                        record_fault(&mut self.faults, graph.id, node.id, kind);
                        return;
                    }
                };
                let condition = inputs
                    .get("Condition")
                    .and_then(Value::as_bool)
                    .unwrap_or(false);
                let output = if condition { "True" } else { "False" };
                follow(graph, &mut self.pending, &token, node.id, output);
            }

            FlowOp::WeightedBranch { .. } => {
                let candidates: Vec<(String, f32)> = node
                    .exec_outputs()
                    .filter(|port| graph.connections_from(node.id, &port.name).next().is_some())
                    .map(|port| (port.name.clone(), port.weight.unwrap_or(1.0).max(0.0)))
                    .collect();
                if candidates.is_empty() {
                    tracing::debug!("weighted branch {:?} has no connected outputs", node.id);
                    return;
                }
                let total: f32 = candidates.iter().map(|(_, w)| w).sum();
                let chosen = if total > 0.0 {
                    let mut roll = self.rng.gen_range(0.0..total);
                    let mut pick = candidates.len() - 1;
                    for (i, (_, weight)) in candidates.iter().enumerate() {
                        if roll < *weight {
                            pick = i;
                            break;
                        }
                        roll -= weight;
                    }
                    pick
                } else {
                    self.rng.gen_range(0..candidates.len())
                };
                follow(graph, &mut self.pending, &token, node.id, &candidates[chosen].0);
            }

            FlowOp::Sequence { .. } => {
                let outputs: Vec<String> =
                    node.exec_outputs().map(|p| p.name.clone()).collect();
                for output in &outputs {
                    follow(graph, &mut self.pending, &token, node.id, output);
                }
            }

            FlowOp::ForEach => {
                let inputs = match resolve_data_inputs(graph, node, &token, &mut self.faults) {
                    Ok(inputs) => inputs,
                    Err(kind) => {
                        record_fault(&mut self.faults, graph.id, node.id, kind);
                        return;
                    }
                };
                let items = match inputs.get("List") {
                    Some(Value::List(items)) => items.clone(),
                    _ => Vec::new(),
                };
                for (index, item) in items.iter().enumerate() {
                    follow_with(
                        graph,
                        &mut self.pending,
                        &token,
                        node.id,
                        "Body",
                        &[
                            ("Item", item.clone()),
                            ("Index", Value::Int(index as i32)),
                        ],
                    );
                }
                follow(graph, &mut self.pending, &token, node.id, "Completed");
            }

            FlowOp::Delay => {
                let inputs = match resolve_data_inputs(graph, node, &token, &mut self.faults) {
                    Ok(inputs) => inputs,
                    Err(kind) => {
                        record_fault(&mut self.faults, graph.id, node.id, kind);
                        return;
                    }
                };
                let duration = inputs
                    .get("Duration")
                    .and_then(Value::as_double)
                    .unwrap_or(1.0) as f32;
                let node_id = node.id;
                self.suspend(
                    &mut token,
                    node_id,
                    WaitKind::Delay {
                        remaining: duration,
                    },
                    "Exec",
                );
            }

            FlowOp::Timer => {
                if token.port == "Stop" {
                    let cancelled = self.waits.cancel(&WaitKey {
                        node: node.id,
                        context: token.stack().to_vec(),
                    });
                    tracing::debug!("timer {:?} stopped (had wait: {})", node.id, cancelled);
                    return;
                }
                let inputs = match resolve_data_inputs(graph, node, &token, &mut self.faults) {
                    Ok(inputs) => inputs,
                    Err(kind) => {
                        record_fault(&mut self.faults, graph.id, node.id, kind);
                        return;
                    }
                };
                let interval = inputs
                    .get("Interval")
                    .and_then(Value::as_double)
                    .unwrap_or(1.0) as f32;
                let node_id = node.id;
                self.suspend(
                    &mut token,
                    node_id,
                    WaitKind::Interval {
                        remaining: interval,
                        period: interval,
                    },
                    "Tick",
                );
            }

            FlowOp::NextFrame => {
                let node_id = node.id;
                self.suspend(&mut token, node_id, WaitKind::NextFrame, "Exec");
            }

            FlowOp::CallGraph { target } => {
                let inputs = match resolve_data_inputs(graph, node, &token, &mut self.faults) {
                    Ok(inputs) => inputs,
                    Err(kind) => {
                        record_fault(&mut self.faults, graph.id, node.id, kind);
                        return;
                    }
                };
                let Some(called) = self.library.get(*target) else {
                    record_fault(
                        &mut self.faults,
                        graph.id,
                        node.id,
                        FaultKind::GraphNotFound(*target),
                    );
                    return;
                };
                let Some(entry) = called.entry_node() else {
                    record_fault(
                        &mut self.faults,
                        graph.id,
                        node.id,
                        FaultKind::MissingEntry(*target),
                    );
                    return;
                };
                token.push_frame(Frame {
                    graph: token.graph,
                    call_node: node.id,
                });
                // The call node's data inputs mirror the entry's declared
                // outputs; carry the resolved values in as token locals.
                for (name, value) in inputs {
                    token.set_local(name, value);
                }
                token.graph = called.id;
                token.node = entry.id;
                token.port = String::new();
                token.state = TokenState::Pending;
                self.pending.push_back(token);
            }

            FlowOp::GraphEntry { .. } => {
                follow(graph, &mut self.pending, &token, node.id, "Exec");
            }

            FlowOp::GraphExit { inputs: decls } => {
                let resolved = match resolve_data_inputs(graph, node, &token, &mut self.faults) {
                    Ok(inputs) => inputs,
                    Err(kind) => {
                        record_fault(&mut self.faults, graph.id, node.id, kind);
                        return;
                    }
                };
                let Some(frame) = token.pop_frame() else {
                    // Top-level graph: the token simply completes.
                    token.state = TokenState::Completed;
                    tracing::debug!("token {:?} completed at top-level exit", token.id);
                    return;
                };
                let Some(caller) = self.library.get(frame.graph) else {
                    tracing::debug!("dropping return into unloaded graph {:?}", frame.graph);
                    return;
                };
                if caller.node(frame.call_node).is_none() {
                    tracing::debug!("dropping return to removed call node {:?}", frame.call_node);
                    return;
                }
                // Map the exit's declared inputs onto the call node's
                // outputs, then resume downstream of the call node.
                for (name, _) in decls {
                    if let Some(value) = resolved.get(name) {
                        token.set_local(name, value.clone());
                    }
                }
                token.graph = frame.graph;
                follow(caller, &mut self.pending, &token, frame.call_node, "Exec");
            }
        }
    }

    /// Park a token at a suspension point: register the wait (cancelling
    /// any outstanding one for the same node+context) and terminate the
    /// token. The wait's continuation arrives as a fresh token.
    fn suspend(&mut self, token: &mut Token, node: NodeId, kind: WaitKind, output: &str) {
        token.state = TokenState::Suspended;
        self.waits.schedule(
            WaitKey {
                node,
                context: token.stack().to_vec(),
            },
            Wait {
                kind,
                graph: token.graph,
                output: output.to_string(),
                locals: token.locals().clone(),
                stack: token.stack().to_vec(),
            },
        );
    }
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("graphs", &self.library.len())
            .field("pending", &self.pending.len())
            .field("waits", &self.waits.len())
            .field("faults", &self.faults.len())
            .field("ticks", &self.ticks)
            .finish()
    }
}

/// Enqueue one forked token per execution connection leaving `(from, port)`.
fn follow(
    graph: &Graph,
    pending: &mut VecDeque<Token>,
    token: &Token,
    from: NodeId,
    port: &str,
) -> usize {
    let mut count = 0;
    for connection in graph.connections_from(from, port) {
        pending.push_back(token.fork(connection.to_node, connection.to_port.clone()));
        count += 1;
    }
    count
}

/// Like [`follow`], with extra token-local values applied to each fork.
fn follow_with(
    graph: &Graph,
    pending: &mut VecDeque<Token>,
    token: &Token,
    from: NodeId,
    port: &str,
    extra: &[(&str, Value)],
) -> usize {
    let mut count = 0;
    for connection in graph.connections_from(from, port) {
        let mut fork = token.fork(connection.to_node, connection.to_port.clone());
        for (key, value) in extra {
            fork.set_local(*key, value.clone());
        }
        pending.push_back(fork);
        count += 1;
    }
    count
}

fn record_fault(faults: &mut Vec<Fault>, graph: GraphId, node: NodeId, kind: FaultKind) {
    tracing::error!("node {:?} faulted: {}", node, kind);
    faults.push(Fault { graph, node, kind });
}

/// Resolve every data input of a node for one activation.
///
/// Hard failures (coercion, division by zero deeper in a pure chain)
/// abort the activation; a data cycle is softer — it substitutes the
/// port's default and records a fault, per the error taxonomy.
fn resolve_data_inputs(
    graph: &Graph,
    node: &Node,
    token: &Token,
    faults: &mut Vec<Fault>,
) -> Result<HashMap<String, Value>, FaultKind> {
    let mut resolved = HashMap::new();
    for port in node.data_inputs() {
        let mut eval_stack = Vec::new();
        let value = resolve_input(graph, node, port, token, &mut eval_stack, faults)?;
        resolved.insert(port.name.clone(), value);
    }
    Ok(resolved)
}

/// Resolve a single data input: connected sources pull through pure
/// chains; non-pure sources publish through token locals under the source
/// port's name; unconnected inputs read the token-local value under their
/// own name, then the default.
fn resolve_input(
    graph: &Graph,
    node: &Node,
    port: &Port,
    token: &Token,
    eval_stack: &mut Vec<NodeId>,
    faults: &mut Vec<Fault>,
) -> Result<Value, FaultKind> {
    let raw = if let Some(connection) = graph.connections_to(node.id, &port.name).next() {
        let source = graph.node(connection.from_node);
        match source {
            Some(source) if source.kind.is_pure() => {
                if eval_stack.contains(&source.id) {
                    record_fault(
                        faults,
                        graph.id,
                        source.id,
                        FaultKind::DataCycle {
                            port: port.name.clone(),
                        },
                    );
                    default_for(port)
                } else {
                    eval_pure(graph, source, token, eval_stack, faults)?
                }
            }
            Some(_) => token
                .local(&connection.from_port)
                .cloned()
                .unwrap_or_else(|| default_for(port)),
            None => default_for(port),
        }
    } else {
        token
            .local(&port.name)
            .cloned()
            .unwrap_or_else(|| default_for(port))
    };

    raw.coerce(port.value_type).map_err(|source| FaultKind::BadInput {
        port: port.name.clone(),
        source,
    })
}

fn default_for(port: &Port) -> Value {
    port.default_value
        .clone()
        .unwrap_or_else(|| port.value_type.default_value())
}

/// Evaluate a pure node on demand: resolve its own inputs recursively,
/// then apply its operation. Nothing is memoized; pure nodes are
/// stateless per request.
fn eval_pure(
    graph: &Graph,
    node: &Node,
    token: &Token,
    eval_stack: &mut Vec<NodeId>,
    faults: &mut Vec<Fault>,
) -> Result<Value, FaultKind> {
    let NodeKind::Pure(op) = &node.kind else {
        return Ok(Value::Bool(false));
    };

    eval_stack.push(node.id);
    let mut inputs = HashMap::new();
    for port in node.data_inputs() {
        let value = resolve_input(graph, node, port, token, eval_stack, faults)?;
        inputs.insert(port.name.clone(), value);
    }
    eval_stack.pop();

    compute_pure(op, &inputs)
}

fn compute_pure(op: &PureOp, inputs: &HashMap<String, Value>) -> Result<Value, FaultKind> {
    let number = |name: &str| {
        inputs
            .get(name)
            .and_then(Value::as_double)
            .unwrap_or(0.0)
    };
    let boolean = |name: &str| inputs.get(name).and_then(Value::as_bool).unwrap_or(false);
    let text = |name: &str| {
        inputs
            .get(name)
            .map(Value::display)
            .unwrap_or_default()
    };

    Ok(match op {
        PureOp::Literal(value) => value.clone(),
        PureOp::Add => Value::Double(number("A") + number("B")),
        PureOp::Subtract => Value::Double(number("A") - number("B")),
        PureOp::Multiply => Value::Double(number("A") * number("B")),
        PureOp::Divide => {
            let divisor = number("B");
            if divisor == 0.0 {
                return Err(FaultKind::DivisionByZero);
            }
            Value::Double(number("A") / divisor)
        }
        PureOp::Equals => {
            let a = inputs.get("A");
            let b = inputs.get("B");
            let equal = match (a.and_then(Value::as_double), b.and_then(Value::as_double)) {
                (Some(x), Some(y)) => x == y,
                _ => a == b,
            };
            Value::Bool(equal)
        }
        PureOp::Greater => Value::Bool(number("A") > number("B")),
        PureOp::Less => Value::Bool(number("A") < number("B")),
        PureOp::And => Value::Bool(boolean("A") && boolean("B")),
        PureOp::Or => Value::Bool(boolean("A") || boolean("B")),
        PureOp::Not => Value::Bool(!boolean("Value")),
        PureOp::Concat => Value::String(format!("{}{}", text("A"), text("B"))),
    })
}
