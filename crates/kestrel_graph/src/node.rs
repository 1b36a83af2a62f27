// SPDX-License-Identifier: MIT OR Apache-2.0
//! Node definitions: the behavior descriptor and per-kind port layout.
//!
//! A node's behavior is a tagged union rather than a type hierarchy: the
//! executor pattern-matches on [`NodeKind`] and only the fields relevant to
//! that kind exist. Port lists are computed from the kind at construction
//! and recomputed only by an explicit [`Node::rebuild_ports`] call, never
//! implicitly during execution.

use crate::graph::{GraphId, GraphLibrary};
use crate::port::{Port, PortKind};
use crate::value::{Value, ValueType};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeId(pub Uuid);

impl NodeId {
    /// Create a new random node ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

/// Pure data operations, recomputed on demand with no execution trigger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PureOp {
    /// Constant value
    Literal(Value),
    /// Numeric addition
    Add,
    /// Numeric subtraction
    Subtract,
    /// Numeric multiplication
    Multiply,
    /// Numeric division
    Divide,
    /// Equality comparison
    Equals,
    /// Numeric greater-than
    Greater,
    /// Numeric less-than
    Less,
    /// Boolean and
    And,
    /// Boolean or
    Or,
    /// Boolean negation
    Not,
    /// String concatenation
    Concat,
}

/// Synchronous execution-node operations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ActionOp {
    /// Log a message through the host console
    Print,
    /// Host-side behavior looked up by name in the executor's adapter
    /// registry; declared data ports are added per node instance
    External {
        /// Registry name of the behavior
        behavior: String,
    },
}

/// Flow-control operations: these produce their own successor tokens
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FlowOp {
    /// If/else on a boolean condition
    Branch,
    /// Weighted random pick among connected outputs
    WeightedBranch {
        /// Relative weight per output, in declared order
        weights: Vec<f32>,
    },
    /// Fire all outputs in declared order within one scheduling step
    Sequence {
        /// Number of outputs
        outputs: u32,
    },
    /// One body token per list element, then a completion token
    ForEach,
    /// Suspend for a duration, then continue once
    Delay,
    /// Repeating timer with start/stop inputs
    Timer,
    /// Resume on the following host tick
    NextFrame,
    /// Invoke another graph as a function
    CallGraph {
        /// Handle to the called graph
        target: GraphId,
    },
    /// Sub-graph entry point; declared data outputs receive the caller's
    /// mapped inputs
    GraphEntry {
        /// Declared data outputs (name, type)
        outputs: Vec<(String, ValueType)>,
    },
    /// Sub-graph exit point; declared data inputs are mapped back onto the
    /// call node's outputs
    GraphExit {
        /// Declared data inputs (name, type)
        inputs: Vec<(String, ValueType)>,
    },
}

/// Behavior descriptor for a node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NodeKind {
    /// Entry point fired by the host
    Event {
        /// Event name the host fires (e.g. "Start", "Tick")
        name: String,
    },
    /// Pure data node
    Pure(PureOp),
    /// Stateless execution node
    Action(ActionOp),
    /// Flow-control node
    Flow(FlowOp),
}

impl NodeKind {
    /// Default display title for this kind
    pub fn title(&self) -> String {
        match self {
            Self::Event { name } => format!("On {name}"),
            Self::Pure(op) => match op {
                PureOp::Literal(v) => format!("{:?}", v.value_type()),
                PureOp::Add => "Add".to_string(),
                PureOp::Subtract => "Subtract".to_string(),
                PureOp::Multiply => "Multiply".to_string(),
                PureOp::Divide => "Divide".to_string(),
                PureOp::Equals => "Equals".to_string(),
                PureOp::Greater => "Greater".to_string(),
                PureOp::Less => "Less".to_string(),
                PureOp::And => "And".to_string(),
                PureOp::Or => "Or".to_string(),
                PureOp::Not => "Not".to_string(),
                PureOp::Concat => "Concat".to_string(),
            },
            Self::Action(op) => match op {
                ActionOp::Print => "Print".to_string(),
                ActionOp::External { behavior } => behavior.clone(),
            },
            Self::Flow(op) => match op {
                FlowOp::Branch => "Branch".to_string(),
                FlowOp::WeightedBranch { .. } => "Weighted Branch".to_string(),
                FlowOp::Sequence { .. } => "Sequence".to_string(),
                FlowOp::ForEach => "For Each".to_string(),
                FlowOp::Delay => "Delay".to_string(),
                FlowOp::Timer => "Timer".to_string(),
                FlowOp::NextFrame => "Next Frame".to_string(),
                FlowOp::CallGraph { .. } => "Call Graph".to_string(),
                FlowOp::GraphEntry { .. } => "Entry".to_string(),
                FlowOp::GraphExit { .. } => "Exit".to_string(),
            },
        }
    }

    /// Default category path for this kind
    pub fn category(&self) -> &'static str {
        match self {
            Self::Event { .. } => "Events",
            Self::Pure(PureOp::Literal(_)) => "Data/Constants",
            Self::Pure(_) => "Data/Math",
            Self::Action(_) => "Actions",
            Self::Flow(FlowOp::Delay | FlowOp::Timer | FlowOp::NextFrame) => "Flow/Time",
            Self::Flow(FlowOp::CallGraph { .. } | FlowOp::GraphEntry { .. } | FlowOp::GraphExit { .. }) => {
                "Flow/Graphs"
            }
            Self::Flow(_) => "Flow",
        }
    }

    /// Whether this node is a pure data node (no execution ports)
    pub fn is_pure(&self) -> bool {
        matches!(self, Self::Pure(_))
    }

    /// Compute the port layout for this kind.
    ///
    /// `library` is consulted only by [`FlowOp::CallGraph`], which mirrors
    /// the entry/exit declarations of its target graph. Without a library
    /// (or with a dangling target) a call node exposes only its execution
    /// ports; validation flags any connection left stale by that.
    pub fn ports(&self, library: Option<&GraphLibrary>) -> (Vec<Port>, Vec<Port>) {
        match self {
            Self::Event { .. } => (vec![], vec![Port::exec_out("Exec")]),

            Self::Pure(op) => pure_ports(op),

            Self::Action(op) => {
                let inputs = match op {
                    ActionOp::Print => vec![
                        Port::exec_in("Exec"),
                        Port::input("Message", ValueType::String)
                            .with_default(Value::String(String::new())),
                    ],
                    ActionOp::External { .. } => vec![Port::exec_in("Exec")],
                };
                (inputs, vec![Port::exec_out("Exec")])
            }

            Self::Flow(op) => flow_ports(op, library),
        }
    }
}

fn pure_ports(op: &PureOp) -> (Vec<Port>, Vec<Port>) {
    use ValueType::{Any, Bool, Double, String as Str};
    match op {
        PureOp::Literal(value) => (
            vec![],
            vec![Port::output("Value", value.value_type())],
        ),
        PureOp::Add | PureOp::Subtract | PureOp::Multiply | PureOp::Divide => (
            vec![
                Port::input("A", Double).with_default(Value::Double(0.0)),
                Port::input("B", Double).with_default(Value::Double(0.0)),
            ],
            vec![Port::output("Result", Double)],
        ),
        PureOp::Greater | PureOp::Less => (
            vec![
                Port::input("A", Double).with_default(Value::Double(0.0)),
                Port::input("B", Double).with_default(Value::Double(0.0)),
            ],
            vec![Port::output("Result", Bool)],
        ),
        PureOp::Equals => (
            vec![Port::input("A", Any), Port::input("B", Any)],
            vec![Port::output("Result", Bool)],
        ),
        PureOp::And | PureOp::Or => (
            vec![
                Port::input("A", Bool).with_default(Value::Bool(false)),
                Port::input("B", Bool).with_default(Value::Bool(false)),
            ],
            vec![Port::output("Result", Bool)],
        ),
        PureOp::Not => (
            vec![Port::input("Value", Bool).with_default(Value::Bool(false))],
            vec![Port::output("Result", Bool)],
        ),
        PureOp::Concat => (
            vec![
                Port::input("A", Str).with_default(Value::String(String::new())),
                Port::input("B", Str).with_default(Value::String(String::new())),
            ],
            vec![Port::output("Result", Str)],
        ),
    }
}

fn flow_ports(op: &FlowOp, library: Option<&GraphLibrary>) -> (Vec<Port>, Vec<Port>) {
    use ValueType::{Any, Bool, Float, Int, List};
    match op {
        FlowOp::Branch => (
            vec![
                Port::exec_in("Exec"),
                Port::input("Condition", Bool).required(),
            ],
            vec![Port::exec_out("True"), Port::exec_out("False")],
        ),
        FlowOp::WeightedBranch { weights } => (
            vec![Port::exec_in("Exec")],
            weights
                .iter()
                .enumerate()
                .map(|(i, w)| Port::exec_out(format!("Option {i}")).with_weight(*w))
                .collect(),
        ),
        FlowOp::Sequence { outputs } => (
            vec![Port::exec_in("Exec")],
            (0..*outputs)
                .map(|i| Port::exec_out(format!("Then {i}")))
                .collect(),
        ),
        FlowOp::ForEach => (
            vec![
                Port::exec_in("Exec"),
                Port::input("List", List).required(),
            ],
            vec![
                Port::exec_out("Body"),
                Port::output("Item", Any),
                Port::output("Index", Int),
                Port::exec_out("Completed"),
            ],
        ),
        FlowOp::Delay => (
            vec![
                Port::exec_in("Exec"),
                Port::input("Duration", Float).with_default(Value::Float(1.0)),
            ],
            vec![Port::exec_out("Exec")],
        ),
        FlowOp::Timer => (
            vec![
                Port::exec_in("Start"),
                Port::exec_in("Stop"),
                Port::input("Interval", Float).with_default(Value::Float(1.0)),
            ],
            vec![Port::exec_out("Tick")],
        ),
        FlowOp::NextFrame => (vec![Port::exec_in("Exec")], vec![Port::exec_out("Exec")]),
        FlowOp::CallGraph { target } => {
            let mut inputs = vec![Port::exec_in("Exec")];
            let mut outputs = vec![Port::exec_out("Exec")];
            if let Some(target) = library.and_then(|lib| lib.get(*target)) {
                if let Some(entry) = target.entry_node() {
                    if let NodeKind::Flow(FlowOp::GraphEntry { outputs: decls }) = &entry.kind {
                        inputs.extend(
                            decls.iter().map(|(name, ty)| Port::input(name.clone(), *ty)),
                        );
                    }
                }
                if let Some(exit) = target.exit_node() {
                    if let NodeKind::Flow(FlowOp::GraphExit { inputs: decls }) = &exit.kind {
                        outputs.extend(
                            decls.iter().map(|(name, ty)| Port::output(name.clone(), *ty)),
                        );
                    }
                }
            }
            (inputs, outputs)
        }
        FlowOp::GraphEntry { outputs } => (
            vec![],
            std::iter::once(Port::exec_out("Exec"))
                .chain(outputs.iter().map(|(name, ty)| Port::output(name.clone(), *ty)))
                .collect(),
        ),
        FlowOp::GraphExit { inputs } => (
            std::iter::once(Port::exec_in("Exec"))
                .chain(inputs.iter().map(|(name, ty)| Port::input(name.clone(), *ty)))
                .collect(),
            vec![],
        ),
    }
}

/// A node instance in the graph
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    /// Unique instance ID
    pub id: NodeId,
    /// Behavior descriptor
    pub kind: NodeKind,
    /// Display name override (falls back to the kind's title)
    pub name: Option<String>,
    /// Category path for the (external) editor's palette
    pub category: String,
    /// Position in the graph canvas; opaque to execution
    pub position: [f32; 2],
    /// Input ports
    pub inputs: Vec<Port>,
    /// Output ports
    pub outputs: Vec<Port>,
}

impl Node {
    /// Create a new node, computing its port layout from the kind
    pub fn new(kind: NodeKind) -> Self {
        let (inputs, outputs) = kind.ports(None);
        Self {
            id: NodeId::new(),
            category: kind.category().to_string(),
            kind,
            name: None,
            position: [0.0, 0.0],
            inputs,
            outputs,
        }
    }

    /// Set the position
    pub fn with_position(mut self, x: f32, y: f32) -> Self {
        self.position = [x, y];
        self
    }

    /// Set the display name override
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Append an input port (used by external-action nodes to declare
    /// their data inputs)
    pub fn with_input(mut self, port: Port) -> Self {
        self.inputs.push(port);
        self
    }

    /// Append an output port
    pub fn with_output(mut self, port: Port) -> Self {
        self.outputs.push(port);
        self
    }

    /// Display name shown in the editor
    pub fn display_name(&self) -> String {
        self.name.clone().unwrap_or_else(|| self.kind.title())
    }

    /// Get an input port by name
    pub fn input(&self, name: &str) -> Option<&Port> {
        self.inputs.iter().find(|p| p.name == name)
    }

    /// Get an output port by name
    pub fn output(&self, name: &str) -> Option<&Port> {
        self.outputs.iter().find(|p| p.name == name)
    }

    /// Get all ports
    pub fn ports(&self) -> impl Iterator<Item = &Port> {
        self.inputs.iter().chain(self.outputs.iter())
    }

    /// Data input ports in declared order
    pub fn data_inputs(&self) -> impl Iterator<Item = &Port> {
        self.inputs.iter().filter(|p| p.kind == PortKind::Data)
    }

    /// Execution output ports in declared order
    pub fn exec_outputs(&self) -> impl Iterator<Item = &Port> {
        self.outputs.iter().filter(|p| p.kind == PortKind::Execution)
    }

    /// Recompute the port layout from the current kind configuration.
    ///
    /// Explicit only: call after editing a port-dynamic configuration
    /// (sequence output count, weighted-branch weights, call target, or a
    /// change to the called graph's entry/exit declarations). Ports added
    /// with [`Node::with_input`]/[`Node::with_output`] are not preserved.
    /// Connections referencing removed ports become validation issues.
    pub fn rebuild_ports(&mut self, library: &GraphLibrary) {
        let (inputs, outputs) = self.kind.ports(Some(library));
        self.inputs = inputs;
        self.outputs = outputs;
    }
}
