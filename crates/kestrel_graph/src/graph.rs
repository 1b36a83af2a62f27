// SPDX-License-Identifier: MIT OR Apache-2.0
//! Graph data structure containing nodes and connections.
//!
//! A graph owns its nodes in an arena keyed by [`NodeId`]; connections
//! address ports by name. Execution-port cycles are legal (they express
//! loops) — the interpreter relies on token identity, not acyclicity.
//! Sub-graph references are [`GraphId`] handles resolved through a
//! [`GraphLibrary`], never ownership.

use crate::connection::{Connection, ConnectionId};
use crate::node::{FlowOp, Node, NodeId, NodeKind};
use crate::port::PortCapacity;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GraphId(pub Uuid);

impl GraphId {
    /// Create a new random graph ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for GraphId {
    fn default() -> Self {
        Self::new()
    }
}

/// A script graph
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Graph {
    /// Unique graph ID
    pub id: GraphId,
    /// Graph name
    pub name: String,
    /// Nodes in the graph
    nodes: IndexMap<NodeId, Node>,
    /// Connections between ports
    connections: IndexMap<ConnectionId, Connection>,
}

impl Graph {
    /// Create a new empty graph
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: GraphId::new(),
            name: name.into(),
            nodes: IndexMap::new(),
            connections: IndexMap::new(),
        }
    }

    /// Add a node to the graph
    pub fn add_node(&mut self, node: Node) -> NodeId {
        let id = node.id;
        self.nodes.insert(id, node);
        id
    }

    /// Remove a node and its connections
    pub fn remove_node(&mut self, node_id: NodeId) -> Option<Node> {
        self.connections.retain(|_, c| !c.involves_node(node_id));
        self.nodes.swap_remove(&node_id)
    }

    /// Get a node by ID
    pub fn node(&self, node_id: NodeId) -> Option<&Node> {
        self.nodes.get(&node_id)
    }

    /// Get a mutable node by ID
    pub fn node_mut(&mut self, node_id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(&node_id)
    }

    /// Get all nodes
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    /// Get the number of nodes
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Add a connection between named ports.
    ///
    /// Checks the same rules validation re-checks later: both ports must
    /// exist in the right direction, the compatibility table must allow
    /// the pair, and a single-capacity input accepts only one wire. Data
    /// self-loops are rejected here (the authoring surface is responsible
    /// for keeping data flow acyclic); execution self-loops are legal.
    pub fn connect(
        &mut self,
        from_node: NodeId,
        from_port: &str,
        to_node: NodeId,
        to_port: &str,
    ) -> Result<ConnectionId, ConnectError> {
        let source_node = self
            .nodes
            .get(&from_node)
            .ok_or(ConnectError::NodeNotFound(from_node))?;
        let dest_node = self
            .nodes
            .get(&to_node)
            .ok_or(ConnectError::NodeNotFound(to_node))?;

        let source_port = source_node.output(from_port).ok_or_else(|| {
            ConnectError::PortNotFound {
                node: from_node,
                port: from_port.to_string(),
            }
        })?;
        let dest_port = dest_node.input(to_port).ok_or_else(|| {
            ConnectError::PortNotFound {
                node: to_node,
                port: to_port.to_string(),
            }
        })?;

        if !source_port.can_connect(dest_port) {
            return Err(ConnectError::Incompatible {
                from_port: from_port.to_string(),
                to_port: to_port.to_string(),
            });
        }

        if dest_port.capacity == PortCapacity::Single
            && self
                .connections
                .values()
                .any(|c| c.to_node == to_node && c.to_port == to_port)
        {
            return Err(ConnectError::AlreadyConnected {
                node: to_node,
                port: to_port.to_string(),
            });
        }

        if from_node == to_node && source_port.kind == crate::port::PortKind::Data {
            return Err(ConnectError::DataSelfLoop(from_node));
        }

        let connection = Connection::new(from_node, from_port, to_node, to_port);
        let id = connection.id;
        self.connections.insert(id, connection);
        Ok(id)
    }

    /// Remove a connection
    pub fn disconnect(&mut self, connection_id: ConnectionId) -> Option<Connection> {
        self.connections.swap_remove(&connection_id)
    }

    /// Get a connection by ID
    pub fn connection(&self, connection_id: ConnectionId) -> Option<&Connection> {
        self.connections.get(&connection_id)
    }

    /// Get all connections
    pub fn connections(&self) -> impl Iterator<Item = &Connection> {
        self.connections.values()
    }

    /// Get the number of connections
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Connections leaving a named output port, in insertion order
    pub fn connections_from<'a>(
        &'a self,
        node_id: NodeId,
        port: &'a str,
    ) -> impl Iterator<Item = &'a Connection> {
        self.connections
            .values()
            .filter(move |c| c.from_node == node_id && c.from_port == port)
    }

    /// Connections arriving at a named input port
    pub fn connections_to<'a>(
        &'a self,
        node_id: NodeId,
        port: &'a str,
    ) -> impl Iterator<Item = &'a Connection> {
        self.connections
            .values()
            .filter(move |c| c.to_node == node_id && c.to_port == port)
    }

    /// The graph's designated entry node (first `GraphEntry`), if any
    pub fn entry_node(&self) -> Option<&Node> {
        self.nodes
            .values()
            .find(|n| matches!(n.kind, NodeKind::Flow(FlowOp::GraphEntry { .. })))
    }

    /// The graph's designated exit node (first `GraphExit`), if any
    pub fn exit_node(&self) -> Option<&Node> {
        self.nodes
            .values()
            .find(|n| matches!(n.kind, NodeKind::Flow(FlowOp::GraphExit { .. })))
    }

    /// Event nodes matching a host event name
    pub fn event_nodes<'a>(&'a self, event: &'a str) -> impl Iterator<Item = &'a Node> {
        self.nodes
            .values()
            .filter(move |n| matches!(&n.kind, NodeKind::Event { name } if name == event))
    }

    /// Serialize to RON format
    pub fn to_ron(&self) -> Result<String, ron::Error> {
        ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default())
    }

    /// Deserialize from RON format
    pub fn from_ron(s: &str) -> Result<Self, ron::error::SpannedError> {
        ron::from_str(s)
    }
}

impl Default for Graph {
    fn default() -> Self {
        Self::new("Untitled")
    }
}

/// Error when creating a connection
#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    /// Node not found
    #[error("node not found: {0:?}")]
    NodeNotFound(NodeId),

    /// Port not found on the node
    #[error("port '{port}' not found on node {node:?}")]
    PortNotFound {
        /// Node that was searched
        node: NodeId,
        /// Missing port name
        port: String,
    },

    /// The compatibility table rejects this pair
    #[error("ports '{from_port}' and '{to_port}' are incompatible")]
    Incompatible {
        /// Source port name
        from_port: String,
        /// Destination port name
        to_port: String,
    },

    /// Single-capacity input already has a connection
    #[error("port '{port}' on node {node:?} already has a connection")]
    AlreadyConnected {
        /// Destination node
        node: NodeId,
        /// Destination port name
        port: String,
    },

    /// A data port may not feed the same node it belongs to
    #[error("data self-loop on node {0:?}")]
    DataSelfLoop(NodeId),
}

/// Arena of graphs addressed by [`GraphId`].
///
/// Sub-graph call nodes hold a `GraphId`; how the handle was produced
/// (asset lookup, registry) is the host's business. The executor only
/// reads graphs out of the library.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphLibrary {
    graphs: IndexMap<GraphId, Graph>,
}

impl GraphLibrary {
    /// Create a new empty library
    pub fn new() -> Self {
        Self {
            graphs: IndexMap::new(),
        }
    }

    /// Insert a graph, returning its ID
    pub fn insert(&mut self, graph: Graph) -> GraphId {
        let id = graph.id;
        self.graphs.insert(id, graph);
        id
    }

    /// Remove a graph
    pub fn remove(&mut self, id: GraphId) -> Option<Graph> {
        self.graphs.swap_remove(&id)
    }

    /// Get a graph by ID
    pub fn get(&self, id: GraphId) -> Option<&Graph> {
        self.graphs.get(&id)
    }

    /// Get a mutable graph by ID
    pub fn get_mut(&mut self, id: GraphId) -> Option<&mut Graph> {
        self.graphs.get_mut(&id)
    }

    /// Get all graphs
    pub fn graphs(&self) -> impl Iterator<Item = &Graph> {
        self.graphs.values()
    }

    /// Number of graphs in the library
    pub fn len(&self) -> usize {
        self.graphs.len()
    }

    /// Whether the library is empty
    pub fn is_empty(&self) -> bool {
        self.graphs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::PureOp;
    use crate::value::Value;

    #[test]
    fn test_connect_rejects_unknown_ports() {
        let mut graph = Graph::new("test");
        let a = graph.add_node(Node::new(NodeKind::Pure(PureOp::Literal(Value::Int(1)))));
        let b = graph.add_node(Node::new(NodeKind::Pure(PureOp::Add)));

        assert!(graph.connect(a, "Value", b, "A").is_ok());
        assert!(matches!(
            graph.connect(a, "Nope", b, "A"),
            Err(ConnectError::PortNotFound { .. })
        ));
    }

    #[test]
    fn test_single_capacity_input_accepts_one_wire() {
        let mut graph = Graph::new("test");
        let a = graph.add_node(Node::new(NodeKind::Pure(PureOp::Literal(Value::Int(1)))));
        let b = graph.add_node(Node::new(NodeKind::Pure(PureOp::Literal(Value::Int(2)))));
        let add = graph.add_node(Node::new(NodeKind::Pure(PureOp::Add)));

        assert!(graph.connect(a, "Value", add, "A").is_ok());
        assert!(matches!(
            graph.connect(b, "Value", add, "A"),
            Err(ConnectError::AlreadyConnected { .. })
        ));
        // The other input is still free.
        assert!(graph.connect(b, "Value", add, "B").is_ok());
    }

    #[test]
    fn test_exec_self_loop_is_legal_data_is_not() {
        let mut graph = Graph::new("test");
        let seq = graph.add_node(Node::new(NodeKind::Flow(FlowOp::Sequence { outputs: 2 })));
        assert!(graph.connect(seq, "Then 0", seq, "Exec").is_ok());

        let add = graph.add_node(Node::new(NodeKind::Pure(PureOp::Add)));
        assert!(matches!(
            graph.connect(add, "Result", add, "A"),
            Err(ConnectError::DataSelfLoop(_))
        ));
    }

    #[test]
    fn test_remove_node_drops_its_connections() {
        let mut graph = Graph::new("test");
        let a = graph.add_node(Node::new(NodeKind::Pure(PureOp::Literal(Value::Int(1)))));
        let add = graph.add_node(Node::new(NodeKind::Pure(PureOp::Add)));
        graph.connect(a, "Value", add, "A").unwrap();

        graph.remove_node(a);
        assert_eq!(graph.connection_count(), 0);
    }

    #[test]
    fn test_ron_round_trip() {
        let mut graph = Graph::new("round trip");
        let lit = graph.add_node(Node::new(NodeKind::Pure(PureOp::Literal(Value::Int(7)))));
        let add = graph.add_node(Node::new(NodeKind::Pure(PureOp::Add)));
        graph.connect(lit, "Value", add, "A").unwrap();

        let ron = graph.to_ron().unwrap();
        let loaded = Graph::from_ron(&ron).unwrap();
        assert_eq!(loaded.name, graph.name);
        assert_eq!(loaded.node_count(), 2);
        assert_eq!(loaded.connection_count(), 1);
    }
}
