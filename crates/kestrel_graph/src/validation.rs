// SPDX-License-Identifier: MIT OR Apache-2.0
//! Whole-graph validation, run before execution rather than per tick.
//!
//! Validation executes no node logic and has no side effects: it re-checks
//! every connection against the compatibility table (edits made after a
//! wire existed, stale names left by a port rebuild) and flags unconnected
//! required inputs. A graph with any issue should not be executed.

use crate::connection::ConnectionId;
use crate::graph::Graph;
use crate::node::NodeId;
use crate::port::{PortCapacity, PortDirection};

/// A single validation failure
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationIssue {
    /// A required input port has no incoming connection
    #[error("required input '{port}' on node {node:?} is unconnected")]
    MissingRequiredInput {
        /// Node owning the port
        node: NodeId,
        /// Port name
        port: String,
    },

    /// A connection references a node that no longer exists
    #[error("connection {connection:?} references missing node {node:?}")]
    MissingNode {
        /// Offending connection
        connection: ConnectionId,
        /// Missing node ID
        node: NodeId,
    },

    /// A connection references a port that no longer exists (typically a
    /// stale name left behind by a port rebuild)
    #[error("connection {connection:?} references missing port '{port}' on node {node:?}")]
    DanglingPort {
        /// Offending connection
        connection: ConnectionId,
        /// Node that was searched
        node: NodeId,
        /// Missing port name
        port: String,
    },

    /// A connection pairs ports the compatibility table rejects
    #[error("connection {connection:?} joins incompatible ports '{from_port}' and '{to_port}'")]
    IncompatibleConnection {
        /// Offending connection
        connection: ConnectionId,
        /// Source port name
        from_port: String,
        /// Destination port name
        to_port: String,
    },

    /// A single-capacity input has more than one incoming connection
    #[error("input '{port}' on node {node:?} has {count} connections but capacity one")]
    InputOverSubscribed {
        /// Node owning the port
        node: NodeId,
        /// Port name
        port: String,
        /// Number of incoming connections
        count: usize,
    },

    /// Two ports on the same node share a name and direction
    #[error("node {node:?} declares port '{port}' more than once")]
    DuplicatePort {
        /// Offending node
        node: NodeId,
        /// Duplicated port name
        port: String,
    },
}

/// Validate a graph, returning every issue found.
///
/// An empty result means the graph is safe to execute.
pub fn validate(graph: &Graph) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();

    for node in graph.nodes() {
        check_duplicate_ports(node, &mut issues);

        for port in &node.inputs {
            let incoming = graph.connections_to(node.id, &port.name).count();
            if port.required && incoming == 0 {
                issues.push(ValidationIssue::MissingRequiredInput {
                    node: node.id,
                    port: port.name.clone(),
                });
            }
            if port.capacity == PortCapacity::Single && incoming > 1 {
                issues.push(ValidationIssue::InputOverSubscribed {
                    node: node.id,
                    port: port.name.clone(),
                    count: incoming,
                });
            }
        }
    }

    for connection in graph.connections() {
        let Some(source) = graph.node(connection.from_node) else {
            issues.push(ValidationIssue::MissingNode {
                connection: connection.id,
                node: connection.from_node,
            });
            continue;
        };
        let Some(dest) = graph.node(connection.to_node) else {
            issues.push(ValidationIssue::MissingNode {
                connection: connection.id,
                node: connection.to_node,
            });
            continue;
        };

        let Some(from_port) = source.output(&connection.from_port) else {
            issues.push(ValidationIssue::DanglingPort {
                connection: connection.id,
                node: source.id,
                port: connection.from_port.clone(),
            });
            continue;
        };
        let Some(to_port) = dest.input(&connection.to_port) else {
            issues.push(ValidationIssue::DanglingPort {
                connection: connection.id,
                node: dest.id,
                port: connection.to_port.clone(),
            });
            continue;
        };

        if !from_port.can_connect(to_port) {
            issues.push(ValidationIssue::IncompatibleConnection {
                connection: connection.id,
                from_port: connection.from_port.clone(),
                to_port: connection.to_port.clone(),
            });
        }
    }

    issues
}

fn check_duplicate_ports(node: &crate::node::Node, issues: &mut Vec<ValidationIssue>) {
    let mut seen: Vec<(&str, PortDirection)> = Vec::new();
    for port in node.ports() {
        if seen.contains(&(port.name.as_str(), port.direction)) {
            issues.push(ValidationIssue::DuplicatePort {
                node: node.id,
                port: port.name.clone(),
            });
        } else {
            seen.push((port.name.as_str(), port.direction));
        }
    }
}
