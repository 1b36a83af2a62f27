// SPDX-License-Identifier: MIT OR Apache-2.0
//! Script graph data model for the Kestrel engine.
//!
//! This crate provides the static side of visual scripting:
//! - Typed input/output ports (data and execution)
//! - Nodes with a tagged-union behavior descriptor
//! - Connections addressed by node ID and port name
//! - Whole-graph validation
//! - Serialization support
//!
//! Execution lives in `kestrel_runtime`, which consumes this model
//! read-only.

pub mod connection;
pub mod graph;
pub mod node;
pub mod port;
pub mod validation;
pub mod value;

pub use connection::{Connection, ConnectionId};
pub use graph::{ConnectError, Graph, GraphId, GraphLibrary};
pub use node::{ActionOp, FlowOp, Node, NodeId, NodeKind, PureOp};
pub use port::{Port, PortCapacity, PortDirection, PortKind};
pub use validation::{validate, ValidationIssue};
pub use value::{CoercionError, Value, ValueType};
