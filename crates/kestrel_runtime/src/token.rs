// SPDX-License-Identifier: MIT OR Apache-2.0
//! Execution tokens: the in-flight control-flow cursors of a running graph.
//!
//! A token carries everything private to one strand of execution — the node
//! it targets, a key/value store for per-run data (loop item and index,
//! mapped sub-graph values), and a call stack of pending returns. Nothing
//! about an invocation lives on nodes or graphs, which is what makes
//! sub-graph reentrancy safe: two tokens inside the same graph never share
//! state.

use kestrel_graph::{GraphId, NodeId, Value};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Unique identifier for a token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TokenId(pub Uuid);

impl TokenId {
    /// Create a new random token ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TokenId {
    fn default() -> Self {
        Self::new()
    }
}

/// Token lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TokenState {
    /// Queued, waiting for a scheduling step
    #[default]
    Pending,
    /// Currently being advanced
    Running,
    /// Parked at a suspension point; a fresh token continues later
    Suspended,
    /// Reached the end of its chain
    Completed,
}

/// A pending return context: which call node to resume when the called
/// graph signals completion
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Frame {
    /// Graph the call node lives in
    pub graph: GraphId,
    /// The sub-graph-invocation node
    pub call_node: NodeId,
}

/// A single in-flight control-flow cursor
#[derive(Debug, Clone)]
pub struct Token {
    /// Unique token ID
    pub id: TokenId,
    /// Graph currently being executed
    pub graph: GraphId,
    /// Node this token targets
    pub node: NodeId,
    /// Input execution port the token arrived at (empty for spawned tokens)
    pub port: String,
    /// Lifecycle state
    pub state: TokenState,
    /// Private key/value data, local to this token only
    locals: HashMap<String, Value>,
    /// Pending return contexts, innermost last
    stack: Vec<Frame>,
}

impl Token {
    /// Create a token targeting an entry node
    pub fn new(graph: GraphId, node: NodeId) -> Self {
        Self {
            id: TokenId::new(),
            graph,
            node,
            port: String::new(),
            state: TokenState::Pending,
            locals: HashMap::new(),
            stack: Vec::new(),
        }
    }

    /// Fork a successor token targeting another node.
    ///
    /// The call stack and locals are copied, never shared: each forked
    /// token must be able to diverge and return independently.
    pub fn fork(&self, node: NodeId, port: impl Into<String>) -> Self {
        Self {
            id: TokenId::new(),
            graph: self.graph,
            node,
            port: port.into(),
            state: TokenState::Pending,
            locals: self.locals.clone(),
            stack: self.stack.clone(),
        }
    }

    /// Read a token-local value
    pub fn local(&self, key: &str) -> Option<&Value> {
        self.locals.get(key)
    }

    /// Write a token-local value
    pub fn set_local(&mut self, key: impl Into<String>, value: Value) {
        self.locals.insert(key.into(), value);
    }

    /// All token-local values
    pub fn locals(&self) -> &HashMap<String, Value> {
        &self.locals
    }

    /// Replace the local store wholesale (used when a suspension resumes)
    pub fn set_locals(&mut self, locals: HashMap<String, Value>) {
        self.locals = locals;
    }

    /// Push a pending return context
    pub fn push_frame(&mut self, frame: Frame) {
        self.stack.push(frame);
    }

    /// Pop the innermost return context
    pub fn pop_frame(&mut self) -> Option<Frame> {
        self.stack.pop()
    }

    /// The call stack, innermost last
    pub fn stack(&self) -> &[Frame] {
        &self.stack
    }

    /// Call depth (number of pending returns)
    pub fn depth(&self) -> usize {
        self.stack.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fork_copies_stack_and_locals() {
        let graph = GraphId::new();
        let mut token = Token::new(graph, NodeId::new());
        token.set_local("Index", Value::Int(3));
        token.push_frame(Frame {
            graph,
            call_node: NodeId::new(),
        });

        let mut forked = token.fork(NodeId::new(), "Exec");
        assert_eq!(forked.local("Index"), Some(&Value::Int(3)));
        assert_eq!(forked.depth(), 1);

        // Divergence in the fork must not leak back.
        forked.set_local("Index", Value::Int(4));
        forked.pop_frame();
        assert_eq!(token.local("Index"), Some(&Value::Int(3)));
        assert_eq!(token.depth(), 1);
        assert_ne!(token.id, forked.id);
    }
}
