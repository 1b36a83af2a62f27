// SPDX-License-Identifier: MIT OR Apache-2.0
//! Adapter seam for host side-effecting nodes.
//!
//! Nodes that touch engine objects, UI state, or anything else outside the
//! graph are opaque to the executor: it resolves their declared data
//! inputs, hands them to the registered behavior, and publishes whatever
//! outputs come back. The behavior never sees tokens or graphs.

use indexmap::IndexMap;
use kestrel_graph::Value;
use std::collections::HashMap;

/// A host-side behavior invoked by an external-action node
pub trait ExternalAction: Send {
    /// Run the behavior with the node's resolved data inputs, returning
    /// values for its data outputs (by port name)
    fn run(
        &mut self,
        inputs: &HashMap<String, Value>,
    ) -> Result<HashMap<String, Value>, ExternalError>;
}

/// An external behavior reported a failure
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct ExternalError(pub String);

/// Registry of external behaviors, looked up by the name an
/// external-action node declares
#[derive(Default)]
pub struct ExternalRegistry {
    actions: IndexMap<String, Box<dyn ExternalAction>>,
}

impl ExternalRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            actions: IndexMap::new(),
        }
    }

    /// Register a behavior under a name, replacing any previous one
    pub fn register(&mut self, name: impl Into<String>, action: Box<dyn ExternalAction>) {
        self.actions.insert(name.into(), action);
    }

    /// Look up a behavior by name
    pub fn get_mut(&mut self, name: &str) -> Option<&mut Box<dyn ExternalAction>> {
        self.actions.get_mut(name)
    }

    /// Number of registered behaviors
    pub fn len(&self) -> usize {
        self.actions.len()
    }

    /// Whether no behaviors are registered
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

impl std::fmt::Debug for ExternalRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExternalRegistry")
            .field("actions", &self.actions.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl<F> ExternalAction for F
where
    F: FnMut(&HashMap<String, Value>) -> Result<HashMap<String, Value>, ExternalError> + Send,
{
    fn run(
        &mut self,
        inputs: &HashMap<String, Value>,
    ) -> Result<HashMap<String, Value>, ExternalError> {
        self(inputs)
    }
}
