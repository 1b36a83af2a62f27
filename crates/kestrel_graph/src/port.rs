// SPDX-License-Identifier: MIT OR Apache-2.0
//! Port definitions for node inputs/outputs.
//!
//! A port is a named, typed, directional attachment point. Data ports carry
//! values; execution ports carry control flow. Compatibility between ports
//! is a pure function used both while authoring (to filter candidate
//! connections) and by validation (to catch stale saved graphs).

use crate::value::{Value, ValueType};
use serde::{Deserialize, Serialize};

/// Port direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PortDirection {
    /// Input port
    Input,
    /// Output port
    Output,
}

/// What a port carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PortKind {
    /// A value, pulled on demand
    Data,
    /// Control flow
    Execution,
}

/// How many connections a port accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PortCapacity {
    /// At most one incoming connection
    Single,
    /// Arbitrarily many connections
    Multi,
}

/// A port on a node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Port {
    /// Port name, unique within its node and direction
    pub name: String,
    /// Display label (defaults to the name)
    pub label: String,
    /// Port direction
    pub direction: PortDirection,
    /// Data or execution
    pub kind: PortKind,
    /// Declared value type (execution ports use `Any`)
    pub value_type: ValueType,
    /// Connection capacity
    pub capacity: PortCapacity,
    /// Whether validation requires an incoming connection
    pub required: bool,
    /// Default value used when an input is unconnected
    pub default_value: Option<Value>,
    /// Relative probability weight (weighted execution outputs only)
    pub weight: Option<f32>,
}

impl Port {
    /// Create a data input port
    pub fn input(name: impl Into<String>, value_type: ValueType) -> Self {
        let name = name.into();
        Self {
            label: name.clone(),
            name,
            direction: PortDirection::Input,
            kind: PortKind::Data,
            value_type,
            capacity: PortCapacity::Single,
            required: false,
            default_value: None,
            weight: None,
        }
    }

    /// Create a data output port
    pub fn output(name: impl Into<String>, value_type: ValueType) -> Self {
        let name = name.into();
        Self {
            label: name.clone(),
            name,
            direction: PortDirection::Output,
            kind: PortKind::Data,
            value_type,
            capacity: PortCapacity::Multi,
            required: false,
            default_value: None,
            weight: None,
        }
    }

    /// Create an execution input port.
    ///
    /// Execution inputs accept fan-in: any number of sources may trigger
    /// the same entry point.
    pub fn exec_in(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            label: name.clone(),
            name,
            direction: PortDirection::Input,
            kind: PortKind::Execution,
            value_type: ValueType::Any,
            capacity: PortCapacity::Multi,
            required: false,
            default_value: None,
            weight: None,
        }
    }

    /// Create an execution output port
    pub fn exec_out(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            label: name.clone(),
            name,
            direction: PortDirection::Output,
            kind: PortKind::Execution,
            value_type: ValueType::Any,
            capacity: PortCapacity::Multi,
            required: false,
            default_value: None,
            weight: None,
        }
    }

    /// Set the display label
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// Set the default value
    pub fn with_default(mut self, value: Value) -> Self {
        self.default_value = Some(value);
        self
    }

    /// Set the probability weight
    pub fn with_weight(mut self, weight: f32) -> Self {
        self.weight = Some(weight);
        self
    }

    /// Mark as required
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Restrict to a single incoming connection
    pub fn single(mut self) -> Self {
        self.capacity = PortCapacity::Single;
        self
    }

    /// Check whether a connection from this port to `dest` is valid.
    ///
    /// Rules, in order: direction must run Output to Input, the port kind
    /// must match, and the value types must be compatible. Pure function,
    /// no side effects.
    pub fn can_connect(&self, dest: &Port) -> bool {
        if self.direction != PortDirection::Output || dest.direction != PortDirection::Input {
            return false;
        }
        if self.kind != dest.kind {
            return false;
        }
        // Execution ports carry no value; kind equality is the whole check.
        if self.kind == PortKind::Execution {
            return true;
        }
        types_compatible(self.value_type, dest.value_type)
    }
}

/// Value-type compatibility between a source and a destination data port.
///
/// Exact matches and `Any` always connect; the numeric group converts
/// freely; bool connects to bool-or-numeric (nonzero is true); `String`
/// connects to everything. Nothing else does.
pub fn types_compatible(source: ValueType, dest: ValueType) -> bool {
    if source == dest {
        return true;
    }
    if source == ValueType::Any || dest == ValueType::Any {
        return true;
    }
    if source.is_numeric() && dest.is_numeric() {
        return true;
    }
    if (source == ValueType::Bool && dest.is_numeric())
        || (dest == ValueType::Bool && source.is_numeric())
    {
        return true;
    }
    if source == ValueType::String || dest == ValueType::String {
        return true;
    }
    false
}
