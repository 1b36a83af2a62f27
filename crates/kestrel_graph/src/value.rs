// SPDX-License-Identifier: MIT OR Apache-2.0
//! Runtime values flowing through data ports, and the coercion table
//! the executor applies when a connection crosses type boundaries.

use serde::{Deserialize, Serialize};

/// Declared type of a data port
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueType {
    /// Matches any value (generic ports)
    Any,
    /// Boolean value
    Bool,
    /// 32-bit integer
    Int,
    /// 32-bit float
    Float,
    /// 64-bit float
    Double,
    /// String value
    String,
    /// Ordered list of values
    List,
}

impl ValueType {
    /// Whether this type belongs to the numeric group
    pub fn is_numeric(&self) -> bool {
        matches!(self, Self::Int | Self::Float | Self::Double)
    }

    /// The value used when a port of this type has no default and no connection.
    ///
    /// `Any` has no natural zero; `false` stands in for it.
    pub fn default_value(&self) -> Value {
        match self {
            Self::Any | Self::Bool => Value::Bool(false),
            Self::Int => Value::Int(0),
            Self::Float => Value::Float(0.0),
            Self::Double => Value::Double(0.0),
            Self::String => Value::String(String::new()),
            Self::List => Value::List(Vec::new()),
        }
    }
}

/// A value carried by a data port or a token-local slot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// Boolean
    Bool(bool),
    /// Integer
    Int(i32),
    /// Float
    Float(f32),
    /// Double
    Double(f64),
    /// String
    String(String),
    /// List of values
    List(Vec<Value>),
}

impl Value {
    /// Get the declared type for this value
    pub fn value_type(&self) -> ValueType {
        match self {
            Self::Bool(_) => ValueType::Bool,
            Self::Int(_) => ValueType::Int,
            Self::Float(_) => ValueType::Float,
            Self::Double(_) => ValueType::Double,
            Self::String(_) => ValueType::String,
            Self::List(_) => ValueType::List,
        }
    }

    /// Truthiness under the nonzero-is-true convention
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            Self::Int(i) => Some(*i != 0),
            Self::Float(f) => Some(*f != 0.0),
            Self::Double(d) => Some(*d != 0.0),
            Self::String(_) | Self::List(_) => None,
        }
    }

    /// Numeric view as the widest float type
    pub fn as_double(&self) -> Option<f64> {
        match self {
            Self::Bool(b) => Some(f64::from(u8::from(*b))),
            Self::Int(i) => Some(f64::from(*i)),
            Self::Float(f) => Some(f64::from(*f)),
            Self::Double(d) => Some(*d),
            Self::String(_) | Self::List(_) => None,
        }
    }

    /// Render as a display string (everything is string-representable)
    pub fn display(&self) -> String {
        match self {
            Self::Bool(b) => b.to_string(),
            Self::Int(i) => i.to_string(),
            Self::Float(f) => f.to_string(),
            Self::Double(d) => d.to_string(),
            Self::String(s) => s.clone(),
            Self::List(items) => {
                let parts: Vec<String> = items.iter().map(Value::display).collect();
                format!("[{}]", parts.join(", "))
            }
        }
    }

    /// Coerce this value to a declared port type.
    ///
    /// Follows the connection compatibility table: exact and `Any` pass
    /// through, numeric types convert freely, bool converts to/from
    /// numeric, and `String` converts both ways (parsing on the way in).
    pub fn coerce(&self, target: ValueType) -> Result<Value, CoercionError> {
        if target == ValueType::Any || self.value_type() == target {
            return Ok(self.clone());
        }

        let fail = || CoercionError {
            from: self.value_type(),
            to: target,
        };

        match target {
            ValueType::Bool => match self {
                Self::String(s) => s.parse::<bool>().map(Value::Bool).map_err(|_| fail()),
                _ => self.as_bool().map(Value::Bool).ok_or_else(fail),
            },
            ValueType::Int => match self {
                Self::String(s) => s.trim().parse::<i32>().map(Value::Int).map_err(|_| fail()),
                _ => self.as_double().map(|d| Value::Int(d as i32)).ok_or_else(fail),
            },
            ValueType::Float => match self {
                Self::String(s) => s.trim().parse::<f32>().map(Value::Float).map_err(|_| fail()),
                _ => self
                    .as_double()
                    .map(|d| Value::Float(d as f32))
                    .ok_or_else(fail),
            },
            ValueType::Double => match self {
                Self::String(s) => s.trim().parse::<f64>().map(Value::Double).map_err(|_| fail()),
                _ => self.as_double().map(Value::Double).ok_or_else(fail),
            },
            ValueType::String => Ok(Value::String(self.display())),
            ValueType::List => Err(fail()),
            // Any was handled by the pass-through above.
            ValueType::Any => Ok(self.clone()),
        }
    }
}

/// A value could not be represented as the requested type
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("cannot represent {from:?} as {to:?}")]
pub struct CoercionError {
    /// Type of the value being converted
    pub from: ValueType,
    /// Requested target type
    pub to: ValueType,
}
