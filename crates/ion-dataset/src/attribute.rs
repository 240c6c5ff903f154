// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Named metadata attached to groups and variables.

use serde::{Deserialize, Serialize};

use crate::DataType;

/// Scalar or array-valued attribute payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AttributeValue {
    /// String value.
    Text(String),
    /// Double scalar.
    Float64(f64),
    /// Integer scalar.
    Int64(i64),
    /// Double array.
    Float64Array(Vec<f64>),
    /// Integer array.
    Int64Array(Vec<i64>),
}

/// `{name, data_type, value}` metadata entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attribute {
    /// Attribute name.
    pub name: String,
    /// Attribute payload.
    pub value: AttributeValue,
}

impl Attribute {
    /// Build an attribute.
    pub fn new(name: impl Into<String>, value: AttributeValue) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }

    /// Text attribute.
    pub fn text(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(name, AttributeValue::Text(value.into()))
    }

    /// Double attribute.
    pub fn float(name: impl Into<String>, value: f64) -> Self {
        Self::new(name, AttributeValue::Float64(value))
    }

    /// Element type of the payload.
    pub fn data_type(&self) -> DataType {
        match self.value {
            AttributeValue::Text(_) => DataType::Text,
            AttributeValue::Float64(_) | AttributeValue::Float64Array(_) => DataType::Float64,
            AttributeValue::Int64(_) | AttributeValue::Int64Array(_) => DataType::Int64,
        }
    }

    /// Text payload, if the attribute is a string.
    pub fn as_text(&self) -> Option<&str> {
        match &self.value {
            AttributeValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Scalar numeric payload as `f64`. Numeric strings are accepted since
    /// producers frequently ship bounds as text.
    #[allow(clippy::cast_precision_loss)]
    pub fn as_f64(&self) -> Option<f64> {
        match &self.value {
            AttributeValue::Float64(v) => Some(*v),
            AttributeValue::Int64(v) => Some(*v as f64),
            AttributeValue::Text(s) => s.trim().parse().ok(),
            AttributeValue::Float64Array(_) | AttributeValue::Int64Array(_) => None,
        }
    }
}
