//! Values held by the reference host.

use std::collections::HashMap;
use std::fmt;

use hostbatch_core::{HostType, ObjectRef, Scalar};
use serde_json::Value as JsonValue;

use crate::error::HostError;

/// A value on the host side of the wire.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum HostValue {
    #[default]
    Null,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    String(String),
    Array(Vec<HostValue>),
    /// Plain data with string keys.
    Object(HashMap<String, HostValue>),
    /// An object living in the host heap.
    Reference(ObjectRef),
}

impl HostValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            HostValue::Null => "null",
            HostValue::Boolean(_) => "boolean",
            HostValue::Integer(_) => "integer",
            HostValue::Float(_) => "float",
            HostValue::String(_) => "string",
            HostValue::Array(_) => "array",
            HostValue::Object(_) => "object",
            HostValue::Reference(_) => "reference",
        }
    }

    /// Coerce this value to a string for printing.
    pub fn to_string_value(&self) -> String {
        match self {
            HostValue::Null => "null".to_string(),
            HostValue::Boolean(b) => b.to_string(),
            HostValue::Integer(i) => i.to_string(),
            HostValue::Float(n) => {
                if n.is_nan() {
                    "NaN".to_string()
                } else if n.is_infinite() {
                    if *n > 0.0 { "Infinity" } else { "-Infinity" }.to_string()
                } else {
                    n.to_string()
                }
            }
            HostValue::String(s) => s.clone(),
            HostValue::Array(items) => {
                let items: Vec<String> = items.iter().map(|v| v.to_string_value()).collect();
                items.join(", ")
            }
            HostValue::Object(_) => "[object Object]".to_string(),
            HostValue::Reference(reference) => format!("[{reference}]"),
        }
    }

    /// Read a wire value. Reference tokens become [`HostValue::Reference`].
    pub fn from_json(json: &JsonValue) -> HostValue {
        if let Some(reference) = ObjectRef::from_json(json) {
            return HostValue::Reference(reference);
        }
        match json {
            JsonValue::Null => HostValue::Null,
            JsonValue::Bool(b) => HostValue::Boolean(*b),
            JsonValue::Number(n) => match n.as_i64() {
                Some(i) => HostValue::Integer(i),
                None => HostValue::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            JsonValue::String(s) => HostValue::String(s.clone()),
            JsonValue::Array(items) => HostValue::Array(items.iter().map(HostValue::from_json).collect()),
            JsonValue::Object(map) => HostValue::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), HostValue::from_json(v)))
                    .collect(),
            ),
        }
    }

    /// Write this value for the response map. Non-finite floats become
    /// `null`.
    pub fn to_json(&self) -> JsonValue {
        match self {
            HostValue::Null => JsonValue::Null,
            HostValue::Boolean(b) => JsonValue::Bool(*b),
            HostValue::Integer(i) => JsonValue::from(*i),
            HostValue::Float(n) => serde_json::Number::from_f64(*n)
                .map(JsonValue::Number)
                .unwrap_or(JsonValue::Null),
            HostValue::String(s) => JsonValue::String(s.clone()),
            HostValue::Array(items) => JsonValue::Array(items.iter().map(HostValue::to_json).collect()),
            HostValue::Object(map) => JsonValue::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
            HostValue::Reference(reference) => reference.encode(),
        }
    }

    /// The operand form used by `compute`.
    pub fn to_scalar(&self) -> Result<Scalar, HostError> {
        match self {
            HostValue::Integer(i) => Ok(Scalar::Int(*i)),
            HostValue::Float(n) => Ok(Scalar::Float(*n)),
            HostValue::Boolean(b) => Ok(Scalar::Bool(*b)),
            HostValue::String(s) => Ok(Scalar::Text(s.clone())),
            other => Err(HostError::Runtime(format!(
                "cannot compute with a {} operand",
                other.type_name()
            ))),
        }
    }

    pub fn from_scalar(scalar: Scalar) -> HostValue {
        match scalar {
            Scalar::Int(i) => HostValue::Integer(i),
            Scalar::Float(n) => HostValue::Float(n),
            Scalar::Bool(b) => HostValue::Boolean(b),
            Scalar::Text(s) => HostValue::String(s),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            HostValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, HostValue::Null)
    }
}

impl fmt::Display for HostValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_string_value())
    }
}

impl From<&str> for HostValue {
    fn from(s: &str) -> Self {
        HostValue::String(s.to_string())
    }
}

impl From<i64> for HostValue {
    fn from(i: i64) -> Self {
        HostValue::Integer(i)
    }
}

impl From<f64> for HostValue {
    fn from(n: f64) -> Self {
        HostValue::Float(n)
    }
}

impl From<bool> for HostValue {
    fn from(b: bool) -> Self {
        HostValue::Boolean(b)
    }
}
