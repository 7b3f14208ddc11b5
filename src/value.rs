// src/value.rs - Tag value type and primitive classification

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use std::fmt;

/// Last-seen value of a single tag.
///
/// Update payloads arrive as JSON objects; only primitive members become
/// `Value`s (see [`Value::from_json`]). Numeric text is remembered so that
/// repeated inputs deduplicate, but it never reaches trigger evaluation.
///
/// # Examples
///
/// ```rust
/// use tagwatch::Value;
///
/// let reading = Value::from_json(&serde_json::json!(23.5)).unwrap();
/// assert_eq!(reading.as_number(), Some(23.5));
///
/// // Nested payloads are not tag readings
/// assert!(Value::from_json(&serde_json::json!({"nested": 1})).is_none());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// Boolean reading (digital status)
    Bool(bool),
    /// Integer reading
    Int(i64),
    /// Floating-point reading
    Float(f64),
    /// Numeric text reading
    Text(String),
}

impl Value {
    /// Classify a JSON payload member, keeping only primitives.
    ///
    /// Numbers and booleans qualify, as does text that parses as a finite
    /// number. Nested objects, arrays, null and other text are rejected.
    pub fn from_json(json: &Json) -> Option<Self> {
        match json {
            Json::Bool(b) => Some(Value::Bool(*b)),
            Json::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Some(Value::Int(i))
                } else {
                    n.as_f64().filter(|f| f.is_finite()).map(Value::Float)
                }
            }
            Json::String(s) => s
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|f| f.is_finite())
                .map(|_| Value::Text(s.clone())),
            _ => None,
        }
    }

    /// Numeric view used by trigger evaluation.
    ///
    /// Booleans normalize to 1/0. Text has no numeric view: text values
    /// participate in change detection only.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            Value::Text(_) => None,
        }
    }
}

// Strict by kind, except that integer and float readings compare
// numerically: JSON does not distinguish 5 from 5.0. A boolean never
// equals 1 and text never equals a number.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Text(a), Value::Text(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Int(a), Value::Float(b)) | (Value::Float(b), Value::Int(a)) => *a as f64 == *b,
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(v) => write!(f, "{}", v),
            Value::Text(s) => write!(f, "{}", s),
        }
    }
}
