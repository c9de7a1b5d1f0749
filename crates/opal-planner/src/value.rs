//! Runtime values produced by resolving expressions.
//!
//! These are intentionally coarse -- the planner never computes with values in
//! any deep sense, it only needs enough structure to evaluate blocker conditions,
//! iterate `for` collections, and format values into command strings and
//! `LogicNode` display text.

use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<Value>),
    Map(IndexMap<String, Value>),
}

impl Value {
    /// Truthiness used by `if`/`when` condition evaluation.
    ///
    /// Mirrors common shell-adjacent scripting conventions: empty string, zero,
    /// empty collections and null are falsy.
    #[must_use]
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::List(items) => !items.is_empty(),
            Value::Map(entries) => !entries.is_empty(),
        }
    }

    /// Renders a value the way it would appear interpolated into a command string.
    #[must_use]
    pub fn display_text(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::Bool(b) => b.to_string(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => f.to_string(),
            Value::Str(s) => s.clone(),
            Value::List(items) => {
                let parts: Vec<String> = items.iter().map(Value::display_text).collect();
                parts.join(" ")
            }
            Value::Map(entries) => {
                let parts: Vec<String> =
                    entries.iter().map(|(k, v)| format!("{k}={}", v.display_text())).collect();
                parts.join(" ")
            }
        }
    }

    /// Returns the elements to iterate over for a `for` blocker, or `None` if
    /// this value is not iterable (a [`crate::error::ResolverError::ConditionTypeError`]
    /// at the call site).
    #[must_use]
    pub fn iter_elements(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.display_text())
    }
}
