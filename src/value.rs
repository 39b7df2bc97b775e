//! Dynamic component values
//!
//! Component records are plain data: a record is an ordered map from field
//! name to [`Value`], and `Value` is a closed set of shapes (booleans,
//! integers, floats, strings, lists, nested records). There is no callable
//! variant, so records can never smuggle behavior into storage.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A single field value inside a component record.
///
/// Serializes untagged, so a snapshot of `{ "x": 2, "name": "elk" }` reads as
/// exactly that JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<Value>),
    Record(Record),
}

/// An ordered field map. Ordering keeps snapshots and diffs deterministic.
pub type Record = BTreeMap<String, Value>;

impl Value {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }

    /// Numeric read; integer values coerce to f64.
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(n) => Some(*n as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_record(&self) -> Option<&Record> {
        match self {
            Value::Record(r) => Some(r),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Int(n as i64)
    }
}

impl From<u64> for Value {
    fn from(n: u64) -> Self {
        Value::Int(n as i64)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::List(items)
    }
}

impl From<Record> for Value {
    fn from(r: Record) -> Self {
        Value::Record(r)
    }
}

/// Deep-merges `patch` into `base`.
///
/// Nested records merge field-by-field; every other shape (including lists)
/// replaces wholesale. Fields present only in `patch` are added, so ad hoc
/// fields survive a merge against a descriptor's defaults.
pub fn merge_record(base: &mut Record, patch: &Record) {
    for (field, incoming) in patch {
        match (base.get_mut(field), incoming) {
            (Some(Value::Record(existing)), Value::Record(update)) => {
                merge_record(existing, update);
            }
            _ => {
                base.insert(field.clone(), incoming.clone());
            }
        }
    }
}

/// Builds a [`Record`] literal.
///
/// ```
/// use microcosm::record;
/// let r = record! { "x" => 2.0, "y" => 4.0, "label" => "elk" };
/// assert_eq!(r.len(), 3);
/// ```
#[macro_export]
macro_rules! record {
    () => { $crate::value::Record::new() };
    ($($field:expr => $value:expr),+ $(,)?) => {{
        let mut record = $crate::value::Record::new();
        $(record.insert($field.to_string(), $crate::value::Value::from($value));)+
        record
    }};
}
