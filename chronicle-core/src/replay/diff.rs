//! Structural comparison of recorded and replayed values
//!
//! Differences are reported for every diverging path, in a stable order:
//! mapping keys sorted, sequence indices ascending. The root is `$`; nested
//! paths read `a.b[2]`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::fmt;

/// How a value diverged at one path
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DifferenceKind {
    /// Same type, different value
    ValueMismatch { expected: Value, actual: Value },

    /// Different types; integers and floats count as different types
    TypeMismatch { expected: Value, actual: Value },

    /// Key recorded but absent from the new output
    MissingKey { expected: Value },

    /// Key present only in the new output
    UnexpectedKey { actual: Value },

    /// Sequences of different lengths; the shared prefix is compared
    /// element by element
    LengthMismatch { expected: usize, actual: usize },
}

/// One diverging path
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValueDifference {
    pub path: String,
    #[serde(flatten)]
    pub kind: DifferenceKind,
}

impl fmt::Display for ValueDifference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            DifferenceKind::ValueMismatch { expected, actual } => {
                write!(f, "{}: expected {}, got {}", self.path, expected, actual)
            }
            DifferenceKind::TypeMismatch { expected, actual } => write!(
                f,
                "{}: expected {} ({}), got {} ({})",
                self.path,
                expected,
                type_name(expected),
                actual,
                type_name(actual)
            ),
            DifferenceKind::MissingKey { expected } => {
                write!(f, "{}: missing, expected {}", self.path, expected)
            }
            DifferenceKind::UnexpectedKey { actual } => {
                write!(f, "{}: unexpected key with {}", self.path, actual)
            }
            DifferenceKind::LengthMismatch { expected, actual } => write!(
                f,
                "{}: expected {} items, got {}",
                self.path, expected, actual
            ),
        }
    }
}

/// Every difference between `expected` and `actual`
pub fn diff_values(expected: &Value, actual: &Value) -> Vec<ValueDifference> {
    let mut differences = Vec::new();
    diff_at("$", expected, actual, &mut differences);
    differences
}

fn diff_at(path: &str, expected: &Value, actual: &Value, out: &mut Vec<ValueDifference>) {
    if type_name(expected) != type_name(actual) {
        out.push(ValueDifference {
            path: path.to_string(),
            kind: DifferenceKind::TypeMismatch {
                expected: expected.clone(),
                actual: actual.clone(),
            },
        });
        return;
    }

    match (expected, actual) {
        (Value::Object(old), Value::Object(new)) => diff_maps(path, old, new, out),
        (Value::Array(old), Value::Array(new)) => {
            if old.len() != new.len() {
                out.push(ValueDifference {
                    path: path.to_string(),
                    kind: DifferenceKind::LengthMismatch {
                        expected: old.len(),
                        actual: new.len(),
                    },
                });
            }
            for (index, (old_item, new_item)) in old.iter().zip(new).enumerate() {
                diff_at(&index_path(path, index), old_item, new_item, out);
            }
        }
        _ => {
            if expected != actual {
                out.push(ValueDifference {
                    path: path.to_string(),
                    kind: DifferenceKind::ValueMismatch {
                        expected: expected.clone(),
                        actual: actual.clone(),
                    },
                });
            }
        }
    }
}

fn diff_maps(
    path: &str,
    old: &Map<String, Value>,
    new: &Map<String, Value>,
    out: &mut Vec<ValueDifference>,
) {
    let keys: BTreeSet<&String> = old.keys().chain(new.keys()).collect();
    for key in keys {
        let child = key_path(path, key);
        match (old.get(key), new.get(key)) {
            (Some(old_value), Some(new_value)) => diff_at(&child, old_value, new_value, out),
            (Some(old_value), None) => out.push(ValueDifference {
                path: child,
                kind: DifferenceKind::MissingKey {
                    expected: old_value.clone(),
                },
            }),
            (None, Some(new_value)) => out.push(ValueDifference {
                path: child,
                kind: DifferenceKind::UnexpectedKey {
                    actual: new_value.clone(),
                },
            }),
            (None, None) => {}
        }
    }
}

fn key_path(parent: &str, key: &str) -> String {
    if parent == "$" {
        key.to_string()
    } else {
        format!("{parent}.{key}")
    }
}

fn index_path(parent: &str, index: usize) -> String {
    if parent == "$" {
        format!("[{index}]")
    } else {
        format!("{parent}[{index}]")
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(n) if n.is_f64() => "float",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "sequence",
        Value::Object(_) => "mapping",
    }
}
