//! Redaction of sensitive values
//!
//! Values under a denylisted field name (or dotted path) are masked with a
//! type-preserving sentinel, and strings matching a configured pattern are
//! replaced by [`REDACTED`]. Masking keeps the shape of the tree, so a
//! redacted output still diffs structurally during replay.
//!
//! Redaction is idempotent: redacting an already redacted record is a no-op.

use regex::{Regex, RegexSet};
use serde_json::{Map, Value};
use std::collections::HashSet;

use crate::config::RedactionConfig;
use crate::error::{ChronicleError, Result};
use crate::record::{CallOutcome, CallRecord};

/// Sentinel written in place of sensitive strings
pub const REDACTED: &str = "[REDACTED]";

/// Compiled redaction policy
#[derive(Debug, Clone)]
pub struct Redactor {
    enabled: bool,
    /// Lowercased field names matched against any mapping key
    fields: HashSet<String>,
    /// Lowercased dotted paths matched against the full key path
    paths: HashSet<String>,
    patterns: Vec<Regex>,
    pattern_set: RegexSet,
    max_depth: usize,
}

impl Redactor {
    /// Compile a redactor from configuration
    ///
    /// # Errors
    ///
    /// Returns a configuration error if a pattern fails to compile.
    pub fn new(config: &RedactionConfig) -> Result<Self> {
        let (paths, fields): (Vec<String>, Vec<String>) = config
            .fields
            .iter()
            .map(|f| f.to_lowercase())
            .partition(|f| f.contains('.'));

        let patterns = config
            .patterns
            .iter()
            .map(|p| Regex::new(p))
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| ChronicleError::config(format!("invalid redaction pattern: {e}")))?;
        let pattern_set = RegexSet::new(&config.patterns)
            .map_err(|e| ChronicleError::config(format!("invalid redaction pattern: {e}")))?;

        Ok(Self {
            enabled: config.enabled,
            fields: fields.into_iter().collect(),
            paths: paths.into_iter().collect(),
            patterns,
            pattern_set,
            max_depth: config.max_depth,
        })
    }

    /// A redactor that leaves everything untouched
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            fields: HashSet::new(),
            paths: HashSet::new(),
            patterns: Vec::new(),
            pattern_set: RegexSet::empty(),
            max_depth: usize::MAX,
        }
    }

    /// Redact every user-supplied value in a record
    pub fn redact(&self, mut record: CallRecord) -> CallRecord {
        if !self.enabled {
            return record;
        }

        record.args = record
            .args
            .iter()
            .map(|arg| self.redact_at(arg, "", 0))
            .collect();
        record.kwargs = self.redact_map(&record.kwargs, "", 0);

        record.outcome = match record.outcome {
            CallOutcome::Success { value } => CallOutcome::Success {
                value: self.redact_at(&value, "", 0),
            },
            CallOutcome::Error { mut error } => {
                error.message = self.scrub_text(&error.message);
                CallOutcome::Error { error }
            }
        };

        for dependency in &mut record.dependency_calls {
            dependency.target = self.scrub_text(&dependency.target);
            if let Some(error) = dependency.error.take() {
                dependency.error = Some(self.scrub_text(&error));
            }
            dependency.details = self.redact_at(&dependency.details, "", 0);
        }

        record
    }

    /// Redact a standalone value rooted at an empty path
    pub fn redact_value(&self, value: &Value) -> Value {
        if !self.enabled {
            return value.clone();
        }
        self.redact_at(value, "", 0)
    }

    fn redact_at(&self, value: &Value, path: &str, depth: usize) -> Value {
        if depth > self.max_depth {
            return Value::String(REDACTED.to_string());
        }
        match value {
            Value::String(s) => {
                if self.pattern_set.is_match(s) {
                    Value::String(REDACTED.to_string())
                } else {
                    value.clone()
                }
            }
            Value::Object(map) => Value::Object(self.redact_map(map, path, depth)),
            Value::Array(items) => Value::Array(
                items
                    .iter()
                    .map(|item| self.redact_at(item, path, depth + 1))
                    .collect(),
            ),
            _ => value.clone(),
        }
    }

    /// Redact the entries of a mapping that sits at `path`/`depth`
    fn redact_map(&self, map: &Map<String, Value>, path: &str, depth: usize) -> Map<String, Value> {
        let mut redacted = Map::new();
        for (key, value) in map {
            let lowered = key.to_lowercase();
            let child_path = if path.is_empty() {
                lowered.clone()
            } else {
                format!("{path}.{lowered}")
            };
            let child_depth = depth + 1;

            let sensitive = self.fields.contains(&lowered) || self.paths.contains(&child_path);
            let new_value = if child_depth > self.max_depth {
                Value::String(REDACTED.to_string())
            } else if sensitive {
                mask(value)
            } else {
                self.redact_at(value, &child_path, child_depth)
            };
            redacted.insert(key.clone(), new_value);
        }
        redacted
    }

    /// Replace pattern matches inside free text
    fn scrub_text(&self, text: &str) -> String {
        if !self.pattern_set.is_match(text) {
            return text.to_string();
        }
        self.patterns
            .iter()
            .fold(text.to_string(), |acc, re| re.replace_all(&acc, REDACTED).into_owned())
    }
}

/// Mask a value while preserving its shape.
///
/// Strings become [`REDACTED`], numbers `0`, booleans `false`; containers are
/// masked element-wise.
pub fn mask(value: &Value) -> Value {
    match value {
        Value::Null => Value::Null,
        Value::Bool(_) => Value::Bool(false),
        Value::Number(_) => Value::from(0),
        Value::String(_) => Value::String(REDACTED.to_string()),
        Value::Array(items) => Value::Array(items.iter().map(mask).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), mask(v)))
                .collect(),
        ),
    }
}
