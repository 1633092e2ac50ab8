//! Call record data model
//!
//! A [`CallRecord`] is one observed invocation of an intercepted function:
//! its inputs, its outcome, timing, and the dependency calls observed while it
//! ran. Records are immutable once persisted; replay reads them and never
//! writes back.
//!
//! Values are plain [`serde_json::Value`] trees, so redaction, fingerprinting,
//! and diffing all operate on the same null/bool/number/string/array/object
//! variant.

mod dependency;
pub mod payload;

pub use dependency::{
    DependencyCall, DependencyKind, DependencySink, record_dependency, track_dependency,
};
pub(crate) use dependency::collect_dependencies;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Current schema version for call records
pub const RECORD_SCHEMA_VERSION: u32 = 1;

/// Identifier assigned to a record at capture time
pub type RecordId = String;

/// A single observed invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallRecord {
    /// Schema version for forward compatibility
    pub schema_version: u32,

    /// Unique record identifier
    pub id: RecordId,

    /// Fully-qualified name of the intercepted function
    pub function_name: String,

    /// Positional arguments (post-redaction)
    pub args: Vec<Value>,

    /// Keyword arguments (post-redaction)
    pub kwargs: Map<String, Value>,

    /// Success value or structured error
    pub outcome: CallOutcome,

    /// Wall-clock start of the call
    pub started_at: DateTime<Utc>,

    /// Elapsed time in milliseconds
    pub duration_ms: f64,

    /// Dependency calls observed during execution, in order
    #[serde(default)]
    pub dependency_calls: Vec<DependencyCall>,

    /// Trace ID for correlation
    #[serde(default)]
    pub trace_id: Option<String>,

    /// Span ID for correlation
    #[serde(default)]
    pub span_id: Option<String>,

    /// Serialized payload size in bytes
    #[serde(default)]
    pub size_bytes: usize,
}

impl CallRecord {
    /// Create a record with a fresh id, started now, with zero duration
    pub fn new(
        function_name: impl Into<String>,
        args: Vec<Value>,
        kwargs: Map<String, Value>,
        outcome: CallOutcome,
    ) -> Self {
        Self {
            schema_version: RECORD_SCHEMA_VERSION,
            id: uuid::Uuid::new_v4().to_string(),
            function_name: function_name.into(),
            args,
            kwargs,
            outcome,
            started_at: Utc::now(),
            duration_ms: 0.0,
            dependency_calls: Vec::new(),
            trace_id: None,
            span_id: None,
            size_bytes: 0,
        }
    }

    /// Set the elapsed time
    pub fn with_duration_ms(mut self, duration_ms: f64) -> Self {
        self.duration_ms = duration_ms;
        self
    }

    /// Set the start time
    pub fn with_started_at(mut self, started_at: DateTime<Utc>) -> Self {
        self.started_at = started_at;
        self
    }

    /// Set correlation identifiers
    pub fn with_trace(mut self, trace_id: Option<String>, span_id: Option<String>) -> Self {
        self.trace_id = trace_id;
        self.span_id = span_id;
        self
    }

    /// Attach dependency calls
    pub fn with_dependency_calls(mut self, calls: Vec<DependencyCall>) -> Self {
        self.dependency_calls = calls;
        self
    }

    /// Whether the call raised
    pub fn has_error(&self) -> bool {
        matches!(self.outcome, CallOutcome::Error { .. })
    }

    /// The success value, if any
    pub fn value(&self) -> Option<&Value> {
        self.outcome.value()
    }

    /// The error, if any
    pub fn error(&self) -> Option<&CallError> {
        self.outcome.error()
    }

    /// Whether the record is complete enough to re-invoke and judge the call.
    ///
    /// Inputs or a result truncated at capture time cannot be replayed
    /// faithfully.
    pub fn is_replayable(&self) -> bool {
        !self.args.iter().any(payload::is_truncated)
            && !self.kwargs.values().any(payload::is_truncated)
            && !self.outcome.value().is_some_and(payload::is_truncated)
    }
}

/// Result of a call: exactly one of a value or an error
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CallOutcome {
    /// The call returned a value
    Success {
        /// The returned value
        value: Value,
    },

    /// The call raised
    Error {
        /// Structured error information
        error: CallError,
    },
}

impl CallOutcome {
    /// Successful outcome
    pub fn success(value: Value) -> Self {
        CallOutcome::Success { value }
    }

    /// Failed outcome
    pub fn failure(error: CallError) -> Self {
        CallOutcome::Error { error }
    }

    /// The success value, if any
    pub fn value(&self) -> Option<&Value> {
        match self {
            CallOutcome::Success { value } => Some(value),
            CallOutcome::Error { .. } => None,
        }
    }

    /// The error, if any
    pub fn error(&self) -> Option<&CallError> {
        match self {
            CallOutcome::Error { error } => Some(error),
            CallOutcome::Success { .. } => None,
        }
    }
}

impl From<std::result::Result<Value, CallError>> for CallOutcome {
    fn from(result: std::result::Result<Value, CallError>) -> Self {
        match result {
            Ok(value) => CallOutcome::Success { value },
            Err(error) => CallOutcome::Error { error },
        }
    }
}

/// Error raised by an intercepted function
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct CallError {
    /// Error kind, compared during replay (e.g. `ValueError`, `not_found`)
    pub kind: String,

    /// Human-readable message
    pub message: String,
}

impl CallError {
    /// Create a new call error
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_record_serialization() {
        let record = CallRecord::new(
            "orders.create",
            vec![json!(42)],
            Map::new(),
            CallOutcome::failure(CallError::new("ValidationError", "missing sku")),
        )
        .with_duration_ms(12.5)
        .with_trace(Some("trace_1".to_string()), None);

        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("\"status\":\"error\""));

        let parsed: CallRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, record);
        assert!(parsed.has_error());
        assert_eq!(parsed.error().unwrap().kind, "ValidationError");
        assert!(parsed.value().is_none());
    }

    #[test]
    fn test_outcome_from_result() {
        let ok: CallOutcome = Ok(json!({"total": 3})).into();
        assert_eq!(ok.value(), Some(&json!({"total": 3})));

        let err: CallOutcome = Err(CallError::new("Timeout", "upstream")).into();
        assert_eq!(err.error().unwrap().to_string(), "Timeout: upstream");
    }

    #[test]
    fn test_truncated_inputs_are_not_replayable() {
        let mut kwargs = Map::new();
        kwargs.insert(
            "body".to_string(),
            payload::bound_value(json!("x".repeat(100)), 10).0,
        );
        let record = CallRecord::new("upload", vec![], kwargs, CallOutcome::success(Value::Null));

        assert!(!record.is_replayable());
    }

    #[test]
    fn test_truncated_result_is_not_replayable() {
        let (value, truncated) = payload::bound_value(json!((0..100).collect::<Vec<i32>>()), 32);
        assert!(truncated);
        let complete = CallRecord::new("range", vec![json!(100)], Map::new(), CallOutcome::success(json!([1])));
        let record = CallRecord::new("range", vec![json!(100)], Map::new(), CallOutcome::success(value));

        assert!(complete.is_replayable());
        assert!(!record.is_replayable());
    }
}
