//! Dependency calls observed during a captured invocation
//!
//! The pipeline runs each operation inside a task-local [`DependencySink`].
//! Instrumentation for databases, HTTP clients, or file access reports entries
//! with [`record_dependency`] or wraps the work in [`track_dependency`]; outside
//! a capture scope both are no-ops.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

/// Longest target descriptor kept on a dependency entry
const MAX_TARGET_LEN: usize = 500;

/// Entries retained per captured call
const MAX_DEPENDENCY_CALLS: usize = 512;

tokio::task_local! {
    static DEPENDENCY_SINK: DependencySink;
}

/// Kind of dependency
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DependencyKind {
    Database,
    Http,
    File,
    Other(String),
}

/// A nested operation observed while a captured call executed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DependencyCall {
    /// Dependency kind
    pub kind: DependencyKind,

    /// Target descriptor: statement, URL, path, or service name
    pub target: String,

    /// When the dependency call started
    pub started_at: DateTime<Utc>,

    /// Elapsed time in milliseconds
    pub duration_ms: f64,

    /// Error message if the dependency call failed
    #[serde(default)]
    pub error: Option<String>,

    /// Free-form details (driver, status code, row counts)
    #[serde(default)]
    pub details: Value,
}

impl DependencyCall {
    /// Create an entry; long targets are cut to a bounded descriptor
    pub fn new(kind: DependencyKind, target: impl Into<String>, duration_ms: f64) -> Self {
        let mut target = target.into();
        if target.len() > MAX_TARGET_LEN {
            let mut cut = MAX_TARGET_LEN;
            while !target.is_char_boundary(cut) {
                cut -= 1;
            }
            target.truncate(cut);
        }
        Self {
            kind,
            target,
            started_at: Utc::now(),
            duration_ms,
            error: None,
            details: Value::Null,
        }
    }

    /// Attach an error message
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    /// Attach details
    pub fn with_details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }
}

/// Collector for the dependency calls of one in-flight capture
#[derive(Debug, Clone, Default)]
pub struct DependencySink {
    calls: Arc<Mutex<Vec<DependencyCall>>>,
}

impl DependencySink {
    fn push(&self, call: DependencyCall) {
        let mut calls = self.calls.lock();
        if calls.len() < MAX_DEPENDENCY_CALLS {
            calls.push(call);
        }
    }

    fn take(&self) -> Vec<DependencyCall> {
        std::mem::take(&mut *self.calls.lock())
    }
}

/// Report a dependency call to the capture in progress on this task.
///
/// Returns `false` when no capture scope is active.
pub fn record_dependency(call: DependencyCall) -> bool {
    DEPENDENCY_SINK.try_with(|sink| sink.push(call)).is_ok()
}

/// Run `fut`, timing it and reporting it as a dependency call.
///
/// The future's output is returned unchanged; an `Err` is recorded as the
/// entry's error message.
pub async fn track_dependency<F, T, E>(
    kind: DependencyKind,
    target: impl Into<String>,
    fut: F,
) -> std::result::Result<T, E>
where
    F: Future<Output = std::result::Result<T, E>>,
    E: std::fmt::Display,
{
    let started_at = Utc::now();
    let start = Instant::now();
    let result = fut.await;
    let duration_ms = start.elapsed().as_secs_f64() * 1000.0;

    let mut call = DependencyCall::new(kind, target, duration_ms);
    call.started_at = started_at;
    if let Err(ref e) = result {
        call.error = Some(e.to_string());
    }
    record_dependency(call);

    result
}

/// Run `fut` inside a fresh sink and return its output with the collected calls
pub(crate) async fn collect_dependencies<F: Future>(fut: F) -> (F::Output, Vec<DependencyCall>) {
    let sink = DependencySink::default();
    let output = DEPENDENCY_SINK.scope(sink.clone(), fut).await;
    (output, sink.take())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_record_outside_scope_is_noop() {
        assert!(!record_dependency(DependencyCall::new(
            DependencyKind::Database,
            "SELECT 1",
            0.5
        )));
    }

    #[tokio::test]
    async fn test_collect_in_order() {
        let (value, calls) = collect_dependencies(async {
            record_dependency(DependencyCall::new(DependencyKind::Database, "SELECT 1", 1.0));
            let _: Result<(), String> = track_dependency(
                DependencyKind::Http,
                "GET https://inventory.internal/items",
                async { Err("503 Service Unavailable".to_string()) },
            )
            .await;
            record_dependency(
                DependencyCall::new(DependencyKind::Other("cache".into()), "items:42", 0.1)
                    .with_details(json!({"hit": true})),
            );
            7
        })
        .await;

        assert_eq!(value, 7);
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[0].kind, DependencyKind::Database);
        assert_eq!(calls[1].kind, DependencyKind::Http);
        assert_eq!(calls[1].error.as_deref(), Some("503 Service Unavailable"));
        assert_eq!(calls[2].details["hit"], true);
    }

    #[tokio::test]
    async fn test_nested_scopes_are_isolated() {
        let (inner_calls, outer_calls) = collect_dependencies(async {
            let (_, inner) = collect_dependencies(async {
                record_dependency(DependencyCall::new(DependencyKind::File, "/tmp/a", 0.2));
            })
            .await;
            inner
        })
        .await;

        assert_eq!(inner_calls.len(), 1);
        assert!(outer_calls.is_empty());
    }

    #[test]
    fn test_long_target_is_bounded() {
        let call = DependencyCall::new(DependencyKind::Database, "x".repeat(2000), 1.0);
        assert_eq!(call.target.len(), 500);
    }
}
