//! Replay of recorded calls against a candidate implementation
//!
//! The engine loads recorded calls for a function, invokes a candidate
//! [`Operation`] with the recorded arguments, and judges each call:
//!
//! - both returned values: structural diff, passed when identical
//! - both raised: passed when the error kinds match
//! - recording raised, candidate returned: failed
//! - recording returned, candidate raised: errored
//!
//! Records holding truncated values and candidate panics are errored without
//! a difference. Stored records are never modified.
//!
//! # Example
//!
//! ```rust,no_run
//! use chronicle_core::prelude::*;
//! use serde_json::{Map, Value, json};
//! use std::sync::Arc;
//!
//! # async fn run(store: Arc<dyn CallStore>) -> chronicle_core::error::Result<()> {
//! let candidate = |args: &[Value], _: &Map<String, Value>| -> std::result::Result<Value, CallError> {
//!     Ok(json!(args[0].as_i64().unwrap_or(0) + args[1].as_i64().unwrap_or(0)))
//! };
//!
//! let report = ReplayEngine::new(store)
//!     .replay("math.add", &candidate, ReplayOptions::default())
//!     .await?;
//! println!("{}", report.summary());
//! # Ok(())
//! # }
//! ```

mod diff;
mod report;

pub use diff::{DifferenceKind, ValueDifference, diff_values};
pub use report::{Divergence, ReplayReport, ReplayResult, ReplayStatus};

use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

use crate::capture::Operation;
use crate::error::{ChronicleError, Result};
use crate::record::{CallOutcome, CallRecord};
use crate::storage::{CallQuery, CallStore};

/// Records fetched per storage round trip while filtering
const DEFAULT_PAGE_SIZE: usize = 200;

/// Narrows which recorded calls are replayed
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReplayFilter {
    /// Only failed (`true`) or successful (`false`) recordings
    pub has_error: Option<bool>,

    /// Only calls started at or after this instant
    pub since: Option<DateTime<Utc>>,

    /// Only these record ids
    pub call_ids: Option<HashSet<String>>,
}

/// Options for one replay run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplayOptions {
    /// Most recent matching records to replay
    pub limit: usize,

    pub filter: Option<ReplayFilter>,
}

impl Default for ReplayOptions {
    fn default() -> Self {
        Self {
            limit: 100,
            filter: None,
        }
    }
}

impl ReplayOptions {
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_filter(mut self, filter: ReplayFilter) -> Self {
        self.filter = Some(filter);
        self
    }
}

/// Stateless replay driver over a [`CallStore`]
#[derive(Clone)]
pub struct ReplayEngine {
    store: Arc<dyn CallStore>,
    page_size: usize,
}

impl ReplayEngine {
    pub fn new(store: Arc<dyn CallStore>) -> Self {
        Self {
            store,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    /// Records fetched per storage query (minimum one)
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Replay recorded calls of `function_name` against `candidate`
    ///
    /// # Errors
    ///
    /// Returns storage errors from loading records. Divergences are reported
    /// in the [`ReplayReport`], never as errors.
    pub async fn replay(
        &self,
        function_name: &str,
        candidate: &dyn Operation,
        options: ReplayOptions,
    ) -> Result<ReplayReport> {
        let start = Instant::now();
        let records = self.load(function_name, &options).await?;
        info!(
            function_name = %function_name,
            records = records.len(),
            "Replaying recorded calls"
        );

        let mut results = Vec::with_capacity(records.len());
        for record in &records {
            results.push(replay_record(record, candidate).await);
        }

        let report = ReplayReport::new(
            function_name,
            results,
            start.elapsed().as_secs_f64() * 1000.0,
        );
        info!(
            function_name = %function_name,
            passed = report.passed,
            failed = report.failed,
            errored = report.errored,
            "Replay finished"
        );
        Ok(report)
    }

    /// Replay a single record by id
    pub async fn replay_one(&self, call_id: &str, candidate: &dyn Operation) -> Result<ReplayResult> {
        let record = self
            .store
            .get(call_id)
            .await?
            .ok_or_else(|| ChronicleError::RecordNotFound(call_id.to_string()))?;
        Ok(replay_record(&record, candidate).await)
    }

    /// Up to `limit` matching records, most recent first
    async fn load(&self, function_name: &str, options: &ReplayOptions) -> Result<Vec<CallRecord>> {
        if options.limit == 0 {
            return Ok(Vec::new());
        }

        let filter = options.filter.clone().unwrap_or_default();
        let mut query = CallQuery::function(function_name);
        query.has_error = filter.has_error;
        query.since = filter.since;

        let Some(call_ids) = filter.call_ids else {
            return self.store.query(&query.with_limit(options.limit)).await;
        };

        let mut selected = Vec::new();
        let mut offset = 0;
        loop {
            let page = self
                .store
                .query(&query.clone().with_limit(self.page_size).with_offset(offset))
                .await?;
            let exhausted = page.len() < self.page_size;
            offset += page.len();

            for record in page {
                if call_ids.contains(&record.id) {
                    selected.push(record);
                    if selected.len() == options.limit || selected.len() == call_ids.len() {
                        return Ok(selected);
                    }
                }
            }
            if exhausted {
                return Ok(selected);
            }
        }
    }
}

impl std::fmt::Debug for ReplayEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplayEngine")
            .field("page_size", &self.page_size)
            .finish()
    }
}

/// Replay one record and judge the candidate's behavior
pub async fn replay_record(record: &CallRecord, candidate: &dyn Operation) -> ReplayResult {
    let call_id = record.id.clone();
    let old_duration_ms = record.duration_ms;

    if !record.is_replayable() {
        return ReplayResult::errored(
            call_id,
            "record holds truncated values and cannot be replayed",
            old_duration_ms,
            None,
        );
    }

    let start = Instant::now();
    let invoked = AssertUnwindSafe(candidate.invoke(&record.args, &record.kwargs))
        .catch_unwind()
        .await;
    let new_duration_ms = start.elapsed().as_secs_f64() * 1000.0;

    let outcome = match invoked {
        Ok(outcome) => outcome,
        Err(panic) => {
            let message = format!("candidate panicked: {}", panic_message(panic.as_ref()));
            debug!(call_id = %call_id, %message, "Replay errored");
            return ReplayResult::errored(call_id, message, old_duration_ms, None);
        }
    };

    let result = match (&record.outcome, outcome) {
        (CallOutcome::Success { value: expected }, Ok(actual)) => {
            let differences = diff_values(expected, &actual);
            if differences.is_empty() {
                ReplayResult::passed(call_id, old_duration_ms, new_duration_ms)
            } else {
                ReplayResult::failed(
                    call_id,
                    Divergence::Output { differences },
                    old_duration_ms,
                    new_duration_ms,
                )
            }
        }
        (CallOutcome::Error { error: expected }, Err(actual)) => {
            if expected.kind == actual.kind {
                ReplayResult::passed(call_id, old_duration_ms, new_duration_ms)
            } else {
                ReplayResult::failed(
                    call_id,
                    Divergence::ErrorKind {
                        expected: expected.kind.clone(),
                        actual: actual.kind,
                    },
                    old_duration_ms,
                    new_duration_ms,
                )
            }
        }
        (CallOutcome::Error { error: expected }, Ok(actual)) => ReplayResult::failed(
            call_id,
            Divergence::UnexpectedSuccess {
                expected_kind: expected.kind.clone(),
                actual,
            },
            old_duration_ms,
            new_duration_ms,
        ),
        (CallOutcome::Success { .. }, Err(actual)) => ReplayResult::errored(
            call_id,
            format!("candidate raised {actual}"),
            old_duration_ms,
            Some(new_duration_ms),
        ),
    };

    if result.status != ReplayStatus::Passed {
        debug!(call_id = %result.call_id, status = %result.status, "Replay diverged");
    }
    result
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests;
