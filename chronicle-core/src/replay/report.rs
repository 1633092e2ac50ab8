//! Replay results and their aggregation

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use super::diff::ValueDifference;
use crate::record::RecordId;

/// Verdict for one replayed call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplayStatus {
    /// Candidate behaved like the recording
    Passed,
    /// Candidate diverged from the recording
    Failed,
    /// The call could not be judged
    Errored,
}

impl fmt::Display for ReplayStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReplayStatus::Passed => write!(f, "passed"),
            ReplayStatus::Failed => write!(f, "failed"),
            ReplayStatus::Errored => write!(f, "errored"),
        }
    }
}

/// Why a replayed call failed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Divergence {
    /// Both returned values, and the values differ
    Output { differences: Vec<ValueDifference> },

    /// Both raised, with different error kinds
    ErrorKind { expected: String, actual: String },

    /// The recording raised but the candidate returned a value
    UnexpectedSuccess { expected_kind: String, actual: Value },
}

impl fmt::Display for Divergence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Divergence::Output { differences } => {
                let rendered: Vec<String> = differences.iter().map(ToString::to_string).collect();
                write!(f, "{}", rendered.join("; "))
            }
            Divergence::ErrorKind { expected, actual } => {
                write!(f, "expected error {expected}, got error {actual}")
            }
            Divergence::UnexpectedSuccess {
                expected_kind,
                actual,
            } => write!(f, "expected error {expected_kind}, got value {actual}"),
        }
    }
}

/// Outcome of replaying one recorded call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplayResult {
    pub call_id: RecordId,
    pub status: ReplayStatus,

    /// Present only when `status` is `Failed`
    pub difference: Option<Divergence>,

    /// Duration recorded at capture time
    pub old_duration_ms: f64,

    /// Candidate duration; absent when the call could not be timed
    pub new_duration_ms: Option<f64>,

    /// Explanation when `status` is `Errored`
    pub error: Option<String>,
}

impl ReplayResult {
    pub(crate) fn passed(call_id: RecordId, old_duration_ms: f64, new_duration_ms: f64) -> Self {
        Self {
            call_id,
            status: ReplayStatus::Passed,
            difference: None,
            old_duration_ms,
            new_duration_ms: Some(new_duration_ms),
            error: None,
        }
    }

    pub(crate) fn failed(
        call_id: RecordId,
        difference: Divergence,
        old_duration_ms: f64,
        new_duration_ms: f64,
    ) -> Self {
        Self {
            call_id,
            status: ReplayStatus::Failed,
            difference: Some(difference),
            old_duration_ms,
            new_duration_ms: Some(new_duration_ms),
            error: None,
        }
    }

    pub(crate) fn errored(
        call_id: RecordId,
        error: impl Into<String>,
        old_duration_ms: f64,
        new_duration_ms: Option<f64>,
    ) -> Self {
        Self {
            call_id,
            status: ReplayStatus::Errored,
            difference: None,
            old_duration_ms,
            new_duration_ms,
            error: Some(error.into()),
        }
    }

    /// `old / new`, when both durations are positive and finite
    pub fn speedup(&self) -> Option<f64> {
        let new = self.new_duration_ms?;
        let usable = |d: f64| d.is_finite() && d > 0.0;
        (usable(self.old_duration_ms) && usable(new)).then(|| self.old_duration_ms / new)
    }
}

/// Aggregate of one replay run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplayReport {
    pub function_name: String,
    pub results: Vec<ReplayResult>,
    pub passed: usize,
    pub failed: usize,
    pub errored: usize,

    /// Wall-clock time of the replay run
    pub total_duration_ms: f64,

    /// Mean `old / new` over timed, non-errored results
    pub average_speedup: Option<f64>,
}

impl ReplayReport {
    /// Tally `results`
    pub fn new(
        function_name: impl Into<String>,
        results: Vec<ReplayResult>,
        total_duration_ms: f64,
    ) -> Self {
        let count = |status| results.iter().filter(|r| r.status == status).count();
        let passed = count(ReplayStatus::Passed);
        let failed = count(ReplayStatus::Failed);
        let errored = count(ReplayStatus::Errored);

        let speedups: Vec<f64> = results
            .iter()
            .filter(|r| r.status != ReplayStatus::Errored)
            .filter_map(ReplayResult::speedup)
            .collect();
        let average_speedup =
            (!speedups.is_empty()).then(|| speedups.iter().sum::<f64>() / speedups.len() as f64);

        Self {
            function_name: function_name.into(),
            results,
            passed,
            failed,
            errored,
            total_duration_ms,
            average_speedup,
        }
    }

    pub fn total(&self) -> usize {
        self.results.len()
    }

    /// Percentage of results that passed; 0 for an empty run
    pub fn pass_rate(&self) -> f64 {
        if self.results.is_empty() {
            0.0
        } else {
            self.passed as f64 / self.results.len() as f64 * 100.0
        }
    }

    /// Whether every replayed call passed
    pub fn all_passed(&self) -> bool {
        self.passed == self.results.len()
    }

    pub fn failures(&self) -> impl Iterator<Item = &ReplayResult> {
        self.results
            .iter()
            .filter(|r| r.status == ReplayStatus::Failed)
    }

    /// Judged results whose new duration exceeds `old × ratio`
    pub fn slowdowns(&self, ratio: f64) -> Vec<&ReplayResult> {
        self.results
            .iter()
            .filter(|r| r.status != ReplayStatus::Errored)
            .filter(|r| {
                r.new_duration_ms
                    .is_some_and(|new| new > r.old_duration_ms * ratio)
            })
            .collect()
    }

    /// Human-readable summary: totals, pass rate, duration, speedup
    pub fn summary(&self) -> String {
        let speedup = match self.average_speedup {
            Some(s) => format!("{s:.2}x"),
            None => "n/a".to_string(),
        };
        format!(
            "Replay of {}\n  Total:       {}\n  Passed:      {}\n  Failed:      {}\n  Errored:     {}\n  Pass rate:   {:.1}%\n  Duration:    {:.2} ms\n  Avg speedup: {}",
            self.function_name,
            self.total(),
            self.passed,
            self.failed,
            self.errored,
            self.pass_rate(),
            self.total_duration_ms,
            speedup
        )
    }
}

impl fmt::Display for ReplayReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.summary())?;
        for result in &self.results {
            match (&result.difference, &result.error) {
                (Some(difference), _) => {
                    writeln!(f, "  [{}] {}: {}", result.status, result.call_id, difference)?
                }
                (None, Some(error)) => {
                    writeln!(f, "  [{}] {}: {}", result.status, result.call_id, error)?
                }
                (None, None) => {}
            }
        }
        Ok(())
    }
}
