//! Capture counters

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Point-in-time capture counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CaptureStats {
    /// Calls that went through the pipeline
    pub intercepted: u64,
    /// Records handed to storage successfully
    pub persisted: u64,
    /// Calls refused by a limiter
    pub limited: u64,
    /// Calls declined by sampling
    pub sampled_out: u64,
    /// Individual values replaced by a truncation marker
    pub truncated_values: u64,
    /// Failures inside the capture steps themselves
    pub faults: u64,
    /// Failed saves
    pub storage_failures: u64,
}

#[derive(Debug, Default)]
pub(crate) struct StatsCounters {
    pub(crate) intercepted: AtomicU64,
    pub(crate) persisted: AtomicU64,
    pub(crate) limited: AtomicU64,
    pub(crate) sampled_out: AtomicU64,
    pub(crate) truncated_values: AtomicU64,
    pub(crate) faults: AtomicU64,
    pub(crate) storage_failures: AtomicU64,
}

impl StatsCounters {
    pub(crate) fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> CaptureStats {
        CaptureStats {
            intercepted: self.intercepted.load(Ordering::Relaxed),
            persisted: self.persisted.load(Ordering::Relaxed),
            limited: self.limited.load(Ordering::Relaxed),
            sampled_out: self.sampled_out.load(Ordering::Relaxed),
            truncated_values: self.truncated_values.load(Ordering::Relaxed),
            faults: self.faults.load(Ordering::Relaxed),
            storage_failures: self.storage_failures.load(Ordering::Relaxed),
        }
    }
}
