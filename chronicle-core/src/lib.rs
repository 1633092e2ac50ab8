//! # Chronicle - Behavioral Capture and Replay
//!
//! Chronicle records how production functions actually behave and replays
//! those recordings against a refactored implementation:
//! - Capture of arguments, results, errors, timings, and dependency calls
//! - Redaction of sensitive fields before anything is stored
//! - Sampling strategies (random, clustering, adaptive) to keep volume sane
//! - Per-function and per-type capture limits with alerting
//! - Replay with structural diffs and speedup reporting
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use chronicle_core::prelude::*;
//! use serde_json::{Map, Value, json};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let store = Arc::new(InMemoryCallStore::new());
//!     let config = ChronicleConfig::builder()
//!         .strategy(StrategyKind::All, 1.0)
//!         .build()?;
//!     let pipeline = Arc::new(CapturePipeline::new(config, store.clone())?);
//!
//!     let add = |args: &[Value], _: &Map<String, Value>| -> std::result::Result<Value, CallError> {
//!         Ok(json!(args[0].as_i64().unwrap_or(0) + args[1].as_i64().unwrap_or(0)))
//!     };
//!     let captured = pipeline.wrap("math.add", add);
//!     let outcome = captured.call(Invocation::new("math.add").arg(2).arg(3)).await;
//!     assert_eq!(outcome.result, Ok(json!(5)));
//!
//!     let report = ReplayEngine::new(store)
//!         .replay("math.add", &add, ReplayOptions::default())
//!         .await?;
//!     println!("{}", report.summary());
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! - **capture**: the pipeline that wraps operations and persists records
//! - **sampling** / **limits**: decide which calls are worth keeping
//! - **storage**: the [`storage::CallStore`] port and an in-memory adapter
//! - **replay**: re-runs recordings and reports divergences

pub mod capture;
pub mod config;
pub mod error;
pub mod fingerprint;
pub mod limits;
pub mod record;
pub mod redact;
pub mod replay;
pub mod sampling;
pub mod storage;
pub mod telemetry;

/// Current library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Re-export commonly used types
pub mod prelude {
    pub use crate::capture::{
        CaptureOutcome, CapturePipeline, CaptureStats, CapturedOperation, Invocation, Operation,
        async_operation,
    };
    pub use crate::config::{
        CaptureConfig, ChronicleConfig, ConfigBuilder, FunctionLimitConfig, LimitAction,
        LimitRule, PersistMode, RedactionConfig, SamplingConfig, StrategyKind, TypeLimitConfig,
    };
    pub use crate::error::{ChronicleError, Result};
    pub use crate::fingerprint::Fingerprint;
    pub use crate::limits::{LimitAlert, LimiterKind};
    pub use crate::record::{
        CallError, CallOutcome, CallRecord, DependencyCall, DependencyKind, record_dependency,
        track_dependency,
    };
    pub use crate::redact::Redactor;
    pub use crate::replay::{
        ReplayEngine, ReplayFilter, ReplayOptions, ReplayReport, ReplayResult, ReplayStatus,
    };
    pub use crate::sampling::{Sampler, SamplerStats, SamplingDecision};
    pub use crate::storage::{CallQuery, CallStore, DeleteScope, InMemoryCallStore};
}
