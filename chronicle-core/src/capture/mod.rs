//! Capture pipeline
//!
//! [`CapturePipeline::capture`] runs an intercepted operation, returns its
//! result untouched, and decides whether to persist the call:
//!
//! 1. function limiter, then type limiter; each reserves a slot that only
//!    counts once the record is persisted
//! 2. sampling overrides, then the sampling strategy
//! 3. build the [`CallRecord`], with dependency calls collected while the
//!    operation ran
//! 4. redact
//! 5. bound each value to `max_serialized_size`
//! 6. persist, inline or deferred
//!
//! Every step reads one configuration snapshot taken at entry, so a
//! concurrent [`CapturePipeline::reconfigure`] never produces a mixed view.
//! Failures in steps 1–6 are counted and logged; they never reach the caller.

mod operation;
mod stats;

pub use operation::{AsyncOperation, Invocation, Operation, async_operation};
pub use stats::CaptureStats;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde_json::{Map, Value};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

use crate::config::{ChronicleConfig, PersistMode};
use crate::error::Result;
use crate::limits::{Admission, LimitAlert, LimiterKind, LimiterSnapshot, Limiters};
use crate::record::payload::{bound_value, serialized_size};
use crate::record::{CallError, CallOutcome, CallRecord, DependencyCall, collect_dependencies};
use crate::redact::Redactor;
use crate::sampling::{CallSample, Sampler, SamplerStats, SamplingPolicy};
use crate::storage::CallStore;
use stats::StatsCounters;

/// What the intercepted caller gets back
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureOutcome {
    /// The operation's own result, unchanged
    pub result: std::result::Result<Value, CallError>,

    /// Whether a record was saved (inline) or scheduled for saving (deferred)
    pub persisted: bool,
}

/// Everything derived from one configuration
struct CaptureRuntime {
    config: ChronicleConfig,
    policy: SamplingPolicy,
    redactor: Redactor,
    persist_permits: Arc<Semaphore>,
}

impl CaptureRuntime {
    fn build(config: ChronicleConfig, custom_sampler: Option<&Arc<dyn Sampler>>) -> Result<Self> {
        config.validate()?;
        let redactor = Redactor::new(&config.redaction)?;
        let policy = match custom_sampler {
            Some(sampler) => SamplingPolicy::with_sampler(&config.sampling, sampler.clone()),
            None => SamplingPolicy::from_config(&config.sampling),
        };
        let persist_permits = Arc::new(Semaphore::new(config.capture.max_inflight_persists));
        Ok(Self {
            config,
            policy,
            redactor,
            persist_permits,
        })
    }
}

enum Prepared {
    Limited,
    SampledOut,
    Ready(CallRecord, Admission),
}

/// Sampling, redaction, limiting, and persistence for intercepted calls
pub struct CapturePipeline {
    runtime: RwLock<Arc<CaptureRuntime>>,
    custom_sampler: Option<Arc<dyn Sampler>>,
    limiters: Limiters,
    store: Arc<dyn CallStore>,
    stats: Arc<StatsCounters>,
}

impl CapturePipeline {
    /// Create a pipeline persisting to `store`
    ///
    /// # Errors
    ///
    /// Returns a configuration error if `config` fails validation.
    pub fn new(config: ChronicleConfig, store: Arc<dyn CallStore>) -> Result<Self> {
        Self::build(config, store, None)
    }

    /// Create a pipeline with a custom sampling strategy.
    ///
    /// The configured function lists and error override still apply in front
    /// of `sampler`, and the strategy survives reconfiguration.
    pub fn with_sampler(
        config: ChronicleConfig,
        store: Arc<dyn CallStore>,
        sampler: Arc<dyn Sampler>,
    ) -> Result<Self> {
        Self::build(config, store, Some(sampler))
    }

    fn build(
        config: ChronicleConfig,
        store: Arc<dyn CallStore>,
        custom_sampler: Option<Arc<dyn Sampler>>,
    ) -> Result<Self> {
        let alert_capacity = config.limits.alert_log_capacity;
        let runtime = CaptureRuntime::build(config, custom_sampler.as_ref())?;
        info!(
            strategy = runtime.policy.sampler().name(),
            persist_mode = ?runtime.config.capture.persist_mode,
            "Capture pipeline ready"
        );
        Ok(Self {
            runtime: RwLock::new(Arc::new(runtime)),
            custom_sampler,
            limiters: Limiters::new(alert_capacity),
            store,
            stats: Arc::new(StatsCounters::default()),
        })
    }

    /// Run `operation` for `invocation` and capture the call if it qualifies
    pub async fn capture(&self, invocation: Invocation, operation: &dyn Operation) -> CaptureOutcome {
        let runtime = self.runtime.read().clone();
        StatsCounters::incr(&self.stats.intercepted);

        if !runtime.config.capture.enabled {
            let result = operation.invoke(&invocation.args, &invocation.kwargs).await;
            return CaptureOutcome {
                result,
                persisted: false,
            };
        }

        let started_at = Utc::now();
        let start = Instant::now();
        let (result, dependency_calls) = if runtime.config.capture.track_dependencies {
            collect_dependencies(operation.invoke(&invocation.args, &invocation.kwargs)).await
        } else {
            (
                operation.invoke(&invocation.args, &invocation.kwargs).await,
                Vec::new(),
            )
        };
        let duration_ms = start.elapsed().as_secs_f64() * 1000.0;

        let function_name = invocation.function_name.clone();
        let prepared = catch_unwind(AssertUnwindSafe(|| {
            self.prepare(
                &runtime,
                invocation,
                &result,
                started_at,
                duration_ms,
                dependency_calls,
            )
        }));

        let persisted = match prepared {
            Ok(Prepared::Ready(record, admission)) => {
                self.persist(&runtime, record, admission).await
            }
            Ok(Prepared::Limited) => {
                StatsCounters::incr(&self.stats.limited);
                debug!(function_name = %function_name, "Call not captured: limit reached");
                false
            }
            Ok(Prepared::SampledOut) => {
                StatsCounters::incr(&self.stats.sampled_out);
                false
            }
            Err(_) => {
                StatsCounters::incr(&self.stats.faults);
                error!(function_name = %function_name, "Capture fault; call not recorded");
                false
            }
        };

        CaptureOutcome { result, persisted }
    }

    fn prepare(
        &self,
        runtime: &CaptureRuntime,
        invocation: Invocation,
        result: &std::result::Result<Value, CallError>,
        started_at: DateTime<Utc>,
        duration_ms: f64,
        dependency_calls: Vec<DependencyCall>,
    ) -> Prepared {
        let Invocation {
            function_name,
            args,
            kwargs,
            trace_id,
            span_id,
        } = invocation;

        let Some(admission) = self
            .limiters
            .admit(&runtime.config.limits, &function_name, &args, &kwargs)
        else {
            return Prepared::Limited;
        };

        let sample = CallSample {
            function_name: &function_name,
            args: &args,
            kwargs: &kwargs,
            had_error: result.is_err(),
        };
        if !runtime.policy.decide(&sample).is_sample() {
            return Prepared::SampledOut;
        }

        let record = CallRecord::new(function_name, args, kwargs, CallOutcome::from(result.clone()))
            .with_started_at(started_at)
            .with_duration_ms(duration_ms)
            .with_trace(trace_id, span_id)
            .with_dependency_calls(dependency_calls);
        let record = runtime.redactor.redact(record);

        Prepared::Ready(
            self.bound(record, runtime.config.capture.max_serialized_size),
            admission,
        )
    }

    /// Apply the per-value size bound and fill in `size_bytes`
    fn bound(&self, mut record: CallRecord, max_size: usize) -> CallRecord {
        let mut truncated = 0u64;
        let mut cap = |value: Value| {
            let (value, was_truncated) = bound_value(value, max_size);
            if was_truncated {
                truncated += 1;
            }
            value
        };

        record.args = std::mem::take(&mut record.args).into_iter().map(&mut cap).collect();
        record.kwargs = std::mem::take(&mut record.kwargs)
            .into_iter()
            .map(|(name, value)| (name, cap(value)))
            .collect::<Map<String, Value>>();
        if let CallOutcome::Success { value } = &mut record.outcome {
            *value = cap(std::mem::take(value));
        }

        if truncated > 0 {
            self.stats.truncated_values.fetch_add(truncated, std::sync::atomic::Ordering::Relaxed);
            debug!(
                function_name = %record.function_name,
                call_id = %record.id,
                truncated,
                "Oversized values truncated"
            );
        }

        record.size_bytes = record.args.iter().map(serialized_size).sum::<usize>()
            + record
                .kwargs
                .values()
                .map(serialized_size)
                .sum::<usize>()
            + record.outcome.value().map(serialized_size).unwrap_or(0);
        record
    }

    async fn persist(
        &self,
        runtime: &CaptureRuntime,
        record: CallRecord,
        admission: Admission,
    ) -> bool {
        if runtime.config.capture.persist_mode == PersistMode::Deferred {
            if let (Ok(handle), Ok(permit)) = (
                tokio::runtime::Handle::try_current(),
                runtime.persist_permits.clone().try_acquire_owned(),
            ) {
                let store = self.store.clone();
                let stats = self.stats.clone();
                handle.spawn(async move {
                    let _permit = permit;
                    save(store.as_ref(), &stats, &record, admission).await;
                });
                return true;
            }
            debug!(
                function_name = %record.function_name,
                "No persist permit available; saving inline"
            );
        }
        save(self.store.as_ref(), &self.stats, &record, admission).await
    }

    /// Wrap `operation` so every call goes through this pipeline
    pub fn wrap(
        self: &Arc<Self>,
        function_name: impl Into<String>,
        operation: impl Operation + 'static,
    ) -> CapturedOperation {
        CapturedOperation {
            function_name: function_name.into(),
            pipeline: self.clone(),
            inner: Arc::new(operation),
        }
    }

    /// Current configuration
    pub fn config(&self) -> ChronicleConfig {
        self.runtime.read().config.clone()
    }

    /// Replace the configuration atomically.
    ///
    /// Sampler state is rebuilt; limiter counts carry over and are judged
    /// against the new rules. On error the previous configuration stays.
    pub fn reconfigure(&self, config: ChronicleConfig) -> Result<()> {
        let runtime = CaptureRuntime::build(config, self.custom_sampler.as_ref())?;
        info!(
            strategy = runtime.policy.sampler().name(),
            enabled = runtime.config.capture.enabled,
            "Capture pipeline reconfigured"
        );
        *self.runtime.write() = Arc::new(runtime);
        Ok(())
    }

    pub fn stats(&self) -> CaptureStats {
        self.stats.snapshot()
    }

    /// Counters of the active sampling strategy
    pub fn sampler_stats(&self) -> SamplerStats {
        self.runtime.read().policy.sampler().stats()
    }

    pub fn reset_limiter(&self, kind: LimiterKind, key: &str) -> bool {
        self.limiters.reset(kind, key)
    }

    pub fn reset_all_limiters(&self) {
        self.limiters.reset_all();
    }

    /// Tracked keys of one limiter with their counts
    pub fn limiter_keys(&self, kind: LimiterKind) -> Vec<LimiterSnapshot> {
        self.limiters.snapshot(kind)
    }

    /// Recent limit alerts, oldest first
    pub fn alerts(&self) -> Vec<LimitAlert> {
        self.limiters.alerts()
    }

    pub fn store(&self) -> &Arc<dyn CallStore> {
        &self.store
    }
}

impl std::fmt::Debug for CapturePipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let runtime = self.runtime.read();
        f.debug_struct("CapturePipeline")
            .field("policy", &runtime.policy)
            .field("persist_mode", &runtime.config.capture.persist_mode)
            .field("stats", &self.stats.snapshot())
            .finish()
    }
}

/// Save `record`; limiter slots are counted only when the save succeeds
async fn save(
    store: &dyn CallStore,
    stats: &StatsCounters,
    record: &CallRecord,
    admission: Admission,
) -> bool {
    match store.save(record).await {
        Ok(id) => {
            admission.commit();
            StatsCounters::incr(&stats.persisted);
            debug!(
                function_name = %record.function_name,
                call_id = %id,
                size_bytes = record.size_bytes,
                "Call captured"
            );
            true
        }
        Err(e) => {
            StatsCounters::incr(&stats.storage_failures);
            warn!(
                function_name = %record.function_name,
                call_id = %record.id,
                error = %e,
                "Failed to persist captured call"
            );
            false
        }
    }
}

/// An operation bound to a pipeline under a function name
#[derive(Clone)]
pub struct CapturedOperation {
    function_name: String,
    pipeline: Arc<CapturePipeline>,
    inner: Arc<dyn Operation>,
}

impl CapturedOperation {
    pub fn function_name(&self) -> &str {
        &self.function_name
    }

    /// Call through the pipeline with full invocation details
    pub async fn call(&self, invocation: Invocation) -> CaptureOutcome {
        let invocation = Invocation {
            function_name: self.function_name.clone(),
            ..invocation
        };
        self.pipeline.capture(invocation, self.inner.as_ref()).await
    }
}

#[async_trait]
impl Operation for CapturedOperation {
    async fn invoke(
        &self,
        args: &[Value],
        kwargs: &Map<String, Value>,
    ) -> std::result::Result<Value, CallError> {
        let invocation = Invocation::new(self.function_name.clone())
            .with_args(args.to_vec())
            .with_kwargs(kwargs.clone());
        self.call(invocation).await.result
    }
}
