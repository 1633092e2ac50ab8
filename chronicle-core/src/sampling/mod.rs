//! Capture sampling
//!
//! A [`Sampler`] decides, per intercepted call, whether the call is worth
//! persisting. Strategies range from stateless ([`RandomSampler`]) to
//! per-function state ([`HeadSampler`], [`ClusteringSampler`],
//! [`AdaptiveSampler`]).
//!
//! [`SamplingPolicy`] layers the configured function lists and the
//! always-capture-errors override on top of the strategy.

mod adaptive;
mod clustering;
mod random;

pub use adaptive::AdaptiveSampler;
pub use clustering::{Cluster, ClusterTable, ClusteringSampler, Observation};
pub use random::{HeadSampler, RandomSampler};

use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::config::{SamplingConfig, StrategyKind};

/// Sampling decision
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplingDecision {
    /// Persist this call
    Sample,
    /// Don't persist this call
    Drop,
}

impl SamplingDecision {
    /// Whether the call should be persisted
    pub fn is_sample(self) -> bool {
        self == SamplingDecision::Sample
    }

    fn from_bool(sample: bool) -> Self {
        if sample {
            SamplingDecision::Sample
        } else {
            SamplingDecision::Drop
        }
    }
}

/// What a sampler sees of a completed call
#[derive(Debug, Clone, Copy)]
pub struct CallSample<'a> {
    pub function_name: &'a str,
    pub args: &'a [Value],
    pub kwargs: &'a Map<String, Value>,
    pub had_error: bool,
}

/// Point-in-time sampler counters
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SamplerStats {
    /// Strategy name
    pub strategy: String,
    /// Calls the strategy decided on
    pub decisions: u64,
    /// Calls the strategy chose to persist
    pub sampled: u64,
    /// Clusters (or novelty entries) per function, for stateful strategies
    pub clusters: BTreeMap<String, usize>,
}

/// Trait for sampling strategies
pub trait Sampler: Send + Sync {
    /// Decide whether to persist a call
    fn decide(&self, sample: &CallSample<'_>) -> SamplingDecision;

    /// Get the strategy name
    fn name(&self) -> &'static str;

    /// Decision counters and strategy state
    fn stats(&self) -> SamplerStats;
}

/// Decision tally shared by the strategies
#[derive(Debug, Default)]
pub(crate) struct DecisionCounter {
    decisions: AtomicU64,
    sampled: AtomicU64,
}

impl DecisionCounter {
    pub(crate) fn record(&self, decision: SamplingDecision) -> SamplingDecision {
        self.decisions.fetch_add(1, Ordering::Relaxed);
        if decision.is_sample() {
            self.sampled.fetch_add(1, Ordering::Relaxed);
        }
        decision
    }

    pub(crate) fn stats(&self, strategy: &str) -> SamplerStats {
        SamplerStats {
            strategy: strategy.to_string(),
            decisions: self.decisions.load(Ordering::Relaxed),
            sampled: self.sampled.load(Ordering::Relaxed),
            clusters: BTreeMap::new(),
        }
    }
}

/// Bernoulli draw with probability `rate`
pub(crate) fn draw(rate: f64) -> bool {
    if rate >= 1.0 {
        true
    } else if rate <= 0.0 {
        false
    } else {
        rand::random::<f64>() < rate
    }
}

/// Always sample
#[derive(Debug, Default)]
pub struct AlwaysSample {
    counter: DecisionCounter,
}

impl Sampler for AlwaysSample {
    fn decide(&self, _sample: &CallSample<'_>) -> SamplingDecision {
        self.counter.record(SamplingDecision::Sample)
    }

    fn name(&self) -> &'static str {
        "all"
    }

    fn stats(&self) -> SamplerStats {
        self.counter.stats(self.name())
    }
}

/// Never sample
#[derive(Debug, Default)]
pub struct NeverSample {
    counter: DecisionCounter,
}

impl Sampler for NeverSample {
    fn decide(&self, _sample: &CallSample<'_>) -> SamplingDecision {
        self.counter.record(SamplingDecision::Drop)
    }

    fn name(&self) -> &'static str {
        "never"
    }

    fn stats(&self) -> SamplerStats {
        self.counter.stats(self.name())
    }
}

/// Build the configured strategy
pub fn build_sampler(config: &SamplingConfig) -> Arc<dyn Sampler> {
    match config.strategy {
        StrategyKind::All => Arc::new(AlwaysSample::default()),
        StrategyKind::Never => Arc::new(NeverSample::default()),
        StrategyKind::Random => Arc::new(RandomSampler::new(config.sampling_rate)),
        StrategyKind::Head => Arc::new(HeadSampler::new(config.head_count)),
        StrategyKind::Clustering => Arc::new(ClusteringSampler::new(
            config.cluster_similarity_threshold,
            config.sampling_rate,
            config.max_clusters_per_function,
        )),
        StrategyKind::Adaptive => Arc::new(AdaptiveSampler::from_config(config)),
    }
}

/// Function lists and error override in front of a strategy
pub struct SamplingPolicy {
    sampler: Arc<dyn Sampler>,
    always: Vec<String>,
    never: Vec<String>,
    always_capture_errors: bool,
}

impl SamplingPolicy {
    /// Build the strategy and overrides from configuration
    pub fn from_config(config: &SamplingConfig) -> Self {
        Self::with_sampler(config, build_sampler(config))
    }

    /// Use a custom strategy with the configured overrides
    pub fn with_sampler(config: &SamplingConfig, sampler: Arc<dyn Sampler>) -> Self {
        let lowered = |names: &[String]| names.iter().map(|n| n.to_lowercase()).collect();
        Self {
            sampler,
            always: lowered(&config.always_capture_functions),
            never: lowered(&config.never_capture_functions),
            always_capture_errors: config.always_capture_errors,
        }
    }

    /// Decide for one call.
    ///
    /// Never-capture prefixes win over always-capture prefixes, which win
    /// over the error override; only then is the strategy consulted.
    pub fn decide(&self, sample: &CallSample<'_>) -> SamplingDecision {
        let name = sample.function_name.to_lowercase();
        if matches_prefix(&self.never, &name) {
            return SamplingDecision::Drop;
        }
        if matches_prefix(&self.always, &name) {
            return SamplingDecision::Sample;
        }
        if self.always_capture_errors && sample.had_error {
            return SamplingDecision::Sample;
        }
        self.sampler.decide(sample)
    }

    /// The underlying strategy
    pub fn sampler(&self) -> &Arc<dyn Sampler> {
        &self.sampler
    }
}

impl std::fmt::Debug for SamplingPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SamplingPolicy")
            .field("strategy", &self.sampler.name())
            .field("always", &self.always)
            .field("never", &self.never)
            .field("always_capture_errors", &self.always_capture_errors)
            .finish()
    }
}

fn matches_prefix(prefixes: &[String], name: &str) -> bool {
    prefixes.iter().any(|prefix| name.starts_with(prefix.as_str()))
}
