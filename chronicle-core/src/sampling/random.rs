//! Stateless and counting strategies

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use super::{CallSample, DecisionCounter, Sampler, SamplerStats, SamplingDecision, draw};

/// Uniform random sampling at a fixed rate
#[derive(Debug)]
pub struct RandomSampler {
    /// Probability in `[0, 1]`
    rate: f64,
    counter: DecisionCounter,
}

impl RandomSampler {
    /// Create a new random sampler
    ///
    /// # Arguments
    ///
    /// * `rate` - Probability of persisting a call, clamped to `[0, 1]`
    pub fn new(rate: f64) -> Self {
        Self {
            rate: rate.clamp(0.0, 1.0),
            counter: DecisionCounter::default(),
        }
    }

    /// Configured rate
    pub fn rate(&self) -> f64 {
        self.rate
    }
}

impl Sampler for RandomSampler {
    fn decide(&self, _sample: &CallSample<'_>) -> SamplingDecision {
        self.counter.record(SamplingDecision::from_bool(draw(self.rate)))
    }

    fn name(&self) -> &'static str {
        "random"
    }

    fn stats(&self) -> SamplerStats {
        self.counter.stats(self.name())
    }
}

/// Persist the first `count` calls of each function, then nothing
#[derive(Debug)]
pub struct HeadSampler {
    count: u64,
    seen: DashMap<String, AtomicU64>,
    counter: DecisionCounter,
}

impl HeadSampler {
    /// Create a head sampler
    pub fn new(count: u64) -> Self {
        Self {
            count,
            seen: DashMap::new(),
            counter: DecisionCounter::default(),
        }
    }

    fn next_index(&self, function_name: &str) -> u64 {
        if let Some(seen) = self.seen.get(function_name) {
            return seen.fetch_add(1, Ordering::Relaxed);
        }
        self.seen
            .entry(function_name.to_string())
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(1, Ordering::Relaxed)
    }
}

impl Sampler for HeadSampler {
    fn decide(&self, sample: &CallSample<'_>) -> SamplingDecision {
        let index = self.next_index(sample.function_name);
        self.counter
            .record(SamplingDecision::from_bool(index < self.count))
    }

    fn name(&self) -> &'static str {
        "head"
    }

    fn stats(&self) -> SamplerStats {
        self.counter.stats(self.name())
    }
}
