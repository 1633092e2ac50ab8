//! Adaptive sampling: boost the rate for errors and unfamiliar inputs

use super::clustering::ClusterIndex;
use super::{CallSample, DecisionCounter, Sampler, SamplerStats, SamplingDecision, draw};
use crate::config::SamplingConfig;
use crate::fingerprint::Fingerprint;

/// Random sampling whose rate rises for failed or novel calls.
///
/// The effective rate is `base × error_boost (if the call failed) ×
/// novelty_boost (if novel)`, clamped to `[min_rate, max_rate]`. Novelty is
/// judged against a bounded window of recent fingerprints per function.
#[derive(Debug)]
pub struct AdaptiveSampler {
    base_rate: f64,
    error_boost: f64,
    novelty_boost: f64,
    min_rate: f64,
    max_rate: f64,
    threshold: f64,
    novelty: ClusterIndex,
    counter: DecisionCounter,
}

impl AdaptiveSampler {
    pub fn from_config(config: &SamplingConfig) -> Self {
        Self {
            base_rate: config.sampling_rate,
            error_boost: config.error_boost_factor,
            novelty_boost: config.novelty_boost_factor,
            min_rate: config.min_rate,
            max_rate: config.max_rate,
            threshold: config.cluster_similarity_threshold,
            novelty: ClusterIndex::new(config.novelty_window),
            counter: DecisionCounter::default(),
        }
    }

    /// Effective rate for this call.
    ///
    /// Records the call's fingerprint in the function's novelty window.
    pub fn rate_for(&self, sample: &CallSample<'_>) -> f64 {
        let fingerprint = Fingerprint::of(sample.args, sample.kwargs);
        let novel = self
            .novelty
            .observe(sample.function_name, fingerprint, self.threshold)
            .is_novel();

        let mut rate = self.base_rate;
        if sample.had_error {
            rate *= self.error_boost;
        }
        if novel {
            rate *= self.novelty_boost;
        }
        rate.max(self.min_rate).min(self.max_rate)
    }
}

impl Sampler for AdaptiveSampler {
    fn decide(&self, sample: &CallSample<'_>) -> SamplingDecision {
        let rate = self.rate_for(sample);
        self.counter.record(SamplingDecision::from_bool(draw(rate)))
    }

    fn name(&self) -> &'static str {
        "adaptive"
    }

    fn stats(&self) -> SamplerStats {
        SamplerStats {
            clusters: self.novelty.sizes(),
            ..self.counter.stats(self.name())
        }
    }
}
