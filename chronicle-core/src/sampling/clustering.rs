//! Similarity clustering
//!
//! Each function keeps a bounded table of representative fingerprints. A call
//! whose fingerprint is at least `threshold`-similar to a representative is a
//! duplicate of that cluster; anything else opens a new cluster. When the
//! table is full the oldest representative is evicted.

use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::VecDeque;

use super::{CallSample, DecisionCounter, Sampler, SamplerStats, SamplingDecision, draw};
use crate::fingerprint::Fingerprint;

/// One cluster of similar calls
#[derive(Debug, Clone)]
pub struct Cluster {
    pub id: u64,
    pub representative: Fingerprint,
    /// Calls matched to this cluster, including the one that opened it
    pub hits: u64,
}

/// Result of observing a fingerprint
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Observation {
    /// Matched an existing cluster
    Duplicate { cluster_id: u64, similarity: f64 },
    /// Opened a new cluster
    Novel { cluster_id: u64 },
}

impl Observation {
    pub fn is_novel(&self) -> bool {
        matches!(self, Observation::Novel { .. })
    }
}

/// Bounded set of cluster representatives for one function
#[derive(Debug, Clone)]
pub struct ClusterTable {
    clusters: VecDeque<Cluster>,
    capacity: usize,
    next_id: u64,
}

impl ClusterTable {
    /// Create a table holding at most `capacity` clusters (minimum one)
    pub fn new(capacity: usize) -> Self {
        Self {
            clusters: VecDeque::new(),
            capacity: capacity.max(1),
            next_id: 0,
        }
    }

    /// Most similar representative, as `(position, similarity)`
    pub fn best_match(&self, fingerprint: &Fingerprint) -> Option<(usize, f64)> {
        self.clusters
            .iter()
            .enumerate()
            .map(|(i, cluster)| (i, cluster.representative.similarity(fingerprint)))
            .max_by(|a, b| a.1.total_cmp(&b.1))
    }

    /// Classify `fingerprint` and update the table
    pub fn observe(&mut self, fingerprint: Fingerprint, threshold: f64) -> Observation {
        if let Some((index, similarity)) = self.best_match(&fingerprint) {
            if similarity >= threshold {
                let cluster = &mut self.clusters[index];
                cluster.hits += 1;
                return Observation::Duplicate {
                    cluster_id: cluster.id,
                    similarity,
                };
            }
        }

        if self.clusters.len() >= self.capacity {
            self.clusters.pop_front();
        }
        let cluster_id = self.next_id;
        self.next_id += 1;
        self.clusters.push_back(Cluster {
            id: cluster_id,
            representative: fingerprint,
            hits: 1,
        });
        Observation::Novel { cluster_id }
    }

    pub fn len(&self) -> usize {
        self.clusters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clusters.is_empty()
    }

    pub fn clusters(&self) -> impl Iterator<Item = &Cluster> {
        self.clusters.iter()
    }
}

/// Per-function cluster tables, one lock per function
#[derive(Debug)]
pub(crate) struct ClusterIndex {
    capacity: usize,
    tables: DashMap<String, Mutex<ClusterTable>>,
}

impl ClusterIndex {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            capacity,
            tables: DashMap::new(),
        }
    }

    pub(crate) fn observe(
        &self,
        function_name: &str,
        fingerprint: Fingerprint,
        threshold: f64,
    ) -> Observation {
        if let Some(table) = self.tables.get(function_name) {
            return table.lock().observe(fingerprint, threshold);
        }
        self.tables
            .entry(function_name.to_string())
            .or_insert_with(|| Mutex::new(ClusterTable::new(self.capacity)))
            .lock()
            .observe(fingerprint, threshold)
    }

    pub(crate) fn sizes(&self) -> std::collections::BTreeMap<String, usize> {
        self.tables
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().lock().len()))
            .collect()
    }
}

/// Capture every new input shape; sample repeats at the base rate
#[derive(Debug)]
pub struct ClusteringSampler {
    threshold: f64,
    duplicate_rate: f64,
    index: ClusterIndex,
    counter: DecisionCounter,
}

impl ClusteringSampler {
    /// Create a clustering sampler
    ///
    /// # Arguments
    ///
    /// * `threshold` - Similarity at or above which a call is a duplicate
    /// * `duplicate_rate` - Probability of persisting a duplicate
    /// * `max_clusters` - Clusters kept per function
    pub fn new(threshold: f64, duplicate_rate: f64, max_clusters: usize) -> Self {
        Self {
            threshold,
            duplicate_rate,
            index: ClusterIndex::new(max_clusters),
            counter: DecisionCounter::default(),
        }
    }
}

impl Sampler for ClusteringSampler {
    fn decide(&self, sample: &CallSample<'_>) -> SamplingDecision {
        let fingerprint = Fingerprint::of(sample.args, sample.kwargs);
        let observation = self
            .index
            .observe(sample.function_name, fingerprint, self.threshold);

        let decision = match observation {
            Observation::Novel { .. } => SamplingDecision::Sample,
            Observation::Duplicate { .. } => {
                SamplingDecision::from_bool(draw(self.duplicate_rate))
            }
        };
        self.counter.record(decision)
    }

    fn name(&self) -> &'static str {
        "clustering"
    }

    fn stats(&self) -> SamplerStats {
        SamplerStats {
            clusters: self.index.sizes(),
            ..self.counter.stats(self.name())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Map, Value, json};

    fn fp(value: Value) -> Fingerprint {
        Fingerprint::of(&[], value.as_object().unwrap())
    }

    #[test]
    fn test_table_duplicates_and_novelty() {
        let mut table = ClusterTable::new(10);

        assert!(table.observe(fp(json!({"q": "shoes", "page": 1})), 0.8).is_novel());
        let repeat = table.observe(fp(json!({"q": "boots", "page": 2})), 0.8);
        assert!(matches!(repeat, Observation::Duplicate { cluster_id: 0, .. }));
        assert!(table.observe(fp(json!({"ids": [1, 2, 3]})), 0.8).is_novel());

        assert_eq!(table.len(), 2);
        assert_eq!(table.clusters().next().unwrap().hits, 2);
    }

    #[test]
    fn test_table_evicts_oldest() {
        let mut table = ClusterTable::new(2);
        table.observe(fp(json!({"a": 1})), 0.9);
        table.observe(fp(json!({"b": "x"})), 0.9);
        table.observe(fp(json!({"c": [true]})), 0.9);

        let ids: Vec<u64> = table.clusters().map(|c| c.id).collect();
        assert_eq!(ids, vec![1, 2]);
        // The evicted shape is novel again
        assert!(table.observe(fp(json!({"a": 1})), 0.9).is_novel());
    }

    #[test]
    fn test_duplicates_follow_rate() {
        let sampler = ClusteringSampler::new(0.8, 0.0, 100);
        let args = [json!({"user_id": 7, "items": [1, 2]})];
        let kwargs = Map::new();
        let call = CallSample {
            function_name: "cart.total",
            args: &args,
            kwargs: &kwargs,
            had_error: false,
        };

        assert!(sampler.decide(&call).is_sample());
        for _ in 0..50 {
            assert_eq!(sampler.decide(&call), SamplingDecision::Drop);
        }

        let other_args = [json!("completely different")];
        let novel = CallSample {
            args: &other_args,
            ..call
        };
        assert!(sampler.decide(&novel).is_sample());

        let stats = sampler.stats();
        assert_eq!(stats.sampled, 2);
        assert_eq!(stats.clusters["cart.total"], 2);
    }

    #[test]
    fn test_functions_have_separate_tables() {
        let sampler = ClusteringSampler::new(0.8, 0.0, 100);
        let args = [json!(1)];
        let kwargs = Map::new();
        for name in ["a", "b"] {
            let call = CallSample {
                function_name: name,
                args: &args,
                kwargs: &kwargs,
                had_error: false,
            };
            assert!(sampler.decide(&call).is_sample());
        }
    }
}
