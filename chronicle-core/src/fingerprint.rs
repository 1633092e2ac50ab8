//! Call fingerprints
//!
//! A [`Fingerprint`] reduces a call's arguments to a set of shape features:
//! for every argument, its type tag, a coarse bucket for scalars, and a size
//! bucket plus element signature for collections. Mapping arguments also
//! contribute features for their nested keys, down to a fixed depth.
//!
//! Two fingerprints are compared with Jaccard similarity, so calls with the
//! same request shape and slightly different values land close together.

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// How deep nested mapping keys contribute their own features
const MAX_NESTED_DEPTH: usize = 3;

/// Order-independent feature set for one call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Fingerprint {
    features: HashSet<u64>,
}

impl Fingerprint {
    /// Fingerprint positional and keyword arguments
    pub fn of(args: &[Value], kwargs: &Map<String, Value>) -> Self {
        let mut features = HashSet::new();
        for (index, arg) in args.iter().enumerate() {
            describe(&format!("${index}"), arg, 0, &mut features);
        }
        for (name, value) in kwargs {
            describe(name, value, 0, &mut features);
        }
        Self { features }
    }

    /// Jaccard similarity `|A ∩ B| / |A ∪ B|`, in `[0, 1]`.
    ///
    /// Two empty fingerprints (calls without arguments) are identical.
    pub fn similarity(&self, other: &Fingerprint) -> f64 {
        if self.features.is_empty() && other.features.is_empty() {
            return 1.0;
        }
        let (small, large) = if self.features.len() <= other.features.len() {
            (&self.features, &other.features)
        } else {
            (&other.features, &self.features)
        };
        let intersection = small.iter().filter(|f| large.contains(f)).count();
        let union = self.features.len() + other.features.len() - intersection;
        intersection as f64 / union as f64
    }

    /// Number of features
    pub fn len(&self) -> usize {
        self.features.len()
    }

    /// Whether the fingerprint has no features
    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    /// Stable short hex id for the exact feature set
    pub fn digest(&self) -> String {
        let mut sorted: Vec<u64> = self.features.iter().copied().collect();
        sorted.sort_unstable();

        let mut hasher = Sha256::new();
        for feature in sorted {
            hasher.update(feature.to_le_bytes());
        }
        format!("{:x}", hasher.finalize())[..16].to_string()
    }
}

/// Fingerprint a call's arguments
pub fn fingerprint(args: &[Value], kwargs: &Map<String, Value>) -> Fingerprint {
    Fingerprint::of(args, kwargs)
}

fn describe(name: &str, value: &Value, depth: usize, features: &mut HashSet<u64>) {
    let tag = type_tag(value);
    features.insert(feature(&[name, tag]));

    match value {
        Value::Null => {}
        Value::Bool(b) => {
            features.insert(feature(&[name, tag, if *b { "true" } else { "false" }]));
        }
        Value::Number(n) => {
            features.insert(feature(&[name, tag, &number_bucket(n)]));
        }
        Value::String(s) => {
            features.insert(feature(&[name, tag, size_bucket(s.chars().count())]));
        }
        Value::Array(items) => {
            features.insert(feature(&[name, "len", size_bucket(items.len())]));
            let mut element_tags: Vec<&str> = items.iter().map(type_tag).collect();
            element_tags.sort_unstable();
            element_tags.dedup();
            features.insert(feature(&[name, "elems", &element_tags.join("|")]));
        }
        Value::Object(map) => {
            features.insert(feature(&[name, "len", size_bucket(map.len())]));
            let mut keys: Vec<&str> = map.keys().map(String::as_str).collect();
            keys.sort_unstable();
            features.insert(feature(&[name, "keys", &keys.join(",")]));

            if depth < MAX_NESTED_DEPTH {
                for (key, child) in map {
                    describe(&format!("{name}.{key}"), child, depth + 1, features);
                }
            }
        }
    }
}

fn feature(parts: &[&str]) -> u64 {
    let mut hasher = DefaultHasher::new();
    parts.hash(&mut hasher);
    hasher.finish()
}

fn type_tag(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(n) if n.is_f64() => "float",
        Value::Number(_) => "int",
        Value::String(_) => "str",
        Value::Array(_) => "list",
        Value::Object(_) => "map",
    }
}

/// Sign and decimal magnitude, e.g. `+3` for 100..=999
fn number_bucket(n: &serde_json::Number) -> String {
    let x = n.as_f64().unwrap_or(0.0);
    if x == 0.0 {
        return "0".to_string();
    }
    let sign = if x < 0.0 { '-' } else { '+' };
    let magnitude = x.abs().log10().floor().clamp(-12.0, 18.0) as i32;
    format!("{sign}{magnitude}")
}

fn size_bucket(len: usize) -> &'static str {
    match len {
        0 => "0",
        1 => "1",
        2..=4 => "2-4",
        5..=16 => "5-16",
        17..=64 => "17-64",
        65..=512 => "65-512",
        _ => "513+",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn kwargs(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_identical_shapes_are_identical() {
        let a = fingerprint(&[json!(5)], &kwargs(json!({"user": {"id": 12, "name": "ann"}})));
        let b = fingerprint(&[json!(7)], &kwargs(json!({"user": {"id": 19, "name": "bob"}})));

        assert_eq!(a.similarity(&b), 1.0);
        assert_eq!(a.digest(), b.digest());
    }

    #[test]
    fn test_order_independent() {
        let a = fingerprint(&[], &kwargs(json!({"a": 1, "b": "x"})));
        let b = fingerprint(&[], &kwargs(json!({"b": "y", "a": 2})));
        assert_eq!(a, b);
    }

    #[test]
    fn test_partial_overlap() {
        let base = fingerprint(&[], &kwargs(json!({"query": "shoes", "page": 1, "size": 20})));
        let extra = fingerprint(
            &[],
            &kwargs(json!({"query": "boots", "page": 2, "size": 20, "sort": "price"})),
        );
        let different = fingerprint(&[json!([1, 2, 3])], &Map::new());

        let close = base.similarity(&extra);
        assert!(close > 0.5 && close < 1.0, "similarity was {close}");
        assert_eq!(base.similarity(&different), 0.0);
        assert_eq!(close, extra.similarity(&base));
    }

    #[test]
    fn test_magnitude_changes_bucket() {
        let small = fingerprint(&[json!(5)], &Map::new());
        let large = fingerprint(&[json!(5_000_000)], &Map::new());
        assert!(small.similarity(&large) < 1.0);
    }

    #[test]
    fn test_empty_fingerprints() {
        let empty = fingerprint(&[], &Map::new());
        assert!(empty.is_empty());
        assert_eq!(empty.similarity(&Fingerprint::default()), 1.0);
        assert_eq!(empty.digest().len(), 16);
    }
}
