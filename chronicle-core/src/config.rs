//! Configuration types for the Chronicle engine
//!
//! A [`ChronicleConfig`] is an immutable snapshot. The capture pipeline swaps
//! whole snapshots on reconfiguration, so every section here is plain data with
//! no interior state.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{ChronicleError, Result};

/// Main configuration for Chronicle
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChronicleConfig {
    /// Capture pipeline behavior
    pub capture: CaptureConfig,

    /// Sampling strategy and its parameters
    pub sampling: SamplingConfig,

    /// Function and type limiters
    pub limits: LimitsConfig,

    /// Redaction of sensitive values
    pub redaction: RedactionConfig,
}

/// How persistence is scheduled relative to returning the call's result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PersistMode {
    /// Await the store before returning
    #[default]
    Inline,

    /// Spawn the save onto the current runtime, bounded by `max_inflight_persists`
    Deferred,
}

/// Capture pipeline configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Master switch; when off the pipeline only forwards calls
    pub enabled: bool,

    /// Maximum serialized size of a single value, in bytes
    pub max_serialized_size: usize,

    /// Collect dependency calls reported during execution
    pub track_dependencies: bool,

    /// Persistence scheduling
    pub persist_mode: PersistMode,

    /// Upper bound on concurrently running deferred saves
    pub max_inflight_persists: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_serialized_size: 64 * 1024,
            track_dependencies: true,
            persist_mode: PersistMode::Inline,
            max_inflight_persists: 64,
        }
    }
}

/// Sampling strategy selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    /// Capture everything
    All,

    /// Capture nothing
    Never,

    /// Uniform random sampling at `sampling_rate`
    #[default]
    Random,

    /// Similarity clustering: novel shapes always, duplicates at `sampling_rate`
    Clustering,

    /// Random sampling with error and novelty boosts
    Adaptive,

    /// First `head_count` calls per function
    Head,
}

/// Sampling configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingConfig {
    /// Primary strategy
    pub strategy: StrategyKind,

    /// Base sampling rate (0.0 to 1.0)
    pub sampling_rate: f64,

    /// Similarity at or above which a call joins an existing cluster
    pub cluster_similarity_threshold: f64,

    /// Cluster representatives kept per function; oldest is evicted first
    pub max_clusters_per_function: usize,

    /// Rate multiplier applied when the call raised an error (adaptive)
    pub error_boost_factor: f64,

    /// Rate multiplier applied when the call shape is novel (adaptive)
    pub novelty_boost_factor: f64,

    /// Lower clamp for the adaptive effective rate
    pub min_rate: f64,

    /// Upper clamp for the adaptive effective rate
    pub max_rate: f64,

    /// Recent fingerprints remembered per function for novelty (adaptive)
    pub novelty_window: usize,

    /// Calls captured per function by the head strategy
    pub head_count: u64,

    /// Capture every call that raised, regardless of strategy
    pub always_capture_errors: bool,

    /// Function names (or prefixes) that are always captured
    pub always_capture_functions: Vec<String>,

    /// Function names (or prefixes) that are never captured
    pub never_capture_functions: Vec<String>,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            strategy: StrategyKind::Random,
            sampling_rate: 0.1,
            cluster_similarity_threshold: 0.8,
            max_clusters_per_function: 100,
            error_boost_factor: 5.0,
            novelty_boost_factor: 3.0,
            min_rate: 0.01,
            max_rate: 1.0,
            novelty_window: 32,
            head_count: 100,
            always_capture_errors: true,
            always_capture_functions: Vec::new(),
            never_capture_functions: Vec::new(),
        }
    }
}

/// What a limiter does once a key has reached its limit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LimitAction {
    /// Stop persisting for the key
    #[default]
    Stop,

    /// Keep persisting at `overflow_sample_rate`
    Sample,
}

/// Threshold and overflow behavior for one limiter key
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LimitRule {
    /// Admissions allowed before the key is exceeded
    pub limit: u64,

    /// Behavior past the limit
    pub action: LimitAction,

    /// Rate used when `action` is `sample`
    pub overflow_sample_rate: f64,

    /// Raise an alert when the key crosses its limit
    pub alert_on_limit: bool,
}

impl LimitRule {
    fn validate(&self, what: &str) -> Result<()> {
        if self.limit == 0 {
            return Err(ChronicleError::config(format!("{what}: limit must be at least 1")));
        }
        check_unit_interval(&format!("{what}.overflow_sample_rate"), self.overflow_sample_rate)
    }
}

/// Function-based limiter configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FunctionLimitConfig {
    /// Maximum captures per function name
    pub limit_per_function: u64,

    /// Action when the limit is reached
    pub limit_action: LimitAction,

    /// Sample rate past the limit (if action is `sample`)
    pub overflow_sample_rate: f64,

    /// Whether to alert when the limit is reached
    pub alert_on_limit: bool,

    /// Per-function rule overrides
    pub overrides: HashMap<String, LimitRule>,
}

impl Default for FunctionLimitConfig {
    fn default() -> Self {
        Self {
            limit_per_function: 5000,
            limit_action: LimitAction::Stop,
            overflow_sample_rate: 0.01,
            alert_on_limit: true,
            overrides: HashMap::new(),
        }
    }
}

impl FunctionLimitConfig {
    /// Rule applying to `function_name`
    pub fn rule_for(&self, function_name: &str) -> LimitRule {
        self.overrides
            .get(function_name)
            .copied()
            .unwrap_or(LimitRule {
                limit: self.limit_per_function,
                action: self.limit_action,
                overflow_sample_rate: self.overflow_sample_rate,
                alert_on_limit: self.alert_on_limit,
            })
    }
}

/// Type-based limiter configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TypeLimitConfig {
    /// Dotted path into the call payload (e.g. `payload.type`)
    pub field_path: String,

    /// Maximum captures per distinct field value
    pub limit_per_type: u64,

    /// Action when the limit is reached
    pub limit_action: LimitAction,

    /// Sample rate past the limit (if action is `sample`)
    pub overflow_sample_rate: f64,

    /// Whether to alert when the limit is reached
    pub alert_on_limit: bool,
}

impl Default for TypeLimitConfig {
    fn default() -> Self {
        Self {
            field_path: "type".to_string(),
            limit_per_type: 5000,
            limit_action: LimitAction::Stop,
            overflow_sample_rate: 0.01,
            alert_on_limit: true,
        }
    }
}

impl TypeLimitConfig {
    /// Rule applying to every type value
    pub fn rule(&self) -> LimitRule {
        LimitRule {
            limit: self.limit_per_type,
            action: self.limit_action,
            overflow_sample_rate: self.overflow_sample_rate,
            alert_on_limit: self.alert_on_limit,
        }
    }
}

/// Limiter configuration; a limiter is active when its section is present
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Function-based limiter
    #[serde(skip_serializing_if = "Option::is_none")]
    pub function: Option<FunctionLimitConfig>,

    /// Type-based limiter
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub type_limit: Option<TypeLimitConfig>,

    /// Alerts retained for the admin API
    pub alert_log_capacity: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            function: None,
            type_limit: None,
            alert_log_capacity: 256,
        }
    }
}

/// Redaction configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RedactionConfig {
    /// Whether redaction runs at all
    pub enabled: bool,

    /// Field names (or dotted paths) whose values are masked, case-insensitive
    pub fields: Vec<String>,

    /// Regex patterns; string values matching any are masked
    pub patterns: Vec<String>,

    /// Nesting depth past which values are masked wholesale
    pub max_depth: usize,
}

impl Default for RedactionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            fields: [
                "password",
                "passwd",
                "secret",
                "token",
                "api_key",
                "apikey",
                "authorization",
                "credit_card",
                "ssn",
                "social_security",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            patterns: vec![
                r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}".to_string(),
                r"\b\d{3}-\d{2}-\d{4}\b".to_string(),
            ],
            max_depth: 16,
        }
    }
}

/// Builder for ChronicleConfig
pub struct ConfigBuilder {
    config: ChronicleConfig,
}

impl ConfigBuilder {
    /// Create a new configuration builder
    pub fn new() -> Self {
        Self {
            config: ChronicleConfig::default(),
        }
    }

    /// Set capture configuration
    pub fn capture(mut self, config: CaptureConfig) -> Self {
        self.config.capture = config;
        self
    }

    /// Set sampling configuration
    pub fn sampling(mut self, config: SamplingConfig) -> Self {
        self.config.sampling = config;
        self
    }

    /// Select a strategy and base rate, keeping other sampling settings
    pub fn strategy(mut self, strategy: StrategyKind, sampling_rate: f64) -> Self {
        self.config.sampling.strategy = strategy;
        self.config.sampling.sampling_rate = sampling_rate;
        self
    }

    /// Enable the function limiter
    pub fn function_limit(mut self, config: FunctionLimitConfig) -> Self {
        self.config.limits.function = Some(config);
        self
    }

    /// Enable the type limiter
    pub fn type_limit(mut self, config: TypeLimitConfig) -> Self {
        self.config.limits.type_limit = Some(config);
        self
    }

    /// Set redaction configuration
    pub fn redaction(mut self, config: RedactionConfig) -> Self {
        self.config.redaction = config;
        self
    }

    /// Validate and build the configuration
    pub fn build(self) -> Result<ChronicleConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ChronicleConfig {
    /// Create a configuration builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::new()
    }

    /// Figment used by [`load`](Self::load).
    ///
    /// Loads in this order:
    /// 1. Default configuration
    /// 2. `chronicle.toml` in the working directory
    /// 3. File named by `CHRONICLE_CONFIG_PATH`, if set
    /// 4. `CHRONICLE_`-prefixed environment variables, `__` separating sections
    pub fn figment() -> figment::Figment {
        use figment::{
            Figment,
            providers::{Env, Format, Serialized, Toml},
        };

        let mut figment = Figment::from(Serialized::defaults(ChronicleConfig::default()))
            .merge(Toml::file("chronicle.toml"));

        if let Ok(path) = std::env::var("CHRONICLE_CONFIG_PATH") {
            figment = figment.merge(Toml::file(path));
        }

        figment.merge(
            Env::prefixed("CHRONICLE_")
                .ignore(&["CONFIG_PATH"])
                .split("__"),
        )
    }

    /// Load configuration from file and environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a source is malformed or the result fails validation.
    pub fn load() -> Result<Self> {
        let config: ChronicleConfig = Self::figment().extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed, or validated.
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self> {
        use figment::{
            Figment,
            providers::{Format, Serialized, Toml},
        };

        let config: ChronicleConfig = Figment::from(Serialized::defaults(ChronicleConfig::default()))
            .merge(Toml::file(path.as_ref()))
            .extract()?;

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ChronicleError::Configuration`] naming the first invalid setting.
    pub fn validate(&self) -> Result<()> {
        if self.capture.max_serialized_size == 0 {
            return Err(ChronicleError::config(
                "capture.max_serialized_size must be greater than zero",
            ));
        }
        if self.capture.persist_mode == PersistMode::Deferred
            && self.capture.max_inflight_persists == 0
        {
            return Err(ChronicleError::config(
                "capture.max_inflight_persists must be greater than zero in deferred mode",
            ));
        }

        let s = &self.sampling;
        check_unit_interval("sampling.sampling_rate", s.sampling_rate)?;
        check_unit_interval(
            "sampling.cluster_similarity_threshold",
            s.cluster_similarity_threshold,
        )?;
        check_unit_interval("sampling.min_rate", s.min_rate)?;
        check_unit_interval("sampling.max_rate", s.max_rate)?;
        if s.min_rate > s.max_rate {
            return Err(ChronicleError::config(format!(
                "sampling.min_rate ({}) exceeds sampling.max_rate ({})",
                s.min_rate, s.max_rate
            )));
        }
        for (name, factor) in [
            ("sampling.error_boost_factor", s.error_boost_factor),
            ("sampling.novelty_boost_factor", s.novelty_boost_factor),
        ] {
            if !factor.is_finite() || factor < 1.0 {
                return Err(ChronicleError::config(format!(
                    "{name} must be a finite number >= 1.0, got {factor}"
                )));
            }
        }
        if s.max_clusters_per_function == 0 {
            return Err(ChronicleError::config(
                "sampling.max_clusters_per_function must be at least 1",
            ));
        }
        if s.novelty_window == 0 {
            return Err(ChronicleError::config("sampling.novelty_window must be at least 1"));
        }

        if let Some(function) = &self.limits.function {
            function.rule_for("").validate("limits.function")?;
            for (name, rule) in &function.overrides {
                rule.validate(&format!("limits.function.overrides.{name}"))?;
            }
        }
        if let Some(type_limit) = &self.limits.type_limit {
            if type_limit.field_path.split('.').any(str::is_empty) {
                return Err(ChronicleError::config(format!(
                    "limits.type.field_path is not a valid dotted path: '{}'",
                    type_limit.field_path
                )));
            }
            type_limit.rule().validate("limits.type")?;
        }

        for pattern in &self.redaction.patterns {
            regex::Regex::new(pattern).map_err(|e| {
                ChronicleError::config(format!("redaction pattern '{pattern}' is invalid: {e}"))
            })?;
        }

        Ok(())
    }
}

fn check_unit_interval(name: &str, value: f64) -> Result<()> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ChronicleError::config(format!(
            "{name} must be within [0.0, 1.0], got {value}"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config_is_valid() {
        assert!(ChronicleConfig::default().validate().is_ok());
    }

    #[test]
    fn test_rejects_rate_out_of_range() {
        let result = ChronicleConfig::builder()
            .strategy(StrategyKind::Random, 1.5)
            .build();

        match result {
            Err(ChronicleError::Configuration(msg)) => assert!(msg.contains("sampling_rate")),
            other => panic!("expected configuration error, got {:?}", other),
        }
    }

    #[test]
    fn test_rejects_inverted_rate_clamp() {
        let sampling = SamplingConfig {
            min_rate: 0.9,
            max_rate: 0.2,
            ..Default::default()
        };
        assert!(ChronicleConfig::builder().sampling(sampling).build().is_err());
    }

    #[test]
    fn test_rejects_zero_limit_and_bad_pattern() {
        let zero_limit = ChronicleConfig::builder().function_limit(FunctionLimitConfig {
            limit_per_function: 0,
            ..Default::default()
        });
        assert!(zero_limit.build().is_err());

        let bad_pattern = ChronicleConfig::builder().redaction(RedactionConfig {
            patterns: vec!["(unclosed".to_string()],
            ..Default::default()
        });
        assert!(bad_pattern.build().is_err());
    }

    #[test]
    fn test_function_override_rule() {
        let mut config = FunctionLimitConfig::default();
        config.overrides.insert(
            "billing.charge".to_string(),
            LimitRule {
                limit: 3,
                action: LimitAction::Sample,
                overflow_sample_rate: 0.5,
                alert_on_limit: false,
            },
        );

        assert_eq!(config.rule_for("billing.charge").limit, 3);
        assert_eq!(config.rule_for("other").limit, 5000);
        assert_eq!(config.rule_for("other").action, LimitAction::Stop);
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[sampling]
strategy = "clustering"
sampling_rate = 0.25

[limits.function]
limit_per_function = 10
limit_action = "sample"
"#
        )
        .unwrap();

        let config = ChronicleConfig::from_file(file.path()).unwrap();
        assert_eq!(config.sampling.strategy, StrategyKind::Clustering);
        assert_eq!(config.sampling.sampling_rate, 0.25);
        let function = config.limits.function.unwrap();
        assert_eq!(function.limit_per_function, 10);
        assert_eq!(function.limit_action, LimitAction::Sample);
        // Untouched sections keep their defaults
        assert_eq!(config.capture, CaptureConfig::default());
    }

    #[test]
    fn test_load_with_env_overrides() {
        figment::Jail::expect_with(|jail| {
            jail.create_file(
                "chronicle.toml",
                r#"
[sampling]
strategy = "adaptive"
"#,
            )?;
            jail.set_env("CHRONICLE_SAMPLING__SAMPLING_RATE", "0.5");
            jail.set_env("CHRONICLE_CAPTURE__PERSIST_MODE", "deferred");

            let config = ChronicleConfig::load().expect("config should load");
            assert_eq!(config.sampling.strategy, StrategyKind::Adaptive);
            assert_eq!(config.sampling.sampling_rate, 0.5);
            assert_eq!(config.capture.persist_mode, PersistMode::Deferred);
            Ok(())
        });
    }

    #[test]
    fn test_load_rejects_invalid_env() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("CHRONICLE_SAMPLING__SAMPLING_RATE", "2.0");
            assert!(ChronicleConfig::load().is_err());
            Ok(())
        });
    }
}
