//! Capture limits
//!
//! Limiters cap how many records are persisted per key: the function name
//! for [`FunctionLimiter`], or the value found at a configured field path for
//! [`TypeLimiter`]. Counts only ever grow until an administrative reset.
//!
//! Admission reserves a slot with an exact conditional increment, so
//! concurrent callers never persist more than the limit. Calls dropped after
//! admission (sampled out, refused further on, failed to save) give their
//! slot back. The commit that reaches the limit raises one alert; the key
//! stays silent afterwards until it is reset.

mod path;

pub use path::resolve_field_path;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::{debug, warn};

use crate::config::{FunctionLimitConfig, LimitAction, LimitRule, LimitsConfig, TypeLimitConfig};
use crate::sampling::draw;

/// Outcome of asking a limiter to admit one call
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LimitDecision {
    /// Under the limit
    Allow,
    /// Over the limit with the `stop` action
    Deny,
    /// Over the limit with the `sample` action; admit with this probability
    SampleAt(f64),
}

/// Which limiter a key belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LimiterKind {
    Function,
    Type,
}

impl fmt::Display for LimiterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LimiterKind::Function => write!(f, "function"),
            LimiterKind::Type => write!(f, "type"),
        }
    }
}

/// Raised once when a key first goes over its limit
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LimitAlert {
    pub kind: LimiterKind,
    pub key: String,
    pub limit: u64,
    pub action: LimitAction,
    pub raised_at: DateTime<Utc>,
}

/// Bounded log of recent limit alerts, oldest dropped first
#[derive(Debug)]
pub struct AlertLog {
    entries: Mutex<VecDeque<LimitAlert>>,
    capacity: usize,
}

impl AlertLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::new()),
            capacity,
        }
    }

    fn push(&self, alert: LimitAlert) {
        if self.capacity == 0 {
            return;
        }
        let mut entries = self.entries.lock();
        if entries.len() >= self.capacity {
            entries.pop_front();
        }
        entries.push_back(alert);
    }

    /// Alerts, oldest first
    pub fn entries(&self) -> Vec<LimitAlert> {
        self.entries.lock().iter().cloned().collect()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

/// Counter state for one key
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LimiterSnapshot {
    pub key: String,
    /// Records persisted under the key
    pub count: u64,
    /// Admitted calls not yet persisted or dropped
    pub pending: u64,
    pub exceeded: bool,
    /// Records persisted past the limit by overflow sampling
    pub overflow_admissions: u64,
}

#[derive(Debug, Default)]
struct KeyState {
    /// Persisted records plus outstanding reservations
    slots: AtomicU64,
    persisted: AtomicU64,
    exceeded: AtomicBool,
    overflow: AtomicU64,
}

/// Per-key counters shared by both limiter kinds
///
/// Admission reserves a slot; the slot becomes a count only when the
/// [`Reservation`] is committed after the record is persisted.
#[derive(Debug)]
pub struct KeyedLimiter {
    kind: LimiterKind,
    states: DashMap<String, Arc<KeyState>>,
    alerts: Arc<AlertLog>,
}

impl KeyedLimiter {
    pub fn new(kind: LimiterKind, alerts: Arc<AlertLog>) -> Self {
        Self {
            kind,
            states: DashMap::new(),
            alerts,
        }
    }

    fn state(&self, key: &str) -> Arc<KeyState> {
        if let Some(state) = self.states.get(key) {
            return state.clone();
        }
        self.states.entry(key.to_string()).or_default().clone()
    }

    /// Reserve a slot for `key` under `rule`, resolving overflow sampling
    /// with a random draw. Returns `None` when the call is refused.
    ///
    /// Dropping the reservation without committing frees the slot.
    pub fn reserve(self: &Arc<Self>, key: &str, rule: &LimitRule) -> Option<Reservation> {
        let state = self.state(key);
        let overflow = match self.decide(key, &state, rule) {
            LimitDecision::Allow => false,
            LimitDecision::Deny => return None,
            LimitDecision::SampleAt(rate) => {
                if !draw(rate) {
                    return None;
                }
                true
            }
        };
        Some(Reservation {
            limiter: self.clone(),
            state,
            key: key.to_string(),
            rule: *rule,
            overflow,
            settled: false,
        })
    }

    fn decide(&self, key: &str, state: &KeyState, rule: &LimitRule) -> LimitDecision {
        let reserved = state
            .slots
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |slots| {
                (slots < rule.limit).then_some(slots + 1)
            })
            .is_ok();
        if reserved {
            return LimitDecision::Allow;
        }

        // A lowered limit is crossed without a further commit
        if state.persisted.load(Ordering::Acquire) >= rule.limit {
            self.mark_exceeded(key, state, rule);
        }
        match rule.action {
            LimitAction::Stop => LimitDecision::Deny,
            LimitAction::Sample => LimitDecision::SampleAt(rule.overflow_sample_rate),
        }
    }

    fn commit(&self, key: &str, state: &KeyState, rule: &LimitRule, overflow: bool) {
        if overflow {
            state.overflow.fetch_add(1, Ordering::Relaxed);
            return;
        }
        let persisted = state.persisted.fetch_add(1, Ordering::AcqRel) + 1;
        if persisted >= rule.limit {
            self.mark_exceeded(key, state, rule);
        }
    }

    fn mark_exceeded(&self, key: &str, state: &KeyState, rule: &LimitRule) {
        if state.exceeded.swap(true, Ordering::AcqRel) || !rule.alert_on_limit {
            return;
        }
        warn!(
            limiter = %self.kind,
            key = %key,
            limit = rule.limit,
            action = ?rule.action,
            "Capture limit reached"
        );
        self.alerts.push(LimitAlert {
            kind: self.kind,
            key: key.to_string(),
            limit: rule.limit,
            action: rule.action,
            raised_at: Utc::now(),
        });
    }

    /// Clear one key; returns whether it had state.
    ///
    /// Reservations taken before the reset settle against the old state.
    pub fn reset(&self, key: &str) -> bool {
        let existed = self.states.remove(key).is_some();
        if existed {
            debug!(limiter = %self.kind, key = %key, "Limiter key reset");
        }
        existed
    }

    pub fn reset_all(&self) {
        self.states.clear();
        debug!(limiter = %self.kind, "All limiter keys reset");
    }

    /// State of every tracked key, sorted by key
    pub fn snapshot(&self) -> Vec<LimiterSnapshot> {
        let mut snapshot: Vec<LimiterSnapshot> = self
            .states
            .iter()
            .map(|entry| {
                let persisted = entry.persisted.load(Ordering::Acquire);
                LimiterSnapshot {
                    key: entry.key().clone(),
                    count: persisted,
                    pending: entry.slots.load(Ordering::Acquire).saturating_sub(persisted),
                    exceeded: entry.exceeded.load(Ordering::Acquire),
                    overflow_admissions: entry.overflow.load(Ordering::Relaxed),
                }
            })
            .collect();
        snapshot.sort_by(|a, b| a.key.cmp(&b.key));
        snapshot
    }

    pub fn kind(&self) -> LimiterKind {
        self.kind
    }
}

/// A slot held for one admitted call
///
/// [`Reservation::commit`] counts the call once its record is persisted;
/// dropping the reservation instead returns the slot.
#[derive(Debug)]
pub struct Reservation {
    limiter: Arc<KeyedLimiter>,
    state: Arc<KeyState>,
    key: String,
    rule: LimitRule,
    overflow: bool,
    settled: bool,
}

impl Reservation {
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Whether the call was admitted past the limit by overflow sampling
    pub fn is_overflow(&self) -> bool {
        self.overflow
    }

    pub fn commit(mut self) {
        self.settled = true;
        self.limiter
            .commit(&self.key, &self.state, &self.rule, self.overflow);
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        if self.settled || self.overflow {
            return;
        }
        let _ = self
            .state
            .slots
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |slots| slots.checked_sub(1));
    }
}

/// Reservations taken by every configured limiter for one call
#[derive(Debug, Default)]
pub struct Admission {
    reservations: Vec<Reservation>,
}

impl Admission {
    /// Count the call against every limiter that admitted it
    pub fn commit(self) {
        self.reservations.into_iter().for_each(Reservation::commit);
    }

    pub fn reservations(&self) -> &[Reservation] {
        &self.reservations
    }
}

/// Caps captures per function name
#[derive(Debug)]
pub struct FunctionLimiter {
    counters: Arc<KeyedLimiter>,
}

impl FunctionLimiter {
    pub fn new(alerts: Arc<AlertLog>) -> Self {
        Self {
            counters: Arc::new(KeyedLimiter::new(LimiterKind::Function, alerts)),
        }
    }

    pub fn reserve(&self, function_name: &str, config: &FunctionLimitConfig) -> Option<Reservation> {
        self.counters.reserve(function_name, &config.rule_for(function_name))
    }

    pub fn counters(&self) -> &KeyedLimiter {
        &self.counters
    }
}

/// Outcome of the type limiter for one call
#[derive(Debug)]
pub enum TypeAdmission {
    /// The call has no value at the field path and is not limited
    Exempt,
    Reserved(Reservation),
    Refused,
}

/// Caps captures per value of a payload field, e.g. an event `type`
#[derive(Debug)]
pub struct TypeLimiter {
    counters: Arc<KeyedLimiter>,
}

impl TypeLimiter {
    pub fn new(alerts: Arc<AlertLog>) -> Self {
        Self {
            counters: Arc::new(KeyedLimiter::new(LimiterKind::Type, alerts)),
        }
    }

    /// Reserve by the value at `config.field_path`.
    ///
    /// Calls without a value at that path are exempt and leave every
    /// counter untouched.
    pub fn reserve(
        &self,
        args: &[Value],
        kwargs: &Map<String, Value>,
        config: &TypeLimitConfig,
    ) -> TypeAdmission {
        let Some(key) = resolve_field_path(&config.field_path, args, kwargs) else {
            return TypeAdmission::Exempt;
        };
        match self.counters.reserve(&key, &config.rule()) {
            Some(reservation) => TypeAdmission::Reserved(reservation),
            None => TypeAdmission::Refused,
        }
    }

    pub fn counters(&self) -> &KeyedLimiter {
        &self.counters
    }
}

/// Both limiters and their shared alert log
#[derive(Debug)]
pub struct Limiters {
    function: FunctionLimiter,
    by_type: TypeLimiter,
    alerts: Arc<AlertLog>,
}

impl Limiters {
    pub fn new(alert_capacity: usize) -> Self {
        let alerts = Arc::new(AlertLog::new(alert_capacity));
        Self {
            function: FunctionLimiter::new(alerts.clone()),
            by_type: TypeLimiter::new(alerts.clone()),
            alerts,
        }
    }

    /// Run the configured limiters in order: function, then type.
    ///
    /// A call refused by the function limiter never reaches the type limiter,
    /// and a type refusal releases the function slot. Returns `None` when
    /// the call is refused.
    pub fn admit(
        &self,
        config: &LimitsConfig,
        function_name: &str,
        args: &[Value],
        kwargs: &Map<String, Value>,
    ) -> Option<Admission> {
        let mut admission = Admission::default();
        if let Some(function) = &config.function {
            admission
                .reservations
                .push(self.function.reserve(function_name, function)?);
        }
        if let Some(by_type) = &config.type_limit {
            match self.by_type.reserve(args, kwargs, by_type) {
                TypeAdmission::Exempt => {}
                TypeAdmission::Reserved(reservation) => admission.reservations.push(reservation),
                TypeAdmission::Refused => return None,
            }
        }
        Some(admission)
    }

    pub fn function(&self) -> &FunctionLimiter {
        &self.function
    }

    pub fn by_type(&self) -> &TypeLimiter {
        &self.by_type
    }

    fn counters(&self, kind: LimiterKind) -> &KeyedLimiter {
        match kind {
            LimiterKind::Function => self.function.counters(),
            LimiterKind::Type => self.by_type.counters(),
        }
    }

    pub fn reset(&self, kind: LimiterKind, key: &str) -> bool {
        self.counters(kind).reset(key)
    }

    pub fn reset_all(&self) {
        self.function.counters().reset_all();
        self.by_type.counters().reset_all();
    }

    pub fn snapshot(&self, kind: LimiterKind) -> Vec<LimiterSnapshot> {
        self.counters(kind).snapshot()
    }

    pub fn alerts(&self) -> Vec<LimitAlert> {
        self.alerts.entries()
    }
}
