//! Metric sinks and read-only statistics snapshots.

use std::fmt;
use std::time::{Duration, Instant};

use crate::state::State;

/// Why the pool dropped a breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EvictionReason {
    /// The pool grew past `max_breakers`; the least recently used was dropped.
    Capacity,
    /// Unused for longer than `breaker_timeout`.
    Idle,
    /// Older than twice `breaker_timeout`, regardless of use.
    MaxAge,
    /// Removed explicitly by the caller.
    Removed,
    /// The pool shut down.
    Shutdown,
}

impl EvictionReason {
    /// Lower-case label, suitable for metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            EvictionReason::Capacity => "capacity",
            EvictionReason::Idle => "idle",
            EvictionReason::MaxAge => "max_age",
            EvictionReason::Removed => "removed",
            EvictionReason::Shutdown => "shutdown",
        }
    }
}

impl fmt::Display for EvictionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Trait for metrics sinks that can receive breaker and pool events.
pub trait MetricSink: Send + Sync + 'static {
    /// Records a state transition event.
    fn record_state_transition(&self, domain: &str, from: State, to: State);

    /// Records the outcome of an operation that was allowed to run.
    fn record_call(&self, domain: &str, success: bool, duration: Duration);

    /// Records a call rejected because the circuit was open.
    fn record_rejection(&self, domain: &str);

    /// Records a breaker leaving the pool.
    fn record_eviction(&self, domain: &str, reason: EvictionReason);
}

/// A null metrics sink that discards all events.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullMetricSink;

impl MetricSink for NullMetricSink {
    fn record_state_transition(&self, _domain: &str, _from: State, _to: State) {}
    fn record_call(&self, _domain: &str, _success: bool, _duration: Duration) {}
    fn record_rejection(&self, _domain: &str) {}
    fn record_eviction(&self, _domain: &str, _reason: EvictionReason) {}
}

/// Point-in-time view of one breaker.
#[derive(Debug, Clone, PartialEq)]
pub struct BreakerStats {
    /// Domain the breaker guards.
    pub domain: String,
    /// Current state.
    pub state: State,
    /// Failure count, as used by the trip rules.
    pub failures: u64,
    /// Cumulative success count.
    pub successes: u64,
    /// Cumulative recorded operations.
    pub operations: u64,
    /// When the latest failure was recorded.
    pub last_failure_time: Option<Instant>,
    /// When the state last changed.
    pub last_transition_time: Instant,
}

impl BreakerStats {
    /// Failures as a percentage of recorded operations.
    pub fn error_percentage(&self) -> f64 {
        if self.operations == 0 {
            return 0.0;
        }
        self.failures as f64 / self.operations as f64 * 100.0
    }
}

/// Point-in-time view of a pooled breaker, with pool bookkeeping.
#[derive(Debug, Clone, PartialEq)]
pub struct DomainStats {
    /// Breaker counters and state.
    pub breaker: BreakerStats,
    /// When the pool created the breaker.
    pub created_time: Instant,
    /// When the breaker was last handed out by the pool.
    pub last_used_time: Instant,
}

impl DomainStats {
    /// Domain the breaker guards.
    pub fn domain(&self) -> &str {
        &self.breaker.domain
    }

    /// Time since the breaker was last handed out.
    pub fn idle_for(&self) -> Duration {
        self.last_used_time.elapsed()
    }
}
