//! Circuit breaker state machine implementation.

use std::fmt;
use std::time::{Duration, Instant};

use crate::config::BreakerConfig;

/// Operations required before the percentage rule may open a circuit.
pub const MIN_VOLUME_FOR_PERCENTAGE: u64 = 5;

/// Represents the possible states of a circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum State {
    /// Circuit is closed and operations are allowed.
    Closed,

    /// Circuit is open and operations are rejected.
    Open,

    /// A single recovery probe is in flight.
    HalfOpen,
}

impl State {
    /// Lower-case label, suitable for metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            State::Closed => "closed",
            State::Open => "open",
            State::HalfOpen => "half-open",
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A state change produced by one of the [`BreakerState`] operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    /// State before the change.
    pub from: State,
    /// State after the change.
    pub to: State,
}

/// Failure-tracking state machine for one circuit.
///
/// Pure bookkeeping: it never runs operations and never retries. Callers
/// classify each call with [`BreakerState::should_attempt_recovery`] and report
/// outcomes through [`BreakerState::record_success`] and
/// [`BreakerState::record_failure`]. Methods ending in `_at` take the current
/// time explicitly; the others read the clock.
#[derive(Debug, Clone)]
pub struct BreakerState {
    state: State,
    failure_count: u64,
    success_count: u64,
    operation_count: u64,
    last_failure_time: Option<Instant>,
    last_transition: Instant,
    config: BreakerConfig,
}

impl Default for BreakerState {
    fn default() -> Self {
        Self::new(BreakerConfig::default())
    }
}

impl BreakerState {
    /// Creates a closed state machine with zeroed counters.
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            state: State::Closed,
            failure_count: 0,
            success_count: 0,
            operation_count: 0,
            last_failure_time: None,
            last_transition: Instant::now(),
            config,
        }
    }

    /// Gets the current state.
    pub fn current(&self) -> State {
        self.state
    }

    /// The configuration this state machine evaluates against.
    pub fn config(&self) -> &BreakerConfig {
        &self.config
    }

    /// Failures since creation, the last reset, or the last successful probe.
    pub fn failure_count(&self) -> u64 {
        self.failure_count
    }

    /// Successes since creation or the last manual reset.
    pub fn success_count(&self) -> u64 {
        self.success_count
    }

    /// Recorded outcomes since creation or the last manual reset.
    pub fn operation_count(&self) -> u64 {
        self.operation_count
    }

    /// When the most recent failure was recorded.
    pub fn last_failure_time(&self) -> Option<Instant> {
        self.last_failure_time
    }

    /// When the state last changed.
    pub fn last_transition_time(&self) -> Instant {
        self.last_transition
    }

    /// Failures as a percentage of all recorded operations.
    pub fn error_percentage(&self) -> f64 {
        if self.operation_count == 0 {
            return 0.0;
        }
        self.failure_count as f64 / self.operation_count as f64 * 100.0
    }

    /// Whether the counters call for opening the circuit.
    ///
    /// Either the absolute threshold is reached, or at least
    /// [`MIN_VOLUME_FOR_PERCENTAGE`] operations were recorded and the failure
    /// ratio reached the configured percentage.
    pub fn should_open(&self) -> bool {
        if self.failure_count >= u64::from(self.config.failure_threshold) {
            return true;
        }
        self.operation_count >= MIN_VOLUME_FOR_PERCENTAGE
            && self.failure_count * 100
                >= u64::from(self.config.error_threshold_percentage) * self.operation_count
    }

    /// Whether a call may proceed, reading the clock.
    pub fn should_attempt_recovery(&self) -> bool {
        self.should_attempt_recovery_at(Instant::now())
    }

    /// Whether a call may proceed at `now`.
    ///
    /// Always true unless open; when open, true once `reset_timeout` has
    /// passed since the last failure.
    pub fn should_attempt_recovery_at(&self, now: Instant) -> bool {
        if self.state != State::Open {
            return true;
        }
        match self.last_failure_time {
            Some(at) => now.saturating_duration_since(at) >= self.config.reset_timeout,
            None => true,
        }
    }

    /// Time left until a recovery probe is allowed, or zero if it already is.
    pub fn remaining_cooldown_at(&self, now: Instant) -> Duration {
        match (self.state, self.last_failure_time) {
            (State::Open, Some(at)) => self
                .config
                .reset_timeout
                .saturating_sub(now.saturating_duration_since(at)),
            _ => Duration::ZERO,
        }
    }

    /// Records a successful operation.
    ///
    /// A success while half-open closes the circuit and clears the failure
    /// count; success and operation counts keep accumulating.
    pub fn record_success(&mut self) -> Option<Transition> {
        self.record_success_at(Instant::now())
    }

    /// [`BreakerState::record_success`] with an explicit clock.
    pub fn record_success_at(&mut self, now: Instant) -> Option<Transition> {
        self.success_count += 1;
        self.operation_count += 1;

        if self.state == State::HalfOpen {
            self.failure_count = 0;
            return Some(self.transition(State::Closed, now));
        }
        None
    }

    /// Records a failed operation.
    pub fn record_failure(&mut self) -> Option<Transition> {
        self.record_failure_at(Instant::now())
    }

    /// [`BreakerState::record_failure`] with an explicit clock.
    ///
    /// Opens a closed circuit when [`BreakerState::should_open`] holds, and
    /// reopens a half-open one unconditionally.
    pub fn record_failure_at(&mut self, now: Instant) -> Option<Transition> {
        self.failure_count += 1;
        self.operation_count += 1;
        self.last_failure_time = Some(now);

        match self.state {
            State::Closed if self.should_open() => Some(self.transition(State::Open, now)),
            State::HalfOpen => Some(self.transition(State::Open, now)),
            _ => None,
        }
    }

    /// Counts an outcome without any state change.
    ///
    /// Used for calls admitted while closed that finish after the circuit
    /// moved on, so they cannot decide a probe they were not part of.
    pub fn tally_at(&mut self, success: bool, now: Instant) {
        self.operation_count += 1;
        if success {
            self.success_count += 1;
        } else {
            self.failure_count += 1;
            self.last_failure_time = Some(now);
        }
    }

    /// Claims the single recovery probe.
    ///
    /// Moves an open circuit whose cooldown has elapsed to half-open. Returns
    /// `None`, changing nothing, in every other case.
    pub fn begin_probe_at(&mut self, now: Instant) -> Option<Transition> {
        if self.state == State::Open && self.should_attempt_recovery_at(now) {
            return Some(self.transition(State::HalfOpen, now));
        }
        None
    }

    /// Returns an abandoned probe's circuit to open without counting anything.
    ///
    /// `last_failure_time` is untouched, so the next call may probe again.
    pub fn abort_probe_at(&mut self, now: Instant) -> Option<Transition> {
        if self.state == State::HalfOpen {
            return Some(self.transition(State::Open, now));
        }
        None
    }

    /// Returns to closed with every counter zeroed. Manual override only.
    pub fn reset(&mut self) -> Option<Transition> {
        let now = Instant::now();
        self.failure_count = 0;
        self.success_count = 0;
        self.operation_count = 0;
        self.last_failure_time = None;

        if self.state != State::Closed {
            return Some(self.transition(State::Closed, now));
        }
        None
    }

    fn transition(&mut self, to: State, now: Instant) -> Transition {
        let from = self.state;
        self.state = to;
        self.last_transition = now;
        Transition { from, to }
    }
}
