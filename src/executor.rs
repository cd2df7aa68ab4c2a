//! Breaker executor: runs operations under a [`BreakerState`].

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::info;

use crate::config::BreakerConfig;
use crate::error::{BreakerError, BreakerResult, ConfigError, TeardownError};
use crate::hook::HookRegistry;
use crate::metrics::{BreakerStats, MetricSink, NullMetricSink};
use crate::state::{BreakerState, State, Transition};

/// Inner state of the executor, shared between clones.
struct ExecutorInner {
    domain: String,
    state: Mutex<BreakerState>,
    metric_sink: Arc<dyn MetricSink>,
    hooks: HookRegistry,
}

/// Wraps operations for one domain, rejecting them while the circuit is open.
///
/// Clones share the same state. The state lock is held only to decide whether
/// a call may run and to record its outcome, never while the operation runs.
/// After the reset timeout exactly one caller is admitted as the recovery
/// probe; others keep getting [`BreakerError::Open`] until it finishes.
#[derive(Clone)]
pub struct BreakerExecutor {
    inner: Arc<ExecutorInner>,
}

impl std::fmt::Debug for BreakerExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BreakerExecutor")
            .field("domain", &self.inner.domain)
            .field("state", &self.state())
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Admission {
    Normal,
    Probe,
}

/// Proof that a call was admitted. Dropping an unfinished probe (panic or a
/// cancelled future) hands the probe back.
struct CallPermit<'a> {
    executor: &'a BreakerExecutor,
    admission: Admission,
    finished: bool,
}

impl CallPermit<'_> {
    fn finish(mut self, success: bool, duration: Duration) {
        self.finished = true;
        self.executor.record_outcome(self.admission, success, duration);
    }
}

impl Drop for CallPermit<'_> {
    fn drop(&mut self) {
        if !self.finished && self.admission == Admission::Probe {
            let transition = self.executor.inner.state.lock().abort_probe_at(Instant::now());
            if let Some(t) = transition {
                self.executor.announce(t);
            }
        }
    }
}

impl BreakerExecutor {
    /// Creates a standalone executor with no hooks and no metrics.
    pub fn new(domain: impl Into<String>, config: BreakerConfig) -> Result<Self, ConfigError> {
        Self::with_parts(domain, config, Arc::new(NullMetricSink), HookRegistry::new())
    }

    /// Creates an executor reporting to `metric_sink` and firing `hooks`.
    pub fn with_parts(
        domain: impl Into<String>,
        config: BreakerConfig,
        metric_sink: Arc<dyn MetricSink>,
        hooks: HookRegistry,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let inner = ExecutorInner {
            domain: domain.into(),
            state: Mutex::new(BreakerState::new(config)),
            metric_sink,
            hooks,
        };

        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    /// Domain this executor guards.
    pub fn domain(&self) -> &str {
        &self.inner.domain
    }

    /// Gets the current state of the circuit.
    pub fn state(&self) -> State {
        self.inner.state.lock().current()
    }

    /// The configuration the circuit evaluates against.
    pub fn config(&self) -> BreakerConfig {
        *self.inner.state.lock().config()
    }

    /// Hooks fired by this executor. Hooks may be replaced at any time.
    pub fn hooks(&self) -> &HookRegistry {
        &self.inner.hooks
    }

    /// Snapshot of the circuit's counters.
    pub fn stats(&self) -> BreakerStats {
        let state = self.inner.state.lock();
        BreakerStats {
            domain: self.inner.domain.clone(),
            state: state.current(),
            failures: state.failure_count(),
            successes: state.success_count(),
            operations: state.operation_count(),
            last_failure_time: state.last_failure_time(),
            last_transition_time: state.last_transition_time(),
        }
    }

    /// Runs `operation` unless the circuit is open.
    ///
    /// Returns [`BreakerError::Open`] without calling `operation` when the
    /// circuit is open and its cooldown has not elapsed, or while another
    /// caller's recovery probe is in flight. An operation error is recorded
    /// and returned unchanged inside [`BreakerError::Operation`].
    pub fn execute<F, T, E>(&self, operation: F) -> BreakerResult<T, E>
    where
        F: FnOnce() -> Result<T, E>,
    {
        let permit = self.admit().ok_or(BreakerError::Open)?;

        let start = Instant::now();
        let result = operation();
        permit.finish(result.is_ok(), start.elapsed());

        result.map_err(BreakerError::Operation)
    }

    /// Async version of [`BreakerExecutor::execute`].
    ///
    /// Dropping the returned future while a recovery probe is pending returns
    /// the circuit to open so a later call can probe again.
    #[cfg(feature = "async")]
    #[cfg_attr(docsrs, doc(cfg(feature = "async")))]
    pub async fn execute_async<F, Fut, T, E>(&self, operation: F) -> BreakerResult<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
    {
        let permit = self.admit().ok_or(BreakerError::Open)?;

        let start = Instant::now();
        let result = operation().await;
        permit.finish(result.is_ok(), start.elapsed());

        result.map_err(BreakerError::Operation)
    }

    /// Forces the circuit closed and zeroes its counters.
    pub fn reset(&self) {
        let transition = self.inner.state.lock().reset();
        if let Some(t) = transition {
            self.announce(t);
        }
    }

    pub(crate) fn teardown(&self) -> Result<(), TeardownError> {
        self.inner.hooks.execute_teardown_hook()
    }

    fn admit(&self) -> Option<CallPermit<'_>> {
        let now = Instant::now();
        let (admission, transition) = {
            let mut state = self.inner.state.lock();
            match state.current() {
                State::Closed => (Some(Admission::Normal), None),
                State::Open => match state.begin_probe_at(now) {
                    Some(t) => (Some(Admission::Probe), Some(t)),
                    None => (None, None),
                },
                State::HalfOpen => (None, None),
            }
        };

        let permit = match admission {
            Some(admission) => CallPermit {
                executor: self,
                admission,
                finished: false,
            },
            None => {
                self.inner.metric_sink.record_rejection(&self.inner.domain);
                return None;
            }
        };

        if let Some(t) = transition {
            self.announce(t);
        }
        Some(permit)
    }

    fn record_outcome(&self, admission: Admission, success: bool, duration: Duration) {
        let now = Instant::now();
        let transition = {
            let mut state = self.inner.state.lock();
            if admission == Admission::Normal && state.current() == State::HalfOpen {
                state.tally_at(success, now);
                None
            } else if success {
                state.record_success_at(now)
            } else {
                state.record_failure_at(now)
            }
        };

        self.inner
            .metric_sink
            .record_call(&self.inner.domain, success, duration);
        if success {
            self.inner.hooks.execute_success_hook();
        } else {
            self.inner.hooks.execute_failure_hook();
        }

        if let Some(t) = transition {
            self.announce(t);
        }
    }

    fn announce(&self, t: Transition) {
        info!(
            domain = %self.inner.domain,
            from = %t.from,
            to = %t.to,
            "circuit breaker state changed"
        );
        self.inner
            .metric_sink
            .record_state_transition(&self.inner.domain, t.from, t.to);
        self.inner.hooks.execute_state_transition_hook(t.to);
    }
}
