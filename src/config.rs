//! Configuration for breakers and the breaker pool.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{ConfigError, PoolError};
use crate::hook::{HookFactory, HookRegistry};
use crate::metrics::{MetricSink, NullMetricSink};
use crate::pool::BreakerPool;

/// Default absolute failure count that opens a circuit.
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 5;
/// Default wait before a recovery probe is permitted.
pub const DEFAULT_RESET_TIMEOUT: Duration = Duration::from_millis(60_000);
/// Default failure percentage that opens a circuit.
pub const DEFAULT_ERROR_THRESHOLD_PERCENTAGE: u8 = 50;
/// Default maximum number of breakers held by a pool.
pub const DEFAULT_MAX_BREAKERS: usize = 100;
/// Default period of the pool's idle cleanup task.
pub const DEFAULT_CLEANUP_INTERVAL: Duration = Duration::from_millis(60_000);
/// Default idle time after which a pooled breaker is evicted.
pub const DEFAULT_BREAKER_TIMEOUT: Duration = Duration::from_millis(300_000);

/// Settings for a single breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerConfig {
    /// Failures that open the circuit regardless of volume.
    pub failure_threshold: u32,
    /// Time after the last failure before a recovery probe is allowed.
    pub reset_timeout: Duration,
    /// Failure ratio (0-100) that opens the circuit once volume is sufficient.
    pub error_threshold_percentage: u8,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            reset_timeout: DEFAULT_RESET_TIMEOUT,
            error_threshold_percentage: DEFAULT_ERROR_THRESHOLD_PERCENTAGE,
        }
    }
}

impl BreakerConfig {
    /// Checks that every field is usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.failure_threshold == 0 {
            return Err(ConfigError::ZeroFailureThreshold);
        }
        if self.error_threshold_percentage > 100 {
            return Err(ConfigError::PercentageOutOfRange(
                self.error_threshold_percentage,
            ));
        }
        Ok(())
    }
}

/// Per-domain overrides merged over a pool's breaker defaults.
///
/// Fields left as `None` keep the pool's value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BreakerOverrides {
    /// Overrides [`BreakerConfig::failure_threshold`].
    pub failure_threshold: Option<u32>,
    /// Overrides [`BreakerConfig::reset_timeout`].
    pub reset_timeout: Option<Duration>,
    /// Overrides [`BreakerConfig::error_threshold_percentage`].
    pub error_threshold_percentage: Option<u8>,
}

impl BreakerOverrides {
    /// Creates an empty set of overrides.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the failure threshold override.
    pub fn failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = Some(threshold);
        self
    }

    /// Sets the reset timeout override.
    pub fn reset_timeout(mut self, timeout: Duration) -> Self {
        self.reset_timeout = Some(timeout);
        self
    }

    /// Sets the error percentage override.
    pub fn error_threshold_percentage(mut self, percentage: u8) -> Self {
        self.error_threshold_percentage = Some(percentage);
        self
    }

    /// Merges the present fields over `base`.
    pub fn apply(&self, base: &BreakerConfig) -> BreakerConfig {
        BreakerConfig {
            failure_threshold: self.failure_threshold.unwrap_or(base.failure_threshold),
            reset_timeout: self.reset_timeout.unwrap_or(base.reset_timeout),
            error_threshold_percentage: self
                .error_threshold_percentage
                .unwrap_or(base.error_threshold_percentage),
        }
    }
}

/// Settings for a [`BreakerPool`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    /// Upper bound on pooled breakers; least recently used are evicted past it.
    pub max_breakers: usize,
    /// Period of the background idle cleanup.
    pub cleanup_interval: Duration,
    /// Idle time after which a breaker is evicted. Breakers older than twice
    /// this are evicted even when in use.
    pub breaker_timeout: Duration,
    /// Settings for breakers created without overrides.
    pub breaker_defaults: BreakerConfig,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_breakers: DEFAULT_MAX_BREAKERS,
            cleanup_interval: DEFAULT_CLEANUP_INTERVAL,
            breaker_timeout: DEFAULT_BREAKER_TIMEOUT,
            breaker_defaults: BreakerConfig::default(),
        }
    }
}

impl PoolConfig {
    /// Checks the pool settings and the breaker defaults.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_breakers == 0 {
            return Err(ConfigError::ZeroMaxBreakers);
        }
        if self.cleanup_interval.is_zero() {
            return Err(ConfigError::ZeroCleanupInterval);
        }
        if self.breaker_timeout.is_zero() {
            return Err(ConfigError::ZeroBreakerTimeout);
        }
        self.breaker_defaults.validate()
    }
}

/// Builder for creating breaker pools with custom configurations.
pub struct PoolBuilder {
    config: PoolConfig,
    metric_sink: Arc<dyn MetricSink>,
    hook_factory: Option<HookFactory>,
}

impl Default for PoolBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for PoolBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolBuilder")
            .field("config", &self.config)
            .field("hooks", &self.hook_factory.is_some())
            .finish()
    }
}

impl PoolBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self {
            config: PoolConfig::default(),
            metric_sink: Arc::new(NullMetricSink),
            hook_factory: None,
        }
    }

    /// Replaces the whole pool configuration.
    pub fn config(mut self, config: PoolConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the maximum number of pooled breakers.
    pub fn max_breakers(mut self, max: usize) -> Self {
        self.config.max_breakers = max;
        self
    }

    /// Sets the period of the idle cleanup task.
    pub fn cleanup_interval(mut self, interval: Duration) -> Self {
        self.config.cleanup_interval = interval;
        self
    }

    /// Sets the idle time after which breakers are evicted.
    pub fn breaker_timeout(mut self, timeout: Duration) -> Self {
        self.config.breaker_timeout = timeout;
        self
    }

    /// Sets the default failure threshold for new breakers.
    pub fn failure_threshold(mut self, threshold: u32) -> Self {
        self.config.breaker_defaults.failure_threshold = threshold;
        self
    }

    /// Sets the default reset timeout for new breakers.
    pub fn reset_timeout(mut self, timeout: Duration) -> Self {
        self.config.breaker_defaults.reset_timeout = timeout;
        self
    }

    /// Sets the default error percentage for new breakers.
    pub fn error_threshold_percentage(mut self, percentage: u8) -> Self {
        self.config.breaker_defaults.error_threshold_percentage = percentage;
        self
    }

    /// Sets a metric sink shared by the pool and all of its breakers.
    pub fn metric_sink<M: MetricSink>(mut self, sink: M) -> Self {
        self.metric_sink = Arc::new(sink);
        self
    }

    /// Sets a factory producing the hook registry for each new breaker.
    pub fn hooks<F>(mut self, factory: F) -> Self
    where
        F: Fn(&str) -> HookRegistry + Send + Sync + 'static,
    {
        self.hook_factory = Some(Arc::new(factory));
        self
    }

    /// Validates the configuration and starts the pool.
    pub fn build(self) -> Result<BreakerPool, PoolError> {
        BreakerPool::with_parts(self.config, self.metric_sink, self.hook_factory)
    }
}
