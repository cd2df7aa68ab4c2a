//! Error types for the containers, breakers and the breaker pool.

use std::error::Error;
use std::fmt::{self, Display, Formatter};

/// Result type for breaker-guarded operations.
pub type BreakerResult<T, E> = Result<T, BreakerError<E>>;

/// Error type for breaker-guarded operations.
#[derive(Debug)]
pub enum BreakerError<E> {
    /// The circuit is open and not yet eligible for a recovery probe.
    Open,

    /// The underlying operation failed. The error is passed through unchanged.
    Operation(E),
}

impl<E> BreakerError<E> {
    /// Returns `true` if the call was rejected without running the operation.
    pub fn is_open(&self) -> bool {
        matches!(self, BreakerError::Open)
    }

    /// Returns the operation error, if the operation ran and failed.
    pub fn into_operation(self) -> Option<E> {
        match self {
            BreakerError::Open => None,
            BreakerError::Operation(e) => Some(e),
        }
    }
}

impl<E> Display for BreakerError<E>
where
    E: Display,
{
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            BreakerError::Open => write!(f, "Circuit breaker is open"),
            BreakerError::Operation(e) => write!(f, "Operation error: {}", e),
        }
    }
}

impl<E: Error + 'static> Error for BreakerError<E> {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            BreakerError::Open => None,
            BreakerError::Operation(e) => Some(e),
        }
    }
}

/// A bounded container was constructed with an unusable capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapacityError {
    requested: usize,
}

impl CapacityError {
    pub(crate) fn new(requested: usize) -> Self {
        Self { requested }
    }

    /// The capacity that was rejected.
    pub fn requested(&self) -> usize {
        self.requested
    }
}

impl Display for CapacityError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if self.requested == 0 {
            write!(f, "Invalid capacity: must be greater than zero")
        } else {
            write!(f, "Invalid capacity: {} is too large", self.requested)
        }
    }
}

impl Error for CapacityError {}

/// Invalid breaker or pool configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// `failure_threshold` must be at least one.
    ZeroFailureThreshold,

    /// `error_threshold_percentage` must lie in `0..=100`.
    PercentageOutOfRange(u8),

    /// `max_breakers` must be at least one.
    ZeroMaxBreakers,

    /// `cleanup_interval` must be non-zero.
    ZeroCleanupInterval,

    /// `breaker_timeout` must be non-zero.
    ZeroBreakerTimeout,
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::ZeroFailureThreshold => {
                write!(f, "failure threshold must be at least 1")
            }
            ConfigError::PercentageOutOfRange(p) => {
                write!(f, "error threshold percentage {} is outside 0..=100", p)
            }
            ConfigError::ZeroMaxBreakers => write!(f, "max breakers must be at least 1"),
            ConfigError::ZeroCleanupInterval => write!(f, "cleanup interval must be non-zero"),
            ConfigError::ZeroBreakerTimeout => write!(f, "breaker timeout must be non-zero"),
        }
    }
}

impl Error for ConfigError {}

/// Error type for breaker pool operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PoolError {
    /// The pool has been shut down.
    Shutdown,

    /// The pool or a per-domain override was misconfigured.
    InvalidConfig(ConfigError),

    /// The background cleanup task could not be started.
    Spawn(String),
}

impl Display for PoolError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            PoolError::Shutdown => write!(f, "Breaker pool has been shut down"),
            PoolError::InvalidConfig(e) => write!(f, "Invalid breaker configuration: {}", e),
            PoolError::Spawn(e) => write!(f, "Failed to start pool cleanup task: {}", e),
        }
    }
}

impl Error for PoolError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            PoolError::Shutdown | PoolError::Spawn(_) => None,
            PoolError::InvalidConfig(e) => Some(e),
        }
    }
}

impl From<ConfigError> for PoolError {
    fn from(e: ConfigError) -> Self {
        PoolError::InvalidConfig(e)
    }
}

/// Failure reported by an executor's teardown hook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TeardownError(pub String);

impl Display for TeardownError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "Teardown failed: {}", self.0)
    }
}

impl Error for TeardownError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Boom;

    impl Display for Boom {
        fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
            write!(f, "boom")
        }
    }

    impl Error for Boom {}

    #[test]
    fn operation_error_is_exposed_as_source() {
        let err: BreakerError<Boom> = BreakerError::Operation(Boom);
        assert_eq!(err.to_string(), "Operation error: boom");
        assert!(err.source().is_some());
        assert!(!err.is_open());

        let open: BreakerError<Boom> = BreakerError::Open;
        assert!(open.source().is_none());
        assert!(open.into_operation().is_none());
    }

    #[test]
    fn pool_error_wraps_config_error() {
        let err = PoolError::from(ConfigError::PercentageOutOfRange(120));
        assert!(err.to_string().contains("120"));
        assert!(err.source().is_some());
        assert!(PoolError::Shutdown.source().is_none());
    }

    #[test]
    fn capacity_error_messages() {
        assert!(CapacityError::new(0).to_string().contains("greater than zero"));
        assert!(CapacityError::new(usize::MAX).to_string().contains("too large"));
    }
}
