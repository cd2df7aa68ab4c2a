//! # breakerpool
//!
//! Bounded in-memory containers and per-domain circuit breakers.
//!
//! The crate provides two general-purpose bounded containers and a fault
//! isolation layer built from three pieces:
//!
//! - [`RingBuffer`]: fixed-capacity FIFO that overwrites its oldest element
//!   when full.
//! - [`LruMap`]: capacity-bounded map evicting the least recently used entry.
//! - [`BreakerState`]: the CLOSED / OPEN / HALF_OPEN failure-tracking machine.
//! - [`BreakerExecutor`]: runs operations for one domain under a breaker.
//! - [`BreakerPool`]: one executor per domain, bounded by LRU eviction and an
//!   idle cleanup task.
//!
//! ## What is a Circuit Breaker?
//!
//! The Circuit Breaker pattern helps prevent cascading failures in distributed systems
//! by temporarily disabling operations that are likely to fail. It operates in
//! three states:
//!
//! - **Closed**: Normal operation. Calls pass through to the protected resource.
//! - **Open**: Calls are immediately rejected without attempting to reach the resource.
//! - **Half-Open**: After a cooldown period, a single probe call is permitted
//!   to check if the underlying resource has recovered.
//!
//! A circuit opens when it has seen `failure_threshold` failures, or when at
//! least five operations were recorded and `error_threshold_percentage` of
//! them failed.
//!
//! ## Basic Usage
//!
//! ```rust
//! use breakerpool::{BreakerError, BreakerOverrides, BreakerPool};
//! use std::time::Duration;
//!
//! let pool = BreakerPool::builder()
//!     .max_breakers(50)
//!     .reset_timeout(Duration::from_secs(30))
//!     .build()
//!     .expect("valid pool configuration");
//!
//! let overrides = BreakerOverrides::new().failure_threshold(3);
//! let breaker = pool.get_or_create("billing-api", Some(&overrides)).unwrap();
//!
//! match breaker.execute(|| -> Result<String, std::io::Error> { Ok("invoice".into()) }) {
//!     Ok(result) => println!("Call succeeded: {}", result),
//!     Err(BreakerError::Open) => println!("Circuit is open, call was prevented"),
//!     Err(BreakerError::Operation(err)) => println!("Call failed: {}", err),
//! }
//!
//! pool.shutdown();
//! ```
//!
//! ## Bounded containers
//!
//! ```rust
//! use breakerpool::{LruMap, RingBuffer};
//!
//! let mut recent = RingBuffer::new(3).unwrap(); // rounded up to 4 slots
//! recent.extend([1, 2, 3, 4, 5]);
//! assert_eq!(recent.to_vec(), vec![2, 3, 4, 5]);
//!
//! let mut cache = LruMap::new(2).unwrap();
//! cache.set("a", 1);
//! cache.set("b", 2);
//! cache.get("a");
//! cache.set("c", 3);
//! assert!(cache.peek("b").is_none());
//! ```
//!
//! ## Thread safety
//!
//! [`RingBuffer`] and [`LruMap`] do no locking; wrap them in a mutex to share
//! them. [`BreakerExecutor`] and [`BreakerPool`] are `Send + Sync`.
//!
//! ## Features
//!
//! - `std` - Standard library support (default)
//! - `async` - `BreakerExecutor::execute_async`
//! - `prometheus` - Prometheus metrics integration

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

mod config;
mod error;
mod executor;
mod hook;
mod lru;
mod metrics;
mod pool;
pub mod prelude;
#[cfg(feature = "prometheus")]
mod prometheus;
mod ring_buffer;
mod state;

// Re-exports
pub use config::{
    BreakerConfig, BreakerOverrides, PoolBuilder, PoolConfig, DEFAULT_BREAKER_TIMEOUT,
    DEFAULT_CLEANUP_INTERVAL, DEFAULT_ERROR_THRESHOLD_PERCENTAGE, DEFAULT_FAILURE_THRESHOLD,
    DEFAULT_MAX_BREAKERS, DEFAULT_RESET_TIMEOUT,
};
pub use error::{BreakerError, BreakerResult, CapacityError, ConfigError, PoolError, TeardownError};
pub use executor::BreakerExecutor;
pub use hook::{HookFactory, HookRegistry};
pub use lru::LruMap;
pub use metrics::{BreakerStats, DomainStats, EvictionReason, MetricSink, NullMetricSink};
pub use pool::BreakerPool;
#[cfg(feature = "prometheus")]
#[cfg_attr(docsrs, doc(cfg(feature = "prometheus")))]
pub use prometheus::PrometheusMetricSink;
pub use ring_buffer::RingBuffer;
pub use state::{BreakerState, State, Transition, MIN_VOLUME_FOR_PERCENTAGE};

/// Iterator types for the bounded containers.
pub mod iter {
    pub use crate::lru::Iter as LruIter;
    pub use crate::ring_buffer::Drain as RingBufferDrain;
    pub use crate::ring_buffer::Iter as RingBufferIter;
}
