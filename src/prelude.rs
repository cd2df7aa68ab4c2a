//! Re-exports common types for convenient usage.
//!
//! # Example
//! ```rust,no_run
//! use breakerpool::prelude::*;
//!
//! let pool = BreakerPool::new(PoolConfig::default()).unwrap();
//! let breaker: BreakerExecutor = pool.get_or_create("geo", None).unwrap();
//! assert_eq!(breaker.state(), State::Closed);
//! ```

pub use crate::{
    BreakerConfig, BreakerError, BreakerExecutor, BreakerOverrides, BreakerPool, BreakerResult,
    LruMap, PoolConfig, PoolError, RingBuffer, State,
};
