//! Breaker pool walkthrough.
//!
//! Run with `RUST_LOG=debug cargo run --example pool` to see state changes and
//! evictions logged.

use breakerpool::{BreakerError, BreakerOverrides, BreakerPool, HookRegistry, RingBuffer};
use std::error::Error;
use std::fmt;
use std::thread;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Debug)]
struct ServiceError(String);

impl fmt::Display for ServiceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Service error: {}", self.0)
    }
}

impl Error for ServiceError {}

// Fails on calls 4 through 8, succeeds otherwise
fn call_service(counter: &mut u32) -> Result<String, ServiceError> {
    *counter += 1;
    if (4..=8).contains(&*counter) {
        Err(ServiceError("upstream unavailable".to_string()))
    } else {
        Ok(format!("response #{}", counter))
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let pool = BreakerPool::builder()
        .max_breakers(8)
        .breaker_timeout(Duration::from_secs(30))
        .hooks(|domain| {
            let hooks = HookRegistry::new();
            let name = domain.to_string();
            hooks.set_on_open(move || println!("circuit for {} OPENED", name));
            hooks
        })
        .build()
        .expect("valid pool configuration");

    let overrides = BreakerOverrides::new()
        .failure_threshold(3)
        .reset_timeout(Duration::from_secs(1));

    // Keep the last few outcomes for display
    let mut recent = RingBuffer::new(4).expect("non-zero capacity");
    let mut counter = 0;

    for attempt in 1..=15 {
        let breaker = pool
            .get_or_create("inventory", Some(&overrides))
            .expect("pool is running");

        let outcome = match breaker.execute(|| call_service(&mut counter)) {
            Ok(body) => format!("ok: {}", body),
            Err(BreakerError::Open) => "rejected: circuit open".to_string(),
            Err(BreakerError::Operation(err)) => format!("failed: {}", err),
        };
        println!("attempt {:>2} [{}] {}", attempt, breaker.state(), outcome);
        recent.push(outcome);

        thread::sleep(Duration::from_millis(300));
    }

    println!("\nlast outcomes:");
    for line in &recent {
        println!("  {}", line);
    }

    for stats in pool.stats().expect("pool is running") {
        println!(
            "{}: state={} failures={} successes={}",
            stats.domain(),
            stats.breaker.state,
            stats.breaker.failures,
            stats.breaker.successes
        );
    }

    pool.shutdown();
}
