//! Per-domain breaker pool with LRU bounding and idle cleanup.
//!
//! The pool hands out one [`BreakerExecutor`] per domain, creating it on first
//! request. The map is bounded by `max_breakers`: an insert that overflows it
//! evicts the least recently handed-out breakers. A background thread wakes
//! every `cleanup_interval` and evicts breakers idle for longer than
//! `breaker_timeout`, plus any older than twice that regardless of use.
//!
//! Lookup, insert, eviction and the shutdown check happen under one lock, so
//! the size bound holds under concurrent `get_or_create`. Teardown hooks of
//! evicted breakers run after the lock is released; their errors are logged
//! and otherwise ignored.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use ahash::AHashMap;
use parking_lot::Mutex;
use smallvec::SmallVec;
use tracing::{debug, info, warn};

use crate::config::{BreakerOverrides, PoolBuilder, PoolConfig};
use crate::error::PoolError;
use crate::executor::BreakerExecutor;
use crate::hook::{HookFactory, HookRegistry};
use crate::metrics::{DomainStats, EvictionReason, MetricSink, NullMetricSink};

type Evicted = SmallVec<[(String, BreakerExecutor, EvictionReason); 4]>;

struct PoolEntry {
    executor: BreakerExecutor,
    created: Instant,
    last_used: Instant,
    // recency rank; strictly increasing, unlike Instant
    touched: u64,
}

#[derive(Default)]
struct Entries {
    map: AHashMap<String, PoolEntry>,
    clock: u64,
}

impl Entries {
    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    fn evict_overflow(&mut self, max: usize, evicted: &mut Evicted) {
        while self.map.len() > max {
            let lru = self
                .map
                .iter()
                .min_by_key(|(_, entry)| entry.touched)
                .map(|(domain, _)| domain.clone());
            let Some(domain) = lru else { break };
            if let Some(entry) = self.map.remove(&domain) {
                evicted.push((domain, entry.executor, EvictionReason::Capacity));
            }
        }
    }
}

struct PoolInner {
    entries: Mutex<Entries>,
    config: PoolConfig,
    metric_sink: Arc<dyn MetricSink>,
    hook_factory: Option<HookFactory>,
    shutdown: AtomicBool,
}

impl PoolInner {
    fn purge_expired(&self, now: Instant) -> Result<usize, PoolError> {
        let idle_limit = self.config.breaker_timeout;
        let age_limit = idle_limit.saturating_mul(2);

        let mut evicted = Evicted::new();
        {
            let mut entries = self.entries.lock();
            if self.shutdown.load(Ordering::Acquire) {
                return Err(PoolError::Shutdown);
            }
            entries.map.retain(|domain, entry| {
                let reason = if now.saturating_duration_since(entry.last_used) > idle_limit {
                    EvictionReason::Idle
                } else if now.saturating_duration_since(entry.created) > age_limit {
                    EvictionReason::MaxAge
                } else {
                    return true;
                };
                evicted.push((domain.clone(), entry.executor.clone(), reason));
                false
            });
        }

        let count = evicted.len();
        debug!(evicted = count, "breaker pool cleanup tick");
        self.retire_all(evicted);
        Ok(count)
    }

    fn retire_all<I>(&self, evicted: I)
    where
        I: IntoIterator<Item = (String, BreakerExecutor, EvictionReason)>,
    {
        for (domain, executor, reason) in evicted {
            self.retire(&domain, &executor, reason);
        }
    }

    fn retire(&self, domain: &str, executor: &BreakerExecutor, reason: EvictionReason) {
        debug!(domain = %domain, reason = %reason, "evicting circuit breaker");
        self.metric_sink.record_eviction(domain, reason);
        self.teardown(domain, executor);
    }

    // For a breaker that was built but never published.
    fn discard(&self, domain: &str, executor: &BreakerExecutor) {
        debug!(domain = %domain, "discarding unpublished circuit breaker");
        self.teardown(domain, executor);
    }

    fn teardown(&self, domain: &str, executor: &BreakerExecutor) {
        if let Err(e) = executor.teardown() {
            warn!(domain = %domain, error = %e, "breaker teardown failed; continuing");
        }
    }
}

struct CleanupTask {
    stop: mpsc::Sender<()>,
    handle: JoinHandle<()>,
}

fn run_cleanup(inner: Weak<PoolInner>, stop: mpsc::Receiver<()>, interval: Duration) {
    loop {
        match stop.recv_timeout(interval) {
            Err(RecvTimeoutError::Timeout) => {
                let Some(inner) = inner.upgrade() else { break };
                if inner.purge_expired(Instant::now()).is_err() {
                    break;
                }
            }
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }
    }
}

/// A bounded set of circuit breakers keyed by domain.
///
/// Construct one at startup and share it by reference or `Arc`. Dropping the
/// pool shuts it down.
pub struct BreakerPool {
    inner: Arc<PoolInner>,
    cleanup: Mutex<Option<CleanupTask>>,
}

impl std::fmt::Debug for BreakerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BreakerPool")
            .field("config", &self.inner.config)
            .field("len", &self.len())
            .field("shutdown", &self.is_shutdown())
            .finish()
    }
}

impl BreakerPool {
    /// Creates a pool with the given configuration, no hooks and no metrics.
    pub fn new(config: PoolConfig) -> Result<Self, PoolError> {
        Self::with_parts(config, Arc::new(NullMetricSink), None)
    }

    /// Creates a new builder for customizing a pool.
    pub fn builder() -> PoolBuilder {
        PoolBuilder::new()
    }

    pub(crate) fn with_parts(
        config: PoolConfig,
        metric_sink: Arc<dyn MetricSink>,
        hook_factory: Option<HookFactory>,
    ) -> Result<Self, PoolError> {
        config.validate()?;

        let inner = Arc::new(PoolInner {
            entries: Mutex::new(Entries::default()),
            config,
            metric_sink,
            hook_factory,
            shutdown: AtomicBool::new(false),
        });

        let (stop, stop_rx) = mpsc::channel();
        let weak = Arc::downgrade(&inner);
        let interval = config.cleanup_interval;
        let handle = thread::Builder::new()
            .name("breaker-pool-cleanup".into())
            .spawn(move || run_cleanup(weak, stop_rx, interval))
            .map_err(|e| PoolError::Spawn(e.to_string()))?;

        Ok(Self {
            inner,
            cleanup: Mutex::new(Some(CleanupTask { stop, handle })),
        })
    }

    /// The pool's configuration.
    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// Returns the breaker for `domain`, creating it if needed.
    ///
    /// A new breaker takes `overrides` merged over the pool defaults; for an
    /// existing breaker `overrides` is ignored. Either way the breaker becomes
    /// the most recently used. Creating one may evict the least recently used
    /// breakers to stay within `max_breakers`.
    pub fn get_or_create(
        &self,
        domain: &str,
        overrides: Option<&BreakerOverrides>,
    ) -> Result<BreakerExecutor, PoolError> {
        if let Some(executor) = self.touch(domain)? {
            return Ok(executor);
        }

        // Build outside the lock; the hook factory is caller code.
        let config = match overrides {
            Some(o) => o.apply(&self.inner.config.breaker_defaults),
            None => self.inner.config.breaker_defaults,
        };
        let hooks = match &self.inner.hook_factory {
            Some(factory) => factory(domain),
            None => HookRegistry::new(),
        };
        let created = BreakerExecutor::with_parts(
            domain,
            config,
            Arc::clone(&self.inner.metric_sink),
            hooks,
        )?;

        let mut evicted = Evicted::new();
        let executor = {
            let mut entries = self.inner.entries.lock();
            if self.inner.shutdown.load(Ordering::Acquire) {
                drop(entries);
                self.inner.discard(domain, &created);
                return Err(PoolError::Shutdown);
            }
            let now = Instant::now();
            let touched = entries.tick();

            match entries.map.get_mut(domain) {
                // lost a creation race; keep the published breaker
                Some(entry) => {
                    entry.last_used = now;
                    entry.touched = touched;
                    let published = entry.executor.clone();
                    drop(entries);
                    self.inner.discard(domain, &created);
                    published
                }
                None => {
                    entries.map.insert(
                        domain.to_owned(),
                        PoolEntry {
                            executor: created.clone(),
                            created: now,
                            last_used: now,
                            touched,
                        },
                    );
                    entries.evict_overflow(self.inner.config.max_breakers, &mut evicted);
                    debug!(domain = %domain, pooled = entries.map.len(), "created circuit breaker");
                    created
                }
            }
        };

        self.inner.retire_all(evicted);
        Ok(executor)
    }

    /// Removes the breaker for `domain`, running its teardown hook.
    ///
    /// Returns whether a breaker was present.
    pub fn remove(&self, domain: &str) -> Result<bool, PoolError> {
        let removed = {
            let mut entries = self.inner.entries.lock();
            if self.inner.shutdown.load(Ordering::Acquire) {
                return Err(PoolError::Shutdown);
            }
            entries.map.remove(domain)
        };

        match removed {
            Some(entry) => {
                self.inner
                    .retire(domain, &entry.executor, EvictionReason::Removed);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Runs one cleanup pass now, returning how many breakers were evicted.
    ///
    /// Fails with [`PoolError::Shutdown`] once the pool is shut down.
    pub fn cleanup(&self) -> Result<usize, PoolError> {
        self.inner.purge_expired(Instant::now())
    }

    /// Snapshots of every pooled breaker, most recently used first.
    pub fn stats(&self) -> Result<Vec<DomainStats>, PoolError> {
        let entries = self.inner.entries.lock();
        if self.inner.shutdown.load(Ordering::Acquire) {
            return Err(PoolError::Shutdown);
        }

        let mut ranked: Vec<(u64, DomainStats)> = entries
            .map
            .values()
            .map(|entry| (entry.touched, domain_stats(entry)))
            .collect();
        ranked.sort_unstable_by(|a, b| b.0.cmp(&a.0));
        Ok(ranked.into_iter().map(|(_, stats)| stats).collect())
    }

    /// Snapshot of one breaker, without counting as a use.
    pub fn domain_stats(&self, domain: &str) -> Result<Option<DomainStats>, PoolError> {
        let entries = self.inner.entries.lock();
        if self.inner.shutdown.load(Ordering::Acquire) {
            return Err(PoolError::Shutdown);
        }
        Ok(entries.map.get(domain).map(domain_stats))
    }

    /// Returns `true` if a breaker for `domain` is pooled. Does not touch it.
    pub fn contains(&self, domain: &str) -> bool {
        self.inner.entries.lock().map.contains_key(domain)
    }

    /// Number of pooled breakers.
    pub fn len(&self) -> usize {
        self.inner.entries.lock().map.len()
    }

    /// Returns `true` if no breakers are pooled.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns `true` once [`BreakerPool::shutdown`] has been called.
    pub fn is_shutdown(&self) -> bool {
        self.inner.shutdown.load(Ordering::Acquire)
    }

    /// Stops the cleanup task and evicts every breaker.
    ///
    /// Idempotent. Afterwards every pool operation fails with
    /// [`PoolError::Shutdown`]; executors already handed out keep working on
    /// their own.
    pub fn shutdown(&self) {
        let drained: Vec<(String, PoolEntry)> = {
            let mut entries = self.inner.entries.lock();
            if self.inner.shutdown.swap(true, Ordering::AcqRel) {
                return;
            }
            entries.map.drain().collect()
        };

        if let Some(task) = self.cleanup.lock().take() {
            // The receiver may already be gone; either way the loop exits.
            let _ = task.stop.send(());
            if task.handle.thread().id() != thread::current().id()
                && task.handle.join().is_err()
            {
                warn!("breaker pool cleanup thread panicked");
            }
        }

        let count = drained.len();
        self.inner.retire_all(
            drained
                .into_iter()
                .map(|(domain, entry)| (domain, entry.executor, EvictionReason::Shutdown)),
        );
        info!(evicted = count, "breaker pool shut down");
    }

    fn touch(&self, domain: &str) -> Result<Option<BreakerExecutor>, PoolError> {
        let mut entries = self.inner.entries.lock();
        if self.inner.shutdown.load(Ordering::Acquire) {
            return Err(PoolError::Shutdown);
        }
        let touched = entries.tick();
        Ok(entries.map.get_mut(domain).map(|entry| {
            entry.last_used = Instant::now();
            entry.touched = touched;
            entry.executor.clone()
        }))
    }
}

impl Drop for BreakerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn domain_stats(entry: &PoolEntry) -> DomainStats {
    DomainStats {
        breaker: entry.executor.stats(),
        created_time: entry.created,
        last_used_time: entry.last_used,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TeardownError;
    use crate::state::State;
    use std::sync::atomic::AtomicUsize;

    fn pool(max_breakers: usize, breaker_timeout: Duration) -> BreakerPool {
        BreakerPool::new(PoolConfig {
            max_breakers,
            cleanup_interval: Duration::from_secs(3600),
            breaker_timeout,
            ..PoolConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn returns_same_breaker_for_domain() {
        let pool = pool(10, Duration::from_secs(60));
        let a = pool.get_or_create("payments", None).unwrap();
        let b = pool.get_or_create("payments", None).unwrap();

        let _ = a.execute(|| Err::<(), _>("down"));
        assert_eq!(b.stats().failures, 1);
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn overrides_apply_only_on_creation() {
        let pool = pool(10, Duration::from_secs(60));
        let overrides = BreakerOverrides::new().failure_threshold(1);
        let first = pool.get_or_create("search", Some(&overrides)).unwrap();
        assert_eq!(first.config().failure_threshold, 1);

        let again = pool
            .get_or_create("search", Some(&BreakerOverrides::new().failure_threshold(9)))
            .unwrap();
        assert_eq!(again.config().failure_threshold, 1);

        let plain = pool.get_or_create("other", None).unwrap();
        assert_eq!(plain.config().failure_threshold, 5);
    }

    #[test]
    fn invalid_overrides_are_rejected() {
        let pool = pool(10, Duration::from_secs(60));
        let overrides = BreakerOverrides::new().error_threshold_percentage(150);
        let result = pool.get_or_create("bad", Some(&overrides));
        assert!(matches!(result, Err(PoolError::InvalidConfig(_))));
        assert!(!pool.contains("bad"));
    }

    #[test]
    fn overflow_evicts_least_recently_used() {
        let pool = pool(2, Duration::from_secs(60));
        pool.get_or_create("a", None).unwrap();
        pool.get_or_create("b", None).unwrap();
        pool.get_or_create("a", None).unwrap();
        pool.get_or_create("c", None).unwrap();

        assert_eq!(pool.len(), 2);
        assert!(pool.contains("a"));
        assert!(!pool.contains("b"));
        assert!(pool.contains("c"));
    }

    #[test]
    fn purge_removes_idle_breakers() {
        let pool = pool(10, Duration::from_secs(30));
        pool.get_or_create("idle", None).unwrap();

        let now = Instant::now();
        assert_eq!(pool.inner.purge_expired(now + Duration::from_secs(10)), Ok(0));
        assert_eq!(pool.inner.purge_expired(now + Duration::from_secs(31)), Ok(1));
        assert!(pool.is_empty());
    }

    #[test]
    fn purge_enforces_max_age_despite_use() {
        let pool = pool(10, Duration::from_secs(30));
        pool.get_or_create("busy", None).unwrap();
        {
            // simulate steady use by pulling last_used forward
            let mut entries = pool.inner.entries.lock();
            let entry = entries.map.get_mut("busy").unwrap();
            entry.last_used = entry.created + Duration::from_secs(55);
        }

        let created = pool.domain_stats("busy").unwrap().unwrap().created_time;
        assert_eq!(pool.inner.purge_expired(created + Duration::from_secs(60)), Ok(0));
        assert_eq!(pool.inner.purge_expired(created + Duration::from_secs(61)), Ok(1));
    }

    #[test]
    fn teardown_failures_do_not_block_eviction() {
        let torn_down = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&torn_down);
        let pool = BreakerPool::builder()
            .max_breakers(1)
            .cleanup_interval(Duration::from_secs(3600))
            .hooks(move |domain| {
                let hooks = HookRegistry::new();
                let counter = Arc::clone(&counter);
                let fails = domain == "flaky";
                hooks.set_on_teardown(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                    if fails {
                        Err(TeardownError("connection reset".into()))
                    } else {
                        Ok(())
                    }
                });
                hooks
            })
            .build()
            .unwrap();

        pool.get_or_create("flaky", None).unwrap();
        pool.get_or_create("steady", None).unwrap();
        assert!(!pool.contains("flaky"));
        assert_eq!(torn_down.load(Ordering::SeqCst), 1);

        assert_eq!(pool.remove("steady"), Ok(true));
        assert_eq!(pool.remove("steady"), Ok(false));
        assert_eq!(torn_down.load(Ordering::SeqCst), 2);
    }

    fn counting_hooks(built: &Arc<AtomicUsize>, torn_down: &Arc<AtomicUsize>) -> HookRegistry {
        built.fetch_add(1, Ordering::SeqCst);
        let hooks = HookRegistry::new();
        let torn_down = Arc::clone(torn_down);
        hooks.set_on_teardown(move || {
            torn_down.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        hooks
    }

    #[test]
    fn creation_race_tears_down_the_losing_breaker() {
        let built = Arc::new(AtomicUsize::new(0));
        let torn_down = Arc::new(AtomicUsize::new(0));
        // both callers finish building before either publishes
        let barrier = Arc::new(std::sync::Barrier::new(2));
        let pool = {
            let (built, torn_down) = (Arc::clone(&built), Arc::clone(&torn_down));
            let barrier = Arc::clone(&barrier);
            BreakerPool::builder()
                .cleanup_interval(Duration::from_secs(3600))
                .hooks(move |_| {
                    let hooks = counting_hooks(&built, &torn_down);
                    barrier.wait();
                    hooks
                })
                .build()
                .unwrap()
        };

        let executors: Vec<BreakerExecutor> = thread::scope(|s| {
            let handles: Vec<_> = (0..2)
                .map(|_| s.spawn(|| pool.get_or_create("db", None).unwrap()))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(built.load(Ordering::SeqCst), 2);
        assert_eq!(torn_down.load(Ordering::SeqCst), 1);
        assert_eq!(pool.len(), 1);
        // both callers got the published breaker
        let _ = executors[0].execute(|| Err::<(), _>("refused"));
        assert_eq!(executors[1].stats().failures, 1);

        pool.shutdown();
        assert_eq!(torn_down.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn breaker_built_during_shutdown_is_torn_down() {
        let built = Arc::new(AtomicUsize::new(0));
        let torn_down = Arc::new(AtomicUsize::new(0));
        let building = Arc::new(std::sync::Barrier::new(2));
        let resume = Arc::new(std::sync::Barrier::new(2));
        let pool = {
            let (built, torn_down) = (Arc::clone(&built), Arc::clone(&torn_down));
            let (building, resume) = (Arc::clone(&building), Arc::clone(&resume));
            BreakerPool::builder()
                .cleanup_interval(Duration::from_secs(3600))
                .hooks(move |_| {
                    let hooks = counting_hooks(&built, &torn_down);
                    building.wait();
                    resume.wait();
                    hooks
                })
                .build()
                .unwrap()
        };

        thread::scope(|s| {
            let caller = s.spawn(|| pool.get_or_create("db", None));
            building.wait();
            pool.shutdown();
            resume.wait();
            assert_eq!(caller.join().unwrap().unwrap_err(), PoolError::Shutdown);
        });

        assert_eq!(built.load(Ordering::SeqCst), 1);
        assert_eq!(torn_down.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn stats_are_sorted_by_recency() {
        let pool = pool(10, Duration::from_secs(60));
        pool.get_or_create("a", None).unwrap();
        pool.get_or_create("b", None).unwrap();
        let c = pool.get_or_create("c", None).unwrap();
        pool.get_or_create("a", None).unwrap();
        let _ = c.execute(|| Err::<(), _>("timeout"));

        let stats = pool.stats().unwrap();
        let order: Vec<_> = stats.iter().map(|s| s.domain().to_string()).collect();
        assert_eq!(order, vec!["a", "c", "b"]);
        assert_eq!(stats[1].breaker.failures, 1);
        assert_eq!(stats[1].breaker.state, State::Closed);
    }

    #[test]
    fn shutdown_is_idempotent_and_final() {
        let pool = pool(10, Duration::from_secs(60));
        let handed_out = pool.get_or_create("a", None).unwrap();

        pool.shutdown();
        pool.shutdown();

        assert!(pool.is_shutdown());
        assert!(pool.is_empty());
        assert_eq!(pool.get_or_create("a", None).unwrap_err(), PoolError::Shutdown);
        assert_eq!(pool.remove("a"), Err(PoolError::Shutdown));
        assert!(pool.stats().is_err());
        assert_eq!(pool.cleanup(), Err(PoolError::Shutdown));

        // already-issued executors still work
        assert!(handed_out.execute(|| Ok::<_, ()>(())).is_ok());
    }
}
