use super::store::CounterStore;
use super::types::Limiter;
use crate::config::StoreFailurePolicy;
use crate::error::{LimiterError, Result};
use crate::metrics;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Length of one counting window
pub const WINDOW: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy)]
struct Thresholds {
    limit: i64,
    step: i64,
}

/// Distributed limiter counting calls in a shared 1-second window.
///
/// Every process using the same store and method key shares one quota.
pub struct SimpleRedisLimiter {
    /// Store key
    key: String,
    thresholds: RwLock<Thresholds>,
    store: Arc<dyn CounterStore>,
    failure_policy: StoreFailurePolicy,
}

impl SimpleRedisLimiter {
    /// Create a new distributed limiter for `method_key`
    pub fn new(method_key: &str, limit: i64, store: Arc<dyn CounterStore>) -> Result<Self> {
        let key = format!("simple-redis-limiter-{}", method_key);
        if limit <= 0 {
            error!("Bad simple redis limiter params, key: {}, limit: {}", key, limit);
            return Err(LimiterError::InvalidLimit { key, limit });
        }

        Ok(Self {
            key,
            thresholds: RwLock::new(Thresholds { limit, step: 0 }),
            store,
            failure_policy: StoreFailurePolicy::default(),
        })
    }

    /// Set the verdict returned when the store fails
    pub fn with_failure_policy(mut self, policy: StoreFailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    /// Run one INCR/PEXPIRE/PTTL round against the store
    async fn check_counter(&self) -> Result<bool> {
        let val = self.store.incr(&self.key).await?;
        debug!("Simple redis limiter key: {}, val: {}", self.key, val);

        if val == 1 {
            self.store.pexpire(&self.key, WINDOW).await?;
            debug!("Started new counter window for key: {}", self.key);
        }

        // A key left without expiry would never reset; repair it
        let ttl = self.store.pttl(&self.key).await?;
        if ttl < 0 {
            self.store.pexpire(&self.key, WINDOW).await?;
            warn!(
                "Counter for key {} had no expiry (pttl: {}), window restored",
                self.key, ttl
            );
        }

        Ok(val <= self.get_limit())
    }
}

#[async_trait]
impl Limiter for SimpleRedisLimiter {
    fn key(&self) -> &str {
        &self.key
    }

    fn kind(&self) -> &'static str {
        "simple"
    }

    fn set_limit(&self, new_limit: i64) -> Result<i64> {
        if new_limit <= 0 {
            return Err(LimiterError::InvalidLimit {
                key: self.key.clone(),
                limit: new_limit,
            });
        }

        let old_limit = std::mem::replace(&mut self.thresholds.write().limit, new_limit);
        info!(
            "Simple redis limiter limit updated, key: {}, old: {}, new: {}",
            self.key, old_limit, new_limit
        );
        Ok(old_limit)
    }

    fn get_limit(&self) -> i64 {
        self.thresholds.read().limit
    }

    fn set_step(&self, new_step: i64) -> i64 {
        if new_step < 0 {
            warn!(
                "Ignoring negative step {} for key: {}",
                new_step, self.key
            );
            return self.get_step();
        }

        let old_step = std::mem::replace(&mut self.thresholds.write().step, new_step);
        info!(
            "Simple redis limiter step updated, key: {}, old: {}, new: {}",
            self.key, old_step, new_step
        );
        old_step
    }

    fn get_step(&self) -> i64 {
        self.thresholds.read().step
    }

    fn set_limit_and_step(&self, new_limit: i64, new_step: i64) -> Result<(i64, i64)> {
        if new_limit <= 0 {
            return Err(LimiterError::InvalidLimit {
                key: self.key.clone(),
                limit: new_limit,
            });
        }
        if new_step < 0 {
            return Err(LimiterError::InvalidStep {
                key: self.key.clone(),
                step: new_step,
            });
        }

        let old = {
            let mut thresholds = self.thresholds.write();
            let old = *thresholds;
            *thresholds = Thresholds {
                limit: new_limit,
                step: new_step,
            };
            old
        };

        info!(
            "Simple redis limiter updated, key: {}, limit: {} -> {}, step: {} -> {}",
            self.key, old.limit, new_limit, old.step, new_step
        );
        Ok((old.limit, old.step))
    }

    async fn can_pass(&self) -> bool {
        match self.check_counter().await {
            Ok(allowed) => allowed,
            Err(e) => {
                let verdict = self.failure_policy.verdict();
                error!(
                    "Counter store error for key {}: {}, {} call",
                    self.key,
                    e,
                    if verdict { "admitting" } else { "rejecting" }
                );
                metrics::record_store_error(&self.key);
                verdict
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rate_limit::store::{MemoryCounterStore, RedisCounterStore, PTTL_NO_EXPIRY};

    /// Store whose every command fails
    struct FailingStore;

    #[async_trait]
    impl CounterStore for FailingStore {
        async fn incr(&self, key: &str) -> Result<i64> {
            Err(LimiterError::StoreTimeout(format!("INCR {}", key)))
        }

        async fn pexpire(&self, key: &str, _ttl: Duration) -> Result<bool> {
            Err(LimiterError::StoreTimeout(format!("PEXPIRE {}", key)))
        }

        async fn pttl(&self, key: &str) -> Result<i64> {
            Err(LimiterError::StoreTimeout(format!("PTTL {}", key)))
        }
    }

    #[tokio::test]
    async fn test_counter_admits_up_to_limit() {
        let store = Arc::new(MemoryCounterStore::new());
        let limiter = SimpleRedisLimiter::new("svc.Get", 3, store.clone()).unwrap();
        assert_eq!(limiter.key(), "simple-redis-limiter-svc.Get");

        for i in 0..3 {
            assert!(limiter.can_pass().await, "Call {} should be admitted", i);
        }
        assert!(!limiter.can_pass().await);

        let ttl = store.pttl(limiter.key()).await.unwrap();
        assert!(ttl > 0 && ttl <= 1000);
    }

    #[tokio::test]
    async fn test_counter_resets_after_window() {
        let store = Arc::new(MemoryCounterStore::new());
        let limiter = SimpleRedisLimiter::new("svc.Get", 2, store).unwrap();

        assert!(limiter.can_pass().await);
        assert!(limiter.can_pass().await);
        assert!(!limiter.can_pass().await);

        tokio::time::sleep(Duration::from_millis(1100)).await;

        assert!(limiter.can_pass().await);
    }

    #[tokio::test]
    async fn test_counter_shared_between_instances() {
        let store: Arc<dyn CounterStore> = Arc::new(MemoryCounterStore::new());
        let a = SimpleRedisLimiter::new("svc.Get", 2, store.clone()).unwrap();
        let b = SimpleRedisLimiter::new("svc.Get", 2, store).unwrap();

        assert!(a.can_pass().await);
        assert!(b.can_pass().await);
        assert!(!a.can_pass().await);
        assert!(!b.can_pass().await);
    }

    #[tokio::test]
    async fn test_counter_without_expiry_is_repaired() {
        let store = Arc::new(MemoryCounterStore::new());
        let limiter = SimpleRedisLimiter::new("svc.Get", 10, store.clone()).unwrap();

        // Key created by a caller that never reached PEXPIRE
        store.incr(limiter.key()).await.unwrap();
        assert_eq!(store.pttl(limiter.key()).await.unwrap(), PTTL_NO_EXPIRY);

        assert!(limiter.can_pass().await);
        assert!(store.pttl(limiter.key()).await.unwrap() > 0);
    }

    #[tokio::test]
    async fn test_store_failure_policy() {
        let closed = SimpleRedisLimiter::new("svc.Get", 10, Arc::new(FailingStore)).unwrap();
        assert!(!closed.can_pass().await);

        let open = SimpleRedisLimiter::new("svc.Get", 10, Arc::new(FailingStore))
            .unwrap()
            .with_failure_policy(StoreFailurePolicy::FailOpen);
        assert!(open.can_pass().await);
    }

    #[tokio::test]
    async fn test_set_limit_and_step() {
        let store = Arc::new(MemoryCounterStore::new());
        let limiter = SimpleRedisLimiter::new("svc.Get", 1, store).unwrap();

        assert!(limiter.can_pass().await);
        assert!(!limiter.can_pass().await);

        assert_eq!(limiter.set_limit(5).unwrap(), 1);
        assert!(limiter.can_pass().await);

        assert_eq!(limiter.set_step(2), 0);
        assert_eq!(limiter.set_step(-1), 2);
        assert_eq!(limiter.get_step(), 2);

        assert_eq!(limiter.set_limit_and_step(7, 3).unwrap(), (5, 2));
        assert_eq!((limiter.get_limit(), limiter.get_step()), (7, 3));

        assert!(limiter.set_limit(0).is_err());
        assert!(matches!(
            limiter.set_limit_and_step(-1, 3),
            Err(LimiterError::InvalidLimit { limit: -1, .. })
        ));
        assert!(matches!(
            limiter.set_limit_and_step(9, -4),
            Err(LimiterError::InvalidStep { step: -4, .. })
        ));
        assert_eq!((limiter.get_limit(), limiter.get_step()), (7, 3));
    }

    #[test]
    fn test_rejects_non_positive_limit() {
        let store: Arc<dyn CounterStore> = Arc::new(MemoryCounterStore::new());
        assert!(matches!(
            SimpleRedisLimiter::new("svc.Get", 0, store),
            Err(LimiterError::InvalidLimit { limit: 0, .. })
        ));
    }

    // Note: These tests require a running Redis instance
    // They are ignored by default. Run with: cargo test -- --ignored

    #[tokio::test]
    #[ignore]
    async fn test_redis_simple_limiter() {
        let store = RedisCounterStore::connect("redis://127.0.0.1:6379", Duration::from_millis(200))
            .await
            .expect("Failed to connect to Redis");

        let method_key = format!("test-svc.Get-{}", rand::random::<u32>());
        let limiter = SimpleRedisLimiter::new(&method_key, 10, Arc::new(store)).unwrap();

        for i in 0..10 {
            assert!(limiter.can_pass().await, "Call {} should be admitted", i);
        }
        assert!(!limiter.can_pass().await);
    }
}
