use crate::error::{LimiterError, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use redis::aio::ConnectionManager;
use std::future::Future;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// `PTTL` reply for a key that does not exist
pub const PTTL_MISSING: i64 = -2;
/// `PTTL` reply for a key without an expiry
pub const PTTL_NO_EXPIRY: i64 = -1;

/// Minimal shared counter store used by distributed limiters
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Increment the integer at `key`, creating it at 0 first if missing
    async fn incr(&self, key: &str) -> Result<i64>;

    /// Set the time-to-live of `key`; returns false if the key is missing
    async fn pexpire(&self, key: &str, ttl: Duration) -> Result<bool>;

    /// Remaining time-to-live in milliseconds, negative if none
    async fn pttl(&self, key: &str) -> Result<i64>;
}

/// Redis-backed counter store
#[derive(Clone)]
pub struct RedisCounterStore {
    /// Redis connection manager
    connection: ConnectionManager,
    /// Per-command timeout
    timeout: Duration,
}

impl RedisCounterStore {
    /// Connect to Redis
    pub async fn connect(redis_url: &str, timeout: Duration) -> Result<Self> {
        let client = redis::Client::open(redis_url)?;
        let connection = tokio::time::timeout(timeout * 10, ConnectionManager::new(client))
            .await
            .map_err(|_| LimiterError::StoreTimeout(format!("connect to {}", redis_url)))??;

        info!("Connected to Redis counter store");
        Ok(Self {
            connection,
            timeout,
        })
    }

    /// Test Redis connection
    pub async fn ping(&self) -> Result<()> {
        let mut connection = self.connection.clone();
        self.bounded("PING", redis::cmd("PING").query_async::<_, ()>(&mut connection))
            .await
    }

    async fn bounded<T, F>(&self, command: &str, fut: F) -> Result<T>
    where
        F: Future<Output = redis::RedisResult<T>>,
    {
        tokio::time::timeout(self.timeout, fut)
            .await
            .map_err(|_| LimiterError::StoreTimeout(format!("{} after {:?}", command, self.timeout)))?
            .map_err(LimiterError::from)
    }
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn incr(&self, key: &str) -> Result<i64> {
        let mut connection = self.connection.clone();
        self.bounded(
            "INCR",
            redis::cmd("INCR").arg(key).query_async::<_, i64>(&mut connection),
        )
        .await
    }

    async fn pexpire(&self, key: &str, ttl: Duration) -> Result<bool> {
        let mut connection = self.connection.clone();
        self.bounded(
            "PEXPIRE",
            redis::cmd("PEXPIRE")
                .arg(key)
                .arg(ttl.as_millis() as u64)
                .query_async::<_, bool>(&mut connection),
        )
        .await
    }

    async fn pttl(&self, key: &str) -> Result<i64> {
        let mut connection = self.connection.clone();
        self.bounded(
            "PTTL",
            redis::cmd("PTTL").arg(key).query_async::<_, i64>(&mut connection),
        )
        .await
    }
}

#[derive(Debug, Clone, Copy)]
struct Counter {
    value: i64,
    expires_at: Option<Instant>,
}

impl Counter {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// In-process counter store with the same INCR/PEXPIRE/PTTL semantics as
/// Redis. Only shares quota between limiters of the same process.
#[derive(Default)]
pub struct MemoryCounterStore {
    counters: DashMap<String, Counter>,
}

impl MemoryCounterStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live keys
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.counters.iter().filter(|c| !c.is_expired(now)).count()
    }

    /// Whether the store holds no live keys
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn incr(&self, key: &str) -> Result<i64> {
        let now = Instant::now();
        let mut counter = self.counters.entry(key.to_string()).or_insert(Counter {
            value: 0,
            expires_at: None,
        });

        if counter.is_expired(now) {
            debug!("Counter expired, starting over for key: {}", key);
            *counter = Counter {
                value: 0,
                expires_at: None,
            };
        }

        counter.value += 1;
        Ok(counter.value)
    }

    async fn pexpire(&self, key: &str, ttl: Duration) -> Result<bool> {
        let now = Instant::now();
        match self.counters.get_mut(key) {
            Some(mut counter) if !counter.is_expired(now) => {
                counter.expires_at = Some(now + ttl);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn pttl(&self, key: &str) -> Result<i64> {
        let now = Instant::now();
        let ttl = match self.counters.get(key) {
            Some(counter) if !counter.is_expired(now) => match counter.expires_at {
                Some(at) => at.duration_since(now).as_millis() as i64,
                None => PTTL_NO_EXPIRY,
            },
            _ => PTTL_MISSING,
        };
        Ok(ttl)
    }
}
