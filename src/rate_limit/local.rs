use super::types::Limiter;
use crate::error::{LimiterError, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::num::NonZeroU32;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Convert a configured limit into a per-second rate
fn rate_of(key: &str, limit: i64) -> Result<NonZeroU32> {
    u32::try_from(limit)
        .ok()
        .and_then(NonZeroU32::new)
        .ok_or_else(|| LimiterError::InvalidLimit {
            key: key.to_string(),
            limit,
        })
}

/// Time between two units at `rate` per second, never zero
fn interval_of(rate: NonZeroU32) -> Duration {
    (Duration::from_secs(1) / rate.get()).max(Duration::from_nanos(1))
}

/// Next admission slot of a leaky limiter
struct DrainState {
    limit: i64,
    interval: Duration,
    next_slot: Instant,
}

impl DrainState {
    fn new(limit: i64, rate: NonZeroU32) -> Self {
        Self {
            limit,
            interval: interval_of(rate),
            next_slot: Instant::now(),
        }
    }

    /// Switch to a new rate, keeping the gap after the last reserved slot
    fn reset(&mut self, limit: i64, rate: NonZeroU32) {
        let interval = interval_of(rate);
        let now = Instant::now();
        let last = self.next_slot.checked_sub(self.interval).unwrap_or(now);
        self.limit = limit;
        self.interval = interval;
        self.next_slot = last + interval;
    }
}

/// Local smoothing limiter.
///
/// Excess calls are delayed, never dropped: each call reserves the next free
/// slot and admissions are at least `1s / limit` apart. A wait bound can be
/// set, after which the call is rejected without reserving a slot.
pub struct LeakyLimiter {
    key: String,
    state: Mutex<DrainState>,
    max_wait: Option<Duration>,
}

impl LeakyLimiter {
    /// Create a new leaky limiter for `method_key`
    pub fn new(method_key: &str, local_limit: i64) -> Result<Self> {
        let key = format!("local-leaky-limiter-{}", method_key);
        let rate = rate_of(&key, local_limit).map_err(|e| {
            error!("Bad leaky limiter params, key: {}, limit: {}", key, local_limit);
            e
        })?;

        Ok(Self {
            key,
            state: Mutex::new(DrainState::new(local_limit, rate)),
            max_wait: None,
        })
    }

    /// Bound how long a call may wait for a slot
    pub fn with_max_wait(mut self, max_wait: Option<Duration>) -> Self {
        self.max_wait = max_wait;
        self
    }

    /// Reserve the next slot, or report the wait that exceeded the bound
    fn reserve(&self) -> std::result::Result<Instant, Duration> {
        let mut state = self.state.lock();
        let now = Instant::now();
        let slot = state.next_slot.max(now);

        let wait = slot.duration_since(now);
        if matches!(self.max_wait, Some(max_wait) if wait > max_wait) {
            return Err(wait);
        }

        state.next_slot = slot + state.interval;
        Ok(slot)
    }
}

#[async_trait]
impl Limiter for LeakyLimiter {
    fn key(&self) -> &str {
        &self.key
    }

    fn kind(&self) -> &'static str {
        "leaky"
    }

    fn set_limit(&self, new_limit: i64) -> Result<i64> {
        let rate = rate_of(&self.key, new_limit)?;

        let old_limit = {
            let mut state = self.state.lock();
            let old_limit = state.limit;
            state.reset(new_limit, rate);
            old_limit
        };

        info!(
            "Leaky limiter limit updated, key: {}, old: {}, new: {}",
            self.key, old_limit, new_limit
        );
        Ok(old_limit)
    }

    fn get_limit(&self) -> i64 {
        self.state.lock().limit
    }

    fn set_step(&self, new_step: i64) -> i64 {
        warn!(
            "Leaky limiter has no step, ignoring set_step({}) for key: {}",
            new_step, self.key
        );
        0
    }

    fn get_step(&self) -> i64 {
        0
    }

    fn set_limit_and_step(&self, new_limit: i64, _new_step: i64) -> Result<(i64, i64)> {
        Ok((self.set_limit(new_limit)?, 0))
    }

    async fn can_pass(&self) -> bool {
        match self.reserve() {
            Ok(slot) => {
                tokio::time::sleep_until(slot).await;
                true
            }
            Err(wait) => {
                warn!(
                    "Leaky limiter wait of {:?} exceeds {:?}, rejecting call for key: {}",
                    wait, self.max_wait, self.key
                );
                false
            }
        }
    }
}

/// Tokens of a token limiter, refilled one per interval up to capacity
struct TokenState {
    limit: i64,
    capacity: u32,
    interval: Duration,
    available: u32,
    last_refill: Instant,
}

impl TokenState {
    /// Full bucket for `rate`
    fn new(limit: i64, rate: NonZeroU32) -> Self {
        Self {
            limit,
            capacity: rate.get(),
            interval: interval_of(rate),
            available: rate.get(),
            last_refill: Instant::now(),
        }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill);
        let refills = elapsed.as_nanos() / self.interval.as_nanos();
        let refills = u32::try_from(refills).unwrap_or(u32::MAX);

        self.available = self.available.saturating_add(refills).min(self.capacity);
        if self.available == self.capacity {
            // A full bucket earns nothing while idle
            self.last_refill = now;
        } else if refills > 0 {
            self.last_refill += self.interval * refills;
        }
    }

    fn try_acquire(&mut self, now: Instant) -> bool {
        self.refill(now);
        if self.available == 0 {
            return false;
        }
        self.available -= 1;
        true
    }
}

/// Local burst limiter.
///
/// Holds at most `limit` tokens and refills one every `1s / limit`; excess
/// calls are rejected immediately.
pub struct TokenLimiter {
    key: String,
    state: Mutex<TokenState>,
}

impl TokenLimiter {
    /// Create a new token limiter for `method_key`
    pub fn new(method_key: &str, local_limit: i64) -> Result<Self> {
        let key = format!("local-token-limiter-{}", method_key);
        let rate = rate_of(&key, local_limit).map_err(|e| {
            error!("Bad token limiter params, key: {}, limit: {}", key, local_limit);
            e
        })?;

        Ok(Self {
            key,
            state: Mutex::new(TokenState::new(local_limit, rate)),
        })
    }
}

#[async_trait]
impl Limiter for TokenLimiter {
    fn key(&self) -> &str {
        &self.key
    }

    fn kind(&self) -> &'static str {
        "token"
    }

    fn set_limit(&self, new_limit: i64) -> Result<i64> {
        let rate = rate_of(&self.key, new_limit)?;

        let old_limit = {
            let mut state = self.state.lock();
            std::mem::replace(&mut *state, TokenState::new(new_limit, rate)).limit
        };

        info!(
            "Token limiter limit updated, key: {}, old: {}, new: {}",
            self.key, old_limit, new_limit
        );
        Ok(old_limit)
    }

    fn get_limit(&self) -> i64 {
        self.state.lock().limit
    }

    fn set_step(&self, new_step: i64) -> i64 {
        warn!(
            "Token limiter has no step, ignoring set_step({}) for key: {}",
            new_step, self.key
        );
        0
    }

    fn get_step(&self) -> i64 {
        0
    }

    fn set_limit_and_step(&self, new_limit: i64, _new_step: i64) -> Result<(i64, i64)> {
        Ok((self.set_limit(new_limit)?, 0))
    }

    async fn can_pass(&self) -> bool {
        let allowed = self.state.lock().try_acquire(Instant::now());
        if !allowed {
            debug!("Token bucket exhausted for key: {}", self.key);
        }
        allowed
    }
}
