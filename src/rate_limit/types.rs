use crate::error::Result;
use async_trait::async_trait;
use uuid::Uuid;

/// Common interface of every limiter strategy.
///
/// Setters are atomic with respect to concurrent callers of the same
/// instance: a `can_pass` running alongside `set_limit_and_step` sees either
/// the old or the new quota, never a mix of both.
#[async_trait]
pub trait Limiter: Send + Sync {
    /// Unique key of this limiter instance
    fn key(&self) -> &str;

    /// Short strategy name used in logs and metrics
    fn kind(&self) -> &'static str;

    /// Replace the admission rate (calls per second), returning the old one
    fn set_limit(&self, new_limit: i64) -> Result<i64>;

    /// Current admission rate
    fn get_limit(&self) -> i64;

    /// Replace the step granularity, returning the old one.
    ///
    /// Strategies without a step log a warning and return 0.
    fn set_step(&self, new_step: i64) -> i64;

    /// Current step granularity
    fn get_step(&self) -> i64;

    /// Replace limit and step in one critical section
    fn set_limit_and_step(&self, new_limit: i64, new_step: i64) -> Result<(i64, i64)>;

    /// Whether the current call may proceed
    async fn can_pass(&self) -> bool;
}

/// Per-call context carried into admission decisions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallContext {
    request_id: String,
}

impl CallContext {
    /// Create a context with a fresh request id
    pub fn new() -> Self {
        Self {
            request_id: Uuid::new_v4().to_string(),
        }
    }

    /// Create a context for an existing request id
    pub fn with_request_id(request_id: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
        }
    }

    /// The request id of this call
    pub fn request_id(&self) -> &str {
        &self.request_id
    }
}

impl Default for CallContext {
    fn default() -> Self {
        Self::new()
    }
}
