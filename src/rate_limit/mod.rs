//! Per-method admission control
//!
//! Each configured method is bound to limiters built from its quota:
//!
//! - **Leaky**: local smoothing limiter, delays excess calls
//! - **Token**: local burst limiter, rejects excess calls
//! - **Simple**: distributed 1-second counter in a shared store (Redis)
//!
//! When global limiting is on, only the distributed limiter decides;
//! otherwise only the local one does. Methods without a quota get the
//! configured default verdict.
//!
//! # Example
//!
//! ```rust,no_run
//! use overload_guard::config::{LimiterConfig, LocalLimiterType, MethodQuotaView};
//! use overload_guard::rate_limit::{AdmissionDispatcher, CallContext};
//! use std::collections::HashMap;
//!
//! #[tokio::main]
//! async fn main() {
//!     let mut quotas = MethodQuotaView::new();
//!     quotas.insert("Get".to_string(), HashMap::from([("local_qps".to_string(), 5)]));
//!
//!     let config = LimiterConfig::new("demo", LocalLimiterType::Token);
//!     let dispatcher = AdmissionDispatcher::build(config, Some(&quotas), None).unwrap();
//!
//!     let allowed = dispatcher.can_pass(&CallContext::new(), "Get").await;
//!     println!("admitted: {}", allowed);
//! }
//! ```

pub mod local;
pub mod middleware;
pub mod redis;
pub mod registry;
pub mod service;
pub mod store;
pub mod types;

// Re-export commonly used types
pub use local::{LeakyLimiter, TokenLimiter};
pub use middleware::admission_middleware;
pub use redis::SimpleRedisLimiter;
pub use registry::{MethodQuota, OverloadEntry, OverloadRegistry};
pub use service::AdmissionDispatcher;
pub use store::{CounterStore, MemoryCounterStore, RedisCounterStore};
pub use types::{CallContext, Limiter};
