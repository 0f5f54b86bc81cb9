use super::registry::OverloadRegistry;
use super::store::{CounterStore, RedisCounterStore};
use super::types::CallContext;
use crate::config::{GuardConfig, LimiterConfig, MethodQuotaView};
use crate::error::{LimiterError, Result};
use crate::metrics;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Admission decision path consulted on every call.
///
/// Holds no state of its own: every verdict is a function of the registry,
/// its configuration, and the method name.
#[derive(Debug, Clone)]
pub struct AdmissionDispatcher {
    registry: Arc<OverloadRegistry>,
}

impl AdmissionDispatcher {
    /// Create a dispatcher over a built registry
    pub fn new(registry: OverloadRegistry) -> Self {
        Self {
            registry: Arc::new(registry),
        }
    }

    /// Build the registry and wrap it in a dispatcher
    pub fn build(
        config: LimiterConfig,
        quotas: Option<&MethodQuotaView>,
        store: Option<Arc<dyn CounterStore>>,
    ) -> Result<Self> {
        OverloadRegistry::build(config, quotas, store).map(Self::new)
    }

    /// Validate a configuration document, connect to Redis when global
    /// limiting is on, and build the dispatcher
    pub async fn from_config(config: &GuardConfig) -> Result<Self> {
        config.validate()?;

        let limiter = &config.limiter_config.limiter;
        let store: Option<Arc<dyn CounterStore>> = match (&config.redis, limiter.global_on) {
            (Some(redis), true) => {
                let store = RedisCounterStore::connect(&redis.url, redis.timeout()).await?;
                store.ping().await.map_err(|e| {
                    error!("Redis ping failed: {}", e);
                    e
                })?;
                info!("Redis connection successful, using it for global limiting");
                Some(Arc::new(store) as Arc<dyn CounterStore>)
            }
            (None, true) => {
                return Err(LimiterError::MissingStore(
                    "global_on requires a redis section".to_string(),
                ))
            }
            (_, false) => None,
        };

        Self::build(
            limiter.clone(),
            config.limiter_config.method_qps_limit.as_ref(),
            store,
        )
    }

    /// The registry backing this dispatcher
    pub fn registry(&self) -> &OverloadRegistry {
        &self.registry
    }

    /// Whether a call to `method` may proceed
    pub async fn can_pass(&self, ctx: &CallContext, method: &str) -> bool {
        let config = self.registry.config();

        let Some(entry) = self.registry.get(method) else {
            warn!(
                request_id = ctx.request_id(),
                "Method {} not found in limiter, default_pass: {}", method, config.default_pass
            );
            metrics::record_unknown_method(method);
            return config.default_pass;
        };

        let limiter = if config.global_on {
            entry.global()
        } else {
            Some(entry.local())
        };

        let Some(limiter) = limiter else {
            error!(
                request_id = ctx.request_id(),
                "Method {} has no global limiter while global limiting is on, rejecting", method
            );
            return false;
        };

        let allowed = limiter.can_pass().await;
        debug!(
            request_id = ctx.request_id(),
            "Admission for method {} by {} limiter: {}",
            method,
            limiter.kind(),
            allowed
        );
        metrics::record_decision(method, limiter.kind(), allowed);
        allowed
    }
}
