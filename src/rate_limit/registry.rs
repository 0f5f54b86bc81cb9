use super::local::{LeakyLimiter, TokenLimiter};
use super::redis::SimpleRedisLimiter;
use super::store::CounterStore;
use super::types::Limiter;
use crate::config::{GlobalLimiterType, LimiterConfig, LocalLimiterType, MethodQuotaView};
use crate::error::{LimiterError, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info};

/// Quota configured for one method
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MethodQuota {
    /// Step granularity for distributed limiters
    pub step: i64,
    /// Shared qps across all processes
    pub global_qps: i64,
    /// Per-process qps
    pub local_qps: i64,
}

impl MethodQuota {
    /// Read a quota from its raw fields; absent fields are 0
    pub fn from_fields(method: &str, fields: &HashMap<String, i64>) -> Result<Self> {
        let field = |name: &str| fields.get(name).copied().unwrap_or(0);
        let quota = Self {
            step: field("step"),
            global_qps: field("global_qps"),
            local_qps: field("local_qps"),
        };

        if quota.step < 0 || quota.global_qps < 0 || quota.local_qps < 0 {
            error!(
                "Bad quota for method {}: step={}, global_qps={}, local_qps={}",
                method, quota.step, quota.global_qps, quota.local_qps
            );
            return Err(LimiterError::NegativeQuota {
                method: method.to_string(),
                step: quota.step,
                global_qps: quota.global_qps,
                local_qps: quota.local_qps,
            });
        }

        Ok(quota)
    }
}

/// Limiters bound to one method
pub struct OverloadEntry {
    quota: MethodQuota,
    global: Option<Arc<dyn Limiter>>,
    local: Arc<dyn Limiter>,
}

impl OverloadEntry {
    /// Create an entry from already built limiters
    pub fn new(
        quota: MethodQuota,
        global: Option<Arc<dyn Limiter>>,
        local: Arc<dyn Limiter>,
    ) -> Self {
        Self {
            quota,
            global,
            local,
        }
    }

    /// Quota the limiters were built from
    pub fn quota(&self) -> MethodQuota {
        self.quota
    }

    /// Distributed limiter, present when global limiting is on
    pub fn global(&self) -> Option<&Arc<dyn Limiter>> {
        self.global.as_ref()
    }

    /// Local limiter
    pub fn local(&self) -> &Arc<dyn Limiter> {
        &self.local
    }
}

impl std::fmt::Debug for OverloadEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OverloadEntry")
            .field("quota", &self.quota)
            .field("global", &self.global.as_ref().map(|l| l.key().to_string()))
            .field("local", &self.local.key())
            .finish()
    }
}

/// Method name to limiter mapping, built once at startup.
///
/// The key set is fixed after construction, so lookups need no locking.
#[derive(Debug)]
pub struct OverloadRegistry {
    config: LimiterConfig,
    entries: HashMap<String, OverloadEntry>,
}

impl OverloadRegistry {
    /// Build the registry from configuration.
    ///
    /// Every error returned here is a startup failure: the caller must not
    /// serve traffic with a partially built registry.
    pub fn build(
        config: LimiterConfig,
        quotas: Option<&MethodQuotaView>,
        store: Option<Arc<dyn CounterStore>>,
    ) -> Result<Self> {
        info!("Building overload registry: {:?}", config);

        let quotas = quotas.ok_or_else(|| {
            LimiterError::Config("method quota configuration not initialized".to_string())
        })?;

        let store = match (config.global_on, store) {
            (true, None) => {
                return Err(LimiterError::MissingStore(
                    "global limiting is on but no counter store was given".to_string(),
                ))
            }
            (_, store) => store,
        };

        let parsed = Self::parse_quotas(quotas)?;
        debug!("Parsed method quotas: {:?}", parsed);

        let mut entries = HashMap::with_capacity(parsed.len());
        for (method, quota) in parsed {
            let method_key = config.method_key(&method);

            let global = match (config.global_on, &store) {
                (true, Some(store)) => Some(Self::create_global_limiter(
                    &config,
                    &method_key,
                    quota,
                    Arc::clone(store),
                )?),
                _ => None,
            };
            let local = Self::create_local_limiter(&config, &method_key, quota)?;

            entries.insert(method, OverloadEntry::new(quota, global, local));
        }

        info!("Overload registry ready with {} methods", entries.len());
        Ok(Self { config, entries })
    }

    /// Create a registry from prebuilt entries
    pub fn from_entries(
        config: LimiterConfig,
        entries: HashMap<String, OverloadEntry>,
    ) -> Result<Self> {
        if config.global_on {
            if let Some((method, _)) = entries.iter().find(|(_, e)| e.global.is_none()) {
                return Err(LimiterError::Config(format!(
                    "global limiting is on but method {} has no global limiter",
                    method
                )));
            }
        }

        Ok(Self { config, entries })
    }

    /// Parse the raw quota view into typed quotas
    pub fn parse_quotas(quotas: &MethodQuotaView) -> Result<HashMap<String, MethodQuota>> {
        quotas
            .iter()
            .map(|(method, fields)| Ok((method.clone(), MethodQuota::from_fields(method, fields)?)))
            .collect()
    }

    fn create_global_limiter(
        config: &LimiterConfig,
        method_key: &str,
        quota: MethodQuota,
        store: Arc<dyn CounterStore>,
    ) -> Result<Arc<dyn Limiter>> {
        match config.global_limiter_type {
            GlobalLimiterType::Simple => {
                let limiter = SimpleRedisLimiter::new(method_key, quota.global_qps, store)?
                    .with_failure_policy(config.store_failure_policy);
                if quota.step > 0 {
                    limiter.set_step(quota.step);
                }
                Ok(Arc::new(limiter))
            }
            GlobalLimiterType::Cache => {
                error!("Cache global limiter selected for {} but not implemented", method_key);
                Err(LimiterError::Unsupported(
                    "global_limiter_type 'cache'".to_string(),
                ))
            }
        }
    }

    fn create_local_limiter(
        config: &LimiterConfig,
        method_key: &str,
        quota: MethodQuota,
    ) -> Result<Arc<dyn Limiter>> {
        let limiter: Arc<dyn Limiter> = match config.local_limiter_type {
            LocalLimiterType::Leaky => Arc::new(
                LeakyLimiter::new(method_key, quota.local_qps)?.with_max_wait(config.max_wait()),
            ),
            LocalLimiterType::Token => Arc::new(TokenLimiter::new(method_key, quota.local_qps)?),
        };
        Ok(limiter)
    }

    /// Process-wide configuration
    pub fn config(&self) -> &LimiterConfig {
        &self.config
    }

    /// Look up the entry of a method
    pub fn get(&self, method: &str) -> Option<&OverloadEntry> {
        self.entries.get(method)
    }

    /// Configured method names
    pub fn methods(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Number of configured methods
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no method is configured
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rate_limit::store::MemoryCounterStore;

    fn quota_view(fields: &[(&str, &str, i64)]) -> MethodQuotaView {
        let mut view = MethodQuotaView::new();
        for (method, name, value) in fields {
            view.entry(method.to_string())
                .or_default()
                .insert(name.to_string(), *value);
        }
        view
    }

    #[test]
    fn test_quota_missing_fields_default_to_zero() {
        let view = quota_view(&[("Get", "local_qps", 5)]);
        let quotas = OverloadRegistry::parse_quotas(&view).unwrap();
        assert_eq!(
            quotas["Get"],
            MethodQuota {
                step: 0,
                global_qps: 0,
                local_qps: 5
            }
        );
    }

    #[test]
    fn test_negative_quota_is_rejected() {
        let view = quota_view(&[("Get", "local_qps", 5), ("Get", "step", -1)]);
        assert!(matches!(
            OverloadRegistry::parse_quotas(&view),
            Err(LimiterError::NegativeQuota { .. })
        ));

        let config = LimiterConfig::new("svc", LocalLimiterType::Token);
        assert!(OverloadRegistry::build(config, Some(&view), None).is_err());
    }

    #[test]
    fn test_build_local_registry() {
        let view = quota_view(&[
            ("Get", "local_qps", 5),
            ("Put", "local_qps", 2),
            ("Put", "global_qps", 10),
        ]);
        let config = LimiterConfig::new("svc", LocalLimiterType::Token);

        let registry = OverloadRegistry::build(config, Some(&view), None).unwrap();
        assert_eq!(registry.len(), 2);

        let entry = registry.get("Get").unwrap();
        assert!(entry.global().is_none());
        assert_eq!(entry.local().key(), "local-token-limiter-svc.Get");
        assert_eq!(entry.local().get_limit(), 5);
        assert_eq!(registry.get("Put").unwrap().quota().global_qps, 10);
        assert!(registry.get("Delete").is_none());

        let mut methods: Vec<_> = registry.methods().collect();
        methods.sort();
        assert_eq!(methods, vec!["Get", "Put"]);
    }

    #[test]
    fn test_build_global_registry() {
        let view = quota_view(&[
            ("Get", "local_qps", 5),
            ("Get", "global_qps", 50),
            ("Get", "step", 4),
        ]);
        let mut config = LimiterConfig::new("svc", LocalLimiterType::Leaky);
        config.global_on = true;

        let store: Arc<dyn CounterStore> = Arc::new(MemoryCounterStore::new());
        let registry = OverloadRegistry::build(config, Some(&view), Some(store)).unwrap();

        let entry = registry.get("Get").unwrap();
        let global = entry.global().unwrap();
        assert_eq!(global.key(), "simple-redis-limiter-svc.Get");
        assert_eq!(global.get_limit(), 50);
        assert_eq!(global.get_step(), 4);
        assert_eq!(entry.local().kind(), "leaky");
    }

    #[test]
    fn test_build_requires_quota_view() {
        let config = LimiterConfig::new("svc", LocalLimiterType::Token);
        assert!(matches!(
            OverloadRegistry::build(config, None, None),
            Err(LimiterError::Config(_))
        ));
    }

    #[test]
    fn test_build_global_requires_store() {
        let view = quota_view(&[("Get", "local_qps", 5), ("Get", "global_qps", 50)]);
        let mut config = LimiterConfig::new("svc", LocalLimiterType::Token);
        config.global_on = true;

        assert!(matches!(
            OverloadRegistry::build(config, Some(&view), None),
            Err(LimiterError::MissingStore(_))
        ));
    }

    #[test]
    fn test_build_cache_limiter_unsupported() {
        let view = quota_view(&[("Get", "local_qps", 5), ("Get", "global_qps", 50)]);
        let mut config = LimiterConfig::new("svc", LocalLimiterType::Token);
        config.global_on = true;
        config.global_limiter_type = GlobalLimiterType::Cache;

        let store: Arc<dyn CounterStore> = Arc::new(MemoryCounterStore::new());
        assert!(matches!(
            OverloadRegistry::build(config, Some(&view), Some(store)),
            Err(LimiterError::Unsupported(_))
        ));
    }

    #[test]
    fn test_build_zero_limit_is_fatal() {
        let view = quota_view(&[("Get", "global_qps", 50)]);
        let config = LimiterConfig::new("svc", LocalLimiterType::Token);

        assert!(matches!(
            OverloadRegistry::build(config, Some(&view), None),
            Err(LimiterError::InvalidLimit { limit: 0, .. })
        ));

        let view = quota_view(&[("Get", "local_qps", 5)]);
        let mut config = LimiterConfig::new("svc", LocalLimiterType::Token);
        config.global_on = true;
        let store: Arc<dyn CounterStore> = Arc::new(MemoryCounterStore::new());
        assert!(OverloadRegistry::build(config, Some(&view), Some(store)).is_err());
    }

    #[test]
    fn test_from_entries_checks_global_limiters() {
        let local: Arc<dyn Limiter> = Arc::new(TokenLimiter::new("svc.Get", 1).unwrap());
        let mut entries = HashMap::new();
        entries.insert(
            "Get".to_string(),
            OverloadEntry::new(MethodQuota::default(), None, local),
        );

        let mut config = LimiterConfig::new("svc", LocalLimiterType::Token);
        config.global_on = true;
        assert!(OverloadRegistry::from_entries(config, entries).is_err());
    }
}
