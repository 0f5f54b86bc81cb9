use crate::error::{LimiterError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

/// Raw per-method quota view: method name -> quota field -> integer
pub type MethodQuotaView = HashMap<String, HashMap<String, i64>>;

/// Main configuration document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardConfig {
    /// Admission control configuration
    pub limiter_config: LimiterSection,
    /// Redis configuration for the distributed limiter
    #[serde(default)]
    pub redis: Option<RedisConfig>,
    /// Server configuration (demo binary)
    #[serde(default)]
    pub server: ServerConfig,
}

/// The `limiter_config` section: process-wide settings plus method quotas
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimiterSection {
    #[serde(flatten)]
    pub limiter: LimiterConfig,
    /// Per-method quotas
    #[serde(default)]
    pub method_qps_limit: Option<MethodQuotaView>,
}

/// Process-wide limiter configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimiterConfig {
    /// Service name, used to build per-method keys
    pub service_name: String,
    /// Verdict returned for methods without a configured quota
    #[serde(default)]
    pub default_pass: bool,
    /// Whether the distributed (global) limiter is authoritative
    #[serde(default)]
    pub global_on: bool,
    /// Distributed limiter strategy
    #[serde(default)]
    pub global_limiter_type: GlobalLimiterType,
    /// Local limiter strategy
    pub local_limiter_type: LocalLimiterType,
    /// Verdict when the shared store fails at call time
    #[serde(default)]
    pub store_failure_policy: StoreFailurePolicy,
    /// Upper bound on how long a leaky limiter may delay a call
    #[serde(default)]
    pub max_wait_ms: Option<u64>,
}

/// Distributed limiter strategies
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum GlobalLimiterType {
    /// Shared 1-second counter
    #[default]
    Simple,
    /// Stepped counter with local caching (not implemented)
    Cache,
}

/// Local limiter strategies
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LocalLimiterType {
    /// Smoothing limiter, delays excess calls
    Leaky,
    /// Burst limiter, rejects excess calls
    Token,
}

/// What a distributed limiter answers when the store cannot be reached
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StoreFailurePolicy {
    /// Admit the call
    FailOpen,
    /// Reject the call
    #[default]
    FailClosed,
}

impl StoreFailurePolicy {
    /// Verdict to return on store failure
    pub fn verdict(&self) -> bool {
        matches!(self, StoreFailurePolicy::FailOpen)
    }
}

/// Redis configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Redis connection URL
    pub url: String,
    /// Per-command timeout in milliseconds
    #[serde(default = "default_redis_timeout_ms")]
    pub timeout_ms: u64,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server host address
    #[serde(default = "default_host")]
    pub host: String,
    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_redis_timeout_ms() -> u64 {
    50
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl RedisConfig {
    /// Get the command timeout as a Duration
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl LimiterConfig {
    /// Create a configuration with local limiting only
    pub fn new(service_name: impl Into<String>, local_limiter_type: LocalLimiterType) -> Self {
        Self {
            service_name: service_name.into(),
            default_pass: false,
            global_on: false,
            global_limiter_type: GlobalLimiterType::default(),
            local_limiter_type,
            store_failure_policy: StoreFailurePolicy::default(),
            max_wait_ms: None,
        }
    }

    /// Get the leaky limiter wait bound as a Duration
    pub fn max_wait(&self) -> Option<Duration> {
        self.max_wait_ms.map(Duration::from_millis)
    }

    /// Build the unique key of a method: `service_name.method`
    pub fn method_key(&self, method: &str) -> String {
        format!("{}.{}", self.service_name, method)
    }
}

impl GuardConfig {
    /// Load configuration from a YAML or JSON file, chosen by extension
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| LimiterError::Config(format!("Failed to read config file: {}", e)))?;

        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Self::from_json(&content),
            _ => Self::from_yaml(&content),
        }
    }

    /// Parse configuration from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| LimiterError::Config(format!("Failed to parse config: {}", e)))
    }

    /// Parse configuration from JSON string
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| LimiterError::Config(format!("Failed to parse config: {}", e)))
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        let limiter = &self.limiter_config.limiter;

        if limiter.service_name.is_empty() {
            return Err(LimiterError::Config(
                "service_name cannot be empty".to_string(),
            ));
        }

        if self.limiter_config.method_qps_limit.is_none() {
            return Err(LimiterError::Config(
                "method_qps_limit must be configured".to_string(),
            ));
        }

        if limiter.global_on && self.redis.is_none() {
            return Err(LimiterError::MissingStore(
                "global_on requires a redis section".to_string(),
            ));
        }

        if let Some(redis) = &self.redis {
            if redis.url.is_empty() {
                return Err(LimiterError::Config("Redis URL cannot be empty".to_string()));
            }
            if redis.timeout_ms == 0 {
                return Err(LimiterError::Config(
                    "Redis timeout must be > 0".to_string(),
                ));
            }
        }

        if limiter.max_wait_ms == Some(0) {
            return Err(LimiterError::Config("max_wait_ms must be > 0".to_string()));
        }

        Ok(())
    }
}
