use thiserror::Error;

/// Result type for admission control operations
pub type Result<T> = std::result::Result<T, LimiterError>;

/// Admission control error types
#[derive(Error, Debug)]
pub enum LimiterError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Shared counter store required but not configured: {0}")]
    MissingStore(String),

    #[error("Negative quota for method {method}: step={step}, global_qps={global_qps}, local_qps={local_qps}")]
    NegativeQuota {
        method: String,
        step: i64,
        global_qps: i64,
        local_qps: i64,
    },

    #[error("Invalid limit for {key}: {limit}")]
    InvalidLimit { key: String, limit: i64 },

    #[error("Invalid step for {key}: {step}")]
    InvalidStep { key: String, step: i64 },

    #[error("Limiter type not supported yet: {0}")]
    Unsupported(String),

    #[error("Store error: {0}")]
    Store(#[from] redis::RedisError),

    #[error("Store timeout: {0}")]
    StoreTimeout(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl LimiterError {
    /// Whether this error must abort process startup
    pub fn is_fatal(&self) -> bool {
        !matches!(self, LimiterError::Store(_) | LimiterError::StoreTimeout(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = LimiterError::Unsupported("cache".to_string());
        assert_eq!(err.to_string(), "Limiter type not supported yet: cache");

        let err = LimiterError::InvalidLimit {
            key: "local-token-limiter-svc.Get".to_string(),
            limit: 0,
        };
        assert_eq!(
            err.to_string(),
            "Invalid limit for local-token-limiter-svc.Get: 0"
        );

        let err = LimiterError::InvalidStep {
            key: "simple-redis-limiter-svc.Get".to_string(),
            step: -2,
        };
        assert_eq!(
            err.to_string(),
            "Invalid step for simple-redis-limiter-svc.Get: -2"
        );
    }

    #[test]
    fn test_negative_quota_display() {
        let err = LimiterError::NegativeQuota {
            method: "Get".to_string(),
            step: 0,
            global_qps: -1,
            local_qps: 5,
        };
        assert!(err.to_string().contains("Get"));
        assert!(err.to_string().contains("global_qps=-1"));
    }

    #[test]
    fn test_fatal_classification() {
        assert!(LimiterError::Config("bad".to_string()).is_fatal());
        assert!(LimiterError::Unsupported("cache".to_string()).is_fatal());
        assert!(!LimiterError::StoreTimeout("INCR".to_string()).is_fatal());
    }
}
