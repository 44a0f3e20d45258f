//! Configuration for query admission.

use std::time::Duration;

use tidegate_core::ConfigError;

/// Configuration for the query permit gate
#[derive(Debug, Clone, PartialEq)]
pub struct AdmissionConfig {
    /// Maximum number of queries executing at once
    pub max_concurrent_queries: usize,

    /// Delay before re-attempting admission after a fingerprint conflict
    pub collision_retry_delay: Duration,

    /// Host identity used to tag emitted metrics
    pub hostname: String,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            max_concurrent_queries: 4,
            collision_retry_delay: Duration::from_millis(100),
            hostname: default_hostname(),
        }
    }
}

impl AdmissionConfig {
    /// Config for a gate admitting `max_concurrent_queries` at once
    pub fn with_capacity(max_concurrent_queries: usize) -> Self {
        Self {
            max_concurrent_queries,
            ..Self::default()
        }
    }

    /// Create config from environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("TIDEGATE_CONCURRENT_QUERIES") {
            if let Ok(n) = val.parse() {
                config.max_concurrent_queries = n;
            }
        }

        if let Ok(val) = std::env::var("TIDEGATE_COLLISION_RETRY_MS") {
            if let Ok(n) = val.parse() {
                config.collision_retry_delay = Duration::from_millis(n);
            }
        }

        if let Ok(val) = std::env::var("TIDEGATE_HOSTNAME") {
            config.hostname = val;
        }

        config
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrent_queries == 0 {
            return Err(ConfigError::zero("max_concurrent_queries"));
        }
        if self.hostname.trim().is_empty() {
            return Err(ConfigError::empty("hostname"));
        }
        Ok(())
    }
}

/// Host identity from the environment, `localhost` when unset
pub fn default_hostname() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .filter(|h| !h.trim().is_empty())
        .unwrap_or_else(|| "localhost".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AdmissionConfig::default();
        assert_eq!(config.max_concurrent_queries, 4);
        assert_eq!(config.collision_retry_delay, Duration::from_millis(100));
        assert!(!config.hostname.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_with_capacity() {
        let config = AdmissionConfig::with_capacity(2);
        assert_eq!(config.max_concurrent_queries, 2);
        assert_eq!(config.collision_retry_delay, Duration::from_millis(100));
    }

    #[test]
    fn test_validate_rejects_zero_capacity() {
        let config = AdmissionConfig::with_capacity(0);
        assert_eq!(config.validate(), Err(ConfigError::zero("max_concurrent_queries")));
    }

    #[test]
    fn test_validate_rejects_blank_hostname() {
        let config = AdmissionConfig {
            hostname: "  ".to_string(),
            ..Default::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::empty("hostname")));
    }
}
