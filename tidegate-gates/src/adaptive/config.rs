//! Configuration for the adaptive write gate.

use std::time::Duration;

use tidegate_core::{ConfigError, Reservoir};

use crate::admission::default_hostname;

/// Configuration for the adaptive write gate
#[derive(Debug, Clone, PartialEq)]
pub struct AdaptiveConfig {
    /// Permits the congestion window starts with
    pub initial_permits: usize,

    /// Upper bound the window may grow to
    pub max_permits: usize,

    /// Latency samples kept for tuning
    pub reservoir_capacity: usize,

    /// First retry delay; later delays follow the Fibonacci sequence
    pub retry_base: Duration,

    /// Cap on a single retry delay
    pub retry_max_wait: Duration,

    /// Minimum time between two window adjustments
    pub adjust_interval: Duration,

    /// Allow the window to grow under saturation
    pub growth_enabled: bool,

    /// Tolerated ratio of current to previous mean latency when growing
    pub latency_headroom: f64,

    /// Host identity used to tag emitted metrics
    pub hostname: String,
}

impl Default for AdaptiveConfig {
    fn default() -> Self {
        Self {
            initial_permits: 10,
            max_permits: 64,
            reservoir_capacity: Reservoir::DEFAULT_CAPACITY,
            retry_base: Duration::from_millis(100),
            retry_max_wait: Duration::from_secs(10),
            adjust_interval: Duration::from_secs(5),
            growth_enabled: true,
            latency_headroom: 1.25,
            hostname: default_hostname(),
        }
    }
}

impl AdaptiveConfig {
    /// Fixed-size window that never grows
    pub fn fixed(permits: usize) -> Self {
        Self {
            initial_permits: permits,
            max_permits: permits,
            growth_enabled: false,
            ..Self::default()
        }
    }

    /// Create config from environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("TIDEGATE_WRITE_PERMITS") {
            if let Ok(n) = val.parse() {
                config.initial_permits = n;
            }
        }

        if let Ok(val) = std::env::var("TIDEGATE_WRITE_MAX_PERMITS") {
            if let Ok(n) = val.parse() {
                config.max_permits = n;
            }
        }

        if let Ok(val) = std::env::var("TIDEGATE_RESERVOIR_CAPACITY") {
            if let Ok(n) = val.parse() {
                config.reservoir_capacity = n;
            }
        }

        if let Ok(val) = std::env::var("TIDEGATE_RETRY_BASE_MS") {
            if let Ok(n) = val.parse() {
                config.retry_base = Duration::from_millis(n);
            }
        }

        if let Ok(val) = std::env::var("TIDEGATE_RETRY_MAX_WAIT_MS") {
            if let Ok(n) = val.parse() {
                config.retry_max_wait = Duration::from_millis(n);
            }
        }

        if let Ok(val) = std::env::var("TIDEGATE_ADJUST_INTERVAL_SECS") {
            if let Ok(n) = val.parse() {
                config.adjust_interval = Duration::from_secs(n);
            }
        }

        if let Ok(val) = std::env::var("TIDEGATE_WRITE_GROWTH") {
            config.growth_enabled = val.to_lowercase() == "true" || val == "1";
        }

        if let Ok(val) = std::env::var("TIDEGATE_LATENCY_HEADROOM") {
            if let Ok(n) = val.parse() {
                config.latency_headroom = n;
            }
        }

        if let Ok(val) = std::env::var("TIDEGATE_HOSTNAME") {
            config.hostname = val;
        }

        config
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.initial_permits == 0 {
            return Err(ConfigError::zero("initial_permits"));
        }
        if self.max_permits < self.initial_permits {
            return Err(ConfigError::out_of_range(
                "max_permits",
                self.max_permits as f64,
                self.initial_permits as f64,
                f64::MAX,
            ));
        }
        if self.reservoir_capacity == 0 {
            return Err(ConfigError::zero("reservoir_capacity"));
        }
        if self.retry_base.is_zero() {
            return Err(ConfigError::zero("retry_base"));
        }
        if self.retry_max_wait < self.retry_base {
            return Err(ConfigError::out_of_range(
                "retry_max_wait",
                self.retry_max_wait.as_secs_f64(),
                self.retry_base.as_secs_f64(),
                f64::MAX,
            ));
        }
        if self.latency_headroom.is_nan() || self.latency_headroom < 1.0 {
            return Err(ConfigError::out_of_range(
                "latency_headroom",
                self.latency_headroom,
                1.0,
                f64::MAX,
            ));
        }
        if self.hostname.trim().is_empty() {
            return Err(ConfigError::empty("hostname"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AdaptiveConfig::default();
        assert_eq!(config.initial_permits, 10);
        assert_eq!(config.max_permits, 64);
        assert_eq!(config.reservoir_capacity, 1028);
        assert_eq!(config.retry_base, Duration::from_millis(100));
        assert!(config.growth_enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_fixed_window() {
        let config = AdaptiveConfig::fixed(3);
        assert_eq!(config.initial_permits, 3);
        assert_eq!(config.max_permits, 3);
        assert!(!config.growth_enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_permits() {
        let config = AdaptiveConfig {
            initial_permits: 0,
            ..Default::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::zero("initial_permits")));
    }

    #[test]
    fn test_validate_rejects_max_below_initial() {
        let config = AdaptiveConfig {
            initial_permits: 8,
            max_permits: 4,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::OutOfRange { field: "max_permits", .. })
        ));
    }

    #[test]
    fn test_validate_rejects_bad_headroom() {
        for headroom in [0.5, f64::NAN] {
            let config = AdaptiveConfig {
                latency_headroom: headroom,
                ..Default::default()
            };
            assert!(config.validate().is_err(), "headroom {headroom} accepted");
        }
    }
}
