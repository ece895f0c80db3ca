//! Configuration management for Tollgate.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::error::{Result, TollgateError};

/// Prefix for environment overrides, e.g. `TOLLGATE__LIMITER__CAPACITY=20`.
const ENV_PREFIX: &str = "TOLLGATE";
const ENV_SEPARATOR: &str = "__";

/// Main configuration for Tollgate.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TollgateConfig {
    /// Token bucket configuration
    #[serde(default)]
    pub limiter: LimiterConfig,

    /// Dedicated background sweeper configuration
    #[serde(default)]
    pub sweeper: SweeperConfig,
}

/// Token bucket limiter configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LimiterConfig {
    /// Steady-state tokens added per second
    #[serde(default = "default_rate_per_second")]
    pub rate_per_second: f64,

    /// Maximum tokens a bucket holds, which is also the maximum burst
    #[serde(default = "default_capacity")]
    pub capacity: f64,

    /// Idle duration after which a key's bucket is evicted
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,

    /// Minimum spacing between eviction passes on the call path
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    /// Wait advertised when a bucket is empty and `rate_per_second` is zero
    #[serde(default = "default_blocked_retry_after_secs")]
    pub blocked_retry_after_secs: u64,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            rate_per_second: default_rate_per_second(),
            capacity: default_capacity(),
            ttl_secs: default_ttl_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            blocked_retry_after_secs: default_blocked_retry_after_secs(),
        }
    }
}

fn default_rate_per_second() -> f64 {
    5.0
}

fn default_capacity() -> f64 {
    10.0
}

fn default_ttl_secs() -> u64 {
    15 * 60
}

fn default_sweep_interval_secs() -> u64 {
    60
}

fn default_blocked_retry_after_secs() -> u64 {
    60
}

impl LimiterConfig {
    /// Create a configuration with the given rate and capacity, keeping the
    /// default TTL, sweep interval and blocked fallback.
    pub fn new(rate_per_second: f64, capacity: f64) -> Self {
        Self {
            rate_per_second,
            capacity,
            ..Self::default()
        }
    }

    /// Idle duration before eviction.
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    /// Minimum spacing between amortized sweeps.
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    /// Check that the numeric settings describe a usable bucket.
    pub fn validate(&self) -> Result<()> {
        if !self.capacity.is_finite() || self.capacity <= 0.0 {
            return Err(TollgateError::Config(format!(
                "capacity must be a finite number greater than zero, got {}",
                self.capacity
            )));
        }
        if !self.rate_per_second.is_finite() || self.rate_per_second < 0.0 {
            return Err(TollgateError::Config(format!(
                "rate_per_second must be a finite, non-negative number, got {}",
                self.rate_per_second
            )));
        }
        Ok(())
    }
}

/// Dedicated sweeper configuration.
///
/// When disabled, idle buckets are only evicted on the call path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweeperConfig {
    /// Run a background eviction task
    #[serde(default)]
    pub enabled: bool,

    /// Period between background eviction passes
    #[serde(default = "default_sweeper_period_secs")]
    pub period_secs: u64,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            period_secs: default_sweeper_period_secs(),
        }
    }
}

fn default_sweeper_period_secs() -> u64 {
    60
}

impl SweeperConfig {
    /// Period between background eviction passes.
    pub fn period(&self) -> Duration {
        Duration::from_secs(self.period_secs)
    }
}

impl TollgateConfig {
    /// Load configuration from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading configuration");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: TollgateConfig = serde_yaml::from_str(yaml)
            .map_err(|e| TollgateError::Config(format!("Failed to parse configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from an optional file, overlaid with
    /// `TOLLGATE__`-prefixed environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = ::config::Config::builder();

        if let Some(path) = path {
            info!(path = %path.display(), "Loading configuration");
            builder = builder.add_source(::config::File::from(path));
        }

        let config: TollgateConfig = builder
            .add_source(
                ::config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator(ENV_SEPARATOR)
                    .separator(ENV_SEPARATOR)
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Validate every section.
    pub fn validate(&self) -> Result<()> {
        self.limiter.validate()?;
        if self.sweeper.enabled && self.sweeper.period_secs == 0 {
            return Err(TollgateError::Config(
                "sweeper.period_secs must be greater than zero when the sweeper is enabled"
                    .to_string(),
            ));
        }
        Ok(())
    }
}
