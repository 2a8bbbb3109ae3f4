//! Pool configuration
//!
//! Configuration is plain data: it can be built in code, loaded from a TOML
//! file, and round-trips through serde. Durations are written as integer
//! seconds in config files. `PoolConfig::validate` rejects inconsistent
//! settings up front so the pool never has to re-check bounds at runtime.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::strategy::ServiceOrder;

/// Helper for (de)serializing `Duration` as integer seconds
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

/// Helper for (de)serializing `Option<Duration>` as integer seconds
mod option_duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(d) => serializer.serialize_some(&d.as_secs()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = Option::<u64>::deserialize(deserializer)?;
        Ok(secs.map(Duration::from_secs))
    }
}

/// Default values used by serde and `PoolConfig::default`
mod defaults {
    use std::time::Duration;

    #[inline]
    pub fn partition_count() -> usize {
        1
    }

    #[inline]
    pub fn min_connections_per_partition() -> usize {
        1
    }

    #[inline]
    pub fn max_connections_per_partition() -> usize {
        10
    }

    /// Idle connections are tested every 4 minutes by default
    #[inline]
    pub fn idle_connection_test_period() -> Duration {
        Duration::from_secs(240)
    }

    /// Connections idle for an hour are evicted
    #[inline]
    pub fn idle_max_age() -> Duration {
        Duration::from_secs(3600)
    }

    /// Zero means connections never age out by total lifetime
    #[inline]
    pub fn max_connection_age() -> Duration {
        Duration::ZERO
    }

    #[inline]
    pub fn acquire_retry_attempts() -> u32 {
        5
    }

    #[inline]
    pub fn acquire_retry_delay() -> Duration {
        Duration::from_secs(7)
    }

    /// Replenishment kicks in when free connections drop to 20% of max
    #[inline]
    pub fn pool_availability_threshold() -> u8 {
        20
    }
}

/// Configuration for a [`Pool`](crate::Pool)
///
/// All fields have defaults; `PoolConfig::default()` yields a single
/// partition of up to 10 connections with LIFO service order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PoolConfig {
    /// Number of independent partitions (shards)
    pub partition_count: usize,

    /// Connections each partition is filled to at startup and kept topped at
    pub min_connections_per_partition: usize,

    /// Hard upper bound on connections per partition (leased + free)
    pub max_connections_per_partition: usize,

    /// How long `get_connection` waits for a free connection.
    /// `None` waits indefinitely.
    #[serde(with = "option_duration_serde")]
    pub acquire_timeout: Option<Duration>,

    /// Period of the keep-alive task; connections idle longer than this are
    /// liveness-tested. Zero disables the keep-alive task entirely.
    #[serde(with = "duration_serde")]
    pub idle_connection_test_period: Duration,

    /// Connections idle longer than this are destroyed
    #[serde(with = "duration_serde")]
    pub idle_max_age: Duration,

    /// Connections older than this are destroyed regardless of use.
    /// Zero means unlimited.
    #[serde(with = "duration_serde")]
    pub max_connection_age: Duration,

    /// Total attempts the factory gets when creating a raw connection
    pub acquire_retry_attempts: u32,

    /// Delay between creation attempts
    #[serde(with = "duration_serde")]
    pub acquire_retry_delay: Duration,

    /// Percentage of max connections; when a partition's free count drops to
    /// or below this fraction, its watcher is signalled to create more
    pub pool_availability_threshold: u8,

    /// Free-queue discipline: LIFO reuses warm connections soonest, FIFO
    /// ages the pool evenly
    pub service_order: ServiceOrder,

    /// Ask the factory to reset connection state (rollback, auto-commit)
    /// before returning a connection to the free queue
    pub reset_connection_on_release: bool,

    /// Checkouts held longer than this are reported as leaks.
    /// `None` disables leak detection.
    #[serde(with = "option_duration_serde")]
    pub leak_detection_timeout: Option<Duration>,

    /// Destroy (rather than recycle) connections that were reported leaked
    /// once they are finally released
    pub close_leaked_connections: bool,

    /// Statement a driver-specific factory may execute to test liveness.
    /// The pool itself never interprets this.
    pub connection_test_statement: Option<String>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            partition_count: defaults::partition_count(),
            min_connections_per_partition: defaults::min_connections_per_partition(),
            max_connections_per_partition: defaults::max_connections_per_partition(),
            acquire_timeout: None,
            idle_connection_test_period: defaults::idle_connection_test_period(),
            idle_max_age: defaults::idle_max_age(),
            max_connection_age: defaults::max_connection_age(),
            acquire_retry_attempts: defaults::acquire_retry_attempts(),
            acquire_retry_delay: defaults::acquire_retry_delay(),
            pool_availability_threshold: defaults::pool_availability_threshold(),
            service_order: ServiceOrder::default(),
            reset_connection_on_release: false,
            leak_detection_timeout: None,
            close_leaked_connections: false,
            connection_test_statement: None,
        }
    }
}

/// Errors produced by [`PoolConfig::validate`]
#[derive(Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("partition_count must be at least 1")]
    NoPartitions,

    #[error("max_connections_per_partition must be at least 1")]
    ZeroMaxConnections,

    #[error("min_connections_per_partition ({min}) exceeds max_connections_per_partition ({max})")]
    MinExceedsMax { min: usize, max: usize },

    #[error("pool_availability_threshold must be 0-100, got {0}")]
    ThresholdOutOfRange(u8),

    #[error("acquire_retry_attempts must be at least 1")]
    ZeroRetryAttempts,
}

impl PoolConfig {
    /// Check the configuration for internal consistency
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.partition_count == 0 {
            return Err(ConfigError::NoPartitions);
        }
        if self.max_connections_per_partition == 0 {
            return Err(ConfigError::ZeroMaxConnections);
        }
        if self.min_connections_per_partition > self.max_connections_per_partition {
            return Err(ConfigError::MinExceedsMax {
                min: self.min_connections_per_partition,
                max: self.max_connections_per_partition,
            });
        }
        if self.pool_availability_threshold > 100 {
            return Err(ConfigError::ThresholdOutOfRange(
                self.pool_availability_threshold,
            ));
        }
        if self.acquire_retry_attempts == 0 {
            return Err(ConfigError::ZeroRetryAttempts);
        }
        Ok(())
    }

    /// Total connection capacity across all partitions
    #[must_use]
    pub fn total_capacity(&self) -> usize {
        self.partition_count * self.max_connections_per_partition
    }
}

/// Load a [`PoolConfig`] from a TOML file
pub fn load_config(path: impl AsRef<Path>) -> anyhow::Result<PoolConfig> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("Failed to read config file '{}': {}", path.display(), e))?;

    let config: PoolConfig = toml::from_str(&content)
        .map_err(|e| anyhow::anyhow!("Failed to parse config file '{}': {}", path.display(), e))?;

    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config_is_valid() {
        let config = PoolConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.partition_count, 1);
        assert_eq!(config.max_connections_per_partition, 10);
        assert_eq!(config.service_order, ServiceOrder::Lifo);
        assert_eq!(config.total_capacity(), 10);
    }

    #[test]
    fn test_validate_rejects_zero_partitions() {
        let config = PoolConfig {
            partition_count: 0,
            ..Default::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::NoPartitions));
    }

    #[test]
    fn test_validate_rejects_min_over_max() {
        let config = PoolConfig {
            min_connections_per_partition: 20,
            max_connections_per_partition: 10,
            ..Default::default()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::MinExceedsMax { min: 20, max: 10 })
        );
    }

    #[test]
    fn test_validate_rejects_threshold_over_100() {
        let config = PoolConfig {
            pool_availability_threshold: 101,
            ..Default::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::ThresholdOutOfRange(101)));
    }

    #[test]
    fn test_validate_rejects_zero_retry_attempts() {
        let config = PoolConfig {
            acquire_retry_attempts: 0,
            ..Default::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::ZeroRetryAttempts));
    }

    #[test]
    fn test_serde_round_trip() {
        let config = PoolConfig {
            partition_count: 4,
            acquire_timeout: Some(Duration::from_secs(30)),
            leak_detection_timeout: Some(Duration::from_secs(60)),
            service_order: ServiceOrder::Fifo,
            connection_test_statement: Some("SELECT 1".to_string()),
            ..Default::default()
        };

        let toml_string = toml::to_string_pretty(&config).expect("serialize");
        let parsed: PoolConfig = toml::from_str(&toml_string).expect("deserialize");
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_durations_serialize_as_seconds() {
        let config = PoolConfig {
            acquire_timeout: Some(Duration::from_secs(30)),
            ..Default::default()
        };
        let toml_string = toml::to_string_pretty(&config).expect("serialize");
        assert!(toml_string.contains("acquire_timeout = 30"));
        assert!(toml_string.contains("idle_connection_test_period = 240"));
    }

    #[test]
    fn test_load_config_from_file() -> anyhow::Result<()> {
        let mut temp_file = NamedTempFile::new()?;
        write!(
            temp_file,
            "partition_count = 2\n\
             max_connections_per_partition = 5\n\
             service_order = \"fifo\"\n"
        )?;

        let config = load_config(temp_file.path())?;
        assert_eq!(config.partition_count, 2);
        assert_eq!(config.max_connections_per_partition, 5);
        assert_eq!(config.service_order, ServiceOrder::Fifo);
        // Unspecified fields fall back to defaults
        assert_eq!(config.acquire_retry_attempts, 5);
        Ok(())
    }

    #[test]
    fn test_load_config_nonexistent_file() {
        let result = load_config("/nonexistent/path/pool.toml");
        assert!(result.is_err());
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("Failed to read config file")
        );
    }

    #[test]
    fn test_load_config_invalid_toml() -> anyhow::Result<()> {
        let mut temp_file = NamedTempFile::new()?;
        write!(temp_file, "not valid toml [[[")?;

        let result = load_config(temp_file.path());
        assert!(result.is_err());
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("Failed to parse config file")
        );
        Ok(())
    }

    #[test]
    fn test_load_config_rejects_invalid_values() -> anyhow::Result<()> {
        let mut temp_file = NamedTempFile::new()?;
        write!(temp_file, "partition_count = 0\n")?;

        let result = load_config(temp_file.path());
        assert!(result.is_err());
        Ok(())
    }

    #[test]
    fn test_load_config_rejects_unknown_fields() -> anyhow::Result<()> {
        let mut temp_file = NamedTempFile::new()?;
        write!(temp_file, "no_such_option = true\n")?;

        let result = load_config(temp_file.path());
        assert!(result.is_err());
        Ok(())
    }
}
