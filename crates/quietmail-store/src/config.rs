//! Store configuration.
//!
//! Every tunable has a default and can be overridden from the environment
//! with [`DatabaseConfig::from_env`].

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Configuration for the connection pool, transactions, batching and metrics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Connections kept in the pool.
    pub pool_size: u32,
    /// Extra connections allowed above `pool_size` under load.
    pub max_overflow: u32,
    /// How long an acquire may wait for a free connection.
    pub pool_timeout: Duration,
    /// Maximum lifetime of a pooled connection.
    pub pool_recycle: Duration,
    /// Busy timeout applied to every connection.
    pub query_timeout: Duration,
    /// Wall-clock limit for one transaction.
    pub transaction_timeout: Duration,
    /// How long a cached health result stays valid.
    pub health_check_interval: Duration,
    /// Chunk size used when callers do not pick one.
    pub default_batch_size: usize,
    /// Largest chunk size accepted by batch operations.
    pub max_batch_size: usize,
    /// Whether slow transactions and searches are logged.
    pub log_slow_queries: bool,
    /// Threshold above which a transaction or search counts as slow.
    pub slow_query_threshold: Duration,
    /// How long histogram points are kept.
    pub metrics_retention: Duration,
    /// Samples retained per histogram/timer key.
    pub metrics_window: usize,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            pool_size: 5,
            max_overflow: 10,
            pool_timeout: Duration::from_secs(30),
            pool_recycle: Duration::from_secs(3600),
            query_timeout: Duration::from_secs(30),
            transaction_timeout: Duration::from_secs(60),
            health_check_interval: Duration::from_secs(60),
            default_batch_size: 100,
            max_batch_size: 1000,
            log_slow_queries: true,
            slow_query_threshold: Duration::from_secs(1),
            metrics_retention: Duration::from_secs(3600),
            metrics_window: 10_000,
        }
    }
}

impl DatabaseConfig {
    /// Build a configuration from defaults overridden by `DB_*` environment
    /// variables.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if a variable is set but cannot be parsed, or
    /// if the resulting configuration fails [`validate`](Self::validate).
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) but reading variables through
    /// `lookup`, which keeps tests away from the process environment.
    ///
    /// # Errors
    ///
    /// See [`from_env`](Self::from_env).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();
        let env = Env(&lookup);

        env.number("DB_POOL_SIZE", &mut config.pool_size)?;
        env.number("DB_MAX_OVERFLOW", &mut config.max_overflow)?;
        env.seconds("DB_POOL_TIMEOUT", &mut config.pool_timeout)?;
        env.seconds("DB_POOL_RECYCLE", &mut config.pool_recycle)?;
        env.seconds("DB_QUERY_TIMEOUT", &mut config.query_timeout)?;
        env.seconds("DB_TRANSACTION_TIMEOUT", &mut config.transaction_timeout)?;
        env.seconds("DB_HEALTH_CHECK_INTERVAL", &mut config.health_check_interval)?;
        env.number("DB_BATCH_SIZE", &mut config.default_batch_size)?;
        env.number("DB_MAX_BATCH_SIZE", &mut config.max_batch_size)?;
        env.flag("DB_LOG_SLOW_QUERIES", &mut config.log_slow_queries)?;
        env.seconds("DB_SLOW_QUERY_THRESHOLD", &mut config.slow_query_threshold)?;
        env.seconds("DB_METRICS_RETENTION", &mut config.metrics_retention)?;
        env.number("DB_METRICS_WINDOW", &mut config.metrics_window)?;

        config.validate()?;
        Ok(config)
    }

    /// Check the configuration for values the store cannot work with.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] describing the first offending field.
    pub fn validate(&self) -> Result<()> {
        if self.pool_size < 1 {
            return Err(Error::Config("pool_size must be >= 1".into()));
        }
        if self.pool_timeout.is_zero() {
            return Err(Error::Config("pool_timeout must be > 0".into()));
        }
        if self.query_timeout.is_zero() {
            return Err(Error::Config("query_timeout must be > 0".into()));
        }
        if self.transaction_timeout.is_zero() {
            return Err(Error::Config("transaction_timeout must be > 0".into()));
        }
        if self.default_batch_size < 1 {
            return Err(Error::Config("default_batch_size must be >= 1".into()));
        }
        if self.max_batch_size < self.default_batch_size {
            return Err(Error::Config(
                "max_batch_size must be >= default_batch_size".into(),
            ));
        }
        if self.metrics_window < 1 {
            return Err(Error::Config("metrics_window must be >= 1".into()));
        }
        Ok(())
    }

    /// Upper bound on simultaneously open connections.
    #[must_use]
    pub const fn max_connections(&self) -> u32 {
        self.pool_size.saturating_add(self.max_overflow)
    }
}

/// Typed access to environment overrides.
struct Env<'a, F>(&'a F);

impl<F: Fn(&str) -> Option<String>> Env<'_, F> {
    fn raw(&self, key: &str) -> Option<String> {
        (self.0)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn number<T: FromStr>(&self, key: &str, target: &mut T) -> Result<()> {
        if let Some(raw) = self.raw(key) {
            *target = raw
                .parse()
                .map_err(|_| Error::Config(format!("{key}: expected an integer, got {raw:?}")))?;
        }
        Ok(())
    }

    fn seconds(&self, key: &str, target: &mut Duration) -> Result<()> {
        if let Some(raw) = self.raw(key) {
            let secs: f64 = raw
                .parse()
                .map_err(|_| Error::Config(format!("{key}: expected seconds, got {raw:?}")))?;
            *target = Duration::try_from_secs_f64(secs)
                .map_err(|_| Error::Config(format!("{key}: {raw:?} is not a valid duration")))?;
        }
        Ok(())
    }

    fn flag(&self, key: &str, target: &mut bool) -> Result<()> {
        if let Some(raw) = self.raw(key) {
            *target = match raw.to_ascii_lowercase().as_str() {
                "true" | "1" => true,
                "false" | "0" => false,
                _ => {
                    return Err(Error::Config(format!(
                        "{key}: expected true, false, 1 or 0, got {raw:?}"
                    )));
                }
            };
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = DatabaseConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_connections(), 15);
    }

    #[test]
    fn test_env_overrides() {
        let config = DatabaseConfig::from_lookup(lookup(&[
            ("DB_POOL_SIZE", "8"),
            ("DB_TRANSACTION_TIMEOUT", "2.5"),
            ("DB_LOG_SLOW_QUERIES", "false"),
        ]))
        .unwrap();

        assert_eq!(config.pool_size, 8);
        assert_eq!(config.transaction_timeout, Duration::from_millis(2500));
        assert!(!config.log_slow_queries);
        assert_eq!(config.max_overflow, 10);
    }

    #[test]
    fn test_unparsable_value_names_variable() {
        let err = DatabaseConfig::from_lookup(lookup(&[("DB_POOL_SIZE", "lots")])).unwrap_err();
        assert!(err.to_string().contains("DB_POOL_SIZE"));
    }

    #[test]
    fn test_flag_accepts_only_boolean_forms() {
        for (raw, expected) in [("TRUE", true), ("1", true), ("False", false), ("0", false)] {
            let config =
                DatabaseConfig::from_lookup(lookup(&[("DB_LOG_SLOW_QUERIES", raw)])).unwrap();
            assert_eq!(config.log_slow_queries, expected, "{raw}");
        }
        for raw in ["yes", "on", "tru"] {
            let err = DatabaseConfig::from_lookup(lookup(&[("DB_LOG_SLOW_QUERIES", raw)]))
                .unwrap_err();
            assert!(matches!(err, Error::Config(_)));
            assert!(err.to_string().contains("DB_LOG_SLOW_QUERIES"));
        }
    }

    #[test]
    fn test_validation_rejects_small_max_batch() {
        let err = DatabaseConfig::from_lookup(lookup(&[
            ("DB_BATCH_SIZE", "500"),
            ("DB_MAX_BATCH_SIZE", "100"),
        ]))
        .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_zero_pool_size_rejected() {
        let config = DatabaseConfig {
            pool_size: 0,
            ..DatabaseConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
