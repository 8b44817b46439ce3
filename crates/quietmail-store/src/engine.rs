//! Pooled connection lifecycle for one storage file.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::DatabaseConfig;
use crate::metrics::MetricsCollector;
use crate::{Error, Result, folder};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Location {
    File(PathBuf),
    Memory,
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::File(path) => write!(f, "{}", path.display()),
            Self::Memory => f.write_str(":memory:"),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct HealthProbe {
    at: Instant,
    healthy: bool,
}

/// Best-effort snapshot of the connection pool.
///
/// Fields that cannot be observed (for instance before the pool exists) are
/// `None` and left out of the serialized form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStats {
    /// Storage file, or `:memory:`.
    pub database: String,
    /// Configured steady-state pool size.
    pub pool_size: u32,
    /// Configured overflow above `pool_size`.
    pub max_overflow: u32,
    /// Open connections.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u32>,
    /// Open connections not in use.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idle: Option<u32>,
    /// Connections currently handed out.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checked_out: Option<u32>,
    /// Open connections beyond `pool_size`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overflow: Option<u32>,
    /// Size of the storage file on disk.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_size_bytes: Option<u64>,
    /// Most recent cached health probe.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub healthy: Option<bool>,
}

impl PoolStats {
    /// Total connections the pool may open.
    #[must_use]
    pub const fn capacity(&self) -> u32 {
        self.pool_size.saturating_add(self.max_overflow)
    }
}

/// Owns the connection pool for one storage file.
///
/// The pool is created on first use and reused by every caller until
/// [`close`](Self::close); a later call to [`get_engine`](Self::get_engine)
/// opens a fresh one.
pub struct EngineManager {
    location: Location,
    config: DatabaseConfig,
    pool: Mutex<Option<SqlitePool>>,
    health: Mutex<Option<HealthProbe>>,
    metrics: Arc<MetricsCollector>,
}

impl fmt::Debug for EngineManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineManager")
            .field("location", &self.location)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl EngineManager {
    /// Create a manager for the storage file at `path`. Nothing is opened
    /// until the pool is first needed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if `config` is invalid.
    pub fn new(path: impl Into<PathBuf>, config: DatabaseConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(Location::File(path.into()), config))
    }

    /// Create a manager for a private in-memory database.
    ///
    /// The pool holds a single connection for its whole life, since every
    /// new in-memory connection would see an empty database.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::build(Location::Memory, DatabaseConfig::default())
    }

    /// In-memory manager with a custom configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if `config` is invalid.
    pub fn in_memory_with_config(config: DatabaseConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(Location::Memory, config))
    }

    fn build(location: Location, config: DatabaseConfig) -> Self {
        let metrics = Arc::new(MetricsCollector::from_config(&config));
        Self {
            location,
            config,
            pool: Mutex::new(None),
            health: Mutex::new(None),
            metrics,
        }
    }

    /// Record metrics into `metrics` instead of a private collector.
    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Store configuration.
    #[must_use]
    pub const fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    /// Metrics collector shared by everything built on this engine.
    #[must_use]
    pub const fn metrics(&self) -> &Arc<MetricsCollector> {
        &self.metrics
    }

    /// Storage file path, `None` for in-memory databases.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        match &self.location {
            Location::File(path) => Some(path),
            Location::Memory => None,
        }
    }

    /// Return the pool, creating it and the folder tables on first use.
    ///
    /// Creation is serialized: concurrent first callers all receive the same
    /// pool.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Connection`] if the pool or schema cannot be created.
    pub async fn get_engine(&self) -> Result<SqlitePool> {
        let mut guard = self.pool.lock().await;
        if let Some(pool) = guard.as_ref().filter(|p| !p.is_closed()) {
            return Ok(pool.clone());
        }

        let pool = self.create_pool().await?;
        *guard = Some(pool.clone());
        Ok(pool)
    }

    async fn create_pool(&self) -> Result<SqlitePool> {
        let path = self.location.to_string();
        let connection_error = |source: sqlx::Error| Error::Connection {
            path: path.clone(),
            source,
        };

        let pool = match &self.location {
            Location::File(file) => {
                if let Some(parent) = file.parent().filter(|p| !p.as_os_str().is_empty()) {
                    tokio::fs::create_dir_all(parent)
                        .await
                        .map_err(|e| connection_error(sqlx::Error::Io(e)))?;
                }
                let options = SqliteConnectOptions::new()
                    .filename(file)
                    .create_if_missing(true)
                    .journal_mode(SqliteJournalMode::Wal)
                    .synchronous(SqliteSynchronous::Normal)
                    .foreign_keys(true)
                    .busy_timeout(self.config.query_timeout);
                SqlitePoolOptions::new()
                    .max_connections(self.config.max_connections())
                    .acquire_timeout(self.config.pool_timeout)
                    .max_lifetime(self.config.pool_recycle)
                    .connect_with(options)
                    .await
                    .map_err(connection_error)?
            }
            Location::Memory => {
                let options = SqliteConnectOptions::from_str("sqlite::memory:")
                    .map_err(connection_error)?
                    .foreign_keys(true)
                    .busy_timeout(self.config.query_timeout);
                SqlitePoolOptions::new()
                    .max_connections(1)
                    .min_connections(1)
                    .idle_timeout(None)
                    .max_lifetime(None)
                    .acquire_timeout(self.config.pool_timeout)
                    .connect_with(options)
                    .await
                    .map_err(connection_error)?
            }
        };

        folder::initialize(&pool).await.map_err(|e| match e {
            Error::Database(source) => connection_error(source),
            other => other,
        })?;

        info!(
            database = %self.location,
            max_connections = self.config.max_connections(),
            "Database engine created"
        );
        Ok(pool)
    }

    /// Check the engine.
    ///
    /// Quick mode only reports whether a pool exists. Full mode runs a
    /// round-trip query and refreshes the cached health result.
    pub async fn health_check(&self, quick: bool) -> bool {
        if quick {
            return self
                .pool
                .lock()
                .await
                .as_ref()
                .is_some_and(|p| !p.is_closed());
        }

        let healthy = self.probe().await;
        *self.health.lock().await = Some(HealthProbe {
            at: Instant::now(),
            healthy,
        });
        healthy
    }

    /// Cached health, refreshed by a full check when older than
    /// `health_check_interval` or when `force_refresh` is set.
    ///
    /// Concurrent callers wait for a single probe instead of each running
    /// their own.
    pub async fn is_healthy(&self, force_refresh: bool) -> bool {
        let mut cache = self.health.lock().await;
        if !force_refresh
            && let Some(probe) = *cache
            && probe.at.elapsed() < self.config.health_check_interval
        {
            return probe.healthy;
        }

        let healthy = self.probe().await;
        *cache = Some(HealthProbe {
            at: Instant::now(),
            healthy,
        });
        healthy
    }

    async fn probe(&self) -> bool {
        let pool = match self.get_engine().await {
            Ok(pool) => pool,
            Err(e) => {
                warn!(error = %e, "Health probe could not obtain engine");
                return false;
            }
        };
        match sqlx::query("SELECT 1").execute(&pool).await {
            Ok(_) => true,
            Err(e) => {
                warn!(error = %e, "Health probe query failed");
                false
            }
        }
    }

    /// Snapshot of the pool. Never fails; unobservable fields are `None`.
    pub async fn get_pool_stats(&self) -> PoolStats {
        let pool = self
            .pool
            .lock()
            .await
            .as_ref()
            .filter(|p| !p.is_closed())
            .cloned();
        let healthy = self.health.lock().await.map(|p| p.healthy);

        let mut stats = PoolStats {
            database: self.location.to_string(),
            pool_size: self.config.pool_size,
            max_overflow: self.config.max_overflow,
            size: None,
            idle: None,
            checked_out: None,
            overflow: None,
            database_size_bytes: None,
            healthy,
        };

        if let Some(pool) = pool {
            let size = pool.size();
            let idle = u32::try_from(pool.num_idle()).unwrap_or(size);
            let checked_out = size.saturating_sub(idle);
            stats.size = Some(size);
            stats.idle = Some(idle);
            stats.checked_out = Some(checked_out);
            stats.overflow = Some(size.saturating_sub(self.config.pool_size));

            self.metrics
                .set_gauge("pool.size", f64::from(size), &[]);
            self.metrics
                .set_gauge("pool.checked_out", f64::from(checked_out), &[]);
        }

        if let Location::File(path) = &self.location {
            match tokio::fs::metadata(path).await {
                Ok(meta) => stats.database_size_bytes = Some(meta.len()),
                Err(e) => debug!(error = %e, "Database file size unavailable"),
            }
        }

        stats
    }

    /// Dispose of the pool. Safe to call more than once.
    pub async fn close(&self) {
        let pool = self.pool.lock().await.take();
        *self.health.lock().await = None;
        if let Some(pool) = pool {
            pool.close().await;
            info!(database = %self.location, "Database engine closed");
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn test_engine_is_created_once() {
        let engine = Arc::new(EngineManager::in_memory());

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let engine = Arc::clone(&engine);
                tokio::spawn(async move { engine.get_engine().await.unwrap() })
            })
            .collect();

        let mut pools = Vec::new();
        for handle in handles {
            pools.push(handle.await.unwrap());
        }

        sqlx::query("INSERT INTO drafts (uid, date, time) VALUES ('1', '2024-01-01', '00:00:00')")
            .execute(&pools[0])
            .await
            .unwrap();
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM drafts")
            .fetch_one(&pools[7])
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn test_quick_health_check_without_pool() {
        let engine = EngineManager::in_memory();
        assert!(!engine.health_check(true).await);
        assert!(engine.health_check(false).await);
        assert!(engine.health_check(true).await);
    }

    #[tokio::test]
    async fn test_is_healthy_uses_cache() {
        let config = DatabaseConfig {
            health_check_interval: Duration::from_secs(3600),
            ..DatabaseConfig::default()
        };
        let engine = EngineManager::in_memory_with_config(config).unwrap();
        assert!(engine.is_healthy(false).await);

        // A fresh cached result wins until a refresh is forced.
        engine.get_engine().await.unwrap();
        *engine.health.lock().await = Some(HealthProbe {
            at: Instant::now(),
            healthy: false,
        });
        assert!(!engine.is_healthy(false).await);
        assert!(engine.is_healthy(true).await);
    }

    #[tokio::test]
    async fn test_pool_stats_before_and_after_open() {
        let engine = EngineManager::in_memory();
        let stats = engine.get_pool_stats().await;
        assert_eq!(stats.database, ":memory:");
        assert_eq!(stats.size, None);
        assert_eq!(stats.database_size_bytes, None);

        let json = serde_json::to_value(&stats).unwrap();
        assert!(json.get("checked_out").is_none());

        engine.get_engine().await.unwrap();
        let stats = engine.get_pool_stats().await;
        assert_eq!(stats.size, Some(1));
        assert_eq!(stats.checked_out, Some(0));
        assert_eq!(stats.overflow, Some(0));
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let engine = EngineManager::in_memory();
        engine.get_engine().await.unwrap();
        engine.close().await;
        engine.close().await;
        assert!(!engine.health_check(true).await);

        // A new pool is opened on demand.
        engine.get_engine().await.unwrap();
        assert!(engine.health_check(true).await);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = DatabaseConfig {
            pool_size: 0,
            ..DatabaseConfig::default()
        };
        assert!(EngineManager::new("/tmp/x.db", config).is_err());
    }

    #[tokio::test]
    async fn test_unopenable_path_is_connection_error() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, b"not a directory").unwrap();

        let engine =
            EngineManager::new(blocker.join("store.db"), DatabaseConfig::default()).unwrap();
        let err = engine.get_engine().await.unwrap_err();
        assert!(matches!(err, Error::Connection { .. }));
    }
}
