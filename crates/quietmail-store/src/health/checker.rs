//! The fixed battery of storage health checks.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde_json::json;
use tracing::debug;

use super::model::{HealthCheckResult, HealthStatus, SystemHealth};
use crate::engine::EngineManager;
use crate::folder::Folder;
use crate::repository::MessageRepository;
use crate::{Error, Result};

/// Names accepted by [`HealthChecker::check_specific`], in run order.
pub const CHECK_NAMES: [&str; 5] = [
    "connectivity",
    "pool_health",
    "query_performance",
    "disk_space",
    "tables",
];

const POOL_HIGH_USAGE_PCT: f64 = 80.0;
const DISK_CRITICAL_GB: f64 = 0.5;
const DISK_LOW_GB: f64 = 2.0;
const GIB: f64 = 1024.0 * 1024.0 * 1024.0;

type Outcome = (HealthStatus, String, serde_json::Value);

/// Runs health checks against one engine.
///
/// Checks never fail: an error inside a check becomes an `unhealthy` or
/// `unknown` result.
#[derive(Debug, Clone)]
pub struct HealthChecker {
    engine: Arc<EngineManager>,
    repository: MessageRepository,
}

impl HealthChecker {
    /// Create a checker for `engine`.
    #[must_use]
    pub fn new(engine: Arc<EngineManager>) -> Self {
        let repository = MessageRepository::new(Arc::clone(&engine));
        Self { engine, repository }
    }

    /// Run every check and fold the results.
    pub async fn check_all(&self) -> SystemHealth {
        let checks = vec![
            self.check_connectivity().await,
            self.check_pool_health().await,
            self.check_query_performance().await,
            self.check_disk_space().await,
            self.check_tables().await,
        ];
        let health = SystemHealth::from_checks(checks);
        debug!(status = %health.status, "Health checks completed");
        health
    }

    /// Run one check by name.
    ///
    /// # Errors
    ///
    /// Returns a validation error if `name` is not one of [`CHECK_NAMES`].
    pub async fn check_specific(&self, name: &str) -> Result<HealthCheckResult> {
        match name {
            "connectivity" => Ok(self.check_connectivity().await),
            "pool_health" => Ok(self.check_pool_health().await),
            "query_performance" => Ok(self.check_query_performance().await),
            "disk_space" => Ok(self.check_disk_space().await),
            "tables" => Ok(self.check_tables().await),
            other => Err(Error::validation(format!(
                "Invalid check name: {other}. Must be one of: {}",
                CHECK_NAMES.join(", ")
            ))),
        }
    }

    /// Round-trip query against the store.
    pub async fn check_connectivity(&self) -> HealthCheckResult {
        let started = Instant::now();
        let outcome = if self.engine.health_check(false).await {
            (
                HealthStatus::Healthy,
                "Database connection is healthy".to_string(),
                serde_json::Value::Null,
            )
        } else {
            (
                HealthStatus::Unhealthy,
                "Database connection failed".to_string(),
                serde_json::Value::Null,
            )
        };
        finish("connectivity", started, outcome)
    }

    /// Pool saturation.
    pub async fn check_pool_health(&self) -> HealthCheckResult {
        let started = Instant::now();
        let stats = self.engine.get_pool_stats().await;
        let details = serde_json::to_value(&stats).unwrap_or_default();

        let Some(checked_out) = stats.checked_out else {
            return finish(
                "pool_health",
                started,
                (
                    HealthStatus::Unhealthy,
                    "Connection pool is not open".to_string(),
                    details,
                ),
            );
        };

        let capacity = stats.capacity();
        let usage_pct = if capacity == 0 {
            100.0
        } else {
            f64::from(checked_out) / f64::from(capacity) * 100.0
        };
        let (status, message) = if checked_out >= capacity {
            (HealthStatus::Unhealthy, "Connection pool exhausted")
        } else if usage_pct > POOL_HIGH_USAGE_PCT {
            (HealthStatus::Degraded, "Connection pool usage high")
        } else {
            (HealthStatus::Healthy, "Connection pool is healthy")
        };

        let mut details = details;
        if let Some(map) = details.as_object_mut() {
            map.insert("usage_pct".to_string(), json!(round(usage_pct, 1)));
        }
        finish("pool_health", started, (status, message.to_string(), details))
    }

    /// Latency of a representative query.
    pub async fn check_query_performance(&self) -> HealthCheckResult {
        let started = Instant::now();
        let outcome = match self.repository.count(Folder::Inbox).await {
            Ok(_) => {
                let elapsed_ms = ms(started.elapsed());
                let (status, rating) = classify_latency(elapsed_ms);
                let p95 = self
                    .engine
                    .metrics()
                    .timer_stats("repository.count", &[]);
                let mut details = json!({
                    "query_time_ms": round(elapsed_ms, 2),
                    "rating": rating,
                });
                if p95.count > 0 {
                    details["count_p95_ms"] = json!(round(p95.p95, 2));
                }
                (status, format!("Query performance is {rating}"), details)
            }
            Err(e) => failure("Query failed", &e),
        };
        finish("query_performance", started, outcome)
    }

    /// Free space on the volume holding the store.
    pub async fn check_disk_space(&self) -> HealthCheckResult {
        let started = Instant::now();
        let outcome = match self.disk_usage().await {
            Ok(outcome) => outcome,
            Err(e) => (
                HealthStatus::Unknown,
                format!("Disk space check failed: {e}"),
                serde_json::Value::Null,
            ),
        };
        finish("disk_space", started, outcome)
    }

    async fn disk_usage(&self) -> Result<Outcome> {
        let dir = self.storage_dir();
        if !dir.is_dir() {
            return Ok((
                HealthStatus::Unhealthy,
                format!("Database directory {} not found", dir.display()),
                serde_json::Value::Null,
            ));
        }

        let probe = dir.clone();
        let (free, total) = tokio::task::spawn_blocking(move || {
            Ok::<_, std::io::Error>((fs2::available_space(&probe)?, fs2::total_space(&probe)?))
        })
        .await
        .map_err(std::io::Error::other)??;

        #[allow(clippy::cast_precision_loss)]
        let (free_gb, total_gb) = (free as f64 / GIB, total as f64 / GIB);
        let (status, message) = if free_gb < DISK_CRITICAL_GB {
            (HealthStatus::Unhealthy, format!("Critical: Only {free_gb:.2} GB free"))
        } else if free_gb < DISK_LOW_GB {
            (
                HealthStatus::Degraded,
                format!("Warning: Low disk space ({free_gb:.2} GB free)"),
            )
        } else {
            (
                HealthStatus::Healthy,
                format!("Disk space is adequate ({free_gb:.2} GB free)"),
            )
        };

        let mut details = json!({
            "path": dir.display().to_string(),
            "free_gb": round(free_gb, 2),
            "total_gb": round(total_gb, 2),
        });
        if let Some(path) = self.engine.path()
            && let Ok(meta) = tokio::fs::metadata(path).await
        {
            #[allow(clippy::cast_precision_loss)]
            let size_mb = meta.len() as f64 / (1024.0 * 1024.0);
            details["db_size_mb"] = json!(round(size_mb, 2));
        }
        Ok((status, message, details))
    }

    fn storage_dir(&self) -> PathBuf {
        match self.engine.path().and_then(|p| p.parent()) {
            Some(parent) if parent.as_os_str().is_empty() => PathBuf::from("."),
            Some(parent) => parent.to_path_buf(),
            None => std::env::temp_dir(),
        }
    }

    /// Every folder table answers a count.
    pub async fn check_tables(&self) -> HealthCheckResult {
        let started = Instant::now();
        let mut counts = serde_json::Map::new();
        let mut total: u64 = 0;
        let mut outcome = None;
        for folder in Folder::ALL {
            match self.repository.count(folder).await {
                Ok(n) => {
                    counts.insert(folder.to_string(), json!(n));
                    total += n;
                }
                Err(e) => {
                    outcome = Some(failure(&format!("Table {folder} check failed"), &e));
                    break;
                }
            }
        }
        let outcome = outcome.unwrap_or_else(|| {
            (
                HealthStatus::Healthy,
                format!("All tables accessible ({total} total rows)"),
                json!({ "table_counts": counts, "total_rows": total }),
            )
        });
        finish("tables", started, outcome)
    }
}

fn finish(name: &str, started: Instant, outcome: Outcome) -> HealthCheckResult {
    let (status, message, details) = outcome;
    HealthCheckResult {
        name: name.to_string(),
        status,
        message,
        duration_ms: round(ms(started.elapsed()), 3),
        details,
        timestamp: Utc::now(),
    }
}

fn failure(context: &str, error: &Error) -> Outcome {
    (
        HealthStatus::Unhealthy,
        format!("{context}: {error}"),
        serde_json::Value::Null,
    )
}

fn classify_latency(elapsed_ms: f64) -> (HealthStatus, &'static str) {
    if elapsed_ms < 100.0 {
        (HealthStatus::Healthy, "excellent")
    } else if elapsed_ms < 500.0 {
        (HealthStatus::Healthy, "good")
    } else if elapsed_ms < 1000.0 {
        (HealthStatus::Degraded, "slow")
    } else {
        (HealthStatus::Degraded, "poor")
    }
}

fn ms(duration: Duration) -> f64 {
    duration.as_secs_f64() * 1000.0
}

fn round(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn checker() -> HealthChecker {
        HealthChecker::new(Arc::new(EngineManager::in_memory()))
    }

    #[test]
    fn test_latency_classes() {
        assert_eq!(classify_latency(5.0), (HealthStatus::Healthy, "excellent"));
        assert_eq!(classify_latency(250.0), (HealthStatus::Healthy, "good"));
        assert_eq!(classify_latency(750.0), (HealthStatus::Degraded, "slow"));
        assert_eq!(classify_latency(1500.0), (HealthStatus::Degraded, "poor"));
    }

    #[tokio::test]
    async fn test_pool_not_open_is_unhealthy() {
        let result = checker().check_pool_health().await;
        assert_eq!(result.status, HealthStatus::Unhealthy);
        assert_eq!(result.name, "pool_health");
    }

    #[tokio::test]
    async fn test_check_all_on_fresh_store() {
        let checker = checker();
        let health = checker.check_all().await;
        let names: Vec<&str> = health.checks.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, CHECK_NAMES);

        let by_name = |name: &str| health.checks.iter().find(|c| c.name == name).unwrap();
        assert_eq!(by_name("connectivity").status, HealthStatus::Healthy);
        assert_eq!(by_name("pool_health").status, HealthStatus::Healthy);
        assert_eq!(by_name("tables").status, HealthStatus::Healthy);
        assert_eq!(by_name("tables").details["total_rows"], 0);
        assert!(by_name("query_performance").details["count_p95_ms"].is_number());
    }

    #[tokio::test]
    async fn test_check_specific() {
        let checker = checker();
        let result = checker.check_specific("tables").await.unwrap();
        assert_eq!(result.name, "tables");
        assert!(checker.check_specific("indexes").await.unwrap_err().is_validation());
    }

    #[tokio::test]
    async fn test_broken_table_is_unhealthy() {
        let checker = checker();
        let pool = checker.engine.get_engine().await.unwrap();
        sqlx::query("DROP TABLE sent").execute(&pool).await.unwrap();

        let result = checker.check_tables().await;
        assert_eq!(result.status, HealthStatus::Unhealthy);
        assert!(result.message.contains("sent"));
    }
}
