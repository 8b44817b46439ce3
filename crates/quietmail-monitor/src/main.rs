//! Prints pool statistics, metrics and a health report for a `QuietMail`
//! store as JSON.
//!
//! Configuration comes from the environment: `QUIETMAIL_DB_PATH` names the
//! store (default `<data dir>/quietmail/quietmail.db`) and the `DB_*`
//! variables tune the engine. Exits with status 1 when the store is
//! unhealthy.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use quietmail_store::{DatabaseConfig, EngineManager, HealthChecker, HealthStatus};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DB_PATH_VAR: &str = "QUIETMAIL_DB_PATH";

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Report goes to stdout, logs to stderr
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "quietmail_store=info,quietmail_monitor=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = DatabaseConfig::from_env().context("invalid database configuration")?;
    let path = database_path()?;
    info!(path = %path.display(), "Checking store");

    let engine = Arc::new(EngineManager::new(path, config)?);
    let health = HealthChecker::new(Arc::clone(&engine)).check_all().await;
    let pool = engine.get_pool_stats().await;
    let metrics = engine.metrics().snapshot();
    engine.close().await;

    let report = serde_json::json!({
        "pool": pool,
        "health": health,
        "metrics": metrics,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);

    if health.status == HealthStatus::Unhealthy {
        for check in health.failed_checks() {
            warn!(check = %check.name, "{}", check.message);
        }
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}

fn database_path() -> Result<PathBuf> {
    if let Some(path) = std::env::var_os(DB_PATH_VAR).filter(|p| !p.is_empty()) {
        return Ok(PathBuf::from(path));
    }
    let data_dir = dirs::data_dir()
        .with_context(|| format!("no data directory found; set {DB_PATH_VAR}"))?;
    Ok(data_dir.join("quietmail").join("quietmail.db"))
}
