//! Storage health checks and background monitoring.

mod checker;
mod model;
mod monitor;

pub use checker::{CHECK_NAMES, HealthChecker};
pub use model::{HealthCheckResult, HealthStatus, SystemHealth};
pub use monitor::HealthMonitor;
