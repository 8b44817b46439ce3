//! Health report types.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::Result;

/// Outcome of a health check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Working normally.
    Healthy,
    /// Working, but slow or close to a limit.
    Degraded,
    /// Not working.
    Unhealthy,
    /// The check itself could not complete.
    Unknown,
}

impl HealthStatus {
    /// Lowercase name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Degraded => "degraded",
            Self::Unhealthy => "unhealthy",
            Self::Unknown => "unknown",
        }
    }

    /// Worst-of fold: any unhealthy is unhealthy, otherwise anything but
    /// healthy is degraded.
    #[must_use]
    pub fn fold<I: IntoIterator<Item = Self>>(statuses: I) -> Self {
        statuses
            .into_iter()
            .fold(Self::Healthy, |acc, status| match (acc, status) {
                (Self::Unhealthy, _) | (_, Self::Unhealthy) => Self::Unhealthy,
                (Self::Healthy, Self::Healthy) => Self::Healthy,
                _ => Self::Degraded,
            })
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one named check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthCheckResult {
    /// Check name.
    pub name: String,
    /// Outcome.
    pub status: HealthStatus,
    /// Human-readable summary.
    pub message: String,
    /// Time the check took.
    pub duration_ms: f64,
    /// Check-specific measurements.
    #[serde(default)]
    pub details: serde_json::Value,
    /// When the check finished.
    pub timestamp: DateTime<Utc>,
}

impl HealthCheckResult {
    /// Whether the check passed.
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }
}

/// Every check of one run, folded into an overall status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemHealth {
    /// Overall status.
    pub status: HealthStatus,
    /// Individual results, in run order.
    pub checks: Vec<HealthCheckResult>,
    /// When the run finished.
    pub timestamp: DateTime<Utc>,
}

impl SystemHealth {
    /// Fold `checks` into a report.
    #[must_use]
    pub fn from_checks(checks: Vec<HealthCheckResult>) -> Self {
        Self {
            status: HealthStatus::fold(checks.iter().map(|c| c.status)),
            checks,
            timestamp: Utc::now(),
        }
    }

    /// Whether every check passed.
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }

    /// Checks that did not pass.
    #[must_use]
    pub fn failed_checks(&self) -> Vec<&HealthCheckResult> {
        self.checks.iter().filter(|c| !c.is_healthy()).collect()
    }

    /// Pretty-printed JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
