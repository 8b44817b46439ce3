//! Process metrics: counters, gauges, histograms and timers.
//!
//! Components record into the [`MetricsCollector`] owned by their
//! [`EngineManager`](crate::EngineManager). A process-wide collector exists
//! for callers that have no engine at hand, but only through [`global`].

mod collector;
mod stats;
mod timer;

use std::sync::{Arc, OnceLock};

pub use collector::{MetricsCollector, MetricsSnapshot};
pub use stats::MetricStats;
pub use timer::TimerGuard;

static GLOBAL: OnceLock<Arc<MetricsCollector>> = OnceLock::new();

/// The process-wide collector, created with default settings on first use
/// unless [`init_global`] ran earlier.
pub fn global() -> Arc<MetricsCollector> {
    Arc::clone(GLOBAL.get_or_init(|| Arc::new(MetricsCollector::default())))
}

/// Install `collector` as the process-wide collector.
///
/// # Errors
///
/// Returns the collector back if the global was already initialized.
pub fn init_global(collector: Arc<MetricsCollector>) -> Result<(), Arc<MetricsCollector>> {
    GLOBAL.set(collector)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_global_is_shared() {
        let a = global();
        let b = global();
        assert!(Arc::ptr_eq(&a, &b));
        assert!(init_global(Arc::new(MetricsCollector::default())).is_err());
    }
}
