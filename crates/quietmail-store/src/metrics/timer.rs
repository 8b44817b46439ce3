//! Scoped timing helpers.

use std::time::{Duration, Instant};

use super::collector::MetricsCollector;

/// Records the time between its creation and drop as a timer sample.
#[must_use = "the timer records when dropped"]
pub struct TimerGuard<'a> {
    collector: &'a MetricsCollector,
    name: String,
    labels: Vec<(String, String)>,
    started: Instant,
}

impl<'a> TimerGuard<'a> {
    pub(super) fn new(collector: &'a MetricsCollector, name: &str, labels: &[(&str, &str)]) -> Self {
        Self {
            collector,
            name: name.to_string(),
            labels: labels
                .iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                .collect(),
            started: Instant::now(),
        }
    }

    /// Time elapsed so far.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

impl Drop for TimerGuard<'_> {
    fn drop(&mut self) {
        let labels: Vec<(&str, &str)> = self
            .labels
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        self.collector
            .record_duration(&self.name, self.started.elapsed(), &labels);
    }
}
