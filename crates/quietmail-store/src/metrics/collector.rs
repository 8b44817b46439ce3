//! In-process metrics collector.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;
use std::future::Future;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use super::stats::MetricStats;
use super::timer::TimerGuard;
use crate::config::DatabaseConfig;

/// Metric name plus its label set, labels sorted by key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
struct MetricKey {
    name: String,
    labels: Vec<(String, String)>,
}

impl MetricKey {
    fn new(name: &str, labels: &[(&str, &str)]) -> Self {
        let mut labels: Vec<(String, String)> = labels
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        labels.sort();
        Self {
            name: name.to_string(),
            labels,
        }
    }
}

impl fmt::Display for MetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)?;
        if self.labels.is_empty() {
            return Ok(());
        }
        f.write_str("{")?;
        for (i, (k, v)) in self.labels.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{k}={v}")?;
        }
        f.write_str("}")
    }
}

#[derive(Default)]
struct Families {
    counters: HashMap<MetricKey, f64>,
    gauges: HashMap<MetricKey, f64>,
    histograms: HashMap<MetricKey, VecDeque<(Instant, f64)>>,
    timers: HashMap<MetricKey, VecDeque<(Instant, f64)>>,
}

/// Point-in-time copy of every metric, keyed by `name{label=value,...}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// When the snapshot was taken.
    pub timestamp: DateTime<Utc>,
    /// Counter sums.
    pub counters: BTreeMap<String, f64>,
    /// Last gauge values.
    pub gauges: BTreeMap<String, f64>,
    /// Histogram statistics.
    pub histograms: BTreeMap<String, MetricStats>,
    /// Timer statistics in milliseconds.
    pub timers: BTreeMap<String, MetricStats>,
}

/// Counters, gauges, histograms and timers keyed by name and labels.
///
/// Histograms and timers keep a bounded window of samples per key, oldest
/// evicted first; statistics are computed from that window when asked for.
/// Nothing here returns an error: unknown keys read as empty.
pub struct MetricsCollector {
    families: Mutex<Families>,
    window: usize,
    retention: Duration,
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::from_config(&DatabaseConfig::default())
    }
}

impl fmt::Debug for MetricsCollector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetricsCollector")
            .field("window", &self.window)
            .field("retention", &self.retention)
            .finish_non_exhaustive()
    }
}

impl MetricsCollector {
    /// Create a collector keeping `window` samples per key, each for at
    /// most `retention` once [`cleanup_old_data`](Self::cleanup_old_data)
    /// runs.
    #[must_use]
    pub fn new(window: usize, retention: Duration) -> Self {
        Self {
            families: Mutex::new(Families::default()),
            window: window.max(1),
            retention,
        }
    }

    /// Create a collector sized from the store configuration.
    #[must_use]
    pub fn from_config(config: &DatabaseConfig) -> Self {
        Self::new(config.metrics_window, config.metrics_retention)
    }

    /// Add `value` to a counter.
    pub fn increment(&self, name: &str, value: f64, labels: &[(&str, &str)]) {
        let key = MetricKey::new(name, labels);
        *self.families.lock().counters.entry(key).or_insert(0.0) += value;
    }

    /// Current counter value, zero if never incremented.
    #[must_use]
    pub fn counter(&self, name: &str, labels: &[(&str, &str)]) -> f64 {
        let key = MetricKey::new(name, labels);
        self.families
            .lock()
            .counters
            .get(&key)
            .copied()
            .unwrap_or(0.0)
    }

    /// Set a gauge.
    pub fn set_gauge(&self, name: &str, value: f64, labels: &[(&str, &str)]) {
        let key = MetricKey::new(name, labels);
        self.families.lock().gauges.insert(key, value);
    }

    /// Last gauge value.
    #[must_use]
    pub fn gauge(&self, name: &str, labels: &[(&str, &str)]) -> Option<f64> {
        let key = MetricKey::new(name, labels);
        self.families.lock().gauges.get(&key).copied()
    }

    /// Record a histogram observation.
    pub fn observe(&self, name: &str, value: f64, labels: &[(&str, &str)]) {
        let key = MetricKey::new(name, labels);
        let mut families = self.families.lock();
        let points = families.histograms.entry(key).or_default();
        if points.len() >= self.window {
            points.pop_front();
        }
        points.push_back((Instant::now(), value));
    }

    /// Statistics over a histogram's retained observations.
    #[must_use]
    pub fn histogram_stats(&self, name: &str, labels: &[(&str, &str)]) -> MetricStats {
        let key = MetricKey::new(name, labels);
        self.families
            .lock()
            .histograms
            .get(&key)
            .map(|points| MetricStats::from_values(points.iter().map(|(_, v)| *v)))
            .unwrap_or_default()
    }

    /// Record a timer sample.
    pub fn record_duration(&self, name: &str, duration: Duration, labels: &[(&str, &str)]) {
        let key = MetricKey::new(name, labels);
        let mut families = self.families.lock();
        let samples = families.timers.entry(key).or_default();
        if samples.len() >= self.window {
            samples.pop_front();
        }
        samples.push_back((Instant::now(), duration.as_secs_f64() * 1000.0));
    }

    /// Statistics over a timer's retained samples, in milliseconds.
    #[must_use]
    pub fn timer_stats(&self, name: &str, labels: &[(&str, &str)]) -> MetricStats {
        let key = MetricKey::new(name, labels);
        self.families
            .lock()
            .timers
            .get(&key)
            .map(|samples| MetricStats::from_values(samples.iter().map(|(_, v)| *v)))
            .unwrap_or_default()
    }

    /// Start a timer that records when the guard is dropped.
    pub fn start_timer(&self, name: &str, labels: &[(&str, &str)]) -> TimerGuard<'_> {
        TimerGuard::new(self, name, labels)
    }

    /// Run `future` and record how long it took.
    pub async fn time<F, T>(&self, name: &str, labels: &[(&str, &str)], future: F) -> T
    where
        F: Future<Output = T>,
    {
        let _guard = self.start_timer(name, labels);
        future.await
    }

    /// Copy out every metric.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        let families = self.families.lock();
        MetricsSnapshot {
            timestamp: Utc::now(),
            counters: families
                .counters
                .iter()
                .map(|(k, v)| (k.to_string(), *v))
                .collect(),
            gauges: families
                .gauges
                .iter()
                .map(|(k, v)| (k.to_string(), *v))
                .collect(),
            histograms: families
                .histograms
                .iter()
                .map(|(k, points)| {
                    (
                        k.to_string(),
                        MetricStats::from_values(points.iter().map(|(_, v)| *v)),
                    )
                })
                .collect(),
            timers: families
                .timers
                .iter()
                .map(|(k, samples)| {
                    (
                        k.to_string(),
                        MetricStats::from_values(samples.iter().map(|(_, v)| *v)),
                    )
                })
                .collect(),
        }
    }

    /// Drop every metric.
    pub fn reset(&self) {
        *self.families.lock() = Families::default();
    }

    /// Drop histogram points and timer samples older than the retention
    /// period, and any key left without samples.
    pub fn cleanup_old_data(&self) {
        let Some(cutoff) = Instant::now().checked_sub(self.retention) else {
            return;
        };
        let mut families = self.families.lock();
        prune(&mut families.histograms, cutoff);
        prune(&mut families.timers, cutoff);
    }
}

fn prune(family: &mut HashMap<MetricKey, VecDeque<(Instant, f64)>>, cutoff: Instant) {
    for points in family.values_mut() {
        while points.front().is_some_and(|(at, _)| *at <= cutoff) {
            points.pop_front();
        }
    }
    family.retain(|_, points| !points.is_empty());
}
