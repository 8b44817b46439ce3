//! Summary statistics over retained samples.

use serde::{Deserialize, Serialize};

/// Statistics computed on demand from the samples retained for one key.
///
/// A key with no samples yields all zeros.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricStats {
    /// Number of samples.
    pub count: usize,
    /// Sum of all samples.
    pub sum: f64,
    /// Smallest sample.
    pub min: f64,
    /// Largest sample.
    pub max: f64,
    /// Arithmetic mean.
    pub avg: f64,
    /// Median.
    pub p50: f64,
    /// 95th percentile.
    pub p95: f64,
    /// 99th percentile.
    pub p99: f64,
}

impl MetricStats {
    /// Compute statistics for `values`.
    #[must_use]
    pub fn from_values<I>(values: I) -> Self
    where
        I: IntoIterator<Item = f64>,
    {
        let mut sorted: Vec<f64> = values.into_iter().filter(|v| !v.is_nan()).collect();
        if sorted.is_empty() {
            return Self::default();
        }
        sorted.sort_by(f64::total_cmp);

        let count = sorted.len();
        let sum: f64 = sorted.iter().sum();
        #[allow(clippy::cast_precision_loss)]
        let avg = sum / count as f64;

        Self {
            count,
            sum,
            min: sorted[0],
            max: sorted[count - 1],
            avg,
            p50: percentile(&sorted, 0.50),
            p95: percentile(&sorted, 0.95),
            p99: percentile(&sorted, 0.99),
        }
    }
}

/// Nearest-rank percentile over an ascending, non-empty slice.
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
fn percentile(sorted: &[f64], p: f64) -> f64 {
    let index = ((sorted.len() as f64) * p) as usize;
    sorted[index.min(sorted.len() - 1)]
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_is_zero() {
        assert_eq!(MetricStats::from_values(Vec::new()), MetricStats::default());
    }

    #[test]
    fn test_hundred_samples() {
        let stats = MetricStats::from_values((1..=100).map(f64::from));
        assert_eq!(stats.count, 100);
        assert_eq!(stats.sum, 5050.0);
        assert_eq!(stats.min, 1.0);
        assert_eq!(stats.max, 100.0);
        assert_eq!(stats.avg, 50.5);
        assert_eq!(stats.p50, 51.0);
        assert_eq!(stats.p95, 96.0);
        assert_eq!(stats.p99, 100.0);
    }

    #[test]
    fn test_single_sample() {
        let stats = MetricStats::from_values([7.5]);
        assert_eq!(stats.p50, 7.5);
        assert_eq!(stats.p99, 7.5);
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn percentiles_are_ordered(v in proptest::collection::vec(0.0f64..10_000.0, 1..500)) {
                let stats = MetricStats::from_values(v);
                prop_assert!(stats.min <= stats.p50);
                prop_assert!(stats.p50 <= stats.p95);
                prop_assert!(stats.p95 <= stats.p99);
                prop_assert!(stats.p99 <= stats.max);
            }
        }
    }
}
