//! Batch operation options and results.

use std::time::Duration;

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::message::MessageId;

/// Callback receiving `(completed, total)` after every chunk.
pub type ProgressFn<'a> = &'a (dyn Fn(usize, usize) + Send + Sync);

/// Knobs for a batch operation.
#[derive(Clone, Copy, Default)]
pub struct BatchOptions<'a> {
    /// Items per chunk; the configured default when `None`.
    pub batch_size: Option<usize>,
    /// Progress callback.
    pub progress: Option<ProgressFn<'a>>,
    /// Checked before each chunk; once cancelled no further chunks start.
    pub cancel: Option<&'a CancellationToken>,
}

impl<'a> BatchOptions<'a> {
    /// Use chunks of `batch_size` items.
    #[must_use]
    pub const fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = Some(batch_size);
        self
    }

    /// Report progress to `progress`.
    #[must_use]
    pub fn progress(mut self, progress: ProgressFn<'a>) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Stop starting new chunks once `cancel` fires.
    #[must_use]
    pub const fn cancel(mut self, cancel: &'a CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancel.is_some_and(CancellationToken::is_cancelled)
    }

    pub(crate) fn report(&self, completed: usize, total: usize) {
        if let Some(progress) = self.progress {
            progress(completed, total);
        }
    }
}

/// Outcome of a batch operation.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchResult {
    /// Items submitted.
    pub total: usize,
    /// Items applied.
    pub succeeded: usize,
    /// Items that failed.
    pub failed: usize,
    /// Failed identifiers with the reason.
    pub errors: Vec<(MessageId, String)>,
    /// Wall-clock time spent.
    pub duration: Duration,
    /// Whether cancellation stopped the batch early.
    pub cancelled: bool,
}

impl BatchResult {
    pub(crate) fn new(total: usize) -> Self {
        Self {
            total,
            ..Self::default()
        }
    }

    /// Items processed so far, successful or not.
    #[must_use]
    pub const fn processed(&self) -> usize {
        self.succeeded + self.failed
    }

    /// Percentage of items that succeeded, 0 for an empty batch.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn success_rate(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.succeeded as f64 / self.total as f64 * 100.0
    }

    /// Whether every item succeeded.
    #[must_use]
    pub const fn is_complete_success(&self) -> bool {
        self.failed == 0 && self.succeeded == self.total
    }

    pub(crate) fn record_failure(&mut self, id: MessageId, reason: impl Into<String>) {
        self.failed += 1;
        self.errors.push((id, reason.into()));
    }
}
