// SPDX-License-Identifier: MPL-2.0
//! Consecutive failure tracking for transient per-frame errors.
//!
//! Packet sends, hardware transfers and filter sink pulls fail occasionally on
//! healthy streams. A single failure is logged at debug level; a run that
//! reaches the threshold is escalated to a warning once, and the run resets
//! on the next success.

use crate::config::TRANSIENT_FAILURE_LOG_LIMIT;

/// How a failure should be reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReport {
    /// Log at debug level.
    Transient,
    /// The run just crossed the threshold: warn once.
    Persistent,
    /// Already warned for this run: stay quiet.
    Suppressed,
}

/// Counts consecutive failures of one operation.
///
/// # Example
///
/// ```
/// use vidlens::video_player::{FailureReport, FailureRun};
///
/// let mut run = FailureRun::new(2);
/// assert_eq!(run.record_failure(), FailureReport::Transient);
/// assert_eq!(run.record_failure(), FailureReport::Transient);
/// assert_eq!(run.record_failure(), FailureReport::Persistent);
/// assert_eq!(run.record_failure(), FailureReport::Suppressed);
/// run.record_success();
/// assert_eq!(run.count(), 0);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailureRun {
    count: u32,
    limit: u32,
}

impl FailureRun {
    /// Creates a counter that stays at debug level for `limit` failures. A zero
    /// limit is raised to one.
    #[must_use]
    pub fn new(limit: u32) -> Self {
        Self {
            count: 0,
            limit: limit.max(1),
        }
    }

    /// Records a failure and returns how it should be reported.
    pub fn record_failure(&mut self) -> FailureReport {
        self.count = self.count.saturating_add(1);
        if self.count <= self.limit {
            FailureReport::Transient
        } else if self.count == self.limit + 1 {
            FailureReport::Persistent
        } else {
            FailureReport::Suppressed
        }
    }

    /// Resets the run.
    pub fn record_success(&mut self) {
        self.count = 0;
    }

    /// Current run length.
    #[must_use]
    pub fn count(self) -> u32 {
        self.count
    }

    #[must_use]
    pub fn limit(self) -> u32 {
        self.limit
    }
}

impl Default for FailureRun {
    fn default() -> Self {
        Self::new(TRANSIENT_FAILURE_LOG_LIMIT)
    }
}
