use crate::error::PlaylistError;
use std::time::Duration;

/// Result of one reconciliation tick.
#[derive(Debug, Clone)]
pub enum ReconcileOutcome {
    /// No playlist loaded; nothing to compare.
    Idle,
    /// Remote snapshot id equals the held one.
    Unchanged,
    /// Remote changed and the fetched content replaced local state.
    Adopted { snapshot_id: String },
    /// Remote changed but local optimistic edits are still in flight.
    SkippedPending { remote_snapshot_id: String, pending: usize },
    /// Polling failed; treated as no change.
    Failed(PlaylistError),
}

/// Self-adjusting poll delay: doubles on every quiet tick up to `max`, drops
/// back to `base` as soon as a change is seen.
#[derive(Debug, Clone)]
pub struct PollBackoff {
    base: Duration,
    max: Duration,
    current: Duration,
}

impl PollBackoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        let max = max.max(base);
        Self {
            base,
            max,
            current: base,
        }
    }

    pub fn current(&self) -> Duration {
        self.current
    }

    pub fn reset(&mut self) {
        self.current = self.base;
    }

    pub fn grow(&mut self) {
        self.current = (self.current * 2).min(self.max);
    }

    /// Update from a tick's outcome and return the delay before the next tick.
    pub fn next_delay(&mut self, outcome: &ReconcileOutcome) -> Duration {
        match outcome {
            ReconcileOutcome::Adopted { .. } | ReconcileOutcome::SkippedPending { .. } => {
                self.reset()
            }
            ReconcileOutcome::Idle | ReconcileOutcome::Unchanged => self.grow(),
            ReconcileOutcome::Failed(e) => {
                self.grow();
                if let Some(wait) = e.retry_after() {
                    self.current = self.current.max(wait);
                }
            }
        }
        self.current
    }
}
