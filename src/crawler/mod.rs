//! Crawler module for link-graph traversal
//!
//! This module contains the core crawling logic, including:
//! - The per-page pipeline: fetch link pages, resolve titles, merge batches
//! - Neighbor discovery after a page completes
//! - The worker pool that claims jobs from the persistent queue
//! - The read-only blast-radius estimator

mod discovery;
mod estimator;
mod pipeline;
mod scheduler;

#[cfg(test)]
pub(crate) mod testing;

pub use discovery::complete_with_neighbors;
pub use estimator::{BlastRadiusEstimate, DegreeEstimate, Estimator, LinkCount, NeighborSample};
pub use pipeline::{CrawlOutcome, PageCrawler};
pub use scheduler::Scheduler;

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

/// Why a running job was asked to stop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    /// An operator cancelled or killed the job; it stays paused
    Operator,

    /// The process is shutting down; the job goes back to the queue
    Interrupted,
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Operator => write!(f, "cancelled by operator"),
            Self::Interrupted => write!(f, "interrupted by shutdown"),
        }
    }
}

const SIGNAL_NONE: u8 = 0;
const SIGNAL_OPERATOR: u8 = 1;
const SIGNAL_INTERRUPTED: u8 = 2;

/// Cooperative cancellation flag shared between a worker and its controllers
///
/// Checked between link-page fetches and after title resolution. The first
/// reason set wins.
#[derive(Debug, Clone, Default)]
pub struct CancelSignal(Arc<AtomicU8>);

impl CancelSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self, reason: CancelReason) {
        let value = match reason {
            CancelReason::Operator => SIGNAL_OPERATOR,
            CancelReason::Interrupted => SIGNAL_INTERRUPTED,
        };
        let _ = self
            .0
            .compare_exchange(SIGNAL_NONE, value, Ordering::AcqRel, Ordering::Acquire);
    }

    pub fn reason(&self) -> Option<CancelReason> {
        match self.0.load(Ordering::Acquire) {
            SIGNAL_OPERATOR => Some(CancelReason::Operator),
            SIGNAL_INTERRUPTED => Some(CancelReason::Interrupted),
            _ => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.reason().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_signal_first_reason_wins() {
        let signal = CancelSignal::new();
        assert!(!signal.is_cancelled());

        let shared = signal.clone();
        shared.cancel(CancelReason::Operator);
        signal.cancel(CancelReason::Interrupted);

        assert_eq!(signal.reason(), Some(CancelReason::Operator));
    }
}
