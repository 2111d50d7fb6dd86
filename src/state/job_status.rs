//! Job status definitions for crawl jobs
//!
//! Every status change in the job store goes through [`JobStatus::transition`],
//! so an illegal move is rejected in one place regardless of which SQL
//! statement would have performed it.

use crate::storage::StorageError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Represents the current state of a crawl job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Seen as a neighbor but not scheduled
    Discovered,

    /// Waiting for a worker
    Queued,

    /// Claimed by a worker
    Running,

    /// Crawled successfully
    Done,

    /// Failed; retryable by re-enqueue
    Error,

    /// Frozen by an operator; retryable by re-enqueue
    Paused,
}

impl JobStatus {
    /// Returns true if `next` is a legal successor of this status
    ///
    /// `done` and `discovered` only leave through an explicit (re-)enqueue,
    /// and nothing reaches `running` without passing through `queued`.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Discovered, Queued)
                | (Queued, Running)
                | (Queued, Paused)
                | (Running, Done)
                | (Running, Error)
                | (Running, Paused)
                | (Running, Queued)
                | (Error, Queued)
                | (Paused, Queued)
                | (Done, Queued)
        )
    }

    /// Validates a transition, returning the new status
    pub fn transition(self, next: JobStatus) -> Result<JobStatus, StorageError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(StorageError::InvalidTransition {
                from: self,
                to: next,
            })
        }
    }

    /// Converts the status to its database string representation
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Discovered => "discovered",
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Done => "done",
            Self::Error => "error",
            Self::Paused => "paused",
        }
    }

    /// Parses a status from its database string representation
    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "discovered" => Some(Self::Discovered),
            "queued" => Some(Self::Queued),
            "running" => Some(Self::Running),
            "done" => Some(Self::Done),
            "error" => Some(Self::Error),
            "paused" => Some(Self::Paused),
            _ => None,
        }
    }

    /// Returns all statuses
    pub fn all() -> [Self; 6] {
        [
            Self::Discovered,
            Self::Queued,
            Self::Running,
            Self::Done,
            Self::Error,
            Self::Paused,
        ]
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_string())
    }
}
