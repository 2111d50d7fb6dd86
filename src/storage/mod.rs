//! Storage module for the link graph and the crawl job queue
//!
//! This module handles all database operations, including:
//! - Idempotent page upserts and edge inserts with degree recomputation
//! - The persistent, prioritized job queue and its atomic claim
//! - Resumption cursors and neighbor discovery bookkeeping
//! - Administrative bulk operations

mod schema;
mod sqlite;
mod traits;

pub use sqlite::{now_timestamp, SqliteStorage};
pub use traits::{Storage, StorageError, StorageResult};

use crate::state::{JobStatus, LinkDirection};
use crate::wiki::{Continuation, NamespaceSet};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard};

/// Job identifier; jobs are keyed 1:1 by page identifier
pub type JobId = i64;

/// Storage handle shared between workers and the admin surface
pub type SharedStorage = Arc<Mutex<SqliteStorage>>;

/// Wraps a storage backend for sharing
pub fn shared(storage: SqliteStorage) -> SharedStorage {
    Arc::new(Mutex::new(storage))
}

/// Locks shared storage, surfacing poisoning as a storage error
pub fn lock(storage: &SharedStorage) -> StorageResult<MutexGuard<'_, SqliteStorage>> {
    storage.lock().map_err(|_| StorageError::LockPoisoned)
}

/// A page row
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PageRecord {
    pub page_id: i64,
    pub title: String,
    pub namespace: i32,
    pub is_redirect: bool,
    pub redirect_target_id: Option<i64>,
    pub out_degree: u64,
    pub in_degree: u64,
    pub created_at: String,
    pub updated_at: String,
}

/// A directed edge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct LinkRecord {
    #[serde(rename = "from")]
    pub from_page_id: i64,
    #[serde(rename = "to")]
    pub to_page_id: i64,
}

/// How a job crawls: configured once at enqueue, inherited by discovered neighbors
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CrawlPlan {
    pub direction: LinkDirection,
    /// Enqueue neighbors (up to `max_depth`) instead of only marking them discovered
    pub auto_crawl: bool,
    pub max_depth: u32,
    /// Targets merged per page; 0 means unlimited
    pub link_cap: u32,
    pub namespaces: NamespaceSet,
}

impl Default for CrawlPlan {
    fn default() -> Self {
        Self {
            direction: LinkDirection::Outbound,
            auto_crawl: false,
            max_depth: 0,
            link_cap: 0,
            namespaces: NamespaceSet::main(),
        }
    }
}

/// Parameters of a single enqueue or discovery
#[derive(Debug, Clone, Default)]
pub struct EnqueueJob {
    pub page_id: i64,
    pub root_page_id: i64,
    pub depth: u32,
    pub priority: i64,
    pub plan: CrawlPlan,
    pub requested_by: Option<String>,
}

impl EnqueueJob {
    /// A depth-0 job rooted at its own page
    pub fn root(page_id: i64, priority: i64, plan: CrawlPlan) -> Self {
        Self {
            page_id,
            root_page_id: page_id,
            depth: 0,
            priority,
            plan,
            requested_by: None,
        }
    }
}

/// Progress of a job through its page's link listing
///
/// Saved after every merged batch; the continuation itself is opaque.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResumeCursor {
    /// Where the next link page starts; `None` means from the beginning
    pub continuation: Option<Continuation>,
    /// Distinct neighbors merged so far, in fetch order
    pub targets: Vec<i64>,
    /// The listing has been read to the end
    pub exhausted: bool,
}

impl ResumeCursor {
    /// Neighbors counted against the link cap
    pub fn merged(&self) -> u64 {
        self.targets.len() as u64
    }
}

/// Neighbors recorded when a job completes
#[derive(Debug, Clone, Default)]
pub struct Discoveries {
    /// Fields every neighbor job inherits; `page_id` is set per neighbor
    pub template: EnqueueJob,
    pub page_ids: Vec<i64>,
    /// Queue new pages and promote `discovered` rows instead of only marking them
    pub enqueue: bool,
}

/// A crawl job row
#[derive(Debug, Clone, Serialize)]
pub struct JobRecord {
    pub page_id: i64,
    pub status: JobStatus,
    pub priority: i64,
    pub depth: u32,
    pub root_page_id: Option<i64>,
    pub plan: CrawlPlan,
    pub started_at: Option<String>,
    pub finished_at: Option<String>,
    pub last_error: Option<String>,
    pub cursor: Option<ResumeCursor>,
    pub requested_by: Option<String>,
    pub updated_at: String,
}

impl JobRecord {
    pub fn id(&self) -> JobId {
        self.page_id
    }

    /// The root this job belongs to; a job without one is its own root
    pub fn root(&self) -> i64 {
        self.root_page_id.unwrap_or(self.page_id)
    }
}

/// A job as shown in the jobs listing
#[derive(Debug, Clone, Serialize)]
pub struct JobListing {
    pub page_id: i64,
    pub title: Option<String>,
    pub status: JobStatus,
    pub priority: i64,
    pub depth: u32,
    pub root_page_id: Option<i64>,
    pub link_direction: LinkDirection,
    pub started_at: Option<String>,
    pub finished_at: Option<String>,
    pub last_error: Option<String>,
    pub out_degree: u64,
    pub in_degree: u64,
    pub updated_at: String,
}

/// What discovery did with one neighbor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryOutcome {
    /// A new `queued` row was created
    Enqueued,
    /// A `discovered` row was promoted to `queued`
    Promoted,
    /// A new `discovered` row was created
    Discovered,
    /// An existing `discovered` row was kept (depth possibly lowered)
    AlreadyDiscovered,
    /// The page already has an active or finished job; nothing changed
    AlreadyManaged,
}

/// Tally of one discovery pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DiscoveryReport {
    pub enqueued: usize,
    pub promoted: usize,
    pub discovered: usize,
    pub unchanged: usize,
}

impl DiscoveryReport {
    pub fn record(&mut self, outcome: DiscoveryOutcome) {
        match outcome {
            DiscoveryOutcome::Enqueued => self.enqueued += 1,
            DiscoveryOutcome::Promoted => self.promoted += 1,
            DiscoveryOutcome::Discovered => self.discovered += 1,
            DiscoveryOutcome::AlreadyDiscovered | DiscoveryOutcome::AlreadyManaged => {
                self.unchanged += 1
            }
        }
    }
}

/// One node of an ego graph
#[derive(Debug, Clone, Serialize)]
pub struct EgoNode {
    pub page_id: i64,
    pub title: String,
    pub out_degree: u64,
    pub in_degree: u64,
    pub is_center: bool,
}

/// A set of pages and every edge among them, focused on one center page
#[derive(Debug, Clone, Serialize)]
pub struct EgoGraph {
    pub center_page_id: i64,
    pub nodes: Vec<EgoNode>,
    pub edges: Vec<LinkRecord>,
}

/// Truncates a message to at most `max` characters
pub fn truncate_message(message: &str, max: usize) -> String {
    match message.char_indices().nth(max) {
        Some((idx, _)) => message[..idx].to_string(),
        None => message.to_string(),
    }
}
