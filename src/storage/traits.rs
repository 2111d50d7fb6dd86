//! Storage traits and error types
//!
//! This module defines the trait interface for storage backends and
//! associated error types.

use crate::state::{JobStatus, LinkDirection};
use crate::storage::{
    Discoveries, DiscoveryReport, EgoGraph, EnqueueJob, JobId, JobListing, JobRecord, LinkRecord,
    PageRecord, ResumeCursor,
};
use crate::wiki::ResolvedPage;
use std::collections::HashMap;
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Page not found: {0}")]
    PageNotFound(i64),

    #[error("Job not found: {0}")]
    JobNotFound(JobId),

    #[error("Job {0} is already running")]
    AlreadyActive(JobId),

    #[error("Invalid job transition: {from} -> {to}")]
    InvalidTransition { from: JobStatus, to: JobStatus },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Storage lock poisoned")]
    LockPoisoned,
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Trait for storage backend implementations
///
/// All graph mutation is idempotent; the only operation that needs mutual
/// exclusion between concurrent callers is [`Storage::claim_next`].
pub trait Storage {
    // ===== Graph Merge =====

    /// Inserts a page or updates its mutable fields
    fn merge_page(&mut self, page: &ResolvedPage) -> StorageResult<()>;

    /// Inserts edges `from -> to` for every target, ignoring existing ones
    ///
    /// Degrees of every touched page are recomputed in the same transaction.
    ///
    /// # Returns
    ///
    /// The number of edges that did not exist before
    fn merge_links(&mut self, from_page_id: i64, to_page_ids: &[i64]) -> StorageResult<usize>;

    /// Merges a batch of resolved neighbors of a crawled page in one transaction
    ///
    /// Upserts every target page, inserts the edges oriented by `direction`,
    /// and recomputes degrees for the crawled page and every target.
    fn merge_batch(
        &mut self,
        crawled_page_id: i64,
        direction: LinkDirection,
        targets: &[ResolvedPage],
    ) -> StorageResult<usize>;

    /// Sets a page's degree counters to its current distinct-edge counts
    ///
    /// # Returns
    ///
    /// `(out_degree, in_degree)`
    fn recompute_degree(&mut self, page_id: i64) -> StorageResult<(u64, u64)>;

    // ===== Graph Queries =====

    fn get_page(&self, page_id: i64) -> StorageResult<Option<PageRecord>>;

    fn get_outgoing_links(&self, page_id: i64) -> StorageResult<Vec<LinkRecord>>;

    fn count_pages(&self) -> StorageResult<u64>;

    fn count_links(&self) -> StorageResult<u64>;

    /// The center page, up to `limit_neighbors` neighbors per direction, and all edges among them
    fn ego_graph(&self, page_id: i64, limit_neighbors: usize) -> StorageResult<Option<EgoGraph>>;

    /// The `limit` linked pages with the highest total degree, and all edges among them
    ///
    /// The best-connected page is the center; an empty graph has center 0.
    fn top_graph(&self, limit: usize) -> StorageResult<EgoGraph>;

    // ===== Job Store =====

    /// Creates a `queued` job or resets an existing one to `queued`
    ///
    /// Fails with [`StorageError::AlreadyActive`] while the page's job is running.
    fn enqueue(&mut self, job: &EnqueueJob) -> StorageResult<JobId>;

    /// Atomically claims the highest-priority queued job (FIFO within a priority)
    fn claim_next(&mut self, worker_id: &str) -> StorageResult<Option<JobRecord>>;

    /// `running -> done`, clearing the cursor and recording the page's neighbors
    ///
    /// Both happen in one transaction: a job that is no longer running fails
    /// with [`StorageError::InvalidTransition`] and records no neighbor. With
    /// `enqueue` set, new pages are queued and `discovered` rows promoted;
    /// otherwise they are only marked discovered. Pages with any other job
    /// status are left alone.
    fn complete(&mut self, job_id: JobId, discoveries: &Discoveries) -> StorageResult<DiscoveryReport>;

    /// `running -> error`, recording the message
    fn fail(&mut self, job_id: JobId, message: &str) -> StorageResult<()>;

    /// `running | error | paused -> queued`, keeping the cursor
    fn requeue(&mut self, job_id: JobId) -> StorageResult<()>;

    /// `running -> paused`
    fn pause(&mut self, job_id: JobId) -> StorageResult<()>;

    /// Persists resumption state
    fn save_cursor(&mut self, job_id: JobId, cursor: &ResumeCursor) -> StorageResult<()>;

    fn get_job(&self, job_id: JobId) -> StorageResult<Option<JobRecord>>;

    fn job_status(&self, job_id: JobId) -> StorageResult<Option<JobStatus>>;

    /// Jobs ordered running, queued, error, rest; then by priority
    fn list_jobs(&self, limit: usize, offset: usize) -> StorageResult<Vec<JobListing>>;

    fn count_jobs_by_status(&self) -> StorageResult<HashMap<JobStatus, u64>>;

    /// Number of jobs at each BFS depth
    fn depth_breakdown(&self) -> StorageResult<HashMap<u32, u64>>;

    /// Moves jobs running for longer than `max_age` to `error`
    fn reap_stale_jobs(&mut self, max_age: chrono::Duration) -> StorageResult<usize>;

    // ===== Administration =====

    /// `queued | running -> paused`
    ///
    /// # Returns
    ///
    /// The status the job had before cancellation
    fn cancel_job(&mut self, job_id: JobId) -> StorageResult<JobStatus>;

    /// Pauses every running and queued job
    fn pause_all_active(&mut self) -> StorageResult<usize>;

    /// Deletes all pages, links and jobs
    fn purge_all(&mut self) -> StorageResult<()>;
}
