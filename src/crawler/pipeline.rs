//! Per-page crawl pipeline
//!
//! One job drives one page through fetch → resolve → merge, a link page at a
//! time. After every merged batch the resumption cursor is saved, so a job
//! interrupted at any point resumes without duplicate or missing edges.

use crate::crawler::{CancelReason, CancelSignal};
use crate::state::JobStatus;
use crate::storage::{lock, JobId, JobRecord, SharedStorage, Storage, StorageError};
use crate::wiki::{LinkSource, ResolvedPage, TitleResolver};
use crate::{CrawlError, Result};
use std::collections::HashSet;
use std::sync::Arc;

/// Summary of one pipeline run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CrawlOutcome {
    /// Link pages fetched during this run (not counting earlier runs)
    pub pages_fetched: usize,
    /// Distinct neighbors merged for this page across resumptions, in fetch order
    pub targets: Vec<i64>,
    /// Edges that did not exist before this run
    pub new_edges: usize,
}

/// Crawls single pages into the graph store
#[derive(Clone)]
pub struct PageCrawler {
    source: Arc<dyn LinkSource>,
    resolver: TitleResolver,
    storage: SharedStorage,
}

impl PageCrawler {
    pub fn new(source: Arc<dyn LinkSource>, storage: SharedStorage) -> Self {
        Self {
            resolver: TitleResolver::new(source.clone()),
            source,
            storage,
        }
    }

    /// Runs the pipeline for a claimed job
    ///
    /// Starts from the job's saved cursor if it has one. Cancellation is
    /// checked before every fetch and after every resolution; a cancelled
    /// run returns [`CrawlError::Cancelled`] with the cursor reflecting the
    /// last fully merged batch.
    ///
    /// # Arguments
    ///
    /// * `job` - A job in `running` status
    /// * `cancel` - The job's cancellation signal
    pub async fn crawl_page(&self, job: &JobRecord, cancel: &CancelSignal) -> Result<CrawlOutcome> {
        let page = lock(&self.storage)?
            .get_page(job.page_id)?
            .ok_or(StorageError::PageNotFound(job.page_id))?;

        let plan = &job.plan;
        let cap = u64::from(plan.link_cap);
        let mut cursor = job.cursor.clone().unwrap_or_default();
        let mut outcome = CrawlOutcome::default();

        if cursor.merged() > 0 || cursor.continuation.is_some() {
            tracing::info!(
                page_id = job.page_id,
                merged = cursor.merged(),
                "Resuming page from saved cursor"
            );
        }

        let mut merged: HashSet<i64> = cursor.targets.iter().copied().collect();

        while !cursor.exhausted && (cap == 0 || cursor.merged() < cap) {
            self.check_cancelled(job.id(), cancel)?;

            let batch = self
                .source
                .fetch_links_page(
                    &page.title,
                    plan.direction,
                    &plan.namespaces,
                    cursor.continuation.as_ref(),
                )
                .await?;
            outcome.pages_fetched += 1;

            let resolved = self
                .resolver
                .resolve_titles(&batch.links, &plan.namespaces)
                .await?;

            self.check_cancelled(job.id(), cancel)?;

            // Fetch order decides which targets fall under the cap. A target
            // already merged from an earlier batch (say through a redirect)
            // is not counted twice.
            let remaining = if cap > 0 {
                (cap - cursor.merged()) as usize
            } else {
                usize::MAX
            };
            let mut targets: Vec<ResolvedPage> = Vec::new();
            for target in batch.links.iter().filter_map(|link| resolved.get(&link.title)) {
                if targets.len() == remaining {
                    break;
                }
                if merged.insert(target.page_id) {
                    targets.push(target.clone());
                }
            }

            {
                let mut store = lock(&self.storage)?;
                outcome.new_edges += store.merge_batch(job.page_id, plan.direction, &targets)?;
                cursor.targets.extend(targets.iter().map(|t| t.page_id));
                cursor.exhausted = batch.next.is_none();
                cursor.continuation = batch.next;
                store.save_cursor(job.page_id, &cursor)?;
            }

            tracing::debug!(
                page_id = job.page_id,
                batch = targets.len(),
                merged = cursor.merged(),
                "Merged link batch"
            );
        }

        outcome.targets = cursor.targets;
        Ok(outcome)
    }

    fn check_cancelled(&self, job_id: JobId, cancel: &CancelSignal) -> Result<()> {
        if let Some(reason) = cancel.reason() {
            return Err(CrawlError::Cancelled(reason));
        }

        // An operator may have paused the row from another process
        let status = lock(&self.storage)?.job_status(job_id)?;
        if status != Some(JobStatus::Running) {
            cancel.cancel(CancelReason::Operator);
            return Err(CrawlError::Cancelled(CancelReason::Operator));
        }
        Ok(())
    }
}
