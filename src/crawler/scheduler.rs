//! Scheduler for the crawl worker pool
//!
//! This module handles:
//! - Spawning a fixed number of workers that poll the persistent job queue
//! - Claiming jobs atomically and driving them through the page pipeline
//! - Settling each job (complete, fail, requeue or leave paused)
//! - Cooperative cancellation of in-flight jobs
//! - Halting claims when the store keeps failing

use crate::config::CrawlerConfig;
use crate::crawler::{complete_with_neighbors, CancelReason, CancelSignal, CrawlOutcome, PageCrawler};
use crate::state::JobStatus;
use crate::storage::{lock, JobId, JobRecord, SharedStorage, Storage, StorageError, StorageResult};
use crate::wiki::LinkSource;
use crate::{CrawlError, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// State shared by the scheduler handle and its workers
struct Inner {
    storage: SharedStorage,
    crawler: PageCrawler,
    config: CrawlerConfig,

    /// Whether workers claim new jobs
    claiming: AtomicBool,

    /// Set once shutdown begins; new claims are interrupted immediately
    shutting_down: AtomicBool,

    /// Cancellation signals of jobs currently being crawled
    in_flight: Mutex<HashMap<JobId, CancelSignal>>,

    /// Polls in progress, from before the claim until the job is settled
    busy: AtomicUsize,

    /// Store failures since the last cleanly settled job
    db_failures: AtomicU32,
}

/// Scheduler owns the worker pool
///
/// The job table is the only queue; workers hold nothing but the job they
/// are crawling. Several schedulers (even in several processes) can share
/// one database.
pub struct Scheduler {
    inner: Arc<Inner>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    shutdown_tx: watch::Sender<bool>,
}

impl Scheduler {
    /// Creates a scheduler; no workers run until [`Scheduler::start`]
    pub fn new(storage: SharedStorage, source: Arc<dyn LinkSource>, config: CrawlerConfig) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                crawler: PageCrawler::new(source, storage.clone()),
                storage,
                config,
                claiming: AtomicBool::new(false),
                shutting_down: AtomicBool::new(false),
                in_flight: Mutex::new(HashMap::new()),
                busy: AtomicUsize::new(0),
                db_failures: AtomicU32::new(0),
            }),
            workers: Mutex::new(Vec::new()),
            shutdown_tx,
        }
    }

    /// Turns claiming on, spawning the workers on first call
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self) {
        if self.inner.shutting_down.load(Ordering::Acquire) {
            tracing::warn!("Scheduler is shutting down; not starting");
            return;
        }

        self.inner.db_failures.store(0, Ordering::Release);
        self.inner.claiming.store(true, Ordering::Release);

        let mut workers = match self.workers.lock() {
            Ok(workers) => workers,
            Err(poisoned) => poisoned.into_inner(),
        };
        if workers.is_empty() {
            for i in 0..self.inner.config.concurrency {
                let worker_id = format!("worker-{}", i);
                let inner = Arc::clone(&self.inner);
                let shutdown = self.shutdown_tx.subscribe();
                workers.push(tokio::spawn(worker_loop(inner, worker_id, shutdown)));
            }
            tracing::info!(workers = workers.len(), "Started crawl workers");
        } else {
            tracing::info!("Resumed claiming jobs");
        }
    }

    /// Stops claiming new jobs; in-flight jobs finish normally
    pub fn stop(&self) {
        if self.inner.claiming.swap(false, Ordering::AcqRel) {
            tracing::info!("Stopped claiming jobs");
        }
    }

    /// Returns true while workers claim new jobs
    pub fn is_running(&self) -> bool {
        self.inner.claiming.load(Ordering::Acquire)
    }

    /// Number of jobs currently being crawled by this scheduler
    pub fn in_flight(&self) -> usize {
        self.inner.in_flight_signals().len()
    }

    /// Asks the worker crawling `job_id` to stop and leave the job paused
    ///
    /// # Returns
    ///
    /// True if this scheduler was crawling the job
    pub fn cancel(&self, job_id: JobId) -> bool {
        match self.inner.in_flight_signals().get(&job_id) {
            Some(signal) => {
                signal.cancel(CancelReason::Operator);
                true
            }
            None => false,
        }
    }

    /// Signals operator cancellation to every in-flight job
    pub fn cancel_all(&self) -> usize {
        let signals = self.inner.in_flight_signals();
        for signal in signals.values() {
            signal.cancel(CancelReason::Operator);
        }
        signals.len()
    }

    /// Claims and crawls a single job on the calling task
    ///
    /// # Returns
    ///
    /// * `Ok(true)` - A job was claimed and settled
    /// * `Ok(false)` - The queue had nothing to claim
    pub async fn run_once(&self, worker_id: &str) -> Result<bool> {
        self.inner.run_once(worker_id).await
    }

    /// Claims and crawls jobs on the calling task until the queue is empty
    ///
    /// Ignores the claiming toggle. Returns the number of jobs settled.
    pub async fn run_until_idle(&self, worker_id: &str) -> Result<usize> {
        let mut settled = 0;
        while self.inner.run_once(worker_id).await? {
            settled += 1;
        }
        Ok(settled)
    }

    /// Waits until nothing is queued and no job is in flight here
    ///
    /// Also returns once claiming has been switched off and in-flight jobs
    /// have drained, so a halted scheduler does not wait forever.
    pub async fn wait_idle(&self) -> Result<()> {
        loop {
            let queued = {
                let store = lock(&self.inner.storage)?;
                let counts = store.count_jobs_by_status()?;
                counts.get(&JobStatus::Queued).copied().unwrap_or(0)
            };

            let busy = self.inner.busy.load(Ordering::Acquire);
            if busy == 0 && (queued == 0 || !self.is_running()) {
                return Ok(());
            }
            tokio::time::sleep(self.inner.config.poll_interval()).await;
        }
    }

    /// Interrupts in-flight jobs and waits for every worker to exit
    ///
    /// Interrupted jobs go back to `queued` with their cursor intact.
    pub async fn shutdown(&self) {
        self.inner.shutting_down.store(true, Ordering::Release);
        self.inner.claiming.store(false, Ordering::Release);

        let interrupted = {
            let signals = self.inner.in_flight_signals();
            for signal in signals.values() {
                signal.cancel(CancelReason::Interrupted);
            }
            signals.len()
        };
        self.shutdown_tx.send_replace(true);

        let handles: Vec<JoinHandle<()>> = match self.workers.lock() {
            Ok(mut workers) => workers.drain(..).collect(),
            Err(poisoned) => poisoned.into_inner().drain(..).collect(),
        };
        tracing::info!(
            interrupted,
            workers = handles.len(),
            "Shutting down crawl workers"
        );

        for handle in handles {
            if let Err(e) = handle.await {
                tracing::error!("Worker task failed: {}", e);
            }
        }
    }
}

impl Inner {
    fn in_flight_signals(&self) -> std::sync::MutexGuard<'_, HashMap<JobId, CancelSignal>> {
        match self.in_flight.lock() {
            Ok(signals) => signals,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn register(&self, job_id: JobId) -> CancelSignal {
        let signal = CancelSignal::new();
        if self.shutting_down.load(Ordering::Acquire) {
            signal.cancel(CancelReason::Interrupted);
        }
        self.in_flight_signals().insert(job_id, signal.clone());
        signal
    }

    fn unregister(&self, job_id: JobId) {
        self.in_flight_signals().remove(&job_id);
    }

    fn record_db_failure(&self) {
        let failures = self.db_failures.fetch_add(1, Ordering::AcqRel) + 1;
        if failures >= self.config.max_consecutive_db_failures
            && self.claiming.swap(false, Ordering::AcqRel)
        {
            tracing::error!(failures, "Store keeps failing; stopped claiming jobs");
        }
    }

    /// Reaps stuck jobs, then claims the next one
    fn claim(&self, worker_id: &str) -> StorageResult<Option<JobRecord>> {
        let mut store = lock(&self.storage)?;

        let max_age = chrono::Duration::minutes(self.config.stale_job_minutes as i64);
        let reaped = store.reap_stale_jobs(max_age)?;
        if reaped > 0 {
            tracing::warn!(reaped, "Moved stuck running jobs to error");
        }

        store.claim_next(worker_id)
    }

    async fn run_once(&self, worker_id: &str) -> Result<bool> {
        let _busy = BusyGuard::enter(&self.busy);

        let job = match self.claim(worker_id) {
            Ok(Some(job)) => job,
            Ok(None) => return Ok(false),
            Err(e) => {
                self.record_db_failure();
                return Err(e.into());
            }
        };

        tracing::info!(
            worker = worker_id,
            page_id = job.page_id,
            depth = job.depth,
            priority = job.priority,
            "Crawling page"
        );

        let signal = self.register(job.id());
        let result = self.crawler.crawl_page(&job, &signal).await;
        let settled = self.settle(&job, result);
        self.unregister(job.id());

        match settled {
            Ok(()) => self.db_failures.store(0, Ordering::Release),
            Err(e) => {
                tracing::error!(page_id = job.page_id, error = %e, "Store failed while settling job");
                if e.is_storage() {
                    self.record_db_failure();
                }
            }
        }
        Ok(true)
    }

    /// Records the pipeline result on the job row
    ///
    /// Returns an error when the store failed at any point of the job, even
    /// if the failure itself could be recorded on the row.
    fn settle(&self, job: &JobRecord, result: Result<CrawlOutcome>) -> Result<()> {
        let job_id = job.id();

        match result {
            Ok(outcome) => match complete_with_neighbors(&self.storage, job, &outcome.targets) {
                Ok(report) => tracing::info!(
                    page_id = job_id,
                    merged = outcome.targets.len(),
                    new_edges = outcome.new_edges,
                    neighbors_enqueued = report.enqueued + report.promoted,
                    "Completed page"
                ),
                Err(StorageError::InvalidTransition { from, .. }) => tracing::info!(
                    page_id = job_id,
                    status = %from,
                    "Job left running state before completion; neighbors not recorded"
                ),
                Err(e) => return self.settle(job, Err(e.into())),
            },
            Err(CrawlError::Cancelled(CancelReason::Interrupted)) => {
                lock(&self.storage)?.requeue(job_id)?;
                tracing::info!(page_id = job_id, "Requeued interrupted job");
            }
            Err(CrawlError::Cancelled(CancelReason::Operator)) => {
                let mut store = lock(&self.storage)?;
                if store.job_status(job_id)? == Some(JobStatus::Running) {
                    store.pause(job_id)?;
                }
                tracing::info!(page_id = job_id, "Job cancelled by operator");
            }
            Err(e) => {
                tracing::warn!(page_id = job_id, error = %e, "Job failed");
                match lock(&self.storage)?.fail(job_id, &e.to_string()) {
                    Ok(()) | Err(StorageError::InvalidTransition { .. }) => {}
                    Err(write) => return Err(write.into()),
                }
                if e.is_storage() {
                    return Err(e);
                }
            }
        }
        Ok(())
    }
}

/// Counts a poll as busy for as long as it is alive
struct BusyGuard<'a>(&'a AtomicUsize);

impl<'a> BusyGuard<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::AcqRel);
        Self(counter)
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

async fn worker_loop(inner: Arc<Inner>, worker_id: String, mut shutdown: watch::Receiver<bool>) {
    tracing::debug!(worker = worker_id.as_str(), "Worker started");

    loop {
        if *shutdown.borrow() {
            break;
        }

        let worked = if inner.claiming.load(Ordering::Acquire) {
            match inner.run_once(&worker_id).await {
                Ok(worked) => worked,
                Err(e) => {
                    tracing::error!(worker = worker_id.as_str(), error = %e, "Poll failed");
                    false
                }
            }
        } else {
            false
        };

        if !worked {
            tokio::select! {
                _ = tokio::time::sleep(inner.config.poll_interval()) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
    }

    tracing::debug!(worker = worker_id.as_str(), "Worker stopped");
}
