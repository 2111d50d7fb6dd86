//! Administrative control over the crawl
//!
//! `AdminControl` is the single entry point operators (and the HTTP surface
//! in [`http`]) use to enqueue roots, inspect and cancel jobs, toggle the
//! scheduler, purge the store, and run read-only queries.

pub mod http;

use crate::config::Config;
use crate::crawler::{BlastRadiusEstimate, Estimator, Scheduler};
use crate::state::{JobStatus, LinkDirection};
use crate::storage::{
    lock, CrawlPlan, EgoGraph, EnqueueJob, JobListing, JobRecord, PageRecord, SharedStorage,
    Storage, StorageError,
};
use crate::wiki::{LinkSource, NamespaceSet, TitleResolver};
use crate::{CrawlError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Default and maximum page size of the jobs listing
pub const DEFAULT_JOBS_LIMIT: usize = 200;
pub const MAX_JOBS_LIMIT: usize = 1000;

/// Default and maximum neighbors per direction in an ego graph
pub const DEFAULT_EGO_NEIGHBORS: usize = 50;
pub const MAX_EGO_NEIGHBORS: usize = 500;

/// Default and maximum pages in the best-connected subgraph
pub const DEFAULT_TOP_PAGES: usize = 1000;
pub const MAX_TOP_PAGES: usize = 5000;

/// A request to crawl from a root title
#[derive(Debug, Clone, Deserialize)]
pub struct CrawlRequest {
    pub title: String,
    #[serde(default)]
    pub priority: i64,
    #[serde(default)]
    pub link_direction: LinkDirection,
    #[serde(default)]
    pub auto_crawl_neighbors: bool,
    /// Overrides the configured depth limit
    #[serde(default)]
    pub max_depth: Option<u32>,
    /// Overrides the configured per-page link cap
    #[serde(default)]
    pub link_cap: Option<u32>,
    #[serde(default)]
    pub requested_by: Option<String>,
}

impl CrawlRequest {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            priority: 0,
            link_direction: LinkDirection::Outbound,
            auto_crawl_neighbors: false,
            max_depth: None,
            link_cap: None,
            requested_by: None,
        }
    }
}

/// The page and job created by an enqueue
#[derive(Debug, Clone, Serialize)]
pub struct EnqueuedJob {
    pub page: PageRecord,
    pub job: JobRecord,
}

/// One page of the jobs listing
#[derive(Debug, Clone, Serialize)]
pub struct JobsPage {
    pub jobs: Vec<JobListing>,
    pub counts: BTreeMap<JobStatus, u64>,
    pub limit: usize,
    pub offset: usize,
}

/// Scheduler state as reported to operators
#[derive(Debug, Clone, Serialize)]
pub struct CrawlerStatus {
    pub running: bool,
    pub in_flight: usize,
    pub counts: BTreeMap<JobStatus, u64>,
}

/// Plan values used when a request does not set them
#[derive(Debug, Clone)]
struct PlanDefaults {
    max_depth: u32,
    link_cap: u32,
    namespaces: NamespaceSet,
}

/// Operator-facing control surface
pub struct AdminControl {
    storage: SharedStorage,
    scheduler: Arc<Scheduler>,
    resolver: TitleResolver,
    estimator: Estimator,
    defaults: PlanDefaults,
}

/// Lifts job-store conditions operators act on into top-level errors
fn job_error(e: StorageError) -> CrawlError {
    match e {
        StorageError::AlreadyActive(page_id) => CrawlError::AlreadyActive(page_id),
        StorageError::JobNotFound(page_id) => CrawlError::JobNotFound(page_id),
        other => CrawlError::Storage(other),
    }
}

impl AdminControl {
    pub fn new(
        storage: SharedStorage,
        scheduler: Arc<Scheduler>,
        source: Arc<dyn LinkSource>,
        config: &Config,
    ) -> Self {
        let namespaces = NamespaceSet::from_slice(&config.crawler.allow_namespaces);
        Self {
            storage,
            scheduler,
            resolver: TitleResolver::new(source.clone()),
            estimator: Estimator::new(source, config.estimator.clone(), namespaces.clone()),
            defaults: PlanDefaults {
                max_depth: config.crawler.max_depth,
                link_cap: config.crawler.max_links_per_page,
                namespaces,
            },
        }
    }

    /// Resolves a root title and queues a depth-0 job for it
    ///
    /// # Returns
    ///
    /// * `Ok(EnqueuedJob)` - The merged root page and its queued job
    /// * `Err(CrawlError::AlreadyActive)` - The page's job is running
    /// * `Err(CrawlError::TitleResolution)` - The title does not exist
    pub async fn enqueue(&self, request: CrawlRequest) -> Result<EnqueuedJob> {
        let title = request.title.trim();
        if title.is_empty() {
            return Err(CrawlError::TitleResolution("empty title".to_string()));
        }

        let root = self
            .resolver
            .resolve_one(title, &self.defaults.namespaces)
            .await?;

        let plan = CrawlPlan {
            direction: request.link_direction,
            auto_crawl: request.auto_crawl_neighbors,
            max_depth: request.max_depth.unwrap_or(self.defaults.max_depth),
            link_cap: request.link_cap.unwrap_or(self.defaults.link_cap),
            namespaces: self.defaults.namespaces.clone(),
        };
        let job = EnqueueJob {
            requested_by: request.requested_by,
            ..EnqueueJob::root(root.page_id, request.priority, plan)
        };

        let mut store = lock(&self.storage)?;
        store.merge_page(&root)?;
        store.enqueue(&job).map_err(job_error)?;

        let page = store
            .get_page(root.page_id)?
            .ok_or(StorageError::PageNotFound(root.page_id))?;
        let job = store
            .get_job(root.page_id)?
            .ok_or(CrawlError::JobNotFound(root.page_id))?;

        tracing::info!(
            page_id = page.page_id,
            title = page.title.as_str(),
            priority = job.priority,
            direction = %job.plan.direction,
            auto_crawl = job.plan.auto_crawl,
            "Enqueued root page"
        );

        Ok(EnqueuedJob { page, job })
    }

    /// Lists jobs, running first, with per-status counts
    pub fn list_jobs(&self, limit: Option<usize>, offset: Option<usize>) -> Result<JobsPage> {
        let limit = limit.unwrap_or(DEFAULT_JOBS_LIMIT).clamp(1, MAX_JOBS_LIMIT);
        let offset = offset.unwrap_or(0);

        let store = lock(&self.storage)?;
        Ok(JobsPage {
            jobs: store.list_jobs(limit, offset)?,
            counts: store.count_jobs_by_status()?.into_iter().collect(),
            limit,
            offset,
        })
    }

    /// Pauses a queued or running job and signals its worker
    ///
    /// # Returns
    ///
    /// The status the job had before cancellation
    pub fn cancel_job(&self, page_id: i64) -> Result<JobStatus> {
        let previous = lock(&self.storage)?
            .cancel_job(page_id)
            .map_err(job_error)?;
        let signalled = self.scheduler.cancel(page_id);

        tracing::info!(page_id, previous = %previous, signalled, "Cancelled job");
        Ok(previous)
    }

    /// Pauses every running and queued job
    pub fn kill_all_running(&self) -> Result<usize> {
        let paused = lock(&self.storage)?.pause_all_active()?;
        let signalled = self.scheduler.cancel_all();

        tracing::warn!(paused, signalled, "Paused all active jobs");
        Ok(paused)
    }

    pub fn stop_crawler(&self) -> Result<CrawlerStatus> {
        self.scheduler.stop();
        self.crawler_status()
    }

    pub fn start_crawler(&self) -> Result<CrawlerStatus> {
        self.scheduler.start();
        self.crawler_status()
    }

    pub fn crawler_status(&self) -> Result<CrawlerStatus> {
        let counts = lock(&self.storage)?.count_jobs_by_status()?;
        Ok(CrawlerStatus {
            running: self.scheduler.is_running(),
            in_flight: self.scheduler.in_flight(),
            counts: counts.into_iter().collect(),
        })
    }

    /// Deletes every page, link and job
    pub fn purge_all(&self) -> Result<()> {
        self.scheduler.cancel_all();
        lock(&self.storage)?.purge_all()?;
        tracing::warn!("Deleted all graph and job data");
        Ok(())
    }

    pub async fn estimate(&self, title: &str) -> Result<BlastRadiusEstimate> {
        self.estimator.estimate(title.trim()).await
    }

    /// A page with up to `limit_neighbors` neighbors each way and the edges among them
    pub fn ego_graph(&self, page_id: i64, limit_neighbors: Option<usize>) -> Result<Option<EgoGraph>> {
        let limit = limit_neighbors
            .unwrap_or(DEFAULT_EGO_NEIGHBORS)
            .min(MAX_EGO_NEIGHBORS);
        Ok(lock(&self.storage)?.ego_graph(page_id, limit)?)
    }

    /// The best-connected pages by total degree and the edges among them
    pub fn top_graph(&self, limit: Option<usize>) -> Result<EgoGraph> {
        let limit = limit.unwrap_or(DEFAULT_TOP_PAGES).clamp(1, MAX_TOP_PAGES);
        Ok(lock(&self.storage)?.top_graph(limit)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crawler::testing::FakeLinkSource;
    use crate::storage::{shared, SqliteStorage};
    use crate::wiki::ResolvedPage;

    fn admin_with(source: Arc<FakeLinkSource>) -> (SharedStorage, AdminControl) {
        let config = Config::default();
        let storage = shared(SqliteStorage::new_in_memory().unwrap());
        let scheduler = Arc::new(Scheduler::new(
            storage.clone(),
            source.clone(),
            config.crawler.clone(),
        ));
        let admin = AdminControl::new(storage.clone(), scheduler, source, &config);
        (storage, admin)
    }

    fn dog_source() -> Arc<FakeLinkSource> {
        let source = Arc::new(FakeLinkSource::new());
        source.add_page(42, "Dog", 0);
        source.add_redirect("Doggo", "Dog");
        source
    }

    #[tokio::test]
    async fn test_enqueue_resolves_and_queues() {
        let (_, admin) = admin_with(dog_source());

        let mut request = CrawlRequest::new("Doggo");
        request.priority = 5;
        request.auto_crawl_neighbors = true;
        request.link_cap = Some(10);
        let enqueued = admin.enqueue(request).await.unwrap();

        assert_eq!(enqueued.page.page_id, 42);
        assert_eq!(enqueued.page.title, "Dog");
        assert_eq!(enqueued.job.status, JobStatus::Queued);
        assert_eq!(enqueued.job.priority, 5);
        assert_eq!(enqueued.job.plan.link_cap, 10);
        assert_eq!(enqueued.job.plan.max_depth, Config::default().crawler.max_depth);
    }

    #[tokio::test]
    async fn test_enqueue_while_running_is_rejected() {
        let (storage, admin) = admin_with(dog_source());
        admin.enqueue(CrawlRequest::new("Dog")).await.unwrap();
        lock(&storage).unwrap().claim_next("w").unwrap();

        let err = admin.enqueue(CrawlRequest::new("Dog")).await.unwrap_err();

        assert!(matches!(err, CrawlError::AlreadyActive(42)));
        assert_eq!(admin.list_jobs(None, None).unwrap().jobs.len(), 1);
    }

    #[tokio::test]
    async fn test_enqueue_unknown_title() {
        let (_, admin) = admin_with(dog_source());
        assert!(matches!(
            admin.enqueue(CrawlRequest::new("Nowhere")).await,
            Err(CrawlError::TitleResolution(_))
        ));
        assert!(matches!(
            admin.enqueue(CrawlRequest::new("   ")).await,
            Err(CrawlError::TitleResolution(_))
        ));
    }

    #[tokio::test]
    async fn test_cancel_and_kill_all() {
        let source = dog_source();
        source.add_page(7, "Cat", 0);
        let (_, admin) = admin_with(source);
        admin.enqueue(CrawlRequest::new("Dog")).await.unwrap();
        admin.enqueue(CrawlRequest::new("Cat")).await.unwrap();

        assert_eq!(admin.cancel_job(42).unwrap(), JobStatus::Queued);
        assert!(matches!(admin.cancel_job(99), Err(CrawlError::JobNotFound(99))));
        assert_eq!(admin.kill_all_running().unwrap(), 1);

        let status = admin.crawler_status().unwrap();
        assert_eq!(status.counts[&JobStatus::Paused], 2);
    }

    #[tokio::test]
    async fn test_graph_queries_are_bounded() {
        let (storage, admin) = admin_with(dog_source());
        {
            let mut store = lock(&storage).unwrap();
            store.merge_page(&ResolvedPage::new(42, "Dog", 0)).unwrap();
            let targets: Vec<ResolvedPage> = (1000..1000 + MAX_EGO_NEIGHBORS as i64 + 20)
                .map(|id| ResolvedPage::new(id, format!("Page {}", id), 0))
                .collect();
            store
                .merge_batch(42, LinkDirection::Outbound, &targets)
                .unwrap();
        }

        let ego = admin.ego_graph(42, Some(usize::MAX)).unwrap().unwrap();
        assert_eq!(ego.nodes.len(), MAX_EGO_NEIGHBORS + 1);
        let ego = admin.ego_graph(42, None).unwrap().unwrap();
        assert_eq!(ego.nodes.len(), DEFAULT_EGO_NEIGHBORS + 1);

        let top = admin.top_graph(Some(0)).unwrap();
        assert_eq!(top.nodes.len(), 1);
        assert_eq!(top.center_page_id, 42);
        assert_eq!(admin.top_graph(Some(usize::MAX)).unwrap().edges.len(), MAX_EGO_NEIGHBORS + 20);
    }

    #[tokio::test]
    async fn test_crawler_toggle_and_purge() {
        let (storage, admin) = admin_with(dog_source());
        admin.enqueue(CrawlRequest::new("Dog")).await.unwrap();

        assert!(!admin.crawler_status().unwrap().running);
        assert!(!admin.stop_crawler().unwrap().running);

        admin.purge_all().unwrap();
        assert_eq!(lock(&storage).unwrap().count_pages().unwrap(), 0);
        assert!(admin.list_jobs(None, None).unwrap().jobs.is_empty());
    }
}
