//! Neighbor discovery
//!
//! Runs when a page's links are fully merged. The neighbors this job merged
//! (in the job's link direction) become jobs one level deeper: queued when
//! the plan cascades and the depth is within bounds, otherwise recorded as
//! `discovered` for later promotion. Edges left in the graph by earlier
//! crawls of the page do not count.

use crate::storage::{
    lock, Discoveries, DiscoveryReport, EnqueueJob, JobRecord, SharedStorage, Storage, StorageResult,
};

/// Completes a job and records the neighbors it merged
///
/// Neighbors inherit the job's priority, root and crawl plan. Pages that
/// already have a queued, running, finished, failed or paused job are left
/// alone, so discovery never interrupts or restarts existing work. The job
/// and its neighbors are written in one transaction; if the job was paused
/// meanwhile this fails with `InvalidTransition` and nothing is recorded.
///
/// # Arguments
///
/// * `job` - The running job
/// * `merged` - Neighbors merged by this job, in fetch order
pub fn complete_with_neighbors(
    storage: &SharedStorage,
    job: &JobRecord,
    merged: &[i64],
) -> StorageResult<DiscoveryReport> {
    let depth = job.depth + 1;
    let cascade = job.plan.auto_crawl && depth <= job.plan.max_depth;
    let discoveries = Discoveries {
        template: EnqueueJob {
            page_id: job.page_id,
            root_page_id: job.root(),
            depth,
            priority: job.priority,
            plan: job.plan.clone(),
            requested_by: job.requested_by.clone(),
        },
        page_ids: merged
            .iter()
            .copied()
            .filter(|&id| id != job.page_id)
            .collect(),
        enqueue: cascade,
    };

    let report = lock(storage)?.complete(job.id(), &discoveries)?;

    tracing::info!(
        page_id = job.page_id,
        depth,
        cascade,
        enqueued = report.enqueued + report.promoted,
        discovered = report.discovered,
        unchanged = report.unchanged,
        "Recorded neighbors"
    );

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{JobStatus, LinkDirection};
    use crate::storage::{shared, CrawlPlan, SqliteStorage, StorageError};
    use crate::wiki::ResolvedPage;

    const MERGED: [i64; 3] = [2, 3, 4];

    fn setup(plan: CrawlPlan, depth: u32) -> (SharedStorage, JobRecord) {
        let storage = shared(SqliteStorage::new_in_memory().unwrap());
        let job = {
            let mut store = lock(&storage).unwrap();
            store.merge_page(&ResolvedPage::new(1, "Root", 0)).unwrap();
            let targets: Vec<ResolvedPage> = MERGED
                .iter()
                .map(|&id| ResolvedPage::new(id, format!("N{}", id), 0))
                .collect();
            store.merge_batch(1, plan.direction, &targets).unwrap();
            let job = EnqueueJob {
                depth,
                ..EnqueueJob::root(1, 7, plan)
            };
            store.enqueue(&job).unwrap();
            store.claim_next("test").unwrap().unwrap()
        };
        (storage, job)
    }

    #[test]
    fn test_cascade_enqueues_at_next_depth() {
        let plan = CrawlPlan {
            auto_crawl: true,
            max_depth: 1,
            ..Default::default()
        };
        let (storage, job) = setup(plan, 0);

        let report = complete_with_neighbors(&storage, &job, &MERGED).unwrap();
        assert_eq!(report.enqueued, 3);

        let store = lock(&storage).unwrap();
        assert_eq!(store.job_status(1).unwrap(), Some(JobStatus::Done));
        for id in MERGED {
            let neighbor = store.get_job(id).unwrap().unwrap();
            assert_eq!(neighbor.status, JobStatus::Queued);
            assert_eq!(neighbor.depth, 1);
            assert_eq!(neighbor.priority, 7);
            assert_eq!(neighbor.root_page_id, Some(1));
            assert!(neighbor.plan.auto_crawl);
        }
    }

    #[test]
    fn test_depth_limit_marks_discovered() {
        let plan = CrawlPlan {
            auto_crawl: true,
            max_depth: 1,
            ..Default::default()
        };
        let (storage, job) = setup(plan, 1);

        let report = complete_with_neighbors(&storage, &job, &MERGED).unwrap();
        assert_eq!(report.discovered, 3);
        assert_eq!(
            lock(&storage).unwrap().job_status(2).unwrap(),
            Some(JobStatus::Discovered)
        );
    }

    #[test]
    fn test_no_cascade_marks_discovered() {
        let (storage, job) = setup(CrawlPlan::default(), 0);

        let report = complete_with_neighbors(&storage, &job, &MERGED).unwrap();
        assert_eq!(report.discovered, 3);
        assert_eq!(report.enqueued, 0);
    }

    #[test]
    fn test_inbound_neighbors_inherit_direction() {
        let plan = CrawlPlan {
            direction: LinkDirection::Inbound,
            auto_crawl: true,
            max_depth: 2,
            ..Default::default()
        };
        let (storage, job) = setup(plan, 0);

        let report = complete_with_neighbors(&storage, &job, &MERGED).unwrap();
        assert_eq!(report.enqueued, 3);
        let neighbor = lock(&storage).unwrap().get_job(3).unwrap().unwrap();
        assert_eq!(neighbor.plan.direction, LinkDirection::Inbound);
    }

    #[test]
    fn test_existing_jobs_are_not_reenqueued() {
        let plan = CrawlPlan {
            auto_crawl: true,
            max_depth: 3,
            ..Default::default()
        };
        let (storage, job) = setup(plan, 0);
        {
            let mut store = lock(&storage).unwrap();
            store.enqueue(&EnqueueJob::root(2, 0, CrawlPlan::default())).unwrap();
            store.claim_next("other").unwrap();
        }

        let report = complete_with_neighbors(&storage, &job, &MERGED).unwrap();

        assert_eq!(report.unchanged, 1);
        assert_eq!(report.enqueued, 2);
        let running = lock(&storage).unwrap().get_job(2).unwrap().unwrap();
        assert_eq!(running.status, JobStatus::Running);
        assert_eq!(running.depth, 0);
    }

    #[test]
    fn test_only_merged_neighbors_are_promoted() {
        // Every edge already exists and every neighbor is discovered
        let (storage, first) = setup(CrawlPlan::default(), 0);
        complete_with_neighbors(&storage, &first, &MERGED).unwrap();

        let plan = CrawlPlan {
            auto_crawl: true,
            max_depth: 2,
            link_cap: 1,
            ..Default::default()
        };
        let again = {
            let mut store = lock(&storage).unwrap();
            store.enqueue(&EnqueueJob::root(1, 7, plan)).unwrap();
            store.claim_next("test").unwrap().unwrap()
        };

        let report = complete_with_neighbors(&storage, &again, &[2]).unwrap();

        assert_eq!(report.promoted, 1);
        let store = lock(&storage).unwrap();
        assert_eq!(store.job_status(2).unwrap(), Some(JobStatus::Queued));
        assert_eq!(store.job_status(3).unwrap(), Some(JobStatus::Discovered));
        assert_eq!(store.job_status(4).unwrap(), Some(JobStatus::Discovered));
    }

    #[test]
    fn test_self_links_are_skipped() {
        let (storage, job) = setup(CrawlPlan::default(), 0);
        let report = complete_with_neighbors(&storage, &job, &[1, 2]).unwrap();
        assert_eq!(report.discovered, 1);
    }

    #[test]
    fn test_paused_job_records_nothing() {
        let plan = CrawlPlan {
            auto_crawl: true,
            max_depth: 1,
            ..Default::default()
        };
        let (storage, job) = setup(plan, 0);
        lock(&storage).unwrap().cancel_job(1).unwrap();

        let err = complete_with_neighbors(&storage, &job, &MERGED).unwrap_err();

        assert!(matches!(err, StorageError::InvalidTransition { .. }));
        assert!(lock(&storage).unwrap().get_job(2).unwrap().is_none());
    }
}
