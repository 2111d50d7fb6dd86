//! Integration tests for the crawler
//!
//! These tests use wiremock to stand in for the MediaWiki API and drive
//! enqueue, claim, crawl, merge and discovery end-to-end.

use serde_json::{json, Value};
use std::sync::Arc;
use wikigraph::admin::{AdminControl, CrawlRequest};
use wikigraph::config::Config;
use wikigraph::crawler::Scheduler;
use wikigraph::storage::{lock, shared, CrawlPlan, EnqueueJob, SharedStorage, SqliteStorage};
use wikigraph::wiki::{ResolvedPage, WikiClient};
use wikigraph::{CrawlError, JobStatus, LinkDirection, Storage};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

/// A tiny wiki: "Dog" links to "Link 1".."Link 12", everything else links
/// nowhere. Page ids: Dog = 1, "Link n" = 100 + n.
struct FakeWiki {
    /// Link pages are served this many titles at a time
    page_size: usize,
}

fn page_id(title: &str) -> Option<i64> {
    if title == "Dog" {
        return Some(1);
    }
    title
        .strip_prefix("Link ")
        .and_then(|n| n.parse::<i64>().ok())
        .filter(|n| (1..=12).contains(n))
        .map(|n| 100 + n)
}

fn dog_links() -> Vec<String> {
    (1..=12).map(|n| format!("Link {}", n)).collect()
}

impl FakeWiki {
    fn title_info(titles: &str) -> Value {
        let pages: Vec<Value> = titles
            .split('|')
            .map(|title| match page_id(title) {
                Some(id) => json!({"pageid": id, "ns": 0, "title": title}),
                None => json!({"ns": 0, "title": title, "missing": true}),
            })
            .collect();
        json!({"batchcomplete": true, "query": {"pages": pages}})
    }

    fn links(&self, title: &str, offset: usize) -> Value {
        let all = if title == "Dog" { dog_links() } else { Vec::new() };
        let end = (offset + self.page_size).min(all.len());
        let links: Vec<Value> = all[offset.min(end)..end]
            .iter()
            .map(|t| json!({"ns": 0, "title": t}))
            .collect();

        let mut body = json!({
            "query": {"pages": [{
                "pageid": page_id(title), "ns": 0, "title": title, "links": links
            }]}
        });
        if end < all.len() {
            body["continue"] = json!({"plcontinue": end.to_string(), "continue": "||"});
        }
        body
    }
}

impl Respond for FakeWiki {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let param = |name: &str| {
            request
                .url
                .query_pairs()
                .find(|(key, _)| key == name)
                .map(|(_, value)| value.into_owned())
        };

        if param("list").as_deref() == Some("backlinks") {
            return ResponseTemplate::new(200).set_body_json(json!({"query": {"backlinks": []}}));
        }

        let body = match param("prop").as_deref() {
            Some("info") => Self::title_info(&param("titles").unwrap_or_default()),
            Some("links") => {
                let offset = param("plcontinue")
                    .and_then(|c| c.parse().ok())
                    .unwrap_or(0);
                self.links(&param("titles").unwrap_or_default(), offset)
            }
            _ => json!({"error": {"code": "badparams", "info": "unsupported request"}}),
        };
        ResponseTemplate::new(200).set_body_json(body)
    }
}

struct Harness {
    _server: MockServer,
    storage: SharedStorage,
    scheduler: Arc<Scheduler>,
    admin: AdminControl,
}

async fn harness(page_size: usize) -> Harness {
    let server = MockServer::start().await;
    Mock::given(wiremock::matchers::method("GET"))
        .respond_with(FakeWiki { page_size })
        .mount(&server)
        .await;

    let mut config = Config::default();
    config.wiki.api_base = format!("{}/w/api.php", server.uri());
    config.wiki.backoff_initial_ms = 1;
    config.wiki.backoff_max_ms = 5;
    config.crawler.poll_seconds = 0.01;

    let storage = shared(SqliteStorage::new_in_memory().unwrap());
    let source = Arc::new(WikiClient::new(&config.wiki).unwrap());
    let scheduler = Arc::new(Scheduler::new(
        storage.clone(),
        source.clone(),
        config.crawler.clone(),
    ));
    let admin = AdminControl::new(storage.clone(), scheduler.clone(), source, &config);

    Harness {
        _server: server,
        storage,
        scheduler,
        admin,
    }
}

fn dog_request() -> CrawlRequest {
    CrawlRequest {
        priority: 5,
        link_direction: LinkDirection::Outbound,
        auto_crawl_neighbors: true,
        max_depth: Some(1),
        link_cap: Some(10),
        ..CrawlRequest::new("Dog")
    }
}

#[tokio::test]
async fn test_dog_crawl_cascades_one_level() {
    let h = harness(500).await;
    let enqueued = h.admin.enqueue(dog_request()).await.unwrap();
    assert_eq!(enqueued.page.page_id, 1);

    let settled = h.scheduler.run_until_idle("test").await.unwrap();
    assert_eq!(settled, 11);

    let store = lock(&h.storage).unwrap();
    assert_eq!(store.job_status(1).unwrap(), Some(JobStatus::Done));
    assert_eq!(store.count_pages().unwrap(), 11);
    assert_eq!(store.count_links().unwrap(), 10);

    let edges = store.get_outgoing_links(1).unwrap();
    let targets: Vec<i64> = edges.iter().map(|l| l.to_page_id).collect();
    assert_eq!(targets, (101..=110).collect::<Vec<_>>());

    for id in 101..=110 {
        let job = store.get_job(id).unwrap().unwrap();
        assert_eq!(job.depth, 1);
        assert_eq!(job.root_page_id, Some(1));
        assert_eq!(job.priority, 5);
        assert_eq!(job.status, JobStatus::Done);
    }
    assert!(store.get_job(111).unwrap().is_none());

    let dog = store.get_page(1).unwrap().unwrap();
    assert_eq!(dog.out_degree, 10);
}

#[tokio::test]
async fn test_paginated_crawl_follows_continuation() {
    let h = harness(5).await;
    let request = CrawlRequest {
        link_cap: Some(0),
        ..CrawlRequest::new("Dog")
    };
    h.admin.enqueue(request).await.unwrap();

    assert_eq!(h.scheduler.run_until_idle("test").await.unwrap(), 1);

    let store = lock(&h.storage).unwrap();
    assert_eq!(store.count_links().unwrap(), 12);
    let job = store.get_job(1).unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Done);
    assert!(job.cursor.is_none());
    assert_eq!(store.get_page(1).unwrap().unwrap().out_degree, 12);

    // Without cascade every neighbor is only recorded as discovered
    assert_eq!(store.job_status(105).unwrap(), Some(JobStatus::Discovered));
}

#[tokio::test]
async fn test_enqueue_while_running_is_rejected() {
    let h = harness(500).await;
    h.admin.enqueue(dog_request()).await.unwrap();
    lock(&h.storage).unwrap().claim_next("worker-a").unwrap().unwrap();

    let err = h.admin.enqueue(dog_request()).await.unwrap_err();
    assert!(matches!(err, CrawlError::AlreadyActive(1)));

    let listing = h.admin.list_jobs(None, None).unwrap();
    assert_eq!(listing.jobs.len(), 1);
    assert_eq!(listing.counts[&JobStatus::Running], 1);
}

#[tokio::test]
async fn test_worker_pool_drains_queue() {
    let h = harness(3).await;
    h.admin.enqueue(dog_request()).await.unwrap();

    h.scheduler.start();
    h.scheduler.wait_idle().await.unwrap();
    h.scheduler.shutdown().await;

    let status = h.admin.crawler_status().unwrap();
    assert!(!status.running);
    assert_eq!(status.counts[&JobStatus::Done], 11);
    assert_eq!(lock(&h.storage).unwrap().count_links().unwrap(), 10);
}

#[tokio::test]
async fn test_estimate_against_mock_api() {
    let h = harness(500).await;
    let estimate = h.admin.estimate("Dog").await.unwrap();

    assert_eq!(estimate.root.page_id, 1);
    assert_eq!(estimate.outbound.count, 12);
    assert!(!estimate.outbound.truncated);
    assert_eq!(estimate.degrees[0].pages, 12);
}

#[test]
fn test_single_job_is_claimed_once_across_connections() {
    const CLAIMERS: usize = 8;

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("claim.db");
    {
        let mut store = SqliteStorage::new(&path).unwrap();
        store.merge_page(&ResolvedPage::new(1, "Dog", 0)).unwrap();
        store
            .enqueue(&EnqueueJob::root(1, 0, CrawlPlan::default()))
            .unwrap();
    }

    let barrier = Arc::new(std::sync::Barrier::new(CLAIMERS));
    let handles: Vec<_> = (0..CLAIMERS)
        .map(|i| {
            let path = path.clone();
            let barrier = barrier.clone();
            std::thread::spawn(move || {
                let mut store = SqliteStorage::new(&path).unwrap();
                barrier.wait();
                store.claim_next(&format!("worker-{}", i)).unwrap()
            })
        })
        .collect();

    let claims: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let winners: Vec<_> = claims.iter().flatten().collect();
    assert_eq!(winners.len(), 1);
    assert_eq!(winners[0].page_id, 1);
    assert_eq!(winners[0].status, JobStatus::Running);

    let store = SqliteStorage::new(&path).unwrap();
    assert_eq!(store.job_status(1).unwrap(), Some(JobStatus::Running));
}
