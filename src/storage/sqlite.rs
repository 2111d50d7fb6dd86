//! SQLite storage implementation
//!
//! This module provides a SQLite-based implementation of the Storage trait.
//! Writers take `BEGIN IMMEDIATE` transactions, so concurrent connections to
//! the same file serialize on the write lock instead of failing mid-update.

use crate::state::{JobStatus, LinkDirection};
use crate::storage::schema::initialize_schema;
use crate::storage::traits::{Storage, StorageError, StorageResult};
use crate::storage::{
    truncate_message, CrawlPlan, Discoveries, DiscoveryOutcome, DiscoveryReport, EgoGraph, EgoNode,
    EnqueueJob, JobId, JobListing, JobRecord, LinkRecord, PageRecord, ResumeCursor,
};
use crate::wiki::{NamespaceSet, ResolvedPage};
use chrono::{SecondsFormat, TimeZone, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row, ToSql, TransactionBehavior};
use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

/// Longest error message kept on a job row
const MAX_ERROR_CHARS: usize = 5000;

/// Longest error message shown in job listings
const LISTING_ERROR_CHARS: usize = 300;

/// How long a writer waits for another connection's lock
const BUSY_TIMEOUT: Duration = Duration::from_secs(10);

const CANCELLED_MESSAGE: &str = "Cancelled by user";
const KILLED_MESSAGE: &str = "Stopped by kill-all";

const JOB_COLUMNS: &str = "page_id, status, priority, depth, root_page_id, link_direction, \
     auto_crawl, max_depth, link_cap, namespaces, started_at, finished_at, last_error, \
     last_cursor, requested_by, updated_at";

const PAGE_COLUMNS: &str = "page_id, title, namespace, is_redirect, redirect_target_id, \
     out_degree, in_degree, created_at, updated_at";

static LAST_TIMESTAMP_MICROS: AtomicI64 = AtomicI64::new(0);

/// Returns the current UTC time as a fixed-width RFC 3339 string
///
/// Successive calls within the process never return the same value, so
/// `updated_at` gives a strict FIFO order among equal-priority jobs.
pub fn now_timestamp() -> String {
    let now = Utc::now().timestamp_micros();
    let mut last = LAST_TIMESTAMP_MICROS.load(Ordering::Relaxed);
    let issued = loop {
        let next = now.max(last + 1);
        match LAST_TIMESTAMP_MICROS.compare_exchange_weak(
            last,
            next,
            Ordering::AcqRel,
            Ordering::Relaxed,
        ) {
            Ok(_) => break next,
            Err(actual) => last = actual,
        }
    };
    format_micros(issued)
}

fn format_micros(micros: i64) -> String {
    let secs = micros.div_euclid(1_000_000);
    let nanos = (micros.rem_euclid(1_000_000) * 1_000) as u32;
    Utc.timestamp_opt(secs, nanos)
        .single()
        .unwrap_or_else(Utc::now)
        .to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// SQLite storage backend
pub struct SqliteStorage {
    conn: Connection,
}

impl SqliteStorage {
    /// Creates a new SqliteStorage instance
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite database file
    ///
    /// # Returns
    ///
    /// * `Ok(SqliteStorage)` - Successfully opened/created database
    /// * `Err(StorageError)` - Failed to open database
    pub fn new(path: &Path) -> StorageResult<Self> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            PRAGMA temp_store = MEMORY;
        ",
        )?;

        initialize_schema(&conn)?;

        Ok(Self { conn })
    }

    /// Creates an in-memory database
    pub fn new_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        initialize_schema(&conn)?;
        Ok(Self { conn })
    }

    /// Opens a database from a configured URL
    ///
    /// Accepts a plain path, a `sqlite://` URL, or `:memory:`.
    pub fn open(url: &str) -> StorageResult<Self> {
        let path = url.strip_prefix("sqlite://").unwrap_or(url);
        if path == ":memory:" {
            Self::new_in_memory()
        } else {
            Self::new(Path::new(path))
        }
    }

    fn immediate(&mut self) -> StorageResult<rusqlite::Transaction<'_>> {
        Ok(self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?)
    }
}

fn page_from_row(row: &Row<'_>) -> rusqlite::Result<PageRecord> {
    Ok(PageRecord {
        page_id: row.get(0)?,
        title: row.get(1)?,
        namespace: row.get(2)?,
        is_redirect: row.get(3)?,
        redirect_target_id: row.get(4)?,
        out_degree: row.get::<_, i64>(5)? as u64,
        in_degree: row.get::<_, i64>(6)? as u64,
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
    })
}

fn job_from_row(row: &Row<'_>) -> rusqlite::Result<JobRecord> {
    let status: String = row.get(1)?;
    let direction: String = row.get(5)?;
    let namespaces: String = row.get(9)?;
    let cursor: Option<String> = row.get(13)?;

    Ok(JobRecord {
        page_id: row.get(0)?,
        status: JobStatus::from_db_string(&status).unwrap_or(JobStatus::Error),
        priority: row.get(2)?,
        depth: row.get(3)?,
        root_page_id: row.get(4)?,
        plan: CrawlPlan {
            direction: LinkDirection::from_db_string(&direction).unwrap_or_default(),
            auto_crawl: row.get(6)?,
            max_depth: row.get(7)?,
            link_cap: row.get(8)?,
            namespaces: NamespaceSet::parse(&namespaces).unwrap_or_default(),
        },
        started_at: row.get(10)?,
        finished_at: row.get(11)?,
        last_error: row.get(12)?,
        // A cursor that no longer parses restarts the page from the beginning
        cursor: cursor.and_then(|c| serde_json::from_str(&c).ok()),
        requested_by: row.get(14)?,
        updated_at: row.get(15)?,
    })
}

fn page_exists(conn: &Connection, page_id: i64) -> StorageResult<bool> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM pages WHERE page_id = ?1",
            params![page_id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

fn upsert_page(conn: &Connection, page: &ResolvedPage, now: &str) -> StorageResult<()> {
    conn.execute(
        "INSERT INTO pages (page_id, title, namespace, is_redirect, redirect_target_id, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
         ON CONFLICT(page_id) DO UPDATE SET
            title = excluded.title,
            namespace = excluded.namespace,
            is_redirect = excluded.is_redirect,
            redirect_target_id = COALESCE(excluded.redirect_target_id, pages.redirect_target_id),
            updated_at = excluded.updated_at",
        params![
            page.page_id,
            page.title,
            page.namespace,
            page.is_redirect,
            page.redirect_target_id,
            now
        ],
    )?;
    Ok(())
}

fn insert_edge(conn: &Connection, from: i64, to: i64, now: &str) -> StorageResult<bool> {
    let changed = conn.execute(
        "INSERT OR IGNORE INTO links (from_page_id, to_page_id, created_at) VALUES (?1, ?2, ?3)",
        params![from, to, now],
    )?;
    Ok(changed == 1)
}

fn recompute(conn: &Connection, page_id: i64) -> StorageResult<(u64, u64)> {
    let changed = conn.execute(
        "UPDATE pages SET
            out_degree = (SELECT COUNT(*) FROM links WHERE from_page_id = ?1),
            in_degree = (SELECT COUNT(*) FROM links WHERE to_page_id = ?1)
         WHERE page_id = ?1",
        params![page_id],
    )?;
    if changed == 0 {
        return Err(StorageError::PageNotFound(page_id));
    }

    let (out_degree, in_degree): (i64, i64) = conn.query_row(
        "SELECT out_degree, in_degree FROM pages WHERE page_id = ?1",
        params![page_id],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?;
    Ok((out_degree as u64, in_degree as u64))
}

fn current_status(conn: &Connection, job_id: JobId) -> StorageResult<Option<JobStatus>> {
    let status: Option<String> = conn
        .query_row(
            "SELECT status FROM page_fetch WHERE page_id = ?1",
            params![job_id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(status.and_then(|s| JobStatus::from_db_string(&s)))
}

/// Moves a job to `to` if the status machine allows it
///
/// # Returns
///
/// The status the job left
fn transition_job(conn: &Connection, job_id: JobId, to: JobStatus, now: &str) -> StorageResult<JobStatus> {
    let from = current_status(conn, job_id)?.ok_or(StorageError::JobNotFound(job_id))?;
    from.transition(to)?;
    conn.execute(
        "UPDATE page_fetch SET status = ?1, updated_at = ?2 WHERE page_id = ?3",
        params![to.to_db_string(), now, job_id],
    )?;
    Ok(from)
}

fn insert_job(conn: &Connection, job: &EnqueueJob, status: JobStatus, now: &str) -> StorageResult<()> {
    conn.execute(
        "INSERT INTO page_fetch (page_id, status, priority, depth, root_page_id, link_direction,
                                 auto_crawl, max_depth, link_cap, namespaces, requested_by, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        params![
            job.page_id,
            status.to_db_string(),
            job.priority,
            job.depth,
            job.root_page_id,
            job.plan.direction.to_db_string(),
            job.plan.auto_crawl,
            job.plan.max_depth,
            job.plan.link_cap,
            job.plan.namespaces.to_db_string(),
            job.requested_by,
            now
        ],
    )?;
    Ok(())
}

/// Records one neighbor, queueing it or marking it discovered
fn discover_one(
    conn: &Connection,
    job: &EnqueueJob,
    enqueue: bool,
    now: &str,
) -> StorageResult<DiscoveryOutcome> {
    let existing: Option<(String, u32, Option<i64>)> = conn
        .query_row(
            "SELECT status, depth, root_page_id FROM page_fetch WHERE page_id = ?1",
            params![job.page_id],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )
        .optional()?;

    let Some((status, depth, root)) = existing else {
        if !page_exists(conn, job.page_id)? {
            return Err(StorageError::PageNotFound(job.page_id));
        }
        return if enqueue {
            insert_job(conn, job, JobStatus::Queued, now)?;
            Ok(DiscoveryOutcome::Enqueued)
        } else {
            insert_job(conn, job, JobStatus::Discovered, now)?;
            Ok(DiscoveryOutcome::Discovered)
        };
    };

    if JobStatus::from_db_string(&status) != Some(JobStatus::Discovered) {
        return Ok(DiscoveryOutcome::AlreadyManaged);
    }

    // The shallowest sighting wins, together with the root it came from
    let (depth, root) = if job.depth < depth {
        (job.depth, Some(job.root_page_id))
    } else {
        (depth, root)
    };

    if !enqueue {
        conn.execute(
            "UPDATE page_fetch SET depth = ?1, root_page_id = ?2 WHERE page_id = ?3",
            params![depth, root, job.page_id],
        )?;
        return Ok(DiscoveryOutcome::AlreadyDiscovered);
    }

    transition_job(conn, job.page_id, JobStatus::Queued, now)?;
    conn.execute(
        "UPDATE page_fetch SET
            priority = MAX(priority, ?1), depth = ?2, root_page_id = ?3, link_direction = ?4,
            auto_crawl = ?5, max_depth = ?6, link_cap = ?7, namespaces = ?8, last_cursor = NULL
         WHERE page_id = ?9",
        params![
            job.priority,
            depth,
            root,
            job.plan.direction.to_db_string(),
            job.plan.auto_crawl,
            job.plan.max_depth,
            job.plan.link_cap,
            job.plan.namespaces.to_db_string(),
            job.page_id
        ],
    )?;
    Ok(DiscoveryOutcome::Promoted)
}

fn ego_node(page: PageRecord, center: i64) -> EgoNode {
    EgoNode {
        is_center: page.page_id == center,
        page_id: page.page_id,
        title: page.title,
        out_degree: page.out_degree,
        in_degree: page.in_degree,
    }
}

/// Loads the pages selected by `node_sql` and every edge among them
///
/// `node_sql` must select a single column of page ids. Pages come back in
/// id order.
fn induced_subgraph(
    conn: &Connection,
    node_sql: &str,
    args: &[&dyn ToSql],
) -> StorageResult<(Vec<PageRecord>, Vec<LinkRecord>)> {
    let mut stmt = conn.prepare(&format!(
        "WITH nodes(page_id) AS ({})
         SELECT {} FROM pages
         WHERE page_id IN (SELECT page_id FROM nodes)
         ORDER BY page_id",
        node_sql, PAGE_COLUMNS
    ))?;
    let pages = stmt
        .query_map(args, page_from_row)?
        .collect::<Result<Vec<_>, _>>()?;

    let mut stmt = conn.prepare(&format!(
        "WITH nodes(page_id) AS ({})
         SELECT from_page_id, to_page_id FROM links
         WHERE from_page_id IN (SELECT page_id FROM nodes)
           AND to_page_id IN (SELECT page_id FROM nodes)
         ORDER BY from_page_id, to_page_id",
        node_sql
    ))?;
    let edges = stmt
        .query_map(args, |row| {
            Ok(LinkRecord {
                from_page_id: row.get(0)?,
                to_page_id: row.get(1)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok((pages, edges))
}

impl Storage for SqliteStorage {
    // ===== Graph Merge =====

    fn merge_page(&mut self, page: &ResolvedPage) -> StorageResult<()> {
        upsert_page(&self.conn, page, &now_timestamp())
    }

    fn merge_links(&mut self, from_page_id: i64, to_page_ids: &[i64]) -> StorageResult<usize> {
        let now = now_timestamp();
        let tx = self.immediate()?;

        let mut inserted = 0;
        let mut touched = BTreeSet::from([from_page_id]);
        for &to in to_page_ids {
            if insert_edge(&tx, from_page_id, to, &now)? {
                inserted += 1;
            }
            touched.insert(to);
        }
        for page_id in touched {
            recompute(&tx, page_id)?;
        }

        tx.commit()?;
        Ok(inserted)
    }

    fn merge_batch(
        &mut self,
        crawled_page_id: i64,
        direction: LinkDirection,
        targets: &[ResolvedPage],
    ) -> StorageResult<usize> {
        let now = now_timestamp();
        let tx = self.immediate()?;

        let mut inserted = 0;
        let mut touched = BTreeSet::from([crawled_page_id]);
        for target in targets {
            upsert_page(&tx, target, &now)?;
            let (from, to) = direction.edge(crawled_page_id, target.page_id);
            if insert_edge(&tx, from, to, &now)? {
                inserted += 1;
            }
            touched.insert(target.page_id);
        }
        for page_id in touched {
            recompute(&tx, page_id)?;
        }

        tx.commit()?;
        Ok(inserted)
    }

    fn recompute_degree(&mut self, page_id: i64) -> StorageResult<(u64, u64)> {
        recompute(&self.conn, page_id)
    }

    // ===== Graph Queries =====

    fn get_page(&self, page_id: i64) -> StorageResult<Option<PageRecord>> {
        let page = self
            .conn
            .query_row(
                &format!("SELECT {} FROM pages WHERE page_id = ?1", PAGE_COLUMNS),
                params![page_id],
                page_from_row,
            )
            .optional()?;
        Ok(page)
    }

    fn get_outgoing_links(&self, page_id: i64) -> StorageResult<Vec<LinkRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT from_page_id, to_page_id FROM links WHERE from_page_id = ?1 ORDER BY to_page_id",
        )?;
        let links = stmt
            .query_map(params![page_id], |row| {
                Ok(LinkRecord {
                    from_page_id: row.get(0)?,
                    to_page_id: row.get(1)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(links)
    }

    fn count_pages(&self) -> StorageResult<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM pages", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    fn count_links(&self) -> StorageResult<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM links", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    fn ego_graph(&self, page_id: i64, limit_neighbors: usize) -> StorageResult<Option<EgoGraph>> {
        if self.get_page(page_id)?.is_none() {
            return Ok(None);
        }
        let limit = limit_neighbors.min(i64::MAX as usize) as i64;

        let (pages, edges) = induced_subgraph(
            &self.conn,
            "SELECT ?1
             UNION SELECT to_page_id FROM (
                 SELECT to_page_id FROM links WHERE from_page_id = ?1 ORDER BY to_page_id LIMIT ?2)
             UNION SELECT from_page_id FROM (
                 SELECT from_page_id FROM links WHERE to_page_id = ?1 ORDER BY from_page_id LIMIT ?2)",
            params![page_id, limit],
        )?;

        Ok(Some(EgoGraph {
            center_page_id: page_id,
            nodes: pages.into_iter().map(|p| ego_node(p, page_id)).collect(),
            edges,
        }))
    }

    fn top_graph(&self, limit: usize) -> StorageResult<EgoGraph> {
        let limit = limit.min(i64::MAX as usize) as i64;

        let (mut pages, edges) = induced_subgraph(
            &self.conn,
            "SELECT page_id FROM pages
             WHERE out_degree > 0 OR in_degree > 0
             ORDER BY out_degree + in_degree DESC, page_id
             LIMIT ?1",
            params![limit],
        )?;
        pages.sort_by_key(|p| (std::cmp::Reverse(p.out_degree + p.in_degree), p.page_id));

        let center = pages.first().map(|p| p.page_id).unwrap_or(0);
        Ok(EgoGraph {
            center_page_id: center,
            nodes: pages.into_iter().map(|p| ego_node(p, center)).collect(),
            edges,
        })
    }

    // ===== Job Store =====

    fn enqueue(&mut self, job: &EnqueueJob) -> StorageResult<JobId> {
        let now = now_timestamp();
        let tx = self.immediate()?;

        let existing: Option<(String, String)> = tx
            .query_row(
                "SELECT status, link_direction FROM page_fetch WHERE page_id = ?1",
                params![job.page_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        match existing {
            None => {
                if !page_exists(&tx, job.page_id)? {
                    return Err(StorageError::PageNotFound(job.page_id));
                }
                insert_job(&tx, job, JobStatus::Queued, &now)?;
            }
            Some((status, direction)) => {
                let status = JobStatus::from_db_string(&status).unwrap_or(JobStatus::Error);
                if status == JobStatus::Running {
                    return Err(StorageError::AlreadyActive(job.page_id));
                }
                if status != JobStatus::Queued {
                    status.transition(JobStatus::Queued)?;
                }

                // Interrupted work resumes; finished or never-started pages start over
                let keep_cursor = matches!(
                    status,
                    JobStatus::Queued | JobStatus::Error | JobStatus::Paused
                ) && direction == job.plan.direction.to_db_string();

                tx.execute(
                    "UPDATE page_fetch SET
                        status = 'queued', priority = MAX(priority, ?2), depth = ?3,
                        root_page_id = ?4, link_direction = ?5, auto_crawl = ?6, max_depth = ?7,
                        link_cap = ?8, namespaces = ?9, requested_by = COALESCE(?10, requested_by),
                        started_at = NULL, finished_at = NULL, last_error = NULL,
                        last_cursor = CASE WHEN ?11 THEN last_cursor ELSE NULL END,
                        updated_at = ?12
                     WHERE page_id = ?1",
                    params![
                        job.page_id,
                        job.priority,
                        job.depth,
                        job.root_page_id,
                        job.plan.direction.to_db_string(),
                        job.plan.auto_crawl,
                        job.plan.max_depth,
                        job.plan.link_cap,
                        job.plan.namespaces.to_db_string(),
                        job.requested_by,
                        keep_cursor,
                        now
                    ],
                )?;
            }
        }

        tx.commit()?;
        Ok(job.page_id)
    }

    fn claim_next(&mut self, worker_id: &str) -> StorageResult<Option<JobRecord>> {
        let now = now_timestamp();
        let tx = self.immediate()?;

        // The status guard on the outer UPDATE keeps the claim exclusive even if
        // another connection flipped the row between subquery and update.
        let job = tx
            .query_row(
                &format!(
                    "UPDATE page_fetch
                     SET status = 'running', started_at = ?1, finished_at = NULL,
                         last_error = NULL, updated_at = ?1
                     WHERE page_id = (
                         SELECT page_id FROM page_fetch
                         WHERE status = 'queued'
                         ORDER BY priority DESC, updated_at ASC
                         LIMIT 1
                     ) AND status = 'queued'
                     RETURNING {}",
                    JOB_COLUMNS
                ),
                params![now],
                job_from_row,
            )
            .optional()?;

        tx.commit()?;

        if let Some(job) = &job {
            tracing::debug!(worker = worker_id, page_id = job.page_id, "Claimed job");
        }
        Ok(job)
    }

    fn complete(&mut self, job_id: JobId, discoveries: &Discoveries) -> StorageResult<DiscoveryReport> {
        let now = now_timestamp();
        let tx = self.immediate()?;
        transition_job(&tx, job_id, JobStatus::Done, &now)?;
        tx.execute(
            "UPDATE page_fetch SET finished_at = ?1, last_error = NULL, last_cursor = NULL
             WHERE page_id = ?2",
            params![now, job_id],
        )?;

        let mut report = DiscoveryReport::default();
        for &page_id in &discoveries.page_ids {
            let job = EnqueueJob {
                page_id,
                ..discoveries.template.clone()
            };
            report.record(discover_one(&tx, &job, discoveries.enqueue, &now_timestamp())?);
        }

        tx.commit()?;
        Ok(report)
    }

    fn fail(&mut self, job_id: JobId, message: &str) -> StorageResult<()> {
        let now = now_timestamp();
        let tx = self.immediate()?;
        transition_job(&tx, job_id, JobStatus::Error, &now)?;
        tx.execute(
            "UPDATE page_fetch SET finished_at = ?1, last_error = ?2 WHERE page_id = ?3",
            params![now, truncate_message(message, MAX_ERROR_CHARS), job_id],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn requeue(&mut self, job_id: JobId) -> StorageResult<()> {
        let now = now_timestamp();
        let tx = self.immediate()?;
        transition_job(&tx, job_id, JobStatus::Queued, &now)?;
        tx.execute(
            "UPDATE page_fetch SET started_at = NULL, finished_at = NULL, last_error = NULL
             WHERE page_id = ?1",
            params![job_id],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn pause(&mut self, job_id: JobId) -> StorageResult<()> {
        let now = now_timestamp();
        let tx = self.immediate()?;
        transition_job(&tx, job_id, JobStatus::Paused, &now)?;
        tx.commit()?;
        Ok(())
    }

    fn save_cursor(&mut self, job_id: JobId, cursor: &ResumeCursor) -> StorageResult<()> {
        let json = serde_json::to_string(cursor)?;
        let changed = self.conn.execute(
            "UPDATE page_fetch SET last_cursor = ?1 WHERE page_id = ?2",
            params![json, job_id],
        )?;
        if changed == 0 {
            return Err(StorageError::JobNotFound(job_id));
        }
        Ok(())
    }

    fn get_job(&self, job_id: JobId) -> StorageResult<Option<JobRecord>> {
        let job = self
            .conn
            .query_row(
                &format!("SELECT {} FROM page_fetch WHERE page_id = ?1", JOB_COLUMNS),
                params![job_id],
                job_from_row,
            )
            .optional()?;
        Ok(job)
    }

    fn job_status(&self, job_id: JobId) -> StorageResult<Option<JobStatus>> {
        current_status(&self.conn, job_id)
    }

    fn list_jobs(&self, limit: usize, offset: usize) -> StorageResult<Vec<JobListing>> {
        let mut stmt = self.conn.prepare(
            "SELECT f.page_id, p.title, f.status, f.priority, f.depth, f.root_page_id,
                    f.link_direction, f.started_at, f.finished_at, f.last_error,
                    COALESCE(p.out_degree, 0), COALESCE(p.in_degree, 0), f.updated_at
             FROM page_fetch f
             LEFT JOIN pages p ON p.page_id = f.page_id
             ORDER BY CASE f.status
                        WHEN 'running' THEN 0
                        WHEN 'queued' THEN 1
                        WHEN 'error' THEN 2
                        ELSE 3
                      END,
                      f.priority DESC,
                      f.updated_at DESC
             LIMIT ?1 OFFSET ?2",
        )?;

        let jobs = stmt
            .query_map(params![limit as i64, offset as i64], |row| {
                let status: String = row.get(2)?;
                let direction: String = row.get(6)?;
                let last_error: Option<String> = row.get(9)?;
                Ok(JobListing {
                    page_id: row.get(0)?,
                    title: row.get(1)?,
                    status: JobStatus::from_db_string(&status).unwrap_or(JobStatus::Error),
                    priority: row.get(3)?,
                    depth: row.get(4)?,
                    root_page_id: row.get(5)?,
                    link_direction: LinkDirection::from_db_string(&direction).unwrap_or_default(),
                    started_at: row.get(7)?,
                    finished_at: row.get(8)?,
                    last_error: last_error.map(|e| truncate_message(&e, LISTING_ERROR_CHARS)),
                    out_degree: row.get::<_, i64>(10)? as u64,
                    in_degree: row.get::<_, i64>(11)? as u64,
                    updated_at: row.get(12)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(jobs)
    }

    fn count_jobs_by_status(&self) -> StorageResult<HashMap<JobStatus, u64>> {
        let mut stmt = self
            .conn
            .prepare("SELECT status, COUNT(*) FROM page_fetch GROUP BY status")?;

        let mut counts = HashMap::new();
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;
        for row in rows {
            let (status, count) = row?;
            if let Some(status) = JobStatus::from_db_string(&status) {
                counts.insert(status, count as u64);
            }
        }
        Ok(counts)
    }

    fn depth_breakdown(&self) -> StorageResult<HashMap<u32, u64>> {
        let mut stmt = self
            .conn
            .prepare("SELECT depth, COUNT(*) FROM page_fetch GROUP BY depth")?;

        let mut breakdown = HashMap::new();
        let rows = stmt.query_map([], |row| Ok((row.get::<_, u32>(0)?, row.get::<_, i64>(1)?)))?;
        for row in rows {
            let (depth, count) = row?;
            breakdown.insert(depth, count as u64);
        }
        Ok(breakdown)
    }

    fn reap_stale_jobs(&mut self, max_age: chrono::Duration) -> StorageResult<usize> {
        let now = now_timestamp();
        let cutoff = format_micros((Utc::now() - max_age).timestamp_micros());
        let message = format!(
            "Job stuck in running state for more than {} minutes",
            max_age.num_minutes()
        );

        let reaped = self.conn.execute(
            "UPDATE page_fetch
             SET status = 'error', last_error = ?1, finished_at = ?2, updated_at = ?2
             WHERE status = 'running' AND started_at < ?3",
            params![message, now, cutoff],
        )?;
        Ok(reaped)
    }

    // ===== Administration =====

    fn cancel_job(&mut self, job_id: JobId) -> StorageResult<JobStatus> {
        let now = now_timestamp();
        let tx = self.immediate()?;
        let previous = transition_job(&tx, job_id, JobStatus::Paused, &now)?;
        tx.execute(
            "UPDATE page_fetch SET last_error = ?1 WHERE page_id = ?2",
            params![CANCELLED_MESSAGE, job_id],
        )?;
        tx.commit()?;
        Ok(previous)
    }

    fn pause_all_active(&mut self) -> StorageResult<usize> {
        let paused = self.conn.execute(
            "UPDATE page_fetch SET status = 'paused', last_error = ?1, updated_at = ?2
             WHERE status IN ('running', 'queued')",
            params![KILLED_MESSAGE, now_timestamp()],
        )?;
        Ok(paused)
    }

    fn purge_all(&mut self) -> StorageResult<()> {
        let tx = self.immediate()?;
        tx.execute_batch(
            "
            DELETE FROM page_fetch;
            DELETE FROM links;
            DELETE FROM pages;
        ",
        )?;
        tx.commit()?;
        Ok(())
    }
}
