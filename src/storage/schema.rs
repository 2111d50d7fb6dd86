//! Database schema definitions
//!
//! Three tables: `pages` and `links` hold the graph, `page_fetch` is the
//! job queue. Timestamps are fixed-width RFC 3339 UTC strings with
//! microseconds, so they order correctly as text.

/// SQL schema for the database
pub const SCHEMA_SQL: &str = r#"
-- Every crawled or referenced page
CREATE TABLE IF NOT EXISTS pages (
    page_id INTEGER PRIMARY KEY,
    title TEXT NOT NULL,
    namespace INTEGER NOT NULL DEFAULT 0,
    is_redirect INTEGER NOT NULL DEFAULT 0,
    redirect_target_id INTEGER,
    out_degree INTEGER NOT NULL DEFAULT 0,
    in_degree INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_pages_title ON pages(title);

-- Directed edges; the primary key makes the edge set a set
CREATE TABLE IF NOT EXISTS links (
    from_page_id INTEGER NOT NULL REFERENCES pages(page_id) ON DELETE CASCADE,
    to_page_id INTEGER NOT NULL REFERENCES pages(page_id) ON DELETE CASCADE,
    created_at TEXT NOT NULL,
    PRIMARY KEY (from_page_id, to_page_id)
) WITHOUT ROWID;

CREATE INDEX IF NOT EXISTS idx_links_to ON links(to_page_id);

-- One crawl job per page
CREATE TABLE IF NOT EXISTS page_fetch (
    page_id INTEGER PRIMARY KEY REFERENCES pages(page_id) ON DELETE CASCADE,
    status TEXT NOT NULL
        CHECK (status IN ('queued', 'running', 'done', 'error', 'paused', 'discovered')),
    priority INTEGER NOT NULL DEFAULT 0,
    depth INTEGER NOT NULL DEFAULT 0,
    root_page_id INTEGER,
    link_direction TEXT NOT NULL DEFAULT 'outbound'
        CHECK (link_direction IN ('outbound', 'inbound')),
    auto_crawl INTEGER NOT NULL DEFAULT 0,
    max_depth INTEGER NOT NULL DEFAULT 0,
    link_cap INTEGER NOT NULL DEFAULT 0,
    namespaces TEXT NOT NULL DEFAULT '0',
    started_at TEXT,
    finished_at TEXT,
    last_error TEXT,
    last_cursor TEXT,
    requested_by TEXT,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_page_fetch_claim ON page_fetch(status, priority DESC, updated_at);
"#;

/// Initializes the database schema
pub fn initialize_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}
