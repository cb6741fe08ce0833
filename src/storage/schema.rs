//! Database schema definitions
//!
//! All durable stores share one SQLite database: crawler registrations, running
//! records, crontab records, the URL dedup set, the per-crawler FIFO queues and
//! saved items.

/// SQL schema for the database
pub const SCHEMA_SQL: &str = r#"
-- Registered crawler configurations
CREATE TABLE IF NOT EXISTS crawlers (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    crawler_name TEXT NOT NULL UNIQUE,
    conf TEXT NOT NULL,
    weight INTEGER NOT NULL DEFAULT 1,
    status TEXT NOT NULL DEFAULT 'enabled',
    create_time INTEGER NOT NULL DEFAULT 0,
    modify_time INTEGER NOT NULL DEFAULT 0,
    author TEXT NOT NULL DEFAULT ''
);

CREATE INDEX IF NOT EXISTS idx_crawlers_status ON crawlers(status);

-- Tasks assigned to a worker; next_exec_time is the processing deadline
CREATE TABLE IF NOT EXISTS running (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    crawler_name TEXT NOT NULL,
    rule_name TEXT NOT NULL,
    url TEXT NOT NULL,
    is_seed INTEGER NOT NULL DEFAULT 0,
    last_access_time INTEGER NOT NULL DEFAULT 0,
    revisit_interval INTEGER NOT NULL DEFAULT 0,
    next_exec_time INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_running_next_exec ON running(next_exec_time);
CREATE INDEX IF NOT EXISTS idx_running_crawler ON running(crawler_name);

-- Standing revisit entries, one per crawler and URL
CREATE TABLE IF NOT EXISTS crontab (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    crawler_name TEXT NOT NULL,
    rule_name TEXT NOT NULL,
    url TEXT NOT NULL,
    is_seed INTEGER NOT NULL DEFAULT 1,
    last_access_time INTEGER NOT NULL DEFAULT 0,
    revisit_interval INTEGER NOT NULL DEFAULT 0,
    next_exec_time INTEGER NOT NULL DEFAULT 0,
    UNIQUE(crawler_name, url)
);

CREATE INDEX IF NOT EXISTS idx_crontab_next_exec ON crontab(next_exec_time);

-- URLs already seeded once
CREATE TABLE IF NOT EXISTS links (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    url TEXT NOT NULL UNIQUE,
    first_access_time INTEGER NOT NULL DEFAULT 0,
    last_access_time INTEGER NOT NULL DEFAULT 0,
    count INTEGER NOT NULL DEFAULT 1
);

CREATE INDEX IF NOT EXISTS idx_links_last_access ON links(last_access_time);

-- Per-crawler FIFO queues; id order is insertion order
CREATE TABLE IF NOT EXISTS queue (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    crawler_name TEXT NOT NULL,
    payload TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_queue_crawler ON queue(crawler_name, id);

-- Extracted items
CREATE TABLE IF NOT EXISTS items (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    crawler_name TEXT NOT NULL,
    url TEXT NOT NULL,
    payload TEXT NOT NULL,
    saved_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_items_crawler ON items(crawler_name);
"#;

/// Initializes the database schema
pub fn initialize_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}
