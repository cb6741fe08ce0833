//! SQLite storage implementation
//!
//! This module provides a SQLite-based implementation of the Storage trait.
//! A single connection is shared behind a mutex, so every trait method runs
//! atomically with respect to the others.

use crate::state::{CrawlerItem, CrawlerStatus, Item, LinkRecord, Task};
use crate::storage::schema::initialize_schema;
use crate::storage::traits::{Storage, StorageError, StorageResult};
use crate::storage::{ListFilter, TaskTable};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

const TASK_COLUMNS: &str = "id, crawler_name, rule_name, url, is_seed, last_access_time, \
                            revisit_interval, next_exec_time";

const CRAWLER_COLUMNS: &str =
    "id, crawler_name, conf, weight, status, create_time, modify_time, author";

/// SQLite storage backend
pub struct SqliteStorage {
    conn: Mutex<Connection>,
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

        // Configure SQLite for better performance
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            PRAGMA temp_store = MEMORY;
            PRAGMA mmap_size = 268435456;
        ",
        )?;

        initialize_schema(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Creates an in-memory database
    pub fn new_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn task_from_row(row: &Row<'_>) -> rusqlite::Result<Task> {
    Ok(Task {
        id: Some(row.get(0)?),
        crawler_name: row.get(1)?,
        rule_name: row.get(2)?,
        url: row.get(3)?,
        is_seed: row.get::<_, i64>(4)? != 0,
        last_access_time: row.get(5)?,
        revisit_interval: row.get(6)?,
        next_exec_time: row.get(7)?,
    })
}

/// Raw crawler row; the configuration is decoded outside the rusqlite closure
struct CrawlerRow {
    id: i64,
    crawler_name: String,
    conf: String,
    weight: i64,
    status: String,
    create_time: i64,
    modify_time: i64,
    author: String,
}

impl CrawlerRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            crawler_name: row.get(1)?,
            conf: row.get(2)?,
            weight: row.get(3)?,
            status: row.get(4)?,
            create_time: row.get(5)?,
            modify_time: row.get(6)?,
            author: row.get(7)?,
        })
    }

    fn into_item(self) -> StorageResult<CrawlerItem> {
        Ok(CrawlerItem {
            id: self.id,
            crawler_name: self.crawler_name,
            conf: serde_json::from_str(&self.conf)?,
            weight: self.weight,
            status: CrawlerStatus::from_db_string(&self.status)
                .unwrap_or(CrawlerStatus::Disabled),
            create_time: self.create_time,
            modify_time: self.modify_time,
            author: self.author,
        })
    }
}

fn link_from_row(row: &Row<'_>) -> rusqlite::Result<LinkRecord> {
    Ok(LinkRecord {
        url: row.get(0)?,
        first_access_time: row.get(1)?,
        last_access_time: row.get(2)?,
        count: row.get(3)?,
    })
}

fn to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

impl Storage for SqliteStorage {
    // ===== Crawler Registrations =====

    fn insert_crawler(&self, item: &CrawlerItem) -> StorageResult<i64> {
        let conn = self.conn();

        let existing: Option<i64> = conn
            .query_row(
                "SELECT id FROM crawlers WHERE crawler_name = ?1",
                params![item.crawler_name],
                |row| row.get(0),
            )
            .optional()?;
        if existing.is_some() {
            return Err(StorageError::Duplicate(item.crawler_name.clone()));
        }

        let conf = serde_json::to_string(&item.conf)?;
        conn.execute(
            "INSERT INTO crawlers (crawler_name, conf, weight, status, create_time, modify_time, author)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                item.crawler_name,
                conf,
                item.weight,
                item.status.to_db_string(),
                item.create_time,
                item.modify_time,
                item.author
            ],
        )?;

        Ok(conn.last_insert_rowid())
    }

    fn update_crawler(&self, item: &CrawlerItem) -> StorageResult<()> {
        let conf = serde_json::to_string(&item.conf)?;
        let updated = self.conn().execute(
            "UPDATE crawlers SET conf = ?1, weight = ?2, status = ?3, modify_time = ?4, author = ?5
             WHERE crawler_name = ?6",
            params![
                conf,
                item.weight,
                item.status.to_db_string(),
                item.modify_time,
                item.author,
                item.crawler_name
            ],
        )?;

        if updated == 0 {
            return Err(StorageError::NotFound(item.crawler_name.clone()));
        }
        Ok(())
    }

    fn get_crawler(&self, name: &str) -> StorageResult<Option<CrawlerItem>> {
        let row = self
            .conn()
            .query_row(
                &format!("SELECT {CRAWLER_COLUMNS} FROM crawlers WHERE crawler_name = ?1"),
                params![name],
                CrawlerRow::from_row,
            )
            .optional()?;

        row.map(CrawlerRow::into_item).transpose()
    }

    fn delete_crawler(&self, name: &str) -> StorageResult<bool> {
        let deleted = self
            .conn()
            .execute("DELETE FROM crawlers WHERE crawler_name = ?1", params![name])?;
        Ok(deleted > 0)
    }

    fn list_crawlers(&self, filter: &ListFilter) -> StorageResult<Vec<CrawlerItem>> {
        let rows = {
            let conn = self.conn();
            let mut stmt = conn.prepare(&format!(
                "SELECT {CRAWLER_COLUMNS} FROM crawlers
                 WHERE ?1 IS NULL OR substr(crawler_name, 1, length(?1)) = ?1
                 ORDER BY id LIMIT ?2 OFFSET ?3"
            ))?;
            let rows = stmt
                .query_map(
                    params![filter.prefix(), to_i64(filter.limit), to_i64(filter.offset)],
                    CrawlerRow::from_row,
                )?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        };

        rows.into_iter().map(CrawlerRow::into_item).collect()
    }

    fn count_crawlers(&self, prefix: Option<&str>) -> StorageResult<u64> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM crawlers
             WHERE ?1 IS NULL OR substr(crawler_name, 1, length(?1)) = ?1",
            params![prefix],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    fn enabled_crawlers(&self) -> StorageResult<Vec<CrawlerItem>> {
        let rows = {
            let conn = self.conn();
            let mut stmt = conn.prepare(&format!(
                "SELECT {CRAWLER_COLUMNS} FROM crawlers WHERE status = ?1 ORDER BY id"
            ))?;
            let rows = stmt
                .query_map(
                    params![CrawlerStatus::Enabled.to_db_string()],
                    CrawlerRow::from_row,
                )?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        };

        rows.into_iter().map(CrawlerRow::into_item).collect()
    }

    // ===== Running / Crontab Records =====

    fn insert_task(&self, table: TaskTable, task: &Task) -> StorageResult<i64> {
        let conn = self.conn();
        conn.execute(
            &format!(
                "INSERT INTO {} (crawler_name, rule_name, url, is_seed, last_access_time,
                 revisit_interval, next_exec_time) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                table.table_name()
            ),
            params![
                task.crawler_name,
                task.rule_name,
                task.url,
                task.is_seed,
                task.last_access_time,
                task.revisit_interval,
                task.next_exec_time
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn upsert_crontab(&self, task: &Task) -> StorageResult<i64> {
        let conn = self.conn();
        let id = conn.query_row(
            "INSERT INTO crontab (crawler_name, rule_name, url, is_seed, last_access_time,
             revisit_interval, next_exec_time) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(crawler_name, url) DO UPDATE SET
                rule_name = excluded.rule_name,
                is_seed = excluded.is_seed,
                last_access_time = excluded.last_access_time,
                revisit_interval = excluded.revisit_interval,
                next_exec_time = excluded.next_exec_time
             RETURNING id",
            params![
                task.crawler_name,
                task.rule_name,
                task.url,
                task.is_seed,
                task.last_access_time,
                task.revisit_interval,
                task.next_exec_time
            ],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    fn update_task(&self, table: TaskTable, task: &Task) -> StorageResult<()> {
        let id = task
            .id
            .ok_or_else(|| StorageError::NotFound(format!("{} task without id", table.table_name())))?;

        let updated = self.conn().execute(
            &format!(
                "UPDATE {} SET crawler_name = ?1, rule_name = ?2, url = ?3, is_seed = ?4,
                 last_access_time = ?5, revisit_interval = ?6, next_exec_time = ?7
                 WHERE id = ?8",
                table.table_name()
            ),
            params![
                task.crawler_name,
                task.rule_name,
                task.url,
                task.is_seed,
                task.last_access_time,
                task.revisit_interval,
                task.next_exec_time,
                id
            ],
        )?;

        if updated == 0 {
            return Err(StorageError::NotFound(format!(
                "{} task {}",
                table.table_name(),
                id
            )));
        }
        Ok(())
    }

    fn get_task(&self, table: TaskTable, id: i64) -> StorageResult<Option<Task>> {
        let task = self
            .conn()
            .query_row(
                &format!(
                    "SELECT {TASK_COLUMNS} FROM {} WHERE id = ?1",
                    table.table_name()
                ),
                params![id],
                task_from_row,
            )
            .optional()?;
        Ok(task)
    }

    fn delete_task(&self, table: TaskTable, id: i64) -> StorageResult<bool> {
        let deleted = self.conn().execute(
            &format!("DELETE FROM {} WHERE id = ?1", table.table_name()),
            params![id],
        )?;
        Ok(deleted > 0)
    }

    fn due_tasks(&self, table: TaskTable, now: i64) -> StorageResult<Vec<Task>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {TASK_COLUMNS} FROM {} WHERE next_exec_time <= ?1
             ORDER BY next_exec_time, id",
            table.table_name()
        ))?;
        let tasks = stmt
            .query_map(params![now], task_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(tasks)
    }

    fn list_tasks(&self, table: TaskTable, filter: &ListFilter) -> StorageResult<Vec<Task>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {TASK_COLUMNS} FROM {}
             WHERE ?1 IS NULL OR substr(crawler_name, 1, length(?1)) = ?1
             ORDER BY id LIMIT ?2 OFFSET ?3",
            table.table_name()
        ))?;
        let tasks = stmt
            .query_map(
                params![filter.prefix(), to_i64(filter.limit), to_i64(filter.offset)],
                task_from_row,
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(tasks)
    }

    fn count_tasks(&self, table: TaskTable, prefix: Option<&str>) -> StorageResult<u64> {
        let count: i64 = self.conn().query_row(
            &format!(
                "SELECT COUNT(*) FROM {}
                 WHERE ?1 IS NULL OR substr(crawler_name, 1, length(?1)) = ?1",
                table.table_name()
            ),
            params![prefix],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    // ===== URL Dedup =====

    fn has_link(&self, url: &str) -> StorageResult<bool> {
        let exists: bool = self.conn().query_row(
            "SELECT EXISTS(SELECT 1 FROM links WHERE url = ?1)",
            params![url],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    fn record_link(&self, url: &str, now: i64) -> StorageResult<()> {
        self.conn().execute(
            "INSERT INTO links (url, first_access_time, last_access_time, count)
             VALUES (?1, ?2, ?2, 1)
             ON CONFLICT(url) DO UPDATE SET
                last_access_time = excluded.last_access_time,
                count = count + 1",
            params![url, now],
        )?;
        Ok(())
    }

    fn get_link(&self, url: &str) -> StorageResult<Option<LinkRecord>> {
        let link = self
            .conn()
            .query_row(
                "SELECT url, first_access_time, last_access_time, count FROM links WHERE url = ?1",
                params![url],
                link_from_row,
            )
            .optional()?;
        Ok(link)
    }

    fn list_links(&self, filter: &ListFilter) -> StorageResult<Vec<LinkRecord>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT url, first_access_time, last_access_time, count FROM links
             WHERE ?1 IS NULL OR substr(url, 1, length(?1)) = ?1
             ORDER BY id LIMIT ?2 OFFSET ?3",
        )?;
        let links = stmt
            .query_map(
                params![filter.prefix(), to_i64(filter.limit), to_i64(filter.offset)],
                link_from_row,
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(links)
    }

    fn count_links(&self, prefix: Option<&str>) -> StorageResult<u64> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM links WHERE ?1 IS NULL OR substr(url, 1, length(?1)) = ?1",
            params![prefix],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    // ===== FIFO Queues =====

    fn enqueue(&self, crawler_name: &str, task: &Task) -> StorageResult<i64> {
        let payload = serde_json::to_string(&task.for_queue())?;
        let conn = self.conn();
        conn.execute(
            "INSERT INTO queue (crawler_name, payload) VALUES (?1, ?2)",
            params![crawler_name, payload],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn dequeue(&self, crawler_name: &str) -> StorageResult<Option<Task>> {
        let conn = self.conn();

        let head: Option<(i64, String)> = conn
            .query_row(
                "SELECT id, payload FROM queue WHERE crawler_name = ?1 ORDER BY id LIMIT 1",
                params![crawler_name],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let Some((id, payload)) = head else {
            return Ok(None);
        };

        conn.execute("DELETE FROM queue WHERE id = ?1", params![id])?;
        Ok(Some(serde_json::from_str(&payload)?))
    }

    fn queue_len(&self, crawler_name: &str) -> StorageResult<u64> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM queue WHERE crawler_name = ?1",
            params![crawler_name],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    fn queue_depths(&self) -> StorageResult<Vec<(String, u64)>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT crawler_name, COUNT(*) FROM queue GROUP BY crawler_name ORDER BY crawler_name",
        )?;
        let depths = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as u64))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(depths)
    }

    // ===== Items =====

    fn save_item(
        &self,
        crawler_name: &str,
        url: &str,
        item: &Item,
        now: i64,
    ) -> StorageResult<i64> {
        let payload = serde_json::to_string(item)?;
        let conn = self.conn();
        conn.execute(
            "INSERT INTO items (crawler_name, url, payload, saved_at) VALUES (?1, ?2, ?3, ?4)",
            params![crawler_name, url, payload, now],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn count_items(&self, crawler_name: Option<&str>) -> StorageResult<u64> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM items WHERE ?1 IS NULL OR crawler_name = ?1",
            params![crawler_name],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }
}
