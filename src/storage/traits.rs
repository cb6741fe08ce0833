//! Storage traits and error types
//!
//! The controller is engine-agnostic: it only needs the operations below plus
//! crash-durable writes. No cross-store transactions are assumed.

use crate::state::{CrawlerItem, Item, LinkRecord, Task};
use crate::storage::{ListFilter, TaskTable};
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Record already exists: {0}")]
    Duplicate(String),

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Trait for storage backend implementations
///
/// Implementations must be safe for concurrent per-key access from all workers
/// and both sweep loops.
pub trait Storage: Send + Sync {
    // ===== Crawler Registrations =====

    /// Inserts a new crawler item, failing with `Duplicate` if the name exists
    ///
    /// # Returns
    ///
    /// The durable ID of the new record
    fn insert_crawler(&self, item: &CrawlerItem) -> StorageResult<i64>;

    /// Replaces an existing crawler item, failing with `NotFound` if absent
    fn update_crawler(&self, item: &CrawlerItem) -> StorageResult<()>;

    /// Gets a crawler item by name
    fn get_crawler(&self, name: &str) -> StorageResult<Option<CrawlerItem>>;

    /// Deletes a crawler item; returns whether a record was removed
    fn delete_crawler(&self, name: &str) -> StorageResult<bool>;

    /// Lists crawler items in persisted order
    fn list_crawlers(&self, filter: &ListFilter) -> StorageResult<Vec<CrawlerItem>>;

    /// Counts crawler items whose name starts with `prefix`
    fn count_crawlers(&self, prefix: Option<&str>) -> StorageResult<u64>;

    /// Gets all enabled crawler items in persisted order
    fn enabled_crawlers(&self) -> StorageResult<Vec<CrawlerItem>>;

    // ===== Running / Crontab Records =====

    /// Inserts a task record and returns its durable ID
    fn insert_task(&self, table: TaskTable, task: &Task) -> StorageResult<i64>;

    /// Inserts or replaces the crontab record for the task's crawler and URL
    fn upsert_crontab(&self, task: &Task) -> StorageResult<i64>;

    /// Updates a task record by ID
    fn update_task(&self, table: TaskTable, task: &Task) -> StorageResult<()>;

    /// Gets a task record by ID
    fn get_task(&self, table: TaskTable, id: i64) -> StorageResult<Option<Task>>;

    /// Deletes a task record; returns whether a record was removed
    fn delete_task(&self, table: TaskTable, id: i64) -> StorageResult<bool>;

    /// Gets every record whose `next_exec_time` is at or before `now`
    fn due_tasks(&self, table: TaskTable, now: i64) -> StorageResult<Vec<Task>>;

    /// Lists task records; the prefix filters on crawler name
    fn list_tasks(&self, table: TaskTable, filter: &ListFilter) -> StorageResult<Vec<Task>>;

    /// Counts task records whose crawler name starts with `prefix`
    fn count_tasks(&self, table: TaskTable, prefix: Option<&str>) -> StorageResult<u64>;

    // ===== URL Dedup =====

    /// Checks whether a URL has been seeded before
    fn has_link(&self, url: &str) -> StorageResult<bool>;

    /// Marks a URL as seen, bumping its visit count if already present
    fn record_link(&self, url: &str, now: i64) -> StorageResult<()>;

    /// Gets the dedup record of a URL
    fn get_link(&self, url: &str) -> StorageResult<Option<LinkRecord>>;

    /// Lists dedup records; the prefix filters on URL
    fn list_links(&self, filter: &ListFilter) -> StorageResult<Vec<LinkRecord>>;

    /// Counts dedup records whose URL starts with `prefix`
    fn count_links(&self, prefix: Option<&str>) -> StorageResult<u64>;

    // ===== FIFO Queues =====

    /// Appends a task to a crawler's queue
    fn enqueue(&self, crawler_name: &str, task: &Task) -> StorageResult<i64>;

    /// Removes and returns the oldest task of a crawler's queue
    fn dequeue(&self, crawler_name: &str) -> StorageResult<Option<Task>>;

    /// Number of tasks waiting in a crawler's queue
    fn queue_len(&self, crawler_name: &str) -> StorageResult<u64>;

    /// Queue depth of every crawler with waiting tasks
    fn queue_depths(&self) -> StorageResult<Vec<(String, u64)>>;

    // ===== Items =====

    /// Persists an extracted item
    fn save_item(&self, crawler_name: &str, url: &str, item: &Item, now: i64)
        -> StorageResult<i64>;

    /// Counts saved items, optionally for one crawler
    fn count_items(&self, crawler_name: Option<&str>) -> StorageResult<u64>;
}
