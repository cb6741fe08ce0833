//! Storage module for the durable stores
//!
//! This module handles all database operations for the controller, including:
//! - Crawler registration persistence
//! - Running and crontab task records
//! - URL dedup tracking
//! - Per-crawler FIFO queues
//! - Extracted item persistence

mod schema;
mod sqlite;
mod traits;

pub use sqlite::SqliteStorage;
pub use traits::{Storage, StorageError, StorageResult};

use crate::LoomError;
use std::path::Path;

/// Opens (creating if needed) the storage database
///
/// Failures here are fatal at startup.
pub fn open_storage(path: &Path) -> Result<SqliteStorage, LoomError> {
    Ok(SqliteStorage::new(path)?)
}

/// The two task record stores
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskTable {
    /// Tasks currently assigned to a worker, keyed by deadline
    Running,
    /// Standing revisit entries, keyed by next execution time
    Crontab,
}

impl TaskTable {
    pub fn table_name(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Crontab => "crontab",
        }
    }
}

/// Pagination and key-prefix filter for list operations
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListFilter {
    pub offset: u64,
    pub limit: u64,
    pub prefix: Option<String>,
}

impl ListFilter {
    /// Default page size when none (or a non-positive one) is requested
    pub const DEFAULT_LIMIT: u64 = 10;

    /// Builds a filter from raw request values
    ///
    /// Negative offsets become 0 and non-positive limits become the default.
    /// An empty prefix means no filtering.
    pub fn new(offset: i64, limit: i64, prefix: Option<String>) -> Self {
        Self {
            offset: offset.max(0) as u64,
            limit: if limit <= 0 {
                Self::DEFAULT_LIMIT
            } else {
                limit as u64
            },
            prefix: prefix.filter(|p| !p.is_empty()),
        }
    }

    /// A filter returning every record
    pub fn all() -> Self {
        Self {
            offset: 0,
            limit: u64::MAX >> 1,
            prefix: None,
        }
    }

    pub fn prefix(&self) -> Option<&str> {
        self.prefix.as_deref()
    }
}
