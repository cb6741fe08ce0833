//! Admin operations
//!
//! Create, retrieve, update and delete crawler configurations by name, and
//! paginated listing of crawlers, seen URLs, running and crontab records.

use crate::config::CrawlerConf;
use crate::controller::Controller;
use crate::state::CrawlerItem;
use crate::storage::{ListFilter, Storage, TaskTable};
use crate::{LoomError, Result};
use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// What to list
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListKind {
    /// Crawler registrations, keyed by crawler name
    Crawler,
    /// Dedup store, keyed by URL
    Seed,
    /// Running records, keyed by crawler name
    Running,
    /// Crontab records, keyed by crawler name
    Crontab,
}

impl ListKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Crawler => "crawler",
            Self::Seed => "seed",
            Self::Running => "running",
            Self::Crontab => "crontab",
        }
    }
}

impl FromStr for ListKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "crawler" => Ok(Self::Crawler),
            "seed" => Ok(Self::Seed),
            "running" => Ok(Self::Running),
            "crontab" => Ok(Self::Crontab),
            other => Err(format!(
                "unknown list kind '{}', expected crawler, seed, running or crontab",
                other
            )),
        }
    }
}

impl fmt::Display for ListKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One page of a listing
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ListPage {
    /// Number of records matching the prefix, ignoring pagination
    pub total: u64,
    pub rows: Vec<serde_json::Value>,
}

/// Lists records of one kind
pub fn list(storage: &dyn Storage, kind: ListKind, filter: &ListFilter) -> Result<ListPage> {
    let prefix = filter.prefix();
    let (total, rows) = match kind {
        ListKind::Crawler => (
            storage.count_crawlers(prefix)?,
            to_rows(storage.list_crawlers(filter)?)?,
        ),
        ListKind::Seed => (
            storage.count_links(prefix)?,
            to_rows(storage.list_links(filter)?)?,
        ),
        ListKind::Running => (
            storage.count_tasks(TaskTable::Running, prefix)?,
            to_rows(storage.list_tasks(TaskTable::Running, filter)?)?,
        ),
        ListKind::Crontab => (
            storage.count_tasks(TaskTable::Crontab, prefix)?,
            to_rows(storage.list_tasks(TaskTable::Crontab, filter)?)?,
        ),
    };
    Ok(ListPage { total, rows })
}

fn to_rows<T: Serialize>(records: Vec<T>) -> Result<Vec<serde_json::Value>> {
    records
        .into_iter()
        .map(|record| serde_json::to_value(record).map_err(LoomError::from))
        .collect()
}

/// Gets a crawler registration by name
pub fn retrieve(storage: &dyn Storage, name: &str) -> Result<CrawlerItem> {
    storage
        .get_crawler(name)?
        .ok_or_else(|| LoomError::NameNotFound(name.to_string()))
}

/// Admin facade over a running controller
pub struct Admin {
    controller: Arc<Controller>,
}

impl Admin {
    pub fn new(controller: Arc<Controller>) -> Self {
        Self { controller }
    }

    /// Registers a new crawler
    pub async fn create(&self, conf: CrawlerConf, author: &str) -> Result<i64> {
        let item = CrawlerItem::from_conf(conf, author, self.controller.clock().now());
        self.controller.register_crawler(item, true).await
    }

    /// Replaces an existing crawler's configuration and restarts it
    pub async fn update(&self, conf: CrawlerConf, author: &str) -> Result<i64> {
        let item = CrawlerItem::from_conf(conf, author, self.controller.clock().now());
        self.controller.register_crawler(item, false).await
    }

    pub async fn delete(&self, name: &str) -> Result<()> {
        self.controller.unregister_crawler(name).await
    }

    pub fn retrieve(&self, name: &str) -> Result<CrawlerItem> {
        retrieve(self.controller.storage().as_ref(), name)
    }

    pub fn list(&self, kind: ListKind, filter: &ListFilter) -> Result<ListPage> {
        list(self.controller.storage().as_ref(), kind, filter)
    }
}
