//! State module: the crawl data model
//!
//! # Components
//!
//! - `Task`: one unit of work, carried through queues, running and crontab records
//! - `CrawlerItem`: persisted wrapper around a crawler configuration
//! - `LinkRecord`: dedup marker for already seeded URLs
//! - `TaskState`: the task lifecycle

mod task;
mod task_state;

pub use task::{CrawlerItem, CrawlerStatus, Item, LinkRecord, Task};
pub use task_state::TaskState;
