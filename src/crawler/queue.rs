//! Durable per-crawler FIFO queue handle

use crate::state::Task;
use crate::storage::{Storage, StorageError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;

/// Errors raised by a task queue
#[derive(Debug, Error)]
pub enum QueueError {
    /// Nothing to dequeue; workers move on to their next iteration
    #[error("Queue of crawler {0} is empty")]
    Empty(String),

    #[error("Queue of crawler {0} is closed")]
    Closed(String),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Handle on one crawler's queue rows in the shared store
///
/// Closing a handle only stops this handle; queued rows stay in the store and
/// are picked up again when the crawler is re-registered.
pub struct TaskQueue {
    crawler_name: String,
    storage: Arc<dyn Storage>,
    closed: AtomicBool,
}

impl TaskQueue {
    pub fn open(crawler_name: impl Into<String>, storage: Arc<dyn Storage>) -> Self {
        Self {
            crawler_name: crawler_name.into(),
            storage,
            closed: AtomicBool::new(false),
        }
    }

    pub fn crawler_name(&self) -> &str {
        &self.crawler_name
    }

    fn ensure_open(&self) -> Result<(), QueueError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(QueueError::Closed(self.crawler_name.clone()));
        }
        Ok(())
    }

    pub fn enqueue(&self, task: &Task) -> Result<(), QueueError> {
        self.ensure_open()?;
        self.storage.enqueue(&self.crawler_name, task)?;
        Ok(())
    }

    /// Takes the oldest task, failing with `Empty` when there is none
    pub fn dequeue(&self) -> Result<Task, QueueError> {
        self.ensure_open()?;
        self.storage
            .dequeue(&self.crawler_name)?
            .ok_or_else(|| QueueError::Empty(self.crawler_name.clone()))
    }

    pub fn len(&self) -> Result<u64, QueueError> {
        Ok(self.storage.queue_len(&self.crawler_name)?)
    }

    pub fn is_empty(&self) -> Result<bool, QueueError> {
        Ok(self.len()? == 0)
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}
