//! Per-task lifecycle driven by workers
//!
//! `Dequeued -> Running -> {Completed | Rearmed | Abandoned}`. An abandoned
//! task keeps its running record; the retry sweep reclaims it once the
//! deadline passes.

use super::{ActiveCrawler, Controller};
use crate::crawler::QueueError;
use crate::scheduler::SchedulerError;
use crate::state::{Task, TaskState};
use crate::storage::TaskTable;
use crate::{LoomError, Result};

/// What one worker iteration did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkOutcome {
    /// The scheduler has no active crawlers
    NoCrawlers,

    /// The chosen crawler had nothing queued
    QueueEmpty { crawler: String },

    /// A task went through the lifecycle
    Finished {
        crawler: String,
        url: String,
        state: TaskState,
        children: usize,
        items: usize,
    },
}

impl WorkOutcome {
    /// Whether the worker should back off before its next iteration
    pub fn is_idle(&self) -> bool {
        !matches!(self, Self::Finished { .. })
    }
}

fn advance(from: TaskState, to: TaskState) -> Result<TaskState> {
    if from.can_transition_to(to) {
        Ok(to)
    } else {
        Err(LoomError::InvalidTransition { from, to })
    }
}

impl Controller {
    /// Runs one worker iteration: pick a crawler, dequeue one task, process it
    ///
    /// Scheduler and queue emptiness are outcomes, not errors. Processing
    /// failures are logged and reported as `Abandoned`.
    pub async fn work_once(&self) -> Result<WorkOutcome> {
        self.ensure_initialized()?;

        let name = match self.scheduler.weighted_choice() {
            Ok(name) => name,
            Err(SchedulerError::Empty) => return Ok(WorkOutcome::NoCrawlers),
            Err(e) => return Err(e.into()),
        };

        // Unregistered between the draw and the lookup
        let Some(active) = self.active(&name) else {
            return Ok(WorkOutcome::QueueEmpty { crawler: name });
        };

        let task = match active.queue().dequeue() {
            Ok(task) => task,
            Err(QueueError::Empty(_)) | Err(QueueError::Closed(_)) => {
                return Ok(WorkOutcome::QueueEmpty { crawler: name })
            }
            Err(e) => return Err(e.into()),
        };
        tracing::trace!("Dequeued {}", task);

        self.drive(&active, task).await
    }

    async fn drive(&self, active: &ActiveCrawler, task: Task) -> Result<WorkOutcome> {
        let mut state = TaskState::Dequeued;

        let started = self.clock.now();
        let mut running = task.clone();
        running.next_exec_time = started.saturating_add(self.config.processing_budget);
        let running_id = match self.storage.insert_task(TaskTable::Running, &running) {
            Ok(id) => id,
            Err(e) => {
                // Without a running record nothing would recover the task
                tracing::warn!("Failed to persist running record for {}: {}", task, e);
                if let Err(requeue) = self.enqueue_for(&task.crawler_name, &task) {
                    tracing::error!("Lost task {}: {}", task, requeue);
                }
                return Err(e.into());
            }
        };
        state = advance(state, TaskState::Running)?;

        let processed = match active.runtime.process(&task).await {
            Ok(processed) => processed,
            Err(e) => {
                tracing::warn!("Processing {} failed: {}", task, e);
                state = advance(state, TaskState::Abandoned)?;
                return Ok(WorkOutcome::Finished {
                    crawler: task.crawler_name,
                    url: task.url,
                    state,
                    children: 0,
                    items: 0,
                });
            }
        };

        let now = self.clock.now();
        if let Err(e) = self.storage.delete_task(TaskTable::Running, running_id) {
            // The retry sweep will process the task once more
            tracing::warn!("Failed to delete running record {}: {}", running_id, e);
        }

        let interval = active.conf.revisit_interval(&task.rule_name);
        let mut next = TaskState::Completed;
        if task.is_seed && interval > 0 {
            let mut rearmed = task.for_queue();
            rearmed.revisit_interval = interval;
            rearmed.last_access_time = now;
            rearmed.next_exec_time = now.saturating_add(interval);
            match self.storage.upsert_crontab(&rearmed) {
                Ok(_) => next = TaskState::Rearmed,
                Err(e) => tracing::warn!("Failed to re-arm {}: {}", task, e),
            }
        }

        let children = self.schedule_children(active, processed.tasks, now);

        let mut items = 0;
        for item in &processed.items {
            match active.runtime.save(&task, item).await {
                Ok(()) => items += 1,
                Err(e) => tracing::warn!("Failed to save item from {}: {}", task.url, e),
            }
        }

        state = advance(state, next)?;
        tracing::debug!(
            "{} {} ({} children, {} items)",
            state,
            task.url,
            children,
            items
        );

        Ok(WorkOutcome::Finished {
            crawler: task.crawler_name,
            url: task.url,
            state,
            children,
            items,
        })
    }

    /// Enqueues child tasks, deduplicating seed children against the dedup store
    ///
    /// A seed child is marked seen only once it is queued.
    ///
    /// # Returns
    ///
    /// The number of enqueued children
    fn schedule_children(&self, active: &ActiveCrawler, tasks: Vec<Task>, now: i64) -> usize {
        let mut enqueued = 0;

        for mut child in tasks {
            child.crawler_name = active.conf.crawler_name.clone();
            child.revisit_interval = active.conf.revisit_interval(&child.rule_name);

            if child.is_seed {
                match self.storage.has_link(&child.url) {
                    Ok(true) => {
                        tracing::trace!("Seed child {} already seen", child.url);
                        continue;
                    }
                    Ok(false) => {}
                    Err(e) => {
                        tracing::warn!("Dedup lookup for {} failed: {}", child.url, e);
                        continue;
                    }
                }
            }

            if let Err(e) = self.enqueue_for(&child.crawler_name, &child) {
                tracing::warn!("Failed to enqueue {}: {}", child, e);
                continue;
            }
            enqueued += 1;

            if !child.is_seed {
                continue;
            }
            if let Err(e) = self.storage.record_link(&child.url, now) {
                tracing::warn!("Failed to record link {}: {}", child.url, e);
            }
            if child.revisit_interval > 0 {
                let mut cron = child.clone();
                cron.next_exec_time = now.saturating_add(child.revisit_interval);
                if let Err(e) = self.storage.upsert_crontab(&cron) {
                    tracing::warn!("Failed to schedule revisit of {}: {}", child.url, e);
                }
            }
        }

        enqueued
    }

    /// Appends a task to a crawler's durable queue
    ///
    /// Goes through the handle of the crawler's current instance, so work
    /// finished by a replaced instance lands in its successor's queue. With no
    /// open handle the row is written to the store directly and is picked up
    /// when the name is registered again.
    fn enqueue_for(&self, crawler_name: &str, task: &Task) -> std::result::Result<(), QueueError> {
        if let Some(current) = self.active(crawler_name) {
            match current.queue().enqueue(task) {
                Err(QueueError::Closed(_)) => {}
                other => return other,
            }
        }
        self.storage.enqueue(crawler_name, task)?;
        Ok(())
    }
}
