//! Recovery sweeps
//!
//! - cron sweep: due crontab records go back into their crawler's queue and
//!   stay in the store with an advanced next execution time
//! - retry sweep: running records past their deadline go back into the queue
//!   and are deleted
//!
//! Records of inactive crawlers are skipped and stay dormant. A failure on one
//! record is logged and the scan continues.

use super::Controller;
use crate::storage::TaskTable;
use crate::Result;

/// Counters of one sweep pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub scanned: usize,
    pub requeued: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Smallest `previous + k * interval` (k >= 1) later than `now`
///
/// Keeps a revisit on its original grid when sweeps run late. Saturates at
/// `i64::MAX`; `interval` must be positive.
pub fn next_revisit(previous: i64, interval: i64, now: i64) -> i64 {
    let next = previous.saturating_add(interval);
    if next > now {
        return next;
    }
    let missed = (now.saturating_sub(previous) / interval).saturating_add(1);
    previous.saturating_add(missed.saturating_mul(interval))
}

impl Controller {
    /// Re-enqueues every crontab record due at the current time
    pub fn cron_sweep(&self) -> Result<SweepReport> {
        self.ensure_initialized()?;

        let now = self.clock.now();
        let due = self.storage.due_tasks(TaskTable::Crontab, now)?;
        let mut report = SweepReport::default();

        for record in due {
            report.scanned += 1;

            let Some(active) = self.active(&record.crawler_name) else {
                report.skipped += 1;
                continue;
            };

            if record.revisit_interval <= 0 {
                tracing::warn!("Dropping crontab record without interval: {}", record);
                if let Some(id) = record.id {
                    if let Err(e) = self.storage.delete_task(TaskTable::Crontab, id) {
                        tracing::warn!("Failed to delete crontab record {}: {}", id, e);
                    }
                }
                report.failed += 1;
                continue;
            }

            if let Err(e) = active.queue().enqueue(&record) {
                tracing::warn!("Cron sweep failed to enqueue {}: {}", record, e);
                report.failed += 1;
                continue;
            }

            let mut next = record.clone();
            next.last_access_time = now;
            next.next_exec_time = next_revisit(record.next_exec_time, record.revisit_interval, now);
            if let Err(e) = self.storage.update_task(TaskTable::Crontab, &next) {
                tracing::warn!("Cron sweep failed to advance {}: {}", record, e);
                report.failed += 1;
                continue;
            }

            report.requeued += 1;
        }

        if report.scanned > 0 {
            tracing::debug!("Cron sweep at {}: {:?}", now, report);
        }
        Ok(report)
    }

    /// Re-enqueues every running record whose deadline has passed
    pub fn retry_sweep(&self) -> Result<SweepReport> {
        self.ensure_initialized()?;

        let now = self.clock.now();
        let expired = self.storage.due_tasks(TaskTable::Running, now)?;
        let mut report = SweepReport::default();

        for record in expired {
            report.scanned += 1;

            let Some(active) = self.active(&record.crawler_name) else {
                report.skipped += 1;
                continue;
            };

            if let Err(e) = active.queue().enqueue(&record) {
                tracing::warn!("Retry sweep failed to enqueue {}: {}", record, e);
                report.failed += 1;
                continue;
            }

            if let Some(id) = record.id {
                if let Err(e) = self.storage.delete_task(TaskTable::Running, id) {
                    tracing::warn!("Retry sweep failed to delete running record {}: {}", id, e);
                    report.failed += 1;
                    continue;
                }
            }

            tracing::info!("Requeued stalled task {}", record);
            report.requeued += 1;
        }

        if report.scanned > 0 {
            tracing::debug!("Retry sweep at {}: {:?}", now, report);
        }
        Ok(report)
    }
}
