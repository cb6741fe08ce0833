//! Weighted crawler scheduler
//!
//! Holds the set of active crawler names with their weights and picks one per
//! worker iteration with probability `weight / total_weight`. All operations are
//! serialized behind one lock so readers never observe a half-applied update.

use std::sync::{Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tracing::error;

/// Errors raised by the scheduler
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("Scheduler has no active crawlers")]
    Empty,

    #[error("Crawler not present in scheduler: {0}")]
    NameNotFound(String),

    /// The random draw was not consumed by any entry; the weight sum is corrupt
    #[error("Scheduler weights inconsistent: {remaining} left of total {total}")]
    Invariant { remaining: i64, total: i64 },
}

/// One scheduler entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerEntry {
    pub name: String,
    pub weight: i64,
}

#[derive(Debug, Default)]
struct SchedulerInner {
    entries: Vec<SchedulerEntry>,
    total_weight: i64,
}

/// Weighted random selection over active crawlers
#[derive(Debug, Default)]
pub struct Scheduler {
    inner: Mutex<SchedulerInner>,
}

impl Scheduler {
    /// Creates an empty scheduler
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, SchedulerInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Adds an entry
    ///
    /// Names are not deduplicated here; the controller removes any prior entry
    /// for a name before inserting a new one.
    pub fn insert(&self, name: impl Into<String>, weight: i64) {
        let mut inner = self.lock();
        inner.total_weight += weight;
        inner.entries.push(SchedulerEntry {
            name: name.into(),
            weight,
        });
    }

    /// Removes the first entry with this name
    ///
    /// # Returns
    ///
    /// The removed weight, or `NameNotFound` if no entry matches
    pub fn remove(&self, name: &str) -> Result<i64, SchedulerError> {
        let mut inner = self.lock();
        let index = inner
            .entries
            .iter()
            .position(|entry| entry.name == name)
            .ok_or_else(|| SchedulerError::NameNotFound(name.to_string()))?;

        let entry = inner.entries.remove(index);
        inner.total_weight -= entry.weight;
        Ok(entry.weight)
    }

    /// Picks a crawler name with probability proportional to its weight
    pub fn weighted_choice(&self) -> Result<String, SchedulerError> {
        let inner = self.lock();
        if inner.entries.is_empty() || inner.total_weight <= 0 {
            return Err(SchedulerError::Empty);
        }

        let draw = rand::random_range(0..inner.total_weight);
        pick(&inner.entries, draw).map_err(|err| {
            error!(
                total_weight = inner.total_weight,
                entries = inner.entries.len(),
                "Weighted choice fell through: {}",
                err
            );
            err
        })
    }

    /// Sum of all entry weights
    pub fn total_weight(&self) -> i64 {
        self.lock().total_weight
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.lock().entries.iter().any(|entry| entry.name == name)
    }

    /// Snapshot of the current entries in insertion order
    pub fn entries(&self) -> Vec<SchedulerEntry> {
        self.lock().entries.clone()
    }
}

/// Walks the entries subtracting weights from `draw` and returns the entry
/// that takes it below zero
///
/// With `draw` uniform in `[0, total)` each entry is chosen with probability
/// `weight / total`.
pub fn pick(entries: &[SchedulerEntry], draw: i64) -> Result<String, SchedulerError> {
    let total: i64 = entries.iter().map(|entry| entry.weight).sum();
    let mut remaining = draw;
    for entry in entries {
        remaining -= entry.weight;
        // Strictly below zero: draws start at 0, so a draw equal to the
        // running sum belongs to the next entry
        if remaining < 0 {
            return Ok(entry.name.clone());
        }
    }
    Err(SchedulerError::Invariant { remaining, total })
}
