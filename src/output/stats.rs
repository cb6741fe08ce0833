//! Statistics generation from the store
//!
//! This module provides functionality for extracting and displaying
//! controller statistics from the storage layer.

use crate::storage::{Storage, TaskTable};
use crate::LoomError;
use serde::Serialize;

/// Store statistics summary
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StoreStatistics {
    /// Number of registered crawlers
    pub crawlers: u64,

    /// Number of registered crawlers with enabled status
    pub enabled_crawlers: u64,

    /// Tasks currently assigned to a worker (or abandoned awaiting retry)
    pub running: u64,

    /// Standing revisit entries
    pub crontab: u64,

    /// URLs seeded at least once
    pub seen_links: u64,

    /// Saved items
    pub items: u64,

    /// Queue depth per crawler with waiting tasks
    pub queue_depths: Vec<(String, u64)>,
}

impl StoreStatistics {
    /// Total number of queued tasks across crawlers
    pub fn queued(&self) -> u64 {
        self.queue_depths.iter().map(|(_, depth)| depth).sum()
    }
}

/// Loads statistics from storage
///
/// # Arguments
///
/// * `storage` - The storage backend to query
///
/// # Returns
///
/// * `Ok(StoreStatistics)` - Successfully loaded statistics
/// * `Err(LoomError)` - Failed to query statistics
pub fn load_statistics(storage: &dyn Storage) -> Result<StoreStatistics, LoomError> {
    Ok(StoreStatistics {
        crawlers: storage.count_crawlers(None)?,
        enabled_crawlers: storage.enabled_crawlers()?.len() as u64,
        running: storage.count_tasks(TaskTable::Running, None)?,
        crontab: storage.count_tasks(TaskTable::Crontab, None)?,
        seen_links: storage.count_links(None)?,
        items: storage.count_items(None)?,
        queue_depths: storage.queue_depths()?,
    })
}

/// Prints statistics to stdout in a formatted manner
///
/// # Arguments
///
/// * `stats` - The statistics to display
pub fn print_statistics(stats: &StoreStatistics) {
    println!("=== Store Statistics ===\n");

    println!("Overview:");
    println!(
        "  Crawlers: {} ({} enabled)",
        stats.crawlers, stats.enabled_crawlers
    );
    println!("  Running records: {}", stats.running);
    println!("  Crontab records: {}", stats.crontab);
    println!("  Seen links: {}", stats.seen_links);
    println!("  Saved items: {}", stats.items);
    println!();

    if !stats.queue_depths.is_empty() {
        println!("Queued Tasks ({}):", stats.queued());
        let mut depths: Vec<_> = stats.queue_depths.iter().collect();
        depths.sort_by(|a, b| b.1.cmp(&a.1));
        for (crawler, depth) in depths {
            println!("  {}: {}", crawler, depth);
        }
        println!();
    }
}
