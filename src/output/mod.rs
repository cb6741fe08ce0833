//! Output module for operator-facing reports
//!
//! This module handles:
//! - Recording store statistics (registrations, records, queues)
//! - Printing them for the `status` command

pub mod stats;

pub use stats::{load_statistics, print_statistics, StoreStatistics};
