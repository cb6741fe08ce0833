//! Sumi-Loom: a weighted multi-site crawling controller
//!
//! Operators register named crawler configurations (start URLs, extraction rules,
//! revisit policy). A shared worker pool fetches, parses and re-schedules URLs across
//! all registered crawlers, apportioned by weight, with durable recovery from crashed
//! or stalled work.

pub mod admin;
pub mod config;
pub mod controller;
pub mod crawler;
pub mod output;
pub mod parser;
pub mod scheduler;
pub mod state;
pub mod storage;

use thiserror::Error;

/// Main error type for Sumi-Loom operations
#[derive(Debug, Error)]
pub enum LoomError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Controller is not initialized or has already finished")]
    NotInitialized,

    #[error("Crawler name already exists: {0}")]
    DuplicateName(String),

    #[error("Crawler name not found: {0}")]
    NameNotFound(String),

    #[error("Scheduler error: {0}")]
    Scheduler(#[from] scheduler::SchedulerError),

    #[error("Queue error: {0}")]
    Queue(#[from] crawler::QueueError),

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("HTTP error for {url}: {source}")]
    Http { url: String, source: reqwest::Error },

    #[error("HTTP status {status} for {url}")]
    HttpStatus { url: String, status: u16 },

    #[error("Response for {url} exceeds {limit} bytes")]
    BodyTooLarge { url: String, limit: u64 },

    #[error("Parse error for {url}: {message}")]
    Parse { url: String, message: String },

    #[error("Processing error for {url}: {message}")]
    Processing { url: String, message: String },

    #[error("Invalid task transition: {from} -> {to}")]
    InvalidTransition {
        from: state::TaskState,
        to: state::TaskState,
    },

    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-specific errors
///
/// Covers both the service TOML file and crawler JSON configurations. A crawler
/// configuration rejected here is never persisted.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to parse crawler JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),

    #[error("{field} must be in (0, 1000], got {value}")]
    WeightRange { field: &'static str, value: i64 },

    #[error("Empty crawler_name in crawler config")]
    EmptyCrawlerName,

    #[error("Crawler names are not consistent: '{item}' vs '{conf}'")]
    NamesNotConsistent { item: String, conf: String },

    #[error("Unsupported crawler_type: '{0}'")]
    UnsupportedCrawlerType(String),

    #[error("Empty start_urls for navigation crawler")]
    EmptyStartUrls,

    #[error("Empty urls_file for url_set crawler")]
    EmptyUrlsFile,

    #[error("Start rule '{0}' not found in rules")]
    NoStartRule(String),

    #[error("Unknown parser_type '{parser_type}' in rule '{rule}'")]
    UnknownParserType { rule: String, parser_type: String },

    #[error("revisit_interval of rule '{rule}' must be in [0, {max}], got {value}")]
    RevisitIntervalRange { rule: String, value: i64, max: i64 },

    #[error("Invalid rule '{rule}': {message}")]
    InvalidRule { rule: String, message: String },
}

/// Result type alias for Sumi-Loom operations
pub type Result<T> = std::result::Result<T, LoomError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

// Re-export commonly used types
pub use config::{Config, CrawlerConf};
pub use controller::{Clock, Controller, ManualClock, SystemClock};
pub use scheduler::Scheduler;
pub use state::{CrawlerItem, CrawlerStatus, Item, Task, TaskState};
