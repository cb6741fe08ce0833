//! Configuration module for Sumi-Loom
//!
//! Two kinds of configuration live here:
//! - the service configuration (TOML): worker pool, sweeps, user agent, downloader
//! - crawler configurations (JSON): start URLs, extraction rules, revisit policy
//!
//! # Example
//!
//! ```no_run
//! use sumi_loom::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("loom.toml")).unwrap();
//! println!("Workers: {}", config.controller.worker_count);
//! ```

mod parser;
mod types;
mod validation;

pub use types::{
    Config, ControllerConfig, CrawlerConf, DownloaderConfig, ParseRule, RuleConf, UserAgentConfig,
};

pub use parser::{
    compute_config_hash, load_config, load_config_with_hash, load_crawler_conf,
    parse_crawler_conf, read_urls_file,
};
pub use validation::{
    check_range, validate, validate_controller_config, validate_crawler_conf,
    validate_crawler_item, MAX_RANGE_VALUE, MAX_REVISIT_INTERVAL,
};
