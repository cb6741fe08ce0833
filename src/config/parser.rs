use crate::config::types::{Config, CrawlerConf};
use crate::config::validation::validate;
use crate::ConfigError;
use sha2::{Digest, Sha256};
use std::path::Path;

/// Loads and parses the service configuration file from the given path
///
/// # Arguments
///
/// * `path` - Path to the TOML configuration file
///
/// # Returns
///
/// * `Ok(Config)` - Successfully loaded and validated configuration
/// * `Err(ConfigError)` - Failed to load, parse, or validate the configuration
///
/// # Example
///
/// ```no_run
/// use std::path::Path;
/// use sumi_loom::config::load_config;
///
/// let config = load_config(Path::new("loom.toml")).unwrap();
/// println!("Workers: {}", config.controller.worker_count);
/// ```
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let config: Config = toml::from_str(&content)?;
    validate(&config)?;
    Ok(config)
}

/// Computes a SHA-256 hash of the configuration file content
pub fn compute_config_hash(path: &Path) -> Result<String, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    Ok(hex::encode(hasher.finalize()))
}

/// Loads a configuration and returns both the config and its hash
pub fn load_config_with_hash(path: &Path) -> Result<(Config, String), ConfigError> {
    let config = load_config(path)?;
    let hash = compute_config_hash(path)?;
    Ok((config, hash))
}

/// Reads a crawler configuration from a JSON file
///
/// Only syntax is checked here; semantic validation happens at registration
/// time, where the parser registry is available.
pub fn load_crawler_conf(path: &Path) -> Result<CrawlerConf, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    parse_crawler_conf(&content)
}

/// Parses a crawler configuration from JSON text
pub fn parse_crawler_conf(json: &str) -> Result<CrawlerConf, ConfigError> {
    Ok(serde_json::from_str(json)?)
}

/// Reads the start URLs of a url_set crawler
///
/// One URL per line; blank lines and lines starting with `#` are ignored.
pub fn read_urls_file(path: &Path) -> Result<Vec<String>, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect())
}
