use crate::state::CrawlerStatus;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Main service configuration for Sumi-Loom
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub controller: ControllerConfig,
    #[serde(rename = "user-agent")]
    pub user_agent: UserAgentConfig,
    #[serde(default)]
    pub downloader: DownloaderConfig,
}

/// Worker pool and sweep configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ControllerConfig {
    /// Number of parallel workers
    #[serde(rename = "worker-count")]
    pub worker_count: i64,

    /// Path to the SQLite database holding all durable stores
    #[serde(rename = "database-path")]
    pub database_path: String,

    /// Seconds between two passes of each sweep loop
    #[serde(rename = "sweep-interval", default = "default_sweep_interval")]
    pub sweep_interval: u64,

    /// Seconds a worker has to complete a task before the retry sweep reclaims it
    #[serde(rename = "processing-budget", default = "default_processing_budget")]
    pub processing_budget: i64,

    /// Milliseconds a worker waits when there is nothing to do
    #[serde(rename = "idle-backoff", default = "default_idle_backoff")]
    pub idle_backoff: u64,
}

fn default_sweep_interval() -> u64 {
    5
}

fn default_processing_budget() -> i64 {
    300
}

fn default_idle_backoff() -> u64 {
    1000
}

impl ControllerConfig {
    /// Builds a configuration with the default intervals
    pub fn new(worker_count: i64, database_path: impl Into<String>) -> Self {
        Self {
            worker_count,
            database_path: database_path.into(),
            sweep_interval: default_sweep_interval(),
            processing_budget: default_processing_budget(),
            idle_backoff: default_idle_backoff(),
        }
    }
}

/// User agent identification configuration
#[derive(Debug, Clone, Deserialize)]
pub struct UserAgentConfig {
    /// Name of the crawler
    #[serde(rename = "crawler-name")]
    pub crawler_name: String,

    /// Version of the crawler
    #[serde(rename = "crawler-version")]
    pub crawler_version: String,

    /// URL with information about the crawler
    #[serde(rename = "contact-url")]
    pub contact_url: String,

    /// Email address for crawler-related contact
    #[serde(rename = "contact-email")]
    pub contact_email: String,
}

impl UserAgentConfig {
    /// Formats the User-Agent header value
    pub fn header_value(&self) -> String {
        format!(
            "{}/{} (+{}; {})",
            self.crawler_name, self.crawler_version, self.contact_url, self.contact_email
        )
    }
}

/// HTTP download configuration shared by all crawler runtimes
#[derive(Debug, Clone, Deserialize)]
pub struct DownloaderConfig {
    /// Request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    /// Proxy URL applied to every request
    #[serde(default)]
    pub proxy: Option<String>,

    /// Maximum accepted response body size
    #[serde(rename = "max-body-bytes", default)]
    pub max_body_bytes: Option<u64>,
}

fn default_timeout() -> u64 {
    60
}

impl Default for DownloaderConfig {
    fn default() -> Self {
        Self {
            timeout: default_timeout(),
            proxy: None,
            max_body_bytes: None,
        }
    }
}

/// Crawler configuration, persisted and transmitted as JSON
///
/// Immutable once loaded into a running crawler instance; changes require
/// re-registration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrawlerConf {
    /// "navigation" or "url_set"
    pub crawler_type: String,

    pub crawler_name: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub start_urls: Vec<String>,

    /// File with one start URL per line (url_set crawlers)
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub urls_file: String,

    /// Rule applied to start URLs; must be a key of `rules`
    pub start_rule_name: String,

    #[serde(default)]
    pub rules: HashMap<String, RuleConf>,

    #[serde(default = "default_weight")]
    pub weight: i64,

    #[serde(default)]
    pub status: CrawlerStatus,
}

fn default_weight() -> i64 {
    1
}

impl CrawlerConf {
    /// Revisit interval of a rule, 0 when the rule is unknown or never revisited
    pub fn revisit_interval(&self, rule_name: &str) -> i64 {
        self.rules
            .get(rule_name)
            .map(|rule| rule.revisit_interval)
            .unwrap_or(0)
    }
}

/// One named extraction rule of a crawler
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleConf {
    /// Extraction strategy tag, resolved through the parser registry
    pub parser_type: String,

    /// Seconds between re-executions of seed tasks using this rule (0 = never)
    #[serde(default)]
    pub revisit_interval: i64,

    /// Skip the `from_url_`, `from_parser_name_` and `crawl_time_` item fields
    #[serde(default)]
    pub no_default_fields: bool,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub example_url: String,

    /// Node name to the rules applied to nodes of that name; "root" is the document
    #[serde(default)]
    pub rules: HashMap<String, Vec<ParseRule>>,
}

/// A single extraction step applied to a node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParseRule {
    /// "dom", "url", "string" or "html"
    pub rule_type: String,

    /// Item field for values; next node name for "dom"; next rule name for "url"
    pub item_key: String,

    /// Whether tasks produced by a "url" rule are seed tasks
    #[serde(default)]
    pub is_seed_url: bool,

    /// CSS selector (html) or JSON pointer (json)
    pub selector: String,

    /// Attribute to read instead of the text content
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attr: Option<String>,

    /// Capture filter for "string" values, match filter for "url" values
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub regex: Option<String>,
}
