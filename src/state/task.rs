use crate::config::CrawlerConf;
use serde::{Deserialize, Serialize};
use std::fmt;

/// An extracted item: a JSON object produced by an extraction rule
pub type Item = serde_json::Map<String, serde_json::Value>;

/// One unit of crawl work
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    /// Durable identifier, set once the task is stored as a running or crontab record
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,

    /// Owning crawler
    pub crawler_name: String,

    /// Rule to apply to the fetched page
    pub rule_name: String,

    pub url: String,

    /// Seed tasks are eligible for periodic revisit
    #[serde(default)]
    pub is_seed: bool,

    /// Unix seconds of the last successful visit
    #[serde(default)]
    pub last_access_time: i64,

    /// Seconds between revisits; 0 when never revisited
    #[serde(default)]
    pub revisit_interval: i64,

    /// Unix seconds: next execution for crontab records, deadline for running records
    #[serde(default)]
    pub next_exec_time: i64,
}

impl Task {
    /// Creates a fresh, unpersisted task
    pub fn new(
        crawler_name: impl Into<String>,
        rule_name: impl Into<String>,
        url: impl Into<String>,
    ) -> Self {
        Self {
            id: None,
            crawler_name: crawler_name.into(),
            rule_name: rule_name.into(),
            url: url.into(),
            is_seed: false,
            last_access_time: 0,
            revisit_interval: 0,
            next_exec_time: 0,
        }
    }

    /// Returns a copy suitable for a FIFO queue: no durable id, no schedule
    pub fn for_queue(&self) -> Self {
        Self {
            id: None,
            next_exec_time: 0,
            ..self.clone()
        }
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{{crawler: {}, rule: {}, url: {}, seed: {}}}",
            self.crawler_name, self.rule_name, self.url, self.is_seed
        )
    }
}

/// Whether a registered crawler should be activated
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CrawlerStatus {
    #[default]
    Enabled,
    Disabled,
}

impl CrawlerStatus {
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Enabled => "enabled",
            Self::Disabled => "disabled",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "enabled" => Some(Self::Enabled),
            "disabled" => Some(Self::Disabled),
            _ => None,
        }
    }
}

impl fmt::Display for CrawlerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_string())
    }
}

/// Persisted crawler registration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrawlerItem {
    #[serde(default)]
    pub id: i64,
    pub crawler_name: String,
    pub conf: CrawlerConf,
    pub weight: i64,
    pub status: CrawlerStatus,
    #[serde(default)]
    pub create_time: i64,
    #[serde(default)]
    pub modify_time: i64,
    #[serde(default)]
    pub author: String,
}

impl CrawlerItem {
    /// Wraps a configuration, taking its weight and status
    pub fn from_conf(conf: CrawlerConf, author: impl Into<String>, now: i64) -> Self {
        Self {
            id: 0,
            crawler_name: conf.crawler_name.clone(),
            weight: conf.weight,
            status: conf.status,
            conf,
            create_time: now,
            modify_time: now,
            author: author.into(),
        }
    }

    /// Whether registration should activate this crawler
    pub fn is_active(&self) -> bool {
        self.status == CrawlerStatus::Enabled && self.weight > 0
    }
}

/// Dedup marker for a URL that has been seeded once
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LinkRecord {
    pub url: String,
    pub first_access_time: i64,
    pub last_access_time: i64,
    pub count: u32,
}
