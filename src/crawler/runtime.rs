//! Crawler runtime contract and the default HTTP runtime

use crate::config::{read_urls_file, CrawlerConf, DownloaderConfig, UserAgentConfig};
use crate::controller::Clock;
use crate::crawler::fetcher::{Downloader, HttpRequest};
use crate::parser::{Parser, ParserRegistry};
use crate::state::{Item, Task};
use crate::storage::Storage;
use crate::{ConfigError, LoomError, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// Item field holding the source page's modification time
pub const LAST_MODIFIED_FIELD: &str = "last_modified_";

/// Format of the `crawl_time_` item field
const CRAWL_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Result of processing one task
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Processed {
    pub tasks: Vec<Task>,
    pub items: Vec<Item>,
}

/// A registered crawler's processing capability
///
/// Owned by the controller for the crawler's registered lifetime.
#[async_trait]
pub trait CrawlerRuntime: Send + Sync {
    /// Fetches the task's URL and runs its rule
    async fn process(&self, task: &Task) -> Result<Processed>;

    /// Persists one extracted item
    async fn save(&self, task: &Task, item: &Item) -> Result<()>;

    /// Releases resources; later calls to `process` fail
    async fn close(&self);
}

/// Builds runtimes for validated crawler configurations
pub trait RuntimeFactory: Send + Sync {
    fn build(&self, conf: &CrawlerConf) -> Result<Arc<dyn CrawlerRuntime>>;
}

/// Default runtime: download, extract with the rule's parser, save to the items table
pub struct HttpCrawler {
    conf: CrawlerConf,
    parsers: HashMap<String, Arc<dyn Parser>>,
    downloader: Arc<Downloader>,
    storage: Arc<dyn Storage>,
    clock: Arc<dyn Clock>,
    closed: AtomicBool,
}

impl HttpCrawler {
    /// Creates a runtime, resolving each rule's parser once
    pub fn new(
        conf: CrawlerConf,
        registry: &ParserRegistry,
        downloader: Arc<Downloader>,
        storage: Arc<dyn Storage>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let mut parsers = HashMap::new();
        for (name, rule) in &conf.rules {
            let parser =
                registry
                    .get(&rule.parser_type)
                    .ok_or_else(|| ConfigError::UnknownParserType {
                        rule: name.clone(),
                        parser_type: rule.parser_type.clone(),
                    })?;
            parsers.insert(name.clone(), parser);
        }

        Ok(Self {
            conf,
            parsers,
            downloader,
            storage,
            clock,
            closed: AtomicBool::new(false),
        })
    }

    pub fn conf(&self) -> &CrawlerConf {
        &self.conf
    }

    /// Start URLs from the configuration or its urls file
    pub fn start_urls(&self) -> Result<Vec<String>> {
        start_urls(&self.conf)
    }

    /// Runs the start rule against the first start URL without touching any store
    pub async fn test_run(&self) -> Result<Processed> {
        let urls = self.start_urls()?;
        let url = urls.first().ok_or(ConfigError::EmptyStartUrls)?;
        let task = Task::new(
            self.conf.crawler_name.clone(),
            self.conf.start_rule_name.clone(),
            url.clone(),
        );
        info!(crawler = %self.conf.crawler_name, url = %url, "Test run");
        self.process(&task).await
    }
}

#[async_trait]
impl CrawlerRuntime for HttpCrawler {
    async fn process(&self, task: &Task) -> Result<Processed> {
        if self.closed.load(Ordering::Acquire) {
            return Err(LoomError::Processing {
                url: task.url.clone(),
                message: format!("crawler {} is closed", self.conf.crawler_name),
            });
        }

        let (rule, parser) = match (
            self.conf.rules.get(&task.rule_name),
            self.parsers.get(&task.rule_name),
        ) {
            (Some(rule), Some(parser)) => (rule, parser),
            _ => {
                return Err(LoomError::Processing {
                    url: task.url.clone(),
                    message: format!("no rule named {}", task.rule_name),
                })
            }
        };

        let response = self.downloader.download(&HttpRequest::get(&task.url)).await?;
        let output = parser
            .parse(&response.text, &response.url, rule)
            .map_err(|message| LoomError::Parse {
                url: task.url.clone(),
                message,
            })?;

        let now = self.clock.now();
        let mut items = output.items;
        if !rule.no_default_fields {
            add_default_fields(&mut items, &task.url, &task.rule_name, now);
        }

        let mut tasks = output.tasks;
        let last_modified = match items.first().and_then(|item| item.get(LAST_MODIFIED_FIELD)) {
            Some(value) => parse_timestamp(value).ok_or_else(|| LoomError::Processing {
                url: task.url.clone(),
                message: format!("unparseable {}: {}", LAST_MODIFIED_FIELD, value),
            })?,
            None => now,
        };
        if last_modified <= task.last_access_time {
            debug!(url = %task.url, last_modified, "No new content, dropping child tasks");
            tasks.clear();
        }

        for child in &mut tasks {
            child.crawler_name = self.conf.crawler_name.clone();
        }

        Ok(Processed { tasks, items })
    }

    async fn save(&self, task: &Task, item: &Item) -> Result<()> {
        self.storage
            .save_item(&self.conf.crawler_name, &task.url, item, self.clock.now())?;
        Ok(())
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

/// Builds [`HttpCrawler`] runtimes sharing one downloader
pub struct HttpRuntimeFactory {
    registry: ParserRegistry,
    downloader: Arc<Downloader>,
    storage: Arc<dyn Storage>,
    clock: Arc<dyn Clock>,
}

impl HttpRuntimeFactory {
    pub fn new(
        registry: ParserRegistry,
        user_agent: &UserAgentConfig,
        downloader: &DownloaderConfig,
        storage: Arc<dyn Storage>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        Ok(Self {
            registry,
            downloader: Arc::new(Downloader::new(user_agent, downloader)?),
            storage,
            clock,
        })
    }

    /// Builds a concrete runtime, for callers that need `test_run`
    pub fn build_http(&self, conf: &CrawlerConf) -> Result<HttpCrawler> {
        HttpCrawler::new(
            conf.clone(),
            &self.registry,
            self.downloader.clone(),
            self.storage.clone(),
            self.clock.clone(),
        )
    }
}

impl RuntimeFactory for HttpRuntimeFactory {
    fn build(&self, conf: &CrawlerConf) -> Result<Arc<dyn CrawlerRuntime>> {
        Ok(Arc::new(self.build_http(conf)?))
    }
}

/// Start URLs of a crawler: `start_urls` for navigation crawlers, the urls
/// file for url_set crawlers
pub fn start_urls(conf: &CrawlerConf) -> Result<Vec<String>> {
    match conf.crawler_type.as_str() {
        "url_set" => Ok(read_urls_file(Path::new(&conf.urls_file))?),
        _ => Ok(conf.start_urls.clone()),
    }
}

/// Adds `from_url_`, `from_parser_name_` and `crawl_time_` to every item
pub fn add_default_fields(items: &mut [Item], url: &str, rule_name: &str, now: i64) {
    let crawl_time = DateTime::from_timestamp(now, 0)
        .map(|t| t.format(CRAWL_TIME_FORMAT).to_string())
        .unwrap_or_default();
    for item in items {
        item.insert("from_url_".to_string(), Value::from(url));
        item.insert("from_parser_name_".to_string(), Value::from(rule_name));
        item.insert("crawl_time_".to_string(), Value::from(crawl_time.as_str()));
    }
}

/// Reads a timestamp as unix seconds
///
/// Accepts integers, RFC 3339, RFC 2822, `YYYY-MM-DD HH:MM:SS` (UTC) and
/// `YYYY-MM-DD`.
pub fn parse_timestamp(value: &Value) -> Option<i64> {
    if let Some(seconds) = value.as_i64() {
        return Some(seconds);
    }
    let text = value.as_str()?.trim();
    if let Ok(seconds) = text.parse::<i64>() {
        return Some(seconds);
    }
    if let Ok(t) = DateTime::parse_from_rfc3339(text) {
        return Some(t.timestamp());
    }
    if let Ok(t) = DateTime::parse_from_rfc2822(text) {
        return Some(t.timestamp());
    }
    if let Ok(t) = NaiveDateTime::parse_from_str(text, CRAWL_TIME_FORMAT) {
        return Some(t.and_utc().timestamp());
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|t| t.and_utc().timestamp())
}
