//! Crawler module: the per-crawler processing side
//!
//! This module contains:
//! - The runtime contract the controller drives (`CrawlerRuntime`, `RuntimeFactory`)
//! - The durable FIFO queue handle each active crawler owns
//! - HTTP downloading
//! - The default runtime, which downloads, extracts and saves items

mod fetcher;
mod queue;
mod runtime;

pub use fetcher::{build_http_client, Downloader, HttpRequest, HttpResponse};
pub use queue::{QueueError, TaskQueue};
pub use runtime::{
    add_default_fields, parse_timestamp, start_urls, CrawlerRuntime, HttpCrawler,
    HttpRuntimeFactory, Processed, RuntimeFactory, LAST_MODIFIED_FIELD,
};
