//! End-to-end crawl tests against wiremock servers

use std::sync::Arc;
use sumi_loom::config::{parse_crawler_conf, ControllerConfig, CrawlerConf, DownloaderConfig, UserAgentConfig};
use sumi_loom::controller::{Clock, Controller, ManualClock, WorkOutcome};
use sumi_loom::crawler::{CrawlerRuntime, HttpRuntimeFactory};
use sumi_loom::parser::ParserRegistry;
use sumi_loom::storage::{SqliteStorage, Storage, TaskTable};
use sumi_loom::{CrawlerItem, LoomError, Task, TaskState};
use wiremock::matchers::{header_exists, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const NOW: i64 = 1_700_000_000;

fn user_agent() -> UserAgentConfig {
    UserAgentConfig {
        crawler_name: "LoomBot".to_string(),
        crawler_version: "1.0.0".to_string(),
        contact_url: "https://example.com/contact".to_string(),
        contact_email: "test@example.com".to_string(),
    }
}

fn factory(storage: Arc<SqliteStorage>, downloader: DownloaderConfig) -> HttpRuntimeFactory {
    let storage: Arc<dyn Storage> = storage;
    let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(NOW));
    HttpRuntimeFactory::new(
        ParserRegistry::with_defaults(),
        &user_agent(),
        &downloader,
        storage,
        clock,
    )
    .expect("Failed to build runtime factory")
}

/// Index page links to articles; articles carry a title and a modification date
fn site_conf(base_url: &str) -> CrawlerConf {
    let json = format!(
        r#"{{
            "crawler_type": "navigation",
            "crawler_name": "news",
            "start_urls": ["{base_url}/"],
            "start_rule_name": "index",
            "rules": {{
                "index": {{
                    "parser_type": "html",
                    "revisit_interval": 60,
                    "rules": {{
                        "root": [
                            {{"rule_type": "url", "item_key": "article", "selector": "a.story"}},
                            {{"rule_type": "string", "item_key": "last_modified_", "selector": "meta[name=modified]", "attr": "content"}}
                        ]
                    }}
                }},
                "article": {{
                    "parser_type": "html",
                    "rules": {{
                        "root": [
                            {{"rule_type": "string", "item_key": "title", "selector": "h1"}}
                        ]
                    }}
                }}
            }}
        }}"#
    );
    parse_crawler_conf(&json).unwrap()
}

async fn mount_site(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(
                    r#"<html><head><meta name="modified" content="2023-11-14"></head><body>
                    <a class="story" href="/story/1">One</a>
                    <a class="story" href="/story/2">Two</a>
                    <a href="/about">About</a>
                    </body></html>"#,
                )
                .insert_header("content-type", "text/html; charset=utf-8"),
        )
        .mount(server)
        .await;

    for id in [1, 2] {
        Mock::given(method("GET"))
            .and(path(format!("/story/{}", id)))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(format!("<html><body><h1> Story {} </h1></body></html>", id))
                    .insert_header("content-type", "text/html"),
            )
            .mount(server)
            .await;
    }
}

#[tokio::test]
async fn test_crawl_index_and_articles() {
    let server = MockServer::start().await;
    let base_url = server.uri();
    mount_site(&server).await;

    let storage = Arc::new(SqliteStorage::new_in_memory().unwrap());
    let clock = Arc::new(ManualClock::new(NOW));
    let registry = ParserRegistry::with_defaults();
    let dyn_storage: Arc<dyn Storage> = storage.clone();
    let dyn_clock: Arc<dyn Clock> = clock.clone();
    let runtimes = HttpRuntimeFactory::new(
        registry.clone(),
        &user_agent(),
        &DownloaderConfig::default(),
        dyn_storage.clone(),
        dyn_clock.clone(),
    )
    .unwrap();
    let controller = Controller::new(
        ControllerConfig::new(1, ":memory:"),
        dyn_storage,
        Arc::new(runtimes),
        registry,
        dyn_clock,
    )
    .unwrap();
    controller.init().await.unwrap();

    let conf = site_conf(&base_url);
    controller
        .register_crawler(CrawlerItem::from_conf(conf, "tests", NOW), true)
        .await
        .unwrap();

    let outcome = controller.work_once().await.unwrap();
    assert!(matches!(
        outcome,
        WorkOutcome::Finished { state: TaskState::Rearmed, children: 2, items: 1, .. }
    ));

    for _ in 0..2 {
        let outcome = controller.work_once().await.unwrap();
        assert!(matches!(
            outcome,
            WorkOutcome::Finished { state: TaskState::Completed, items: 1, .. }
        ));
    }

    assert_eq!(
        controller.work_once().await.unwrap(),
        WorkOutcome::QueueEmpty {
            crawler: "news".to_string()
        }
    );
    assert_eq!(storage.count_items(Some("news")).unwrap(), 3);
    assert_eq!(storage.count_tasks(TaskTable::Running, None).unwrap(), 0);
    assert_eq!(storage.count_tasks(TaskTable::Crontab, None).unwrap(), 1);

    controller.finish().await;
}

#[tokio::test]
async fn test_process_builds_items_and_children() {
    let server = MockServer::start().await;
    let base_url = server.uri();
    mount_site(&server).await;

    let storage = Arc::new(SqliteStorage::new_in_memory().unwrap());
    let crawler = factory(storage, DownloaderConfig::default())
        .build_http(&site_conf(&base_url))
        .unwrap();

    let processed = crawler.test_run().await.unwrap();

    let children: Vec<_> = processed
        .tasks
        .iter()
        .map(|t| (t.crawler_name.as_str(), t.rule_name.as_str(), t.url.clone()))
        .collect();
    assert_eq!(
        children,
        vec![
            ("news", "article", format!("{}/story/1", base_url)),
            ("news", "article", format!("{}/story/2", base_url)),
        ]
    );

    assert_eq!(processed.items.len(), 1);
    let item = &processed.items[0];
    assert_eq!(item["last_modified_"], "2023-11-14");
    assert_eq!(item["from_url_"], format!("{}/", base_url).as_str());
    assert_eq!(item["from_parser_name_"], "index");
    assert_eq!(item["crawl_time_"], "2023-11-14 22:13:20");
}

#[tokio::test]
async fn test_unchanged_page_drops_children() {
    let server = MockServer::start().await;
    let base_url = server.uri();
    mount_site(&server).await;

    let storage = Arc::new(SqliteStorage::new_in_memory().unwrap());
    let crawler = factory(storage, DownloaderConfig::default())
        .build_http(&site_conf(&base_url))
        .unwrap();

    // Last visited after the page's modification date
    let mut task = Task::new("news", "index", format!("{}/", base_url));
    task.last_access_time = NOW;
    let processed = crawler.process(&task).await.unwrap();
    assert!(processed.tasks.is_empty());
    assert_eq!(processed.items.len(), 1);

    // Last visited before it
    task.last_access_time = 1_600_000_000;
    let processed = crawler.process(&task).await.unwrap();
    assert_eq!(processed.tasks.len(), 2);
}

#[tokio::test]
async fn test_http_error_abandons_task() {
    let server = MockServer::start().await;
    let base_url = server.uri();

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let storage = Arc::new(SqliteStorage::new_in_memory().unwrap());
    let crawler = factory(storage.clone(), DownloaderConfig::default())
        .build_http(&site_conf(&base_url))
        .unwrap();

    let result = crawler.test_run().await;
    assert!(matches!(result, Err(LoomError::HttpStatus { status: 503, .. })));
    assert_eq!(storage.count_items(None).unwrap(), 0);
}

#[tokio::test]
async fn test_oversized_body_rejected() {
    let server = MockServer::start().await;
    let base_url = server.uri();
    mount_site(&server).await;

    let storage = Arc::new(SqliteStorage::new_in_memory().unwrap());
    let downloader = DownloaderConfig {
        max_body_bytes: Some(64),
        ..DownloaderConfig::default()
    };
    let crawler = factory(storage, downloader)
        .build_http(&site_conf(&base_url))
        .unwrap();

    let result = crawler.test_run().await;
    assert!(matches!(result, Err(LoomError::BodyTooLarge { limit: 64, .. })));
}

#[tokio::test]
async fn test_json_api_whole_page_items() {
    let server = MockServer::start().await;
    let base_url = server.uri();

    Mock::given(method("GET"))
        .and(path("/api/latest"))
        .and(header_exists("user-agent"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(r#"[{"id": 1, "title": "One"}, {"id": 2, "title": "Two"}, 3]"#)
                .insert_header("content-type", "application/json"),
        )
        .mount(&server)
        .await;

    let json = format!(
        r#"{{
            "crawler_type": "navigation",
            "crawler_name": "api",
            "start_urls": ["{base_url}/api/latest"],
            "start_rule_name": "latest",
            "rules": {{
                "latest": {{"parser_type": "json", "no_default_fields": true}}
            }}
        }}"#
    );
    let conf = parse_crawler_conf(&json).unwrap();

    let storage = Arc::new(SqliteStorage::new_in_memory().unwrap());
    let crawler = factory(storage.clone(), DownloaderConfig::default())
        .build_http(&conf)
        .unwrap();

    let task = Task::new("api", "latest", format!("{}/api/latest", base_url));
    let processed = crawler.process(&task).await.unwrap();
    assert!(processed.tasks.is_empty());
    assert_eq!(processed.items.len(), 2);
    assert_eq!(processed.items[1]["title"], "Two");
    assert!(!processed.items[0].contains_key("from_url_"));

    for item in &processed.items {
        crawler.save(&task, item).await.unwrap();
    }
    assert_eq!(storage.count_items(Some("api")).unwrap(), 2);

    crawler.close().await;
    assert!(matches!(
        crawler.process(&task).await,
        Err(LoomError::Processing { .. })
    ));
}
