//! Registration, task lifecycle and sweep tests with a scripted runtime

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use sumi_loom::config::{parse_crawler_conf, ControllerConfig, CrawlerConf, MAX_REVISIT_INTERVAL};
use sumi_loom::controller::{Clock, Controller, ManualClock, WorkOutcome};
use sumi_loom::crawler::{CrawlerRuntime, Processed, RuntimeFactory};
use sumi_loom::parser::ParserRegistry;
use sumi_loom::storage::{SqliteStorage, Storage, TaskTable};
use sumi_loom::{CrawlerItem, Item, LoomError, Task, TaskState};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

const START_URL: &str = "https://news.example.com/";

/// Shared script for every runtime built by the factory
#[derive(Default)]
struct Script {
    processed: Mutex<Vec<String>>,
    failing: Mutex<HashSet<String>>,
    children: Mutex<HashMap<String, Vec<Task>>>,
    closed: AtomicUsize,
    /// When set, `process` signals `entered` and waits for `release`
    gated: AtomicBool,
    entered: Notify,
    release: Notify,
}

impl Script {
    fn fail(&self, url: &str) {
        self.failing.lock().unwrap().insert(url.to_string());
    }

    fn recover(&self, url: &str) {
        self.failing.lock().unwrap().remove(url);
    }

    fn set_children(&self, url: &str, tasks: Vec<Task>) {
        self.children.lock().unwrap().insert(url.to_string(), tasks);
    }

    fn gate(&self) {
        self.gated.store(true, Ordering::SeqCst);
    }

    fn processed(&self) -> Vec<String> {
        self.processed.lock().unwrap().clone()
    }
}

struct ScriptedRuntime {
    script: Arc<Script>,
}

#[async_trait]
impl CrawlerRuntime for ScriptedRuntime {
    async fn process(&self, task: &Task) -> sumi_loom::Result<Processed> {
        if self.script.gated.load(Ordering::SeqCst) {
            self.script.entered.notify_one();
            self.script.release.notified().await;
        }
        self.script.processed.lock().unwrap().push(task.url.clone());
        if self.script.failing.lock().unwrap().contains(&task.url) {
            return Err(LoomError::Processing {
                url: task.url.clone(),
                message: "scripted failure".to_string(),
            });
        }

        let tasks = self
            .script
            .children
            .lock()
            .unwrap()
            .get(&task.url)
            .cloned()
            .unwrap_or_default();
        let mut item = Item::new();
        item.insert("title".to_string(), task.url.clone().into());
        Ok(Processed {
            tasks,
            items: vec![item],
        })
    }

    async fn save(&self, _task: &Task, _item: &Item) -> sumi_loom::Result<()> {
        Ok(())
    }

    async fn close(&self) {
        self.script.closed.fetch_add(1, Ordering::SeqCst);
    }
}

struct ScriptedFactory {
    script: Arc<Script>,
}

impl RuntimeFactory for ScriptedFactory {
    fn build(&self, _conf: &CrawlerConf) -> sumi_loom::Result<Arc<dyn CrawlerRuntime>> {
        Ok(Arc::new(ScriptedRuntime {
            script: self.script.clone(),
        }))
    }
}

struct Harness {
    controller: Arc<Controller>,
    storage: Arc<SqliteStorage>,
    clock: Arc<ManualClock>,
    script: Arc<Script>,
}

fn controller_config() -> ControllerConfig {
    let mut config = ControllerConfig::new(2, ":memory:");
    config.sweep_interval = 1;
    config.idle_backoff = 10;
    config
}

fn build_controller(storage: Arc<SqliteStorage>, clock: Arc<ManualClock>, script: Arc<Script>) -> Controller {
    let storage: Arc<dyn Storage> = storage;
    let clock: Arc<dyn Clock> = clock;
    Controller::new(
        controller_config(),
        storage,
        Arc::new(ScriptedFactory { script }),
        ParserRegistry::with_defaults(),
        clock,
    )
    .expect("valid controller config")
}

async fn harness() -> Harness {
    let storage = Arc::new(SqliteStorage::new_in_memory().unwrap());
    let clock = Arc::new(ManualClock::new(0));
    let script = Arc::new(Script::default());
    let controller = build_controller(storage.clone(), clock.clone(), script.clone());
    controller.init().await.unwrap();

    Harness {
        controller: Arc::new(controller),
        storage,
        clock,
        script,
    }
}

/// A navigation crawler with one start URL; the index rule revisits every `revisit` seconds
fn news_conf(name: &str, weight: i64, revisit: i64) -> CrawlerConf {
    let json = format!(
        r#"{{
            "crawler_type": "navigation",
            "crawler_name": "{name}",
            "start_urls": ["{START_URL}"],
            "start_rule_name": "index",
            "weight": {weight},
            "rules": {{
                "index": {{
                    "parser_type": "html",
                    "revisit_interval": {revisit},
                    "rules": {{
                        "root": [
                            {{"rule_type": "url", "item_key": "article", "selector": "a.story", "attr": "href"}}
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

fn item(conf: CrawlerConf) -> CrawlerItem {
    CrawlerItem::from_conf(conf, "tests", 0)
}

#[tokio::test]
async fn test_seed_revisit_cycle() {
    let h = harness().await;

    h.controller
        .register_crawler(item(news_conf("news", 10, 60)), true)
        .await
        .unwrap();

    assert_eq!(h.storage.queue_len("news").unwrap(), 1);
    assert!(h.storage.has_link(START_URL).unwrap());
    assert_eq!(h.controller.scheduler().total_weight(), 10);

    // Processed at t=0: re-armed one interval later
    let outcome = h.controller.work_once().await.unwrap();
    assert!(matches!(
        outcome,
        WorkOutcome::Finished { state: TaskState::Rearmed, ref url, items: 1, .. } if url == START_URL
    ));
    assert_eq!(h.storage.count_tasks(TaskTable::Running, None).unwrap(), 0);

    let crontab = h.storage.due_tasks(TaskTable::Crontab, i64::MAX).unwrap();
    assert_eq!(crontab.len(), 1);
    assert_eq!(crontab[0].next_exec_time, 60);

    // Not yet due
    h.clock.set(59);
    assert_eq!(h.controller.cron_sweep().unwrap().requeued, 0);
    assert_eq!(h.storage.queue_len("news").unwrap(), 0);

    h.clock.set(61);
    let report = h.controller.cron_sweep().unwrap();
    assert_eq!(report.requeued, 1);
    assert_eq!(h.storage.queue_len("news").unwrap(), 1);

    let crontab = h.storage.due_tasks(TaskTable::Crontab, i64::MAX).unwrap();
    assert_eq!(crontab.len(), 1);
    assert_eq!(crontab[0].next_exec_time, 120);
    assert_eq!(crontab[0].last_access_time, 61);

    // The requeued task carries the previous visit time
    let outcome = h.controller.work_once().await.unwrap();
    assert!(matches!(outcome, WorkOutcome::Finished { state: TaskState::Rearmed, .. }));
    assert_eq!(h.script.processed(), vec![START_URL, START_URL]);
}

#[tokio::test]
async fn test_stalled_task_retried_after_budget() {
    let h = harness().await;
    h.script.fail(START_URL);

    h.controller
        .register_crawler(item(news_conf("news", 1, 0)), true)
        .await
        .unwrap();

    let outcome = h.controller.work_once().await.unwrap();
    assert!(matches!(outcome, WorkOutcome::Finished { state: TaskState::Abandoned, .. }));

    let running = h.storage.due_tasks(TaskTable::Running, i64::MAX).unwrap();
    assert_eq!(running.len(), 1);
    assert_eq!(running[0].next_exec_time, 300);
    assert_eq!(h.storage.queue_len("news").unwrap(), 0);

    h.clock.set(299);
    assert_eq!(h.controller.retry_sweep().unwrap().requeued, 0);

    h.clock.set(300);
    let report = h.controller.retry_sweep().unwrap();
    assert_eq!(report.requeued, 1);
    assert_eq!(h.storage.count_tasks(TaskTable::Running, None).unwrap(), 0);
    assert_eq!(h.storage.queue_len("news").unwrap(), 1);

    h.script.recover(START_URL);
    let outcome = h.controller.work_once().await.unwrap();
    assert!(matches!(outcome, WorkOutcome::Finished { state: TaskState::Completed, .. }));
    assert_eq!(h.storage.count_tasks(TaskTable::Running, None).unwrap(), 0);
}

#[tokio::test]
async fn test_reregistration_does_not_reseed() {
    let h = harness().await;

    h.controller
        .register_crawler(item(news_conf("news", 5, 60)), true)
        .await
        .unwrap();
    h.controller.work_once().await.unwrap();
    assert_eq!(h.storage.queue_len("news").unwrap(), 0);

    h.controller
        .register_crawler(item(news_conf("news", 7, 60)), false)
        .await
        .unwrap();

    assert_eq!(h.storage.queue_len("news").unwrap(), 0);
    assert_eq!(h.storage.get_link(START_URL).unwrap().unwrap().count, 1);
    assert_eq!(h.controller.scheduler().total_weight(), 7);
    assert_eq!(h.controller.scheduler().len(), 1);
    // The replaced instance was closed
    assert_eq!(h.script.closed.load(Ordering::SeqCst), 1);

    // The standing crontab record still fires for the new instance
    h.clock.set(61);
    let report = h.controller.cron_sweep().unwrap();
    assert_eq!(report.requeued, 1);
    assert_eq!(h.storage.queue_len("news").unwrap(), 1);

    let crontab = h.storage.due_tasks(TaskTable::Crontab, i64::MAX).unwrap();
    assert_eq!(crontab.len(), 1);
    assert_eq!(crontab[0].next_exec_time, 120);
}

#[tokio::test]
async fn test_update_during_processing_keeps_children() {
    let h = harness().await;
    h.script.gate();

    let mut seed_child = Task::new("", "index", "https://news.example.com/world/");
    seed_child.is_seed = true;
    h.script.set_children(START_URL, vec![seed_child]);

    h.controller
        .register_crawler(item(news_conf("news", 1, 60)), true)
        .await
        .unwrap();

    let controller = h.controller.clone();
    let worker = tokio::spawn(async move { controller.work_once().await });
    h.script.entered.notified().await;

    // Replaces the instance the worker is processing for
    h.controller
        .register_crawler(item(news_conf("news", 2, 60)), false)
        .await
        .unwrap();
    h.script.release.notify_one();

    let outcome = worker.await.unwrap().unwrap();
    assert!(matches!(outcome, WorkOutcome::Finished { children: 1, .. }));
    assert!(h.storage.has_link("https://news.example.com/world/").unwrap());
    assert_eq!(h.storage.queue_len("news").unwrap(), 1);

    // The successor instance picks the child up
    h.script.gated.store(false, Ordering::SeqCst);
    let outcome = h.controller.work_once().await.unwrap();
    assert!(matches!(
        outcome,
        WorkOutcome::Finished { ref url, .. } if url == "https://news.example.com/world/"
    ));
}

#[tokio::test]
async fn test_child_of_unregistered_crawler_stays_queued() {
    let h = harness().await;
    h.script.gate();

    let mut seed_child = Task::new("", "index", "https://news.example.com/world/");
    seed_child.is_seed = true;
    h.script.set_children(START_URL, vec![seed_child]);

    h.controller
        .register_crawler(item(news_conf("news", 1, 0)), true)
        .await
        .unwrap();

    let controller = h.controller.clone();
    let worker = tokio::spawn(async move { controller.work_once().await });
    h.script.entered.notified().await;
    h.controller.unregister_crawler("news").await.unwrap();
    h.script.release.notify_one();

    let outcome = worker.await.unwrap().unwrap();
    assert!(matches!(outcome, WorkOutcome::Finished { children: 1, .. }));
    assert_eq!(h.storage.queue_len("news").unwrap(), 1);
}

#[tokio::test]
async fn test_oversized_revisit_interval_rejected() {
    let h = harness().await;
    h.clock.set(1_000);

    for interval in [i64::MAX, MAX_REVISIT_INTERVAL + 1] {
        let result = h
            .controller
            .register_crawler(item(news_conf("news", 1, interval)), true)
            .await;
        assert!(matches!(
            result,
            Err(LoomError::Config(sumi_loom::ConfigError::RevisitIntervalRange { .. }))
        ));
    }
    assert_eq!(h.storage.count_crawlers(None).unwrap(), 0);

    h.controller
        .register_crawler(item(news_conf("news", 1, MAX_REVISIT_INTERVAL)), true)
        .await
        .unwrap();
    let crontab = h.storage.due_tasks(TaskTable::Crontab, i64::MAX).unwrap();
    assert_eq!(crontab[0].next_exec_time, 1_000 + MAX_REVISIT_INTERVAL);
}

#[tokio::test]
async fn test_name_errors() {
    let h = harness().await;

    h.controller
        .register_crawler(item(news_conf("news", 1, 0)), true)
        .await
        .unwrap();

    let duplicate = h
        .controller
        .register_crawler(item(news_conf("news", 1, 0)), true)
        .await;
    assert!(matches!(duplicate, Err(LoomError::DuplicateName(name)) if name == "news"));

    let missing = h
        .controller
        .register_crawler(item(news_conf("blog", 1, 0)), false)
        .await;
    assert!(matches!(missing, Err(LoomError::NameNotFound(name)) if name == "blog"));

    let missing = h.controller.unregister_crawler("blog").await;
    assert!(matches!(missing, Err(LoomError::NameNotFound(_))));
}

#[tokio::test]
async fn test_invalid_weight_rejected() {
    let h = harness().await;

    let result = h
        .controller
        .register_crawler(item(news_conf("news", 1001, 0)), true)
        .await;
    assert!(matches!(result, Err(LoomError::Config(_))));
    assert_eq!(h.storage.count_crawlers(None).unwrap(), 0);
}

#[tokio::test]
async fn test_unregister_keeps_queued_work() {
    let h = harness().await;

    h.controller
        .register_crawler(item(news_conf("news", 1, 0)), true)
        .await
        .unwrap();
    h.controller.unregister_crawler("news").await.unwrap();

    assert!(h.controller.active("news").is_none());
    assert!(h.controller.scheduler().is_empty());
    assert_eq!(h.storage.count_crawlers(None).unwrap(), 0);
    assert_eq!(h.storage.queue_len("news").unwrap(), 1);
    assert_eq!(h.controller.work_once().await.unwrap(), WorkOutcome::NoCrawlers);

    // Registering the name again resumes the queue without reseeding
    h.controller
        .register_crawler(item(news_conf("news", 1, 0)), true)
        .await
        .unwrap();
    assert_eq!(h.storage.queue_len("news").unwrap(), 1);
}

#[tokio::test]
async fn test_disabled_crawler_is_stored_but_idle() {
    let h = harness().await;

    let mut conf = news_conf("news", 1, 0);
    conf.status = sumi_loom::CrawlerStatus::Disabled;
    h.controller.register_crawler(item(conf), true).await.unwrap();

    assert_eq!(h.storage.count_crawlers(None).unwrap(), 1);
    assert!(h.controller.active_names().is_empty());
    assert_eq!(h.storage.queue_len("news").unwrap(), 0);
    assert_eq!(h.controller.work_once().await.unwrap(), WorkOutcome::NoCrawlers);
}

#[tokio::test]
async fn test_children_are_scheduled_and_deduplicated() {
    let h = harness().await;
    h.clock.set(1_000);

    let mut seed_child = Task::new("", "index", "https://news.example.com/world/");
    seed_child.is_seed = true;
    let article = Task::new("", "article", "https://news.example.com/story/1");
    h.script.set_children(
        START_URL,
        vec![seed_child.clone(), seed_child, article],
    );

    h.controller
        .register_crawler(item(news_conf("news", 1, 60)), true)
        .await
        .unwrap();

    let outcome = h.controller.work_once().await.unwrap();
    assert!(matches!(outcome, WorkOutcome::Finished { children: 2, .. }));
    assert_eq!(h.storage.queue_len("news").unwrap(), 2);
    assert!(h.storage.has_link("https://news.example.com/world/").unwrap());
    assert!(!h.storage.has_link("https://news.example.com/story/1").unwrap());

    // Start URL plus the new seed, each revisited on the index interval
    let crontab = h.storage.due_tasks(TaskTable::Crontab, i64::MAX).unwrap();
    assert_eq!(crontab.len(), 2);
    assert!(crontab.iter().all(|t| t.next_exec_time == 1_060 && t.crawler_name == "news"));
}

#[tokio::test]
async fn test_recovery_after_restart() {
    let storage = Arc::new(SqliteStorage::new_in_memory().unwrap());
    let clock = Arc::new(ManualClock::new(0));
    let script = Arc::new(Script::default());

    let first = build_controller(storage.clone(), clock.clone(), script.clone());
    first.init().await.unwrap();
    first
        .register_crawler(item(news_conf("news", 3, 60)), true)
        .await
        .unwrap();
    let mut disabled = news_conf("archive", 1, 0);
    disabled.status = sumi_loom::CrawlerStatus::Disabled;
    first.register_crawler(item(disabled), true).await.unwrap();
    first.finish().await;

    let second = build_controller(storage.clone(), clock, script);
    assert_eq!(second.init().await.unwrap(), 1);
    assert_eq!(second.active_names(), vec!["news".to_string()]);
    assert_eq!(second.scheduler().total_weight(), 3);

    // Seen start URL is not queued twice
    assert_eq!(storage.queue_len("news").unwrap(), 1);
}

#[tokio::test]
async fn test_operations_require_initialization() {
    let storage = Arc::new(SqliteStorage::new_in_memory().unwrap());
    let controller = build_controller(
        storage,
        Arc::new(ManualClock::new(0)),
        Arc::new(Script::default()),
    );

    let result = controller
        .register_crawler(item(news_conf("news", 1, 0)), true)
        .await;
    assert!(matches!(result, Err(LoomError::NotInitialized)));

    controller.init().await.unwrap();
    controller
        .register_crawler(item(news_conf("news", 1, 0)), true)
        .await
        .unwrap();
    controller.finish().await;

    assert!(!controller.is_initialized());
    assert!(matches!(controller.work_once().await, Err(LoomError::NotInitialized)));
    assert!(matches!(controller.cron_sweep(), Err(LoomError::NotInitialized)));
    assert!(matches!(controller.retry_sweep(), Err(LoomError::NotInitialized)));
    assert!(matches!(
        controller.unregister_crawler("news").await,
        Err(LoomError::NotInitialized)
    ));
}

#[tokio::test]
async fn test_run_until_cancelled() {
    let h = harness().await;

    h.controller
        .register_crawler(item(news_conf("news", 1, 0)), true)
        .await
        .unwrap();

    let token = CancellationToken::new();
    let handle = tokio::spawn(h.controller.clone().run(token.clone()));

    let processed = tokio::time::timeout(Duration::from_secs(5), async {
        while h.script.processed().is_empty() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(processed.is_ok(), "worker never processed the seed");

    token.cancel();
    let joined = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("loops did not stop after cancellation")
        .unwrap();
    assert!(joined.is_ok());

    assert!(!h.controller.is_initialized());
    assert!(h.controller.active_names().is_empty());
    assert_eq!(h.script.processed(), vec![START_URL]);
}
