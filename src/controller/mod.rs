//! Controller: crawler registry, task lifecycle and recovery
//!
//! The controller owns the scheduler, the store handle and every active
//! crawler runtime. Workers and sweep loops share one `Arc<Controller>`.
//!
//! # Components
//!
//! - registration and startup recovery (this module)
//! - per-task lifecycle driven by workers (`lifecycle`)
//! - cron and retry sweeps (`sweep`)
//! - worker pool and loop supervision (`worker`)

mod clock;
mod lifecycle;
mod sweep;
mod worker;

pub use clock::{Clock, ManualClock, SystemClock};
pub use lifecycle::WorkOutcome;
pub use sweep::{next_revisit, SweepReport};

use crate::config::{validate_controller_config, validate_crawler_item, ControllerConfig, CrawlerConf};
use crate::crawler::{start_urls, CrawlerRuntime, RuntimeFactory, TaskQueue};
use crate::parser::ParserRegistry;
use crate::scheduler::Scheduler;
use crate::state::{CrawlerItem, Task};
use crate::storage::{Storage, StorageError};
use crate::{LoomError, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

/// A registered, enabled crawler with its runtime and queue
pub struct ActiveCrawler {
    pub conf: CrawlerConf,
    pub weight: i64,
    runtime: Arc<dyn CrawlerRuntime>,
    queue: TaskQueue,
}

impl ActiveCrawler {
    pub fn name(&self) -> &str {
        &self.conf.crawler_name
    }

    pub fn queue(&self) -> &TaskQueue {
        &self.queue
    }
}

/// Owns the scheduler, the store handle and the active crawlers
pub struct Controller {
    config: ControllerConfig,
    storage: Arc<dyn Storage>,
    scheduler: Scheduler,
    crawlers: RwLock<HashMap<String, Arc<ActiveCrawler>>>,
    factory: Arc<dyn RuntimeFactory>,
    registry: ParserRegistry,
    clock: Arc<dyn Clock>,
    initialized: AtomicBool,
}

impl Controller {
    /// Creates a controller
    ///
    /// # Arguments
    ///
    /// * `config` - Worker pool and sweep settings; the worker count must be in (0, 1000]
    /// * `storage` - Handle on all durable stores
    /// * `factory` - Builds a runtime for each activated crawler
    /// * `registry` - Extraction strategies used to validate crawler configurations
    /// * `clock` - Time source for deadlines and revisit schedules
    ///
    /// # Returns
    ///
    /// * `Ok(Controller)` - An uninitialized controller; call [`Controller::init`]
    /// * `Err(LoomError)` - Invalid controller configuration
    pub fn new(
        config: ControllerConfig,
        storage: Arc<dyn Storage>,
        factory: Arc<dyn RuntimeFactory>,
        registry: ParserRegistry,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        validate_controller_config(&config)?;

        Ok(Self {
            config,
            storage,
            scheduler: Scheduler::new(),
            crawlers: RwLock::new(HashMap::new()),
            factory,
            registry,
            clock,
            initialized: AtomicBool::new(false),
        })
    }

    /// Startup recovery: activates every persisted enabled crawler in persisted order
    ///
    /// A crawler that fails to activate is logged and left out; the others
    /// still start.
    ///
    /// # Returns
    ///
    /// The number of activated crawlers
    pub async fn init(&self) -> Result<usize> {
        self.initialized.store(true, Ordering::Release);

        let items = self.storage.enabled_crawlers()?;
        let mut activated = 0;
        for item in items {
            if !item.is_active() {
                continue;
            }
            let name = item.crawler_name.clone();
            let result = match validate_crawler_item(&item, &self.registry) {
                Ok(()) => self.activate(&item),
                Err(e) => Err(e.into()),
            };
            match result {
                Ok(seeded) => {
                    activated += 1;
                    tracing::info!("Recovered crawler {} ({} new seeds)", name, seeded);
                }
                Err(e) => tracing::warn!("Failed to recover crawler {}: {}", name, e),
            }
        }

        tracing::info!(
            "Controller initialized with {} active crawlers, total weight {}",
            activated,
            self.scheduler.total_weight()
        );
        Ok(activated)
    }

    fn ensure_initialized(&self) -> Result<()> {
        if self.initialized.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(LoomError::NotInitialized)
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    /// Registers a crawler, persisting it and activating it when enabled
    ///
    /// Any running instance under the same name is replaced. New registrations
    /// fail with `DuplicateName` if the name exists; updates fail with
    /// `NameNotFound` if it does not.
    ///
    /// # Returns
    ///
    /// The durable ID of the crawler item
    pub async fn register_crawler(&self, mut item: CrawlerItem, is_new: bool) -> Result<i64> {
        self.ensure_initialized()?;
        validate_crawler_item(&item, &self.registry)?;

        let now = self.clock.now();
        if is_new {
            item.create_time = now;
            item.modify_time = now;
            item.id = self.storage.insert_crawler(&item).map_err(|e| match e {
                StorageError::Duplicate(name) => LoomError::DuplicateName(name),
                other => other.into(),
            })?;
        } else {
            let existing = self
                .storage
                .get_crawler(&item.crawler_name)?
                .ok_or_else(|| LoomError::NameNotFound(item.crawler_name.clone()))?;
            item.id = existing.id;
            item.create_time = existing.create_time;
            item.modify_time = now;
            self.storage.update_crawler(&item).map_err(|e| match e {
                StorageError::NotFound(name) => LoomError::NameNotFound(name),
                other => other.into(),
            })?;
        }

        self.deactivate(&item.crawler_name).await;

        if item.is_active() {
            let seeded = self.activate(&item)?;
            tracing::info!(
                "Registered crawler {} (weight {}, {} new seeds)",
                item.crawler_name,
                item.weight,
                seeded
            );
        } else {
            tracing::info!("Registered crawler {} as {}", item.crawler_name, item.status);
        }

        Ok(item.id)
    }

    /// Stops a crawler and deletes its registration
    ///
    /// Queued rows and crontab records stay in the store; they resume if the
    /// name is registered again.
    pub async fn unregister_crawler(&self, name: &str) -> Result<()> {
        self.ensure_initialized()?;

        let was_active = self.deactivate(name).await;
        let deleted = self.storage.delete_crawler(name)?;
        if !was_active && !deleted {
            return Err(LoomError::NameNotFound(name.to_string()));
        }

        tracing::info!("Unregistered crawler {}", name);
        Ok(())
    }

    /// Builds the runtime, swaps the scheduler entry and seeds the queue
    fn activate(&self, item: &CrawlerItem) -> Result<usize> {
        let urls = start_urls(&item.conf)?;
        let runtime = self.factory.build(&item.conf)?;
        let active = Arc::new(ActiveCrawler {
            conf: item.conf.clone(),
            weight: item.weight,
            runtime,
            queue: TaskQueue::open(item.crawler_name.clone(), self.storage.clone()),
        });

        self.crawlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(item.crawler_name.clone(), active.clone());

        // Absent on first activation
        let _ = self.scheduler.remove(&item.crawler_name);
        self.scheduler.insert(item.crawler_name.clone(), item.weight);

        self.seed(&active, urls)
    }

    /// Enqueues start URLs not yet in the dedup store
    fn seed(&self, active: &ActiveCrawler, urls: Vec<String>) -> Result<usize> {
        let conf = &active.conf;
        let interval = conf.revisit_interval(&conf.start_rule_name);
        let now = self.clock.now();
        let mut seeded = 0;

        for url in urls {
            if self.storage.has_link(&url)? {
                tracing::debug!("Start URL {} already seen, not seeding", url);
                continue;
            }

            let mut task = Task::new(conf.crawler_name.clone(), conf.start_rule_name.clone(), url);
            if interval > 0 {
                task.is_seed = true;
                task.revisit_interval = interval;
                task.next_exec_time = now.saturating_add(interval);
                self.storage.upsert_crontab(&task)?;
            }

            active.queue.enqueue(&task)?;
            self.storage.record_link(&task.url, now)?;
            seeded += 1;
        }

        Ok(seeded)
    }

    /// Removes a crawler from the scheduler and the active map, closing it
    ///
    /// Returns whether an active instance existed.
    async fn deactivate(&self, name: &str) -> bool {
        let _ = self.scheduler.remove(name);

        let removed = self
            .crawlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name);

        match removed {
            Some(active) => {
                active.queue.close();
                active.runtime.close().await;
                true
            }
            None => false,
        }
    }

    /// Looks up an active crawler
    pub fn active(&self, name: &str) -> Option<Arc<ActiveCrawler>> {
        self.crawlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    /// Names of all active crawlers, sorted
    pub fn active_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self
            .crawlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// Stops all crawlers; later operations fail with `NotInitialized`
    pub async fn finish(&self) {
        self.initialized.store(false, Ordering::Release);

        let drained: Vec<_> = self
            .crawlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .collect();

        for (name, active) in drained {
            let _ = self.scheduler.remove(&name);
            active.queue.close();
            active.runtime.close().await;
        }
        tracing::info!("Controller finished");
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }
}
