//! Sumi-Loom main entry point
//!
//! This is the command-line interface for the Sumi-Loom crawling controller.

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use sumi_loom::admin::{self, Admin, ListKind};
use sumi_loom::config::{load_config_with_hash, load_crawler_conf, validate_crawler_conf, Config};
use sumi_loom::controller::{Clock, Controller, SystemClock};
use sumi_loom::crawler::HttpRuntimeFactory;
use sumi_loom::output::{load_statistics, print_statistics};
use sumi_loom::parser::ParserRegistry;
use sumi_loom::storage::{open_storage, ListFilter, SqliteStorage, Storage};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Sumi-Loom: a weighted multi-site crawling controller
///
/// Sumi-Loom runs registered crawler configurations on a shared worker pool,
/// apportioned by weight, revisiting seed pages on schedule and recovering
/// stalled work.
#[derive(Parser, Debug)]
#[command(name = "sumi-loom")]
#[command(version = "1.0.0")]
#[command(about = "A weighted multi-site crawling controller", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(short, long, value_name = "CONFIG", default_value = "loom.toml", global = true)]
    config: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose", global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the worker pool and sweep loops until interrupted
    Run,

    /// Register a new crawler from a JSON configuration file
    ///
    /// Writes to the database directly. A `run` process that is already
    /// running picks the change up on its next restart.
    Create {
        #[arg(value_name = "CRAWLER_JSON")]
        file: PathBuf,

        /// Recorded as the registration author
        #[arg(long, default_value = "cli")]
        author: String,
    },

    /// Replace the configuration of a registered crawler
    ///
    /// Writes to the database directly. A `run` process that is already
    /// running picks the change up on its next restart.
    Update {
        #[arg(value_name = "CRAWLER_JSON")]
        file: PathBuf,

        /// Recorded as the registration author
        #[arg(long, default_value = "cli")]
        author: String,
    },

    /// Unregister a crawler
    ///
    /// Writes to the database directly. A `run` process that is already
    /// running picks the change up on its next restart.
    Delete { name: String },

    /// Show a registered crawler
    Show { name: String },

    /// List crawler, seed, running or crontab records
    List {
        kind: ListKind,

        #[arg(long, default_value_t = 0)]
        offset: i64,

        #[arg(long, default_value_t = 10)]
        limit: i64,

        /// Key prefix: crawler name, or URL for seeds
        #[arg(long)]
        prefix: Option<String>,
    },

    /// Validate a crawler configuration and test-run its first start URL
    Check {
        #[arg(value_name = "CRAWLER_JSON")]
        file: PathBuf,
    },

    /// Show statistics from the database
    Status,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose, cli.quiet);

    // Load and validate configuration
    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (config, config_hash) = load_config_with_hash(&cli.config)
        .with_context(|| format!("Failed to load {}", cli.config.display()))?;
    tracing::info!("Configuration loaded successfully (hash: {})", config_hash);

    match cli.command {
        Command::Run => handle_run(config).await,
        Command::Create { file, author } => handle_register(config, &file, &author, true).await,
        Command::Update { file, author } => handle_register(config, &file, &author, false).await,
        Command::Delete { name } => handle_delete(config, &name).await,
        Command::Show { name } => handle_show(&config, &name),
        Command::List {
            kind,
            offset,
            limit,
            prefix,
        } => handle_list(&config, kind, ListFilter::new(offset, limit, prefix)),
        Command::Check { file } => handle_check(&config, &file).await,
        Command::Status => handle_status(&config),
    }
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        // Only show errors
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("sumi_loom=info,warn"),
            1 => EnvFilter::new("sumi_loom=debug,info"),
            2 => EnvFilter::new("sumi_loom=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

fn open_database(config: &Config) -> anyhow::Result<Arc<SqliteStorage>> {
    let path = Path::new(&config.controller.database_path);
    let storage = open_storage(path)
        .with_context(|| format!("Failed to open database {}", path.display()))?;
    Ok(Arc::new(storage))
}

/// Opens the stores and builds an initialized controller
async fn start_controller(config: &Config) -> anyhow::Result<Arc<Controller>> {
    let storage: Arc<dyn Storage> = open_database(config)?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let registry = ParserRegistry::with_defaults();
    let factory = HttpRuntimeFactory::new(
        registry.clone(),
        &config.user_agent,
        &config.downloader,
        storage.clone(),
        clock.clone(),
    )?;

    let controller = Controller::new(
        config.controller.clone(),
        storage,
        Arc::new(factory),
        registry,
        clock,
    )?;
    controller.init().await?;
    Ok(Arc::new(controller))
}

/// Handles `run`: works until ctrl-c
async fn handle_run(config: Config) -> anyhow::Result<()> {
    let controller = start_controller(&config).await?;
    let token = CancellationToken::new();

    let signal = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupt received, shutting down");
        }
        signal.cancel();
    });

    controller.run(token).await?;
    tracing::info!("All loops stopped");
    Ok(())
}

/// Handles `create` and `update`
async fn handle_register(
    config: Config,
    file: &Path,
    author: &str,
    is_new: bool,
) -> anyhow::Result<()> {
    let conf = load_crawler_conf(file)
        .with_context(|| format!("Failed to read crawler config {}", file.display()))?;
    let name = conf.crawler_name.clone();

    let controller = start_controller(&config).await?;
    let admin = Admin::new(controller.clone());
    let result = if is_new {
        admin.create(conf, author).await
    } else {
        admin.update(conf, author).await
    };
    controller.finish().await;

    let id = result?;
    println!(
        "✓ Crawler {} {} (id {})",
        name,
        if is_new { "created" } else { "updated" },
        id
    );
    Ok(())
}

/// Handles `delete`
async fn handle_delete(config: Config, name: &str) -> anyhow::Result<()> {
    let controller = start_controller(&config).await?;
    let result = Admin::new(controller.clone()).delete(name).await;
    controller.finish().await;

    result?;
    println!("✓ Crawler {} deleted", name);
    Ok(())
}

/// Handles `show`
fn handle_show(config: &Config, name: &str) -> anyhow::Result<()> {
    let storage = open_database(config)?;
    let item = admin::retrieve(storage.as_ref(), name)?;
    println!("{}", serde_json::to_string_pretty(&item)?);
    Ok(())
}

/// Handles `list`
fn handle_list(config: &Config, kind: ListKind, filter: ListFilter) -> anyhow::Result<()> {
    let storage = open_database(config)?;
    let page = admin::list(storage.as_ref(), kind, &filter)?;
    println!("{}", serde_json::to_string_pretty(&page)?);
    Ok(())
}

/// Handles `check`: validation plus a dry run that touches no store
async fn handle_check(config: &Config, file: &Path) -> anyhow::Result<()> {
    let conf = load_crawler_conf(file)
        .with_context(|| format!("Failed to read crawler config {}", file.display()))?;
    let registry = ParserRegistry::with_defaults();
    validate_crawler_conf(&conf, &registry)?;
    println!("✓ Configuration of {} is valid", conf.crawler_name);

    let scratch: Arc<dyn Storage> = Arc::new(SqliteStorage::new_in_memory()?);
    let factory = HttpRuntimeFactory::new(
        registry,
        &config.user_agent,
        &config.downloader,
        scratch,
        Arc::new(SystemClock),
    )?;
    let processed = factory.build_http(&conf)?.test_run().await?;

    println!("\nChild tasks ({}):", processed.tasks.len());
    for task in &processed.tasks {
        println!("  - [{}] {}{}", task.rule_name, task.url, if task.is_seed { " (seed)" } else { "" });
    }
    println!("\nItems ({}):", processed.items.len());
    println!("{}", serde_json::to_string_pretty(&processed.items)?);
    Ok(())
}

/// Handles `status`
fn handle_status(config: &Config) -> anyhow::Result<()> {
    println!("Database: {}\n", config.controller.database_path);
    let storage = open_database(config)?;
    let stats = load_statistics(storage.as_ref())?;
    print_statistics(&stats);
    Ok(())
}
