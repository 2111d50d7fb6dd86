//! WikiGraph main entry point
//!
//! This is the command-line interface for the WikiGraph link-graph crawler.

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use wikigraph::admin::{http, AdminControl, CrawlRequest};
use wikigraph::config::{load_config_with_hash, Config};
use wikigraph::crawler::{Estimator, Scheduler};
use wikigraph::output::{load_statistics, print_statistics};
use wikigraph::storage::{lock, shared, SharedStorage, SqliteStorage};
use wikigraph::wiki::{LinkSource, NamespaceSet, WikiClient};
use wikigraph::{LinkDirection, Storage};

/// WikiGraph: an incremental crawler for the Wikipedia link graph
///
/// WikiGraph discovers pages and links through the MediaWiki API, stores
/// them as a directed graph in SQLite, and works a persistent priority
/// queue of crawl jobs with a pool of workers.
#[derive(Parser, Debug)]
#[command(name = "wikigraph")]
#[command(version)]
#[command(about = "An incremental crawler for the Wikipedia link graph", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(short, long, value_name = "CONFIG", global = true)]
    config: Option<PathBuf>,

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
    /// Run the worker pool and the admin HTTP API
    Serve {
        /// Address to listen on (overrides the config)
        #[arg(long)]
        bind: Option<String>,

        /// Start with the crawler stopped
        #[arg(long)]
        paused: bool,
    },

    /// Enqueue titles and crawl until the queue is empty
    Crawl(CrawlArgs),

    /// Enqueue titles without crawling
    Enqueue(CrawlArgs),

    /// Estimate how many pages a crawl from a title would touch
    Estimate {
        title: String,
    },

    /// Show graph and job statistics
    Stats,

    /// Delete every page, link and job
    Purge {
        /// Confirm the deletion
        #[arg(long)]
        yes: bool,
    },
}

#[derive(Args, Debug)]
struct CrawlArgs {
    /// Root page titles
    titles: Vec<String>,

    /// Job priority (higher runs first)
    #[arg(short, long, default_value_t = 0)]
    priority: i64,

    /// Follow backlinks instead of outbound links
    #[arg(long)]
    inbound: bool,

    /// Enqueue discovered neighbors automatically
    #[arg(long)]
    auto_crawl: bool,

    /// Deepest BFS level to enqueue (overrides the config)
    #[arg(long)]
    max_depth: Option<u32>,

    /// Links merged per page, 0 for unlimited (overrides the config)
    #[arg(long)]
    link_cap: Option<u32>,
}

impl CrawlArgs {
    fn requests(&self) -> Vec<CrawlRequest> {
        self.titles
            .iter()
            .map(|title| CrawlRequest {
                priority: self.priority,
                link_direction: if self.inbound {
                    LinkDirection::Inbound
                } else {
                    LinkDirection::Outbound
                },
                auto_crawl_neighbors: self.auto_crawl,
                max_depth: self.max_depth,
                link_cap: self.link_cap,
                requested_by: Some("cli".to_string()),
                ..CrawlRequest::new(title.clone())
            })
            .collect()
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose, cli.quiet);

    let (config, hash) = match load_config_with_hash(cli.config.as_deref()) {
        Ok(loaded) => loaded,
        Err(e) => {
            tracing::error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };
    match (&cli.config, hash) {
        (Some(path), Some(hash)) => tracing::info!(
            "Configuration loaded from {} (hash: {})",
            path.display(),
            hash
        ),
        _ => tracing::info!("Using default configuration"),
    }

    match cli.command {
        Command::Serve { bind, paused } => handle_serve(config, bind, paused).await,
        Command::Crawl(args) => handle_crawl(config, args).await,
        Command::Enqueue(args) => handle_enqueue(config, args).await,
        Command::Estimate { title } => handle_estimate(config, &title).await,
        Command::Stats => handle_stats(&config),
        Command::Purge { yes } => handle_purge(&config, yes),
    }
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        // Only show errors
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("wikigraph=info,warn"),
            1 => EnvFilter::new("wikigraph=debug,tower_http=debug,info"),
            2 => EnvFilter::new("wikigraph=trace,debug"),
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

fn open_storage(config: &Config) -> anyhow::Result<SharedStorage> {
    let storage = SqliteStorage::open(&config.database.url)
        .with_context(|| format!("Failed to open database {}", config.database.url))?;
    Ok(shared(storage))
}

fn open_source(config: &Config) -> anyhow::Result<Arc<dyn LinkSource>> {
    let client = WikiClient::new(&config.wiki).context("Failed to build MediaWiki client")?;
    Ok(Arc::new(client))
}

/// Wires storage, link source, scheduler and admin control together
fn build(config: &Config) -> anyhow::Result<(Arc<Scheduler>, Arc<AdminControl>)> {
    let storage = open_storage(config)?;
    let source = open_source(config)?;
    let scheduler = Arc::new(Scheduler::new(
        storage.clone(),
        source.clone(),
        config.crawler.clone(),
    ));
    let admin = Arc::new(AdminControl::new(storage, scheduler.clone(), source, config));
    Ok((scheduler, admin))
}

async fn enqueue_all(admin: &AdminControl, args: &CrawlArgs) -> anyhow::Result<()> {
    for request in args.requests() {
        let title = request.title.clone();
        let enqueued = admin
            .enqueue(request)
            .await
            .with_context(|| format!("Failed to enqueue {}", title))?;
        println!(
            "Enqueued {} (page {}, priority {})",
            enqueued.page.title, enqueued.page.page_id, enqueued.job.priority
        );
    }
    Ok(())
}

/// Handles the serve command: worker pool plus admin API until Ctrl-C
async fn handle_serve(config: Config, bind: Option<String>, paused: bool) -> anyhow::Result<()> {
    let (scheduler, admin) = build(&config)?;
    if !paused {
        scheduler.start();
    }

    let addr = bind.unwrap_or_else(|| config.server.bind.clone());
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    tracing::info!("Admin API listening on http://{}", addr);

    axum::serve(listener, http::router(admin))
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for Ctrl-C: {}", e);
            }
            tracing::info!("Received Ctrl-C, shutting down");
        })
        .await
        .context("HTTP server error")?;

    scheduler.shutdown().await;
    Ok(())
}

/// Handles the crawl command: enqueue, then work the queue until it drains
async fn handle_crawl(config: Config, args: CrawlArgs) -> anyhow::Result<()> {
    let (scheduler, admin) = build(&config)?;
    enqueue_all(&admin, &args).await?;

    scheduler.start();
    tokio::select! {
        result = scheduler.wait_idle() => result?,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received Ctrl-C, interrupting crawl");
        }
    }
    scheduler.shutdown().await;

    let summary = admin.crawler_status()?;
    for (status, count) in &summary.counts {
        println!("  {}: {}", status, count);
    }
    Ok(())
}

async fn handle_enqueue(config: Config, args: CrawlArgs) -> anyhow::Result<()> {
    let (_, admin) = build(&config)?;
    enqueue_all(&admin, &args).await
}

/// Handles the estimate command: prints the estimate as JSON
async fn handle_estimate(config: Config, title: &str) -> anyhow::Result<()> {
    let namespaces = NamespaceSet::from_slice(&config.crawler.allow_namespaces);
    let estimator = Estimator::new(open_source(&config)?, config.estimator.clone(), namespaces);
    let estimate = estimator.estimate(title).await?;
    println!("{}", serde_json::to_string_pretty(&estimate)?);
    Ok(())
}

/// Handles the stats command: loads and displays statistics
fn handle_stats(config: &Config) -> anyhow::Result<()> {
    let storage = open_storage(config)?;
    let store = lock(&storage)?;
    let stats = load_statistics(&*store)?;
    print_statistics(&stats);
    Ok(())
}

fn handle_purge(config: &Config, yes: bool) -> anyhow::Result<()> {
    if !yes {
        anyhow::bail!("Refusing to delete all data without --yes");
    }
    let storage = open_storage(config)?;
    let mut store = lock(&storage)?;
    store.purge_all()?;
    println!("Deleted all pages, links and jobs");
    Ok(())
}
