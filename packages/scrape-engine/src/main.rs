//! CLI for running one scraping session
//!
//! Loads configuration from the environment, builds the egress pool from
//! `EGRESS_PROXIES`, runs the session to completion and prints the report
//! as JSON.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use scrape_engine::{
    EgressPool, EngineConfig, HttpHealthProbe, MemoryStore, Orchestrator, RecordStore,
    RotationStrategy, SessionRequest, SessionStatus, Target,
};

#[derive(Parser)]
#[command(name = "scrape-engine")]
#[command(about = "Run scraping sessions against physician directories")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one session and print its report
    Run {
        /// Target site, e.g. doctolib.de
        #[arg(long)]
        target: Target,

        #[arg(long)]
        specialty: String,

        #[arg(long)]
        city: String,

        /// Page budget (defaults to PAGE_BUDGET_DEFAULT)
        #[arg(long)]
        max_pages: Option<u32>,

        /// Base delay between requests in seconds (defaults to INTER_REQUEST_DELAY_SECONDS)
        #[arg(long)]
        delay: Option<u64>,

        /// Route requests through the egress pool
        #[arg(long)]
        use_proxy: bool,

        /// round_robin or random
        #[arg(long, default_value = "round_robin")]
        rotation: RotationStrategy,

        /// Admission identifier
        #[arg(long, default_value = "cli")]
        requester: String,

        /// Persist to SQLite instead of memory
        #[cfg(feature = "sqlite")]
        #[arg(long)]
        database_url: Option<String>,
    },

    /// Probe every configured proxy once and print pool stats
    Probe,

    /// List supported targets
    Targets,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,scrape_engine=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = EngineConfig::from_env().context("Failed to load configuration")?;

    match cli.command {
        Commands::Targets => {
            let targets: Vec<&str> = Target::ALL.iter().map(|t| t.as_str()).collect();
            println!("{}", serde_json::to_string_pretty(&targets)?);
        }

        Commands::Probe => {
            let pool = build_pool(&config).await?;
            let stats = pool.health_check_all().await;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }

        Commands::Run {
            target,
            specialty,
            city,
            max_pages,
            delay,
            use_proxy,
            rotation,
            requester,
            #[cfg(feature = "sqlite")]
            database_url,
        } => {
            let mut query = config.query(specialty, city);
            if let Some(max_pages) = max_pages {
                query = query.with_max_pages(max_pages);
            }
            if let Some(delay) = delay {
                query = query.with_delay_seconds(delay);
            }
            if use_proxy {
                query = query.with_proxy(rotation);
            }

            #[cfg(feature = "sqlite")]
            let store = open_store(database_url.as_deref()).await?;
            #[cfg(not(feature = "sqlite"))]
            let store: Arc<dyn RecordStore> = Arc::new(MemoryStore::new());

            let pool = build_pool(&config).await?;
            let cancel = CancellationToken::new();
            let monitor = pool.spawn_health_monitor(cancel.clone());

            let orchestrator = Arc::new(Orchestrator::new(config, store, pool));
            let result = orchestrator
                .execute(SessionRequest::new(target, query, requester))
                .await;

            cancel.cancel();
            let _ = monitor.await;

            let report = result.context("Session could not run")?;
            println!("{}", serde_json::to_string_pretty(&report)?);

            if report.status == SessionStatus::Failed {
                bail!(
                    "session {} failed: {}",
                    report.session_id,
                    report.error.as_deref().unwrap_or("unknown error")
                );
            }
        }
    }

    Ok(())
}

async fn build_pool(config: &EngineConfig) -> Result<EgressPool> {
    let identities =
        EngineConfig::egress_proxies_from_env().context("Failed to parse EGRESS_PROXIES")?;
    let probe = Arc::new(HttpHealthProbe::new(config.proxy_request_timeout()));
    let pool = EgressPool::new(probe, config.health_check_interval());
    pool.initialize(&identities)
        .await
        .context("Failed to load egress identities")?;
    Ok(pool)
}

#[cfg(feature = "sqlite")]
async fn open_store(database_url: Option<&str>) -> Result<Arc<dyn RecordStore>> {
    match database_url {
        Some(url) => {
            let store = scrape_engine::SqliteStore::new(url)
                .await
                .context("Failed to open database")?;
            Ok(Arc::new(store))
        }
        None => Ok(Arc::new(MemoryStore::new())),
    }
}
