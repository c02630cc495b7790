//! Waystation Host - serves HTTP traffic through an interception engine.
//!
//! Loads a JSON settings file, warms the precache stores and then answers
//! every request via the engine: from the SQLite-backed stores, from the
//! upstream origin, or with a fallback document when the upstream is down.

mod handler;
mod server;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use waystation_core::{
    DeploymentScope, EngineSettings, HttpFetcher, InterceptionEngine, SqliteStorage,
};

#[derive(Parser, Debug)]
#[command(name = "waystation-host")]
#[command(about = "Cache-backed request interception host")]
struct Args {
    /// Settings file
    #[arg(short, long, default_value = "waystation.json")]
    config: PathBuf,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Warm the precache stores and exit
    Warm,
    /// Warm, activate and serve requests
    Serve {
        /// Host to bind to
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        /// Port to listen on (0 = auto-assign)
        #[arg(short, long, default_value = "0")]
        port: u16,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Set up logging; RUST_LOG overrides --debug
    let default_level = if args.debug { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .init();

    let settings = EngineSettings::load(&args.config)
        .with_context(|| format!("Failed to load settings from {}", args.config.display()))?;
    let engine = build_engine(&settings)?;
    info!("Engine {} built for {}", engine.id(), settings.scope_url);

    let reports = engine.on_install().await.context("Install failed")?;
    for report in &reports {
        info!(
            "Store '{}': {} fetched, {} up to date, {} failed",
            report.store,
            report.fetched.len(),
            report.skipped.len(),
            report.failed.len()
        );
        for failure in &report.failed {
            warn!("  {}", failure);
        }
    }

    match args.command {
        Command::Warm => Ok(()),
        Command::Serve { host, port } => {
            let scope = Arc::new(DeploymentScope::new());
            engine.on_activate(&scope).await.context("Activation failed")?;

            let state = Arc::new(server::AppState {
                scope,
                scope_url: settings.scope()?,
            });
            let addr = server::start_server(state, &host, port).await?;
            info!("Serving {} on http://{}", settings.scope_url, addr);

            // Wait for shutdown signal
            tokio::signal::ctrl_c().await?;
            info!("Shutdown signal received, exiting");
            engine.terminate();
            Ok(())
        }
    }
}

/// Assemble an engine over the SQLite store and HTTP fetcher from `settings`.
fn build_engine(settings: &EngineSettings) -> Result<Arc<InterceptionEngine>> {
    let db_path = settings.database_path();
    let storage = SqliteStorage::open(&db_path)
        .with_context(|| format!("Failed to open cache database {}", db_path.display()))?;

    let mut fetcher = HttpFetcher::new()?;
    if let Some(upstream) = settings.upstream_url()? {
        info!("Forwarding requests to {}", upstream);
        fetcher = fetcher.with_upstream(upstream);
    }

    let engine = settings
        .apply(InterceptionEngine::builder())?
        .storage(Arc::new(storage))
        .fetcher(Arc::new(fetcher))
        .build()?;
    Ok(Arc::new(engine))
}
