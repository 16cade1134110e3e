// ABOUTME: Entry point for the fleetroute binary.
// ABOUTME: Parses CLI flags, initializes tracing, ingests raw snapshots, and reconstructs per-vehicle routes.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use futures::TryStreamExt;
use fleetroute_pipeline::{
    IngestConfig, IngestPipeline, RouteConfig, RouteLog, RouteReconstructor, create_indexes,
};
use fleetroute_store::{DEFAULT_STORE_URL, Sink, open_sink};

/// Import fleet vehicle snapshots and reconstruct per-vehicle routes.
#[derive(Debug, Parser)]
#[command(name = "fleetroute", version, about)]
struct Cli {
    /// Path to the folder containing the raw snapshot files
    #[arg(short = 'r', long = "raw", value_name = "DIR")]
    raw: PathBuf,

    /// Decode and log only; never connect to the store
    #[arg(short = 'n', long)]
    dry_run: bool,

    /// Store to connect to: sqlite://<path>, sqlite::memory:, memory:// or a file path
    #[arg(short = 'm', long, env = "FLEETROUTE_STORE", default_value = DEFAULT_STORE_URL)]
    store: String,

    /// Skip importing the raw folder
    #[arg(long)]
    skip_import: bool,

    /// Skip creating the capture time and identity indexes
    #[arg(long)]
    skip_indexes: bool,

    /// Import only; skip route reconstruction
    #[arg(long)]
    skip_routes: bool,

    /// Append every reconstructed route to this file as one JSON line
    #[arg(long, value_name = "FILE")]
    routes_out: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

const DEFAULT_LOG_FILTER: &str =
    "fleetroute=info,fleetroute_core=info,fleetroute_store=info,fleetroute_pipeline=info";

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut ingest_config =
        IngestConfig::from_env(&cli.raw).context("invalid ingestion configuration")?;
    ingest_config.dry_run = cli.dry_run;
    ingest_config.skip_indexes = cli.skip_indexes;
    let route_config = RouteConfig::from_env().context("invalid route configuration")?;

    if cli.dry_run {
        if !cli.skip_import {
            IngestPipeline::new(ingest_config, None)
                .run_until(shutdown_signal())
                .await?;
        }
        tracing::info!("dry run, skipping route reconstruction");
        return Ok(());
    }

    let sink =
        open_sink(&cli.store).with_context(|| format!("could not connect to {}", cli.store))?;

    if cli.skip_import {
        if !cli.skip_indexes {
            create_indexes(sink.as_ref()).await;
        }
    } else {
        let report = IngestPipeline::new(ingest_config, Some(Arc::clone(&sink)))
            .run_until(shutdown_signal())
            .await?;
        if report.cancelled {
            tracing::warn!("ingestion cancelled, skipping route reconstruction");
            return Ok(());
        }
    }

    if cli.skip_routes {
        return Ok(());
    }

    reconstruct(route_config, sink, cli.routes_out).await
}

async fn reconstruct(
    config: RouteConfig,
    sink: Arc<dyn Sink>,
    routes_out: Option<PathBuf>,
) -> anyhow::Result<()> {
    let mut log = match &routes_out {
        Some(path) => Some(
            RouteLog::open(path)
                .with_context(|| format!("could not open route log {}", path.display()))?,
        ),
        None => None,
    };

    let reconstructor = RouteReconstructor::new(config, Arc::clone(&sink));
    let routes = reconstructor
        .stream_routes()
        .await
        .context("route reconstruction failed")?;
    let mut routes = std::pin::pin!(routes);

    let mut reconstructed = 0usize;
    while let Some(route) = routes
        .try_next()
        .await
        .context("route reconstruction failed")?
    {
        let summary = route.summary();
        tracing::info!(
            "{}: {} snapshots, {} material changes, {} moves ({:.1} km), {} refuels",
            summary.identity,
            summary.steps,
            summary.material_changes,
            summary.moves,
            summary.total_distance_meters / 1000.0,
            summary.refuels
        );
        if let Some(log) = log.as_mut() {
            log.append(&route)
                .with_context(|| format!("could not write route of {}", route.identity))?;
        }
        reconstructed += 1;
    }

    tracing::info!(
        "{} routes from {} stored snapshots",
        reconstructed,
        sink.count().await?
    );
    Ok(())
}

/// Resolves on Ctrl-C. If the handler cannot be installed, never resolves.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("could not listen for ctrl-c: {}", e);
        std::future::pending::<()>().await;
    }
}
