//! ponwatchd Main Binary
//!
//! Runs the two-tier report cache against a telemetry source (the
//! built-in OLT simulator by default), keeps the background tier warm,
//! and answers one-shot compliance queries from the command line.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::signal;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ponwatch_cache::{CacheStore, SessionKey};
use ponwatch_core::{DeviceScope, OnuId, PipelineConfig, ThresholdConfig};
use ponwatch_pipeline::{
    BackgroundRefresher, Pipeline, QueryOutcome, SimulatedSource,
};

#[derive(Debug, Parser)]
#[clap(name = "ponwatchd", version, about = "EPON telemetry compliance pipeline")]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[clap(long, env = "PONWATCH_LOG_LEVEL", default_value = "info", global = true)]
    log_level: String,

    /// Enable JSON logging
    #[clap(long, env = "PONWATCH_LOG_JSON", global = true)]
    log_json: bool,

    /// Number of ONUs the built-in simulator serves
    #[clap(long, default_value_t = 8, global = true)]
    onus: u32,

    #[clap(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the daemon: background refresher plus a periodic fleet
    /// summary (default if no subcommand given)
    Serve,
    /// Evaluate once and print the verified report
    Query {
        /// Restrict the report to one ONU
        #[clap(long)]
        onu: Option<String>,

        /// Bypass both cache tiers
        #[clap(long)]
        force_fresh: bool,
    },
    /// Degrade one simulated ONU, then show the resulting report
    Demo {
        /// ONU to degrade
        #[clap(long, default_value = "3")]
        onu: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli)?;

    info!("starting ponwatchd v{}", env!("CARGO_PKG_VERSION"));

    // Rule configuration problems are fatal at startup; a pipeline with
    // a half-loaded rule table must not serve reports.
    let thresholds =
        Arc::new(ThresholdConfig::from_env().context("invalid threshold configuration")?);
    let config = PipelineConfig::from_env().context("invalid pipeline configuration")?;

    let source = Arc::new(SimulatedSource::new("OLT-01", cli.onus));
    let cache = Arc::new(CacheStore::new(
        config.session_max_age,
        config.refresh_interval,
    ));
    let pipeline = Pipeline::new(
        source.clone(),
        cache.clone(),
        thresholds.clone(),
        config.clone(),
    );

    match cli.command {
        Some(Commands::Query { onu, force_fresh }) => {
            let scope = scope_for(onu);
            let outcome = pipeline
                .query(&SessionKey::new("cli"), scope, force_fresh)
                .await;
            print_outcome(&outcome)
        }
        Some(Commands::Demo { onu }) => {
            let degraded: u32 = onu.parse().context("--onu must be a numeric ONU id")?;
            source.inject_degraded(degraded);
            info!(onu = degraded, "injected degraded optics scenario");

            let outcome = pipeline
                .query(&SessionKey::new("cli"), DeviceScope::All, true)
                .await;
            print_outcome(&outcome)
        }
        Some(Commands::Serve) | None => serve(source, cache, thresholds, config, pipeline).await,
    }
}

async fn serve(
    source: Arc<SimulatedSource>,
    cache: Arc<CacheStore>,
    thresholds: Arc<ThresholdConfig>,
    config: PipelineConfig,
    pipeline: Pipeline,
) -> Result<()> {
    let refresher =
        BackgroundRefresher::new(source, cache, thresholds, config.clone()).spawn();

    let session = SessionKey::new("daemon");
    let mut summary = tokio::time::interval(config.refresh_interval);
    loop {
        tokio::select! {
            _ = summary.tick() => {
                let outcome = pipeline.query(&session, DeviceScope::All, false).await;
                match &outcome {
                    QueryOutcome::Fresh(report)
                    | QueryOutcome::Cached { report, .. }
                    | QueryOutcome::Stale { report, .. } => {
                        info!(
                            report_id = %report.report_id,
                            health = ?report.health,
                            findings = report.findings.len(),
                            verdict = ?report.verdict,
                            "fleet summary"
                        );
                    }
                    QueryOutcome::NoData(error) => {
                        info!(%error, "fleet summary unavailable");
                    }
                }
            }
            _ = shutdown_signal() => break,
        }
    }

    refresher.shutdown().await;
    info!("ponwatchd stopped");
    Ok(())
}

fn scope_for(onu: Option<String>) -> DeviceScope {
    match onu {
        Some(id) => DeviceScope::Onu(OnuId::new(id)),
        None => DeviceScope::All,
    }
}

fn print_outcome(outcome: &QueryOutcome) -> Result<()> {
    match outcome {
        QueryOutcome::Fresh(report) => {
            println!("{}", serde_json::to_string_pretty(report)?);
        }
        QueryOutcome::Cached { report, tier, age } => {
            info!(%tier, ?age, "served from cache");
            println!("{}", serde_json::to_string_pretty(report)?);
        }
        QueryOutcome::Stale {
            report,
            tier,
            age,
            error,
        } => {
            info!(%tier, ?age, %error, "fetch failed, serving stale report");
            println!("{}", serde_json::to_string_pretty(report)?);
        }
        QueryOutcome::NoData(error) => {
            return Err(anyhow::anyhow!("no telemetry available: {error}"));
        }
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => { info!("received Ctrl+C, shutting down"); },
        _ = terminate => { info!("received SIGTERM, shutting down"); },
    }
}

fn init_logging(cli: &Cli) -> Result<()> {
    let log_level = cli
        .log_level
        .parse::<tracing::Level>()
        .context("invalid log level")?;
    let filter = tracing_subscriber::EnvFilter::from_default_env().add_directive(log_level.into());

    if cli.log_json {
        tracing_subscriber::registry()
            .with(tracing_subscriber::fmt::layer().json().with_target(true))
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(tracing_subscriber::fmt::layer().with_target(true))
            .with(filter)
            .init();
    }
    Ok(())
}
