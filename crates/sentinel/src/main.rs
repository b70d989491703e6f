//! Cost Sentinel - hourly cloud cost anomaly detection
//!
//! `run` performs a single detection pass and prints the anomalies found.
//! `watch` runs passes on a schedule and serves health and metrics endpoints.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use cost_sentinel::{
    api,
    config::{DetectionOverrides, SentinelConfig},
    output::{self, OutputFormat},
};
use sentinel_lib::{
    health::components, DetectionPipeline, HealthRegistry, SentinelMetrics, StructuredLogger,
};
use tokio::sync::broadcast;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const SENTINEL_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Cloud cost anomaly detection and alerting
#[derive(Parser)]
#[command(name = "cost-sentinel")]
#[command(author, version, about = "Cloud cost anomaly detection and alerting", long_about = None)]
struct Cli {
    /// Configuration file (TOML, YAML or JSON)
    #[arg(long, short, env = "SENTINEL_CONFIG")]
    config: Option<PathBuf>,

    /// Log output format
    #[arg(long, value_enum, default_value = "json")]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Json,
    Text,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one detection pass and print the anomalies found
    Run {
        #[command(flatten)]
        overrides: DetectionOverrides,

        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Run detection passes on a schedule
    Watch {
        #[command(flatten)]
        overrides: DetectionOverrides,

        /// Seconds between passes
        #[arg(long)]
        interval_secs: Option<u64>,

        /// Port for the health and metrics API
        #[arg(long)]
        api_port: Option<u16>,
    },
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    // stdout is reserved for alert output
    match format {
        LogFormat::Json => registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init(),
        LogFormat::Text => registry
            .with(fmt::layer().with_writer(std::io::stderr))
            .init(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    let mut config = SentinelConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Run { overrides, format } => {
            config.apply_overrides(overrides);
            run(config, format).await
        }
        Commands::Watch {
            overrides,
            interval_secs,
            api_port,
        } => {
            config.apply_overrides(overrides);
            if let Some(secs) = interval_secs {
                config.interval_secs = secs;
            }
            if let Some(port) = api_port {
                config.api_port = port;
            }
            watch(config).await
        }
    }
}

/// Single detection pass
async fn run(config: SentinelConfig, format: OutputFormat) -> Result<()> {
    let logger = StructuredLogger::new(&config.instance_name);
    let alerter = config.alerter()?;
    logger.log_startup(SENTINEL_VERSION, &alerter.channel_names());

    let pipeline = DetectionPipeline::builder()
        .source(config.source()?)
        .detector(config.detector()?)
        .alerter(alerter)
        .lookback(config.lookback()?)
        .logger(logger)
        .build()?;

    let report = pipeline
        .run_once(Utc::now())
        .await
        .context("Detection pass failed")?;

    println!("{}", output::render_report(&report, format)?);
    Ok(())
}

/// Scheduled detection with health and metrics endpoints
async fn watch(config: SentinelConfig) -> Result<()> {
    let health_registry = HealthRegistry::new();
    health_registry.register(components::SOURCE).await;
    health_registry.register(components::DISPATCHER).await;
    health_registry.register(components::SCHEDULER).await;

    let metrics = SentinelMetrics::new();
    let logger = StructuredLogger::new(&config.instance_name);
    let alerter = config.alerter()?;
    logger.log_startup(SENTINEL_VERSION, &alerter.channel_names());

    let pipeline = Arc::new(
        DetectionPipeline::builder()
            .source(config.source()?)
            .detector(config.detector()?)
            .alerter(alerter)
            .lookback(config.lookback()?)
            .logger(logger.clone())
            .health(health_registry.clone())
            .build()?,
    );

    let app_state = Arc::new(api::AppState::new(health_registry.clone(), metrics));
    let api_handle = tokio::spawn(api::serve(config.api_port, app_state));

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let schedule_handle = tokio::spawn(pipeline.run_scheduled(config.interval(), shutdown_rx));

    health_registry.set_ready(true).await;

    tokio::signal::ctrl_c().await?;
    logger.log_shutdown("SIGINT received");

    let _ = shutdown_tx.send(());
    schedule_handle.await.context("Scheduler task panicked")?;
    api_handle.abort();
    info!("Shutting down");

    Ok(())
}
