use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use log::{error, info};
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::watch;

pub mod config;
pub mod error;
pub mod metrics;
pub mod output;
pub mod probe;
pub mod tcpinfo;

use config::app_config::{AppConfig, load_config};
use config::cli::Cli;
use metrics::MetricsRegistry;
use metrics::exporter::Exporter;
use output::{MetricFilter, OutputFormatter};
use probe::dial::Dialer;
use probe::fields;
use probe::scheduler::{Reporter, TargetScheduler};

fn print_metric_descriptions() {
    let width = fields::exportable().map(|f| f.name.len()).max().unwrap_or(10);
    println!("metrics:");
    for field in fields::exportable() {
        println!("  {:<width$}  {}", field.name, field.help, width = width);
    }
}

/// Resolves with the signal's name on the first SIGINT or SIGTERM. Both are
/// registered before this returns.
fn shutdown_signals() -> std::io::Result<impl Future<Output = &'static str>> {
    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;
    Ok(async move {
        tokio::select! {
            _ = interrupt.recv() => "SIGINT",
            _ = terminate.recv() => "SIGTERM",
        }
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    if cli.metrics {
        print_metric_descriptions();
        return Ok(());
    }

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(
        if cli.verbose { "info" } else { "warn" }
    ))
    .init();

    let AppConfig { probe, targets } = load_config(&cli).context("Invalid configuration")?;
    let config = Arc::new(probe);
    let dialer = Arc::new(Dialer::new(config.clone()).context("Failed to set up the dialer")?);

    let (stop, shutdown) = watch::channel(false);

    let registry = match config.prom_addr {
        Some(addr) => {
            let registry =
                Arc::new(MetricsRegistry::new().context("Failed to create the metrics registry")?);
            let exporter = Exporter::bind(addr, registry.clone())
                .await
                .with_context(|| format!("Failed to start the metrics exporter on {addr}"))?;
            tokio::spawn(exporter.serve(shutdown.clone()));
            Some(registry)
        }
        None => None,
    };

    let reporter = Reporter::new(
        MetricFilter::new(&config.filter),
        OutputFormatter::new(config.output),
        registry,
    );

    // Held for the whole run: dropping `stop` would read as a shutdown.
    let _unsignalled = match shutdown_signals() {
        Ok(signals) => {
            tokio::spawn(async move {
                let name = signals.await;
                info!("Shutting down on {name}");
                let _ = stop.send(true);
            });
            None
        }
        Err(e) => {
            error!("Unable to listen for shutdown signals: {e}");
            Some(stop)
        }
    };

    info!("Probing {} target(s)", targets.len());
    let reported = TargetScheduler::new(dialer, targets)
        .run(reporter, shutdown)
        .await;
    info!("Reported {reported} result(s)");

    Ok(())
}
