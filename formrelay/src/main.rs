use clap::{Parser, Subcommand};
use config::{Config, MetricsConfig};
use ingest::Role;
use metrics_exporter_statsd::StatsdBuilder;
use shared::shutdown::{Shutdown, wait_for_signal};
use std::error::Error;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod config;

#[derive(Parser)]
#[command(name = "formrelay", about = "Accepts form posts and accumulates them in a JSON store")]
struct Cli {
    /// YAML configuration file; built-in defaults are used when omitted
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Subcommand)]
enum CliCommand {
    /// HTTP endpoint and receive loop in one process
    Serve,
    /// HTTP endpoint only
    Http,
    /// Datagram receive loop only
    Receiver,
}

impl From<&CliCommand> for Role {
    fn from(command: &CliCommand) -> Self {
        match command {
            CliCommand::Serve => Role::All,
            CliCommand::Http => Role::Http,
            CliCommand::Receiver => Role::Receiver,
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    init_logging();

    let config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };
    if let Some(metrics) = &config.metrics {
        init_metrics(metrics)?;
    }

    let role = Role::from(&cli.command);
    tracing::info!(role = ?role, "Starting formrelay");

    let shutdown = Shutdown::new();
    let mut pipeline = tokio::spawn(ingest::run(config.ingest, role, shutdown.listener()));

    let result = tokio::select! {
        result = &mut pipeline => result,
        _ = wait_for_signal() => {
            tracing::info!("Shutting down");
            shutdown.trigger();
            pipeline.await
        }
    };

    match result? {
        Ok(()) => {
            tracing::info!("Stopped");
            Ok(())
        }
        Err(e) => {
            tracing::error!(error = %e, "Pipeline failed");
            Err(e.into())
        }
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_thread_names(true)
        .init();
}

fn init_metrics(config: &MetricsConfig) -> Result<(), Box<dyn Error>> {
    let recorder = StatsdBuilder::from(config.statsd_host.as_str(), config.statsd_port)
        .build(Some(config.prefix.as_str()))?;
    if metrics::set_global_recorder(recorder).is_err() {
        tracing::warn!("A metrics recorder is already installed");
    }
    shared::metrics_defs::describe_all(ingest::metrics_defs::ALL_METRICS);
    Ok(())
}
