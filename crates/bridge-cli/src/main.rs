mod commands;

use std::path::PathBuf;

use bridge_core::config::AppConfig;
use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "bridge", about = "Agent Bridge operator CLI")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Activate or deactivate a group of orchestration workflows.
    N8nLifecycle {
        #[arg(value_enum)]
        action: commands::lifecycle::LifecycleAction,
        #[arg(value_enum)]
        target: commands::lifecycle::LifecycleTarget,
    },
    /// Print circuit breaker status for every tracked dependency.
    CircuitBreaker,
    /// Print recent entries from the error log.
    ErrorAggregator {
        #[arg(long)]
        app: Option<String>,
        #[arg(long)]
        severity: Option<String>,
        #[arg(short = 'n', long, default_value_t = 20)]
        n: usize,
        #[arg(long)]
        summary: bool,
    },
    /// List or restore configuration snapshots.
    ConfigSnapshot {
        #[arg(long)]
        list: bool,
        #[arg(long)]
        restore: Option<String>,
    },
    /// Check monthly execution budget usage.
    N8nBudgetGuard {
        #[arg(long)]
        limit: Option<u64>,
    },
    /// Run the preflight environment check.
    Preflight {
        #[arg(long, default_value = "generic")]
        app: String,
        #[arg(long)]
        dir: Option<PathBuf>,
    },
    /// Print a unified operational snapshot.
    TelemetryDashboard {
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = AppConfig::load();

    let exit_code = match cli.command {
        Command::N8nLifecycle { action, target } => commands::lifecycle::run(action, target, &config).await,
        Command::CircuitBreaker => commands::circuit_breaker::run(&config),
        Command::ErrorAggregator { app, severity, n, summary } => {
            commands::error_aggregator::run(&config, app.as_deref(), severity.as_deref(), n, summary)
        }
        Command::ConfigSnapshot { list, restore } => commands::config_snapshot::run(&config, list, restore.as_deref()),
        Command::N8nBudgetGuard { limit } => commands::budget_guard::run(&config, limit).await,
        Command::Preflight { app, dir } => commands::preflight_cmd::run(&app, dir).await,
        Command::TelemetryDashboard { json } => commands::telemetry_dashboard::run(&config, json),
    };

    std::process::exit(exit_code);
}
