use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use futures::future::join_all;
use serde::Serialize;
use tracing::info;
use tracing_subscriber::EnvFilter;

use studio_limiter::config::{default_store, LimiterConfig, LoggingConfig};
use studio_limiter::ratelimit::{Clock, Gated, ManualClock, SystemClock};
use studio_limiter::StudioOperation;

/// Inspect and exercise the studio's rate limits.
#[derive(Debug, Parser)]
#[command(name = "studio-limiter", version, about)]
struct Cli {
    /// YAML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log filter directive, overriding the configured level
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print the effective class table as JSON
    Classes,
    /// Run gated no-op calls against a simulated clock
    Simulate(SimulateArgs),
}

#[derive(Debug, Args)]
struct SimulateArgs {
    /// Operation to gate
    #[arg(long, value_enum)]
    operation: StudioOperation,

    /// Client identifier charged for the calls
    #[arg(long, default_value = "simulated-client")]
    identifier: String,

    /// Number of calls
    #[arg(long, default_value_t = 1)]
    requests: u32,

    /// Simulated milliseconds between calls
    #[arg(long, default_value_t = 0)]
    spacing_ms: u64,

    /// Issue every call at the same instant
    #[arg(long)]
    concurrent: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SimulationRecord {
    request: u32,
    at_ms: u64,
    outcome: Gated<u32>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = LimiterConfig::load(cli.config.as_deref())?;

    init_tracing(&config.logging, cli.log_level.as_deref(), cli.json_logs);
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    match cli.config.as_deref() {
        Some(path) => info!(path = %path.display(), "Configuration loaded"),
        None => info!("Configuration loaded from defaults and environment"),
    }

    match cli.command {
        Command::Classes => print_classes(&config),
        Command::Simulate(args) => simulate(&config, args).await,
    }
}

fn init_tracing(logging: &LoggingConfig, level_override: Option<&str>, json_override: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level_override.unwrap_or(&logging.level)));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if logging.json || json_override {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn print_classes(config: &LimiterConfig) -> anyhow::Result<()> {
    let table = config.limits.table()?;
    println!("{}", serde_json::to_string_pretty(&table)?);
    Ok(())
}

async fn simulate(config: &LimiterConfig, args: SimulateArgs) -> anyhow::Result<()> {
    let clock = Arc::new(ManualClock::new(SystemClock.now_millis()));
    let limiter = Arc::new(config.build_limiter(default_store(), clock.clone())?);
    let gate = args.operation.gate(&limiter)?;

    info!(
        operation = %args.operation,
        class = gate.class(),
        cost = gate.cost(),
        identifier = %args.identifier,
        requests = args.requests,
        "Starting simulation"
    );

    let records = if args.concurrent {
        let at_ms = clock.now_millis();
        let calls = (0..args.requests).map(|request| {
            let gate = &gate;
            let identifier = args.identifier.as_str();
            async move {
                let outcome = gate.run(identifier, || async move { request }).await;
                SimulationRecord {
                    request,
                    at_ms,
                    outcome,
                }
            }
        });
        join_all(calls).await
    } else {
        let mut records = Vec::with_capacity(args.requests as usize);
        for request in 0..args.requests {
            if request > 0 {
                clock.advance_millis(args.spacing_ms);
            }
            let outcome = gate.run(args.identifier.as_str(), || async move { request }).await;
            records.push(SimulationRecord {
                request,
                at_ms: clock.now_millis(),
                outcome,
            });
        }
        records
    };

    for record in &records {
        println!("{}", serde_json::to_string(record)?);
    }

    let status = limiter.get_status(&args.identifier, gate.class())?;
    let denied = records.iter().filter(|r| r.outcome.is_rate_limited()).count();
    info!(
        admitted = records.len() - denied,
        denied = denied,
        tokens_remaining = status.tokens_remaining,
        max_tokens = status.max_tokens,
        "Simulation finished"
    );

    Ok(())
}
