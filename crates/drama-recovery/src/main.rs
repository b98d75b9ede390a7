//! Recovery CLI binary.

use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use drama_models::Stage;
use drama_recovery::{
    alert, CommandHandler, Dispatcher, HandlerRegistry, HealthReporter, RecoveryConfig,
};

#[derive(Parser)]
#[command(name = "drama-recovery", about = "Retry dispatcher and health CLI for the drama pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run one dispatcher pass over all pending/retrying jobs
    Run,
    /// Print the health summary; exits non-zero if any circuit is open or
    /// the DLQ backlog exceeds the threshold
    Health {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List circuit breaker states
    Circuits,
    /// Reset a stage's circuit breaker to closed
    ResetCircuit { stage: Stage },
    /// List dead-letter entries
    Dlq,
    /// Requeue a dead-lettered job for retry
    Requeue { job_id: String },
    /// Show recent error log entries
    Errors {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Truncate the error log
    ClearErrors,
    /// Drop succeeded jobs older than the given age from the stage files
    Prune {
        #[arg(long, default_value_t = 7)]
        days: i64,
    },
    /// Send the health report through the alert sink
    Alert,
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // Colored output for dev, JSON for production.
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::from_default_env()
        .add_directive("drama_recovery=info".parse().expect("valid directive"))
        .add_directive("drama_store=info".parse().expect("valid directive"));

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer().with_ansi(true).with_target(true))
            .with(env_filter)
            .init();
    }

    let cli = Cli::parse();
    let config = RecoveryConfig::from_env();

    match run(cli.command, config).await {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            error!("{}", e);
            std::process::exit(2);
        }
    }
}

async fn run(command: Command, config: RecoveryConfig) -> anyhow::Result<i32> {
    match command {
        Command::Run => {
            let registry = registry_from_config(&config)?;
            let dispatcher = Dispatcher::new(config, registry, alert::alerter_from_env())?;
            let report = dispatcher.run_once().await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(0)
        }
        Command::Health { json } => {
            let reporter = HealthReporter::new(&config)?;
            let report = reporter.summary()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("{}", HealthReporter::render(&report));
            }
            Ok(if reporter.needs_attention(&report) { 1 } else { 0 })
        }
        Command::Circuits => {
            let store = drama_store::BreakerStore::new(&config.state_dir)?;
            let records = store.load_all()?;
            if records.is_empty() {
                println!("No circuit breaker states");
                return Ok(0);
            }
            println!("Circuit Breaker States:");
            for (stage, record) in records {
                println!(
                    "  {}: {} ({} failures)",
                    stage,
                    record.state.as_str().to_uppercase(),
                    record.failure_count
                );
            }
            Ok(0)
        }
        Command::ResetCircuit { stage } => {
            let store = drama_store::BreakerStore::new(&config.state_dir)?;
            if store.reset(stage)? {
                println!("Circuit breaker reset for {stage}");
            } else {
                println!("No circuit found for {stage}");
            }
            Ok(0)
        }
        Command::Dlq => {
            let store = drama_store::DeadLetterStore::new(&config.state_dir)?;
            let entries = store.list()?;
            if entries.is_empty() {
                println!("Dead letter queue is empty");
                return Ok(0);
            }
            for entry in entries {
                println!(
                    "[{}] {} ({}): {} after {} attempts",
                    entry.failed_at.format("%Y-%m-%dT%H:%M:%SZ"),
                    entry.job.id,
                    entry.job.stage,
                    entry.reason,
                    entry.job.attempt_count
                );
            }
            Ok(0)
        }
        Command::Requeue { job_id } => {
            let registry = HandlerRegistry::builder().build_partial();
            let dispatcher = Dispatcher::new(config, registry, alert::alerter_from_env())?;
            let job = dispatcher.requeue(&drama_models::JobId::from_string(job_id))?;
            println!("Requeued job {} for stage {}", job.id, job.stage);
            Ok(0)
        }
        Command::Errors { limit } => {
            let store = drama_store::ErrorLogStore::new(&config.state_dir)?;
            for entry in store.recent(limit)? {
                println!(
                    "[{}] {}: {}.{}",
                    entry.timestamp.format("%Y-%m-%dT%H:%M:%SZ"),
                    entry.severity.as_str().to_uppercase(),
                    entry.stage,
                    entry.operation
                );
                println!("  Error: {}", entry.error);
            }
            Ok(0)
        }
        Command::ClearErrors => {
            drama_store::ErrorLogStore::new(&config.state_dir)?.clear()?;
            println!("Error log cleared");
            Ok(0)
        }
        Command::Prune { days } => {
            let store = drama_store::JobStore::new(&config.state_dir)?;
            let cutoff = chrono::Utc::now() - chrono::Duration::days(days);
            let pruned = store.prune_succeeded(cutoff)?;
            println!("Pruned {pruned} succeeded jobs");
            Ok(0)
        }
        Command::Alert => {
            let reporter = HealthReporter::new(&config)?;
            let report = reporter.summary()?;
            alert::alerter_from_env()
                .send(&HealthReporter::render(&report))
                .await;
            info!("Health alert dispatched");
            Ok(0)
        }
    }
}

/// Build the stage registry from the configured per-stage commands. Every
/// stage must have a command; the dispatcher refuses to run otherwise.
fn registry_from_config(config: &RecoveryConfig) -> anyhow::Result<HandlerRegistry> {
    let mut builder = HandlerRegistry::builder();
    for stage in Stage::ALL {
        if let Some(line) = config.stage_commands.get(&stage) {
            builder = builder.register(stage, CommandHandler::from_command_line(line)?);
        }
    }
    Ok(builder.build()?)
}
