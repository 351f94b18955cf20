//! Timer engine binary.
//!
//! `fae-timers host` (the default) loads config, resumes persisted timers and
//! serves newline-delimited JSON commands on stdin/stdout.
//! `fae-timers parse <sentence>` prints how a sentence would be understood.
//!
//! All tracing/diagnostic output goes to stderr so that stdout remains a
//! clean JSON protocol channel.

use clap::{Parser, Subcommand};
use fae_timers::host::stdio::run_stdio_bridge;
use fae_timers::timers::{JsonFileBackend, TimerScheduler, TimerService, TimerStore, parser};
use fae_timers::TimersConfig;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Event broadcast capacity between the scheduler and the bridge.
const TIMER_EVENT_CAPACITY: usize = 256;

/// Natural-language timers, alarms and reminders.
#[derive(Parser)]
#[command(name = "fae-timers", version, about)]
struct Cli {
    /// Path to TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Subcommand to run.
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the JSON host bridge on stdin/stdout.
    Host,

    /// Parse a time sentence and print the result as JSON.
    Parse {
        /// The sentence, e.g. "quarter past 3 pm".
        #[arg(required = true, num_args = 1..)]
        sentence: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("fae_timers=info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command.unwrap_or(Command::Host) {
        Command::Parse { sentence } => run_parse(&sentence.join(" ")),
        Command::Host => run_host(cli.config).await,
    }
}

fn run_parse(sentence: &str) -> anyhow::Result<()> {
    let (normalized, spec) = parser::parse(sentence);
    let output = serde_json::json!({
        "sentence": normalized,
        "spec": spec,
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

async fn run_host(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let config_path = config_path.unwrap_or_else(TimersConfig::default_config_path);
    let config = TimersConfig::load_or_default(&config_path)?;
    tracing::info!(config = %config_path.display(), "fae-timers starting");

    let (event_tx, event_rx) = tokio::sync::broadcast::channel(TIMER_EVENT_CAPACITY);
    let store = TimerStore::new(JsonFileBackend::new(config.store_path()));
    let scheduler = TimerScheduler::with_config(
        store,
        Arc::new(config.owner_resolver()),
        Arc::new(event_tx),
        config.scheduler_config(),
    );
    scheduler.resume();

    let service = TimerService::new(scheduler.clone(), config.default_owner.clone());
    let result = run_stdio_bridge(service, event_rx).await;
    scheduler.shutdown();

    result.map_err(|e| {
        tracing::error!(error = %e, "fae-timers exited with error");
        anyhow::anyhow!("fae-timers failed: {e}")
    })?;

    tracing::info!("fae-timers shut down cleanly");
    Ok(())
}
