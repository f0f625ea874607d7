//! SSH Sentry - SSH login notification pipeline.
//!
//! This binary is triggered once per SSH login (typically from a PAM or
//! sshd integration) and evaluates exactly one connection event: resolve
//! the session, apply exclusions and rate limiting, deliver the alert,
//! and append the structured event record.
//!
//! # Commands
//!
//! - `sshsentry run`: Evaluate the current SSH session
//! - `sshsentry test-message`: Send a test notification and exit
//!
//! # Environment Variables
//!
//! See the [`config`](sshsentry_notifier::config) module for available
//! configuration options.

use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use sshsentry_notifier::config::Config;
use sshsentry_notifier::event_log::EventLogger;
use sshsentry_notifier::exclusion::ExclusionFilter;
use sshsentry_notifier::lock::{LockAttempt, PipelineLock};
use sshsentry_notifier::pipeline::Pipeline;
use sshsentry_notifier::rate_limit::{FileRateStore, RateLimiter};
use sshsentry_notifier::resolver::{
    EnvKeyLookup, HelperKeyLookup, KeyLookup, Resolver, SessionSignals,
};
use sshsentry_notifier::telegram::{NotifierConfig, TelegramNotifier};
use sshsentry_notifier::types::{Outcome, SuppressReason};

/// Subdirectory of the state dir holding rate-limit records.
const RATE_LIMIT_DIR: &str = "ratelimit";

/// SSH Sentry - SSH login notification pipeline.
///
/// Notifies an administrator via Telegram when an SSH session is
/// established, identifying the connecting key, IP, and session type.
#[derive(Parser, Debug)]
#[command(name = "sshsentry")]
#[command(author, version, about, long_about = None)]
#[command(after_help = "\
ENVIRONMENT VARIABLES:
    SSHSENTRY_BOT_TOKEN             Telegram bot token (required)
    SSHSENTRY_CHAT_ID               Telegram chat id (required)
    SSHSENTRY_SERVER_NAME           Display name (default: hostname)
    SSHSENTRY_STATE_DIR             State directory (default: ~/.sshsentry)
    SSHSENTRY_COOLDOWN_SECS         Cooldown per ip+fingerprint (default: 300)
    SSHSENTRY_TUNNEL_COOLDOWN_SECS  Cooldown for tunnels (default: 60)
    SSHSENTRY_EXCLUDED_IPS          Comma-separated IPs to ignore
    SSHSENTRY_EXCLUDED_USERS        Comma-separated usernames to ignore
    SSHSENTRY_EXCLUDED_KEY_COMMENTS Comma-separated key comments to ignore
    SSHSENTRY_JSON_LOG              Path of the JSON event log (enables it)

EXAMPLES:
    # From a PAM session hook or sshd ForceCommand wrapper
    export SSHSENTRY_BOT_TOKEN=123:abc
    export SSHSENTRY_CHAT_ID=-100200300
    sshsentry run

    # Verify credentials and connectivity
    sshsentry test-message
")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

/// CLI subcommands.
#[derive(Subcommand, Debug)]
enum Command {
    /// Evaluate the current SSH session and notify if warranted.
    Run,

    /// Send a test notification and exit.
    TestMessage,
}

fn main() -> Result<ExitCode> {
    init_logging();

    let cli = Cli::parse();

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to create tokio runtime")?;

    match cli.command {
        Command::Run => {
            let outcome = runtime.block_on(run_pipeline())?;
            Ok(ExitCode::from(exit_code_for(outcome)))
        }
        Command::TestMessage => {
            runtime.block_on(run_test_message())?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Maps a pipeline outcome to the process exit code.
///
/// Suppression is a normal result; only exhausted delivery is a failure.
fn exit_code_for(outcome: Outcome) -> u8 {
    match outcome {
        Outcome::DeliveryFailed => 1,
        Outcome::Delivered | Outcome::Suppressed(_) => 0,
    }
}

/// Evaluates the current SSH session through the full pipeline.
async fn run_pipeline() -> Result<Outcome> {
    // Configuration problems are fatal before any pipeline work
    let config = Config::from_env().context("Failed to load configuration")?;

    info!(
        server_name = %config.server_name,
        state_dir = %config.state_dir.display(),
        "Configuration loaded"
    );

    // Non-blocking whole-pipeline lock: a concurrent invocation gives up
    // instantly instead of queueing a duplicate alert
    let _lock = match PipelineLock::try_acquire(&config.state_dir)
        .context("Failed to open pipeline lock")?
    {
        LockAttempt::Acquired(lock) => lock,
        LockAttempt::Contended => {
            info!("Another pipeline instance is active, exiting");
            return Ok(Outcome::Suppressed(SuppressReason::LockContended));
        }
    };

    let signals = SessionSignals::from_env();
    let mut lookups: Vec<Box<dyn KeyLookup>> = Vec::new();
    if let Some(cmd) = &config.key_lookup_cmd {
        lookups.push(Box::new(HelperKeyLookup::new(cmd.clone())));
    }
    lookups.push(Box::new(EnvKeyLookup::from_env()));

    let resolver = Resolver::new(signals, lookups);
    let (event, identity) = resolver.resolve();

    let store = FileRateStore::new(config.state_dir.join(RATE_LIMIT_DIR))
        .context("Failed to open rate-limit store")?;

    let logger = match &config.json_log_path {
        Some(path) => match EventLogger::new(path.clone()) {
            Ok(logger) => Some(logger),
            Err(e) => {
                // JSON logging is optional enrichment; never abort on it
                warn!(error = %e, path = %path.display(), "JSON event log unavailable");
                None
            }
        },
        None => None,
    };

    let mut pipeline = Pipeline::new(
        &config,
        ExclusionFilter::from_config(&config),
        RateLimiter::new(store),
        TelegramNotifier::new(NotifierConfig::from_config(&config)),
        logger,
    );

    // Best-effort delivery: failure is reported via the exit status after
    // the lock guard has dropped, never by aborting mid-pipeline
    let outcome = pipeline.run(&event, &identity).await;
    info!(?outcome, "Pipeline complete");
    Ok(outcome)
}

/// Sends a test notification to verify credentials and connectivity.
async fn run_test_message() -> Result<()> {
    let config = Config::from_env().context("Failed to load configuration")?;
    let notifier = TelegramNotifier::new(NotifierConfig::from_config(&config));

    let text = format!(
        "✅ *SSH Sentry test* on {} — credentials and connectivity OK",
        config.server_name
    );

    notifier
        .send(&text, config.silent)
        .await
        .context("Test delivery failed")?;

    println!("Test message delivered to chat {}", config.chat_id);
    Ok(())
}

/// Initializes the logging subsystem.
fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_level(true)
        .with_writer(std::io::stderr)
        .init();
}
