//! Promptsmith - Prompt enhancement and multi-provider execution
//!
//! Command-line front end for `promptsmith-core`. Results are written to
//! stdout as JSON (streamed text for `stream`); logs go to stderr.
//!
//! # Usage
//!
//! ```bash
//! # Enhance a prompt using project answers
//! promptsmith enhance "Build a REST API" --answers '{"projectType": "REST API"}'
//!
//! # Score a prompt across every configured provider
//! promptsmith score "Refactor the billing module"
//!
//! # Stream from a specific provider (Ctrl-C cancels)
//! promptsmith stream "Explain borrow checking" --provider anthropic
//!
//! # Verbose logging
//! RUST_LOG=debug promptsmith status
//! ```
//!
//! # Exit Codes
//!
//! - `0`: success
//! - `1`: any other failure
//! - `2`: every provider failed
//! - `3`: no provider configured

mod commands;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{debug, error, info, warn};

use promptsmith_core::config::{load_config_from_path, ConfigOverrides, PromptsmithConfig};
use promptsmith_core::cost::UsagePeriod;
use promptsmith_core::{
    ConductorError, EnhancementPipeline, EnvCredentialStore, Orchestrator, ProviderRegistry,
    ResponseCache, UsageLedger,
};

use commands::Command;

/// Promptsmith - enhance, score, and execute prompts across AI providers
#[derive(Parser, Debug)]
#[command(name = "promptsmith")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Configuration file path
    #[arg(short = 'c', long, env = "PROMPTSMITH_CONFIG", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Per-call provider timeout in milliseconds
    #[arg(long, value_name = "MS")]
    call_timeout_ms: Option<u64>,

    /// Attempts made before giving up on execute/stream
    #[arg(long, value_name = "N")]
    max_failover: Option<usize>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, env = "PROMPTSMITH_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Shorthand for `--log-level debug`
    #[arg(short = 'v', long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

/// Initialize logging to stderr with the specified level
fn init_logging(level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!(
            "promptsmith={level},promptsmith_core={level}"
        ))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to initialize logging: {e}"))?;

    Ok(())
}

/// Resolve configuration: defaults, file, environment, then flags
fn resolve_config(args: &Args) -> Result<PromptsmithConfig> {
    let path = args
        .config
        .clone()
        .or_else(promptsmith_core::config::default_config_path);
    let mut config = load_config_from_path(path).context("failed to load configuration")?;

    let mut overrides = ConfigOverrides::new();
    if let Some(ms) = args.call_timeout_ms {
        overrides = overrides.with_call_timeout_ms(ms);
    }
    if let Some(n) = args.max_failover {
        overrides = overrides.with_max_failover_attempts(n);
    }
    if let Some(target) = args.command.target_quality() {
        overrides = overrides.with_target_quality(target);
    }
    overrides.apply(&mut config);
    config.validate().context("invalid command-line override")?;

    debug!(source = %config.source(), "Configuration resolved");
    Ok(config)
}

/// Composition root: credentials -> registry -> orchestrator -> pipeline
fn build_pipeline(config: &PromptsmithConfig, ledger: Arc<UsageLedger>) -> EnhancementPipeline {
    let registry = ProviderRegistry::from_credentials(&EnvCredentialStore, &config.providers)
        .with_high_quality_threshold(config.orchestrator.high_quality_threshold);
    let orchestrator = Orchestrator::new(registry)
        .with_cache(Arc::new(ResponseCache::with_ttls(config.cache_ttls)))
        .with_usage_sink(ledger)
        .with_config(config.orchestrator.clone());

    info!(
        providers = ?orchestrator.available_providers(),
        "Orchestrator ready"
    );
    EnhancementPipeline::new(Arc::new(orchestrator))
}

/// Log what this run spent and any limit it crossed
fn report_usage(ledger: &UsageLedger) {
    let now = chrono::Utc::now();
    let summary = ledger.summary(UsagePeriod::All, now);
    if summary.events == 0 {
        return;
    }
    info!(
        events = summary.events,
        tokens = summary.total_tokens,
        estimated_cost = summary.total_cost,
        "Usage this run"
    );

    let check = ledger.check_limits(None, now);
    if !check.within_limits {
        warn!(breached = ?check.breached, daily = check.daily_usage, "Spending limit exceeded");
    }
}

/// Map an error to the process exit status
fn exit_status(err: &anyhow::Error) -> u8 {
    err.downcast_ref::<ConductorError>()
        .map_or(1, |e| u8::try_from(e.exit_code()).unwrap_or(1))
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let level = if args.verbose {
        "debug"
    } else {
        args.log_level.as_str()
    };
    if let Err(e) = init_logging(level) {
        eprintln!("error: {e:#}");
        return ExitCode::from(1);
    }

    let result = match resolve_config(&args) {
        Ok(config) => {
            let ledger = Arc::new(UsageLedger::with_limits(config.limits));
            let pipeline = build_pipeline(&config, ledger.clone());
            let outcome = commands::run(args.command, &pipeline).await;
            report_usage(&ledger);
            outcome
        }
        Err(e) => Err(e),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Command failed");
            eprintln!("error: {e:#}");
            ExitCode::from(exit_status(&e))
        }
    }
}
