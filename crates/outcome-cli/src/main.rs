//! outcome-cli: run the outcome pipeline for one or more windows.
//!
//! Usage:
//!   cargo run -p outcome-cli -- today
//!   cargo run -p outcome-cli -- all-time
//!   cargo run -p outcome-cli -- status
//!   cargo run -p outcome-cli -- stage calibrated --window 2024-03-09 -v
//!   cargo run -p outcome-cli -- correct 812 2:2 --reason "late equaliser"
//!
//! Exit codes: 0 success, 75 partial (re-run the same command), 1 fatal.

use anyhow::{Context, Result};
use chrono::Utc;
use outcome_core::EngineConfig;
use outcome_store::OutcomeDb;
use pipeline_coordinator::{
    Command, Coordinator, ExitSignal, Invocation, PipelineContext, RunSummary, USAGE,
};
use tracing_subscriber::EnvFilter;

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let json_logging = std::env::var("RUST_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    if json_logging {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

fn log_summary(summary: &RunSummary) {
    for window in &summary.windows {
        let processed: usize = window.stages.iter().map(|s| s.report.processed).sum();
        let failed: usize = window.stages.iter().map(|s| s.report.failed).sum();
        match &window.error {
            Some(e) => tracing::error!(
                window = %window.window,
                stages_run = window.stages.len(),
                error = %e,
                "Window halted"
            ),
            None => tracing::info!(
                window = %window.window,
                stages_run = window.stages.len(),
                already_complete = window.already_complete.len(),
                processed,
                failed,
                "Window finished"
            ),
        }
    }
}

async fn run(invocation: Invocation) -> Result<ExitSignal> {
    let config = EngineConfig::from_env().context("invalid configuration")?;
    tracing::info!(
        coverage = config.calibration.coverage,
        calibration_window = config.calibration.window,
        cache_capacity = config.statistics.cache_capacity,
        "Configuration loaded and validated"
    );

    let db = OutcomeDb::new(&config.database_url)
        .await
        .with_context(|| format!("failed to open {}", config.database_url))?;
    let coordinator = Coordinator::new(PipelineContext::new(&db, config));

    let today = Utc::now().date_naive();
    let status_only = invocation.command == Command::Status;
    let summary = match coordinator.execute(invocation.command, today).await {
        Ok(summary) => summary,
        Err(e) => {
            tracing::error!(error = %e, "Pipeline command failed");
            return Ok(if e.is_retryable() {
                ExitSignal::Partial
            } else {
                ExitSignal::Fatal
            });
        }
    };

    if status_only {
        println!("{}", serde_json::to_string_pretty(&summary.status)?);
    } else {
        log_summary(&summary);
    }

    let stats = coordinator.context().aggregator.cache().stats();
    tracing::debug!(
        hits = stats.hits,
        misses = stats.misses,
        size = stats.size,
        hit_rate = stats.hit_rate,
        "Statistics cache"
    );

    Ok(summary.exit_signal())
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let invocation = match Invocation::parse(&args, Utc::now().date_naive()) {
        Ok(invocation) => invocation,
        Err(e) => {
            eprintln!("{}\n\n{}", e, USAGE);
            std::process::exit(ExitSignal::Fatal.code());
        }
    };

    init_tracing(invocation.verbose);

    // Panic hook: log panic info before crashing
    std::panic::set_hook(Box::new(|info| {
        eprintln!("PANIC: {info}");
        tracing::error!("PANIC: {info}");
    }));

    let signal = match run(invocation).await {
        Ok(signal) => signal,
        Err(e) => {
            tracing::error!(error = ?e, "Fatal error");
            ExitSignal::Fatal
        }
    };

    tracing::info!(signal = ?signal, code = signal.code(), "Done");
    std::process::exit(signal.code());
}
