//! dotmirror entry point.
//!
//! Loads configuration, applies command-line overrides, initializes logging
//! and the sync engine, runs the initial sync and then monitors the source
//! directory until a shutdown signal arrives.

mod prompt;
mod signals;
mod style;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

use dotmirror_core::config::{MirrorConfig, StrategySetting};
use dotmirror_core::conflict::{FixedStrategy, ResolutionStrategy, StrategyPicker};
use dotmirror_core::errors::SyncError;
use dotmirror_core::notification::{NotificationSink, Notifier};
use dotmirror_core::sync_engine::SyncEngine;
use dotmirror_core::watcher::AggregatorOptions;

use crate::prompt::DialoguerPicker;
use crate::style::ConsoleStyle;

// ---------------------------------------------------------------------------
// CLI arguments
// ---------------------------------------------------------------------------

/// Mirror a configuration directory into a Git repository.
#[derive(Parser, Debug)]
#[command(name = "dotmirror", version, about)]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory to mirror.
    #[arg(long)]
    source_dir: Option<PathBuf>,

    /// Git working tree that receives the mirror.
    #[arg(long)]
    repo_dir: Option<PathBuf>,

    /// Seconds between flushes of settled changes.
    #[arg(long, value_name = "SECS")]
    sync_interval: Option<u64>,

    /// Glob pattern to include (repeatable or comma-separated).
    #[arg(long, value_delimiter = ',')]
    include: Vec<String>,

    /// Glob pattern to exclude (repeatable or comma-separated).
    #[arg(long, value_delimiter = ',')]
    exclude: Vec<String>,

    /// How to resolve conflicts.
    #[arg(long, value_enum)]
    strategy: Option<StrategyArg>,

    /// Run the initial sync and exit.
    #[arg(long, visible_alias = "sync-only")]
    run_once: bool,

    /// Verbose logging and a startup banner.
    #[arg(short, long)]
    verbose: bool,

    /// Log level filter (trace, debug, info, warn, error). Overrides RUST_LOG.
    #[arg(long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print a sample configuration file.
    InitConfig,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum StrategyArg {
    Prompt,
    Local,
    Remote,
    Merge,
}

impl From<StrategyArg> for StrategySetting {
    fn from(arg: StrategyArg) -> Self {
        match arg {
            StrategyArg::Prompt => Self::Prompt,
            StrategyArg::Local => Self::Local,
            StrategyArg::Remote => Self::Remote,
            StrategyArg::Merge => Self::Merge,
        }
    }
}

impl Args {
    /// Overlay command-line values onto the loaded configuration.
    fn apply(&self, config: &mut MirrorConfig) {
        if let Some(dir) = &self.source_dir {
            config.mirror.source_dir = dir.clone();
        }
        if let Some(dir) = &self.repo_dir {
            config.mirror.repo_dir = dir.clone();
        }
        if let Some(secs) = self.sync_interval {
            config.mirror.sync_interval_secs = secs;
        }
        if !self.include.is_empty() {
            config.mirror.include = self.include.clone();
        }
        if !self.exclude.is_empty() {
            config.mirror.exclude = self.exclude.clone();
        }
        if let Some(strategy) = self.strategy {
            config.conflicts.strategy = strategy.into();
        }
        if self.verbose {
            config.mirror.verbose = true;
        }
        config.expand_paths();
    }
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if let Some(Command::InitConfig) = args.command {
        print!("{}", MirrorConfig::default_template());
        return Ok(());
    }

    let mut config = match &args.config {
        Some(path) => {
            MirrorConfig::load_from_file(path).context("failed to load configuration file")?
        }
        None => MirrorConfig::default(),
    };
    args.apply(&mut config);

    let _log_guard = init_tracing(&args, &config).context("failed to initialize logging")?;

    config
        .resolve_env_vars()
        .context("failed to resolve environment variables in config")?;
    config
        .validate()
        .context("configuration validation failed")?;

    if config.mirror.verbose {
        print_banner(&args, &config);
    }

    let notifier: Arc<dyn NotificationSink> = Arc::new(Notifier::new(&config.notifications));
    let engine = SyncEngine::from_config(&config, strategy_picker(&config), notifier)
        .context("failed to initialize sync engine")?
        .with_report(
            Box::new(ConsoleStyle),
            config.mirror.report_limit,
            Box::new(|line: &str| println!("{line}")),
        );
    info!("Sync engine initialized");

    let (engine, initial) = tokio::task::spawn_blocking(move || {
        let mut engine = engine;
        let result = engine.initial_sync();
        (engine, result)
    })
    .await
    .context("initial sync task failed")?;

    match initial {
        Ok(stats) => {
            println!(
                "{}",
                style::success(&format!(
                    "Initial sync complete ({} changes)",
                    stats.summary.total()
                ))
            );
        }
        Err(e @ SyncError::Walk { .. }) => {
            return Err(e).context("cannot read the source directory");
        }
        Err(e) if args.run_once => {
            return Err(e).context("initial sync failed");
        }
        Err(e) => {
            // Remote problems are retried with the next batch.
            eprintln!("{}", style::error(&format!("Initial sync failed: {e}")));
            warn!(error = %e, "initial sync failed, continuing to monitor");
        }
    }

    if args.run_once {
        info!("run-once mode, exiting");
        return Ok(());
    }

    let options = AggregatorOptions::new(config.sync_interval());
    match engine.monitor(options, signals::wait_for_shutdown()).await {
        Ok(_) => {
            info!("dotmirror stopped.");
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "monitor stopped with an error");
            bail!("monitoring failed: {e}")
        }
    }
}

/// Console logging plus an optional daily-rolling log file.
fn init_tracing(args: &Args, config: &MirrorConfig) -> Result<Option<WorkerGuard>> {
    let default_level = if config.mirror.verbose { "debug" } else { "info" };
    let filter = match &args.log_level {
        Some(level) => EnvFilter::try_new(level).context("invalid --log-level")?,
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
    };

    let (file_layer, guard) = match &config.notifications.log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("failed to create log directory {}", dir.display()))?;
            let appender = tracing_appender::rolling::daily(dir, "dotmirror.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().with_ansi(false).with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .with(file_layer)
        .init();

    Ok(guard)
}

/// Choose the conflict picker: the configured strategy, a prompt when a
/// user is at the terminal, merge-both otherwise.
fn strategy_picker(config: &MirrorConfig) -> Box<dyn StrategyPicker> {
    if let Some(strategy) = config.conflicts.strategy.fixed() {
        return Box::new(FixedStrategy(strategy));
    }
    match DialoguerPicker::attended() {
        Some(picker) => Box::new(picker),
        None => {
            warn!("no terminal attached, conflicts will be resolved by merging both versions");
            Box::new(FixedStrategy(ResolutionStrategy::MergeBoth))
        }
    }
}

fn print_banner(args: &Args, config: &MirrorConfig) {
    let list = |patterns: &[String]| {
        if patterns.is_empty() {
            "(none)".to_string()
        } else {
            patterns.join(", ")
        }
    };

    info!("========================================");
    info!("  dotmirror v{}", env!("CARGO_PKG_VERSION"));
    info!("========================================");
    if let Some(path) = &args.config {
        info!("Config file   : {}", path.display());
    }
    info!("Source dir    : {}", config.mirror.source_dir.display());
    info!("Repo dir      : {}", config.mirror.repo_dir.display());
    info!("Branch        : {}", config.remote.branch);
    info!("Sync interval : {}s", config.mirror.sync_interval_secs);
    info!("Include       : {}", list(&config.mirror.include));
    info!("Exclude       : {}", list(&config.mirror.exclude));
    info!("Conflicts     : {:?}", config.conflicts.strategy);
    info!(
        "Mode          : {}",
        if args.run_once { "initial sync only" } else { "monitor" }
    );
    info!("========================================");
}
