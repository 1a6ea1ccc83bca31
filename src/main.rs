//! fadeboard daemon: runs the post/session lifecycle manager against the
//! board database.
//!
//! Startup: load config → open SQLite → start lifecycle manager → re-arm
//! timers for every active post from persisted activity → wait for Ctrl-C →
//! drain in-flight archival and exit.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{CommandFactory, FromArgMatches, Parser};

use fadeboard::config::Config;
use fadeboard::lifecycle::{Lifecycle, SystemClock};
use fadeboard::store::BoardStore;

#[derive(Parser)]
#[command(name = "fadeboard", version, about = "Ephemeral discussion board lifecycle daemon")]
struct Cli {
    /// Path to YAML config file (default: <data_dir>/config.yaml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Data directory for the board database
    #[arg(long, default_value = "./data")]
    data_dir: PathBuf,

    /// Seconds of inactivity before a post is archived
    #[arg(long)]
    post_window_secs: Option<u64>,

    /// Seconds an anonymous session lives without a refresh
    #[arg(long)]
    session_lifetime_secs: Option<u64>,

    /// Session sweep interval in seconds
    #[arg(long)]
    sweep_interval_secs: Option<u64>,

    /// Retention reaper interval in seconds
    #[arg(long)]
    reaper_interval_secs: Option<u64>,

    /// Delete posts with no comments this many seconds after creation
    #[arg(long)]
    retention_uncommented_secs: Option<u64>,

    /// Delete commented posts this many seconds after their latest comment
    #[arg(long)]
    retention_commented_secs: Option<u64>,

    /// Generate a default config.yaml in data-dir and exit
    #[arg(long)]
    init_config: bool,
}

/// Build the final Config by merging: defaults -> YAML file -> CLI overrides.
fn build_config(cli: &Cli, matches: &clap::ArgMatches) -> anyhow::Result<Config> {
    use clap::parser::ValueSource;

    let data_dir = cli.data_dir.clone();
    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| Config::config_file_path(&data_dir));

    let mut config = match Config::load_from_file(&config_path)? {
        Some(file_config) => {
            tracing::info!(path = %config_path.display(), "loaded config file");
            file_config
        }
        None => {
            tracing::debug!(path = %config_path.display(), "no config file found, using defaults");
            Config::default()
        }
    };

    // Explicit --data-dir wins; otherwise keep the file's value.
    if matches.value_source("data_dir") == Some(ValueSource::CommandLine) {
        config.data_dir = data_dir;
    }

    if let Some(secs) = cli.post_window_secs {
        config.post_window_secs = secs;
    }
    if let Some(secs) = cli.session_lifetime_secs {
        config.session_lifetime_secs = secs;
    }
    if let Some(secs) = cli.sweep_interval_secs {
        config.sweep_interval_secs = secs;
    }
    if let Some(secs) = cli.reaper_interval_secs {
        config.reaper_interval_secs = secs;
    }
    if let Some(secs) = cli.retention_uncommented_secs {
        config.retention_uncommented_secs = secs;
    }
    if let Some(secs) = cli.retention_commented_secs {
        config.retention_commented_secs = secs;
    }

    config.validate()?;

    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "fadeboard=info".into()),
        )
        .init();

    let mut matches = Cli::command().get_matches();
    let cli = Cli::from_arg_matches_mut(&mut matches)?;

    if cli.init_config {
        std::fs::create_dir_all(&cli.data_dir)?;
        let config_path = Config::config_file_path(&cli.data_dir);
        Config::write_default_config(&config_path)?;
        println!("Config written to {}", config_path.display());
        return Ok(());
    }

    let config = build_config(&cli, &matches)?;

    std::fs::create_dir_all(&config.data_dir)
        .with_context(|| format!("creating {}", config.data_dir.display()))?;

    let db_path = config.db_path();
    let store = BoardStore::open(&db_path)
        .with_context(|| format!("opening database {}", db_path.display()))?;

    let lifecycle_config = config.lifecycle();
    tracing::info!(
        db = %db_path.display(),
        post_window_secs = config.post_window_secs,
        reaper_interval_secs = config.reaper_interval_secs,
        "fadeboard starting"
    );

    let lifecycle = Lifecycle::start(Arc::new(store), Arc::new(SystemClock), lifecycle_config)?;
    lifecycle
        .restore()
        .await
        .context("restoring post timers")?;

    tokio::signal::ctrl_c().await.ok();
    tracing::info!("shutting down");

    let report = lifecycle.shutdown(lifecycle_config.shutdown_timeout).await;
    let metrics = lifecycle.metrics();
    tracing::info!(
        timers_canceled = report.timers_canceled,
        drained = report.drained,
        posts_archived = metrics.posts_archived,
        archive_failures = metrics.archive_failures,
        sessions_expired = metrics.sessions_expired,
        posts_reaped = metrics.posts_reaped,
        "fadeboard stopped"
    );

    Ok(())
}
