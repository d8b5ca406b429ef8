//! CLI entry point for the transit vehicle collector.
//!
//! `run` (the default) collects snapshots on an interval and serves the query
//! API; `collect-once` stores a single snapshot; `init-schema` provisions the
//! database.

use anyhow::Result;
use clap::Parser;
use tracing::info;
use transit_collector::config::{Cli, Command};
use transit_collector::{supervisor, telemetry};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok(); // Load .env file

    let _file_guard = telemetry::init_tracing()?;
    let cli = Cli::parse();

    info!(
        command = ?cli.selected_command(),
        feed_url = %cli.feed.feed_url,
        store = ?cli.database.backend,
        "Starting transit collector"
    );

    match cli.selected_command() {
        Command::Run => supervisor::run(&cli).await,
        Command::CollectOnce => supervisor::collect_once(&cli).await,
        Command::InitSchema => supervisor::init_schema(&cli).await,
    }
}
