//! Command-line and environment configuration.
//!
//! Every option can come from a flag or from the environment (a `.env` file is
//! loaded first by the binary).

use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};
use sqlx::postgres::PgSslMode;

use crate::infra::postgres::StoreSettings;
use crate::infra::transit_feed::DEFAULT_FEED_URL;
use crate::ingest::LoopSettings;

pub const DEFAULT_LOG_FILE_PATH: &str = "logs/transit_collector.log";

#[derive(Debug, Parser)]
#[command(name = "transit_collector")]
#[command(
    about = "Collects real-time transit vehicle positions and serves them over an authenticated API",
    long_about = None
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    #[command(flatten)]
    pub feed: FeedArgs,

    #[command(flatten)]
    pub collection: CollectionArgs,

    #[command(flatten)]
    pub database: DatabaseArgs,

    #[command(flatten)]
    pub api: ApiArgs,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Subcommand)]
pub enum Command {
    /// Run the collector and the query API until shut down (default)
    Run,
    /// Collect and store a single snapshot, then exit
    CollectOnce,
    /// Create the vehicle_snapshots table and indexes, then exit
    InitSchema,
}

impl Cli {
    pub fn selected_command(&self) -> Command {
        self.command.unwrap_or(Command::Run)
    }
}

#[derive(Debug, Args)]
pub struct FeedArgs {
    /// Vehicle feed URL
    #[arg(long, env = "FEED_URL", default_value = DEFAULT_FEED_URL, global = true)]
    pub feed_url: String,

    /// Per-request feed timeout in seconds
    #[arg(
        long,
        env = "FETCH_TIMEOUT",
        default_value_t = 15,
        value_parser = clap::value_parser!(u64).range(1..),
        global = true
    )]
    pub fetch_timeout: u64,
}

impl FeedArgs {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout)
    }
}

#[derive(Debug, Args)]
pub struct CollectionArgs {
    /// Seconds between the starts of consecutive collection cycles
    #[arg(
        long,
        env = "COLLECTION_INTERVAL",
        default_value_t = 30,
        value_parser = clap::value_parser!(u64).range(1..),
        global = true
    )]
    pub collection_interval: u64,

    /// Consecutive failed cycles before the collector halts
    #[arg(
        long,
        env = "MAX_CONSECUTIVE_FAILURES",
        default_value_t = 10,
        value_parser = clap::value_parser!(u32).range(1..),
        global = true
    )]
    pub max_consecutive_failures: u32,

    /// Continue snapshot numbering after the highest stored id
    #[arg(long, env = "RESUME_SNAPSHOT_IDS", global = true)]
    pub resume_snapshot_ids: bool,
}

impl CollectionArgs {
    pub fn loop_settings(&self) -> LoopSettings {
        LoopSettings {
            interval: Duration::from_secs(self.collection_interval),
            max_consecutive_failures: self.max_consecutive_failures,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StoreBackend {
    /// PostgreSQL with PostGIS
    Postgres,
    /// In-process, nothing persisted across restarts
    Memory,
}

#[derive(Debug, Args)]
pub struct DatabaseArgs {
    /// Storage backend
    #[arg(long = "store", env = "STORE_BACKEND", value_enum, default_value_t = StoreBackend::Postgres, global = true)]
    pub backend: StoreBackend,

    #[arg(long, env = "DB_HOST", default_value = "localhost", global = true)]
    pub db_host: String,

    #[arg(long, env = "DB_PORT", default_value_t = 5432, global = true)]
    pub db_port: u16,

    #[arg(long, env = "DB_NAME", default_value = "abq-transit-db", global = true)]
    pub db_name: String,

    #[arg(long, env = "DB_USER", default_value = "postgres", global = true)]
    pub db_user: String,

    #[arg(long, env = "DB_PASSWORD", hide_env_values = true, global = true)]
    pub db_password: Option<String>,

    /// disable, allow, prefer, require, verify-ca or verify-full
    #[arg(
        long,
        env = "DB_SSLMODE",
        default_value = "prefer",
        value_parser = parse_ssl_mode,
        global = true
    )]
    pub db_ssl_mode: PgSslMode,

    /// Per-attempt connect timeout in seconds
    #[arg(
        long,
        env = "DB_CONNECT_TIMEOUT",
        default_value_t = 30,
        value_parser = clap::value_parser!(u64).range(1..),
        global = true
    )]
    pub db_connect_timeout: u64,

    /// Connection attempts before the store is declared unavailable
    #[arg(
        long,
        env = "DB_CONNECT_RETRIES",
        default_value_t = 5,
        value_parser = clap::value_parser!(u32).range(1..),
        global = true
    )]
    pub db_connect_retries: u32,

    /// First retry delay in seconds, doubled after each further failure
    #[arg(long, env = "DB_CONNECT_BASE_DELAY", default_value_t = 1, global = true)]
    pub db_connect_base_delay: u64,

    /// Apply the bundled schema before collecting
    #[arg(long, env = "INIT_SCHEMA", global = true)]
    pub init_schema: bool,
}

fn parse_ssl_mode(raw: &str) -> Result<PgSslMode, String> {
    raw.parse::<PgSslMode>().map_err(|err| err.to_string())
}

impl DatabaseArgs {
    pub fn store_settings(&self) -> StoreSettings {
        StoreSettings {
            host: self.db_host.clone(),
            port: self.db_port,
            database: self.db_name.clone(),
            user: self.db_user.clone(),
            password: self.db_password.clone().filter(|p| !p.is_empty()),
            ssl_mode: self.db_ssl_mode,
            connect_timeout: Duration::from_secs(self.db_connect_timeout),
            max_retries: self.db_connect_retries,
            base_delay: Duration::from_secs(self.db_connect_base_delay),
        }
    }
}

#[derive(Debug, Args)]
pub struct ApiArgs {
    /// Port the query API listens on
    #[arg(long, env = "PORT", default_value_t = 8080, global = true)]
    pub port: u16,

    /// Bearer token required by every /api route
    #[arg(long, env = "API_KEY", hide_env_values = true, global = true)]
    pub api_key: Option<String>,

    /// Name reported by /health
    #[arg(long, env = "SERVICE_NAME", default_value = "abq-transit-collector", global = true)]
    pub service_name: String,
}

impl ApiArgs {
    /// The configured key, if it is non-blank.
    pub fn api_key(&self) -> Option<&str> {
        self.api_key.as_deref().filter(|key| !key.trim().is_empty())
    }
}
