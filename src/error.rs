//! Error taxonomy shared by the collector and the query service.

use std::time::Duration;

use thiserror::Error;

/// Failure fetching or decoding one feed snapshot. Always cycle-local.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("feed request timed out after {0:?}")]
    Timeout(Duration),

    #[error("feed returned HTTP status {0}")]
    Status(reqwest::StatusCode),

    #[error("feed body is not valid JSON: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("feed request failed: {0}")]
    Transport(#[source] reqwest::Error),

    #[error("invalid feed url '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) if err.is_status() => Self::Status(status),
            _ => Self::Transport(err),
        }
    }
}

/// Failure talking to the relational store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Connection establishment gave up after the configured number of attempts.
    #[error("store unavailable after {attempts} connection attempts: {source}")]
    Unavailable {
        attempts: u32,
        #[source]
        source: sqlx::Error,
    },

    /// Another caller is re-establishing the connection; try again later.
    #[error("store connection is being re-established")]
    Reconnecting,

    /// Connection establishment abandoned because shutdown was requested.
    #[error("store connection abandoned for shutdown")]
    Cancelled,

    /// A unit of work failed and was rolled back.
    #[error("store operation failed: {0}")]
    Database(#[from] sqlx::Error),
}

impl StoreError {
    /// Unavailability is fatal wherever it surfaces on the ingestion side.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Unavailable { .. })
    }
}

/// Conditions that end the ingestion loop with an error.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("ingestion halted after {failures} consecutive failed cycles (last: {last_error})")]
    Halted { failures: u32, last_error: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// One failed collection cycle, counted toward the failure threshold.
#[derive(Debug, Error)]
pub enum CycleError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Persist(#[from] StoreError),
}
