use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use sqlx::postgres::{PgConnectOptions, PgConnection, PgSslMode, Postgres};
use sqlx::{ConnectOptions, Connection, Transaction};
use tokio::sync::{Mutex, MutexGuard, watch};
use tracing::{error, info, warn};

use crate::error::StoreError;

/// Everything needed to open (and re-open) the store connection.
#[derive(Debug, Clone)]
pub struct StoreSettings {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: String,
    pub password: Option<String>,
    pub ssl_mode: PgSslMode,
    /// Per-attempt connect timeout.
    pub connect_timeout: Duration,
    /// Total connection attempts before giving up.
    pub max_retries: u32,
    /// Delay after the first failed attempt; doubles after each further one.
    pub base_delay: Duration,
}

impl StoreSettings {
    fn connect_options(&self) -> PgConnectOptions {
        let options = PgConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .database(&self.database)
            .username(&self.user)
            .ssl_mode(self.ssl_mode)
            .application_name("transit_collector");
        match &self.password {
            Some(password) => options.password(password),
            None => options,
        }
    }
}

/// Delay before retry number `attempt` (1-based): `base * 2^(attempt - 1)`.
pub fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(16);
    base.saturating_mul(1u32 << exponent)
}

/// The single persistent connection shared by ingestion and queries.
///
/// All access goes through [`StoreConnection::with_transaction`]; the mutex
/// holds the connection for exactly one unit of work. Re-establishing a lost
/// connection happens outside that mutex, and only one caller does it at a
/// time.
pub struct StoreConnection {
    settings: StoreSettings,
    options: PgConnectOptions,
    conn: Mutex<Option<PgConnection>>,
    reconnect: Mutex<()>,
    shutdown: Option<watch::Receiver<bool>>,
}

impl StoreConnection {
    /// Creates an unconnected handle. The first unit of work (or an explicit
    /// [`connect`](Self::connect)) opens the connection.
    pub fn new(settings: StoreSettings) -> Self {
        let options = settings.connect_options();
        Self {
            settings,
            options,
            conn: Mutex::new(None),
            reconnect: Mutex::new(()),
            shutdown: None,
        }
    }

    /// Abandons connection attempts and retry backoff once `shutdown` turns true.
    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// Opens the connection, replacing any existing one.
    ///
    /// # Errors
    ///
    /// [`StoreError::Unavailable`] once every attempt has failed, or
    /// [`StoreError::Cancelled`] if shutdown was requested first.
    pub async fn connect(&self) -> Result<(), StoreError> {
        let _reconnect = self.reconnect.lock().await;
        let conn = self.establish().await?;
        if let Some(old) = self.conn.lock().await.replace(conn) {
            let _ = old.close().await;
        }
        Ok(())
    }

    async fn shutdown_requested(&self) {
        let Some(mut shutdown) = self.shutdown.clone() else {
            return std::future::pending().await;
        };
        if shutdown.wait_for(|stop| *stop).await.is_err() {
            std::future::pending::<()>().await;
        }
    }

    fn abandon(&self, attempt: u32) -> StoreError {
        info!(attempt, "Shutdown requested, abandoning database connection");
        StoreError::Cancelled
    }

    async fn establish(&self) -> Result<PgConnection, StoreError> {
        let max_retries = self.settings.max_retries.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            let attempted = tokio::select! {
                biased;
                _ = self.shutdown_requested() => return Err(self.abandon(attempt)),
                result = tokio::time::timeout(
                    self.settings.connect_timeout,
                    self.options.connect(),
                ) => result,
            };
            let err = match attempted {
                Ok(Ok(conn)) => {
                    info!(
                        attempt,
                        host = %self.settings.host,
                        port = self.settings.port,
                        database = %self.settings.database,
                        "Database connection successful"
                    );
                    return Ok(conn);
                }
                Ok(Err(err)) => err,
                Err(_) => sqlx::Error::Io(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    format!("connect timed out after {:?}", self.settings.connect_timeout),
                )),
            };

            if attempt >= max_retries {
                error!(attempts = attempt, error = %err, "Failed to connect to database after all retries");
                return Err(StoreError::Unavailable {
                    attempts: attempt,
                    source: err,
                });
            }

            let delay = backoff_delay(self.settings.base_delay, attempt);
            warn!(
                attempt,
                delay_secs = delay.as_secs_f64(),
                error = %err,
                "Database connection attempt failed, retrying"
            );
            tokio::select! {
                biased;
                _ = self.shutdown_requested() => return Err(self.abandon(attempt)),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// Locks the live connection, establishing one first if there is none.
    ///
    /// While another caller is re-establishing, this fails fast with
    /// [`StoreError::Reconnecting`] instead of queueing behind the backoff.
    async fn connected(&self) -> Result<MutexGuard<'_, Option<PgConnection>>, StoreError> {
        {
            let slot = self.conn.lock().await;
            if slot.is_some() {
                return Ok(slot);
            }
        }

        let Ok(_reconnect) = self.reconnect.try_lock() else {
            return Err(StoreError::Reconnecting);
        };
        {
            let slot = self.conn.lock().await;
            if slot.is_some() {
                return Ok(slot);
            }
        }

        let fresh = self.establish().await?;
        let mut slot = self.conn.lock().await;
        *slot = Some(fresh);
        Ok(slot)
    }

    /// Runs `work` inside one transaction: commit on `Ok`, rollback on `Err`.
    ///
    /// Reconnects first if there is no live connection. A connection-level
    /// failure drops the connection so the next unit of work reconnects.
    pub async fn with_transaction<T, F>(&self, work: F) -> Result<T, StoreError>
    where
        T: Send,
        F: for<'c> FnOnce(&'c mut PgConnection) -> BoxFuture<'c, Result<T, sqlx::Error>> + Send,
    {
        let mut slot = self.connected().await?;
        let Some(conn) = slot.as_mut() else {
            return Err(StoreError::Reconnecting);
        };

        let result = run_unit(conn, work).await;
        if let Err(err) = &result {
            release_if_broken(&mut *slot, err);
        }
        result.map_err(StoreError::Database)
    }

    /// Closes the connection if one is open.
    pub async fn close(&self) {
        if let Some(conn) = self.conn.lock().await.take() {
            match conn.close().await {
                Ok(()) => info!("Database connection closed"),
                Err(err) => warn!(error = %err, "Error closing database connection"),
            }
        }
    }
}

/// The end of a unit of work.
#[async_trait]
trait UnitOfWork: Send {
    async fn commit(self) -> Result<(), sqlx::Error>;
    async fn rollback(self) -> Result<(), sqlx::Error>;
}

#[async_trait]
impl<'c> UnitOfWork for Transaction<'c, Postgres> {
    async fn commit(self) -> Result<(), sqlx::Error> {
        Transaction::commit(self).await
    }

    async fn rollback(self) -> Result<(), sqlx::Error> {
        Transaction::rollback(self).await
    }
}

async fn run_unit<T, F>(conn: &mut PgConnection, work: F) -> Result<T, sqlx::Error>
where
    T: Send,
    F: for<'c> FnOnce(&'c mut PgConnection) -> BoxFuture<'c, Result<T, sqlx::Error>>,
{
    let mut tx = conn.begin().await?;
    let outcome = work(&mut *tx).await;
    finish(tx, outcome).await
}

/// Commits a successful unit; rolls back a failed one and returns its error.
async fn finish<T, U>(unit: U, outcome: Result<T, sqlx::Error>) -> Result<T, sqlx::Error>
where
    T: Send,
    U: UnitOfWork,
{
    match outcome {
        Ok(value) => {
            unit.commit().await?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = unit.rollback().await {
                warn!(error = %rollback_err, "Rollback failed");
            }
            error!(error = %err, "Database operation failed");
            Err(err)
        }
    }
}

/// Empties `slot` after a connection-level failure. Returns whether it did.
fn release_if_broken<C>(slot: &mut Option<C>, err: &sqlx::Error) -> bool {
    if !is_connection_error(err) {
        return false;
    }
    warn!(error = %err, "Database connection lost, will reconnect on next use");
    *slot = None;
    true
}

fn is_connection_error(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::Protocol(_)
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed
    )
}
