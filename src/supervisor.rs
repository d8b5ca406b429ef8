//! Process lifecycle: startup order, signal handling, shutdown and exit status.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::api::{self, AppState};
use crate::config::{Cli, StoreBackend};
use crate::error::StoreError;
use crate::infra::memory::MemoryStore;
use crate::infra::postgres::StoreConnection;
use crate::infra::transit_feed::FeedClient;
use crate::ingest::{CycleOutcome, IngestionLoop, LoopSettings};
use crate::services::ObservationStore;

/// The configured store, kept concrete so Postgres-only setup stays reachable.
enum Backend {
    Postgres(Arc<StoreConnection>),
    Memory(Arc<MemoryStore>),
}

impl Backend {
    fn from_cli(cli: &Cli, shutdown: Option<watch::Receiver<bool>>) -> Self {
        match cli.database.backend {
            StoreBackend::Postgres => {
                let mut conn = StoreConnection::new(cli.database.store_settings());
                if let Some(shutdown) = shutdown {
                    conn = conn.with_shutdown(shutdown);
                }
                Self::Postgres(Arc::new(conn))
            }
            StoreBackend::Memory => {
                warn!("Using the in-memory store; nothing will survive a restart");
                Self::Memory(Arc::new(MemoryStore::new()))
            }
        }
    }

    fn shared(&self) -> Arc<dyn ObservationStore> {
        match self {
            Self::Postgres(conn) => conn.clone() as Arc<dyn ObservationStore>,
            Self::Memory(store) => store.clone() as Arc<dyn ObservationStore>,
        }
    }

    /// Connects (with retries) and optionally applies the schema.
    async fn prepare(&self, init_schema: bool) -> Result<(), StoreError> {
        if let Self::Postgres(conn) = self {
            conn.connect().await?;
            if init_schema {
                conn.ensure_schema().await?;
            }
        }
        Ok(())
    }
}

async fn starting_snapshot(store: &dyn ObservationStore) -> Result<i64> {
    let max = store
        .max_snapshot_id()
        .await
        .context("reading the highest stored snapshot id")?;
    Ok(max.unwrap_or(0))
}

/// Resolves on the first SIGINT or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "Failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                error!(error = %err, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT"),
        _ = terminate => info!("Received SIGTERM"),
    }
}

/// Runs the daemon: query API and collector side by side over one store.
///
/// The API is bound before the store is connected so health checks answer
/// during a slow database start. Returns an error (non-zero exit) when the
/// store is unavailable or the collector halts; a signal-driven shutdown
/// returns `Ok`.
pub async fn run(cli: &Cli) -> Result<()> {
    let shutdown_tx = Arc::new(watch::channel(false).0);
    let signals = {
        let shutdown_tx = shutdown_tx.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            shutdown_tx.send_replace(true);
        })
    };

    let outcome = run_until(cli, shutdown_tx).await;
    signals.abort();
    outcome
}

/// Runs the daemon until `shutdown_tx` carries `true` or the collector stops.
///
/// Shutdown is honoured at every stage, including while the store connection
/// is still being retried.
pub async fn run_until(cli: &Cli, shutdown_tx: Arc<watch::Sender<bool>>) -> Result<()> {
    let Some(api_key) = cli.api.api_key() else {
        bail!("API_KEY must be set to a non-empty value to start the query API");
    };
    let feed = FeedClient::new(&cli.feed.feed_url, cli.feed.timeout())
        .context("building the feed client")?;
    let shutdown_rx = shutdown_tx.subscribe();
    let backend = Backend::from_cli(cli, Some(shutdown_rx.clone()));
    let store = backend.shared();

    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, cli.api.port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding the query API to {addr}"))?;
    let state = AppState::new(store.clone(), api_key, cli.api.service_name.as_str());
    let mut server_rx = shutdown_tx.subscribe();
    let server = tokio::spawn(api::serve(listener, state, async move {
        let _ = server_rx.wait_for(|stop| *stop).await;
    }));

    let outcome = collect(cli, &backend, feed, shutdown_rx).await;

    shutdown_tx.send_replace(true);
    match server.await {
        Ok(Ok(())) => info!("Query API stopped"),
        Ok(Err(err)) => error!(error = %err, "Query API failed"),
        Err(err) => error!(error = %err, "Query API task panicked"),
    }
    store.close().await;

    match &outcome {
        Ok(()) => info!("Collector shut down cleanly"),
        Err(err) => error!(error = %format!("{err:#}"), "Collector exited with an error"),
    }
    outcome
}

async fn collect(
    cli: &Cli,
    backend: &Backend,
    feed: FeedClient,
    shutdown: watch::Receiver<bool>,
) -> Result<()> {
    match backend.prepare(cli.database.init_schema).await {
        Ok(()) => {}
        Err(StoreError::Cancelled) => {
            info!("Shutdown requested before the store was ready");
            return Ok(());
        }
        Err(err) => return Err(err).context("preparing the observation store"),
    }
    let store = backend.shared();

    let mut ingest = IngestionLoop::new(feed, store.clone(), cli.collection.loop_settings());
    if cli.collection.resume_snapshot_ids {
        let last = starting_snapshot(store.as_ref()).await?;
        info!(last_snapshot = last, "Resuming snapshot numbering");
        ingest = ingest.starting_after(last);
    }

    ingest.run(shutdown).await.context("collection loop stopped")
}

/// Collects exactly one snapshot, numbered after the highest stored id.
pub async fn collect_once(cli: &Cli) -> Result<()> {
    let feed = FeedClient::new(&cli.feed.feed_url, cli.feed.timeout())
        .context("building the feed client")?;
    let backend = Backend::from_cli(cli, None);
    let store = backend.shared();

    let outcome = async {
        backend
            .prepare(cli.database.init_schema)
            .await
            .context("preparing the observation store")?;
        let last = starting_snapshot(store.as_ref()).await?;

        let settings = LoopSettings {
            max_consecutive_failures: 1,
            ..cli.collection.loop_settings()
        };
        let mut ingest = IngestionLoop::new(feed, store.clone(), settings).starting_after(last);
        match ingest.run_cycle().await.context("single collection failed")? {
            CycleOutcome::Persisted {
                snapshot_id,
                inserted,
                ..
            } => info!(snapshot_id, inserted, "Single collection stored"),
            other => info!(outcome = ?other, "Single collection stored nothing"),
        }
        Ok::<_, anyhow::Error>(())
    }
    .await;

    store.close().await;
    outcome
}

/// Applies the bundled schema and exits.
pub async fn init_schema(cli: &Cli) -> Result<()> {
    let Backend::Postgres(conn) = Backend::from_cli(cli, None) else {
        bail!("init-schema needs the postgres store");
    };
    let outcome = async {
        conn.connect().await?;
        conn.ensure_schema().await
    }
    .await
    .context("applying the schema");
    conn.close().await;
    outcome
}
