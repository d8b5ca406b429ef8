//! The collection loop: fetch → validate → persist → pace, with a
//! consecutive-failure circuit breaker.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::error::{CycleError, IngestError, StoreError};
use crate::services::{ObservationStore, SnapshotSource};

pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(30);
pub const DEFAULT_MAX_CONSECUTIVE_FAILURES: u32 = 10;

#[derive(Debug, Clone, Copy)]
pub struct LoopSettings {
    /// Target period between cycle starts.
    pub interval: Duration,
    /// Consecutive failed cycles that halt the loop.
    pub max_consecutive_failures: u32,
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self {
            interval: DEFAULT_INTERVAL,
            max_consecutive_failures: DEFAULT_MAX_CONSECUTIVE_FAILURES,
        }
    }
}

/// What to do after a cycle that took `elapsed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pacing {
    Sleep(Duration),
    /// The cycle used the whole interval; start the next one immediately.
    Overrun(Duration),
}

pub fn pace(interval: Duration, elapsed: Duration) -> Pacing {
    match interval.checked_sub(elapsed) {
        Some(remaining) if !remaining.is_zero() => Pacing::Sleep(remaining),
        _ => Pacing::Overrun(elapsed),
    }
}

/// Result of one non-fatal cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    Persisted {
        snapshot_id: i64,
        vehicles: usize,
        inserted: u64,
    },
    Empty {
        snapshot_id: i64,
    },
    Failed {
        snapshot_id: i64,
        consecutive_failures: u32,
    },
    /// Shutdown arrived while the store was reconnecting; nothing was stored
    /// and the failure count is unchanged.
    Interrupted {
        snapshot_id: i64,
    },
}

pub struct IngestionLoop<S> {
    source: S,
    store: Arc<dyn ObservationStore>,
    settings: LoopSettings,
    snapshot_counter: i64,
    consecutive_failures: u32,
}

impl<S: SnapshotSource> IngestionLoop<S> {
    pub fn new(source: S, store: Arc<dyn ObservationStore>, settings: LoopSettings) -> Self {
        Self {
            source,
            store,
            settings,
            snapshot_counter: 0,
            consecutive_failures: 0,
        }
    }

    /// Continues numbering after `snapshot_id` instead of from zero.
    pub fn starting_after(mut self, snapshot_id: i64) -> Self {
        self.snapshot_counter = snapshot_id;
        self
    }

    pub fn snapshot_counter(&self) -> i64 {
        self.snapshot_counter
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Runs one cycle.
    ///
    /// # Errors
    ///
    /// [`IngestError::Halted`] when this failure reaches the threshold, or
    /// [`IngestError::Store`] when the store cannot be reached at all.
    /// Every other failure is counted and reported as [`CycleOutcome::Failed`].
    pub async fn run_cycle(&mut self) -> Result<CycleOutcome, IngestError> {
        self.snapshot_counter += 1;
        let snapshot_id = self.snapshot_counter;
        info!(snapshot_id, "Collecting snapshot");

        match self.collect(snapshot_id).await {
            Ok(Some((vehicles, inserted))) => {
                self.consecutive_failures = 0;
                info!(
                    snapshot_id,
                    vehicles,
                    inserted,
                    duplicates = vehicles as u64 - inserted.min(vehicles as u64),
                    "Snapshot completed"
                );
                Ok(CycleOutcome::Persisted {
                    snapshot_id,
                    vehicles,
                    inserted,
                })
            }
            Ok(None) => {
                warn!(snapshot_id, "No vehicle data found in this snapshot");
                Ok(CycleOutcome::Empty { snapshot_id })
            }
            Err(CycleError::Persist(StoreError::Cancelled)) => {
                info!(snapshot_id, "Shutdown requested while reconnecting, snapshot discarded");
                Ok(CycleOutcome::Interrupted { snapshot_id })
            }
            Err(CycleError::Persist(err)) if err.is_fatal() => {
                error!(snapshot_id, error = %err, "Store unavailable, stopping collection");
                Err(IngestError::Store(err))
            }
            Err(err) => {
                self.consecutive_failures += 1;
                error!(
                    snapshot_id,
                    consecutive_failures = self.consecutive_failures,
                    error = %err,
                    "Snapshot failed"
                );

                if self.consecutive_failures >= self.settings.max_consecutive_failures.max(1) {
                    error!(
                        consecutive_failures = self.consecutive_failures,
                        "Too many consecutive failures, shutting down"
                    );
                    return Err(IngestError::Halted {
                        failures: self.consecutive_failures,
                        last_error: err.to_string(),
                    });
                }

                Ok(CycleOutcome::Failed {
                    snapshot_id,
                    consecutive_failures: self.consecutive_failures,
                })
            }
        }
    }

    async fn collect(&self, snapshot_id: i64) -> Result<Option<(usize, u64)>, CycleError> {
        let snapshot = self.source.fetch_snapshot().await?;
        if snapshot.vehicles.is_empty() {
            return Ok(None);
        }

        let batch = snapshot.into_observations(snapshot_id);
        let inserted = self.store.insert_snapshot(&batch).await?;
        Ok(Some((batch.len(), inserted)))
    }

    /// Runs cycles every `interval` until `shutdown` turns true or a fatal
    /// error occurs. A cycle already in progress always finishes.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Result<(), IngestError> {
        info!(
            interval_secs = self.settings.interval.as_secs_f64(),
            max_consecutive_failures = self.settings.max_consecutive_failures,
            first_snapshot = self.snapshot_counter + 1,
            "Starting continuous collection"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            let started = Instant::now();
            self.run_cycle().await?;

            match pace(self.settings.interval, started.elapsed()) {
                Pacing::Sleep(remaining) => {
                    tokio::select! {
                        _ = tokio::time::sleep(remaining) => {}
                        _ = wait_for_shutdown(&mut shutdown) => break,
                    }
                }
                Pacing::Overrun(elapsed) => {
                    warn!(
                        elapsed_secs = elapsed.as_secs_f64(),
                        interval_secs = self.settings.interval.as_secs_f64(),
                        "Collection took longer than the interval"
                    );
                }
            }
        }

        info!(last_snapshot = self.snapshot_counter, "Received shutdown signal, collection stopped");
        Ok(())
    }
}

async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    if shutdown.wait_for(|stop| *stop).await.is_err() {
        // Sender gone: no shutdown can arrive any more.
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

    use async_trait::async_trait;
    use chrono::{TimeDelta, Utc};

    use super::*;
    use crate::error::{FetchError, StoreError};
    use crate::infra::memory::MemoryStore;
    use crate::model::{
        ActiveVehicle, CurrentLocation, RecentObservation, RouteObservation, RouteSummary,
        Summary, VehicleObservation,
    };
    use crate::parser::parse_feed;
    use crate::services::FeedSnapshot;

    fn snapshot(ids: &[&str]) -> FeedSnapshot {
        let vehicles: Vec<_> = ids
            .iter()
            .map(|id| {
                serde_json::json!({
                    "vehicle_id": id,
                    "latitude": 35.08,
                    "longitude": -106.65,
                    "route_short_name": "5"
                })
            })
            .collect();
        let body = serde_json::json!({ "allroutes": vehicles }).to_string();
        let parsed = parse_feed(body.as_bytes()).unwrap();
        FeedSnapshot {
            collected_at: Utc::now(),
            vehicles: parsed.vehicles,
            stats: parsed.stats,
        }
    }

    fn timeout() -> FetchError {
        FetchError::Timeout(Duration::from_secs(15))
    }

    /// Replays scripted results, then keeps returning `fallback`.
    struct ScriptedSource {
        script: Mutex<VecDeque<Result<FeedSnapshot, FetchError>>>,
        fallback: Option<FeedSnapshot>,
        delay: Duration,
        fetches: AtomicUsize,
    }

    impl ScriptedSource {
        fn new(script: Vec<Result<FeedSnapshot, FetchError>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                fallback: None,
                delay: Duration::ZERO,
                fetches: AtomicUsize::new(0),
            }
        }

        fn always(snapshot: FeedSnapshot) -> Self {
            Self {
                fallback: Some(snapshot),
                ..Self::new(Vec::new())
            }
        }

        fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }
    }

    #[async_trait]
    impl SnapshotSource for ScriptedSource {
        async fn fetch_snapshot(&self) -> Result<FeedSnapshot, FetchError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            let next = self.script.lock().unwrap().pop_front();
            match (next, &self.fallback) {
                (Some(result), _) => result,
                (None, Some(snapshot)) => Ok(snapshot.clone()),
                (None, None) => Err(timeout()),
            }
        }
    }

    #[async_trait]
    impl SnapshotSource for Arc<ScriptedSource> {
        async fn fetch_snapshot(&self) -> Result<FeedSnapshot, FetchError> {
            self.as_ref().fetch_snapshot().await
        }
    }

    /// Memory store whose next `failures` inserts fail.
    #[derive(Default)]
    struct FlakyStore {
        inner: MemoryStore,
        failures: AtomicU32,
        unavailable: bool,
        cancelled: bool,
    }

    #[async_trait]
    impl ObservationStore for FlakyStore {
        async fn insert_snapshot(&self, batch: &[VehicleObservation]) -> Result<u64, StoreError> {
            if self.cancelled {
                return Err(StoreError::Cancelled);
            }
            if self.unavailable {
                return Err(StoreError::Unavailable {
                    attempts: 5,
                    source: sqlx::Error::PoolTimedOut,
                });
            }
            let remaining = self.failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failures.store(remaining - 1, Ordering::SeqCst);
                return Err(StoreError::Database(sqlx::Error::Protocol(
                    "connection reset mid-transaction".to_string(),
                )));
            }
            self.inner.insert_snapshot(batch).await
        }

        async fn max_snapshot_id(&self) -> Result<Option<i64>, StoreError> {
            self.inner.max_snapshot_id().await
        }

        async fn summary(&self) -> Result<Summary, StoreError> {
            self.inner.summary().await
        }

        async fn recent(&self, hours: i32, limit: i64) -> Result<Vec<RecentObservation>, StoreError> {
            self.inner.recent(hours, limit).await
        }

        async fn routes(&self) -> Result<Vec<RouteSummary>, StoreError> {
            self.inner.routes().await
        }

        async fn route(
            &self,
            name: &str,
            hours: i32,
            limit: i64,
        ) -> Result<Vec<RouteObservation>, StoreError> {
            self.inner.route(name, hours, limit).await
        }

        async fn active_vehicles(&self, window: TimeDelta) -> Result<Vec<ActiveVehicle>, StoreError> {
            self.inner.active_vehicles(window).await
        }

        async fn current_locations(
            &self,
            window: TimeDelta,
        ) -> Result<Vec<CurrentLocation>, StoreError> {
            self.inner.current_locations(window).await
        }

        async fn close(&self) {}
    }

    fn settings(max_consecutive_failures: u32) -> LoopSettings {
        LoopSettings {
            interval: Duration::from_secs(30),
            max_consecutive_failures,
        }
    }

    #[test]
    fn pace_sleeps_for_remainder() {
        let interval = Duration::from_secs(30);
        assert_eq!(
            pace(interval, Duration::from_secs(4)),
            Pacing::Sleep(Duration::from_secs(26))
        );
    }

    #[test]
    fn pace_overrun_when_cycle_exceeds_interval() {
        let interval = Duration::from_secs(30);
        assert_eq!(
            pace(interval, Duration::from_secs(31)),
            Pacing::Overrun(Duration::from_secs(31))
        );
        assert_eq!(
            pace(interval, Duration::from_secs(30)),
            Pacing::Overrun(Duration::from_secs(30))
        );
    }

    #[tokio::test]
    async fn failures_accumulate_then_reset_on_success() {
        let source = ScriptedSource::new(vec![
            Err(timeout()),
            Err(FetchError::Status(reqwest::StatusCode::SERVICE_UNAVAILABLE)),
            Err(timeout()),
            Ok(snapshot(&["101", "102"])),
        ]);
        let store = Arc::new(MemoryStore::new());
        let mut ingest = IngestionLoop::new(source, store.clone(), settings(10));

        for expected in 1..=3 {
            let outcome = ingest.run_cycle().await.unwrap();
            assert_eq!(
                outcome,
                CycleOutcome::Failed {
                    snapshot_id: i64::from(expected),
                    consecutive_failures: expected,
                }
            );
            assert_eq!(ingest.consecutive_failures(), expected);
        }

        let outcome = ingest.run_cycle().await.unwrap();
        assert_eq!(
            outcome,
            CycleOutcome::Persisted {
                snapshot_id: 4,
                vehicles: 2,
                inserted: 2,
            }
        );
        assert_eq!(ingest.consecutive_failures(), 0);
        assert_eq!(store.len().await, 2);
    }

    #[tokio::test]
    async fn reaching_threshold_halts() {
        let source = ScriptedSource::new(Vec::new());
        let mut ingest = IngestionLoop::new(source, Arc::new(MemoryStore::new()), settings(3));

        assert!(ingest.run_cycle().await.is_ok());
        assert!(ingest.run_cycle().await.is_ok());
        match ingest.run_cycle().await {
            Err(IngestError::Halted { failures, last_error }) => {
                assert_eq!(failures, 3);
                assert!(last_error.contains("timed out"));
            }
            other => panic!("expected halt, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn empty_snapshot_leaves_failure_count_alone() {
        let source = ScriptedSource::new(vec![Err(timeout()), Ok(snapshot(&[]))]);
        let store = Arc::new(MemoryStore::new());
        let mut ingest = IngestionLoop::new(source, store.clone(), settings(10));

        ingest.run_cycle().await.unwrap();
        let outcome = ingest.run_cycle().await.unwrap();

        assert_eq!(outcome, CycleOutcome::Empty { snapshot_id: 2 });
        assert_eq!(ingest.consecutive_failures(), 1);
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn persist_failure_counts_and_keeps_batch_out() {
        let source = ScriptedSource::always(snapshot(&["101", "102", "103"]));
        let store = Arc::new(FlakyStore {
            failures: AtomicU32::new(2),
            ..FlakyStore::default()
        });
        let mut ingest = IngestionLoop::new(source, store.clone(), settings(10));

        ingest.run_cycle().await.unwrap();
        ingest.run_cycle().await.unwrap();
        assert_eq!(ingest.consecutive_failures(), 2);
        assert!(store.inner.is_empty().await);

        ingest.run_cycle().await.unwrap();
        assert_eq!(ingest.consecutive_failures(), 0);
        let stored = store.inner.observations().await;
        assert_eq!(stored.len(), 3);
        assert!(stored.iter().all(|o| o.snapshot_id == 3));
    }

    #[tokio::test]
    async fn store_unavailable_is_fatal_immediately() {
        let source = ScriptedSource::always(snapshot(&["101"]));
        let store = Arc::new(FlakyStore {
            unavailable: true,
            ..FlakyStore::default()
        });
        let mut ingest = IngestionLoop::new(source, store, settings(10));

        let err = ingest.run_cycle().await.unwrap_err();
        assert!(matches!(err, IngestError::Store(StoreError::Unavailable { .. })));
    }

    #[tokio::test]
    async fn shutdown_during_reconnect_is_not_a_failure() {
        let source = ScriptedSource::always(snapshot(&["101"]));
        let store = Arc::new(FlakyStore {
            cancelled: true,
            ..FlakyStore::default()
        });
        let mut ingest = IngestionLoop::new(source, store, settings(1));

        let outcome = ingest.run_cycle().await.unwrap();

        assert_eq!(outcome, CycleOutcome::Interrupted { snapshot_id: 1 });
        assert_eq!(ingest.consecutive_failures(), 0);
    }

    #[tokio::test]
    async fn snapshot_ids_advance_every_cycle_and_resume() {
        let source = ScriptedSource::new(vec![
            Ok(snapshot(&["101"])),
            Err(timeout()),
            Ok(snapshot(&["101"])),
        ]);
        let store = Arc::new(MemoryStore::new());
        let mut ingest = IngestionLoop::new(source, store.clone(), settings(10)).starting_after(41);

        for _ in 0..3 {
            ingest.run_cycle().await.unwrap();
        }

        assert_eq!(ingest.snapshot_counter(), 44);
        let ids: Vec<_> = store.observations().await.iter().map(|o| o.snapshot_id).collect();
        assert_eq!(ids, vec![42, 44]);
    }

    #[tokio::test(start_paused = true)]
    async fn run_paces_cycles_and_halts_at_threshold() {
        let source = ScriptedSource::new(Vec::new());
        let ingest = IngestionLoop::new(source, Arc::new(MemoryStore::new()), settings(3));
        let (_tx, rx) = watch::channel(false);
        let started = Instant::now();

        let err = ingest.run(rx).await.unwrap_err();

        assert!(matches!(err, IngestError::Halted { failures: 3, .. }));
        // Two full intervals, no sleep after the halting cycle.
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(60), "{elapsed:?}");
        assert!(elapsed < Duration::from_secs(61), "{elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn run_skips_sleep_after_overrun() {
        let source = ScriptedSource::new(Vec::new()).with_delay(Duration::from_secs(45));
        let ingest = IngestionLoop::new(source, Arc::new(MemoryStore::new()), settings(2));
        let (_tx, rx) = watch::channel(false);
        let started = Instant::now();

        ingest.run(rx).await.unwrap_err();

        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(90), "{elapsed:?}");
        assert!(elapsed < Duration::from_secs(91), "{elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_interrupts_pacing_sleep() {
        let source = Arc::new(ScriptedSource::always(snapshot(&["101"])));
        let store = Arc::new(MemoryStore::new());
        let ingest = IngestionLoop::new(source.clone(), store.clone(), settings(10));
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(ingest.run(rx));
        tokio::time::sleep(Duration::from_secs(45)).await;
        tx.send(true).unwrap();

        handle.await.unwrap().unwrap();
        assert_eq!(source.fetches.load(Ordering::SeqCst), 2);
        assert_eq!(store.len().await, 2);
    }
}
