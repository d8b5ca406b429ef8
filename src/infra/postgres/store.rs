use async_trait::async_trait;
use chrono::TimeDelta;
use tracing::{debug, info};

use super::connection::StoreConnection;
use crate::error::StoreError;
use crate::model::{
    ActiveVehicle, CurrentLocation, RecentObservation, RouteObservation, RouteSummary, Summary,
    VehicleObservation,
};
use crate::services::observation_store::ObservationStore;

/// Idempotent DDL for the `vehicle_snapshots` table.
pub const SCHEMA_SQL: &str = include_str!("../../../sql/schema.sql");

// Point is built as (longitude, latitude).
const INSERT_SQL: &str = r#"
INSERT INTO vehicle_snapshots (
    snapshot_id, timestamp_collected, vehicle_id, msg_time, location,
    heading, speed_mph, route_short_name, trip_id,
    next_stop_id, next_stop_name, next_stop_sched_time
) VALUES (
    $1, $2, $3, $4, ST_SetSRID(ST_MakePoint($5, $6), 4326),
    $7, $8, $9, $10, $11, $12, $13
)
ON CONFLICT (snapshot_id, vehicle_id) DO NOTHING
"#;

const MAX_SNAPSHOT_SQL: &str = "SELECT MAX(snapshot_id)::bigint FROM vehicle_snapshots";

const SUMMARY_SQL: &str = r#"
SELECT
    COUNT(*) AS total_records,
    COUNT(DISTINCT vehicle_id) AS unique_vehicles,
    COUNT(DISTINCT route_short_name) AS unique_routes,
    MIN(timestamp_collected) AS first_record,
    MAX(timestamp_collected) AS latest_record,
    COUNT(DISTINCT (timestamp_collected AT TIME ZONE 'UTC')::date) AS collection_days
FROM vehicle_snapshots
"#;

const RECENT_SQL: &str = r#"
SELECT
    snapshot_id::bigint AS snapshot_id,
    timestamp_collected,
    vehicle_id,
    msg_time,
    ST_X(location) AS longitude,
    ST_Y(location) AS latitude,
    heading::float8 AS heading,
    speed_mph::float8 AS speed_mph,
    route_short_name,
    trip_id,
    next_stop_id,
    next_stop_name,
    next_stop_sched_time
FROM vehicle_snapshots
WHERE timestamp_collected >= NOW() - make_interval(hours => $1)
ORDER BY timestamp_collected DESC, vehicle_id
LIMIT $2
"#;

const ROUTES_SQL: &str = r#"
SELECT
    route_short_name AS route_name,
    COUNT(*) AS observation_count,
    COUNT(DISTINCT vehicle_id) AS vehicle_count,
    MAX(timestamp_collected) AS last_seen
FROM vehicle_snapshots
WHERE route_short_name IS NOT NULL
GROUP BY route_short_name
ORDER BY observation_count DESC, route_short_name
"#;

const ROUTE_SQL: &str = r#"
SELECT
    timestamp_collected,
    vehicle_id,
    msg_time,
    ST_X(location) AS longitude,
    ST_Y(location) AS latitude,
    heading::float8 AS heading,
    speed_mph::float8 AS speed_mph,
    trip_id,
    next_stop_name
FROM vehicle_snapshots
WHERE route_short_name = $1
  AND timestamp_collected >= NOW() - make_interval(hours => $2)
ORDER BY timestamp_collected DESC, vehicle_id
LIMIT $3
"#;

const ACTIVE_SQL: &str = r#"
SELECT DISTINCT ON (vehicle_id)
    vehicle_id,
    timestamp_collected AS last_seen,
    route_short_name,
    ST_X(location) AS longitude,
    ST_Y(location) AS latitude,
    speed_mph::float8 AS speed_mph,
    msg_time
FROM vehicle_snapshots
WHERE timestamp_collected >= NOW() - make_interval(secs => $1)
ORDER BY vehicle_id, timestamp_collected DESC
"#;

const LOCATIONS_SQL: &str = r#"
SELECT DISTINCT ON (vehicle_id)
    vehicle_id,
    route_short_name,
    ST_X(location) AS longitude,
    ST_Y(location) AS latitude,
    heading::float8 AS heading,
    speed_mph::float8 AS speed_mph,
    next_stop_name,
    msg_time
FROM vehicle_snapshots
WHERE timestamp_collected >= NOW() - make_interval(secs => $1)
  AND location IS NOT NULL
  AND ST_X(location) IS NOT NULL
  AND ST_Y(location) IS NOT NULL
ORDER BY vehicle_id, timestamp_collected DESC
"#;

impl StoreConnection {
    /// Applies [`SCHEMA_SQL`]. Safe to run against an already provisioned database.
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        self.with_transaction(|conn| {
            Box::pin(async move { sqlx::Executor::execute(conn, sqlx::raw_sql(SCHEMA_SQL)).await.map(|_| ()) })
        })
        .await?;
        info!("Schema ensured for vehicle_snapshots");
        Ok(())
    }
}

fn window_secs(window: TimeDelta) -> f64 {
    window.num_milliseconds() as f64 / 1000.0
}

#[async_trait]
impl ObservationStore for StoreConnection {
    #[tracing::instrument(skip_all, fields(records = batch.len()))]
    async fn insert_snapshot(&self, batch: &[VehicleObservation]) -> Result<u64, StoreError> {
        if batch.is_empty() {
            return Ok(0);
        }
        let batch = batch.to_vec();

        let inserted = self
            .with_transaction(move |conn| {
                Box::pin(async move {
                    let mut inserted = 0;
                    for obs in &batch {
                        inserted += sqlx::query(INSERT_SQL)
                            .bind(obs.snapshot_id)
                            .bind(obs.collected_at)
                            .bind(&obs.vehicle_id)
                            .bind(&obs.reported_at)
                            .bind(obs.longitude)
                            .bind(obs.latitude)
                            .bind(obs.heading)
                            .bind(obs.speed_mph)
                            .bind(&obs.route_short_name)
                            .bind(&obs.trip_id)
                            .bind(&obs.next_stop_id)
                            .bind(&obs.next_stop_name)
                            .bind(&obs.next_stop_sched_time)
                            .execute(&mut *conn)
                            .await?
                            .rows_affected();
                    }
                    Ok::<_, sqlx::Error>(inserted)
                })
            })
            .await?;

        debug!(inserted, "Batch committed");
        Ok(inserted)
    }

    async fn max_snapshot_id(&self) -> Result<Option<i64>, StoreError> {
        self.with_transaction(|conn| {
            Box::pin(async move {
                sqlx::query_scalar::<_, Option<i64>>(MAX_SNAPSHOT_SQL)
                    .fetch_one(conn)
                    .await
            })
        })
        .await
    }

    async fn summary(&self) -> Result<Summary, StoreError> {
        self.with_transaction(|conn| {
            Box::pin(async move { sqlx::query_as::<_, Summary>(SUMMARY_SQL).fetch_one(conn).await })
        })
        .await
    }

    async fn recent(&self, hours: i32, limit: i64) -> Result<Vec<RecentObservation>, StoreError> {
        self.with_transaction(move |conn| {
            Box::pin(async move {
                sqlx::query_as::<_, RecentObservation>(RECENT_SQL)
                    .bind(hours)
                    .bind(limit)
                    .fetch_all(conn)
                    .await
            })
        })
        .await
    }

    async fn routes(&self) -> Result<Vec<RouteSummary>, StoreError> {
        self.with_transaction(|conn| {
            Box::pin(async move {
                sqlx::query_as::<_, RouteSummary>(ROUTES_SQL)
                    .fetch_all(conn)
                    .await
            })
        })
        .await
    }

    async fn route(
        &self,
        name: &str,
        hours: i32,
        limit: i64,
    ) -> Result<Vec<RouteObservation>, StoreError> {
        let name = name.to_string();
        self.with_transaction(move |conn| {
            Box::pin(async move {
                sqlx::query_as::<_, RouteObservation>(ROUTE_SQL)
                    .bind(name)
                    .bind(hours)
                    .bind(limit)
                    .fetch_all(conn)
                    .await
            })
        })
        .await
    }

    async fn active_vehicles(&self, window: TimeDelta) -> Result<Vec<ActiveVehicle>, StoreError> {
        let secs = window_secs(window);
        self.with_transaction(move |conn| {
            Box::pin(async move {
                sqlx::query_as::<_, ActiveVehicle>(ACTIVE_SQL)
                    .bind(secs)
                    .fetch_all(conn)
                    .await
            })
        })
        .await
    }

    async fn current_locations(
        &self,
        window: TimeDelta,
    ) -> Result<Vec<CurrentLocation>, StoreError> {
        let secs = window_secs(window);
        self.with_transaction(move |conn| {
            Box::pin(async move {
                sqlx::query_as::<_, CurrentLocation>(LOCATIONS_SQL)
                    .bind(secs)
                    .fetch_all(conn)
                    .await
            })
        })
        .await
    }

    async fn close(&self) {
        StoreConnection::close(self).await;
    }
}
