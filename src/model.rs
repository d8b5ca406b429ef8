//! Vehicle observations and the read-side projections served by the API.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// A validated vehicle report from one feed snapshot, not yet assigned to a
/// collection cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct VehicleReport {
    pub vehicle_id: String,
    /// Provider message time, kept exactly as received.
    pub reported_at: Option<String>,
    pub longitude: f64,
    pub latitude: f64,
    pub heading: Option<f64>,
    pub speed_mph: Option<f64>,
    pub route_short_name: Option<String>,
    pub trip_id: Option<String>,
    pub next_stop_id: Option<String>,
    pub next_stop_name: Option<String>,
    /// Provider schedule time, kept exactly as received.
    pub next_stop_sched_time: Option<String>,
}

impl VehicleReport {
    /// Stamps the report with its cycle's snapshot id and collection time.
    pub fn observe(self, snapshot_id: i64, collected_at: DateTime<Utc>) -> VehicleObservation {
        VehicleObservation {
            snapshot_id,
            collected_at,
            vehicle_id: self.vehicle_id,
            reported_at: self.reported_at,
            longitude: self.longitude,
            latitude: self.latitude,
            heading: self.heading,
            speed_mph: self.speed_mph,
            route_short_name: self.route_short_name,
            trip_id: self.trip_id,
            next_stop_id: self.next_stop_id,
            next_stop_name: self.next_stop_name,
            next_stop_sched_time: self.next_stop_sched_time,
        }
    }
}

/// One reported vehicle position at one point in time, as persisted.
///
/// `(snapshot_id, vehicle_id)` identifies the row; inserting the same pair
/// again is a no-op.
#[derive(Debug, Clone, PartialEq)]
pub struct VehicleObservation {
    pub snapshot_id: i64,
    pub collected_at: DateTime<Utc>,
    pub vehicle_id: String,
    pub reported_at: Option<String>,
    pub longitude: f64,
    pub latitude: f64,
    pub heading: Option<f64>,
    pub speed_mph: Option<f64>,
    pub route_short_name: Option<String>,
    pub trip_id: Option<String>,
    pub next_stop_id: Option<String>,
    pub next_stop_name: Option<String>,
    pub next_stop_sched_time: Option<String>,
}

/// Aggregate counts over the whole table (`/api/summary`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, sqlx::FromRow)]
pub struct Summary {
    pub total_records: i64,
    pub unique_vehicles: i64,
    pub unique_routes: i64,
    pub first_record: Option<DateTime<Utc>>,
    pub latest_record: Option<DateTime<Utc>>,
    pub collection_days: i64,
}

/// Full observation row (`/api/recent`).
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct RecentObservation {
    pub snapshot_id: i64,
    pub timestamp_collected: DateTime<Utc>,
    pub vehicle_id: String,
    pub msg_time: Option<String>,
    pub longitude: Option<f64>,
    pub latitude: Option<f64>,
    pub heading: Option<f64>,
    pub speed_mph: Option<f64>,
    pub route_short_name: Option<String>,
    pub trip_id: Option<String>,
    pub next_stop_id: Option<String>,
    pub next_stop_name: Option<String>,
    pub next_stop_sched_time: Option<String>,
}

/// Per-route counts (`/api/routes`).
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct RouteSummary {
    pub route_name: String,
    pub observation_count: i64,
    pub vehicle_count: i64,
    pub last_seen: Option<DateTime<Utc>>,
}

/// Observation row scoped to a single route (`/api/route`).
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct RouteObservation {
    pub timestamp_collected: DateTime<Utc>,
    pub vehicle_id: String,
    pub msg_time: Option<String>,
    pub longitude: Option<f64>,
    pub latitude: Option<f64>,
    pub heading: Option<f64>,
    pub speed_mph: Option<f64>,
    pub trip_id: Option<String>,
    pub next_stop_name: Option<String>,
}

/// Most recent observation of a vehicle inside the activity window.
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct ActiveVehicle {
    pub vehicle_id: String,
    pub last_seen: DateTime<Utc>,
    pub route_short_name: Option<String>,
    pub longitude: Option<f64>,
    pub latitude: Option<f64>,
    pub speed_mph: Option<f64>,
    pub msg_time: Option<String>,
}

/// Most recent geolocated observation of a vehicle inside the location window.
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct CurrentLocation {
    pub vehicle_id: String,
    pub route_short_name: Option<String>,
    pub longitude: f64,
    pub latitude: f64,
    pub heading: Option<f64>,
    pub speed_mph: Option<f64>,
    pub next_stop_name: Option<String>,
    pub msg_time: Option<String>,
}

impl From<&VehicleObservation> for RecentObservation {
    fn from(obs: &VehicleObservation) -> Self {
        Self {
            snapshot_id: obs.snapshot_id,
            timestamp_collected: obs.collected_at,
            vehicle_id: obs.vehicle_id.clone(),
            msg_time: obs.reported_at.clone(),
            longitude: Some(obs.longitude),
            latitude: Some(obs.latitude),
            heading: obs.heading,
            speed_mph: obs.speed_mph,
            route_short_name: obs.route_short_name.clone(),
            trip_id: obs.trip_id.clone(),
            next_stop_id: obs.next_stop_id.clone(),
            next_stop_name: obs.next_stop_name.clone(),
            next_stop_sched_time: obs.next_stop_sched_time.clone(),
        }
    }
}

impl From<&VehicleObservation> for RouteObservation {
    fn from(obs: &VehicleObservation) -> Self {
        Self {
            timestamp_collected: obs.collected_at,
            vehicle_id: obs.vehicle_id.clone(),
            msg_time: obs.reported_at.clone(),
            longitude: Some(obs.longitude),
            latitude: Some(obs.latitude),
            heading: obs.heading,
            speed_mph: obs.speed_mph,
            trip_id: obs.trip_id.clone(),
            next_stop_name: obs.next_stop_name.clone(),
        }
    }
}

impl From<&VehicleObservation> for ActiveVehicle {
    fn from(obs: &VehicleObservation) -> Self {
        Self {
            vehicle_id: obs.vehicle_id.clone(),
            last_seen: obs.collected_at,
            route_short_name: obs.route_short_name.clone(),
            longitude: Some(obs.longitude),
            latitude: Some(obs.latitude),
            speed_mph: obs.speed_mph,
            msg_time: obs.reported_at.clone(),
        }
    }
}

impl From<&VehicleObservation> for CurrentLocation {
    fn from(obs: &VehicleObservation) -> Self {
        Self {
            vehicle_id: obs.vehicle_id.clone(),
            route_short_name: obs.route_short_name.clone(),
            longitude: obs.longitude,
            latitude: obs.latitude,
            heading: obs.heading,
            speed_mph: obs.speed_mph,
            next_stop_name: obs.next_stop_name.clone(),
            msg_time: obs.reported_at.clone(),
        }
    }
}
