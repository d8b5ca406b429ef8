//! Trait for the relational store shared by the collector and the query API.

use async_trait::async_trait;
use chrono::TimeDelta;

use crate::error::StoreError;
use crate::model::{
    ActiveVehicle, CurrentLocation, RecentObservation, RouteObservation, RouteSummary, Summary,
    VehicleObservation,
};

/// Row cap for `/api/recent`.
pub const RECENT_ROW_LIMIT: i64 = 1000;
/// Row cap for `/api/route`.
pub const ROUTE_ROW_LIMIT: i64 = 500;
/// A vehicle counts as active if it was collected within this many minutes.
pub const ACTIVE_WINDOW_MINUTES: i64 = 10;
/// Current locations only consider observations this many minutes old or newer.
pub const LOCATION_WINDOW_MINUTES: i64 = 5;

/// Persistent storage for vehicle observations.
///
/// Every method is one unit of work: it either fully commits or leaves the
/// store untouched. Implementations must treat a repeated
/// `(snapshot_id, vehicle_id)` insert as a no-op.
#[async_trait]
pub trait ObservationStore: Send + Sync {
    /// Inserts a whole batch atomically and returns how many rows were new.
    async fn insert_snapshot(&self, batch: &[VehicleObservation]) -> Result<u64, StoreError>;

    /// Highest stored snapshot id, if any rows exist.
    async fn max_snapshot_id(&self) -> Result<Option<i64>, StoreError>;

    async fn summary(&self) -> Result<Summary, StoreError>;

    /// Observations collected in the last `hours`, newest first, at most `limit`.
    async fn recent(&self, hours: i32, limit: i64) -> Result<Vec<RecentObservation>, StoreError>;

    /// Per-route counts ordered by observation count, largest first.
    async fn routes(&self) -> Result<Vec<RouteSummary>, StoreError>;

    /// Observations for one route collected in the last `hours`, newest first.
    async fn route(
        &self,
        name: &str,
        hours: i32,
        limit: i64,
    ) -> Result<Vec<RouteObservation>, StoreError>;

    /// Latest observation per vehicle collected within `window`.
    async fn active_vehicles(&self, window: TimeDelta) -> Result<Vec<ActiveVehicle>, StoreError>;

    /// Latest geolocated observation per vehicle collected within `window`.
    async fn current_locations(
        &self,
        window: TimeDelta,
    ) -> Result<Vec<CurrentLocation>, StoreError>;

    /// Releases the underlying connection, if any.
    async fn close(&self);
}
