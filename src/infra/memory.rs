//! In-process store with the same semantics as the PostgreSQL backend.
//!
//! Used by the test-suite and by `--store memory` for running the daemon
//! without a database. Nothing survives a restart.

use std::collections::{BTreeMap, HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use tokio::sync::Mutex;

use crate::error::StoreError;
use crate::model::{
    ActiveVehicle, CurrentLocation, RecentObservation, RouteObservation, RouteSummary, Summary,
    VehicleObservation,
};
use crate::services::observation_store::ObservationStore;

#[derive(Default)]
struct Rows {
    observations: Vec<VehicleObservation>,
    keys: HashSet<(i64, String)>,
}

#[derive(Default)]
pub struct MemoryStore {
    rows: Mutex<Rows>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored observations.
    pub async fn len(&self) -> usize {
        self.rows.lock().await.observations.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Snapshot of every stored observation, in insertion order.
    pub async fn observations(&self) -> Vec<VehicleObservation> {
        self.rows.lock().await.observations.clone()
    }
}

fn hours_ago(hours: i32) -> DateTime<Utc> {
    Utc::now()
        .checked_sub_signed(TimeDelta::hours(i64::from(hours)))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

// Newest first; vehicle id breaks ties inside one snapshot.
fn newest_first(a: &VehicleObservation, b: &VehicleObservation) -> std::cmp::Ordering {
    b.collected_at
        .cmp(&a.collected_at)
        .then_with(|| a.vehicle_id.cmp(&b.vehicle_id))
}

fn latest_per_vehicle(
    observations: &[VehicleObservation],
    since: DateTime<Utc>,
) -> Vec<&VehicleObservation> {
    let mut latest: BTreeMap<&str, &VehicleObservation> = BTreeMap::new();
    for obs in observations.iter().filter(|o| o.collected_at >= since) {
        latest
            .entry(obs.vehicle_id.as_str())
            .and_modify(|current| {
                if obs.collected_at > current.collected_at {
                    *current = obs;
                }
            })
            .or_insert(obs);
    }
    latest.into_values().collect()
}

#[async_trait]
impl ObservationStore for MemoryStore {
    async fn insert_snapshot(&self, batch: &[VehicleObservation]) -> Result<u64, StoreError> {
        let mut rows = self.rows.lock().await;
        let mut inserted = 0;
        for obs in batch {
            if rows.keys.insert((obs.snapshot_id, obs.vehicle_id.clone())) {
                rows.observations.push(obs.clone());
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    async fn max_snapshot_id(&self) -> Result<Option<i64>, StoreError> {
        let rows = self.rows.lock().await;
        Ok(rows.observations.iter().map(|o| o.snapshot_id).max())
    }

    async fn summary(&self) -> Result<Summary, StoreError> {
        let rows = self.rows.lock().await;
        let obs = &rows.observations;

        let vehicles: HashSet<&str> = obs.iter().map(|o| o.vehicle_id.as_str()).collect();
        let routes: HashSet<&str> = obs
            .iter()
            .filter_map(|o| o.route_short_name.as_deref())
            .collect();
        let days: HashSet<_> = obs.iter().map(|o| o.collected_at.date_naive()).collect();

        Ok(Summary {
            total_records: obs.len() as i64,
            unique_vehicles: vehicles.len() as i64,
            unique_routes: routes.len() as i64,
            first_record: obs.iter().map(|o| o.collected_at).min(),
            latest_record: obs.iter().map(|o| o.collected_at).max(),
            collection_days: days.len() as i64,
        })
    }

    async fn recent(&self, hours: i32, limit: i64) -> Result<Vec<RecentObservation>, StoreError> {
        let since = hours_ago(hours);
        let rows = self.rows.lock().await;

        let mut matching: Vec<_> = rows
            .observations
            .iter()
            .filter(|o| o.collected_at >= since)
            .collect();
        matching.sort_by(|a, b| newest_first(a, b));

        Ok(matching
            .into_iter()
            .take(usize::try_from(limit).unwrap_or(0))
            .map(RecentObservation::from)
            .collect())
    }

    async fn routes(&self) -> Result<Vec<RouteSummary>, StoreError> {
        let rows = self.rows.lock().await;

        let mut grouped: HashMap<&str, (i64, HashSet<&str>, DateTime<Utc>)> = HashMap::new();
        for obs in &rows.observations {
            let Some(route) = obs.route_short_name.as_deref() else {
                continue;
            };
            let entry = grouped
                .entry(route)
                .or_insert_with(|| (0, HashSet::new(), obs.collected_at));
            entry.0 += 1;
            entry.1.insert(obs.vehicle_id.as_str());
            entry.2 = entry.2.max(obs.collected_at);
        }

        let mut routes: Vec<_> = grouped
            .into_iter()
            .map(|(name, (count, vehicles, last_seen))| RouteSummary {
                route_name: name.to_string(),
                observation_count: count,
                vehicle_count: vehicles.len() as i64,
                last_seen: Some(last_seen),
            })
            .collect();
        routes.sort_by(|a, b| {
            b.observation_count
                .cmp(&a.observation_count)
                .then_with(|| a.route_name.cmp(&b.route_name))
        });
        Ok(routes)
    }

    async fn route(
        &self,
        name: &str,
        hours: i32,
        limit: i64,
    ) -> Result<Vec<RouteObservation>, StoreError> {
        let since = hours_ago(hours);
        let rows = self.rows.lock().await;

        let mut matching: Vec<_> = rows
            .observations
            .iter()
            .filter(|o| o.route_short_name.as_deref() == Some(name) && o.collected_at >= since)
            .collect();
        matching.sort_by(|a, b| newest_first(a, b));

        Ok(matching
            .into_iter()
            .take(usize::try_from(limit).unwrap_or(0))
            .map(RouteObservation::from)
            .collect())
    }

    async fn active_vehicles(&self, window: TimeDelta) -> Result<Vec<ActiveVehicle>, StoreError> {
        let rows = self.rows.lock().await;
        Ok(latest_per_vehicle(&rows.observations, Utc::now() - window)
            .into_iter()
            .map(ActiveVehicle::from)
            .collect())
    }

    async fn current_locations(
        &self,
        window: TimeDelta,
    ) -> Result<Vec<CurrentLocation>, StoreError> {
        let rows = self.rows.lock().await;
        Ok(latest_per_vehicle(&rows.observations, Utc::now() - window)
            .into_iter()
            .map(CurrentLocation::from)
            .collect())
    }

    async fn close(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obs(snapshot_id: i64, vehicle_id: &str, route: &str, age: TimeDelta) -> VehicleObservation {
        VehicleObservation {
            snapshot_id,
            collected_at: Utc::now() - age,
            vehicle_id: vehicle_id.to_string(),
            reported_at: None,
            longitude: -106.65,
            latitude: 35.08,
            heading: None,
            speed_mph: Some(12.0),
            route_short_name: Some(route.to_string()),
            trip_id: None,
            next_stop_id: None,
            next_stop_name: None,
            next_stop_sched_time: None,
        }
    }

    #[tokio::test]
    async fn duplicate_key_is_a_no_op() {
        let store = MemoryStore::new();
        let batch = vec![obs(1, "101", "5", TimeDelta::zero())];

        assert_eq!(store.insert_snapshot(&batch).await.unwrap(), 1);
        assert_eq!(store.insert_snapshot(&batch).await.unwrap(), 0);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn same_snapshot_distinct_vehicles_each_stored() {
        let store = MemoryStore::new();
        let batch = vec![
            obs(1, "101", "5", TimeDelta::zero()),
            obs(1, "102", "5", TimeDelta::zero()),
            obs(1, "103", "66", TimeDelta::zero()),
        ];

        assert_eq!(store.insert_snapshot(&batch).await.unwrap(), 3);
        assert_eq!(store.max_snapshot_id().await.unwrap(), Some(1));
    }

    #[tokio::test]
    async fn recent_respects_limit_and_order() {
        let store = MemoryStore::new();
        let batch: Vec<_> = (0..5)
            .map(|i| obs(i, "101", "5", TimeDelta::minutes(50 - i * 10)))
            .collect();
        store.insert_snapshot(&batch).await.unwrap();

        let recent = store.recent(1, 3).await.unwrap();
        let ids: Vec<_> = recent.iter().map(|r| r.snapshot_id).collect();
        assert_eq!(ids, vec![4, 3, 2]);
    }

    #[tokio::test]
    async fn routes_ordered_by_observation_count() {
        let store = MemoryStore::new();
        let batch = vec![
            obs(1, "101", "5", TimeDelta::zero()),
            obs(1, "102", "66", TimeDelta::zero()),
            obs(2, "102", "66", TimeDelta::zero()),
            obs(2, "103", "66", TimeDelta::zero()),
        ];
        store.insert_snapshot(&batch).await.unwrap();

        let routes = store.routes().await.unwrap();
        assert_eq!(routes[0].route_name, "66");
        assert_eq!(routes[0].observation_count, 3);
        assert_eq!(routes[0].vehicle_count, 2);
        assert_eq!(routes[1].route_name, "5");
    }

    #[tokio::test]
    async fn summary_on_empty_store() {
        let summary = MemoryStore::new().summary().await.unwrap();
        assert_eq!(summary, Summary::default());
    }
}
