//! Trait and types for obtaining vehicle snapshots from a feed provider.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::FetchError;
use crate::model::{VehicleObservation, VehicleReport};
use crate::stats::SnapshotStats;

/// The valid vehicles from one fetch, all sharing one collection time.
#[derive(Debug, Clone)]
pub struct FeedSnapshot {
    pub collected_at: DateTime<Utc>,
    pub vehicles: Vec<VehicleReport>,
    pub stats: SnapshotStats,
}

impl FeedSnapshot {
    /// Stamps every vehicle with `snapshot_id`, producing the batch to persist.
    pub fn into_observations(self, snapshot_id: i64) -> Vec<VehicleObservation> {
        let collected_at = self.collected_at;
        self.vehicles
            .into_iter()
            .map(|v| v.observe(snapshot_id, collected_at))
            .collect()
    }
}

/// Abstraction over the transit feed provider.
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    /// Fetches and validates one snapshot.
    async fn fetch_snapshot(&self) -> Result<FeedSnapshot, FetchError>;
}
