use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, warn};

use crate::error::FetchError;
use crate::fetch::{BasicClient, HttpClient, fetch_bytes};
use crate::parser::parse_feed;
use crate::services::feed_source::{FeedSnapshot, SnapshotSource};

/// Default provider endpoint: every ABQ Ride vehicle on every route.
pub const DEFAULT_FEED_URL: &str = "https://data.cabq.gov/transit/realtime/route/allroutes.json";

/// Fetches `allroutes`-style JSON snapshots from one provider URL.
pub struct FeedClient<C = BasicClient> {
    client: C,
    url: String,
    timeout: Duration,
}

impl FeedClient<BasicClient> {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, FetchError> {
        let client = BasicClient::new(timeout).map_err(FetchError::Transport)?;
        Ok(Self::with_client(client, url, timeout))
    }
}

impl<C: HttpClient> FeedClient<C> {
    pub fn with_client(client: C, url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client,
            url: url.into(),
            timeout,
        }
    }
}

#[async_trait]
impl<C: HttpClient> SnapshotSource for FeedClient<C> {
    #[tracing::instrument(skip(self), fields(url = %self.url))]
    async fn fetch_snapshot(&self) -> Result<FeedSnapshot, FetchError> {
        let bytes = fetch_bytes(&self.client, &self.url, self.timeout).await?;
        let collected_at = Utc::now();
        debug!(bytes = bytes.len(), "Feed bytes received, parsing");

        let parsed = parse_feed(&bytes)?;
        let stats = parsed.stats;
        if stats.dropped() > 0 {
            warn!(
                dropped = stats.dropped(),
                missing_vehicle_id = stats.missing_vehicle_id,
                missing_position = stats.missing_position,
                out_of_range = stats.out_of_range,
                "Filtered out invalid vehicle records"
            );
        }
        debug!(
            raw = stats.raw_records,
            valid = stats.valid,
            with_route = stats.with_route,
            route_pct = stats.route_pct(),
            with_heading = stats.with_heading,
            with_speed = stats.with_speed,
            "Snapshot parsed"
        );

        Ok(FeedSnapshot {
            collected_at,
            vehicles: parsed.vehicles,
            stats,
        })
    }
}
