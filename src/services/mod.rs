//! Seams between the ingestion/query logic and the outside world.

pub mod feed_source;
pub mod observation_store;

pub use feed_source::{FeedSnapshot, SnapshotSource};
pub use observation_store::ObservationStore;
