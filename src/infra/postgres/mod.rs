//! PostgreSQL/PostGIS backend.
//!
//! [`StoreConnection`] owns the one shared connection and scopes every
//! operation to a transaction; the [`ObservationStore`] impl holds the SQL.
//!
//! [`ObservationStore`]: crate::services::ObservationStore

mod connection;
mod store;

pub use connection::{StoreConnection, StoreSettings, backoff_delay};
pub use store::SCHEMA_SQL;
