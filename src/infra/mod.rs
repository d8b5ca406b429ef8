//! Concrete implementations of the [`services`](crate::services) traits.

pub mod memory;
pub mod postgres;
pub mod transit_feed;
