mod client;

pub use client::{DEFAULT_FEED_URL, FeedClient};
