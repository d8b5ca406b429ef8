pub mod api;
pub mod config;
pub mod error;
pub mod fetch;
pub mod infra;
pub mod ingest;
pub mod model;
pub mod parser;
pub mod services;
pub mod stats;
pub mod supervisor;
pub mod telemetry;
