pub mod commands;
pub mod config;
pub mod context;
pub mod feature_store;
pub mod features;
pub mod forest;
pub mod ingest;
pub mod models;
pub mod snapshot;
pub mod split;
pub mod tracking;
