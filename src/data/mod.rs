//! Data ingestion and storage
//!
//! CSV readers for registration exports and SQLite observation storage.

pub mod database;
pub mod dataset;
pub mod ingest;

pub use database::{Database, DatabaseStats};
pub use dataset::TrainingSet;
