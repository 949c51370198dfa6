//! Podcast feed ingestion and analysis.
//!
//! The pipeline is deliberately split in two: [`feed::parse`] turns raw feed
//! bytes into a normalized document without touching storage, and
//! [`ingest::reconcile_feed`] merges that document into the entity graph in a
//! single transaction. [`stats`] computes derived aggregates on demand and
//! [`people`] handles person identity, including manual merges.

pub mod config;
pub mod error;
pub mod feed;
pub mod ingest;
pub mod people;
pub mod stats;
pub mod store;

pub use config::{AnalyzerConfig, FrequencyBoundaries};
pub use error::{MergeError, ParseError, ReconcileError};
pub use feed::{parse, NormalizedEpisode, NormalizedFeed};
pub use ingest::{reconcile_feed, verify_enclosure, ReconciliationResult};
pub use store::Database;
