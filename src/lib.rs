//! Odds feed ingestion and betting analytics.
//!
//! - [`ingest`]: feed -> normalized entity graph + odds snapshots, snapshot archival
//! - [`analytics`]: arbitrage, positive EV and best-price cheat sheets from live feed data
//! - [`odds`] / [`identity`]: the pure math and id derivation both sides share

pub mod analytics;
pub mod config;
pub mod error;
pub mod feed;
pub mod health;
pub mod identity;
pub mod ingest;
pub mod model;
pub mod odds;
pub mod store;

pub use error::{Error, ErrorKind, Result};
pub use feed::{FeedClient, FeedResponse, OddsApiClient};
pub use ingest::{OddsIngestionService, RefreshRequest};
pub use store::{MemoryStore, PgStore, Store};
