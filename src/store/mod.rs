//! Document store seam.
//!
//! The ingestion pipeline only needs keyed upserts, a timestamp range scan,
//! keyed deletes and counts, so the store is modelled as a set of named
//! collections holding JSON documents. `insert_if_absent` and
//! `upsert_replace` are separate operations on purpose: Sport/Team rows are
//! written once, everything else is replaced wholesale.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use thiserror::Error;

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

pub type Document = serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Collection {
    Sports,
    Teams,
    Events,
    Sportsbooks,
    Markets,
    Selections,
    Snapshots,
    SnapshotArchive,
}

impl Collection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Collection::Sports => "sports",
            Collection::Teams => "teams",
            Collection::Events => "events",
            Collection::Sportsbooks => "sportsbooks",
            Collection::Markets => "markets",
            Collection::Selections => "selections",
            Collection::Snapshots => "odds_snapshots",
            Collection::SnapshotArchive => "odds_snapshots_archive",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("duplicate key '{key}' in {collection}")]
    Duplicate { collection: Collection, key: String },

    #[error("failed to (de)serialize document: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("invalid document: {0}")]
    InvalidDocument(String),
}

impl StoreError {
    pub fn is_duplicate(&self) -> bool {
        matches!(self, StoreError::Duplicate { .. })
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

#[async_trait]
pub trait Store: Send + Sync {
    /// Insert unless the key exists. Returns true when a row was written.
    async fn insert_if_absent(&self, collection: Collection, key: &str, doc: Document) -> StoreResult<bool>;

    /// Insert or fully replace the document under `key`.
    async fn upsert_replace(&self, collection: Collection, key: &str, doc: Document) -> StoreResult<()>;

    /// Plain insert; an existing key yields [`StoreError::Duplicate`].
    async fn insert(&self, collection: Collection, key: &str, doc: Document) -> StoreResult<()>;

    /// Attempt every insert, reporting each outcome. Never stops early.
    async fn insert_many(
        &self,
        collection: Collection,
        docs: Vec<(String, Document)>,
    ) -> Vec<StoreResult<()>> {
        let mut results = Vec::with_capacity(docs.len());
        for (key, doc) in docs {
            results.push(self.insert(collection, &key, doc).await);
        }
        results
    }

    async fn get(&self, collection: Collection, key: &str) -> StoreResult<Option<Document>>;

    /// Documents whose RFC 3339 timestamp `field` is strictly before `cutoff`.
    async fn find_older_than(
        &self,
        collection: Collection,
        field: &str,
        cutoff: DateTime<Utc>,
    ) -> StoreResult<Vec<(String, Document)>>;

    async fn delete_by_keys(&self, collection: Collection, keys: &[String]) -> StoreResult<u64>;

    async fn count(&self, collection: Collection) -> StoreResult<u64>;

    /// Most recent value of the timestamp `field`, if any document has one.
    async fn latest_timestamp(&self, collection: Collection, field: &str) -> StoreResult<Option<DateTime<Utc>>>;
}

pub fn to_document<T: Serialize>(value: &T) -> StoreResult<Document> {
    Ok(serde_json::to_value(value)?)
}

pub fn from_document<T: DeserializeOwned>(doc: Document) -> StoreResult<T> {
    Ok(serde_json::from_value(doc)?)
}

/// Outcome of a best-effort bulk insert.
///
/// Duplicate-key failures are counted and dropped; any other failure is kept
/// for the caller to log. Collecting never short-circuits.
#[derive(Debug, Default)]
pub struct BulkInsertReport {
    pub inserted: usize,
    pub duplicates: usize,
    pub failures: Vec<StoreError>,
}

impl FromIterator<StoreResult<()>> for BulkInsertReport {
    fn from_iter<I: IntoIterator<Item = StoreResult<()>>>(iter: I) -> Self {
        let mut report = BulkInsertReport::default();
        for result in iter {
            match result {
                Ok(()) => report.inserted += 1,
                Err(e) if e.is_duplicate() => report.duplicates += 1,
                Err(e) => report.failures.push(e),
            }
        }
        report
    }
}

pub(crate) fn parse_timestamp(doc: &Document, field: &str) -> Option<DateTime<Utc>> {
    doc.get(field)
        .and_then(|v| v.as_str())
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|d| d.with_timezone(&Utc))
}
