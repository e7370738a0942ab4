use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;

use super::{parse_timestamp, Collection, Document, Store, StoreError, StoreResult};

/// In-process store. Used when no database is configured, and by tests.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<HashMap<Collection, BTreeMap<String, Document>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// All keys in a collection, in key order.
    pub async fn keys(&self, collection: Collection) -> Vec<String> {
        let inner = self.inner.read().await;
        inner
            .get(&collection)
            .map(|docs| docs.keys().cloned().collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert_if_absent(&self, collection: Collection, key: &str, doc: Document) -> StoreResult<bool> {
        let mut inner = self.inner.write().await;
        let docs = inner.entry(collection).or_default();
        if docs.contains_key(key) {
            return Ok(false);
        }
        docs.insert(key.to_string(), doc);
        Ok(true)
    }

    async fn upsert_replace(&self, collection: Collection, key: &str, doc: Document) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        inner.entry(collection).or_default().insert(key.to_string(), doc);
        Ok(())
    }

    async fn insert(&self, collection: Collection, key: &str, doc: Document) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        let docs = inner.entry(collection).or_default();
        if docs.contains_key(key) {
            return Err(StoreError::Duplicate {
                collection,
                key: key.to_string(),
            });
        }
        docs.insert(key.to_string(), doc);
        Ok(())
    }

    async fn get(&self, collection: Collection, key: &str) -> StoreResult<Option<Document>> {
        let inner = self.inner.read().await;
        Ok(inner.get(&collection).and_then(|docs| docs.get(key)).cloned())
    }

    async fn find_older_than(
        &self,
        collection: Collection,
        field: &str,
        cutoff: DateTime<Utc>,
    ) -> StoreResult<Vec<(String, Document)>> {
        let inner = self.inner.read().await;
        let Some(docs) = inner.get(&collection) else {
            return Ok(Vec::new());
        };
        Ok(docs
            .iter()
            .filter(|(_, doc)| parse_timestamp(doc, field).is_some_and(|ts| ts < cutoff))
            .map(|(key, doc)| (key.clone(), doc.clone()))
            .collect())
    }

    async fn delete_by_keys(&self, collection: Collection, keys: &[String]) -> StoreResult<u64> {
        let mut inner = self.inner.write().await;
        let Some(docs) = inner.get_mut(&collection) else {
            return Ok(0);
        };
        let removed = keys.iter().filter(|key| docs.remove(*key).is_some()).count();
        Ok(removed as u64)
    }

    async fn count(&self, collection: Collection) -> StoreResult<u64> {
        let inner = self.inner.read().await;
        Ok(inner.get(&collection).map_or(0, |docs| docs.len() as u64))
    }

    async fn latest_timestamp(&self, collection: Collection, field: &str) -> StoreResult<Option<DateTime<Utc>>> {
        let inner = self.inner.read().await;
        Ok(inner
            .get(&collection)
            .and_then(|docs| docs.values().filter_map(|doc| parse_timestamp(doc, field)).max()))
    }
}
