use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use std::time::Duration;
use tracing::{info, warn};

use super::{Collection, Document, Store, StoreError, StoreResult};

/// Postgres unique_violation
const UNIQUE_VIOLATION: &str = "23505";

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS documents (
    collection TEXT NOT NULL,
    key        TEXT NOT NULL,
    body       JSONB NOT NULL,
    updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    PRIMARY KEY (collection, key)
)
"#;

/// PostgreSQL-backed document store: one JSONB table keyed by (collection, key).
#[derive(Clone)]
pub struct PgStore {
    db: PgPool,
}

impl PgStore {
    /// Connect with exponential backoff and make sure the table exists.
    pub async fn connect(url: &str, max_retries: u32) -> StoreResult<Self> {
        let db = Self::connect_db_with_retry(url, max_retries).await?;
        sqlx::query(SCHEMA_SQL).execute(&db).await?;
        Ok(Self { db })
    }

    pub fn from_pool(db: PgPool) -> Self {
        Self { db }
    }

    async fn connect_db_with_retry(url: &str, max_retries: u32) -> StoreResult<PgPool> {
        let mut attempt = 0;
        loop {
            match PgPoolOptions::new()
                .max_connections(10)
                .acquire_timeout(Duration::from_secs(10))
                .connect(url)
                .await
            {
                Ok(pool) => {
                    info!("Connected to PostgreSQL");
                    return Ok(pool);
                }
                Err(e) => {
                    attempt += 1;
                    if attempt >= max_retries {
                        return Err(StoreError::Database(e));
                    }
                    warn!("Database connection attempt {} failed: {}. Retrying...", attempt, e);
                    tokio::time::sleep(Duration::from_secs(2u64.pow(attempt))).await;
                }
            }
        }
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().as_deref() == Some(UNIQUE_VIOLATION),
        _ => false,
    }
}

#[async_trait]
impl Store for PgStore {
    async fn insert_if_absent(&self, collection: Collection, key: &str, doc: Document) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO documents (collection, key, body)
            VALUES ($1, $2, $3)
            ON CONFLICT (collection, key) DO NOTHING
            "#,
        )
        .bind(collection.as_str())
        .bind(key)
        .bind(&doc)
        .execute(&self.db)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn upsert_replace(&self, collection: Collection, key: &str, doc: Document) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO documents (collection, key, body)
            VALUES ($1, $2, $3)
            ON CONFLICT (collection, key) DO UPDATE SET
                body = EXCLUDED.body,
                updated_at = now()
            "#,
        )
        .bind(collection.as_str())
        .bind(key)
        .bind(&doc)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    async fn insert(&self, collection: Collection, key: &str, doc: Document) -> StoreResult<()> {
        sqlx::query("INSERT INTO documents (collection, key, body) VALUES ($1, $2, $3)")
            .bind(collection.as_str())
            .bind(key)
            .bind(&doc)
            .execute(&self.db)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    StoreError::Duplicate {
                        collection,
                        key: key.to_string(),
                    }
                } else {
                    StoreError::Database(e)
                }
            })?;
        Ok(())
    }

    async fn get(&self, collection: Collection, key: &str) -> StoreResult<Option<Document>> {
        let body: Option<Document> =
            sqlx::query_scalar("SELECT body FROM documents WHERE collection = $1 AND key = $2")
                .bind(collection.as_str())
                .bind(key)
                .fetch_optional(&self.db)
                .await?;
        Ok(body)
    }

    async fn find_older_than(
        &self,
        collection: Collection,
        field: &str,
        cutoff: DateTime<Utc>,
    ) -> StoreResult<Vec<(String, Document)>> {
        let rows = sqlx::query(
            r#"
            SELECT key, body FROM documents
            WHERE collection = $1
              AND (body->>$2)::timestamptz < $3
            "#,
        )
        .bind(collection.as_str())
        .bind(field)
        .bind(cutoff)
        .fetch_all(&self.db)
        .await?;

        rows.into_iter()
            .map(|row| -> StoreResult<(String, Document)> {
                let key: String = row.try_get("key")?;
                let body: Document = row.try_get("body")?;
                Ok((key, body))
            })
            .collect()
    }

    async fn delete_by_keys(&self, collection: Collection, keys: &[String]) -> StoreResult<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        let result = sqlx::query("DELETE FROM documents WHERE collection = $1 AND key = ANY($2)")
            .bind(collection.as_str())
            .bind(keys)
            .execute(&self.db)
            .await?;
        Ok(result.rows_affected())
    }

    async fn count(&self, collection: Collection) -> StoreResult<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM documents WHERE collection = $1")
            .bind(collection.as_str())
            .fetch_one(&self.db)
            .await?;
        Ok(count.max(0) as u64)
    }

    async fn latest_timestamp(&self, collection: Collection, field: &str) -> StoreResult<Option<DateTime<Utc>>> {
        let latest: Option<DateTime<Utc>> = sqlx::query_scalar(
            "SELECT MAX((body->>$2)::timestamptz) FROM documents WHERE collection = $1",
        )
        .bind(collection.as_str())
        .bind(field)
        .fetch_one(&self.db)
        .await?;
        Ok(latest)
    }
}
