use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use sqlx::Row;

use super::CacheStore;
use crate::error::Result;
use crate::store::StoreAdapter;
use crate::types::{CacheEntry, RequestContext};

/// Content-addressed response cache with hit accounting.
pub struct PgCacheRepository {
    store: Arc<StoreAdapter>,
}

impl PgCacheRepository {
    pub fn new(store: Arc<StoreAdapter>) -> Self {
        PgCacheRepository { store }
    }

    fn entry_from_row(row: &sqlx::postgres::PgRow) -> Result<CacheEntry> {
        let context_json: serde_json::Value = row.try_get("context")?;
        let context = match context_json {
            serde_json::Value::Object(map) => map.into_iter().collect(),
            _ => HashMap::new(),
        };
        Ok(CacheEntry {
            request_hash: row.try_get("request_hash")?,
            question: row.try_get("question")?,
            context,
            response: row.try_get("response")?,
            hit_count: u64::try_from(row.try_get::<i64, _>("hit_count")?).unwrap_or(0),
            last_hit_at: row.try_get("last_hit_at")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[async_trait]
impl CacheStore for PgCacheRepository {
    async fn find_by_hash(&self, hash: &str) -> Result<Option<CacheEntry>> {
        let row = sqlx::query("SELECT * FROM cache WHERE request_hash = $1")
            .bind(hash)
            .fetch_optional(self.store.pool())
            .await?;
        row.as_ref().map(Self::entry_from_row).transpose()
    }

    async fn save(&self, hash: &str, question: &str, context: &RequestContext, response: &str) -> Result<()> {
        let context_json = serde_json::Value::Object(context.clone().into_iter().collect());
        sqlx::query(
            r#"
            INSERT INTO cache (request_hash, question, context, response, hit_count, created_at, updated_at)
            VALUES ($1, $2, $3, $4, 0, now(), now())
            ON CONFLICT (request_hash) DO UPDATE SET
                question = EXCLUDED.question,
                context = EXCLUDED.context,
                response = EXCLUDED.response,
                updated_at = now()
            "#,
        )
        .bind(hash)
        .bind(question)
        .bind(context_json)
        .bind(response)
        .execute(self.store.pool())
        .await?;
        Ok(())
    }

    async fn increment_hit_count(&self, hash: &str) -> Result<()> {
        sqlx::query("UPDATE cache SET hit_count = hit_count + 1, last_hit_at = now() WHERE request_hash = $1")
            .bind(hash)
            .execute(self.store.pool())
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    #[ignore = "requires a live Postgres instance"]
    async fn save_and_hit_roundtrip() {
        let pool = sqlx::PgPool::connect("postgres://localhost/ragforge_test").await.unwrap();
        let store = Arc::new(StoreAdapter::from_external(pool));
        let repo = PgCacheRepository::new(store);

        let context: RequestContext = [("screen".to_string(), serde_json::json!("dosing"))].into_iter().collect();
        repo.save("hash-roundtrip", "what treats a fever", &context, "aspirin").await.unwrap();

        let entry = repo.find_by_hash("hash-roundtrip").await.unwrap().expect("entry was just saved");
        assert_eq!(entry.response, "aspirin");
        assert_eq!(entry.question, "what treats a fever");
        assert_eq!(entry.hit_count, 0);

        repo.increment_hit_count("hash-roundtrip").await.unwrap();
        let entry = repo.find_by_hash("hash-roundtrip").await.unwrap().unwrap();
        assert_eq!(entry.hit_count, 1);
    }
}
