use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use pgvector::Vector;
use sqlx::Row;

use super::DocumentStore;
use crate::error::{RagError, Result};
use crate::store::StoreAdapter;
use crate::types::{Document, HybridHit, TextHit, VectorHit};

/// Upsert documents; vector KNN; full-text rank; hybrid RRF fusion.
///
/// Grounded on the pack's pgvector repository pattern
/// (`steeltroops-ai-paperforge-rs` `Repository::search_hybrid`): pgvector
/// literal binding via the `pgvector` crate's `Vector` type, `<->` for L2
/// distance, `to_tsvector`/`plainto_tsquery` with the `simple` analyzer for
/// full text. Fusion itself is computed in Rust from 1-based rank position
/// within each branch's result list, per the RRF contract in the spec
/// rather than the teacher file's raw-score normalization.
pub struct PgDocumentRepository {
    store: Arc<StoreAdapter>,
    embedding_dim: usize,
    rrf_constant: f64,
}

impl PgDocumentRepository {
    pub fn new(store: Arc<StoreAdapter>, embedding_dim: usize, rrf_constant: f64) -> Self {
        PgDocumentRepository { store, embedding_dim, rrf_constant }
    }

    fn document_from_row(row: &sqlx::postgres::PgRow) -> Result<Document> {
        let metadata_json: serde_json::Value = row.try_get("metadata")?;
        let metadata = match metadata_json {
            serde_json::Value::Object(map) => map.into_iter().collect(),
            _ => HashMap::new(),
        };
        let embedding: Option<Vector> = row.try_get("embedding")?;
        Ok(Document {
            id: row.try_get("id")?,
            content: row.try_get("content")?,
            path: row.try_get("path")?,
            screen: row.try_get("screen")?,
            domain: row.try_get("domain")?,
            metadata,
            embedding: embedding.map(|v| v.to_vec()),
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[async_trait]
impl DocumentStore for PgDocumentRepository {
    async fn upsert_document(&self, doc: &Document) -> Result<()> {
        if let Some(embedding) = &doc.embedding {
            if embedding.len() != self.embedding_dim {
                return Err(RagError::DimensionMismatch {
                    expected: self.embedding_dim,
                    actual: embedding.len(),
                });
            }
        }
        let metadata = serde_json::Value::Object(doc.metadata.clone().into_iter().collect());
        let embedding = doc.embedding.clone().map(Vector::from);
        sqlx::query(
            r#"
            INSERT INTO documents (id, content, path, screen, domain, metadata, embedding, tsv, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, to_tsvector('simple', $2), now(), now())
            ON CONFLICT (id) DO UPDATE SET
                content = EXCLUDED.content,
                path = EXCLUDED.path,
                screen = EXCLUDED.screen,
                domain = EXCLUDED.domain,
                metadata = EXCLUDED.metadata,
                embedding = EXCLUDED.embedding,
                tsv = to_tsvector('simple', EXCLUDED.content),
                updated_at = now()
            "#,
        )
        .bind(&doc.id)
        .bind(&doc.content)
        .bind(&doc.path)
        .bind(&doc.screen)
        .bind(&doc.domain)
        .bind(metadata)
        .bind(embedding)
        .execute(self.store.pool())
        .await?;
        Ok(())
    }

    async fn find_by_vector(&self, embedding: &[f32], k: u32, screen: Option<&str>) -> Result<Vec<VectorHit>> {
        if embedding.len() != self.embedding_dim || embedding.iter().any(|v| !v.is_finite()) {
            return Err(RagError::InvalidEmbedding(format!(
                "expected {} finite elements, got {}",
                self.embedding_dim,
                embedding.len()
            )));
        }
        let vector = Vector::from(embedding.to_vec());
        let rows = sqlx::query(
            r#"
            SELECT id, content, path, screen, domain, metadata, embedding, created_at, updated_at,
                   1.0 / (1.0 + (embedding <-> $1)) AS vector_score
            FROM documents
            WHERE embedding IS NOT NULL
              AND ($2::text IS NULL OR screen = $2)
            ORDER BY embedding <-> $1
            LIMIT $3
            "#,
        )
        .bind(vector)
        .bind(screen)
        .bind(i64::from(k))
        .fetch_all(self.store.pool())
        .await?;

        rows.iter()
            .map(|row| {
                let document = Self::document_from_row(row)?;
                let vector_score: f64 = row.try_get("vector_score")?;
                Ok(VectorHit { document, vector_score })
            })
            .collect()
    }

    async fn find_by_text(&self, query: &str, k: u32, screen: Option<&str>) -> Result<Vec<TextHit>> {
        let rows = sqlx::query(
            r#"
            SELECT id, content, path, screen, domain, metadata, embedding, created_at, updated_at,
                   ts_rank(tsv, plainto_tsquery('simple', $1)) AS text_score
            FROM documents
            WHERE tsv @@ plainto_tsquery('simple', $1)
              AND ($2::text IS NULL OR screen = $2)
            ORDER BY text_score DESC
            LIMIT $3
            "#,
        )
        .bind(query)
        .bind(screen)
        .bind(i64::from(k))
        .fetch_all(self.store.pool())
        .await?;

        rows.iter()
            .map(|row| {
                let document = Self::document_from_row(row)?;
                let text_score: f64 = row.try_get("text_score")?;
                Ok(TextHit { document, text_score })
            })
            .collect()
    }

    async fn hybrid_search(
        &self,
        query: &str,
        embedding: &[f32],
        k: u32,
        screen: Option<&str>,
    ) -> Result<Vec<HybridHit>> {
        let (vector_hits, text_hits) =
            tokio::try_join!(self.find_by_vector(embedding, k, screen), self.find_by_text(query, k, screen))?;
        Ok(rrf_fuse(vector_hits, text_hits, self.rrf_constant, k))
    }
}

/// Reciprocal Rank Fusion: each branch's already-`LIMIT k` result list
/// contributes `1/(C + rank)` by 1-based rank position; a document present
/// in both branches sums both contributions. Ties are broken by
/// first-insertion order (vector branch before text branch, then list
/// order), via `Vec::sort_by`'s stability.
fn rrf_fuse(vector_hits: Vec<VectorHit>, text_hits: Vec<TextHit>, rrf_constant: f64, k: u32) -> Vec<HybridHit> {
    let mut order: Vec<String> = Vec::new();
    let mut scores: HashMap<String, f64> = HashMap::new();
    let mut docs: HashMap<String, Document> = HashMap::new();

    let mut contribute = |id: String, doc: Document, rank_1_based: usize| {
        let contribution = 1.0 / (rrf_constant + rank_1_based as f64);
        *scores.entry(id.clone()).or_insert(0.0) += contribution;
        docs.entry(id.clone()).or_insert_with(|| doc);
        if !order.contains(&id) {
            order.push(id);
        }
    };

    for (i, hit) in vector_hits.into_iter().enumerate() {
        contribute(hit.document.id.clone(), hit.document, i + 1);
    }
    for (i, hit) in text_hits.into_iter().enumerate() {
        contribute(hit.document.id.clone(), hit.document, i + 1);
    }

    let mut results: Vec<HybridHit> = order
        .into_iter()
        .map(|id| {
            let fused_score = scores[&id];
            let document = docs.remove(&id).expect("every scored id was inserted into docs");
            HybridHit { document, fused_score }
        })
        .collect();

    // Vec::sort_by is stable, so equal scores preserve first-insertion order.
    results.sort_by(|a, b| b.fused_score.partial_cmp(&a.fused_score).expect("scores are finite"));
    results.truncate(k as usize);
    results
}
