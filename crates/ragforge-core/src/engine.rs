//! Component wiring, embedding-dimension probe, and the ingestion front
//! door — the collaborator-facing boundary.
//!
//! Construction builds the store, then the services, then wires them into
//! one facade. On probe failure the owned connection is released before the
//! error propagates, so a failed `create()` never leaks a pool.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use sqlx::PgPool;
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::error::{RagError, Result};
use crate::extractor::Extractor;
use crate::graph_service::GraphService;
use crate::orchestrator::ChatbotOrchestrator;
use crate::providers::{EmbeddingProvider, LlmProvider};
use crate::repo::{DocumentStore, PgCacheRepository, PgDocumentRepository, PgGraphRepository};
use crate::retry;
use crate::store::StoreAdapter;
use crate::types::{ChatMessage, Document, GraphBuildSummary, RequestContext, Response};

const DIMENSION_PROBE_TEXT: &str = "regular-rag dimension probe";

/// How the store adapter should obtain its connection pool.
pub enum StoreConnection {
    Url(String),
    External(PgPool),
}

/// Component wiring, embedding-dimension probe, and the ingestion front
/// door. Must not be used after [`Engine::close`].
pub struct Engine<E: EmbeddingProvider, L: LlmProvider> {
    store: Arc<StoreAdapter>,
    documents: Arc<PgDocumentRepository>,
    orchestrator: ChatbotOrchestrator<PgDocumentRepository, PgCacheRepository, PgGraphRepository, E, L>,
    graph_service: Arc<GraphService<PgGraphRepository, E, L>>,
    embeddings: Arc<E>,
    embedding_dim: usize,
    ingest_embedding_cap: usize,
    closed: AtomicBool,
}

impl<E: EmbeddingProvider, L: LlmProvider> Engine<E, L> {
    pub async fn create(
        config: EngineConfig,
        connection: StoreConnection,
        llm: Arc<L>,
        embeddings: Arc<E>,
    ) -> Result<Self> {
        let store = match connection {
            StoreConnection::Url(url) => StoreAdapter::connect(&url).await?,
            StoreConnection::External(pool) => StoreAdapter::from_external(pool),
        };
        let store = Arc::new(store);

        let probe = retry::with_retry("dimension_probe", || embeddings.create_embedding(DIMENSION_PROBE_TEXT)).await;
        let probe = match probe {
            Ok(vector) => vector,
            Err(err) => {
                store.close().await;
                return Err(err);
            }
        };
        if probe.len() != config.embedding_dim {
            tracing::warn!(expected = config.embedding_dim, actual = probe.len(), "dimension probe mismatch");
            store.close().await;
            return Err(RagError::DimensionMismatch { expected: config.embedding_dim, actual: probe.len() });
        }
        tracing::info!(dim = probe.len(), "dimension probe ok");

        let documents = Arc::new(PgDocumentRepository::new(store.clone(), config.embedding_dim, config.rrf_constant));
        let graph_repo = Arc::new(PgGraphRepository::new(store.clone()));
        let cache = Arc::new(PgCacheRepository::new(store.clone()));

        let extractor = Extractor::new(llm.clone(), config.chunk_size);
        let graph_service = Arc::new(GraphService::new(
            graph_repo.clone(),
            embeddings.clone(),
            extractor,
            config.embedding_dim,
            config.context_traversal_depth,
            config.subgraph_traversal_depth,
            config.path_traversal_depth,
        ));

        let orchestrator = ChatbotOrchestrator::new(
            documents.clone(),
            cache.clone(),
            graph_service.clone(),
            embeddings.clone(),
            llm,
            config.top_k_range,
            config.default_top_k,
            config.cache_version,
        );

        Ok(Engine {
            store,
            documents,
            orchestrator,
            graph_service,
            embeddings,
            embedding_dim: config.embedding_dim,
            ingest_embedding_cap: config.ingest_embedding_cap,
            closed: AtomicBool::new(false),
        })
    }

    pub async fn query(&self, messages: &[ChatMessage], context: Option<RequestContext>) -> Result<Response> {
        self.ensure_open()?;
        self.orchestrator.process_rag_request(messages, context.unwrap_or_default()).await
    }

    /// Stores `content` whole under a new id, computing the embedding on a
    /// truncated copy (the stored content is always the full text), then
    /// drives graph extraction on the full content.
    pub async fn ingest_document(&self, content: &str) -> Result<GraphBuildSummary> {
        self.ensure_open()?;

        let embedding_input = truncate_for_embedding(content, self.ingest_embedding_cap);
        let embedding =
            retry::with_retry("ingest_embedding", || self.embeddings.create_embedding(&embedding_input)).await?;
        if embedding.len() != self.embedding_dim {
            return Err(RagError::DimensionMismatch { expected: self.embedding_dim, actual: embedding.len() });
        }

        let now = Utc::now();
        let doc = Document {
            id: Uuid::now_v7().to_string(),
            content: content.to_string(),
            path: None,
            screen: None,
            domain: None,
            metadata: Default::default(),
            embedding: Some(embedding),
            created_at: now,
            updated_at: now,
        };
        self.documents.upsert_document(&doc).await?;

        self.graph_service.build_graph_from_document(content).await
    }

    pub async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.store.close().await;
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(RagError::EngineClosed);
        }
        Ok(())
    }
}

/// The stored `content` is always whole; this only shrinks the copy fed to
/// the embedding call. Prefers the last paragraph boundary at or before
/// `cap`, falls back to the last sentence boundary, falls back to a hard
/// slice. All positions and the cap itself are character counts, not byte
/// offsets, so multi-byte text (CJK, emoji, accents) truncates at the same
/// point a byte-length-agnostic reader would expect.
fn truncate_for_embedding(content: &str, cap: usize) -> String {
    let chars: Vec<char> = content.chars().collect();
    if chars.len() <= cap {
        return content.to_string();
    }

    let window = &chars[..cap.min(chars.len())];

    if let Some(pos) = rfind_paragraph_break(window) {
        if pos > 3000 {
            return chars[..pos].iter().collect();
        }
    }
    if let Some(pos) = window.iter().rposition(|&c| c == '\u{3002}' || c == '\n') {
        if pos > 3000 {
            return chars[..=pos].iter().collect();
        }
    }
    window.iter().collect()
}

/// Last index `i` such that `window[i]` and `window[i+1]` are both `\n`.
fn rfind_paragraph_break(window: &[char]) -> Option<usize> {
    if window.len() < 2 {
        return None;
    }
    (0..=window.len() - 2).rev().find(|&i| window[i] == '\n' && window[i + 1] == '\n')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::ProviderCallError;
    use crate::types::{ChatMessage, ChatOptions, ChatResponse};
    use async_trait::async_trait;

    struct FakeEmbeddingProvider {
        dim: usize,
    }

    #[async_trait]
    impl EmbeddingProvider for FakeEmbeddingProvider {
        async fn create_embedding(&self, _text: &str) -> std::result::Result<Vec<f32>, ProviderCallError> {
            Ok(vec![0.0; self.dim])
        }
    }

    struct UnusedLlm;

    #[async_trait]
    impl LlmProvider for UnusedLlm {
        async fn chat_completion(
            &self,
            _messages: &[ChatMessage],
            _options: Option<ChatOptions>,
        ) -> std::result::Result<ChatResponse, ProviderCallError> {
            unreachable!("dimension probe failure must short-circuit before any chat completion call")
        }
    }

    #[tokio::test]
    async fn dimension_probe_mismatch_rejects_construction_without_touching_db() {
        // `connect_lazy` never opens a real connection, so this exercises
        // the probe-and-release path without a live Postgres instance.
        let pool = PgPool::connect_lazy("postgres://localhost/ragforge_test").unwrap();
        let config = EngineConfig { embedding_dim: 1536, ..EngineConfig::default() };
        let result = Engine::create(
            config,
            StoreConnection::External(pool),
            Arc::new(UnusedLlm),
            Arc::new(FakeEmbeddingProvider { dim: 3 }),
        )
        .await;
        match result {
            Err(RagError::DimensionMismatch { expected, actual }) => {
                assert_eq!(expected, 1536);
                assert_eq!(actual, 3);
            }
            _ => panic!("expected DimensionMismatch"),
        }
    }

    #[test]
    fn short_content_is_not_truncated() {
        let content = "short document";
        assert_eq!(truncate_for_embedding(content, 6000), content);
    }

    #[test]
    fn prefers_paragraph_boundary_when_past_3000() {
        let content = format!("{}\n\n{}", "A".repeat(5900), "B".repeat(2000));
        let truncated = truncate_for_embedding(&content, 6000);
        assert_eq!(truncated, "A".repeat(5900));
    }

    #[test]
    fn falls_back_to_sentence_boundary_when_no_late_paragraph_break() {
        let content = format!("{}。{}", "A".repeat(5000), "B".repeat(2000));
        let truncated = truncate_for_embedding(&content, 6000);
        assert_eq!(truncated, format!("{}。", "A".repeat(5000)));
    }

    #[test]
    fn hard_slices_when_no_boundary_past_3000() {
        let content = "A".repeat(8000);
        let truncated = truncate_for_embedding(&content, 6000);
        assert_eq!(truncated.len(), 6000);
    }

    #[test]
    fn counts_truncation_boundaries_in_characters_not_bytes() {
        // Each CJK character is 3 bytes in UTF-8. A byte-based cap of 6000
        // would land the window at char 2000, well short of the paragraph
        // break at char 5900, and miss it entirely; a character-based cap
        // reaches the same boundary ASCII content of this shape would.
        let content = format!("{}\n\n{}", "字".repeat(5900), "B".repeat(2000));
        let truncated = truncate_for_embedding(&content, 6000);
        assert_eq!(truncated, "字".repeat(5900));
    }

    #[test]
    fn hard_slice_counts_characters_not_bytes() {
        let content = "字".repeat(8000);
        let truncated = truncate_for_embedding(&content, 6000);
        assert_eq!(truncated.chars().count(), 6000);
    }

    #[tokio::test]
    #[ignore = "requires a live Postgres instance and real providers"]
    async fn embedding_probe_mismatch_closes_owned_connection_exactly_once() {
        let url = "postgres://localhost/ragforge_test";
        let config = EngineConfig { embedding_dim: 1536, ..EngineConfig::default() };
        let result = Engine::create(
            config,
            StoreConnection::Url(url.to_string()),
            Arc::new(UnusedLlm),
            Arc::new(FakeEmbeddingProvider { dim: 3 }),
        )
        .await;
        assert!(matches!(result, Err(RagError::DimensionMismatch { expected: 1536, actual: 3 })));

        // The failed create() owned its pool; if it leaked instead of closing
        // it, a fresh pool against the same database would still see the old
        // one's connections holding slots open.
        let probe_pool = sqlx::postgres::PgPoolOptions::new().max_connections(1).connect(url).await.unwrap();
        assert!(probe_pool.acquire().await.is_ok());
        probe_pool.close().await;
    }

    #[tokio::test]
    #[ignore = "requires a live Postgres instance and real providers"]
    async fn closing_engine_built_from_external_pool_does_not_close_it() {
        let pool = PgPool::connect("postgres://localhost/ragforge_test").await.unwrap();
        let config = EngineConfig { embedding_dim: 3, ..EngineConfig::default() };
        let engine = Engine::create(
            config,
            StoreConnection::External(pool.clone()),
            Arc::new(UnusedLlm),
            Arc::new(FakeEmbeddingProvider { dim: 3 }),
        )
        .await
        .unwrap();

        engine.close().await;

        assert!(!pool.is_closed());
        assert!(pool.acquire().await.is_ok());
    }
}
