/// Construction options for [`crate::engine::Engine`].
///
/// Bare struct with a `Default`, no env or file parsing — process-level
/// configuration is handled by the caller, not this crate.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Embedding dimension `D`. Every embedding the core stores or searches
    /// against must have exactly this length.
    pub embedding_dim: usize,

    /// Reciprocal Rank Fusion constant used by `hybrid_search`.
    pub rrf_constant: f64,

    /// Extractor chunk budget, in characters.
    pub chunk_size: usize,

    /// Cap on how much of a document's content is embedded at ingest time.
    /// The stored `content` is always the full, untruncated text.
    pub ingest_embedding_cap: usize,

    /// Traversal depth used by `get_context_for_entities`.
    pub context_traversal_depth: u32,

    /// Traversal depth used by `get_subgraph_context`.
    pub subgraph_traversal_depth: u32,

    /// Traversal depth used by `get_path_context` / `find_paths`.
    pub path_traversal_depth: u32,

    /// Inclusive bounds for `plan.top_k` after normalization.
    pub top_k_range: (u32, u32),

    /// Default `top_k` when the plan omits it or it isn't finite.
    pub default_top_k: u32,

    /// Literal embedded in the cache key so cache layout changes invalidate
    /// old entries.
    pub cache_version: &'static str,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            embedding_dim: 1536,
            rrf_constant: 60.0,
            chunk_size: 3000,
            ingest_embedding_cap: 6000,
            context_traversal_depth: 2,
            subgraph_traversal_depth: 1,
            path_traversal_depth: 5,
            top_k_range: (1, 8),
            default_top_k: 5,
            cache_version: "v2",
        }
    }
}
