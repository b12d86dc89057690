use thiserror::Error;

/// Errors the core distinguishes, per the error handling design.
///
/// `PlanParseError` and `ExtractionParseError` are constructed and matched on
/// at their single call site but never propagated past it — the planner and
/// extractor both swallow them and fall back to a default value.
#[derive(Debug, Error)]
pub enum RagError {
    /// An embedding did not have the configured dimension `D`.
    /// Raised at the engine's startup probe, on document/graph-node upsert,
    /// and during graph build when any entity embedding comes back the
    /// wrong length.
    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// A vector passed to a search had a non-finite element or the wrong
    /// length.
    #[error("invalid embedding: {0}")]
    InvalidEmbedding(String),

    /// The planner's raw LLM response could not be parsed or did not
    /// validate against the plan schema. Never surfaced to a caller; exists
    /// so the swallow site has something concrete to log and discard.
    #[error("plan parse error: {0}")]
    PlanParseError(String),

    /// A chunk's raw extraction response could not be parsed or did not
    /// validate against the extraction schema. Never surfaced to a caller;
    /// the chunk simply contributes no entities or relations.
    #[error("extraction parse error: {0}")]
    ExtractionParseError(String),

    /// An LLM or embedding provider call failed. Transient failures
    /// (408/429/5xx) are retried by [`crate::retry`] before this variant
    /// reaches a caller.
    #[error("provider error: {0}")]
    ProviderError(String),

    /// The underlying store rejected a query. Always surfaced.
    #[error("store error: {0}")]
    StoreError(#[from] sqlx::Error),

    /// The engine was used after `close()`.
    #[error("engine is closed")]
    EngineClosed,
}

pub type Result<T> = std::result::Result<T, RagError>;
