pub mod config;
pub mod engine;
pub mod error;
pub mod extractor;
pub mod graph_service;
pub mod json_stable;
pub mod orchestrator;
pub mod providers;
pub mod repo;
pub mod retry;
pub mod store;
pub mod types;

pub use config::EngineConfig;
pub use engine::{Engine, StoreConnection};
pub use error::{RagError, Result};
pub use extractor::{edge_id, node_id, Extractor};
pub use graph_service::GraphService;
pub use orchestrator::ChatbotOrchestrator;
pub use providers::{EmbeddingProvider, LlmProvider, ProviderCallError};
pub use repo::{
    CacheStore, DocumentStore, GraphStore, PgCacheRepository, PgDocumentRepository, PgGraphRepository,
};
pub use store::StoreAdapter;
pub use types::*;
