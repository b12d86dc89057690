pub mod cache;
pub mod documents;
pub mod graph;

pub use cache::PgCacheRepository;
pub use documents::PgDocumentRepository;
pub use graph::PgGraphRepository;

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{
    CacheEntry, Document, GraphEdge, GraphNode, GraphPath, HybridHit, RequestContext, Subgraph,
    TextHit, TraversalResult, VectorHit,
};

/// Upsert documents; vector KNN; full-text rank; hybrid fusion.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn upsert_document(&self, doc: &Document) -> Result<()>;

    async fn find_by_vector(
        &self,
        embedding: &[f32],
        k: u32,
        screen: Option<&str>,
    ) -> Result<Vec<VectorHit>>;

    async fn find_by_text(&self, query: &str, k: u32, screen: Option<&str>) -> Result<Vec<TextHit>>;

    async fn hybrid_search(
        &self,
        query: &str,
        embedding: &[f32],
        k: u32,
        screen: Option<&str>,
    ) -> Result<Vec<HybridHit>>;
}

#[async_trait]
impl<T: DocumentStore + ?Sized> DocumentStore for Arc<T> {
    async fn upsert_document(&self, doc: &Document) -> Result<()> {
        (**self).upsert_document(doc).await
    }

    async fn find_by_vector(
        &self,
        embedding: &[f32],
        k: u32,
        screen: Option<&str>,
    ) -> Result<Vec<VectorHit>> {
        (**self).find_by_vector(embedding, k, screen).await
    }

    async fn find_by_text(&self, query: &str, k: u32, screen: Option<&str>) -> Result<Vec<TextHit>> {
        (**self).find_by_text(query, k, screen).await
    }

    async fn hybrid_search(
        &self,
        query: &str,
        embedding: &[f32],
        k: u32,
        screen: Option<&str>,
    ) -> Result<Vec<HybridHit>> {
        (**self).hybrid_search(query, embedding, k, screen).await
    }
}

/// Node/edge CRUD; batched multi-hop traversal; subgraph; k-shortest paths.
#[async_trait]
pub trait GraphStore: Send + Sync {
    async fn upsert_node(&self, node: &GraphNode) -> Result<()>;
    async fn delete_node(&self, id: &str) -> Result<()>;
    async fn upsert_edge(&self, edge: &GraphEdge) -> Result<()>;
    async fn delete_edge(&self, id: &str) -> Result<()>;

    async fn find_node_by_name(&self, name: &str) -> Result<Option<GraphNode>>;
    async fn find_node_by_id(&self, id: &str) -> Result<Option<GraphNode>>;
    async fn find_nodes_by_names(&self, names: &[String]) -> Result<Vec<GraphNode>>;

    /// Case-insensitive substring match. `query` must be escaped by the
    /// implementation so `%`, `_`, and `\` are treated literally.
    async fn search_nodes(&self, query: &str, limit: u32) -> Result<Vec<GraphNode>>;

    /// Outgoing and incoming adjacency as `(neighbor, relation_type, weight)`.
    async fn get_neighbors(
        &self,
        node_id: &str,
    ) -> Result<(Vec<(GraphNode, String, f64)>, Vec<(GraphNode, String, f64)>)>;

    async fn traverse_batch(&self, seed_ids: &[String], max_depth: u32) -> Result<Vec<TraversalResult>>;

    async fn get_subgraph(&self, seed_ids: &[String], max_depth: u32) -> Result<Subgraph>;

    async fn find_paths(&self, from_id: &str, to_id: &str, max_depth: u32) -> Result<Vec<GraphPath>>;
}

#[async_trait]
impl<T: GraphStore + ?Sized> GraphStore for Arc<T> {
    async fn upsert_node(&self, node: &GraphNode) -> Result<()> {
        (**self).upsert_node(node).await
    }

    async fn delete_node(&self, id: &str) -> Result<()> {
        (**self).delete_node(id).await
    }

    async fn upsert_edge(&self, edge: &GraphEdge) -> Result<()> {
        (**self).upsert_edge(edge).await
    }

    async fn delete_edge(&self, id: &str) -> Result<()> {
        (**self).delete_edge(id).await
    }

    async fn find_node_by_name(&self, name: &str) -> Result<Option<GraphNode>> {
        (**self).find_node_by_name(name).await
    }

    async fn find_node_by_id(&self, id: &str) -> Result<Option<GraphNode>> {
        (**self).find_node_by_id(id).await
    }

    async fn find_nodes_by_names(&self, names: &[String]) -> Result<Vec<GraphNode>> {
        (**self).find_nodes_by_names(names).await
    }

    async fn search_nodes(&self, query: &str, limit: u32) -> Result<Vec<GraphNode>> {
        (**self).search_nodes(query, limit).await
    }

    async fn get_neighbors(
        &self,
        node_id: &str,
    ) -> Result<(Vec<(GraphNode, String, f64)>, Vec<(GraphNode, String, f64)>)> {
        (**self).get_neighbors(node_id).await
    }

    async fn traverse_batch(&self, seed_ids: &[String], max_depth: u32) -> Result<Vec<TraversalResult>> {
        (**self).traverse_batch(seed_ids, max_depth).await
    }

    async fn get_subgraph(&self, seed_ids: &[String], max_depth: u32) -> Result<Subgraph> {
        (**self).get_subgraph(seed_ids, max_depth).await
    }

    async fn find_paths(&self, from_id: &str, to_id: &str, max_depth: u32) -> Result<Vec<GraphPath>> {
        (**self).find_paths(from_id, to_id, max_depth).await
    }
}

/// Content-addressed response cache with hit accounting.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn find_by_hash(&self, hash: &str) -> Result<Option<CacheEntry>>;
    async fn save(&self, hash: &str, question: &str, context: &RequestContext, response: &str) -> Result<()>;
    async fn increment_hit_count(&self, hash: &str) -> Result<()>;
}

#[async_trait]
impl<T: CacheStore + ?Sized> CacheStore for Arc<T> {
    async fn find_by_hash(&self, hash: &str) -> Result<Option<CacheEntry>> {
        (**self).find_by_hash(hash).await
    }

    async fn save(&self, hash: &str, question: &str, context: &RequestContext, response: &str) -> Result<()> {
        (**self).save(hash, question, context, response).await
    }

    async fn increment_hit_count(&self, hash: &str) -> Result<()> {
        (**self).increment_hit_count(hash).await
    }
}
