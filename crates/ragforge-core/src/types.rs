use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A stored document: whole content plus a pre-computed embedding.
///
/// `embedding`, when present, always has length exactly `D` — enforced by
/// [`crate::repo::documents::DocumentRepository::upsert_document`]. `tsv` is
/// not modeled here: it's a store-side derived column, recomputed from
/// `content` on every upsert using the `simple` lexical analyzer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Document {
    pub id: String,
    pub content: String,
    pub path: Option<String>,
    pub screen: Option<String>,
    pub domain: Option<String>,
    pub metadata: HashMap<String, Value>,
    pub embedding: Option<Vec<f32>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A row surfaced by `find_by_vector`: `vector_score = 1 / (1 + distance)`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VectorHit {
    pub document: Document,
    pub vector_score: f64,
}

/// A row surfaced by `find_by_text`: `text_score = rank` from the store's
/// lexical ranking function.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TextHit {
    pub document: Document,
    pub text_score: f64,
}

/// A fused result from `hybrid_search`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HybridHit {
    pub document: Document,
    pub fused_score: f64,
}

/// A content-addressed response cache row.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CacheEntry {
    pub request_hash: String,
    pub question: String,
    pub context: HashMap<String, Value>,
    pub response: String,
    pub hit_count: u64,
    pub last_hit_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A knowledge-graph entity. `id` is the deterministic hash described by
/// [`crate::extractor::node_id`]; two entities with the same
/// (lowercased name, type) always collapse to the same node.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GraphNode {
    pub id: String,
    pub name: String,
    pub node_type: String,
    pub properties: HashMap<String, Value>,
    pub embedding: Option<Vec<f32>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A directed, typed, weighted relation between two [`GraphNode`]s.
/// `id` is produced by [`crate::extractor::edge_id`] and is itself the
/// upsert conflict target: re-upserting the same id replaces
/// `relation_type`, `weight`, and `properties`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GraphEdge {
    pub id: String,
    pub source_id: String,
    pub target_id: String,
    pub relation_type: String,
    pub weight: f64,
    pub properties: HashMap<String, Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Direction a [`TraversalResult`] row was discovered in, relative to its
/// seed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Direction {
    Outgoing,
    Incoming,
}

/// One row of a `traverse_batch` walk.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TraversalResult {
    pub node: GraphNode,
    pub depth: u32,
    pub relation: String,
    pub direction: Direction,
    /// Node ids visited on the way here, in order, ending with `node.id`.
    pub path: Vec<String>,
    pub start_node_id: String,
}

/// An induced subgraph: seeds plus everything reached by a bounded
/// traversal, together with exactly the edges whose both endpoints lie in
/// the induced node set.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Subgraph {
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
}

/// One weighted path between two nodes, as returned by `find_paths`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GraphPath {
    pub nodes: Vec<GraphNode>,
    pub relations: Vec<String>,
    pub total_weight: f64,
}

/// A chat message in the conversation the orchestrator was given.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// Options passed to `chat_completion`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ChatOptions {
    pub temperature: Option<f64>,
    pub max_tokens: Option<u32>,
}

/// Token accounting, when the provider reports it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Usage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

/// The LLM provider's reply to a `chat_completion` call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatResponse {
    pub id: String,
    pub content: String,
    pub usage: Option<Usage>,
}

/// Raw plan as parsed from the planner LLM's JSON output, before
/// normalization.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Plan {
    #[serde(default)]
    pub should_search: bool,
    #[serde(default)]
    pub search_query: Option<String>,
    #[serde(default)]
    pub identified_entities: Vec<String>,
    #[serde(default)]
    pub top_k: Option<f64>,
}

/// Plan after clamping `top_k` into range and defaulting missing fields.
/// This is the value actually hashed into the cache key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NormalizedPlan {
    pub should_search: bool,
    pub search_query: String,
    pub identified_entities: Vec<String>,
    pub top_k: u32,
}

/// Extra per-request context, e.g. `{"screen": "..."}`.
pub type RequestContext = HashMap<String, Value>;

/// What `hybrid_search` contributed to a request, surfaced back for
/// observability.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RagInfo {
    pub results: Vec<HybridHit>,
    pub plan: NormalizedPlan,
}

/// `process_rag_request`'s return value.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Response {
    pub id: String,
    pub content: String,
    pub usage: Option<Usage>,
    pub rag: RagInfo,
}

/// Extracted entity before dedup, as parsed from a chunk's extraction JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedEntity {
    pub name: String,
    #[serde(rename = "type")]
    pub entity_type: String,
    #[serde(default)]
    pub properties: HashMap<String, Value>,
}

/// Extracted relation before dedup, as parsed from a chunk's extraction
/// JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedRelation {
    pub source: String,
    pub target: String,
    #[serde(rename = "relationType")]
    pub relation_type: String,
    #[serde(default)]
    pub weight: Option<f64>,
}

/// Deduplicated extraction output, ready for [`crate::graph_service`] to
/// ingest.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ExtractionResult {
    pub entities: Vec<ExtractedEntity>,
    pub relations: Vec<ExtractedRelation>,
}

/// Summary returned by `build_graph_from_document` / `ingest_document`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct GraphBuildSummary {
    pub nodes_created: u64,
    pub edges_created: u64,
}
