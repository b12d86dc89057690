//! Ingests extracted graphs and renders context strings for the
//! orchestrator.
//!
//! Context assembly resolves names, walks outward, and concatenates named
//! sections into one labeled string for the completion prompt; a section
//! with nothing to show is simply omitted rather than erroring.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::Utc;

use crate::error::{RagError, Result};
use crate::extractor::{edge_id, node_id, Extractor};
use crate::providers::{EmbeddingProvider, LlmProvider};
use crate::repo::GraphStore;
use crate::retry;
use crate::types::{Direction, GraphBuildSummary, GraphEdge, GraphNode, TraversalResult};

pub struct GraphService<G: GraphStore, E: EmbeddingProvider, L: LlmProvider> {
    graph: Arc<G>,
    embeddings: Arc<E>,
    extractor: Extractor<L>,
    embedding_dim: usize,
    context_depth: u32,
    subgraph_depth: u32,
    path_depth: u32,
}

impl<G: GraphStore, E: EmbeddingProvider, L: LlmProvider> GraphService<G, E, L> {
    pub fn new(
        graph: Arc<G>,
        embeddings: Arc<E>,
        extractor: Extractor<L>,
        embedding_dim: usize,
        context_depth: u32,
        subgraph_depth: u32,
        path_depth: u32,
    ) -> Self {
        GraphService { graph, embeddings, extractor, embedding_dim, context_depth, subgraph_depth, path_depth }
    }

    /// Extract entities/relations from `content`, embed entity names
    /// concurrently (best-effort), upsert nodes, then upsert edges whose
    /// endpoints both resolve within the extraction.
    pub async fn build_graph_from_document(&self, content: &str) -> Result<GraphBuildSummary> {
        let extraction = self.extractor.extract(content).await;

        let embedding_futures = extraction.entities.iter().map(|entity| {
            let name = entity.name.clone();
            let embeddings = Arc::clone(&self.embeddings);
            async move {
                match retry::with_retry("entity_embedding", || embeddings.create_embedding(&name)).await {
                    Ok(vector) => Some(vector),
                    Err(err) => {
                        tracing::warn!(entity = %name, error = %err, "embedding failed, node stored without one");
                        None
                    }
                }
            }
        });
        let embeddings: Vec<Option<Vec<f32>>> = futures::future::join_all(embedding_futures).await;

        for embedding in embeddings.iter().flatten() {
            if embedding.len() != self.embedding_dim {
                return Err(RagError::DimensionMismatch { expected: self.embedding_dim, actual: embedding.len() });
            }
        }

        let now = Utc::now();
        let mut name_to_id: HashMap<String, String> = HashMap::new();
        let mut nodes = Vec::with_capacity(extraction.entities.len());
        for (entity, embedding) in extraction.entities.into_iter().zip(embeddings) {
            let id = node_id(&entity.name, &entity.entity_type);
            name_to_id.insert(entity.name.to_lowercase(), id.clone());
            nodes.push(GraphNode {
                id,
                name: entity.name,
                node_type: entity.entity_type,
                properties: entity.properties,
                embedding,
                created_at: now,
                updated_at: now,
            });
        }
        for node in &nodes {
            self.graph.upsert_node(node).await?;
        }

        let mut edges_created = 0u64;
        for relation in extraction.relations {
            let source = name_to_id.get(&relation.source.to_lowercase());
            let target = name_to_id.get(&relation.target.to_lowercase());
            let (Some(source_id), Some(target_id)) = (source, target) else {
                continue;
            };
            let edge = GraphEdge {
                id: edge_id(source_id, target_id, &relation.relation_type),
                source_id: source_id.clone(),
                target_id: target_id.clone(),
                relation_type: relation.relation_type,
                weight: relation.weight.unwrap_or(1.0),
                properties: HashMap::new(),
                created_at: now,
                updated_at: now,
            };
            self.graph.upsert_edge(&edge).await?;
            edges_created += 1;
        }

        tracing::info!(nodes_created = nodes.len(), edges_created, "graph build complete");
        Ok(GraphBuildSummary { nodes_created: nodes.len() as u64, edges_created })
    }

    /// Null if `names` is empty or none resolve. Otherwise a header listing
    /// the resolved names, a property dump per node with non-empty
    /// properties, and one section per observed traversal depth.
    pub async fn get_context_for_entities(&self, names: &[String]) -> Result<Option<String>> {
        if names.is_empty() {
            return Ok(None);
        }
        let resolved = self.graph.find_nodes_by_names(names).await?;
        if resolved.is_empty() {
            return Ok(None);
        }
        let ids: Vec<String> = resolved.iter().map(|n| n.id.clone()).collect();
        let traversal = self.graph.traverse_batch(&ids, self.context_depth).await?;

        let mut out = String::new();
        let names_line = resolved.iter().map(|n| n.name.as_str()).collect::<Vec<_>>().join(", ");
        out.push_str(&format!("Entities: {names_line}\n"));

        for node in &resolved {
            if node.properties.is_empty() {
                continue;
            }
            out.push_str(&format!("\n{} properties:\n", node.name));
            for (key, value) in &node.properties {
                out.push_str(&format!("  {key}: {value}\n"));
            }
        }

        let mut by_depth: BTreeMap<u32, Vec<&TraversalResult>> = BTreeMap::new();
        for row in &traversal {
            by_depth.entry(row.depth).or_default().push(row);
        }
        for (depth, rows) in by_depth {
            out.push_str(&format!("\nDepth {depth}:\n"));
            for row in rows {
                let arrow = match row.direction {
                    Direction::Outgoing => "\u{2192}",
                    Direction::Incoming => "\u{2190}",
                };
                out.push_str(&format!("{arrow} [{}] {} ({})\n", row.relation, row.node.name, row.node.node_type));
            }
        }
        Ok(Some(out))
    }

    /// Null if either name fails to resolve or no path exists. Otherwise
    /// one line per path: total weight to two decimals, then the path
    /// rendered as relation-labeled arrows.
    pub async fn get_path_context(&self, from_name: &str, to_name: &str) -> Result<Option<String>> {
        let from = self.graph.find_node_by_name(from_name).await?;
        let to = self.graph.find_node_by_name(to_name).await?;
        let (Some(from), Some(to)) = (from, to) else {
            return Ok(None);
        };
        let paths = self.graph.find_paths(&from.id, &to.id, self.path_depth).await?;
        if paths.is_empty() {
            return Ok(None);
        }

        let mut out = String::new();
        for path in &paths {
            out.push_str(&format!("(weight: {:.2}) ", path.total_weight));
            for (i, node) in path.nodes.iter().enumerate() {
                out.push_str(&node.name);
                if let Some(relation) = path.relations.get(i) {
                    out.push_str(&format!(" \u{2192}[{relation}]\u{2192} "));
                }
            }
            out.push('\n');
        }
        Ok(Some(out))
    }

    /// Resolve `names` (unresolved ones are silently dropped); null if none
    /// resolve. Otherwise a node list and labeled edge list for the induced
    /// one-hop subgraph.
    pub async fn get_subgraph_context(&self, names: &[String]) -> Result<Option<String>> {
        let resolved = self.graph.find_nodes_by_names(names).await?;
        if resolved.is_empty() {
            return Ok(None);
        }
        let ids: Vec<String> = resolved.iter().map(|n| n.id.clone()).collect();
        let subgraph = self.graph.get_subgraph(&ids, self.subgraph_depth).await?;

        let node_name = |id: &str| -> String {
            subgraph.nodes.iter().find(|n| n.id == id).map(|n| n.name.clone()).unwrap_or_else(|| id.to_string())
        };

        let mut out = String::new();
        let node_line = subgraph.nodes.iter().map(|n| format!("{} ({})", n.name, n.node_type)).collect::<Vec<_>>().join(", ");
        out.push_str(&format!("Nodes: {node_line}\n"));
        for edge in &subgraph.edges {
            out.push_str(&format!(
                "{} \u{2192}[{}]\u{2192} {}\n",
                node_name(&edge.source_id),
                edge.relation_type,
                node_name(&edge.target_id)
            ));
        }
        Ok(Some(out))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::ProviderCallError;
    use crate::types::{ChatMessage, ChatOptions, ChatResponse, GraphPath, Subgraph};
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct FakeGraphStore {
        nodes: Mutex<HashMap<String, GraphNode>>,
        edges: Mutex<HashMap<String, GraphEdge>>,
    }

    impl FakeGraphStore {
        fn new() -> Self {
            FakeGraphStore { nodes: Mutex::new(HashMap::new()), edges: Mutex::new(HashMap::new()) }
        }
    }

    #[async_trait]
    impl GraphStore for FakeGraphStore {
        async fn upsert_node(&self, node: &GraphNode) -> Result<()> {
            self.nodes.lock().unwrap().insert(node.id.clone(), node.clone());
            Ok(())
        }
        async fn delete_node(&self, id: &str) -> Result<()> {
            self.nodes.lock().unwrap().remove(id);
            Ok(())
        }
        async fn upsert_edge(&self, edge: &GraphEdge) -> Result<()> {
            self.edges.lock().unwrap().insert(edge.id.clone(), edge.clone());
            Ok(())
        }
        async fn delete_edge(&self, id: &str) -> Result<()> {
            self.edges.lock().unwrap().remove(id);
            Ok(())
        }
        async fn find_node_by_name(&self, name: &str) -> Result<Option<GraphNode>> {
            Ok(self.nodes.lock().unwrap().values().find(|n| n.name.eq_ignore_ascii_case(name)).cloned())
        }
        async fn find_node_by_id(&self, id: &str) -> Result<Option<GraphNode>> {
            Ok(self.nodes.lock().unwrap().get(id).cloned())
        }
        async fn find_nodes_by_names(&self, names: &[String]) -> Result<Vec<GraphNode>> {
            let nodes = self.nodes.lock().unwrap();
            Ok(names
                .iter()
                .filter_map(|name| nodes.values().find(|n| n.name.eq_ignore_ascii_case(name)).cloned())
                .collect())
        }
        async fn search_nodes(&self, _query: &str, _limit: u32) -> Result<Vec<GraphNode>> {
            Ok(Vec::new())
        }
        async fn get_neighbors(
            &self,
            _node_id: &str,
        ) -> Result<(Vec<(GraphNode, String, f64)>, Vec<(GraphNode, String, f64)>)> {
            Ok((Vec::new(), Vec::new()))
        }
        async fn traverse_batch(&self, seed_ids: &[String], _max_depth: u32) -> Result<Vec<TraversalResult>> {
            let edges = self.edges.lock().unwrap();
            let nodes = self.nodes.lock().unwrap();
            let mut results = Vec::new();
            for seed in seed_ids {
                for edge in edges.values() {
                    if &edge.source_id == seed {
                        if let Some(node) = nodes.get(&edge.target_id) {
                            results.push(TraversalResult {
                                node: node.clone(),
                                depth: 1,
                                relation: edge.relation_type.clone(),
                                direction: Direction::Outgoing,
                                path: vec![node.id.clone()],
                                start_node_id: seed.clone(),
                            });
                        }
                    }
                }
            }
            Ok(results)
        }
        async fn get_subgraph(&self, seed_ids: &[String], max_depth: u32) -> Result<Subgraph> {
            let traversal = self.traverse_batch(seed_ids, max_depth).await?;
            let nodes_map = self.nodes.lock().unwrap();
            let mut node_ids: Vec<String> = seed_ids.to_vec();
            node_ids.extend(traversal.iter().map(|t| t.node.id.clone()));
            let nodes: Vec<GraphNode> = node_ids.iter().filter_map(|id| nodes_map.get(id).cloned()).collect();
            let edges: Vec<GraphEdge> = self
                .edges
                .lock()
                .unwrap()
                .values()
                .filter(|e| node_ids.contains(&e.source_id) && node_ids.contains(&e.target_id))
                .cloned()
                .collect();
            Ok(Subgraph { nodes, edges })
        }
        async fn find_paths(&self, _from_id: &str, _to_id: &str, _max_depth: u32) -> Result<Vec<GraphPath>> {
            Ok(Vec::new())
        }
    }

    struct FakeEmbeddingProvider;

    #[async_trait]
    impl EmbeddingProvider for FakeEmbeddingProvider {
        async fn create_embedding(&self, _text: &str) -> std::result::Result<Vec<f32>, ProviderCallError> {
            Ok(vec![0.0; 4])
        }
    }

    struct FakeLlmProvider;

    #[async_trait]
    impl LlmProvider for FakeLlmProvider {
        async fn chat_completion(
            &self,
            _messages: &[ChatMessage],
            _options: Option<ChatOptions>,
        ) -> std::result::Result<ChatResponse, ProviderCallError> {
            Ok(ChatResponse {
                id: "chat-1".into(),
                content: r#"{"entities": [{"name": "Aspirin", "type": "drug"}, {"name": "Fever", "type": "condition"}], "relations": [{"source": "Aspirin", "target": "Fever", "relationType": "treats"}, {"source": "Unknown", "target": "Fever", "relationType": "related_to"}]}"#.into(),
                usage: None,
            })
        }
    }

    fn make_service() -> GraphService<FakeGraphStore, FakeEmbeddingProvider, FakeLlmProvider> {
        let graph = Arc::new(FakeGraphStore::new());
        let embeddings = Arc::new(FakeEmbeddingProvider);
        let extractor = Extractor::new(Arc::new(FakeLlmProvider), 3000);
        GraphService::new(graph, embeddings, extractor, 4, 2, 1, 5)
    }

    #[tokio::test]
    async fn build_graph_skips_dangling_relations() {
        let service = make_service();
        let summary = service.build_graph_from_document("Aspirin treats fever.").await.unwrap();
        assert_eq!(summary.nodes_created, 2);
        assert_eq!(summary.edges_created, 1);
    }

    #[tokio::test]
    async fn context_for_entities_is_none_when_names_empty() {
        let service = make_service();
        assert!(service.get_context_for_entities(&[]).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn context_for_entities_includes_resolved_names_and_neighbors() {
        let service = make_service();
        service.build_graph_from_document("Aspirin treats fever.").await.unwrap();
        let context = service.get_context_for_entities(&["Aspirin".to_string()]).await.unwrap().unwrap();
        assert!(context.contains("Aspirin"));
        assert!(context.contains("Fever"));
    }
}
