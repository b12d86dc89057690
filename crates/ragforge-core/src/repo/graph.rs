use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use pgvector::Vector;
use sqlx::Row;

use super::GraphStore;
use crate::error::Result;
use crate::store::StoreAdapter;
use crate::types::{Direction, GraphEdge, GraphNode, GraphPath, Subgraph, TraversalResult};

/// Node/edge CRUD, name search, neighbor listing, batched multi-hop
/// traversal, subgraph extraction, and k-shortest weighted paths.
///
/// Traversal, subgraph, and path finding are client-side walks over rows
/// fetched a frontier level at a time: cycle prevention by path-membership
/// check, one query per frontier level, rather than a hand-rolled recursive
/// CTE. The contract (cycle prevention, bounded depth, smallest-depth dedup)
/// is what matters, not which side of the wire walks the graph.
pub struct PgGraphRepository {
    store: Arc<StoreAdapter>,
}

struct FrontierRow {
    node_id: String,
    depth: u32,
    relation: String,
    direction: Direction,
    path: Vec<String>,
    start_node_id: String,
}

impl PgGraphRepository {
    pub fn new(store: Arc<StoreAdapter>) -> Self {
        PgGraphRepository { store }
    }

    fn node_from_row(row: &sqlx::postgres::PgRow) -> Result<GraphNode> {
        let properties_json: serde_json::Value = row.try_get("properties")?;
        let properties = match properties_json {
            serde_json::Value::Object(map) => map.into_iter().collect(),
            _ => HashMap::new(),
        };
        let embedding: Option<Vector> = row.try_get("embedding")?;
        Ok(GraphNode {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            node_type: row.try_get("type")?,
            properties,
            embedding: embedding.map(|v| v.to_vec()),
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn edge_from_row(row: &sqlx::postgres::PgRow) -> Result<GraphEdge> {
        let properties_json: serde_json::Value = row.try_get("properties")?;
        let properties = match properties_json {
            serde_json::Value::Object(map) => map.into_iter().collect(),
            _ => HashMap::new(),
        };
        Ok(GraphEdge {
            id: row.try_get("id")?,
            source_id: row.try_get("source_id")?,
            target_id: row.try_get("target_id")?,
            relation_type: row.try_get("relation_type")?,
            weight: row.try_get("weight")?,
            properties,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    async fn fetch_incident_edges(&self, node_id: &str) -> Result<Vec<GraphEdge>> {
        let rows = sqlx::query("SELECT * FROM edges WHERE source_id = $1 OR target_id = $1")
            .bind(node_id)
            .fetch_all(self.store.pool())
            .await?;
        rows.iter().map(Self::edge_from_row).collect()
    }

    async fn find_nodes_by_ids(&self, ids: &[String]) -> Result<Vec<GraphNode>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows = sqlx::query("SELECT * FROM nodes WHERE id = ANY($1)")
            .bind(ids)
            .fetch_all(self.store.pool())
            .await?;
        rows.iter().map(Self::node_from_row).collect()
    }

    /// Escape `%`, `_`, and `\` so a substring search parameter is matched
    /// literally rather than as a LIKE pattern.
    fn escape_like(raw: &str) -> String {
        raw.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")
    }
}

#[async_trait]
impl GraphStore for PgGraphRepository {
    async fn upsert_node(&self, node: &GraphNode) -> Result<()> {
        let properties = serde_json::Value::Object(node.properties.clone().into_iter().collect());
        let embedding = node.embedding.clone().map(Vector::from);
        sqlx::query(
            r#"
            INSERT INTO nodes (id, name, type, properties, embedding, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, now(), now())
            ON CONFLICT (id) DO UPDATE SET
                name = EXCLUDED.name,
                type = EXCLUDED.type,
                properties = EXCLUDED.properties,
                embedding = COALESCE(EXCLUDED.embedding, nodes.embedding),
                updated_at = now()
            "#,
        )
        .bind(&node.id)
        .bind(&node.name)
        .bind(&node.node_type)
        .bind(properties)
        .bind(embedding)
        .execute(self.store.pool())
        .await?;
        Ok(())
    }

    async fn delete_node(&self, id: &str) -> Result<()> {
        // Cascades to edges via the foreign key's ON DELETE CASCADE.
        sqlx::query("DELETE FROM nodes WHERE id = $1").bind(id).execute(self.store.pool()).await?;
        Ok(())
    }

    async fn upsert_edge(&self, edge: &GraphEdge) -> Result<()> {
        let properties = serde_json::Value::Object(edge.properties.clone().into_iter().collect());
        sqlx::query(
            r#"
            INSERT INTO edges (id, source_id, target_id, relation_type, weight, properties, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, now(), now())
            ON CONFLICT (id) DO UPDATE SET
                relation_type = EXCLUDED.relation_type,
                weight = EXCLUDED.weight,
                properties = EXCLUDED.properties,
                updated_at = now()
            "#,
        )
        .bind(&edge.id)
        .bind(&edge.source_id)
        .bind(&edge.target_id)
        .bind(&edge.relation_type)
        .bind(edge.weight)
        .bind(properties)
        .execute(self.store.pool())
        .await?;
        Ok(())
    }

    async fn delete_edge(&self, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM edges WHERE id = $1").bind(id).execute(self.store.pool()).await?;
        Ok(())
    }

    async fn find_node_by_name(&self, name: &str) -> Result<Option<GraphNode>> {
        let row = sqlx::query("SELECT * FROM nodes WHERE lower(name) = lower($1) LIMIT 1")
            .bind(name)
            .fetch_optional(self.store.pool())
            .await?;
        row.as_ref().map(Self::node_from_row).transpose()
    }

    async fn find_node_by_id(&self, id: &str) -> Result<Option<GraphNode>> {
        let row = sqlx::query("SELECT * FROM nodes WHERE id = $1").bind(id).fetch_optional(self.store.pool()).await?;
        row.as_ref().map(Self::node_from_row).transpose()
    }

    async fn find_nodes_by_names(&self, names: &[String]) -> Result<Vec<GraphNode>> {
        if names.is_empty() {
            return Ok(Vec::new());
        }
        let lowered: Vec<String> = names.iter().map(|n| n.to_lowercase()).collect();
        let rows = sqlx::query("SELECT * FROM nodes WHERE lower(name) = ANY($1)")
            .bind(lowered)
            .fetch_all(self.store.pool())
            .await?;
        rows.iter().map(Self::node_from_row).collect()
    }

    async fn search_nodes(&self, query: &str, limit: u32) -> Result<Vec<GraphNode>> {
        let pattern = format!("%{}%", Self::escape_like(query));
        let rows = sqlx::query("SELECT * FROM nodes WHERE name ILIKE $1 ESCAPE '\\' LIMIT $2")
            .bind(pattern)
            .bind(i64::from(limit))
            .fetch_all(self.store.pool())
            .await?;
        rows.iter().map(Self::node_from_row).collect()
    }

    async fn get_neighbors(
        &self,
        node_id: &str,
    ) -> Result<(Vec<(GraphNode, String, f64)>, Vec<(GraphNode, String, f64)>)> {
        let outgoing_rows = sqlx::query(
            r#"
            SELECT n.*, e.relation_type, e.weight
            FROM edges e JOIN nodes n ON n.id = e.target_id
            WHERE e.source_id = $1
            "#,
        )
        .bind(node_id)
        .fetch_all(self.store.pool())
        .await?;
        let incoming_rows = sqlx::query(
            r#"
            SELECT n.*, e.relation_type, e.weight
            FROM edges e JOIN nodes n ON n.id = e.source_id
            WHERE e.target_id = $1
            "#,
        )
        .bind(node_id)
        .fetch_all(self.store.pool())
        .await?;

        let to_triples = |rows: Vec<sqlx::postgres::PgRow>| -> Result<Vec<(GraphNode, String, f64)>> {
            rows.iter()
                .map(|row| {
                    let node = Self::node_from_row(row)?;
                    let relation_type: String = row.try_get("relation_type")?;
                    let weight: f64 = row.try_get("weight")?;
                    Ok((node, relation_type, weight))
                })
                .collect()
        };

        Ok((to_triples(outgoing_rows)?, to_triples(incoming_rows)?))
    }

    async fn traverse_batch(&self, seed_ids: &[String], max_depth: u32) -> Result<Vec<TraversalResult>> {
        let mut best_depth: HashMap<String, u32> = HashMap::new();
        let mut best_row: HashMap<String, FrontierRow> = HashMap::new();
        let mut queue: VecDeque<FrontierRow> = VecDeque::new();

        for seed in seed_ids {
            let edges = self.fetch_incident_edges(seed).await?;
            for edge in edges {
                let (other, direction) = if &edge.source_id == seed {
                    (edge.target_id.clone(), Direction::Outgoing)
                } else {
                    (edge.source_id.clone(), Direction::Incoming)
                };
                let row = FrontierRow {
                    node_id: other,
                    depth: 1,
                    relation: edge.relation_type,
                    direction,
                    path: vec![],
                    start_node_id: seed.clone(),
                };
                // path is built to include the node itself once the row is queued below.
                let mut row = row;
                row.path = vec![row.node_id.clone()];

                let keep = match best_depth.get(&row.node_id) {
                    Some(&existing) if existing <= row.depth => false,
                    _ => true,
                };
                if keep {
                    best_depth.insert(row.node_id.clone(), row.depth);
                    best_row.insert(row.node_id.clone(), clone_row(&row));
                }
                queue.push_back(row);
            }
        }

        while let Some(row) = queue.pop_front() {
            if row.depth >= max_depth {
                continue;
            }
            let edges = self.fetch_incident_edges(&row.node_id).await?;
            for edge in edges {
                let (m, direction) = if edge.source_id == row.node_id {
                    (edge.target_id.clone(), Direction::Outgoing)
                } else {
                    (edge.source_id.clone(), Direction::Incoming)
                };
                if row.path.contains(&m) || m == row.start_node_id {
                    continue;
                }
                let mut path = row.path.clone();
                path.push(m.clone());
                let next = FrontierRow {
                    node_id: m,
                    depth: row.depth + 1,
                    relation: edge.relation_type,
                    direction,
                    path,
                    start_node_id: row.start_node_id.clone(),
                };

                let keep = match best_depth.get(&next.node_id) {
                    Some(&existing) if existing <= next.depth => false,
                    _ => true,
                };
                if keep {
                    best_depth.insert(next.node_id.clone(), next.depth);
                    best_row.insert(next.node_id.clone(), clone_row(&next));
                }
                queue.push_back(next);
            }
        }

        let ids: Vec<String> = best_row.keys().cloned().collect();
        let nodes = self.find_nodes_by_ids(&ids).await?;
        let node_map: HashMap<String, GraphNode> = nodes.into_iter().map(|n| (n.id.clone(), n)).collect();

        let mut results: Vec<TraversalResult> = best_row
            .into_values()
            .filter_map(|row| {
                node_map.get(&row.node_id).map(|node| TraversalResult {
                    node: node.clone(),
                    depth: row.depth,
                    relation: row.relation,
                    direction: row.direction,
                    path: row.path,
                    start_node_id: row.start_node_id,
                })
            })
            .collect();
        results.sort_by(|a, b| a.depth.cmp(&b.depth).then_with(|| a.node.id.cmp(&b.node.id)));
        Ok(results)
    }

    async fn get_subgraph(&self, seed_ids: &[String], max_depth: u32) -> Result<Subgraph> {
        let traversal = self.traverse_batch(seed_ids, max_depth).await?;
        let mut induced: Vec<String> = seed_ids.to_vec();
        induced.extend(traversal.into_iter().map(|t| t.node.id));
        induced.sort();
        induced.dedup();

        let nodes = self.find_nodes_by_ids(&induced).await?;
        let edges = if induced.is_empty() {
            Vec::new()
        } else {
            let rows = sqlx::query("SELECT * FROM edges WHERE source_id = ANY($1) AND target_id = ANY($1)")
                .bind(&induced)
                .fetch_all(self.store.pool())
                .await?;
            rows.iter().map(Self::edge_from_row).collect::<Result<Vec<_>>>()?
        };
        Ok(Subgraph { nodes, edges })
    }

    async fn find_paths(&self, from_id: &str, to_id: &str, max_depth: u32) -> Result<Vec<GraphPath>> {
        let mut finished: Vec<(Vec<String>, Vec<String>, f64)> = Vec::new();
        let mut stack: Vec<(String, Vec<String>, Vec<String>, f64)> =
            vec![(from_id.to_string(), vec![from_id.to_string()], Vec::new(), 0.0)];

        while let Some((current, path, relations, weight)) = stack.pop() {
            if current == to_id && path.len() > 1 {
                finished.push((path, relations, weight));
                continue;
            }
            if path.len() as u32 - 1 >= max_depth {
                continue;
            }
            let edges = self.fetch_incident_edges(&current).await?;
            for edge in edges {
                let (next, relation) = if edge.source_id == current {
                    (edge.target_id.clone(), edge.relation_type.clone())
                } else {
                    (edge.source_id.clone(), edge.relation_type.clone())
                };
                if path.contains(&next) {
                    continue;
                }
                let mut next_path = path.clone();
                next_path.push(next.clone());
                let mut next_relations = relations.clone();
                next_relations.push(relation);
                stack.push((next, next_path, next_relations, weight + edge.weight));
            }
        }

        finished.sort_by(|a, b| a.2.partial_cmp(&b.2).expect("weights are finite"));
        finished.truncate(5);

        let mut all_ids: Vec<String> = finished.iter().flat_map(|(p, _, _)| p.clone()).collect();
        all_ids.sort();
        all_ids.dedup();
        let nodes = self.find_nodes_by_ids(&all_ids).await?;
        let node_map: HashMap<String, GraphNode> = nodes.into_iter().map(|n| (n.id.clone(), n)).collect();

        let mut paths = Vec::new();
        for (path_ids, relations, total_weight) in finished {
            // Silently drop the whole path if any of its node ids no longer
            // resolves, rather than return a path with misaligned
            // nodes/relations.
            let hydrated: Option<Vec<GraphNode>> = path_ids.iter().map(|id| node_map.get(id).cloned()).collect();
            if let Some(nodes) = hydrated {
                paths.push(GraphPath { nodes, relations, total_weight });
            }
        }
        Ok(paths)
    }
}

fn clone_row(row: &FrontierRow) -> FrontierRow {
    FrontierRow {
        node_id: row.node_id.clone(),
        depth: row.depth,
        relation: row.relation.clone(),
        direction: row.direction,
        path: row.path.clone(),
        start_node_id: row.start_node_id.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn node(id: &str, name: &str, node_type: &str) -> GraphNode {
        let now = Utc::now();
        GraphNode {
            id: id.to_string(),
            name: name.to_string(),
            node_type: node_type.to_string(),
            properties: HashMap::new(),
            embedding: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    #[ignore = "requires a live Postgres instance"]
    async fn traverse_and_find_paths_roundtrip() {
        let pool = sqlx::PgPool::connect("postgres://localhost/ragforge_test").await.unwrap();
        let store = Arc::new(StoreAdapter::from_external(pool));
        let repo = PgGraphRepository::new(store);

        let aspirin = node("node_aspirin", "Aspirin", "drug");
        let fever = node("node_fever", "Fever", "symptom");
        repo.upsert_node(&aspirin).await.unwrap();
        repo.upsert_node(&fever).await.unwrap();

        let now = Utc::now();
        let edge = GraphEdge {
            id: "edge_aspirin_treats_fever".to_string(),
            source_id: aspirin.id.clone(),
            target_id: fever.id.clone(),
            relation_type: "treats".to_string(),
            weight: 1.0,
            properties: HashMap::new(),
            created_at: now,
            updated_at: now,
        };
        repo.upsert_edge(&edge).await.unwrap();

        let traversal = repo.traverse_batch(&[aspirin.id.clone()], 2).await.unwrap();
        assert!(traversal.iter().any(|t| t.node.id == fever.id && t.depth == 1));

        let paths = repo.find_paths(&aspirin.id, &fever.id, 2).await.unwrap();
        assert_eq!(paths.len(), 1);
        assert_eq!(paths[0].total_weight, 1.0);
        assert_eq!(paths[0].relations, vec!["treats".to_string()]);

        repo.delete_edge(&edge.id).await.unwrap();
        repo.delete_node(&aspirin.id).await.unwrap();
        repo.delete_node(&fever.id).await.unwrap();
    }
}
