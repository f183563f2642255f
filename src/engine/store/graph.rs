// ── Knowledge graph rows ───────────────────────────────────────────────────
// Typed nodes and weighted edges. Dedup strategy (who merges with whom)
// lives in recall/graph.rs; this layer only persists and traverses.
//
// Edge uniqueness is (project_hash, source_id, target_id, type); conflicts
// resolve in-place with weight = max(old, new) and a JSON metadata patch.
// Deleting a node cascades to its edges through the FK.

use super::{MemoryStore, OptionalRow};
use crate::atoms::constants::now_ts;
use crate::atoms::error::{LaminarkError, LaminarkResult};
use crate::atoms::types::{EdgeType, GraphEdge, GraphNode, NodeType};
use log::debug;
use rusqlite::params;
use std::collections::{HashSet, VecDeque};

const NODE_COLUMNS: &str =
    "id, project_hash, type, name, canonical_name, metadata, observation_ids, created_at, updated_at";

const EDGE_COLUMNS: &str =
    "id, project_hash, source_id, target_id, type, weight, metadata, created_at, updated_at";

impl MemoryStore {
    /// Insert a brand-new node. Dedup decisions happen above this layer.
    pub fn insert_node(
        &self,
        project: &str,
        node_type: NodeType,
        name: &str,
        canonical_name: &str,
        metadata: serde_json::Value,
        observation_ids: &[String],
    ) -> LaminarkResult<GraphNode> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = now_ts();
        let metadata_json = serde_json::to_string(&metadata)?;
        let obs_json = serde_json::to_string(observation_ids)?;

        self.with_busy_retry(|conn| {
            conn.execute(
                "INSERT INTO graph_nodes
                    (id, project_hash, type, name, canonical_name, metadata, observation_ids,
                     created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)",
                params![
                    id,
                    project,
                    node_type.as_str(),
                    name,
                    canonical_name,
                    metadata_json,
                    obs_json,
                    now,
                ],
            )
        })?;

        debug!("[graph] Node {} inserted ({node_type}: {name})", &id[..8]);
        Ok(GraphNode {
            id,
            project_hash: project.to_string(),
            node_type,
            name: name.to_string(),
            metadata,
            observation_ids: observation_ids.to_vec(),
            created_at: now.clone(),
            updated_at: now,
        })
    }

    pub fn get_node(&self, project: &str, id: &str) -> LaminarkResult<Option<GraphNode>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {NODE_COLUMNS} FROM graph_nodes WHERE project_hash = ?1 AND id = ?2"
        ))?;
        Ok(stmt.query_row(params![project, id], node_from_row).optional()?)
    }

    /// Exact canonical-name lookup within project + type.
    pub fn find_node_exact(
        &self,
        project: &str,
        node_type: NodeType,
        canonical_name: &str,
    ) -> LaminarkResult<Option<GraphNode>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {NODE_COLUMNS} FROM graph_nodes
             WHERE project_hash = ?1 AND type = ?2 AND canonical_name = ?3"
        ))?;
        Ok(stmt
            .query_row(params![project, node_type.as_str(), canonical_name], node_from_row)
            .optional()?)
    }

    /// All nodes of one type in the project; the fuzzy matcher scans these.
    pub fn list_nodes_by_type(
        &self,
        project: &str,
        node_type: NodeType,
    ) -> LaminarkResult<Vec<GraphNode>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {NODE_COLUMNS} FROM graph_nodes
             WHERE project_hash = ?1 AND type = ?2
             ORDER BY created_at ASC"
        ))?;
        let rows = stmt
            .query_map(params![project, node_type.as_str()], node_from_row)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    /// Persist a merge: observation ids, metadata, timestamps.
    pub fn update_node(&self, project: &str, node: &GraphNode) -> LaminarkResult<()> {
        let conn = self.conn.lock();
        let metadata_json = serde_json::to_string(&node.metadata)?;
        let obs_json = serde_json::to_string(&node.observation_ids)?;
        conn.execute(
            "UPDATE graph_nodes SET
                name = ?3, metadata = ?4, observation_ids = ?5, updated_at = ?6
             WHERE project_hash = ?1 AND id = ?2",
            params![project, node.id, node.name, metadata_json, obs_json, now_ts()],
        )?;
        Ok(())
    }

    /// Delete a node; adjacent edges go with it via the FK cascade.
    pub fn delete_node(&self, project: &str, id: &str) -> LaminarkResult<bool> {
        let conn = self.conn.lock();
        let changed = conn.execute(
            "DELETE FROM graph_nodes WHERE project_hash = ?1 AND id = ?2",
            params![project, id],
        )?;
        Ok(changed > 0)
    }

    /// Insert or merge an edge. On conflict the weight rises to the max of
    /// both sides and the metadata objects are patched together.
    pub fn upsert_edge(
        &self,
        project: &str,
        source_id: &str,
        target_id: &str,
        edge_type: EdgeType,
        weight: f64,
        metadata: serde_json::Value,
    ) -> LaminarkResult<GraphEdge> {
        if !(0.0..=1.0).contains(&weight) {
            return Err(LaminarkError::validation(format!(
                "edge weight {weight} outside [0, 1]"
            )));
        }

        let id = uuid::Uuid::new_v4().to_string();
        let now = now_ts();
        let metadata_json = serde_json::to_string(&metadata)?;

        self.with_busy_retry(|conn| {
            conn.execute(
                "INSERT INTO graph_edges
                    (id, project_hash, source_id, target_id, type, weight, metadata,
                     created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)
                 ON CONFLICT (project_hash, source_id, target_id, type) DO UPDATE SET
                    weight = MAX(weight, excluded.weight),
                    metadata = json_patch(metadata, excluded.metadata),
                    updated_at = excluded.updated_at",
                params![
                    id,
                    project,
                    source_id,
                    target_id,
                    edge_type.as_str(),
                    weight,
                    metadata_json,
                    now,
                ],
            )
        })?;

        self.get_edge(project, source_id, target_id, edge_type)?
            .ok_or_else(|| LaminarkError::not_found("graph edge", format!("{source_id}->{target_id}")))
    }

    pub fn get_edge(
        &self,
        project: &str,
        source_id: &str,
        target_id: &str,
        edge_type: EdgeType,
    ) -> LaminarkResult<Option<GraphEdge>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {EDGE_COLUMNS} FROM graph_edges
             WHERE project_hash = ?1 AND source_id = ?2 AND target_id = ?3 AND type = ?4"
        ))?;
        Ok(stmt
            .query_row(
                params![project, source_id, target_id, edge_type.as_str()],
                edge_from_row,
            )
            .optional()?)
    }

    /// Edges touching a node in either direction.
    pub fn list_edges_for_node(
        &self,
        project: &str,
        node_id: &str,
    ) -> LaminarkResult<Vec<GraphEdge>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {EDGE_COLUMNS} FROM graph_edges
             WHERE project_hash = ?1 AND (source_id = ?2 OR target_id = ?2)
             ORDER BY weight DESC"
        ))?;
        let rows = stmt
            .query_map(params![project, node_id], edge_from_row)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    pub fn count_nodes(&self, project: &str) -> LaminarkResult<usize> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM graph_nodes WHERE project_hash = ?1",
            params![project],
            |r| r.get(0),
        )?;
        Ok(count as usize)
    }

    pub fn count_edges(&self, project: &str) -> LaminarkResult<usize> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM graph_edges WHERE project_hash = ?1",
            params![project],
            |r| r.get(0),
        )?;
        Ok(count as usize)
    }

    /// Bounded BFS from a start node. Stops at `depth` hops or `max_nodes`
    /// visited, whichever first. Never crosses the project boundary;
    /// every adjacency query is scoped like any other statement.
    pub fn neighborhood(
        &self,
        project: &str,
        start_id: &str,
        depth: usize,
        max_nodes: usize,
    ) -> LaminarkResult<(Vec<GraphNode>, Vec<GraphEdge>)> {
        let Some(start) = self.get_node(project, start_id)? else {
            return Ok((Vec::new(), Vec::new()));
        };

        let mut visited: HashSet<String> = HashSet::new();
        let mut nodes: Vec<GraphNode> = Vec::new();
        let mut edges: Vec<GraphEdge> = Vec::new();
        let mut edge_ids: HashSet<String> = HashSet::new();
        let mut queue: VecDeque<(String, usize)> = VecDeque::new();

        visited.insert(start.id.clone());
        nodes.push(start);
        queue.push_back((start_id.to_string(), 0));

        while let Some((current, hop)) = queue.pop_front() {
            if hop >= depth || nodes.len() >= max_nodes {
                continue;
            }
            for edge in self.list_edges_for_node(project, &current)? {
                if edge_ids.insert(edge.id.clone()) {
                    edges.push(edge.clone());
                }
                let neighbor = if edge.source_id == current {
                    edge.target_id.clone()
                } else {
                    edge.source_id.clone()
                };
                if nodes.len() >= max_nodes {
                    break;
                }
                if visited.insert(neighbor.clone()) {
                    if let Some(node) = self.get_node(project, &neighbor)? {
                        nodes.push(node);
                        queue.push_back((neighbor, hop + 1));
                    }
                }
            }
        }

        Ok((nodes, edges))
    }
}

// ── Row mappers ────────────────────────────────────────────────────────────

fn node_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<GraphNode> {
    let type_str: String = row.get(2)?;
    let metadata_str: String = row.get(5)?;
    let obs_str: String = row.get(6)?;

    Ok(GraphNode {
        id: row.get(0)?,
        project_hash: row.get(1)?,
        node_type: type_str.parse::<NodeType>().unwrap_or(NodeType::File),
        name: row.get(3)?,
        metadata: serde_json::from_str(&metadata_str).unwrap_or(serde_json::json!({})),
        observation_ids: serde_json::from_str(&obs_str).unwrap_or_default(),
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
    })
}

fn edge_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<GraphEdge> {
    let type_str: String = row.get(4)?;
    let metadata_str: String = row.get(6)?;

    Ok(GraphEdge {
        id: row.get(0)?,
        project_hash: row.get(1)?,
        source_id: row.get(2)?,
        target_id: row.get(3)?,
        edge_type: type_str.parse::<EdgeType>().unwrap_or(EdgeType::RelatedTo),
        weight: row.get(5)?,
        metadata: serde_json::from_str(&metadata_str).unwrap_or(serde_json::json!({})),
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
    })
}

#[cfg(test)]
mod tests {
    use super::super::store_for_tests;
    use crate::atoms::types::{EdgeType, NodeType};
    use serde_json::json;

    const P1: &str = "aaaaaaaaaaaaaaaa";

    #[test]
    fn edge_upsert_merges_weight_and_metadata() {
        let store = store_for_tests();
        let a = store
            .insert_node(P1, NodeType::File, "src/main.rs", "src/main.rs", json!({}), &[])
            .unwrap();
        let b = store
            .insert_node(P1, NodeType::Tool, "cargo", "cargo", json!({}), &[])
            .unwrap();

        let first = store
            .upsert_edge(P1, &a.id, &b.id, EdgeType::Uses, 0.8, json!({"via": "build"}))
            .unwrap();
        assert!((first.weight - 0.8).abs() < 1e-9);

        // Lower incoming weight keeps the max; metadata keys merge.
        let merged = store
            .upsert_edge(P1, &a.id, &b.id, EdgeType::Uses, 0.3, json!({"count": 2}))
            .unwrap();
        assert!((merged.weight - 0.8).abs() < 1e-9);
        assert_eq!(merged.metadata["via"], "build");
        assert_eq!(merged.metadata["count"], 2);
        assert_eq!(store.count_edges(P1).unwrap(), 1);
    }

    #[test]
    fn edge_weight_outside_range_is_rejected() {
        let store = store_for_tests();
        let a = store
            .insert_node(P1, NodeType::File, "a", "a", json!({}), &[])
            .unwrap();
        let b = store
            .insert_node(P1, NodeType::File, "b", "b", json!({}), &[])
            .unwrap();
        assert!(store
            .upsert_edge(P1, &a.id, &b.id, EdgeType::RelatedTo, 1.5, json!({}))
            .is_err());
    }

    #[test]
    fn deleting_a_node_cascades_to_edges() {
        let store = store_for_tests();
        let a = store
            .insert_node(P1, NodeType::Problem, "flaky test", "flaky test", json!({}), &[])
            .unwrap();
        let b = store
            .insert_node(P1, NodeType::Solution, "retry once", "retry once", json!({}), &[])
            .unwrap();
        store
            .upsert_edge(P1, &a.id, &b.id, EdgeType::SolvedBy, 0.9, json!({}))
            .unwrap();

        assert!(store.delete_node(P1, &a.id).unwrap());
        assert_eq!(store.count_edges(P1).unwrap(), 0);
        assert!(store.list_edges_for_node(P1, &b.id).unwrap().is_empty());
    }

    #[test]
    fn neighborhood_is_bounded_and_scoped() {
        let store = store_for_tests();
        let a = store.insert_node(P1, NodeType::File, "a", "a", json!({}), &[]).unwrap();
        let b = store.insert_node(P1, NodeType::File, "b", "b", json!({}), &[]).unwrap();
        let c = store.insert_node(P1, NodeType::File, "c", "c", json!({}), &[]).unwrap();
        store.upsert_edge(P1, &a.id, &b.id, EdgeType::RelatedTo, 0.5, json!({})).unwrap();
        store.upsert_edge(P1, &b.id, &c.id, EdgeType::RelatedTo, 0.5, json!({})).unwrap();

        // Other project sees nothing.
        let (nodes, edges) = store.neighborhood("bbbbbbbbbbbbbbbb", &a.id, 2, 10).unwrap();
        assert!(nodes.is_empty() && edges.is_empty());

        // Depth 1 reaches b but not c.
        let (nodes, _) = store.neighborhood(P1, &a.id, 1, 10).unwrap();
        let ids: Vec<&str> = nodes.iter().map(|n| n.id.as_str()).collect();
        assert!(ids.contains(&a.id.as_str()) && ids.contains(&b.id.as_str()));
        assert!(!ids.contains(&c.id.as_str()));

        // Depth 2 reaches the whole chain.
        let (nodes, edges) = store.neighborhood(P1, &a.id, 2, 10).unwrap();
        assert_eq!(nodes.len(), 3);
        assert_eq!(edges.len(), 2);

        // Node cap bounds the walk.
        let (nodes, _) = store.neighborhood(P1, &a.id, 5, 2).unwrap();
        assert!(nodes.len() <= 2);
    }
}
