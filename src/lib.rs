// Laminark — project-scoped memory and knowledge-graph store for coding
// agents, on a single SQLite file.
//
// The `Laminark` facade binds one store handle to one project hash and is
// the whole public API: hook processes open it, write one observation,
// and exit; the long-lived service opens it once and runs the curation,
// embedding, and graph work through it; query surfaces call `recall`.
//
// Layering: `engine::store` owns every SQL statement; `engine::recall`
// owns search fusion, curation, and graph dedup; this facade owns
// project binding and nothing else.

pub mod atoms;
pub mod engine;

pub use atoms::error::{LaminarkError, LaminarkResult};
pub use atoms::types::{
    Classification, EdgeType, GraphEdge, GraphNode, ListOptions, MatchType, NodeType, Observation,
    ObservationInput, ObservationKind, ObservationUpdate, SearchOptions, SearchResult, Session,
    StoreStatus, ThreadStatus, ToolInput, ToolRecord, ToolScope, ToolStatus, ToolUsageEvent,
    TopicThread,
};
pub use engine::agent::{AgentReply, TextAgent};
pub use engine::embedder::{Embedder, EmbeddingClient};
pub use engine::recall::curation::{CurationConfig, CurationReport};
pub use engine::service::{run_service, ServiceConfig};
pub use engine::store::{MemoryStore, OpenOptions};

use std::path::Path;
use std::sync::Arc;

/// Version stamp stored next to embeddings; bump when the embedding
/// pipeline changes incompatibly.
pub const EMBEDDING_VERSION: i64 = 1;

/// One project's view of the store.
pub struct Laminark {
    store: Arc<MemoryStore>,
    project_hash: String,
}

impl Laminark {
    /// Open the default store (`<config-dir>/data.db`) scoped to a
    /// project directory. This is what hook processes call.
    pub fn open(project_dir: &Path) -> LaminarkResult<Self> {
        let project_hash = engine::project::project_hash(project_dir)?;
        let store = Arc::new(MemoryStore::open()?);
        Ok(Laminark { store, project_hash })
    }

    /// Open with explicit store options (path, vector gating).
    pub fn open_with(project_dir: &Path, options: OpenOptions) -> LaminarkResult<Self> {
        let project_hash = engine::project::project_hash(project_dir)?;
        let store = Arc::new(MemoryStore::open_with(options)?);
        Ok(Laminark { store, project_hash })
    }

    /// Bind an already-open store to a project hash. Lets one service
    /// process serve several projects over one handle.
    pub fn with_store(store: Arc<MemoryStore>, project_hash: impl Into<String>) -> Self {
        Laminark { store, project_hash: project_hash.into() }
    }

    pub fn project_hash(&self) -> &str {
        &self.project_hash
    }

    pub fn store(&self) -> &MemoryStore {
        &self.store
    }

    pub fn vector_enabled(&self) -> bool {
        self.store.vector_enabled()
    }

    /// Checkpoint the WAL and drop the handle. Only meaningful for the
    /// last holder of the store.
    pub fn close(self) {
        if let Ok(store) = Arc::try_unwrap(self.store) {
            store.close();
        }
    }

    // ── Observations ────────────────────────────────────────────────

    pub fn observe(&self, input: &ObservationInput) -> LaminarkResult<Observation> {
        self.store.create_observation(&self.project_hash, input)
    }

    pub fn observe_classified(
        &self,
        input: &ObservationInput,
        classification: Classification,
    ) -> LaminarkResult<Observation> {
        self.store
            .create_classified_observation(&self.project_hash, input, classification)
    }

    pub fn get_observation(&self, id: &str) -> LaminarkResult<Option<Observation>> {
        self.store.get_observation(&self.project_hash, id)
    }

    pub fn get_observation_including_deleted(
        &self,
        id: &str,
    ) -> LaminarkResult<Option<Observation>> {
        self.store
            .get_observation_including_deleted(&self.project_hash, id)
    }

    pub fn list(&self, options: &ListOptions) -> LaminarkResult<Vec<Observation>> {
        self.store.list_observations(&self.project_hash, options)
    }

    pub fn update_observation(
        &self,
        id: &str,
        updates: &ObservationUpdate,
    ) -> LaminarkResult<Option<Observation>> {
        self.store.update_observation(&self.project_hash, id, updates)
    }

    pub fn soft_delete(&self, id: &str) -> LaminarkResult<bool> {
        self.store.soft_delete_observation(&self.project_hash, id)
    }

    pub fn restore(&self, id: &str) -> LaminarkResult<Observation> {
        self.store.restore_observation(&self.project_hash, id)
    }

    pub fn update_classification(
        &self,
        id: &str,
        classification: Classification,
    ) -> LaminarkResult<bool> {
        self.store
            .update_classification(&self.project_hash, id, classification)
    }

    pub fn list_unclassified(&self, limit: usize) -> LaminarkResult<Vec<Observation>> {
        self.store.list_unclassified(&self.project_hash, limit)
    }

    pub fn list_context(
        &self,
        around_time: &str,
        window: usize,
    ) -> LaminarkResult<Vec<Observation>> {
        self.store.list_context(&self.project_hash, around_time, window)
    }

    pub fn count(&self) -> LaminarkResult<usize> {
        self.store.count_observations(&self.project_hash)
    }

    pub fn get_by_title(
        &self,
        substring: &str,
        limit: usize,
        include_purged: bool,
    ) -> LaminarkResult<Vec<Observation>> {
        self.store
            .get_observations_by_title(&self.project_hash, substring, limit, include_purged)
    }

    // ── Search ──────────────────────────────────────────────────────

    /// Hybrid recall. Embeds the query through `embedder` when one is
    /// wired and the capability flag is on; otherwise lexical-only.
    pub async fn recall(
        &self,
        query: &str,
        options: &SearchOptions,
        embedder: Option<&dyn Embedder>,
    ) -> LaminarkResult<Vec<SearchResult>> {
        let query_embedding = match embedder {
            Some(embedder) if self.store.vector_enabled() && embedder.is_ready() => {
                embedder.embed(query).await
            }
            _ => None,
        };
        self.recall_with_embedding(query, options, query_embedding.as_deref())
    }

    /// Search with a precomputed (or absent) query embedding.
    pub fn recall_with_embedding(
        &self,
        query: &str,
        options: &SearchOptions,
        query_embedding: Option<&[f32]>,
    ) -> LaminarkResult<Vec<SearchResult>> {
        engine::recall::search::run_search(
            &self.store,
            &self.project_hash,
            query,
            options,
            query_embedding,
        )
    }

    // ── Knowledge graph ─────────────────────────────────────────────

    pub fn upsert_node(
        &self,
        node_type: NodeType,
        name: &str,
        observation_id: Option<&str>,
    ) -> LaminarkResult<GraphNode> {
        engine::recall::graph::upsert_node(
            &self.store,
            &self.project_hash,
            node_type,
            name,
            observation_id,
        )
    }

    pub fn upsert_edge(
        &self,
        source_id: &str,
        target_id: &str,
        edge_type: EdgeType,
        weight: f64,
        metadata: serde_json::Value,
    ) -> LaminarkResult<GraphEdge> {
        self.store.upsert_edge(
            &self.project_hash,
            source_id,
            target_id,
            edge_type,
            weight,
            metadata,
        )
    }

    pub fn delete_node(&self, id: &str) -> LaminarkResult<bool> {
        self.store.delete_node(&self.project_hash, id)
    }

    pub fn neighborhood(
        &self,
        start_id: &str,
        depth: usize,
        max_nodes: usize,
    ) -> LaminarkResult<(Vec<GraphNode>, Vec<GraphEdge>)> {
        self.store
            .neighborhood(&self.project_hash, start_id, depth, max_nodes)
    }

    // ── Topic threads (stash) ───────────────────────────────────────

    pub fn stash(
        &self,
        label: &str,
        summary: &str,
        observation_ids: &[String],
    ) -> LaminarkResult<TopicThread> {
        self.store
            .create_stash(&self.project_hash, label, summary, observation_ids)
    }

    /// Stash the latest `count` visible observations as the current
    /// thread, the explicit-command path for topic shifts.
    pub fn stash_recent(
        &self,
        label: &str,
        summary: &str,
        count: usize,
    ) -> LaminarkResult<TopicThread> {
        let recent = self.list(&ListOptions { limit: Some(count), ..Default::default() })?;
        let ids: Vec<String> = recent.into_iter().map(|o| o.id).collect();
        self.stash(label, summary, &ids)
    }

    pub fn list_stashes(
        &self,
        status: Option<ThreadStatus>,
    ) -> LaminarkResult<Vec<TopicThread>> {
        self.store.list_threads(&self.project_hash, status)
    }

    pub fn resume(&self, id: &str) -> LaminarkResult<(TopicThread, Vec<Observation>)> {
        self.store.resume_thread(&self.project_hash, id)
    }

    // ── Tool registry ───────────────────────────────────────────────

    pub fn register_tool(&self, input: &ToolInput) -> LaminarkResult<ToolRecord> {
        self.store.upsert_tool(Some(&self.project_hash), input)
    }

    /// Organic tool-use observation: upsert (source `organic` when new)
    /// plus one usage event. Returns the post-event status.
    pub fn observe_tool_use(
        &self,
        input: &ToolInput,
        success: bool,
    ) -> LaminarkResult<ToolStatus> {
        let tool = self.store.upsert_tool(Some(&self.project_hash), input)?;
        self.store.record_tool_usage(&tool.id, success)
    }

    pub fn record_tool_usage(&self, tool_id: &str, success: bool) -> LaminarkResult<ToolStatus> {
        self.store.record_tool_usage(tool_id, success)
    }

    pub fn available_tools(&self) -> LaminarkResult<Vec<ToolRecord>> {
        self.store.get_available_for_session(&self.project_hash)
    }

    /// Session-start staleness sweep against the configured tool names.
    pub fn mark_stale_tools(&self, configured_names: &[String]) -> LaminarkResult<usize> {
        self.store
            .mark_stale_tools(Some(&self.project_hash), configured_names)
    }

    pub async fn search_tools(
        &self,
        query: &str,
        limit: usize,
        embedder: Option<&dyn Embedder>,
    ) -> LaminarkResult<Vec<(ToolRecord, f64, MatchType)>> {
        let query_embedding = match embedder {
            Some(embedder) if self.store.vector_enabled() && embedder.is_ready() => {
                embedder.embed(query).await
            }
            _ => None,
        };
        engine::recall::search::run_tool_search(
            &self.store,
            &self.project_hash,
            query,
            limit,
            query_embedding.as_deref(),
        )
    }

    // ── Sessions ────────────────────────────────────────────────────

    pub fn session_started(&self, id: Option<&str>) -> LaminarkResult<Session> {
        self.store.start_session(&self.project_hash, id)
    }

    pub fn session_ended(&self, id: &str, summary: Option<&str>) -> LaminarkResult<bool> {
        self.store.end_session(&self.project_hash, id, summary)
    }

    // ── Background work ─────────────────────────────────────────────

    pub async fn curate(
        &self,
        agent: &dyn TextAgent,
        config: &CurationConfig,
    ) -> LaminarkResult<CurationReport> {
        engine::recall::curation::run_curation_pass(&self.store, &self.project_hash, agent, config)
            .await
    }

    /// Embed up to `limit` dense-less rows. Per-row failures skip the row
    /// and continue; returns how many rows gained a vector.
    pub async fn backfill_embeddings(
        &self,
        embedder: &dyn Embedder,
        limit: usize,
    ) -> LaminarkResult<usize> {
        if !self.store.vector_enabled() || !embedder.is_ready() {
            return Ok(0);
        }
        let missing = self.store.list_missing_embeddings(&self.project_hash, limit)?;
        let mut embedded = 0;
        for observation in missing {
            let Some(vector) = embedder.embed(&observation.content).await else {
                continue;
            };
            if self.store.update_embedding(
                &self.project_hash,
                &observation.id,
                &vector,
                embedder.model_name(),
                EMBEDDING_VERSION,
            )? {
                embedded += 1;
            }
        }
        Ok(embedded)
    }

    // ── Status ──────────────────────────────────────────────────────

    pub fn status(&self) -> LaminarkResult<StoreStatus> {
        Ok(StoreStatus {
            project_hash: self.project_hash.clone(),
            schema_version: self.store.schema_version()?,
            vector_enabled: self.store.vector_enabled(),
            observations: self.store.count_observations(&self.project_hash)?,
            unclassified: self.store.count_unclassified(&self.project_hash)?,
            graph_nodes: self.store.count_nodes(&self.project_hash)?,
            graph_edges: self.store.count_edges(&self.project_hash)?,
            threads: self.store.count_threads(&self.project_hash)?,
            tools: self.store.count_tools(&self.project_hash)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn separate_projects_share_a_file_but_nothing_else() {
        let tmp = tempfile::tempdir().unwrap();
        let db = tmp.path().join("data.db");

        // A hook-style writer under project P1.
        {
            let store = Arc::new(MemoryStore::open_at(&db).unwrap());
            let p1 = Laminark::with_store(store, "1111111111111111");
            p1.observe_classified(&ObservationInput::new("alpha"), Classification::Discovery)
                .unwrap();
            p1.close();
        }

        // A later reader under project P2 sees an empty world.
        let store = Arc::new(MemoryStore::open_at(&db).unwrap());
        let p2 = Laminark::with_store(store.clone(), "2222222222222222");
        assert_eq!(p2.count().unwrap(), 0);
        let results = p2
            .recall_with_embedding("alpha", &SearchOptions::default(), None)
            .unwrap();
        assert!(results.is_empty());

        // P1 still sees its row through the same store handle.
        let p1 = Laminark::with_store(store, "1111111111111111");
        assert_eq!(p1.count().unwrap(), 1);
        assert_eq!(
            p1.recall_with_embedding("alpha", &SearchOptions::default(), None)
                .unwrap()
                .len(),
            1
        );
    }

    #[test]
    fn status_reports_counts_and_capabilities() {
        let store = Arc::new(MemoryStore::open_with(OpenOptions::default()).unwrap());
        let laminark = Laminark::with_store(store, "1111111111111111");
        laminark.observe(&ObservationInput::new("pending")).unwrap();
        laminark
            .observe_classified(&ObservationInput::new("done"), Classification::Solution)
            .unwrap();
        laminark.upsert_node(NodeType::Tool, "cargo", None).unwrap();

        let status = laminark.status().unwrap();
        assert_eq!(status.schema_version, 5);
        assert!(status.vector_enabled);
        assert_eq!(status.observations, 2);
        assert_eq!(status.unclassified, 1);
        assert_eq!(status.graph_nodes, 1);
    }

    #[tokio::test]
    async fn recall_degrades_without_embedder() {
        let store = Arc::new(MemoryStore::open_with(OpenOptions::default()).unwrap());
        let laminark = Laminark::with_store(store, "1111111111111111");
        laminark
            .observe_classified(&ObservationInput::new("graceful degradation"), Classification::Discovery)
            .unwrap();

        let results = laminark
            .recall("degradation", &SearchOptions::default(), None)
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].match_type, MatchType::Fts);
    }
}
