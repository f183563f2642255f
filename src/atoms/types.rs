// ── Laminark Atoms: Domain Types ───────────────────────────────────────────
// Pure data: observations, sessions, graph nodes/edges, topic threads, the
// tool registry, and search results. Enum ↔ TEXT mappings live here so the
// store layer never hand-rolls strings.

use crate::atoms::constants::{MAX_CONTENT_CHARS, MAX_TITLE_CHARS};
use crate::atoms::error::{LaminarkError, LaminarkResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ═══════════════════════════════════════════════════════════════════════════
// Observations
// ═══════════════════════════════════════════════════════════════════════════

/// What kind of memory an observation records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObservationKind {
    Change,
    Reference,
    Finding,
    Decision,
    Verification,
}

impl ObservationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ObservationKind::Change => "change",
            ObservationKind::Reference => "reference",
            ObservationKind::Finding => "finding",
            ObservationKind::Decision => "decision",
            ObservationKind::Verification => "verification",
        }
    }
}

impl FromStr for ObservationKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, ()> {
        match s {
            "change" => Ok(ObservationKind::Change),
            "reference" => Ok(ObservationKind::Reference),
            "finding" => Ok(ObservationKind::Finding),
            "decision" => Ok(ObservationKind::Decision),
            "verification" => Ok(ObservationKind::Verification),
            _ => Err(()),
        }
    }
}

impl fmt::Display for ObservationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Curation verdict assigned by the classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Classification {
    Discovery,
    Problem,
    Solution,
    Noise,
}

impl Classification {
    pub fn as_str(&self) -> &'static str {
        match self {
            Classification::Discovery => "discovery",
            Classification::Problem => "problem",
            Classification::Solution => "solution",
            Classification::Noise => "noise",
        }
    }
}

impl FromStr for Classification {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, ()> {
        match s {
            "discovery" => Ok(Classification::Discovery),
            "problem" => Ok(Classification::Problem),
            "solution" => Ok(Classification::Solution),
            "noise" => Ok(Classification::Noise),
            _ => Err(()),
        }
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One durable memory record derived from a tool-use event or explicit save.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Observation {
    pub id: String,
    /// SQLite rowid; anchors the external-content lexical index.
    pub rowid: i64,
    pub project_hash: String,
    pub content: String,
    pub title: Option<String>,
    pub source: String,
    pub session_id: Option<String>,
    pub kind: ObservationKind,
    pub classification: Option<Classification>,
    pub classified_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    pub embedding_model: Option<String>,
    pub embedding_version: Option<i64>,
    pub created_at: String,
    pub updated_at: String,
    pub deleted_at: Option<String>,
}

/// Validated input for observation creation. The repository accepts only
/// this type, never a raw map; `validate` is the single boundary check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservationInput {
    pub content: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default = "ObservationInput::default_source")]
    pub source: String,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default = "ObservationInput::default_kind")]
    pub kind: ObservationKind,
}

impl ObservationInput {
    fn default_source() -> String {
        "manual".to_string()
    }

    fn default_kind() -> ObservationKind {
        ObservationKind::Finding
    }

    /// Shorthand constructor with defaults applied.
    pub fn new(content: impl Into<String>) -> Self {
        ObservationInput {
            content: content.into(),
            title: None,
            source: Self::default_source(),
            session_id: None,
            kind: Self::default_kind(),
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_kind(mut self, kind: ObservationKind) -> Self {
        self.kind = kind;
        self
    }

    /// Boundary validation. Invalid inputs are never written.
    pub fn validate(&self) -> LaminarkResult<()> {
        if self.content.trim().is_empty() {
            return Err(LaminarkError::validation("content must be nonempty"));
        }
        if self.content.chars().count() > MAX_CONTENT_CHARS {
            return Err(LaminarkError::validation(format!(
                "content exceeds {MAX_CONTENT_CHARS} characters"
            )));
        }
        if let Some(ref title) = self.title {
            if title.chars().count() > MAX_TITLE_CHARS {
                return Err(LaminarkError::validation(format!(
                    "title exceeds {MAX_TITLE_CHARS} characters"
                )));
            }
        }
        Ok(())
    }
}

/// Partial update applied by `update()`; untouched fields stay as-is.
#[derive(Debug, Clone, Default)]
pub struct ObservationUpdate {
    pub content: Option<String>,
    pub title: Option<String>,
    pub embedding: Option<Vec<f32>>,
    pub embedding_model: Option<String>,
    pub embedding_version: Option<i64>,
}

/// Filters and pagination for `list()`.
#[derive(Debug, Clone, Default)]
pub struct ListOptions {
    pub session_id: Option<String>,
    pub since: Option<String>,
    pub kind: Option<ObservationKind>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
    pub include_unclassified: bool,
}

// ═══════════════════════════════════════════════════════════════════════════
// Sessions
// ═══════════════════════════════════════════════════════════════════════════

/// A demarcated run of the host assistant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub project_hash: String,
    pub started_at: String,
    pub ended_at: Option<String>,
    pub summary: Option<String>,
}

// ═══════════════════════════════════════════════════════════════════════════
// Search
// ═══════════════════════════════════════════════════════════════════════════

/// Which pass (or both) surfaced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchType {
    Fts,
    Vector,
    Hybrid,
}

/// One fused search hit, ready for display.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub observation: Observation,
    /// RRF fused score (higher is better).
    pub score: f64,
    pub snippet: String,
    pub match_type: MatchType,
}

/// Filters for `search()`; all applied inside both passes.
#[derive(Debug, Clone)]
pub struct SearchOptions {
    pub limit: usize,
    pub session_id: Option<String>,
    pub kind: Option<ObservationKind>,
    pub since: Option<String>,
    pub include_unclassified: bool,
}

impl Default for SearchOptions {
    fn default() -> Self {
        SearchOptions {
            limit: crate::atoms::constants::DEFAULT_LIMIT,
            session_id: None,
            kind: None,
            since: None,
            include_unclassified: false,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Knowledge graph
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeType {
    Project,
    File,
    Decision,
    Problem,
    Solution,
    Tool,
    Person,
}

impl NodeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeType::Project => "Project",
            NodeType::File => "File",
            NodeType::Decision => "Decision",
            NodeType::Problem => "Problem",
            NodeType::Solution => "Solution",
            NodeType::Tool => "Tool",
            NodeType::Person => "Person",
        }
    }
}

impl FromStr for NodeType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, ()> {
        match s {
            "Project" => Ok(NodeType::Project),
            "File" => Ok(NodeType::File),
            "Decision" => Ok(NodeType::Decision),
            "Problem" => Ok(NodeType::Problem),
            "Solution" => Ok(NodeType::Solution),
            "Tool" => Ok(NodeType::Tool),
            "Person" => Ok(NodeType::Person),
            _ => Err(()),
        }
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Typed entity in the project knowledge graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphNode {
    pub id: String,
    pub project_hash: String,
    pub node_type: NodeType,
    pub name: String,
    pub metadata: serde_json::Value,
    pub observation_ids: Vec<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeType {
    Uses,
    DependsOn,
    DecidedBy,
    RelatedTo,
    PartOf,
    CausedBy,
    SolvedBy,
}

impl EdgeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EdgeType::Uses => "uses",
            EdgeType::DependsOn => "depends_on",
            EdgeType::DecidedBy => "decided_by",
            EdgeType::RelatedTo => "related_to",
            EdgeType::PartOf => "part_of",
            EdgeType::CausedBy => "caused_by",
            EdgeType::SolvedBy => "solved_by",
        }
    }
}

impl FromStr for EdgeType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, ()> {
        match s {
            "uses" => Ok(EdgeType::Uses),
            "depends_on" => Ok(EdgeType::DependsOn),
            "decided_by" => Ok(EdgeType::DecidedBy),
            "related_to" => Ok(EdgeType::RelatedTo),
            "part_of" => Ok(EdgeType::PartOf),
            "caused_by" => Ok(EdgeType::CausedBy),
            "solved_by" => Ok(EdgeType::SolvedBy),
            _ => Err(()),
        }
    }
}

impl fmt::Display for EdgeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Weighted, typed connection between two graph nodes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphEdge {
    pub id: String,
    pub project_hash: String,
    pub source_id: String,
    pub target_id: String,
    pub edge_type: EdgeType,
    /// Strength in [0, 1], enforced by a CHECK constraint.
    pub weight: f64,
    pub metadata: serde_json::Value,
    pub created_at: String,
    pub updated_at: String,
}

// ═══════════════════════════════════════════════════════════════════════════
// Topic threads (stash)
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThreadStatus {
    Active,
    Stashed,
    Resumed,
}

impl ThreadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ThreadStatus::Active => "active",
            ThreadStatus::Stashed => "stashed",
            ThreadStatus::Resumed => "resumed",
        }
    }
}

impl FromStr for ThreadStatus {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, ()> {
        match s {
            "active" => Ok(ThreadStatus::Active),
            "stashed" => Ok(ThreadStatus::Stashed),
            "resumed" => Ok(ThreadStatus::Resumed),
            _ => Err(()),
        }
    }
}

/// Named bundle of observation ids representing a conversation topic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicThread {
    pub id: String,
    pub project_hash: String,
    pub topic_label: String,
    pub summary: String,
    pub status: ThreadStatus,
    /// Observation ids captured at stash time. Resuming replays these
    /// without mutating the underlying observations.
    pub observation_snapshots: Vec<String>,
    pub created_at: String,
    pub updated_at: String,
}

// ═══════════════════════════════════════════════════════════════════════════
// Tool registry
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolScope {
    Global,
    Project,
    Plugin,
}

impl ToolScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolScope::Global => "global",
            ToolScope::Project => "project",
            ToolScope::Plugin => "plugin",
        }
    }
}

impl FromStr for ToolScope {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, ()> {
        match s {
            "global" => Ok(ToolScope::Global),
            "project" => Ok(ToolScope::Project),
            "plugin" => Ok(ToolScope::Plugin),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolStatus {
    Active,
    Stale,
    Demoted,
}

impl ToolStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolStatus::Active => "active",
            ToolStatus::Stale => "stale",
            ToolStatus::Demoted => "demoted",
        }
    }
}

impl FromStr for ToolStatus {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, ()> {
        match s {
            "active" => Ok(ToolStatus::Active),
            "stale" => Ok(ToolStatus::Stale),
            "demoted" => Ok(ToolStatus::Demoted),
            _ => Err(()),
        }
    }
}

/// One discovered tool and its lifecycle state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolRecord {
    pub id: String,
    pub name: String,
    pub tool_type: String,
    pub scope: ToolScope,
    pub project_hash: Option<String>,
    /// Where the tool came from, e.g. `config`, `organic`, `plugin:<name>`.
    pub source: String,
    pub description: Option<String>,
    pub server_name: Option<String>,
    pub usage_count: i64,
    pub last_used_at: Option<String>,
    pub discovered_at: String,
    pub updated_at: String,
    pub status: ToolStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

/// Registration input for tool discovery.
#[derive(Debug, Clone)]
pub struct ToolInput {
    pub name: String,
    pub tool_type: String,
    pub scope: ToolScope,
    pub source: String,
    pub description: Option<String>,
    pub server_name: Option<String>,
}

/// One tool invocation record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolUsageEvent {
    pub tool_id: String,
    pub success: bool,
    pub created_at: String,
}

// ═══════════════════════════════════════════════════════════════════════════
// Status snapshot
// ═══════════════════════════════════════════════════════════════════════════

/// Counts-and-capabilities snapshot for `/status`.
#[derive(Debug, Clone, Serialize)]
pub struct StoreStatus {
    pub project_hash: String,
    pub schema_version: i64,
    pub vector_enabled: bool,
    pub observations: usize,
    pub unclassified: usize,
    pub graph_nodes: usize,
    pub graph_edges: usize,
    pub threads: usize,
    pub tools: usize,
}
