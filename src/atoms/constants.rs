// ── Laminark Atoms: Constants ──────────────────────────────────────────────
// Validation bounds, tuning knobs, and defaults shared across the engine.

/// Maximum observation content length in characters.
pub const MAX_CONTENT_CHARS: usize = 100_000;

/// Maximum observation title length in characters.
pub const MAX_TITLE_CHARS: usize = 200;

/// RRF constant (k=60 is standard in information retrieval).
pub const RRF_K: f64 = 60.0;

/// Candidate pool multiplier for each search pass before fusion.
pub const CANDIDATE_MULTIPLIER: usize = 3;

/// Default result limit for search and listings.
pub const DEFAULT_LIMIT: usize = 10;

/// Dimensionality of the default local embedding model.
pub const DEFAULT_VECTOR_DIMS: usize = 384;

/// SQLite busy timeout. Absorbs contention between ephemeral hook
/// writers and the service writer; WAL + this timeout is the only
/// cross-process coordination.
pub const BUSY_TIMEOUT_MS: u64 = 5_000;

/// Classifier batch size per curation pass.
pub const DEFAULT_CURATION_BATCH: usize = 20;

/// Context rows fetched on each side of a pending observation.
pub const DEFAULT_CONTEXT_WINDOW: usize = 5;

/// Pending observations older than this are auto-promoted to `discovery`.
pub const DEFAULT_FALLBACK_TIMEOUT_SECS: i64 = 300;

/// Soft timeout for a single classifier call.
pub const DEFAULT_AGENT_TIMEOUT_MS: u64 = 30_000;

/// Millisecond-precision UTC timestamp format used in every column.
pub const TS_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3fZ";

/// Produce the current timestamp in canonical column format.
pub fn now_ts() -> String {
    chrono::Utc::now().format(TS_FORMAT).to_string()
}

/// Tool ranking: weight of normalized usage frequency.
pub const TOOL_RANK_FREQUENCY_WEIGHT: f64 = 0.7;

/// Tool ranking: weight of recency decay.
pub const TOOL_RANK_RECENCY_WEIGHT: f64 = 0.3;

/// Tool recency half-life in days.
pub const TOOL_RECENCY_HALF_LIFE_DAYS: f64 = 7.0;

/// Multiplicative penalty when a tool's status is not `active`.
pub const TOOL_PENALTY_INACTIVE: f64 = 0.25;

/// Multiplicative penalty when a tool is older than 30 days. Stacks.
pub const TOOL_PENALTY_AGED: f64 = 0.5;

/// Age in days past which the aged penalty applies.
pub const TOOL_AGED_DAYS: f64 = 30.0;

/// Failures within the trailing window that demote a tool.
pub const TOOL_DEMOTION_FAILURES: usize = 3;

/// Trailing usage-event window inspected for demotion.
pub const TOOL_DEMOTION_WINDOW: usize = 5;
