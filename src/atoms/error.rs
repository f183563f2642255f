// ── Laminark Atoms: Error Types ────────────────────────────────────────────
// Single canonical error enum for the store, built with `thiserror`.
//
// Design rules:
//   • Variants are coarse-grained by failure domain (Validation, NotFound,
//     Database, Agent…), matching the taxonomy the callers dispatch on.
//   • `#[from]` wires std/external conversions automatically.
//   • Background tasks catch-and-log; only interactive paths surface these
//     to the user, as a one-line message via `Display`.
//   • NotFound is an *error* only where existence is required (restore,
//     resume). Plain lookups return `Ok(None)` instead.

use thiserror::Error;

// ── Primary error enum ─────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum LaminarkError {
    /// Filesystem or OS-level I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization / deserialization failure.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// SQLite / rusqlite database failure.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// HTTP / network failure (embedding worker, agent transport).
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Malformed input rejected at the boundary. Never written to the DB.
    #[error("Validation error: {0}")]
    Validation(String),

    /// A row that must exist is missing (or soft-deleted and not included).
    #[error("Not found: {what} {id}")]
    NotFound { what: &'static str, id: String },

    /// SQLite stayed busy past the timeout and one retry.
    #[error("Database busy: {0}")]
    Busy(String),

    /// Classifier or embedder call failed or timed out. Non-fatal.
    #[error("Agent error: {agent}: {message}")]
    Agent { agent: String, message: String },

    /// Integrity check failed on open. Fatal for the opening process.
    #[error("Database corruption: {0}")]
    Corruption(String),

    /// Environment or configuration is invalid.
    #[error("Configuration error: {0}")]
    Config(String),
}

// ── Convenience constructors ───────────────────────────────────────────────

impl LaminarkError {
    /// Validation failure with a formatted reason.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Missing-row failure for paths that require existence.
    pub fn not_found(what: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound { what, id: id.into() }
    }

    /// Agent (classifier/embedder) failure with source name.
    pub fn agent(agent: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Agent { agent: agent.into(), message: message.into() }
    }
}

// ── Convenience alias ──────────────────────────────────────────────────────

/// All store operations return this type.
pub type LaminarkResult<T> = Result<T, LaminarkError>;
