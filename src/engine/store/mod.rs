// Laminark store — the DB layer.
// One SQLite file shared by a long-lived service and any number of
// ephemeral hook processes. Every method locks the connection, binds
// project_hash, and returns typed results.
//
// Module layout:
//   schema        — numbered migrations + `migrations` version table
//   observations  — observation CRUD, soft delete, classification state
//   search        — BM25 and cosine-KNN candidate passes
//   sessions      — session start/end rows
//   graph         — graph node/edge rows, bounded BFS
//   threads       — topic thread (stash) rows
//   tools         — tool registry, usage events, staleness, ranking
//
// Embedding BLOBs are the store's own wire format (raw little-endian
// IEEE-754 f32); the codec lives here next to the open-time probe.

use crate::atoms::constants::BUSY_TIMEOUT_MS;
use crate::atoms::error::{LaminarkError, LaminarkResult};
use log::{info, warn};
use parking_lot::Mutex;
use rusqlite::Connection;
use std::path::{Path, PathBuf};

mod graph;
mod observations;
mod schema;
mod search;
mod sessions;
mod threads;
mod tools;

/// How to open the store. Defaults match production; tests flip knobs.
#[derive(Debug, Clone)]
pub struct OpenOptions {
    /// Database file path; `None` opens an in-memory database.
    pub path: Option<PathBuf>,
    /// Allow the dense vector path at all. The effective capability flag
    /// is this AND the open-time probe.
    pub enable_vector: bool,
}

impl Default for OpenOptions {
    fn default() -> Self {
        OpenOptions { path: None, enable_vector: true }
    }
}

/// Thread-safe handle over the single database file.
///
/// The Mutex shares one connection between threads of *this* process only.
/// Cross-process coordination is WAL + busy_timeout and nothing else, so
/// concurrent hook writers serialize at the SQLite layer, not here.
pub struct MemoryStore {
    /// The SQLite connection, protected by a Mutex.
    /// `pub` for integration tests and callers that need raw statements.
    pub conn: Mutex<Connection>,
    vector_enabled: bool,
}

impl MemoryStore {
    /// Open (or create) the database at the default config path.
    pub fn open() -> LaminarkResult<Self> {
        let path = crate::engine::paths::db_path()?;
        Self::open_with(OpenOptions { path: Some(path), enable_vector: true })
    }

    /// Open (or create) the database at an explicit path.
    pub fn open_at(path: &Path) -> LaminarkResult<Self> {
        Self::open_with(OpenOptions { path: Some(path.to_path_buf()), enable_vector: true })
    }

    /// Open with explicit options. In-memory databases skip WAL (it does
    /// not apply) but run the full schema.
    pub fn open_with(options: OpenOptions) -> LaminarkResult<Self> {
        let conn = match &options.path {
            Some(path) => {
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                info!("[store] Opening store at {:?}", path);
                Connection::open(path)?
            }
            None => Connection::open_in_memory()?,
        };

        // WAL lets one writer coexist with many readers across processes;
        // busy_timeout absorbs writer contention between hook processes
        // and the service. In-memory databases reject WAL, hence .ok().
        conn.pragma_update(None, "journal_mode", "WAL").ok();
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.busy_timeout(std::time::Duration::from_millis(BUSY_TIMEOUT_MS))?;

        integrity_check(&conn)?;
        schema::run_migrations(&conn)?;

        let vector_enabled = options.enable_vector && probe_vector_support(&conn);
        if !vector_enabled {
            warn!("[store] Dense vector path disabled — search degrades to lexical-only");
        }

        Ok(MemoryStore { conn: Mutex::new(conn), vector_enabled })
    }

    /// Capability flag for the dense vector path. Set once at open,
    /// never flips; callers consult this instead of probing per call.
    pub fn vector_enabled(&self) -> bool {
        self.vector_enabled
    }

    /// Highest applied migration version.
    pub fn schema_version(&self) -> LaminarkResult<i64> {
        let conn = self.conn.lock();
        Ok(schema::schema_version(&conn)?)
    }

    /// Checkpoint the WAL and release the file. Consumes the handle so no
    /// statement can run afterwards.
    pub fn close(self) {
        let conn = self.conn.into_inner();
        conn.query_row("PRAGMA wal_checkpoint(TRUNCATE)", [], |_| Ok(()))
            .ok();
        drop(conn);
    }

    /// Run a write closure, retrying once if SQLite reports busy despite
    /// the timeout. A second busy surfaces as `LaminarkError::Busy`.
    pub(crate) fn with_busy_retry<T>(
        &self,
        mut op: impl FnMut(&Connection) -> rusqlite::Result<T>,
    ) -> LaminarkResult<T> {
        let conn = self.conn.lock();
        match op(&conn) {
            Ok(value) => Ok(value),
            Err(e) if is_busy(&e) => {
                warn!("[store] SQLITE_BUSY past timeout — retrying once");
                std::thread::sleep(std::time::Duration::from_millis(50));
                op(&conn).map_err(|e| {
                    if is_busy(&e) {
                        LaminarkError::Busy(e.to_string())
                    } else {
                        e.into()
                    }
                })
            }
            Err(e) => Err(e.into()),
        }
    }
}

fn is_busy(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(err, _)
            if err.code == rusqlite::ErrorCode::DatabaseBusy
                || err.code == rusqlite::ErrorCode::DatabaseLocked
    )
}

/// Integrity gate on open. A failed check is fatal for this process and
/// points at the file so the operator can act on it.
fn integrity_check(conn: &Connection) -> LaminarkResult<()> {
    let verdict: String = conn.query_row("PRAGMA quick_check", [], |r| r.get(0))?;
    if verdict == "ok" {
        Ok(())
    } else {
        Err(LaminarkError::Corruption(format!(
            "quick_check failed: {verdict} — inspect the database file"
        )))
    }
}

/// One-time open probe for the dense vector path: round-trip an embedding
/// BLOB and require it back bit-exact. Failure downgrades to lexical-only
/// rather than erroring.
fn probe_vector_support(conn: &Connection) -> bool {
    let round_trip = || -> rusqlite::Result<bool> {
        conn.execute_batch(
            "CREATE TEMP TABLE IF NOT EXISTS _vector_probe (embedding BLOB NOT NULL);
             DELETE FROM _vector_probe;",
        )?;
        let sent = encode_embedding(&[1.0f32, -0.5, 0.25, 2.0e-3]);
        conn.execute(
            "INSERT INTO _vector_probe (embedding) VALUES (?1)",
            rusqlite::params![sent],
        )?;
        let received: Vec<u8> =
            conn.query_row("SELECT embedding FROM _vector_probe", [], |r| r.get(0))?;
        conn.execute_batch("DROP TABLE _vector_probe;")?;
        Ok(decode_embedding(&received).as_deref() == Some(&[1.0f32, -0.5, 0.25, 2.0e-3][..]))
    };
    round_trip().unwrap_or(false)
}

// ── Embedding BLOB codec ───────────────────────────────────────────────────

/// Serialize a dense vector into the store's BLOB format: raw
/// little-endian IEEE-754 f32, nothing else. The round trip is bit-exact.
pub(crate) fn encode_embedding(vector: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vector.len() * 4);
    for value in vector {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

/// Deserialize a stored vector. A blob whose length is not a multiple of
/// four (truncated write, foreign data) reads as "no dense signal" so the
/// row degrades to lexical-only instead of poisoning search.
pub(crate) fn decode_embedding(bytes: &[u8]) -> Option<Vec<f32>> {
    if bytes.is_empty() || bytes.len() % 4 != 0 {
        return None;
    }
    let mut vector = Vec::with_capacity(bytes.len() / 4);
    for chunk in bytes.chunks_exact(4) {
        let mut raw = [0u8; 4];
        raw.copy_from_slice(chunk);
        vector.push(f32::from_le_bytes(raw));
    }
    Some(vector)
}

/// Extension trait: query_row returning Option on no rows.
pub(crate) trait OptionalRow<T> {
    fn optional(self) -> rusqlite::Result<Option<T>>;
}

impl<T> OptionalRow<T> for rusqlite::Result<T> {
    fn optional(self) -> rusqlite::Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
pub(crate) fn store_for_tests() -> MemoryStore {
    MemoryStore::open_with(OpenOptions::default()).expect("in-memory store")
}

#[cfg(test)]
pub(crate) fn lexical_only_store_for_tests() -> MemoryStore {
    MemoryStore::open_with(OpenOptions { path: None, enable_vector: false })
        .expect("in-memory store")
}
