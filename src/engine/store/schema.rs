// Database schema for the Laminark store, as numbered forward migrations.
// The runner reads the max applied version from `migrations`, applies every
// higher-numbered migration inside its own transaction, and records it.
// Re-running is a no-op. Each block is independently idempotent
// (IF NOT EXISTS everywhere; column adds are guarded by pragma_table_info).
//
// Adding a migration: append to MIGRATIONS with the next version. Never
// edit an existing block; history is append-only.

use crate::atoms::constants::now_ts;
use crate::atoms::error::LaminarkResult;
use log::info;
use rusqlite::{params, Connection};

pub(crate) struct Migration {
    pub version: i64,
    pub description: &'static str,
    pub apply: fn(&Connection) -> rusqlite::Result<()>,
}

pub(crate) const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "observations + sessions + content-only lexical index",
        apply: migrate_v1,
    },
    Migration {
        version: 2,
        description: "observation titles; lexical index rebuilt as (title, content)",
        apply: migrate_v2,
    },
    Migration {
        version: 3,
        description: "knowledge graph nodes and edges",
        apply: migrate_v3,
    },
    Migration {
        version: 4,
        description: "topic threads (stash)",
        apply: migrate_v4,
    },
    Migration {
        version: 5,
        description: "tool registry, usage events, tool lexical index",
        apply: migrate_v5,
    },
];

/// Apply all migrations newer than the recorded head.
pub(crate) fn run_migrations(conn: &Connection) -> LaminarkResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS migrations (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL
        );",
    )?;

    let applied: i64 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM migrations",
        [],
        |r| r.get(0),
    )?;

    for migration in MIGRATIONS.iter().filter(|m| m.version > applied) {
        let tx = conn.unchecked_transaction()?;
        (migration.apply)(conn)?;
        tx.execute(
            "INSERT INTO migrations (version, applied_at) VALUES (?1, ?2)",
            params![migration.version, now_ts()],
        )?;
        tx.commit()?;
        info!(
            "[store] Applied migration v{}: {}",
            migration.version, migration.description
        );
    }

    Ok(())
}

/// Highest applied migration version.
pub(crate) fn schema_version(conn: &Connection) -> rusqlite::Result<i64> {
    conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM migrations",
        [],
        |r| r.get(0),
    )
}

fn column_exists(conn: &Connection, table: &str, column: &str) -> rusqlite::Result<bool> {
    let mut stmt =
        conn.prepare("SELECT COUNT(*) FROM pragma_table_info(?1) WHERE name = ?2")?;
    let count: i64 = stmt.query_row(params![table, column], |r| r.get(0))?;
    Ok(count > 0)
}

// ── v1: observations + sessions + content-only FTS ─────────────────────────

fn migrate_v1(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS observations (
            id TEXT PRIMARY KEY,
            project_hash TEXT NOT NULL,
            content TEXT NOT NULL,
            source TEXT NOT NULL DEFAULT 'manual',
            session_id TEXT,
            kind TEXT NOT NULL DEFAULT 'finding',
            classification TEXT,
            classified_at TEXT,
            embedding BLOB,
            embedding_model TEXT,
            embedding_version INTEGER,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            deleted_at TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_observations_project
            ON observations(project_hash, created_at DESC);
        CREATE INDEX IF NOT EXISTS idx_observations_session
            ON observations(project_hash, session_id);
        CREATE INDEX IF NOT EXISTS idx_observations_pending
            ON observations(project_hash, created_at)
            WHERE classification IS NULL AND deleted_at IS NULL;

        CREATE TABLE IF NOT EXISTS sessions (
            id TEXT PRIMARY KEY,
            project_hash TEXT NOT NULL,
            started_at TEXT NOT NULL,
            ended_at TEXT,
            summary TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_sessions_project
            ON sessions(project_hash, started_at DESC);

        -- External-content lexical index over content only. Mirrors live
        -- rows; soft-deleted rows are kept out by the trigger guards.
        CREATE VIRTUAL TABLE IF NOT EXISTS observations_fts USING fts5(
            content,
            content=observations,
            content_rowid=rowid,
            tokenize='porter unicode61'
        );

        CREATE TRIGGER IF NOT EXISTS observations_ai AFTER INSERT ON observations
        BEGIN
            INSERT INTO observations_fts(rowid, content)
            SELECT NEW.rowid, NEW.content WHERE NEW.deleted_at IS NULL;
        END;

        CREATE TRIGGER IF NOT EXISTS observations_ad AFTER DELETE ON observations
        BEGIN
            INSERT INTO observations_fts(observations_fts, rowid, content)
            SELECT 'delete', OLD.rowid, OLD.content WHERE OLD.deleted_at IS NULL;
        END;

        CREATE TRIGGER IF NOT EXISTS observations_au AFTER UPDATE ON observations
        BEGIN
            INSERT INTO observations_fts(observations_fts, rowid, content)
            SELECT 'delete', OLD.rowid, OLD.content WHERE OLD.deleted_at IS NULL;
            INSERT INTO observations_fts(rowid, content)
            SELECT NEW.rowid, NEW.content WHERE NEW.deleted_at IS NULL;
        END;
        ",
    )
}

// ── v2: title column, FTS rebuilt as (title, content) ──────────────────────
// Snippet callers address the content column by index; after this boundary
// that index is 1 (title is 0). See recall/search.rs.

fn migrate_v2(conn: &Connection) -> rusqlite::Result<()> {
    if !column_exists(conn, "observations", "title")? {
        conn.execute("ALTER TABLE observations ADD COLUMN title TEXT", [])?;
    }

    conn.execute_batch(
        "
        DROP TRIGGER IF EXISTS observations_ai;
        DROP TRIGGER IF EXISTS observations_ad;
        DROP TRIGGER IF EXISTS observations_au;
        DROP TABLE IF EXISTS observations_fts;

        CREATE VIRTUAL TABLE observations_fts USING fts5(
            title,
            content,
            content=observations,
            content_rowid=rowid,
            tokenize='porter unicode61'
        );

        INSERT INTO observations_fts(rowid, title, content)
            SELECT rowid, title, content FROM observations
            WHERE deleted_at IS NULL;

        CREATE TRIGGER observations_ai AFTER INSERT ON observations
        BEGIN
            INSERT INTO observations_fts(rowid, title, content)
            SELECT NEW.rowid, NEW.title, NEW.content WHERE NEW.deleted_at IS NULL;
        END;

        CREATE TRIGGER observations_ad AFTER DELETE ON observations
        BEGIN
            INSERT INTO observations_fts(observations_fts, rowid, title, content)
            SELECT 'delete', OLD.rowid, OLD.title, OLD.content WHERE OLD.deleted_at IS NULL;
        END;

        CREATE TRIGGER observations_au AFTER UPDATE ON observations
        BEGIN
            INSERT INTO observations_fts(observations_fts, rowid, title, content)
            SELECT 'delete', OLD.rowid, OLD.title, OLD.content WHERE OLD.deleted_at IS NULL;
            INSERT INTO observations_fts(rowid, title, content)
            SELECT NEW.rowid, NEW.title, NEW.content WHERE NEW.deleted_at IS NULL;
        END;
        ",
    )
}

// ── v3: knowledge graph ────────────────────────────────────────────────────

fn migrate_v3(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS graph_nodes (
            id TEXT PRIMARY KEY,
            project_hash TEXT NOT NULL,
            type TEXT NOT NULL,
            name TEXT NOT NULL,
            canonical_name TEXT NOT NULL,
            metadata TEXT NOT NULL DEFAULT '{}',
            observation_ids TEXT NOT NULL DEFAULT '[]',
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_nodes_lookup
            ON graph_nodes(project_hash, type, canonical_name);

        CREATE TABLE IF NOT EXISTS graph_edges (
            id TEXT PRIMARY KEY,
            project_hash TEXT NOT NULL,
            source_id TEXT NOT NULL REFERENCES graph_nodes(id) ON DELETE CASCADE,
            target_id TEXT NOT NULL REFERENCES graph_nodes(id) ON DELETE CASCADE,
            type TEXT NOT NULL,
            weight REAL NOT NULL DEFAULT 0.5
                CHECK (weight >= 0.0 AND weight <= 1.0),
            metadata TEXT NOT NULL DEFAULT '{}',
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            UNIQUE (project_hash, source_id, target_id, type)
        );

        CREATE INDEX IF NOT EXISTS idx_edges_source
            ON graph_edges(project_hash, source_id);
        CREATE INDEX IF NOT EXISTS idx_edges_target
            ON graph_edges(project_hash, target_id);
        ",
    )
}

// ── v4: topic threads ──────────────────────────────────────────────────────

fn migrate_v4(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS topic_threads (
            id TEXT PRIMARY KEY,
            project_hash TEXT NOT NULL,
            topic_label TEXT NOT NULL,
            summary TEXT NOT NULL DEFAULT '',
            status TEXT NOT NULL DEFAULT 'active',
            observation_snapshots TEXT NOT NULL DEFAULT '[]',
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_threads_project
            ON topic_threads(project_hash, updated_at DESC);
        ",
    )
}

// ── v5: tool registry ──────────────────────────────────────────────────────
// project_hash is '' for global/unscoped tools so the UNIQUE constraint
// holds (NULLs never collide in SQLite unique indexes).

fn migrate_v5(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS tools (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            tool_type TEXT NOT NULL DEFAULT 'command',
            scope TEXT NOT NULL DEFAULT 'global',
            project_hash TEXT NOT NULL DEFAULT '',
            source TEXT NOT NULL DEFAULT 'config',
            description TEXT,
            server_name TEXT,
            usage_count INTEGER NOT NULL DEFAULT 0,
            last_used_at TEXT,
            discovered_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'active',
            embedding BLOB,
            UNIQUE (name, scope, project_hash)
        );

        CREATE INDEX IF NOT EXISTS idx_tools_scope
            ON tools(scope, project_hash);

        CREATE TABLE IF NOT EXISTS tool_usage_events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            tool_id TEXT NOT NULL REFERENCES tools(id) ON DELETE CASCADE,
            success INTEGER NOT NULL,
            created_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_tool_events_tool
            ON tool_usage_events(tool_id, id DESC);

        CREATE VIRTUAL TABLE IF NOT EXISTS tools_fts USING fts5(
            name,
            description,
            content=tools,
            content_rowid=rowid,
            tokenize='porter unicode61'
        );

        CREATE TRIGGER IF NOT EXISTS tools_ai AFTER INSERT ON tools
        BEGIN
            INSERT INTO tools_fts(rowid, name, description)
            VALUES (NEW.rowid, NEW.name, NEW.description);
        END;

        CREATE TRIGGER IF NOT EXISTS tools_ad AFTER DELETE ON tools
        BEGIN
            INSERT INTO tools_fts(tools_fts, rowid, name, description)
            VALUES ('delete', OLD.rowid, OLD.name, OLD.description);
        END;

        CREATE TRIGGER IF NOT EXISTS tools_au AFTER UPDATE ON tools
        BEGIN
            INSERT INTO tools_fts(tools_fts, rowid, name, description)
            VALUES ('delete', OLD.rowid, OLD.name, OLD.description);
            INSERT INTO tools_fts(rowid, name, description)
            VALUES (NEW.rowid, NEW.name, NEW.description);
        END;
        ",
    )
}
