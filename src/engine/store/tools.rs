// ── Tool registry rows ─────────────────────────────────────────────────────
// Discovered tools, their usage events, and lifecycle state.
//
// Lifecycle:
//   • upsert on discovery, keyed (name, scope, project_hash)
//   • a usage event bumps usage_count / last_used_at; 3 failures inside
//     the trailing 5 events demote, any success restores active
//   • config-sourced tools missing from a session's configured set go stale
//
// Ranking: 0.7·norm(frequency) + 0.3·recency, recency half-life 7 days;
// ×0.25 when status ≠ active, ×0.5 when older than 30 days (stacking).

use super::{decode_embedding, encode_embedding, MemoryStore, OptionalRow};
use crate::atoms::constants::{
    now_ts, TOOL_AGED_DAYS, TOOL_DEMOTION_FAILURES, TOOL_DEMOTION_WINDOW,
    TOOL_PENALTY_AGED, TOOL_PENALTY_INACTIVE, TOOL_RANK_FREQUENCY_WEIGHT,
    TOOL_RANK_RECENCY_WEIGHT, TOOL_RECENCY_HALF_LIFE_DAYS, TS_FORMAT,
};
use crate::atoms::error::{LaminarkError, LaminarkResult};
use crate::atoms::types::{ToolInput, ToolRecord, ToolScope, ToolStatus, ToolUsageEvent};
use log::debug;
use rusqlite::params;

const TOOL_COLUMNS: &str = "id, name, tool_type, scope, project_hash, source, description, \
     server_name, usage_count, last_used_at, discovered_at, updated_at, status, embedding";

impl MemoryStore {
    /// Register (or refresh) a discovered tool. Conflicts on
    /// (name, scope, project_hash) refresh description/source/server and
    /// bump updated_at; counters and status survive rediscovery.
    pub fn upsert_tool(
        &self,
        project: Option<&str>,
        input: &ToolInput,
    ) -> LaminarkResult<ToolRecord> {
        if input.name.trim().is_empty() {
            return Err(LaminarkError::validation("tool name must be nonempty"));
        }
        if input.scope == ToolScope::Project && project.is_none() {
            return Err(LaminarkError::validation(
                "project-scoped tool requires a project hash",
            ));
        }

        let project_key = tool_project_key(input.scope, project);
        let id = uuid::Uuid::new_v4().to_string();
        let now = now_ts();

        self.with_busy_retry(|conn| {
            conn.execute(
                "INSERT INTO tools
                    (id, name, tool_type, scope, project_hash, source, description,
                     server_name, discovered_at, updated_at, status)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9, 'active')
                 ON CONFLICT (name, scope, project_hash) DO UPDATE SET
                    tool_type = excluded.tool_type,
                    source = excluded.source,
                    description = COALESCE(excluded.description, description),
                    server_name = COALESCE(excluded.server_name, server_name),
                    updated_at = excluded.updated_at",
                params![
                    id,
                    input.name,
                    input.tool_type,
                    input.scope.as_str(),
                    project_key,
                    input.source,
                    input.description,
                    input.server_name,
                    now,
                ],
            )
        })?;

        self.get_tool(project, &input.name, input.scope)?
            .ok_or_else(|| LaminarkError::not_found("tool", input.name.clone()))
    }

    pub fn get_tool(
        &self,
        project: Option<&str>,
        name: &str,
        scope: ToolScope,
    ) -> LaminarkResult<Option<ToolRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {TOOL_COLUMNS} FROM tools
             WHERE name = ?1 AND scope = ?2 AND project_hash = ?3"
        ))?;
        Ok(stmt
            .query_row(
                params![name, scope.as_str(), tool_project_key(scope, project)],
                tool_from_row,
            )
            .optional()?)
    }

    pub fn get_tool_by_id(&self, id: &str) -> LaminarkResult<Option<ToolRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare_cached(&format!("SELECT {TOOL_COLUMNS} FROM tools WHERE id = ?1"))?;
        Ok(stmt.query_row(params![id], tool_from_row).optional()?)
    }

    /// Record one invocation and re-evaluate lifecycle state. Returns the
    /// status after the event. Event insert, counter bump, and status
    /// change commit together.
    pub fn record_tool_usage(&self, tool_id: &str, success: bool) -> LaminarkResult<ToolStatus> {
        let conn = self.conn.lock();
        let tx = conn.unchecked_transaction()?;
        let now = now_ts();

        let inserted = tx.execute(
            "INSERT INTO tool_usage_events (tool_id, success, created_at)
             SELECT ?1, ?2, ?3 WHERE EXISTS (SELECT 1 FROM tools WHERE id = ?1)",
            params![tool_id, success, now],
        )?;
        if inserted == 0 {
            return Err(LaminarkError::not_found("tool", tool_id));
        }

        tx.execute(
            "UPDATE tools SET usage_count = usage_count + 1, last_used_at = ?2, updated_at = ?2
             WHERE id = ?1",
            params![tool_id, now],
        )?;

        let status = if success {
            // Any single success restores the tool.
            ToolStatus::Active
        } else {
            let recent_failures: i64 = tx.query_row(
                "SELECT COUNT(*) FROM (
                    SELECT success FROM tool_usage_events
                    WHERE tool_id = ?1 ORDER BY id DESC LIMIT ?2
                 ) WHERE success = 0",
                params![tool_id, TOOL_DEMOTION_WINDOW as i64],
                |r| r.get(0),
            )?;
            if recent_failures as usize >= TOOL_DEMOTION_FAILURES {
                ToolStatus::Demoted
            } else {
                let current: String =
                    tx.query_row("SELECT status FROM tools WHERE id = ?1", params![tool_id], |r| {
                        r.get(0)
                    })?;
                current.parse::<ToolStatus>().unwrap_or(ToolStatus::Active)
            }
        };

        tx.execute(
            "UPDATE tools SET status = ?2 WHERE id = ?1",
            params![tool_id, status.as_str()],
        )?;
        tx.commit()?;

        debug!("[tools] Usage recorded for {} (success={success}, status={})", &tool_id[..8], status.as_str());
        Ok(status)
    }

    /// Session-start staleness sweep: config-sourced tools visible to this
    /// project that are missing from the configured set go stale; ones
    /// that reappear recover from stale (demotion is usage-driven and
    /// untouched here).
    pub fn mark_stale_tools(
        &self,
        project: Option<&str>,
        configured_names: &[String],
    ) -> LaminarkResult<usize> {
        let conn = self.conn.lock();
        let project_key = project.unwrap_or("");

        let mut stmt = conn.prepare_cached(
            "SELECT id, name, status FROM tools
             WHERE source = 'config' AND (project_hash = '' OR project_hash = ?1)",
        )?;
        let rows: Vec<(String, String, String)> = stmt
            .query_map(params![project_key], |r| {
                Ok((r.get(0)?, r.get(1)?, r.get(2)?))
            })?
            .filter_map(|r| r.ok())
            .collect();

        let now = now_ts();
        let mut stale_count = 0;
        for (id, name, status) in rows {
            let present = configured_names.iter().any(|n| n == &name);
            if !present && status != "stale" && status != "demoted" {
                conn.execute(
                    "UPDATE tools SET status = 'stale', updated_at = ?2 WHERE id = ?1",
                    params![id, now],
                )?;
                stale_count += 1;
            } else if present && status == "stale" {
                conn.execute(
                    "UPDATE tools SET status = 'active', updated_at = ?2 WHERE id = ?1",
                    params![id, now],
                )?;
            }
        }
        Ok(stale_count)
    }

    /// Tools visible to a session of this project, demoted excluded,
    /// ranked best-first.
    pub fn get_available_for_session(
        &self,
        project: &str,
    ) -> LaminarkResult<Vec<ToolRecord>> {
        let tools = self.list_session_tools(project)?;
        let mut ranked: Vec<(ToolRecord, f64)> = {
            let max_usage = tools.iter().map(|t| t.usage_count).max().unwrap_or(0);
            tools
                .into_iter()
                .filter(|t| t.status != ToolStatus::Demoted)
                .map(|t| {
                    let score = rank_score(&t, max_usage);
                    (t, score)
                })
                .collect()
        };
        ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        Ok(ranked.into_iter().map(|(t, _)| t).collect())
    }

    /// Raw scope-filtered listing (demoted included); ranking and
    /// filtering happen above.
    pub(crate) fn list_session_tools(&self, project: &str) -> LaminarkResult<Vec<ToolRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {TOOL_COLUMNS} FROM tools
             WHERE (scope = 'global')
                OR (scope = 'project' AND project_hash = ?1)
                OR (scope = 'plugin' AND (project_hash = '' OR project_hash = ?1))"
        ))?;
        let rows = stmt
            .query_map(params![project], tool_from_row)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    /// BM25 over (name, description), name weighted 2×. Returns
    /// (tool, rank) with smaller-is-better already negated to
    /// bigger-is-better.
    pub(crate) fn search_tools_bm25(
        &self,
        project: &str,
        match_expr: &str,
        limit: usize,
    ) -> LaminarkResult<Vec<(ToolRecord, f64)>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {columns}, bm25(tools_fts, 2.0, 1.0) AS rank
             FROM tools t
             JOIN tools_fts ON t.rowid = tools_fts.rowid
             WHERE tools_fts MATCH ?2
               AND ((t.scope = 'global')
                 OR (t.scope = 'project' AND t.project_hash = ?1)
                 OR (t.scope = 'plugin' AND (t.project_hash = '' OR t.project_hash = ?1)))
               AND t.status != 'demoted'
             ORDER BY rank
             LIMIT ?3",
            columns = TOOL_COLUMNS
                .split(", ")
                .map(|c| format!("t.{c}"))
                .collect::<Vec<_>>()
                .join(", "),
        ))?;
        let rows = stmt
            .query_map(params![project, match_expr, limit as i64], |row| {
                let tool = tool_from_row(row)?;
                let rank: f64 = row.get(14)?;
                Ok((tool, -rank))
            })?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    /// Tools with a stored description vector, for the dense search pass.
    pub(crate) fn list_tools_with_embeddings(
        &self,
        project: &str,
    ) -> LaminarkResult<Vec<ToolRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {TOOL_COLUMNS} FROM tools
             WHERE embedding IS NOT NULL
               AND ((scope = 'global')
                 OR (scope = 'project' AND project_hash = ?1)
                 OR (scope = 'plugin' AND (project_hash = '' OR project_hash = ?1)))
               AND status != 'demoted'"
        ))?;
        let rows = stmt
            .query_map(params![project], tool_from_row)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    /// Newest-first invocation history for a tool.
    pub fn list_tool_usage(
        &self,
        tool_id: &str,
        limit: usize,
    ) -> LaminarkResult<Vec<ToolUsageEvent>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT tool_id, success, created_at FROM tool_usage_events
             WHERE tool_id = ?1 ORDER BY id DESC LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(params![tool_id, limit as i64], |row| {
                Ok(ToolUsageEvent {
                    tool_id: row.get(0)?,
                    success: row.get::<_, i64>(1)? != 0,
                    created_at: row.get(2)?,
                })
            })?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    /// Store a description embedding for the dense tool-search pass.
    pub fn update_tool_embedding(&self, id: &str, vector: &[f32]) -> LaminarkResult<bool> {
        let conn = self.conn.lock();
        let bytes = encode_embedding(vector);
        let changed = conn.execute(
            "UPDATE tools SET embedding = ?2, updated_at = ?3 WHERE id = ?1",
            params![id, bytes, now_ts()],
        )?;
        Ok(changed > 0)
    }

    pub fn count_tools(&self, project: &str) -> LaminarkResult<usize> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM tools WHERE project_hash = '' OR project_hash = ?1",
            params![project],
            |r| r.get(0),
        )?;
        Ok(count as usize)
    }
}

fn tool_project_key(scope: ToolScope, project: Option<&str>) -> String {
    match scope {
        ToolScope::Global => String::new(),
        _ => project.unwrap_or("").to_string(),
    }
}

/// The §ranking score: frequency + recency with stacking penalties.
pub(crate) fn rank_score(tool: &ToolRecord, max_usage: i64) -> f64 {
    let frequency = if max_usage > 0 {
        tool.usage_count as f64 / max_usage as f64
    } else {
        0.0
    };

    let reference = tool.last_used_at.as_deref().unwrap_or(&tool.discovered_at);
    let age_days = days_since(reference);
    let recency = (-(2.0_f64.ln()) * age_days / TOOL_RECENCY_HALF_LIFE_DAYS).exp();

    let mut score =
        TOOL_RANK_FREQUENCY_WEIGHT * frequency + TOOL_RANK_RECENCY_WEIGHT * recency;
    if tool.status != ToolStatus::Active {
        score *= TOOL_PENALTY_INACTIVE;
    }
    if age_days > TOOL_AGED_DAYS {
        score *= TOOL_PENALTY_AGED;
    }
    score
}

fn days_since(timestamp: &str) -> f64 {
    match chrono::NaiveDateTime::parse_from_str(timestamp, TS_FORMAT) {
        Ok(parsed) => {
            let elapsed = chrono::Utc::now() - parsed.and_utc();
            (elapsed.num_seconds() as f64 / 86_400.0).max(0.0)
        }
        Err(_) => TOOL_AGED_DAYS,
    }
}

fn tool_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ToolRecord> {
    let scope_str: String = row.get(3)?;
    let project_hash: String = row.get(4)?;
    let status_str: String = row.get(12)?;
    let embedding_bytes: Option<Vec<u8>> = row.get(13)?;

    Ok(ToolRecord {
        id: row.get(0)?,
        name: row.get(1)?,
        tool_type: row.get(2)?,
        scope: scope_str.parse::<ToolScope>().unwrap_or(ToolScope::Global),
        project_hash: if project_hash.is_empty() { None } else { Some(project_hash) },
        source: row.get(5)?,
        description: row.get(6)?,
        server_name: row.get(7)?,
        usage_count: row.get(8)?,
        last_used_at: row.get(9)?,
        discovered_at: row.get(10)?,
        updated_at: row.get(11)?,
        status: status_str.parse::<ToolStatus>().unwrap_or(ToolStatus::Active),
        embedding: embedding_bytes.and_then(|b| decode_embedding(&b)),
    })
}

#[cfg(test)]
mod tests {
    use super::super::store_for_tests;
    use crate::atoms::types::{ToolInput, ToolScope, ToolStatus};

    const P1: &str = "aaaaaaaaaaaaaaaa";

    fn tool_input(name: &str, scope: ToolScope, source: &str) -> ToolInput {
        ToolInput {
            name: name.to_string(),
            tool_type: "mcp".to_string(),
            scope,
            source: source.to_string(),
            description: Some(format!("{name} does things")),
            server_name: None,
        }
    }

    #[test]
    fn upsert_is_conflict_free_on_rediscovery() {
        let store = store_for_tests();
        let first = store
            .upsert_tool(Some(P1), &tool_input("grep_codebase", ToolScope::Project, "config"))
            .unwrap();
        let second = store
            .upsert_tool(Some(P1), &tool_input("grep_codebase", ToolScope::Project, "config"))
            .unwrap();
        assert_eq!(first.id, second.id);
    }

    #[test]
    fn demotion_after_three_failures_then_recovery() {
        let store = store_for_tests();
        let tool = store
            .upsert_tool(Some(P1), &tool_input("flaky_tool", ToolScope::Project, "config"))
            .unwrap();

        store.record_tool_usage(&tool.id, false).unwrap();
        store.record_tool_usage(&tool.id, false).unwrap();
        let status = store.record_tool_usage(&tool.id, false).unwrap();
        assert_eq!(status, ToolStatus::Demoted);

        // A fourth failure keeps it demoted.
        let status = store.record_tool_usage(&tool.id, false).unwrap();
        assert_eq!(status, ToolStatus::Demoted);

        // Demoted tools are hidden from the session surface.
        let available = store.get_available_for_session(P1).unwrap();
        assert!(!available.iter().any(|t| t.id == tool.id));

        // One success restores it.
        let status = store.record_tool_usage(&tool.id, true).unwrap();
        assert_eq!(status, ToolStatus::Active);
        let available = store.get_available_for_session(P1).unwrap();
        assert!(available.iter().any(|t| t.id == tool.id));
    }

    #[test]
    fn old_failures_fall_out_of_the_window() {
        let store = store_for_tests();
        let tool = store
            .upsert_tool(Some(P1), &tool_input("mostly_fine", ToolScope::Project, "config"))
            .unwrap();

        // 2 failures, then 3 successes push them out of the window; a
        // single new failure must not demote.
        store.record_tool_usage(&tool.id, false).unwrap();
        store.record_tool_usage(&tool.id, false).unwrap();
        store.record_tool_usage(&tool.id, true).unwrap();
        store.record_tool_usage(&tool.id, true).unwrap();
        store.record_tool_usage(&tool.id, true).unwrap();
        let status = store.record_tool_usage(&tool.id, false).unwrap();
        assert_eq!(status, ToolStatus::Active);
    }

    #[test]
    fn scope_filter_for_sessions() {
        let store = store_for_tests();
        store
            .upsert_tool(None, &tool_input("global_tool", ToolScope::Global, "config"))
            .unwrap();
        store
            .upsert_tool(Some(P1), &tool_input("project_tool", ToolScope::Project, "config"))
            .unwrap();
        store
            .upsert_tool(
                Some("bbbbbbbbbbbbbbbb"),
                &tool_input("other_project_tool", ToolScope::Project, "config"),
            )
            .unwrap();
        store
            .upsert_tool(None, &tool_input("shared_plugin", ToolScope::Plugin, "plugin:x"))
            .unwrap();

        let names: Vec<String> = store
            .get_available_for_session(P1)
            .unwrap()
            .into_iter()
            .map(|t| t.name)
            .collect();
        assert!(names.contains(&"global_tool".to_string()));
        assert!(names.contains(&"project_tool".to_string()));
        assert!(names.contains(&"shared_plugin".to_string()));
        assert!(!names.contains(&"other_project_tool".to_string()));
    }

    #[test]
    fn staleness_sweep_marks_and_recovers() {
        let store = store_for_tests();
        let kept = store
            .upsert_tool(Some(P1), &tool_input("kept", ToolScope::Project, "config"))
            .unwrap();
        let gone = store
            .upsert_tool(Some(P1), &tool_input("gone", ToolScope::Project, "config"))
            .unwrap();
        let organic = store
            .upsert_tool(Some(P1), &tool_input("organic", ToolScope::Project, "organic"))
            .unwrap();

        let stale = store
            .mark_stale_tools(Some(P1), &["kept".to_string()])
            .unwrap();
        assert_eq!(stale, 1);
        assert_eq!(store.get_tool_by_id(&gone.id).unwrap().unwrap().status, ToolStatus::Stale);
        assert_eq!(store.get_tool_by_id(&kept.id).unwrap().unwrap().status, ToolStatus::Active);
        // Non-config tools are never swept.
        assert_eq!(store.get_tool_by_id(&organic.id).unwrap().unwrap().status, ToolStatus::Active);

        // Reappearing in the config recovers it.
        store
            .mark_stale_tools(Some(P1), &["kept".to_string(), "gone".to_string()])
            .unwrap();
        assert_eq!(store.get_tool_by_id(&gone.id).unwrap().unwrap().status, ToolStatus::Active);
    }
}
