// ── Session rows ───────────────────────────────────────────────────────────
// One row per demarcated run of the host assistant. Created on the
// session-start event, closed (with an optional summary) on session-end.

use super::{MemoryStore, OptionalRow};
use crate::atoms::constants::now_ts;
use crate::atoms::error::LaminarkResult;
use crate::atoms::types::Session;
use log::debug;
use rusqlite::params;

impl MemoryStore {
    /// Record a session start. The id comes from the host (or a fresh
    /// UUID when it has none).
    pub fn start_session(&self, project: &str, id: Option<&str>) -> LaminarkResult<Session> {
        let id = id
            .map(|s| s.to_string())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let now = now_ts();

        self.with_busy_retry(|conn| {
            conn.execute(
                "INSERT OR IGNORE INTO sessions (id, project_hash, started_at)
                 VALUES (?1, ?2, ?3)",
                params![id, project, now],
            )
        })?;

        debug!("[store] Session {} started", &id[..8.min(id.len())]);
        Ok(Session {
            id,
            project_hash: project.to_string(),
            started_at: now,
            ended_at: None,
            summary: None,
        })
    }

    /// Close a session, optionally persisting a short recap.
    pub fn end_session(
        &self,
        project: &str,
        id: &str,
        summary: Option<&str>,
    ) -> LaminarkResult<bool> {
        let changed = self.with_busy_retry(|conn| {
            conn.execute(
                "UPDATE sessions SET ended_at = ?3, summary = COALESCE(?4, summary)
                 WHERE project_hash = ?1 AND id = ?2",
                params![project, id, now_ts(), summary],
            )
        })?;
        Ok(changed > 0)
    }

    /// Fetch a session row.
    pub fn get_session(&self, project: &str, id: &str) -> LaminarkResult<Option<Session>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT id, project_hash, started_at, ended_at, summary
             FROM sessions WHERE project_hash = ?1 AND id = ?2",
        )?;
        Ok(stmt
            .query_row(params![project, id], |row| {
                Ok(Session {
                    id: row.get(0)?,
                    project_hash: row.get(1)?,
                    started_at: row.get(2)?,
                    ended_at: row.get(3)?,
                    summary: row.get(4)?,
                })
            })
            .optional()?)
    }
}

#[cfg(test)]
mod tests {
    use super::super::store_for_tests;

    const P1: &str = "aaaaaaaaaaaaaaaa";

    #[test]
    fn start_and_end_session() {
        let store = store_for_tests();
        let session = store.start_session(P1, Some("sess-1")).unwrap();
        assert_eq!(session.id, "sess-1");

        assert!(store.end_session(P1, "sess-1", Some("fixed the login bug")).unwrap());
        let closed = store.get_session(P1, "sess-1").unwrap().unwrap();
        assert!(closed.ended_at.is_some());
        assert_eq!(closed.summary.as_deref(), Some("fixed the login bug"));
    }

    #[test]
    fn sessions_are_project_scoped() {
        let store = store_for_tests();
        store.start_session(P1, Some("sess-1")).unwrap();
        assert!(store.get_session("bbbbbbbbbbbbbbbb", "sess-1").unwrap().is_none());
    }
}
