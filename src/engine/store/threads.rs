// ── Topic thread (stash) rows ──────────────────────────────────────────────
// A thread is a labeled bundle of observation ids captured at stash time.
// Resuming flips the status and replays the snapshot to the caller; the
// underlying observations are never touched.

use super::{MemoryStore, OptionalRow};
use crate::atoms::constants::now_ts;
use crate::atoms::error::{LaminarkError, LaminarkResult};
use crate::atoms::types::{Observation, ThreadStatus, TopicThread};
use log::debug;
use rusqlite::params;

const THREAD_COLUMNS: &str =
    "id, project_hash, topic_label, summary, status, observation_snapshots, created_at, updated_at";

impl MemoryStore {
    /// Snapshot the given observation ids into a stashed thread.
    pub fn create_stash(
        &self,
        project: &str,
        topic_label: &str,
        summary: &str,
        observation_ids: &[String],
    ) -> LaminarkResult<TopicThread> {
        if topic_label.trim().is_empty() {
            return Err(LaminarkError::validation("topic label must be nonempty"));
        }

        let id = uuid::Uuid::new_v4().to_string();
        let now = now_ts();
        let snapshots = serde_json::to_string(observation_ids)?;

        self.with_busy_retry(|conn| {
            conn.execute(
                "INSERT INTO topic_threads
                    (id, project_hash, topic_label, summary, status, observation_snapshots,
                     created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, 'stashed', ?5, ?6, ?6)",
                params![id, project, topic_label, summary, snapshots, now],
            )
        })?;

        debug!("[store] Stashed thread {} ({} observations)", &id[..8], observation_ids.len());
        Ok(TopicThread {
            id,
            project_hash: project.to_string(),
            topic_label: topic_label.to_string(),
            summary: summary.to_string(),
            status: ThreadStatus::Stashed,
            observation_snapshots: observation_ids.to_vec(),
            created_at: now.clone(),
            updated_at: now,
        })
    }

    pub fn get_thread(&self, project: &str, id: &str) -> LaminarkResult<Option<TopicThread>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {THREAD_COLUMNS} FROM topic_threads WHERE project_hash = ?1 AND id = ?2"
        ))?;
        Ok(stmt.query_row(params![project, id], thread_from_row).optional()?)
    }

    /// Threads for the project, most recently touched first.
    pub fn list_threads(
        &self,
        project: &str,
        status: Option<ThreadStatus>,
    ) -> LaminarkResult<Vec<TopicThread>> {
        let conn = self.conn.lock();
        let mut sql = format!(
            "SELECT {THREAD_COLUMNS} FROM topic_threads WHERE project_hash = ?1"
        );
        if status.is_some() {
            sql.push_str(" AND status = ?2");
        }
        sql.push_str(" ORDER BY updated_at DESC");

        let mut stmt = conn.prepare(&sql)?;
        let rows = match status {
            Some(s) => stmt
                .query_map(params![project, s.as_str()], thread_from_row)?
                .filter_map(|r| r.ok())
                .collect(),
            None => stmt
                .query_map(params![project], thread_from_row)?
                .filter_map(|r| r.ok())
                .collect(),
        };
        Ok(rows)
    }

    /// Resume a stashed thread: mark it resumed and return the snapshot
    /// observations by id lookup. Requires existence.
    pub fn resume_thread(
        &self,
        project: &str,
        id: &str,
    ) -> LaminarkResult<(TopicThread, Vec<Observation>)> {
        let thread = self
            .get_thread(project, id)?
            .ok_or_else(|| LaminarkError::not_found("thread", id))?;

        {
            let conn = self.conn.lock();
            conn.execute(
                "UPDATE topic_threads SET status = 'resumed', updated_at = ?3
                 WHERE project_hash = ?1 AND id = ?2",
                params![project, id, now_ts()],
            )?;
        }

        // Replay the snapshot. Ids whose observations have since been
        // purged simply drop out; nothing is mutated.
        let mut observations = Vec::new();
        for obs_id in &thread.observation_snapshots {
            if let Some(obs) = self.get_observation(project, obs_id)? {
                observations.push(obs);
            }
        }

        let thread = self
            .get_thread(project, id)?
            .ok_or_else(|| LaminarkError::not_found("thread", id))?;
        Ok((thread, observations))
    }

    pub fn count_threads(&self, project: &str) -> LaminarkResult<usize> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM topic_threads WHERE project_hash = ?1",
            params![project],
            |r| r.get(0),
        )?;
        Ok(count as usize)
    }
}

fn thread_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<TopicThread> {
    let status_str: String = row.get(4)?;
    let snapshots_str: String = row.get(5)?;

    Ok(TopicThread {
        id: row.get(0)?,
        project_hash: row.get(1)?,
        topic_label: row.get(2)?,
        summary: row.get(3)?,
        status: status_str.parse::<ThreadStatus>().unwrap_or(ThreadStatus::Stashed),
        observation_snapshots: serde_json::from_str(&snapshots_str).unwrap_or_default(),
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
    })
}

#[cfg(test)]
mod tests {
    use super::super::store_for_tests;
    use crate::atoms::types::{Classification, ObservationInput, ThreadStatus};

    const P1: &str = "aaaaaaaaaaaaaaaa";

    #[test]
    fn stash_then_resume_replays_snapshot() {
        let store = store_for_tests();
        let a = store
            .create_classified_observation(P1, &ObservationInput::new("picked sqlite"), Classification::Solution)
            .unwrap();
        let b = store
            .create_classified_observation(P1, &ObservationInput::new("wal mode on"), Classification::Discovery)
            .unwrap();

        let stash = store
            .create_stash(P1, "storage design", "db choices so far", &[a.id.clone(), b.id.clone()])
            .unwrap();
        assert_eq!(stash.status, ThreadStatus::Stashed);

        let (resumed, observations) = store.resume_thread(P1, &stash.id).unwrap();
        assert_eq!(resumed.status, ThreadStatus::Resumed);
        assert_eq!(observations.len(), 2);
        // Underlying observations untouched.
        let a_after = store.get_observation(P1, &a.id).unwrap().unwrap();
        assert_eq!(a_after.updated_at, a_after.created_at);
    }

    #[test]
    fn resume_missing_thread_is_not_found() {
        let store = store_for_tests();
        assert!(store.resume_thread(P1, "missing").is_err());
    }

    #[test]
    fn snapshot_drops_purged_observations_without_error() {
        let store = store_for_tests();
        let a = store
            .create_classified_observation(P1, &ObservationInput::new("kept"), Classification::Discovery)
            .unwrap();
        let b = store
            .create_classified_observation(P1, &ObservationInput::new("purged"), Classification::Discovery)
            .unwrap();
        let stash = store
            .create_stash(P1, "t", "", &[a.id.clone(), b.id.clone()])
            .unwrap();

        store.soft_delete_observation(P1, &b.id).unwrap();

        let (_, observations) = store.resume_thread(P1, &stash.id).unwrap();
        assert_eq!(observations.len(), 1);
        assert_eq!(observations[0].id, a.id);
    }
}
