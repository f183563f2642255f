// ── Observation repository ─────────────────────────────────────────────────
// CRUD, soft delete, classification state, context windows. Every statement
// filters project_hash; cross-project reads are impossible at this layer.
//
// Visibility rules:
//   • classification IS NULL   → hidden from default reads
//   • deleted_at IS NOT NULL   → hidden except on include-purged paths
//   • classification = 'noise' → implies soft-deleted (set atomically)

use super::{decode_embedding, encode_embedding, MemoryStore, OptionalRow};
use crate::atoms::constants::now_ts;
use crate::atoms::error::{LaminarkError, LaminarkResult};
use crate::atoms::types::{
    Classification, ListOptions, Observation, ObservationInput, ObservationKind,
    ObservationUpdate,
};
use log::debug;
use rusqlite::params;

/// Column order shared by every SELECT and the row mapper below.
const OBSERVATION_COLUMNS: &str = "id, rowid, project_hash, content, title, source, session_id, \
     kind, classification, classified_at, embedding, embedding_model, embedding_version, \
     created_at, updated_at, deleted_at";

impl MemoryStore {
    /// Insert an unclassified observation and return the materialized row.
    /// This is the hook-process write path, so it carries the busy retry.
    pub fn create_observation(
        &self,
        project: &str,
        input: &ObservationInput,
    ) -> LaminarkResult<Observation> {
        self.insert_observation(project, input, None)
    }

    /// Insert an observation with its classification already decided.
    /// Used by explicit user saves and documentation ingestion. The row
    /// is immediately queryable and bypasses curation.
    pub fn create_classified_observation(
        &self,
        project: &str,
        input: &ObservationInput,
        classification: Classification,
    ) -> LaminarkResult<Observation> {
        self.insert_observation(project, input, Some(classification))
    }

    fn insert_observation(
        &self,
        project: &str,
        input: &ObservationInput,
        classification: Option<Classification>,
    ) -> LaminarkResult<Observation> {
        input.validate()?;

        let id = uuid::Uuid::new_v4().to_string();
        let now = now_ts();
        let classified_at = classification.map(|_| now.clone());

        let rowid = self.with_busy_retry(|conn| {
            conn.execute(
                "INSERT INTO observations (
                    id, project_hash, content, title, source, session_id, kind,
                    classification, classified_at, created_at, updated_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10)",
                params![
                    id,
                    project,
                    input.content,
                    input.title,
                    input.source,
                    input.session_id,
                    input.kind.as_str(),
                    classification.map(|c| c.as_str()),
                    classified_at,
                    now,
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })?;

        debug!("[store] Observation {} created (kind={})", &id[..8], input.kind);

        Ok(Observation {
            id,
            rowid,
            project_hash: project.to_string(),
            content: input.content.clone(),
            title: input.title.clone(),
            source: input.source.clone(),
            session_id: input.session_id.clone(),
            kind: input.kind,
            classification,
            classified_at,
            embedding: None,
            embedding_model: None,
            embedding_version: None,
            created_at: now.clone(),
            updated_at: now,
            deleted_at: None,
        })
    }

    /// Scoped lookup; `None` when missing or soft-deleted.
    pub fn get_observation(
        &self,
        project: &str,
        id: &str,
    ) -> LaminarkResult<Option<Observation>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {OBSERVATION_COLUMNS} FROM observations
             WHERE project_hash = ?1 AND id = ?2 AND deleted_at IS NULL"
        ))?;
        Ok(stmt
            .query_row(params![project, id], observation_from_row)
            .optional()?)
    }

    /// Lookup that also sees soft-deleted rows; restore paths use this.
    pub fn get_observation_including_deleted(
        &self,
        project: &str,
        id: &str,
    ) -> LaminarkResult<Option<Observation>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {OBSERVATION_COLUMNS} FROM observations
             WHERE project_hash = ?1 AND id = ?2"
        ))?;
        Ok(stmt
            .query_row(params![project, id], observation_from_row)
            .optional()?)
    }

    /// List observations, newest first. Default excludes unclassified and
    /// soft-deleted rows; filters narrow further.
    pub fn list_observations(
        &self,
        project: &str,
        options: &ListOptions,
    ) -> LaminarkResult<Vec<Observation>> {
        let conn = self.conn.lock();

        let mut sql = format!(
            "SELECT {OBSERVATION_COLUMNS} FROM observations
             WHERE project_hash = ? AND deleted_at IS NULL"
        );
        let mut bind: Vec<Box<dyn rusqlite::types::ToSql>> =
            vec![Box::new(project.to_string())];

        if !options.include_unclassified {
            sql.push_str(" AND classification IS NOT NULL");
        }
        if let Some(ref session_id) = options.session_id {
            sql.push_str(" AND session_id = ?");
            bind.push(Box::new(session_id.clone()));
        }
        if let Some(ref since) = options.since {
            sql.push_str(" AND created_at >= ?");
            bind.push(Box::new(since.clone()));
        }
        if let Some(kind) = options.kind {
            sql.push_str(" AND kind = ?");
            bind.push(Box::new(kind.as_str().to_string()));
        }

        sql.push_str(" ORDER BY created_at DESC, rowid DESC LIMIT ? OFFSET ?");
        bind.push(Box::new(options.limit.unwrap_or(100) as i64));
        bind.push(Box::new(options.offset.unwrap_or(0) as i64));

        let mut stmt = conn.prepare(&sql)?;
        let bind_refs: Vec<&dyn rusqlite::types::ToSql> =
            bind.iter().map(|b| b.as_ref()).collect();
        let rows = stmt
            .query_map(bind_refs.as_slice(), observation_from_row)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    /// Mutate content and/or embedding fields; bumps updated_at.
    /// Returns `None` when the row is missing or soft-deleted.
    pub fn update_observation(
        &self,
        project: &str,
        id: &str,
        updates: &ObservationUpdate,
    ) -> LaminarkResult<Option<Observation>> {
        if let Some(ref content) = updates.content {
            let probe = ObservationInput::new(content.clone());
            probe.validate()?;
        }
        if let Some(ref title) = updates.title {
            ObservationInput::new("x").with_title(title.clone()).validate()?;
        }

        {
            let conn = self.conn.lock();
            let now = now_ts();
            let embedding_bytes = updates.embedding.as_ref().map(|v| encode_embedding(v));
            let changed = conn.execute(
                "UPDATE observations SET
                    content = COALESCE(?3, content),
                    title = COALESCE(?4, title),
                    embedding = COALESCE(?5, embedding),
                    embedding_model = COALESCE(?6, embedding_model),
                    embedding_version = COALESCE(?7, embedding_version),
                    updated_at = ?8
                 WHERE project_hash = ?1 AND id = ?2 AND deleted_at IS NULL",
                params![
                    project,
                    id,
                    updates.content,
                    updates.title,
                    embedding_bytes,
                    updates.embedding_model,
                    updates.embedding_version,
                    now,
                ],
            )?;
            if changed == 0 {
                return Ok(None);
            }
        }
        self.get_observation(project, id)
    }

    /// Soft delete. Missing rows are not an error.
    pub fn soft_delete_observation(&self, project: &str, id: &str) -> LaminarkResult<bool> {
        let conn = self.conn.lock();
        let changed = conn.execute(
            "UPDATE observations SET deleted_at = ?3, updated_at = ?3
             WHERE project_hash = ?1 AND id = ?2 AND deleted_at IS NULL",
            params![project, id, now_ts()],
        )?;
        Ok(changed > 0)
    }

    /// Clear a soft delete. Restore requires existence, so a missing row
    /// is a NotFound error here.
    pub fn restore_observation(
        &self,
        project: &str,
        id: &str,
    ) -> LaminarkResult<Observation> {
        {
            let conn = self.conn.lock();
            let changed = conn.execute(
                "UPDATE observations SET deleted_at = NULL, updated_at = ?3
                 WHERE project_hash = ?1 AND id = ?2",
                params![project, id, now_ts()],
            )?;
            if changed == 0 {
                return Err(LaminarkError::not_found("observation", id));
            }
        }
        self.get_observation(project, id)?
            .ok_or_else(|| LaminarkError::not_found("observation", id))
    }

    /// Set the curation verdict. `noise` soft-deletes in the same
    /// statement so the two states can never be observed apart.
    pub fn update_classification(
        &self,
        project: &str,
        id: &str,
        classification: Classification,
    ) -> LaminarkResult<bool> {
        let conn = self.conn.lock();
        let now = now_ts();
        let is_noise = classification == Classification::Noise;
        let changed = conn.execute(
            "UPDATE observations SET
                classification = ?3,
                classified_at = ?4,
                deleted_at = CASE WHEN ?5 THEN COALESCE(deleted_at, ?4) ELSE deleted_at END,
                updated_at = ?4
             WHERE project_hash = ?1 AND id = ?2",
            params![project, id, classification.as_str(), now, is_noise],
        )?;
        Ok(changed > 0)
    }

    /// Oldest-first pending rows for the curation pipeline.
    pub fn list_unclassified(
        &self,
        project: &str,
        limit: usize,
    ) -> LaminarkResult<Vec<Observation>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {OBSERVATION_COLUMNS} FROM observations
             WHERE project_hash = ?1 AND classification IS NULL AND deleted_at IS NULL
             ORDER BY created_at ASC, rowid ASC
             LIMIT ?2"
        ))?;
        let rows = stmt
            .query_map(params![project, limit as i64], observation_from_row)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    /// The `window` rows on each side of an instant, classification
    /// ignored, soft-deleted excluded, ascending by time. Feeds the
    /// classifier prompt.
    pub fn list_context(
        &self,
        project: &str,
        around_time: &str,
        window: usize,
    ) -> LaminarkResult<Vec<Observation>> {
        let conn = self.conn.lock();

        let mut before_stmt = conn.prepare_cached(&format!(
            "SELECT {OBSERVATION_COLUMNS} FROM observations
             WHERE project_hash = ?1 AND deleted_at IS NULL AND created_at <= ?2
             ORDER BY created_at DESC
             LIMIT ?3"
        ))?;
        let mut rows: Vec<Observation> = before_stmt
            .query_map(params![project, around_time, window as i64], observation_from_row)?
            .filter_map(|r| r.ok())
            .collect();

        let mut after_stmt = conn.prepare_cached(&format!(
            "SELECT {OBSERVATION_COLUMNS} FROM observations
             WHERE project_hash = ?1 AND deleted_at IS NULL AND created_at > ?2
             ORDER BY created_at ASC
             LIMIT ?3"
        ))?;
        rows.extend(
            after_stmt
                .query_map(params![project, around_time, window as i64], observation_from_row)?
                .filter_map(|r| r.ok()),
        );

        rows.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.rowid.cmp(&b.rowid)));
        Ok(rows)
    }

    /// Non-deleted total for the project.
    pub fn count_observations(&self, project: &str) -> LaminarkResult<usize> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM observations WHERE project_hash = ?1 AND deleted_at IS NULL",
            params![project],
            |r| r.get(0),
        )?;
        Ok(count as usize)
    }

    /// Pending (unclassified, live) total for the project.
    pub fn count_unclassified(&self, project: &str) -> LaminarkResult<usize> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM observations
             WHERE project_hash = ?1 AND classification IS NULL AND deleted_at IS NULL",
            params![project],
            |r| r.get(0),
        )?;
        Ok(count as usize)
    }

    /// Case-insensitive title substring match.
    pub fn get_observations_by_title(
        &self,
        project: &str,
        substring: &str,
        limit: usize,
        include_purged: bool,
    ) -> LaminarkResult<Vec<Observation>> {
        let conn = self.conn.lock();
        let pattern = format!(
            "%{}%",
            substring.to_lowercase().replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")
        );
        let deleted_clause = if include_purged { "" } else { "AND deleted_at IS NULL" };
        let mut stmt = conn.prepare(&format!(
            "SELECT {OBSERVATION_COLUMNS} FROM observations
             WHERE project_hash = ?1
               AND title IS NOT NULL
               AND LOWER(title) LIKE ?2 ESCAPE '\\'
               {deleted_clause}
             ORDER BY created_at DESC
             LIMIT ?3"
        ))?;
        let rows = stmt
            .query_map(params![project, pattern, limit as i64], observation_from_row)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    /// Live rows with no stored vector, for the embedding backfill.
    pub fn list_missing_embeddings(
        &self,
        project: &str,
        limit: usize,
    ) -> LaminarkResult<Vec<Observation>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {OBSERVATION_COLUMNS} FROM observations
             WHERE project_hash = ?1 AND embedding IS NULL AND deleted_at IS NULL
             ORDER BY created_at ASC
             LIMIT ?2"
        ))?;
        let rows = stmt
            .query_map(params![project, limit as i64], observation_from_row)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    /// Store a computed embedding for a row.
    pub fn update_embedding(
        &self,
        project: &str,
        id: &str,
        vector: &[f32],
        model: &str,
        version: i64,
    ) -> LaminarkResult<bool> {
        let conn = self.conn.lock();
        let bytes = encode_embedding(vector);
        let changed = conn.execute(
            "UPDATE observations SET
                embedding = ?3, embedding_model = ?4, embedding_version = ?5, updated_at = ?6
             WHERE project_hash = ?1 AND id = ?2",
            params![project, id, bytes, model, version, now_ts()],
        )?;
        Ok(changed > 0)
    }

    /// Promote every pending row older than `cutoff` to `discovery` so
    /// starved rows never stay invisible forever. Returns promoted ids.
    pub fn promote_stale_unclassified(
        &self,
        project: &str,
        cutoff: &str,
    ) -> LaminarkResult<Vec<String>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "UPDATE observations SET classification = 'discovery', classified_at = ?3, updated_at = ?3
             WHERE project_hash = ?1 AND classification IS NULL AND deleted_at IS NULL
               AND created_at < ?2
             RETURNING id",
        )?;
        let ids = stmt
            .query_map(params![project, cutoff, now_ts()], |r| r.get::<_, String>(0))?
            .filter_map(|r| r.ok())
            .collect();
        Ok(ids)
    }
}

// ── Row mapper (column order must match OBSERVATION_COLUMNS) ───────────────

pub(crate) fn observation_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Observation> {
    let kind: String = row.get(7)?;
    let classification: Option<String> = row.get(8)?;
    let embedding_bytes: Option<Vec<u8>> = row.get(10)?;

    Ok(Observation {
        id: row.get(0)?,
        rowid: row.get(1)?,
        project_hash: row.get(2)?,
        content: row.get(3)?,
        title: row.get(4)?,
        source: row.get(5)?,
        session_id: row.get(6)?,
        kind: kind.parse::<ObservationKind>().unwrap_or(ObservationKind::Finding),
        classification: classification.and_then(|c| c.parse::<Classification>().ok()),
        classified_at: row.get(9)?,
        embedding: embedding_bytes.and_then(|b| decode_embedding(&b)),
        embedding_model: row.get(11)?,
        embedding_version: row.get(12)?,
        created_at: row.get(13)?,
        updated_at: row.get(14)?,
        deleted_at: row.get(15)?,
    })
}

#[cfg(test)]
mod tests {
    use super::super::store_for_tests;
    use crate::atoms::types::*;

    const P1: &str = "aaaaaaaaaaaaaaaa";
    const P2: &str = "bbbbbbbbbbbbbbbb";

    #[test]
    fn create_then_get_round_trips() {
        let store = store_for_tests();
        let input = ObservationInput::new("switched the cache to write-through")
            .with_title("cache policy")
            .with_source("hook:Edit")
            .with_kind(ObservationKind::Change);
        let created = store.create_observation(P1, &input).unwrap();
        assert_eq!(created.created_at, created.updated_at);

        // Unclassified rows are visible by direct id lookup…
        let got = store
            .get_observation(P1, &created.id)
            .unwrap()
            .expect("row exists");
        assert_eq!(got.content, input.content);
        assert_eq!(got.title.as_deref(), Some("cache policy"));
        assert_eq!(got.source, "hook:Edit");
        assert_eq!(got.kind, ObservationKind::Change);
        assert_eq!(got.classification, None);

        // …but hidden from default listings.
        let listed = store.list_observations(P1, &ListOptions::default()).unwrap();
        assert!(listed.is_empty());
    }

    #[test]
    fn project_isolation_holds() {
        let store = store_for_tests();
        store
            .create_classified_observation(
                P1,
                &ObservationInput::new("alpha"),
                Classification::Discovery,
            )
            .unwrap();

        assert_eq!(store.count_observations(P2).unwrap(), 0);
        assert!(store.list_observations(P2, &ListOptions::default()).unwrap().is_empty());
        let o = store.list_observations(P1, &ListOptions::default()).unwrap();
        assert_eq!(o.len(), 1);
        assert!(store.get_observation(P2, &o[0].id).unwrap().is_none());
    }

    #[test]
    fn soft_delete_restore_round_trips() {
        let store = store_for_tests();
        let created = store
            .create_classified_observation(
                P1,
                &ObservationInput::new("to be deleted"),
                Classification::Discovery,
            )
            .unwrap();

        assert!(store.soft_delete_observation(P1, &created.id).unwrap());
        assert!(store.get_observation(P1, &created.id).unwrap().is_none());
        assert!(store
            .get_observation_including_deleted(P1, &created.id)
            .unwrap()
            .is_some());

        let restored = store.restore_observation(P1, &created.id).unwrap();
        assert_eq!(restored.content, "to be deleted");
        assert!(restored.deleted_at.is_none());
    }

    #[test]
    fn restore_of_missing_row_is_not_found() {
        let store = store_for_tests();
        let err = store.restore_observation(P1, "nope").unwrap_err();
        assert!(matches!(err, crate::atoms::error::LaminarkError::NotFound { .. }));
    }

    #[test]
    fn noise_classification_soft_deletes() {
        let store = store_for_tests();
        let created = store
            .create_observation(P1, &ObservationInput::new("ls output spam"))
            .unwrap();

        assert!(store
            .update_classification(P1, &created.id, Classification::Noise)
            .unwrap());

        assert!(store.get_observation(P1, &created.id).unwrap().is_none());
        let purged = store
            .get_observation_including_deleted(P1, &created.id)
            .unwrap()
            .expect("still present under include-purged");
        assert_eq!(purged.classification, Some(Classification::Noise));
        assert!(purged.deleted_at.is_some());
    }

    #[test]
    fn list_matches_visibility_invariant() {
        let store = store_for_tests();
        let a = store
            .create_classified_observation(P1, &ObservationInput::new("first"), Classification::Discovery)
            .unwrap();
        let b = store
            .create_classified_observation(P1, &ObservationInput::new("second"), Classification::Problem)
            .unwrap();
        let _pending = store.create_observation(P1, &ObservationInput::new("pending")).unwrap();
        store.soft_delete_observation(P1, &a.id).unwrap();

        let listed = store.list_observations(P1, &ListOptions::default()).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, b.id);

        let with_pending = store
            .list_observations(
                P1,
                &ListOptions { include_unclassified: true, ..Default::default() },
            )
            .unwrap();
        assert_eq!(with_pending.len(), 2);
        // Newest first.
        assert!(with_pending[0].created_at >= with_pending[1].created_at);
    }

    #[test]
    fn unclassified_listing_is_fifo() {
        let store = store_for_tests();
        let first = store.create_observation(P1, &ObservationInput::new("one")).unwrap();
        let second = store.create_observation(P1, &ObservationInput::new("two")).unwrap();

        let pending = store.list_unclassified(P1, 10).unwrap();
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].id, first.id);
        assert_eq!(pending[1].id, second.id);
    }

    #[test]
    fn title_lookup_is_case_insensitive() {
        let store = store_for_tests();
        store
            .create_classified_observation(
                P1,
                &ObservationInput::new("body").with_title("WAL Checkpointing"),
                Classification::Discovery,
            )
            .unwrap();

        let hits = store
            .get_observations_by_title(P1, "wal check", 10, false)
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert!(store
            .get_observations_by_title(P1, "nothing", 10, false)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn fallback_promotion_targets_only_old_pending_rows() {
        let store = store_for_tests();
        let old = store.create_observation(P1, &ObservationInput::new("old pending")).unwrap();

        // A cutoff in the future captures the row; classification flips.
        let promoted = store
            .promote_stale_unclassified(P1, "9999-01-01T00:00:00.000Z")
            .unwrap();
        assert_eq!(promoted, vec![old.id.clone()]);

        let got = store.get_observation(P1, &old.id).unwrap().unwrap();
        assert_eq!(got.classification, Some(Classification::Discovery));

        // Second pass finds nothing pending.
        assert!(store
            .promote_stale_unclassified(P1, "9999-01-01T00:00:00.000Z")
            .unwrap()
            .is_empty());
    }

    #[test]
    fn embedding_update_round_trips_bit_exact() {
        let store = store_for_tests();
        let created = store
            .create_classified_observation(P1, &ObservationInput::new("vec"), Classification::Discovery)
            .unwrap();

        let vector = vec![0.25f32, -1.5, 3.25e-4, 7.0];
        assert!(store
            .update_embedding(P1, &created.id, &vector, "all-MiniLM-L6-v2", 1)
            .unwrap());

        let got = store.get_observation(P1, &created.id).unwrap().unwrap();
        let stored = got.embedding.expect("embedding present");
        for (a, b) in vector.iter().zip(stored.iter()) {
            assert_eq!(a.to_bits(), b.to_bits());
        }
        assert_eq!(got.embedding_model.as_deref(), Some("all-MiniLM-L6-v2"));
    }
}
