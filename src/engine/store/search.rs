// ── Search passes (store side) ─────────────────────────────────────────────
// The two candidate generators behind hybrid recall: BM25 over the
// external-content lexical index, and cosine KNN over the embedding BLOBs.
// Fusion and sanitization live in recall/search.rs.
//
// Every filter (project, deleted, classification, session, kind, since) is
// applied inside the pass, not post-hoc, so candidate pools stay relevant.

use super::observations::observation_from_row;
use super::MemoryStore;
use crate::atoms::error::LaminarkResult;
use crate::atoms::types::{Observation, SearchOptions, ToolRecord};

/// One lexical candidate with its snippet, ranked bigger-is-better.
pub(crate) struct LexicalHit {
    pub observation: Observation,
    pub rank: f64,
    pub snippet: String,
}

/// The FTS column index of `content` in the current (title, content)
/// schema. Must move in lock-step with any future FTS rebuild migration.
const FTS_CONTENT_COLUMN: u32 = 1;

impl MemoryStore {
    /// BM25 pass. `match_expr` is an already-sanitized FTS expression.
    /// Title matches weigh 2× content matches.
    pub(crate) fn search_observations_bm25(
        &self,
        project: &str,
        match_expr: &str,
        options: &SearchOptions,
        limit: usize,
    ) -> LaminarkResult<Vec<LexicalHit>> {
        let conn = self.conn.lock();

        let mut sql = format!(
            "SELECT o.id, o.rowid, o.project_hash, o.content, o.title, o.source, o.session_id,
                    o.kind, o.classification, o.classified_at, o.embedding, o.embedding_model,
                    o.embedding_version, o.created_at, o.updated_at, o.deleted_at,
                    bm25(observations_fts, 2.0, 1.0) AS rank,
                    snippet(observations_fts, {FTS_CONTENT_COLUMN}, '<mark>', '</mark>', '…', 16) AS excerpt
             FROM observations o
             JOIN observations_fts ON o.rowid = observations_fts.rowid
             WHERE observations_fts MATCH ?
               AND o.project_hash = ?
               AND o.deleted_at IS NULL"
        );
        let mut bind: Vec<Box<dyn rusqlite::types::ToSql>> = vec![
            Box::new(match_expr.to_string()),
            Box::new(project.to_string()),
        ];
        push_option_filters(&mut sql, &mut bind, options, "o");
        sql.push_str(" ORDER BY rank LIMIT ?");
        bind.push(Box::new(limit as i64));

        let mut stmt = conn.prepare(&sql)?;
        let bind_refs: Vec<&dyn rusqlite::types::ToSql> =
            bind.iter().map(|b| b.as_ref()).collect();
        let rows = stmt
            .query_map(bind_refs.as_slice(), |row| {
                let observation = observation_from_row(row)?;
                let rank: f64 = row.get(16)?;
                let snippet: String = row.get(17)?;
                // BM25 is smaller-is-better; flip it once here.
                Ok(LexicalHit { observation, rank: -rank, snippet })
            })?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    /// Dense pass: cosine similarity against stored embeddings, best
    /// first. Callers gate this on the capability flag; it is never
    /// reached when vectors are disabled.
    pub(crate) fn search_observations_vector(
        &self,
        project: &str,
        query_embedding: &[f32],
        options: &SearchOptions,
        limit: usize,
    ) -> LaminarkResult<Vec<(Observation, f64)>> {
        let conn = self.conn.lock();

        let mut sql = String::from(
            "SELECT id, rowid, project_hash, content, title, source, session_id,
                    kind, classification, classified_at, embedding, embedding_model,
                    embedding_version, created_at, updated_at, deleted_at
             FROM observations
             WHERE project_hash = ?
               AND deleted_at IS NULL
               AND embedding IS NOT NULL",
        );
        let mut bind: Vec<Box<dyn rusqlite::types::ToSql>> =
            vec![Box::new(project.to_string())];
        push_option_filters(&mut sql, &mut bind, options, "observations");

        let mut stmt = conn.prepare(&sql)?;
        let bind_refs: Vec<&dyn rusqlite::types::ToSql> =
            bind.iter().map(|b| b.as_ref()).collect();

        let mut scored: Vec<(Observation, f64)> = stmt
            .query_map(bind_refs.as_slice(), observation_from_row)?
            .filter_map(|r| r.ok())
            .filter_map(|obs| {
                let sim = obs
                    .embedding
                    .as_ref()
                    .map(|e| cosine_similarity(e, query_embedding))?;
                Some((obs, sim))
            })
            .collect();

        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(limit);
        Ok(scored)
    }

    /// Dense pass over tool description vectors, mirroring the
    /// observation pass: scope-filtered candidates, cosine scored,
    /// best first.
    pub(crate) fn search_tools_vector(
        &self,
        project: &str,
        query_embedding: &[f32],
        limit: usize,
    ) -> LaminarkResult<Vec<(ToolRecord, f64)>> {
        let mut scored: Vec<(ToolRecord, f64)> = self
            .list_tools_with_embeddings(project)?
            .into_iter()
            .filter_map(|tool| {
                let sim = tool
                    .embedding
                    .as_ref()
                    .map(|e| cosine_similarity(e, query_embedding))?;
                Some((tool, sim))
            })
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(limit);
        Ok(scored)
    }
}

/// Cosine similarity for the dense passes above. Dimension mismatches and
/// zero vectors score 0.0 so such rows sink to the bottom of the pool
/// instead of erroring out of a search.
fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() {
        return 0.0;
    }
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for i in 0..a.len() {
        let (x, y) = (a[i] as f64, b[i] as f64);
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Shared filter fragment for all passes. `alias` qualifies columns when
/// the statement joins the FTS table.
fn push_option_filters(
    sql: &mut String,
    bind: &mut Vec<Box<dyn rusqlite::types::ToSql>>,
    options: &SearchOptions,
    alias: &str,
) {
    if !options.include_unclassified {
        sql.push_str(&format!(" AND {alias}.classification IS NOT NULL"));
    }
    if let Some(ref session_id) = options.session_id {
        sql.push_str(&format!(" AND {alias}.session_id = ?"));
        bind.push(Box::new(session_id.clone()));
    }
    if let Some(kind) = options.kind {
        sql.push_str(&format!(" AND {alias}.kind = ?"));
        bind.push(Box::new(kind.as_str().to_string()));
    }
    if let Some(ref since) = options.since {
        sql.push_str(&format!(" AND {alias}.created_at >= ?"));
        bind.push(Box::new(since.clone()));
    }
}
