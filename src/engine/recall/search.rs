// ── Hybrid search ──────────────────────────────────────────────────────────
// Sanitize → lexical BM25 pass → dense KNN pass → reciprocal rank fusion →
// materialize with snippets.
//
// The dense pass runs only when the store's capability flag is set AND the
// caller computed a query embedding; either missing degrades to
// lexical-only with identical result-set semantics.

use crate::atoms::constants::{CANDIDATE_MULTIPLIER, RRF_K};
use crate::atoms::error::LaminarkResult;
use crate::atoms::types::{MatchType, SearchOptions, SearchResult, ToolRecord};
use crate::engine::store::MemoryStore;
use log::debug;
use regex::Regex;
use std::collections::HashMap;
use std::sync::OnceLock;

/// Characters that survive sanitization: word-ish runs only. Everything
/// else would reach the FTS expression parser as syntax.
fn specials() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[^\p{L}\p{N}_]+").expect("static regex"))
}

/// Strip FTS operator tokens and special characters, collapse whitespace.
/// An empty result means "no searchable terms"; callers return empty.
pub fn sanitize_query(query: &str) -> String {
    specials()
        .split(query)
        .filter(|token| !token.is_empty())
        .filter(|token| !matches!(*token, "AND" | "OR" | "NOT" | "NEAR"))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Run hybrid search. `query_embedding` is the dense signal for this call;
/// `None` (worker unavailable, empty query) skips the dense pass.
pub fn run_search(
    store: &MemoryStore,
    project: &str,
    query: &str,
    options: &SearchOptions,
    query_embedding: Option<&[f32]>,
) -> LaminarkResult<Vec<SearchResult>> {
    let match_expr = sanitize_query(query);
    if match_expr.is_empty() {
        return Ok(Vec::new());
    }

    let pool = options.limit.max(1) * CANDIDATE_MULTIPLIER;

    let lexical = store.search_observations_bm25(project, &match_expr, options, pool)?;

    let dense = match query_embedding {
        Some(embedding) if store.vector_enabled() && !embedding.is_empty() => {
            store.search_observations_vector(project, embedding, options, pool)?
        }
        _ => Vec::new(),
    };

    debug!(
        "[search] '{}' → {} lexical, {} dense candidates",
        &match_expr[..match_expr.len().min(60)],
        lexical.len(),
        dense.len()
    );

    // ── Fuse ────────────────────────────────────────────────────────
    struct Fused {
        observation: crate::atoms::types::Observation,
        score: f64,
        similarity: f64,
        snippet: Option<String>,
        in_lexical: bool,
        in_dense: bool,
    }

    let mut fused: HashMap<String, Fused> = HashMap::new();

    for (rank0, hit) in lexical.into_iter().enumerate() {
        let contribution = 1.0 / (RRF_K + (rank0 + 1) as f64);
        match fused.entry(hit.observation.id.clone()) {
            std::collections::hash_map::Entry::Occupied(mut entry) => {
                let f = entry.get_mut();
                f.score += contribution;
                f.in_lexical = true;
                f.snippet = Some(hit.snippet);
            }
            std::collections::hash_map::Entry::Vacant(entry) => {
                entry.insert(Fused {
                    observation: hit.observation,
                    score: contribution,
                    similarity: 0.0,
                    snippet: Some(hit.snippet),
                    in_lexical: true,
                    in_dense: false,
                });
            }
        }
    }

    for (rank0, (observation, similarity)) in dense.into_iter().enumerate() {
        let contribution = 1.0 / (RRF_K + (rank0 + 1) as f64);
        match fused.entry(observation.id.clone()) {
            std::collections::hash_map::Entry::Occupied(mut entry) => {
                let f = entry.get_mut();
                f.score += contribution;
                f.in_dense = true;
                f.similarity = similarity;
            }
            std::collections::hash_map::Entry::Vacant(entry) => {
                entry.insert(Fused {
                    observation,
                    score: contribution,
                    similarity,
                    snippet: None,
                    in_lexical: false,
                    in_dense: true,
                });
            }
        }
    }

    let mut results: Vec<Fused> = fused.into_values().collect();
    // RRF ties break toward the stronger dense signal, then recency.
    results.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(b.similarity.partial_cmp(&a.similarity).unwrap_or(std::cmp::Ordering::Equal))
            .then(b.observation.created_at.cmp(&a.observation.created_at))
            .then(a.observation.id.cmp(&b.observation.id))
    });
    results.truncate(options.limit);

    Ok(results
        .into_iter()
        .map(|f| {
            let match_type = match (f.in_lexical, f.in_dense) {
                (true, true) => MatchType::Hybrid,
                (true, false) => MatchType::Fts,
                _ => MatchType::Vector,
            };
            let snippet = f
                .snippet
                .unwrap_or_else(|| content_prefix(&f.observation.content));
            SearchResult { observation: f.observation, score: f.score, snippet, match_type }
        })
        .collect())
}

/// Hybrid tool search, mirroring observation search: BM25 over
/// (name, description) with name 2×, optional dense pass, RRF fusion.
pub fn run_tool_search(
    store: &MemoryStore,
    project: &str,
    query: &str,
    limit: usize,
    query_embedding: Option<&[f32]>,
) -> LaminarkResult<Vec<(ToolRecord, f64, MatchType)>> {
    let match_expr = sanitize_query(query);
    if match_expr.is_empty() {
        return Ok(Vec::new());
    }

    let pool = limit.max(1) * CANDIDATE_MULTIPLIER;
    let lexical = store.search_tools_bm25(project, &match_expr, pool)?;

    let dense: Vec<(ToolRecord, f64)> = match query_embedding {
        Some(embedding) if store.vector_enabled() && !embedding.is_empty() => {
            store.search_tools_vector(project, embedding, pool)?
        }
        _ => Vec::new(),
    };

    let mut scores: HashMap<String, (ToolRecord, f64, bool, bool)> = HashMap::new();
    for (rank0, (tool, _)) in lexical.into_iter().enumerate() {
        let contribution = 1.0 / (RRF_K + (rank0 + 1) as f64);
        scores
            .entry(tool.id.clone())
            .and_modify(|(_, s, lex, _)| {
                *s += contribution;
                *lex = true;
            })
            .or_insert((tool, contribution, true, false));
    }
    for (rank0, (tool, _)) in dense.into_iter().enumerate() {
        let contribution = 1.0 / (RRF_K + (rank0 + 1) as f64);
        scores
            .entry(tool.id.clone())
            .and_modify(|(_, s, _, den)| {
                *s += contribution;
                *den = true;
            })
            .or_insert((tool, contribution, false, true));
    }

    let mut fused: Vec<(ToolRecord, f64, MatchType)> = scores
        .into_values()
        .map(|(tool, score, lex, den)| {
            let match_type = match (lex, den) {
                (true, true) => MatchType::Hybrid,
                (true, false) => MatchType::Fts,
                _ => MatchType::Vector,
            };
            (tool, score, match_type)
        })
        .collect();
    fused.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    fused.truncate(limit);
    Ok(fused)
}

/// Display prefix for dense-only hits, which have no FTS snippet.
fn content_prefix(content: &str) -> String {
    const MAX: usize = 160;
    if content.chars().count() <= MAX {
        content.to_string()
    } else {
        let cut: String = content.chars().take(MAX).collect();
        format!("{cut}…")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atoms::types::{Classification, ObservationInput};
    use crate::engine::store::{lexical_only_store_for_tests, store_for_tests};

    const P1: &str = "aaaaaaaaaaaaaaaa";
    const P2: &str = "bbbbbbbbbbbbbbbb";

    #[test]
    fn sanitize_strips_operators_and_specials() {
        assert_eq!(sanitize_query("wal AND mode"), "wal mode");
        assert_eq!(sanitize_query("a NEAR b OR c NOT d"), "a b c d");
        assert_eq!(sanitize_query("fts5* \"quoted\" (group)"), "fts5 quoted group");
        assert_eq!(sanitize_query("   "), "");
        assert_eq!(sanitize_query("AND OR NOT"), "");
        // Lowercase forms are ordinary words, not operators.
        assert_eq!(sanitize_query("and or not"), "and or not");
    }

    #[test]
    fn empty_query_returns_empty() {
        let store = store_for_tests();
        let results =
            run_search(&store, P1, "***", &Default::default(), None).unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn project_isolation_in_search() {
        let store = store_for_tests();
        store
            .create_classified_observation(P1, &ObservationInput::new("alpha"), Classification::Discovery)
            .unwrap();

        let results = run_search(&store, P2, "alpha", &Default::default(), None).unwrap();
        assert!(results.is_empty());
        let results = run_search(&store, P1, "alpha", &Default::default(), None).unwrap();
        assert_eq!(results.len(), 1);
    }

    #[test]
    fn hybrid_ranks_dense_agreement_first() {
        let store = store_for_tests();
        let a = store
            .create_classified_observation(
                P1,
                &ObservationInput::new("database WAL mode"),
                Classification::Discovery,
            )
            .unwrap();
        let b = store
            .create_classified_observation(
                P1,
                &ObservationInput::new("database locked"),
                Classification::Problem,
            )
            .unwrap();
        store.update_embedding(P1, &a.id, &[1.0, 0.0, 0.0, 0.0], "test", 1).unwrap();
        store.update_embedding(P1, &b.id, &[0.0, 1.0, 0.0, 0.0], "test", 1).unwrap();

        let results = run_search(
            &store,
            P1,
            "database",
            &Default::default(),
            Some(&[1.0, 0.0, 0.0, 0.0]),
        )
        .unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].observation.id, a.id);
        assert_eq!(results[1].observation.id, b.id);
        assert_eq!(results[0].match_type, crate::atoms::types::MatchType::Hybrid);
        assert_eq!(results[1].match_type, crate::atoms::types::MatchType::Hybrid);
        assert!(results[0].snippet.contains("<mark>database</mark>"));
    }

    #[test]
    fn lexical_only_flag_equals_hybrid_without_embedding() {
        let hybrid = store_for_tests();
        let lexical = lexical_only_store_for_tests();

        for store in [&hybrid, &lexical] {
            store
                .create_classified_observation(
                    P1,
                    &ObservationInput::new("checkpoint starvation under load"),
                    Classification::Problem,
                )
                .unwrap();
        }

        // No query embedding: both modes must return the same set.
        let from_hybrid =
            run_search(&hybrid, P1, "checkpoint", &Default::default(), None).unwrap();
        let from_lexical =
            run_search(&lexical, P1, "checkpoint", &Default::default(), None).unwrap();
        assert_eq!(from_hybrid.len(), from_lexical.len());
        assert_eq!(from_hybrid[0].observation.content, from_lexical[0].observation.content);
        assert_eq!(from_hybrid[0].match_type, crate::atoms::types::MatchType::Fts);
    }

    #[test]
    fn title_match_outranks_content_match() {
        let store = store_for_tests();
        store
            .create_classified_observation(
                P1,
                &ObservationInput::new("notes about other things").with_title("migration plan"),
                Classification::Discovery,
            )
            .unwrap();
        store
            .create_classified_observation(
                P1,
                &ObservationInput::new("the migration took an hour"),
                Classification::Discovery,
            )
            .unwrap();

        let results = run_search(&store, P1, "migration", &Default::default(), None).unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].observation.title.as_deref(), Some("migration plan"));
    }

    #[test]
    fn filters_apply_inside_passes() {
        let store = store_for_tests();
        store
            .create_classified_observation(
                P1,
                &ObservationInput::new("session scoped fact").with_session("s1"),
                Classification::Discovery,
            )
            .unwrap();
        store
            .create_classified_observation(
                P1,
                &ObservationInput::new("other session fact").with_session("s2"),
                Classification::Discovery,
            )
            .unwrap();

        let options = SearchOptions { session_id: Some("s1".into()), ..Default::default() };
        let results = run_search(&store, P1, "fact", &options, None).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].observation.session_id.as_deref(), Some("s1"));
    }

    #[test]
    fn rrf_is_monotone_under_removal() {
        // Removing a document from both input lists never improves
        // another document's rank: scores of survivors only grow or stay
        // when a competitor above them disappears.
        let store = store_for_tests();
        let mut ids = Vec::new();
        for content in ["shared term one", "shared term two", "shared term three"] {
            let o = store
                .create_classified_observation(P1, &ObservationInput::new(content), Classification::Discovery)
                .unwrap();
            ids.push(o.id);
        }

        let before = run_search(&store, P1, "shared term", &Default::default(), None).unwrap();
        let rank_of = |results: &[crate::atoms::types::SearchResult], id: &str| {
            results.iter().position(|r| r.observation.id == *id)
        };

        // Drop the top document entirely.
        let removed = before[0].observation.id.clone();
        store.soft_delete_observation(P1, &removed).unwrap();
        let after = run_search(&store, P1, "shared term", &Default::default(), None).unwrap();

        for id in ids.iter().filter(|i| **i != removed) {
            let was = rank_of(&before, id).unwrap();
            let now = rank_of(&after, id).unwrap();
            assert!(now <= was, "rank of {id} degraded from {was} to {now}");
        }
    }
}
