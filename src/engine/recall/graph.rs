// ── Graph node dedup & upsert ──────────────────────────────────────────────
// An incoming (type, name, observation) merges into an existing node when
// any strategy matches, checked in order:
//
//   1. exact canonical name          (project + type scoped)
//   2. alias expansion               (per-type alias map, e.g. db ↔ database)
//   3. path suffix                   (File only: a ends with /b or vice versa)
//   4. Levenshtein ≤ 2               (both short, similar length)
//   5. token Jaccard ≥ 0.7           (both ≥ 2 tokens)
//
// First matching strategy wins and its reason is recorded on the node.
// No match inserts a new node. Logical uniqueness of
// (project, type, canonical_name) is enforced here, not by SQL, because
// canonicalization is fuzzy.

use crate::atoms::error::LaminarkResult;
use crate::atoms::types::{GraphNode, NodeType};
use crate::engine::store::MemoryStore;
use log::debug;
use std::collections::HashSet;

/// Levenshtein applies only to names at most this long…
const FUZZY_MAX_LEN: usize = 16;
/// …whose lengths differ by at most this much.
const FUZZY_MAX_LEN_DIFF: usize = 2;
const FUZZY_MAX_DISTANCE: usize = 2;
const JACCARD_THRESHOLD: f64 = 0.7;

/// Resolve-or-create for a graph entity. `observation_id` (when present)
/// is appended to the node's provenance exactly once.
pub fn upsert_node(
    store: &MemoryStore,
    project: &str,
    node_type: NodeType,
    name: &str,
    observation_id: Option<&str>,
) -> LaminarkResult<GraphNode> {
    let canonical = canonicalize(node_type, name);

    // 1. Exact match.
    if let Some(node) = store.find_node_exact(project, node_type, &canonical)? {
        return merge(store, project, node, observation_id, "Exact match");
    }

    // 2. Alias expansion.
    for candidate in alias_candidates(node_type, &canonical) {
        if let Some(node) = store.find_node_exact(project, node_type, &candidate)? {
            return merge(store, project, node, observation_id, "Alias match");
        }
    }

    // 3–5 need the per-type population.
    let peers = store.list_nodes_by_type(project, node_type)?;

    // 3. Path suffix (File only).
    if node_type == NodeType::File {
        for peer in &peers {
            let peer_canonical = canonicalize(node_type, &peer.name);
            if path_suffix_match(&canonical, &peer_canonical) {
                return merge(store, project, peer.clone(), observation_id, "Path suffix match");
            }
        }
    }

    // 4. Levenshtein on short names.
    for peer in &peers {
        let peer_canonical = canonicalize(node_type, &peer.name);
        if levenshtein_match(&canonical, &peer_canonical) {
            return merge(
                store,
                project,
                peer.clone(),
                observation_id,
                "Fuzzy match (Levenshtein)",
            );
        }
    }

    // 5. Token Jaccard.
    for peer in &peers {
        let peer_canonical = canonicalize(node_type, &peer.name);
        if jaccard_match(&canonical, &peer_canonical) {
            return merge(store, project, peer.clone(), observation_id, "Fuzzy match (Jaccard)");
        }
    }

    // No strategy matched: new node.
    let observation_ids: Vec<String> = observation_id.map(|s| s.to_string()).into_iter().collect();
    store.insert_node(
        project,
        node_type,
        name.trim(),
        &canonical,
        serde_json::json!({}),
        &observation_ids,
    )
}

fn merge(
    store: &MemoryStore,
    project: &str,
    mut node: GraphNode,
    observation_id: Option<&str>,
    reason: &str,
) -> LaminarkResult<GraphNode> {
    if let Some(obs_id) = observation_id {
        if !node.observation_ids.iter().any(|id| id == obs_id) {
            node.observation_ids.push(obs_id.to_string());
        }
    }
    if let Some(map) = node.metadata.as_object_mut() {
        map.insert("merge_reason".into(), serde_json::json!(reason));
    } else {
        node.metadata = serde_json::json!({ "merge_reason": reason });
    }
    store.update_node(project, &node)?;
    debug!("[graph] Merged '{}' ({reason})", node.name);
    store
        .get_node(project, &node.id)?
        .ok_or_else(|| crate::atoms::error::LaminarkError::not_found("graph node", node.id.clone()))
}

/// Canonical comparison form. Files normalize slashes, lose a leading ./
/// and case; everything else trims and case-folds.
pub(crate) fn canonicalize(node_type: NodeType, name: &str) -> String {
    let trimmed = name.trim();
    match node_type {
        NodeType::File => {
            let slashes = trimmed.replace('\\', "/");
            let stripped = slashes.strip_prefix("./").unwrap_or(&slashes);
            stripped.to_lowercase()
        }
        _ => trimmed.to_lowercase(),
    }
}

/// Per-type alias pairs, applied whole-name in both directions.
fn alias_pairs(node_type: NodeType) -> &'static [(&'static str, &'static str)] {
    match node_type {
        NodeType::Tool => &[
            ("db", "database"),
            ("k8s", "kubernetes"),
            ("ts", "typescript"),
            ("js", "javascript"),
            ("postgres", "postgresql"),
        ],
        NodeType::Decision | NodeType::Problem | NodeType::Solution => &[
            ("db", "database"),
            ("config", "configuration"),
            ("auth", "authentication"),
            ("repo", "repository"),
        ],
        _ => &[],
    }
}

fn alias_candidates(node_type: NodeType, canonical: &str) -> Vec<String> {
    let mut candidates = Vec::new();
    for (a, b) in alias_pairs(node_type) {
        if canonical == *a {
            candidates.push((*b).to_string());
        } else if canonical == *b {
            candidates.push((*a).to_string());
        }
    }
    candidates
}

fn path_suffix_match(a: &str, b: &str) -> bool {
    if a == b {
        return true;
    }
    a.ends_with(&format!("/{b}")) || b.ends_with(&format!("/{a}"))
}

fn levenshtein_match(a: &str, b: &str) -> bool {
    if a.is_empty() || b.is_empty() {
        return false;
    }
    let (la, lb) = (a.chars().count(), b.chars().count());
    if la > FUZZY_MAX_LEN || lb > FUZZY_MAX_LEN {
        return false;
    }
    if la.abs_diff(lb) > FUZZY_MAX_LEN_DIFF {
        return false;
    }
    levenshtein(a, b) <= FUZZY_MAX_DISTANCE
}

/// Classic two-row DP edit distance over chars.
pub(crate) fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut previous: Vec<usize> = (0..=b.len()).collect();
    let mut current = vec![0usize; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        current[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let substitution = previous[j] + usize::from(ca != cb);
            current[j + 1] = substitution.min(previous[j + 1] + 1).min(current[j] + 1);
        }
        std::mem::swap(&mut previous, &mut current);
    }
    previous[b.len()]
}

fn jaccard_match(a: &str, b: &str) -> bool {
    let ta = tokenize(a);
    let tb = tokenize(b);
    if ta.len() < 2 || tb.len() < 2 {
        return false;
    }
    let intersection = ta.intersection(&tb).count();
    let union = ta.union(&tb).count();
    if union == 0 {
        return false;
    }
    intersection as f64 / union as f64 >= JACCARD_THRESHOLD
}

fn tokenize(name: &str) -> HashSet<String> {
    name.split(['/', '.', '_', '-', ' '])
        .filter(|t| !t.is_empty())
        .map(|t| t.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::store::store_for_tests;

    const P1: &str = "aaaaaaaaaaaaaaaa";

    #[test]
    fn exact_upsert_is_idempotent() {
        let store = store_for_tests();
        let first = upsert_node(&store, P1, NodeType::Tool, "cargo", Some("obs-1")).unwrap();
        let second = upsert_node(&store, P1, NodeType::Tool, "cargo", Some("obs-1")).unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.observation_ids, vec!["obs-1".to_string()]);
        assert_eq!(store.count_nodes(P1).unwrap(), 1);
    }

    #[test]
    fn case_fold_is_exact_not_fuzzy() {
        let store = store_for_tests();
        let a = upsert_node(&store, P1, NodeType::Person, "Alice", Some("o1")).unwrap();
        let b = upsert_node(&store, P1, NodeType::Person, "alice", Some("o2")).unwrap();
        assert_eq!(a.id, b.id);
        assert_eq!(b.metadata["merge_reason"], "Exact match");
    }

    #[test]
    fn alias_map_merges_db_and_database() {
        let store = store_for_tests();
        let a = upsert_node(&store, P1, NodeType::Tool, "database", Some("o1")).unwrap();
        let b = upsert_node(&store, P1, NodeType::Tool, "db", Some("o2")).unwrap();
        assert_eq!(a.id, b.id);
        assert_eq!(b.metadata["merge_reason"], "Alias match");
        assert_eq!(b.observation_ids.len(), 2);
    }

    #[test]
    fn path_suffix_merges_file_nodes() {
        let store = store_for_tests();
        let a = upsert_node(&store, P1, NodeType::File, "src/graph/types.ts", Some("o1")).unwrap();
        let b = upsert_node(&store, P1, NodeType::File, "graph/types.ts", Some("o2")).unwrap();

        assert_eq!(a.id, b.id);
        assert_eq!(b.metadata["merge_reason"], "Path suffix match");
        assert_eq!(b.observation_ids, vec!["o1".to_string(), "o2".to_string()]);
        assert_eq!(store.count_nodes(P1).unwrap(), 1);
    }

    #[test]
    fn fuzzy_match_is_symmetric() {
        // Same pair, both insertion orders, same resulting single node.
        let ordered = store_for_tests();
        upsert_node(&ordered, P1, NodeType::Tool, "esbuild", Some("o1")).unwrap();
        let merged1 = upsert_node(&ordered, P1, NodeType::Tool, "esbuilt", Some("o2")).unwrap();

        let reversed = store_for_tests();
        upsert_node(&reversed, P1, NodeType::Tool, "esbuilt", Some("o2")).unwrap();
        let merged2 = upsert_node(&reversed, P1, NodeType::Tool, "esbuild", Some("o1")).unwrap();

        assert_eq!(ordered.count_nodes(P1).unwrap(), 1);
        assert_eq!(reversed.count_nodes(P1).unwrap(), 1);
        let mut ids1 = merged1.observation_ids.clone();
        let mut ids2 = merged2.observation_ids.clone();
        ids1.sort();
        ids2.sort();
        assert_eq!(ids1, ids2);
    }

    #[test]
    fn jaccard_merges_token_heavy_names() {
        let store = store_for_tests();
        let a = upsert_node(&store, P1, NodeType::Decision, "use sqlite wal mode", Some("o1")).unwrap();
        let b = upsert_node(&store, P1, NodeType::Decision, "sqlite wal mode", Some("o2")).unwrap();
        assert_eq!(a.id, b.id);
        assert_eq!(b.metadata["merge_reason"], "Fuzzy match (Jaccard)");
    }

    #[test]
    fn distinct_names_stay_distinct() {
        let store = store_for_tests();
        let a = upsert_node(&store, P1, NodeType::File, "src/main.rs", None).unwrap();
        let b = upsert_node(&store, P1, NodeType::File, "docs/readme.md", None).unwrap();
        assert_ne!(a.id, b.id);
        assert_eq!(store.count_nodes(P1).unwrap(), 2);
    }

    #[test]
    fn type_boundary_prevents_merging() {
        let store = store_for_tests();
        let tool = upsert_node(&store, P1, NodeType::Tool, "cargo", None).unwrap();
        let person = upsert_node(&store, P1, NodeType::Person, "cargo", None).unwrap();
        assert_ne!(tool.id, person.id);
    }

    #[test]
    fn levenshtein_distance_basics() {
        assert_eq!(levenshtein("kitten", "sitting"), 3);
        assert_eq!(levenshtein("", "abc"), 3);
        assert_eq!(levenshtein("same", "same"), 0);
        assert_eq!(levenshtein("ab", "ba"), 2);
    }

    #[test]
    fn levenshtein_guard_rejects_long_or_uneven_names() {
        assert!(!levenshtein_match("averyveryverylongname!", "averyveryverylongname?"));
        assert!(!levenshtein_match("ab", "abcdef"));
        assert!(levenshtein_match("esbuild", "esbuilt"));
    }
}
