// ── Curation pipeline ──────────────────────────────────────────────────────
// Periodically classifies pending observations through the external text
// agent:
//
//   fetch oldest pending → expand ±N context per row → render one
//   deterministic prompt → call agent (soft timeout) → parse a JSON array
//   of {id, classification, reason} → apply verdicts (noise soft-deletes)
//
// Malformed replies and agent failures change nothing; the next pass
// retries. A separate fallback sweep promotes anything pending past the
// timeout to `discovery` so queries never starve.

use crate::atoms::constants::{
    DEFAULT_AGENT_TIMEOUT_MS, DEFAULT_CONTEXT_WINDOW, DEFAULT_CURATION_BATCH,
    DEFAULT_FALLBACK_TIMEOUT_SECS, TS_FORMAT,
};
use crate::atoms::error::LaminarkResult;
use crate::atoms::types::{Classification, Observation};
use crate::engine::agent::TextAgent;
use crate::engine::store::MemoryStore;
use log::{info, warn};
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::str::FromStr;

#[derive(Debug, Clone)]
pub struct CurationConfig {
    pub batch_size: usize,
    pub context_window: usize,
    pub fallback_timeout_secs: i64,
    pub agent_timeout_ms: u64,
}

impl Default for CurationConfig {
    fn default() -> Self {
        CurationConfig {
            batch_size: DEFAULT_CURATION_BATCH,
            context_window: DEFAULT_CONTEXT_WINDOW,
            fallback_timeout_secs: DEFAULT_FALLBACK_TIMEOUT_SECS,
            agent_timeout_ms: DEFAULT_AGENT_TIMEOUT_MS,
        }
    }
}

/// What one pass did.
#[derive(Debug, Default, Clone)]
pub struct CurationReport {
    pub pending: usize,
    pub classified: usize,
    pub noise: usize,
    pub fallback_promoted: usize,
}

/// One verdict record in the agent's JSON reply.
#[derive(Debug, Deserialize)]
struct Verdict {
    id: String,
    classification: String,
    #[serde(default)]
    #[allow(dead_code)]
    reason: Option<String>,
}

/// Run one curation pass for a project.
pub async fn run_curation_pass(
    store: &MemoryStore,
    project: &str,
    agent: &dyn TextAgent,
    config: &CurationConfig,
) -> LaminarkResult<CurationReport> {
    let mut report = CurationReport::default();

    let pending = store.list_unclassified(project, config.batch_size)?;
    report.pending = pending.len();

    if !pending.is_empty() {
        let prompt = render_prompt(store, project, &pending, config.context_window)?;
        let pending_ids: HashSet<String> = pending.iter().map(|o| o.id.clone()).collect();

        match agent.complete(&prompt, config.agent_timeout_ms).await {
            Ok(reply) => {
                let verdicts = parse_verdicts(&reply.text, &pending_ids);
                for (id, classification) in &verdicts {
                    if store.update_classification(project, id, *classification)? {
                        report.classified += 1;
                        if *classification == Classification::Noise {
                            report.noise += 1;
                        }
                    }
                }
                info!(
                    "[curation] Pass classified {}/{} pending ({} noise)",
                    report.classified, report.pending, report.noise
                );
            }
            Err(e) => {
                // Non-fatal: nothing changes, the next pass retries.
                warn!("[curation] Agent call failed, no rows changed: {e}");
            }
        }
    }

    // Fallback sweep: pending rows older than the timeout are promoted to
    // `discovery` (reason: fallback-timeout) so they become queryable.
    let cutoff = chrono::Utc::now()
        - chrono::Duration::seconds(config.fallback_timeout_secs);
    let cutoff_str = cutoff.format(TS_FORMAT).to_string();
    let promoted = store.promote_stale_unclassified(project, &cutoff_str)?;
    if !promoted.is_empty() {
        info!(
            "[curation] Fallback-timeout promoted {} observations to discovery",
            promoted.len()
        );
    }
    report.fallback_promoted = promoted.len();

    Ok(report)
}

/// Render the deterministic classifier prompt: every pending row plus its
/// interleaved time-window context, pending rows flagged with [PENDING].
fn render_prompt(
    store: &MemoryStore,
    project: &str,
    pending: &[Observation],
    context_window: usize,
) -> LaminarkResult<String> {
    let pending_ids: HashSet<&str> = pending.iter().map(|o| o.id.as_str()).collect();

    // One merged, time-ordered context spanning all pending rows, so a
    // burst of writes is classified with shared surroundings.
    let mut entries: HashMap<String, Observation> = HashMap::new();
    for observation in pending {
        for ctx in store.list_context(project, &observation.created_at, context_window)? {
            entries.insert(ctx.id.clone(), ctx);
        }
        entries.insert(observation.id.clone(), observation.clone());
    }
    let mut timeline: Vec<&Observation> = entries.values().collect();
    timeline.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.rowid.cmp(&b.rowid)));

    let mut prompt = String::from(
        "You are curating a coding assistant's memory. Classify each PENDING \
         observation as one of: discovery, problem, solution, noise.\n\
         noise means low-value output (command spam, transient logs) that \
         should be forgotten.\n\n\
         Observations in time order:\n\n",
    );

    for observation in timeline {
        let marker = if pending_ids.contains(observation.id.as_str()) {
            "[PENDING] "
        } else {
            ""
        };
        let classification = observation
            .classification
            .map(|c| c.as_str())
            .unwrap_or("unclassified");
        prompt.push_str(&format!(
            "{marker}id={} kind={} classification={} source={}\n{}\n\n",
            observation.id,
            observation.kind,
            classification,
            observation.source,
            truncate(&observation.content, 600),
        ));
    }

    prompt.push_str(
        "Reply with ONLY a JSON array, one entry per PENDING id:\n\
         [{\"id\": \"…\", \"classification\": \"discovery|problem|solution|noise\", \"reason\": \"…\"}]\n",
    );
    Ok(prompt)
}

/// Parse the agent reply. Accepts a bare JSON array or one embedded in
/// prose / code fences. Unknown ids and unknown classification values are
/// dropped; anything unparsable yields zero verdicts.
fn parse_verdicts(
    text: &str,
    pending_ids: &HashSet<String>,
) -> Vec<(String, Classification)> {
    let parsed: Option<Vec<Verdict>> = serde_json::from_str(text).ok().or_else(|| {
        let start = text.find('[')?;
        let end = text.rfind(']')?;
        if end <= start {
            return None;
        }
        serde_json::from_str(&text[start..=end]).ok()
    });

    let Some(verdicts) = parsed else {
        warn!("[curation] Unparsable agent reply — zero updates");
        return Vec::new();
    };

    verdicts
        .into_iter()
        .filter_map(|v| {
            if !pending_ids.contains(&v.id) {
                warn!("[curation] Dropping verdict for unknown id {}", v.id);
                return None;
            }
            match Classification::from_str(&v.classification) {
                Ok(classification) => Some((v.id, classification)),
                Err(_) => {
                    warn!(
                        "[curation] Dropping verdict with invalid classification '{}'",
                        v.classification
                    );
                    None
                }
            }
        })
        .collect()
}

/// Promote rows pending longer than the configured timeout, outside of a
/// full pass. The service loop calls this between agent runs.
pub fn run_fallback_sweep(
    store: &MemoryStore,
    project: &str,
    fallback_timeout_secs: i64,
) -> LaminarkResult<usize> {
    let cutoff = chrono::Utc::now() - chrono::Duration::seconds(fallback_timeout_secs);
    let promoted = store.promote_stale_unclassified(project, &cutoff.format(TS_FORMAT).to_string())?;
    Ok(promoted.len())
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let cut: String = text.chars().take(max_chars).collect();
        format!("{cut}…")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atoms::error::LaminarkError;
    use crate::atoms::types::ObservationInput;
    use crate::engine::agent::{AgentReply, TextAgent};
    use crate::engine::store::store_for_tests;
    use async_trait::async_trait;

    const P1: &str = "aaaaaaaaaaaaaaaa";

    struct StubAgent {
        reply: String,
    }

    #[async_trait]
    impl TextAgent for StubAgent {
        async fn complete(&self, _prompt: &str, _timeout_ms: u64) -> LaminarkResult<AgentReply> {
            Ok(AgentReply { text: self.reply.clone(), stop_reason: Some("end".into()) })
        }
    }

    struct FailingAgent;

    #[async_trait]
    impl TextAgent for FailingAgent {
        async fn complete(&self, _prompt: &str, _timeout_ms: u64) -> LaminarkResult<AgentReply> {
            Err(LaminarkError::agent("classifier", "connection refused"))
        }
    }

    #[tokio::test]
    async fn pass_applies_discovery_and_noise() {
        let store = store_for_tests();
        let a = store.create_observation(P1, &ObservationInput::new("found the retry bug")).unwrap();
        let b = store.create_observation(P1, &ObservationInput::new("$ ls -la output")).unwrap();

        let agent = StubAgent {
            reply: format!(
                r#"[{{"id":"{}","classification":"discovery","reason":"real finding"}},
                    {{"id":"{}","classification":"noise","reason":"command spam"}}]"#,
                a.id, b.id
            ),
        };

        let report = run_curation_pass(&store, P1, &agent, &CurationConfig::default())
            .await
            .unwrap();
        assert_eq!(report.pending, 2);
        assert_eq!(report.classified, 2);
        assert_eq!(report.noise, 1);

        let a_after = store.get_observation(P1, &a.id).unwrap().unwrap();
        assert_eq!(a_after.classification, Some(Classification::Discovery));

        assert!(store.get_observation(P1, &b.id).unwrap().is_none());
        let b_purged = store.get_observation_including_deleted(P1, &b.id).unwrap().unwrap();
        assert_eq!(b_purged.classification, Some(Classification::Noise));
    }

    #[tokio::test]
    async fn malformed_reply_changes_nothing() {
        let store = store_for_tests();
        let a = store.create_observation(P1, &ObservationInput::new("pending row")).unwrap();

        let agent = StubAgent { reply: "sorry, I can't help with that".into() };
        let report = run_curation_pass(&store, P1, &agent, &CurationConfig::default())
            .await
            .unwrap();
        assert_eq!(report.classified, 0);

        let after = store.get_observation_including_deleted(P1, &a.id).unwrap().unwrap();
        assert_eq!(after.classification, None);
    }

    #[tokio::test]
    async fn unknown_ids_are_dropped() {
        let store = store_for_tests();
        let a = store.create_observation(P1, &ObservationInput::new("pending row")).unwrap();

        let agent = StubAgent {
            reply: format!(
                r#"[{{"id":"not-a-pending-id","classification":"noise"}},
                    {{"id":"{}","classification":"solution"}}]"#,
                a.id
            ),
        };
        let report = run_curation_pass(&store, P1, &agent, &CurationConfig::default())
            .await
            .unwrap();
        assert_eq!(report.classified, 1);
        let after = store.get_observation(P1, &a.id).unwrap().unwrap();
        assert_eq!(after.classification, Some(Classification::Solution));
    }

    #[tokio::test]
    async fn invalid_classification_value_is_dropped() {
        let store = store_for_tests();
        let a = store.create_observation(P1, &ObservationInput::new("pending row")).unwrap();

        let agent = StubAgent {
            reply: format!(r#"[{{"id":"{}","classification":"amazing"}}]"#, a.id),
        };
        let report = run_curation_pass(&store, P1, &agent, &CurationConfig::default())
            .await
            .unwrap();
        assert_eq!(report.classified, 0);
    }

    #[tokio::test]
    async fn agent_failure_leaves_state_unchanged() {
        let store = store_for_tests();
        let a = store.create_observation(P1, &ObservationInput::new("pending row")).unwrap();

        let report = run_curation_pass(&store, P1, &FailingAgent, &CurationConfig::default())
            .await
            .unwrap();
        assert_eq!(report.classified, 0);
        let after = store.get_observation_including_deleted(P1, &a.id).unwrap().unwrap();
        assert_eq!(after.classification, None);
    }

    #[tokio::test]
    async fn fallback_promotes_starved_rows() {
        let store = store_for_tests();
        let a = store.create_observation(P1, &ObservationInput::new("starved row")).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));

        // Agent keeps failing, but a zero-second timeout promotes.
        let config = CurationConfig { fallback_timeout_secs: 0, ..Default::default() };
        let report = run_curation_pass(&store, P1, &FailingAgent, &config).await.unwrap();
        assert_eq!(report.fallback_promoted, 1);

        let after = store.get_observation(P1, &a.id).unwrap().unwrap();
        assert_eq!(after.classification, Some(Classification::Discovery));
    }

    #[test]
    fn prompt_is_deterministic_and_flags_pending() {
        let store = store_for_tests();
        store
            .create_classified_observation(
                P1,
                &ObservationInput::new("already classified context"),
                Classification::Discovery,
            )
            .unwrap();
        let pending = store
            .create_observation(P1, &ObservationInput::new("waiting for a verdict"))
            .unwrap();

        let batch = store.list_unclassified(P1, 10).unwrap();
        let p1 = render_prompt(&store, P1, &batch, 5).unwrap();
        let p2 = render_prompt(&store, P1, &batch, 5).unwrap();
        assert_eq!(p1, p2, "prompt must be deterministic");
        assert!(p1.contains(&format!("[PENDING] id={}", pending.id)));
        assert!(p1.contains("already classified context"));
    }

    #[test]
    fn parse_accepts_fenced_json() {
        let mut pending = HashSet::new();
        pending.insert("x".to_string());
        let verdicts = parse_verdicts(
            "Here you go:\n```json\n[{\"id\":\"x\",\"classification\":\"problem\"}]\n```",
            &pending,
        );
        assert_eq!(verdicts.len(), 1);
        assert_eq!(verdicts[0].1, Classification::Problem);
    }
}
