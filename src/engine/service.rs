// ── Long-lived service loop ────────────────────────────────────────────────
// The one resident process per machine. Periodically:
//   • runs the curation pass (when a classifier agent is wired)
//   • sweeps the fallback-timeout promotion
//   • backfills embeddings for rows the hook writers left dense-less
//
// Every tick catches and logs; a failing collaborator never takes the
// loop down. Hook processes are not coordinated with; WAL and
// busy_timeout absorb the write overlap.

use crate::engine::agent::TextAgent;
use crate::engine::embedder::Embedder;
use crate::engine::recall::curation::{run_curation_pass, run_fallback_sweep, CurationConfig};
use crate::Laminark;
use log::{info, warn};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub curation_interval_secs: u64,
    pub embed_interval_secs: u64,
    pub embed_batch: usize,
    pub curation: CurationConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        ServiceConfig {
            curation_interval_secs: 120,
            embed_interval_secs: 30,
            embed_batch: 16,
            curation: CurationConfig::default(),
        }
    }
}

/// Run the background loop until ctrl-c. `agent` may be absent; the
/// classifier then never runs and pending rows rely on the fallback
/// promotion alone.
pub async fn run_service(
    laminark: Arc<Laminark>,
    agent: Option<Arc<dyn TextAgent>>,
    embedder: Option<Arc<dyn Embedder>>,
    config: ServiceConfig,
) {
    info!(
        "[service] Started for project {} (curation every {}s, embedding every {}s)",
        laminark.project_hash(),
        config.curation_interval_secs,
        config.embed_interval_secs
    );

    let mut curation_tick =
        tokio::time::interval(Duration::from_secs(config.curation_interval_secs.max(1)));
    let mut embed_tick =
        tokio::time::interval(Duration::from_secs(config.embed_interval_secs.max(1)));
    // First tick of a tokio interval fires immediately; consume both so
    // the loop starts quiet.
    curation_tick.tick().await;
    embed_tick.tick().await;

    loop {
        tokio::select! {
            _ = curation_tick.tick() => {
                curation_tick_body(&laminark, agent.as_deref(), &config.curation).await;
            }
            _ = embed_tick.tick() => {
                if let Some(embedder) = embedder.as_deref() {
                    match laminark.backfill_embeddings(embedder, config.embed_batch).await {
                        Ok(0) => {}
                        Ok(n) => info!("[service] Embedded {n} observations"),
                        Err(e) => warn!("[service] Embedding backfill failed: {e}"),
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("[service] Shutting down");
                break;
            }
        }
    }
}

async fn curation_tick_body(
    laminark: &Laminark,
    agent: Option<&dyn TextAgent>,
    config: &CurationConfig,
) {
    match agent {
        Some(agent) => {
            match run_curation_pass(laminark.store(), laminark.project_hash(), agent, config).await
            {
                Ok(report) if report.pending > 0 => info!(
                    "[service] Curation: {}/{} classified, {} noise, {} fallback-promoted",
                    report.classified, report.pending, report.noise, report.fallback_promoted
                ),
                Ok(_) => {}
                Err(e) => warn!("[service] Curation pass failed: {e}"),
            }
        }
        None => {
            match run_fallback_sweep(
                laminark.store(),
                laminark.project_hash(),
                config.fallback_timeout_secs,
            ) {
                Ok(0) => {}
                Ok(n) => info!("[service] Fallback-promoted {n} observations"),
                Err(e) => warn!("[service] Fallback sweep failed: {e}"),
            }
        }
    }
}
