// ── Text agent seam ────────────────────────────────────────────────────────
// The LLM classifier (and any future entity extractor) lives outside this
// crate. The core only needs one capability: prompt in, text out, bounded
// by a timeout. Errors and timeouts are non-fatal to every caller.

use crate::atoms::error::LaminarkResult;
use async_trait::async_trait;

/// A completed agent call.
#[derive(Debug, Clone)]
pub struct AgentReply {
    pub text: String,
    pub stop_reason: Option<String>,
}

/// `(prompt, timeout) → text` capability. When the prompt requests JSON,
/// the caller parses `text` and treats parse failures as a no-op.
#[async_trait]
pub trait TextAgent: Send + Sync {
    async fn complete(&self, prompt: &str, timeout_ms: u64) -> LaminarkResult<AgentReply>;
}
