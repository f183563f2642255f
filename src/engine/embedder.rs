// ── Embedder seam + HTTP client ────────────────────────────────────────────
// The embedding worker is external; the core talks to it through the
// `Embedder` trait. A missing vector is a degraded call, never an error:
// `embed` resolves to `None` and dense search is skipped for that call.
//
// `EmbeddingClient` is the default implementation: a local
// Ollama-compatible endpoint, with an OpenAI-style `/v1/embeddings`
// fallback for other local workers.

use crate::atoms::constants::DEFAULT_VECTOR_DIMS;
use async_trait::async_trait;
use log::warn;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;

/// Dense-vector capability. `None` from `embed` means "dense signal
/// unavailable this call"; callers degrade gracefully.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Option<Vec<f32>>;
    fn dimensions(&self) -> usize;
    fn is_ready(&self) -> bool;
    /// Recorded on rows next to the vector, for re-embed migrations.
    fn model_name(&self) -> &str {
        "local"
    }
}

/// HTTP embedding client for a local worker.
pub struct EmbeddingClient {
    client: Client,
    base_url: String,
    model: String,
    dimensions: usize,
}

impl EmbeddingClient {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        EmbeddingClient {
            client: Client::new(),
            base_url: base_url.into(),
            model: model.into(),
            dimensions: DEFAULT_VECTOR_DIMS,
        }
    }

    pub fn with_dimensions(mut self, dimensions: usize) -> Self {
        self.dimensions = dimensions;
        self
    }

    /// Ollama `/api/embed` → `{ embeddings: [[f32…]] }`, with the legacy
    /// `/api/embeddings` shape accepted too.
    async fn embed_ollama(&self, text: &str) -> Result<Vec<f32>, String> {
        let url = format!("{}/api/embed", self.base_url.trim_end_matches('/'));
        let body = json!({ "model": self.model, "input": text });

        let resp = self
            .client
            .post(&url)
            .json(&body)
            .timeout(Duration::from_secs(30))
            .send()
            .await
            .map_err(|e| format!("worker not reachable at {}: {e}", self.base_url))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let detail = resp.text().await.unwrap_or_default();
            return Err(format!("embed {status} — {detail}"));
        }

        let v: Value = resp.json().await.map_err(|e| e.to_string())?;
        if let Some(first) = v["embeddings"].as_array().and_then(|e| e.first()).and_then(|e| e.as_array()) {
            let vec: Vec<f32> = first.iter().filter_map(|x| x.as_f64().map(|f| f as f32)).collect();
            if !vec.is_empty() {
                return Ok(vec);
            }
        }
        if let Some(embedding) = v["embedding"].as_array() {
            let vec: Vec<f32> = embedding.iter().filter_map(|x| x.as_f64().map(|f| f as f32)).collect();
            if !vec.is_empty() {
                return Ok(vec);
            }
        }
        Err("no embedding array in worker response".into())
    }

    /// OpenAI-compatible `/v1/embeddings` fallback.
    async fn embed_openai(&self, text: &str) -> Result<Vec<f32>, String> {
        let url = format!("{}/v1/embeddings", self.base_url.trim_end_matches('/'));
        let body = json!({ "model": self.model, "input": text });

        let resp = self
            .client
            .post(&url)
            .json(&body)
            .timeout(Duration::from_secs(30))
            .send()
            .await
            .map_err(|e| e.to_string())?;

        if !resp.status().is_success() {
            let status = resp.status();
            let detail = resp.text().await.unwrap_or_default();
            return Err(format!("embed {status} — {detail}"));
        }

        let v: Value = resp.json().await.map_err(|e| e.to_string())?;
        let embedding = v["data"][0]["embedding"]
            .as_array()
            .ok_or_else(|| "no data[0].embedding in response".to_string())?;
        let vec: Vec<f32> = embedding.iter().filter_map(|x| x.as_f64().map(|f| f as f32)).collect();
        if vec.is_empty() {
            return Err("empty embedding vector".into());
        }
        Ok(vec)
    }
}

#[async_trait]
impl Embedder for EmbeddingClient {
    async fn embed(&self, text: &str) -> Option<Vec<f32>> {
        if text.trim().is_empty() {
            return None;
        }
        match self.embed_ollama(text).await {
            Ok(vec) => Some(vec),
            Err(ollama_err) => match self.embed_openai(text).await {
                Ok(vec) => Some(vec),
                Err(openai_err) => {
                    warn!(
                        "[embedder] Dense signal unavailable — ollama: {ollama_err} | openai: {openai_err}"
                    );
                    None
                }
            },
        }
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn is_ready(&self) -> bool {
        !self.base_url.is_empty()
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
