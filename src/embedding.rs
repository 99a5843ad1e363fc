//! Text embeddings and vector helpers.
//!
//! - `Embedder`: async seam used by the vector store
//! - `OpenAiEmbedder`: `POST /v1/embeddings`
//! - `DisabledEmbedder`: placeholder when no API key is configured
//!
//! Vectors are persisted as little-endian f32 BLOBs and compared with
//! plain cosine similarity.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use crate::config::EmbeddingConfig;
use crate::error::{ConfigError, EmbeddingError};

/// Turns text into vectors.
#[async_trait]
pub trait Embedder: Send + Sync {
    fn model_name(&self) -> &str;

    /// One vector per input, in input order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError>;

    async fn embed_one(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let mut vectors = self.embed(&[text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| EmbeddingError::InvalidResponse("no vector returned".into()))
    }
}

// ── Disabled ────────────────────────────────────────────────────────

/// Fails every request. Lets read-only modes open the store without a key.
pub struct DisabledEmbedder;

#[async_trait]
impl Embedder for DisabledEmbedder {
    fn model_name(&self) -> &str {
        "disabled"
    }

    async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        Err(EmbeddingError::RequestFailed(
            "embeddings are not configured (OPENAI_API_KEY not set)".into(),
        ))
    }
}

// ── OpenAI ──────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingItem>,
}

#[derive(Deserialize)]
struct EmbeddingItem {
    #[serde(default)]
    index: usize,
    embedding: Vec<f32>,
}

pub struct OpenAiEmbedder {
    http: reqwest::Client,
    api_key: SecretString,
    model: String,
    base_url: String,
}

impl OpenAiEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self, ConfigError> {
        let api_key = config
            .api_key
            .clone()
            .ok_or_else(|| ConfigError::MissingEnvVar("OPENAI_API_KEY".into()))?;

        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ConfigError::InvalidValue {
                key: "EMBEDDING_TIMEOUT_SECS".into(),
                message: e.to_string(),
            })?;

        Ok(Self {
            http,
            api_key,
            model: config.model.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });

        let response = self
            .http
            .post(format!("{}/v1/embeddings", self.base_url))
            .bearer_auth(self.api_key.expose_secret())
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EmbeddingError::Http {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| EmbeddingError::InvalidResponse(e.to_string()))?;

        let vectors = into_ordered_vectors(parsed)?;
        if vectors.len() != texts.len() {
            return Err(EmbeddingError::InvalidResponse(format!(
                "expected {} vectors, got {}",
                texts.len(),
                vectors.len()
            )));
        }
        Ok(vectors)
    }
}

fn into_ordered_vectors(mut response: EmbeddingResponse) -> Result<Vec<Vec<f32>>, EmbeddingError> {
    response.data.sort_by_key(|item| item.index);
    if response.data.iter().any(|item| item.embedding.is_empty()) {
        return Err(EmbeddingError::InvalidResponse("empty embedding vector".into()));
    }
    Ok(response.data.into_iter().map(|item| item.embedding).collect())
}

// ── Vector helpers ──────────────────────────────────────────────────

pub fn vec_to_blob(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|v| v.to_le_bytes()).collect()
}

pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

/// Cosine similarity in `[-1, 1]`; `0.0` for empty or mismatched inputs.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }

    let (dot, norm_a, norm_b) = a
        .iter()
        .zip(b)
        .fold((0.0f32, 0.0f32, 0.0f32), |(d, na, nb), (x, y)| {
            (d + x * y, na + x * x, nb + y * y)
        });

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON { 0.0 } else { dot / denom }
}
