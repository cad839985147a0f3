use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::schema::RawExtraction;

/// Request sent to the external entity/relationship extractor.
#[derive(Debug, Clone, Serialize)]
pub struct ExtractionRequest {
    pub chunk_text: String,
    /// Digest of parent section headings, not the full ancestor text,
    /// so prompt size stays bounded.
    pub ancestor_context: String,
    pub extraction_schema: Value,
}

/// External extractor, treated as a black box returning candidate
/// entities and relationships under the JSON contract in `schema`.
#[async_trait]
pub trait ExtractorClient: Send + Sync {
    async fn extract(&self, request: &ExtractionRequest) -> Result<RawExtraction>;
}

/// External embedder, a black box returning fixed-length vectors.
#[async_trait]
pub trait EmbedderClient: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

/// HTTP extractor speaking the `{chunk_text, ancestor_context,
/// extraction_schema} -> {entities[], relationships[], confidence}`
/// contract against a service endpoint.
#[derive(Clone)]
pub struct HttpExtractor {
    base_url: String,
    client: reqwest::Client,
}

impl HttpExtractor {
    pub fn new(base_url: String) -> Self {
        Self {
            base_url,
            client: reqwest::Client::new(),
        }
    }

    pub fn default_local() -> Self {
        Self::new("http://localhost:8089".to_string())
    }
}

#[async_trait]
impl ExtractorClient for HttpExtractor {
    async fn extract(&self, request: &ExtractionRequest) -> Result<RawExtraction> {
        let url = format!("{}/extract", self.base_url);

        let response = self
            .client
            .post(&url)
            .json(request)
            .send()
            .await
            .context("Failed to send request to extractor")?;

        if !response.status().is_success() {
            anyhow::bail!("Extractor request failed: {}", response.status());
        }

        let extraction: RawExtraction = response
            .json()
            .await
            .context("Failed to parse extractor response")?;

        Ok(extraction)
    }
}

#[derive(Serialize)]
struct EmbeddingRequest {
    text: String,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    vector: Vec<f32>,
}

/// HTTP embedder speaking `{text} -> {vector: float[dim]}`.
#[derive(Clone)]
pub struct HttpEmbedder {
    base_url: String,
    client: reqwest::Client,
}

impl HttpEmbedder {
    pub fn new(base_url: String) -> Self {
        Self {
            base_url,
            client: reqwest::Client::new(),
        }
    }

    pub fn default_local() -> Self {
        Self::new("http://localhost:8090".to_string())
    }
}

#[async_trait]
impl EmbedderClient for HttpEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let url = format!("{}/embed", self.base_url);

        let request = EmbeddingRequest {
            text: text.to_string(),
        };

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .context("Failed to send embedding request")?;

        if !response.status().is_success() {
            anyhow::bail!("Embedding request failed: {}", response.status());
        }

        let embedding: EmbeddingResponse = response
            .json()
            .await
            .context("Failed to parse embedding response")?;

        Ok(embedding.vector)
    }
}

/// The JSON contract advertised to the extractor. Kept as data so the
/// prompting layer upstream can evolve it without touching this crate.
pub fn default_extraction_schema() -> Value {
    serde_json::json!({
        "entities": [
            {"name": "string", "type": "string", "properties": {}, "confidence": "number"}
        ],
        "relationships": [
            {"source": "string", "target": "string", "type": "string",
             "properties": {}, "confidence": "number"}
        ],
        "confidence": "number"
    })
}
