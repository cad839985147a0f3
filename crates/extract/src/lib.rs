pub mod cache;
pub mod client;
pub mod normalizer;
pub mod retry;
pub mod schema;

pub use cache::EmbeddingCache;
pub use client::{
    default_extraction_schema, EmbedderClient, ExtractionRequest, ExtractorClient, HttpEmbedder,
    HttpExtractor,
};
pub use normalizer::NameNormalizer;
pub use retry::RetryPolicy;
pub use schema::{
    CandidateEntity, CandidateRelationship, PropertyBag, PropertyValue, Provenance, RawExtraction,
};

use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use ingest::Chunk;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Candidates below this confidence are dropped before resolution.
    pub confidence_floor: f32,
    /// Parallelism bound on in-flight extractor/embedder calls.
    pub max_concurrent_calls: usize,
    /// Per-call timeout; a timed-out call counts as transient.
    pub call_timeout_secs: u64,
    pub max_retries: usize,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    /// Expected embedder output dimension; mismatches fail the chunk.
    pub embedding_dimension: usize,
    pub cache_entries: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            confidence_floor: 0.25,
            max_concurrent_calls: 4,
            call_timeout_secs: 60,
            max_retries: 3,
            initial_backoff_ms: 500,
            max_backoff_ms: 10000,
            embedding_dimension: 768,
            cache_entries: 10000,
        }
    }
}

/// Extraction output for one chunk: its embedding plus the surviving
/// candidate entities and relationships.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkExtraction {
    pub chunk_id: String,
    pub ordinal: usize,
    pub embedding: Vec<f32>,
    pub entities: Vec<CandidateEntity>,
    pub relationships: Vec<CandidateRelationship>,
}

/// A chunk whose extraction or embedding failed. The document keeps
/// processing; the failure is surfaced in the run report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkFailure {
    pub chunk_id: String,
    pub ordinal: usize,
    pub error: String,
    /// True for schema violations, false for exhausted transient errors.
    pub schema_violation: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentExtraction {
    pub doc_id: String,
    pub extractions: Vec<ChunkExtraction>,
    pub failures: Vec<ChunkFailure>,
}

impl DocumentExtraction {
    pub fn candidate_entities(&self) -> Vec<CandidateEntity> {
        self.extractions
            .iter()
            .flat_map(|e| e.entities.iter().cloned())
            .collect()
    }

    pub fn candidate_relationships(&self) -> Vec<CandidateRelationship> {
        self.extractions
            .iter()
            .flat_map(|e| e.relationships.iter().cloned())
            .collect()
    }

    pub fn embeddings_by_chunk(&self) -> HashMap<String, Vec<f32>> {
        self.extractions
            .iter()
            .map(|e| (e.chunk_id.clone(), e.embedding.clone()))
            .collect()
    }
}

/// Drives the external extractor and embedder over a document's chunks,
/// normalizing their responses into candidate records. One bad chunk
/// never fails the document.
#[derive(Clone)]
pub struct Orchestrator {
    extractor: Arc<dyn ExtractorClient>,
    embedder: Arc<dyn EmbedderClient>,
    cache: EmbeddingCache,
    retry: RetryPolicy,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(
        config: OrchestratorConfig,
        extractor: Arc<dyn ExtractorClient>,
        embedder: Arc<dyn EmbedderClient>,
    ) -> Self {
        let retry = RetryPolicy::new(
            config.max_retries,
            config.initial_backoff_ms,
            config.max_backoff_ms,
        );
        let cache = EmbeddingCache::new(config.cache_entries);
        Self {
            extractor,
            embedder,
            cache,
            retry,
            config,
        }
    }

    /// Extract candidates and embeddings for every chunk of a document.
    /// Chunks run concurrently up to the configured parallelism bound;
    /// results come back ordered by chunk ordinal.
    pub async fn extract_document(&self, doc_id: &str, chunks: &[Chunk]) -> DocumentExtraction {
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_calls.max(1)));
        let mut set = JoinSet::new();

        for chunk in chunks {
            let this = self.clone();
            let chunk = chunk.clone();
            let semaphore = semaphore.clone();
            set.spawn(async move {
                // Unwrap is safe: the semaphore is never closed.
                let _permit = semaphore.acquire_owned().await.expect("semaphore closed");
                this.process_chunk(chunk).await
            });
        }

        let mut extractions = Vec::new();
        let mut failures = Vec::new();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(Ok(extraction)) => extractions.push(extraction),
                Ok(Err(failure)) => failures.push(failure),
                Err(e) => warn!(doc_id, error = %e, "chunk extraction task aborted"),
            }
        }

        extractions.sort_by_key(|e| e.ordinal);
        failures.sort_by_key(|f| f.ordinal);

        DocumentExtraction {
            doc_id: doc_id.to_string(),
            extractions,
            failures,
        }
    }

    async fn process_chunk(&self, chunk: Chunk) -> Result<ChunkExtraction, ChunkFailure> {
        let fail = |error: String, schema_violation: bool| ChunkFailure {
            chunk_id: chunk.chunk_id.clone(),
            ordinal: chunk.ordinal,
            error,
            schema_violation,
        };

        let request = ExtractionRequest {
            chunk_text: chunk.text.clone(),
            ancestor_context: chunk.ancestor_context(),
            extraction_schema: default_extraction_schema(),
        };
        let timeout = Duration::from_secs(self.config.call_timeout_secs);

        let raw = self
            .retry
            .retry("extractor", || {
                let request = &request;
                async move {
                    match tokio::time::timeout(timeout, self.extractor.extract(request)).await {
                        Ok(result) => result,
                        Err(_) => Err(anyhow::anyhow!(
                            "extractor call timed out after {}s",
                            self.config.call_timeout_secs
                        )),
                    }
                }
            })
            .await
            .map_err(|e| fail(format!("extractor: {e:#}"), false))?;

        // Schema violations are not retried: the response arrived, it
        // just doesn't honor the contract.
        raw.validate()
            .map_err(|msg| fail(format!("malformed extractor response: {msg}"), true))?;

        let (entities, relationships) = self.normalize_candidates(&chunk, raw);

        let embedding = match self.cache.get(&chunk.text) {
            Some(vector) => vector,
            None => {
                let vector = self
                    .retry
                    .retry("embedder", || {
                        let text = chunk.text.as_str();
                        async move {
                            match tokio::time::timeout(timeout, self.embedder.embed(text)).await {
                                Ok(result) => result,
                                Err(_) => Err(anyhow::anyhow!(
                                    "embedder call timed out after {}s",
                                    self.config.call_timeout_secs
                                )),
                            }
                        }
                    })
                    .await
                    .map_err(|e| fail(format!("embedder: {e:#}"), false))?;
                self.cache.set(&chunk.text, vector.clone());
                vector
            }
        };

        if embedding.len() != self.config.embedding_dimension {
            return Err(fail(
                format!(
                    "embedding dimension {} does not match configured {}",
                    embedding.len(),
                    self.config.embedding_dimension
                ),
                true,
            ));
        }

        debug!(
            chunk_id = %chunk.chunk_id,
            entities = entities.len(),
            relationships = relationships.len(),
            "chunk extracted"
        );

        Ok(ChunkExtraction {
            chunk_id: chunk.chunk_id.clone(),
            ordinal: chunk.ordinal,
            embedding,
            entities,
            relationships,
        })
    }

    /// Turn a validated raw response into candidates: attach provenance,
    /// resolve per-item confidence against the response-level value, and
    /// apply the confidence floor. Relationships whose endpoints were
    /// floored out are dropped with them.
    fn normalize_candidates(
        &self,
        chunk: &Chunk,
        raw: RawExtraction,
    ) -> (Vec<CandidateEntity>, Vec<CandidateRelationship>) {
        let provenance = Provenance {
            doc_id: chunk.doc_id.clone(),
            chunk_id: chunk.chunk_id.clone(),
        };
        let response_confidence = raw.confidence.unwrap_or(1.0);
        let floor = self.config.confidence_floor;

        let mut surviving = HashSet::new();
        let mut entities = Vec::new();
        for entity in raw.entities {
            let confidence = entity.confidence.unwrap_or(response_confidence);
            if confidence < floor {
                debug!(name = %entity.name, confidence, "entity below confidence floor");
                continue;
            }
            surviving.insert(entity.name.clone());
            entities.push(CandidateEntity {
                name: entity.name,
                entity_type: entity.entity_type,
                properties: entity.properties,
                provenance: provenance.clone(),
                confidence,
            });
        }

        let mut relationships = Vec::new();
        for rel in raw.relationships {
            let confidence = rel.confidence.unwrap_or(response_confidence);
            if confidence < floor {
                continue;
            }
            if !surviving.contains(&rel.source) || !surviving.contains(&rel.target) {
                debug!(
                    source = %rel.source,
                    target = %rel.target,
                    "dropping relationship with floored endpoint"
                );
                continue;
            }
            relationships.push(CandidateRelationship {
                source: rel.source,
                target: rel.target,
                rel_type: rel.rel_type,
                properties: rel.properties,
                provenance: provenance.clone(),
                confidence,
            });
        }

        (entities, relationships)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use async_trait::async_trait;
    use crate::schema::{RawEntity, RawRelationship};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn chunk(ordinal: usize, text: &str) -> Chunk {
        Chunk::new(
            "doc-1".into(),
            ordinal,
            text.into(),
            (ordinal * 100, ordinal * 100 + text.len()),
            vec!["Section".into()],
        )
    }

    fn raw_entity(name: &str, confidence: f32) -> RawEntity {
        RawEntity {
            name: name.into(),
            entity_type: "Organization".into(),
            properties: PropertyBag::new(),
            confidence: Some(confidence),
        }
    }

    /// Extractor stub: one entity named after the first word of the
    /// chunk, malformed response for chunks containing "BAD".
    struct StubExtractor;

    #[async_trait]
    impl ExtractorClient for StubExtractor {
        async fn extract(&self, request: &ExtractionRequest) -> Result<RawExtraction> {
            let first_word = request
                .chunk_text
                .split_whitespace()
                .next()
                .unwrap_or("empty");
            if request.chunk_text.contains("BAD") {
                return Ok(RawExtraction {
                    entities: vec![raw_entity("", 0.9)],
                    relationships: vec![],
                    confidence: None,
                });
            }
            Ok(RawExtraction {
                entities: vec![raw_entity(first_word, 0.9)],
                relationships: vec![],
                confidence: Some(0.9),
            })
        }
    }

    struct StubEmbedder {
        dimension: usize,
        calls: AtomicUsize,
    }

    impl StubEmbedder {
        fn new(dimension: usize) -> Self {
            Self {
                dimension,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl EmbedderClient for StubEmbedder {
        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let seed = text.len() as f32;
            Ok((0..self.dimension).map(|i| seed + i as f32).collect())
        }
    }

    fn test_config(dimension: usize) -> OrchestratorConfig {
        OrchestratorConfig {
            embedding_dimension: dimension,
            max_retries: 0,
            initial_backoff_ms: 1,
            max_backoff_ms: 1,
            ..OrchestratorConfig::default()
        }
    }

    #[tokio::test]
    async fn one_bad_chunk_does_not_fail_the_document() {
        let orchestrator = Orchestrator::new(
            test_config(4),
            Arc::new(StubExtractor),
            Arc::new(StubEmbedder::new(4)),
        );
        let chunks = vec![
            chunk(0, "Acme announced results."),
            chunk(1, "BAD response incoming."),
            chunk(2, "Beta expanded operations."),
        ];

        let result = orchestrator.extract_document("doc-1", &chunks).await;

        assert_eq!(result.extractions.len(), 2);
        assert_eq!(result.failures.len(), 1);
        assert_eq!(result.failures[0].ordinal, 1);
        assert!(result.failures[0].schema_violation);
        assert!(result.failures[0].error.contains("malformed"));
    }

    #[tokio::test]
    async fn results_are_ordered_by_ordinal() {
        let orchestrator = Orchestrator::new(
            test_config(4),
            Arc::new(StubExtractor),
            Arc::new(StubEmbedder::new(4)),
        );
        let chunks: Vec<Chunk> = (0..8)
            .map(|i| chunk(i, &format!("Word{i} text for chunk.")))
            .collect();

        let result = orchestrator.extract_document("doc-1", &chunks).await;
        let ordinals: Vec<usize> = result.extractions.iter().map(|e| e.ordinal).collect();
        assert_eq!(ordinals, (0..8).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn embedding_dimension_mismatch_fails_chunk() {
        let orchestrator = Orchestrator::new(
            test_config(8),
            Arc::new(StubExtractor),
            Arc::new(StubEmbedder::new(4)),
        );
        let result = orchestrator
            .extract_document("doc-1", &[chunk(0, "Acme text.")])
            .await;

        assert!(result.extractions.is_empty());
        assert_eq!(result.failures.len(), 1);
        assert!(result.failures[0].error.contains("dimension"));
    }

    #[tokio::test]
    async fn identical_text_hits_the_embedding_cache() {
        let embedder = Arc::new(StubEmbedder::new(4));
        let orchestrator = Orchestrator::new(
            test_config(4),
            Arc::new(StubExtractor),
            embedder.clone(),
        );

        orchestrator
            .extract_document("doc-1", &[chunk(0, "Same text here.")])
            .await;
        orchestrator
            .extract_document("doc-1", &[chunk(1, "Same text here.")])
            .await;

        assert_eq!(embedder.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn confidence_floor_drops_candidates_and_dangling_relationships() {
        let orchestrator = Orchestrator::new(
            test_config(4),
            Arc::new(StubExtractor),
            Arc::new(StubEmbedder::new(4)),
        );
        let c = chunk(0, "text");
        let raw = RawExtraction {
            entities: vec![raw_entity("Acme Corp", 0.9), raw_entity("Ghost Co", 0.1)],
            relationships: vec![
                RawRelationship {
                    source: "Acme Corp".into(),
                    target: "Ghost Co".into(),
                    rel_type: "OWNS".into(),
                    properties: PropertyBag::new(),
                    confidence: Some(0.9),
                },
                RawRelationship {
                    source: "Acme Corp".into(),
                    target: "Acme Corp".into(),
                    rel_type: "MENTIONS".into(),
                    properties: PropertyBag::new(),
                    confidence: Some(0.05),
                },
            ],
            confidence: None,
        };

        let (entities, relationships) = orchestrator.normalize_candidates(&c, raw);
        assert_eq!(entities.len(), 1);
        assert_eq!(entities[0].name, "Acme Corp");
        // Both relationships are gone: one floored, one dangling.
        assert!(relationships.is_empty());
    }
}
