use extract::OrchestratorConfig;
use index::{VectorSyncConfig, WriterConfig};
use ingest::ChunkerConfig;
use resolve::{RelationshipConfig, ResolverConfig};
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

/// Complete engine configuration. Thresholds, weights, the confidence
/// floor and the type-compatibility table are policy, so they live
/// here instead of being hard-coded anywhere.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub chunker: ChunkerConfig,
    #[serde(default)]
    pub extraction: OrchestratorConfig,
    #[serde(default)]
    pub resolver: ResolverConfig,
    #[serde(default)]
    pub relationships: RelationshipConfig,
    #[serde(default)]
    pub writer: WriterConfig,
    #[serde(default)]
    pub vector: VectorSyncConfig,
}

impl PipelineConfig {
    /// Configuration errors are fatal and must surface before any
    /// external call is made.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.extraction.embedding_dimension == 0 {
            return Err(PipelineError::Fatal(
                "embedding dimension must be configured and non-zero".into(),
            ));
        }
        if self.chunker.max_chars == 0 {
            return Err(PipelineError::Fatal("chunk budget must be non-zero".into()));
        }
        if !(0.0..=1.0).contains(&self.extraction.confidence_floor) {
            return Err(PipelineError::Fatal(format!(
                "confidence floor {} outside [0, 1]",
                self.extraction.confidence_floor
            )));
        }
        if !(0.0..=1.0).contains(&self.resolver.merge_threshold) || self.resolver.merge_threshold == 0.0
        {
            return Err(PipelineError::Fatal(format!(
                "merge threshold {} outside (0, 1]",
                self.resolver.merge_threshold
            )));
        }
        if self.resolver.name_weight < 0.0
            || self.resolver.embedding_weight < 0.0
            || self.resolver.name_weight + self.resolver.embedding_weight <= 0.0
        {
            return Err(PipelineError::Fatal(
                "similarity weights must be non-negative and sum to a positive value".into(),
            ));
        }
        if self.writer.max_batch_size == 0 {
            return Err(PipelineError::Fatal(
                "writer batch size must be at least 1".into(),
            ));
        }
        Ok(())
    }
}
