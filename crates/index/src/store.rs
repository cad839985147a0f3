use async_trait::async_trait;
use ingest::Chunk;
use resolve::{CanonicalEntity, CanonicalRelationship};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Store failures, classified so the writer knows what to retry.
/// Timeouts, lost connections and contention are transient; schema and
/// constraint violations are permanent.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("transient store failure: {0}")]
    Transient(String),
    #[error("permanent store failure: {0}")]
    Permanent(String),
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Transient(_))
    }
}

/// A chunk together with its embedding, as persisted to the graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkRecord {
    pub chunk: Chunk,
    pub embedding: Vec<f32>,
}

/// One resolved batch ready for upsert. Everything is keyed by stable
/// identifiers, so applying the same batch twice is a no-op.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WriteBatch {
    pub entities: Vec<CanonicalEntity>,
    pub relationships: Vec<CanonicalRelationship>,
    pub chunks: Vec<ChunkRecord>,
}

impl WriteBatch {
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty() && self.relationships.is_empty() && self.chunks.is_empty()
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct GraphStats {
    pub entity_count: usize,
    pub relationship_count: usize,
    pub chunk_count: usize,
}

/// The graph store seam. All graph mutation goes through `apply`, one
/// transaction per call: either every upsert in the batch commits or
/// none does. The read methods serve the resolver's candidate-match
/// lookups.
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Apply one transactional batch of keyed upserts. Entity upserts
    /// are applied before relationship upserts within the transaction.
    async fn apply(&self, batch: &WriteBatch) -> Result<(), StoreError>;

    /// Canonical entities whose normalized name matches one of the
    /// keys. Entities absorbed by a merge resolve to their absorber,
    /// so callers always see current heads.
    async fn find_matching_entities(
        &self,
        name_keys: &[String],
    ) -> Result<Vec<CanonicalEntity>, StoreError>;

    /// Canonical relationships whose endpoints are both in `entity_ids`.
    async fn find_relationships(
        &self,
        entity_ids: &[String],
    ) -> Result<Vec<CanonicalRelationship>, StoreError>;

    async fn stats(&self) -> Result<GraphStats, StoreError>;
}
