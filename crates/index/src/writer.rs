use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::store::{GraphStore, StoreError, WriteBatch};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriterConfig {
    /// Upper bound on upserts per transaction.
    pub max_batch_size: usize,
    pub max_retries: usize,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            max_batch_size: 100,
            max_retries: 3,
            initial_backoff_ms: 250,
            max_backoff_ms: 5000,
        }
    }
}

/// A transaction that exhausted its retries. The batch itself is kept
/// so the caller can replay it instead of losing the writes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailedBatch {
    pub batch_ordinal: usize,
    pub error: String,
    pub batch: WriteBatch,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WriteOutcome {
    pub transactions_committed: usize,
    pub entities_written: usize,
    pub relationships_written: usize,
    pub chunks_written: usize,
    pub failures: Vec<FailedBatch>,
}

impl WriteOutcome {
    pub fn fully_committed(&self) -> bool {
        self.failures.is_empty()
    }
}

/// The only component that mutates the graph. Splits a resolved batch
/// into bounded transactions, orders entities before the relationships
/// that reference them, and retries transient failures with
/// exponential backoff. Re-applying an identical batch is a no-op
/// because every upsert is keyed.
pub struct GraphWriter {
    store: Arc<dyn GraphStore>,
    config: WriterConfig,
}

impl GraphWriter {
    pub fn new(store: Arc<dyn GraphStore>, config: WriterConfig) -> Self {
        Self { store, config }
    }

    pub fn store(&self) -> &Arc<dyn GraphStore> {
        &self.store
    }

    pub async fn write(&self, batch: WriteBatch) -> WriteOutcome {
        let mut outcome = WriteOutcome::default();
        if batch.is_empty() {
            return outcome;
        }

        let (node_transactions, rel_transactions) = self.partition(batch);
        let mut ordinal = 0;
        let mut nodes_failed = false;

        for tx in node_transactions {
            match self.apply_with_retry(ordinal, &tx).await {
                Ok(()) => {
                    outcome.transactions_committed += 1;
                    outcome.entities_written += tx.entities.len();
                    outcome.chunks_written += tx.chunks.len();
                }
                Err(error) => {
                    nodes_failed = true;
                    outcome.failures.push(FailedBatch {
                        batch_ordinal: ordinal,
                        error: error.to_string(),
                        batch: tx,
                    });
                }
            }
            ordinal += 1;
        }

        for tx in rel_transactions {
            // A relationship must never become visible without its
            // endpoints, so once an entity transaction failed, the
            // dependent relationship transactions are reported for
            // replay instead of attempted.
            if nodes_failed {
                outcome.failures.push(FailedBatch {
                    batch_ordinal: ordinal,
                    error: "skipped: an entity transaction in this batch failed".to_string(),
                    batch: tx,
                });
                ordinal += 1;
                continue;
            }
            match self.apply_with_retry(ordinal, &tx).await {
                Ok(()) => {
                    outcome.transactions_committed += 1;
                    outcome.relationships_written += tx.relationships.len();
                }
                Err(error) => {
                    outcome.failures.push(FailedBatch {
                        batch_ordinal: ordinal,
                        error: error.to_string(),
                        batch: tx,
                    });
                }
            }
            ordinal += 1;
        }

        debug!(
            committed = outcome.transactions_committed,
            failed = outcome.failures.len(),
            entities = outcome.entities_written,
            relationships = outcome.relationships_written,
            "graph write finished"
        );
        outcome
    }

    /// Bounded transactions with referential ordering across them: all
    /// entity/chunk transactions precede all relationship transactions.
    fn partition(&self, batch: WriteBatch) -> (Vec<WriteBatch>, Vec<WriteBatch>) {
        let size = self.config.max_batch_size.max(1);
        let mut nodes = Vec::new();

        let mut entities = batch.entities.into_iter().peekable();
        let mut chunks = batch.chunks.into_iter().peekable();
        while entities.peek().is_some() || chunks.peek().is_some() {
            let mut tx = WriteBatch::default();
            while tx.entities.len() + tx.chunks.len() < size {
                if let Some(entity) = entities.next() {
                    tx.entities.push(entity);
                } else if let Some(chunk) = chunks.next() {
                    tx.chunks.push(chunk);
                } else {
                    break;
                }
            }
            nodes.push(tx);
        }

        let rels = batch
            .relationships
            .chunks(size)
            .map(|slice| WriteBatch {
                relationships: slice.to_vec(),
                ..WriteBatch::default()
            })
            .collect();

        (nodes, rels)
    }

    /// One transaction, retried on transient failures only. The whole
    /// transaction is retried as a unit; permanent failures surface
    /// immediately.
    async fn apply_with_retry(&self, ordinal: usize, tx: &WriteBatch) -> Result<(), StoreError> {
        let mut attempt = 0;
        let mut backoff = Duration::from_millis(self.config.initial_backoff_ms);

        loop {
            match self.store.apply(tx).await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_transient() && attempt < self.config.max_retries => {
                    attempt += 1;
                    warn!(
                        batch_ordinal = ordinal,
                        attempt,
                        max_retries = self.config.max_retries,
                        backoff_ms = backoff.as_millis(),
                        error = %e,
                        "transient store failure, retrying transaction"
                    );
                    sleep(backoff).await;
                    backoff = std::cmp::min(
                        backoff * 2,
                        Duration::from_millis(self.config.max_backoff_ms),
                    );
                }
                Err(e) => {
                    warn!(batch_ordinal = ordinal, error = %e, "transaction failed");
                    return Err(e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_store::InMemoryGraphStore;
    use crate::store::ChunkRecord;
    use extract::{PropertyBag, Provenance};
    use ingest::Chunk;
    use resolve::{relationship_id, CanonicalEntity, CanonicalRelationship};

    fn entity(id: &str, name_key: &str) -> CanonicalEntity {
        CanonicalEntity {
            id: id.into(),
            name: name_key.into(),
            entity_type: "Organization".into(),
            name_key: name_key.into(),
            properties: PropertyBag::new(),
            provenance: vec![Provenance {
                doc_id: "d1".into(),
                chunk_id: "c1".into(),
            }],
            merged_from: vec![],
            embedding: None,
        }
    }

    fn relationship(source: &str, target: &str) -> CanonicalRelationship {
        CanonicalRelationship {
            id: relationship_id(source, target, "OWNS"),
            source_id: source.into(),
            target_id: target.into(),
            rel_type: "OWNS".into(),
            confidence: 0.8,
            properties: Default::default(),
            provenance: vec![Provenance {
                doc_id: "d1".into(),
                chunk_id: "c1".into(),
            }],
        }
    }

    fn chunk_record(id_seed: usize) -> ChunkRecord {
        ChunkRecord {
            chunk: Chunk::new(
                "d1".into(),
                id_seed,
                format!("chunk text {id_seed}"),
                (id_seed * 10, id_seed * 10 + 5),
                vec![],
            ),
            embedding: vec![0.1, 0.2],
        }
    }

    fn batch() -> WriteBatch {
        WriteBatch {
            entities: vec![entity("e1", "acme"), entity("e2", "beta")],
            relationships: vec![relationship("e1", "e2")],
            chunks: vec![chunk_record(0), chunk_record(1)],
        }
    }

    fn fast_config() -> WriterConfig {
        WriterConfig {
            max_batch_size: 100,
            max_retries: 3,
            initial_backoff_ms: 1,
            max_backoff_ms: 2,
        }
    }

    #[tokio::test]
    async fn writes_batch_and_reports_counts() {
        let store = Arc::new(InMemoryGraphStore::new());
        let writer = GraphWriter::new(store.clone(), fast_config());

        let outcome = writer.write(batch()).await;

        assert!(outcome.fully_committed());
        assert_eq!(outcome.entities_written, 2);
        assert_eq!(outcome.relationships_written, 1);
        assert_eq!(outcome.chunks_written, 2);

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.entity_count, 2);
        assert_eq!(stats.relationship_count, 1);
        assert_eq!(stats.chunk_count, 2);
    }

    #[tokio::test]
    async fn reapplying_identical_batch_is_a_no_op() {
        let store = Arc::new(InMemoryGraphStore::new());
        let writer = GraphWriter::new(store.clone(), fast_config());

        writer.write(batch()).await;
        let outcome = writer.write(batch()).await;

        assert!(outcome.fully_committed());
        let stats = store.stats().await.unwrap();
        assert_eq!(stats.entity_count, 2);
        assert_eq!(stats.relationship_count, 1);
        assert_eq!(stats.chunk_count, 2);
    }

    #[tokio::test]
    async fn transient_failures_are_retried_to_success() {
        let store = Arc::new(InMemoryGraphStore::new());
        store.fail_transient(2);
        let writer = GraphWriter::new(store.clone(), fast_config());

        let outcome = writer.write(batch()).await;

        assert!(outcome.fully_committed());
        assert!(store.apply_calls() >= 3);
        assert_eq!(store.stats().await.unwrap().entity_count, 2);
    }

    #[tokio::test]
    async fn exhausted_retries_leave_the_batch_for_replay() {
        let store = Arc::new(InMemoryGraphStore::new());
        store.fail_transient(100);
        let writer = GraphWriter::new(store.clone(), fast_config());

        let outcome = writer.write(batch()).await;

        assert!(!outcome.fully_committed());
        // Both the node transaction and the dependent relationship
        // transaction are reported, with their contents intact.
        assert_eq!(outcome.failures.len(), 2);
        assert_eq!(outcome.failures[0].batch.entities.len(), 2);
        assert!(outcome.failures[1].error.contains("skipped"));
        assert_eq!(outcome.failures[1].batch.relationships.len(), 1);
        assert_eq!(store.stats().await.unwrap().entity_count, 0);
    }

    #[tokio::test]
    async fn permanent_failures_are_not_retried() {
        let store = Arc::new(InMemoryGraphStore::new());
        store.fail_permanent(1);
        let writer = GraphWriter::new(store.clone(), fast_config());

        let outcome = writer
            .write(WriteBatch {
                entities: vec![entity("e1", "acme")],
                ..WriteBatch::default()
            })
            .await;

        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(store.apply_calls(), 1, "permanent errors must not burn retries");
    }

    #[tokio::test]
    async fn small_transactions_preserve_referential_ordering() {
        let store = Arc::new(InMemoryGraphStore::new());
        // Batch size 1 forces entities and relationships into separate
        // transactions; the in-memory store rejects any relationship
        // whose endpoints have not been applied yet.
        let writer = GraphWriter::new(
            store.clone(),
            WriterConfig {
                max_batch_size: 1,
                ..fast_config()
            },
        );

        let outcome = writer.write(batch()).await;

        assert!(outcome.fully_committed());
        assert_eq!(store.stats().await.unwrap().relationship_count, 1);
    }
}
