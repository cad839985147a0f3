use std::collections::BTreeSet;
use std::sync::Arc;

use extract::{EmbedderClient, ExtractorClient, Orchestrator};
use index::{
    ChunkRecord, GraphStore, GraphWriter, VectorIndex, VectorIndexManager, WriteBatch,
};
use ingest::{Chunker, NormalizedDocument};
use resolve::{EntityResolver, RelationshipMerger};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::report::{BatchFailureReport, ProcessReport};

/// End-to-end engine for one or more documents: chunk, extract and
/// embed concurrently, resolve entities against committed graph state,
/// merge relationships, write transactionally, sync the vector index.
///
/// Convergence between concurrently processed documents that mention
/// the same real-world entity does not rely on locks: resolution
/// re-reads committed state, and canonical ids are content-derived so
/// the writer's keyed upserts land on the same node.
pub struct DocumentProcessor {
    chunker: Chunker,
    orchestrator: Orchestrator,
    resolver: EntityResolver,
    merger: RelationshipMerger,
    writer: GraphWriter,
    vectors: VectorIndexManager,
}

impl DocumentProcessor {
    /// Fails fast on configuration errors, before any external call.
    pub fn new(
        config: PipelineConfig,
        extractor: Arc<dyn ExtractorClient>,
        embedder: Arc<dyn EmbedderClient>,
        store: Arc<dyn GraphStore>,
        vector_index: Arc<dyn VectorIndex>,
    ) -> Result<Self, PipelineError> {
        config.validate()?;

        Ok(Self {
            chunker: Chunker::new(config.chunker),
            orchestrator: Orchestrator::new(config.extraction, extractor, embedder),
            resolver: EntityResolver::new(config.resolver),
            merger: RelationshipMerger::new(config.relationships),
            writer: GraphWriter::new(store, config.writer),
            vectors: VectorIndexManager::new(vector_index, config.vector),
        })
    }

    pub async fn process(&self, doc: &NormalizedDocument) -> ProcessReport {
        self.process_cancellable(doc, CancellationToken::new())
            .await
    }

    /// Process one document. Cancellation is honored at every
    /// suspension point; a cancelled run discards partial extraction
    /// results and commits nothing further.
    pub async fn process_cancellable(
        &self,
        doc: &NormalizedDocument,
        cancel: CancellationToken,
    ) -> ProcessReport {
        let mut report = ProcessReport::started(&doc.document_id);
        info!(doc_id = %doc.document_id, run_id = %report.run_id, "processing document");

        // Chunking is synchronous and pure.
        let chunks = self.chunker.chunk_document(doc);
        report.chunk_count = chunks.len();
        if chunks.is_empty() {
            return report.finish();
        }

        if cancel.is_cancelled() {
            return report.cancelled();
        }

        // External extraction and embedding, bounded concurrency.
        // Dropping the future on cancellation aborts the in-flight
        // chunk tasks, so nothing partial survives.
        let extraction = tokio::select! {
            _ = cancel.cancelled() => return report.cancelled(),
            extraction = self.orchestrator.extract_document(&doc.document_id, &chunks) => extraction,
        };
        report.chunk_failures = extraction.failures.clone();

        // Barrier reached: every chunk has returned or failed. Only
        // now can transitive merging see the full candidate set.
        let candidates = extraction.candidate_entities();
        let chunk_embeddings = extraction.embeddings_by_chunk();

        let name_keys: Vec<String> = candidates
            .iter()
            .map(|c| self.resolver.normalizer().normalize(&c.name))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let existing = tokio::select! {
            _ = cancel.cancelled() => return report.cancelled(),
            result = self.writer.store().find_matching_entities(&name_keys) => {
                match result {
                    Ok(existing) => existing,
                    Err(e) => {
                        let e = PipelineError::store("candidate-match lookup", e);
                        return report.failed(e.to_string());
                    }
                }
            }
        };

        let plan = self
            .resolver
            .resolve(&candidates, &chunk_embeddings, &existing);

        let mut relevant_ids: Vec<String> =
            plan.entities.iter().map(|e| e.id.clone()).collect();
        relevant_ids.extend(existing.iter().map(|e| e.id.clone()));
        relevant_ids.sort();
        relevant_ids.dedup();

        let existing_relationships = tokio::select! {
            _ = cancel.cancelled() => return report.cancelled(),
            result = self.writer.store().find_relationships(&relevant_ids) => {
                match result {
                    Ok(rels) => rels,
                    Err(e) => {
                        let e = PipelineError::store("relationship lookup", e);
                        return report.failed(e.to_string());
                    }
                }
            }
        };

        let merged = self.merger.merge(
            &extraction.candidate_relationships(),
            &plan,
            &existing_relationships,
        );
        report.conflicts = merged.conflicts;

        let batch = WriteBatch {
            entities: plan.entities,
            relationships: merged.relationships,
            chunks: extraction
                .extractions
                .iter()
                .filter_map(|e| {
                    chunks
                        .iter()
                        .find(|c| c.chunk_id == e.chunk_id)
                        .map(|chunk| ChunkRecord {
                            chunk: chunk.clone(),
                            embedding: e.embedding.clone(),
                        })
                })
                .collect(),
        };

        // Last cancellation point: once the writer starts, committed
        // transactions stand (they are consistent, keyed units) and
        // the rest is reported for replay.
        if cancel.is_cancelled() {
            return report.cancelled();
        }

        let outcome = self.writer.write(batch.clone()).await;
        report.canonical_entity_count = outcome.entities_written;
        report.canonical_relationship_count = outcome.relationships_written;
        report.batch_failures = outcome
            .failures
            .iter()
            .map(|f| BatchFailureReport {
                batch_ordinal: f.batch_ordinal,
                error: f.error.clone(),
            })
            .collect();

        // The vector index is a derived view of committed writes; it
        // lags behind but never runs ahead of the store.
        if outcome.fully_committed() {
            if let Err(e) = self.vectors.sync_batch(&batch).await {
                warn!(doc_id = %doc.document_id, error = %e, "vector index sync failed");
                report.batch_failures.push(BatchFailureReport {
                    batch_ordinal: usize::MAX,
                    error: format!("vector index sync: {e}"),
                });
            }
        }

        info!(
            doc_id = %doc.document_id,
            entities = report.canonical_entity_count,
            relationships = report.canonical_relationship_count,
            chunk_failures = report.chunk_failures.len(),
            batch_failures = report.batch_failures.len(),
            "document processed"
        );
        report.finish()
    }

    /// Process documents concurrently with independent workers. One
    /// document's failure never aborts a sibling; reports come back in
    /// input order.
    pub async fn process_many(self: &Arc<Self>, docs: Vec<NormalizedDocument>) -> Vec<ProcessReport> {
        let mut set = JoinSet::new();
        let doc_ids: Vec<String> = docs.iter().map(|d| d.document_id.clone()).collect();

        for (idx, doc) in docs.into_iter().enumerate() {
            let this = Arc::clone(self);
            set.spawn(async move { (idx, this.process(&doc).await) });
        }

        let mut slots: Vec<Option<ProcessReport>> = doc_ids.iter().map(|_| None).collect();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((idx, report)) => slots[idx] = Some(report),
                Err(e) => warn!(error = %e, "document worker aborted"),
            }
        }

        slots
            .into_iter()
            .enumerate()
            .map(|(idx, slot)| {
                slot.unwrap_or_else(|| {
                    ProcessReport::started(&doc_ids[idx])
                        .failed("document worker aborted before producing a report".into())
                })
            })
            .collect()
    }

    pub fn vectors(&self) -> &VectorIndexManager {
        &self.vectors
    }

    pub fn store(&self) -> &Arc<dyn GraphStore> {
        self.writer.store()
    }
}
