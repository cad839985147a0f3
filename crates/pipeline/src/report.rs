use chrono::{DateTime, Utc};
use extract::ChunkFailure;
use resolve::RelationshipConflict;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessStatus {
    /// Every chunk extracted and every transaction committed.
    Succeeded,
    /// The document is in the graph, but some chunks or write batches
    /// failed and are listed below.
    Partial,
    /// Nothing was committed for this run.
    Failed,
    Cancelled,
}

/// A write transaction that exhausted its retries. The full batch is
/// retained by the writer for replay; the report carries the summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchFailureReport {
    pub batch_ordinal: usize,
    pub error: String,
}

/// Structured result of one `process` invocation. Failures are data,
/// never a bare exception without document context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessReport {
    pub document_id: String,
    pub run_id: Uuid,
    pub status: ProcessStatus,
    pub chunk_count: usize,
    pub canonical_entity_count: usize,
    pub canonical_relationship_count: usize,
    pub chunk_failures: Vec<ChunkFailure>,
    pub batch_failures: Vec<BatchFailureReport>,
    /// Relationship claims that could not be reconciled and need
    /// external review.
    pub conflicts: Vec<RelationshipConflict>,
    /// Run-level error when the status is `Failed`.
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl ProcessReport {
    pub fn started(document_id: &str) -> Self {
        Self {
            document_id: document_id.to_string(),
            run_id: Uuid::new_v4(),
            status: ProcessStatus::Succeeded,
            chunk_count: 0,
            canonical_entity_count: 0,
            canonical_relationship_count: 0,
            chunk_failures: Vec::new(),
            batch_failures: Vec::new(),
            conflicts: Vec::new(),
            error: None,
            started_at: Utc::now(),
            finished_at: Utc::now(),
        }
    }

    pub fn finish(mut self) -> Self {
        if self.status == ProcessStatus::Succeeded
            && (!self.chunk_failures.is_empty() || !self.batch_failures.is_empty())
        {
            self.status = ProcessStatus::Partial;
        }
        self.finished_at = Utc::now();
        self
    }

    pub fn failed(mut self, error: String) -> Self {
        self.status = ProcessStatus::Failed;
        self.error = Some(error);
        self.finished_at = Utc::now();
        self
    }

    pub fn cancelled(mut self) -> Self {
        self.status = ProcessStatus::Cancelled;
        self.finished_at = Utc::now();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finish_downgrades_to_partial_on_failures() {
        let mut report = ProcessReport::started("doc-1");
        report.chunk_failures.push(ChunkFailure {
            chunk_id: "c1".into(),
            ordinal: 0,
            error: "boom".into(),
            schema_violation: true,
        });
        assert_eq!(report.finish().status, ProcessStatus::Partial);
    }

    #[test]
    fn clean_finish_stays_succeeded() {
        let report = ProcessReport::started("doc-1").finish();
        assert_eq!(report.status, ProcessStatus::Succeeded);
    }
}
