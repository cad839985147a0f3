use serde::Serialize;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use pipeline::{ProcessReport, ProcessStatus};

pub struct Metrics {
    // Counters
    documents_processed: AtomicUsize,
    documents_partial: AtomicUsize,
    documents_failed: AtomicUsize,

    chunks_processed: AtomicUsize,
    chunk_failures: AtomicUsize,
    entities_written: AtomicUsize,
    relationships_written: AtomicUsize,

    // Timing (in microseconds)
    total_process_time_us: AtomicU64,
}

impl Metrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            documents_processed: AtomicUsize::new(0),
            documents_partial: AtomicUsize::new(0),
            documents_failed: AtomicUsize::new(0),
            chunks_processed: AtomicUsize::new(0),
            chunk_failures: AtomicUsize::new(0),
            entities_written: AtomicUsize::new(0),
            relationships_written: AtomicUsize::new(0),
            total_process_time_us: AtomicU64::new(0),
        })
    }

    pub fn record_process(&self, report: &ProcessReport, duration: std::time::Duration) {
        self.documents_processed.fetch_add(1, Ordering::Relaxed);
        match report.status {
            ProcessStatus::Partial => {
                self.documents_partial.fetch_add(1, Ordering::Relaxed);
            }
            ProcessStatus::Failed => {
                self.documents_failed.fetch_add(1, Ordering::Relaxed);
            }
            _ => {}
        }
        self.chunks_processed
            .fetch_add(report.chunk_count, Ordering::Relaxed);
        self.chunk_failures
            .fetch_add(report.chunk_failures.len(), Ordering::Relaxed);
        self.entities_written
            .fetch_add(report.canonical_entity_count, Ordering::Relaxed);
        self.relationships_written
            .fetch_add(report.canonical_relationship_count, Ordering::Relaxed);
        self.total_process_time_us
            .fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let documents = self.documents_processed.load(Ordering::Relaxed);
        let total_us = self.total_process_time_us.load(Ordering::Relaxed) as f64;
        MetricsSnapshot {
            documents_processed: documents,
            documents_partial: self.documents_partial.load(Ordering::Relaxed),
            documents_failed: self.documents_failed.load(Ordering::Relaxed),
            chunks_processed: self.chunks_processed.load(Ordering::Relaxed),
            chunk_failures: self.chunk_failures.load(Ordering::Relaxed),
            entities_written: self.entities_written.load(Ordering::Relaxed),
            relationships_written: self.relationships_written.load(Ordering::Relaxed),
            avg_process_time_ms: if documents > 0 {
                total_us / documents as f64 / 1000.0
            } else {
                0.0
            },
        }
    }
}

#[derive(Debug, Serialize)]
pub struct MetricsSnapshot {
    pub documents_processed: usize,
    pub documents_partial: usize,
    pub documents_failed: usize,
    pub chunks_processed: usize,
    pub chunk_failures: usize,
    pub entities_written: usize,
    pub relationships_written: usize,
    pub avg_process_time_ms: f64,
}

pub struct TimedOperation {
    start: Instant,
}

impl TimedOperation {
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> std::time::Duration {
        self.start.elapsed()
    }
}
