use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

pub struct Metrics {
    // Requests
    total_requests: AtomicUsize,
    successful_requests: AtomicUsize,
    failed_requests: AtomicUsize,

    // Runs
    total_runs: AtomicUsize,
    total_run_time_ms: AtomicU64,

    // Counts across all runs
    documents_processed: AtomicUsize,
    documents_failed: AtomicUsize,
    entities_extracted: AtomicUsize,
    duplicates_found: AtomicUsize,
    nodes_created: AtomicUsize,
    relationships_created: AtomicUsize,
    write_failures: AtomicUsize,
}

impl Metrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            total_requests: AtomicUsize::new(0),
            successful_requests: AtomicUsize::new(0),
            failed_requests: AtomicUsize::new(0),
            total_runs: AtomicUsize::new(0),
            total_run_time_ms: AtomicU64::new(0),
            documents_processed: AtomicUsize::new(0),
            documents_failed: AtomicUsize::new(0),
            entities_extracted: AtomicUsize::new(0),
            duplicates_found: AtomicUsize::new(0),
            nodes_created: AtomicUsize::new(0),
            relationships_created: AtomicUsize::new(0),
            write_failures: AtomicUsize::new(0),
        })
    }

    pub fn record_request(&self, success: bool) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        if success {
            self.successful_requests.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed_requests.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_run(&self, report: &index::RunReport) {
        self.total_runs.fetch_add(1, Ordering::Relaxed);
        self.total_run_time_ms.fetch_add(report.elapsed_ms, Ordering::Relaxed);
        self.documents_processed.fetch_add(report.documents_processed, Ordering::Relaxed);
        self.documents_failed.fetch_add(report.document_failures.len(), Ordering::Relaxed);
        self.entities_extracted.fetch_add(report.entities_extracted, Ordering::Relaxed);
        self.duplicates_found.fetch_add(report.duplicates.len(), Ordering::Relaxed);
        self.nodes_created.fetch_add(report.nodes_created, Ordering::Relaxed);
        self.relationships_created.fetch_add(report.relationships_created, Ordering::Relaxed);
        self.write_failures.fetch_add(report.persistence_failures.len(), Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let total_runs = self.total_runs.load(Ordering::Relaxed);
        let total_run_time_ms = self.total_run_time_ms.load(Ordering::Relaxed);

        MetricsSnapshot {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            successful_requests: self.successful_requests.load(Ordering::Relaxed),
            failed_requests: self.failed_requests.load(Ordering::Relaxed),
            total_runs,
            avg_run_time_ms: if total_runs > 0 {
                total_run_time_ms as f64 / total_runs as f64
            } else {
                0.0
            },
            documents_processed: self.documents_processed.load(Ordering::Relaxed),
            documents_failed: self.documents_failed.load(Ordering::Relaxed),
            entities_extracted: self.entities_extracted.load(Ordering::Relaxed),
            duplicates_found: self.duplicates_found.load(Ordering::Relaxed),
            nodes_created: self.nodes_created.load(Ordering::Relaxed),
            relationships_created: self.relationships_created.load(Ordering::Relaxed),
            write_failures: self.write_failures.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct MetricsSnapshot {
    pub total_requests: usize,
    pub successful_requests: usize,
    pub failed_requests: usize,
    pub total_runs: usize,
    pub avg_run_time_ms: f64,
    pub documents_processed: usize,
    pub documents_failed: usize,
    pub entities_extracted: usize,
    pub duplicates_found: usize,
    pub nodes_created: usize,
    pub relationships_created: usize,
    pub write_failures: usize,
}
