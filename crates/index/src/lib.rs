pub mod gateway;
pub mod memory_store;
pub mod neo4j_index;
pub mod retry;
pub mod store;

pub use gateway::{PersistenceConfig, PersistenceFailure, PersistenceGateway, PersistenceReport};
pub use memory_store::InMemoryGraphStore;
pub use neo4j_index::Neo4jStore;
pub use retry::RetryPolicy;
pub use store::{
    EdgeCommand, GraphCommand, GraphStats, GraphStore, NodeRef, NodeWrite, StoreError,
};

use extract::{AssemblerConfig, DocumentFailure, DuplicateEntry, EntityNormalizer, GraphAssembler};
use ingest::Document;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

/// Outcome of one batch run. Every document, duplicate and failed write
/// shows up here.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub documents_processed: usize,
    pub document_failures: Vec<DocumentFailure>,
    pub entities_extracted: usize,
    pub distinct_entities: usize,
    pub duplicates: Vec<DuplicateEntry>,
    pub nodes_created: usize,
    pub nodes_existing: usize,
    pub relationships_extracted: usize,
    pub relationships_created: usize,
    pub persistence_failures: Vec<PersistenceFailure>,
    pub elapsed_ms: u64,
}

/// Documents in, graph out: assemble, normalize, persist.
pub struct GraphPipeline {
    assembler: GraphAssembler,
    normalizer: EntityNormalizer,
    gateway: PersistenceGateway,
}

impl GraphPipeline {
    pub fn new(
        store: Arc<dyn GraphStore>,
        assembler: AssemblerConfig,
        persistence: PersistenceConfig,
    ) -> Self {
        Self {
            assembler: GraphAssembler::new(assembler),
            normalizer: EntityNormalizer::new(),
            gateway: PersistenceGateway::new(store, persistence),
        }
    }

    pub async fn run(&self, documents: Vec<Document>) -> RunReport {
        let run_id = Uuid::new_v4();
        let started = Instant::now();
        tracing::info!(%run_id, documents = documents.len(), "Starting graph run");

        let assembly = self.assembler.assemble_concurrent(documents).await;
        let entities_extracted = assembly.entities.len();
        let relationships = assembly.relationships;

        let normalized = self.normalizer.normalize(assembly.entities);
        if !normalized.duplicates.is_empty() {
            tracing::info!(
                %run_id,
                duplicated = normalized.duplicates.len(),
                "Collapsed duplicate entities"
            );
        }

        let persistence = self
            .gateway
            .persist(&normalized.entities, &relationships)
            .await;

        let report = RunReport {
            run_id,
            documents_processed: assembly.documents_processed,
            document_failures: assembly.failures,
            entities_extracted,
            distinct_entities: normalized.entities.len(),
            duplicates: normalized.duplicates,
            nodes_created: persistence.nodes_created,
            nodes_existing: persistence.nodes_existing,
            relationships_extracted: relationships.len(),
            relationships_created: persistence.edges_created,
            persistence_failures: persistence.failures,
            elapsed_ms: started.elapsed().as_millis() as u64,
        };

        tracing::info!(
            %run_id,
            documents = report.documents_processed,
            failed_documents = report.document_failures.len(),
            entities = report.distinct_entities,
            duplicates = report.duplicates.len(),
            relationships = report.relationships_created,
            failed_writes = report.persistence_failures.len(),
            elapsed_ms = report.elapsed_ms,
            "Graph run complete"
        );
        report
    }

    pub async fn stats(&self) -> Result<GraphStats, StoreError> {
        self.gateway.store().stats().await
    }
}
