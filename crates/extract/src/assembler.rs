use ingest::{Annotation, Document};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::error::{ExtractError, ExtractResult};
use crate::relationship::build_relationships;
use crate::schema::{DocumentGraph, Entity, Relationship};
use crate::span::CharOffsets;

#[derive(Debug, Clone)]
pub struct AssemblerConfig {
    pub max_concurrent_documents: usize,
}

impl Default for AssemblerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_documents: 5,
        }
    }
}

/// A document whose contribution was dropped from the batch
#[derive(Debug, Clone, Serialize)]
pub struct DocumentFailure {
    pub document_id: String,
    pub error: String,
    #[serde(skip)]
    pub kind: ExtractError,
}

impl DocumentFailure {
    fn new(document_id: String, kind: ExtractError) -> Self {
        Self {
            document_id,
            error: kind.to_string(),
            kind,
        }
    }
}

/// Batch-wide accumulation of per-document results.
#[derive(Debug, Clone, Default)]
pub struct Assembly {
    pub entities: Vec<Entity>,
    pub relationships: Vec<Relationship>,
    pub failures: Vec<DocumentFailure>,
    pub documents_processed: usize,
}

impl Assembly {
    /// The single point where document results join the batch.
    fn merge(&mut self, document_id: String, result: ExtractResult<DocumentGraph>) {
        self.documents_processed += 1;

        match result {
            Ok(graph) => {
                self.entities.extend(graph.entities);
                self.relationships.extend(graph.relationships);
            }
            Err(error) => {
                tracing::warn!(document_id = %document_id, error = %error, "Skipping document");
                self.failures.push(DocumentFailure::new(document_id, error));
            }
        }
    }

    pub fn documents_succeeded(&self) -> usize {
        self.documents_processed - self.failures.len()
    }
}

pub struct GraphAssembler {
    config: AssemblerConfig,
}

impl GraphAssembler {
    pub fn new(config: AssemblerConfig) -> Self {
        Self { config }
    }

    /// Turn one document's annotations into entities and relationships.
    ///
    /// Any bad span fails the whole document so a partial mention sequence
    /// never yields relationships between non-adjacent mentions.
    pub fn process_document(document: &Document) -> ExtractResult<DocumentGraph> {
        let mut annotations: Vec<&Annotation> = document.annotations.iter().collect();
        // stable: ties keep annotation order
        annotations.sort_by_key(|a| a.start);

        let offsets = CharOffsets::new(&document.content);
        let entities = annotations
            .into_iter()
            .map(|annotation| offsets.extract(annotation))
            .collect::<ExtractResult<Vec<Entity>>>()?;

        let relationships = build_relationships(&entities, &document.id);

        Ok(DocumentGraph {
            document_id: document.id.clone(),
            entities,
            relationships,
        })
    }

    pub fn assemble(&self, documents: Vec<Document>) -> Assembly {
        let mut assembly = Assembly::default();

        for document in documents {
            let result = Self::process_document(&document);
            assembly.merge(document.id, result);
        }

        tracing::info!(
            documents = assembly.documents_processed,
            failed = assembly.failures.len(),
            entities = assembly.entities.len(),
            relationships = assembly.relationships.len(),
            "Assembled graph"
        );
        assembly
    }

    /// Same result as [`assemble`](Self::assemble), with documents processed
    /// on separate tasks and merged back in input order.
    pub async fn assemble_concurrent(&self, documents: Vec<Document>) -> Assembly {
        self.assemble_with(documents, Self::process_document).await
    }

    /// Run `process` on every document, at most `max_concurrent_documents`
    /// at a time.
    async fn assemble_with<F>(&self, documents: Vec<Document>, process: F) -> Assembly
    where
        F: Fn(&Document) -> ExtractResult<DocumentGraph> + Send + Sync + 'static,
    {
        let process = Arc::new(process);
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_documents.max(1)));
        let document_ids: Vec<String> = documents.iter().map(|d| d.id.clone()).collect();
        let mut tasks = JoinSet::new();

        for (idx, document) in documents.into_iter().enumerate() {
            let semaphore = semaphore.clone();
            let process = process.clone();
            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                (idx, (*process)(&document))
            });
        }

        let mut results: Vec<Option<ExtractResult<DocumentGraph>>> =
            document_ids.iter().map(|_| None).collect();

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((idx, result)) => results[idx] = Some(result),
                Err(e) => tracing::error!(error = %e, "Document worker failed"),
            }
        }

        let mut assembly = Assembly::default();
        for (document_id, result) in document_ids.into_iter().zip(results) {
            let result = result.unwrap_or_else(|| {
                Err(ExtractError::WorkerFailed(format!(
                    "no result for document {}",
                    document_id
                )))
            });
            assembly.merge(document_id, result);
        }

        tracing::info!(
            documents = assembly.documents_processed,
            failed = assembly.failures.len(),
            entities = assembly.entities.len(),
            relationships = assembly.relationships.len(),
            "Assembled graph"
        );
        assembly
    }
}

impl Default for GraphAssembler {
    fn default() -> Self {
        Self::new(AssemblerConfig::default())
    }
}
