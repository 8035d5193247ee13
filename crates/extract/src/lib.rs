//! Entity and co-occurrence extraction from annotated documents.
//!
//! Documents go through [`GraphAssembler`] (span extraction and relationship
//! building per document), then [`EntityNormalizer`] collapses mentions
//! into one entity per `(type, surface)`.

pub mod assembler;
pub mod error;
pub mod normalizer;
pub mod relationship;
pub mod schema;
pub mod span;

pub use assembler::{AssemblerConfig, Assembly, DocumentFailure, GraphAssembler};
pub use error::{ExtractError, ExtractResult};
pub use normalizer::{DuplicateEntry, EntityNormalizer, NormalizedEntities};
pub use relationship::build_relationships;
pub use schema::{DocumentGraph, Entity, EntityKey, Relationship};
pub use span::{CharOffsets, extract_entity};
