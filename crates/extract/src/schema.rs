use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of an entity: two mentions are the same entity iff type and
/// surface are equal. Offsets and document never take part.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityKey {
    #[serde(rename = "type")]
    pub entity_type: String,
    pub surface: String,
}

impl EntityKey {
    pub fn new(entity_type: impl Into<String>, surface: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            surface: surface.into(),
        }
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {:?})", self.entity_type, self.surface)
    }
}

/// One entity mention. Compare mentions through [`Entity::key`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    #[serde(rename = "type")]
    pub entity_type: String,
    pub surface: String,
    /// Character offsets of the originating span
    pub start: usize,
    pub end: usize,
}

impl Entity {
    pub fn key(&self) -> EntityKey {
        EntityKey::new(self.entity_type.clone(), self.surface.clone())
    }
}

/// Co-occurrence of two consecutive mentions in one document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Relationship {
    pub source: Entity,
    pub target: Entity,
    /// Id of the document both mentions come from
    pub context: String,
}

/// Entities and relationships produced from a single document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DocumentGraph {
    pub document_id: String,
    pub entities: Vec<Entity>,
    pub relationships: Vec<Relationship>,
}
