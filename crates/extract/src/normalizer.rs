use serde::Serialize;
use std::collections::HashMap;

use crate::schema::{Entity, EntityKey};

/// An entity seen more than once across the batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DuplicateEntry {
    pub entity: EntityKey,
    pub occurrence_count: usize,
}

#[derive(Debug, Clone, Default)]
pub struct NormalizedEntities {
    /// One canonical mention per identity, in first-seen order
    pub entities: Vec<Entity>,
    /// Ordered by where each identity was first seen a second time
    pub duplicates: Vec<DuplicateEntry>,
}

impl NormalizedEntities {
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn contains(&self, key: &EntityKey) -> bool {
        self.entities.iter().any(|e| &e.key() == key)
    }
}

/// Collapses mentions with the same (type, surface) into one entity.
#[derive(Debug, Default)]
pub struct EntityNormalizer;

impl EntityNormalizer {
    pub fn new() -> Self {
        Self
    }

    /// The first mention of each identity becomes the canonical one.
    /// Relationships are left untouched; they keep their own mentions and
    /// resolve to nodes by key at persistence time.
    pub fn normalize(&self, entities: Vec<Entity>) -> NormalizedEntities {
        let mut counts: HashMap<EntityKey, usize> = HashMap::new();
        let mut duplicate_order: Vec<EntityKey> = Vec::new();
        let mut canonical = Vec::new();

        for entity in entities {
            let key = entity.key();
            let count = counts.entry(key.clone()).or_insert(0);
            *count += 1;

            match *count {
                1 => canonical.push(entity),
                2 => {
                    tracing::debug!(entity = %key, "Duplicated entity");
                    duplicate_order.push(key);
                }
                _ => tracing::debug!(entity = %key, "Duplicated entity"),
            }
        }

        let duplicates = duplicate_order
            .into_iter()
            .map(|key| {
                let occurrence_count = counts[&key];
                DuplicateEntry {
                    entity: key,
                    occurrence_count,
                }
            })
            .collect();

        NormalizedEntities {
            entities: canonical,
            duplicates,
        }
    }
}
