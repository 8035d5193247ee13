use crate::schema::{Entity, Relationship};

/// Link each mention to the next one in occurrence order.
///
/// `entities` must already be ordered by span start. Adjacent mentions of
/// the same entity still produce a (self-referential) relationship.
pub fn build_relationships(entities: &[Entity], document_id: &str) -> Vec<Relationship> {
    entities
        .windows(2)
        .map(|pair| Relationship {
            source: pair[0].clone(),
            target: pair[1].clone(),
            context: document_id.to_string(),
        })
        .collect()
}
