use ingest::Annotation;

use crate::error::{ExtractError, ExtractResult};
use crate::schema::Entity;

/// Maps character offsets of a text to byte offsets.
///
/// Built once per document so every span slices in O(1).
pub struct CharOffsets<'a> {
    text: &'a str,
    /// Byte offset of every char, plus `text.len()` as the final boundary
    boundaries: Vec<usize>,
}

impl<'a> CharOffsets<'a> {
    pub fn new(text: &'a str) -> Self {
        let mut boundaries: Vec<usize> = text.char_indices().map(|(i, _)| i).collect();
        boundaries.push(text.len());
        Self { text, boundaries }
    }

    /// Length of the text in chars
    pub fn char_len(&self) -> usize {
        self.boundaries.len() - 1
    }

    pub fn slice(&self, start: usize, end: usize) -> Option<&'a str> {
        if start > end || end > self.char_len() {
            return None;
        }
        Some(&self.text[self.boundaries[start]..self.boundaries[end]])
    }

    pub fn extract(&self, annotation: &Annotation) -> ExtractResult<Entity> {
        let surface = self
            .slice(annotation.start, annotation.end)
            .ok_or_else(|| ExtractError::OutOfRangeSpan {
                entity_type: annotation.entity_type.clone(),
                start: annotation.start,
                end: annotation.end,
                text_len: self.char_len(),
            })?;

        Ok(Entity {
            entity_type: annotation.entity_type.clone(),
            surface: surface.to_string(),
            start: annotation.start,
            end: annotation.end,
        })
    }
}

/// Materialize the entity an annotation covers in `text`.
pub fn extract_entity(annotation: &Annotation, text: &str) -> ExtractResult<Entity> {
    CharOffsets::new(text).extract(annotation)
}
