use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// One entity span assigned by the upstream NER step.
///
/// Offsets are character positions into the owning document's content,
/// half-open: `start..end`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Annotation {
    #[serde(rename = "type")]
    pub entity_type: String,
    pub start: usize,
    pub end: usize,
}

impl Annotation {
    pub fn new(entity_type: impl Into<String>, start: usize, end: usize) -> Self {
        Self {
            entity_type: entity_type.into(),
            start,
            end,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "DocumentRecord")]
pub struct Document {
    pub id: String,
    pub content: String,
    pub annotations: Vec<Annotation>,
    pub meta: BTreeMap<String, String>,
}

impl Document {
    /// Build a document whose id is derived from its content.
    pub fn new(content: String) -> Self {
        let id = Self::generate_id(&content);
        Self {
            id,
            content,
            annotations: Vec::new(),
            meta: BTreeMap::new(),
        }
    }

    pub fn with_id(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            annotations: Vec::new(),
            meta: BTreeMap::new(),
        }
    }

    pub fn with_annotations(mut self, annotations: Vec<Annotation>) -> Self {
        self.annotations = annotations;
        self
    }

    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.meta.insert(key.into(), value.into());
        self
    }

    fn generate_id(content: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(content.as_bytes());
        let result = hasher.finalize();
        hex::encode(&result[..16]) // Use first 16 bytes (32 hex chars)
    }
}

/// On-disk shape: the id may be omitted and is then derived from the content.
#[derive(Debug, Deserialize)]
struct DocumentRecord {
    #[serde(default)]
    id: Option<String>,
    content: String,
    #[serde(default)]
    annotations: Vec<Annotation>,
    #[serde(default)]
    meta: BTreeMap<String, String>,
}

impl From<DocumentRecord> for Document {
    fn from(record: DocumentRecord) -> Self {
        let id = record
            .id
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| Self::generate_id(&record.content));

        Self {
            id,
            content: record.content,
            annotations: record.annotations,
            meta: record.meta,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_id_is_stable() {
        let a = Document::new("Apple hired John in Paris".to_string());
        let b = Document::new("Apple hired John in Paris".to_string());
        let c = Document::new("Apple hired Jane in Paris".to_string());

        assert_eq!(a.id, b.id);
        assert_ne!(a.id, c.id);
        assert_eq!(a.id.len(), 32);
    }

    #[test]
    fn test_annotation_type_field() {
        let json = r#"{"type": "ORG", "start": 0, "end": 5}"#;
        let annotation: Annotation = serde_json::from_str(json).unwrap();
        assert_eq!(annotation, Annotation::new("ORG", 0, 5));
    }

    #[test]
    fn test_negative_offsets_rejected_at_ingress() {
        let json = r#"{"type": "ORG", "start": -1, "end": 5}"#;
        assert!(serde_json::from_str::<Annotation>(json).is_err());
    }

    #[test]
    fn test_missing_id_gets_content_hash() {
        let json = r#"{"content": "Apple", "annotations": [{"type": "ORG", "start": 0, "end": 5}]}"#;
        let doc: Document = serde_json::from_str(json).unwrap();

        assert_eq!(doc.id, Document::new("Apple".to_string()).id);
        assert_eq!(doc.annotations.len(), 1);
    }
}
