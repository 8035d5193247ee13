pub mod document;
pub mod reader;

pub use document::{Annotation, Document};
pub use reader::FileReader;

use anyhow::Result;
use std::path::Path;

/// Load annotated documents from a single file or a directory of files
pub async fn ingest_path(path: &Path) -> Result<Vec<Document>> {
    if path.is_dir() {
        FileReader::read_directory(path).await
    } else {
        FileReader::read_file(path).await
    }
}
