use anyhow::{Context, Result};
use std::path::Path;
use tokio::fs;
use walkdir::WalkDir;

use crate::document::Document;

pub struct FileReader;

impl FileReader {
    /// Read the documents stored in one file.
    ///
    /// `.json` holds an array of documents, `.jsonl` one document per line,
    /// `.tsv`/`.csv` the news corpus layout without annotations (tab and
    /// comma separated respectively).
    pub async fn read_file(path: &Path) -> Result<Vec<Document>> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("");

        let content = match extension {
            "json" | "jsonl" | "tsv" | "csv" => fs::read_to_string(path)
                .await
                .context(format!("Failed to read file: {:?}", path))?,
            _ => anyhow::bail!("Unsupported file format: {}", extension),
        };

        let documents = match extension {
            "json" => parse_json(&content),
            "jsonl" => parse_jsonl(&content),
            "tsv" => parse_tsv(&content),
            _ => parse_csv(&content),
        }
        .context(format!("Failed to parse documents in {:?}", path))?;

        tracing::debug!(path = %path.display(), documents = documents.len(), "Read documents");
        Ok(documents)
    }

    pub async fn read_directory(dir: &Path) -> Result<Vec<Document>> {
        let mut paths = Vec::new();

        for entry in WalkDir::new(dir).sort_by_file_name() {
            let entry = entry.context(format!("Failed to walk directory: {:?}", dir))?;
            let path = entry.path();

            if path.is_file() && is_supported(path) {
                paths.push(path.to_path_buf());
            }
        }

        let mut documents = Vec::new();
        for path in paths {
            documents.extend(Self::read_file(&path).await?);
        }

        Ok(documents)
    }
}

fn is_supported(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("json" | "jsonl" | "tsv" | "csv")
    )
}

pub fn parse_json(content: &str) -> Result<Vec<Document>> {
    let documents: Vec<Document> =
        serde_json::from_str(content).context("Invalid document array")?;
    Ok(documents)
}

pub fn parse_jsonl(content: &str) -> Result<Vec<Document>> {
    let mut documents = Vec::new();

    for (line_no, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let document: Document = serde_json::from_str(line)
            .context(format!("Invalid document on line {}", line_no + 1))?;
        documents.push(document);
    }

    Ok(documents)
}

/// Tab-separated `category, filename, title, content` with a header row.
pub fn parse_tsv(content: &str) -> Result<Vec<Document>> {
    parse_delimited(content, b'\t')
}

/// Comma-separated variant of [`parse_tsv`].
pub fn parse_csv(content: &str) -> Result<Vec<Document>> {
    parse_delimited(content, b',')
}

/// Quoted fields may hold the delimiter or line breaks. Every row must have
/// as many columns as the header.
fn parse_delimited(content: &str, delimiter: u8) -> Result<Vec<Document>> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(true)
        .flexible(false)
        .from_reader(content.as_bytes());

    let mut documents = Vec::new();
    for result in reader.records() {
        let record = result.context("Invalid corpus row")?;
        let line = record.position().map(|p| p.line()).unwrap_or(0);

        let (Some(category), Some(title), Some(text)) = (record.get(0), record.get(2), record.get(3))
        else {
            anyhow::bail!("Expected 4 columns on line {}, found {}", line, record.len());
        };

        let document = Document::new(text.trim().to_string())
            .with_meta("category", category.trim())
            .with_meta("title", title.trim());
        documents.push(document);
    }

    Ok(documents)
}
