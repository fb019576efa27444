use std::path::Path;

use chrono::{DateTime, Utc};

use crate::error::Result;

/// Uploaded PDF together with the filesystem facts the heuristics inspect
#[derive(Debug, Clone)]
pub struct DocumentSource {
    pub content: Vec<u8>,
    pub file_name: String,
    pub modified_at: DateTime<Utc>,
}

impl DocumentSource {
    pub fn from_bytes(content: Vec<u8>, file_name: &str, modified_at: DateTime<Utc>) -> Self {
        Self {
            content,
            file_name: file_name.to_string(),
            modified_at,
        }
    }

    /// Reads a document and its modification time from disk
    pub async fn from_path(path: &Path) -> Result<Self> {
        let content = tokio::fs::read(path).await?;
        let metadata = tokio::fs::metadata(path).await?;
        let modified_at = metadata
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        Ok(Self {
            content,
            file_name,
            modified_at,
        })
    }

    pub fn size(&self) -> u64 {
        self.content.len() as u64
    }

    pub fn has_pdf_header(&self) -> bool {
        self.content.starts_with(b"%PDF-")
    }
}
