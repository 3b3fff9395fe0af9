//! Directory ingestion into a [`DocumentStore`].
//!
//! Walks a directory tree, reads every file whose extension is accepted,
//! and upserts one document per non-empty file.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use sha2::{Digest, Sha256};

use super::store::{Document, DocumentStore};
use crate::core::config::IngestSettings;
use crate::core::errors::CoreError;

const MAX_TITLE_CHARS: usize = 300;
const ID_HEX_CHARS: usize = 40;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IngestReport {
    pub path: String,
    pub ingested: usize,
    pub skipped: usize,
}

#[derive(Debug, Clone)]
pub struct DirectoryIngestor {
    extensions: Vec<String>,
}

impl Default for DirectoryIngestor {
    fn default() -> Self {
        Self::new(&IngestSettings::default())
    }
}

impl DirectoryIngestor {
    pub fn new(settings: &IngestSettings) -> Self {
        let extensions = settings
            .extensions
            .iter()
            .map(|ext| ext.trim().trim_start_matches('.').to_lowercase())
            .filter(|ext| !ext.is_empty())
            .collect();
        Self { extensions }
    }

    pub async fn ingest(
        &self,
        path: &Path,
        store: &dyn DocumentStore,
    ) -> Result<IngestReport, CoreError> {
        if !path.exists() {
            return Err(CoreError::NotFound(format!("path not found: {}", path.display())));
        }

        let files = self.collect_files(path)?;
        let mut report = IngestReport {
            path: path.display().to_string(),
            ingested: 0,
            skipped: 0,
        };

        for file in files {
            match read_document(&file) {
                Some(document) => {
                    store.upsert(document).await?;
                    report.ingested += 1;
                }
                None => report.skipped += 1,
            }
        }

        tracing::info!(
            "Ingested {} documents from {} ({} skipped)",
            report.ingested,
            report.path,
            report.skipped
        );
        Ok(report)
    }

    fn accepts(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| self.extensions.contains(&ext.to_lowercase()))
            .unwrap_or(false)
    }

    /// Accepted files under `root`, sorted for a stable ingest order.
    fn collect_files(&self, root: &Path) -> Result<Vec<PathBuf>, CoreError> {
        if root.is_file() {
            return Ok(if self.accepts(root) {
                vec![root.to_path_buf()]
            } else {
                Vec::new()
            });
        }

        let mut files = Vec::new();
        let mut pending = vec![root.to_path_buf()];
        while let Some(dir) = pending.pop() {
            for entry in fs::read_dir(&dir)? {
                let entry = entry?;
                // file_type() does not follow links, so linked directories never recurse.
                let file_type = entry.file_type()?;
                let path = entry.path();
                if file_type.is_dir() {
                    pending.push(path);
                } else if file_type.is_symlink() && path.is_dir() {
                    tracing::debug!("Not following directory link {}", path.display());
                } else if path.is_file() && self.accepts(&path) {
                    files.push(path);
                }
            }
        }
        files.sort();
        Ok(files)
    }
}

fn read_document(path: &Path) -> Option<Document> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) => {
            tracing::warn!("Skipping unreadable file {}: {}", path.display(), err);
            return None;
        }
    };
    let content = String::from_utf8_lossy(&bytes).into_owned();
    if content.trim().is_empty() {
        return None;
    }

    let source_path = path.to_string_lossy().replace('\\', "/");
    let title: String = path
        .file_stem()
        .map(|stem| stem.to_string_lossy().replace('_', " "))
        .unwrap_or_default()
        .trim()
        .chars()
        .take(MAX_TITLE_CHARS)
        .collect();
    let mime_type = path
        .extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .unwrap_or_default();

    Some(Document::new(
        document_id(&source_path),
        title,
        content,
        source_path,
        mime_type,
    ))
}

/// Stable id derived from the source path.
pub fn document_id(source_path: &str) -> String {
    let digest = hex::encode(Sha256::digest(source_path.as_bytes()));
    digest[..ID_HEX_CHARS].to_string()
}
