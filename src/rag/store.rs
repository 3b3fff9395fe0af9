//! DocumentStore trait: the read interface the retriever ranks over.
//!
//! Persistence is out of scope for this crate; `MemoryStore` is the
//! in-process implementation filled by the directory ingestor.

use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::errors::CoreError;

/// A stored source document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub title: String,
    pub content: String,
    /// Where the document was read from; doubles as the citation path.
    pub source_path: String,
    /// File extension without the dot (`"md"`, `"txt"`, ...).
    pub mime_type: String,
    pub updated_at: DateTime<Utc>,
}

impl Document {
    pub fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        content: impl Into<String>,
        source_path: impl Into<String>,
        mime_type: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            content: content.into(),
            source_path: source_path.into(),
            mime_type: mime_type.into(),
            updated_at: Utc::now(),
        }
    }
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Every document, in the store's natural order.
    async fn documents(&self) -> Result<Vec<Document>, CoreError>;

    /// Insert or replace the document with the same `source_path`.
    async fn upsert(&self, document: Document) -> Result<(), CoreError>;

    async fn count(&self) -> Result<usize, CoreError>;
}

/// In-memory store ordered most recently updated first.
#[derive(Default)]
pub struct MemoryStore {
    docs: RwLock<Vec<Document>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_documents(documents: Vec<Document>) -> Self {
        Self {
            docs: RwLock::new(documents),
        }
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn documents(&self) -> Result<Vec<Document>, CoreError> {
        Ok(self
            .docs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }

    async fn upsert(&self, mut document: Document) -> Result<(), CoreError> {
        document.updated_at = Utc::now();
        let mut docs = self.docs.write().unwrap_or_else(PoisonError::into_inner);
        docs.retain(|d| d.source_path != document.source_path);
        docs.insert(0, document);
        Ok(())
    }

    async fn count(&self) -> Result<usize, CoreError> {
        Ok(self.docs.read().unwrap_or_else(PoisonError::into_inner).len())
    }
}
