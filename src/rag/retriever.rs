//! Deterministic lexical retriever.
//!
//! Scores each document by how often the query's leading terms occur in its
//! lower-cased title and content. No stemming, no IDF, no embeddings; an
//! indexed full-text or vector backend can replace it behind the same
//! `retrieve` signature.

use std::sync::Arc;

use serde::Serialize;

use super::store::{Document, DocumentStore};
use crate::core::errors::CoreError;

/// Only the first terms of a query are scored.
pub const MAX_QUERY_TERMS: usize = 6;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredDocument {
    pub document: Document,
    pub score: usize,
}

#[derive(Clone)]
pub struct Retriever {
    store: Arc<dyn DocumentStore>,
}

impl Retriever {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// Top `top_k` (at least 1) documents by descending score; ties keep the
    /// store's order. A blank query returns nothing without reading the store.
    pub async fn retrieve(&self, query: &str, top_k: usize) -> Result<Vec<ScoredDocument>, CoreError> {
        let terms = query_terms(query);
        if terms.is_empty() {
            return Ok(Vec::new());
        }
        let documents = self.store.documents().await?;
        Ok(rank(&terms, documents, top_k))
    }
}

/// Lower-cased whitespace tokens, capped at [`MAX_QUERY_TERMS`].
pub fn query_terms(query: &str) -> Vec<String> {
    query
        .to_lowercase()
        .split_whitespace()
        .take(MAX_QUERY_TERMS)
        .map(str::to_string)
        .collect()
}

/// Sum of non-overlapping occurrences of each term in `title\ncontent`.
pub fn score(terms: &[String], document: &Document) -> usize {
    let text = format!("{}\n{}", document.title, document.content).to_lowercase();
    terms.iter().map(|term| text.matches(term.as_str()).count()).sum()
}

fn rank(terms: &[String], documents: Vec<Document>, top_k: usize) -> Vec<ScoredDocument> {
    let mut scored: Vec<ScoredDocument> = documents
        .into_iter()
        .filter_map(|document| {
            let score = score(terms, &document);
            (score > 0).then_some(ScoredDocument { document, score })
        })
        .collect();

    // sort_by is stable: equal scores keep collection order.
    scored.sort_by(|a, b| b.score.cmp(&a.score));
    scored.truncate(top_k.max(1));
    scored
}
