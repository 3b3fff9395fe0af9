//! RAG (Retrieval-Augmented Generation) module.
//!
//! This module provides:
//! - `DocumentStore` / `MemoryStore`: the document collection
//! - `Retriever`: deterministic lexical ranking over the collection
//! - `ContextBuilder`: grounding prompt and citations from ranked hits
//! - `DirectoryIngestor`: fills a store from a directory of text files

mod context_builder;
mod ingest;
mod retriever;
mod store;

pub use context_builder::{citations, Citation, ContextBuilder};
pub use ingest::{document_id, DirectoryIngestor, IngestReport};
pub use retriever::{query_terms, score, Retriever, ScoredDocument, MAX_QUERY_TERMS};
pub use store::{Document, DocumentStore, MemoryStore};
