//! Vellum Search Library
//!
//! Incrementally maintained full-text search index, persisted as JSON next
//! to the exported site.
//!
//! # Features
//!
//! - **Field-aware engine**: per-field inverted index with BM25 ranking
//! - **Add-only updates**: documents are replaced by discarding then adding
//! - **Text extraction**: readable text from rendered content trees
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//!
//! use vellum_search::SearchIndex;
//!
//! let mut index = SearchIndex::load(Path::new("./site"));
//! // index.index_page(&artifact)?;
//! index.save(Path::new("./site")).unwrap();
//! ```

pub mod document;
pub mod engine;
pub mod extract;
pub mod indexer;

pub use document::SearchDocument;
pub use engine::{DEFAULT_STOP_WORDS, INDEX_VERSION, SearchEngine, SearchHit, StoredFields};
pub use extract::{search_content, searchable_headers};
pub use indexer::SearchIndex;
use thiserror::Error;

/// Search-related errors.
#[derive(Debug, Error)]
pub enum SearchError {
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A document with this id is already indexed.
    #[error("Document already indexed: {0}")]
    DuplicateDocument(String),
}

/// Result type for search operations.
pub type Result<T> = std::result::Result<T, SearchError>;
