//! Export errors.

use thiserror::Error;
use vellum_core::{CoreError, RenderError};
use vellum_search::SearchError;

/// Export errors.
#[derive(Debug, Error)]
pub enum ExportError {
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Core error.
    #[error("core error: {0}")]
    Core(#[from] CoreError),

    /// Search index error.
    #[error("search error: {0}")]
    Search(#[from] SearchError),

    /// Snapshot (de)serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Feed building or parsing error.
    #[error("feed error: {0}")]
    Feed(String),

    /// Invalid pattern while scanning asset contents.
    #[error("pattern error: {0}")]
    Pattern(#[from] regex::Error),

    /// Renderer failure.
    #[error("render error: {0}")]
    Render(#[from] RenderError),

    /// The batch was cancelled before completion.
    #[error("export cancelled")]
    Cancelled,
}

/// Result type for export operations.
pub type Result<T> = std::result::Result<T, ExportError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(ExportError::Cancelled.to_string(), "export cancelled");
        let err: ExportError = SearchError::DuplicateDocument("a.html".to_string()).into();
        assert!(err.to_string().contains("a.html"));
        let err: ExportError = CoreError::config("bad").into();
        assert!(err.to_string().starts_with("core error"));
    }
}
