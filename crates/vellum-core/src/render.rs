//! Renderer contract.
//!
//! The renderer turns one source document into a structured content tree
//! plus rendered bytes. It is supplied by the host; this crate only
//! defines the shape of the exchange.

use thiserror::Error;

use crate::{
    artifact::{Artifact, Heading, SourceRecord},
    content::ContentNode,
};

/// Failure reported by a renderer for a single source.
#[derive(Debug, Error)]
pub enum RenderError {
    /// The source could not be read.
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// The source could not be rendered.
    #[error("failed to render {path}: {message}")]
    Render { path: String, message: String },
}

impl RenderError {
    /// Create a new render error.
    pub fn render(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Render {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Everything a renderer knows about one rendered document.
#[derive(Debug, Clone, Default)]
pub struct RenderedDocument {
    pub title: String,
    pub icon: String,
    pub description: String,
    pub aliases: Vec<String>,
    pub tags: Vec<String>,
    /// Per-page author override.
    pub author: Option<String>,
    pub cover_image_url: Option<String>,
    pub headings: Vec<Heading>,
    pub content: ContentNode,
    /// Export paths this document links to.
    pub outbound_links: Vec<String>,
    /// Export paths of documents linking here.
    pub backlinks: Vec<String>,
    /// Attachments referenced by the document, already targeted.
    pub attachments: Vec<Artifact>,
    /// Rendered page bytes.
    pub html: Vec<u8>,
}

/// Upstream collaborator that renders documents and reads attachments.
pub trait Renderer: Send + Sync {
    /// Render a convertible source document.
    fn render(&self, source: &SourceRecord) -> Result<RenderedDocument, RenderError>;

    /// Read the raw bytes of an attachment.
    fn read(&self, source: &SourceRecord) -> Result<Vec<u8>, RenderError>;
}
