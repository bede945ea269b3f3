//! Vellum Core Library
//!
//! Configuration, error handling, and the artifact model shared by the
//! Vellum incremental exporter.

pub mod artifact;
pub mod config;
pub mod content;
pub mod error;
pub mod paths;
pub mod render;
pub mod session;

pub use artifact::{Artifact, ArtifactKind, DocumentType, Heading, PageInfo, SourceRecord, SourceStat};
pub use config::Config;
pub use content::{ContentNode, ElementKind};
pub use error::{CoreError, Result};
pub use render::{RenderError, RenderedDocument, Renderer};
pub use session::{CancelFlag, ExportSession, GENERATOR_VERSION, now_millis};
