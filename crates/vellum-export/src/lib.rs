//! Vellum Export Library
//!
//! Incremental export engine for static sites. Decides across runs which
//! artifacts are new, updated or deleted, and keeps the persisted snapshot,
//! search index and RSS feed consistent with that decision.
//!
//! # Features
//!
//! - **Snapshot store**: previous/current description of the export
//! - **Change classification**: stat comparison with byte-level fallback
//! - **Asset registry**: mutability and inline policies, deduplicated writes
//! - **Feed merging**: RSS items carried over between runs
//!
//! # Example
//!
//! ```no_run
//! use vellum_core::{Config, ExportSession, RenderError, RenderedDocument, Renderer, SourceRecord};
//! use vellum_export::Exporter;
//!
//! struct Plain;
//!
//! impl Renderer for Plain {
//!     fn render(&self, _source: &SourceRecord) -> Result<RenderedDocument, RenderError> {
//!         Ok(RenderedDocument::default())
//!     }
//!
//!     fn read(&self, _source: &SourceRecord) -> Result<Vec<u8>, RenderError> {
//!         Ok(Vec::new())
//!     }
//! }
//!
//! let session = ExportSession::new(Config::default(), "./site");
//! let mut exporter = Exporter::new(session, Plain);
//! let outcome = exporter.run(&[SourceRecord::new("Notes/Hello.md", 0, 0, 12)]).unwrap();
//! println!("{} files to write", outcome.write_set.len());
//! ```

pub mod assets;
pub mod error;
pub mod feed;
pub mod index;
pub mod persist;
pub mod pipeline;
pub mod snapshot;

pub use assets::{Asset, AssetRegistry, AssetType, InlinePolicy, LoadMethod, Mutability, write_set};
pub use error::{ExportError, Result};
pub use feed::{FeedItem, FeedMerger};
pub use index::{Change, ChangeReport, Index};
pub use pipeline::{ExportOutcome, ExportStats, Exporter};
pub use snapshot::{FileRecord, PageRecord, Snapshot, SnapshotStore};
