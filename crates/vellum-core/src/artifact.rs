//! Artifact data model.
//!
//! An [`Artifact`] is one unit of output produced for a single export run:
//! either a rendered page or an attachment copied (or generated) next to it.

use serde::{Deserialize, Serialize};

use crate::content::ContentNode;

/// File system statistics of a source, in milliseconds since the epoch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceStat {
    /// Creation time.
    pub ctime: i64,
    /// Last modification time.
    pub mtime: i64,
    /// Size in bytes.
    pub size: u64,
}

impl SourceStat {
    /// Create a new stat record.
    #[must_use]
    pub fn new(ctime: i64, mtime: i64, size: u64) -> Self {
        Self { ctime, mtime, size }
    }
}

/// A source document or attachment as supplied by the content provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceRecord {
    /// Path of the source inside the collection.
    pub source_path: String,
    /// Creation time in milliseconds.
    pub created_time: i64,
    /// Modification time in milliseconds.
    pub modified_time: i64,
    /// Size in bytes.
    pub size: u64,
}

impl SourceRecord {
    /// Create a new source record.
    #[must_use]
    pub fn new(source_path: impl Into<String>, created_time: i64, modified_time: i64, size: u64) -> Self {
        Self {
            source_path: source_path.into(),
            created_time,
            modified_time,
            size,
        }
    }

    /// Stat view of this record.
    pub fn stat(&self) -> SourceStat {
        SourceStat::new(self.created_time, self.modified_time, self.size)
    }

    /// Lower-case extension of the source path.
    pub fn extension(&self) -> String {
        crate::paths::extension(&self.source_path)
    }
}

/// Kind of document a page was rendered from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentType {
    /// Markdown note.
    #[default]
    Markdown,
    /// Canvas board.
    Canvas,
    /// Anything else rendered as a page.
    Other,
}

impl DocumentType {
    /// Determine document type from a source extension.
    pub fn from_extension(ext: &str) -> Self {
        match ext.to_lowercase().as_str() {
            "md" => Self::Markdown,
            "canvas" => Self::Canvas,
            _ => Self::Other,
        }
    }

    /// Name recorded in the snapshot.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Markdown => "markdown",
            Self::Canvas => "canvas",
            Self::Other => "other",
        }
    }
}

/// A heading of a rendered page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Heading {
    /// Heading text.
    pub heading: String,
    /// Level, 1 to 6.
    pub level: u8,
    /// Anchor id.
    pub id: String,
}

impl Heading {
    /// Create a new heading.
    #[must_use]
    pub fn new(heading: impl Into<String>, level: u8, id: impl Into<String>) -> Self {
        Self {
            heading: heading.into(),
            level,
            id: id.into(),
        }
    }
}

/// Page-specific information.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageInfo {
    pub title: String,
    pub icon: String,
    pub description: String,
    pub aliases: Vec<String>,
    pub tags: Vec<String>,
    pub headers: Vec<Heading>,
    /// Export paths of pages linking here.
    pub backlink_targets: Vec<String>,
    /// Export paths this page links to.
    pub outbound_link_targets: Vec<String>,
    /// Export paths of attachments this page uses.
    pub attachment_targets: Vec<String>,
    pub author: String,
    pub cover_image_url: String,
    pub full_url: String,
    pub path_to_root: String,
    pub document_type: DocumentType,
    /// Structured content tree, used for text extraction.
    pub content: ContentNode,
}

/// Discriminant of an artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArtifactKind {
    /// A rendered page.
    Page(Box<PageInfo>),
    /// Any other output file.
    Attachment,
}

/// One output file of an export run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    /// Unique output path, relative to the destination.
    pub target_path: String,
    /// Source path, absent for generated artifacts.
    pub source_path: Option<String>,
    pub source_stat: SourceStat,
    pub data: Vec<u8>,
    pub show_in_tree: bool,
    pub tree_order: i32,
    pub kind: ArtifactKind,
}

impl Artifact {
    /// Create a new attachment artifact.
    #[must_use]
    pub fn attachment(target_path: impl Into<String>, data: Vec<u8>, source_stat: SourceStat) -> Self {
        Self {
            target_path: target_path.into(),
            source_path: None,
            source_stat,
            data,
            show_in_tree: false,
            tree_order: 0,
            kind: ArtifactKind::Attachment,
        }
    }

    /// Create a new page artifact.
    #[must_use]
    pub fn page(
        target_path: impl Into<String>,
        data: Vec<u8>,
        source_stat: SourceStat,
        info: PageInfo,
    ) -> Self {
        Self {
            target_path: target_path.into(),
            source_path: None,
            source_stat,
            data,
            show_in_tree: true,
            tree_order: 0,
            kind: ArtifactKind::Page(Box::new(info)),
        }
    }

    /// Set the source path.
    #[must_use]
    pub fn with_source(mut self, source_path: impl Into<String>) -> Self {
        let source_path = source_path.into();
        self.source_path = (!source_path.is_empty()).then_some(source_path);
        self
    }

    /// Set tree visibility and order.
    #[must_use]
    pub fn with_tree(mut self, show_in_tree: bool, tree_order: i32) -> Self {
        self.show_in_tree = show_in_tree;
        self.tree_order = tree_order;
        self
    }

    /// Page information, if this is a page.
    pub fn page_info(&self) -> Option<&PageInfo> {
        match &self.kind {
            ArtifactKind::Page(info) => Some(info),
            ArtifactKind::Attachment => None,
        }
    }

    pub fn is_page(&self) -> bool {
        matches!(self.kind, ArtifactKind::Page(_))
    }

    /// Lower-case extension of the target path.
    pub fn extension(&self) -> String {
        crate::paths::extension(&self.target_path)
    }
}
