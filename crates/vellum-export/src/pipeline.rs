//! Export pipeline.
//!
//! Drives one batch: sources are rendered in parallel, then registered one
//! at a time in source order, then the index is finalized and the write set
//! computed.

use std::{collections::BTreeSet, time::Instant};

use rayon::prelude::*;
use tracing::{info, warn};
use vellum_core::{
    Artifact, CoreError, DocumentType, ExportSession, PageInfo, RenderedDocument, Renderer, SourceRecord, paths,
};

use crate::{
    ExportError, Result,
    assets::{self, AssetRegistry},
    index::{ChangeReport, Index},
};

/// Export statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExportStats {
    /// Pages registered.
    pub pages: usize,
    /// Attachments registered, asset downloads included.
    pub attachments: usize,
    /// Artifacts in the write set.
    pub written: usize,
    /// Batch duration in milliseconds.
    pub duration_ms: u64,
}

/// Result of one export batch.
#[derive(Debug, Clone)]
pub struct ExportOutcome {
    pub report: ChangeReport,
    /// Artifacts the writer must persist.
    pub write_set: Vec<Artifact>,
    pub stats: ExportStats,
}

/// Batch driver.
#[derive(Debug)]
pub struct Exporter<R> {
    session: ExportSession,
    renderer: R,
    registry: AssetRegistry,
}

impl<R: Renderer> Exporter<R> {
    /// Create a new exporter with an empty asset registry.
    #[must_use]
    pub fn new(session: ExportSession, renderer: R) -> Self {
        Self {
            session,
            renderer,
            registry: AssetRegistry::new(),
        }
    }

    /// Use a prepared asset registry.
    #[must_use]
    pub fn with_registry(mut self, registry: AssetRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn session(&self) -> &ExportSession {
        &self.session
    }

    pub fn registry(&self) -> &AssetRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut AssetRegistry {
        &mut self.registry
    }

    /// Export one batch of sources.
    ///
    /// On cancellation or a fatal error nothing is persisted; the previous
    /// snapshot, search index and feed stay on disk untouched.
    pub fn run(&mut self, sources: &[SourceRecord]) -> Result<ExportOutcome> {
        let start = Instant::now();
        let mut stats = ExportStats::default();

        info!(
            sources = sources.len(),
            destination = %self.session.destination().display(),
            "Starting export"
        );

        let mut index = Index::load(&self.session);
        self.registry.begin_batch(&self.session);

        let session = &self.session;
        let renderer = &self.renderer;
        let produced: Vec<Result<Vec<Artifact>>> = sources
            .par_iter()
            .map(|source| produce(session, renderer, source))
            .collect();

        let mut candidates = Vec::new();
        for (source, artifacts) in sources.iter().zip(produced) {
            self.ensure_running()?;
            let artifacts = match artifacts {
                Ok(artifacts) => artifacts,
                Err(ExportError::Render(e)) => {
                    warn!(source = %source.source_path, error = %e, "Failed to render document, keeping previous output");
                    let export = &self.session.config.export;
                    if let Ok(target) =
                        paths::target_path_for(&source.source_path, &export.export_root, export.slugify_paths)
                    {
                        index.keep_previous(&target);
                    }
                    continue;
                }
                Err(ExportError::Core(e @ CoreError::InvalidPath { .. })) => {
                    warn!(source = %source.source_path, error = %e, "Invalid source path, skipping");
                    continue;
                }
                Err(e) => return Err(e),
            };

            for artifact in &artifacts {
                self.register(&mut index, artifact, &mut stats)?;
            }
            candidates.extend(artifacts);
        }

        let downloads = self.registry.downloads(&self.session);
        for artifact in &downloads {
            self.register(&mut index, artifact, &mut stats)?;
        }

        self.ensure_running()?;
        let report = index.finalize()?;

        // Asset downloads take precedence over page attachments at the same path.
        let mut all = downloads;
        all.extend(candidates);
        let changed: BTreeSet<String> = report
            .new_files
            .iter()
            .chain(&report.updated_files)
            .cloned()
            .collect();
        let write_set = assets::write_set(all, index.previous(), index.incremental_applies(), &changed);
        self.registry.end_batch();

        stats.written = write_set.len();
        stats.duration_ms = start.elapsed().as_millis() as u64;

        info!(
            new = report.new_files.len(),
            updated = report.updated_files.len(),
            deleted = report.deleted.len(),
            written = stats.written,
            duration_ms = stats.duration_ms,
            "Export complete"
        );

        Ok(ExportOutcome {
            report,
            write_set,
            stats,
        })
    }

    fn ensure_running(&self) -> Result<()> {
        if self.session.is_cancelled() {
            warn!("Export cancelled, discarding batch");
            return Err(ExportError::Cancelled);
        }
        Ok(())
    }

    fn register(&self, index: &mut Index, artifact: &Artifact, stats: &mut ExportStats) -> Result<()> {
        self.ensure_running()?;
        index.add_file(artifact)?;
        if artifact.is_page() {
            stats.pages += 1;
        } else {
            stats.attachments += 1;
        }
        Ok(())
    }
}

/// Render or read one source into its artifacts.
fn produce<R: Renderer>(session: &ExportSession, renderer: &R, source: &SourceRecord) -> Result<Vec<Artifact>> {
    if session.is_cancelled() {
        return Ok(Vec::new());
    }

    let export = &session.config.export;
    let target = paths::target_path_for(&source.source_path, &export.export_root, export.slugify_paths)?;

    if !paths::is_convertible(&source.extension()) {
        let data = renderer.read(source)?;
        let attachment = Artifact::attachment(target, data, source.stat())
            .with_source(source.source_path.clone())
            .with_tree(true, 0);
        return Ok(vec![attachment]);
    }

    let document = renderer.render(source)?;
    Ok(page_artifacts(session, source, target, document))
}

/// Wrap a rendered document into its page and attachment artifacts.
pub fn page_artifacts(
    session: &ExportSession,
    source: &SourceRecord,
    target: String,
    document: RenderedDocument,
) -> Vec<Artifact> {
    let title = if document.title.is_empty() {
        file_stem(&source.source_path).to_string()
    } else {
        document.title
    };

    let info = PageInfo {
        title,
        icon: document.icon,
        description: document.description,
        aliases: document.aliases,
        tags: document.tags,
        headers: document.headings,
        backlink_targets: document.backlinks,
        outbound_link_targets: document.outbound_links,
        attachment_targets: document
            .attachments
            .iter()
            .map(|attachment| attachment.target_path.clone())
            .collect(),
        author: document.author.unwrap_or_default(),
        cover_image_url: document.cover_image_url.unwrap_or_default(),
        full_url: paths::join_url(&session.config.site.url, &target),
        path_to_root: paths::path_to_root(&target),
        document_type: DocumentType::from_extension(&source.extension()),
        content: document.content,
    };

    let page = Artifact::page(target, document.html, source.stat(), info)
        .with_source(source.source_path.clone());

    let mut artifacts = vec![page];
    artifacts.extend(document.attachments);
    artifacts
}

fn file_stem(path: &str) -> &str {
    let name = paths::file_name(path);
    name.rsplit_once('.').map_or(name, |(stem, _)| stem)
}
