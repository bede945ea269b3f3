//! Change classification for one export batch.
//!
//! [`Index`] is the single writer of a batch. Every produced artifact passes
//! through [`Index::add_file`], which compares it against the previous
//! snapshot and keeps the snapshot, search index and feed in step. At the
//! end of the batch [`Index::finalize`] prunes whatever was not seen again
//! and persists all three together.

use std::{collections::BTreeSet, fs, path::PathBuf};

use tracing::{debug, info, warn};
use vellum_core::{
    Artifact, ExportSession, GENERATOR_VERSION, now_millis,
    paths::{self, FEED_FILE, LIBRARY_DIR, METADATA_FILE, SEARCH_INDEX_FILE},
};
use vellum_search::{SearchDocument, SearchIndex};

use crate::{
    Result,
    feed::{FeedItem, FeedMerger},
    persist,
    snapshot::{FileRecord, PageRecord, Snapshot, SnapshotStore},
};

/// How an artifact relates to the previous export.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Change {
    /// Not part of the previous export.
    New,
    /// Exported before, with a different source.
    Updated,
    /// Exported before and unchanged.
    Unchanged,
}

/// Outcome of one finalized batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeReport {
    pub new_files: Vec<String>,
    pub updated_files: Vec<String>,
    pub deleted: Vec<String>,
    /// Items in the written feed, previous runs included.
    pub feed_items: usize,
}

impl ChangeReport {
    /// Whether nothing changed since the previous export.
    pub fn is_unchanged(&self) -> bool {
        self.new_files.is_empty() && self.updated_files.is_empty() && self.deleted.is_empty()
    }
}

/// Change classifier of one export batch.
#[derive(Debug)]
pub struct Index {
    session: ExportSession,
    snapshot: SnapshotStore,
    search: SearchIndex,
    feed: FeedMerger,
    incremental: bool,

    deleted_candidates: BTreeSet<String>,
    new_files: Vec<String>,
    updated_files: Vec<String>,
    /// Export paths seen this batch with their source mtime, newest first.
    seen: Vec<(i64, String)>,
}

impl Index {
    /// Begin a batch: load the previous snapshot and search index and reset
    /// every per-batch tracker.
    pub fn load(session: &ExportSession) -> Self {
        let snapshot = SnapshotStore::load(session);
        let search = if session.config.search.enabled {
            SearchIndex::load(session.destination())
        } else {
            SearchIndex::new()
        };

        let deleted_candidates = snapshot
            .previous()
            .map(|previous| previous.all_files.clone())
            .unwrap_or_default();

        let mut index = Self {
            session: session.clone(),
            snapshot,
            search,
            feed: FeedMerger::new(&session.config),
            incremental: false,
            deleted_candidates,
            new_files: Vec::new(),
            updated_files: Vec::new(),
            seen: Vec::new(),
        };
        index.incremental = index.check_incremental();

        debug!(
            previous_files = index.deleted_candidates.len(),
            incremental = index.incremental,
            "Loaded export index"
        );
        index
    }

    /// Whether unchanged artifacts may be skipped when writing.
    pub fn incremental_applies(&self) -> bool {
        self.incremental
    }

    fn check_incremental(&self) -> bool {
        let config = &self.session.config;
        if !config.export.incremental {
            return false;
        }

        let mut applies = true;
        let Some(previous) = self.snapshot.previous() else {
            warn!("No previous metadata, incremental export disabled");
            return false;
        };

        if config.search.enabled && !self.search.was_loaded() {
            warn!("No previous search index, incremental export disabled");
            applies = false;
        }

        if config.rss.enabled && !paths::feed_path(self.session.destination()).exists() {
            warn!("No previous RSS feed, incremental export disabled");
            applies = false;
        }

        if previous.generator_version != GENERATOR_VERSION {
            warn!(
                previous = %previous.generator_version,
                current = GENERATOR_VERSION,
                "Generator version changed, incremental export disabled"
            );
            applies = false;
        }

        applies
    }

    pub fn session(&self) -> &ExportSession {
        &self.session
    }

    /// The snapshot of the previous export, if one was loaded.
    pub fn previous(&self) -> Option<&Snapshot> {
        self.snapshot.previous()
    }

    pub fn snapshot(&self) -> &SnapshotStore {
        &self.snapshot
    }

    pub fn search(&self) -> &SearchIndex {
        &self.search
    }

    pub fn feed(&self) -> &FeedMerger {
        &self.feed
    }

    pub fn new_files(&self) -> &[String] {
        &self.new_files
    }

    pub fn updated_files(&self) -> &[String] {
        &self.updated_files
    }

    /// Previous paths not seen again so far.
    pub fn deleted_candidates(&self) -> &BTreeSet<String> {
        &self.deleted_candidates
    }

    /// Export paths seen this batch, newest source first.
    pub fn all_files(&self) -> impl Iterator<Item = &str> {
        self.seen.iter().map(|(_, path)| path.as_str())
    }

    /// Compare an artifact against the previous export.
    ///
    /// When exactly one of mtime and size changed, the bytes previously
    /// written at the target path decide; a missing output counts as changed.
    pub fn classify(&self, artifact: &Artifact) -> Change {
        let Some(old) = self.snapshot.old_file(&artifact.target_path) else {
            return Change::New;
        };

        let mtime_changed = old.modified_time != artifact.source_stat.mtime;
        let size_changed = old.source_size != artifact.source_stat.size;

        match (mtime_changed, size_changed) {
            (true, true) => Change::Updated,
            (false, false) => Change::Unchanged,
            _ if self.output_differs(artifact) => Change::Updated,
            _ => Change::Unchanged,
        }
    }

    fn output_differs(&self, artifact: &Artifact) -> bool {
        let path = self.session.output_path(&artifact.target_path);
        match fs::read(&path) {
            Ok(bytes) => bytes != artifact.data,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "Previous output unreadable");
                true
            }
        }
    }

    /// Register one artifact of this batch.
    ///
    /// Registering the same export path twice keeps the last artifact.
    pub fn add_file(&mut self, artifact: &Artifact) -> Result<Change> {
        let path = artifact.target_path.clone();
        let change = self.classify(artifact);
        let document = SearchDocument::from_artifact(artifact);

        // The only fallible mutation runs first so a failure leaves no trace.
        if let Some(document) = &document {
            self.search.upsert(document)?;
        }

        self.snapshot.upsert(artifact);
        self.snapshot.track(&path, artifact.show_in_tree);
        self.deleted_candidates.remove(&path);
        self.mark_seen(&path, artifact.source_stat.mtime);

        self.new_files.retain(|p| p != &path);
        self.updated_files.retain(|p| p != &path);
        match change {
            Change::New => self.new_files.push(path.clone()),
            Change::Updated => self.updated_files.push(path.clone()),
            Change::Unchanged => self.keep_old_attachments(&path),
        }

        if self.session.config.rss.enabled {
            if let Some(item) = FeedItem::from_page(artifact, &self.session.config) {
                self.feed.add(item);
            }
        }

        debug!(path = %path, change = ?change, "Registered file");
        Ok(change)
    }

    /// Keep the previous output of a path that could not be produced again.
    ///
    /// Used when a source still exists but failed to render: its old page,
    /// search entry, feed item and attachments survive the batch. Returns
    /// whether the previous export had the path.
    pub fn keep_previous(&mut self, path: &str) -> bool {
        if !self.snapshot.had_file(path) {
            return false;
        }

        let shown = self.snapshot.was_shown_in_tree(path);
        self.snapshot.track(path, shown);
        self.deleted_candidates.remove(path);
        self.keep_old_attachments(path);

        debug!(path = %path, "Kept previous output");
        true
    }

    /// Attachments of an unchanged page stay part of the export.
    fn keep_old_attachments(&mut self, page_path: &str) {
        let Some(attachments) = self
            .snapshot
            .old_page(page_path)
            .map(|page| page.attachment_targets.clone())
        else {
            return;
        };

        for attachment in attachments {
            if !self.snapshot.had_file(&attachment) {
                continue;
            }
            let shown = self.snapshot.was_shown_in_tree(&attachment);
            self.snapshot.track(&attachment, shown);
            self.deleted_candidates.remove(&attachment);
        }
    }

    fn mark_seen(&mut self, path: &str, mtime: i64) {
        self.seen.retain(|(_, p)| p != path);
        let at = self.seen.partition_point(|(t, _)| *t >= mtime);
        self.seen.insert(at, (mtime, path.to_string()));
    }

    /// Remove an artifact from the export immediately.
    pub fn remove_file(&mut self, artifact: &Artifact) {
        if let Some(source) = &artifact.source_path {
            self.feed.remove(source);
        }
        self.remove_path(&artifact.target_path);
    }

    /// Remove an export path from the export immediately.
    pub fn remove_path(&mut self, path: &str) {
        self.snapshot.remove(path);
        self.search.remove(path);
        self.seen.retain(|(_, p)| p != path);
        self.new_files.retain(|p| p != path);
        self.updated_files.retain(|p| p != path);

        if self.snapshot.had_file(path) {
            self.deleted_candidates.insert(path.to_string());
        }
        debug!(path = %path, "Removed file");
    }

    /// Page exported from a source path.
    pub fn page_for_source(&self, source_path: &str) -> Option<&PageRecord> {
        let target = self.target_for_source(source_path)?;
        self.snapshot.current().pages.get(target)
    }

    /// Attachment exported from a source path.
    pub fn attachment_for_source(&self, source_path: &str) -> Option<&FileRecord> {
        let target = self.target_for_source(source_path)?;
        let current = self.snapshot.current();
        if current.attachments.contains(target) {
            current.file_info.get(target)
        } else {
            None
        }
    }

    /// Any file exported from a source path.
    pub fn file_for_source(&self, source_path: &str, prefer_attachment: bool) -> Option<&FileRecord> {
        let page = || self.page_for_source(source_path).map(|page| &page.file);
        let attachment = || self.attachment_for_source(source_path);

        if prefer_attachment {
            attachment().or_else(page)
        } else {
            page().or_else(attachment)
        }
    }

    fn target_for_source(&self, source_path: &str) -> Option<&String> {
        self.snapshot.current().source_to_target.get(source_path)
    }

    /// Prune unseen files and persist snapshot, search index and feed.
    ///
    /// All three documents are rendered before anything is written, then
    /// replaced together; a failure leaves the previous files in place.
    /// Call once, after the last artifact of the batch was registered.
    pub fn finalize(&mut self) -> Result<ChangeReport> {
        let config = &self.session.config;
        let destination = self.session.destination().to_path_buf();

        for (path, enabled) in [
            (format!("{LIBRARY_DIR}/{METADATA_FILE}"), true),
            (format!("{LIBRARY_DIR}/{SEARCH_INDEX_FILE}"), config.search.enabled),
            (FEED_FILE.to_string(), config.rss.enabled),
        ] {
            if enabled {
                self.snapshot.track(&path, false);
                self.deleted_candidates.remove(&path);
            }
        }

        let now = now_millis();
        let deleted = self.snapshot.finalize(&self.deleted_candidates, now);

        // Entries of a previous run the snapshot no longer knows about go too.
        let all_files = &self.snapshot.current().all_files;
        self.search.retain(|path| all_files.contains(path));

        let mut payloads: Vec<(PathBuf, Vec<u8>)> = Vec::new();
        let mut feed_items = 0;
        if config.rss.enabled {
            let deleted_guids = self.deleted_guids(&deleted);
            let (xml, count) = self.feed.prepare(&destination, &deleted_guids, now);
            feed_items = count;
            payloads.push((paths::feed_path(&destination), xml.into_bytes()));
        }
        if config.search.enabled {
            payloads.push((paths::search_index_path(&destination), self.search.serialize()?.into_bytes()));
        }
        payloads.push((
            paths::metadata_path(&destination),
            self.snapshot.current().to_json()?.into_bytes(),
        ));

        persist::commit_all(&payloads)?;
        info!(
            files = self.snapshot.current().all_files.len(),
            documents = self.search.len(),
            feed_items,
            "Wrote export metadata"
        );

        let report = ChangeReport {
            new_files: self.new_files.clone(),
            updated_files: self.updated_files.clone(),
            deleted: deleted.into_iter().collect(),
            feed_items,
        };

        info!(
            new = report.new_files.len(),
            updated = report.updated_files.len(),
            deleted = report.deleted.len(),
            "Finalized export index"
        );
        Ok(report)
    }

    /// Feed guids of deleted export paths.
    fn deleted_guids(&self, deleted: &BTreeSet<String>) -> BTreeSet<String> {
        let mut guids = deleted.clone();
        guids.extend(
            deleted
                .iter()
                .filter_map(|path| self.snapshot.old_file(path))
                .map(|record| record.source_path.clone())
                .filter(|source| !source.is_empty()),
        );
        guids
    }
}

#[cfg(test)]
mod tests {
    use vellum_core::{Config, ContentNode, PageInfo, SourceStat};

    use super::*;

    fn session(dir: &std::path::Path) -> ExportSession {
        ExportSession::new(Config::default(), dir)
    }

    fn page(path: &str, body: &str, mtime: i64) -> Artifact {
        let info = PageInfo {
            title: path.to_string(),
            content: ContentNode::section(vec![ContentNode::paragraph(body)]),
            ..Default::default()
        };
        let data = format!("<p>{body}</p>").into_bytes();
        let stat = SourceStat::new(0, mtime, data.len() as u64);
        Artifact::page(path, data, stat, info).with_source(path.replace(".html", ".md"))
    }

    fn written(session: &ExportSession, artifact: &Artifact) {
        let path = session.output_path(&artifact.target_path);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, &artifact.data).unwrap();
    }

    #[test]
    fn test_fresh_batch_classifies_new() {
        let dir = tempfile::tempdir().unwrap();
        let mut index = Index::load(&session(dir.path()));
        assert!(!index.incremental_applies());

        assert_eq!(index.add_file(&page("a.html", "alpha text", 1)).unwrap(), Change::New);
        assert_eq!(index.add_file(&page("b.html", "beta text", 2)).unwrap(), Change::New);
        assert_eq!(index.all_files().collect::<Vec<_>>(), vec!["b.html", "a.html"]);

        let report = index.finalize().unwrap();
        assert_eq!(report.new_files, vec!["a.html", "b.html"]);
        assert!(report.deleted.is_empty());
        assert_eq!(report.feed_items, 2);
        assert!(paths::metadata_path(dir.path()).exists());
        assert!(paths::search_index_path(dir.path()).exists());
        assert!(paths::feed_path(dir.path()).exists());
    }

    #[test]
    fn test_classify_byte_comparison() {
        let dir = tempfile::tempdir().unwrap();
        let session = session(dir.path());
        let original = page("a.html", "same body", 10);
        written(&session, &original);

        let mut index = Index::load(&session);
        index.add_file(&original).unwrap();
        index.finalize().unwrap();

        let index = Index::load(&session);
        assert!(index.incremental_applies());
        assert_eq!(index.classify(&original), Change::Unchanged);

        // Touched but identical bytes.
        let touched = page("a.html", "same body", 11);
        assert_eq!(index.classify(&touched), Change::Unchanged);

        // Same size and mtime never counts as updated.
        let mut same_stat = page("a.html", "diff body", 10);
        same_stat.source_stat = original.source_stat;
        assert_eq!(index.classify(&same_stat), Change::Unchanged);

        // Only mtime changed and bytes differ.
        let edited = page("a.html", "diff body", 12);
        assert_eq!(index.classify(&edited), Change::Updated);

        let both = page("a.html", "longer body", 12);
        assert_eq!(index.classify(&both), Change::Updated);
    }

    #[test]
    fn test_last_write_wins() {
        let dir = tempfile::tempdir().unwrap();
        let mut index = Index::load(&session(dir.path()));
        index.add_file(&page("a.html", "first", 1)).unwrap();
        index.add_file(&page("a.html", "second", 2)).unwrap();

        assert_eq!(index.new_files(), ["a.html"]);
        assert_eq!(index.search().len(), 1);
        assert_eq!(index.all_files().count(), 1);
        assert_eq!(index.search().search("second", 5)[0].id, "a.html");
    }

    #[test]
    fn test_remove_file_marks_previous_deleted() {
        let dir = tempfile::tempdir().unwrap();
        let session = session(dir.path());
        let mut index = Index::load(&session);
        let a = page("a.html", "alpha text", 1);
        index.add_file(&a).unwrap();
        index.add_file(&page("b.html", "beta text", 1)).unwrap();
        index.finalize().unwrap();

        let mut index = Index::load(&session);
        index.add_file(&a).unwrap();
        index.remove_file(&a);
        assert!(index.deleted_candidates().contains("a.html"));
        assert!(!index.search().has("a.html"));

        let report = index.finalize().unwrap();
        assert!(report.deleted.contains(&"a.html".to_string()));
        assert!(report.deleted.contains(&"b.html".to_string()));
    }

    #[test]
    fn test_lookups_by_source() {
        let dir = tempfile::tempdir().unwrap();
        let mut index = Index::load(&session(dir.path()));
        index.add_file(&page("a.html", "alpha text", 1)).unwrap();
        let image = Artifact::attachment("img.png", b"png".to_vec(), SourceStat::new(0, 1, 3)).with_source("img.png");
        index.add_file(&image).unwrap();

        assert_eq!(index.page_for_source("a.md").unwrap().file.export_path, "a.html");
        assert!(index.attachment_for_source("a.md").is_none());
        assert_eq!(index.attachment_for_source("img.png").unwrap().export_path, "img.png");
        assert_eq!(index.file_for_source("a.md", true).unwrap().export_path, "a.html");
        assert!(index.file_for_source("missing.md", false).is_none());
    }

    #[test]
    fn test_unchanged_page_keeps_attachments() {
        let dir = tempfile::tempdir().unwrap();
        let session = session(dir.path());
        let mut a = page("a.html", "alpha text", 1);
        if let vellum_core::ArtifactKind::Page(info) = &mut a.kind {
            info.attachment_targets = vec!["img.png".to_string()];
        }
        let image = Artifact::attachment("img.png", b"png".to_vec(), SourceStat::new(0, 1, 3));

        let mut index = Index::load(&session);
        index.add_file(&a).unwrap();
        index.add_file(&image).unwrap();
        index.finalize().unwrap();

        let mut index = Index::load(&session);
        assert_eq!(index.add_file(&a).unwrap(), Change::Unchanged);
        assert!(!index.deleted_candidates().contains("img.png"));

        let report = index.finalize().unwrap();
        assert!(report.is_unchanged());
        assert!(index.snapshot().current().file_info.contains_key("img.png"));
    }

    #[test]
    fn test_keep_previous_survives_finalize() {
        let dir = tempfile::tempdir().unwrap();
        let session = session(dir.path());
        let mut a = page("a.html", "alpha text", 1);
        if let vellum_core::ArtifactKind::Page(info) = &mut a.kind {
            info.attachment_targets = vec!["img.png".to_string()];
        }
        let image = Artifact::attachment("img.png", b"png".to_vec(), SourceStat::new(0, 1, 3));

        let mut index = Index::load(&session);
        index.add_file(&a).unwrap();
        index.add_file(&image).unwrap();
        index.finalize().unwrap();

        let mut index = Index::load(&session);
        assert!(index.keep_previous("a.html"));
        assert!(!index.keep_previous("never-exported.html"));

        let report = index.finalize().unwrap();
        assert!(report.deleted.is_empty());
        assert!(index.snapshot().current().pages.contains_key("a.html"));
        assert!(index.snapshot().current().all_files.contains("img.png"));
        assert!(index.search().has("a.html"));
        assert_eq!(report.feed_items, 1);
    }

    #[test]
    fn test_unchanged_pages_contribute_feed_items() {
        let dir = tempfile::tempdir().unwrap();
        let session = session(dir.path());
        let a = page("a.html", "alpha text", 1);

        let mut index = Index::load(&session);
        index.add_file(&a).unwrap();
        index.finalize().unwrap();

        let mut index = Index::load(&session);
        assert_eq!(index.add_file(&a).unwrap(), Change::Unchanged);
        assert_eq!(index.feed().len(), 1);
    }

    #[test]
    fn test_finalize_drops_search_entries_unknown_to_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let session = session(dir.path());

        let mut index = Index::load(&session);
        index.add_file(&page("a.html", "alpha text", 1)).unwrap();
        index.add_file(&page("b.html", "beta text", 1)).unwrap();
        index.finalize().unwrap();
        fs::remove_file(paths::metadata_path(dir.path())).unwrap();

        let mut index = Index::load(&session);
        assert!(index.previous().is_none());
        assert!(index.search().has("b.html"));
        index.add_file(&page("a.html", "alpha text", 1)).unwrap();
        index.finalize().unwrap();

        assert!(!index.search().has("b.html"));
        assert!(index.search().has("a.html"));
    }

    #[test]
    fn test_failed_finalize_leaves_previous_files() {
        let dir = tempfile::tempdir().unwrap();
        let session = session(dir.path());

        let mut index = Index::load(&session);
        index.add_file(&page("a.html", "alpha text", 1)).unwrap();
        index.finalize().unwrap();
        let feed_before = fs::read(paths::feed_path(dir.path())).unwrap();

        let mut index = Index::load(&session);
        index.add_file(&page("b.html", "beta text", 2)).unwrap();
        // The library folder turns into a file, so nothing can be staged there.
        fs::remove_dir_all(dir.path().join(LIBRARY_DIR)).unwrap();
        fs::write(dir.path().join(LIBRARY_DIR), "blocked").unwrap();

        assert!(index.finalize().is_err());
        assert_eq!(fs::read(paths::feed_path(dir.path())).unwrap(), feed_before);
    }

    #[test]
    fn test_disabled_features_skip_files() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.search.enabled = false;
        config.rss.enabled = false;
        let mut index = Index::load(&ExportSession::new(config, dir.path()));

        index.add_file(&page("a.html", "alpha text", 1)).unwrap();
        let report = index.finalize().unwrap();

        assert_eq!(report.feed_items, 0);
        assert!(!paths::feed_path(dir.path()).exists());
        assert!(!paths::search_index_path(dir.path()).exists());
        assert!(index.snapshot().current().all_files.contains("lib/metadata.json"));
        assert!(!index.snapshot().current().all_files.contains("rss.xml"));
    }
}
