//! Snapshot store.
//!
//! The snapshot describes every artifact the previous export produced. It is
//! loaded once per batch, kept as an immutable *previous* copy for change
//! detection, and cloned into a *current* copy that the batch mutates and
//! persists exactly once at the end.

use std::{
    collections::{BTreeMap, BTreeSet},
    fs,
    io::ErrorKind,
    path::Path,
};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use vellum_core::{Artifact, ArtifactKind, ExportSession, GENERATOR_VERSION, Heading, paths};
use walkdir::WalkDir;

use crate::{Result, assets::AssetType, persist};

/// Persisted record of one exported file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRecord {
    pub created_time: i64,
    pub modified_time: i64,
    pub source_size: u64,
    #[serde(default)]
    pub source_path: String,
    pub export_path: String,
    #[serde(default)]
    pub show_in_tree: bool,
    #[serde(default)]
    pub tree_order: i32,
    /// Asset type or document type.
    #[serde(rename = "type", default)]
    pub file_type: String,
    /// Embedded contents, only for single-file exports.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
}

impl FileRecord {
    fn from_artifact(artifact: &Artifact, file_type: &str, embed_data: bool) -> Self {
        Self {
            created_time: artifact.source_stat.ctime,
            modified_time: artifact.source_stat.mtime,
            source_size: artifact.source_stat.size,
            source_path: artifact.source_path.clone().unwrap_or_default(),
            export_path: artifact.target_path.clone(),
            show_in_tree: artifact.show_in_tree,
            tree_order: artifact.tree_order,
            file_type: file_type.to_string(),
            data: embed_data.then(|| String::from_utf8_lossy(&artifact.data).into_owned()),
        }
    }
}

/// Persisted record of one exported page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageRecord {
    #[serde(flatten)]
    pub file: FileRecord,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub icon: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub headers: Vec<Heading>,
    #[serde(rename = "backlinks", default)]
    pub backlink_targets: Vec<String>,
    #[serde(rename = "links", default)]
    pub outbound_link_targets: Vec<String>,
    #[serde(rename = "attachments", default)]
    pub attachment_targets: Vec<String>,
    #[serde(default)]
    pub author: String,
    #[serde(rename = "coverImageURL", default)]
    pub cover_image_url: String,
    #[serde(rename = "fullURL", default)]
    pub full_url: String,
    #[serde(default)]
    pub path_to_root: String,
}

/// Features enabled for the export that produced a snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FeatureOptions {
    pub search: bool,
    pub rss: bool,
    pub incremental: bool,
}

/// Persisted description of one export.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Snapshot {
    pub pages: BTreeMap<String, PageRecord>,
    pub file_info: BTreeMap<String, FileRecord>,
    pub source_to_target: BTreeMap<String, String>,
    pub attachments: BTreeSet<String>,
    pub shown_in_tree: BTreeSet<String>,
    pub all_files: BTreeSet<String>,

    pub site_name: String,
    #[serde(rename = "baseURL")]
    pub base_url: String,
    pub created_time: i64,
    pub modified_time: i64,
    pub export_root: String,
    pub theme_name: String,
    pub generator_version: String,
    pub has_favicon: bool,
    pub feature_options: FeatureOptions,
}

impl Snapshot {
    /// Create a new empty snapshot created at the given time.
    #[must_use]
    pub fn new(created_time: i64) -> Self {
        Self {
            created_time,
            ..Default::default()
        }
    }

    /// Parse a snapshot from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Serialize the snapshot to JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Drop every record of an export path.
    fn forget(&mut self, path: &str) {
        self.pages.remove(path);
        self.file_info.remove(path);
        self.attachments.remove(path);
        self.shown_in_tree.remove(path);
        self.all_files.remove(path);
        self.source_to_target.retain(|_, target| target != path);
    }
}

/// Previous and current snapshot of one destination.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    previous: Option<Snapshot>,
    current: Snapshot,
    embed_data: bool,
}

impl SnapshotStore {
    /// Load the snapshot persisted under the session destination.
    ///
    /// A missing or corrupt snapshot starts a fresh one; the batch continues.
    pub fn load(session: &ExportSession) -> Self {
        let path = paths::metadata_path(session.destination());

        let previous = match fs::read_to_string(&path) {
            Ok(json) => match Snapshot::from_json(&json) {
                Ok(snapshot) => Some(snapshot),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Failed to load metadata, recreating it");
                    None
                }
            },
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %path.display(), "No metadata found, creating new metadata");
                None
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to read metadata, recreating it");
                None
            }
        };

        Self::from_previous(previous, session)
    }

    /// Start a batch on top of an optional previous snapshot.
    pub fn from_previous(previous: Option<Snapshot>, session: &ExportSession) -> Self {
        let mut current = previous
            .clone()
            .unwrap_or_else(|| Snapshot::new(session.started_at));

        // Rebuilt from the artifacts seen in this batch.
        current.all_files.clear();
        current.shown_in_tree.clear();

        let config = &session.config;
        current.site_name = config.site.name.clone();
        current.base_url = config.site.url.clone();
        current.export_root = config.export.export_root.clone();
        current.theme_name = config.site.theme.clone();
        current.generator_version = GENERATOR_VERSION.to_string();
        current.has_favicon = config.site.favicon.is_some();
        current.feature_options = FeatureOptions {
            search: config.search.enabled,
            rss: config.rss.enabled,
            incremental: config.export.incremental,
        };
        current.modified_time = session.started_at;

        Self {
            previous,
            current,
            embed_data: config.export.combine_as_single_file,
        }
    }

    /// The snapshot loaded at batch start, if any.
    pub fn previous(&self) -> Option<&Snapshot> {
        self.previous.as_ref()
    }

    /// The snapshot being built by this batch.
    pub fn current(&self) -> &Snapshot {
        &self.current
    }

    /// Whether the previous export produced this path.
    pub fn had_file(&self, path: &str) -> bool {
        self.old_file(path).is_some()
    }

    pub fn old_file(&self, path: &str) -> Option<&FileRecord> {
        self.previous.as_ref()?.file_info.get(path)
    }

    pub fn old_page(&self, path: &str) -> Option<&PageRecord> {
        self.previous.as_ref()?.pages.get(path)
    }

    /// Write the records of an artifact.
    pub fn upsert(&mut self, artifact: &Artifact) {
        match &artifact.kind {
            ArtifactKind::Page(_) => self.upsert_page(artifact),
            ArtifactKind::Attachment => self.upsert_attachment(artifact),
        }
    }

    /// Write the records of a page artifact. Attachments are ignored.
    pub fn upsert_page(&mut self, artifact: &Artifact) {
        let Some(page) = artifact.page_info() else {
            return;
        };

        let file = FileRecord::from_artifact(artifact, page.document_type.as_str(), self.embed_data);
        let record = PageRecord {
            file: file.clone(),
            title: page.title.clone(),
            icon: page.icon.clone(),
            description: page.description.clone(),
            aliases: page.aliases.clone(),
            tags: page.tags.clone(),
            headers: page.headers.clone(),
            backlink_targets: page.backlink_targets.clone(),
            outbound_link_targets: page.outbound_link_targets.clone(),
            attachment_targets: page.attachment_targets.clone(),
            author: page.author.clone(),
            cover_image_url: page.cover_image_url.clone(),
            full_url: page.full_url.clone(),
            path_to_root: page.path_to_root.clone(),
        };

        let path = artifact.target_path.clone();
        self.current.attachments.remove(&path);
        self.map_source(&file.source_path, &path);
        self.current.file_info.insert(path.clone(), file);
        self.current.pages.insert(path, record);
    }

    /// Write the records of an attachment artifact.
    pub fn upsert_attachment(&mut self, artifact: &Artifact) {
        let file_type = AssetType::from_extension(&artifact.extension());
        let file = FileRecord::from_artifact(artifact, file_type.as_str(), self.embed_data);

        let path = artifact.target_path.clone();
        self.current.pages.remove(&path);
        self.map_source(&file.source_path, &path);
        self.current.file_info.insert(path.clone(), file);
        self.current.attachments.insert(path);
    }

    /// Mark a path as part of this export.
    pub fn track(&mut self, path: &str, show_in_tree: bool) {
        self.current.all_files.insert(path.to_string());
        if show_in_tree {
            self.current.shown_in_tree.insert(path.to_string());
        }
    }

    /// Whether the previous export showed this path in the tree.
    pub fn was_shown_in_tree(&self, path: &str) -> bool {
        self.previous
            .as_ref()
            .is_some_and(|p| p.shown_in_tree.contains(path))
    }

    /// Remove every record of a path from the current snapshot.
    pub fn remove(&mut self, path: &str) {
        self.current.forget(path);
    }

    /// Prune deleted paths and stamp the modification time.
    ///
    /// Records left without a matching entry in `all_files` are pruned too.
    /// Returns every path that was pruned.
    pub fn finalize(&mut self, deleted: &BTreeSet<String>, now: i64) -> BTreeSet<String> {
        let mut pruned = deleted.clone();
        let current = &self.current;
        pruned.extend(
            current
                .file_info
                .keys()
                .chain(current.pages.keys())
                .chain(&current.attachments)
                .filter(|path| !current.all_files.contains(*path))
                .cloned(),
        );

        for path in &pruned {
            self.current.forget(path);
        }

        for page in self.current.pages.values_mut() {
            page.backlink_targets.retain(|p| !pruned.contains(p));
            page.outbound_link_targets.retain(|p| !pruned.contains(p));
            page.attachment_targets.retain(|p| !pruned.contains(p));
        }

        self.current.modified_time = now;
        debug!(pruned = pruned.len(), "Finalized snapshot");
        pruned
    }

    /// Persist the current snapshot under a destination.
    pub fn save(&self, destination: &Path) -> Result<()> {
        let path = paths::metadata_path(destination);
        persist::write_atomic(&path, self.current.to_json()?.as_bytes())?;

        info!(
            files = self.current.all_files.len(),
            pages = self.current.pages.len(),
            "Wrote metadata"
        );
        Ok(())
    }

    /// Delete the persisted snapshot and search index, forcing a full export.
    pub fn clear_cache(destination: &Path) -> Result<()> {
        for path in [
            paths::metadata_path(destination),
            paths::search_index_path(destination),
        ] {
            match fs::remove_file(&path) {
                Ok(()) => debug!(path = %path.display(), "Removed cache file"),
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    /// Delete every file of the previous export, then empty directories.
    ///
    /// Entries that would resolve outside the destination are skipped.
    /// Returns the number of files removed.
    pub fn purge(&self, destination: &Path) -> Result<usize> {
        let Some(previous) = &self.previous else {
            return Ok(0);
        };

        let mut removed = 0;
        for file in &previous.all_files {
            if !paths::is_safe_relative(file) {
                warn!(path = %file, "Refusing to delete a path outside the destination");
                continue;
            }
            let path = destination.join(file);
            match fs::remove_file(&path) {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => warn!(path = %path.display(), error = %e, "Failed to delete file"),
            }
        }

        remove_empty_dirs(destination)?;
        info!(removed, "Purged previous export");
        Ok(removed)
    }

    /// Keep the source index injective: one export path per source.
    fn map_source(&mut self, source_path: &str, target: &str) {
        self.current
            .source_to_target
            .retain(|source, mapped| mapped != target || source == source_path);
        if !source_path.is_empty() {
            self.current
                .source_to_target
                .insert(source_path.to_string(), target.to_string());
        }
    }
}

/// Remove empty directories below (not including) the root.
fn remove_empty_dirs(root: &Path) -> Result<()> {
    if !root.exists() {
        return Ok(());
    }

    for entry in WalkDir::new(root)
        .min_depth(1)
        .contents_first(true)
        .into_iter()
        .filter_map(|e| e.ok())
    {
        if entry.file_type().is_dir() {
            let is_empty = fs::read_dir(entry.path())?.next().is_none();
            if is_empty {
                fs::remove_dir(entry.path())?;
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use vellum_core::{Config, PageInfo, SourceStat};

    use super::*;

    fn session(dir: &Path) -> ExportSession {
        ExportSession::new(Config::default(), dir)
    }

    fn page(path: &str, source: &str, backlinks: &[&str], attachments: &[&str]) -> Artifact {
        let info = PageInfo {
            title: path.to_string(),
            backlink_targets: backlinks.iter().map(|s| (*s).to_string()).collect(),
            attachment_targets: attachments.iter().map(|s| (*s).to_string()).collect(),
            ..Default::default()
        };
        Artifact::page(path, b"<p>page</p>".to_vec(), SourceStat::new(1, 2, 11), info).with_source(source)
    }

    fn attachment(path: &str, source: &str) -> Artifact {
        Artifact::attachment(path, b"bytes".to_vec(), SourceStat::new(1, 2, 5)).with_source(source)
    }

    #[test]
    fn test_load_missing_starts_fresh() {
        let dir = tempfile::tempdir().unwrap();
        let session = session(dir.path());
        let store = SnapshotStore::load(&session);

        assert!(store.previous().is_none());
        assert_eq!(store.current().created_time, session.started_at);
        assert_eq!(store.current().site_name, "My Site");
        assert!(!store.had_file("a.html"));
    }

    #[test]
    fn test_load_corrupt_starts_fresh() {
        let dir = tempfile::tempdir().unwrap();
        let path = paths::metadata_path(dir.path());
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "[1, 2").unwrap();

        let store = SnapshotStore::load(&session(dir.path()));
        assert!(store.previous().is_none());
    }

    #[test]
    fn test_json_uses_client_keys() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = SnapshotStore::load(&session(dir.path()));
        store.upsert(&page("a.html", "A.md", &["b.html"], &["img.png"]));
        store.track("a.html", true);

        let json: serde_json::Value = serde_json::from_str(&store.current().to_json().unwrap()).unwrap();
        let record = &json["pages"]["a.html"];
        assert_eq!(record["backlinks"][0], "b.html");
        assert_eq!(record["attachments"][0], "img.png");
        assert_eq!(record["exportPath"], "a.html");
        assert_eq!(record["type"], "markdown");
        assert!(record.get("data").is_none());
        assert_eq!(json["sourceToTarget"]["A.md"], "a.html");
        assert_eq!(json["shownInTree"][0], "a.html");
        assert!(json.get("baseURL").is_some());
    }

    #[test]
    fn test_page_and_attachment_are_exclusive() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = SnapshotStore::load(&session(dir.path()));

        store.upsert(&attachment("x.html", "x.bin"));
        assert!(store.current().attachments.contains("x.html"));

        store.upsert(&page("x.html", "x.md", &[], &[]));
        assert!(!store.current().attachments.contains("x.html"));
        assert!(store.current().pages.contains_key("x.html"));
        assert_eq!(store.current().source_to_target.len(), 1);
        assert_eq!(store.current().source_to_target["x.md"], "x.html");
    }

    #[test]
    fn test_attachment_type_and_embedded_data() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.export.combine_as_single_file = true;
        let session = ExportSession::new(config, dir.path());
        let mut store = SnapshotStore::load(&session);

        store.upsert(&attachment("lib/fonts/inter.woff2", ""));
        let record = &store.current().file_info["lib/fonts/inter.woff2"];
        assert_eq!(record.file_type, "font");
        assert_eq!(record.data.as_deref(), Some("bytes"));
        assert!(store.current().source_to_target.is_empty());
    }

    #[test]
    fn test_finalize_prunes_everywhere() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = SnapshotStore::load(&session(dir.path()));
        store.upsert(&page("a.html", "A.md", &["c.html"], &["img.png"]));
        store.upsert(&page("c.html", "C.md", &["a.html"], &[]));
        store.upsert(&attachment("img.png", "img.png"));
        for path in ["a.html", "c.html", "img.png"] {
            store.track(path, true);
        }

        let deleted: BTreeSet<String> = ["c.html", "img.png"].iter().map(|s| (*s).to_string()).collect();
        let pruned = store.finalize(&deleted, 42);

        let current = store.current();
        assert_eq!(pruned, deleted);
        assert_eq!(current.modified_time, 42);
        assert!(!current.pages.contains_key("c.html"));
        assert!(!current.file_info.contains_key("img.png"));
        assert!(!current.attachments.contains("img.png"));
        assert!(!current.all_files.contains("c.html"));
        assert!(!current.shown_in_tree.contains("c.html"));
        assert!(!current.source_to_target.contains_key("C.md"));
        assert!(current.pages["a.html"].backlink_targets.is_empty());
        assert!(current.pages["a.html"].attachment_targets.is_empty());
    }

    #[test]
    fn test_finalize_prunes_outbound_links() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = SnapshotStore::load(&session(dir.path()));
        let mut a = page("a.html", "A.md", &[], &[]);
        if let ArtifactKind::Page(info) = &mut a.kind {
            info.outbound_link_targets = vec!["b.html".to_string(), "c.html".to_string()];
        }
        store.upsert(&a);
        store.upsert(&page("b.html", "B.md", &[], &[]));
        store.track("a.html", true);
        store.track("b.html", true);

        store.finalize(&BTreeSet::from(["c.html".to_string()]), 1);

        let json: serde_json::Value = serde_json::from_str(&store.current().to_json().unwrap()).unwrap();
        assert_eq!(json["pages"]["a.html"]["links"], serde_json::json!(["b.html"]));
    }

    #[test]
    fn test_finalize_prunes_untracked_records() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = SnapshotStore::load(&session(dir.path()));
        store.upsert(&attachment("orphan.png", "orphan.png"));

        let pruned = store.finalize(&BTreeSet::new(), 1);
        assert!(pruned.contains("orphan.png"));
        assert!(store.current().file_info.is_empty());
    }

    #[test]
    fn test_save_reload_keeps_previous_separate() {
        let dir = tempfile::tempdir().unwrap();
        let session = session(dir.path());
        let mut store = SnapshotStore::load(&session);
        store.upsert(&page("a.html", "A.md", &[], &[]));
        store.track("a.html", true);
        store.finalize(&BTreeSet::new(), 7);
        store.save(dir.path()).unwrap();

        let mut reloaded = SnapshotStore::load(&session);
        assert!(reloaded.had_file("a.html"));
        assert!(reloaded.old_page("a.html").is_some());
        assert!(reloaded.was_shown_in_tree("a.html"));
        // Current tracking starts empty; the previous copy is untouched by edits.
        assert!(reloaded.current().all_files.is_empty());
        reloaded.remove("a.html");
        assert!(reloaded.had_file("a.html"));
        assert!(!reloaded.current().file_info.contains_key("a.html"));
        assert_eq!(reloaded.current().created_time, session.started_at);
    }

    #[test]
    fn test_clear_cache_and_purge() {
        let dir = tempfile::tempdir().unwrap();
        let session = session(dir.path());
        fs::create_dir_all(dir.path().join("notes")).unwrap();
        fs::write(dir.path().join("notes/a.html"), "a").unwrap();
        fs::write(dir.path().join("keep.txt"), "keep").unwrap();

        let mut store = SnapshotStore::load(&session);
        store.upsert(&page("notes/a.html", "notes/A.md", &[], &[]));
        store.track("notes/a.html", true);
        store.track("missing.html", false);
        store.finalize(&BTreeSet::new(), 1);
        store.save(dir.path()).unwrap();

        let reloaded = SnapshotStore::load(&session);
        assert_eq!(reloaded.purge(dir.path()).unwrap(), 1);
        assert!(!dir.path().join("notes").exists());
        assert!(dir.path().join("keep.txt").exists());

        SnapshotStore::clear_cache(dir.path()).unwrap();
        assert!(!paths::metadata_path(dir.path()).exists());
        // Clearing twice is fine.
        SnapshotStore::clear_cache(dir.path()).unwrap();
    }

    #[test]
    fn test_purge_skips_paths_outside_destination() {
        let root = tempfile::tempdir().unwrap();
        let destination = root.path().join("site");
        fs::create_dir_all(&destination).unwrap();
        fs::write(destination.join("a.html"), "a").unwrap();
        fs::write(root.path().join("outside.txt"), "keep").unwrap();
        let absolute = root.path().join("absolute.txt");
        fs::write(&absolute, "keep").unwrap();

        let mut previous = Snapshot::new(1);
        previous.all_files = BTreeSet::from([
            "a.html".to_string(),
            "../outside.txt".to_string(),
            absolute.to_string_lossy().into_owned(),
        ]);
        let store = SnapshotStore::from_previous(Some(previous), &session(&destination));

        assert_eq!(store.purge(&destination).unwrap(), 1);
        assert!(!destination.join("a.html").exists());
        assert!(root.path().join("outside.txt").exists());
        assert!(absolute.exists());
    }
}
