//! Search index maintenance across export runs.
//!
//! Loads the index persisted by the previous run, applies per-page upserts
//! and removals, and writes it back once at the end of the batch.

use std::{fs, path::Path};

use tracing::{debug, info, warn};
use vellum_core::{Artifact, paths};

use crate::{Result, SearchDocument, SearchEngine, SearchError, SearchHit};

/// Size above which a warning is logged when saving (2MB).
pub const MAX_RECOMMENDED_INDEX_SIZE: usize = 2 * 1024 * 1024;

/// Maintainer of the persisted search index of one destination.
#[derive(Debug, Clone, Default)]
pub struct SearchIndex {
    engine: SearchEngine,
    loaded: bool,
}

impl SearchIndex {
    /// Create a new empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the index persisted under a destination.
    ///
    /// A missing or unreadable index yields an empty one; the batch continues.
    pub fn load(destination: &Path) -> Self {
        let path = paths::search_index_path(destination);

        let json = match fs::read_to_string(&path) {
            Ok(json) => json,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "No search index found, creating a new one");
                return Self::new();
            }
        };

        match SearchEngine::from_json(&json) {
            Ok(engine) => {
                debug!(documents = engine.len(), "Loaded search index");
                Self {
                    engine,
                    loaded: true,
                }
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to load search index, creating a new one");
                Self::new()
            }
        }
    }

    /// Whether a previous index was loaded from disk.
    pub fn was_loaded(&self) -> bool {
        self.loaded
    }

    pub fn len(&self) -> usize {
        self.engine.len()
    }

    pub fn is_empty(&self) -> bool {
        self.engine.is_empty()
    }

    pub fn has(&self, path: &str) -> bool {
        self.engine.has(path)
    }

    pub fn engine(&self) -> &SearchEngine {
        &self.engine
    }

    /// Rank indexed pages against a query.
    pub fn search(&self, query: &str, limit: usize) -> Vec<SearchHit> {
        self.engine.search(query, limit)
    }

    /// Upsert a prepared document.
    pub fn upsert(&mut self, document: &SearchDocument) -> Result<()> {
        if self.engine.has(&document.path) {
            self.engine.discard(&document.path);
        }
        self.engine.add(document)
    }

    /// Index a page artifact, replacing any previous entry for its path.
    ///
    /// Attachments are ignored. Returns whether a document was indexed.
    pub fn index_page(&mut self, artifact: &Artifact) -> Result<bool> {
        let Some(document) = SearchDocument::from_artifact(artifact) else {
            return Ok(false);
        };
        self.upsert(&document)?;
        Ok(true)
    }

    /// Remove the entry for an export path, if any.
    pub fn remove(&mut self, path: &str) -> bool {
        self.engine.discard(path)
    }

    /// Drop every entry whose path fails the predicate.
    ///
    /// Returns the number of entries removed.
    pub fn retain(&mut self, keep: impl Fn(&str) -> bool) -> usize {
        let stale: Vec<String> = self
            .engine
            .ids()
            .filter(|id| !keep(id))
            .map(str::to_string)
            .collect();

        for id in &stale {
            self.engine.discard(id);
        }
        if !stale.is_empty() {
            debug!(removed = stale.len(), "Dropped stale search entries");
        }
        stale.len()
    }

    /// Serialize the index to JSON.
    pub fn to_json(&self) -> Result<String> {
        self.engine.to_json()
    }

    /// Serialize the index for persisting, warning when it grows too large.
    pub fn serialize(&self) -> Result<String> {
        let json = self.to_json()?;
        if json.len() > MAX_RECOMMENDED_INDEX_SIZE {
            warn!(
                size = json.len(),
                max = MAX_RECOMMENDED_INDEX_SIZE,
                "Search index exceeds recommended size"
            );
        }
        Ok(json)
    }

    /// Write the index under a destination, creating the library folder.
    pub fn save(&self, destination: &Path) -> Result<()> {
        let path = paths::search_index_path(destination);
        let json = self.serialize()?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| SearchError::Io(e.to_string()))?;
        }
        fs::write(&path, json).map_err(|e| SearchError::Io(e.to_string()))?;

        info!(documents = self.len(), path = %path.display(), "Wrote search index");
        Ok(())
    }
}
