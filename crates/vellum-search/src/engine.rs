//! JSON-serialisable full-text search engine.
//!
//! Keeps a per-field inverted index with term frequencies and field lengths
//! and ranks matches with BM25. The whole engine round-trips through JSON,
//! so a reloaded index answers queries exactly like the one that was saved.

use std::{
    cmp::Ordering,
    collections::{BTreeMap, BTreeSet},
};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{Result, SearchDocument, SearchError};

/// Index format version.
pub const INDEX_VERSION: u32 = 1;

/// Indexed fields and their ranking boost.
pub const FIELD_BOOSTS: [(&str, f64); 6] = [
    ("title", 2.0),
    ("aliases", 1.5),
    ("headers", 1.5),
    ("tags", 1.5),
    ("path", 1.0),
    ("content", 1.0),
];

/// Words dropped from documents and queries.
pub const DEFAULT_STOP_WORDS: &[&str] = &[
    "a", "about", "actually", "almost", "also", "although", "always", "am", "an", "and", "any",
    "are", "as", "at", "be", "became", "become", "but", "by", "can", "could", "did", "do", "does",
    "each", "either", "else", "for", "from", "had", "has", "have", "hence", "how", "i", "if", "in",
    "is", "it", "its", "just", "may", "maybe", "me", "might", "mine", "must", "my", "neither",
    "nor", "not", "of", "oh", "ok", "when", "where", "whereas", "wherever", "whenever", "whether",
    "which", "while", "who", "whom", "whoever", "whose", "why", "will", "with", "within",
    "without", "would", "yes", "yet", "you", "your",
];

const BM25_K1: f64 = 1.2;
const BM25_B: f64 = 0.75;

/// Fields kept verbatim for result display.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredFields {
    pub title: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub headers: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IndexedDocument {
    id: String,
    stored: StoredFields,
    /// Token count per field.
    field_lengths: BTreeMap<String, u64>,
}

/// A ranked search result.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub id: String,
    pub score: f64,
    pub stored: StoredFields,
}

/// Full-text engine offering `has`, `add`, `discard` and `search`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchEngine {
    /// Index format version.
    pub version: u32,

    stop_words: BTreeSet<String>,

    next_id: u32,

    /// External id -> internal document number.
    ids: BTreeMap<String, u32>,

    documents: BTreeMap<u32, IndexedDocument>,

    /// Field -> term -> document number -> term frequency.
    postings: BTreeMap<String, BTreeMap<String, BTreeMap<u32, u32>>>,

    /// Field -> summed token count over all documents.
    total_lengths: BTreeMap<String, u64>,
}

impl SearchEngine {
    /// Create a new empty engine with the default stop words.
    #[must_use]
    pub fn new() -> Self {
        Self {
            version: INDEX_VERSION,
            stop_words: DEFAULT_STOP_WORDS.iter().map(|w| (*w).to_string()).collect(),
            next_id: 0,
            ids: BTreeMap::new(),
            documents: BTreeMap::new(),
            postings: BTreeMap::new(),
            total_lengths: BTreeMap::new(),
        }
    }

    /// Number of indexed documents.
    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// Whether a document with this id is indexed.
    pub fn has(&self, id: &str) -> bool {
        self.ids.contains_key(id)
    }

    /// Stored fields of an indexed document.
    pub fn stored(&self, id: &str) -> Option<&StoredFields> {
        let number = self.ids.get(id)?;
        self.documents.get(number).map(|doc| &doc.stored)
    }

    /// Ids of all indexed documents, sorted.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.ids.keys().map(String::as_str)
    }

    /// Add a document under its path.
    ///
    /// Fails if the id is already present; callers replace a document by
    /// discarding it first.
    pub fn add(&mut self, document: &SearchDocument) -> Result<()> {
        let id = document.path.clone();
        if self.has(&id) {
            return Err(SearchError::DuplicateDocument(id));
        }

        let number = self.next_id;
        self.next_id += 1;

        let mut field_lengths = BTreeMap::new();
        for (field, _) in FIELD_BOOSTS {
            let mut frequencies: BTreeMap<String, u32> = BTreeMap::new();
            let mut length = 0u64;

            for value in document.field_values(field) {
                for term in self.tokenize(value) {
                    *frequencies.entry(term).or_default() += 1;
                    length += 1;
                }
            }

            let field_postings = self.postings.entry(field.to_string()).or_default();
            for (term, tf) in frequencies {
                field_postings.entry(term).or_default().insert(number, tf);
            }

            *self.total_lengths.entry(field.to_string()).or_default() += length;
            field_lengths.insert(field.to_string(), length);
        }

        self.ids.insert(id.clone(), number);
        self.documents.insert(
            number,
            IndexedDocument {
                id,
                stored: StoredFields {
                    title: document.title.clone(),
                    aliases: document.aliases.clone(),
                    headers: document.headers.clone(),
                    tags: document.tags.clone(),
                    path: document.path.clone(),
                },
                field_lengths,
            },
        );

        Ok(())
    }

    /// Remove a document. Returns whether it was present.
    pub fn discard(&mut self, id: &str) -> bool {
        let Some(number) = self.ids.remove(id) else {
            return false;
        };

        if let Some(doc) = self.documents.remove(&number) {
            for (field, length) in &doc.field_lengths {
                if let Some(total) = self.total_lengths.get_mut(field) {
                    *total = total.saturating_sub(*length);
                }
            }
        }

        for field_postings in self.postings.values_mut() {
            field_postings.retain(|_, docs| {
                docs.remove(&number);
                !docs.is_empty()
            });
        }

        debug!(id, "Discarded search document");
        true
    }

    /// Rank documents matching any query term.
    ///
    /// Results are ordered by score, then by path.
    pub fn search(&self, query: &str, limit: usize) -> Vec<SearchHit> {
        let terms = self.tokenize(query);
        if terms.is_empty() || self.documents.is_empty() {
            return Vec::new();
        }

        let doc_count = self.documents.len() as f64;
        let mut scores: BTreeMap<u32, f64> = BTreeMap::new();

        for (field, boost) in FIELD_BOOSTS {
            let Some(field_postings) = self.postings.get(field) else {
                continue;
            };
            let total = self.total_lengths.get(field).copied().unwrap_or_default() as f64;
            let avg_length = if total > 0.0 { total / doc_count } else { 1.0 };

            for term in &terms {
                let Some(docs) = field_postings.get(term) else {
                    continue;
                };

                let matching = docs.len() as f64;
                let idf = (1.0 + (doc_count - matching + 0.5) / (matching + 0.5)).ln();

                for (number, tf) in docs {
                    let length = self
                        .documents
                        .get(number)
                        .and_then(|doc| doc.field_lengths.get(field))
                        .copied()
                        .unwrap_or_default() as f64;
                    let tf = f64::from(*tf);
                    let norm = tf + BM25_K1 * (1.0 - BM25_B + BM25_B * length / avg_length);
                    *scores.entry(*number).or_default() += boost * idf * tf * (BM25_K1 + 1.0) / norm;
                }
            }
        }

        let mut hits: Vec<SearchHit> = scores
            .into_iter()
            .filter_map(|(number, score)| {
                self.documents.get(&number).map(|doc| SearchHit {
                    id: doc.id.clone(),
                    score,
                    stored: doc.stored.clone(),
                })
            })
            .collect();

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.stored.path.cmp(&b.stored.path))
        });
        hits.truncate(limit);
        hits
    }

    /// Normalize a single term, or drop it if it is a stop word.
    pub fn process_term(&self, term: &str) -> Option<String> {
        let term = term.trim().to_lowercase();
        if term.is_empty() || self.stop_words.contains(&term) {
            None
        } else {
            Some(term)
        }
    }

    /// Split text into processed terms.
    pub fn tokenize(&self, text: &str) -> Vec<String> {
        text.split(|c: char| !c.is_alphanumeric())
            .filter_map(|word| self.process_term(word))
            .collect()
    }

    /// Serialize the engine to JSON.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| SearchError::Serialization(e.to_string()))
    }

    /// Deserialize an engine from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        let engine: Self =
            serde_json::from_str(json).map_err(|e| SearchError::Serialization(e.to_string()))?;

        if engine.version != INDEX_VERSION {
            return Err(SearchError::Serialization(format!(
                "unsupported index version {} (expected {INDEX_VERSION})",
                engine.version
            )));
        }

        Ok(engine)
    }
}

impl Default for SearchEngine {
    fn default() -> Self {
        Self::new()
    }
}
