//! Output path conventions.
//!
//! Export paths are always relative, forward-slash separated strings. They
//! double as the primary key of every persisted record.

use std::path::{Component, Path, PathBuf};

use crate::error::{CoreError, Result};

/// Folder under the destination holding generated support files.
pub const LIBRARY_DIR: &str = "lib";

/// Snapshot file name inside [`LIBRARY_DIR`].
pub const METADATA_FILE: &str = "metadata.json";

/// Search index file name inside [`LIBRARY_DIR`].
pub const SEARCH_INDEX_FILE: &str = "search-index.json";

/// Feed file name at the site root.
pub const FEED_FILE: &str = "rss.xml";

/// Source extensions the renderer turns into pages.
const CONVERTIBLE_EXTENSIONS: &[&str] = &["md", "canvas"];

/// Location of the persisted snapshot for a destination.
pub fn metadata_path(destination: &Path) -> PathBuf {
    destination.join(LIBRARY_DIR).join(METADATA_FILE)
}

/// Location of the persisted search index for a destination.
pub fn search_index_path(destination: &Path) -> PathBuf {
    destination.join(LIBRARY_DIR).join(SEARCH_INDEX_FILE)
}

/// Location of the feed for a destination.
pub fn feed_path(destination: &Path) -> PathBuf {
    destination.join(FEED_FILE)
}

/// Whether a source with this extension is rendered into a page.
pub fn is_convertible(extension: &str) -> bool {
    let ext = extension.trim_start_matches('.').to_lowercase();
    CONVERTIBLE_EXTENSIONS.contains(&ext.as_str())
}

/// Lower-case extension of a forward-slash path, without the dot.
pub fn extension(path: &str) -> String {
    let name = path.rsplit('/').next().unwrap_or(path);
    match name.rfind('.') {
        Some(pos) if pos > 0 => name[pos + 1..].to_lowercase(),
        _ => String::new(),
    }
}

/// File name component of a forward-slash path.
pub fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Whether a forward-slash path stays below the directory it is joined to.
///
/// Absolute paths, drive prefixes and `..` segments are rejected.
pub fn is_safe_relative(path: &str) -> bool {
    !path.is_empty()
        && !path.starts_with('/')
        && Path::new(path)
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

/// Compute the export path of a source file.
///
/// The export root is stripped, convertible documents get an `.html`
/// extension and, when requested, every segment is slugified.
pub fn target_path_for(source_path: &str, export_root: &str, slugify: bool) -> Result<String> {
    let normalized = source_path.replace('\\', "/");
    let normalized = normalized.trim_start_matches("./");

    if normalized.starts_with('/') {
        return Err(CoreError::invalid_path(
            normalized,
            "export targets must be relative",
        ));
    }

    let root = export_root.replace('\\', "/");
    let root = root.trim_matches('/');
    let relative = if root.is_empty() {
        normalized
    } else {
        normalized
            .strip_prefix(root)
            .and_then(|rest| rest.strip_prefix('/'))
            .unwrap_or(normalized)
    };

    if relative.is_empty() || relative.ends_with('/') {
        return Err(CoreError::invalid_path(relative, "target must be a file"));
    }

    if !is_safe_relative(relative) {
        return Err(CoreError::invalid_path(
            relative,
            "export targets must stay inside the destination",
        ));
    }

    let mut target = relative.to_string();
    let ext = extension(&target);
    if is_convertible(&ext) {
        target.truncate(target.len() - ext.len());
        target.push_str("html");
    }

    if slugify {
        target = target
            .split('/')
            .map(slugify_segment)
            .collect::<Vec<_>>()
            .join("/");
    }

    Ok(target)
}

/// Slugify a single path segment, keeping its extension dot.
pub fn slugify_segment(segment: &str) -> String {
    let mut slug = String::with_capacity(segment.len());
    let mut last_dash = false;

    for c in segment.chars().flat_map(char::to_lowercase) {
        if c.is_alphanumeric() || c == '.' || c == '_' {
            slug.push(c);
            last_dash = false;
        } else if (c.is_whitespace() || c == '-') && !last_dash && !slug.is_empty() {
            slug.push('-');
            last_dash = true;
        }
    }

    while slug.ends_with('-') {
        slug.pop();
    }
    slug.replace("-.", ".")
}

/// Relative path from an export path back to the site root.
pub fn path_to_root(target_path: &str) -> String {
    let depth = target_path.trim_matches('/').matches('/').count();
    if depth == 0 {
        ".".to_string()
    } else {
        vec![".."; depth].join("/")
    }
}

/// Join a base URL and an export path with exactly one slash.
pub fn join_url(base: &str, path: &str) -> String {
    let base = base.trim_end_matches('/');
    let path = path.trim_start_matches('/');
    if base.is_empty() {
        path.to_string()
    } else {
        format!("{base}/{path}")
    }
}
