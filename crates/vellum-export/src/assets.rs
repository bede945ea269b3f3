//! Asset registry and incremental write filter.
//!
//! Assets are support files emitted next to pages: stylesheets, scripts,
//! media, fonts and markup fragments. Each asset is classified along three
//! independent axes: its [`AssetType`], its [`Mutability`] (how long a
//! computed instance stays valid) and its [`InlinePolicy`] (whether its bytes
//! are embedded in pages or referenced by path).
//!
//! Stylesheets may reference fonts and images through `url(...)`. Those
//! references become child assets written next to the other support files.

use std::collections::BTreeSet;

use regex::Regex;
use tracing::{debug, info, warn};
use vellum_core::{
    Artifact, ExportSession, SourceStat,
    config::ExportConfig,
    now_millis,
    paths::{self, LIBRARY_DIR},
};

use crate::{Result, snapshot::Snapshot};

/// Type of an asset, deciding its output folder and inclusion markup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AssetType {
    Style,
    Script,
    Media,
    Markup,
    Font,
    Other,
}

impl AssetType {
    /// Determine asset type from a file extension.
    pub fn from_extension(ext: &str) -> Self {
        match ext.trim_start_matches('.').to_lowercase().as_str() {
            "png" | "jpg" | "jpeg" | "gif" | "svg" | "webp" | "ico" | "mp4" | "webm" | "ogg"
            | "mp3" | "wav" | "flac" | "aac" | "m4a" | "opus" => Self::Media,
            "js" | "ts" => Self::Script,
            "css" | "scss" | "sass" | "less" => Self::Style,
            "html" | "htm" => Self::Markup,
            "ttf" | "woff" | "woff2" | "eot" | "otf" => Self::Font,
            _ => Self::Other,
        }
    }

    /// Default output folder, relative to the destination.
    pub fn output_dir(&self) -> &'static str {
        match self {
            Self::Style => "lib/styles",
            Self::Script => "lib/scripts",
            Self::Media => "lib/media",
            Self::Markup => "lib/html",
            Self::Font => "lib/fonts",
            Self::Other => LIBRARY_DIR,
        }
    }

    /// Name recorded in the snapshot.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Style => "style",
            Self::Script => "script",
            Self::Media => "media",
            Self::Markup => "html",
            Self::Font => "font",
            Self::Other => "other",
        }
    }

    /// Whether the configuration asks for this type to be inlined.
    fn inlined_by(&self, config: &ExportConfig) -> bool {
        match self {
            Self::Style => config.inline_css,
            Self::Script => config.inline_js,
            Self::Media => config.inline_media,
            Self::Markup => config.inline_html,
            Self::Font => config.inline_fonts,
            Self::Other => false,
        }
    }
}

/// When a computed asset instance may be reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mutability {
    /// Computed once per process; timestamp pinned to the registry build time.
    Static,
    /// Recomputed once per batch.
    Dynamic,
    /// Exists for the current batch only.
    Temporary,
}

/// Whether an asset is embedded into pages or referenced by path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InlinePolicy {
    /// Always embedded, in the page head.
    AlwaysInline,
    /// Always referenced from the page head.
    NeverInline,
    /// Embedded when the per-type inline flag is set, referenced otherwise.
    Auto,
    /// Like [`InlinePolicy::Auto`], included in the page head.
    AutoHead,
    /// Written to disk only, never included by the head.
    Download,
    /// Neither included nor written.
    None,
}

/// Loading attribute of an included asset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LoadMethod {
    #[default]
    Default,
    Async,
    Defer,
}

impl LoadMethod {
    fn attribute(&self) -> &'static str {
        match self {
            Self::Default => "",
            Self::Async => "async",
            Self::Defer => "defer",
        }
    }
}

/// A support file emitted alongside pages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Asset {
    pub filename: String,
    pub data: Vec<u8>,
    pub asset_type: AssetType,
    pub inline_policy: InlinePolicy,
    pub mutability: Mutability,
    pub load_method: LoadMethod,
    /// Higher priorities are included first.
    pub load_priority: i32,
    /// Modification time in milliseconds.
    pub modified_time: i64,
    /// Files referenced from a stylesheet, written alongside it.
    pub children: Vec<Asset>,
}

impl Asset {
    /// Create a new asset; its type is derived from the file name.
    #[must_use]
    pub fn new(
        filename: impl Into<String>,
        data: impl Into<Vec<u8>>,
        inline_policy: InlinePolicy,
        mutability: Mutability,
    ) -> Self {
        let filename = filename.into();
        Self {
            asset_type: AssetType::from_extension(&paths::extension(&filename)),
            filename,
            data: data.into(),
            inline_policy,
            mutability,
            load_method: LoadMethod::Default,
            load_priority: 100,
            modified_time: 0,
            children: Vec::new(),
        }
    }

    /// Override the derived asset type.
    #[must_use]
    pub fn with_type(mut self, asset_type: AssetType) -> Self {
        self.asset_type = asset_type;
        self
    }

    #[must_use]
    pub fn with_load_method(mut self, load_method: LoadMethod) -> Self {
        self.load_method = load_method;
        self
    }

    #[must_use]
    pub fn with_priority(mut self, load_priority: i32) -> Self {
        self.load_priority = load_priority;
        self
    }

    #[must_use]
    pub fn with_modified_time(mut self, modified_time: i64) -> Self {
        self.modified_time = modified_time;
        self
    }

    /// Extract the files a stylesheet references into child assets.
    ///
    /// `load` receives each `url(...)` reference as written and returns its
    /// bytes. References that are empty, remote or data URLs are left alone,
    /// as are references that fail to load. Children whose type is inlined
    /// by `config` are embedded as data URLs; the others are rewritten to the
    /// child's export path, relative to the stylesheet.
    pub fn with_children(
        mut self,
        config: &ExportConfig,
        load: impl Fn(&str) -> Option<Vec<u8>>,
    ) -> Result<Self> {
        if self.asset_type != AssetType::Style {
            return Ok(self);
        }

        let mut css = self.text().into_owned();
        let parent_path = self.target_path(config);
        let parent_dir = parent_path.rsplit_once('/').map_or("", |(dir, _)| dir);

        for url in style_urls(&css)? {
            let Some(data) = load(&url).filter(|data| !data.is_empty()) else {
                warn!(stylesheet = %self.filename, url = %url, "Failed to load stylesheet reference");
                continue;
            };

            let child = Asset::new(reference_file_name(&url), data, InlinePolicy::Download, self.mutability)
                .with_priority(self.load_priority)
                .with_modified_time(self.modified_time);

            if child.asset_type.inlined_by(config) {
                css = css.replace(&url, &child.data_url());
            } else {
                css = css.replace(&url, &relative_path(parent_dir, &child.target_path(config)));
                self.children.push(child);
            }
        }

        debug!(stylesheet = %self.filename, children = self.children.len(), "Extracted stylesheet children");
        self.data = css.into_bytes();
        Ok(self)
    }

    /// Set the lifecycle of the asset and its children.
    fn pin(&mut self, mutability: Mutability, modified_time: Option<i64>) {
        self.mutability = mutability;
        if let Some(time) = modified_time {
            self.modified_time = time;
        }
        for child in &mut self.children {
            child.pin(mutability, Some(self.modified_time));
        }
    }

    /// Export path of the asset.
    pub fn target_path(&self, config: &ExportConfig) -> String {
        let filename = if config.slugify_paths {
            paths::slugify_segment(&self.filename)
        } else {
            self.filename.clone()
        };
        format!("{}/{filename}", self.asset_type.output_dir())
    }

    /// Whether the asset's bytes are embedded into pages.
    pub fn is_inline(&self, config: &ExportConfig) -> bool {
        match self.inline_policy {
            InlinePolicy::AlwaysInline => true,
            InlinePolicy::Auto | InlinePolicy::AutoHead => self.asset_type.inlined_by(config),
            _ => false,
        }
    }

    /// Whether pages reference the asset by path.
    pub fn is_reference(&self, config: &ExportConfig) -> bool {
        match self.inline_policy {
            InlinePolicy::NeverInline | InlinePolicy::Download => true,
            InlinePolicy::Auto | InlinePolicy::AutoHead => !self.asset_type.inlined_by(config),
            _ => false,
        }
    }

    /// Whether the asset belongs in the page head.
    pub fn in_head(&self) -> bool {
        matches!(
            self.inline_policy,
            InlinePolicy::AlwaysInline | InlinePolicy::NeverInline | InlinePolicy::AutoHead
        )
    }

    /// Markup that includes the asset into a page.
    pub fn include_html(&self, config: &ExportConfig) -> String {
        let name = file_stem(&self.filename);

        if self.is_inline(config) {
            return match self.asset_type {
                AssetType::Style => format!("<style>{}</style>", self.text()),
                AssetType::Script => {
                    format!("<script {}>{}</script>", self.load_method.attribute(), self.text())
                }
                AssetType::Media => {
                    format!("<{} src=\"{}\"/>", self.media_tag(), self.data_url())
                }
                AssetType::Markup => self.text().into_owned(),
                AssetType::Font => format!(
                    "<style>@font-face{{font-family:'{name}';src:url({}) format('woff2');}}</style>",
                    self.data_url()
                ),
                AssetType::Other => String::new(),
            };
        }

        if self.is_reference(config) {
            let path = self.target_path(config);
            return match self.asset_type {
                AssetType::Style if self.load_method == LoadMethod::Async => format!(
                    "<link rel=\"preload\" href=\"{path}\" as=\"style\" onload=\"this.onload=null;this.rel='stylesheet'\"><noscript><link rel=\"stylesheet\" href=\"{path}\"></noscript>"
                ),
                AssetType::Style => format!("<link rel=\"stylesheet\" href=\"{path}\">"),
                AssetType::Script => format!(
                    "<script {} id=\"{name}-script\" src=\"{path}\"></script>",
                    self.load_method.attribute()
                ),
                AssetType::Media => {
                    let loading = match self.load_method {
                        LoadMethod::Default => "",
                        LoadMethod::Defer => " loading='eager'",
                        LoadMethod::Async => " loading='lazy'",
                    };
                    format!("<{} src=\"{path}\"{loading} />", self.media_tag())
                }
                AssetType::Font => format!(
                    "<style>@font-face{{font-family:'{name}';src:url('{path}') format('woff2');}}</style>"
                ),
                AssetType::Markup => format!("<include src=\"{path}\"></include>"),
                AssetType::Other => String::new(),
            };
        }

        debug!(filename = %self.filename, "Asset is neither inlined nor referenced");
        String::new()
    }

    /// Convert into an attachment artifact.
    pub fn to_artifact(&self, config: &ExportConfig) -> Artifact {
        let stat = SourceStat::new(self.modified_time, self.modified_time, self.data.len() as u64);
        Artifact::attachment(self.target_path(config), self.data.clone(), stat)
    }

    fn text(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.data)
    }

    fn media_tag(&self) -> &'static str {
        match paths::extension(&self.filename).as_str() {
            "mp4" | "webm" | "ogg" | "mov" | "mpeg" => "video",
            "mp3" | "wav" | "flac" | "aac" | "m4a" | "opus" => "audio",
            "pdf" => "embed",
            _ => "img",
        }
    }

    fn data_url(&self) -> String {
        let mime = mime_for_extension(&paths::extension(&self.filename));
        format!("data:{mime};base64,{}", encode_base64(&self.data))
    }
}

/// Produces a dynamic asset for one batch.
pub type AssetLoader = Box<dyn Fn(&ExportSession) -> Result<Asset> + Send + Sync>;

/// Registry of every asset known to the exporter.
pub struct AssetRegistry {
    build_time: i64,
    static_assets: Vec<Asset>,
    loaders: Vec<(String, AssetLoader)>,
    dynamic_assets: Vec<Asset>,
    temporary_assets: Vec<Asset>,
}

impl std::fmt::Debug for AssetRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AssetRegistry")
            .field("build_time", &self.build_time)
            .field("static_assets", &self.static_assets.len())
            .field("loaders", &self.loaders.len())
            .field("dynamic_assets", &self.dynamic_assets.len())
            .field("temporary_assets", &self.temporary_assets.len())
            .finish()
    }
}

impl Default for AssetRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl AssetRegistry {
    /// Create a new registry built now.
    #[must_use]
    pub fn new() -> Self {
        Self::with_build_time(now_millis())
    }

    /// Create a new registry with an explicit build time.
    #[must_use]
    pub fn with_build_time(build_time: i64) -> Self {
        Self {
            build_time,
            static_assets: Vec::new(),
            loaders: Vec::new(),
            dynamic_assets: Vec::new(),
            temporary_assets: Vec::new(),
        }
    }

    pub fn build_time(&self) -> i64 {
        self.build_time
    }

    /// Register an asset that never changes while the process runs.
    pub fn add_static(&mut self, mut asset: Asset) {
        asset.pin(Mutability::Static, Some(self.build_time));
        self.static_assets.push(asset);
    }

    /// Register a loader recomputed at the start of every batch.
    pub fn add_dynamic(
        &mut self,
        name: impl Into<String>,
        loader: impl Fn(&ExportSession) -> Result<Asset> + Send + Sync + 'static,
    ) {
        self.loaders.push((name.into(), Box::new(loader)));
    }

    /// Register an asset for the current batch only.
    pub fn add_temporary(&mut self, mut asset: Asset) {
        asset.pin(Mutability::Temporary, None);
        self.temporary_assets.push(asset);
    }

    /// Recompute dynamic assets and drop leftovers of the previous batch.
    pub fn begin_batch(&mut self, session: &ExportSession) {
        self.temporary_assets.clear();
        self.dynamic_assets.clear();

        for (name, loader) in &self.loaders {
            match loader(session) {
                Ok(mut asset) => {
                    let modified_time = (asset.modified_time == 0).then_some(session.started_at);
                    asset.pin(Mutability::Dynamic, modified_time);
                    self.dynamic_assets.push(asset);
                }
                Err(e) => warn!(asset = %name, error = %e, "Failed to load dynamic asset"),
            }
        }

        debug!(
            static_assets = self.static_assets.len(),
            dynamic_assets = self.dynamic_assets.len(),
            "Prepared assets for batch"
        );
    }

    /// Discard temporary assets.
    pub fn end_batch(&mut self) {
        self.temporary_assets.clear();
    }

    /// All assets in registration precedence: dynamic, static, temporary.
    pub fn assets(&self) -> impl Iterator<Item = &Asset> {
        self.dynamic_assets
            .iter()
            .chain(&self.static_assets)
            .chain(&self.temporary_assets)
    }

    /// Assets to be written as files for this batch.
    ///
    /// Stylesheet children follow their parent, even when the parent itself
    /// is inlined. Inlined, excluded and empty assets are left out; duplicate
    /// paths keep the first registered asset. Sorted by load priority,
    /// highest first.
    pub fn downloads(&self, session: &ExportSession) -> Vec<Artifact> {
        let config = &session.config.export;
        let mut seen = BTreeSet::new();

        let mut assets: Vec<&Asset> = self
            .filtered(config)
            .flat_map(|asset| std::iter::once(asset).chain(&asset.children))
            .filter(|asset| !asset.data.is_empty())
            .filter(|asset| asset.is_reference(config))
            .filter(|asset| seen.insert(asset.target_path(config)))
            .collect();
        assets.sort_by(|a, b| b.load_priority.cmp(&a.load_priority));

        info!(count = assets.len(), "Collected asset downloads");
        assets
            .into_iter()
            .map(|asset| asset.to_artifact(config))
            .collect()
    }

    /// Inclusion markup of every head asset.
    pub fn head_html(&self, config: &ExportConfig) -> String {
        let mut seen = BTreeSet::new();
        let mut assets: Vec<&Asset> = self
            .filtered(config)
            .filter(|asset| asset.in_head())
            .filter(|asset| seen.insert(asset.target_path(config)))
            .collect();
        assets.sort_by(|a, b| b.load_priority.cmp(&a.load_priority));

        assets
            .into_iter()
            .map(|asset| asset.include_html(config))
            .collect()
    }

    fn filtered<'a>(&'a self, config: &'a ExportConfig) -> impl Iterator<Item = &'a Asset> {
        self.assets()
            .filter(|asset| asset.inline_policy != InlinePolicy::None)
            .filter(move |asset| config.include_css || asset.asset_type != AssetType::Style)
            .filter(move |asset| config.include_js || asset.asset_type != AssetType::Script)
            .filter(|asset| !asset.data.is_empty())
    }
}

/// Final list of artifacts to write.
///
/// Duplicate target paths keep the first artifact. When `incremental` is set
/// and a previous snapshot exists, artifacts unchanged since that snapshot
/// are dropped. Paths in `changed` (reported new or updated by the change
/// classifier) are always kept, fonts excepted.
pub fn write_set(
    candidates: Vec<Artifact>,
    previous: Option<&Snapshot>,
    incremental: bool,
    changed: &BTreeSet<String>,
) -> Vec<Artifact> {
    let mut seen = BTreeSet::new();
    let unique: Vec<Artifact> = candidates
        .into_iter()
        .filter(|artifact| seen.insert(artifact.target_path.clone()))
        .collect();

    let total = unique.len();
    let selected: Vec<Artifact> = match previous {
        Some(previous) if incremental => unique
            .into_iter()
            .filter(|artifact| needs_write(artifact, previous, changed))
            .collect(),
        _ => unique,
    };

    info!(total, written = selected.len(), "Computed write set");
    selected
}

/// Incremental write rule for one artifact.
pub fn needs_write(artifact: &Artifact, previous: &Snapshot, changed: &BTreeSet<String>) -> bool {
    let asset_type = AssetType::from_extension(&artifact.extension());
    if artifact.is_page() || asset_type == AssetType::Markup {
        return true;
    }

    let Some(old) = previous.file_info.get(&artifact.target_path) else {
        return true;
    };

    if asset_type == AssetType::Font {
        return false;
    }

    if changed.contains(&artifact.target_path) {
        return true;
    }

    artifact.source_stat.mtime > old.modified_time && artifact.source_stat.size != old.source_size
}

/// Quoted `url(...)` references of a stylesheet worth extracting.
///
/// Empty, remote and data URLs are skipped; duplicates are reported once.
pub fn style_urls(css: &str) -> Result<Vec<String>> {
    let pattern = Regex::new(r#"url\("([^"]+)"\)|url\('([^']+)'\)"#)?;
    let mut seen = BTreeSet::new();

    Ok(pattern
        .captures_iter(css)
        .filter_map(|caps| caps.get(1).or_else(|| caps.get(2)))
        .map(|url| url.as_str().trim().to_string())
        .filter(|url| !url.is_empty() && !url.starts_with("http") && !url.starts_with("data:"))
        .filter(|url| seen.insert(url.clone()))
        .collect())
}

/// File name of a stylesheet reference, without query or fragment.
fn reference_file_name(url: &str) -> &str {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    paths::file_name(path)
}

/// Path of `target` relative to the folder `from_dir`.
fn relative_path(from_dir: &str, target: &str) -> String {
    let from: Vec<&str> = from_dir.split('/').filter(|s| !s.is_empty()).collect();
    let to: Vec<&str> = target.split('/').filter(|s| !s.is_empty()).collect();
    let common = from.iter().zip(&to).take_while(|(a, b)| a == b).count();

    let mut parts = vec![".."; from.len() - common];
    parts.extend(&to[common..]);
    parts.join("/")
}

/// MIME type guessed from a file extension.
pub fn mime_for_extension(ext: &str) -> &'static str {
    match ext.trim_start_matches('.').to_lowercase().as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "webp" => "image/webp",
        "ico" => "image/x-icon",
        "avif" => "image/avif",
        "bmp" => "image/bmp",
        "tiff" => "image/tiff",
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        "ogg" => "video/ogg",
        "mov" => "video/quicktime",
        "mp3" => "audio/mpeg",
        "wav" => "audio/x-wav",
        "flac" => "audio/flac",
        "aac" => "audio/aac",
        "m4a" => "audio/mp4",
        "opus" => "audio/opus",
        "pdf" => "application/pdf",
        "css" => "text/css",
        "js" => "application/javascript",
        "json" => "application/json",
        "html" | "htm" => "text/html",
        "txt" => "text/plain",
        "woff" => "font/woff",
        "woff2" => "font/woff2",
        "ttf" => "font/ttf",
        "otf" => "font/otf",
        "eot" => "application/vnd.ms-fontobject",
        _ => "application/octet-stream",
    }
}

fn file_stem(filename: &str) -> &str {
    let name = paths::file_name(filename);
    match name.rfind('.') {
        Some(pos) if pos > 0 => &name[..pos],
        _ => name,
    }
}

const BASE64_ALPHABET: &[u8; 64] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";

fn encode_base64(data: &[u8]) -> String {
    let mut out = String::with_capacity(data.len().div_ceil(3) * 4);

    for chunk in data.chunks(3) {
        let b = [
            chunk[0],
            chunk.get(1).copied().unwrap_or(0),
            chunk.get(2).copied().unwrap_or(0),
        ];
        let n = (u32::from(b[0]) << 16) | (u32::from(b[1]) << 8) | u32::from(b[2]);

        out.push(BASE64_ALPHABET[(n >> 18) as usize & 63] as char);
        out.push(BASE64_ALPHABET[(n >> 12) as usize & 63] as char);
        if chunk.len() > 1 {
            out.push(BASE64_ALPHABET[(n >> 6) as usize & 63] as char);
        } else {
            out.push('=');
        }
        if chunk.len() > 2 {
            out.push(BASE64_ALPHABET[n as usize & 63] as char);
        } else {
            out.push('=');
        }
    }

    out
}
