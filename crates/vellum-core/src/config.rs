//! Export configuration management.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

/// Main configuration structure for Vellum.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Site-wide settings.
    #[serde(default)]
    pub site: SiteConfig,

    /// Export settings.
    #[serde(default)]
    pub export: ExportConfig,

    /// Search settings.
    #[serde(default)]
    pub search: SearchConfig,

    /// RSS feed settings.
    #[serde(default)]
    pub rss: RssConfig,
}

/// Site-wide configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteConfig {
    /// Site name, used as the feed title and stored in the snapshot.
    pub name: String,

    /// Public URL of the site (e.g., "https://example.com").
    #[serde(default)]
    pub url: String,

    /// Default author for feed items.
    #[serde(default)]
    pub author: Option<String>,

    /// Site description.
    #[serde(default)]
    pub description: Option<String>,

    /// Theme name recorded in the snapshot.
    #[serde(default = "default_theme")]
    pub theme: String,

    /// Path of the favicon inside the source collection, if any.
    #[serde(default)]
    pub favicon: Option<String>,
}

/// Export behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportConfig {
    /// Only rewrite artifacts that changed since the previous export.
    #[serde(default = "default_true")]
    pub incremental: bool,

    /// Source folder that maps to the site root. Empty means the collection root.
    #[serde(default)]
    pub export_root: String,

    /// Lower-case and dash-separate output paths.
    #[serde(default = "default_true")]
    pub slugify_paths: bool,

    /// Embed every artifact's data in the snapshot.
    #[serde(default)]
    pub combine_as_single_file: bool,

    /// Inline stylesheets instead of referencing them.
    #[serde(default)]
    pub inline_css: bool,

    /// Inline scripts instead of referencing them.
    #[serde(default)]
    pub inline_js: bool,

    /// Inline media as data URLs.
    #[serde(default)]
    pub inline_media: bool,

    /// Inline fonts as data URLs.
    #[serde(default)]
    pub inline_fonts: bool,

    /// Inline reusable markup fragments.
    #[serde(default)]
    pub inline_html: bool,

    /// Emit stylesheet assets at all.
    #[serde(default = "default_true")]
    pub include_css: bool,

    /// Emit script assets at all.
    #[serde(default = "default_true")]
    pub include_js: bool,
}

/// Search configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Whether the search index is maintained.
    #[serde(default = "default_true")]
    pub enabled: bool,
}

/// RSS feed configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RssConfig {
    /// Whether the feed is generated.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Pages with less visible text than this are left out of the feed.
    #[serde(default = "default_min_content_length")]
    pub min_content_length: usize,

    /// Channel description.
    #[serde(default)]
    pub description: Option<String>,
}

// Default value functions
fn default_true() -> bool {
    true
}

fn default_theme() -> String {
    "Default".to_string()
}

fn default_min_content_length() -> usize {
    5
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            name: "My Site".to_string(),
            url: String::new(),
            author: None,
            description: None,
            theme: default_theme(),
            favicon: None,
        }
    }
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            incremental: true,
            export_root: String::new(),
            slugify_paths: true,
            combine_as_single_file: false,
            inline_css: false,
            inline_js: false,
            inline_media: false,
            inline_fonts: false,
            inline_html: false,
            include_css: true,
            include_js: true,
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

impl Default for RssConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_content_length: default_min_content_length(),
            description: None,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(CoreError::config(format!(
                "Configuration file not found: {}",
                path.display()
            )));
        }

        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content).map_err(|e| {
            CoreError::config_with_source(
                format!("Failed to parse config file: {}", path.display()),
                e,
            )
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration, layering `VELLUM__SECTION__KEY` environment variables on top.
    pub fn load_with_env(path: &Path) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path))
            .add_source(config::Environment::with_prefix("VELLUM").separator("__"))
            .build()?;

        let config: Config = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.site.name.is_empty() {
            return Err(CoreError::config("site.name cannot be empty"));
        }

        if self.site.url.ends_with('/') {
            tracing::warn!("site.url should not have a trailing slash");
        }

        if self.rss.enabled && self.site.url.is_empty() {
            tracing::warn!("an RSS feed needs site.url to produce absolute links");
        }

        Ok(())
    }

    /// Get the full URL for an export path.
    pub fn url_for(&self, path: &str) -> String {
        crate::paths::join_url(&self.site.url, path)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn create_test_config() -> String {
        r#"
[site]
name = "Garden"
url = "https://example.com"
author = "Ada"
theme = "Minimal"

[export]
incremental = false
export_root = "notes"
inline_css = true

[search]
enabled = false

[rss]
min_content_length = 12
"#
        .to_string()
    }

    #[test]
    fn test_load_config() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let config_path = dir.path().join("vellum.toml");
        let mut file = std::fs::File::create(&config_path).expect("create file");
        file.write_all(create_test_config().as_bytes())
            .expect("write");

        let config = Config::load(&config_path).expect("load config");

        assert_eq!(config.site.name, "Garden");
        assert_eq!(config.site.url, "https://example.com");
        assert_eq!(config.site.author.as_deref(), Some("Ada"));
        assert_eq!(config.site.theme, "Minimal");
        assert!(!config.export.incremental);
        assert_eq!(config.export.export_root, "notes");
        assert!(config.export.inline_css);
        assert!(config.export.slugify_paths);
        assert!(!config.search.enabled);
        assert!(config.rss.enabled);
        assert_eq!(config.rss.min_content_length, 12);
    }

    #[test]
    fn test_config_defaults() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let config_path = dir.path().join("vellum.toml");
        std::fs::write(&config_path, "[site]\nname = \"Minimal\"\n").expect("write");

        let config = Config::load(&config_path).expect("load config");

        assert_eq!(config.site.theme, "Default");
        assert!(config.export.incremental);
        assert!(config.export.include_css);
        assert!(!config.export.combine_as_single_file);
        assert!(config.search.enabled);
        assert_eq!(config.rss.min_content_length, 5);
    }

    #[test]
    fn test_config_validation_empty_name() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let config_path = dir.path().join("vellum.toml");
        std::fs::write(&config_path, "[site]\nname = \"\"\n").expect("write");

        let result = Config::load(&config_path);
        assert!(result.is_err());
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("name cannot be empty")
        );
    }

    #[test]
    fn test_load_with_env_reads_file() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let config_path = dir.path().join("vellum.toml");
        std::fs::write(&config_path, create_test_config()).expect("write");

        let config = Config::load_with_env(&config_path).expect("load config");
        assert_eq!(config.site.name, "Garden");
        assert_eq!(config.export.export_root, "notes");
        assert_eq!(config.rss.min_content_length, 12);
    }

    #[test]
    fn test_config_not_found() {
        let result = Config::load(Path::new("/nonexistent/vellum.toml"));
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("not found"));
    }

    #[test]
    fn test_url_for() {
        let mut config = Config::default();
        config.site.url = "https://example.com/".to_string();

        assert_eq!(
            config.url_for("notes/hello.html"),
            "https://example.com/notes/hello.html"
        );
        assert_eq!(
            config.url_for("/notes/hello.html"),
            "https://example.com/notes/hello.html"
        );
    }
}
