//! RSS feed merging.
//!
//! Every qualifying page registered in a run contributes an item. Items
//! emitted by earlier runs are parsed back out of the previous `rss.xml` and
//! merged underneath, so pages that were not part of this run keep their
//! item until their source is deleted.

use std::{
    cmp::Reverse,
    collections::{BTreeMap, BTreeSet},
    fs,
    io::ErrorKind,
    path::Path,
};

use chrono::{DateTime, Utc};
use rss::{
    Channel, ChannelBuilder, EnclosureBuilder, GuidBuilder, ImageBuilder, Item, ItemBuilder,
    extension::dublincore::{self, DublinCoreExtension},
};
use tracing::{debug, info, warn};
use vellum_core::{Artifact, Config, GENERATOR_VERSION, paths};

use crate::{
    ExportError, Result,
    assets::{Asset, AssetType, InlinePolicy, Mutability, mime_for_extension},
    persist,
};

/// Channel description used when none is configured.
pub const DEFAULT_DESCRIPTION: &str = "Exported digital garden";

/// Minutes a reader may cache the feed.
pub const FEED_TTL_MINUTES: u32 = 60;

/// Namespace of the `content:encoded` element.
pub const CONTENT_NAMESPACE: &str = "http://purl.org/rss/1.0/modules/content/";

/// Characters kept when a page has no description.
const SHORT_DESCRIPTION_CHARS: usize = 200;

/// One feed entry, keyed by the source path of its page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedItem {
    pub guid: String,
    pub title: String,
    pub description: String,
    pub url: String,
    /// `None` when a previous feed carried an unparseable date.
    pub pub_date: Option<DateTime<Utc>>,
    pub author: String,
    pub cover_url: Option<String>,
}

impl FeedItem {
    /// Build the item for a page artifact.
    ///
    /// Returns `None` for attachments, generated pages without a source and
    /// pages whose visible text is shorter than `rss.min_content_length`.
    pub fn from_page(artifact: &Artifact, config: &Config) -> Option<Self> {
        let page = artifact.page_info()?;
        let guid = artifact.source_path.clone()?;

        let text = page.content.visible_text();
        if text.chars().count() < config.rss.min_content_length {
            debug!(path = %artifact.target_path, "Skipping feed item for page without content");
            return None;
        }

        let description = if page.description.is_empty() {
            shorten(&text, SHORT_DESCRIPTION_CHARS)
        } else {
            page.description.clone()
        };

        let author = if page.author.is_empty() {
            config.site.author.clone().unwrap_or_default()
        } else {
            page.author.clone()
        };

        Some(Self {
            guid,
            title: page.title.clone(),
            description,
            url: paths::join_url(&config.site.url, &artifact.target_path),
            pub_date: DateTime::from_timestamp_millis(artifact.source_stat.mtime),
            author,
            cover_url: Some(page.cover_image_url.clone()).filter(|url| !url.is_empty()),
        })
    }

    /// Read an item back from a parsed feed.
    ///
    /// Items without a guid fall back to their link; items with neither are
    /// dropped.
    pub fn from_item(item: &Item) -> Option<Self> {
        let guid = item
            .guid()
            .map(|guid| guid.value().to_string())
            .or_else(|| item.link().map(str::to_string))?;

        Some(Self {
            guid,
            title: item.title().unwrap_or_default().to_string(),
            description: item.description().unwrap_or_default().to_string(),
            url: item.link().unwrap_or_default().to_string(),
            pub_date: item
                .pub_date()
                .and_then(|date| DateTime::parse_from_rfc2822(date).ok())
                .map(|date| date.with_timezone(&Utc)),
            author: item.author().unwrap_or_default().to_string(),
            cover_url: item.enclosure().map(|enclosure| enclosure.url().to_string()),
        })
    }

    /// Convert into an RSS item.
    pub fn to_item(&self) -> Item {
        let guid = GuidBuilder::default()
            .value(self.guid.clone())
            .permalink(false)
            .build();

        let mut builder = ItemBuilder::default();
        builder.title(Some(self.title.clone()));
        builder.link(Some(self.url.clone()));
        builder.guid(Some(guid));
        builder.description(Some(self.description.clone()));
        builder.pub_date(self.pub_date.map(|date| date.to_rfc2822()));

        if !self.author.is_empty() {
            builder.author(Some(self.author.clone()));
        }

        if let Some(cover) = &self.cover_url {
            let enclosure = EnclosureBuilder::default()
                .url(cover.clone())
                .length("0".to_string())
                .mime_type(mime_for_extension(&paths::extension(cover)).to_string())
                .build();
            builder.enclosure(Some(enclosure));
            builder.content(Some(format!("<figure><img src=\"{cover}\"></figure>")));
        }

        builder.build()
    }
}

/// Parse the items of a feed document.
pub fn parse(xml: &str) -> Result<Vec<FeedItem>> {
    let channel = Channel::read_from(xml.as_bytes()).map_err(|e| ExportError::Feed(e.to_string()))?;
    Ok(channel.items().iter().filter_map(FeedItem::from_item).collect())
}

/// Merge current items over previously emitted ones.
///
/// Current items win over previous items with the same guid; previous items
/// whose guid was deleted are dropped. The result is newest first.
pub fn merge(
    current: Vec<FeedItem>,
    previous: Vec<FeedItem>,
    deleted: &BTreeSet<String>,
) -> Vec<FeedItem> {
    let current_guids: BTreeSet<String> = current.iter().map(|item| item.guid.clone()).collect();

    let mut merged = current;
    merged.extend(
        previous
            .into_iter()
            .filter(|item| !deleted.contains(&item.guid))
            .filter(|item| !current_guids.contains(&item.guid)),
    );
    sort_newest_first(&mut merged);
    merged
}

/// Stable sort by publication date, undated items last.
pub fn sort_newest_first(items: &mut [FeedItem]) {
    items.sort_by_key(|item| Reverse(item.pub_date));
}

/// Builder for the feed of one export run.
#[derive(Debug, Clone)]
pub struct FeedMerger {
    title: String,
    link: String,
    description: String,
    /// Absolute URL of the exported favicon.
    image_url: Option<String>,
    author: Option<String>,
    items: Vec<FeedItem>,
}

impl FeedMerger {
    /// Create an empty feed for a site.
    #[must_use]
    pub fn new(config: &Config) -> Self {
        let description = config
            .rss
            .description
            .clone()
            .or_else(|| config.site.description.clone())
            .unwrap_or_else(|| DEFAULT_DESCRIPTION.to_string());

        let image_url = config.site.favicon.as_deref().map(|favicon| {
            let asset = Asset::new(paths::file_name(favicon), Vec::new(), InlinePolicy::Download, Mutability::Static)
                .with_type(AssetType::Media);
            paths::join_url(&config.site.url, &asset.target_path(&config.export))
        });

        Self {
            title: config.site.name.clone(),
            link: config.site.url.clone(),
            description,
            image_url,
            author: config.site.author.clone().filter(|author| !author.is_empty()),
            items: Vec::new(),
        }
    }

    /// Add an item, replacing any item with the same guid.
    pub fn add(&mut self, item: FeedItem) {
        self.remove(&item.guid);
        self.items.push(item);
    }

    /// Remove the item with a guid. Returns whether one was present.
    pub fn remove(&mut self, guid: &str) -> bool {
        let before = self.items.len();
        self.items.retain(|item| item.guid != guid);
        self.items.len() != before
    }

    pub fn items(&self) -> &[FeedItem] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Merge with the feed previously written under `destination`.
    ///
    /// A missing previous feed merges nothing; an unreadable or unparseable
    /// one is warned about and skipped.
    pub fn merged(&self, destination: &Path, deleted: &BTreeSet<String>) -> Vec<FeedItem> {
        let path = paths::feed_path(destination);

        let previous = match fs::read_to_string(&path) {
            Ok(xml) => match parse(&xml) {
                Ok(items) => items,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Failed to parse previous feed, skipping merge");
                    Vec::new()
                }
            },
            Err(e) if e.kind() == ErrorKind::NotFound => Vec::new(),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to read previous feed, skipping merge");
                Vec::new()
            }
        };

        merge(self.items.clone(), previous, deleted)
    }

    /// Render a channel holding `items`.
    pub fn render(&self, items: &[FeedItem], last_build: i64) -> String {
        let mut namespaces = BTreeMap::from([("content".to_string(), CONTENT_NAMESPACE.to_string())]);
        let last_build_date = DateTime::from_timestamp_millis(last_build).map(|date| date.to_rfc2822());

        let image = self.image_url.as_ref().map(|url| {
            ImageBuilder::default()
                .url(url.clone())
                .title(self.title.clone())
                .link(self.link.clone())
                .build()
        });

        let creator = self.author.as_ref().map(|author| {
            namespaces.insert("dc".to_string(), dublincore::NAMESPACE.to_string());
            let mut extension = DublinCoreExtension::default();
            extension.set_creators(vec![author.clone()]);
            extension
        });

        let channel = ChannelBuilder::default()
            .title(self.title.clone())
            .link(self.link.clone())
            .description(self.description.clone())
            .copyright(self.author.clone())
            .generator(Some(format!("vellum {GENERATOR_VERSION}")))
            .last_build_date(last_build_date)
            .ttl(Some(FEED_TTL_MINUTES.to_string()))
            .image(image)
            .dublin_core_ext(creator)
            .namespaces(namespaces)
            .items(items.iter().map(FeedItem::to_item).collect::<Vec<_>>())
            .build();

        channel.to_string()
    }

    /// Merge with the previous feed and render the result.
    ///
    /// Returns the document and its number of items.
    pub fn prepare(&self, destination: &Path, deleted: &BTreeSet<String>, last_build: i64) -> (String, usize) {
        let items = self.merged(destination, deleted);
        debug!(items = items.len(), current = self.items.len(), "Merged RSS feed");
        (self.render(&items, last_build), items.len())
    }

    /// Merge with the previous feed and write `rss.xml`.
    ///
    /// Returns the number of items written.
    pub fn write(&self, destination: &Path, deleted: &BTreeSet<String>, last_build: i64) -> Result<usize> {
        let (xml, count) = self.prepare(destination, deleted, last_build);
        persist::write_atomic(&paths::feed_path(destination), xml.as_bytes())?;

        info!(items = count, current = self.items.len(), "Wrote RSS feed");
        Ok(count)
    }
}

fn shorten(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((end, _)) => format!("{}...", text[..end].trim_end()),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use vellum_core::{ContentNode, PageInfo, SourceStat};

    use super::*;

    fn item(guid: &str, millis: i64) -> FeedItem {
        FeedItem {
            guid: guid.to_string(),
            title: guid.to_uppercase(),
            description: format!("About {guid}"),
            url: format!("https://example.com/{guid}.html"),
            pub_date: DateTime::from_timestamp_millis(millis),
            author: String::new(),
            cover_url: None,
        }
    }

    fn guids(items: &[FeedItem]) -> Vec<&str> {
        items.iter().map(|item| item.guid.as_str()).collect()
    }

    fn page(body: &str, author: &str, cover: &str) -> Artifact {
        let info = PageInfo {
            title: "Note".to_string(),
            author: author.to_string(),
            cover_image_url: cover.to_string(),
            content: ContentNode::section(vec![ContentNode::paragraph(body)]),
            ..Default::default()
        };
        Artifact::page("notes/note.html", Vec::new(), SourceStat::new(0, 1_700_000_000_000, 10), info)
            .with_source("Notes/Note.md")
    }

    #[test]
    fn test_from_page() {
        let mut config = Config::default();
        config.site.url = "https://example.com".to_string();
        config.site.author = Some("Site Author".to_string());

        let item = FeedItem::from_page(&page("Some body text", "", ""), &config).unwrap();
        assert_eq!(item.guid, "Notes/Note.md");
        assert_eq!(item.url, "https://example.com/notes/note.html");
        assert_eq!(item.author, "Site Author");
        assert_eq!(item.description, "Some body text");
        assert_eq!(item.pub_date.unwrap().timestamp_millis(), 1_700_000_000_000);

        let item = FeedItem::from_page(&page("Some body text", "Page Author", ""), &config).unwrap();
        assert_eq!(item.author, "Page Author");
    }

    #[test]
    fn test_short_pages_are_skipped() {
        let config = Config::default();
        assert!(FeedItem::from_page(&page("hey", "", ""), &config).is_none());

        let attachment = Artifact::attachment("a.png", Vec::new(), SourceStat::default()).with_source("a.png");
        assert!(FeedItem::from_page(&attachment, &config).is_none());
    }

    #[test]
    fn test_render_and_parse() {
        let config = Config::default();
        let mut merger = FeedMerger::new(&config);
        let mut cover = item("a", 2_000);
        cover.cover_url = Some("https://example.com/cover.png".to_string());
        merger.add(cover.clone());
        merger.add(item("b", 1_000));

        let xml = merger.render(merger.items(), 3_000);
        assert!(xml.contains("<ttl>60</ttl>"));
        assert!(xml.contains(DEFAULT_DESCRIPTION));
        assert!(xml.contains("xmlns:content"));
        assert!(xml.contains("image/png"));

        let parsed = parse(&xml).unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0], cover);
    }

    #[test]
    fn test_channel_carries_site_metadata() {
        let mut config = Config::default();
        config.site.url = "https://example.com".to_string();
        config.site.author = Some("Ada".to_string());
        config.site.favicon = Some("Assets/Favicon.png".to_string());

        let mut merger = FeedMerger::new(&config);
        merger.add(item("a", 1_000));
        let xml = merger.render(merger.items(), 2_000);

        assert!(xml.contains("<copyright>Ada</copyright>"));
        assert!(xml.contains("<dc:creator>Ada</dc:creator>"));
        assert!(xml.contains("xmlns:dc=\"http://purl.org/dc/elements/1.1/\""));
        assert!(xml.contains("<image>"));
        assert!(xml.contains("<url>https://example.com/lib/media/favicon.png</url>"));

        let channel = Channel::read_from(xml.as_bytes()).unwrap();
        assert_eq!(channel.copyright(), Some("Ada"));
        assert_eq!(channel.image().map(|image| image.url()), Some("https://example.com/lib/media/favicon.png"));
        assert_eq!(parse(&xml).unwrap().len(), 1);
    }

    #[test]
    fn test_channel_without_site_metadata() {
        let xml = FeedMerger::new(&Config::default()).render(&[], 0);
        assert!(!xml.contains("<copyright>"));
        assert!(!xml.contains("<image>"));
        assert!(!xml.contains("dc:creator"));
    }

    #[test]
    fn test_add_replaces_same_guid() {
        let mut merger = FeedMerger::new(&Config::default());
        merger.add(item("a", 1));
        merger.add(item("a", 2));
        assert_eq!(merger.len(), 1);
        assert!(merger.remove("a"));
        assert!(!merger.remove("a"));
        assert!(merger.is_empty());
    }

    #[test]
    fn test_merge_supersedes_and_drops_deleted() {
        let previous = vec![item("a", 1_000), item("b", 2_000), item("c", 3_000)];
        let mut c_prime = item("c", 5_000);
        c_prime.title = "C prime".to_string();
        let current = vec![c_prime, item("d", 4_000)];
        let deleted = BTreeSet::from(["b".to_string()]);

        let merged = merge(current, previous, &deleted);
        assert_eq!(guids(&merged), vec!["c", "d", "a"]);
        assert_eq!(merged[0].title, "C prime");
    }

    #[test]
    fn test_undated_items_sort_last() {
        let mut undated = item("x", 0);
        undated.pub_date = None;
        let mut items = vec![undated, item("old", 1), item("new", 2)];
        sort_newest_first(&mut items);
        assert_eq!(guids(&items), vec!["new", "old", "x"]);
    }

    #[test]
    fn test_write_merges_previous_feed() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::default();

        let mut first = FeedMerger::new(&config);
        first.add(item("a", 1_000));
        first.add(item("b", 2_000));
        assert_eq!(first.write(dir.path(), &BTreeSet::new(), 0).unwrap(), 2);

        let mut second = FeedMerger::new(&config);
        second.add(item("c", 3_000));
        let deleted = BTreeSet::from(["a".to_string()]);
        assert_eq!(second.write(dir.path(), &deleted, 0).unwrap(), 2);

        let xml = fs::read_to_string(paths::feed_path(dir.path())).unwrap();
        assert_eq!(guids(&parse(&xml).unwrap()), vec!["c", "b"]);
    }

    #[test]
    fn test_unparseable_previous_feed_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(paths::feed_path(dir.path()), "<rss><channel>").unwrap();

        let mut merger = FeedMerger::new(&Config::default());
        merger.add(item("a", 1));
        let merged = merger.merged(dir.path(), &BTreeSet::new());
        assert_eq!(guids(&merged), vec!["a"]);
    }

    #[test]
    fn test_shorten() {
        assert_eq!(shorten("short", 10), "short");
        assert_eq!(shorten("abcdef ghij", 7), "abcdef...");
    }
}
