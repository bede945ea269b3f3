//! Searchable document shape.

use serde::{Deserialize, Serialize};
use vellum_core::Artifact;

use crate::extract::{search_content, searchable_headers};

/// A document as handed to the search engine, keyed by its export path.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchDocument {
    pub title: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub headers: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub path: String,
    #[serde(default)]
    pub content: String,
}

impl SearchDocument {
    /// Build the search document of a page artifact.
    ///
    /// Returns `None` for attachments.
    pub fn from_artifact(artifact: &Artifact) -> Option<Self> {
        let page = artifact.page_info()?;

        Some(Self {
            title: page.title.clone(),
            aliases: page.aliases.clone(),
            headers: searchable_headers(&page.headers, &page.title),
            tags: page.tags.clone(),
            path: artifact.target_path.clone(),
            content: search_content(
                &page.description,
                &page.content,
                &page.outbound_link_targets,
            ),
        })
    }

    /// Text values of a named field.
    pub fn field_values(&self, field: &str) -> Vec<&str> {
        match field {
            "title" => vec![self.title.as_str()],
            "aliases" => self.aliases.iter().map(String::as_str).collect(),
            "headers" => self.headers.iter().map(String::as_str).collect(),
            "tags" => self.tags.iter().map(String::as_str).collect(),
            "path" => vec![self.path.as_str()],
            "content" => vec![self.content.as_str()],
            _ => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use vellum_core::{ContentNode, Heading, PageInfo, SourceStat};

    use super::*;

    #[test]
    fn test_from_page_artifact() {
        let info = PageInfo {
            title: "Gardening".to_string(),
            description: "Notes on soil".to_string(),
            tags: vec!["outdoors".to_string()],
            headers: vec![
                Heading::new("Gardening", 1, "gardening"),
                Heading::new("Compost", 2, "compost"),
            ],
            outbound_link_targets: vec!["compost.html".to_string()],
            content: ContentNode::section(vec![ContentNode::paragraph("Turn the pile weekly.")]),
            ..Default::default()
        };
        let artifact = Artifact::page("gardening.html", Vec::new(), SourceStat::default(), info);

        let doc = SearchDocument::from_artifact(&artifact).unwrap();
        assert_eq!(doc.path, "gardening.html");
        assert_eq!(doc.headers, vec!["Compost".to_string()]);
        assert_eq!(doc.content, "Notes on soil Turn the pile weekly. compost.html");
        assert_eq!(doc.field_values("tags"), vec!["outdoors"]);
    }

    #[test]
    fn test_attachment_has_no_document() {
        let artifact = Artifact::attachment("img.png", Vec::new(), SourceStat::default());
        assert!(SearchDocument::from_artifact(&artifact).is_none());
    }
}
