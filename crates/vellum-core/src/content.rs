//! Structured content tree produced by the renderer.

use serde::{Deserialize, Serialize};

/// Kind of an element in the content tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum ElementKind {
    /// Generic block container.
    Section,
    /// Paragraph of prose.
    Paragraph,
    /// Heading with its level and anchor id.
    Heading { level: u8, id: String },
    /// Hyperlink to another export path or URL.
    Link { target: String },
    /// List or list item.
    List,
    /// Code block or inline code.
    Code,
    /// Callout / admonition block.
    Callout,
    /// Rendered formula.
    Math,
    /// Vector graphic.
    Svg,
    /// Embedded image.
    Image { src: String },
    /// Frontmatter block.
    Frontmatter,
    /// Metadata / properties container.
    Metadata,
    /// Decoration rendered after a heading (collapse indicators and similar).
    HeadingAfter,
    /// Inline stylesheet payload.
    Style,
    /// Inline script payload.
    Script,
}

impl ElementKind {
    /// Whether text under this element is readable page content.
    pub fn is_content(&self) -> bool {
        !matches!(
            self,
            Self::Math
                | Self::Svg
                | Self::Image { .. }
                | Self::Frontmatter
                | Self::Metadata
                | Self::HeadingAfter
                | Self::Style
                | Self::Script
        )
    }
}

/// A node of the content tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ContentNode {
    /// Text leaf.
    Text(String),
    /// Element with children.
    Element {
        #[serde(flatten)]
        kind: ElementKind,
        #[serde(default)]
        children: Vec<ContentNode>,
    },
}

impl Default for ContentNode {
    fn default() -> Self {
        Self::Element {
            kind: ElementKind::Section,
            children: Vec::new(),
        }
    }
}

impl ContentNode {
    /// Create a text node.
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }

    /// Create an element node.
    pub fn element(kind: ElementKind, children: Vec<ContentNode>) -> Self {
        Self::Element { kind, children }
    }

    /// Create a section containing the given children.
    pub fn section(children: Vec<ContentNode>) -> Self {
        Self::element(ElementKind::Section, children)
    }

    /// Create a paragraph holding a single text run.
    pub fn paragraph(text: impl Into<String>) -> Self {
        Self::element(ElementKind::Paragraph, vec![Self::text(text)])
    }

    /// Visit every text run that is readable content, in document order.
    ///
    /// Subtrees rooted at non-content elements are skipped entirely.
    pub fn for_each_text<'a>(&'a self, visit: &mut impl FnMut(&'a str)) {
        match self {
            Self::Text(text) => visit(text),
            Self::Element { kind, children } => {
                if !kind.is_content() {
                    return;
                }
                for child in children {
                    child.for_each_text(visit);
                }
            }
        }
    }

    /// Readable text with runs joined by single spaces and whitespace collapsed.
    pub fn visible_text(&self) -> String {
        let mut raw = String::new();
        self.for_each_text(&mut |text| {
            raw.push(' ');
            raw.push_str(text);
        });
        collapse_whitespace(&raw)
    }

    /// Link targets found anywhere in content subtrees.
    pub fn link_targets(&self) -> Vec<String> {
        let mut targets = Vec::new();
        self.collect_links(&mut targets);
        targets
    }

    fn collect_links(&self, targets: &mut Vec<String>) {
        if let Self::Element { kind, children } = self {
            if !kind.is_content() {
                return;
            }
            if let ElementKind::Link { target } = kind {
                targets.push(target.clone());
            }
            for child in children {
                child.collect_links(targets);
            }
        }
    }
}

/// Collapse runs of whitespace into single spaces and trim the ends.
pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
