//! Plain-text extraction from rendered content.

use vellum_core::{ContentNode, Heading, content::collapse_whitespace};

/// Searchable content of a page.
///
/// Description, readable text and outbound link targets, with whitespace
/// collapsed.
pub fn search_content(description: &str, content: &ContentNode, links: &[String]) -> String {
    let mut raw = String::from(description);

    content.for_each_text(&mut |text| {
        raw.push(' ');
        raw.push_str(text);
        raw.push(' ');
    });

    for link in links {
        raw.push(' ');
        raw.push_str(link);
    }

    collapse_whitespace(&raw)
}

/// Heading texts to index.
///
/// A leading level-one heading that repeats the title is dropped.
pub fn searchable_headers(headers: &[Heading], title: &str) -> Vec<String> {
    let skip = headers
        .first()
        .is_some_and(|h| h.level == 1 && h.heading == title);

    headers
        .iter()
        .skip(usize::from(skip))
        .map(|h| h.heading.clone())
        .collect()
}
