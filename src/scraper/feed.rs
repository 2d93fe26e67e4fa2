//! Parses RSS, Atom, and OpenSearch-suggest responses by walking an
//! XPath-ish [`FormatDescriptor`] over the XML tree (§4.3).

use crate::error::SnipdexError;
use crate::snippet::{Preview, Snippet};
use crate::snippet_list::SnippetList;

use super::format::{bound_text_no_markup, FormatDescriptor};
use super::xml_tree::{parse_xml, XmlNode};

pub struct FeedResult {
    pub snippets: SnippetList,
    pub total_results: Option<String>,
}

pub fn parse(body: &str, descriptor: &FormatDescriptor) -> Result<FeedResult, SnipdexError> {
    let root = parse_xml(body)?;

    let total_results = root
        .descendants("totalResults")
        .first()
        .map(|n| n.flattened_text());

    let item_path = descriptor
        .item_path
        .as_deref()
        .ok_or_else(|| SnipdexError::InvalidTemplate("no item_path for feed format".into()))?;

    let items = eval_items(&root, item_path);

    let mut snippets = SnippetList::new();
    for item in items {
        snippets.push(snippet_from_item(item, descriptor));
    }

    Ok(FeedResult { snippets, total_results })
}

fn eval_items<'a>(root: &'a XmlNode, item_path: &str) -> Vec<&'a XmlNode> {
    if let Some(tag) = item_path.strip_prefix("//") {
        root.descendants(tag)
    } else if let Some(tag) = item_path.strip_prefix(".//") {
        root.descendants(tag)
    } else {
        root.child(item_path).into_iter().collect()
    }
}

fn snippet_from_item(item: &XmlNode, descriptor: &FormatDescriptor) -> Snippet {
    let title = descriptor
        .title_path
        .as_deref()
        .and_then(|p| item.text_at(p));
    let title = bound_text_no_markup(title.as_deref(), 60);

    let location = descriptor.link_path.as_deref().and_then(|p| item.link_at(p));

    let summary = match &descriptor.summary_path {
        Some(p) => item.text_at(p),
        None => Some(item.flattened_text()),
    };
    let summary = bound_text_no_markup(summary.as_deref(), 300);

    let preview = descriptor
        .preview_path
        .as_deref()
        .and_then(|p| item.thumbnail_at(p))
        .map(|(mimetype, url, width, height)| Preview {
            mimetype,
            url,
            width: width.and_then(|w| w.parse().ok()),
            height: height.and_then(|h| h.parse().ok()),
        });

    let attributes = descriptor
        .attribute_paths
        .as_deref()
        .map(|paths| {
            paths
                .split(',')
                .filter_map(|kv| {
                    let (key, path) = kv.split_once('{')?;
                    let path = path.strip_suffix('}')?;
                    let value = item.text_at(path)?;
                    Some((key.to_string(), value))
                })
                .collect()
        })
        .unwrap_or_default();

    Snippet {
        origins: Vec::new(),
        location,
        title,
        found: Some(chrono::Utc::now()),
        summary,
        extended_summary: None,
        preview,
        geolocation: None,
        direct_links: Vec::new(),
        service_links: Vec::new(),
        attributes,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scraper::format::FormatKind;

    #[test]
    fn parses_rss_items_into_snippets() {
        let doc = r#"
            <rss><channel>
              <item><title>Hello</title><link>http://x/a</link><description>World</description></item>
              <item><title>Second</title><link>http://x/b</link><description>Summary</description></item>
            </channel></rss>
        "#;
        let descriptor = FormatKind::Rss.default_descriptor();
        let result = parse(doc, &descriptor).unwrap();
        assert_eq!(result.snippets.len(), 2);
        let first = result.snippets.iter().next().unwrap();
        assert_eq!(first.title.as_deref(), Some("Hello"));
        assert_eq!(first.location.as_deref(), Some("http://x/a"));
        assert_eq!(first.summary.as_deref(), Some("World"));
    }

    #[test]
    fn parses_atom_entries() {
        let doc = r#"
            <feed><entry><title>T</title><link href="http://x/a"/><summary>S</summary></entry></feed>
        "#;
        let descriptor = FormatKind::Atom.default_descriptor();
        let result = parse(doc, &descriptor).unwrap();
        assert_eq!(result.snippets.len(), 1);
        assert_eq!(result.snippets.iter().next().unwrap().location.as_deref(), Some("http://x/a"));
    }
}
