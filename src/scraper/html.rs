//! Parses the generic HTML format against the parsed DOM, using the
//! `scraper` CSS-selector crate instead of XPath (§4.3, §4.3A).

use scraper::{ElementRef, Html, Selector};

use crate::error::SnipdexError;
use crate::snippet::Snippet;
use crate::snippet_list::SnippetList;

use super::format::{bound_text_no_markup, FormatDescriptor};

/// Compiles a descriptor's paths into CSS selectors once per peer, at
/// construction time, so a malformed override is reported as
/// `InvalidTemplate` before any network call is made.
pub struct HtmlDescriptor {
    item: Selector,
    title: Option<Selector>,
    link: (Option<Selector>, bool), // selector plus "read @href" flag
}

impl HtmlDescriptor {
    pub fn compile(descriptor: &FormatDescriptor) -> Result<Self, SnipdexError> {
        let item_path = descriptor
            .item_path
            .as_deref()
            .ok_or_else(|| SnipdexError::InvalidTemplate("html format needs an item_path".into()))?;
        let item = compile_selector(item_path)?;

        let title = descriptor
            .title_path
            .as_deref()
            .map(compile_selector)
            .transpose()?;

        let link = match &descriptor.link_path {
            Some(path) => {
                if let Some(stripped) = path.strip_suffix("/@href") {
                    (Some(compile_selector(stripped)?), true)
                } else {
                    (Some(compile_selector(path)?), false)
                }
            }
            None => (None, false),
        };

        Ok(HtmlDescriptor { item, title, link })
    }
}

fn compile_selector(css: &str) -> Result<Selector, SnipdexError> {
    Selector::parse(css).map_err(|e| SnipdexError::InvalidTemplate(format!("bad CSS selector '{css}': {e:?}")))
}

pub fn parse(body: &str, compiled: &HtmlDescriptor) -> SnippetList {
    let document = Html::parse_document(body);
    let mut snippets = SnippetList::new();

    for item in document.select(&compiled.item) {
        let title_node = compiled.title.as_ref().and_then(|sel| item.select(sel).next());
        let title = title_node.map(|n| collect_text(n));
        let title = bound_text_no_markup(title.as_deref(), 60);

        let location = compiled.link.0.as_ref().and_then(|sel| {
            let link_node = item.select(sel).next()?;
            if compiled.link.1 {
                link_node.value().attr("href").map(str::to_string)
            } else {
                Some(collect_text(link_node))
            }
        });

        let summary = bound_text_no_markup(Some(&summary_minus_title(item, title_node)), 300);

        snippets.push(Snippet {
            origins: Vec::new(),
            location,
            title,
            found: Some(chrono::Utc::now()),
            summary,
            extended_summary: None,
            preview: None,
            geolocation: None,
            direct_links: Vec::new(),
            service_links: Vec::new(),
            attributes: Vec::new(),
        });
    }

    snippets
}

fn collect_text(el: ElementRef) -> String {
    el.text().collect::<Vec<_>>().join(" ").split_whitespace().collect::<Vec<_>>().join(" ")
}

/// The item's own text minus the title node's text and any `<script>`
/// subtrees — used as the summary fallback when no summary path is given.
fn summary_minus_title(item: ElementRef, title_node: Option<ElementRef>) -> String {
    let script_selector = Selector::parse("script").expect("static selector");
    let script_texts: Vec<String> = item.select(&script_selector).map(collect_text).collect();
    let title_text = title_node.map(collect_text);

    let mut words: Vec<String> = item
        .text()
        .collect::<Vec<_>>()
        .join(" ")
        .split_whitespace()
        .map(str::to_string)
        .collect();

    if let Some(title_text) = &title_text {
        if !title_text.is_empty() {
            words.retain(|w| !title_text.contains(w.as_str()));
        }
    }
    for script in &script_texts {
        if !script.is_empty() {
            words.retain(|w| !script.contains(w.as_str()));
        }
    }
    words.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scraper::format::FormatDescriptor;

    #[test]
    fn parses_generic_html_results() {
        let doc = r#"
            <html><body>
              <div class="result">
                <a href="http://example.com/a">Example Title</a>
                <p>Example summary text</p>
              </div>
            </body></html>
        "#;
        let descriptor = FormatDescriptor {
            item_path: Some("div.result".into()),
            title_path: Some("a".into()),
            link_path: Some("a/@href".into()),
            ..Default::default()
        };
        let compiled = HtmlDescriptor::compile(&descriptor).unwrap();
        let snippets = parse(doc, &compiled);
        assert_eq!(snippets.len(), 1);
        let snippet = snippets.iter().next().unwrap();
        assert_eq!(snippet.location.as_deref(), Some("http://example.com/a"));
        assert_eq!(snippet.title.as_deref(), Some("Example Title"));
    }

    #[test]
    fn compile_rejects_missing_item_path() {
        let descriptor = FormatDescriptor::default();
        assert!(HtmlDescriptor::compile(&descriptor).is_err());
    }
}
