//! Format descriptors: which XPath-ish paths a mimetype implies, and the
//! override mechanism a `Template` uses to replace them (§3, §4.3).

use regex::Regex;

/// The paths used to pull a Snippet out of one matched item node, one
/// instance per mimetype family.
#[derive(Debug, Clone, Default)]
pub struct FormatDescriptor {
    pub item_path: Option<String>,
    pub title_path: Option<String>,
    pub link_path: Option<String>,
    pub summary_path: Option<String>,
    pub preview_path: Option<String>,
    pub attribute_paths: Option<String>,
    pub force_decode: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatKind {
    Native,
    Rss,
    Atom,
    XmlSuggest,
    Html,
    None,
}

/// Picks a format from the mimetype, with `text/html` requiring an explicit
/// `item_path` override to be usable — an HTML template with no item path
/// silently resolves to [`FormatKind::None`] instead of erroring.
pub fn detect(mimetype: &str, has_item_path_override: bool) -> FormatKind {
    let rss_re = Regex::new("rss").expect("static regex");
    let atom_re = Regex::new("atom").expect("static regex");

    if mimetype == crate::peer::MIME_SNIPDEX_XML {
        FormatKind::Native
    } else if rss_re.is_match(mimetype) {
        FormatKind::Rss
    } else if atom_re.is_match(mimetype) {
        FormatKind::Atom
    } else if mimetype == crate::peer::MIME_SUGGESTIONS_XML {
        FormatKind::XmlSuggest
    } else if mimetype == crate::peer::MIME_HTML && has_item_path_override {
        FormatKind::Html
    } else {
        FormatKind::None
    }
}

impl FormatKind {
    pub fn default_descriptor(self) -> FormatDescriptor {
        match self {
            FormatKind::Rss => FormatDescriptor {
                item_path: Some("//item".into()),
                title_path: Some("title".into()),
                link_path: Some("link".into()),
                summary_path: Some("description".into()),
                preview_path: Some(".//media:thumbnail".into()),
                attribute_paths: None,
                force_decode: None,
            },
            FormatKind::Atom => FormatDescriptor {
                item_path: Some("//entry".into()),
                title_path: Some("title".into()),
                link_path: Some("link".into()),
                summary_path: Some("summary".into()),
                preview_path: Some(".//media:thumbnail".into()),
                attribute_paths: None,
                force_decode: None,
            },
            FormatKind::XmlSuggest => FormatDescriptor {
                item_path: Some("//Item".into()),
                title_path: Some("Text".into()),
                link_path: Some("Url".into()),
                summary_path: Some("Description".into()),
                preview_path: Some("Image".into()),
                attribute_paths: None,
                force_decode: None,
            },
            FormatKind::Html => FormatDescriptor {
                item_path: None, // supplied by the template override, not a default
                title_path: Some("a".into()),
                link_path: Some("a/@href".into()),
                summary_path: None,
                preview_path: None,
                attribute_paths: None,
                force_decode: None,
            },
            FormatKind::Native | FormatKind::None => FormatDescriptor::default(),
        }
    }
}

/// Strips inline markup and collapses whitespace, then truncates to `limit`
/// with a `...` continuation marker. Returns `None` for `None`, empty, or
/// whitespace-only input.
pub fn bound_text_no_markup(s: Option<&str>, limit: usize) -> Option<String> {
    let s = s?;
    let markup_or_space = Regex::new(r"<[^>]+>|\s+").expect("static regex");
    let collapsed = markup_or_space.replace_all(s, " ").trim().to_string();
    if collapsed.is_empty() {
        return None;
    }
    if collapsed.chars().count() > limit {
        let truncated: String = collapsed.chars().take(limit.saturating_sub(3)).collect();
        Some(format!("{truncated}..."))
    } else {
        Some(collapsed)
    }
}
