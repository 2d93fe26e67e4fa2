//! A small owned XML tree plus a reduced dotted-path matcher, standing in for
//! full XPath evaluation (§4.3A).
//!
//! Paths supported: `tag` (direct child), `tag/tag2` (chained child lookup),
//! `//tag` (descendant search from the root), `.//tag` (descendant search
//! from the current node), `@attr` (attribute of the current node), and a
//! `tag/@attr` suffix. Namespaced names (`media:thumbnail`) are matched
//! literally, mirroring the qualified names `quick-xml` hands back without
//! namespace resolution.

use quick_xml::events::Event;
use quick_xml::Reader;

use crate::error::SnipdexError;

#[derive(Debug, Clone, Default)]
pub struct XmlNode {
    pub name: String,
    pub attrs: Vec<(String, String)>,
    pub children: Vec<XmlNode>,
    pub text: String,
}

impl XmlNode {
    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attrs.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }

    pub fn child(&self, name: &str) -> Option<&XmlNode> {
        self.children.iter().find(|c| c.name == name)
    }

    /// Concatenated text of this node and every descendant, whitespace-joined.
    pub fn flattened_text(&self) -> String {
        let mut out = self.text.clone();
        for child in &self.children {
            let t = child.flattened_text();
            let t = t.trim();
            if !t.is_empty() {
                if !out.is_empty() {
                    out.push(' ');
                }
                out.push_str(t);
            }
        }
        out
    }

    fn collect_descendants<'a>(&'a self, tag: &str, out: &mut Vec<&'a XmlNode>) {
        for child in &self.children {
            if matches_tag(&child.name, tag) {
                out.push(child);
            }
            child.collect_descendants(tag, out);
        }
    }

    pub fn descendants(&self, tag: &str) -> Vec<&XmlNode> {
        let mut out = Vec::new();
        self.collect_descendants(tag, &mut out);
        out
    }

    /// Evaluates a reduced path relative to this node, returning the first
    /// matching node's flattened text, or an attribute value for `@attr`
    /// paths.
    pub fn text_at(&self, path: &str) -> Option<String> {
        if let Some(attr) = path.strip_prefix('@') {
            return self.attr(attr).map(str::to_string);
        }
        if path == "." {
            let t = self.flattened_text();
            return if t.is_empty() { None } else { Some(t) };
        }
        let (node, last) = self.navigate(path)?;
        match last {
            Some(attr) => node.attr(&attr).map(str::to_string),
            None => {
                let t = node.flattened_text();
                if t.is_empty() { None } else { Some(t) }
            }
        }
    }

    /// Walks a `/`-joined path of child tag names, optionally ending in
    /// `@attr`, returning the node reached and the trailing attribute name.
    fn navigate(&self, path: &str) -> Option<(&XmlNode, Option<String>)> {
        let mut segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        let trailing_attr = segments
            .last()
            .and_then(|s| s.strip_prefix('@'))
            .map(str::to_string);
        if trailing_attr.is_some() {
            segments.pop();
        }

        let mut node = self;
        for seg in segments {
            if seg == "." {
                continue;
            }
            node = node.child(seg)?;
        }
        Some((node, trailing_attr))
    }

    /// Resolves a link value, preferring a `text/html`-typed `<link>` child,
    /// then falling back to the node's own text, `@href`, or `@url`.
    pub fn link_at(&self, path: &str) -> Option<String> {
        if let Some(attr) = path.strip_prefix('@') {
            return self.attr(attr).map(str::to_string).filter(|v| v != "#");
        }
        let (node, attr) = self.navigate(path)?;
        if let Some(attr) = attr {
            return node.attr(&attr).map(str::to_string).filter(|v| v != "#");
        }

        let mut best: Option<String> = None;
        for candidate in std::iter::once(node).chain(node.children.iter()) {
            let is_html = candidate.attr("type") == Some("text/html") || candidate.attr("type").is_none();
            let value = if !candidate.text.is_empty() {
                Some(candidate.text.clone())
            } else {
                candidate.attr("href").map(str::to_string).or_else(|| candidate.attr("url").map(str::to_string))
            };
            if let Some(v) = value {
                if best.is_none() || is_html {
                    best = Some(v);
                }
            }
        }
        best.filter(|v| v != "#")
    }

    /// Resolves a thumbnail/preview descriptor: `(mimetype, url, width?, height?)`.
    pub fn thumbnail_at(&self, path: &str) -> Option<(String, String, Option<String>, Option<String>)> {
        let (node, _) = self.navigate(path)?;
        let value = if !node.text.trim().is_empty() {
            Some(node.text.trim().to_string())
        } else {
            node.attr("url")
                .or_else(|| node.attr("source"))
                .or_else(|| node.attr("href"))
                .or_else(|| node.attr("src"))
                .map(str::to_string)
        }?;
        let mimetype = node.attr("type").unwrap_or("image").to_string();
        let width = node.attr("width").map(str::to_string);
        let height = node.attr("height").map(str::to_string);
        Some((mimetype, value, width, height))
    }
}

fn matches_tag(name: &str, tag: &str) -> bool {
    name == tag || name.ends_with(&format!(":{tag}"))
}

/// Parses `body` into a tree. Tolerates a malformed tail by stopping there
/// rather than failing outright, loosely matching `libxml2`'s recover mode.
pub fn parse_xml(body: &str) -> Result<XmlNode, SnipdexError> {
    let cleaned = strip_default_namespace_decls(body);
    let mut reader = Reader::from_str(&cleaned);
    reader.config_mut().trim_text(true);

    let mut stack: Vec<XmlNode> = vec![XmlNode {
        name: "#root".to_string(),
        ..Default::default()
    }];

    loop {
        match reader.read_event() {
            Ok(Event::Eof) => break,
            Ok(Event::Start(e)) => stack.push(node_from_start(&e)),
            Ok(Event::Empty(e)) => {
                let node = node_from_start(&e);
                if let Some(parent) = stack.last_mut() {
                    parent.children.push(node);
                }
            }
            Ok(Event::End(_)) => {
                if stack.len() > 1 {
                    let finished = stack.pop().expect("checked len > 1");
                    stack.last_mut().expect("root always present").children.push(finished);
                }
            }
            Ok(Event::Text(e)) => {
                if let Ok(text) = e.decode() {
                    append_text(&mut stack, text.trim());
                }
            }
            Ok(Event::CData(e)) => {
                let text = String::from_utf8_lossy(e.into_inner().as_ref()).into_owned();
                append_text(&mut stack, text.trim());
            }
            Ok(_) => {}
            Err(_) => break,
        }
    }

    while stack.len() > 1 {
        let finished = stack.pop().expect("checked len > 1");
        stack.last_mut().expect("root always present").children.push(finished);
    }

    stack
        .into_iter()
        .next()
        .ok_or_else(|| SnipdexError::Parse("empty document".into()))
}

fn append_text(stack: &mut [XmlNode], text: &str) {
    if text.is_empty() {
        return;
    }
    if let Some(top) = stack.last_mut() {
        if !top.text.is_empty() {
            top.text.push(' ');
        }
        top.text.push_str(text);
    }
}

fn node_from_start(e: &quick_xml::events::BytesStart) -> XmlNode {
    let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
    let attrs = e
        .attributes()
        .filter_map(|a| a.ok())
        .map(|a| {
            let key = String::from_utf8_lossy(a.key.as_ref()).into_owned();
            let value = a.unescape_value().map(|v| v.into_owned()).unwrap_or_default();
            (key, value)
        })
        .collect();
    XmlNode {
        name,
        attrs,
        children: Vec::new(),
        text: String::new(),
    }
}

/// Strips `xmlns="..."` default namespace declarations — they would otherwise
/// leave element names unqualified but semantically scoped, which this
/// reduced matcher does not track.
fn strip_default_namespace_decls(body: &str) -> String {
    let mut out = String::with_capacity(body.len());
    let mut rest = body;
    while let Some(pos) = rest.find("xmlns=") {
        out.push_str(&rest[..pos]);
        let after = &rest[pos + "xmlns=".len()..];
        let quote = after.chars().next();
        match quote {
            Some(q) if q == '\'' || q == '"' => {
                if let Some(end) = after[1..].find(q) {
                    out.push(' ');
                    rest = &after[1 + end + 1..];
                } else {
                    out.push_str("xmlns=");
                    rest = after;
                    break;
                }
            }
            _ => {
                out.push_str("xmlns=");
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_item_list() {
        let doc = r#"<rss><channel><item><title>A</title><link>http://x/a</link></item></channel></rss>"#;
        let tree = parse_xml(doc).unwrap();
        let items = tree.descendants("item");
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].text_at("title").as_deref(), Some("A"));
        assert_eq!(items[0].link_at("link").as_deref(), Some("http://x/a"));
    }

    #[test]
    fn strips_default_namespace_declaration() {
        let doc = r#"<feed xmlns="http://www.w3.org/2005/Atom"><entry><title>T</title></entry></feed>"#;
        let tree = parse_xml(doc).unwrap();
        assert_eq!(tree.descendants("entry").len(), 1);
    }

    #[test]
    fn flattened_text_joins_descendant_text() {
        let doc = r#"<div>Hello <b>World</b></div>"#;
        let tree = parse_xml(doc).unwrap();
        let div = tree.child("div").unwrap();
        assert_eq!(div.flattened_text(), "Hello World");
    }

    #[test]
    fn attribute_path_reads_attribute() {
        let doc = r#"<peer pid="abc"><name>Example</name></peer>"#;
        let tree = parse_xml(doc).unwrap();
        let peer = tree.child("peer").unwrap();
        assert_eq!(peer.text_at("@pid").as_deref(), Some("abc"));
    }
}
