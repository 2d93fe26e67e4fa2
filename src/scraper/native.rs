//! Parses and renders `application/snipdex+xml`, the native sibling-node
//! wire format (§4.3, §6).

use std::io::Cursor;

use chrono::{DateTime, Utc};
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;

use crate::error::SnipdexError;
use crate::peer::{Peer, PeerStatus, Template};
use crate::peer_list::PeerList;
use crate::query::Query;
use crate::snippet::{Origin, Preview, Snippet};
use crate::snippet_list::SnippetList;

use super::xml_tree::{parse_xml, XmlNode};

/// Parses a `<snipdex_response>` document into its query echo, peer list, and
/// snippet list.
pub fn parse(body: &str) -> Result<(Query, PeerList, SnippetList), SnipdexError> {
    let root = parse_xml(body)?;
    let response = root
        .child("snipdex_response")
        .ok_or_else(|| SnipdexError::Parse("missing <snipdex_response>".into()))?;

    let mut query = Query::new();
    if let Some(query_node) = response.child("query") {
        for (k, v) in &query_node.attrs {
            query.set(k.clone(), v.clone());
        }
    }

    let mut peers = PeerList::new();
    if let Some(peers_node) = response.child("peers") {
        for peer_node in peers_node.children.iter().filter(|c| c.name == "peer") {
            let (peer, status, score) = parse_peer(peer_node);
            peers.append(peer, status, score);
        }
    }

    let mut snippets = SnippetList::new();
    if let Some(snippets_node) = response.child("snippets") {
        for snippet_node in snippets_node.children.iter().filter(|c| c.name == "snippet") {
            snippets.push(parse_snippet(snippet_node));
        }
    }

    Ok((query, peers, snippets))
}

fn parse_peer(node: &XmlNode) -> (Peer, PeerStatus, Option<f64>) {
    let pid = node.attr("pid").unwrap_or_default().to_string();
    let status = node
        .attr("status")
        .map(PeerStatus::from_wire_str)
        .unwrap_or(PeerStatus::Todo);
    let score = node.attr("score").and_then(|s| s.parse::<f64>().ok());

    let query_hints = node
        .children
        .iter()
        .filter(|c| c.name == "query_hint")
        .map(|c| c.flattened_text())
        .collect();

    let peer = Peer {
        pid,
        name: node.child("name").map(XmlNode::flattened_text),
        description: node.child("description").map(XmlNode::flattened_text),
        icon: node.child("icon").map(XmlNode::flattened_text),
        language: node.child("language").map(XmlNode::flattened_text),
        adult_content: node
            .child("adult_content")
            .map(|c| c.flattened_text() == "True")
            .unwrap_or(false),
        hashtag: None,
        query_hints,
        updated: node
            .child("updated")
            .and_then(|c| parse_updated(&c.flattened_text())),
        open_template: node.child("open_template").map(parse_template),
        html_template: node.child("html_template").map(parse_template),
        suggest_template: node.child("suggest_template").map(parse_template),
        public_address: node.child("public_address").map(XmlNode::flattened_text),
        local_address: node.child("local_address").map(XmlNode::flattened_text),
    };
    (peer, status, score)
}

fn parse_template(node: &XmlNode) -> Template {
    Template {
        url: node.flattened_text(),
        mimetype: node.attr("type").unwrap_or_default().to_string(),
        method: node.attr("method").map(str::to_string),
        item_path: node.attr("item_path").map(str::to_string),
        title_path: node.attr("title_path").map(str::to_string),
        link_path: node.attr("link_path").map(str::to_string),
        summary_path: node.attr("summary_path").map(str::to_string),
        preview_path: node.attr("preview_path").map(str::to_string),
        attribute_paths: node.attr("attribute_paths").map(str::to_string),
        force_decode: node.attr("force_decode").map(str::to_string),
    }
}

fn parse_snippet(node: &XmlNode) -> Snippet {
    let origins = node
        .children
        .iter()
        .filter(|c| c.name == "origin")
        .filter_map(|c| {
            c.attr("pid").map(|pid| Origin {
                pid: pid.to_string(),
                status: c.attr("status").map(PeerStatus::from_wire_str),
                score: c.attr("score").and_then(|s| s.parse().ok()).unwrap_or(0.0),
            })
        })
        .collect();

    let preview = node.child("preview").and_then(|c| {
        let url = c.flattened_text();
        if url.is_empty() {
            return None;
        }
        Some(Preview {
            mimetype: c.attr("type").unwrap_or("image").to_string(),
            url,
            width: c.attr("width").and_then(|s| s.parse().ok()),
            height: c.attr("height").and_then(|s| s.parse().ok()),
        })
    });

    let direct_links = links_of_type(node, "direct");
    let service_links = links_of_type(node, "service");

    let attributes = node
        .child("attributes")
        .map(|attrs| {
            attrs
                .children
                .iter()
                .filter(|c| c.name == "attribute")
                .filter_map(|c| {
                    let key = c.attr("key")?;
                    let value = c.attr("value").unwrap_or_default();
                    Some((key.to_string(), value.to_string()))
                })
                .collect()
        })
        .unwrap_or_default();

    Snippet {
        origins,
        location: node.child("location").map(XmlNode::flattened_text).filter(|s| !s.is_empty()),
        title: node.child("title").map(XmlNode::flattened_text).filter(|s| !s.is_empty()),
        found: node.child("found").and_then(|c| parse_updated(&c.flattened_text())),
        summary: node.child("summary").map(XmlNode::flattened_text).filter(|s| !s.is_empty()),
        extended_summary: node
            .child("extended_summary")
            .map(XmlNode::flattened_text)
            .filter(|s| !s.is_empty()),
        preview,
        geolocation: None,
        direct_links,
        service_links,
        attributes,
    }
}

fn links_of_type(node: &XmlNode, kind: &str) -> Vec<(String, String)> {
    node.child("links")
        .map(|links| {
            links
                .children
                .iter()
                .filter(|c| c.name == "link" && c.attr("type") == Some(kind))
                .map(|c| (c.attr("description").unwrap_or_default().to_string(), c.flattened_text()))
                .collect()
        })
        .unwrap_or_default()
}

fn parse_updated(s: &str) -> Option<DateTime<Utc>> {
    if s.is_empty() {
        return None;
    }
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}

/// Renders a `<snipdex_response>` document, the mirror image of [`parse`]
/// (§6). This is what a node hands back to a sibling (or to a browser
/// requesting `f=xml`).
pub fn render(query: &Query, peers: &PeerList, snippets: &SnippetList) -> String {
    let mut writer = Writer::new_with_indent(Cursor::new(Vec::new()), b' ', 2);

    let mut root = BytesStart::new("snipdex_response");
    root.push_attribute(("version", "0.2"));
    writer.write_event(Event::Start(root)).expect("in-memory writer");

    write_query(&mut writer, query);
    write_peers(&mut writer, peers);
    write_snippets(&mut writer, snippets);

    writer.write_event(Event::End(BytesEnd::new("snipdex_response"))).expect("in-memory writer");

    let bytes = writer.into_inner().into_inner();
    String::from_utf8(bytes).expect("writer only emits valid utf-8")
}

fn write_query<W: std::io::Write>(writer: &mut Writer<W>, query: &Query) {
    let mut node = BytesStart::new("query");
    for (k, v) in query.iter() {
        node.push_attribute((k, v));
    }
    writer.write_event(Event::Empty(node)).expect("in-memory writer");
}

fn write_peers<W: std::io::Write>(writer: &mut Writer<W>, peers: &PeerList) {
    writer.write_event(Event::Start(BytesStart::new("peers"))).expect("in-memory writer");
    for entry in peers.iter() {
        write_peer(writer, &entry.peer, entry.status, entry.score);
    }
    writer.write_event(Event::End(BytesEnd::new("peers"))).expect("in-memory writer");
}

fn write_peer<W: std::io::Write>(writer: &mut Writer<W>, peer: &Peer, status: PeerStatus, score: Option<f64>) {
    let mut node = BytesStart::new("peer");
    node.push_attribute(("pid", peer.pid.as_str()));
    node.push_attribute(("status", status.as_wire_str()));
    if let Some(score) = score {
        node.push_attribute(("score", score.to_string().as_str()));
    }
    writer.write_event(Event::Start(node)).expect("in-memory writer");

    write_text_child(writer, "name", peer.name.as_deref());
    write_text_child(writer, "description", peer.description.as_deref());
    write_text_child(writer, "icon", peer.icon.as_deref());
    write_text_child(writer, "language", peer.language.as_deref());
    write_text_child(writer, "adult_content", Some(if peer.adult_content { "True" } else { "False" }));
    for hint in &peer.query_hints {
        write_text_child(writer, "query_hint", Some(hint.as_str()));
    }
    if let Some(updated) = peer.updated {
        write_text_child(writer, "updated", Some(updated.to_rfc3339().as_str()));
    }
    if let Some(t) = &peer.open_template {
        write_template(writer, "open_template", t);
    }
    if let Some(t) = &peer.html_template {
        write_template(writer, "html_template", t);
    }
    if let Some(t) = &peer.suggest_template {
        write_template(writer, "suggest_template", t);
    }
    write_text_child(writer, "public_address", peer.public_address.as_deref());
    write_text_child(writer, "local_address", peer.local_address.as_deref());

    writer.write_event(Event::End(BytesEnd::new("peer"))).expect("in-memory writer");
}

fn write_template<W: std::io::Write>(writer: &mut Writer<W>, tag: &str, template: &Template) {
    let mut node = BytesStart::new(tag);
    node.push_attribute(("type", template.mimetype.as_str()));
    if let Some(v) = &template.method {
        node.push_attribute(("method", v.as_str()));
    }
    if let Some(v) = &template.item_path {
        node.push_attribute(("item_path", v.as_str()));
    }
    if let Some(v) = &template.title_path {
        node.push_attribute(("title_path", v.as_str()));
    }
    if let Some(v) = &template.link_path {
        node.push_attribute(("link_path", v.as_str()));
    }
    if let Some(v) = &template.summary_path {
        node.push_attribute(("summary_path", v.as_str()));
    }
    if let Some(v) = &template.preview_path {
        node.push_attribute(("preview_path", v.as_str()));
    }
    if let Some(v) = &template.attribute_paths {
        node.push_attribute(("attribute_paths", v.as_str()));
    }
    if let Some(v) = &template.force_decode {
        node.push_attribute(("force_decode", v.as_str()));
    }
    writer.write_event(Event::Start(node)).expect("in-memory writer");
    writer
        .write_event(Event::Text(BytesText::new(&template.url)))
        .expect("in-memory writer");
    writer.write_event(Event::End(BytesEnd::new(tag))).expect("in-memory writer");
}

fn write_snippets<W: std::io::Write>(writer: &mut Writer<W>, snippets: &SnippetList) {
    writer.write_event(Event::Start(BytesStart::new("snippets"))).expect("in-memory writer");
    for snippet in snippets.iter() {
        write_snippet(writer, snippet);
    }
    writer.write_event(Event::End(BytesEnd::new("snippets"))).expect("in-memory writer");
}

fn write_snippet<W: std::io::Write>(writer: &mut Writer<W>, snippet: &Snippet) {
    writer.write_event(Event::Start(BytesStart::new("snippet"))).expect("in-memory writer");

    for origin in &snippet.origins {
        let mut node = BytesStart::new("origin");
        node.push_attribute(("pid", origin.pid.as_str()));
        if let Some(status) = origin.status {
            node.push_attribute(("status", status.as_wire_str()));
        }
        node.push_attribute(("score", origin.score.to_string().as_str()));
        writer.write_event(Event::Empty(node)).expect("in-memory writer");
    }

    write_text_child(writer, "location", snippet.location.as_deref());
    write_text_child(writer, "title", snippet.title.as_deref());
    let found = snippet.found.map(|f| f.to_rfc3339());
    write_text_child(writer, "found", found.as_deref());
    write_text_child(writer, "summary", snippet.summary.as_deref());
    write_text_child(writer, "extended_summary", snippet.extended_summary.as_deref());

    if let Some(preview) = &snippet.preview {
        let mut node = BytesStart::new("preview");
        node.push_attribute(("type", preview.mimetype.as_str()));
        if let Some(w) = preview.width {
            node.push_attribute(("width", w.to_string().as_str()));
        }
        if let Some(h) = preview.height {
            node.push_attribute(("height", h.to_string().as_str()));
        }
        writer.write_event(Event::Start(node)).expect("in-memory writer");
        writer.write_event(Event::Text(BytesText::new(&preview.url))).expect("in-memory writer");
        writer.write_event(Event::End(BytesEnd::new("preview"))).expect("in-memory writer");
    }

    if !snippet.direct_links.is_empty() || !snippet.service_links.is_empty() {
        writer.write_event(Event::Start(BytesStart::new("links"))).expect("in-memory writer");
        write_links(writer, &snippet.direct_links, "direct");
        write_links(writer, &snippet.service_links, "service");
        writer.write_event(Event::End(BytesEnd::new("links"))).expect("in-memory writer");
    }

    if !snippet.attributes.is_empty() {
        writer.write_event(Event::Start(BytesStart::new("attributes"))).expect("in-memory writer");
        for (key, value) in &snippet.attributes {
            let mut node = BytesStart::new("attribute");
            node.push_attribute(("key", key.as_str()));
            node.push_attribute(("value", value.as_str()));
            writer.write_event(Event::Empty(node)).expect("in-memory writer");
        }
        writer.write_event(Event::End(BytesEnd::new("attributes"))).expect("in-memory writer");
    }

    writer.write_event(Event::End(BytesEnd::new("snippet"))).expect("in-memory writer");
}

fn write_links<W: std::io::Write>(writer: &mut Writer<W>, links: &[(String, String)], kind: &str) {
    for (description, url) in links {
        let mut node = BytesStart::new("link");
        node.push_attribute(("type", kind));
        node.push_attribute(("description", description.as_str()));
        writer.write_event(Event::Start(node)).expect("in-memory writer");
        writer.write_event(Event::Text(BytesText::new(url))).expect("in-memory writer");
        writer.write_event(Event::End(BytesEnd::new("link"))).expect("in-memory writer");
    }
}

fn write_text_child<W: std::io::Write>(writer: &mut Writer<W>, tag: &str, value: Option<&str>) {
    let Some(value) = value else { return };
    writer.write_event(Event::Start(BytesStart::new(tag))).expect("in-memory writer");
    writer.write_event(Event::Text(BytesText::new(value))).expect("in-memory writer");
    writer.write_event(Event::End(BytesEnd::new(tag))).expect("in-memory writer");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_peers_and_snippets_from_native_response() {
        let doc = r#"
            <snipdex_response version="0.2">
              <query q="rust" h="" />
              <peers>
                <peer pid="p1" status="DONE" score="1.0">
                  <name>Example</name>
                  <open_template type="application/snipdex+xml">http://p1.example/snipdex/?q={q}</open_template>
                </peer>
              </peers>
              <snippets>
                <snippet>
                  <origin pid="p1"/>
                  <location>http://example.com/a</location>
                  <title>A Title</title>
                  <summary>A summary</summary>
                </snippet>
              </snippets>
            </snipdex_response>
        "#;
        let (query, peers, snippets) = parse(doc).unwrap();
        assert_eq!(query.get("q"), Some("rust"));
        assert_eq!(peers.len(), 1);
        assert_eq!(peers.find("p1").unwrap().status, PeerStatus::Done);
        assert_eq!(snippets.len(), 1);
        assert_eq!(snippets.iter().next().unwrap().title.as_deref(), Some("A Title"));
    }

    #[test]
    fn render_then_parse_round_trips_peers_and_snippets() {
        let query = Query::new().with("q", "rust");

        let mut peers = PeerList::new();
        let peer = Peer::zombie(
            "Example Feed",
            Template { url: "http://p1.example/feed.rss".into(), mimetype: "application/rss+xml".into(), ..Default::default() },
        );
        peers.append(peer, PeerStatus::Done, Some(0.7));

        let mut snippets = SnippetList::new();
        snippets.push(Snippet {
            origins: vec![Origin { pid: "zombie-pid".into(), status: Some(PeerStatus::Done), score: 0.7 }],
            location: Some("http://example.com/a".into()),
            title: Some("A Title".into()),
            summary: Some("A summary".into()),
            attributes: vec![("Button".into(), "Go".into())],
            ..Default::default()
        });

        let rendered = render(&query, &peers, &snippets);
        let (parsed_query, parsed_peers, parsed_snippets) = parse(&rendered).unwrap();

        assert_eq!(parsed_query.get("q"), Some("rust"));
        assert_eq!(parsed_peers.len(), 1);
        assert_eq!(parsed_snippets.len(), 1);
        let snippet = parsed_snippets.iter().next().unwrap();
        assert_eq!(snippet.title.as_deref(), Some("A Title"));
        assert_eq!(snippet.attributes[0], ("Button".to_string(), "Go".to_string()));
    }
}
