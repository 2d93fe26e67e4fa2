//! One outbound peer call: fills a peer's template, fetches, and parses the
//! response per its format descriptor (§4.3).

mod feed;
mod format;
mod html;
mod native;
mod xml_tree;

use std::time::Duration;

use reqwest::Client;

use crate::error::SnipdexError;
use crate::peer::Template;
use crate::peer_list::PeerList;
use crate::query::Query;
use crate::snippet::Snippet;
use crate::snippet_list::SnippetList;

pub use format::{bound_text_no_markup, FormatDescriptor, FormatKind};
pub use native::render as render_native;

const SOCKET_TIMEOUT: Duration = Duration::from_secs(10);

/// Link to a (real or zombie) peer, resolved once per template so a bad
/// override fails at construction instead of mid fan-out (§4.3, §4.3A).
pub struct PeerLink {
    template: Template,
    format: FormatKind,
    descriptor: FormatDescriptor,
    html: Option<html::HtmlDescriptor>,
}

pub struct ScraperOutcome {
    pub query: Query,
    pub peers: PeerList,
    pub snippets: SnippetList,
    pub total_results: Option<String>,
}

impl PeerLink {
    pub fn new(template: Template) -> Result<Self, SnipdexError> {
        if template.url.is_empty() {
            return Err(SnipdexError::InvalidTemplate("template has no url".into()));
        }
        let format = format::detect(&template.mimetype, template.item_path.is_some());
        let descriptor = apply_overrides(format.default_descriptor(), &template);

        let html = if format == FormatKind::Html {
            Some(html::HtmlDescriptor::compile(&descriptor)?)
        } else {
            None
        };

        Ok(PeerLink { template, format, descriptor, html })
    }

    /// Executes a search against the connected peer: fills the URL template,
    /// performs the HTTP call under a 10-second total timeout, and parses the
    /// body per format (§4.3 steps 1-5).
    pub async fn search(&self, client: &Client, query: &Query) -> Result<ScraperOutcome, SnipdexError> {
        let url = query.fill(&self.template.url)?;
        let method = self
            .template
            .method
            .as_deref()
            .unwrap_or("GET")
            .to_uppercase();

        let mut builder = if method == "POST" {
            let (path, form_body) = url.split_once('?').unwrap_or((url.as_str(), ""));
            client
                .post(path)
                .header("Content-Type", "application/x-www-form-urlencoded")
                .body(form_body.to_string())
        } else {
            client.get(&url)
        };
        builder = builder
            .timeout(SOCKET_TIMEOUT)
            .header("User-Agent", "Snipdex/0.2 (+http://www.snipdex.net/)")
            .header("Accept-Charset", "UTF-8;q=0.7,*;q=0.7")
            .header("Cache-Control", "no-cache")
            .header("Connection", "close");

        let response = builder.send().await.map_err(map_reqwest_err)?;
        let peer_addr = response.remote_addr();

        let raw = response.bytes().await.map_err(map_reqwest_err)?;
        let body = decode_body(&raw, self.descriptor.force_decode.as_deref());

        let (mut new_query, peers, snippets, total_results) = self.parse_body(&body)?;

        if let Some(addr) = peer_addr {
            new_query.set("peer_ip", addr.ip().to_string());
            new_query.set("peer_port", addr.port().to_string());
        }
        new_query.adopt_context_from(query);

        Ok(ScraperOutcome { query: new_query, peers, snippets, total_results })
    }

    fn parse_body(&self, body: &str) -> Result<(Query, PeerList, SnippetList, Option<String>), SnipdexError> {
        match self.format {
            FormatKind::Native => {
                let (q, p, s) = native::parse(body)?;
                Ok((q, p, s, None))
            }
            FormatKind::Rss | FormatKind::Atom | FormatKind::XmlSuggest => {
                let result = feed::parse(body, &self.descriptor)?;
                Ok((Query::new(), PeerList::new(), result.snippets, result.total_results))
            }
            FormatKind::Html => {
                let compiled = self.html.as_ref().expect("compiled at construction");
                let snippets = html::parse(body, compiled);
                Ok((Query::new(), PeerList::new(), snippets, None))
            }
            FormatKind::None => Ok((Query::new(), PeerList::new(), SnippetList::new(), None)),
        }
    }
}

fn apply_overrides(mut descriptor: FormatDescriptor, template: &Template) -> FormatDescriptor {
    if template.item_path.is_some() {
        descriptor.item_path = template.item_path.clone();
    }
    if template.title_path.is_some() {
        descriptor.title_path = template.title_path.clone();
    }
    if template.link_path.is_some() {
        descriptor.link_path = template.link_path.clone();
    }
    if template.summary_path.is_some() {
        descriptor.summary_path = template.summary_path.clone();
    }
    if template.preview_path.is_some() {
        descriptor.preview_path = template.preview_path.clone();
    }
    if template.attribute_paths.is_some() {
        descriptor.attribute_paths = template.attribute_paths.clone();
    }
    if template.force_decode.is_some() {
        descriptor.force_decode = template.force_decode.clone();
    }
    descriptor
}

/// Transcodes `raw` from `charset` to UTF-8 (e.g. Baidu's `gb2312`), falling
/// back to a lossy UTF-8 decode on unknown labels (§4.3 step 3).
fn decode_body(raw: &[u8], force_decode: Option<&str>) -> String {
    match force_decode.and_then(|label| encoding_rs::Encoding::for_label(label.as_bytes())) {
        Some(encoding) => {
            let (text, _, _) = encoding.decode(raw);
            text.into_owned()
        }
        None => String::from_utf8_lossy(raw).into_owned(),
    }
}

fn map_reqwest_err(e: reqwest::Error) -> SnipdexError {
    if e.is_timeout() {
        SnipdexError::Timeout(e.to_string())
    } else if e.is_connect() {
        SnipdexError::Io(std::io::Error::new(std::io::ErrorKind::ConnectionRefused, e.to_string()))
    } else {
        SnipdexError::Parse(e.to_string())
    }
}

/// Tags each returned snippet with `origin_pid`, one FanOut hop's worth of
/// attribution at a time (§4.5).
pub fn tag_origin(snippets: &mut SnippetList, origin_pid: &str, status: crate::peer::PeerStatus, score: f64) {
    let tagged: Vec<Snippet> = snippets
        .iter()
        .cloned()
        .map(|mut s| {
            s.add_origin(origin_pid.to_string(), Some(status), score);
            s
        })
        .collect();
    *snippets = SnippetList::from_vec(tagged);
}
