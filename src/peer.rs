//! Peer descriptor: identity, transport templates, and scraping hints for one
//! remote search source (§3).

use chrono::{DateTime, Utc};
use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};

/// One of the three template tuples a peer may advertise (§3): a URL, the
/// format descriptor's mimetype, and optional XPath-ish overrides for the
/// scraper to use instead of its format's built-in defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Template {
    pub url: String,
    pub mimetype: String,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub item_path: Option<String>,
    #[serde(default)]
    pub title_path: Option<String>,
    #[serde(default)]
    pub link_path: Option<String>,
    #[serde(default)]
    pub summary_path: Option<String>,
    #[serde(default)]
    pub preview_path: Option<String>,
    #[serde(default)]
    pub attribute_paths: Option<String>,
    #[serde(default)]
    pub force_decode: Option<String>,
}

/// `application/snipdex+xml`, the native sibling-node wire format (§4.3).
pub const MIME_SNIPDEX_XML: &str = "application/snipdex+xml";
pub const MIME_SUGGESTIONS_XML: &str = "application/x-suggestions+xml";
pub const MIME_HTML: &str = "text/html";

/// A remote search source — either a sibling node or a "zombie" adapter
/// wrapping a third-party engine (§3, GLOSSARY).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Peer {
    pub pid: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub icon: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub adult_content: bool,
    #[serde(default)]
    pub hashtag: Option<String>,
    #[serde(default)]
    pub query_hints: Vec<String>,
    #[serde(default)]
    pub updated: Option<DateTime<Utc>>,
    #[serde(default)]
    pub open_template: Option<Template>,
    #[serde(default)]
    pub html_template: Option<Template>,
    #[serde(default)]
    pub suggest_template: Option<Template>,
    #[serde(default)]
    pub public_address: Option<String>,
    #[serde(default)]
    pub local_address: Option<String>,
}

impl Peer {
    /// Builds a zombie peer from a single template, deriving its `pid` as the
    /// MD5 of the template URL (§3).
    pub fn zombie(name: impl Into<String>, open_template: Template) -> Self {
        let pid = zombie_pid(&open_template.url);
        Peer {
            pid,
            name: Some(name.into()),
            description: None,
            icon: None,
            language: None,
            adult_content: false,
            hashtag: None,
            query_hints: Vec::new(),
            updated: None,
            open_template: Some(open_template),
            html_template: None,
            suggest_template: None,
            public_address: None,
            local_address: None,
        }
    }

    /// A peer with a `public_address` synthesizes an `open_template` pointing
    /// at that address's native-XML endpoint (§3).
    pub fn open_template_or_synthesized(&self) -> Option<Template> {
        if let Some(addr) = &self.public_address {
            Some(Template {
                url: format!(
                    "http://{addr}/snipdex/?q={{q}}&h={{h?}}&p={{p?}}&l={{l?}}&f=xml&v=0.2"
                ),
                mimetype: MIME_SNIPDEX_XML.to_string(),
                ..Default::default()
            })
        } else {
            self.open_template.clone()
        }
    }

    /// True if `peer` was updated strictly later than `self` — the
    /// replace-descriptor-on-merge condition of §4.4.
    pub fn older_than(&self, other: &Peer) -> bool {
        match (self.updated, other.updated) {
            (_, None) => false,
            (None, Some(_)) => true,
            (Some(a), Some(b)) => a < b,
        }
    }
}

/// MD5 hex digest of a template URL, used as the pid for zombie peers that
/// have no network-assigned identity (§3).
pub fn zombie_pid(template_url: &str) -> String {
    let mut hasher = Md5::new();
    hasher.update(template_url.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// `status ∈ {TODO, DONE, ME, EMPTY, ERROR, TIMEOUT}` (§3).
///
/// `TODO` is the only non-terminal rank: once a peer entry carries any other
/// status it never regresses to `TODO` again (§4.4, §8.3, §9's status
/// lattice note).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PeerStatus {
    Todo,
    Done,
    Me,
    Empty,
    Error,
    Timeout,
}

impl PeerStatus {
    pub fn is_todo(self) -> bool {
        matches!(self, PeerStatus::Todo)
    }

    /// The forward-progress merge rule (§4.4, §9): a `Todo` entry yields to
    /// any other status; any non-`Todo` status is sticky against a later
    /// `Todo` (which cannot happen validly) and against a later differing
    /// non-`Todo` status (the first one recorded wins; only the `Todo -> *`
    /// transition is ever special-cased).
    pub fn merge(self, incoming: PeerStatus) -> PeerStatus {
        if self.is_todo() && !incoming.is_todo() {
            incoming
        } else {
            self
        }
    }

    pub fn as_wire_str(self) -> &'static str {
        match self {
            PeerStatus::Todo => "TODO",
            PeerStatus::Done => "DONE",
            PeerStatus::Me => "ME",
            PeerStatus::Empty => "EMPTY",
            PeerStatus::Error => "ERROR",
            PeerStatus::Timeout => "TIMEOUT",
        }
    }

    pub fn from_wire_str(s: &str) -> PeerStatus {
        match s {
            "DONE" => PeerStatus::Done,
            "ME" => PeerStatus::Me,
            "EMPTY" => PeerStatus::Empty,
            "ERROR" => PeerStatus::Error,
            "TIMEOUT" => PeerStatus::Timeout,
            _ => PeerStatus::Todo,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zombie_pid_is_stable_md5_of_template_url() {
        let p1 = Peer::zombie(
            "Example Feed",
            Template {
                url: "http://example.com/feed.rss".into(),
                mimetype: "application/rss+xml".into(),
                ..Default::default()
            },
        );
        let p2 = Peer::zombie(
            "Example Feed Renamed",
            Template {
                url: "http://example.com/feed.rss".into(),
                mimetype: "application/rss+xml".into(),
                ..Default::default()
            },
        );
        assert_eq!(p1.pid, p2.pid);
    }

    #[test]
    fn status_merge_leaves_todo_only_when_incoming_is_also_todo() {
        assert_eq!(PeerStatus::Todo.merge(PeerStatus::Todo), PeerStatus::Todo);
        assert_eq!(PeerStatus::Todo.merge(PeerStatus::Done), PeerStatus::Done);
    }

    #[test]
    fn status_merge_never_regresses_to_todo() {
        assert_eq!(
            PeerStatus::Timeout.merge(PeerStatus::Todo),
            PeerStatus::Timeout
        );
        assert_eq!(PeerStatus::Done.merge(PeerStatus::Error), PeerStatus::Done);
    }

    #[test]
    fn older_than_compares_updated_timestamps() {
        let older = Peer::zombie(
            "A",
            Template {
                url: "http://a".into(),
                mimetype: "text/html".into(),
                ..Default::default()
            },
        );
        let mut newer = older.clone();
        newer.updated = Some(Utc::now());
        assert!(older.older_than(&newer));
        assert!(!newer.older_than(&older));
    }
}
