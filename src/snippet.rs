//! Snippet: one result record, plus the origin-tracking and signature
//! machinery SnippetList dedup relies on (§3).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::peer::PeerStatus;

/// `(pid, status, score)` identifying one peer that asserted this result
/// (§3). `status` is optional because the scraper's native-XML parser may
/// encounter an `<origin>` with no accompanying status information.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Origin {
    pub pid: String,
    #[serde(default)]
    pub status: Option<PeerStatus>,
    pub score: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Preview {
    pub mimetype: String,
    pub url: String,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Snippet {
    pub origins: Vec<Origin>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub found: Option<DateTime<Utc>>,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub extended_summary: Option<String>,
    #[serde(default)]
    pub preview: Option<Preview>,
    #[serde(default)]
    pub geolocation: Option<String>,
    #[serde(default)]
    pub direct_links: Vec<(String, String)>,
    #[serde(default)]
    pub service_links: Vec<(String, String)>,
    #[serde(default)]
    pub attributes: Vec<(String, String)>,
}

impl Snippet {
    /// A synthetic carrier snippet with no title and no location, used
    /// solely to keep an origin pid associated with a fingerprint that
    /// returned no content (§3, §4.2's `put`).
    pub fn empty_carrier(origin: Origin) -> Self {
        Snippet {
            origins: vec![origin],
            ..Default::default()
        }
    }

    /// An "empty" snippet carries no title and no location (§3); such
    /// snippets exist only to preserve origin associations and are stripped
    /// on read.
    pub fn is_empty_carrier(&self) -> bool {
        self.title.is_none() && self.location.is_none()
    }

    /// Normalized `location` (`http://www.` stripped, `index.html?` dropped),
    /// falling back to `title` when there is no location (§3).
    pub fn signature(&self) -> Option<String> {
        match &self.location {
            None => self.title.clone(),
            Some(loc) if !loc.contains("://") => Some(loc.clone()),
            Some(loc) => {
                let loc = loc.replacen("http://www.", "http://", 1);
                let loc = loc.replacen("index.html", "", 1).replacen("index.htm", "", 1);
                Some(loc)
            }
        }
    }

    /// Adds or updates one origin (§4.4's "add its origins" merge step): a
    /// higher score wins, and a non-`Todo` incoming status overrides a
    /// differing existing status.
    pub fn add_origin(&mut self, origin_id: String, status: Option<PeerStatus>, score: f64) {
        if let Some(existing) = self.origins.iter_mut().find(|o| o.pid == origin_id) {
            if score > existing.score {
                existing.score = score;
            }
            if let Some(incoming) = status {
                if !incoming.is_todo() && existing.status != Some(incoming) {
                    existing.status = Some(incoming);
                }
            }
        } else {
            self.origins.push(Origin {
                pid: origin_id,
                status,
                score,
            });
        }
    }

    pub fn add_origins(&mut self, new_origins: &[Origin]) {
        for o in new_origins {
            self.add_origin(o.pid.clone(), o.status, o.score);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snippet_with_location(loc: &str) -> Snippet {
        Snippet {
            location: Some(loc.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn signature_strips_www_and_index_html() {
        let s = snippet_with_location("http://www.example.com/index.html");
        assert_eq!(s.signature().as_deref(), Some("http://example.com/"));
    }

    #[test]
    fn signature_falls_back_to_title_without_location() {
        let s = Snippet {
            title: Some("A Title".into()),
            ..Default::default()
        };
        assert_eq!(s.signature().as_deref(), Some("A Title"));
    }

    #[test]
    fn empty_carrier_is_detected() {
        let s = Snippet::empty_carrier(Origin {
            pid: "p1".into(),
            status: Some(PeerStatus::Empty),
            score: 0.1,
        });
        assert!(s.is_empty_carrier());
    }

    #[test]
    fn add_origin_raises_score_and_updates_status() {
        let mut s = Snippet::default();
        s.add_origin("p1".into(), Some(PeerStatus::Todo), 1.0);
        s.add_origin("p1".into(), Some(PeerStatus::Done), 2.0);
        let o = &s.origins[0];
        assert_eq!(o.score, 2.0);
        assert_eq!(o.status, Some(PeerStatus::Done));
    }
}
