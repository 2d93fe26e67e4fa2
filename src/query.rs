//! Query parameter map, fingerprint normalization, and URL template filling.
//!
//! A flat string->string map with one derived value, the normalized
//! fingerprint, that doubles as the cache key and the merge identity for a
//! search.

use std::collections::BTreeMap;

use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use regex::Regex;

use crate::error::SnipdexError;

/// Reserved query used by the registration handshake (§4.6).
pub const QUERY_REGISTER: &str = "SNIPDEX_QUERY_REGISTER";
/// Reserved query used for the mother liveness probe (§4.6A).
pub const QUERY_PONG: &str = "SNIPDEX_QUERY_PONG";
/// Reserved cache fingerprint the node's own pid is stored under.
pub const QUERY_MYSELF: &str = "SNIPDEX_QUERY_MYSELF";

/// `quote_plus`-equivalent: space becomes `+`, everything else percent-encoded
/// except the characters `urllib.quote_plus` leaves alone.
const QUOTE_PLUS_SAFE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'_')
    .remove(b'.')
    .remove(b'-')
    .remove(b'~');

fn quote_plus(s: &str) -> String {
    utf8_percent_encode(s, QUOTE_PLUS_SAFE)
        .to_string()
        .replace("%20", "+")
}

/// A mapping from short parameter names to string values (§3).
///
/// Backed by a `BTreeMap` rather than a `HashMap` so that iteration order
/// (used when rendering `<query k="v" .../>` attributes) is deterministic.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Query {
    params: BTreeMap<String, String>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(|s| s.as_str())
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.params.insert(key.into(), value.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.params.remove(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.params.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn is_register(&self) -> bool {
        self.get("q") == Some(QUERY_REGISTER)
    }

    pub fn is_pong(&self) -> bool {
        self.get("q") == Some(QUERY_PONG)
    }

    /// Copies every non-`public_*` key from `other` into `self`, so a
    /// scraper's returned `Q'` carries the caller's context forward while
    /// letting the peer's own observed `public_ip/public_port` win (§4.3.5).
    pub fn adopt_context_from(&mut self, other: &Query) {
        for (k, v) in other.iter() {
            if !k.starts_with("public_") {
                self.set(k, v);
            }
        }
    }

    /// Produces the canonical fingerprint derived from `q` and `h` (§3).
    ///
    /// Idempotent: `normalize(normalize(q)) == normalize(q)` (§8.1), since the
    /// output is already lowercase, whitespace-collapsed, and carries its
    /// hashtag (if any) pre-hoisted to the front with `+` separators that
    /// `whitespace_re` does not touch.
    pub fn normalize(&self) -> String {
        let whitespace_re = Regex::new(r"\s+").expect("static regex");

        let raw_q = self.get("q").unwrap_or("");
        let mut text = whitespace_re.replace_all(raw_q, " ").trim().to_string();

        let mut tag = self
            .get("h")
            .map(|h| whitespace_re.replace_all(h.trim(), "").to_string())
            .filter(|h| !h.is_empty())
            .map(|h| if h.starts_with('#') { h } else { format!("#{h}") });

        if !text.is_empty() {
            let mut rebuilt = String::new();
            for term in text.split(' ') {
                if term.is_empty() {
                    continue;
                }
                let term = if let Some(stripped) = term.strip_prefix('#') {
                    if tag.is_some() {
                        stripped.to_string()
                    } else {
                        tag = Some(term.to_string());
                        String::new()
                    }
                } else {
                    term.to_string()
                };
                if term.is_empty() {
                    continue;
                }
                if !rebuilt.is_empty() {
                    rebuilt.push(' ');
                }
                rebuilt.push_str(&term);
            }
            text = rebuilt;
        }

        let combined = match (&tag, text.is_empty()) {
            (Some(tag), true) => tag.clone(),
            (Some(tag), false) => format!("{tag} {text}"),
            (None, _) => text,
        };

        quote_plus(&combined.to_lowercase())
    }

    /// Fills `{k}` and `{k?}` placeholders in `template` with URL-encoded
    /// values from this query. The `q` placeholder always uses the
    /// normalized fingerprint, not the raw stored value (§4.1).
    pub fn fill(&self, template: &str) -> Result<String, SnipdexError> {
        let placeholder_re = Regex::new(r"\{([A-Za-z0-9_]+)(\?)?\}").expect("static regex");

        let mut missing_required = None;
        let filled = placeholder_re.replace_all(template, |caps: &regex::Captures| {
            let key = &caps[1];
            let optional = caps.get(2).is_some();

            let value = if key == "q" {
                Some(self.normalize())
            } else {
                self.get(key).map(quote_plus)
            };

            match value {
                Some(v) => v,
                None if optional => String::new(),
                None => {
                    missing_required.get_or_insert_with(|| key.to_string());
                    String::new()
                }
            }
        });

        if let Some(key) = missing_required {
            return Err(SnipdexError::InvalidTemplate(format!(
                "missing required placeholder {{{key}}}"
            )));
        }

        Ok(filled.into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_is_idempotent() {
        let q = Query::new().with("q", "  Hello   World  ");
        let once = q.normalize();
        let twice = Query::new().with("q", once.clone()).normalize();
        assert_eq!(once, twice);
    }

    #[test]
    fn normalize_lowercases_and_collapses_whitespace() {
        let q = Query::new().with("q", "Rust   Search Engine");
        assert_eq!(q.normalize(), "rust+search+engine");
    }

    #[test]
    fn normalize_hoists_inline_hashtag_to_front() {
        let q = Query::new().with("q", "cats #videos dogs");
        assert_eq!(q.normalize(), "%23videos+cats+dogs");
    }

    #[test]
    fn normalize_prefers_explicit_hashtag_param_and_strips_inline() {
        let q = Query::new().with("q", "cats #ignored").with("h", "videos");
        assert_eq!(q.normalize(), "%23videos+cats+ignored");
    }

    #[test]
    fn fill_required_placeholder_bound() {
        let q = Query::new().with("q", "hello world");
        let filled = q.fill("http://x/search?q={q}").unwrap();
        assert!(filled.contains("hello+world"));
    }

    #[test]
    fn fill_leaves_no_optional_placeholders() {
        let q = Query::new().with("q", "hi");
        let filled = q.fill("http://x/search?q={q}&l={l?}").unwrap();
        assert!(!filled.contains("{l?}"));
        assert!(filled.ends_with("&l="));
    }

    #[test]
    fn fill_errors_on_missing_required_placeholder() {
        let q = Query::new();
        let err = q.fill("http://x/search?l={l}").unwrap_err();
        assert!(matches!(err, SnipdexError::InvalidTemplate(_)));
    }
}
