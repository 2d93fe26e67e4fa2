//! SnippetList: the round-robin-interleaving, signature-deduping merge
//! container for search results (§3, §4.4).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::peer::PeerStatus;
use crate::snippet::{Origin, Snippet};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SnippetList {
    snippets: Vec<Snippet>,
}

impl SnippetList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_vec(snippets: Vec<Snippet>) -> Self {
        SnippetList { snippets }
    }

    pub fn len(&self) -> usize {
        self.snippets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snippets.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Snippet> {
        self.snippets.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Snippet> {
        self.snippets.iter_mut()
    }

    pub fn into_vec(self) -> Vec<Snippet> {
        self.snippets
    }

    pub fn push(&mut self, snippet: Snippet) {
        self.snippets.push(snippet);
    }

    fn distinct_origin_count(&self) -> usize {
        let mut seen: HashMap<&str, ()> = HashMap::new();
        for s in &self.snippets {
            for o in &s.origins {
                seen.insert(&o.pid, ());
            }
        }
        seen.len()
    }

    /// Adds `origin_id` to every snippet currently in the list (used when a
    /// peer reports a status but no own snippets beyond a carrier — §4.2's
    /// `put`).
    pub fn add_origin_to_all(&mut self, origin_id: &str, status: Option<PeerStatus>, score: f64) {
        for s in &mut self.snippets {
            s.add_origin(origin_id.to_string(), status, score);
        }
    }

    /// Strips snippets that carry no title and no location (§3). Called on
    /// cache read, never on write, so the carrier survives round-trips.
    pub fn remove_empty_snippets(&mut self) {
        self.snippets.retain(|s| !s.is_empty_carrier());
    }

    /// Round-robin interleave merge (§4.4): `k = max(1, |distinct origins in
    /// self|)`; emit one `self` item, then every `k` self items emit one
    /// `other` item; duplicates (by signature) are not re-appended, their
    /// origins are folded into the existing entry instead.
    ///
    /// Non-commutative by construction — `k` is derived from `self` only, so
    /// `a.merge(b)` and `b.merge(a)` generally differ (§9's design note).
    pub fn merge(&mut self, other: SnippetList) {
        let k = self.distinct_origin_count().max(1);
        let others = other.snippets;

        let mut merged: Vec<Snippet> = Vec::with_capacity(self.snippets.len() + others.len());
        let mut signature_index: HashMap<String, usize> = HashMap::new();

        let mut i = 0;
        let mut j = 0;
        while i < self.snippets.len() || j < others.len() {
            if i < self.snippets.len() {
                let s = self.snippets[i].clone();
                if let Some(sig) = s.signature() {
                    signature_index.insert(sig, merged.len());
                }
                merged.push(s);
                i += 1;
            }
            if i % k == 0 || i >= self.snippets.len() {
                if j < others.len() {
                    let other_item = others[j].clone();
                    match other_item.signature().and_then(|sig| signature_index.get(&sig).copied()) {
                        Some(existing_idx) => merged[existing_idx].add_origins(&other_item.origins),
                        None => {
                            if let Some(sig) = other_item.signature() {
                                signature_index.insert(sig, merged.len());
                            }
                            merged.push(other_item);
                        }
                    }
                    j += 1;
                }
            }
        }

        self.snippets = merged;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snippet::Origin;

    fn snippet(location: &str, origin_pid: &str) -> Snippet {
        Snippet {
            location: Some(location.to_string()),
            title: Some(format!("title for {location}")),
            origins: vec![Origin {
                pid: origin_pid.to_string(),
                status: Some(PeerStatus::Done),
                score: 1.0,
            }],
            ..Default::default()
        }
    }

    #[test]
    fn merge_dedups_by_signature_and_unions_origins() {
        let mut a = SnippetList::new();
        a.push(snippet("http://www.example.com/a", "p1"));

        let mut b = SnippetList::new();
        b.push(snippet("http://example.com/a", "p2"));

        a.merge(b);

        assert_eq!(a.len(), 1);
        let origins = &a.iter().next().unwrap().origins;
        let pids: Vec<&str> = origins.iter().map(|o| o.pid.as_str()).collect();
        assert!(pids.contains(&"p1"));
        assert!(pids.contains(&"p2"));
    }

    #[test]
    fn merge_never_exceeds_one_entry_per_signature() {
        let mut a = SnippetList::new();
        a.push(snippet("http://x/1", "p1"));
        a.push(snippet("http://x/2", "p1"));

        let mut b = SnippetList::new();
        b.push(snippet("http://x/1", "p2"));
        b.push(snippet("http://x/3", "p2"));

        a.merge(b);

        let sigs: Vec<Option<String>> = a.iter().map(|s| s.signature()).collect();
        let mut unique = sigs.clone();
        unique.sort();
        unique.dedup();
        assert_eq!(sigs.len(), unique.len());
    }

    #[test]
    fn remove_empty_snippets_strips_carriers() {
        let mut list = SnippetList::new();
        list.push(Snippet::empty_carrier(Origin {
            pid: "p1".into(),
            status: Some(PeerStatus::Empty),
            score: 0.1,
        }));
        list.push(snippet("http://x/1", "p1"));
        list.remove_empty_snippets();
        assert_eq!(list.len(), 1);
    }
}
