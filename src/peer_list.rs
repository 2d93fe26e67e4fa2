//! PeerList: an ordered set of peers with per-entry status and score,
//! supporting idempotent, monotonic merge (§3, §4.4).

use serde::{Deserialize, Serialize};

use crate::peer::{Peer, PeerStatus};

/// One `(peer, status, score)` triple (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerEntry {
    pub peer: Peer,
    pub status: PeerStatus,
    pub score: Option<f64>,
}

/// At most one entry per `pid` (§3). Order is preserved on merge — new
/// entries are appended, existing ones updated in place — because fan-out
/// rendering relies on a stable, dispatch-order-derived sequence (§5).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PeerList {
    entries: Vec<PeerEntry>,
}

impl PeerList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PeerEntry> {
        self.entries.iter()
    }

    pub fn into_iter_entries(self) -> impl Iterator<Item = PeerEntry> {
        self.entries.into_iter()
    }

    pub fn find(&self, pid: &str) -> Option<&PeerEntry> {
        self.entries.iter().find(|e| e.peer.pid == pid)
    }

    /// Appends without duplicate detection — used only for seeding a fresh
    /// list; prefer `merge_one` once the list may already contain the pid.
    pub fn append(&mut self, peer: Peer, status: PeerStatus, score: Option<f64>) {
        self.entries.push(PeerEntry { peer, status, score });
    }

    /// `PeerList.mergeOne` (§4.4): elementwise `max` of score, forward-only
    /// status progression, and descriptor replacement only on a strictly
    /// later `updated`.
    pub fn merge_one(&mut self, new_peer: Peer, new_status: PeerStatus, new_score: Option<f64>) {
        if let Some(existing) = self.entries.iter_mut().find(|e| e.peer.pid == new_peer.pid) {
            if existing.peer.older_than(&new_peer) {
                existing.peer = new_peer;
            }
            existing.score = max_score(existing.score, new_score);
            existing.status = existing.status.merge(new_status);
        } else {
            self.entries.push(PeerEntry {
                peer: new_peer,
                status: new_status,
                score: new_score,
            });
        }
    }

    /// Merges every entry of `other` into `self` via `merge_one`, preserving
    /// `other`'s iteration order (§4.4, §8.3).
    pub fn merge(&mut self, other: PeerList) {
        for entry in other.into_iter_entries() {
            self.merge_one(entry.peer, entry.status, entry.score);
        }
    }

    /// Moves the node's own `ME` entry to the front (§9 Open Question): a
    /// distinct post-processing step rather than folding it into merge itself.
    pub fn put_myself_first(&mut self, my_pid: &str) {
        if let Some(pos) = self.entries.iter().position(|e| e.peer.pid == my_pid) {
            let me = self.entries.remove(pos);
            self.entries.insert(0, me);
        }
    }
}

fn max_score(a: Option<f64>, b: Option<f64>) -> Option<f64> {
    match (a, b) {
        (None, None) => None,
        (Some(x), None) => Some(x),
        (None, Some(y)) => Some(y),
        (Some(x), Some(y)) => Some(x.max(y)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer::Template;

    fn peer(pid: &str) -> Peer {
        let mut p = Peer::zombie(
            pid,
            Template {
                url: format!("http://{pid}.example/feed"),
                mimetype: "application/rss+xml".into(),
                ..Default::default()
            },
        );
        p.pid = pid.to_string();
        p
    }

    #[test]
    fn merge_one_pid_appears_at_most_once() {
        let mut list = PeerList::new();
        list.merge_one(peer("p1"), PeerStatus::Todo, None);
        list.merge_one(peer("p1"), PeerStatus::Done, Some(1.0));
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn merge_one_score_is_max_observed() {
        let mut list = PeerList::new();
        list.merge_one(peer("p1"), PeerStatus::Done, Some(0.3));
        list.merge_one(peer("p1"), PeerStatus::Done, Some(0.9));
        list.merge_one(peer("p1"), PeerStatus::Done, Some(0.1));
        assert_eq!(list.find("p1").unwrap().score, Some(0.9));
    }

    #[test]
    fn merge_one_status_never_regresses_to_todo() {
        let mut list = PeerList::new();
        list.merge_one(peer("p1"), PeerStatus::Timeout, None);
        list.merge_one(peer("p1"), PeerStatus::Todo, None);
        assert_eq!(list.find("p1").unwrap().status, PeerStatus::Timeout);
    }

    #[test]
    fn merge_one_todo_yields_to_any_other_status() {
        let mut list = PeerList::new();
        list.merge_one(peer("p1"), PeerStatus::Todo, None);
        list.merge_one(peer("p1"), PeerStatus::Error, None);
        assert_eq!(list.find("p1").unwrap().status, PeerStatus::Error);
    }

    #[test]
    fn put_myself_first_moves_me_entry_to_front() {
        let mut list = PeerList::new();
        list.append(peer("other"), PeerStatus::Done, None);
        list.append(peer("self"), PeerStatus::Me, None);
        list.put_myself_first("self");
        assert_eq!(list.iter().next().unwrap().peer.pid, "self");
    }
}
