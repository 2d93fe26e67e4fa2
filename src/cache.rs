//! Persistent two-table cache: `pid -> Peer` and `fingerprint -> SnippetList`
//! (§3, §4.2, §4.2A).
//!
//! This is the system of record, not an eviction cache — there is no TTL,
//! and every `put` durably rewrites the on-disk file before returning.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::warn;

use crate::error::SnipdexError;
use crate::peer::{Peer, PeerStatus};
use crate::peer_list::PeerList;
use crate::query::QUERY_MYSELF;
use crate::snippet::{Origin, Snippet};
use crate::snippet_list::SnippetList;

/// On-disk shape of the cache, written whole on every mutation (§4.2A).
#[derive(Debug, Default, Serialize, Deserialize)]
struct CacheFile {
    my_pid: String,
    #[serde(default)]
    peers: HashMap<String, Peer>,
    #[serde(default)]
    snippets: HashMap<String, SnippetList>,
}

pub struct Cache {
    path: PathBuf,
    inner: RwLock<CacheFile>,
}

impl Cache {
    /// Opens `path`, or creates it and mints a fresh random pid for this node
    /// if it does not exist yet (§4.2A).
    pub async fn open_or_create(path: impl AsRef<Path>) -> Result<Self, SnipdexError> {
        let path = path.as_ref().to_path_buf();

        let file = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice::<CacheFile>(&bytes)
                .map_err(|e| SnipdexError::Parse(format!("corrupt cache file: {e}")))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("creating new cache at {}", path.display());
                CacheFile {
                    my_pid: new_random_pid(),
                    peers: HashMap::new(),
                    snippets: HashMap::new(),
                }
            }
            Err(e) => return Err(SnipdexError::Io(e)),
        };

        let cache = Cache {
            path,
            inner: RwLock::new(file),
        };
        cache.persist().await?;
        Ok(cache)
    }

    /// The pid this cache file was minted for (§4.2A).
    pub async fn my_pid(&self) -> String {
        self.inner.read().await.my_pid.clone()
    }

    /// Exact lookup (§4.2): cross-references snippet origins against the peer
    /// table, drops unknown pids (logged), and strips empty carriers.
    pub async fn get(&self, fingerprint: &str) -> (PeerList, SnippetList) {
        let file = self.inner.read().await;
        let mut peer_list = PeerList::new();
        let mut snippet_list = file
            .snippets
            .get(fingerprint)
            .cloned()
            .unwrap_or_default();

        let term_score = fingerprint.split('+').filter(|t| !t.is_empty()).count() as f64;

        for snippet in snippet_list.iter_mut() {
            snippet.origins.retain(|origin| {
                match file.peers.get(&origin.pid) {
                    Some(peer) => {
                        peer_list.merge_one(peer.clone(), origin.status.unwrap_or(PeerStatus::Todo), Some(term_score));
                        true
                    }
                    None => {
                        warn!("unknown persistent peer id '{}' in cached snippet", origin.pid);
                        false
                    }
                }
            });
        }
        snippet_list.remove_empty_snippets();
        (peer_list, snippet_list)
    }

    /// Sub-query back-off lookup (§4.2, §4.2A): merges peer lists for every
    /// term and every left-prefix of a multi-term fingerprint, forcing status
    /// to `TODO`, and returns the exact fingerprint's own snippet list
    /// untouched.
    pub async fn get_approx(&self, fingerprint: &str) -> (PeerList, SnippetList) {
        let (mut peer_list, snippet_list) = self.get(fingerprint).await;

        let parts: Vec<&str> = fingerprint.split('+').filter(|t| !t.is_empty()).collect();
        if parts.len() > 1 {
            let mut prefix = String::new();
            for part in &parts {
                if !prefix.is_empty() {
                    prefix.push('+');
                }
                prefix.push_str(part);
                if prefix != fingerprint {
                    let (sub_peers, _) = self.get(&prefix).await;
                    for entry in sub_peers.into_iter_entries() {
                        peer_list.merge_one(entry.peer, PeerStatus::Todo, entry.score);
                    }
                }
                if *part != prefix {
                    let (term_peers, _) = self.get(part).await;
                    for entry in term_peers.into_iter_entries() {
                        peer_list.merge_one(entry.peer, PeerStatus::Todo, entry.score);
                    }
                }
            }
        }
        (peer_list, snippet_list)
    }

    /// Insert-or-update (§4.2, §4.2A): rewrites snippet origins' `(status,
    /// score)` from `peers`, and carries any pid present in `peers` but
    /// absent from every snippet as a synthetic empty-carrier snippet.
    pub async fn put(
        &self,
        fingerprint: &str,
        peers: &PeerList,
        snippets: &SnippetList,
        default_status: Option<PeerStatus>,
    ) -> Result<(), SnipdexError> {
        let mut file = self.inner.write().await;

        for entry in peers.iter() {
            let pid = entry.peer.pid.clone();
            match file.peers.get(&pid) {
                Some(existing) if !existing.older_than(&entry.peer) => {}
                _ => {
                    file.peers.insert(pid, entry.peer.clone());
                }
            }
        }

        let mut new_list = snippets.clone();
        let orphans = update_snippet_origins_return_orphans(&mut new_list, peers, default_status);
        for (pid, status, score) in orphans {
            new_list.push(Snippet::empty_carrier(Origin { pid, status: Some(status), score }));
        }

        file.snippets.insert(fingerprint.to_string(), new_list);
        drop(file);
        self.persist().await
    }

    /// Writes `peers` (status forced to `TODO`) into every proper prefix and
    /// every individual term of a multi-term fingerprint (§4.2, §4.2A).
    pub async fn put_backoff(&self, fingerprint: &str, peers: &PeerList) -> Result<(), SnipdexError> {
        let mut todo_peers = PeerList::new();
        for entry in peers.iter() {
            todo_peers.append(entry.peer.clone(), PeerStatus::Todo, entry.score);
        }

        let parts: Vec<&str> = fingerprint.split('+').filter(|t| !t.is_empty()).collect();
        if parts.len() <= 1 {
            return Ok(());
        }

        let mut prefix = String::new();
        for (i, part) in parts.iter().enumerate() {
            if !prefix.is_empty() {
                prefix.push('+');
            }
            prefix.push_str(part);
            let is_full_prefix = i + 1 == parts.len();
            if !is_full_prefix {
                self.merge_peers_into(&prefix, &todo_peers).await?;
            }
            self.merge_peers_into(part, &todo_peers).await?;
        }
        Ok(())
    }

    async fn merge_peers_into(&self, fingerprint: &str, peers: &PeerList) -> Result<(), SnipdexError> {
        let (mut existing, snippets) = self.get(fingerprint).await;
        existing.merge(peers.clone());
        self.put(fingerprint, &existing, &snippets, Some(PeerStatus::Todo)).await
    }

    /// Ten peers per page, sorted by pid (§4.2, §4.2A).
    pub async fn all_peers_by_page(&self, page: u32) -> PeerList {
        let file = self.inner.read().await;
        let mut pids: Vec<&String> = file.peers.keys().collect();
        pids.sort();

        let page = page.max(1);
        let first = ((page - 1) * 10) as usize;
        let last = first + 10;

        let mut list = PeerList::new();
        for pid in pids.into_iter().skip(first).take(last.saturating_sub(first)) {
            list.append(file.peers[pid].clone(), PeerStatus::Todo, Some(1.0));
        }
        list
    }

    /// Writes the whole file to a temp path in the same directory, then
    /// renames over the target — atomic on a single filesystem (§4.2A).
    async fn persist(&self) -> Result<(), SnipdexError> {
        let file = self.inner.read().await;
        let encoded = serde_json::to_vec_pretty(&*file)
            .map_err(|e| SnipdexError::Parse(format!("cache serialize failed: {e}")))?;
        drop(file);

        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        tokio::fs::create_dir_all(dir).await.map_err(SnipdexError::Io)?;

        let tmp = tempfile::Builder::new()
            .prefix(".snipdex-cache-")
            .tempfile_in(dir)
            .map_err(SnipdexError::Io)?;
        tokio::fs::write(tmp.path(), &encoded).await.map_err(SnipdexError::Io)?;
        tmp.persist(&self.path)
            .map_err(|e| SnipdexError::Io(e.error))?;
        Ok(())
    }
}

fn new_random_pid() -> String {
    use rand::RngExt;
    const CHARS: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";
    let mut rng = rand::rng();
    (0..23)
        .map(|_| CHARS[rng.random_range(0..CHARS.len())] as char)
        .collect()
}

/// Rewrites each snippet origin's `(status, score)` from `peers`, and
/// returns the pids in `peers` that no snippet referenced.
fn update_snippet_origins_return_orphans(
    snippets: &mut SnippetList,
    peers: &PeerList,
    default_status: Option<PeerStatus>,
) -> Vec<(String, PeerStatus, f64)> {
    let mut to_be_inserted: HashMap<String, (PeerStatus, f64)> = HashMap::new();
    for entry in peers.iter() {
        to_be_inserted.insert(entry.peer.pid.clone(), (entry.status, entry.score.unwrap_or(0.0)));
    }

    for snippet in snippets.iter_mut() {
        for origin in snippet.origins.iter_mut() {
            if let Some((status, score)) = to_be_inserted.remove(&origin.pid) {
                origin.status = Some(status);
                origin.score = score;
            }
        }
    }

    to_be_inserted
        .into_iter()
        .map(|(pid, (status, score))| {
            let status = default_status.unwrap_or(status);
            (pid, status, score)
        })
        .collect()
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

    fn snippet(location: &str, pid: &str) -> Snippet {
        Snippet {
            location: Some(location.to_string()),
            title: Some("title".into()),
            origins: vec![Origin { pid: pid.to_string(), status: Some(PeerStatus::Done), score: 1.0 }],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn open_or_create_mints_a_pid_on_first_use() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");
        let cache = Cache::open_or_create(&path).await.unwrap();
        assert_eq!(cache.my_pid().await.len(), 23);
        assert!(path.exists());
    }

    #[tokio::test]
    async fn round_trip_put_then_get_is_invariant() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Cache::open_or_create(dir.path().join("cache.json")).await.unwrap();

        let mut peers = PeerList::new();
        peers.append(peer("p1"), PeerStatus::Done, Some(1.0));
        let mut snippets = SnippetList::new();
        snippets.push(snippet("http://x/1", "p1"));

        cache.put("rust", &peers, &snippets, None).await.unwrap();
        let (got_peers, got_snippets) = cache.get("rust").await;

        assert_eq!(got_peers.len(), 1);
        assert_eq!(got_snippets.len(), 1);
        assert_eq!(got_snippets.iter().next().unwrap().origins[0].pid, "p1");
    }

    #[tokio::test]
    async fn get_drops_origins_for_unknown_peers_and_strips_resulting_empties() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Cache::open_or_create(dir.path().join("cache.json")).await.unwrap();

        let peers = PeerList::new();
        let mut snippets = SnippetList::new();
        snippets.push(snippet("http://x/1", "ghost"));
        cache.put("rust", &peers, &snippets, None).await.unwrap();

        let (got_peers, got_snippets) = cache.get("rust").await;
        assert!(got_peers.is_empty());
        assert_eq!(got_snippets.len(), 0);
    }

    #[tokio::test]
    async fn put_backoff_then_get_approx_surfaces_todo_peers_on_every_term() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Cache::open_or_create(dir.path().join("cache.json")).await.unwrap();

        let mut peers = PeerList::new();
        peers.append(peer("p1"), PeerStatus::Done, Some(1.0));
        cache.put_backoff("foo+bar+baz", &peers).await.unwrap();

        let (foo_peers, _) = cache.get_approx("foo").await;
        assert_eq!(foo_peers.find("p1").unwrap().status, PeerStatus::Todo);

        let (full_peers, _) = cache.get_approx("foo+bar+baz").await;
        assert!(full_peers.find("p1").is_some());
    }

    #[tokio::test]
    async fn all_peers_by_page_is_sorted_and_paginated() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Cache::open_or_create(dir.path().join("cache.json")).await.unwrap();

        let mut peers = PeerList::new();
        for i in 0..15 {
            peers.append(peer(&format!("p{i:02}")), PeerStatus::Done, Some(1.0));
        }
        cache.put("q", &peers, &SnippetList::new(), None).await.unwrap();

        let page1 = cache.all_peers_by_page(1).await;
        let page2 = cache.all_peers_by_page(2).await;
        assert_eq!(page1.len(), 10);
        assert_eq!(page2.len(), 5);
        assert_eq!(page1.iter().next().unwrap().peer.pid, "p00");
    }

    #[tokio::test]
    async fn reopen_after_restart_preserves_my_pid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");
        let first = Cache::open_or_create(&path).await.unwrap();
        let pid = first.my_pid().await;
        drop(first);

        let reopened = Cache::open_or_create(&path).await.unwrap();
        assert_eq!(reopened.my_pid().await, pid);
    }

    #[tokio::test]
    async fn myself_fingerprint_survives_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Cache::open_or_create(dir.path().join("cache.json")).await.unwrap();
        let pid = cache.my_pid().await;

        let mut peers = PeerList::new();
        peers.append(peer(&pid), PeerStatus::Me, Some(1.0));
        cache.put(QUERY_MYSELF, &peers, &SnippetList::new(), None).await.unwrap();

        let (got, _) = cache.get(QUERY_MYSELF).await;
        assert_eq!(got.find(&pid).unwrap().status, PeerStatus::Me);
    }
}
