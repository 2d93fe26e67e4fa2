//! FanOut: the bounded-hop, time-boxed broadcast search across a node's
//! known peers (§4.5, §4.5A, §5).

use std::sync::Arc;
use std::time::{Duration, Instant};

use reqwest::Client;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::warn;

use crate::cache::Cache;
use crate::error::SnipdexError;
use crate::peer::{Peer, PeerStatus};
use crate::peer_list::PeerList;
use crate::query::Query;
use crate::scraper::PeerLink;
use crate::snippet_list::SnippetList;

pub const DEFAULT_HOPS: u32 = 3;
pub const DEFAULT_PER_HOP_BUDGET: Duration = Duration::from_secs(4);

pub struct FanOutConfig {
    pub hops: u32,
    pub per_hop_budget: Duration,
}

impl Default for FanOutConfig {
    fn default() -> Self {
        FanOutConfig { hops: DEFAULT_HOPS, per_hop_budget: DEFAULT_PER_HOP_BUDGET }
    }
}

pub struct FanOutOutcome {
    pub peers: PeerList,
    pub snippets: SnippetList,
}

struct WorkerOutcome {
    pid: String,
    result: Result<crate::scraper::ScraperOutcome, SnipdexError>,
}

/// Runs one federated search: seeds from the cache's sub-query back-off,
/// dispatches `hops` rounds of parallel peer workers, and persists the
/// combined result (§4.5).
pub async fn run(
    client: &Client,
    cache: &Cache,
    outbound_limit: &Arc<Semaphore>,
    myself: &Peer,
    known_peers: &PeerList,
    query: &Query,
    fingerprint: &str,
    config: &FanOutConfig,
) -> Result<FanOutOutcome, SnipdexError> {
    let (mut peers, mut snippets) = cache.get_approx(fingerprint).await;
    for entry in known_peers.iter() {
        peers.merge_one(entry.peer.clone(), PeerStatus::Todo, entry.score);
    }

    for hop in 0..config.hops {
        let dispatch_start = Instant::now();
        let mut next = PeerList::new();
        let mut dispatch: Vec<(String, JoinHandle<WorkerOutcome>)> = Vec::new();

        for entry in peers.iter() {
            if entry.status != PeerStatus::Todo {
                let carried_status = if entry.status == PeerStatus::Me { PeerStatus::Done } else { entry.status };
                next.merge_one(entry.peer.clone(), carried_status, entry.score);
                continue;
            }

            let open_template = match entry.peer.open_template_or_synthesized() {
                Some(t) => t,
                None => {
                    next.merge_one(entry.peer.clone(), PeerStatus::Error, entry.score);
                    continue;
                }
            };

            let link = match PeerLink::new(open_template) {
                Ok(link) => link,
                Err(e) => {
                    warn!(pid = %entry.peer.pid, error = %e, "invalid peer template");
                    next.merge_one(entry.peer.clone(), PeerStatus::Error, entry.score);
                    continue;
                }
            };

            let altered = strip_query_hints(query, &entry.peer.query_hints);
            let pid = entry.peer.pid.clone();
            let client = client.clone();
            let permit = Arc::clone(outbound_limit);

            dispatch.push((
                pid.clone(),
                tokio::spawn(async move {
                    let _permit = permit.acquire_owned().await.ok();
                    WorkerOutcome { pid, result: link.search(&client, &altered).await }
                }),
            ));
        }

        let deadline = dispatch_start + config.per_hop_budget;
        for (pid, handle) in dispatch {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let entry = peers.find(&pid).cloned();
            let Some(entry) = entry else { continue };

            match tokio::time::timeout(remaining, handle).await {
                Ok(Ok(WorkerOutcome { pid, result: Ok(outcome) })) => {
                    if outcome.snippets.is_empty() {
                        next.merge_one(entry.peer, PeerStatus::Empty, Some(0.1));
                    } else {
                        let mut returned = outcome.snippets;
                        crate::scraper::tag_origin(&mut returned, &pid, PeerStatus::Done, entry.score.unwrap_or(1.0));
                        snippets.merge(returned);
                        next.merge(outcome.peers);
                        next.merge_one(entry.peer, PeerStatus::Done, entry.score);
                    }
                }
                Ok(Ok(WorkerOutcome { result: Err(e), .. })) => {
                    let status = if e.is_timeout() { PeerStatus::Timeout } else { PeerStatus::Error };
                    next.merge_one(entry.peer, status, entry.score);
                }
                Ok(Err(join_err)) => {
                    warn!(pid = %pid, error = %join_err, "peer worker panicked");
                    next.merge_one(entry.peer, PeerStatus::Error, entry.score);
                }
                Err(_elapsed) => {
                    // Past the per-hop budget: detach, don't abort (§4.5A).
                    next.merge_one(entry.peer, PeerStatus::Timeout, entry.score);
                }
            }
        }

        for entry in known_peers.iter() {
            next.merge_one(entry.peer.clone(), PeerStatus::Todo, entry.score);
        }

        peers = next;
        tracing::debug!(hop, peers = peers.len(), snippets = snippets.len(), "fanout hop complete");
    }

    cache.put(fingerprint, &peers, &snippets, None).await?;
    cache.put_backoff(fingerprint, &peers).await?;

    peers.merge_one(myself.clone(), PeerStatus::Me, Some(1.0));
    peers.put_myself_first(&myself.pid);

    Ok(FanOutOutcome { peers, snippets })
}

/// Removes every configured query hint from `q` (falling back to the
/// original text if stripping empties it) before forwarding to a peer (§4.5).
fn strip_query_hints(query: &Query, hints: &[String]) -> Query {
    let mut altered = query.clone();
    if hints.is_empty() {
        return altered;
    }
    if let Some(raw) = query.get("q") {
        let mut stripped = raw.to_string();
        for hint in hints {
            stripped = stripped.replace(hint.as_str(), "");
        }
        let stripped = stripped.split_whitespace().collect::<Vec<_>>().join(" ");
        if !stripped.trim().is_empty() {
            altered.set("q", stripped);
        }
    }
    altered
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strip_query_hints_falls_back_to_original_when_emptied() {
        let q = Query::new().with("q", "video");
        let altered = strip_query_hints(&q, &["video".to_string()]);
        assert_eq!(altered.get("q"), Some("video"));
    }

    #[test]
    fn strip_query_hints_removes_matched_terms() {
        let q = Query::new().with("q", "video cats");
        let altered = strip_query_hints(&q, &["video".to_string()]);
        assert_eq!(altered.get("q"), Some("cats"));
    }
}
