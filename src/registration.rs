//! Mother-peer bootstrap: `SNIPDEX_QUERY_REGISTER` handshake, NAT discovery
//! fallback, branding override, and the mother-side `SNIPDEX_QUERY_PONG`
//! responder (§4.6, §4.6A).

use std::net::UdpSocket;

use reqwest::Client;
use tracing::{debug, warn};

use crate::cache::Cache;
use crate::error::SnipdexError;
use crate::peer::{Peer, PeerStatus};
use crate::peer_list::PeerList;
use crate::query::{Query, QUERY_PONG, QUERY_REGISTER};
use crate::scraper::PeerLink;
use crate::snippet_list::SnippetList;

/// Host consulted when no mother peer is configured or reachable, purely to
/// make the kernel pick a route and assign a local address (§4.6).
const NAT_PROBE_HOST: &str = "1.1.1.1:80";

/// Search-engine identity a node may inherit from its mother's first
/// returned snippet, overriding the UI defaults (§4.6).
#[derive(Debug, Clone)]
pub struct Branding {
    pub trademark: String,
    pub motto: String,
    pub logo: String,
    pub button: String,
}

impl Default for Branding {
    fn default() -> Self {
        Branding {
            trademark: "Snipdex".to_string(),
            motto: "Search the Web Together".to_string(),
            logo: "snipdex_logo.png".to_string(),
            button: "Search".to_string(),
        }
    }
}

/// Addresses this node has discovered or been told about itself (§4.6).
#[derive(Debug, Clone, Default)]
pub struct SelfAddress {
    pub public_ip: String,
    pub public_port: u16,
    pub local_ip: String,
    pub local_port: u16,
}

impl SelfAddress {
    pub fn public_address(&self) -> String {
        format!("{}:{}", self.public_ip, self.public_port)
    }
}

pub struct RegistrationOutcome {
    pub mother_peer: Peer,
    pub fallback_peers: PeerList,
    pub address: SelfAddress,
    pub branding: Option<Branding>,
}

/// Registers at `mother`, falling back to the cached registration response
/// on network failure and to UDP-connect-without-send for address discovery
/// when neither succeeds (§4.6). Stand-alone mode (no distinct mother
/// configured) is handled by the caller via [`standalone_address`] instead of
/// going through this function at all.
pub async fn register(
    client: &Client,
    cache: &Cache,
    mother: &Peer,
    my_local_port: u16,
) -> Result<RegistrationOutcome, SnipdexError> {
    let open_template = mother.open_template_or_synthesized().ok_or_else(|| {
        SnipdexError::InvalidTemplate("mother peer has no reachable template".into())
    })?;
    let link = PeerLink::new(open_template)?;
    let query = Query::new().with("q", QUERY_REGISTER);

    match link.search(client, &query).await {
        Ok(outcome) => {
            let address = address_from_query(&outcome.query)
                .ok_or_else(|| SnipdexError::FatalBootstrap("public ip number cannot be determined".into()))?;
            debug!(public = %address.public_address(), "registered at mother peer");

            let (mother_peer, fallback_peers) = split_mother_and_fallback(&outcome.peers, mother)?;
            let branding = outcome.snippets.iter().next().map(branding_from_snippet);

            if !outcome.snippets.is_empty() {
                cache.put(QUERY_REGISTER, &outcome.peers, &outcome.snippets, None).await?;
            }

            Ok(RegistrationOutcome { mother_peer, fallback_peers, address, branding })
        }
        Err(e) => {
            warn!(error = %e, "connection to mother peer failed, falling back to cached registration");
            let (peers, snippets) = cache.get(QUERY_REGISTER).await;
            let Some(first) = peers.iter().next() else {
                return Err(SnipdexError::FatalBootstrap("connection to mother peer failed".into()));
            };
            let mother_peer = first.peer.clone();
            let mut fallback_peers = PeerList::new();
            for entry in peers.iter().skip(1) {
                fallback_peers.append(entry.peer.clone(), entry.status, entry.score);
            }
            let address = address_without_register(my_local_port);
            let branding = snippets.iter().next().map(branding_from_snippet);
            Ok(RegistrationOutcome { mother_peer, fallback_peers, address, branding })
        }
    }
}

/// Stand-alone mode: no mother configured, or mother equals this node's own
/// address. Determines the node's address without contacting anyone (§4.6).
pub fn standalone_address(my_local_port: u16) -> SelfAddress {
    address_without_register(my_local_port)
}

fn address_from_query(q: &Query) -> Option<SelfAddress> {
    let public_ip = q.get("public_ip")?.to_string();
    let public_port: u16 = q.get("public_port").and_then(|p| p.parse().ok()).unwrap_or(0);
    let local_ip = q.get("local_ip").unwrap_or(&public_ip).to_string();
    let local_port: u16 = q.get("local_port").and_then(|p| p.parse().ok()).unwrap_or(public_port);
    Some(SelfAddress { public_ip, public_port, local_ip, local_port })
}

/// Opens a UDP socket connected (without sending) to a well-known host, then
/// reads back the kernel-assigned local address (§4.6). Assumes no NAT:
/// public == local.
fn address_without_register(my_local_port: u16) -> SelfAddress {
    match discover_local_ip() {
        Ok(local_ip) => SelfAddress {
            public_ip: local_ip.clone(),
            public_port: my_local_port,
            local_ip,
            local_port: my_local_port,
        },
        Err(e) => {
            warn!(error = %e, "could not determine local address via UDP probe, defaulting to loopback");
            SelfAddress {
                public_ip: "127.0.0.1".into(),
                public_port: my_local_port,
                local_ip: "127.0.0.1".into(),
                local_port: my_local_port,
            }
        }
    }
}

fn discover_local_ip() -> std::io::Result<String> {
    let socket = UdpSocket::bind("0.0.0.0:0")?;
    socket.connect(NAT_PROBE_HOST)?;
    Ok(socket.local_addr()?.ip().to_string())
}

/// Splits the mother's response peer list into its own `ME` entry (validated
/// against the address we dialed) and the rest, used as fallback peers on a
/// cold cache (§4.6).
fn split_mother_and_fallback(peers: &PeerList, dialed: &Peer) -> Result<(Peer, PeerList), SnipdexError> {
    let first = peers
        .iter()
        .next()
        .ok_or_else(|| SnipdexError::FatalBootstrap("no information for mother peer".into()))?;

    let dialed_address = dialed.public_address.as_deref();
    let is_self_consistent = first.status == PeerStatus::Me
        && (first.peer.public_address.as_deref() == dialed_address
            || first.peer.local_address.as_deref() == dialed_address);

    if !is_self_consistent {
        return Err(SnipdexError::FatalBootstrap("no pid for mother peer".into()));
    }

    let mut fallback = PeerList::new();
    for entry in peers.iter().skip(1) {
        fallback.append(entry.peer.clone(), entry.status, entry.score);
    }
    Ok((first.peer.clone(), fallback))
}

/// The mother's first returned snippet overrides the UI's trademark, motto,
/// logo, and button text, per `store_search_engine_details` (§4.6).
fn branding_from_snippet(snippet: &crate::snippet::Snippet) -> Branding {
    let mut branding = Branding::default();
    if let Some(title) = &snippet.title {
        branding.trademark = title.clone();
    }
    if let Some(summary) = &snippet.summary {
        branding.motto = summary.clone();
    }
    if let Some(preview) = &snippet.preview {
        branding.logo = preview.url.clone();
    }
    for (key, value) in &snippet.attributes {
        if key == "Button" {
            branding.button = value.clone();
        }
    }
    branding
}

/// Mother-side responder for an inbound `q=SNIPDEX_QUERY_PONG` (§4.6A).
///
/// A PONG carries no pid of its own — the only thing to trust is the socket
/// the request arrived on, checked against this node's own configured
/// `mother`. A probe from any other address is not vouched for, so it gets
/// an empty response and a log line instead of a page of the network.
pub async fn answer_pong(cache: &Cache, mother: Option<&Peer>, requester_public_ip: &str, page: u32) -> (PeerList, SnippetList) {
    let mother_ip = mother
        .and_then(|p| p.public_address.as_deref())
        .and_then(|a| a.split(':').next());

    match mother_ip {
        Some(ip) if ip == requester_public_ip => {
            debug!(pid = %mother.expect("mother_ip implies mother is Some").pid, "contacted by mother for liveness check");
            (cache.all_peers_by_page(page).await, SnippetList::new())
        }
        _ => {
            warn!(observed = requester_public_ip, "PONG from non-mother address, ignoring");
            (PeerList::new(), SnippetList::new())
        }
    }
}

pub fn is_pong_query(query: &Query) -> bool {
    query.is_pong()
}
