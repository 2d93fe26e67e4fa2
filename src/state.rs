//! Shared application state threaded through every axum handler (§5A):
//! a single shared `http_client`, a `tokio::sync::Semaphore` outbound
//! limit, and `Arc`-wrapped long-lived services.

use std::sync::Arc;

use reqwest::Client;
use tokio::sync::{RwLock, Semaphore};

use crate::cache::Cache;
use crate::config::NodeConfig;
use crate::fanout::FanOutConfig;
use crate::peer::{Peer, PeerStatus};
use crate::peer_list::PeerList;
use crate::registration::{Branding, SelfAddress};

pub struct AppState {
    pub config: Arc<NodeConfig>,
    pub cache: Arc<Cache>,
    pub http_client: Client,
    pub outbound_limit: Arc<Semaphore>,
    pub fan_out_config: FanOutConfig,
    pub address: RwLock<SelfAddress>,
    pub mother_peer: RwLock<Option<Peer>>,
    pub fallback_peers: RwLock<PeerList>,
    pub branding: RwLock<Branding>,
}

impl AppState {
    pub fn new(config: Arc<NodeConfig>, cache: Arc<Cache>, http_client: Client) -> Self {
        let outbound_limit = Arc::new(Semaphore::new(config.outbound_limit));
        let fan_out_config = FanOutConfig {
            hops: config.fan_out_hops,
            per_hop_budget: std::time::Duration::from_secs(config.per_hop_budget_secs),
        };
        AppState {
            config,
            cache,
            http_client,
            outbound_limit,
            fan_out_config,
            address: RwLock::new(SelfAddress::default()),
            mother_peer: RwLock::new(None),
            fallback_peers: RwLock::new(PeerList::new()),
            branding: RwLock::new(Branding::default()),
        }
    }

    /// Builds this node's own `Peer` descriptor, as prepended to every
    /// rendered peer list with status `ME` (§4.5, `put_myself_first`).
    pub async fn myself(&self) -> Peer {
        let address = self.address.read().await;
        let public_address = address.public_address();
        let local_address = if address.local_ip != address.public_ip {
            Some(format!("{}:{}", address.local_ip, address.local_port))
        } else {
            None
        };

        Peer {
            pid: self.cache.my_pid().await,
            name: None,
            description: None,
            icon: None,
            language: None,
            adult_content: false,
            hashtag: None,
            query_hints: Vec::new(),
            updated: Some(chrono::Utc::now()),
            open_template: None,
            html_template: None,
            suggest_template: None,
            public_address: Some(public_address),
            local_address,
        }
    }

    /// The mother peer plus cached fallback peers, seeded as `TODO` for a
    /// fresh FanOut dispatch (§4.5).
    pub async fn known_peers(&self) -> PeerList {
        let mut list = PeerList::new();
        if let Some(mother) = self.mother_peer.read().await.clone() {
            list.merge_one(mother, PeerStatus::Todo, Some(1.0));
        }
        list.merge(self.fallback_peers.read().await.clone());
        list
    }
}
