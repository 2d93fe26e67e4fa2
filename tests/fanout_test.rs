//! Integration tests exercising FanOut and registration against stub peer
//! servers — the concrete scenarios A-F, booting real network listeners
//! rather than mocking at the client layer.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::http::header;
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::{Mutex, Semaphore};

use snipdex::cache::Cache;
use snipdex::fanout::{self, FanOutConfig};
use snipdex::peer::{Peer, PeerStatus, Template};
use snipdex::peer_list::PeerList;
use snipdex::query::Query;
use snipdex::registration;

const RSS_MIME: &str = "application/rss+xml";
const SNIPDEX_MIME: &str = "application/snipdex+xml";

async fn spawn_stub(body: String, content_type: &'static str) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = Router::new().fallback(move || {
        let body = body.clone();
        async move { ([(header::CONTENT_TYPE, content_type)], body) }
    });
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

/// Binds first so the served body can embed the stub's own address, for a
/// peer whose response needs to describe itself (scenario E's mother).
async fn spawn_self_describing_stub(
    content_type: &'static str,
    body_fn: impl FnOnce(SocketAddr) -> String,
) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let body = body_fn(addr);
    let app = Router::new().fallback(move || {
        let body = body.clone();
        async move { ([(header::CONTENT_TYPE, content_type)], body) }
    });
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

/// Records the query string of the last request it received, for scenario F.
async fn spawn_recording_stub(body: String, content_type: &'static str) -> (SocketAddr, Arc<Mutex<Option<String>>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let captured = Arc::new(Mutex::new(None));
    let captured_for_handler = captured.clone();
    let app = Router::new().fallback(move |uri: axum::http::Uri| {
        let body = body.clone();
        let captured = captured_for_handler.clone();
        async move {
            *captured.lock().await = Some(uri.query().unwrap_or("").to_string());
            ([(header::CONTENT_TYPE, content_type)], body)
        }
    });
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, captured)
}

/// Accepts and leaks connections without ever writing a response, standing in
/// for scenario C's unresponsive peer.
async fn spawn_sink() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            if let Ok((socket, _)) = listener.accept().await {
                std::mem::forget(socket);
            }
        }
    });
    addr
}

fn rss_peer(pid: &str, addr: SocketAddr) -> Peer {
    let mut peer = Peer::zombie(
        pid,
        Template { url: format!("http://{addr}/feed?q={{q}}"), mimetype: RSS_MIME.into(), ..Default::default() },
    );
    peer.pid = pid.to_string();
    peer
}

fn rss_body(location: &str, title: &str) -> String {
    format!(r#"<rss><channel><item><title>{title}</title><link>{location}</link><description>summary</description></item></channel></rss>"#)
}

fn myself() -> Peer {
    Peer {
        pid: "self".into(),
        name: None,
        description: None,
        icon: None,
        language: None,
        adult_content: false,
        hashtag: None,
        query_hints: Vec::new(),
        updated: None,
        open_template: None,
        html_template: None,
        suggest_template: None,
        public_address: Some("127.0.0.1:8472".into()),
        local_address: None,
    }
}

async fn fresh_cache() -> (tempfile::TempDir, Cache) {
    let dir = tempfile::tempdir().unwrap();
    let cache = Cache::open_or_create(dir.path().join("cache.json")).await.unwrap();
    (dir, cache)
}

#[tokio::test]
async fn scenario_a_single_peer_returns_self_and_peer_snippet() {
    let addr = spawn_stub(rss_body("http://example.com/a", "Hello"), RSS_MIME).await;
    let (_dir, cache) = fresh_cache().await;
    let semaphore = Arc::new(Semaphore::new(8));

    let mut known = PeerList::new();
    known.append(rss_peer("p1", addr), PeerStatus::Todo, None);

    let me = myself();
    let query = Query::new().with("q", "hello");
    let outcome = fanout::run(
        &reqwest::Client::new(),
        &cache,
        &semaphore,
        &me,
        &known,
        &query,
        "hello",
        &FanOutConfig::default(),
    )
    .await
    .unwrap();

    assert_eq!(outcome.peers.iter().next().unwrap().peer.pid, "self");
    assert_eq!(outcome.peers.find("self").unwrap().status, PeerStatus::Me);
    assert_eq!(outcome.peers.find("p1").unwrap().status, PeerStatus::Done);
    assert_eq!(outcome.snippets.len(), 1);
    assert_eq!(outcome.snippets.iter().next().unwrap().origins[0].pid, "p1");
}

#[tokio::test]
async fn scenario_b_duplicate_locations_merge_into_one_snippet_with_two_origins() {
    let addr1 = spawn_stub(rss_body("http://www.example.com/a", "Hello"), RSS_MIME).await;
    let addr2 = spawn_stub(rss_body("http://example.com/a", "Hello Again"), RSS_MIME).await;
    let (_dir, cache) = fresh_cache().await;
    let semaphore = Arc::new(Semaphore::new(8));

    let mut known = PeerList::new();
    known.append(rss_peer("p1", addr1), PeerStatus::Todo, None);
    known.append(rss_peer("p2", addr2), PeerStatus::Todo, None);

    let me = myself();
    let query = Query::new().with("q", "hello");
    let outcome = fanout::run(
        &reqwest::Client::new(),
        &cache,
        &semaphore,
        &me,
        &known,
        &query,
        "hello",
        &FanOutConfig::default(),
    )
    .await
    .unwrap();

    assert_eq!(outcome.snippets.len(), 1);
    assert_eq!(outcome.snippets.iter().next().unwrap().origins.len(), 2);
}

#[tokio::test]
async fn scenario_c_unresponsive_peer_is_marked_timeout_within_budget() {
    let addr = spawn_sink().await;
    let (_dir, cache) = fresh_cache().await;
    let semaphore = Arc::new(Semaphore::new(8));

    let mut known = PeerList::new();
    known.append(rss_peer("p2", addr), PeerStatus::Todo, None);

    let me = myself();
    let query = Query::new().with("q", "hello");
    let config = FanOutConfig { hops: 1, per_hop_budget: Duration::from_millis(500) };

    let start = Instant::now();
    let outcome = fanout::run(&reqwest::Client::new(), &cache, &semaphore, &me, &known, &query, "hello", &config)
        .await
        .unwrap();
    let elapsed = start.elapsed();

    assert_eq!(outcome.peers.find("p2").unwrap().status, PeerStatus::Timeout);
    assert!(elapsed < Duration::from_secs(3), "fanout took {elapsed:?}, should respect its per-hop budget");
}

#[tokio::test]
async fn scenario_d_put_backoff_then_get_approx_returns_union_of_terms() {
    let (_dir, cache) = fresh_cache().await;

    let mut peers = PeerList::new();
    let mut peer = Peer::zombie(
        "p1",
        Template { url: "http://p1.example/feed?q={q}".into(), mimetype: RSS_MIME.into(), ..Default::default() },
    );
    peer.pid = "p1".into();
    peers.append(peer, PeerStatus::Done, Some(1.0));

    cache.put_backoff("foo+bar+baz", &peers).await.unwrap();

    for fingerprint in ["foo", "foo+bar", "bar", "bar+baz", "baz"] {
        let (found, _) = cache.get_approx(fingerprint).await;
        assert!(found.find("p1").is_some(), "expected p1 under fingerprint {fingerprint}");
    }

    let (union, _) = cache.get_approx("foo+bar+baz").await;
    assert!(union.find("p1").is_some());
    assert_eq!(union.find("p1").unwrap().status, PeerStatus::Todo);
}

#[tokio::test]
async fn scenario_e_registration_reports_mother_assigned_public_address() {
    let addr = spawn_self_describing_stub(SNIPDEX_MIME, |addr| {
        format!(
            r#"<snipdex_response version="0.2">
              <query q="SNIPDEX_QUERY_REGISTER" public_ip="1.2.3.4" public_port="9999" local_ip="10.0.0.5" local_port="9999" />
              <peers>
                <peer pid="mother-pid" status="ME"><public_address>{addr}</public_address></peer>
                <peer pid="fallback-1" status="TODO"><public_address>127.0.0.1:1</public_address></peer>
              </peers>
              <snippets>
                <snippet>
                  <origin pid="mother-pid"/>
                  <title>ExampleSearch</title>
                  <summary>Find it fast</summary>
                  <attributes><attribute key="Button" value="Go"/></attributes>
                </snippet>
              </snippets>
            </snipdex_response>"#
        )
    })
    .await;
    let (_dir, cache) = fresh_cache().await;

    let mother = Peer { public_address: Some(addr.to_string()), ..myself() };
    let outcome = registration::register(&reqwest::Client::new(), &cache, &mother, 8472).await.unwrap();

    assert_eq!(outcome.address.public_ip, "1.2.3.4");
    assert_eq!(outcome.address.public_port, 9999);
    assert_eq!(outcome.mother_peer.pid, "mother-pid");
    assert_eq!(outcome.fallback_peers.len(), 1);
    let branding = outcome.branding.expect("mother's snippet carries branding");
    assert_eq!(branding.trademark, "ExampleSearch");
    assert_eq!(branding.button, "Go");
}

#[tokio::test]
async fn scenario_f_query_hint_is_stripped_only_for_the_peer_that_declares_it() {
    let (addr, captured) = spawn_recording_stub(rss_body("http://example.com/v", "Video"), RSS_MIME).await;
    let (_dir, cache) = fresh_cache().await;
    let semaphore = Arc::new(Semaphore::new(8));

    let mut p3 = rss_peer("p3", addr);
    p3.query_hints = vec!["#videos".to_string()];

    let mut known = PeerList::new();
    known.append(p3, PeerStatus::Todo, None);

    let me = myself();
    let query = Query::new().with("q", "#videos cats");
    fanout::run(&reqwest::Client::new(), &cache, &semaphore, &me, &known, &query, "videos+cats", &FanOutConfig::default())
        .await
        .unwrap();

    let seen = captured.lock().await.clone().unwrap_or_default();
    assert!(seen.contains("q=cats"), "expected stripped query in {seen:?}");
}
