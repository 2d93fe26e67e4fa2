//! HTTP surface: the `/snipdex/` search endpoint, static asset serving, and
//! the small JSON/XML side channels a sibling node or a browser relies on
//! (§6, §6A). Named `receiver` rather than `http`, which would shadow
//! `axum::http`.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, Path as AxumPath, Query as AxumQuery, State};
use axum::http::{header, StatusCode};
use axum::response::{Html, IntoResponse, Json, Redirect, Response};
use axum::routing::get;
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::fanout;
use crate::peer::{PeerStatus, MIME_SNIPDEX_XML};
use crate::peer_list::PeerList;
use crate::query::Query;
use crate::registration;
use crate::scraper;
use crate::snippet_list::SnippetList;
use crate::html_render;
use crate::state::AppState;

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(|| async { Redirect::permanent("/snipdex/") }))
        .route("/snipdex", get(|| async { Redirect::permanent("/snipdex/") }))
        .route("/snipdex/", get(snipdex_root).post(reserved))
        .route("/snipdex/peers", get(peers_handler))
        .route("/snipdex/branding.json", get(branding_handler))
        .route("/snipdex/:file", get(static_handler))
        .route("/health", get(health_handler))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// The one endpoint that does everything: serves the index page when `q` is
/// absent, answers a mother-liveness PONG, or runs a search — live FanOut
/// from loopback, cache-only otherwise (§4.5, §4.6A, §6).
async fn snipdex_root(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    AxumQuery(params): AxumQuery<HashMap<String, String>>,
) -> Response {
    let mut query = Query::new();
    for key in ["q", "h", "p", "l", "f", "v"] {
        if let Some(v) = params.get(key) {
            query.set(key, v.clone());
        }
    }
    let client_ip = addr.ip().to_string();
    query.set("public_ip", client_ip.clone());
    query.set("public_port", addr.port().to_string());

    let query_text = query.get("q").unwrap_or("");
    if query_text.is_empty() {
        let branding = state.branding.read().await.clone();
        return Html(html_render::render(&query, &PeerList::new(), &SnippetList::new(), &branding)).into_response();
    }

    if registration::is_pong_query(&query) {
        let page = query.get("p").and_then(|p| p.parse().ok()).unwrap_or(1);
        let mother = state.mother_peer.read().await.clone();
        let (peers, snippets) = registration::answer_pong(&state.cache, mother.as_ref(), &client_ip, page).await;
        return render_response(&state, &query, &peers, &snippets).await;
    }

    let fingerprint = query.normalize();
    let is_loopback = client_ip == "127.0.0.1" || client_ip == "::1";

    let (peers, snippets) = if is_loopback {
        search_live(&state, &query, &fingerprint).await
    } else {
        search_cache_only(&state, &fingerprint).await
    };

    render_response(&state, &query, &peers, &snippets).await
}

/// A request arriving from this node's own loopback interface — the local
/// user's browser, or its own CLI — runs the real fan-out (§4.5).
async fn search_live(state: &AppState, query: &Query, fingerprint: &str) -> (PeerList, SnippetList) {
    let myself = state.myself().await;
    let known = state.known_peers().await;

    match fanout::run(
        &state.http_client,
        &state.cache,
        &state.outbound_limit,
        &myself,
        &known,
        query,
        fingerprint,
        &state.fan_out_config,
    )
    .await
    {
        Ok(outcome) => (outcome.peers, outcome.snippets),
        Err(e) => {
            warn!(error = %e, "fanout failed");
            (PeerList::new(), SnippetList::new())
        }
    }
}

/// A request from any other address is a sibling node asking what this node
/// already knows — never triggers a fresh outbound round (§4.5, §6). Falls
/// back to the bootstrap fallback peers when the cache has nothing yet, so a
/// freshly-registered node is not a dead end for its own children.
async fn search_cache_only(state: &AppState, fingerprint: &str) -> (PeerList, SnippetList) {
    let (mut peers, snippets) = state.cache.get_approx(fingerprint).await;
    if let Err(e) = state.cache.put_backoff(fingerprint, &peers).await {
        warn!(error = %e, "cache back-off write failed");
    }
    if peers.is_empty() {
        peers.merge(state.fallback_peers.read().await.clone());
    }

    let myself = state.myself().await;
    peers.merge_one(myself.clone(), PeerStatus::Me, Some(1.0));
    peers.put_myself_first(&myself.pid);
    (peers, snippets)
}

async fn render_response(state: &AppState, query: &Query, peers: &PeerList, snippets: &SnippetList) -> Response {
    if query.get("f") == Some("xml") {
        let body = scraper::render_native(query, peers, snippets);
        ([(header::CONTENT_TYPE, MIME_SNIPDEX_XML)], body).into_response()
    } else {
        let branding = state.branding.read().await.clone();
        Html(html_render::render(query, peers, snippets, &branding)).into_response()
    }
}

async fn reserved() -> StatusCode {
    StatusCode::NOT_IMPLEMENTED
}

async fn peers_handler(
    State(state): State<Arc<AppState>>,
    AxumQuery(params): AxumQuery<HashMap<String, String>>,
) -> Json<serde_json::Value> {
    let page: u32 = params.get("page").and_then(|p| p.parse().ok()).unwrap_or(1);
    let peers = state.cache.all_peers_by_page(page).await;
    let entries: Vec<serde_json::Value> = peers
        .iter()
        .map(|entry| {
            serde_json::json!({
                "pid": entry.peer.pid,
                "name": entry.peer.name,
                "status": entry.status.as_wire_str(),
                "score": entry.score,
                "public_address": entry.peer.public_address,
            })
        })
        .collect();
    Json(serde_json::json!({ "page": page, "peers": entries }))
}

async fn branding_handler(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let branding = state.branding.read().await;
    Json(serde_json::json!({
        "trademark": branding.trademark,
        "motto": branding.motto,
        "logo": branding.logo,
        "button": branding.button,
    }))
}

async fn health_handler(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "snipdex",
        "version": env!("CARGO_PKG_VERSION"),
        "pid": state.cache.my_pid().await,
    }))
}

async fn static_handler(State(state): State<Arc<AppState>>, AxumPath(file): AxumPath<String>) -> Response {
    serve_static(&state, &file).await
}

async fn serve_static(state: &AppState, file: &str) -> Response {
    if file.is_empty() || file.contains("..") || file.contains('/') {
        return StatusCode::NOT_FOUND.into_response();
    }
    let path = state.config.web_root.join(file);
    match tokio::fs::read(&path).await {
        Ok(bytes) => ([(header::CONTENT_TYPE, mime_for(file))], bytes).into_response(),
        Err(_) => StatusCode::NOT_FOUND.into_response(),
    }
}

fn mime_for(file: &str) -> &'static str {
    match file.rsplit('.').next() {
        Some("html") => "text/html; charset=utf-8",
        Some("css") => "text/css",
        Some("js") => "application/javascript",
        Some("png") => "image/png",
        Some("svg") => "image/svg+xml",
        Some("ico") => "image/x-icon",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mime_for_known_extensions() {
        assert_eq!(mime_for("index.html"), "text/html; charset=utf-8");
        assert_eq!(mime_for("style.css"), "text/css");
        assert_eq!(mime_for("unknown.bin"), "application/octet-stream");
    }
}
