use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use snipdex::peer::Peer;
use snipdex::state::AppState;
use snipdex::{config, preflight, receiver, registration};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli_args: Vec<String> = std::env::args().skip(1).collect();
    let cfg = config::load(&cli_args);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(cfg.log_filter.clone()));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    if cli_args.iter().any(|a| a == "--doctor") {
        let report = preflight::check_all(&cfg).await;
        println!("{report}");
        std::process::exit(if report.has_failures() { 2 } else { 0 });
    }

    info!("Starting Snipdex node");

    let report = preflight::check_all(&cfg).await;
    info!("{}", report.summarize_for_logs());
    if report.has_failures() {
        warn!("startup checklist found failures; run with --doctor for the full report");
    }

    let http_client = reqwest::Client::builder()
        .timeout(Duration::from_secs(cfg.socket_timeout_secs))
        .build()?;

    let cache = snipdex::cache::Cache::open_or_create(&cfg.cache_path).await?;
    let cfg = Arc::new(cfg);
    let state = Arc::new(AppState::new(cfg.clone(), Arc::new(cache), http_client));

    if cfg.is_standalone() {
        info!("no distinct mother peer configured, running stand-alone");
        let address = registration::standalone_address(cfg.port);
        *state.address.write().await = address;
    } else {
        let mother_peer = Peer {
            pid: "mother".to_string(),
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
            public_address: Some(format!("{}:{}", cfg.mother_host, cfg.mother_port)),
            local_address: None,
        };

        match registration::register(&state.http_client, &state.cache, &mother_peer, cfg.port).await {
            Ok(outcome) => {
                info!(public = %outcome.address.public_address(), "registered with mother peer");
                *state.mother_peer.write().await = Some(outcome.mother_peer);
                *state.fallback_peers.write().await = outcome.fallback_peers;
                *state.address.write().await = outcome.address;
                if let Some(branding) = outcome.branding {
                    *state.branding.write().await = branding;
                }
            }
            Err(e) => {
                error!(error = %e, "registration failed and no cached fallback exists");
                return Err(e.into());
            }
        }
    }

    let bind_addr = format!("0.0.0.0:{}", cfg.port);
    let listener = match tokio::net::TcpListener::bind(&bind_addr).await {
        Ok(l) => l,
        Err(e) if e.kind() == std::io::ErrorKind::AddrInUse => {
            anyhow::bail!("address already in use: {bind_addr}. Stop the existing process or pass --port.")
        }
        Err(e) => return Err(e.into()),
    };
    info!("Snipdex node listening on http://{bind_addr}");

    let app = receiver::build_router(state).into_make_service_with_connect_info::<SocketAddr>();
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate()).ok();
        let mut sigint = signal(SignalKind::interrupt()).ok();

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {},
            _ = async {
                if let Some(ref mut s) = sigterm {
                    s.recv().await;
                } else {
                    futures::future::pending::<()>().await;
                }
            } => {},
            _ = async {
                if let Some(ref mut s) = sigint {
                    s.recv().await;
                } else {
                    futures::future::pending::<()>().await;
                }
            } => {},
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }

    info!("shutting down");
}
