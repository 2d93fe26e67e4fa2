//! Startup preflight checklist (§2A). Run non-interactively at every startup and, in full,
//! via `--doctor`.

use std::fmt;
use std::net::TcpListener;

use serde::{Deserialize, Serialize};

use crate::config::NodeConfig;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckStatus {
    Pass,
    Warn,
    Fail,
}

impl CheckStatus {
    pub fn is_fail(self) -> bool {
        matches!(self, CheckStatus::Fail)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PreflightCheck {
    pub id: String,
    pub title: String,
    pub status: CheckStatus,
    pub details: String,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PreflightReport {
    pub checks: Vec<PreflightCheck>,
}

impl PreflightReport {
    pub fn has_failures(&self) -> bool {
        self.checks.iter().any(|c| c.status.is_fail())
    }

    pub fn summarize_for_logs(&self) -> String {
        let mut pass = 0;
        let mut warn_count = 0;
        let mut fail = 0;
        for c in &self.checks {
            match c.status {
                CheckStatus::Pass => pass += 1,
                CheckStatus::Warn => warn_count += 1,
                CheckStatus::Fail => fail += 1,
            }
        }
        format!("preflight: {pass} pass, {warn_count} warn, {fail} fail")
    }
}

impl fmt::Display for PreflightReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Snipdex Pre-flight Checklist")?;
        writeln!(f, "{}", "=".repeat(28))?;
        for c in &self.checks {
            writeln!(
                f,
                "[{:<4}] {}\n  {}",
                match c.status {
                    CheckStatus::Pass => "OK",
                    CheckStatus::Warn => "WARN",
                    CheckStatus::Fail => "FAIL",
                },
                c.title,
                c.details
            )?;
        }
        Ok(())
    }
}

/// Runs every check against `cfg`. Never fails the process itself — only
/// `FatalBootstrap` at registration time does that (§7); a `Fail` here is
/// logged loudly by the caller.
pub async fn check_all(cfg: &NodeConfig) -> PreflightReport {
    let mut checks = Vec::new();
    checks.push(check_port_free(cfg.port));
    checks.push(check_cache_writable(&cfg.cache_path).await);
    checks.push(check_web_root(&cfg.web_root));
    checks.push(check_mother_resolvable(cfg));
    PreflightReport { checks }
}

fn check_port_free(port: u16) -> PreflightCheck {
    match TcpListener::bind(("0.0.0.0", port)) {
        Ok(_) => PreflightCheck {
            id: "port_free".into(),
            title: format!("Port {port} is free"),
            status: CheckStatus::Pass,
            details: format!("Port {port} can be bound."),
        },
        Err(e) => PreflightCheck {
            id: "port_free".into(),
            title: format!("Port {port} is in use"),
            status: CheckStatus::Fail,
            details: format!("Bind to 0.0.0.0:{port} failed: {e}"),
        },
    }
}

async fn check_cache_writable(path: &std::path::Path) -> PreflightCheck {
    let dir = path.parent().unwrap_or_else(|| std::path::Path::new("."));
    match tokio::fs::create_dir_all(dir).await {
        Ok(()) => PreflightCheck {
            id: "cache_writable".into(),
            title: "Cache directory is writable".into(),
            status: CheckStatus::Pass,
            details: format!("{} is writable.", dir.display()),
        },
        Err(e) => PreflightCheck {
            id: "cache_writable".into(),
            title: "Cache directory is not writable".into(),
            status: CheckStatus::Fail,
            details: format!("Could not create {}: {e}", dir.display()),
        },
    }
}

fn check_web_root(web_root: &std::path::Path) -> PreflightCheck {
    if web_root.is_dir() {
        PreflightCheck {
            id: "web_root".into(),
            title: "Web root exists".into(),
            status: CheckStatus::Pass,
            details: format!("{} found.", web_root.display()),
        }
    } else {
        PreflightCheck {
            id: "web_root".into(),
            title: "Web root missing".into(),
            status: CheckStatus::Warn,
            details: format!("{} not found; static asset routes will 404.", web_root.display()),
        }
    }
}

fn check_mother_resolvable(cfg: &NodeConfig) -> PreflightCheck {
    if cfg.is_standalone() {
        return PreflightCheck {
            id: "mother_resolvable".into(),
            title: "Running in stand-alone mode".into(),
            status: CheckStatus::Pass,
            details: "Mother peer equals this node's own address; registration skipped.".into(),
        };
    }
    use std::net::ToSocketAddrs;
    let resolves = match (cfg.mother_host.as_str(), cfg.mother_port).to_socket_addrs() {
        Ok(mut addrs) => addrs.next().is_some(),
        Err(_) => false,
    };
    if resolves {
        PreflightCheck {
            id: "mother_resolvable".into(),
            title: "Mother peer host resolves".into(),
            status: CheckStatus::Pass,
            details: format!("{}:{} resolves.", cfg.mother_host, cfg.mother_port),
        }
    } else {
        PreflightCheck {
            id: "mother_resolvable".into(),
            title: "Mother peer host does not resolve".into(),
            status: CheckStatus::Fail,
            details: format!(
                "{}:{} could not be resolved; registration will fail unless a cached response exists.",
                cfg.mother_host, cfg.mother_port
            ),
        }
    }
}
