//! `NodeConfig`: file + env + CLI configuration loader (§2A, §3A), with a
//! fixed precedence chain (JSON file → environment variable → CLI flag →
//! built-in default, CLI winning).

use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WebExposure {
    Disabled,
    Private,
    Public,
}

impl Default for WebExposure {
    fn default() -> Self {
        WebExposure::Private
    }
}

impl WebExposure {
    fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "disabled" => Some(WebExposure::Disabled),
            "private" => Some(WebExposure::Private),
            "public" => Some(WebExposure::Public),
            _ => None,
        }
    }
}

/// Raw shape of an optional `snipdex.json` file — every field optional so a
/// partial file only overrides what it names (§2A).
#[derive(Debug, Default, Deserialize)]
struct NodeConfigFile {
    port: Option<u16>,
    mother_host: Option<String>,
    mother_port: Option<u16>,
    cache_path: Option<String>,
    web_root: Option<String>,
    debug: Option<bool>,
    web_exposure: Option<String>,
    log_filter: Option<String>,
    fan_out_hops: Option<u32>,
    per_hop_budget_secs: Option<u64>,
    socket_timeout_secs: Option<u64>,
    outbound_limit: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub port: u16,
    pub mother_host: String,
    pub mother_port: u16,
    pub cache_path: PathBuf,
    pub web_root: PathBuf,
    pub debug: bool,
    pub web_exposure: WebExposure,
    pub log_filter: String,
    pub fan_out_hops: u32,
    pub per_hop_budget_secs: u64,
    pub socket_timeout_secs: u64,
    pub outbound_limit: usize,
}

impl Default for NodeConfig {
    fn default() -> Self {
        NodeConfig {
            port: 8472,
            mother_host: "127.0.0.1".to_string(),
            mother_port: 8472,
            cache_path: PathBuf::from("./snipdex_cache.json"),
            web_root: PathBuf::from("./web"),
            debug: false,
            web_exposure: WebExposure::default(),
            log_filter: "info,tower_http=warn".to_string(),
            fan_out_hops: 3,
            per_hop_budget_secs: 4,
            socket_timeout_secs: 10,
            outbound_limit: 32,
        }
    }
}

impl NodeConfig {
    /// True when the configured mother is this node's own listening address
    /// — the "mother peer and peer are equal" stand-alone case.
    pub fn is_standalone(&self) -> bool {
        (self.mother_host == "127.0.0.1" || self.mother_host == "localhost") && self.mother_port == self.port
    }
}

/// Loads `NodeConfig` from `./snipdex.json` / `../snipdex.json` / the path
/// named by `SNIPDEX_CONFIG`, then overlays environment variables, then CLI
/// flags. Missing file or parse failure is non-fatal (§2A).
pub fn load(cli_args: &[String]) -> NodeConfig {
    let mut cfg = NodeConfig::default();
    let file = load_config_file();

    apply_file(&mut cfg, file);
    apply_env(&mut cfg);
    apply_cli(&mut cfg, cli_args);
    cfg
}

fn load_config_file() -> NodeConfigFile {
    let candidates: Vec<PathBuf> = if let Ok(explicit) = std::env::var("SNIPDEX_CONFIG") {
        vec![PathBuf::from(explicit)]
    } else {
        vec![PathBuf::from("./snipdex.json"), PathBuf::from("../snipdex.json")]
    };

    for path in candidates {
        if !path.exists() {
            continue;
        }
        match std::fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(parsed) => return parsed,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "failed to parse config file, using defaults");
                    return NodeConfigFile::default();
                }
            },
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to read config file, using defaults");
                return NodeConfigFile::default();
            }
        }
    }
    NodeConfigFile::default()
}

fn apply_file(cfg: &mut NodeConfig, file: NodeConfigFile) {
    if let Some(v) = file.port {
        cfg.port = v;
    }
    if let Some(v) = file.mother_host {
        cfg.mother_host = v;
    }
    if let Some(v) = file.mother_port {
        cfg.mother_port = v;
    }
    if let Some(v) = file.cache_path {
        cfg.cache_path = PathBuf::from(v);
    }
    if let Some(v) = file.web_root {
        cfg.web_root = PathBuf::from(v);
    }
    if let Some(v) = file.debug {
        cfg.debug = v;
    }
    if let Some(v) = file.web_exposure.as_deref().and_then(WebExposure::parse) {
        cfg.web_exposure = v;
    }
    if let Some(v) = file.log_filter {
        cfg.log_filter = v;
    }
    if let Some(v) = file.fan_out_hops {
        cfg.fan_out_hops = v;
    }
    if let Some(v) = file.per_hop_budget_secs {
        cfg.per_hop_budget_secs = v;
    }
    if let Some(v) = file.socket_timeout_secs {
        cfg.socket_timeout_secs = v;
    }
    if let Some(v) = file.outbound_limit {
        cfg.outbound_limit = v;
    }
}

fn env_var<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

fn apply_env(cfg: &mut NodeConfig) {
    if let Some(v) = env_var("SNIPDEX_PORT") {
        cfg.port = v;
    }
    if let Ok(v) = std::env::var("SNIPDEX_MOTHER_HOST") {
        cfg.mother_host = v;
    }
    if let Some(v) = env_var("SNIPDEX_MOTHER_PORT") {
        cfg.mother_port = v;
    }
    if let Ok(v) = std::env::var("SNIPDEX_CACHE_PATH") {
        cfg.cache_path = PathBuf::from(v);
    }
    if let Ok(v) = std::env::var("SNIPDEX_WEB_ROOT") {
        cfg.web_root = PathBuf::from(v);
    }
    if let Some(v) = env_var("SNIPDEX_DEBUG") {
        cfg.debug = v;
    }
    if let Some(v) = std::env::var("SNIPDEX_WEB_EXPOSURE").ok().as_deref().and_then(WebExposure::parse) {
        cfg.web_exposure = v;
    }
    if let Ok(v) = std::env::var("SNIPDEX_LOG_FILTER") {
        cfg.log_filter = v;
    }
    if let Some(v) = env_var("SNIPDEX_FAN_OUT_HOPS") {
        cfg.fan_out_hops = v;
    }
    if let Some(v) = env_var("SNIPDEX_PER_HOP_BUDGET_SECS") {
        cfg.per_hop_budget_secs = v;
    }
    if let Some(v) = env_var("SNIPDEX_SOCKET_TIMEOUT_SECS") {
        cfg.socket_timeout_secs = v;
    }
    if let Some(v) = env_var("SNIPDEX_OUTBOUND_LIMIT") {
        cfg.outbound_limit = v;
    }
}

/// CLI flags of the shape `--field value` or `--field=value`, highest
/// precedence (§3A). Unknown flags are ignored here; `main` handles
/// `--doctor`/`--setup` separately.
fn apply_cli(cfg: &mut NodeConfig, args: &[String]) {
    let mut it = args.iter().peekable();
    while let Some(arg) = it.next() {
        let (flag, inline_value) = match arg.split_once('=') {
            Some((f, v)) => (f, Some(v.to_string())),
            None => (arg.as_str(), None),
        };
        let mut value = || inline_value.clone().or_else(|| it.peek().map(|s| s.to_string()));
        let consume = |it: &mut std::iter::Peekable<std::slice::Iter<String>>| {
            if inline_value.is_none() {
                it.next();
            }
        };

        match flag {
            "--port" => {
                if let Some(v) = value().and_then(|v| v.parse().ok()) {
                    cfg.port = v;
                }
                consume(&mut it);
            }
            "--mother-host" => {
                if let Some(v) = value() {
                    cfg.mother_host = v;
                }
                consume(&mut it);
            }
            "--mother-port" => {
                if let Some(v) = value().and_then(|v| v.parse().ok()) {
                    cfg.mother_port = v;
                }
                consume(&mut it);
            }
            "--cache-path" => {
                if let Some(v) = value() {
                    cfg.cache_path = PathBuf::from(v);
                }
                consume(&mut it);
            }
            "--web-root" => {
                if let Some(v) = value() {
                    cfg.web_root = PathBuf::from(v);
                }
                consume(&mut it);
            }
            "--debug" => cfg.debug = true,
            "--web-exposure" => {
                if let Some(v) = value().as_deref().and_then(WebExposure::parse) {
                    cfg.web_exposure = v;
                }
                consume(&mut it);
            }
            _ => {}
        }
    }
}

pub fn resolve_web_root(root: &Path) -> PathBuf {
    if root.is_absolute() {
        root.to_path_buf()
    } else {
        std::env::current_dir().unwrap_or_default().join(root)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_flags_override_defaults() {
        let mut cfg = NodeConfig::default();
        apply_cli(&mut cfg, &["--port".into(), "9000".into(), "--debug".into()]);
        assert_eq!(cfg.port, 9000);
        assert!(cfg.debug);
    }

    #[test]
    fn cli_accepts_inline_equals_syntax() {
        let mut cfg = NodeConfig::default();
        apply_cli(&mut cfg, &["--mother-host=stable.example.net".into()]);
        assert_eq!(cfg.mother_host, "stable.example.net");
    }

    #[test]
    fn is_standalone_detects_self_referential_mother() {
        let mut cfg = NodeConfig::default();
        cfg.mother_host = "127.0.0.1".into();
        cfg.mother_port = cfg.port;
        assert!(cfg.is_standalone());
    }

    #[test]
    fn web_exposure_parses_known_values_case_insensitively() {
        assert_eq!(WebExposure::parse("PUBLIC"), Some(WebExposure::Public));
        assert_eq!(WebExposure::parse("bogus"), None);
    }
}
