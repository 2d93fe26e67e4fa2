//! The error kinds the core distinguishes (§7), as a closed, matchable enum.
//!
//! `SnipdexError` is what `Scraper`/`Cache` methods return; callers match on
//! it to decide a peer's next status. `main` and the `--doctor` CLI path work
//! in terms of `anyhow::Result` instead and only ever read the `Display`
//! impl, keeping a typed core separate from an `anyhow` process boundary.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SnipdexError {
    /// Template lacks a mandatory placeholder or endpoint info (§4.1, §7).
    #[error("invalid template: {0}")]
    InvalidTemplate(String),

    /// Socket connect/read exceeded its timeout, or a fan-out hop's wall
    /// clock budget elapsed before a worker reported back (§7).
    #[error("timeout: {0}")]
    Timeout(String),

    /// A peer response failed to parse under its selected format descriptor
    /// (§4.3, §7).
    #[error("parse error: {0}")]
    Parse(String),

    /// Cache miss. Normal control flow — callers treat this as "empty
    /// result", never as a propagated failure (§7).
    #[error("not found: {0}")]
    NotFound(String),

    /// Duplicate insert on a key that should be unique; the caller converts
    /// this into an update rather than surfacing it further (§7).
    #[error("integrity: {0}")]
    Integrity(String),

    /// Registration against the mother failed and no usable cached
    /// registration response exists. The only error kind that aborts the
    /// process (§7).
    #[error("fatal bootstrap: {0}")]
    FatalBootstrap(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl SnipdexError {
    /// Convenience check used by the FanOut coordinator when deciding a
    /// peer's post-dispatch status (§4.5).
    pub fn is_timeout(&self) -> bool {
        matches!(self, SnipdexError::Timeout(_))
    }
}
