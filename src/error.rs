//! Error taxonomy for the crawler: Policy, Transient I/O, Store, and Invariant failures.
//!
//! Policy and Transient errors are expected, routine outcomes of crawling the open web and are
//! always handled by the caller (logged, item skipped). Store errors propagate to the caller as
//! a value. Invariant violations indicate a bug in this crate and are not represented here --
//! they surface as a panic at the point of detection.

use crate::weburl::PageUrl;

/// Failure to derive a canonical `PageUrl` from a raw link.
#[derive(Debug, thiserror::Error)]
pub enum UrlError {
    #[error("url `{raw}` has no host and no parent to inherit one from")]
    NoHost { raw: String },
}

/// Failures that can occur while fetching and parsing a single page.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("policy denied fetch of {url}: {reason}")]
    Policy { url: PageUrl, reason: &'static str },

    #[error("transient error fetching {url}: {source}")]
    Transient {
        url: PageUrl,
        #[source]
        source: anyhow::Error,
    },
}

impl FetchError {
    pub fn is_policy(&self) -> bool {
        matches!(self, FetchError::Policy { .. })
    }
}

/// Failures surfaced by the store gateway's serializer task.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("store serializer task is gone (the process is likely shutting down)")]
    Disconnected,
}
