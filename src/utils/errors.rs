// src/utils/errors.rs

use thiserror::Error;

/// Errors coming out of the Postgres layer.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
    #[error("database call timed out after {0:?} (twice)")]
    Timeout(std::time::Duration),
}

/// Errors from the feed fetch (HTTP, payload shape).
#[derive(Debug, Error)]
pub enum ScrapeError {
    #[error("feed request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("feed payload rejected: {0}")]
    Payload(String),
}

impl ScrapeError {
    /// Worth a second attempt within the same cycle?
    pub fn is_transient(&self) -> bool {
        match self {
            ScrapeError::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            ScrapeError::Payload(_) => false,
        }
    }
}

/// Errors from the outbound chat transport.
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("recipient rejected message (status {status}): {body}")]
    Rejected { status: u16, body: String },
}

impl NotifyError {
    /// Transport hiccups and rate limits get one retry; hard rejections do not.
    pub fn is_transient(&self) -> bool {
        match self {
            NotifyError::Transport(_) => true,
            NotifyError::Rejected { status, .. } => *status == 429 || *status >= 500,
        }
    }
}

/// AutoTuner failures are logged and swallowed by the caller.
#[derive(Debug, Error)]
pub enum TunerError {
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// A whole observation cycle failed.
#[derive(Debug, Error)]
pub enum CycleError {
    #[error(transparent)]
    Scrape(#[from] ScrapeError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("storage unavailable: all {failed} per-deal units failed")]
    StorageUnavailable { failed: usize },
}
