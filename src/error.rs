//! Error types for each pipeline component.
//!
//! Only [`ConfigError`] ever reaches `main`; every other error is converted
//! into a sentinel value or a degraded record at its component boundary.

use crate::models::FetchAttempt;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Unrecoverable startup problems. These halt the run with a non-zero exit.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("identity pool is empty: configure at least one proxy and user agent")]
    EmptyIdentityPool,

    #[error("invalid proxy URL {proxy:?}: {reason}")]
    InvalidProxy { proxy: String, reason: String },

    #[error("failed to read proxy list {path}: {source}")]
    ProxyFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid base URL {0:?}")]
    InvalidBaseUrl(String),

    #[error("output path {path} is not writable: {source}")]
    OutputNotWritable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("browser automation driver unavailable: {0}")]
    BrowserUnavailable(#[from] SessionError),
}

/// A single failed fetch attempt.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("unexpected HTTP status {0}")]
    Status(u16),

    #[error("could not build client for identity: {0}")]
    Client(String),
}

/// A page whose fetch ran out of attempts.
#[derive(Debug, Error)]
#[error("fetch of {url} failed after {} attempts: {}", .attempts.len(), last_reason(.attempts))]
pub struct FetchExhausted {
    pub url: String,
    pub attempts: Vec<FetchAttempt>,
}

fn last_reason(attempts: &[FetchAttempt]) -> &str {
    attempts
        .iter()
        .rev()
        .find_map(|a| a.outcome.as_ref().err())
        .map_or("no attempts made", String::as_str)
}

/// Browser session failures. Enrichment degrades to the base record on any of these.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("failed to launch browser: {0}")]
    Launch(String),

    #[error("driver error: {0}")]
    Driver(String),

    #[error("timed out after {after:?} waiting for {what}")]
    Timeout { what: &'static str, after: Duration },

    #[error("browsing context {0} not found")]
    ContextNotFound(String),

    #[error("element {0:?} not found")]
    ElementNotFound(String),
}

/// OCR pipeline failures. Always degraded to the sentinel by the extractor.
#[derive(Debug, Error)]
pub enum OcrError {
    #[error("image download failed: {0}")]
    Download(#[from] reqwest::Error),

    #[error("image download returned HTTP {0}")]
    Status(u16),

    #[error("image download timed out after {0:?}")]
    DownloadTimeout(Duration),

    #[error("not a recognised image ({0} bytes)")]
    Decode(usize),

    #[error("OCR engine failed: {0}")]
    Engine(String),

    #[error("OCR engine timed out after {0:?}")]
    EngineTimeout(Duration),
}

/// Persistence failures on write. Reads never fail; corrupt content is treated as empty.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("store serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}
