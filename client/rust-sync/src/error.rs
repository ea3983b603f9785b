use thiserror::Error;

/// Failures of the hydration pipeline. Everything below the coordinator is
/// captured as one of these; the coordinator alone decides what becomes
/// user-visible. None of them is fatal to the host application.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("answer sync is disabled")]
    Disabled,

    #[error("no username supplied")]
    MissingUsername,

    #[error("remote answer endpoint is not deployed")]
    EndpointAbsent,

    #[error("transient remote failure: {message}")]
    Transient { status: Option<u16>, message: String },

    #[error("remote fetch failed after {attempts} attempts: {last_error}")]
    ExhaustedRetries { attempts: usize, last_error: String },

    #[error("invalid remote base URL {url:?}: {reason}")]
    InvalidBaseUrl { url: String, reason: String },

    #[error("http client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl SyncError {
    /// Only transient failures are worth another fetch attempt; everything
    /// else (404, bad config) terminates the retry loop.
    pub fn is_transient(&self) -> bool {
        matches!(self, SyncError::Transient { .. })
    }
}

/// Failures of a local persistence namespace. A rejected durable write leaves
/// in-memory state ahead of disk; callers report it and move on.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{namespace} store over capacity: {required} bytes, limit {limit}")]
    CapacityExceeded {
        namespace: &'static str,
        required: usize,
        limit: usize,
    },

    #[error("store I/O failure: {0}")]
    Io(#[from] std::io::Error),

    #[error("store serialization failure: {0}")]
    Serialize(#[from] serde_json::Error),
}
