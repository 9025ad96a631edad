//! Error types for the SDK's fallible collaborators.
//!
//! None of these are fatal to a session: decode and store failures are
//! logged and the offending frame or record is dropped.

/// An inbound frame that could not be turned into an event.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("malformed frame: {0}")]
    Json(#[from] serde_json::Error),
}

/// Local message storage failure.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// HTTP API failure (upload, login, register, user list).
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("server returned {status}: {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },
    #[error("server rejected request: {0}")]
    Rejected(String),
    #[error("unexpected response: {0}")]
    Body(String),
    #[error("can't read {path}: {source}")]
    File {
        path: String,
        source: std::io::Error,
    },
}
