//! Error types for feed client operations.
//!
//! All fallible operations in this crate return the [`Result`] alias defined
//! here. The error taxonomy mirrors how failures propagate:
//!
//! | Category | Variants | Surfaced to callers |
//! |----------|----------|---------------------|
//! | Transport | `Http` | One-shot calls only; stream subscriptions absorb these into reconnects |
//! | Server | `Api` | One-shot calls whose response envelope carries `ok: false` |
//! | Decode | `Json`, `MalformedRecord` | `Json` from one-shot bodies; `MalformedRecord` as advisory feed events |
//! | Setup | `Config` | Client construction |
//!
//! A stream subscription never fails with an error: transport failures feed
//! the reconnect cycle, and malformed record segments are forwarded as
//! non-fatal notifications while framing continues.

use thiserror::Error;

/// Result type for feed client operations.
pub type Result<T> = std::result::Result<T, FirehoseError>;

/// Errors that can occur while talking to a feed service.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum FirehoseError {
    /// HTTP request failed (connection refused, timeout, non-success status).
    ///
    /// For stream subscriptions these are absorbed into the backoff cycle
    /// and never returned to the caller.
    #[error("HTTP error: {0}")]
    Http(String),

    /// The server answered but reported failure in its response envelope.
    #[error("API error: {0}")]
    Api(String),

    /// JSON serialization or deserialization error on a one-shot response body.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A delimited stream segment could not be decoded as a JSON record.
    ///
    /// Advisory only: the framer stays synchronized and the subscription
    /// keeps running. The offending segment text is preserved for diagnosis.
    #[error("malformed record segment: {source}")]
    MalformedRecord {
        /// The segment text that failed to decode.
        segment: String,
        /// The underlying parse failure.
        #[source]
        source: serde_json::Error,
    },

    /// Invalid client configuration (bad endpoint URL, unbuildable HTTP client).
    #[error("configuration error: {0}")]
    Config(String),
}
