//! Configuration for the feed client.
//!
//! [`ClientConfig`] holds the tuning knobs shared by one-shot calls and
//! stream subscriptions. Endpoints and credentials are passed to
//! [`FirehoseClient`](crate::client::FirehoseClient) directly; this struct
//! only carries behavior.
//!
//! # Configuration Options
//!
//! | Option | Default | Description |
//! |--------|---------|-------------|
//! | `user_agent` | `firehose-client/<version>` | User-Agent header on every request |
//! | `backoff_base_ms` | 1000 | Base reconnect delay for stream subscriptions |
//! | `max_failures` | 5 | Consecutive-failure ceiling bounding backoff growth |
//! | `connect_timeout_secs` | 30 | TCP/TLS connect timeout |
//!
//! # Examples
//!
//! ```
//! use firehose_client::ClientConfig;
//!
//! let config = ClientConfig {
//!     backoff_base_ms: 500,
//!     ..Default::default()
//! };
//! assert_eq!(config.max_failures, 5); // Default
//! ```

/// Tuning configuration for the feed client.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClientConfig {
    /// User-Agent header sent with every request.
    pub user_agent: String,

    /// Base reconnect delay in milliseconds.
    ///
    /// The actual delay doubles with each consecutive transport failure:
    /// `base * 2^(failures - 1)`, with `failures` capped at `max_failures`.
    pub backoff_base_ms: u64,

    /// Ceiling on the consecutive-failure count.
    ///
    /// Bounds backoff growth; with the defaults the longest delay is
    /// `1000ms * 2^4 = 16s`. Retries themselves are unbounded and continue
    /// until the subscription is stopped.
    pub max_failures: u32,

    /// Connection timeout in seconds.
    pub connect_timeout_secs: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            user_agent: concat!("firehose-client/", env!("CARGO_PKG_VERSION")).to_string(),
            backoff_base_ms: 1000,
            max_failures: 5,
            connect_timeout_secs: 30,
        }
    }
}
