//! firehose-client: consume live record feeds over HTTP.
//!
//! The feed wire format is a long-lived HTTP response whose body carries
//! CRLF-delimited JSON records. This crate provides:
//!
//! - **framer**: incremental decoding of that stream, tolerant of record
//!   boundaries falling anywhere across network reads.
//! - **supervisor**: named, cancelable subscriptions that survive
//!   transport failures through capped exponential-backoff reconnects.
//! - **transport**: the narrow connection-opening seam between the two,
//!   with a `reqwest` implementation.
//! - **client**: a façade adding the service's one-shot calls (search,
//!   get, tag changes) on the same configuration and credential.
//!
//! # Quick start
//!
//! ```no_run
//! use firehose_client::{FeedEvent, FirehoseClient, Query};
//!
//! # async fn run() -> firehose_client::Result<()> {
//! let client = FirehoseClient::new("https://api.example.com", "my-access-key")?;
//! let id = client.stream(Query::new().with_text("storm"), |event| match event {
//!     FeedEvent::Record(record) => println!("{record}"),
//!     FeedEvent::Malformed(error) => eprintln!("skipping bad segment: {error}"),
//!     FeedEvent::Closed => println!("feed closed"),
//! });
//! // ... later
//! client.stop(id);
//! # Ok(())
//! # }
//! ```

pub mod backoff;
pub mod client;
pub mod config;
pub mod error;
pub mod framer;
pub mod supervisor;
pub mod transport;
pub mod types;

pub use backoff::{BackoffPolicy, BackoffState};
pub use client::FirehoseClient;
pub use config::ClientConfig;
pub use error::{FirehoseError, Result};
pub use framer::{Frame, Framer};
pub use supervisor::{Feed, FeedEvent, FeedHandler, SubscriptionState, Supervisor};
pub use transport::{Connection, HttpTransport, Transport, TransportEvent};
pub use types::{Query, Record, SearchResults, SubscriptionId};
