//! High-level feed API client.
//!
//! [`FirehoseClient`] bundles the pieces of this crate behind one handle:
//!
//! - **One-shot calls**: [`search`](FirehoseClient::search),
//!   [`get`](FirehoseClient::get), [`tag`](FirehoseClient::tag) and
//!   [`untag`](FirehoseClient::untag) each issue a single request and
//!   decode its JSON envelope.
//! - **Stream subscriptions**: [`stream`](FirehoseClient::stream) and
//!   [`feed`](FirehoseClient::feed) hand a filter to the crate's
//!   [`Supervisor`], which keeps the subscription alive across transport
//!   failures until [`stop`](FirehoseClient::stop).
//!
//! # Examples
//!
//! ```no_run
//! use firehose_client::{FeedEvent, FirehoseClient, Query};
//!
//! # async fn run() -> firehose_client::Result<()> {
//! let client = FirehoseClient::new("https://api.example.com", "my-access-key")?;
//!
//! // one-shot search
//! let results = client.search(&Query::new().with_text("storm")).await?;
//! println!("{} of {} hits", results.hits.len(), results.total);
//!
//! // live stream with automatic reconnection
//! let id = client.stream(Query::new().with_text("storm"), |event| {
//!     if let FeedEvent::Record(record) = event {
//!         println!("{record}");
//!     }
//! });
//! client.stop(id);
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use url::Url;

use crate::backoff::BackoffPolicy;
use crate::config::ClientConfig;
use crate::error::{FirehoseError, Result};
use crate::supervisor::{Feed, FeedEvent, Supervisor};
use crate::transport::HttpTransport;
use crate::types::{Query, Record, SearchResults, SubscriptionId};

/// Header carrying the access key on ingest (write) calls.
const ACCESS_KEY_HEADER: &str = "x-firehose-accesskey";

#[derive(Debug, Deserialize)]
struct SearchEnvelope {
    #[serde(default)]
    ok: bool,
    #[serde(default)]
    hits: Vec<Record>,
    #[serde(default)]
    total: u64,
    #[serde(default)]
    took: u64,
}

#[derive(Debug, Deserialize)]
struct GetEnvelope {
    #[serde(default)]
    ok: bool,
    hit: Option<Record>,
}

#[derive(Debug, Deserialize)]
struct AckEnvelope {
    #[serde(default)]
    ok: bool,
}

/// Client for a record feed service.
///
/// Read calls go to the base endpoint; tag writes go to the ingest
/// endpoint, which defaults to the base endpoint and can be overridden
/// with [`with_ingest_url`](FirehoseClient::with_ingest_url).
pub struct FirehoseClient {
    http: reqwest::Client,
    base_url: String,
    ingest_url: String,
    access_key: String,
    supervisor: Supervisor,
}

impl FirehoseClient {
    /// Create a client with default configuration.
    pub fn new(base_url: impl Into<String>, access_key: impl Into<String>) -> Result<Self> {
        Self::with_config(base_url, access_key, ClientConfig::default())
    }

    /// Create a client with custom configuration.
    pub fn with_config(
        base_url: impl Into<String>,
        access_key: impl Into<String>,
        config: ClientConfig,
    ) -> Result<Self> {
        let base_url = base_url.into();
        let access_key = access_key.into();

        Url::parse(&base_url)
            .map_err(|e| FirehoseError::Config(format!("invalid base url `{base_url}`: {e}")))?;

        let http = reqwest::Client::builder()
            .user_agent(config.user_agent.as_str())
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .build()
            .map_err(|e| FirehoseError::Config(e.to_string()))?;

        let transport = HttpTransport::new(http.clone(), base_url.clone(), access_key.clone());
        let policy = BackoffPolicy::new()
            .with_base_delay(Duration::from_millis(config.backoff_base_ms))
            .with_max_failures(config.max_failures);
        let supervisor = Supervisor::new(Arc::new(transport), policy);

        Ok(FirehoseClient {
            http,
            ingest_url: base_url.clone(),
            base_url,
            access_key,
            supervisor,
        })
    }

    /// Route tag writes to a separate ingest endpoint.
    pub fn with_ingest_url(mut self, ingest_url: impl Into<String>) -> Result<Self> {
        let ingest_url = ingest_url.into();
        Url::parse(&ingest_url).map_err(|e| {
            FirehoseError::Config(format!("invalid ingest url `{ingest_url}`: {e}"))
        })?;
        self.ingest_url = ingest_url;
        Ok(self)
    }

    /// Run a one-shot search and return the matching records.
    pub async fn search(&self, query: &Query) -> Result<SearchResults> {
        let url = self.read_endpoint("search");
        tracing::debug!(%url, "search");

        let envelope: SearchEnvelope = self
            .get_json(&url, &query.to_pairs(&self.access_key))
            .await?;
        if !envelope.ok {
            return Err(FirehoseError::Api("search failed".into()));
        }
        Ok(SearchResults {
            hits: envelope.hits,
            total: envelope.total,
            took: envelope.took,
        })
    }

    /// Fetch one record by its content id.
    pub async fn get(&self, sha: &str) -> Result<Record> {
        let url = self.read_endpoint("get");
        tracing::debug!(%url, sha, "get");

        let pairs = vec![
            ("accesskey", self.access_key.clone()),
            ("sha", sha.to_string()),
        ];
        let envelope: GetEnvelope = self.get_json(&url, &pairs).await?;
        if !envelope.ok {
            return Err(FirehoseError::Api(format!("get failed for {sha}")));
        }
        envelope
            .hit
            .ok_or_else(|| FirehoseError::Api(format!("no hit returned for {sha}")))
    }

    /// Attach a tag to a record.
    pub async fn tag(&self, sha: &str, label: &str) -> Result<()> {
        self.post_tag("tag", sha, label).await
    }

    /// Remove a tag from a record.
    pub async fn untag(&self, sha: &str, label: &str) -> Result<()> {
        self.post_tag("untag", sha, label).await
    }

    /// Start a live stream subscription; `handler` fires once per event.
    ///
    /// The subscription reconnects on its own until [`stop`](Self::stop)
    /// is called. Requires a current tokio runtime.
    pub fn stream(
        &self,
        query: Query,
        handler: impl Fn(FeedEvent) + Send + Sync + 'static,
    ) -> SubscriptionId {
        self.supervisor.start(query, handler)
    }

    /// Start a live stream subscription consumed as a [`Feed`] of events.
    pub fn feed(&self, query: Query) -> Feed {
        self.supervisor.start_feed(query)
    }

    /// Stop one subscription. Safe to call twice or with an unknown id.
    pub fn stop(&self, id: SubscriptionId) {
        self.supervisor.stop(id);
    }

    /// Stop every live subscription.
    pub fn stop_all(&self) {
        self.supervisor.stop_all();
    }

    /// The supervisor driving this client's subscriptions.
    pub fn supervisor(&self) -> &Supervisor {
        &self.supervisor
    }

    fn read_endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path)
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(
        &self,
        url: &str,
        pairs: &[(&str, String)],
    ) -> Result<T> {
        let response = self
            .http
            .get(url)
            .query(pairs)
            .send()
            .await
            .map_err(|e| FirehoseError::Http(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FirehoseError::Http(format!("{url} returned {status}")));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| FirehoseError::Http(e.to_string()))?;
        Ok(serde_json::from_slice(&body)?)
    }

    async fn post_tag(&self, endpoint: &str, sha: &str, label: &str) -> Result<()> {
        let url = format!("{}/{}", self.ingest_url.trim_end_matches('/'), endpoint);
        tracing::debug!(%url, sha, label, "tag change");

        let response = self
            .http
            .post(&url)
            .query(&[("sha", sha)])
            .header(ACCESS_KEY_HEADER, &self.access_key)
            .json(&serde_json::json!({ "tag": label }))
            .send()
            .await
            .map_err(|e| FirehoseError::Http(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FirehoseError::Http(format!("{url} returned {status}")));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| FirehoseError::Http(e.to_string()))?;
        let envelope: AckEnvelope = serde_json::from_slice(&body)?;
        if !envelope.ok {
            return Err(FirehoseError::Api(format!("{endpoint} rejected for {sha}")));
        }
        Ok(())
    }
}
