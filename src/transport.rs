//! Transport seam for long-lived stream connections.
//!
//! The supervisor depends only on the narrow [`Transport`] contract: open a
//! physical byte stream for a filter and hand back a [`Connection`] that
//! yields [`TransportEvent`]s and can be forcibly aborted. Production code
//! uses [`HttpTransport`] over `reqwest`; tests substitute scripted
//! implementations.

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use tokio::task::AbortHandle;

use crate::error::{FirehoseError, Result};
use crate::types::Query;

/// Capacity of the per-connection event channel.
const EVENT_CHANNEL_CAPACITY: usize = 100;

/// One event on a physical connection.
#[derive(Debug)]
pub enum TransportEvent {
    /// A chunk of body bytes arrived.
    Data(Bytes),
    /// The peer closed the stream cleanly.
    End,
    /// The stream died mid-read.
    Error(FirehoseError),
}

/// Handle to one physical stream connection.
///
/// Events arrive through an internal channel; the channel closing without a
/// terminal event also means the connection is gone (for example after
/// [`abort`](Connection::abort)).
pub struct Connection {
    events: async_channel::Receiver<TransportEvent>,
    abort: AbortHandle,
}

impl Connection {
    /// Wrap an event receiver and the abort handle of its feeding task.
    pub fn new(events: async_channel::Receiver<TransportEvent>, abort: AbortHandle) -> Self {
        Connection { events, abort }
    }

    /// A receiver of this connection's events.
    pub fn events(&self) -> async_channel::Receiver<TransportEvent> {
        self.events.clone()
    }

    /// Forcibly tear down the physical stream.
    ///
    /// Kills the feeding task, which drops the underlying response body and
    /// closes the event channel.
    pub fn abort(&self) {
        self.abort.abort();
    }
}

/// Opens physical stream connections for the supervisor.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Open a long-lived stream matching `query`.
    ///
    /// An error return is an open failure; the supervisor absorbs it into
    /// its reconnect cycle.
    async fn open_stream(&self, query: &Query) -> Result<Connection>;
}

/// Production transport over HTTP.
///
/// Issues `GET {base}/stream?…` and pumps the chunked response body through
/// the connection's event channel from a background task. Aborting the
/// connection aborts that task, dropping the response and closing the
/// socket.
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
    access_key: String,
}

impl HttpTransport {
    /// Create a transport for the given endpoint and credential.
    pub fn new(
        client: reqwest::Client,
        base_url: impl Into<String>,
        access_key: impl Into<String>,
    ) -> Self {
        HttpTransport {
            client,
            base_url: base_url.into(),
            access_key: access_key.into(),
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn open_stream(&self, query: &Query) -> Result<Connection> {
        let url = format!("{}/stream", self.base_url.trim_end_matches('/'));
        tracing::debug!(%url, "opening stream connection");

        let response = self
            .client
            .get(&url)
            .query(&query.to_pairs(&self.access_key))
            .send()
            .await
            .map_err(|e| FirehoseError::Http(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FirehoseError::Http(format!(
                "stream open failed: {status}"
            )));
        }

        let (tx, rx) = async_channel::bounded(EVENT_CHANNEL_CAPACITY);
        let mut body = response.bytes_stream();

        let pump = tokio::spawn(async move {
            while let Some(chunk) = body.next().await {
                let event = match chunk {
                    Ok(bytes) => TransportEvent::Data(bytes),
                    Err(e) => {
                        let _ = tx.send(TransportEvent::Error(FirehoseError::Http(e.to_string()))).await;
                        return;
                    }
                };
                if tx.send(event).await.is_err() {
                    // receiver gone, nobody left to feed
                    return;
                }
            }
            let _ = tx.send(TransportEvent::End).await;
        });

        Ok(Connection::new(rx, pump.abort_handle()))
    }
}
