//! Self-healing stream subscriptions.
//!
//! A [`Supervisor`] owns a registry of logical subscriptions. Each
//! subscription keeps one stable id and caller handler while the physical
//! connection underneath it is replaced on every failure: connection end,
//! read error and open failure all feed the same reconnect cycle with
//! exponentially growing delay, and a successfully decoded record resets
//! the failure count. Transport failures are never surfaced to the caller;
//! only framing errors cross the boundary, as advisory [`FeedEvent`]s.
//!
//! Stopping is the only terminal transition. It aborts the active physical
//! connection, cancels a pending reconnect, removes the registry entry and
//! delivers exactly one [`FeedEvent::Closed`] to the handler. Stopping an
//! unknown or already-stopped id is a no-op, and stopping from inside the
//! handler itself is safe: no registry lock is held while a handler runs,
//! and events already in flight for a removed entry are dropped rather
//! than dispatched.
//!
//! # Examples
//!
//! ```no_run
//! use std::sync::Arc;
//! use firehose_client::{BackoffPolicy, FeedEvent, HttpTransport, Query, Supervisor};
//!
//! # async fn run() {
//! let transport = HttpTransport::new(
//!     reqwest::Client::new(),
//!     "https://api.example.com",
//!     "my-key",
//! );
//! let supervisor = Supervisor::new(Arc::new(transport), BackoffPolicy::default());
//!
//! let id = supervisor.start(Query::new().with_text("storm"), |event| {
//!     if let FeedEvent::Record(record) = event {
//!         println!("{record}");
//!     }
//! });
//! supervisor.stop(id);
//! # }
//! ```

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::Stream;
use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::backoff::{BackoffPolicy, BackoffState};
use crate::error::FirehoseError;
use crate::framer::{Frame, Framer};
use crate::transport::{Connection, Transport, TransportEvent};
use crate::types::{Query, Record, SubscriptionId};

/// One notification delivered to a subscription handler.
#[derive(Debug)]
pub enum FeedEvent {
    /// A decoded record from the live stream.
    Record(Record),
    /// A segment that could not be decoded; the stream continues.
    Malformed(FirehoseError),
    /// The subscription was stopped. Delivered exactly once, last.
    Closed,
}

/// Caller-supplied handler invoked once per feed event.
pub type FeedHandler = Arc<dyn Fn(FeedEvent) + Send + Sync>;

/// Lifecycle state of a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    /// A physical connection is being opened.
    Connecting,
    /// Records are flowing from a live connection.
    Streaming,
    /// Waiting out the delay before the next reconnect attempt.
    Backoff,
    /// Terminal; the registry entry is gone.
    Stopped,
}

struct Entry {
    query: Query,
    handler: FeedHandler,
    backoff: BackoffState,
    state: SubscriptionState,
    connection: Option<Connection>,
    /// Woken by stop to cut a pending backoff sleep short.
    wake: Arc<Notify>,
}

struct Registry {
    next_id: u64,
    entries: HashMap<SubscriptionId, Entry>,
}

/// Maintains named, cancelable, self-healing stream subscriptions.
///
/// Cheap to clone; clones share the same registry. Starting a subscription
/// spawns its driver task, so a tokio runtime must be current.
#[derive(Clone)]
pub struct Supervisor {
    transport: Arc<dyn Transport>,
    policy: BackoffPolicy,
    registry: Arc<Mutex<Registry>>,
}

impl Supervisor {
    /// Create a supervisor over the given transport.
    pub fn new(transport: Arc<dyn Transport>, policy: BackoffPolicy) -> Self {
        Supervisor {
            transport,
            policy,
            registry: Arc::new(Mutex::new(Registry {
                next_id: 1,
                entries: HashMap::new(),
            })),
        }
    }

    /// Start a subscription, invoking `handler` for every feed event.
    ///
    /// Returns the stable subscription id. The handler keeps firing across
    /// any number of reconnects until [`stop`](Supervisor::stop) delivers
    /// the final [`FeedEvent::Closed`].
    pub fn start(
        &self,
        query: Query,
        handler: impl Fn(FeedEvent) + Send + Sync + 'static,
    ) -> SubscriptionId {
        self.start_handler(query, Arc::new(handler))
    }

    /// Start a subscription delivered through a [`Feed`] channel instead of
    /// a handler.
    pub fn start_feed(&self, query: Query) -> Feed {
        let (tx, rx) = async_channel::unbounded();
        let id = self.start(query, move |event| {
            let closed = matches!(event, FeedEvent::Closed);
            let _ = tx.try_send(event);
            if closed {
                tx.close();
            }
        });
        Feed { id, events: rx }
    }

    fn start_handler(&self, query: Query, handler: FeedHandler) -> SubscriptionId {
        let id = {
            let mut registry = self.registry.lock();
            let id = SubscriptionId(registry.next_id);
            registry.next_id += 1;
            registry.entries.insert(
                id,
                Entry {
                    query,
                    handler,
                    backoff: BackoffState::new(self.policy.clone()),
                    state: SubscriptionState::Connecting,
                    connection: None,
                    wake: Arc::new(Notify::new()),
                },
            );
            id
        };

        tracing::debug!(subscription = %id, "starting subscription");
        let transport = Arc::clone(&self.transport);
        let registry = Arc::clone(&self.registry);
        tokio::spawn(drive(id, transport, registry));
        id
    }

    /// Stop one subscription.
    ///
    /// Aborts its active physical connection, cancels any pending
    /// reconnect, removes it from the registry and delivers exactly one
    /// [`FeedEvent::Closed`]. Unknown ids are a safe no-op, which also
    /// makes repeated stops idempotent.
    pub fn stop(&self, id: SubscriptionId) {
        let entry = self.registry.lock().entries.remove(&id);
        if let Some(entry) = entry {
            tracing::debug!(subscription = %id, "stopping subscription");
            finish(entry);
        }
    }

    /// Stop every registered subscription and clear the registry.
    ///
    /// Each handler receives exactly one [`FeedEvent::Closed`].
    pub fn stop_all(&self) {
        let entries: Vec<Entry> = {
            let mut registry = self.registry.lock();
            registry.entries.drain().map(|(_, entry)| entry).collect()
        };
        for entry in entries {
            finish(entry);
        }
    }

    /// Current lifecycle state of a subscription, or `None` once stopped.
    pub fn state(&self, id: SubscriptionId) -> Option<SubscriptionState> {
        self.registry.lock().entries.get(&id).map(|e| e.state)
    }

    /// Consecutive transport failures recorded for a subscription.
    pub fn failures(&self, id: SubscriptionId) -> Option<u32> {
        self.registry
            .lock()
            .entries
            .get(&id)
            .map(|e| e.backoff.failures())
    }

    /// Number of live subscriptions.
    pub fn active_subscriptions(&self) -> usize {
        self.registry.lock().entries.len()
    }
}

/// Tear down a removed entry: abort its connection, wake its driver and
/// deliver the end sentinel. The entry is already out of the registry, so
/// the sentinel can fire at most once per subscription.
fn finish(mut entry: Entry) {
    entry.state = SubscriptionState::Stopped;
    if let Some(connection) = entry.connection.take() {
        connection.abort();
    }
    entry.wake.notify_one();
    (entry.handler)(FeedEvent::Closed);
}

/// Per-subscription driver: the explicit Connecting → Streaming → Backoff
/// loop. Exits as soon as the registry entry disappears.
async fn drive(
    id: SubscriptionId,
    transport: Arc<dyn Transport>,
    registry: Arc<Mutex<Registry>>,
) {
    let query = match registry.lock().entries.get(&id) {
        Some(entry) => entry.query.clone(),
        None => return,
    };

    loop {
        // Connecting
        {
            let mut guard = registry.lock();
            match guard.entries.get_mut(&id) {
                Some(entry) => entry.state = SubscriptionState::Connecting,
                None => return,
            }
        }

        match transport.open_stream(&query).await {
            Ok(connection) => {
                let events = connection.events();
                {
                    let mut guard = registry.lock();
                    match guard.entries.get_mut(&id) {
                        Some(entry) => {
                            entry.state = SubscriptionState::Streaming;
                            entry.connection = Some(connection);
                        }
                        None => {
                            // stopped while the open was in flight
                            connection.abort();
                            return;
                        }
                    }
                }

                // fresh framer per physical connection
                let mut framer = Framer::new();
                while let Ok(event) = events.recv().await {
                    match event {
                        TransportEvent::Data(chunk) => {
                            for frame in framer.feed(&chunk) {
                                if !dispatch(id, &registry, frame) {
                                    return;
                                }
                            }
                        }
                        TransportEvent::End => {
                            tracing::debug!(subscription = %id, "stream ended by peer");
                            break;
                        }
                        TransportEvent::Error(error) => {
                            tracing::debug!(subscription = %id, %error, "stream read failed");
                            break;
                        }
                    }
                }
                // a closed event channel without a terminal event lands
                // here too: the connection is gone either way
            }
            Err(error) => {
                tracing::debug!(subscription = %id, %error, "stream open failed");
            }
        }

        // Backoff, unless the subscription was stopped meanwhile
        let (delay, wake, failures) = {
            let mut guard = registry.lock();
            match guard.entries.get_mut(&id) {
                Some(entry) => {
                    entry.connection = None;
                    entry.state = SubscriptionState::Backoff;
                    let delay = entry.backoff.next_delay();
                    (delay, Arc::clone(&entry.wake), entry.backoff.failures())
                }
                None => return,
            }
        };
        tracing::warn!(
            subscription = %id,
            failures,
            ?delay,
            "connection lost, scheduling reconnect"
        );
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = wake.notified() => {}
        }
    }
}

/// Deliver one frame to a subscription's handler.
///
/// Re-checks registration under the lock immediately before dispatch, so a
/// frame in flight when the subscription is stopped is dropped. The lock is
/// released before the handler runs, keeping handler-initiated stops
/// deadlock-free. Returns false once the subscription is gone.
fn dispatch(id: SubscriptionId, registry: &Mutex<Registry>, frame: Frame) -> bool {
    let handler = {
        let mut guard = registry.lock();
        match guard.entries.get_mut(&id) {
            Some(entry) => {
                if matches!(frame, Frame::Record(_)) {
                    entry.backoff.reset();
                }
                Arc::clone(&entry.handler)
            }
            None => return false,
        }
    };

    match frame {
        Frame::Record(value) => {
            tracing::trace!(subscription = %id, "record");
            handler(FeedEvent::Record(value));
        }
        Frame::Malformed { segment, error } => handler(FeedEvent::Malformed(
            FirehoseError::MalformedRecord {
                segment,
                source: error,
            },
        )),
    }
    true
}

/// Channel-backed view of one subscription's events.
///
/// Yields every [`FeedEvent`] in delivery order and finishes after
/// [`FeedEvent::Closed`]. The buffer is unbounded so a slow consumer never
/// loses the multiplicity guarantees of the event sequence. Dropping the
/// feed does not stop the subscription; call [`Supervisor::stop`] with
/// [`Feed::id`] for that.
pub struct Feed {
    id: SubscriptionId,
    events: async_channel::Receiver<FeedEvent>,
}

impl Feed {
    /// Id of the underlying subscription, usable with
    /// [`Supervisor::stop`].
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Receive the next event, or `None` after the feed has closed.
    pub async fn next_event(&self) -> Option<FeedEvent> {
        self.events.recv().await.ok()
    }
}

impl Stream for Feed {
    type Item = FeedEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.events).poll_next(cx)
    }
}
