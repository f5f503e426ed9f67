//! Supervisor behavior through a scripted transport: reconnection,
//! backoff growth, cancellation and event multiplicity.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use tokio::time::Instant;

use firehose_client::{
    BackoffPolicy, Connection, FeedEvent, FirehoseError, Query, SubscriptionState, Supervisor,
    Transport, TransportEvent,
};

/// Scripted behavior for one `open_stream` call.
enum Script {
    /// The open itself fails.
    Fail,
    /// Serve chunks, then close cleanly.
    Serve(Vec<&'static [u8]>),
    /// Serve chunks, then hold the connection open until aborted.
    ServeOpen(Vec<&'static [u8]>),
}

struct MockTransport {
    scripts: Mutex<VecDeque<Script>>,
    opened_at: Mutex<Vec<Instant>>,
}

impl MockTransport {
    fn new(scripts: Vec<Script>) -> Arc<Self> {
        Arc::new(MockTransport {
            scripts: Mutex::new(scripts.into()),
            opened_at: Mutex::new(Vec::new()),
        })
    }

    fn opens(&self) -> usize {
        self.opened_at.lock().unwrap().len()
    }

    /// Delay between consecutive connection attempts.
    fn open_gaps(&self) -> Vec<Duration> {
        let opened_at = self.opened_at.lock().unwrap();
        opened_at.windows(2).map(|w| w[1] - w[0]).collect()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn open_stream(&self, _query: &Query) -> firehose_client::Result<Connection> {
        self.opened_at.lock().unwrap().push(Instant::now());
        let script = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Script::Fail);
        match script {
            Script::Fail => Err(FirehoseError::Http("connection refused".into())),
            Script::Serve(chunks) => Ok(serve(chunks, false)),
            Script::ServeOpen(chunks) => Ok(serve(chunks, true)),
        }
    }
}

fn serve(chunks: Vec<&'static [u8]>, stay_open: bool) -> Connection {
    let (tx, rx) = async_channel::bounded(16);
    let pump = tokio::spawn(async move {
        for chunk in chunks {
            if tx
                .send(TransportEvent::Data(Bytes::from_static(chunk)))
                .await
                .is_err()
            {
                return;
            }
        }
        if stay_open {
            std::future::pending::<()>().await;
        }
        let _ = tx.send(TransportEvent::End).await;
    });
    Connection::new(rx, pump.abort_handle())
}

type EventLog = Arc<Mutex<Vec<String>>>;

fn logging_handler(log: EventLog) -> impl Fn(FeedEvent) + Send + Sync + 'static {
    move |event| log.lock().unwrap().push(tag_of(&event))
}

fn tag_of(event: &FeedEvent) -> String {
    match event {
        FeedEvent::Record(value) => format!("record:{value}"),
        FeedEvent::Malformed(_) => "malformed".to_string(),
        FeedEvent::Closed => "closed".to_string(),
    }
}

async fn wait_until(steps: u32, cond: impl Fn() -> bool) {
    for _ in 0..steps {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("condition not reached in time");
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

#[tokio::test(start_paused = true)]
async fn records_flow_and_survive_reconnect() {
    init_tracing();
    let transport = MockTransport::new(vec![
        Script::Serve(vec![b"{\"n\":1}\r\n"]),
        Script::ServeOpen(vec![b"{\"n\":2}\r\n"]),
    ]);
    let supervisor = Supervisor::new(transport.clone(), BackoffPolicy::default());

    let mut feed = supervisor.start_feed(Query::new());

    match feed.next().await {
        Some(FeedEvent::Record(value)) => assert_eq!(value["n"], 1),
        other => panic!("expected first record, got {other:?}"),
    }
    // the first connection ends cleanly; the record arrives again only
    // after a reconnect
    match feed.next_event().await {
        Some(FeedEvent::Record(value)) => assert_eq!(value["n"], 2),
        other => panic!("expected second record, got {other:?}"),
    }
    assert_eq!(transport.opens(), 2);

    supervisor.stop(feed.id());
    assert!(matches!(feed.next_event().await, Some(FeedEvent::Closed)));
    assert!(feed.next_event().await.is_none());
}

#[tokio::test(start_paused = true)]
async fn backoff_delays_double_then_cap() {
    let transport = MockTransport::new(vec![
        Script::Fail,
        Script::Fail,
        Script::Fail,
        Script::Fail,
        Script::Fail,
        Script::Fail,
        Script::Fail,
        Script::ServeOpen(vec![]),
    ]);
    let supervisor = Supervisor::new(transport.clone(), BackoffPolicy::default());

    let id = supervisor.start(Query::new(), |_| {});

    let probe = transport.clone();
    wait_until(4000, move || probe.opens() == 8).await;

    let secs = |n: u64| Duration::from_secs(n);
    assert_eq!(
        transport.open_gaps(),
        vec![secs(1), secs(2), secs(4), secs(8), secs(16), secs(16), secs(16)]
    );
    // count saturates at the ceiling
    assert_eq!(supervisor.failures(id), Some(5));
    assert_eq!(supervisor.state(id), Some(SubscriptionState::Streaming));

    supervisor.stop(id);
}

#[tokio::test(start_paused = true)]
async fn record_resets_failure_count() {
    let transport = MockTransport::new(vec![
        Script::Fail,
        Script::Fail,
        Script::Serve(vec![b"{\"n\":1}\r\n"]),
        Script::Fail,
        Script::ServeOpen(vec![]),
    ]);
    let supervisor = Supervisor::new(transport.clone(), BackoffPolicy::default());

    let id = supervisor.start(Query::new(), |_| {});

    let probe = transport.clone();
    wait_until(1000, move || probe.opens() == 5).await;

    // two open failures grow the delay; a delivered record resets the
    // schedule, so the failure after it starts back at the base delay
    let secs = |n: u64| Duration::from_secs(n);
    assert_eq!(
        transport.open_gaps(),
        vec![secs(1), secs(2), secs(1), secs(2)]
    );

    supervisor.stop(id);
}

#[tokio::test(start_paused = true)]
async fn stop_is_terminal_and_idempotent() {
    let transport = MockTransport::new(vec![Script::ServeOpen(vec![b"{\"n\":1}\r\n"])]);
    let supervisor = Supervisor::new(transport.clone(), BackoffPolicy::default());

    let log: EventLog = Arc::new(Mutex::new(Vec::new()));
    let id = supervisor.start(Query::new(), logging_handler(log.clone()));

    let probe = log.clone();
    wait_until(100, move || !probe.lock().unwrap().is_empty()).await;

    supervisor.stop(id);
    supervisor.stop(id);

    let events = log.lock().unwrap().clone();
    assert_eq!(events, vec!["record:{\"n\":1}".to_string(), "closed".to_string()]);
    assert_eq!(supervisor.active_subscriptions(), 0);
    assert_eq!(supervisor.state(id), None);
    assert_eq!(transport.opens(), 1);
}

#[tokio::test(start_paused = true)]
async fn bulk_stop_closes_every_subscription() {
    let transport = MockTransport::new(vec![
        Script::ServeOpen(vec![]),
        Script::ServeOpen(vec![]),
        Script::ServeOpen(vec![]),
    ]);
    let supervisor = Supervisor::new(transport.clone(), BackoffPolicy::default());

    let logs: Vec<EventLog> = (0..3).map(|_| Arc::new(Mutex::new(Vec::new()))).collect();
    for log in &logs {
        supervisor.start(Query::new(), logging_handler(log.clone()));
    }
    let probe = transport.clone();
    wait_until(100, move || probe.opens() == 3).await;
    assert_eq!(supervisor.active_subscriptions(), 3);

    supervisor.stop_all();

    for log in &logs {
        assert_eq!(*log.lock().unwrap(), vec!["closed".to_string()]);
    }
    assert_eq!(supervisor.active_subscriptions(), 0);
}

#[tokio::test(start_paused = true)]
async fn stop_during_backoff_cancels_reconnect() {
    let transport = MockTransport::new(vec![Script::Fail]);
    let supervisor = Supervisor::new(transport.clone(), BackoffPolicy::default());

    let log: EventLog = Arc::new(Mutex::new(Vec::new()));
    let id = supervisor.start(Query::new(), logging_handler(log.clone()));

    let sup_probe = supervisor.clone();
    wait_until(100, move || {
        sup_probe.state(id) == Some(SubscriptionState::Backoff)
    })
    .await;

    supervisor.stop(id);
    assert_eq!(*log.lock().unwrap(), vec!["closed".to_string()]);

    // well past every backoff delay: no reconnect may happen
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(transport.opens(), 1);
}

#[tokio::test(start_paused = true)]
async fn malformed_segments_are_advisory() {
    let transport = MockTransport::new(vec![Script::ServeOpen(vec![
        b"{bad\r\n",
        b"{\"a\":",
        b"1}\r\n",
    ])]);
    let supervisor = Supervisor::new(transport.clone(), BackoffPolicy::default());

    let log: EventLog = Arc::new(Mutex::new(Vec::new()));
    let id = supervisor.start(Query::new(), logging_handler(log.clone()));

    let probe = log.clone();
    wait_until(100, move || probe.lock().unwrap().len() == 2).await;

    let events = log.lock().unwrap().clone();
    assert_eq!(
        events,
        vec!["malformed".to_string(), "record:{\"a\":1}".to_string()]
    );
    // no reconnect was triggered by the bad segment
    assert_eq!(transport.opens(), 1);
    assert_eq!(supervisor.state(id), Some(SubscriptionState::Streaming));

    supervisor.stop(id);
}

#[tokio::test(start_paused = true)]
async fn stop_from_handler_drops_in_flight_records() {
    let transport = MockTransport::new(vec![Script::ServeOpen(vec![
        b"{\"n\":1}\r\n{\"n\":2}\r\n{\"n\":3}\r\n",
    ])]);
    let supervisor = Supervisor::new(transport.clone(), BackoffPolicy::default());

    let log: EventLog = Arc::new(Mutex::new(Vec::new()));
    let id_cell: Arc<Mutex<Option<firehose_client::SubscriptionId>>> =
        Arc::new(Mutex::new(None));

    let sup_inner = supervisor.clone();
    let log_inner = log.clone();
    let cell_inner = id_cell.clone();
    let id = supervisor.start(Query::new(), move |event| {
        let is_record = matches!(event, FeedEvent::Record(_));
        log_inner.lock().unwrap().push(tag_of(&event));
        if is_record {
            if let Some(id) = *cell_inner.lock().unwrap() {
                sup_inner.stop(id);
            }
        }
    });
    *id_cell.lock().unwrap() = Some(id);

    let probe = supervisor.clone();
    wait_until(100, move || probe.active_subscriptions() == 0).await;

    // the stop from inside the handler lands between records of the same
    // chunk: later records are dropped, the sentinel still fires once
    let events = log.lock().unwrap().clone();
    assert_eq!(
        events,
        vec!["record:{\"n\":1}".to_string(), "closed".to_string()]
    );
}

#[tokio::test(start_paused = true)]
async fn stopping_unknown_id_is_a_noop() {
    let transport = MockTransport::new(vec![Script::ServeOpen(vec![])]);
    let supervisor = Supervisor::new(transport.clone(), BackoffPolicy::default());

    let id = supervisor.start(Query::new(), |_| {});
    let probe = transport.clone();
    wait_until(100, move || probe.opens() == 1).await;

    // an id that was never allocated
    supervisor.stop(firehose_client::SubscriptionId(9999));
    assert_eq!(supervisor.active_subscriptions(), 1);

    supervisor.stop(id);
    assert_eq!(supervisor.active_subscriptions(), 0);
}
