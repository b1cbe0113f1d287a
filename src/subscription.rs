//! Self-healing event subscription over the consensus node's websocket.
//!
//! One spawned task owns the connection, the heartbeat and the reconnect
//! timer. Callers get the events on a channel and observe the state through
//! a watch; [`EventSubscription::close`] is the only way to stop it.

use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use chrono::Utc;
use futures::{SinkExt, StreamExt};
use serde_json::json;
use tokio::{
    sync::{mpsc, watch, Mutex},
    task::JoinHandle,
    time::{self, Instant},
};
use tokio_stream::wrappers::ReceiverStream;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

use crate::{
    client::JsonRpcRequest,
    event::{classify, Inbound, ParsedEvent},
    filter::{EventCategory, FilterParams},
    metrics::Metrics,
    Result,
};

const EVENT_BUFFER: usize = 100;

pub type EventStream = ReceiverStream<ParsedEvent>;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubscriptionOptions {
    /// Attach the full inbound envelope to every event.
    pub include_raw: bool,
    pub reconnect_delay: Duration,
    pub heartbeat: Duration,
    /// Give up after this many reconnects. `None` retries forever.
    pub max_reconnects: Option<u32>,
}

impl Default for SubscriptionOptions {
    fn default() -> Self {
        Self {
            include_raw: false,
            reconnect_delay: Duration::from_secs(5),
            heartbeat: Duration::from_secs(30),
            max_reconnects: None,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum State {
    Idle,
    Connecting,
    Subscribed,
    Reconnecting,
    Closed,
}

/// Why a connection ended without a transport error.
#[derive(Clone, Debug, thiserror::Error)]
enum Outcome {
    #[error("Connection closed by the node{}", .0.as_deref().map(|r| format!(": {r}")).unwrap_or_default())]
    Closed(Option<String>),

    #[error("Event consumer went away")]
    ConsumerGone,

    #[error("Teardown requested")]
    Shutdown,
}

pub struct EventSubscription {
    category: EventCategory,
    query: String,
    state: watch::Receiver<State>,
    shutdown: watch::Sender<bool>,
    reconnects: Arc<AtomicU64>,
    task: Mutex<Option<JoinHandle<()>>>,
}

struct Worker {
    url: String,
    category: EventCategory,
    query: String,
    options: SubscriptionOptions,
    events: mpsc::Sender<ParsedEvent>,
    state: watch::Sender<State>,
    shutdown: watch::Receiver<bool>,
    reconnects: Arc<AtomicU64>,
    request_id: AtomicU64,
    metrics: Option<Metrics>,
}

impl EventSubscription {
    /// Resolve the filter and start streaming from `url`.
    ///
    /// The query is built once here and reused for every reconnect.
    pub fn start(
        url: impl Into<String>,
        filter: &FilterParams,
        options: SubscriptionOptions,
        metrics: Option<Metrics>,
    ) -> Result<(Self, EventStream)> {
        let query = filter.build_query()?;

        let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER);
        let (state_tx, state_rx) = watch::channel(State::Idle);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let reconnects = Arc::new(AtomicU64::new(0));

        let worker = Worker {
            url: url.into(),
            category: filter.category,
            query: query.clone(),
            options,
            events: events_tx,
            state: state_tx,
            shutdown: shutdown_rx,
            reconnects: reconnects.clone(),
            request_id: AtomicU64::new(1),
            metrics,
        };

        let task = tokio::spawn(worker.run());

        let subscription = Self {
            category: filter.category,
            query,
            state: state_rx,
            shutdown: shutdown_tx,
            reconnects,
            task: Mutex::new(Some(task)),
        };

        Ok((subscription, ReceiverStream::new(events_rx)))
    }

    pub fn category(&self) -> EventCategory {
        self.category
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn state(&self) -> State {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<State> {
        self.state.clone()
    }

    /// Reconnects scheduled so far.
    pub fn reconnects(&self) -> u64 {
        self.reconnects.load(Ordering::SeqCst)
    }

    /// Stop the engine and wait for it to wind down. Idempotent.
    pub async fn close(&self) {
        self.shutdown.send_replace(true);

        let task = self.task.lock().await.take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                error!("Subscription task failed: {e}");
            }
        }
    }
}

impl Drop for EventSubscription {
    fn drop(&mut self) {
        self.shutdown.send_replace(true);
    }
}

impl Worker {
    async fn run(mut self) {
        let mut attempts: u32 = 0;

        loop {
            if *self.shutdown.borrow() {
                break;
            }

            self.state.send_replace(State::Connecting);
            let result = self.stream().await;
            self.set_connected(false);

            match result {
                Ok(Outcome::Shutdown) => break,
                Ok(Outcome::ConsumerGone) => {
                    info!(query = %self.query, "{}", Outcome::ConsumerGone);
                    break;
                }
                Ok(outcome) => warn!(query = %self.query, "{outcome}"),
                Err(e) => {
                    if let Some(metrics) = &self.metrics {
                        metrics.hubflow_stream_errors(self.category);
                    }

                    error!(query = %self.query, "Event stream failed: {e}");
                }
            }

            if self.options.max_reconnects.is_some_and(|max| attempts >= max) {
                error!(
                    query = %self.query,
                    "Giving up after {attempts} reconnects"
                );
                break;
            }

            attempts += 1;
            self.reconnects.fetch_add(1, Ordering::SeqCst);
            if let Some(metrics) = &self.metrics {
                metrics.hubflow_reconnects(self.category);
            }

            self.state.send_replace(State::Reconnecting);
            info!("Reconnecting in {:?}...", self.options.reconnect_delay);

            tokio::select! {
                _ = time::sleep(self.options.reconnect_delay) => {}
                _ = self.shutdown.changed() => break,
            }
        }

        self.state.send_replace(State::Closed);
        debug!(query = %self.query, "Subscription closed");
    }

    fn next_request_id(&self) -> String {
        let id = self.request_id.fetch_add(1, Ordering::SeqCst);
        format!("hubflow-{id}")
    }

    fn set_connected(&self, connected: bool) {
        if let Some(metrics) = &self.metrics {
            metrics.hubflow_stream_connected(self.category, connected);
        }
    }

    /// One connection: subscribe, then pump messages until it ends.
    async fn stream(&mut self) -> Result<Outcome> {
        info!(url = %self.url, "Connecting to event stream...");

        let (ws, _) = tokio::select! {
            connected = connect_async(self.url.as_str()) => connected?,
            _ = self.shutdown.changed() => return Ok(Outcome::Shutdown),
        };

        let (mut write, mut read) = ws.split();

        let request = JsonRpcRequest::new(
            self.next_request_id(),
            "subscribe",
            json!({ "query": self.query }),
        );
        write
            .send(Message::Text(serde_json::to_string(&request)?))
            .await?;

        self.state.send_replace(State::Subscribed);
        self.set_connected(true);
        info!(query = %self.query, id = %request.id, "Subscribed");

        let period = self.options.heartbeat;
        let mut heartbeat = time::interval_at(Instant::now() + period, period);

        loop {
            tokio::select! {
                _ = self.shutdown.changed() => {
                    let _ = write.send(Message::Close(None)).await;
                    return Ok(Outcome::Shutdown);
                }

                _ = heartbeat.tick() => {
                    debug!("Sending heartbeat");
                    write.send(Message::Ping(Vec::new())).await?;
                }

                message = read.next() => {
                    let message = match message {
                        None => return Ok(Outcome::Closed(None)),
                        Some(message) => message?,
                    };

                    match message {
                        Message::Text(text) => {
                            if let Some(outcome) = self.handle(&text).await {
                                return Ok(outcome);
                            }
                        }
                        Message::Close(frame) => {
                            return Ok(Outcome::Closed(frame.map(|f| f.reason.to_string())));
                        }
                        _ => continue,
                    }
                }
            }
        }
    }

    /// Returns an outcome only when the connection should end.
    async fn handle(&mut self, text: &str) -> Option<Outcome> {
        let inbound = match classify(text, self.category, self.options.include_raw, Utc::now()) {
            Ok(inbound) => inbound,
            Err(e) => {
                if let Some(metrics) = &self.metrics {
                    metrics.hubflow_parse_errors(self.category);
                }

                warn!("Dropping malformed message: {e}");
                return None;
            }
        };

        match inbound {
            Inbound::Ack => debug!(query = %self.query, "Subscription acknowledged"),
            Inbound::Ignored => debug!("Ignoring message without event data"),
            Inbound::Error(e) => {
                if let Some(metrics) = &self.metrics {
                    metrics.hubflow_stream_errors(self.category);
                }

                warn!(code = e.code, "Node reported an error: {}", e.describe());
            }
            Inbound::Event(event) => {
                if let Some(metrics) = &self.metrics {
                    metrics.hubflow_events(self.category);
                }

                tokio::select! {
                    sent = self.events.send(*event) => {
                        if sent.is_err() {
                            return Some(Outcome::ConsumerGone);
                        }
                    }
                    _ = self.shutdown.changed() => return Some(Outcome::Shutdown),
                }
            }
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use std::{
        future::Future,
        sync::atomic::AtomicUsize,
    };

    use serde_json::Value;
    use tokio::net::{TcpListener, TcpStream};
    use tokio_tungstenite::{accept_async, WebSocketStream};

    use super::*;

    type Node = WebSocketStream<TcpStream>;

    const WAIT: Duration = Duration::from_secs(5);

    fn options(reconnect_delay: Duration) -> SubscriptionOptions {
        SubscriptionOptions {
            reconnect_delay,
            ..SubscriptionOptions::default()
        }
    }

    /// Accept websocket connections forever, handing each to `handler`
    /// together with its zero-based connection index.
    async fn fake_node<F, Fut>(handler: F) -> (String, Arc<AtomicUsize>)
    where
        F: Fn(usize, Node) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let accepted = Arc::new(AtomicUsize::new(0));
        let counter = accepted.clone();
        let handler = Arc::new(handler);

        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                let handler = handler.clone();
                tokio::spawn(async move {
                    if let Ok(ws) = accept_async(stream).await {
                        handler(n, ws).await;
                    }
                });
            }
        });

        (format!("ws://{addr}/websocket"), accepted)
    }

    /// Read the subscribe request and acknowledge it, returning its query.
    async fn expect_subscribe(ws: &mut Node) -> String {
        loop {
            match ws.next().await.unwrap().unwrap() {
                Message::Text(text) => {
                    let request: Value = serde_json::from_str(&text).unwrap();
                    assert_eq!(request["method"], "subscribe");
                    assert_eq!(request["jsonrpc"], "2.0");

                    let ack = json!({ "jsonrpc": "2.0", "id": request["id"], "result": {} });
                    ws.send(Message::Text(ack.to_string())).await.unwrap();

                    return request["params"]["query"].as_str().unwrap().to_string();
                }
                _ => continue,
            }
        }
    }

    fn block_event(height: u64) -> Message {
        let frame = json!({
            "jsonrpc": "2.0",
            "id": "hubflow-1",
            "result": {
                "query": "tm.event='NewBlock'",
                "data": {
                    "type": "tendermint/event/NewBlock",
                    "value": { "block": { "header": { "height": height.to_string() } } }
                },
                "events": { "tm.event": ["NewBlock"] }
            }
        });

        Message::Text(frame.to_string())
    }

    async fn hold_open(ws: &mut Node) {
        while let Some(Ok(_)) = ws.next().await {}
    }

    async fn next_event(stream: &mut EventStream) -> ParsedEvent {
        time::timeout(WAIT, stream.next())
            .await
            .expect("timed out waiting for an event")
            .expect("event stream ended")
    }

    fn height(event: &ParsedEvent) -> &str {
        event.data["block"]["header"]["height"].as_str().unwrap()
    }

    #[tokio::test]
    async fn reconnects_and_resubscribes_with_the_same_filter() {
        let queries = Arc::new(std::sync::Mutex::new(Vec::new()));
        let seen = queries.clone();

        let (url, accepted) = fake_node(move |n, mut ws| {
            let seen = seen.clone();
            async move {
                let query = expect_subscribe(&mut ws).await;
                seen.lock().unwrap().push(query);

                ws.send(block_event(n as u64 + 1)).await.unwrap();

                if n == 0 {
                    // Unexpected close right after the first event.
                    let _ = ws.close(None).await;
                } else {
                    hold_open(&mut ws).await;
                }
            }
        })
        .await;

        let filter = FilterParams::new(EventCategory::NewBlock);
        let (subscription, mut events) =
            EventSubscription::start(url, &filter, options(Duration::from_millis(50)), None)
                .unwrap();

        let first = next_event(&mut events).await;
        assert_eq!(height(&first), "1");
        assert_eq!(first.event_type, EventCategory::NewBlock);

        let second = next_event(&mut events).await;
        assert_eq!(height(&second), "2");

        assert_eq!(subscription.reconnects(), 1);
        assert_eq!(accepted.load(Ordering::SeqCst), 2);
        assert_eq!(
            *queries.lock().unwrap(),
            vec!["tm.event='NewBlock'".to_string(), "tm.event='NewBlock'".to_string()]
        );
        assert_eq!(subscription.state(), State::Subscribed);

        subscription.close().await;
        assert_eq!(subscription.state(), State::Closed);
        assert!(time::timeout(WAIT, events.next()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn teardown_during_backoff_cancels_the_reconnect() {
        let (url, accepted) = fake_node(|_, mut ws| async move {
            expect_subscribe(&mut ws).await;
            let _ = ws.close(None).await;
        })
        .await;

        let filter = FilterParams::new(EventCategory::NewTransaction);
        let (subscription, _events) =
            EventSubscription::start(url, &filter, options(Duration::from_secs(10)), None)
                .unwrap();

        let mut state = subscription.watch_state();
        time::timeout(WAIT, state.wait_for(|s| *s == State::Reconnecting))
            .await
            .unwrap()
            .unwrap();

        time::timeout(Duration::from_secs(1), subscription.close())
            .await
            .expect("close must not wait for the backoff");

        assert_eq!(subscription.state(), State::Closed);
        assert_eq!(subscription.reconnects(), 1);

        time::sleep(Duration::from_millis(100)).await;
        assert_eq!(accepted.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn teardown_is_idempotent_and_safe_before_connecting() {
        // Nothing listens on this port once the listener is dropped.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}/websocket", listener.local_addr().unwrap());
        drop(listener);

        let filter = FilterParams::new(EventCategory::NewBlock);
        let (subscription, mut events) =
            EventSubscription::start(url, &filter, options(Duration::from_secs(10)), None)
                .unwrap();

        time::timeout(Duration::from_secs(1), subscription.close())
            .await
            .unwrap();
        time::timeout(Duration::from_secs(1), subscription.close())
            .await
            .unwrap();

        assert_eq!(subscription.state(), State::Closed);
        assert!(events.next().await.is_none());
    }

    #[tokio::test]
    async fn malformed_messages_are_dropped_and_counted() {
        let (url, _) = fake_node(|_, mut ws| async move {
            expect_subscribe(&mut ws).await;
            ws.send(Message::Text("{not json".to_string())).await.unwrap();
            ws.send(Message::Text(
                json!({ "jsonrpc": "2.0", "id": "x", "error": { "code": -32600, "message": "bad" } })
                    .to_string(),
            ))
            .await
            .unwrap();
            ws.send(block_event(7)).await.unwrap();
            hold_open(&mut ws).await;
        })
        .await;

        let (metrics, registry) = Metrics::new().unwrap();
        let filter = FilterParams::new(EventCategory::NewBlock);
        let (subscription, mut events) = EventSubscription::start(
            url,
            &filter,
            options(Duration::from_millis(50)),
            Some(metrics),
        )
        .unwrap();

        let event = next_event(&mut events).await;
        assert_eq!(height(&event), "7");
        assert_eq!(subscription.reconnects(), 0);

        let text = crate::metrics::get_metrics(axum::extract::State(registry))
            .await
            .unwrap();
        assert!(text.contains("hubflow_parse_errors{category=\"newBlock\"} 1"));
        assert!(text.contains("hubflow_stream_errors{category=\"newBlock\"} 1"));
        assert!(text.contains("hubflow_events{category=\"newBlock\"} 1"));

        subscription.close().await;
    }

    #[tokio::test]
    async fn sends_heartbeat_pings() {
        let pinged = Arc::new(AtomicUsize::new(0));
        let pings = pinged.clone();

        let (url, _) = fake_node(move |_, mut ws| {
            let pings = pings.clone();
            async move {
                expect_subscribe(&mut ws).await;
                while let Some(Ok(message)) = ws.next().await {
                    if let Message::Ping(_) = message {
                        pings.fetch_add(1, Ordering::SeqCst);
                    }
                }
            }
        })
        .await;

        let filter = FilterParams::new(EventCategory::NewBlock);
        let options = SubscriptionOptions {
            heartbeat: Duration::from_millis(30),
            ..SubscriptionOptions::default()
        };
        let (subscription, _events) = EventSubscription::start(url, &filter, options, None).unwrap();

        time::sleep(Duration::from_millis(200)).await;
        assert!(pinged.load(Ordering::SeqCst) >= 2);

        subscription.close().await;
    }

    #[tokio::test]
    async fn reconnect_cap_ends_the_stream() {
        let (url, accepted) = fake_node(|_, mut ws| async move {
            expect_subscribe(&mut ws).await;
            let _ = ws.close(None).await;
        })
        .await;

        let filter = FilterParams::new(EventCategory::NewBlock);
        let options = SubscriptionOptions {
            reconnect_delay: Duration::from_millis(10),
            max_reconnects: Some(2),
            ..SubscriptionOptions::default()
        };
        let (subscription, mut events) = EventSubscription::start(url, &filter, options, None).unwrap();

        assert!(time::timeout(WAIT, events.next()).await.unwrap().is_none());
        assert_eq!(subscription.state(), State::Closed);
        assert_eq!(subscription.reconnects(), 2);
        assert_eq!(accepted.load(Ordering::SeqCst), 3);

        subscription.close().await;
    }

    #[test]
    fn invalid_filters_fail_before_connecting() {
        let filter = FilterParams::new(EventCategory::TransferSent);
        let result = EventSubscription::start(
            "ws://127.0.0.1:1/websocket",
            &filter,
            SubscriptionOptions::default(),
            None,
        );

        assert!(matches!(result, Err(crate::Error::InvalidFilter(_))));
    }
}
