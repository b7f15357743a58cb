//! WebSocket client for OMTrader real-time events with auto-reconnection
//!
//! The client hands all transport ownership to a background connection task
//! fed by a command channel: `connect`/`send`/`close` return immediately and
//! completion is observed via [`ConnectionState`] or subscriber callbacks.

use crate::config::{ConfigError, Credentials, DEFAULT_WS_HOST, WS_HOST_ENV};
use crate::ws::events::{classify_frame, EventType, InboundFrame, WsMessage, HEARTBEAT_PING};
use crate::ws::queue::OutboundQueue;
use crate::ws::registry::{EventCallback, SubscriptionRegistry};
use crate::ws::state::{ConnectionInfo, ConnectionState};
use crate::ws::transport::{Connector, Transport, TungsteniteConnector};
use backoff::{backoff::Backoff, ExponentialBackoff};
use chrono::Utc;
use serde_json::Value;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use url::Url;

#[derive(Error, Debug)]
pub enum WsError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),
    #[error("Connection task is no longer running")]
    TaskGone,
}

/// Handler for the `"s,"` profit-update shorthand frames. Receives the raw
/// payload after the prefix; this path bypasses the generic dispatch.
pub type ProfitHandler = dyn Fn(&str) + Send + Sync;

/// WebSocket client configuration
#[derive(Debug, Clone)]
pub struct WsConfig {
    /// WebSocket host, e.g. `wss://api.omtrader.io`
    pub ws_host: String,
    /// Endpoint path appended to the host
    pub path: String,
    /// Heartbeat ping interval
    pub heartbeat_interval: Duration,
    /// Reconnect attempts before giving up and entering `Failed`
    pub max_reconnect_attempts: u32,
    /// Initial reconnection delay
    pub initial_reconnect_delay: Duration,
    /// Maximum reconnection delay
    pub max_reconnect_delay: Duration,
    /// Outbound queue bound; the oldest message is dropped when full
    pub max_queue_size: usize,
}

impl Default for WsConfig {
    fn default() -> Self {
        Self {
            ws_host: DEFAULT_WS_HOST.to_string(),
            path: "/ws/v1".to_string(),
            heartbeat_interval: Duration::from_secs(30),
            max_reconnect_attempts: 5,
            initial_reconnect_delay: Duration::from_millis(1000),
            max_reconnect_delay: Duration::from_millis(30000),
            max_queue_size: 1024,
        }
    }
}

impl WsConfig {
    /// Default configuration with the host taken from `OMTRADER_WS_HOST`
    /// when set
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        let mut config = Self::default();
        if let Ok(host) = std::env::var(WS_HOST_ENV) {
            if !host.is_empty() {
                config.ws_host = host;
            }
        }
        config
    }
}

/// Commands sent to the connection task
enum WsCommand {
    Connect,
    Send(WsMessage),
    Close,
}

/// State shared between the caller-facing handle and the connection task
struct Shared {
    registry: SubscriptionRegistry,
    info: Mutex<ConnectionInfo>,
    profit_handler: Mutex<Option<Arc<ProfitHandler>>>,
}

impl Shared {
    fn lock_info(&self) -> std::sync::MutexGuard<'_, ConnectionInfo> {
        self.info.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn state(&self) -> ConnectionState {
        self.lock_info().state
    }

    fn set_state(&self, state: ConnectionState) {
        let mut info = self.lock_info();
        if info.state != state {
            debug!(from = %info.state, to = %state, "Connection state changed");
            info.state = state;
        }
    }
}

/// WebSocket client for OMTrader real-time data.
///
/// ```no_run
/// use omtrader::config::Credentials;
/// use omtrader::ws::{EventType, WsClient, WsConfig};
/// use std::sync::Arc;
///
/// # fn main() -> Result<(), omtrader::ws::WsError> {
/// # let rt = tokio::runtime::Runtime::new().unwrap();
/// # let _guard = rt.enter();
/// let credentials = Credentials::new("session-id", "access-token")?;
/// let client = WsClient::new(WsConfig::from_env(), credentials)?;
///
/// client.subscribe(
///     EventType::OrdersUpdate,
///     Arc::new(|data| println!("Order update: {:?}", data)),
/// );
/// client.connect()?;
/// client.send(EventType::MarketSubscribeSymbol, Some(1.into()))?;
/// # Ok(())
/// # }
/// ```
pub struct WsClient {
    command_tx: mpsc::UnboundedSender<WsCommand>,
    shared: Arc<Shared>,
}

impl WsClient {
    /// Create a client. Fails synchronously on missing/empty credentials or
    /// an unparseable host; never touches the network.
    pub fn new(config: WsConfig, credentials: Credentials) -> Result<Self, WsError> {
        Self::with_connector(config, credentials, Arc::new(TungsteniteConnector))
    }

    /// Create a client with a custom [`Connector`]. Used by tests to drive
    /// the connection with an in-memory transport.
    pub fn with_connector(
        config: WsConfig,
        credentials: Credentials,
        connector: Arc<dyn Connector>,
    ) -> Result<Self, WsError> {
        let url = build_connect_url(&config, &credentials)?;

        let mut info = ConnectionInfo::new(config.max_reconnect_attempts);
        info.url = url.clone();
        info.session_id = Some(credentials.session_id);
        info.access_token = Some(credentials.access_token);

        let shared = Arc::new(Shared {
            registry: SubscriptionRegistry::new(),
            info: Mutex::new(info),
            profit_handler: Mutex::new(None),
        });

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let queue = OutboundQueue::new(config.max_queue_size);
        let task = ConnectionTask {
            config,
            url,
            connector,
            command_rx,
            shared: shared.clone(),
            queue,
            reconnect_required: false,
        };
        tokio::spawn(task.run());

        Ok(Self { command_tx, shared })
    }

    /// Initiate the connection. Returns immediately; progress is observable
    /// via [`WsClient::state`]. A no-op when already connecting/connected.
    /// Valid from `Failed` as an explicit retry request.
    pub fn connect(&self) -> Result<(), WsError> {
        self.command(WsCommand::Connect)
    }

    /// Send an event envelope `{type, data}`. Transmitted immediately while
    /// connected; otherwise queued and flushed in FIFO order on (re)connect.
    pub fn send(&self, event_type: EventType, data: Option<Value>) -> Result<(), WsError> {
        self.command(WsCommand::Send(WsMessage::new(event_type, data)))
    }

    /// Register a callback for an event type. Valid in any state; callbacks
    /// registered before connecting are honored once events flow.
    pub fn subscribe(&self, event_type: EventType, callback: Arc<EventCallback>) {
        self.shared.registry.subscribe(event_type, callback);
    }

    /// Remove a previously registered callback (by `Arc` identity). A no-op
    /// when the callback was never registered.
    pub fn unsubscribe(&self, event_type: EventType, callback: &Arc<EventCallback>) {
        self.shared.registry.unsubscribe(event_type, callback);
    }

    /// Install the dedicated handler for profit-update shorthand frames
    pub fn on_profit_update(&self, handler: Arc<ProfitHandler>) {
        *self
            .shared
            .profit_handler
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(handler);
    }

    /// Close the connection and suppress auto-reconnect
    pub fn close(&self) -> Result<(), WsError> {
        self.command(WsCommand::Close)
    }

    /// Current lifecycle state
    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    /// Snapshot of the connection info
    pub fn connection_info(&self) -> ConnectionInfo {
        self.shared.lock_info().clone()
    }

    fn command(&self, command: WsCommand) -> Result<(), WsError> {
        self.command_tx
            .send(command)
            .map_err(|_| WsError::TaskGone)
    }
}

/// Build the connection URL: host + path + query-style credentials
fn build_connect_url(config: &WsConfig, credentials: &Credentials) -> Result<String, WsError> {
    let mut url = Url::parse(&config.ws_host)?;
    url.set_path(&config.path);
    url.query_pairs_mut()
        .append_pair("session_id", &credentials.session_id)
        .append_pair("access_token", &credentials.access_token);
    Ok(url.to_string())
}

/// How a connected session ended
enum SessionEnd {
    /// Intentional `close()`, or a clean server close with no prior error
    Closed,
    /// Transport error: reconnect is required
    Dropped,
    /// The client handle was dropped
    Shutdown,
}

enum RetryWait {
    Retry,
    Abort,
    Shutdown,
}

/// Background task owning the transport. Exactly one live transport exists
/// at any time; all state mutations happen here.
struct ConnectionTask {
    config: WsConfig,
    url: String,
    connector: Arc<dyn Connector>,
    command_rx: mpsc::UnboundedReceiver<WsCommand>,
    shared: Arc<Shared>,
    queue: OutboundQueue,
    reconnect_required: bool,
}

impl ConnectionTask {
    async fn run(mut self) {
        // Idle loop: disconnected, waiting for commands
        loop {
            match self.command_rx.recv().await {
                None => break,
                Some(WsCommand::Close) => {
                    self.reconnect_required = false;
                }
                Some(WsCommand::Send(message)) => {
                    debug!(event_type = %message.event_type, "Not connected, queueing message");
                    self.queue.push(message);
                }
                Some(WsCommand::Connect) => {
                    if self.connect_and_serve().await {
                        break;
                    }
                }
            }
        }
        info!("WebSocket client task stopped");
    }

    /// Dial and run sessions, reconnecting with bounded exponential backoff,
    /// until the connection is intentionally closed, retries are exhausted,
    /// or the client handle is dropped. Returns true on shutdown.
    async fn connect_and_serve(&mut self) -> bool {
        self.shared.lock_info().reconnect_attempts = 0;
        self.shared.set_state(ConnectionState::Connecting);

        let mut backoff = ExponentialBackoff {
            initial_interval: self.config.initial_reconnect_delay,
            max_interval: self.config.max_reconnect_delay,
            max_elapsed_time: None,
            ..Default::default()
        };

        loop {
            info!(host = %self.config.ws_host, "Connecting to WebSocket");
            match self.connector.connect(&self.url).await {
                Ok(transport) => {
                    backoff.reset();
                    {
                        let mut info = self.shared.lock_info();
                        info.reconnect_attempts = 0;
                        info.state = ConnectionState::Connected;
                    }
                    info!("WebSocket connection established");

                    match self.session(transport).await {
                        SessionEnd::Closed => {
                            self.shared.set_state(ConnectionState::Disconnected);
                            return false;
                        }
                        SessionEnd::Shutdown => {
                            self.shared.set_state(ConnectionState::Disconnected);
                            return true;
                        }
                        SessionEnd::Dropped => {
                            self.shared.set_state(ConnectionState::Disconnected);
                        }
                    }
                }
                Err(e) if e.is_rejection() => {
                    // The endpoint refused the handshake: credential-type
                    // failure, retrying cannot help
                    error!(error = %e, "WebSocket endpoint rejected the connection");
                    self.shared.set_state(ConnectionState::Failed);
                    return false;
                }
                Err(e) => {
                    error!(error = %e, "WebSocket connection failed");
                }
            }

            let attempts = {
                let mut info = self.shared.lock_info();
                info.reconnect_attempts += 1;
                info.reconnect_attempts
            };
            if attempts > self.config.max_reconnect_attempts {
                error!(
                    max_attempts = self.config.max_reconnect_attempts,
                    "Maximum reconnection attempts reached"
                );
                self.shared.set_state(ConnectionState::Failed);
                return false;
            }

            self.shared.set_state(ConnectionState::Reconnecting);
            let delay = backoff
                .next_backoff()
                .unwrap_or(self.config.max_reconnect_delay);
            warn!(delay_ms = delay.as_millis() as u64, attempt = attempts, "Reconnecting");
            match self.wait_before_retry(delay).await {
                RetryWait::Retry => {}
                RetryWait::Abort => return false,
                RetryWait::Shutdown => return true,
            }
        }
    }

    /// Sleep the backoff delay while still servicing commands
    async fn wait_before_retry(&mut self, delay: Duration) -> RetryWait {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                _ = &mut sleep => return RetryWait::Retry,
                command = self.command_rx.recv() => match command {
                    None => return RetryWait::Shutdown,
                    Some(WsCommand::Close) => {
                        info!("Close requested during reconnect backoff");
                        self.reconnect_required = false;
                        self.shared.set_state(ConnectionState::Disconnected);
                        return RetryWait::Abort;
                    }
                    Some(WsCommand::Send(message)) => self.queue.push(message),
                    Some(WsCommand::Connect) => {
                        debug!("Already reconnecting, ignoring connect request");
                    }
                }
            }
        }
    }

    /// Run one connected session: flush the queue, then multiplex inbound
    /// frames, caller commands, and the heartbeat timer
    async fn session(&mut self, mut transport: Box<dyn Transport>) -> SessionEnd {
        self.reconnect_required = false;
        self.flush_queue(transport.as_mut()).await;

        let first_tick = tokio::time::Instant::now() + self.config.heartbeat_interval;
        let mut heartbeat = tokio::time::interval_at(first_tick, self.config.heartbeat_interval);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                frame = transport.next_text() => match frame {
                    Some(Ok(text)) => self.handle_frame(&text),
                    Some(Err(e)) => {
                        error!(error = %e, "WebSocket error");
                        // The close that follows performs the transition
                        self.reconnect_required = true;
                    }
                    None => {
                        info!("WebSocket closed");
                        return if self.reconnect_required {
                            SessionEnd::Dropped
                        } else {
                            SessionEnd::Closed
                        };
                    }
                },
                command = self.command_rx.recv() => match command {
                    Some(WsCommand::Connect) => {
                        debug!("Already connected, ignoring connect request");
                    }
                    Some(WsCommand::Send(message)) => {
                        self.transmit_or_queue(message, transport.as_mut()).await;
                    }
                    Some(WsCommand::Close) => {
                        info!("Close requested");
                        // Clearing the flag before closing the transport is
                        // what prevents the close from re-triggering connect
                        self.reconnect_required = false;
                        transport.close().await;
                        return SessionEnd::Closed;
                    }
                    None => {
                        self.reconnect_required = false;
                        transport.close().await;
                        return SessionEnd::Shutdown;
                    }
                },
                _ = heartbeat.tick() => {
                    if let Err(e) = transport.send_text(HEARTBEAT_PING.to_string()).await {
                        error!(error = %e, "Heartbeat send failed");
                        self.reconnect_required = true;
                        return SessionEnd::Dropped;
                    }
                    self.shared.lock_info().last_ping = Some(Utc::now());
                    debug!("Heartbeat ping sent");
                }
            }
        }
    }

    /// Decode one inbound frame. Never fatal: malformed frames are logged
    /// and dropped, unknown tags dispatch to nobody.
    fn handle_frame(&self, text: &str) {
        match classify_frame(text) {
            Ok(InboundFrame::HeartbeatAck) => {
                self.shared.lock_info().last_pong = Some(Utc::now());
                debug!("Heartbeat acknowledged");
            }
            Ok(InboundFrame::ProfitUpdate(payload)) => {
                let handler = self
                    .shared
                    .profit_handler
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .clone();
                match handler {
                    Some(handler) => {
                        if catch_unwind(AssertUnwindSafe(|| handler(&payload))).is_err() {
                            error!("Profit update handler panicked");
                        }
                    }
                    None => debug!("No profit update handler registered"),
                }
            }
            Ok(InboundFrame::Event { event_type, data }) => {
                let invoked = self.shared.registry.dispatch(&event_type, data.as_ref());
                debug!(event_type = %event_type, subscribers = invoked, "Dispatched event");
            }
            Err(e) => {
                error!(error = %e, raw = %text, "Failed to parse message");
            }
        }
    }

    /// Transmit immediately, falling back to the queue on failure
    async fn transmit_or_queue(&mut self, message: WsMessage, transport: &mut dyn Transport) {
        match serde_json::to_string(&message) {
            Ok(json) => {
                if let Err(e) = transport.send_text(json).await {
                    error!(
                        error = %e,
                        event_type = %message.event_type,
                        "Error sending message, queueing for retry"
                    );
                    self.queue.push(message);
                }
            }
            Err(e) => error!(error = %e, "Failed to serialize message"),
        }
    }

    /// Drain the queue head-first. A failed transmission restores the item
    /// to the head and stops; the partial flush is retried on reconnect.
    async fn flush_queue(&mut self, transport: &mut dyn Transport) {
        let mut flushed = 0usize;
        while let Some(message) = self.queue.pop_front() {
            let json = match serde_json::to_string(&message) {
                Ok(json) => json,
                Err(e) => {
                    error!(error = %e, "Dropping unserializable queued message");
                    continue;
                }
            };
            if let Err(e) = transport.send_text(json).await {
                error!(error = %e, "Error sending queued message");
                self.queue.restore_front(message);
                break;
            }
            flushed += 1;
        }
        if flushed > 0 {
            debug!(flushed, remaining = self.queue.len(), "Outbound queue flushed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ws::transport::TransportError;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;
    use tokio_tungstenite::tungstenite::Error as TungsteniteError;

    struct MockTransport {
        outbound_tx: mpsc::UnboundedSender<String>,
        inbound_rx: mpsc::UnboundedReceiver<Result<String, TransportError>>,
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
            self.outbound_tx
                .send(text)
                .map_err(|_| TransportError::Connection(TungsteniteError::ConnectionClosed))
        }

        async fn next_text(&mut self) -> Option<Result<String, TransportError>> {
            self.inbound_rx.recv().await
        }

        async fn close(&mut self) {
            self.inbound_rx.close();
        }
    }

    /// Test-side handle simulating the server
    struct ServerHandle {
        inbound_tx: mpsc::UnboundedSender<Result<String, TransportError>>,
        outbound_rx: mpsc::UnboundedReceiver<String>,
    }

    fn mock_pair() -> (MockTransport, ServerHandle) {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        (
            MockTransport {
                outbound_tx,
                inbound_rx,
            },
            ServerHandle {
                inbound_tx,
                outbound_rx,
            },
        )
    }

    /// Hands out prepared transports in order; dials fail once exhausted
    struct MockConnector {
        transports: StdMutex<VecDeque<MockTransport>>,
        connects: AtomicUsize,
    }

    impl MockConnector {
        fn with(transports: Vec<MockTransport>) -> Arc<Self> {
            Arc::new(Self {
                transports: StdMutex::new(transports.into()),
                connects: AtomicUsize::new(0),
            })
        }

        fn connect_count(&self) -> usize {
            self.connects.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Connector for MockConnector {
        async fn connect(&self, _url: &str) -> Result<Box<dyn Transport>, TransportError> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            match self.transports.lock().unwrap().pop_front() {
                Some(transport) => Ok(Box::new(transport)),
                None => Err(TransportError::Connection(
                    TungsteniteError::ConnectionClosed,
                )),
            }
        }
    }

    struct RejectingConnector {
        connects: AtomicUsize,
    }

    #[async_trait]
    impl Connector for RejectingConnector {
        async fn connect(&self, _url: &str) -> Result<Box<dyn Transport>, TransportError> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            Err(TransportError::Rejected(401))
        }
    }

    fn test_config() -> WsConfig {
        WsConfig {
            ws_host: "wss://example.test".to_string(),
            path: "/ws/v1".to_string(),
            heartbeat_interval: Duration::from_secs(30),
            max_reconnect_attempts: 2,
            initial_reconnect_delay: Duration::from_millis(10),
            max_reconnect_delay: Duration::from_millis(50),
            max_queue_size: 16,
        }
    }

    fn test_credentials() -> Credentials {
        Credentials::new("session-1", "token-1").unwrap()
    }

    async fn wait_for_state(client: &WsClient, state: ConnectionState) {
        for _ in 0..200 {
            if client.state() == state {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!(
            "timed out waiting for state {}, currently {}",
            state,
            client.state()
        );
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        for _ in 0..200 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("timed out waiting for condition");
    }

    async fn recv_frame(handle: &mut ServerHandle) -> String {
        tokio::time::timeout(Duration::from_secs(2), handle.outbound_rx.recv())
            .await
            .expect("timed out waiting for outbound frame")
            .expect("transport dropped")
    }

    #[test]
    fn test_connect_url_contains_credentials() {
        let url = build_connect_url(&test_config(), &test_credentials()).unwrap();
        assert_eq!(
            url,
            "wss://example.test/ws/v1?session_id=session-1&access_token=token-1"
        );
    }

    #[tokio::test]
    async fn test_send_before_connect_queues_then_flushes_in_order() {
        let (transport, mut handle) = mock_pair();
        let connector = MockConnector::with(vec![transport]);
        let client =
            WsClient::with_connector(test_config(), test_credentials(), connector).unwrap();

        client
            .send(EventType::MarketSubscribeSymbol, Some(json!(1)))
            .unwrap();
        client.send(EventType::StartAccountAll, None).unwrap();
        assert_eq!(client.state(), ConnectionState::Disconnected);

        client.connect().unwrap();
        wait_for_state(&client, ConnectionState::Connected).await;

        assert_eq!(
            recv_frame(&mut handle).await,
            r#"{"type":"market_subscribe_symbol","data":1}"#
        );
        assert_eq!(
            recv_frame(&mut handle).await,
            r#"{"type":"start_account_all","data":null}"#
        );

        // A send issued after the flush goes out after the queued items
        client.send(EventType::StopAccountAll, None).unwrap();
        assert_eq!(
            recv_frame(&mut handle).await,
            r#"{"type":"stop_account_all","data":null}"#
        );
    }

    #[tokio::test]
    async fn test_positions_close_dispatches_to_subscriber() {
        let (transport, handle) = mock_pair();
        let connector = MockConnector::with(vec![transport]);
        let client =
            WsClient::with_connector(test_config(), test_credentials(), connector).unwrap();

        let received = Arc::new(StdMutex::new(Vec::new()));
        let received_clone = received.clone();
        client.subscribe(
            EventType::PositionsClose,
            Arc::new(move |data| {
                received_clone.lock().unwrap().push(data.cloned());
            }),
        );

        client.connect().unwrap();
        wait_for_state(&client, ConnectionState::Connected).await;

        handle
            .inbound_tx
            .send(Ok(
                r#"{"type":"positions_close","data":{"position_id":"7"}}"#.to_string()
            ))
            .unwrap();

        wait_until(|| received.lock().unwrap().len() == 1).await;
        assert_eq!(
            *received.lock().unwrap(),
            vec![Some(json!({"position_id": "7"}))]
        );
    }

    #[tokio::test]
    async fn test_heartbeat_ack_triggers_no_dispatch() {
        let (transport, handle) = mock_pair();
        let connector = MockConnector::with(vec![transport]);
        let client =
            WsClient::with_connector(test_config(), test_credentials(), connector).unwrap();

        let received = Arc::new(StdMutex::new(Vec::new()));
        for event_type in [EventType::Pong, EventType::Info, EventType::OrdersUpdate] {
            let received_clone = received.clone();
            client.subscribe(
                event_type,
                Arc::new(move |data| {
                    received_clone.lock().unwrap().push(data.cloned());
                }),
            );
        }

        client.connect().unwrap();
        wait_for_state(&client, ConnectionState::Connected).await;

        handle.inbound_tx.send(Ok("10".to_string())).unwrap();
        // Marker event proves the ack was processed before we assert
        handle
            .inbound_tx
            .send(Ok(r#"{"type":"info","data":"marker"}"#.to_string()))
            .unwrap();

        wait_until(|| !received.lock().unwrap().is_empty()).await;
        assert_eq!(*received.lock().unwrap(), vec![Some(json!("marker"))]);
        assert!(client.connection_info().last_pong.is_some());
    }

    #[tokio::test]
    async fn test_malformed_json_is_dropped_not_fatal() {
        let (transport, handle) = mock_pair();
        let connector = MockConnector::with(vec![transport]);
        let client =
            WsClient::with_connector(test_config(), test_credentials(), connector).unwrap();

        let received = Arc::new(StdMutex::new(Vec::new()));
        let received_clone = received.clone();
        client.subscribe(
            EventType::OrdersUpdate,
            Arc::new(move |data| {
                received_clone.lock().unwrap().push(data.cloned());
            }),
        );

        client.connect().unwrap();
        wait_for_state(&client, ConnectionState::Connected).await;

        handle.inbound_tx.send(Ok("{not json".to_string())).unwrap();
        handle
            .inbound_tx
            .send(Ok(r#"{"type":"orders_update","data":{"id":42}}"#.to_string()))
            .unwrap();

        wait_until(|| !received.lock().unwrap().is_empty()).await;
        assert_eq!(*received.lock().unwrap(), vec![Some(json!({"id": 42}))]);
        assert_eq!(client.state(), ConnectionState::Connected);
    }

    #[tokio::test]
    async fn test_profit_update_routed_to_dedicated_handler() {
        let (transport, handle) = mock_pair();
        let connector = MockConnector::with(vec![transport]);
        let client =
            WsClient::with_connector(test_config(), test_credentials(), connector).unwrap();

        let profits = Arc::new(StdMutex::new(Vec::new()));
        let profits_clone = profits.clone();
        client.on_profit_update(Arc::new(move |payload| {
            profits_clone.lock().unwrap().push(payload.to_string());
        }));

        let dispatched = Arc::new(StdMutex::new(0usize));
        let dispatched_clone = dispatched.clone();
        client.subscribe(
            EventType::PositionsUpdate,
            Arc::new(move |_| {
                *dispatched_clone.lock().unwrap() += 1;
            }),
        );

        client.connect().unwrap();
        wait_for_state(&client, ConnectionState::Connected).await;

        handle.inbound_tx.send(Ok("s,7,12.5".to_string())).unwrap();

        wait_until(|| !profits.lock().unwrap().is_empty()).await;
        assert_eq!(*profits.lock().unwrap(), vec!["7,12.5".to_string()]);
        assert_eq!(*dispatched.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_heartbeat_sends_ping_token() {
        let (transport, mut handle) = mock_pair();
        let connector = MockConnector::with(vec![transport]);
        let mut config = test_config();
        config.heartbeat_interval = Duration::from_millis(50);
        let client = WsClient::with_connector(config, test_credentials(), connector).unwrap();

        client.connect().unwrap();
        wait_for_state(&client, ConnectionState::Connected).await;

        assert_eq!(recv_frame(&mut handle).await, "9");
        wait_until(|| client.connection_info().last_ping.is_some()).await;
    }

    #[tokio::test]
    async fn test_close_suppresses_reconnect() {
        let (transport, handle) = mock_pair();
        let connector = MockConnector::with(vec![transport]);
        let client = WsClient::with_connector(
            test_config(),
            test_credentials(),
            connector.clone(),
        )
        .unwrap();

        client.connect().unwrap();
        wait_for_state(&client, ConnectionState::Connected).await;

        client.close().unwrap();
        wait_for_state(&client, ConnectionState::Disconnected).await;

        // A subsequent close event from the transport must not retrigger
        // a connection attempt
        drop(handle.inbound_tx);
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(client.state(), ConnectionState::Disconnected);
        assert_eq!(connector.connect_count(), 1);
    }

    #[tokio::test]
    async fn test_reconnects_after_transport_error() {
        let (transport1, handle1) = mock_pair();
        let (transport2, _handle2) = mock_pair();
        let connector = MockConnector::with(vec![transport1, transport2]);
        let client = WsClient::with_connector(
            test_config(),
            test_credentials(),
            connector.clone(),
        )
        .unwrap();

        client.connect().unwrap();
        wait_for_state(&client, ConnectionState::Connected).await;

        handle1
            .inbound_tx
            .send(Err(TransportError::Connection(
                TungsteniteError::ConnectionClosed,
            )))
            .unwrap();
        drop(handle1.inbound_tx);

        wait_until(|| connector.connect_count() == 2).await;
        wait_for_state(&client, ConnectionState::Connected).await;
    }

    #[tokio::test]
    async fn test_reconnect_exhaustion_transitions_to_failed() {
        let (transport, handle) = mock_pair();
        let connector = MockConnector::with(vec![transport]);
        let client = WsClient::with_connector(
            test_config(),
            test_credentials(),
            connector.clone(),
        )
        .unwrap();

        client.connect().unwrap();
        wait_for_state(&client, ConnectionState::Connected).await;

        handle
            .inbound_tx
            .send(Err(TransportError::Connection(
                TungsteniteError::ConnectionClosed,
            )))
            .unwrap();
        drop(handle.inbound_tx);

        wait_for_state(&client, ConnectionState::Failed).await;
        // Initial dial plus max_reconnect_attempts retries
        assert_eq!(connector.connect_count(), 3);
    }

    #[tokio::test]
    async fn test_rejected_handshake_fails_without_retry() {
        let connector = Arc::new(RejectingConnector {
            connects: AtomicUsize::new(0),
        });
        let client = WsClient::with_connector(
            test_config(),
            test_credentials(),
            connector.clone(),
        )
        .unwrap();

        client.connect().unwrap();
        wait_for_state(&client, ConnectionState::Failed).await;
        assert_eq!(connector.connects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_connect_when_connected_is_noop() {
        let (transport, _handle) = mock_pair();
        let connector = MockConnector::with(vec![transport]);
        let client = WsClient::with_connector(
            test_config(),
            test_credentials(),
            connector.clone(),
        )
        .unwrap();

        client.connect().unwrap();
        wait_for_state(&client, ConnectionState::Connected).await;

        client.connect().unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(client.state(), ConnectionState::Connected);
        assert_eq!(connector.connect_count(), 1);
    }

    #[tokio::test]
    async fn test_send_failure_falls_back_to_queue() {
        let (transport1, handle1) = mock_pair();
        let (transport2, mut handle2) = mock_pair();
        // Dropping the receiving side makes every send on transport1 fail
        drop(handle1.outbound_rx);
        let connector = MockConnector::with(vec![transport1, transport2]);
        let client =
            WsClient::with_connector(test_config(), test_credentials(), connector).unwrap();

        client.connect().unwrap();
        wait_for_state(&client, ConnectionState::Connected).await;

        client
            .send(EventType::OrdersPlace, Some(json!({"symbol_id": 1})))
            .unwrap();

        // Clean server close: no auto-reconnect, message stays queued
        drop(handle1.inbound_tx);
        wait_for_state(&client, ConnectionState::Disconnected).await;

        client.connect().unwrap();
        wait_for_state(&client, ConnectionState::Connected).await;

        assert_eq!(
            recv_frame(&mut handle2).await,
            r#"{"type":"orders_place","data":{"symbol_id":1}}"#
        );
    }
}
