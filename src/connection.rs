use crate::config::TransportConfig;
use crate::error::Error;
use crate::handler::{lifecycle, EventHandler};
use crate::health::HealthMonitor;
use crate::transport::{Connection, Transport};
use futures_util::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Notify};
use tokio::time::{timeout, Duration};
use tokio_tungstenite::{
    client_async_tls_with_config, tungstenite::client::IntoClientRequest, tungstenite::Message,
    Connector, MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, error, info, trace, warn};

/// Source of `[CONN-n]` log identifiers
static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Wire representation of one event: `{"event": name, "data": payload}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct Envelope {
    pub event: String,
    #[serde(default)]
    pub data: Value,
}

pub(crate) fn encode_event(event: &str, data: Value) -> Result<String, Error> {
    let envelope = Envelope {
        event: event.to_string(),
        data,
    };
    Ok(serde_json::to_string(&envelope)?)
}

pub(crate) fn decode_event(text: &str) -> Result<Envelope, Error> {
    Ok(serde_json::from_str(text)?)
}

/// Why a connection ended; sent as the `disconnect` payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// Server sent a close frame
    ServerClose,
    /// Closed locally via `close()` or by dropping the handle
    ClientClose,
    /// Stream ended without a close frame
    TransportClose,
    /// Connect failure or protocol error
    TransportError,
    /// Too many pongs missed
    PingTimeout,
}

impl DisconnectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DisconnectReason::ServerClose => "io server disconnect",
            DisconnectReason::ClientClose => "io client disconnect",
            DisconnectReason::TransportClose => "transport close",
            DisconnectReason::TransportError => "transport error",
            DisconnectReason::PingTimeout => "ping timeout",
        }
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// WebSocket transport carrying JSON event envelopes.
///
/// Each [`WsConnection`] it creates runs its own driver task once opened, so
/// `open()` must be called from within a tokio runtime.
#[derive(Debug, Clone)]
pub struct WsTransport {
    config: Arc<TransportConfig>,
}

impl WsTransport {
    pub fn new(config: TransportConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }
}

impl Transport for WsTransport {
    type Connection = WsConnection;

    fn create(&self) -> WsConnection {
        WsConnection::new(self.config.clone())
    }
}

/// State shared between a connection handle and its driver
struct Shared {
    handlers: RwLock<HashMap<String, EventHandler>>,
    connected: AtomicBool,
    /// Close request; holds a permit until the driver observes it
    close: Notify,
}

impl Shared {
    /// Invoke the handler bound to `event`, isolating panics
    fn dispatch(&self, id: u64, event: &str, payload: Value) {
        let handler = self.handlers.read().get(event).cloned();
        let Some(handler) = handler else {
            trace!("[CONN-{}] No handler for '{}'", id, event);
            return;
        };

        if std::panic::catch_unwind(AssertUnwindSafe(|| handler(payload))).is_err() {
            error!("[CONN-{}] Handler for '{}' panicked, event dropped", id, event);
        }
    }
}

/// A single WebSocket connection
pub struct WsConnection {
    id: u64,
    config: Arc<TransportConfig>,
    shared: Arc<Shared>,
    outbound_tx: mpsc::Sender<Message>,
    /// Taken by the driver on `open()`
    outbound_rx: Mutex<Option<mpsc::Receiver<Message>>>,
}

impl WsConnection {
    fn new(config: Arc<TransportConfig>) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::channel(config.command_buffer);
        Self {
            id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
            config,
            shared: Arc::new(Shared {
                handlers: RwLock::new(HashMap::new()),
                connected: AtomicBool::new(false),
                close: Notify::new(),
            }),
            outbound_tx,
            outbound_rx: Mutex::new(Some(outbound_rx)),
        }
    }

    /// Identifier used in log lines
    pub fn id(&self) -> u64 {
        self.id
    }

    /// No driver ever ran, so report `disconnect` from a task of our own
    fn report_closed_before_open(&self) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            debug!("[CONN-{}] Closed before open outside a runtime", self.id);
            return;
        };
        let shared = self.shared.clone();
        let id = self.id;
        runtime.spawn(async move {
            shared.dispatch(
                id,
                lifecycle::DISCONNECT,
                Value::from(DisconnectReason::ClientClose.as_str()),
            );
        });
    }
}

impl Connection for WsConnection {
    fn open(&self) {
        let Some(outbound_rx) = self.outbound_rx.lock().take() else {
            warn!("[CONN-{}] Already opened or closed, ignoring open()", self.id);
            return;
        };

        let driver = Driver {
            id: self.id,
            config: self.config.clone(),
            shared: self.shared.clone(),
            outbound_rx,
        };
        tokio::spawn(driver.run());
    }

    fn on(&self, event: &str, handler: EventHandler) {
        self.shared
            .handlers
            .write()
            .insert(event.to_string(), handler);
    }

    fn off(&self, event: &str) {
        self.shared.handlers.write().remove(event);
    }

    fn emit(&self, event: &str, payload: Value) -> Result<(), Error> {
        if !self.is_connected() {
            return Err(Error::ConnectionFailed("not connected".to_string()));
        }
        let text = encode_event(event, payload)?;
        self.outbound_tx
            .try_send(Message::Text(text))
            .map_err(|e| Error::ChannelSend(e.to_string()))
    }

    fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    fn close(&self) {
        if self.outbound_rx.lock().take().is_some() {
            debug!("[CONN-{}] Closed before open", self.id);
            self.report_closed_before_open();
            return;
        }
        self.shared.close.notify_one();
    }
}

/// Owns the socket for one connection's lifetime
struct Driver {
    id: u64,
    config: Arc<TransportConfig>,
    shared: Arc<Shared>,
    outbound_rx: mpsc::Receiver<Message>,
}

impl Driver {
    async fn run(mut self) {
        let result = self.connect_and_run().await;
        self.shared.connected.store(false, Ordering::SeqCst);

        let reason = match result {
            Ok(reason) => reason,
            Err(e) => {
                warn!("[CONN-{}] Connection error: {}", self.id, e);
                self.shared
                    .dispatch(self.id, lifecycle::ERROR, Value::String(e.to_string()));
                DisconnectReason::TransportError
            }
        };

        info!("[CONN-{}] Disconnected ({})", self.id, reason);
        self.shared
            .dispatch(self.id, lifecycle::DISCONNECT, Value::from(reason.as_str()));
    }

    /// Connect and run until disconnection
    async fn connect_and_run(&mut self) -> Result<DisconnectReason, Error> {
        debug!(
            "[CONN-{}] Connecting to {} (headers={})",
            self.id,
            self.config.url,
            self.config.headers.len()
        );

        let connect = timeout(self.config.connect_timeout, connect_websocket(&self.config));
        tokio::pin!(connect);

        // Keep serving close requests while the handshake is in flight
        let ws_stream = loop {
            tokio::select! {
                result = &mut connect => match result {
                    Ok(Ok(stream)) => break stream,
                    Ok(Err(e)) => return Err(e),
                    Err(_) => {
                        return Err(Error::ConnectionFailed("Connection timeout".to_string()))
                    }
                },
                _ = self.shared.close.notified() => {
                    return Ok(DisconnectReason::ClientClose);
                }
                msg = self.outbound_rx.recv() => match msg {
                    Some(_) => debug!("[CONN-{}] Dropping send before connect", self.id),
                    None => return Ok(DisconnectReason::ClientClose),
                },
            }
        };

        self.shared.connected.store(true, Ordering::SeqCst);
        info!("[CONN-{}] Connected to {}", self.id, self.config.url);
        self.shared.dispatch(self.id, lifecycle::CONNECT, Value::Null);

        let (mut write, mut read) = ws_stream.split();
        let mut health = HealthMonitor::new(self.config.health.clone());
        let ping_data: Vec<u8> = format!("ping-{}", self.id).into_bytes();

        loop {
            let next_health_check = health
                .time_until_next_check()
                .min(Duration::from_secs(1));

            tokio::select! {
                msg = read.next() => {
                    match msg {
                        Some(Ok(message)) => match message {
                            Message::Text(text) => self.handle_text(&text),
                            Message::Binary(data) => {
                                debug!("[CONN-{}] Ignoring binary frame ({} bytes)", self.id, data.len());
                            }
                            Message::Ping(data) => {
                                trace!("[CONN-{}] Received ping, sending pong", self.id);
                                write.send(Message::Pong(data)).await?;
                            }
                            Message::Pong(_) => {
                                trace!("[CONN-{}] Received pong", self.id);
                                health.record_pong_received();
                            }
                            Message::Close(frame) => {
                                info!("[CONN-{}] Received close frame: {:?}", self.id, frame);
                                return Ok(DisconnectReason::ServerClose);
                            }
                            Message::Frame(_) => {}
                        },
                        Some(Err(e)) => {
                            warn!("[CONN-{}] WebSocket error: {}", self.id, e);
                            return Err(Error::WebSocket(e));
                        }
                        None => {
                            info!("[CONN-{}] WebSocket stream ended", self.id);
                            return Ok(DisconnectReason::TransportClose);
                        }
                    }
                }

                _ = self.shared.close.notified() => {
                    info!("[CONN-{}] Closing on request", self.id);
                    let _ = write.send(Message::Close(None)).await;
                    return Ok(DisconnectReason::ClientClose);
                }

                msg = self.outbound_rx.recv() => {
                    match msg {
                        Some(msg) => {
                            if let Err(e) = write.send(msg).await {
                                warn!("[CONN-{}] Failed to send message: {}", self.id, e);
                                return Err(Error::WebSocket(e));
                            }
                        }
                        None => {
                            info!("[CONN-{}] Handle dropped, closing", self.id);
                            let _ = write.send(Message::Close(None)).await;
                            return Ok(DisconnectReason::ClientClose);
                        }
                    }
                }

                _ = tokio::time::sleep(next_health_check) => {
                    if health.check_and_record_pong_timeout() {
                        warn!(
                            "[CONN-{}] Pong timeout (failures: {})",
                            self.id,
                            health.consecutive_failures()
                        );
                        if health.is_unhealthy() {
                            warn!("[CONN-{}] Connection unhealthy, closing", self.id);
                            let _ = write.send(Message::Close(None)).await;
                            return Ok(DisconnectReason::PingTimeout);
                        }
                    }

                    if health.should_send_ping() {
                        if let Err(e) = write.send(Message::Ping(ping_data.clone())).await {
                            warn!("[CONN-{}] Failed to send ping: {}", self.id, e);
                            return Err(Error::WebSocket(e));
                        }
                        health.record_ping_sent();
                    }
                }
            }
        }
    }

    fn handle_text(&self, text: &str) {
        match decode_event(text) {
            Ok(envelope) if lifecycle::is_reserved(&envelope.event) => {
                debug!(
                    "[CONN-{}] Ignoring server frame for lifecycle event '{}'",
                    self.id, envelope.event
                );
            }
            Ok(envelope) => self.shared.dispatch(self.id, &envelope.event, envelope.data),
            Err(e) => {
                warn!(
                    "[CONN-{}] Undecodable frame ({} bytes): {}",
                    self.id,
                    text.len(),
                    e
                );
            }
        }
    }
}

/// Type alias for WebSocket stream
type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Resolve, connect, tune the socket, then run the TLS and WebSocket handshakes
async fn connect_websocket(config: &TransportConfig) -> Result<WsStream, Error> {
    let url = &config.url;
    let host = url
        .host_str()
        .ok_or_else(|| Error::ConnectionFailed("No host in URL".to_string()))?;

    let is_tls = url.scheme() == "wss";
    let port = url
        .port_or_known_default()
        .unwrap_or(if is_tls { 443 } else { 80 });

    let mut request = url
        .as_str()
        .into_client_request()
        .map_err(|e| Error::ConnectionFailed(format!("Invalid WebSocket request: {}", e)))?;

    for (name, value) in &config.headers {
        request.headers_mut().insert(name.clone(), value.clone());
    }

    let tcp_stream = connect_direct(host, port).await?;
    set_tcp_options(&tcp_stream);

    let connector = if is_tls {
        let tls = native_tls::TlsConnector::new()
            .map_err(|e| Error::ConnectionFailed(format!("TLS error: {}", e)))?;
        Some(Connector::NativeTls(tls))
    } else {
        None
    };

    let (ws_stream, _response) =
        client_async_tls_with_config(request, tcp_stream, None, connector).await?;

    Ok(ws_stream)
}

async fn connect_direct(host: &str, port: u16) -> Result<TcpStream, Error> {
    let dest_str = format!("{}:{}", host, port);
    let dest_addr: SocketAddr = tokio::net::lookup_host(&dest_str)
        .await
        .map_err(|e| Error::ConnectionFailed(format!("DNS lookup failed: {}", e)))?
        .next()
        .ok_or_else(|| Error::ConnectionFailed(format!("No addresses found for {}", host)))?;

    TcpStream::connect(dest_addr)
        .await
        .map_err(|e| Error::ConnectionFailed(format!("TCP connect to {} failed: {}", dest_addr, e)))
}

/// Set TCP options for low latency
fn set_tcp_options(stream: &TcpStream) {
    let sock2 = socket2::SockRef::from(stream);

    // Disable Nagle's algorithm
    let _ = sock2.set_nodelay(true);

    // Keepalive to detect dead peers below the ping interval
    let keepalive = socket2::TcpKeepalive::new()
        .with_time(Duration::from_secs(30))
        .with_interval(Duration::from_secs(10));
    let _ = sock2.set_tcp_keepalive(&keepalive);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{HealthConfig, ManagerConfig, TransportConfigBuilder};
    use crate::handler::event_handler;
    use crate::manager::ConnectionManager;
    use crate::state::ConnectionState;
    use serde_json::json;
    use tokio::net::TcpListener;
    use tokio::sync::mpsc::UnboundedReceiver;

    const WAIT: Duration = Duration::from_secs(5);

    /// Bind every interesting event to a channel of `(event, payload)`
    fn record_events(conn: &WsConnection, events: &[&str]) -> UnboundedReceiver<(String, Value)> {
        let (tx, rx) = mpsc::unbounded_channel();
        for event in events {
            let tx = tx.clone();
            let name = event.to_string();
            conn.on(
                event,
                event_handler(move |payload| {
                    let _ = tx.send((name.clone(), payload));
                }),
            );
        }
        rx
    }

    async fn next_event(rx: &mut UnboundedReceiver<(String, Value)>) -> (String, Value) {
        timeout(WAIT, rx.recv())
            .await
            .expect("timed out waiting for event")
            .expect("event channel closed")
    }

    fn transport_for(addr: SocketAddr) -> WsTransport {
        transport_with(addr, |builder| builder)
    }

    fn transport_with(
        addr: SocketAddr,
        tune: impl FnOnce(TransportConfigBuilder) -> TransportConfigBuilder,
    ) -> WsTransport {
        let builder =
            TransportConfig::builder(format!("ws://{}", addr)).connect_timeout(Duration::from_secs(2));
        WsTransport::new(tune(builder).build().expect("valid config"))
    }

    /// Accept one TCP connection and hold it open without a WebSocket handshake
    async fn silent_tcp_server() -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (_stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(30)).await;
        });
        addr
    }

    #[test]
    fn test_envelope_encoding() {
        let text = encode_event("join", json!({"group": "btc"})).unwrap();
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value, json!({"event": "join", "data": {"group": "btc"}}));
    }

    #[test]
    fn test_decode_without_data() {
        let envelope = decode_event(r#"{"event":"heartbeat"}"#).unwrap();
        assert_eq!(envelope.event, "heartbeat");
        assert_eq!(envelope.data, Value::Null);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        let err = decode_event("not json").unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Codec);
        assert!(decode_event(r#"{"data":1}"#).is_err());
    }

    #[test]
    fn test_disconnect_reason_strings() {
        assert_eq!(DisconnectReason::ClientClose.to_string(), "io client disconnect");
        assert_eq!(DisconnectReason::PingTimeout.as_str(), "ping timeout");
    }

    #[test]
    fn test_emit_before_connect_fails() {
        let transport = transport_for("127.0.0.1:9".parse().unwrap());
        let conn = transport.create();
        assert!(!conn.is_connected());
        let err = conn.emit("price", Value::Null).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::ConnectionFailed);
    }

    #[tokio::test]
    async fn test_loopback_round_trip() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            ws.send(Message::Text(
                r#"{"event":"price","data":{"symbol":"BTC","last":42}}"#.to_string(),
            ))
            .await
            .unwrap();
            // Lifecycle names from the server must not reach lifecycle handlers
            ws.send(Message::Text(r#"{"event":"connect"}"#.to_string()))
                .await
                .unwrap();

            loop {
                match ws.next().await {
                    Some(Ok(Message::Text(text))) => return text,
                    Some(Ok(_)) => continue,
                    other => panic!("unexpected frame: {:?}", other),
                }
            }
        });

        let conn = transport_for(addr).create();
        let mut events = record_events(
            &conn,
            &[lifecycle::CONNECT, lifecycle::DISCONNECT, lifecycle::ERROR, "price"],
        );
        conn.open();

        assert_eq!(next_event(&mut events).await.0, lifecycle::CONNECT);
        assert!(conn.is_connected());

        let (event, payload) = next_event(&mut events).await;
        assert_eq!(event, "price");
        assert_eq!(payload, json!({"symbol": "BTC", "last": 42}));

        conn.emit("join", json!({"group": "g1"})).unwrap();
        let received = timeout(WAIT, server).await.unwrap().unwrap();
        assert_eq!(
            decode_event(&received).unwrap(),
            Envelope {
                event: "join".to_string(),
                data: json!({"group": "g1"}),
            }
        );

        // Server dropped the socket: an optional error, then disconnect
        loop {
            let (event, _) = next_event(&mut events).await;
            match event.as_str() {
                lifecycle::ERROR => continue,
                lifecycle::DISCONNECT => break,
                other => panic!("unexpected event {other}"),
            }
        }
        assert!(!conn.is_connected());
    }

    #[tokio::test]
    async fn test_refused_connection_reports_error_then_disconnect() {
        let addr = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap()
        };

        let conn = transport_for(addr).create();
        let mut events = record_events(
            &conn,
            &[lifecycle::CONNECT, lifecycle::DISCONNECT, lifecycle::ERROR],
        );
        conn.open();

        assert_eq!(next_event(&mut events).await.0, lifecycle::ERROR);
        let (event, reason) = next_event(&mut events).await;
        assert_eq!(event, lifecycle::DISCONNECT);
        assert_eq!(reason, Value::from("transport error"));
        assert!(!conn.is_connected());
    }

    #[tokio::test]
    async fn test_close_reports_client_disconnect() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            while let Some(Ok(_)) = ws.next().await {}
        });

        let conn = transport_for(addr).create();
        let mut events = record_events(&conn, &[lifecycle::CONNECT, lifecycle::DISCONNECT]);
        conn.open();
        assert_eq!(next_event(&mut events).await.0, lifecycle::CONNECT);

        conn.close();
        let (event, reason) = next_event(&mut events).await;
        assert_eq!(event, lifecycle::DISCONNECT);
        assert_eq!(reason, Value::from("io client disconnect"));
    }

    #[tokio::test]
    async fn test_handler_panic_is_isolated() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            ws.send(Message::Text(r#"{"event":"boom"}"#.to_string()))
                .await
                .unwrap();
            ws.send(Message::Text(r#"{"event":"price","data":1}"#.to_string()))
                .await
                .unwrap();
            while let Some(Ok(_)) = ws.next().await {}
        });

        let conn = transport_for(addr).create();
        conn.on("boom", event_handler(|_| panic!("handler failure")));
        let mut events = record_events(&conn, &["price"]);
        conn.open();

        let (event, payload) = next_event(&mut events).await;
        assert_eq!(event, "price");
        assert_eq!(payload, json!(1));
        assert!(conn.is_connected());
        conn.close();
    }

    #[tokio::test]
    async fn test_second_open_is_ignored() {
        let addr = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap()
        };
        let conn = transport_for(addr).create();
        let mut events = record_events(&conn, &[lifecycle::DISCONNECT]);

        conn.open();
        conn.open();

        assert_eq!(next_event(&mut events).await.0, lifecycle::DISCONNECT);
        // Only one driver ran, so only one disconnect
        assert!(timeout(Duration::from_millis(200), events.recv()).await.is_err());
    }

    #[tokio::test]
    async fn test_missed_pongs_close_with_ping_timeout() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        // Completes the handshake, then never reads, so pings go unanswered
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let _ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            tokio::time::sleep(Duration::from_secs(30)).await;
        });

        let conn = transport_with(addr, |builder| {
            builder.health(HealthConfig {
                ping_interval: Duration::from_millis(200),
                pong_timeout: Duration::from_millis(100),
                failure_threshold: 2,
            })
        })
        .create();
        let mut events = record_events(
            &conn,
            &[lifecycle::CONNECT, lifecycle::DISCONNECT, lifecycle::ERROR],
        );
        conn.open();

        assert_eq!(next_event(&mut events).await.0, lifecycle::CONNECT);
        let (event, reason) = next_event(&mut events).await;
        assert_eq!(event, lifecycle::DISCONNECT);
        assert_eq!(reason, Value::from("ping timeout"));
        assert!(!conn.is_connected());
    }

    #[tokio::test]
    async fn test_handshake_timeout_reports_error_then_disconnect() {
        let addr = silent_tcp_server().await;

        let conn = transport_with(addr, |builder| {
            builder.connect_timeout(Duration::from_millis(300))
        })
        .create();
        let mut events = record_events(
            &conn,
            &[lifecycle::CONNECT, lifecycle::DISCONNECT, lifecycle::ERROR],
        );
        conn.open();

        let (event, message) = next_event(&mut events).await;
        assert_eq!(event, lifecycle::ERROR);
        assert!(
            message.as_str().is_some_and(|m| m.contains("Connection timeout")),
            "unexpected error payload {message}"
        );

        let (event, reason) = next_event(&mut events).await;
        assert_eq!(event, lifecycle::DISCONNECT);
        assert_eq!(reason, Value::from("transport error"));
    }

    #[tokio::test]
    async fn test_undecodable_frame_is_skipped() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            ws.send(Message::Text("not json".to_string())).await.unwrap();
            ws.send(Message::Text(r#"{"event":"price","data":1}"#.to_string()))
                .await
                .unwrap();
            while let Some(Ok(_)) = ws.next().await {}
        });

        let conn = transport_for(addr).create();
        let mut events = record_events(
            &conn,
            &[lifecycle::CONNECT, lifecycle::DISCONNECT, lifecycle::ERROR, "price"],
        );
        conn.open();

        assert_eq!(next_event(&mut events).await.0, lifecycle::CONNECT);
        assert_eq!(next_event(&mut events).await, ("price".to_string(), json!(1)));
        assert!(conn.is_connected());
        conn.close();
    }

    #[tokio::test]
    async fn test_close_before_open_still_reports_disconnect() {
        let conn = transport_for("127.0.0.1:9".parse().unwrap()).create();
        let mut events = record_events(&conn, &[lifecycle::CONNECT, lifecycle::DISCONNECT]);

        conn.close();
        assert_eq!(
            next_event(&mut events).await,
            (lifecycle::DISCONNECT.to_string(), Value::from("io client disconnect"))
        );

        // A closed connection cannot be opened afterwards
        conn.open();
        assert!(timeout(Duration::from_millis(200), events.recv()).await.is_err());
    }

    #[tokio::test]
    async fn test_close_during_handshake_reports_client_disconnect() {
        let addr = silent_tcp_server().await;

        let conn = transport_with(addr, |builder| {
            builder.connect_timeout(Duration::from_secs(10))
        })
        .create();
        let mut events = record_events(
            &conn,
            &[lifecycle::CONNECT, lifecycle::DISCONNECT, lifecycle::ERROR],
        );
        conn.open();
        tokio::time::sleep(Duration::from_millis(100)).await;

        conn.close();
        assert_eq!(
            next_event(&mut events).await,
            (lifecycle::DISCONNECT.to_string(), Value::from("io client disconnect"))
        );
    }

    #[tokio::test]
    async fn test_manager_replays_subscriptions_after_server_drop() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            // First connection is dropped right after the handshake
            let (stream, _) = listener.accept().await.unwrap();
            drop(tokio_tungstenite::accept_async(stream).await.unwrap());

            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            ws.send(Message::Text(r#"{"event":"price","data":7}"#.to_string()))
                .await
                .unwrap();
            loop {
                match ws.next().await {
                    Some(Ok(Message::Text(text))) => return text,
                    Some(Ok(_)) => continue,
                    other => panic!("unexpected frame: {:?}", other),
                }
            }
        });

        let config = ManagerConfig::builder()
            .base_delay(Duration::from_millis(50))
            .build()
            .expect("valid config");
        let manager = ConnectionManager::new(config, transport_for(addr));

        let (tx, mut prices) = mpsc::unbounded_channel();
        manager
            .subscribe(
                "price",
                event_handler(move |payload| {
                    let _ = tx.send(payload);
                }),
            )
            .unwrap();
        manager.connect().unwrap();

        let price = timeout(WAIT, prices.recv()).await.unwrap().unwrap();
        assert_eq!(price, json!(7));
        assert_eq!(manager.state(), ConnectionState::Connected);
        assert_eq!(manager.attempts(), 0);
        assert_eq!(manager.metrics().connections(), 2);

        manager.join_group("g").unwrap();
        let received = timeout(WAIT, server).await.unwrap().unwrap();
        assert_eq!(
            decode_event(&received).unwrap(),
            Envelope {
                event: "join".to_string(),
                data: json!({"group": "g"}),
            }
        );
        manager.dispose();
    }
}
