//! The WebSocket session client (§4.2): handshake, keepalive,
//! request/response pairing, and command emission. Grounded on the
//! teacher's `daemon_client.rs` — a background reader/writer pair feeding a
//! `pending` oneshot map keyed by message id, reconnect backoff applied
//! only to the transport-level connect attempt.

pub mod hash;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use eviqo_protocol::{Codec, DecodedFrame, DecodedPayload, Direction, Opcode, Payload};
use futures_util::{SinkExt, StreamExt};
use parking_lot::RwLock;
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::time::timeout as tokio_timeout;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use crate::error::SessionError;
use crate::model::{Device, DeviceQueryResponse, DevicePage};

const DASHWS_URL: &str = "wss://app.eviqo.io/dashws";
const LOGIN_URL: &str = "https://app.eviqo.io/dashboard/login";
const ORIGIN: &str = "https://app.eviqo.io";
const USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";
const CLIENT_TYPE: &str = "web";
const CLIENT_VERSION: &str = "0.98.2";
const LOCALE: &str = "en_US";
const DEVICE_PAGE_ID: &str = "17948";

const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(15);
pub const DEFAULT_LISTEN_TIMEOUT: Duration = Duration::from_secs(10);

const CONNECT_BACKOFF_INITIAL: Duration = Duration::from_millis(500);
const CONNECT_BACKOFF_CAP: Duration = Duration::from_millis(5000);
const CONNECT_BACKOFF_MULTIPLIER: u32 = 3;
const CONNECT_BACKOFF_DIVISOR: u32 = 2;
const CONNECT_MAX_ATTEMPTS: u32 = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Handshaking,
    Ready,
    Closing,
    Error,
}

/// Events the session pushes out, per §9's "avoid a generic publish/subscribe
/// bus" guidance — a single typed channel, not a callback registry.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    WidgetUpdate { device_id: String, pin: String, value: String },
    CommandSent { device_id: String, pin: String, value: String },
    StateChanged(SessionState),
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type PendingMap = Arc<Mutex<HashMap<u16, oneshot::Sender<DecodedFrame>>>>;

pub struct SessionClient {
    codec: Codec,
    state: Arc<RwLock<SessionState>>,
    msg_id: AtomicU16,
    pending: PendingMap,
    outbound_tx: Arc<RwLock<Option<mpsc::UnboundedSender<Vec<u8>>>>>,
    events_tx: mpsc::UnboundedSender<SessionEvent>,
    last_inbound: Arc<RwLock<Instant>>,
    reader_handle: Mutex<Option<tokio::task::JoinHandle<()>>>,
    keepalive_handle: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl SessionClient {
    pub fn new(events_tx: mpsc::UnboundedSender<SessionEvent>) -> Self {
        Self {
            codec: Codec::compact(),
            state: Arc::new(RwLock::new(SessionState::Disconnected)),
            msg_id: AtomicU16::new(1),
            pending: Arc::new(Mutex::new(HashMap::new())),
            outbound_tx: Arc::new(RwLock::new(None)),
            events_tx,
            last_inbound: Arc::new(RwLock::new(Instant::now())),
            reader_handle: Mutex::new(None),
            keepalive_handle: Mutex::new(None),
        }
    }

    pub fn state(&self) -> SessionState {
        *self.state.read()
    }

    fn set_state(&self, state: SessionState) {
        *self.state.write() = state;
        let _ = self.events_tx.send(SessionEvent::StateChanged(state));
    }

    fn next_msg_id(&self) -> u16 {
        // wraps at u16::MAX per §4.1's "session MUST tolerate wrap"; 0 is
        // reserved as "no correlation expected" so wrapping skips it.
        loop {
            let id = self.msg_id.fetch_add(1, Ordering::SeqCst);
            if id != 0 {
                return id;
            }
        }
    }

    /// Run the full handshake (§4.2) against a fresh WebSocket connection,
    /// then spawn the reader and keepalive background tasks. On return the
    /// session is `Ready` and devices/pages have been decoded.
    pub async fn connect(&self, email: &str, password: &str) -> Result<Vec<(Device, DevicePage)>, SessionError> {
        self.set_state(SessionState::Connecting);
        let ws = self.open_transport().await?;

        self.set_state(SessionState::Handshaking);
        let (sink, stream) = ws.split();

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel::<Vec<u8>>();
        *self.outbound_tx.write() = Some(outbound_tx);

        tokio::spawn(Self::writer_loop(sink, outbound_rx));

        let reader = tokio::spawn(Self::reader_loop(
            stream,
            self.codec,
            self.pending.clone(),
            self.events_tx.clone(),
            self.last_inbound.clone(),
        ));
        *self.reader_handle.lock().await = Some(reader);

        match self.handshake(email, password).await {
            Ok(devices) => {
                self.set_state(SessionState::Ready);
                let keepalive = tokio::spawn(Self::keepalive_loop(
                    self.outbound_tx.clone(),
                    self.codec,
                    self.last_inbound.clone(),
                    self.state.clone(),
                    self.events_tx.clone(),
                ));
                *self.keepalive_handle.lock().await = Some(keepalive);
                Ok(devices)
            }
            Err(err) => {
                self.set_state(SessionState::Error);
                Err(err)
            }
        }
    }

    async fn open_transport(&self) -> Result<WsStream, SessionError> {
        let cookie = Self::fetch_login_cookie().await?;

        let mut attempt = 0u32;
        let mut backoff = CONNECT_BACKOFF_INITIAL;
        loop {
            attempt += 1;
            match Self::open_ws(&cookie).await {
                Ok(ws) => return Ok(ws),
                Err(err) if attempt >= CONNECT_MAX_ATTEMPTS => return Err(err),
                Err(err) => {
                    warn!(attempt, error = %err, "websocket connect failed, retrying");
                    tokio::time::sleep(backoff).await;
                    backoff = std::cmp::min(
                        backoff * CONNECT_BACKOFF_MULTIPLIER / CONNECT_BACKOFF_DIVISOR,
                        CONNECT_BACKOFF_CAP,
                    );
                }
            }
        }
    }

    async fn fetch_login_cookie() -> Result<String, SessionError> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| SessionError::ConnectFailed(e.to_string()))?;

        let response = client
            .get(LOGIN_URL)
            .send()
            .await
            .map_err(|e| SessionError::ConnectFailed(e.to_string()))?;

        let cookie = response
            .headers()
            .get_all(reqwest::header::SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .map(|v| v.split(';').next().unwrap_or(v).to_string())
            .collect::<Vec<_>>()
            .join("; ");

        Ok(cookie)
    }

    async fn open_ws(cookie: &str) -> Result<WsStream, SessionError> {
        let mut request = DASHWS_URL
            .into_client_request()
            .map_err(|e| SessionError::ConnectFailed(e.to_string()))?;
        let headers = request.headers_mut();
        headers.insert("Origin", ORIGIN.parse().unwrap());
        headers.insert("User-Agent", USER_AGENT.parse().unwrap());
        if !cookie.is_empty() {
            headers.insert("Cookie", cookie.parse().map_err(|_| SessionError::ConnectFailed("invalid cookie".into()))?);
        }

        let (ws, _response) = connect_async(request)
            .await
            .map_err(|e| SessionError::ConnectFailed(e.to_string()))?;
        Ok(ws)
    }

    async fn handshake(&self, email: &str, password: &str) -> Result<Vec<(Device, DevicePage)>, SessionError> {
        let hash = hash::compute_hash(email, password);
        let login_payload = json!({
            "email": email,
            "hash": hash,
            "clientType": CLIENT_TYPE,
            "version": CLIENT_VERSION,
            "locale": LOCALE,
        });
        let login_response = self.send_await(Opcode::LOGIN, Payload::Json(login_payload), DEFAULT_LISTEN_TIMEOUT).await?;
        if matches!(login_response.payload, DecodedPayload::Empty) {
            return Err(SessionError::AuthFailed);
        }

        let query_payload = json!({
            "docType": "DEVICE",
            "mode": "MATCH_ALL",
            "viewType": "LIST",
            "filters": [{"type": "SUB_SEGMENT", "filters": [], "mode": "MATCH_ANY", "isCurrent": true}],
            "offset": 0,
            "limit": 17,
            "order": "ASC",
            "sortBy": "Name",
        });
        let query_response = self.send_await(Opcode::DEVICE_QUERY, Payload::Json(query_payload), DEFAULT_LISTEN_TIMEOUT).await?;
        let devices = match query_response.payload {
            DecodedPayload::Json(value) => {
                let parsed: DeviceQueryResponse = serde_json::from_value(value).map_err(|e| {
                    SessionError::Transport(format!("malformed device query response: {e}"))
                })?;
                parsed.devices
            }
            _ => Vec::new(),
        };

        let mut pages = Vec::with_capacity(devices.len());
        for device in devices {
            let page = self.fetch_device_page(device.device_id).await?;
            pages.push((device, page));
        }

        Ok(pages)
    }

    /// Re-select a device and re-fetch its page on the existing connection,
    /// without re-authenticating (§6's `EVIQO_POLL_INTERVAL`: a defensive
    /// refresh alongside the push-based widget updates, in case one was
    /// dropped).
    pub async fn fetch_device_page(&self, device_id: i64) -> Result<DevicePage, SessionError> {
        let id_str = device_id.to_string();
        self.send_await(Opcode::DEVICE_NUMBER, Payload::Text(&id_str), DEFAULT_LISTEN_TIMEOUT).await?;

        let page_payload = json!({
            "pageId": DEVICE_PAGE_ID,
            "deviceId": id_str,
            "dashboardPageId": Value::Null,
        });
        let page_response = self.send_await(Opcode::DEVICE_PAGE, Payload::Json(page_payload), DEFAULT_LISTEN_TIMEOUT).await?;
        match page_response.payload {
            DecodedPayload::Json(value) => serde_json::from_value(value).map_err(|e| {
                SessionError::Transport(format!("malformed device page for {id_str}: {e}"))
            }),
            _ => Err(SessionError::Transport(format!("device page for {id_str} was not JSON"))),
        }
    }

    /// Allocate a msgId, send, and wait for the next frame correlated to it.
    pub async fn send_await(&self, opcode: u8, payload: Payload<'_>, timeout: Duration) -> Result<DecodedFrame, SessionError> {
        let msg_id = self.next_msg_id();
        let frame = self.codec.encode_frame(opcode, msg_id, payload);

        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(msg_id, tx);

        self.send_raw(frame)?;

        match tokio_timeout(timeout, rx).await {
            Ok(Ok(frame)) => Ok(frame),
            Ok(Err(_)) => Err(SessionError::Closed),
            Err(_) => {
                self.pending.lock().await.remove(&msg_id);
                Err(SessionError::Timeout)
            }
        }
    }

    /// Send without awaiting a response.
    pub fn send_fire(&self, opcode: u8, payload: Payload<'_>) -> Result<(), SessionError> {
        let msg_id = self.next_msg_id();
        let frame = self.codec.encode_frame(opcode, msg_id, payload);
        self.send_raw(frame)
    }

    /// Emit a command frame and synchronously fire [`SessionEvent::CommandSent`]
    /// so the bridge can echo state before the vendor's own widget update
    /// arrives (§4.2 "Command emission").
    pub fn send_command(&self, device_id: &str, pin: &str, value: &str) -> Result<(), SessionError> {
        let msg_id = self.next_msg_id();
        let frame = eviqo_protocol::encode_command(device_id, pin, value, msg_id, &self.codec);
        self.send_raw(frame)?;
        let _ = self.events_tx.send(SessionEvent::CommandSent {
            device_id: device_id.to_string(),
            pin: pin.to_string(),
            value: value.to_string(),
        });
        Ok(())
    }

    fn send_raw(&self, frame: Vec<u8>) -> Result<(), SessionError> {
        let guard = self.outbound_tx.read();
        match guard.as_ref() {
            Some(tx) => tx.send(frame).map_err(|_| SessionError::Closed),
            None => Err(SessionError::Closed),
        }
    }

    async fn writer_loop(
        mut sink: futures_util::stream::SplitSink<WsStream, WsMessage>,
        mut outbound_rx: mpsc::UnboundedReceiver<Vec<u8>>,
    ) {
        while let Some(frame) = outbound_rx.recv().await {
            if let Err(err) = sink.send(WsMessage::Binary(frame)).await {
                error!(error = %err, "websocket write failed, closing writer loop");
                break;
            }
        }
    }

    async fn reader_loop(
        mut stream: futures_util::stream::SplitStream<WsStream>,
        codec: Codec,
        pending: PendingMap,
        events_tx: mpsc::UnboundedSender<SessionEvent>,
        last_inbound: Arc<RwLock<Instant>>,
    ) {
        while let Some(message) = stream.next().await {
            let bytes = match message {
                Ok(WsMessage::Binary(bytes)) => bytes,
                Ok(WsMessage::Close(_)) => {
                    debug!("websocket closed by peer");
                    break;
                }
                Ok(_) => continue,
                Err(err) => {
                    error!(error = %err, "websocket read error");
                    break;
                }
            };

            *last_inbound.write() = Instant::now();

            let decoded = match codec.decode_frame(&bytes, Direction::Inbound) {
                Ok(frame) => frame,
                Err(err) => {
                    warn!(error = %err, "dropping malformed inbound frame");
                    continue;
                }
            };

            match decoded.payload {
                DecodedPayload::WidgetUpdate(ref update) => {
                    let _ = events_tx.send(SessionEvent::WidgetUpdate {
                        device_id: update.device_id.clone(),
                        pin: update.widget_id.clone(),
                        value: update.widget_value.clone(),
                    });
                }
                _ => {
                    if let Some(tx) = pending.lock().await.remove(&decoded.msg_id) {
                        let _ = tx.send(decoded);
                    }
                }
            }
        }
    }

    async fn keepalive_loop(
        outbound_tx: Arc<RwLock<Option<mpsc::UnboundedSender<Vec<u8>>>>>,
        codec: Codec,
        last_inbound: Arc<RwLock<Instant>>,
        state: Arc<RwLock<SessionState>>,
        events_tx: mpsc::UnboundedSender<SessionEvent>,
    ) {
        let mut missed = 0u32;
        let mut ticker = tokio::time::interval(KEEPALIVE_INTERVAL);
        ticker.tick().await;
        loop {
            ticker.tick().await;

            let frame = codec.encode_frame(Opcode::KEEPALIVE, 0, Payload::Null);
            let sent = {
                let guard = outbound_tx.read();
                match guard.as_ref() {
                    Some(tx) => tx.send(frame).is_ok(),
                    None => false,
                }
            };
            if !sent {
                return;
            }

            if last_inbound.read().elapsed() > KEEPALIVE_INTERVAL {
                missed += 1;
                if missed >= 2 {
                    warn!("missed two keepalive windows without inbound traffic, transitioning to Error");
                    *state.write() = SessionState::Error;
                    let _ = events_tx.send(SessionEvent::StateChanged(SessionState::Error));
                    return;
                }
            } else {
                missed = 0;
            }
        }
    }

    /// Tear down the transport and background tasks.
    pub async fn close(&self) {
        self.set_state(SessionState::Closing);
        *self.outbound_tx.write() = None;
        if let Some(handle) = self.reader_handle.lock().await.take() {
            handle.abort();
        }
        if let Some(handle) = self.keepalive_handle.lock().await.take() {
            handle.abort();
        }
        self.pending.lock().await.clear();
        self.set_state(SessionState::Disconnected);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn msg_id_skips_zero() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let client = SessionClient::new(tx);
        client.msg_id.store(u16::MAX, Ordering::SeqCst);
        let first = client.next_msg_id();
        assert_ne!(first, 0);
    }

    #[test]
    fn msg_id_is_monotonic_within_a_session() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let client = SessionClient::new(tx);
        let a = client.next_msg_id();
        let b = client.next_msg_id();
        assert!(b > a || (a == u16::MAX && b == 1));
    }
}
