//! Hub client: WebSocket session, event dispatch, and REST state reads.
//!
//! One background task owns the read half of the WebSocket. It dispatches
//! incoming events to registered handlers in registration order and, when
//! the connection drops while the client is still running, reconnects
//! with exponential backoff and resumes the recorded subscriptions.
//! Message ids are per-connection and reset to 1 on every (re)connect.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{FutureExt, SinkExt, StreamExt};
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use tokio::net::TcpStream;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};
use url::Url;

use crate::error::Error;
use crate::models::{HassEvent, HassState, ServiceCall, WsMessage};
use crate::retry::{ReconnectConfig, backoff_delay};
use crate::transport::TransportConfig;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsWriter = SplitSink<WsStream, Message>;
type WsReader = SplitStream<WsStream>;

type HandlerFuture = Pin<Box<dyn Future<Output = ()> + Send>>;
type EventHandler = Arc<dyn Fn(HassEvent) -> HandlerFuture + Send + Sync>;

// ── Connection options ───────────────────────────────────────────────

/// Hub connection options.
#[derive(Debug, Clone)]
pub struct HubOptions {
    /// WebSocket endpoint, e.g. `ws://hub.local:8123/api/websocket`.
    pub ws_url: Url,

    /// REST base URL, e.g. `http://hub.local:8123`.
    pub rest_url: Url,

    /// Long-lived bearer token.
    pub token: SecretString,

    /// Initial connection attempts before giving up. Default: 5.
    pub max_initial_retries: u32,

    /// Fixed delay between initial connection attempts. Default: 1s.
    pub initial_retry_delay: Duration,
}

impl HubOptions {
    pub fn new(ws_url: Url, rest_url: Url, token: SecretString) -> Self {
        Self {
            ws_url,
            rest_url,
            token,
            max_initial_retries: 5,
            initial_retry_delay: Duration::from_secs(1),
        }
    }
}

// ── Outgoing frames ──────────────────────────────────────────────────

#[derive(Serialize)]
struct AuthFrame<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    access_token: &'a str,
}

#[derive(Serialize)]
struct SubscribeFrame<'a> {
    id: u64,
    #[serde(rename = "type")]
    kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    event_type: Option<&'a str>,
}

#[derive(Serialize)]
struct CallServiceFrame<'a> {
    id: u64,
    #[serde(rename = "type")]
    kind: &'static str,
    #[serde(flatten)]
    call: &'a ServiceCall,
}

// ── HassClient ───────────────────────────────────────────────────────

/// Client for the hub's WebSocket and REST APIs.
///
/// Cheaply cloneable via `Arc`. Create with [`HassClient::new`], then
/// [`connect()`](Self::connect) to authenticate and start the receive
/// task. [`disconnect()`](Self::disconnect) is idempotent.
#[derive(Clone)]
pub struct HassClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    options: HubOptions,
    http: reqwest::Client,
    reconnect: ReconnectConfig,

    /// Write half of the current WebSocket connection, if any.
    writer: Mutex<Option<WsWriter>>,

    /// Registered event handlers, keyed by event type. Dispatch order
    /// within a type is registration order.
    handlers: RwLock<HashMap<String, Vec<EventHandler>>>,

    /// Subscriptions to resume after a reconnect.
    subscriptions: Mutex<Vec<Option<String>>>,

    /// Next message id; per-connection, reset to 1 on (re)connect.
    next_id: AtomicU64,

    /// True between connect() and disconnect().
    running: AtomicBool,

    /// True while a WebSocket session is established.
    connected: AtomicBool,

    /// Cancels the receive/reconnect task; replaced on each connect().
    conn_cancel: Mutex<CancellationToken>,

    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl HassClient {
    /// Create a new client. Does not connect.
    pub fn new(options: HubOptions) -> Result<Self, Error> {
        let http = TransportConfig::default().build_client(&options.token)?;
        Ok(Self {
            inner: Arc::new(ClientInner {
                options,
                http,
                reconnect: ReconnectConfig::default(),
                writer: Mutex::new(None),
                handlers: RwLock::new(HashMap::new()),
                subscriptions: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(1),
                running: AtomicBool::new(false),
                connected: AtomicBool::new(false),
                conn_cancel: Mutex::new(CancellationToken::new()),
                tasks: Mutex::new(Vec::new()),
            }),
        })
    }

    /// Connect to the hub and start the receive task.
    ///
    /// Performs the challenge/response handshake, retrying transport
    /// failures up to `max_initial_retries` with a fixed delay. An
    /// `auth_invalid` reply fails immediately — bad credentials will not
    /// improve with retries.
    pub async fn connect(&self) -> Result<(), Error> {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            warn!("already connected to hub");
            return Ok(());
        }

        let max = self.inner.options.max_initial_retries.max(1);
        let mut last_err: Option<Error> = None;
        let mut reader = None;

        for attempt in 1..=max {
            match self.inner.establish().await {
                Ok(r) => {
                    reader = Some(r);
                    break;
                }
                Err(e) if e.is_auth() => {
                    self.inner.running.store(false, Ordering::SeqCst);
                    return Err(e);
                }
                Err(e) => {
                    warn!(attempt, max_retries = max, error = %e, "connection attempt failed");
                    last_err = Some(e);
                    if attempt < max {
                        tokio::time::sleep(self.inner.options.initial_retry_delay).await;
                    }
                }
            }
        }

        let Some(reader) = reader else {
            self.inner.running.store(false, Ordering::SeqCst);
            return Err(Error::ConnectExhausted {
                attempts: max,
                last: last_err.map(|e| e.to_string()).unwrap_or_default(),
            });
        };

        let cancel = CancellationToken::new();
        *self.inner.conn_cancel.lock().await = cancel.clone();

        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(connection_task(inner, reader, cancel));
        self.inner.tasks.lock().await.push(handle);

        info!(ws_url = %self.inner.options.ws_url, "connected to hub");
        Ok(())
    }

    /// Disconnect from the hub. Idempotent.
    ///
    /// Cancels the receive/reconnect task and closes the socket.
    pub async fn disconnect(&self) {
        if !self.inner.running.swap(false, Ordering::SeqCst) {
            debug!("already disconnected");
            return;
        }

        self.inner.conn_cancel.lock().await.cancel();

        if let Some(mut writer) = self.inner.writer.lock().await.take() {
            let _ = writer.send(Message::Close(None)).await;
        }

        for handle in self.inner.tasks.lock().await.drain(..) {
            let _ = handle.await;
        }

        self.inner.connected.store(false, Ordering::SeqCst);
        debug!("disconnected from hub");
    }

    /// True between `connect()` and `disconnect()`.
    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// True while a WebSocket session is established (false while the
    /// reconnect loop is backing off).
    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    /// Subscribe to hub events, all types or one.
    ///
    /// The subscription is recorded and resumed automatically after a
    /// reconnect. Returns the message id used.
    pub async fn subscribe_events(&self, event_type: Option<&str>) -> Result<u64, Error> {
        self.inner
            .subscriptions
            .lock()
            .await
            .push(event_type.map(String::from));
        self.inner.send_subscribe(event_type).await
    }

    /// Register a handler for a given event type.
    ///
    /// Handlers for the same type run sequentially in registration order
    /// on the receive task; a panicking handler is logged and does not
    /// terminate the receive loop.
    pub async fn on_event<F, Fut>(&self, event_type: &str, handler: F)
    where
        F: Fn(HassEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let boxed: EventHandler = Arc::new(move |event| Box::pin(handler(event)));
        self.inner
            .handlers
            .write()
            .await
            .entry(event_type.to_string())
            .or_default()
            .push(boxed);
        debug!(event_type, "registered event handler");
    }

    /// Send a `call_service` frame. Fire-and-observe: returns once the
    /// frame is written, without waiting for the hub's result frame.
    /// Returns the message id used.
    pub async fn call_service(&self, call: &ServiceCall) -> Result<u64, Error> {
        let id = self.inner.allocate_id();
        let frame = CallServiceFrame {
            id,
            kind: "call_service",
            call,
        };
        let payload = serde_json::to_string(&frame)
            .map_err(|e| Error::WebSocket(format!("frame encode failed: {e}")))?;

        debug!(
            id,
            domain = %call.domain,
            service = %call.service,
            "calling hub service"
        );
        self.inner.send_frame(payload).await?;
        Ok(id)
    }

    /// Fetch an entity state via `GET /api/states/{entity_id}`.
    pub async fn get_state(&self, entity_id: &str) -> Result<HassState, Error> {
        let url = self.inner.api_url(&format!("states/{entity_id}"))?;
        debug!(%url, "GET entity state");

        let resp = self.inner.http.get(url).send().await?;
        let status = resp.status();

        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(Error::NotFound {
                entity_id: entity_id.into(),
            });
        }
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(Error::Authentication {
                message: "bearer token rejected by REST API".into(),
            });
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Hub {
                status: status.as_u16(),
                message: body[..body.len().min(200)].to_string(),
            });
        }

        let body = resp.text().await?;
        serde_json::from_str(&body).map_err(|e| {
            let preview = &body[..body.len().min(200)];
            Error::Deserialization {
                message: format!("{e} (body preview: {preview:?})"),
                body,
            }
        })
    }
}

// ── ClientInner ──────────────────────────────────────────────────────

impl ClientInner {
    fn allocate_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Build a REST URL: `{rest_url}/api/{path}`.
    fn api_url(&self, path: &str) -> Result<Url, Error> {
        let base = self.options.rest_url.as_str().trim_end_matches('/');
        Ok(Url::parse(&format!("{base}/api/{path}"))?)
    }

    async fn send_frame(&self, payload: String) -> Result<(), Error> {
        let mut guard = self.writer.lock().await;
        let Some(writer) = guard.as_mut() else {
            return Err(Error::NotConnected);
        };
        writer
            .send(Message::Text(payload.into()))
            .await
            .map_err(|e| Error::WebSocket(format!("send failed: {e}")))
    }

    async fn send_subscribe(&self, event_type: Option<&str>) -> Result<u64, Error> {
        let id = self.allocate_id();
        let frame = SubscribeFrame {
            id,
            kind: "subscribe_events",
            event_type,
        };
        let payload = serde_json::to_string(&frame)
            .map_err(|e| Error::WebSocket(format!("frame encode failed: {e}")))?;
        debug!(id, event_type = event_type.unwrap_or("*"), "subscribing to events");
        self.send_frame(payload).await?;
        Ok(id)
    }

    /// Open a socket, run the auth handshake, store the write half, reset
    /// the message-id counter, and resume recorded subscriptions.
    async fn establish(&self) -> Result<WsReader, Error> {
        let request: tokio_tungstenite::tungstenite::http::Uri = self
            .options
            .ws_url
            .as_str()
            .parse()
            .map_err(|e| Error::WebSocket(format!("invalid WebSocket URL: {e}")))?;

        let (stream, _response) = connect_async(request)
            .await
            .map_err(|e| Error::WebSocket(format!("connect failed: {e}")))?;
        let (mut writer, mut reader) = stream.split();

        // Handshake: auth_required → auth → auth_ok | auth_invalid
        match next_message(&mut reader).await? {
            WsMessage::AuthRequired { .. } => {}
            other => {
                return Err(Error::WebSocket(format!(
                    "expected auth_required, got {other:?}"
                )));
            }
        }

        let auth = AuthFrame {
            kind: "auth",
            access_token: self.options.token.expose_secret(),
        };
        let payload = serde_json::to_string(&auth)
            .map_err(|e| Error::WebSocket(format!("frame encode failed: {e}")))?;
        writer
            .send(Message::Text(payload.into()))
            .await
            .map_err(|e| Error::WebSocket(format!("send failed: {e}")))?;

        match next_message(&mut reader).await? {
            WsMessage::AuthOk { .. } => {}
            WsMessage::AuthInvalid { message } => {
                return Err(Error::Authentication { message });
            }
            other => {
                return Err(Error::WebSocket(format!(
                    "unexpected handshake reply: {other:?}"
                )));
            }
        }
        debug!("WebSocket authentication successful");

        *self.writer.lock().await = Some(writer);
        self.next_id.store(1, Ordering::SeqCst);
        self.connected.store(true, Ordering::SeqCst);

        let subscriptions = self.subscriptions.lock().await.clone();
        for event_type in subscriptions {
            self.send_subscribe(event_type.as_deref()).await?;
        }

        Ok(reader)
    }

    /// Dispatch one incoming text frame.
    async fn dispatch(&self, text: &str) {
        let msg: WsMessage = match serde_json::from_str(text) {
            Ok(m) => m,
            Err(e) => {
                debug!(error = %e, "unparseable WebSocket frame");
                return;
            }
        };

        match msg {
            WsMessage::Event { event, .. } => {
                let handlers: Vec<EventHandler> = {
                    let map = self.handlers.read().await;
                    map.get(&event.event_type).cloned().unwrap_or_default()
                };
                trace!(
                    event_type = %event.event_type,
                    handler_count = handlers.len(),
                    "dispatching event"
                );
                for handler in handlers {
                    let fut = handler(event.clone());
                    if AssertUnwindSafe(fut).catch_unwind().await.is_err() {
                        error!(event_type = %event.event_type, "event handler panicked");
                    }
                }
            }
            WsMessage::Result {
                id,
                success: false,
                error,
            } => {
                warn!(id, ?error, "hub rejected request");
            }
            WsMessage::AuthInvalid { message } => {
                warn!(%message, "unexpected auth_invalid frame mid-session");
            }
            _ => {}
        }
    }
}

/// Read frames until the next parseable control/auth message, skipping
/// ping/pong. Used only during the handshake.
async fn next_message(reader: &mut WsReader) -> Result<WsMessage, Error> {
    loop {
        match reader.next().await {
            Some(Ok(Message::Text(text))) => {
                return serde_json::from_str(&text).map_err(|e| {
                    Error::WebSocket(format!("unparseable handshake frame: {e}"))
                });
            }
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
            Some(Ok(Message::Close(frame))) => {
                return Err(Error::WebSocket(format!(
                    "socket closed during handshake: {frame:?}"
                )));
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => return Err(Error::WebSocket(format!("read failed: {e}"))),
            None => return Err(Error::WebSocket("stream ended during handshake".into())),
        }
    }
}

// ── Receive / reconnect task ─────────────────────────────────────────

/// Owns the read half for the client's lifetime: read frames until the
/// connection drops, then reconnect with backoff and keep reading.
async fn connection_task(inner: Arc<ClientInner>, mut reader: WsReader, cancel: CancellationToken) {
    loop {
        read_frames(&inner, &mut reader, &cancel).await;
        inner.connected.store(false, Ordering::SeqCst);
        inner.writer.lock().await.take();

        if cancel.is_cancelled() || !inner.running.load(Ordering::SeqCst) {
            break;
        }

        warn!("hub connection lost, reconnecting");
        let mut attempt: u32 = 0;
        loop {
            let delay = backoff_delay(attempt, &inner.reconnect);
            debug!(attempt, delay_ms = delay.as_millis() as u64, "waiting before reconnect");
            tokio::select! {
                biased;
                () = cancel.cancelled() => return,
                () = tokio::time::sleep(delay) => {}
            }

            match inner.establish().await {
                Ok(r) => {
                    info!(attempt, "reconnected to hub");
                    reader = r;
                    break;
                }
                // Auth failures on reconnect keep retrying (the token may
                // be rotated hub-side), but are loud on every attempt.
                Err(e) if e.is_auth() => {
                    error!(attempt, error = %e, "authentication rejected during reconnect");
                }
                Err(e) => {
                    warn!(attempt, error = %e, "reconnect attempt failed");
                }
            }
            attempt = attempt.saturating_add(1);
        }
    }
    debug!("hub connection task exiting");
}

/// Read and dispatch frames until the socket closes or the task is
/// cancelled.
async fn read_frames(inner: &ClientInner, reader: &mut WsReader, cancel: &CancellationToken) {
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => return,
            frame = reader.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => inner.dispatch(&text).await,
                    Some(Ok(Message::Ping(_))) => {
                        // tungstenite answers pings automatically
                        trace!("WebSocket ping");
                    }
                    Some(Ok(Message::Close(frame))) => {
                        info!(?frame, "WebSocket close frame received");
                        return;
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "WebSocket read error");
                        return;
                    }
                    None => {
                        info!("WebSocket stream ended");
                        return;
                    }
                    _ => {}
                }
            }
        }
    }
}
