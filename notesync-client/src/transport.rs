//! # Transport session
//!
//! One WebSocket connection per client, shared by every open document.
//! Documents are multiplexed over rooms.
//!
//! ```text
//! connect() ──► Connecting ──ok──► Connected ──lost──► Reconnecting{n} ──► ...
//!                   │                                     │
//!                   └──fail──► Reconnecting{1}            └── n > max ──► Failed
//! disconnect() ──► Disconnected
//! ```
//!
//! A supervisor task owns the socket. It rejoins remembered rooms and
//! announces presence after every successful dial, and retries with capped
//! exponential backoff after a failure.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use futures::{SinkExt, StreamExt};
use notesync_core::{BackoffConfig, Broadcaster, EventKind, Presence, SessionId, WireEvent};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::{header::AUTHORIZATION, HeaderValue};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use url::Url;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;
type Handler = Arc<dyn Fn(&WireEvent) + Send + Sync>;

/// Errors that can occur in the transport session.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    /// The server URL could not be parsed.
    #[error("Invalid server URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// The server URL is not `ws://` or `wss://`.
    #[error("Unsupported URL scheme: {0}")]
    UnsupportedScheme(String),

    /// The credentials cannot be sent as a header.
    #[error("Invalid credentials: {0}")]
    InvalidCredentials(String),

    /// Dialing or talking to the server failed.
    #[error("Connection failed: {0}")]
    Connectivity(String),
}

/// Connection state of a [`TransportSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// Not connected and not trying to.
    #[default]
    Disconnected,
    /// First dial in progress.
    Connecting,
    /// Connected and healthy.
    Connected,
    /// Waiting for or performing a reconnect.
    Reconnecting {
        /// Current reconnection attempt number, starting at 1.
        attempt: u32,
    },
    /// Gave up after the configured number of attempts.
    Failed,
}

impl ConnectionState {
    /// Whether the session is connected.
    #[must_use]
    pub const fn is_connected(self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Whether a supervisor is running for this state.
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(
            self,
            Self::Connecting | Self::Connected | Self::Reconnecting { .. }
        )
    }
}

/// Bearer credentials for the collaboration server.
#[derive(Clone)]
pub struct Credentials {
    token: String,
}

impl Credentials {
    /// Wrap a bearer token.
    pub fn bearer(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }

    fn header_value(&self) -> Result<HeaderValue, TransportError> {
        HeaderValue::from_str(&format!("Bearer {}", self.token))
            .map_err(|e| TransportError::InvalidCredentials(e.to_string()))
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("token", &"<redacted>")
            .finish()
    }
}

/// Registration handle returned by [`TransportSession::on`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

struct Supervisor {
    shutdown_tx: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

struct Inner {
    url: Url,
    backoff: BackoffConfig,
    session_id: SessionId,
    state_tx: watch::Sender<ConnectionState>,
    outbound: Mutex<Option<mpsc::UnboundedSender<Message>>>,
    handlers: RwLock<HashMap<EventKind, Vec<(HandlerId, Handler)>>>,
    rooms: Mutex<BTreeMap<String, usize>>,
    last_error: Mutex<Option<TransportError>>,
    next_handler: AtomicU64,
}

/// Shared handle on the client's WebSocket session.
///
/// Cloning is cheap. The supervisor task stops when [`disconnect`] is
/// called or every clone is dropped.
///
/// [`disconnect`]: TransportSession::disconnect
#[derive(Clone)]
pub struct TransportSession {
    inner: Arc<Inner>,
    supervisor: Arc<Mutex<Option<Supervisor>>>,
}

impl std::fmt::Debug for TransportSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportSession")
            .field("url", &self.inner.url.as_str())
            .field("session_id", &self.inner.session_id)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl TransportSession {
    /// Create a disconnected session for `url`.
    ///
    /// # Errors
    ///
    /// Returns an error if `url` is not a valid `ws://` or `wss://` URL.
    pub fn new(url: &str, backoff: BackoffConfig) -> Result<Self, TransportError> {
        let url = Url::parse(url)?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(TransportError::UnsupportedScheme(url.scheme().to_string()));
        }
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Ok(Self {
            inner: Arc::new(Inner {
                url,
                backoff,
                session_id: SessionId::new(),
                state_tx,
                outbound: Mutex::new(None),
                handlers: RwLock::new(HashMap::new()),
                rooms: Mutex::new(BTreeMap::new()),
                last_error: Mutex::new(None),
                next_handler: AtomicU64::new(1),
            }),
            supervisor: Arc::new(Mutex::new(None)),
        })
    }

    /// Server URL.
    #[must_use]
    pub fn url(&self) -> &Url {
        &self.inner.url
    }

    /// Identity stamped on every update this client originates.
    #[must_use]
    pub fn session_id(&self) -> SessionId {
        self.inner.session_id
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.inner.state_tx.borrow()
    }

    /// Watch connection state changes.
    #[must_use]
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    /// Whether the session is connected.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    /// The most recent connectivity error, cleared on a successful dial.
    #[must_use]
    pub fn last_error(&self) -> Option<TransportError> {
        self.inner
            .last_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Start connecting in the background.
    ///
    /// No-op while connecting, connected or reconnecting. From `Failed` a new
    /// reconnect cycle starts.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::InvalidCredentials`] if the token cannot be
    /// sent as a header.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn connect(&self, credentials: Credentials) -> Result<(), TransportError> {
        credentials.header_value()?;

        let mut slot = self
            .supervisor
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if slot.as_ref().is_some_and(|s| !s.handle.is_finished()) {
            tracing::debug!(url = %self.inner.url, "connect ignored, session already active");
            return Ok(());
        }

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let inner = Arc::clone(&self.inner);
        inner.set_state(ConnectionState::Connecting);
        let handle = tokio::spawn(supervise(inner, credentials, shutdown_rx));
        *slot = Some(Supervisor {
            shutdown_tx,
            handle,
        });
        Ok(())
    }

    /// Announce offline presence, close the socket and stop reconnecting.
    pub async fn disconnect(&self) {
        let supervisor = self
            .supervisor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(Supervisor {
            shutdown_tx,
            handle,
        }) = supervisor
        {
            let _ = shutdown_tx.send(());
            if let Err(e) = handle.await {
                if e.is_panic() {
                    tracing::error!("Transport supervisor panicked: {}", e);
                }
            }
        }
        self.inner.set_state(ConnectionState::Disconnected);
    }

    /// Join a room. Remembered and re-joined after every reconnect.
    ///
    /// Joins are counted per room: several editors on one document share the
    /// membership, and `room:join` goes out only for the first.
    pub fn join_room(&self, room_id: impl Into<String>) {
        let room_id = room_id.into();
        let first = {
            let mut rooms = self.inner.rooms.lock().unwrap_or_else(PoisonError::into_inner);
            let count = rooms.entry(room_id.clone()).or_insert(0);
            *count += 1;
            *count == 1
        };
        if first {
            self.emit(WireEvent::join(room_id));
        }
    }

    /// Release one join of a room. `room:leave` goes out when the last
    /// join is released.
    pub fn leave_room(&self, room_id: impl Into<String>) {
        let room_id = room_id.into();
        let last = {
            let mut rooms = self.inner.rooms.lock().unwrap_or_else(PoisonError::into_inner);
            match rooms.get_mut(&room_id) {
                Some(count) if *count > 1 => {
                    *count -= 1;
                    false
                }
                Some(_) => {
                    rooms.remove(&room_id);
                    true
                }
                None => false,
            }
        };
        if last {
            self.emit(WireEvent::leave(room_id));
        }
    }

    /// Rooms this session will hold after (re)connecting.
    #[must_use]
    pub fn rooms(&self) -> Vec<String> {
        self.inner.rooms()
    }

    /// Send an event. Returns whether it was queued.
    ///
    /// Never fails: while not connected the event is dropped.
    pub fn emit(&self, event: WireEvent) -> bool {
        let queued = self.inner.send(&event);
        if !queued {
            tracing::debug!(kind = %event.kind(), "Not connected, dropping outbound event");
        }
        queued
    }

    /// Register `handler` for inbound events of `kind`.
    ///
    /// Handlers run on the transport task in arrival order and must not block.
    pub fn on<F>(&self, kind: EventKind, handler: F) -> HandlerId
    where
        F: Fn(&WireEvent) + Send + Sync + 'static,
    {
        let id = HandlerId(self.inner.next_handler.fetch_add(1, Ordering::Relaxed));
        self.inner
            .handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(kind)
            .or_default()
            .push((id, Arc::new(handler)));
        id
    }

    /// Remove a handler. Returns whether it was registered.
    pub fn off(&self, kind: EventKind, id: HandlerId) -> bool {
        let mut handlers = self
            .inner
            .handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let Some(list) = handlers.get_mut(&kind) else {
            return false;
        };
        let before = list.len();
        list.retain(|(hid, _)| *hid != id);
        before != list.len()
    }

    /// Number of handlers registered for `kind`.
    #[must_use]
    pub fn handler_count(&self, kind: EventKind) -> usize {
        self.inner
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&kind)
            .map_or(0, Vec::len)
    }
}

impl Broadcaster for TransportSession {
    fn broadcast(&self, event: WireEvent) {
        self.emit(event);
    }
}

impl Inner {
    fn set_state(&self, state: ConnectionState) {
        self.state_tx.send_if_modified(|current| {
            if *current == state {
                return false;
            }
            tracing::debug!(from = ?*current, to = ?state, "Transport state changed");
            *current = state;
            true
        });
    }

    fn rooms(&self) -> Vec<String> {
        self.rooms
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    fn record_error(&self, error: TransportError) {
        *self.last_error.lock().unwrap_or_else(PoisonError::into_inner) = Some(error);
    }

    fn clear_error(&self) {
        *self.last_error.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }

    fn install_outbound(&self, sender: Option<mpsc::UnboundedSender<Message>>) {
        *self.outbound.lock().unwrap_or_else(PoisonError::into_inner) = sender;
    }

    fn send(&self, event: &WireEvent) -> bool {
        if !self.state_tx.borrow().is_connected() {
            return false;
        }
        let frame = match event.encode() {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(kind = %event.kind(), "Failed to encode event: {}", e);
                return false;
            }
        };
        self.outbound
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|tx| tx.send(Message::Text(frame)).is_ok())
    }

    /// Decode one inbound frame and hand it to every matching handler.
    fn dispatch(&self, frame: &str) {
        let event = match WireEvent::decode(frame) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!("Dropping undecodable frame: {}", e);
                return;
            }
        };
        let handlers: Vec<Handler> = self
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&event.kind())
            .map(|list| list.iter().map(|(_, h)| Arc::clone(h)).collect())
            .unwrap_or_default();
        tracing::trace!(kind = %event.kind(), handlers = handlers.len(), "Dispatching event");
        for handler in handlers {
            handler(&event);
        }
    }
}

fn build_request(url: &Url, credentials: &Credentials) -> Result<Request, TransportError> {
    let mut request = url
        .as_str()
        .into_client_request()
        .map_err(|e| TransportError::Connectivity(e.to_string()))?;
    request
        .headers_mut()
        .insert(AUTHORIZATION, credentials.header_value()?);
    Ok(request)
}

enum ConnectionEnd {
    Shutdown,
    Lost(String),
}

/// Dial, serve and redial until shut down or out of attempts.
async fn supervise(
    inner: Arc<Inner>,
    credentials: Credentials,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    let mut attempt: u32 = 0;

    loop {
        let request = match build_request(&inner.url, &credentials) {
            Ok(request) => request,
            Err(e) => {
                tracing::error!("Cannot build connection request: {}", e);
                inner.record_error(e);
                inner.set_state(ConnectionState::Failed);
                return;
            }
        };

        let dialed = tokio::select! {
            _ = &mut shutdown_rx => break,
            result = tokio_tungstenite::connect_async(request) => result,
        };

        match dialed {
            Ok((socket, _)) => {
                tracing::info!(url = %inner.url, "Transport connected");
                attempt = 0;
                inner.clear_error();
                match run_connection(&inner, socket, &mut shutdown_rx).await {
                    ConnectionEnd::Shutdown => break,
                    ConnectionEnd::Lost(reason) => {
                        tracing::warn!(url = %inner.url, "Transport connection lost: {}", reason);
                        inner.record_error(TransportError::Connectivity(reason));
                    }
                }
            }
            Err(e) => {
                tracing::warn!(
                    url = %inner.url,
                    attempt,
                    "Failed to connect: {}",
                    e
                );
                inner.record_error(TransportError::Connectivity(e.to_string()));
            }
        }

        if attempt >= inner.backoff.max_attempts {
            tracing::error!(
                url = %inner.url,
                attempts = attempt,
                "Giving up on transport after repeated failures"
            );
            inner.set_state(ConnectionState::Failed);
            return;
        }

        let delay = inner.backoff.delay_for_attempt(attempt);
        attempt = attempt.saturating_add(1);
        inner.set_state(ConnectionState::Reconnecting { attempt });
        tracing::debug!(attempt, delay_ms = delay.as_millis(), "Scheduling reconnect");

        tokio::select! {
            _ = &mut shutdown_rx => break,
            () = tokio::time::sleep(delay) => {}
        }
    }

    inner.set_state(ConnectionState::Disconnected);
    tracing::info!(url = %inner.url, "Transport supervisor stopped");
}

/// Serve one established socket.
async fn run_connection(
    inner: &Inner,
    socket: Socket,
    shutdown_rx: &mut oneshot::Receiver<()>,
) -> ConnectionEnd {
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel();
    inner.install_outbound(Some(tx));
    inner.set_state(ConnectionState::Connected);

    // Rooms joined after this snapshot are emitted through the queue.
    let mut greeting: Vec<WireEvent> = inner.rooms().into_iter().map(WireEvent::join).collect();
    greeting.push(WireEvent::presence(Presence::Online));
    let mut end = None;
    for event in greeting {
        let Ok(frame) = event.encode() else {
            continue;
        };
        if let Err(e) = sink.send(Message::Text(frame)).await {
            end = Some(ConnectionEnd::Lost(e.to_string()));
            break;
        }
    }

    let end = match end {
        Some(end) => end,
        None => loop {
            tokio::select! {
                _ = &mut *shutdown_rx => {
                    while let Ok(msg) = rx.try_recv() {
                        if sink.send(msg).await.is_err() {
                            break;
                        }
                    }
                    if let Ok(frame) = WireEvent::presence(Presence::Offline).encode() {
                        let _ = sink.send(Message::Text(frame)).await;
                    }
                    let _ = sink.close().await;
                    break ConnectionEnd::Shutdown;
                }

                Some(msg) = rx.recv() => {
                    if let Err(e) = sink.send(msg).await {
                        break ConnectionEnd::Lost(e.to_string());
                    }
                }

                frame = stream.next() => {
                    match frame {
                        Some(Ok(Message::Text(text))) => inner.dispatch(&text),
                        Some(Ok(Message::Close(_))) | None => {
                            break ConnectionEnd::Lost("closed by server".to_string());
                        }
                        Some(Err(e)) => break ConnectionEnd::Lost(e.to_string()),
                        Some(Ok(_)) => {}
                    }
                }
            }
        },
    };

    inner.install_outbound(None);
    end
}
