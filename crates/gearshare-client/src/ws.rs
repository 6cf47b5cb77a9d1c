//! WebSocket binding for the JSON hub protocol.
//!
//! Frames are JSON objects terminated by the ASCII record separator (0x1E).
//! After the socket opens the client sends the protocol handshake and waits
//! for an empty reply. From then on:
//!
//! - type 1 (invocation): client calls carry an `invocationId`; server
//!   pushes do not and are routed to event handlers by `target`
//! - type 3 (completion): result or error for an `invocationId`
//! - type 6 (ping): keep-alive, sent both ways
//! - type 7 (close): server is closing, optionally allowing reconnect
//!
//! The access token travels as the `access_token` query parameter and is
//! fetched again for every reconnect attempt.

use crate::config::{ChatConfig, HubUrl};
use crate::error::TransportError;
use crate::lock;
use crate::policy::{ReconnectOutcome, ReconnectPolicy, run_reconnect};
use crate::token::{TokenProvider, fetch_token};
use crate::transport::{
    ClosedHook, EventHandler, ReconnectedHook, ReconnectingHook, Transport, TransportFactory,
};
use async_trait::async_trait;
use futures_util::future::BoxFuture;
use futures_util::{SinkExt, StreamExt};
use gearshare_core::ConnectionState;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

type HubSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;
type PendingCall = oneshot::Sender<Result<Value, TransportError>>;

const RECORD_SEPARATOR: char = '\u{1e}';
const HANDSHAKE: &str = "{\"protocol\":\"json\",\"version\":1}\u{1e}";

const INVOCATION: u8 = 1;
const COMPLETION: u8 = 3;
const PING: u8 = 6;
const CLOSE: u8 = 7;

/// Socket-level tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WsOptions {
    pub connect_timeout: Duration,
    pub keep_alive_interval: Duration,
}

impl Default for WsOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            keep_alive_interval: Duration::from_secs(15),
        }
    }
}

impl WsOptions {
    pub fn from_config(config: &ChatConfig) -> Self {
        Self {
            connect_timeout: config.connect_timeout(),
            keep_alive_interval: config.keep_alive_interval(),
        }
    }
}

/// One hub protocol message.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HubFrame {
    #[serde(rename = "type")]
    kind: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    invocation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    target: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    arguments: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    allow_reconnect: Option<bool>,
}

impl HubFrame {
    fn invocation(id: String, target: &str, arguments: Vec<Value>) -> Self {
        Self {
            kind: INVOCATION,
            invocation_id: Some(id),
            target: Some(target.to_string()),
            arguments: Some(arguments),
            ..Self::default()
        }
    }

    fn ping() -> Self {
        Self {
            kind: PING,
            ..Self::default()
        }
    }

    fn encode(&self) -> Result<String, TransportError> {
        let mut text =
            serde_json::to_string(self).map_err(|e| TransportError::Protocol(e.to_string()))?;
        text.push(RECORD_SEPARATOR);
        Ok(text)
    }
}

/// Split a text frame into its protocol messages.
fn decode_frames(text: &str) -> impl Iterator<Item = Result<HubFrame, serde_json::Error>> + '_ {
    text.split(RECORD_SEPARATOR)
        .filter(|s| !s.trim().is_empty())
        .map(serde_json::from_str)
}

#[derive(Deserialize)]
struct HandshakeReply {
    #[serde(default)]
    error: Option<String>,
}

/// Why a session task stopped reading.
enum SessionEnd {
    Stopped,
    Lost(Option<TransportError>),
    ClosedByServer {
        error: Option<String>,
        allow_reconnect: bool,
    },
}

struct Shared {
    url: HubUrl,
    tokens: Arc<dyn TokenProvider>,
    policy: ReconnectPolicy,
    options: WsOptions,
    state: watch::Sender<ConnectionState>,
    handlers: Mutex<HashMap<String, EventHandler>>,
    reconnecting: Mutex<Vec<ReconnectingHook>>,
    reconnected: Mutex<Vec<ReconnectedHook>>,
    closed: Mutex<Vec<ClosedHook>>,
    pending: Mutex<HashMap<String, PendingCall>>,
    outbound: Mutex<Option<mpsc::UnboundedSender<WsMessage>>>,
    session: Mutex<Option<JoinHandle<()>>>,
    recovery: Mutex<Option<JoinHandle<()>>>,
    next_invocation: AtomicU64,
    stopping: AtomicBool,
}

impl Shared {
    fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            tracing::debug!("Hub connection {} -> {}", previous, state);
        }
    }

    fn fail_pending(&self) {
        let pending: Vec<PendingCall> = lock(&self.pending).drain().map(|(_, tx)| tx).collect();
        for tx in pending {
            let _ = tx.send(Err(TransportError::Closed));
        }
    }

    fn notify_closed(&self, error: Option<&TransportError>) {
        let hooks = lock(&self.closed).clone();
        for hook in hooks {
            hook(error);
        }
    }

    /// Route one protocol message. Returns `Some` when the server closes.
    fn handle_frame(&self, frame: HubFrame) -> Option<SessionEnd> {
        match frame.kind {
            INVOCATION => {
                let Some(target) = frame.target else {
                    tracing::warn!("Hub invocation without target");
                    return None;
                };
                if frame.invocation_id.is_some() {
                    tracing::warn!("Hub expects a result for {}, which is unsupported", target);
                    return None;
                }
                let handler = lock(&self.handlers).get(&target).cloned();
                match handler {
                    Some(handler) => handler(frame.arguments.unwrap_or_default()),
                    None => tracing::debug!("No handler for hub event {}", target),
                }
            }
            COMPLETION => {
                let Some(id) = frame.invocation_id else {
                    tracing::warn!("Hub completion without invocation id");
                    return None;
                };
                let pending = lock(&self.pending).remove(&id);
                match pending {
                    Some(tx) => {
                        let result = match frame.error {
                            Some(error) => Err(TransportError::Remote(error)),
                            None => Ok(frame.result.unwrap_or(Value::Null)),
                        };
                        let _ = tx.send(result);
                    }
                    None => tracing::debug!("Completion for unknown invocation {}", id),
                }
            }
            PING => {}
            CLOSE => {
                return Some(SessionEnd::ClosedByServer {
                    error: frame.error,
                    allow_reconnect: frame.allow_reconnect.unwrap_or(false),
                });
            }
            other => tracing::debug!("Ignoring hub message type {}", other),
        }
        None
    }

    fn handle_text(&self, text: &str) -> Option<SessionEnd> {
        for frame in decode_frames(text) {
            match frame {
                Ok(frame) => {
                    if let Some(end) = self.handle_frame(frame) {
                        return Some(end);
                    }
                }
                Err(e) => tracing::warn!("Invalid hub message: {}", e),
            }
        }
        None
    }
}

/// Open the socket, complete the handshake and start the session task.
async fn open_session(shared: &Arc<Shared>) -> Result<(), TransportError> {
    let token = fetch_token(shared.tokens.as_ref())
        .await
        .ok_or(TransportError::MissingToken)?;
    let url = shared.url.websocket_url(&token);
    let timeout = shared.options.connect_timeout;

    let (socket, leftover) = tokio::time::timeout(timeout, handshake(url.as_str()))
        .await
        .map_err(|_| TransportError::Timeout(timeout))??;

    let (tx, rx) = mpsc::unbounded_channel();
    *lock(&shared.outbound) = Some(tx);
    shared.set_state(ConnectionState::Connected);

    let handle = tokio::spawn(run_session(shared.clone(), socket, leftover, rx));
    *lock(&shared.session) = Some(handle);
    Ok(())
}

/// Returns the socket and any messages that arrived with the handshake reply.
async fn handshake(url: &str) -> Result<(HubSocket, String), TransportError> {
    let (mut socket, _) = connect_async(url)
        .await
        .map_err(|e| TransportError::Connect(e.to_string()))?;
    socket
        .send(WsMessage::Text(HANDSHAKE.into()))
        .await
        .map_err(|e| TransportError::Connect(e.to_string()))?;

    loop {
        match socket.next().await {
            Some(Ok(WsMessage::Text(text))) => {
                let (reply, rest) = text
                    .as_str()
                    .split_once(RECORD_SEPARATOR)
                    .unwrap_or((text.as_str(), ""));
                let reply: HandshakeReply = serde_json::from_str(reply)
                    .map_err(|e| TransportError::Protocol(format!("bad handshake reply: {e}")))?;
                if let Some(error) = reply.error {
                    return Err(TransportError::Connect(format!("handshake rejected: {error}")));
                }
                return Ok((socket, rest.to_string()));
            }
            Some(Ok(WsMessage::Close(_))) | None => return Err(TransportError::Closed),
            Some(Ok(_)) => continue,
            Some(Err(e)) => return Err(TransportError::Connect(e.to_string())),
        }
    }
}

async fn run_session(
    shared: Arc<Shared>,
    socket: HubSocket,
    leftover: String,
    mut outbound: mpsc::UnboundedReceiver<WsMessage>,
) {
    let (mut sink, mut stream) = socket.split();
    let mut keep_alive = tokio::time::interval(shared.options.keep_alive_interval);
    keep_alive.set_missed_tick_behavior(MissedTickBehavior::Delay);
    keep_alive.tick().await;

    let end = match shared.handle_text(&leftover) {
        Some(end) => end,
        None => loop {
            tokio::select! {
                msg = outbound.recv() => match msg {
                    Some(msg) => {
                        if let Err(e) = sink.send(msg).await {
                            break SessionEnd::Lost(Some(TransportError::Connect(e.to_string())));
                        }
                    }
                    None => {
                        let _ = sink.send(WsMessage::Close(None)).await;
                        break SessionEnd::Stopped;
                    }
                },

                msg = stream.next() => match msg {
                    Some(Ok(WsMessage::Text(text))) => {
                        if let Some(end) = shared.handle_text(text.as_str()) {
                            break end;
                        }
                    }
                    Some(Ok(WsMessage::Close(_))) | None => break SessionEnd::Lost(None),
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::debug!("WebSocket error: {}", e);
                        break SessionEnd::Lost(Some(TransportError::Connect(e.to_string())));
                    }
                },

                _ = keep_alive.tick() => {
                    let Ok(ping) = HubFrame::ping().encode() else { continue };
                    if let Err(e) = sink.send(WsMessage::Text(ping.into())).await {
                        break SessionEnd::Lost(Some(TransportError::Connect(e.to_string())));
                    }
                }
            }
        },
    };

    end_session(&shared, end);
}

fn end_session(shared: &Arc<Shared>, end: SessionEnd) {
    lock(&shared.outbound).take();

    let (recover, error) = match end {
        SessionEnd::Stopped => (false, None),
        SessionEnd::Lost(error) => (true, error),
        SessionEnd::ClosedByServer {
            error,
            allow_reconnect,
        } => (allow_reconnect, error.map(TransportError::Remote)),
    };
    if shared.stopping.load(Ordering::SeqCst) {
        shared.fail_pending();
        return;
    }

    // State moves first so callers woken by the failed calls see the loss.
    if recover && shared.policy.max_attempts > 0 {
        shared.set_state(ConnectionState::Reconnecting);
        shared.fail_pending();
        let handle = tokio::spawn(recover_session(shared.clone(), error));
        *lock(&shared.recovery) = Some(handle);
    } else {
        shared.set_state(ConnectionState::Disconnected);
        shared.fail_pending();
        tracing::info!("Hub closed the connection to {}", shared.url);
        shared.notify_closed(error.as_ref());
    }
}

fn recover_session(shared: Arc<Shared>, cause: Option<TransportError>) -> BoxFuture<'static, ()> {
    Box::pin(async move {
        match &cause {
            Some(e) => tracing::warn!("Lost connection to {}: {}", shared.url, e),
            None => tracing::warn!("Lost connection to {}", shared.url),
        }

        let policy = shared.policy;
        let outcome = run_reconnect(
            &policy,
            |attempt, delay| {
                tracing::debug!(
                    "Reconnecting to {} (attempt {}/{}) in {:?}",
                    shared.url,
                    attempt + 1,
                    policy.max_attempts,
                    delay
                );
                let hooks = lock(&shared.reconnecting).clone();
                for hook in hooks {
                    hook(attempt, delay);
                }
            },
            |_| open_session(&shared),
        )
        .await;

        match outcome {
            ReconnectOutcome::Recovered { attempts } => {
                tracing::info!("Reconnected to {} after {} attempt(s)", shared.url, attempts);
                let hooks = lock(&shared.reconnected).clone();
                for hook in hooks {
                    hook();
                }
            }
            ReconnectOutcome::Exhausted { last_error } => {
                shared.set_state(ConnectionState::Disconnected);
                tracing::warn!(
                    "Giving up on {} after {} reconnect attempts",
                    shared.url,
                    policy.max_attempts
                );
                shared.notify_closed(last_error.as_ref());
            }
        }
    })
}

/// Returns a connect that failed or was dropped midway to `Disconnected`.
struct ConnectAttempt<'a>(&'a Shared);

impl Drop for ConnectAttempt<'_> {
    fn drop(&mut self) {
        if self.0.state() == ConnectionState::Connecting {
            self.0.set_state(ConnectionState::Disconnected);
        }
    }
}

/// Hub binding over a WebSocket.
pub struct WsTransport {
    shared: Arc<Shared>,
}

impl WsTransport {
    pub fn new(
        url: HubUrl,
        tokens: Arc<dyn TokenProvider>,
        policy: ReconnectPolicy,
        options: WsOptions,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            shared: Arc::new(Shared {
                url,
                tokens,
                policy,
                options,
                state,
                handlers: Mutex::new(HashMap::new()),
                reconnecting: Mutex::new(Vec::new()),
                reconnected: Mutex::new(Vec::new()),
                closed: Mutex::new(Vec::new()),
                pending: Mutex::new(HashMap::new()),
                outbound: Mutex::new(None),
                session: Mutex::new(None),
                recovery: Mutex::new(None),
                next_invocation: AtomicU64::new(1),
                stopping: AtomicBool::new(false),
            }),
        }
    }

    /// Watch state transitions.
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        let shared = &self.shared;
        match shared.state() {
            ConnectionState::Disconnected => {}
            ConnectionState::Connected => return Ok(()),
            other => {
                return Err(TransportError::Connect(format!("cannot connect while {other}")));
            }
        }

        shared.stopping.store(false, Ordering::SeqCst);
        shared.set_state(ConnectionState::Connecting);
        let _attempt = ConnectAttempt(shared.as_ref());
        tracing::debug!("Connecting to {}", shared.url);

        open_session(shared).await?;
        tracing::info!("Connected to {}", shared.url);
        Ok(())
    }

    async fn stop(&self) -> Result<(), TransportError> {
        let shared = &self.shared;
        shared.stopping.store(true, Ordering::SeqCst);
        if shared.state() == ConnectionState::Disconnected {
            return Ok(());
        }
        shared.set_state(ConnectionState::Disconnecting);

        let recovery = lock(&shared.recovery).take();
        if let Some(recovery) = recovery {
            recovery.abort();
        }
        lock(&shared.outbound).take();
        let session = lock(&shared.session).take();
        if let Some(session) = session {
            let _ = session.await;
        }

        shared.fail_pending();
        shared.set_state(ConnectionState::Disconnected);
        tracing::info!("Disconnected from {}", shared.url);
        Ok(())
    }

    async fn invoke(&self, method: &str, args: Vec<Value>) -> Result<Value, TransportError> {
        let shared = &self.shared;
        let state = shared.state();
        if state != ConnectionState::Connected {
            return Err(TransportError::NotConnected(state));
        }

        let id = shared.next_invocation.fetch_add(1, Ordering::Relaxed).to_string();
        let frame = HubFrame::invocation(id.clone(), method, args).encode()?;
        let (tx, rx) = oneshot::channel();
        lock(&shared.pending).insert(id.clone(), tx);

        let sent = lock(&shared.outbound)
            .as_ref()
            .is_some_and(|out| out.send(WsMessage::Text(frame.into())).is_ok());
        if !sent {
            lock(&shared.pending).remove(&id);
            return Err(TransportError::Closed);
        }

        tracing::debug!("Invoked {} (invocation {})", method, id);
        rx.await.unwrap_or(Err(TransportError::Closed))
    }

    fn on(&self, event: &str, handler: EventHandler) {
        lock(&self.shared.handlers).insert(event.to_string(), handler);
    }

    fn off(&self, event: &str) {
        lock(&self.shared.handlers).remove(event);
    }

    fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    fn on_reconnecting(&self, hook: ReconnectingHook) {
        lock(&self.shared.reconnecting).push(hook);
    }

    fn on_reconnected(&self, hook: ReconnectedHook) {
        lock(&self.shared.reconnected).push(hook);
    }

    fn on_closed(&self, hook: ClosedHook) {
        lock(&self.shared.closed).push(hook);
    }
}

impl Drop for WsTransport {
    fn drop(&mut self) {
        self.shared.stopping.store(true, Ordering::SeqCst);
        lock(&self.shared.outbound).take();
        let recovery = lock(&self.shared.recovery).take();
        if let Some(recovery) = recovery {
            recovery.abort();
        }
    }
}

/// Builds [`WsTransport`] bindings.
#[derive(Debug, Clone, Default)]
pub struct WsTransportFactory {
    options: WsOptions,
}

impl WsTransportFactory {
    pub fn new(options: WsOptions) -> Self {
        Self { options }
    }
}

impl TransportFactory for WsTransportFactory {
    fn create(
        &self,
        url: &HubUrl,
        tokens: Arc<dyn TokenProvider>,
        policy: ReconnectPolicy,
    ) -> Arc<dyn Transport> {
        Arc::new(WsTransport::new(url.clone(), tokens, policy, self.options))
    }
}
