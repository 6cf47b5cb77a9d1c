//! Scripted transport for unit tests.

use crate::config::{ChatConfig, HubUrl};
use crate::connection::ChatConnection;
use crate::error::TransportError;
use crate::lock;
use crate::policy::ReconnectPolicy;
use crate::token::{StaticToken, TokenProvider, fetch_token};
use crate::transport::{
    ClosedHook, EventHandler, ReconnectedHook, ReconnectingHook, Transport, TransportFactory,
};
use async_trait::async_trait;
use gearshare_core::ConnectionState;
use serde_json::{Value, json};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Scripted outcome of one `invoke`.
pub(crate) enum Step {
    Ok(Value),
    Fail(TransportError),
    /// The link drops mid-call: state goes to `Disconnected`, call fails `Closed`.
    Drop,
    /// As `Drop`, but the binding starts recovering on its own (`Reconnecting`).
    Recovering,
}

#[derive(Default)]
pub(crate) struct MockTransport {
    state: Mutex<ConnectionState>,
    connect_script: Mutex<VecDeque<Result<(), TransportError>>>,
    connect_delay: Mutex<Option<Duration>>,
    tokens: Mutex<Option<Arc<dyn TokenProvider>>>,
    invoke_script: Mutex<VecDeque<Step>>,
    connects: AtomicUsize,
    stops: AtomicUsize,
    invocations: Mutex<Vec<(String, Vec<Value>)>>,
    handlers: Mutex<HashMap<String, EventHandler>>,
    reconnecting: Mutex<Vec<ReconnectingHook>>,
    reconnected: Mutex<Vec<ReconnectedHook>>,
    closed: Mutex<Vec<ClosedHook>>,
}

impl MockTransport {
    /// Queue connect outcomes; unscripted connects succeed.
    pub fn script_connect(&self, results: impl IntoIterator<Item = Result<(), TransportError>>) {
        lock(&self.connect_script).extend(results);
    }

    /// Make every connect take `delay` before it resolves.
    pub fn delay_connect(&self, delay: Duration) {
        *lock(&self.connect_delay) = Some(delay);
    }

    /// Queue invoke outcomes; unscripted invokes return `null`.
    pub fn script_invoke(&self, steps: impl IntoIterator<Item = Step>) {
        lock(&self.invoke_script).extend(steps);
    }

    pub fn set_state(&self, state: ConnectionState) {
        *lock(&self.state) = state;
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    pub fn invocations(&self) -> Vec<(String, Vec<Value>)> {
        lock(&self.invocations).clone()
    }

    pub fn methods(&self) -> Vec<String> {
        lock(&self.invocations).iter().map(|(m, _)| m.clone()).collect()
    }

    pub fn handler_names(&self) -> Vec<String> {
        lock(&self.handlers).keys().cloned().collect()
    }

    /// Push a server event through the registered handler.
    pub fn emit(&self, event: &str, args: Vec<Value>) {
        let handler = lock(&self.handlers).get(event).cloned();
        if let Some(handler) = handler {
            handler(args);
        }
    }

    pub fn fire_reconnecting(&self, attempt: u32, delay: Duration) {
        let hooks = lock(&self.reconnecting).clone();
        for hook in hooks {
            hook(attempt, delay);
        }
    }

    pub fn fire_reconnected(&self) {
        let hooks = lock(&self.reconnected).clone();
        for hook in hooks {
            hook();
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        self.set_state(ConnectionState::Connecting);

        let tokens = lock(&self.tokens).clone();
        if let Some(tokens) = tokens
            && fetch_token(tokens.as_ref()).await.is_none()
        {
            self.set_state(ConnectionState::Disconnected);
            return Err(TransportError::MissingToken);
        }

        let delay = *lock(&self.connect_delay);
        match delay {
            Some(delay) => tokio::time::sleep(delay).await,
            None => tokio::task::yield_now().await,
        }

        let result = lock(&self.connect_script).pop_front().unwrap_or(Ok(()));
        self.set_state(match result {
            Ok(()) => ConnectionState::Connected,
            Err(_) => ConnectionState::Disconnected,
        });
        result
    }

    async fn stop(&self) -> Result<(), TransportError> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        self.set_state(ConnectionState::Disconnected);
        let hooks = lock(&self.closed).clone();
        for hook in hooks {
            hook(None);
        }
        Ok(())
    }

    async fn invoke(&self, method: &str, args: Vec<Value>) -> Result<Value, TransportError> {
        let state = *lock(&self.state);
        if state != ConnectionState::Connected {
            return Err(TransportError::NotConnected(state));
        }
        lock(&self.invocations).push((method.to_string(), args));
        tokio::task::yield_now().await;

        let step = lock(&self.invoke_script).pop_front();
        match step {
            None => Ok(Value::Null),
            Some(Step::Ok(value)) => Ok(value),
            Some(Step::Fail(e)) => Err(e),
            Some(Step::Drop) => {
                self.set_state(ConnectionState::Disconnected);
                Err(TransportError::Closed)
            }
            Some(Step::Recovering) => {
                self.set_state(ConnectionState::Reconnecting);
                Err(TransportError::Closed)
            }
        }
    }

    fn on(&self, event: &str, handler: EventHandler) {
        lock(&self.handlers).insert(event.to_string(), handler);
    }

    fn off(&self, event: &str) {
        lock(&self.handlers).remove(event);
    }

    fn state(&self) -> ConnectionState {
        *lock(&self.state)
    }

    fn on_reconnecting(&self, hook: ReconnectingHook) {
        lock(&self.reconnecting).push(hook);
    }

    fn on_reconnected(&self, hook: ReconnectedHook) {
        lock(&self.reconnected).push(hook);
    }

    fn on_closed(&self, hook: ClosedHook) {
        lock(&self.closed).push(hook);
    }
}

/// Counts how often the token is asked for.
pub(crate) struct CountingToken {
    token: String,
    calls: AtomicUsize,
}

impl CountingToken {
    pub fn new(token: &str) -> Self {
        Self {
            token: token.to_string(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TokenProvider for CountingToken {
    async fn auth_token(&self) -> Option<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Some(self.token.clone())
    }
}

/// Hands out the same [`MockTransport`] and counts how often it was asked.
pub(crate) struct MockFactory {
    pub transport: Arc<MockTransport>,
    created: AtomicUsize,
    policy: Mutex<Option<ReconnectPolicy>>,
}

impl MockFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            transport: Arc::new(MockTransport::default()),
            created: AtomicUsize::new(0),
            policy: Mutex::new(None),
        })
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn policy(&self) -> Option<ReconnectPolicy> {
        *lock(&self.policy)
    }
}

impl TransportFactory for MockFactory {
    fn create(
        &self,
        _url: &HubUrl,
        tokens: Arc<dyn TokenProvider>,
        policy: ReconnectPolicy,
    ) -> Arc<dyn Transport> {
        self.created.fetch_add(1, Ordering::SeqCst);
        *lock(&self.transport.tokens) = Some(tokens);
        *lock(&self.policy) = Some(policy);
        self.transport.clone()
    }
}

pub(crate) fn connection(factory: &Arc<MockFactory>) -> ChatConnection {
    connection_with_token(factory, StaticToken::new("test-token"))
}

pub(crate) fn connection_with_token(factory: &Arc<MockFactory>, token: StaticToken) -> ChatConnection {
    connection_with_provider(factory, Arc::new(token))
}

pub(crate) fn connection_with_provider(
    factory: &Arc<MockFactory>,
    tokens: Arc<dyn TokenProvider>,
) -> ChatConnection {
    let config = ChatConfig::default();
    let factory: Arc<dyn TransportFactory> = factory.clone();
    match ChatConnection::new(&config, tokens, factory) {
        Ok(conn) => conn,
        Err(e) => panic!("default config must be valid: {e}"),
    }
}

pub(crate) fn message_json(id: &str, chat_id: i64, content: &str) -> Value {
    json!({
        "id": id,
        "chatId": chat_id,
        "senderId": "u-1",
        "senderName": "Ada",
        "content": content,
        "sentAt": "2024-05-01T10:00:00Z",
        "readBy": []
    })
}
