//! Connection lifecycle.
//!
//! [`ChatConnection`] is the one owner of the transport binding. The binding
//! is built on first use behind an async gate, so concurrent first callers
//! share a single construction, a single connect and its outcome. It is
//! published only after that first connect settles and survives until
//! [`ChatConnection::disconnect`]; subscriptions live in the dispatcher and
//! outlast it.

use crate::config::{ChatConfig, HubUrl};
use crate::dispatch::{EventDispatcher, Subscription};
use crate::error::{ChatError, ConfigError, TransportError};
use crate::policy::ReconnectPolicy;
use crate::token::{PrimedToken, TokenProvider, fetch_token};
use crate::transport::{Transport, TransportFactory};
use crate::ws::{WsOptions, WsTransportFactory};
use gearshare_core::{ChatId, ConnectionState, EventKind, Message, MessageRead, UnreadCount};
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};

pub struct ChatConnection {
    hub_url: HubUrl,
    policy: ReconnectPolicy,
    pub(crate) poll_interval: Duration,
    pub(crate) recovery_wait: Duration,
    tokens: Arc<dyn TokenProvider>,
    factory: Arc<dyn TransportFactory>,
    dispatcher: EventDispatcher,
    binding: RwLock<Option<Arc<dyn Transport>>>,
    /// Held for a whole first-use round; keeps that round's failure for the
    /// callers queued behind it.
    init_gate: Mutex<Option<ChatError>>,
    connect_gate: Mutex<()>,
    reconnect_attempts: Arc<AtomicU32>,
}

impl ChatConnection {
    pub fn new(
        config: &ChatConfig,
        tokens: Arc<dyn TokenProvider>,
        factory: Arc<dyn TransportFactory>,
    ) -> Result<Self, ConfigError> {
        Ok(Self {
            hub_url: config.hub_url()?,
            policy: config.reconnect_policy(),
            poll_interval: config.poll_interval(),
            recovery_wait: config.connect_timeout(),
            tokens,
            factory,
            dispatcher: EventDispatcher::new(),
            binding: RwLock::new(None),
            init_gate: Mutex::new(None),
            connect_gate: Mutex::new(()),
            reconnect_attempts: Arc::new(AtomicU32::new(0)),
        })
    }

    /// Connection backed by [`WsTransport`](crate::WsTransport).
    pub fn websocket(config: &ChatConfig, tokens: Arc<dyn TokenProvider>) -> Result<Self, ConfigError> {
        let factory = WsTransportFactory::new(WsOptions::from_config(config));
        Self::new(config, tokens, Arc::new(factory))
    }

    pub fn hub_url(&self) -> &HubUrl {
        &self.hub_url
    }

    pub fn dispatcher(&self) -> &EventDispatcher {
        &self.dispatcher
    }

    /// Current state; `Disconnected` before initialisation.
    pub async fn connection_state(&self) -> ConnectionState {
        match self.current_binding().await {
            Some(binding) => binding.state(),
            None => ConnectionState::Disconnected,
        }
    }

    /// Automatic reconnect attempts made since the last successful (re)connect.
    pub fn reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts.load(Ordering::SeqCst)
    }

    pub(crate) async fn current_binding(&self) -> Option<Arc<dyn Transport>> {
        self.binding.read().await.clone()
    }

    /// Build, wire and start the binding on first call; later calls return
    /// immediately.
    ///
    /// Callers that arrive while the first round is running wait for it and
    /// get its result. If the first connect fails the binding is kept and the
    /// error returned; callers retry through
    /// [`start_connection`](Self::start_connection). Dropping the future
    /// mid-round leaves nothing behind and the next call starts over.
    pub async fn ensure_initialized(&self) -> Result<(), ChatError> {
        if self.binding.read().await.is_some() {
            return Ok(());
        }

        let mut round = self.init_gate.lock().await;
        if self.binding.read().await.is_some() {
            return round.clone().map_or(Ok(()), Err);
        }

        let Some(token) = fetch_token(self.tokens.as_ref()).await else {
            tracing::warn!("Cannot initialise chat connection: no auth token");
            return Err(ChatError::AuthTokenMissing);
        };

        tracing::debug!("Creating hub binding for {}", self.hub_url);
        let tokens: Arc<dyn TokenProvider> = Arc::new(PrimedToken::new(token, self.tokens.clone()));
        let binding = self.factory.create(&self.hub_url, tokens, self.policy);
        self.wire(&binding);

        let result = self.connect_binding(&binding).await;
        *self.binding.write().await = Some(binding);
        *round = result.as_ref().err().cloned();
        result
    }

    /// Register event routing and lifecycle hooks on a fresh binding.
    fn wire(&self, binding: &Arc<dyn Transport>) {
        for kind in EventKind::ALL {
            let dispatcher = self.dispatcher.clone();
            binding.on(
                kind.name(),
                Arc::new(move |args: Vec<Value>| dispatcher.dispatch_raw(kind, &args)),
            );
        }

        let attempts = self.reconnect_attempts.clone();
        binding.on_reconnecting(Arc::new(move |attempt: u32, delay: Duration| {
            attempts.store(attempt + 1, Ordering::SeqCst);
            tracing::info!("Chat hub reconnecting (attempt {}) in {:?}", attempt + 1, delay);
        }));

        let attempts = self.reconnect_attempts.clone();
        binding.on_reconnected(Arc::new(move || {
            attempts.store(0, Ordering::SeqCst);
            tracing::info!("Chat hub reconnected");
        }));

        binding.on_closed(Arc::new(log_closed));
    }

    /// Connect if currently disconnected. Failures are returned, never retried here.
    pub async fn start_connection(&self) -> Result<(), ChatError> {
        match self.current_binding().await {
            Some(binding) => self.connect_binding(&binding).await,
            None => self.ensure_initialized().await,
        }
    }

    async fn connect_binding(&self, binding: &Arc<dyn Transport>) -> Result<(), ChatError> {
        let _gate = self.connect_gate.lock().await;
        if binding.state() != ConnectionState::Disconnected {
            return Ok(());
        }

        tracing::info!("Connecting to chat hub at {}", self.hub_url);
        match binding.connect().await {
            Ok(()) => {
                self.reconnect_attempts.store(0, Ordering::SeqCst);
                Ok(())
            }
            Err(e) => {
                tracing::warn!("Chat hub connect failed: {}", e);
                Err(ChatError::from_connect(e))
            }
        }
    }

    /// Stop and drop the binding. The next operation builds a new one.
    pub async fn disconnect(&self) {
        let _gate = self.init_gate.lock().await;
        let Some(binding) = self.binding.write().await.take() else {
            return;
        };

        for kind in EventKind::ALL {
            binding.off(kind.name());
        }
        if let Err(e) = binding.stop().await {
            tracing::warn!("Error stopping chat hub connection: {}", e);
        }
        self.reconnect_attempts.store(0, Ordering::SeqCst);
        tracing::info!("Chat connection torn down");
    }

    pub fn on_message_received(
        &self,
        callback: impl Fn(&Message) + Send + Sync + 'static,
    ) -> Subscription {
        self.dispatcher.on_message_received(callback)
    }

    pub fn on_message_read(
        &self,
        callback: impl Fn(&MessageRead) + Send + Sync + 'static,
    ) -> Subscription {
        self.dispatcher.on_message_read(callback)
    }

    pub fn on_chat_updated(&self, callback: impl Fn(&ChatId) + Send + Sync + 'static) -> Subscription {
        self.dispatcher.on_chat_updated(callback)
    }

    pub fn on_unread_count_changed(
        &self,
        callback: impl Fn(&UnreadCount) + Send + Sync + 'static,
    ) -> Subscription {
        self.dispatcher.on_unread_count_changed(callback)
    }
}

fn log_closed(error: Option<&TransportError>) {
    match error {
        Some(e) => tracing::warn!("Chat hub connection closed: {}", e),
        None => tracing::info!("Chat hub connection closed"),
    }
}
