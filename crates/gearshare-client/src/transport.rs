//! Transport binding seam.
//!
//! A binding owns one realtime link to the hub. It is the single owner of
//! [`ConnectionState`]; the rest of the crate only reads it.

use crate::config::HubUrl;
use crate::error::TransportError;
use crate::policy::ReconnectPolicy;
use crate::token::TokenProvider;
use async_trait::async_trait;
use gearshare_core::ConnectionState;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// Receives the positional arguments of a server-pushed event.
pub type EventHandler = Arc<dyn Fn(Vec<Value>) + Send + Sync>;

/// Called before each automatic reconnect attempt with the attempt number
/// (0-indexed) and the delay about to be waited.
pub type ReconnectingHook = Arc<dyn Fn(u32, Duration) + Send + Sync>;

/// Called when an automatic reconnect succeeds.
pub type ReconnectedHook = Arc<dyn Fn() + Send + Sync>;

/// Called when the link is lost for good, with the last error if any.
pub type ClosedHook = Arc<dyn Fn(Option<&TransportError>) + Send + Sync>;

#[async_trait]
pub trait Transport: Send + Sync {
    /// Open the link. Only valid from `Disconnected`.
    async fn connect(&self) -> Result<(), TransportError>;

    /// Close the link without triggering automatic reconnection.
    async fn stop(&self) -> Result<(), TransportError>;

    /// Invoke a remote method and wait for its completion.
    async fn invoke(&self, method: &str, args: Vec<Value>) -> Result<Value, TransportError>;

    /// Route server pushes named `event` to `handler`, replacing any previous one.
    fn on(&self, event: &str, handler: EventHandler);

    fn off(&self, event: &str);

    fn state(&self) -> ConnectionState;

    fn on_reconnecting(&self, hook: ReconnectingHook);

    fn on_reconnected(&self, hook: ReconnectedHook);

    fn on_closed(&self, hook: ClosedHook);
}

/// Builds bindings for the lifecycle manager.
pub trait TransportFactory: Send + Sync {
    /// `tokens` is consulted on every (re)connect; `policy` governs
    /// automatic reconnection after unplanned loss.
    fn create(
        &self,
        url: &HubUrl,
        tokens: Arc<dyn TokenProvider>,
        policy: ReconnectPolicy,
    ) -> Arc<dyn Transport>;
}
