//! Realtime chat connection layer for the GearShare hub.
//!
//! [`ChatConnection`] owns a single multiplexed link to the chat hub. It is
//! initialised lazily on first use, reconnects on its own after network
//! loss, fans inbound events out to any number of subscribers and retries
//! outbound commands once across a reconnect.
//!
//! ```rust,ignore
//! let config = ChatConfig::load("gearshare.toml")?;
//! let chat = ChatConnection::websocket(&config, Arc::new(EnvToken::new("GEARSHARE_TOKEN")))?;
//!
//! let _sub = chat.on_message_received(|m| println!("{}: {}", m.sender_name, m.content));
//! chat.join_chat(ChatId::new(42)).await?;
//! chat.send_message(ChatId::new(42), "is the tent still free on Saturday?").await?;
//! ```

mod config;
mod connection;
mod dispatch;
mod error;
mod invoker;
mod policy;
mod token;
mod transport;
mod waiter;
mod ws;

#[cfg(test)]
mod testing;

pub use config::{ChatConfig, HubUrl, ReconnectConfig};
pub use connection::ChatConnection;
pub use dispatch::{EventDispatcher, Subscription};
pub use error::{ChatError, ConfigError, TransportError};
pub use policy::{ReconnectOutcome, ReconnectPolicy, run_reconnect};
pub use token::{EnvToken, StaticToken, TokenProvider};
pub use transport::{
    ClosedHook, EventHandler, ReconnectedHook, ReconnectingHook, Transport, TransportFactory,
};
pub use ws::{WsOptions, WsTransport, WsTransportFactory};

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Lock a mutex, ignoring poisoning; no critical section here leaves state half-written.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
