//! Core types for the GearShare chat hub.
//!
//! This crate holds the data model and the typed hub contract. The client
//! crate drives the connection; nothing here touches the network.

mod chat;
mod hub;
mod ids;

pub use chat::{ChatParticipant, ChatSummary, Message, MessageRead, ReadReceipt, UnreadCount};
pub use hub::{EventDecodeError, EventKind, HubCommand, HubEvent};
pub use ids::{ChatId, IdParseError, MessageId};

use std::fmt;

/// Connection lifecycle state.
///
/// Owned by the transport binding; everything else only observes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No connection, and none in progress.
    #[default]
    Disconnected,
    /// First connection attempt in progress.
    Connecting,
    /// Normal operation.
    Connected,
    /// Connection lost, automatic recovery in progress.
    Reconnecting,
    /// Caller-requested shutdown in progress.
    Disconnecting,
}

impl ConnectionState {
    pub fn is_connected(self) -> bool {
        self == Self::Connected
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
            Self::Disconnecting => "disconnecting",
        })
    }
}
