//! Hub contract.
//!
//! The hub exposes four remote operations and pushes four kinds of event.
//! Both sides are closed enums so dispatch is checked for exhaustiveness;
//! names only appear at the wire boundary.

use crate::{ChatId, Message, MessageId, MessageRead, UnreadCount};
use serde_json::Value;
use std::fmt;

/// Remote operations the client invokes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HubCommand {
    SendMessage { chat_id: ChatId, content: String },
    JoinChat(ChatId),
    LeaveChat(ChatId),
    MarkAsRead(MessageId),
}

impl HubCommand {
    /// Remote method name.
    pub fn method(&self) -> &'static str {
        match self {
            Self::SendMessage { .. } => "SendMessage",
            Self::JoinChat(_) => "JoinChat",
            Self::LeaveChat(_) => "LeaveChat",
            Self::MarkAsRead(_) => "MarkAsRead",
        }
    }

    /// Positional arguments, in the order the hub declares them.
    pub fn arguments(&self) -> Vec<Value> {
        match self {
            Self::SendMessage { chat_id, content } => {
                vec![Value::from(chat_id.get()), Value::from(content.as_str())]
            }
            Self::JoinChat(chat_id) | Self::LeaveChat(chat_id) => vec![Value::from(chat_id.get())],
            Self::MarkAsRead(message_id) => vec![Value::from(message_id.as_str())],
        }
    }
}

impl fmt::Display for HubCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SendMessage { chat_id, .. } => write!(f, "SendMessage(chat {chat_id})"),
            Self::JoinChat(chat_id) => write!(f, "JoinChat({chat_id})"),
            Self::LeaveChat(chat_id) => write!(f, "LeaveChat({chat_id})"),
            Self::MarkAsRead(message_id) => write!(f, "MarkAsRead({message_id})"),
        }
    }
}

/// The kinds of event the hub pushes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    MessageReceived,
    MessageRead,
    ChatUpdated,
    UnreadCountChanged,
}

impl EventKind {
    pub const ALL: [EventKind; 4] = [
        EventKind::MessageReceived,
        EventKind::MessageRead,
        EventKind::ChatUpdated,
        EventKind::UnreadCountChanged,
    ];

    /// Wire name of the event.
    pub fn name(self) -> &'static str {
        match self {
            Self::MessageReceived => "ReceiveMessage",
            Self::MessageRead => "MessageRead",
            Self::ChatUpdated => "ChatUpdated",
            Self::UnreadCountChanged => "UnreadCountChanged",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.name() == name)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A decoded server-pushed event.
#[derive(Debug, Clone, PartialEq)]
pub enum HubEvent {
    MessageReceived(Message),
    MessageRead(MessageRead),
    ChatUpdated(ChatId),
    UnreadCountChanged(UnreadCount),
}

impl HubEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::MessageReceived(_) => EventKind::MessageReceived,
            Self::MessageRead(_) => EventKind::MessageRead,
            Self::ChatUpdated(_) => EventKind::ChatUpdated,
            Self::UnreadCountChanged(_) => EventKind::UnreadCountChanged,
        }
    }

    /// Decode an event from its wire name and positional arguments.
    pub fn decode(name: &str, args: &[Value]) -> Result<Self, EventDecodeError> {
        let kind = EventKind::from_name(name)
            .ok_or_else(|| EventDecodeError::UnknownEvent(name.to_string()))?;
        Self::decode_kind(kind, args)
    }

    pub fn decode_kind(kind: EventKind, args: &[Value]) -> Result<Self, EventDecodeError> {
        let payload = args
            .first()
            .cloned()
            .ok_or(EventDecodeError::MissingPayload(kind))?;
        let bad = |source| EventDecodeError::BadPayload { kind, source };

        Ok(match kind {
            EventKind::MessageReceived => Self::MessageReceived(serde_json::from_value(payload).map_err(bad)?),
            EventKind::MessageRead => Self::MessageRead(serde_json::from_value(payload).map_err(bad)?),
            EventKind::ChatUpdated => Self::ChatUpdated(serde_json::from_value(payload).map_err(bad)?),
            EventKind::UnreadCountChanged => {
                Self::UnreadCountChanged(serde_json::from_value(payload).map_err(bad)?)
            }
        })
    }
}

/// Error decoding a pushed event.
#[derive(Debug, thiserror::Error)]
pub enum EventDecodeError {
    #[error("unknown hub event: {0}")]
    UnknownEvent(String),
    #[error("{0} event carried no payload")]
    MissingPayload(EventKind),
    #[error("malformed {kind} payload: {source}")]
    BadPayload {
        kind: EventKind,
        #[source]
        source: serde_json::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn command_arguments_are_positional() {
        let cmd = HubCommand::SendMessage {
            chat_id: ChatId::new(42),
            content: "hi".into(),
        };
        assert_eq!(cmd.method(), "SendMessage");
        assert_eq!(cmd.arguments(), vec![json!(42), json!("hi")]);

        let cmd = HubCommand::MarkAsRead(MessageId::from(9_i64));
        assert_eq!(cmd.arguments(), vec![json!("9")]);
    }

    #[test]
    fn event_names_roundtrip() {
        for kind in EventKind::ALL {
            assert_eq!(EventKind::from_name(kind.name()), Some(kind));
        }
        assert_eq!(EventKind::from_name("Typing"), None);
    }

    #[test]
    fn decode_unread_count() {
        let event = HubEvent::decode(
            "UnreadCountChanged",
            &[json!({"chatId": 5, "unreadCount": 3})],
        )
        .unwrap();
        assert_eq!(
            event,
            HubEvent::UnreadCountChanged(UnreadCount {
                chat_id: ChatId::new(5),
                unread_count: 3
            })
        );
    }

    #[test]
    fn decode_chat_updated_takes_bare_id() {
        let event = HubEvent::decode("ChatUpdated", &[json!(12)]).unwrap();
        assert_eq!(event, HubEvent::ChatUpdated(ChatId::new(12)));
    }

    #[test]
    fn decode_rejects_unknown_and_malformed() {
        assert!(matches!(
            HubEvent::decode("Typing", &[json!(1)]),
            Err(EventDecodeError::UnknownEvent(_))
        ));
        assert!(matches!(
            HubEvent::decode("ChatUpdated", &[]),
            Err(EventDecodeError::MissingPayload(EventKind::ChatUpdated))
        ));
        assert!(matches!(
            HubEvent::decode("MessageRead", &[json!({"nope": true})]),
            Err(EventDecodeError::BadPayload { .. })
        ));
    }
}
