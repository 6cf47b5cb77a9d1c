//! Chat payloads produced by the hub.

use crate::{ChatId, MessageId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A chat message as delivered by the hub.
///
/// Immutable once received. The client never builds one of these; outbound
/// text goes through `SendMessage` as a chat id and plain content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MessageId,
    pub chat_id: ChatId,
    pub sender_id: String,
    pub sender_name: String,
    /// Avatar reference (URL or storage key).
    #[serde(default)]
    pub sender_avatar: Option<String>,
    pub content: String,
    pub sent_at: DateTime<Utc>,
    #[serde(default)]
    pub read_by: Vec<ReadReceipt>,
}

impl Message {
    /// Whether `user_id` appears among the read receipts.
    pub fn is_read_by(&self, user_id: &str) -> bool {
        self.read_by.iter().any(|r| r.user_id == user_id)
    }
}

/// One reader of a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadReceipt {
    pub user_id: String,
    pub user_name: String,
    pub read_at: DateTime<Utc>,
}

/// A member of a chat.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatParticipant {
    pub user_id: String,
    pub user_name: String,
    #[serde(default)]
    pub avatar: Option<String>,
    #[serde(default)]
    pub is_admin: bool,
    pub joined_at: DateTime<Utc>,
}

/// Chat list entry, as served by the REST backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSummary {
    pub id: ChatId,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub is_group: bool,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub last_message: Option<Message>,
    /// Participants in server order.
    #[serde(default)]
    pub participants: Vec<ChatParticipant>,
}

/// Payload of a `MessageRead` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRead {
    pub message_id: MessageId,
    pub user_id: String,
    pub read_at: DateTime<Utc>,
}

/// Payload of an `UnreadCountChanged` event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnreadCount {
    pub chat_id: ChatId,
    pub unread_count: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_message_from_hub_json() {
        let json = r#"{
            "id": "m1",
            "chatId": 42,
            "senderId": "u-7",
            "senderName": "Ada",
            "senderAvatar": null,
            "content": "hi",
            "sentAt": "2024-05-01T10:00:00Z",
            "readBy": [
                {"userId": "u-8", "userName": "Grace", "readAt": "2024-05-01T10:01:00Z"}
            ]
        }"#;
        let msg: Message = serde_json::from_str(json).unwrap();
        assert_eq!(msg.chat_id, ChatId::new(42));
        assert_eq!(msg.id.as_str(), "m1");
        assert!(msg.is_read_by("u-8"));
        assert!(!msg.is_read_by("u-7"));
    }

    #[test]
    fn summary_defaults_optional_fields() {
        let json = r#"{"id": 3, "createdAt": "2024-05-01T10:00:00Z"}"#;
        let summary: ChatSummary = serde_json::from_str(json).unwrap();
        assert_eq!(summary.id, ChatId::new(3));
        assert!(summary.name.is_none());
        assert!(!summary.is_group);
        assert!(summary.participants.is_empty());
    }
}
