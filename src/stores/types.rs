//! Record types shared with the external stores

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// User availability as tracked by the Identity Store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    Online,
    Offline,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRecord {
    pub id: String,
    pub username: String,
    pub email: String,
    #[serde(default)]
    pub avatar: Option<String>,
    pub status: PresenceStatus,
    pub last_active: DateTime<Utc>,
}

impl UserRecord {
    pub fn new(id: impl Into<String>, username: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            username: username.into(),
            email: email.into(),
            avatar: None,
            status: PresenceStatus::Offline,
            last_active: Utc::now(),
        }
    }
}

/// Kind of content carried by a message
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    #[default]
    Text,
    Image,
    Audio,
    Video,
    Document,
    Archive,
}

/// A persisted conversation, direct or group
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRecord {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    pub is_group: bool,
    pub participants: Vec<String>,
    #[serde(default)]
    pub admin: Option<String>,
    #[serde(default)]
    pub latest_message: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl ChatRecord {
    pub fn direct(id: impl Into<String>, participants: Vec<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            is_group: false,
            participants,
            admin: None,
            latest_message: None,
            created_at: Utc::now(),
        }
    }

    pub fn group(
        id: impl Into<String>,
        name: impl Into<String>,
        admin: impl Into<String>,
        participants: Vec<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: Some(name.into()),
            is_group: true,
            participants,
            admin: Some(admin.into()),
            latest_message: None,
            created_at: Utc::now(),
        }
    }

    pub fn is_participant(&self, user_id: &str) -> bool {
        self.participants.iter().any(|p| p == user_id)
    }
}

/// Input to `MessageStore::create`
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub sender_id: String,
    pub chat_id: String,
    pub content: String,
    pub message_type: MessageType,
    pub file_url: Option<String>,
    pub file_name: Option<String>,
    pub file_size: Option<u64>,
    pub duration: Option<u64>,
}

/// An immutable persisted message; `read_by` is the only mutable field
/// and only ever grows.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRecord {
    pub id: Uuid,
    pub sender_id: String,
    pub chat_id: String,
    pub content: String,
    pub message_type: MessageType,
    #[serde(default)]
    pub file_url: Option<String>,
    #[serde(default)]
    pub file_name: Option<String>,
    #[serde(default)]
    pub file_size: Option<u64>,
    #[serde(default)]
    pub duration: Option<u64>,
    pub read_by: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl MessageRecord {
    /// Build the persisted record from a draft; the sender has read
    /// their own message by definition.
    pub fn from_draft(draft: NewMessage) -> Self {
        Self {
            id: Uuid::new_v4(),
            read_by: vec![draft.sender_id.clone()],
            sender_id: draft.sender_id,
            chat_id: draft.chat_id,
            content: draft.content,
            message_type: draft.message_type,
            file_url: draft.file_url,
            file_name: draft.file_name,
            file_size: draft.file_size,
            duration: draft.duration,
            created_at: Utc::now(),
        }
    }
}
