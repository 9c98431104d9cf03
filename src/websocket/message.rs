use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::stores::{ChatRecord, MessageRecord, MessageType};

/// Events sent from client to server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "kebab-case")]
pub enum ClientEvent {
    Authenticate {
        token: String,
    },
    #[serde(rename_all = "camelCase")]
    SendMessage {
        content: String,
        chat_id: String,
        #[serde(default)]
        message_type: MessageType,
        #[serde(default)]
        file_url: Option<String>,
        #[serde(default)]
        file_name: Option<String>,
        #[serde(default)]
        file_size: Option<u64>,
        #[serde(default)]
        duration: Option<u64>,
    },
    #[serde(rename_all = "camelCase")]
    Typing { chat_id: String },
    #[serde(rename_all = "camelCase")]
    StopTyping { chat_id: String },
    #[serde(rename_all = "camelCase")]
    MarkRead { message_id: Uuid },
    #[serde(rename_all = "camelCase")]
    JoinChat { chat_id: String },
    #[serde(rename_all = "camelCase")]
    LeaveChat { chat_id: String },
    Ping,
}

impl ClientEvent {
    /// Wire tag, for logging without dumping payloads (tokens included)
    pub fn name(&self) -> &'static str {
        match self {
            Self::Authenticate { .. } => "authenticate",
            Self::SendMessage { .. } => "send-message",
            Self::Typing { .. } => "typing",
            Self::StopTyping { .. } => "stop-typing",
            Self::MarkRead { .. } => "mark-read",
            Self::JoinChat { .. } => "join-chat",
            Self::LeaveChat { .. } => "leave-chat",
            Self::Ping => "ping",
        }
    }
}

/// Sender identity attached to relayed typing events
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserSummary {
    pub id: String,
    pub username: String,
}

/// Events sent from server to client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "kebab-case")]
pub enum ServerEvent {
    #[serde(rename_all = "camelCase")]
    Connected { user_id: String, username: String },
    UsersOnline(Vec<String>),
    NewMessage(MessageRecord),
    MessageNotification {
        chat: ChatRecord,
        message: MessageRecord,
    },
    #[serde(rename_all = "camelCase")]
    Typing { chat_id: String, user: UserSummary },
    #[serde(rename_all = "camelCase")]
    StopTyping { chat_id: String, user: UserSummary },
    #[serde(rename_all = "camelCase")]
    MessageRead { message_id: Uuid, user_id: String },
    Error { message: String },
    Pong { timestamp: i64 },
}

impl ServerEvent {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    pub fn pong() -> Self {
        Self::Pong {
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }
}

/// Frames handed to a connection's writer task
#[derive(Debug, Clone)]
pub enum Outbound {
    /// Serialized when written to the socket
    Event(ServerEvent),
    /// Pre-serialized payload shared across fan-out legs
    Serialized(Arc<str>),
    /// Liveness probe, written as a protocol-level ping frame
    Probe,
    /// Close the socket and end the writer task
    Close,
}

impl Outbound {
    /// Serialize once for delivery to many connections.
    pub fn shared(event: &ServerEvent) -> serde_json::Result<Self> {
        Ok(Self::Serialized(Arc::from(serde_json::to_string(event)?)))
    }
}
