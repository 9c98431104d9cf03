//! Ephemeral signal relay: typing indicators and read receipts
//!
//! Typing events are never persisted and take a deliberately lighter
//! authorization path than the message router; they fan out to the
//! room's current subscribers only. Read receipts mutate exactly one
//! thing, the message's monotonic `read_by` set.

use std::sync::Arc;

use uuid::Uuid;

use crate::error::AppError;
use crate::rooms::RoomManager;
use crate::session::{ConnectionHandle, SessionRegistry};
use crate::stores::{ChatStore, MessageStore};
use crate::websocket::{Outbound, ServerEvent, UserSummary};

pub struct SignalRelay {
    registry: Arc<SessionRegistry>,
    rooms: Arc<RoomManager>,
    chat_store: Arc<dyn ChatStore>,
    message_store: Arc<dyn MessageStore>,
}

impl SignalRelay {
    pub fn new(
        registry: Arc<SessionRegistry>,
        rooms: Arc<RoomManager>,
        chat_store: Arc<dyn ChatStore>,
        message_store: Arc<dyn MessageStore>,
    ) -> Self {
        Self {
            registry,
            rooms,
            chat_store,
            message_store,
        }
    }

    /// Forward a typing or stop-typing hint to everyone else in the
    /// room. No Chat Store round-trip: a non-durable UI hint does not
    /// warrant one.
    pub async fn typing(
        &self,
        sender: &Arc<ConnectionHandle>,
        chat_id: &str,
        stopped: bool,
    ) -> Result<(), AppError> {
        if chat_id.is_empty() {
            return Err(AppError::Validation("Chat id must not be empty".into()));
        }

        let user = UserSummary {
            id: sender.user_id.clone(),
            username: sender.username.clone(),
        };
        let event = if stopped {
            ServerEvent::StopTyping {
                chat_id: chat_id.to_string(),
                user,
            }
        } else {
            ServerEvent::Typing {
                chat_id: chat_id.to_string(),
                user,
            }
        };

        let frame = Outbound::shared(&event)
            .map_err(|e| AppError::Internal(format!("Failed to serialize typing event: {}", e)))?;

        for handle in self.rooms.subscribers(chat_id) {
            if handle.user_id == sender.user_id {
                continue;
            }
            let frame = frame.clone();
            tokio::spawn(async move {
                let _ = handle.send_frame(frame).await;
            });
        }

        Ok(())
    }

    /// Record a read receipt and notify the chat's other live members.
    /// Idempotent: an already-recorded reader causes no mutation and no
    /// rebroadcast.
    #[tracing::instrument(
        name = "relay.mark_read",
        skip(self, reader),
        fields(user_id = %reader.user_id, message_id = %message_id)
    )]
    pub async fn mark_read(
        &self,
        reader: &Arc<ConnectionHandle>,
        message_id: Uuid,
    ) -> Result<bool, AppError> {
        let message = self
            .message_store
            .find_by_id(message_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Message does not exist".into()))?;

        let chat = self
            .chat_store
            .find_by_id(&message.chat_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Chat does not exist".into()))?;

        if !chat.is_participant(&reader.user_id) {
            return Err(AppError::Authorization(
                "You are not a member of this chat".into(),
            ));
        }

        if !self
            .message_store
            .add_reader(message_id, &reader.user_id)
            .await?
        {
            return Ok(false);
        }

        let frame = Outbound::shared(&ServerEvent::MessageRead {
            message_id,
            user_id: reader.user_id.clone(),
        })
        .map_err(|e| AppError::Internal(format!("Failed to serialize read receipt: {}", e)))?;

        for handle in chat
            .participants
            .iter()
            .filter_map(|user_id| self.registry.lookup(user_id))
        {
            if handle.user_id == reader.user_id {
                continue;
            }
            let frame = frame.clone();
            tokio::spawn(async move {
                let _ = handle.send_frame(frame).await;
            });
        }

        Ok(true)
    }
}
