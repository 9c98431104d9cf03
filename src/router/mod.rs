//! Message routing: validate, authorize, persist, fan out
//!
//! The central delivery pipeline. A message is only ever broadcast
//! after the Message Store accepted it, and authorization is checked
//! against the chat's durable participant list, never against room
//! subscriptions.

use std::sync::Arc;

use serde::Serialize;
use uuid::Uuid;

use crate::error::AppError;
use crate::rooms::RoomManager;
use crate::session::ConnectionHandle;
use crate::stores::{ChatStore, MessageStore, NewMessage};
use crate::websocket::{Outbound, ServerEvent};

/// Result of one delivered message
#[derive(Debug, Clone, Serialize)]
pub struct DeliveryReceipt {
    pub message_id: Uuid,
    /// Live participants that received `new-message` (sender included)
    pub delivered_to: usize,
    /// Live participants that additionally received `message-notification`
    pub notified: usize,
}

pub struct MessageRouter {
    rooms: Arc<RoomManager>,
    chat_store: Arc<dyn ChatStore>,
    message_store: Arc<dyn MessageStore>,
}

impl MessageRouter {
    pub fn new(
        rooms: Arc<RoomManager>,
        chat_store: Arc<dyn ChatStore>,
        message_store: Arc<dyn MessageStore>,
    ) -> Self {
        Self {
            rooms,
            chat_store,
            message_store,
        }
    }

    /// Route one outgoing message end to end. Any error here is
    /// reported to the sender only; no partial broadcast ever happens.
    #[tracing::instrument(
        name = "router.dispatch",
        skip(self, sender, draft),
        fields(
            connection_id = %sender.id,
            user_id = %sender.user_id,
            chat_id = %draft.chat_id
        )
    )]
    pub async fn dispatch(
        &self,
        sender: &Arc<ConnectionHandle>,
        draft: NewMessage,
    ) -> Result<DeliveryReceipt, AppError> {
        // Validate
        if draft.content.trim().is_empty() || draft.chat_id.is_empty() {
            return Err(AppError::Validation(
                "Message content and chat id must not be empty".into(),
            ));
        }

        // Authorize against the durable participant list
        let chat = self
            .chat_store
            .find_by_id(&draft.chat_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Chat does not exist".into()))?;

        if !chat.is_participant(&sender.user_id) {
            return Err(AppError::Authorization(
                "You are not a member of this chat".into(),
            ));
        }

        // Persist before any broadcast
        let message = self.message_store.create(draft).await?;

        if let Err(e) = self
            .chat_store
            .update_latest_message(&chat.id, message.id)
            .await
        {
            // The message itself is durable; a stale latest pointer is
            // tolerable
            tracing::warn!(
                chat_id = %chat.id,
                message_id = %message.id,
                error = %e,
                "Failed to update latest-message pointer"
            );
        }

        // Resolve the live members of the chat
        let live = self.rooms.live_members(&chat.participants);

        let frame = Outbound::shared(&ServerEvent::NewMessage(message.clone()))
            .map_err(|e| AppError::Internal(format!("Failed to serialize message: {}", e)))?;

        // Each delivery leg is its own task; one dead connection must
        // not abort the rest
        let delivered_to = live.len();
        for handle in &live {
            let handle = handle.clone();
            let frame = frame.clone();
            tokio::spawn(async move {
                if handle.send_frame(frame).await.is_err() {
                    tracing::debug!(
                        connection_id = %handle.id,
                        user_id = %handle.user_id,
                        "Message delivery leg failed"
                    );
                }
            });
        }

        // Online members not currently viewing the room get a
        // notification with the chat context instead
        let mut notified = 0;
        let notification = Outbound::shared(&ServerEvent::MessageNotification {
            chat: chat.clone(),
            message: message.clone(),
        })
        .map_err(|e| AppError::Internal(format!("Failed to serialize notification: {}", e)))?;

        for handle in &live {
            if handle.user_id == sender.user_id {
                continue;
            }
            if handle.rooms.read().await.contains(&chat.id) {
                continue;
            }
            notified += 1;
            let handle = handle.clone();
            let frame = notification.clone();
            tokio::spawn(async move {
                if handle.send_frame(frame).await.is_err() {
                    tracing::debug!(
                        connection_id = %handle.id,
                        "Notification delivery leg failed"
                    );
                }
            });
        }

        tracing::debug!(
            message_id = %message.id,
            delivered_to,
            notified,
            "Message routed"
        );

        Ok(DeliveryReceipt {
            message_id: message.id,
            delivered_to,
            notified,
        })
    }

}
