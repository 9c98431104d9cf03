//! Online-set fan-out
//!
//! Pushes the current online-user snapshot to every live connection
//! after each registry mutation. Cost is O(connections) per churn
//! event, which is the accepted bound for single-node scale.

use std::sync::Arc;

use crate::session::SessionRegistry;
use crate::websocket::{Outbound, ServerEvent};

pub struct PresenceBroadcaster {
    registry: Arc<SessionRegistry>,
}

impl PresenceBroadcaster {
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        Self { registry }
    }

    /// Recompute the snapshot and push `users-online` to everyone,
    /// the announced connection included.
    pub async fn broadcast_online(&self) {
        let online = self.registry.snapshot();
        let event = ServerEvent::UsersOnline(online);

        let frame = match Outbound::shared(&event) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::error!(error = %e, "Failed to serialize presence event");
                return;
            }
        };

        for handle in self.registry.all() {
            let frame = frame.clone();
            tokio::spawn(async move {
                if handle.send_frame(frame).await.is_err() {
                    tracing::debug!(
                        connection_id = %handle.id,
                        "Presence push failed, connection closing"
                    );
                }
            });
        }
    }
}
