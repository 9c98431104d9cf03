//! Live connection handle

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

use crate::websocket::{Outbound, ServerEvent};

/// Handle for a single WebSocket connection
pub struct ConnectionHandle {
    pub id: Uuid,
    pub user_id: String,
    pub username: String,
    pub sender: mpsc::Sender<Outbound>,
    pub connected_at: DateTime<Utc>,
    /// Set when a probe was sent and no acknowledgement has arrived yet
    awaiting_pong: AtomicBool,
    /// Last liveness acknowledgement (Unix seconds), lock-free
    last_activity: AtomicI64,
    /// Room ids this connection is currently subscribed to
    pub rooms: RwLock<HashSet<String>>,
}

impl ConnectionHandle {
    pub fn new(user_id: String, username: String, sender: mpsc::Sender<Outbound>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id,
            username,
            sender,
            connected_at: now,
            awaiting_pong: AtomicBool::new(false),
            last_activity: AtomicI64::new(now.timestamp()),
            rooms: RwLock::new(HashSet::new()),
        }
    }

    /// Record a liveness acknowledgement (any inbound frame counts)
    pub fn mark_alive(&self) {
        self.awaiting_pong.store(false, Ordering::Relaxed);
        self.last_activity
            .store(Utc::now().timestamp(), Ordering::Relaxed);
    }

    pub fn begin_probe(&self) {
        self.awaiting_pong.store(true, Ordering::Relaxed);
    }

    pub fn is_awaiting_pong(&self) -> bool {
        self.awaiting_pong.load(Ordering::Relaxed)
    }

    pub fn last_activity(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.last_activity.load(Ordering::Relaxed), 0)
            .unwrap_or_else(Utc::now)
    }

    pub async fn send(
        &self,
        event: ServerEvent,
    ) -> Result<(), mpsc::error::SendError<Outbound>> {
        self.sender.send(Outbound::Event(event)).await
    }

    /// Send a pre-built frame (for efficient multi-send scenarios)
    pub async fn send_frame(
        &self,
        frame: Outbound,
    ) -> Result<(), mpsc::error::SendError<Outbound>> {
        self.sender.send(frame).await
    }

    /// Ask the writer task to close the socket
    pub async fn close(&self) {
        let _ = self.sender.send(Outbound::Close).await;
    }

    #[cfg(test)]
    pub fn backdate_activity(&self, secs: i64) {
        self.last_activity
            .store(Utc::now().timestamp() - secs, Ordering::Relaxed);
    }
}
