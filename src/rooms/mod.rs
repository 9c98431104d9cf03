//! Runtime room membership
//!
//! A room is the live subscription group for one persisted chat. The
//! index here only answers "which connections are subscribed"; message
//! authorization never trusts it and re-checks the Chat Store.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;

use crate::session::{ConnectionHandle, SessionRegistry};

pub struct RoomManager {
    registry: Arc<SessionRegistry>,
    /// chat_id -> (connection_id -> user_id)
    rooms: DashMap<String, HashMap<uuid::Uuid, String>>,
}

impl RoomManager {
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        Self {
            registry,
            rooms: DashMap::new(),
        }
    }

    /// Subscribe a connection to a room. Deliberately permissive: the
    /// chat id is not checked against the Chat Store, matching the
    /// ephemeral join semantics clients rely on for typing indicators.
    pub async fn join(&self, handle: &Arc<ConnectionHandle>, chat_id: &str) {
        handle.rooms.write().await.insert(chat_id.to_string());
        self.rooms
            .entry(chat_id.to_string())
            .or_default()
            .insert(handle.id, handle.user_id.clone());

        tracing::debug!(
            connection_id = %handle.id,
            user_id = %handle.user_id,
            chat_id = %chat_id,
            "Joined room"
        );
    }

    pub async fn leave(&self, handle: &Arc<ConnectionHandle>, chat_id: &str) {
        handle.rooms.write().await.remove(chat_id);
        if let Some(mut members) = self.rooms.get_mut(chat_id) {
            members.remove(&handle.id);
            if members.is_empty() {
                drop(members);
                self.rooms.remove(chat_id);
            }
        }

        tracing::debug!(
            connection_id = %handle.id,
            user_id = %handle.user_id,
            chat_id = %chat_id,
            "Left room"
        );
    }

    /// Live connections currently subscribed to a room. Entries whose
    /// connection is no longer authoritative in the registry filter out.
    pub fn subscribers(&self, chat_id: &str) -> Vec<Arc<ConnectionHandle>> {
        self.rooms
            .get(chat_id)
            .map(|members| {
                members
                    .iter()
                    .filter_map(|(conn_id, user_id)| {
                        self.registry
                            .lookup(user_id)
                            .filter(|handle| handle.id == *conn_id)
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Live connections among a chat's persisted participants. Room
    /// subscription is irrelevant here; presence in the registry is
    /// what makes a participant reachable.
    pub fn live_members(&self, participants: &[String]) -> Vec<Arc<ConnectionHandle>> {
        participants
            .iter()
            .filter_map(|user_id| self.registry.lookup(user_id))
            .collect()
    }

    /// Drop every room subscription held by a connection
    pub async fn remove_connection(&self, handle: &Arc<ConnectionHandle>) {
        let subscribed: Vec<String> = handle.rooms.write().await.drain().collect();

        for chat_id in &subscribed {
            if let Some(mut members) = self.rooms.get_mut(chat_id) {
                members.remove(&handle.id);
            }
        }
        self.rooms.retain(|_, members| !members.is_empty());

        if !subscribed.is_empty() {
            tracing::debug!(
                connection_id = %handle.id,
                rooms = subscribed.len(),
                "Cleared room subscriptions"
            );
        }
    }

    /// Subscriber counts per room, for the stats endpoint
    pub fn room_counts(&self) -> HashMap<String, usize> {
        self.rooms
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().len()))
            .collect()
    }
}
