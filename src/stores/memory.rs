//! In-memory store implementations

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use uuid::Uuid;

use super::types::{ChatRecord, MessageRecord, NewMessage, PresenceStatus, UserRecord};
use super::{ChatStore, IdentityStore, MessageStore, StoreResult};

#[derive(Default)]
pub struct MemoryIdentityStore {
    users: DashMap<String, UserRecord>,
}

impl MemoryIdentityStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, user: UserRecord) {
        self.users.insert(user.id.clone(), user);
    }
}

#[async_trait]
impl IdentityStore for MemoryIdentityStore {
    async fn find_by_id(&self, user_id: &str) -> StoreResult<Option<UserRecord>> {
        Ok(self.users.get(user_id).map(|u| u.clone()))
    }

    async fn update_status(&self, user_id: &str, status: PresenceStatus) -> StoreResult<()> {
        if let Some(mut user) = self.users.get_mut(user_id) {
            user.status = status;
            user.last_active = Utc::now();
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryChatStore {
    chats: DashMap<String, ChatRecord>,
}

impl MemoryChatStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, chat: ChatRecord) {
        self.chats.insert(chat.id.clone(), chat);
    }
}

#[async_trait]
impl ChatStore for MemoryChatStore {
    async fn find_by_id(&self, chat_id: &str) -> StoreResult<Option<ChatRecord>> {
        Ok(self.chats.get(chat_id).map(|c| c.clone()))
    }

    async fn find_by_participant(&self, user_id: &str) -> StoreResult<Vec<ChatRecord>> {
        Ok(self
            .chats
            .iter()
            .filter(|entry| entry.value().is_participant(user_id))
            .map(|entry| entry.value().clone())
            .collect())
    }

    async fn update_latest_message(&self, chat_id: &str, message_id: Uuid) -> StoreResult<()> {
        if let Some(mut chat) = self.chats.get_mut(chat_id) {
            chat.latest_message = Some(message_id);
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryMessageStore {
    messages: DashMap<Uuid, MessageRecord>,
}

impl MemoryMessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

#[async_trait]
impl MessageStore for MemoryMessageStore {
    async fn create(&self, draft: NewMessage) -> StoreResult<MessageRecord> {
        let record = MessageRecord::from_draft(draft);
        self.messages.insert(record.id, record.clone());
        Ok(record)
    }

    async fn find_by_id(&self, message_id: Uuid) -> StoreResult<Option<MessageRecord>> {
        Ok(self.messages.get(&message_id).map(|m| m.clone()))
    }

    async fn add_reader(&self, message_id: Uuid, user_id: &str) -> StoreResult<bool> {
        // The entry lock makes the check-and-add atomic
        if let Some(mut message) = self.messages.get_mut(&message_id) {
            if message.read_by.iter().any(|r| r == user_id) {
                return Ok(false);
            }
            message.read_by.push(user_id.to_string());
            return Ok(true);
        }
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stores::MessageType;

    fn draft(sender: &str, chat: &str, content: &str) -> NewMessage {
        NewMessage {
            sender_id: sender.to_string(),
            chat_id: chat.to_string(),
            content: content.to_string(),
            message_type: MessageType::Text,
            file_url: None,
            file_name: None,
            file_size: None,
            duration: None,
        }
    }

    #[tokio::test]
    async fn test_create_seeds_read_by_with_sender() {
        let store = MemoryMessageStore::new();
        let record = store.create(draft("alice", "c1", "hi")).await.unwrap();
        assert_eq!(record.read_by, vec!["alice".to_string()]);

        let found = store.find_by_id(record.id).await.unwrap().unwrap();
        assert_eq!(found.content, "hi");
    }

    #[tokio::test]
    async fn test_add_reader_is_monotonic() {
        let store = MemoryMessageStore::new();
        let record = store.create(draft("alice", "c1", "hi")).await.unwrap();

        assert!(store.add_reader(record.id, "bob").await.unwrap());
        assert!(!store.add_reader(record.id, "bob").await.unwrap());
        assert!(!store.add_reader(record.id, "alice").await.unwrap());

        let found = store.find_by_id(record.id).await.unwrap().unwrap();
        assert_eq!(found.read_by, vec!["alice".to_string(), "bob".to_string()]);
    }

    #[tokio::test]
    async fn test_find_by_participant() {
        let store = MemoryChatStore::new();
        store.insert(ChatRecord::direct("c1", vec!["alice".into(), "bob".into()]));
        store.insert(ChatRecord::group(
            "c2",
            "team",
            "carol",
            vec!["carol".into(), "bob".into()],
        ));

        let chats = store.find_by_participant("bob").await.unwrap();
        assert_eq!(chats.len(), 2);

        let chats = store.find_by_participant("alice").await.unwrap();
        assert_eq!(chats.len(), 1);
        assert_eq!(chats[0].id, "c1");
    }

    #[tokio::test]
    async fn test_update_status() {
        let store = MemoryIdentityStore::new();
        store.insert(UserRecord::new("alice", "Alice", "alice@example.com"));

        store
            .update_status("alice", PresenceStatus::Online)
            .await
            .unwrap();
        let user = store.find_by_id("alice").await.unwrap().unwrap();
        assert_eq!(user.status, PresenceStatus::Online);
    }
}
