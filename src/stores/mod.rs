//! External collaborator interfaces
//!
//! The realtime core does not own user, chat, or message content; it reads
//! and appends through these traits. In-memory implementations back the
//! default wiring and the test suites; deployments substitute their own
//! store implementations behind the same traits.

mod memory;
mod types;

pub use memory::{MemoryChatStore, MemoryIdentityStore, MemoryMessageStore};
pub use types::{
    ChatRecord, MessageRecord, MessageType, NewMessage, PresenceStatus, UserRecord,
};

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Lookup and status updates for user identities
#[async_trait]
pub trait IdentityStore: Send + Sync {
    async fn find_by_id(&self, user_id: &str) -> StoreResult<Option<UserRecord>>;
    async fn update_status(&self, user_id: &str, status: PresenceStatus) -> StoreResult<()>;
}

/// Persisted conversations and their participant lists
#[async_trait]
pub trait ChatStore: Send + Sync {
    async fn find_by_id(&self, chat_id: &str) -> StoreResult<Option<ChatRecord>>;
    async fn find_by_participant(&self, user_id: &str) -> StoreResult<Vec<ChatRecord>>;
    async fn update_latest_message(&self, chat_id: &str, message_id: Uuid) -> StoreResult<()>;
}

/// Message persistence and the monotonic read-receipt set
#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn create(&self, draft: NewMessage) -> StoreResult<MessageRecord>;
    async fn find_by_id(&self, message_id: Uuid) -> StoreResult<Option<MessageRecord>>;
    /// Atomic check-and-add on `read_by`; returns true when the reader
    /// was newly recorded.
    async fn add_reader(&self, message_id: Uuid, user_id: &str) -> StoreResult<bool>;
}
