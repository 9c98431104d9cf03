//! Cross-component integration tests
//!
//! These exercise the realtime core end to end (registry, rooms,
//! presence, router, relay, teardown) against the in-memory stores,
//! without starting a server.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use parley_chat_service::presence::PresenceBroadcaster;
use parley_chat_service::relay::SignalRelay;
use parley_chat_service::rooms::RoomManager;
use parley_chat_service::router::MessageRouter;
use parley_chat_service::session::{self, ConnectionHandle, SessionRegistry};
use parley_chat_service::stores::{
    ChatRecord, ChatStore, IdentityStore, MemoryChatStore, MemoryIdentityStore,
    MemoryMessageStore, MessageStore, MessageType, NewMessage, PresenceStatus, UserRecord,
};
use parley_chat_service::websocket::{Outbound, ServerEvent};

struct TestEnvironment {
    registry: Arc<SessionRegistry>,
    rooms: Arc<RoomManager>,
    presence: Arc<PresenceBroadcaster>,
    router: Arc<MessageRouter>,
    relay: Arc<SignalRelay>,
    identity: Arc<MemoryIdentityStore>,
    chats: Arc<MemoryChatStore>,
    messages: Arc<MemoryMessageStore>,
}

fn create_test_environment() -> TestEnvironment {
    let registry = Arc::new(SessionRegistry::new());
    let rooms = Arc::new(RoomManager::new(registry.clone()));
    let presence = Arc::new(PresenceBroadcaster::new(registry.clone()));
    let identity = Arc::new(MemoryIdentityStore::new());
    let chats = Arc::new(MemoryChatStore::new());
    let messages = Arc::new(MemoryMessageStore::new());
    let router = Arc::new(MessageRouter::new(
        rooms.clone(),
        chats.clone(),
        messages.clone(),
    ));
    let relay = Arc::new(SignalRelay::new(
        registry.clone(),
        rooms.clone(),
        chats.clone(),
        messages.clone(),
    ));

    TestEnvironment {
        registry,
        rooms,
        presence,
        router,
        relay,
        identity,
        chats,
        messages,
    }
}

/// Emulate the gateway's post-auth wiring: register, mark online, join
/// persisted chats, announce presence.
async fn connect_user(
    env: &TestEnvironment,
    user_id: &str,
) -> (Arc<ConnectionHandle>, mpsc::Receiver<Outbound>) {
    env.identity.insert(UserRecord::new(
        user_id,
        user_id.to_uppercase(),
        format!("{user_id}@example.com"),
    ));

    let (tx, rx) = mpsc::channel(32);
    let handle = Arc::new(ConnectionHandle::new(
        user_id.to_string(),
        user_id.to_uppercase(),
        tx,
    ));

    if let Some(superseded) = env.registry.register(handle.clone()) {
        superseded.close().await;
    }
    env.identity
        .update_status(user_id, PresenceStatus::Online)
        .await
        .unwrap();
    for chat in env.chats.find_by_participant(user_id).await.unwrap() {
        env.rooms.join(&handle, &chat.id).await;
    }
    env.presence.broadcast_online().await;

    (handle, rx)
}

async fn disconnect_user(env: &TestEnvironment, handle: &Arc<ConnectionHandle>) {
    session::teardown(
        &env.registry,
        &env.rooms,
        env.identity.as_ref(),
        &env.presence,
        handle,
    )
    .await;
}

async fn next_event(rx: &mut mpsc::Receiver<Outbound>) -> ServerEvent {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("should receive a frame")
            .expect("channel open");
        match frame {
            Outbound::Event(event) => return event,
            Outbound::Serialized(text) => return serde_json::from_str(&text).unwrap(),
            Outbound::Probe => continue,
            Outbound::Close => panic!("unexpected close frame"),
        }
    }
}

/// Drain everything currently queued, returning the parsed events
async fn drain_events(rx: &mut mpsc::Receiver<Outbound>) -> Vec<ServerEvent> {
    let mut events = Vec::new();
    while let Ok(Some(frame)) = tokio::time::timeout(Duration::from_millis(100), rx.recv()).await {
        match frame {
            Outbound::Event(event) => events.push(event),
            Outbound::Serialized(text) => events.push(serde_json::from_str(&text).unwrap()),
            _ => {}
        }
    }
    events
}

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
async fn test_message_flow_between_two_participants() {
    let env = create_test_environment();
    env.chats.insert(ChatRecord::direct(
        "C123",
        vec!["alice".into(), "bob".into()],
    ));

    let (alice, mut rx_a) = connect_user(&env, "alice").await;
    let (_bob, mut rx_b) = connect_user(&env, "bob").await;
    drain_events(&mut rx_a).await;
    drain_events(&mut rx_b).await;

    env.router
        .dispatch(&alice, draft("alice", "C123", "hi"))
        .await
        .unwrap();

    let a_events = drain_events(&mut rx_a).await;
    let b_events = drain_events(&mut rx_b).await;

    let ServerEvent::NewMessage(to_alice) = a_events
        .iter()
        .find(|e| matches!(e, ServerEvent::NewMessage(_)))
        .cloned()
        .expect("alice should receive new-message")
    else {
        unreachable!()
    };
    let ServerEvent::NewMessage(to_bob) = b_events
        .iter()
        .find(|e| matches!(e, ServerEvent::NewMessage(_)))
        .cloned()
        .expect("bob should receive new-message")
    else {
        unreachable!()
    };

    assert_eq!(to_alice.id, to_bob.id);
    assert_eq!(to_alice.content, "hi");

    let stored = env.messages.find_by_id(to_alice.id).await.unwrap().unwrap();
    assert_eq!(stored.read_by, vec!["alice".to_string()]);
    assert_eq!(env.messages.len(), 1);
}

#[tokio::test]
async fn test_non_participant_send_reaches_nobody() {
    let env = create_test_environment();
    env.chats.insert(ChatRecord::direct(
        "C999",
        vec!["bob".into(), "carol".into()],
    ));

    let (alice, mut rx_a) = connect_user(&env, "alice").await;
    let (_bob, mut rx_b) = connect_user(&env, "bob").await;
    drain_events(&mut rx_a).await;
    drain_events(&mut rx_b).await;

    let result = env
        .router
        .dispatch(&alice, draft("alice", "C999", "intrusion"))
        .await;
    assert!(result.is_err());

    // Nothing persisted, nothing delivered to anyone
    assert!(env.messages.is_empty());
    assert!(drain_events(&mut rx_a).await.is_empty());
    assert!(drain_events(&mut rx_b).await.is_empty());
}

#[tokio::test]
async fn test_reconnect_supersedes_previous_session() {
    let env = create_test_environment();

    let (first, mut rx_first) = connect_user(&env, "alice").await;
    let (second, _rx_second) = connect_user(&env, "alice").await;

    // The old connection was told to close, not silently dropped
    let mut saw_close = false;
    while let Ok(Some(frame)) =
        tokio::time::timeout(Duration::from_millis(100), rx_first.recv()).await
    {
        if matches!(frame, Outbound::Close) {
            saw_close = true;
        }
    }
    assert!(saw_close);
    assert_eq!(env.registry.lookup("alice").unwrap().id, second.id);

    // The stale connection's own teardown must not evict the new session
    disconnect_user(&env, &first).await;
    assert!(env.registry.lookup("alice").is_some());
    let alice = env.identity.find_by_id("alice").await.unwrap().unwrap();
    assert_eq!(alice.status, PresenceStatus::Online);
}

#[tokio::test]
async fn test_disconnect_updates_presence_everywhere() {
    let env = create_test_environment();

    let (_alice, mut rx_a) = connect_user(&env, "alice").await;
    let (bob, _rx_b) = connect_user(&env, "bob").await;
    drain_events(&mut rx_a).await;

    disconnect_user(&env, &bob).await;

    let events = drain_events(&mut rx_a).await;
    let online = events
        .iter()
        .rev()
        .find_map(|e| match e {
            ServerEvent::UsersOnline(users) => Some(users.clone()),
            _ => None,
        })
        .expect("alice should see a presence update");
    assert_eq!(online, vec!["alice".to_string()]);

    let bob_record = env.identity.find_by_id("bob").await.unwrap().unwrap();
    assert_eq!(bob_record.status, PresenceStatus::Offline);
}

#[tokio::test]
async fn test_read_receipt_flow() {
    let env = create_test_environment();
    env.chats.insert(ChatRecord::direct(
        "C123",
        vec!["alice".into(), "bob".into()],
    ));

    let (alice, mut rx_a) = connect_user(&env, "alice").await;
    let (bob, mut rx_b) = connect_user(&env, "bob").await;
    drain_events(&mut rx_a).await;
    drain_events(&mut rx_b).await;

    let receipt = env
        .router
        .dispatch(&alice, draft("alice", "C123", "seen?"))
        .await
        .unwrap();
    drain_events(&mut rx_a).await;
    drain_events(&mut rx_b).await;

    assert!(env.relay.mark_read(&bob, receipt.message_id).await.unwrap());
    let ServerEvent::MessageRead { message_id, user_id } = next_event(&mut rx_a).await else {
        panic!("alice should receive message-read");
    };
    assert_eq!(message_id, receipt.message_id);
    assert_eq!(user_id, "bob");

    // Repeat receipt is a no-op
    assert!(!env.relay.mark_read(&bob, receipt.message_id).await.unwrap());
    assert!(drain_events(&mut rx_a).await.is_empty());

    let stored = env
        .messages
        .find_by_id(receipt.message_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.read_by, vec!["alice".to_string(), "bob".to_string()]);
}

#[tokio::test]
async fn test_typing_relay_between_room_members() {
    let env = create_test_environment();
    env.chats.insert(ChatRecord::direct(
        "C123",
        vec!["alice".into(), "bob".into()],
    ));

    let (alice, mut rx_a) = connect_user(&env, "alice").await;
    let (_bob, mut rx_b) = connect_user(&env, "bob").await;
    drain_events(&mut rx_a).await;
    drain_events(&mut rx_b).await;

    env.relay.typing(&alice, "C123", false).await.unwrap();

    let ServerEvent::Typing { chat_id, user } = next_event(&mut rx_b).await else {
        panic!("bob should see typing");
    };
    assert_eq!(chat_id, "C123");
    assert_eq!(user.id, "alice");
    assert!(drain_events(&mut rx_a).await.is_empty());
}
