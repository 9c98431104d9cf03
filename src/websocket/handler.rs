use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;

use crate::error::AppError;
use crate::server::AppState;
use crate::session::{self, ConnectionHandle};
use crate::stores::{NewMessage, PresenceStatus, UserRecord};

use super::message::{ClientEvent, Outbound, ServerEvent};

/// Close code for failed authentication (4000-range is application-defined)
const CLOSE_UNAUTHORIZED: u16 = 4401;

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    pub token: Option<String>,
}

/// WebSocket upgrade handler
///
/// The bearer token may arrive in the `token` query parameter, the
/// Authorization header, or as a first-frame `authenticate` event after
/// the upgrade. Tokens presented before the upgrade are rejected with
/// plain HTTP 401; post-upgrade failures close the socket with a
/// diagnostic code.
#[tracing::instrument(
    name = "ws.upgrade",
    skip(ws, state, query, headers),
    fields(has_query_token = query.token.is_some())
)]
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
    headers: HeaderMap,
) -> Response {
    let token = extract_token(&query, &headers);

    let identity = match token {
        Some(token) => match resolve_identity(&state, &token).await {
            Ok(user) => Some(user),
            Err(e) => {
                tracing::warn!(error = %e, "WebSocket authentication failed");
                return (StatusCode::UNAUTHORIZED, e.client_message()).into_response();
            }
        },
        // No credential yet; the client gets one chance to send an
        // authenticate event on the open socket
        None => None,
    };

    ws.on_upgrade(move |socket| handle_socket(socket, state, identity))
}

/// Extract token from query parameter or Authorization header
fn extract_token(query: &WsQuery, headers: &HeaderMap) -> Option<String> {
    // First try query parameter
    if let Some(ref token) = query.token {
        return Some(token.clone());
    }

    // Then try Authorization header
    if let Some(auth_header) = headers.get(header::AUTHORIZATION) {
        if let Ok(auth_str) = auth_header.to_str() {
            if let Some(token) = auth_str.strip_prefix("Bearer ") {
                return Some(token.to_string());
            }
        }
    }

    None
}

/// Verify the token and resolve the identity it names. One-shot: any
/// failure terminates the handshake.
async fn resolve_identity(state: &AppState, token: &str) -> Result<UserRecord, AppError> {
    let claims = state.jwt_validator.verify(token)?;

    state
        .identity_store
        .find_by_id(claims.user_id())
        .await?
        .ok_or_else(|| AppError::Auth("User no longer exists".into()))
}

async fn handle_socket(mut socket: WebSocket, state: AppState, identity: Option<UserRecord>) {
    let user = match identity {
        Some(user) => user,
        None => match await_authentication(&mut socket, &state).await {
            Some(user) => user,
            None => return,
        },
    };

    run_connection(socket, state, user).await;
}

/// Wait for a first-frame `authenticate{token}` event within the
/// configured deadline. Anything else ends the handshake; no registry
/// state exists yet at this point.
async fn await_authentication(socket: &mut WebSocket, state: &AppState) -> Option<UserRecord> {
    let deadline = Duration::from_secs(state.settings.websocket.auth_deadline);

    let frame = match tokio::time::timeout(deadline, socket.recv()).await {
        Ok(Some(Ok(frame))) => frame,
        Ok(_) => return None,
        Err(_) => {
            tracing::debug!("Authentication deadline elapsed");
            reject_socket(socket, "Missing authentication token").await;
            return None;
        }
    };

    let token = match frame {
        Message::Text(text) => match serde_json::from_str::<ClientEvent>(&text) {
            Ok(ClientEvent::Authenticate { token }) => token,
            _ => {
                reject_socket(socket, "Expected authenticate event").await;
                return None;
            }
        },
        _ => {
            reject_socket(socket, "Expected authenticate event").await;
            return None;
        }
    };

    match resolve_identity(state, &token).await {
        Ok(user) => Some(user),
        Err(e) => {
            tracing::warn!(error = %e, "WebSocket authentication failed");
            reject_socket(socket, &e.client_message()).await;
            None
        }
    }
}

async fn reject_socket(socket: &mut WebSocket, reason: &str) {
    let event = ServerEvent::error(reason);
    if let Ok(json) = serde_json::to_string(&event) {
        let _ = socket.send(Message::Text(json.into())).await;
    }
    let _ = socket
        .send(Message::Close(Some(CloseFrame {
            code: CLOSE_UNAUTHORIZED,
            reason: reason.to_string().into(),
        })))
        .await;
}

/// Drive an authenticated connection until it closes
#[tracing::instrument(
    name = "ws.connection",
    skip(socket, state, user),
    fields(user_id = %user.id)
)]
async fn run_connection(socket: WebSocket, state: AppState, user: UserRecord) {
    let (tx, mut rx) = mpsc::channel::<Outbound>(state.settings.websocket.channel_buffer);

    let handle = Arc::new(ConnectionHandle::new(
        user.id.clone(),
        user.username.clone(),
        tx,
    ));
    let connection_id = handle.id;

    // Register as the authoritative session; a still-open previous
    // connection for the same user is explicitly closed, never silently
    // overwritten
    if let Some(superseded) = state.registry.register(handle.clone()) {
        tracing::info!(
            user_id = %user.id,
            old_connection_id = %superseded.id,
            new_connection_id = %connection_id,
            "Closing superseded connection"
        );
        superseded.close().await;
    }

    if let Err(e) = state
        .identity_store
        .update_status(&user.id, PresenceStatus::Online)
        .await
    {
        tracing::warn!(user_id = %user.id, error = %e, "Failed to mark user online");
    }

    // Subscribe to every chat the user participates in
    match state.chat_store.find_by_participant(&user.id).await {
        Ok(chats) => {
            for chat in &chats {
                state.rooms.join(&handle, &chat.id).await;
            }
            tracing::info!(
                connection_id = %connection_id,
                user_id = %user.id,
                chats = chats.len(),
                "WebSocket connection established"
            );
        }
        Err(e) => {
            tracing::warn!(user_id = %user.id, error = %e, "Failed to load user chats");
        }
    }

    state.presence.broadcast_online().await;

    let _ = handle
        .send(ServerEvent::Connected {
            user_id: user.id.clone(),
            username: user.username.clone(),
        })
        .await;

    // Split socket into sender and receiver
    let (mut ws_sender, mut ws_receiver) = socket.split();

    // Task for writing frames from the channel to the WebSocket
    let send_task = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            match frame {
                Outbound::Event(event) => {
                    let text = match serde_json::to_string(&event) {
                        Ok(t) => t,
                        Err(e) => {
                            tracing::error!(error = %e, "Failed to serialize event");
                            continue;
                        }
                    };
                    if ws_sender.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                Outbound::Serialized(text) => {
                    if ws_sender
                        .send(Message::Text(text.to_string().into()))
                        .await
                        .is_err()
                    {
                        break;
                    }
                }
                Outbound::Probe => {
                    if ws_sender.send(Message::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                }
                Outbound::Close => {
                    let _ = ws_sender.send(Message::Close(None)).await;
                    break;
                }
            }
        }
    });

    // Task for reading frames from the WebSocket
    let state_clone = state.clone();
    let handle_clone = handle.clone();
    let recv_task = tokio::spawn(async move {
        while let Some(result) = ws_receiver.next().await {
            match result {
                Ok(msg) => {
                    if !process_frame(msg, &state_clone, &handle_clone).await {
                        break;
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "WebSocket receive error");
                    break;
                }
            }
        }
    });

    // Wait for either task to complete
    tokio::select! {
        _ = send_task => {
            tracing::debug!(connection_id = %connection_id, "Send task completed");
        }
        _ = recv_task => {
            tracing::debug!(connection_id = %connection_id, "Receive task completed");
        }
    }

    session::teardown(
        &state.registry,
        &state.rooms,
        state.identity_store.as_ref(),
        &state.presence,
        &handle,
    )
    .await;

    tracing::info!(
        connection_id = %connection_id,
        user_id = %user.id,
        "WebSocket connection closed"
    );
}

/// Process a received WebSocket frame
/// Returns false if the connection should be closed
async fn process_frame(msg: Message, state: &AppState, handle: &Arc<ConnectionHandle>) -> bool {
    match msg {
        Message::Text(text) => {
            handle.mark_alive();

            let event: ClientEvent = match serde_json::from_str(&text) {
                Ok(event) => event,
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to parse client event");
                    let _ = handle
                        .send(ServerEvent::error("Invalid message format"))
                        .await;
                    return true;
                }
            };

            dispatch_event(event, state, handle).await;
            true
        }
        Message::Binary(_) => {
            let _ = handle
                .send(ServerEvent::error("Binary messages are not supported"))
                .await;
            true
        }
        Message::Ping(_) => {
            // Axum answers the pong automatically
            handle.mark_alive();
            true
        }
        Message::Pong(_) => {
            handle.mark_alive();
            true
        }
        Message::Close(_) => {
            tracing::debug!(connection_id = %handle.id, "Received close frame");
            false
        }
    }
}

/// Handle a parsed client event
#[tracing::instrument(
    name = "ws.event",
    skip(state, handle),
    fields(
        connection_id = %handle.id,
        user_id = %handle.user_id,
        event = event.name()
    )
)]
async fn dispatch_event(event: ClientEvent, state: &AppState, handle: &Arc<ConnectionHandle>) {
    match event {
        ClientEvent::Authenticate { .. } => {
            tracing::debug!(connection_id = %handle.id, "Already authenticated, ignoring");
        }
        ClientEvent::SendMessage {
            content,
            chat_id,
            message_type,
            file_url,
            file_name,
            file_size,
            duration,
        } => {
            let draft = NewMessage {
                sender_id: handle.user_id.clone(),
                chat_id,
                content,
                message_type,
                file_url,
                file_name,
                file_size,
                duration,
            };
            // Routed on its own task: the sender closing its socket must
            // not cancel an in-flight persist-then-broadcast
            let router = state.router.clone();
            let sender = handle.clone();
            tokio::spawn(async move {
                if let Err(e) = router.dispatch(&sender, draft).await {
                    tracing::warn!(
                        user_id = %sender.user_id,
                        error = %e,
                        "Message dispatch failed"
                    );
                    let _ = sender.send(ServerEvent::error(e.client_message())).await;
                }
            });
        }
        ClientEvent::Typing { chat_id } => {
            if let Err(e) = state.relay.typing(handle, &chat_id, false).await {
                let _ = handle.send(ServerEvent::error(e.client_message())).await;
            }
        }
        ClientEvent::StopTyping { chat_id } => {
            if let Err(e) = state.relay.typing(handle, &chat_id, true).await {
                let _ = handle.send(ServerEvent::error(e.client_message())).await;
            }
        }
        ClientEvent::MarkRead { message_id } => {
            if let Err(e) = state.relay.mark_read(handle, message_id).await {
                tracing::warn!(
                    user_id = %handle.user_id,
                    message_id = %message_id,
                    error = %e,
                    "Mark-read failed"
                );
                let _ = handle.send(ServerEvent::error(e.client_message())).await;
            }
        }
        ClientEvent::JoinChat { chat_id } => {
            state.rooms.join(handle, &chat_id).await;
        }
        ClientEvent::LeaveChat { chat_id } => {
            state.rooms.leave(handle, &chat_id).await;
        }
        ClientEvent::Ping => {
            handle.mark_alive();
            let _ = handle.send(ServerEvent::pong()).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_extract_token_prefers_query() {
        let query = WsQuery {
            token: Some("query-token".to_string()),
        };
        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_static("Bearer header-token"),
        );

        assert_eq!(extract_token(&query, &headers).as_deref(), Some("query-token"));
    }

    #[test]
    fn test_extract_token_from_bearer_header() {
        let query = WsQuery { token: None };
        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_static("Bearer header-token"),
        );

        assert_eq!(
            extract_token(&query, &headers).as_deref(),
            Some("header-token")
        );
    }

    #[test]
    fn test_extract_token_absent() {
        let query = WsQuery { token: None };
        let headers = HeaderMap::new();
        assert!(extract_token(&query, &headers).is_none());

        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_static("Basic dXNlcjpwYXNz"),
        );
        assert!(extract_token(&query, &headers).is_none());
    }
}
