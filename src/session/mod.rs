//! Connection handles and the session registry

mod connection;
mod registry;

pub use connection::ConnectionHandle;
pub use registry::SessionRegistry;

use std::sync::Arc;

use crate::presence::PresenceBroadcaster;
use crate::rooms::RoomManager;
use crate::stores::{IdentityStore, PresenceStatus};

/// Shared cleanup path for every way a connection can die: explicit
/// close, receive error, or heartbeat eviction.
///
/// Always safe to call more than once for the same handle; only the
/// invocation that actually owned the registry entry updates stored
/// presence and re-broadcasts the online set.
pub async fn teardown(
    registry: &SessionRegistry,
    rooms: &RoomManager,
    identity_store: &dyn IdentityStore,
    presence: &PresenceBroadcaster,
    handle: &Arc<ConnectionHandle>,
) {
    let was_authoritative = registry.remove(&handle.user_id, handle.id);
    rooms.remove_connection(handle).await;

    if !was_authoritative {
        return;
    }

    if let Err(e) = identity_store
        .update_status(&handle.user_id, PresenceStatus::Offline)
        .await
    {
        tracing::warn!(
            user_id = %handle.user_id,
            error = %e,
            "Failed to mark user offline"
        );
    }

    presence.broadcast_online().await;
}
