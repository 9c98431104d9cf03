//! Liveness monitor
//!
//! Probes every live connection on a fixed interval and evicts the
//! ones whose last acknowledgement is older than the timeout. Eviction
//! runs through the same teardown path as an explicit disconnect, so
//! stored presence and the online broadcast stay consistent.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;

use crate::config::WebSocketConfig;
use crate::presence::PresenceBroadcaster;
use crate::rooms::RoomManager;
use crate::session::{self, SessionRegistry};
use crate::stores::IdentityStore;
use crate::websocket::Outbound;

pub struct HeartbeatTask {
    config: WebSocketConfig,
    registry: Arc<SessionRegistry>,
    rooms: Arc<RoomManager>,
    identity_store: Arc<dyn IdentityStore>,
    presence: Arc<PresenceBroadcaster>,
    shutdown: broadcast::Receiver<()>,
}

impl HeartbeatTask {
    pub fn new(
        config: WebSocketConfig,
        registry: Arc<SessionRegistry>,
        rooms: Arc<RoomManager>,
        identity_store: Arc<dyn IdentityStore>,
        presence: Arc<PresenceBroadcaster>,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            config,
            registry,
            rooms,
            identity_store,
            presence,
            shutdown,
        }
    }

    /// Run the probe/evict cycle until shutdown
    pub async fn run(mut self) {
        let mut timer =
            tokio::time::interval(Duration::from_secs(self.config.heartbeat_interval));

        // Skip immediate first tick
        timer.tick().await;

        tracing::info!(
            heartbeat_interval_secs = self.config.heartbeat_interval,
            connection_timeout_secs = self.config.connection_timeout,
            "Heartbeat task started"
        );

        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    tracing::info!("Heartbeat task received shutdown signal");
                    break;
                }
                _ = timer.tick() => {
                    self.tick().await;
                }
            }
        }

        tracing::info!("Heartbeat task stopped");
    }

    async fn tick(&self) {
        let now = chrono::Utc::now();
        let timeout = chrono::Duration::seconds(self.config.connection_timeout as i64);

        let mut probed = 0usize;
        let mut evicted = 0usize;

        for handle in self.registry.all() {
            let silent_for = now.signed_duration_since(handle.last_activity());

            if handle.is_awaiting_pong() && silent_for > timeout {
                evicted += 1;
                tracing::info!(
                    connection_id = %handle.id,
                    user_id = %handle.user_id,
                    silent_secs = silent_for.num_seconds(),
                    "Evicting unresponsive connection"
                );

                handle.close().await;
                session::teardown(
                    &self.registry,
                    &self.rooms,
                    self.identity_store.as_ref(),
                    &self.presence,
                    &handle,
                )
                .await;
                continue;
            }

            probed += 1;
            handle.begin_probe();
            if handle.send_frame(Outbound::Probe).await.is_err() {
                tracing::debug!(
                    connection_id = %handle.id,
                    "Failed to send probe, connection may be dead"
                );
            }
        }

        if probed > 0 || evicted > 0 {
            tracing::debug!(probed, evicted, "Heartbeat round completed");
        }
    }
}
