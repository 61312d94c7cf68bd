use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use tokio::sync::{RwLock, broadcast, mpsc};
use tracing::debug;
use uuid::Uuid;

use crowd_presence::{ONLINE, PresenceCache};
use crowd_types::events::GatewayEvent;

/// Manages connected clients, keeps the online counters in the presence
/// cache current, and routes events to them.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    /// Broadcast channel for global events (presence changes)
    broadcast_tx: broadcast::Sender<GatewayEvent>,

    /// Per-user targeted send channels: user_id -> (conn_id, sender).
    /// The newest connection of a user owns the slot.
    user_channels: RwLock<HashMap<Uuid, (Uuid, mpsc::UnboundedSender<GatewayEvent>)>>,

    presence: Arc<dyn PresenceCache>,
}

impl Dispatcher {
    pub fn new(presence: Arc<dyn PresenceCache>) -> Self {
        let (broadcast_tx, _) = broadcast::channel(1024);
        Self {
            inner: Arc::new(DispatcherInner {
                broadcast_tx,
                user_channels: RwLock::new(HashMap::new()),
                presence,
            }),
        }
    }

    pub fn presence(&self) -> &Arc<dyn PresenceCache> {
        &self.inner.presence
    }

    /// Subscribe to global gateway events.
    pub fn subscribe(&self) -> broadcast::Receiver<GatewayEvent> {
        self.inner.broadcast_tx.subscribe()
    }

    /// Broadcast an event to all connected clients.
    pub fn broadcast(&self, event: GatewayEvent) {
        let _ = self.inner.broadcast_tx.send(event);
    }

    /// Register a per-user targeted channel. Returns (conn_id, receiver).
    pub async fn register_user_channel(
        &self,
        user_id: Uuid,
    ) -> (Uuid, mpsc::UnboundedReceiver<GatewayEvent>) {
        let conn_id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.user_channels.write().await.insert(user_id, (conn_id, tx));
        (conn_id, rx)
    }

    /// Unregister a per-user targeted channel, but only if conn_id matches.
    pub async fn unregister_user_channel(&self, user_id: Uuid, conn_id: Uuid) {
        let mut channels = self.inner.user_channels.write().await;
        if let Some((stored_conn_id, _)) = channels.get(&user_id) {
            if *stored_conn_id == conn_id {
                channels.remove(&user_id);
            }
        }
    }

    /// Send `event` to each of `user_ids` that is connected. Returns how many received it.
    pub async fn send_to_users(&self, user_ids: &[Uuid], event: &GatewayEvent) -> usize {
        let channels = self.inner.user_channels.read().await;
        let mut delivered = 0;
        for user_id in user_ids {
            if let Some((_, tx)) = channels.get(user_id) {
                if tx.send(event.clone()).is_ok() {
                    delivered += 1;
                }
            }
        }
        debug!("Delivered event to {}/{} users", delivered, user_ids.len());
        delivered
    }

    /// Count a new connection for the user. Broadcasts presence on the first one.
    pub async fn user_online(&self, user_id: Uuid, username: String) -> Result<()> {
        let count = self.inner.presence.incr_status(ONLINE, user_id).await?;
        if count == 1 {
            self.broadcast(GatewayEvent::PresenceUpdate {
                user_id,
                username,
                online: true,
            });
        }
        Ok(())
    }

    /// Count a closed connection. Broadcasts presence when the last one closes.
    pub async fn user_offline(&self, user_id: Uuid, username: String, conn_id: Uuid) -> Result<()> {
        self.unregister_user_channel(user_id, conn_id).await;

        let count = self.inner.presence.decr_status(ONLINE, user_id).await?;
        if count == 0 {
            self.broadcast(GatewayEvent::PresenceUpdate {
                user_id,
                username,
                online: false,
            });
        }
        Ok(())
    }
}
