//! Connection hub for the peer channel.
//!
//! Maps a user id to the outbound queue of that user's live connection.
//! One entry per user, last registration wins. Delivery to a user who is not
//! connected is silently dropped.

use crate::events::OutboundFrame;
use crate::outbound::OutboundSender;
use analyst_store::UserId;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Identifies one registration so a closing connection only removes itself.
pub type ConnectionId = Uuid;

struct Registration {
    id: ConnectionId,
    sender: OutboundSender,
}

/// Shared registry of live peer connections.
#[derive(Clone, Default)]
pub struct ConnectionHub {
    inner: Arc<RwLock<HashMap<UserId, Registration>>>,
}

impl ConnectionHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `sender` for `user_id`, replacing any earlier connection.
    pub async fn register(&self, user_id: UserId, sender: OutboundSender) -> ConnectionId {
        let id = Uuid::new_v4();
        let previous = self
            .inner
            .write()
            .await
            .insert(user_id, Registration { id, sender });

        if previous.is_some() {
            tracing::info!(user_id, connection_id = %id, "Replaced existing peer connection");
        } else {
            tracing::debug!(user_id, connection_id = %id, "Peer connection registered");
        }
        id
    }

    /// Drop whatever connection is registered for `user_id`.
    pub async fn unregister(&self, user_id: UserId) -> bool {
        self.inner.write().await.remove(&user_id).is_some()
    }

    /// Drop the registration for `user_id` only if it is still `connection_id`.
    pub async fn release(&self, user_id: UserId, connection_id: ConnectionId) -> bool {
        let mut map = self.inner.write().await;
        match map.get(&user_id) {
            Some(registration) if registration.id == connection_id => {
                map.remove(&user_id);
                tracing::debug!(user_id, %connection_id, "Peer connection released");
                true
            }
            _ => false,
        }
    }

    /// Queue `frame` for `user_id`. Returns whether it was accepted.
    ///
    /// Never waits on the receiver: a full or closed queue drops the frame.
    pub async fn send_to(&self, user_id: UserId, frame: impl Into<OutboundFrame>) -> bool {
        let sender = {
            let map = self.inner.read().await;
            match map.get(&user_id) {
                Some(registration) => registration.sender.clone(),
                None => return false,
            }
        };
        let accepted = sender.try_send(frame);
        if !accepted {
            tracing::debug!(user_id, "Peer frame not delivered");
        }
        accepted
    }

    pub async fn is_connected(&self, user_id: UserId) -> bool {
        self.inner.read().await.contains_key(&user_id)
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    /// Drop every registration. Used at shutdown.
    pub async fn clear(&self) {
        let mut map = self.inner.write().await;
        let count = map.len();
        map.clear();
        tracing::info!(count, "Connection hub cleared");
    }
}
