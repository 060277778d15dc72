//! Peer messaging engine.
//!
//! Direct messages between users, delivered through the [`ConnectionHub`].
//! Unknown or undecodable frames are ignored.

use crate::events::{Envelope, GetHistoryPayload, PrivateMessagePayload, ServerEvent};
use crate::hub::ConnectionHub;
use crate::outbound::OutboundSender;
use analyst_store::{NewPeerMessage, PeerMessageRepository, UserId};
use std::sync::Arc;

pub struct PeerEngine {
    store: Arc<dyn PeerMessageRepository>,
    hub: ConnectionHub,
    user_id: UserId,
    out: OutboundSender,
}

impl PeerEngine {
    pub fn new(
        store: Arc<dyn PeerMessageRepository>,
        hub: ConnectionHub,
        user_id: UserId,
        out: OutboundSender,
    ) -> Self {
        Self {
            store,
            hub,
            user_id,
            out,
        }
    }

    pub async fn handle_text(&self, text: &str) {
        let Ok(envelope) = serde_json::from_str::<Envelope>(text) else {
            tracing::debug!(user_id = self.user_id, "Ignoring undecodable peer frame");
            return;
        };

        match envelope.kind.as_str() {
            "private_message" => {
                if let Ok(payload) = envelope.payload::<PrivateMessagePayload>() {
                    self.private_message(payload).await;
                }
            }
            "get_history" => {
                if let Ok(payload) = envelope.payload::<GetHistoryPayload>() {
                    self.history(payload.other_user_id).await;
                }
            }
            other => {
                tracing::debug!(user_id = self.user_id, kind = other, "Ignoring peer frame");
            }
        }
    }

    async fn private_message(&self, payload: PrivateMessagePayload) {
        let new_message = NewPeerMessage {
            sender_id: self.user_id,
            receiver_id: payload.receiver_id,
            content: payload.content,
        };

        let message = match self.store.save(&new_message) {
            Ok(message) => message,
            Err(e) => {
                tracing::error!(
                    sender_id = self.user_id,
                    receiver_id = new_message.receiver_id,
                    error = %e,
                    "Failed to persist peer message"
                );
                self.out.send(ServerEvent::error("failed to send message")).await;
                return;
            }
        };

        let delivered = self
            .hub
            .send_to(message.receiver_id, ServerEvent::NewMessage(message.clone()))
            .await;
        tracing::debug!(message_id = message.id, delivered, "Peer message stored");

        self.hub
            .send_to(self.user_id, ServerEvent::MessageSent(message))
            .await;
    }

    async fn history(&self, other_user_id: UserId) {
        match self.store.get_history(self.user_id, other_user_id) {
            Ok(messages) => {
                self.out
                    .send(ServerEvent::History {
                        other_user_id,
                        messages,
                    })
                    .await;
            }
            Err(e) => {
                tracing::error!(user_id = self.user_id, other_user_id, error = %e, "Failed to load peer history");
            }
        }
    }
}
