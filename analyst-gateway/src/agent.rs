//! Agent session engine.
//!
//! One [`AgentEngine`] per authenticated agent connection. Frames are handled
//! strictly one at a time by the connection's read loop. Every failure turns
//! into an error frame or a log line, never a closed connection.

use crate::classify::{parse_requirements, ReplyClassifier, ReplyKind, StructuredReply, GENERATE_DOC_TRIGGER};
use crate::drafts::DraftService;
use crate::events::{
    download_url, Envelope, OutboundFrame, ServerEvent, StartSessionPayload, UserMessagePayload,
};
use crate::llm::LlmGateway;
use crate::outbound::OutboundSender;
use analyst_store::{Message, MessageRepository, NewMessage, SessionRepository, UserId};
use std::sync::Arc;

/// Title used when `start_session` carries none.
pub const DEFAULT_SESSION_TITLE: &str = "New Project";

/// Collaborators shared by every agent connection.
pub struct AgentServices {
    pub sessions: Arc<dyn SessionRepository>,
    pub messages: Arc<dyn MessageRepository>,
    pub llm: Arc<LlmGateway>,
    pub drafts: Arc<DraftService>,
    pub classifier: ReplyClassifier,
}

pub struct AgentEngine {
    services: Arc<AgentServices>,
    user_id: UserId,
    out: OutboundSender,
}

impl AgentEngine {
    pub fn new(services: Arc<AgentServices>, user_id: UserId, out: OutboundSender) -> Self {
        Self {
            services,
            user_id,
            out,
        }
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    /// Handle one inbound text frame.
    pub async fn handle_text(&self, text: &str) {
        let envelope: Envelope = match serde_json::from_str(text) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::debug!(user_id = self.user_id, error = %e, "Undecodable agent frame");
                self.emit(ServerEvent::error("invalid json")).await;
                return;
            }
        };

        match envelope.kind.as_str() {
            "start_session" => match envelope.payload::<StartSessionPayload>() {
                Ok(payload) => self.start_session(payload).await,
                Err(_) => self.emit(ServerEvent::error("invalid json")).await,
            },
            "user_message" => match envelope.payload::<UserMessagePayload>() {
                Ok(payload) => self.user_message(payload).await,
                Err(_) => self.emit(ServerEvent::error("invalid json")).await,
            },
            other => {
                tracing::debug!(user_id = self.user_id, kind = other, "Unknown agent frame type");
                self.emit(ServerEvent::error("unknown message type")).await;
            }
        }
    }

    async fn start_session(&self, payload: StartSessionPayload) {
        let title = match payload.title.trim() {
            "" => DEFAULT_SESSION_TITLE,
            title => title,
        };

        match self.services.sessions.create(self.user_id, title) {
            Ok(session) => {
                tracing::info!(user_id = self.user_id, session_id = session.id, "Session started");
                self.emit(ServerEvent::SessionStarted {
                    session_id: session.id,
                })
                .await;
            }
            Err(e) => {
                tracing::error!(user_id = self.user_id, error = %e, "Failed to create session");
                self.emit(ServerEvent::error("failed to create session")).await;
            }
        }
    }

    async fn user_message(&self, payload: UserMessagePayload) {
        let UserMessagePayload { session_id, text } = payload;

        let saved = match self.services.messages.save(&NewMessage::user(session_id, &text)) {
            Ok(message) => Some(message),
            Err(e) => {
                tracing::warn!(session_id, error = %e, "Failed to save user message");
                None
            }
        };

        let history = self.context_for(session_id, saved.as_ref());

        let reply = match self.services.llm.chat(&history, &text).await {
            Ok(reply) => reply,
            Err(e) => {
                tracing::error!(session_id, error = %e, "LLM call failed");
                self.emit(ServerEvent::error("llm error")).await;
                return;
            }
        };

        match self.services.classifier.classify(&reply) {
            ReplyKind::Structured(structured) => self.structured_reply(session_id, structured).await,
            ReplyKind::PlainText => self.plain_reply(session_id, reply).await,
        }
    }

    /// Session history without the message just saved for this turn.
    fn context_for(&self, session_id: i64, saved: Option<&Message>) -> Vec<Message> {
        let mut history = match self.services.messages.list_by_session(session_id) {
            Ok(history) => history,
            Err(e) => {
                tracing::warn!(session_id, error = %e, "Failed to load history, continuing without it");
                Vec::new()
            }
        };

        if let (Some(saved), Some(last)) = (saved, history.last()) {
            if last.id == saved.id {
                history.pop();
            }
        }
        history
    }

    async fn structured_reply(&self, session_id: i64, reply: StructuredReply) {
        tracing::debug!(session_id, kind = %reply.kind, "Structured reply");
        self.emit(OutboundFrame::Raw(reply.payload.clone())).await;
        self.save_ai(session_id, &reply.candidate);

        if !reply.is_requirements() {
            return;
        }

        let Some(parsed) = parse_requirements(&reply.candidate) else {
            tracing::warn!(session_id, "Requirements reply matched no schema");
            self.emit(ServerEvent::error("Failed to parse document data")).await;
            return;
        };

        match self
            .services
            .drafts
            .create_or_update_for_session(session_id, self.user_id, &parsed)
        {
            Ok(outcome) => {
                let draft = outcome.draft;
                self.emit(ServerEvent::doc_generated(
                    draft.id,
                    &draft.file_path,
                    Some(draft.title.clone()),
                ))
                .await;
                if outcome.created {
                    self.emit(ServerEvent::DocumentCreated {
                        draft_id: draft.id,
                        session_id,
                        title: draft.title,
                    })
                    .await;
                }
            }
            Err(e) => {
                tracing::error!(session_id, error = %e, "Document generation failed");
                self.emit(ServerEvent::error("Failed to generate document")).await;
            }
        }
    }

    async fn plain_reply(&self, session_id: i64, reply: String) {
        let mut doc_event = None;

        let text = if reply.contains(GENERATE_DOC_TRIGGER) {
            match self
                .services
                .drafts
                .create_from_transcript(session_id, self.user_id)
                .await
            {
                Ok(outcome) => {
                    let draft = outcome.draft;
                    let text = format!(
                        "I have generated the Business Analysis Document based on our conversation. \
                         You can download it here: {}",
                        download_url(draft.id)
                    );
                    doc_event = Some(ServerEvent::doc_generated(
                        draft.id,
                        draft.file_path,
                        Some(draft.title),
                    ));
                    text
                }
                Err(e) => {
                    tracing::error!(session_id, error = %e, "Transcript document generation failed");
                    format!("I tried to generate the document, but something went wrong: {e}")
                }
            }
        } else {
            reply
        };

        self.save_ai(session_id, &text);
        if let Some(event) = doc_event {
            self.emit(event).await;
        }
        self.emit(ServerEvent::AiDone { text }).await;
    }

    fn save_ai(&self, session_id: i64, text: &str) {
        if let Err(e) = self.services.messages.save(&NewMessage::ai(session_id, text)) {
            tracing::warn!(session_id, error = %e, "Failed to save AI message");
        }
    }

    async fn emit(&self, frame: impl Into<OutboundFrame>) {
        if !self.out.send(frame).await {
            tracing::debug!(user_id = self.user_id, "Agent connection gone, frame dropped");
        }
    }
}
