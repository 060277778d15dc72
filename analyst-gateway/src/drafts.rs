//! Draft service: renders structured requirements and keeps one live draft
//! per session.

use crate::document::{
    adhoc_filename, document_filename, DocxRenderer, IntoDocument, ParsedRequirements, RenderError,
};
use crate::llm::{LlmError, LlmGateway};
use analyst_store::{
    Author, Draft, DraftRepository, DraftStatus, MessageRepository, NewDraft, UserId,
};
use chrono::{SubsecRound, Utc};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DraftError {
    #[error("doc generation failed: {0}")]
    Render(#[from] RenderError),

    #[error("extraction failed: {0}")]
    Extraction(#[from] LlmError),

    #[error("analysis failed: {0}")]
    Analysis(LlmError),

    #[error("request must not be empty")]
    EmptyRequest,

    #[error("failed to encode document data: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("failed to get messages: {0:#}")]
    History(anyhow::Error),

    #[error("db save failed: {0:#}")]
    Store(anyhow::Error),

    #[error("draft {0} not found")]
    NotFound(i64),
}

/// Result of [`DraftService::create_or_update_for_session`].
#[derive(Debug, Clone)]
pub struct DraftOutcome {
    pub draft: Draft,
    /// `true` when a new row was inserted, `false` for an in-place update.
    pub created: bool,
}

pub struct DraftService {
    drafts: Arc<dyn DraftRepository>,
    messages: Arc<dyn MessageRepository>,
    llm: Arc<LlmGateway>,
    renderer: DocxRenderer,
}

impl DraftService {
    pub fn new(
        drafts: Arc<dyn DraftRepository>,
        messages: Arc<dyn MessageRepository>,
        llm: Arc<LlmGateway>,
        renderer: DocxRenderer,
    ) -> Self {
        Self {
            drafts,
            messages,
            llm,
            renderer,
        }
    }

    pub fn renderer(&self) -> &DocxRenderer {
        &self.renderer
    }

    /// Render `parsed` and store it as the session's draft.
    ///
    /// An existing draft for the session is overwritten in place, otherwise
    /// a pending draft is inserted. A render failure leaves the store
    /// untouched. Session ids `<= 0` always get a fresh draft and file with
    /// no session link.
    pub fn create_or_update_for_session(
        &self,
        session_id: i64,
        owner_user_id: UserId,
        parsed: &ParsedRequirements,
    ) -> Result<DraftOutcome, DraftError> {
        let title = parsed.title(session_id);
        let filename = if session_id > 0 {
            document_filename(session_id, &title)
        } else {
            adhoc_filename(&title)
        };
        let path = self.renderer.render(&parsed.to_document(), &filename)?;
        let file_path = path.to_string_lossy().into_owned();
        let structured = parsed.to_json()?;

        let existing = if session_id > 0 {
            self.drafts
                .get_by_session(session_id)
                .map_err(DraftError::Store)?
        } else {
            None
        };

        if let Some(mut draft) = existing {
            draft.title = title;
            draft.content = parsed.summary();
            draft.file_path = file_path;
            draft.structured_content = Some(structured);
            draft.updated_at = Utc::now().trunc_subsecs(6);

            self.drafts.update(&draft).map_err(|e| {
                tracing::warn!(
                    session_id,
                    path = %draft.file_path,
                    error = %e,
                    "Draft update failed after render, file left on disk"
                );
                DraftError::Store(e)
            })?;

            tracing::info!(session_id, draft_id = draft.id, "Draft updated");
            return Ok(DraftOutcome {
                draft,
                created: false,
            });
        }

        let new_draft = NewDraft {
            session_id: (session_id > 0).then_some(session_id),
            owner_user_id,
            title,
            content: parsed.summary(),
            file_path,
            structured_content: Some(structured),
        };
        let draft = self.drafts.create(&new_draft).map_err(|e| {
            tracing::warn!(
                session_id,
                path = %new_draft.file_path,
                error = %e,
                "Draft insert failed after render, file left on disk"
            );
            DraftError::Store(e)
        })?;

        tracing::info!(session_id, draft_id = draft.id, "Draft created");
        Ok(DraftOutcome {
            draft,
            created: true,
        })
    }

    /// Generate a report from the whole session transcript.
    pub async fn create_from_transcript(
        &self,
        session_id: i64,
        owner_user_id: UserId,
    ) -> Result<DraftOutcome, DraftError> {
        let lines: Vec<String> = self
            .messages
            .list_by_session(session_id)
            .map_err(DraftError::History)?
            .into_iter()
            .map(|m| {
                let speaker = match m.author {
                    Author::User => "User",
                    Author::Ai => "Analyst",
                };
                format!("{speaker}: {}", m.text)
            })
            .collect();

        let report = self.llm.extract_report_from_transcript(&lines).await?;
        self.create_or_update_for_session(
            session_id,
            owner_user_id,
            &ParsedRequirements::Report(report),
        )
    }

    /// Analyze a free-form request and store the result as a draft outside
    /// any session. The request text becomes the draft content.
    pub async fn create_from_request(
        &self,
        owner_user_id: UserId,
        title: &str,
        request: &str,
    ) -> Result<Draft, DraftError> {
        let request = request.trim();
        if request.is_empty() {
            return Err(DraftError::EmptyRequest);
        }

        let report = self
            .llm
            .analyze_request(request)
            .await
            .map_err(DraftError::Analysis)?;
        let parsed = ParsedRequirements::Report(report);

        let title = match title.trim() {
            "" => parsed.title(0),
            t => t.to_string(),
        };
        let path = self
            .renderer
            .render(&parsed.to_document(), &adhoc_filename(&title))?;

        let new_draft = NewDraft {
            session_id: None,
            owner_user_id,
            title,
            content: request.to_string(),
            file_path: path.to_string_lossy().into_owned(),
            structured_content: Some(parsed.to_json()?),
        };
        let draft = self.drafts.create(&new_draft).map_err(|e| {
            tracing::warn!(
                path = %new_draft.file_path,
                error = %e,
                "Draft insert failed after render, file left on disk"
            );
            DraftError::Store(e)
        })?;

        tracing::info!(draft_id = draft.id, owner_user_id, "Draft created from request");
        Ok(draft)
    }

    pub fn approve(&self, id: i64) -> Result<Draft, DraftError> {
        self.set_status(id, DraftStatus::Approved)
    }

    pub fn reject(&self, id: i64) -> Result<Draft, DraftError> {
        self.set_status(id, DraftStatus::Rejected)
    }

    fn set_status(&self, id: i64, status: DraftStatus) -> Result<Draft, DraftError> {
        let draft = self
            .drafts
            .set_status(id, status)
            .map_err(DraftError::Store)?
            .ok_or(DraftError::NotFound(id))?;
        tracing::info!(draft_id = id, status = %status, "Draft status changed");
        Ok(draft)
    }
}
