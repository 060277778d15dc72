//! LLM gateway.
//!
//! Stateless wrapper over a [`Provider`]: builds the conversation the model
//! sees, bounds every call with a timeout and maps provider failures onto
//! [`LlmError`].

use crate::document::AnalysisReport;
use crate::provider::{
    ChatMessage, ChatRequest, GeminiProvider, Provider, ProviderError, ProviderErrorKind,
    ResilienceConfig, ResilientProvider, Role,
};
use analyst_common::LlmConfig;
use analyst_store::{Author, Message};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Model turn that acknowledges the seeded system instruction.
const SYSTEM_ACK: &str = "Understood. I am ready to interview the user.";

/// Placeholder in the transcript prompt.
const TRANSCRIPT_PLACEHOLDER: &str = "{transcript}";

/// Placeholder in the analysis prompt.
const REQUEST_PLACEHOLDER: &str = "{request}";

/// Errors from an LLM call.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("LLM API key is not configured")]
    NotConfigured,

    #[error("LLM request failed: {0}")]
    Request(String),

    #[error("LLM API returned status {status}: {message}")]
    Api { status: u16, message: String },

    #[error("LLM stopped with reason: {finish_reason}")]
    Blocked { finish_reason: String },

    #[error("LLM returned no text")]
    Empty,

    #[error("LLM call timed out after {0:?}")]
    Timeout(Duration),

    #[error("Failed to parse LLM output: {0}")]
    Parse(String),
}

impl From<ProviderError> for LlmError {
    fn from(err: ProviderError) -> Self {
        match err.kind {
            ProviderErrorKind::NotConfigured => Self::NotConfigured,
            ProviderErrorKind::Transport => Self::Request(err.message),
            ProviderErrorKind::Status(status) => Self::Api {
                status,
                message: err.message,
            },
            ProviderErrorKind::Blocked(finish_reason) => Self::Blocked { finish_reason },
            ProviderErrorKind::Empty => Self::Empty,
            ProviderErrorKind::Parse => Self::Parse(err.message),
        }
    }
}

/// Sends prompts and chat histories to the configured model.
pub struct LlmGateway {
    provider: Arc<dyn Provider>,
    model: String,
    temperature: f64,
    max_output_tokens: i64,
    system_prompt: String,
    transcript_prompt: String,
    analysis_prompt: String,
    timeout: Duration,
}

impl LlmGateway {
    /// Gemini behind the retrying wrapper, as configured.
    pub fn from_config(config: &LlmConfig) -> Self {
        if !config.provider.eq_ignore_ascii_case("gemini") {
            tracing::warn!(
                provider = %config.provider,
                "Unknown LLM provider, falling back to gemini"
            );
        }

        let gemini: Arc<dyn Provider> = Arc::new(GeminiProvider::new(config.api_key.as_deref()));
        let resilient = ResilientProvider::new(
            gemini,
            ResilienceConfig {
                max_retries: config.max_retries,
                base_backoff_ms: config.base_backoff_ms,
                ..ResilienceConfig::default()
            },
        );

        Self::new(Arc::new(resilient), config)
    }

    /// Use an explicit provider with the prompts and limits from `config`.
    pub fn new(provider: Arc<dyn Provider>, config: &LlmConfig) -> Self {
        Self {
            provider,
            model: config.model.clone(),
            temperature: config.temperature,
            max_output_tokens: config.max_output_tokens,
            system_prompt: config.system_prompt.clone(),
            transcript_prompt: config.transcript_prompt.clone(),
            analysis_prompt: config.analysis_prompt.clone(),
            timeout: Duration::from_secs(config.request_timeout_secs.max(1)),
        }
    }

    /// Single-shot prompt without conversation context.
    pub async fn generate(&self, prompt: &str) -> Result<String, LlmError> {
        self.send(vec![ChatMessage::user(prompt)]).await
    }

    /// Continue a conversation.
    ///
    /// The system instruction is seeded as a user turn followed by a model
    /// acknowledgement, then `history` and `input` are appended with
    /// consecutive same-role turns merged.
    pub async fn chat(&self, history: &[Message], input: &str) -> Result<String, LlmError> {
        let turns = self.build_turns(history, input);
        tracing::debug!(
            history_len = history.len(),
            turns = turns.len(),
            "Sending chat to model"
        );
        self.send(turns).await
    }

    /// Turn a labelled transcript into an [`AnalysisReport`].
    pub async fn extract_report_from_transcript(
        &self,
        lines: &[String],
    ) -> Result<AnalysisReport, LlmError> {
        let prompt = self
            .transcript_prompt
            .replace(TRANSCRIPT_PLACEHOLDER, &lines.join("\n"));
        self.generate_report(&prompt).await
    }

    /// Turn one free-form request into an [`AnalysisReport`].
    pub async fn analyze_request(&self, request: &str) -> Result<AnalysisReport, LlmError> {
        let prompt = self.analysis_prompt.replace(REQUEST_PLACEHOLDER, request);
        self.generate_report(&prompt).await
    }

    async fn generate_report(&self, prompt: &str) -> Result<AnalysisReport, LlmError> {
        let raw = self.generate(prompt).await?;
        serde_json::from_str(clean_json(&raw)).map_err(|e| LlmError::Parse(e.to_string()))
    }

    fn build_turns(&self, history: &[Message], input: &str) -> Vec<ChatMessage> {
        let mut turns = vec![
            ChatMessage::user(self.system_prompt.as_str()),
            ChatMessage::model(SYSTEM_ACK),
        ];

        for message in history {
            let role = match message.author {
                Author::User => Role::User,
                Author::Ai => Role::Model,
            };
            push_merged(&mut turns, role, &message.text);
        }
        push_merged(&mut turns, Role::User, input);

        turns
    }

    async fn send(&self, messages: Vec<ChatMessage>) -> Result<String, LlmError> {
        let request = ChatRequest {
            model: self.model.clone(),
            messages,
            max_tokens: Some(self.max_output_tokens),
            temperature: Some(self.temperature),
        };

        let response = tokio::time::timeout(self.timeout, self.provider.chat(request))
            .await
            .map_err(|_| LlmError::Timeout(self.timeout))??;

        tracing::debug!(
            provider = %response.provider,
            latency_ms = response.latency_ms,
            output_tokens = response.usage.output_tokens,
            "Model replied"
        );
        Ok(response.content)
    }
}

fn push_merged(turns: &mut Vec<ChatMessage>, role: Role, text: &str) {
    match turns.last_mut() {
        Some(last) if last.role == role => {
            last.content.push('\n');
            last.content.push_str(text);
        }
        _ => turns.push(ChatMessage {
            role,
            content: text.to_string(),
        }),
    }
}

/// Strip surrounding whitespace and markdown code fences from model JSON.
pub fn clean_json(raw: &str) -> &str {
    let trimmed = raw.trim();
    let trimmed = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed);
    trimmed.strip_suffix("```").unwrap_or(trimmed).trim()
}
