//! Provider abstraction for generation model APIs.
//!
//! The gateway talks to one remote model (Gemini). The trait keeps the
//! network client swappable so retries and tests can wrap or replace it.

mod gemini;
mod resilient;

pub use gemini::GeminiProvider;
pub use resilient::{ResilienceConfig, ResilientProvider};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

// ============================================================================
// Provider Trait
// ============================================================================

/// Unified interface for model providers.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Get the provider name.
    fn name(&self) -> &str;

    /// Send a chat completion request.
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, ProviderError>;
}

/// What went wrong in a provider call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderErrorKind {
    /// No credentials configured.
    NotConfigured,
    /// Connection, TLS or timeout failure before a status arrived.
    Transport,
    /// Non-success HTTP status.
    Status(u16),
    /// The model stopped for a reason other than a normal stop.
    Blocked(String),
    /// The model answered without any text.
    Empty,
    /// The response body could not be decoded.
    Parse,
}

impl ProviderErrorKind {
    /// Transport failures, rate limits and server errors are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport => true,
            Self::Status(code) => *code == 429 || *code >= 500,
            _ => false,
        }
    }
}

/// Error from a provider.
#[derive(Debug, Clone)]
pub struct ProviderError {
    pub provider: String,
    pub model: String,
    pub message: String,
    pub kind: ProviderErrorKind,
}

impl ProviderError {
    pub fn new(
        provider: impl Into<String>,
        model: impl Into<String>,
        kind: ProviderErrorKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
            message: message.into(),
            kind,
        }
    }
}

impl std::fmt::Display for ProviderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}:{}] {}", self.provider, self.model, self.message)
    }
}

impl std::error::Error for ProviderError {}

// ============================================================================
// Request/Response Types
// ============================================================================

/// Conversation role as the provider sees it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Model,
}

/// Unified chat request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    /// Model to use
    pub model: String,
    /// Turns in the conversation, oldest first
    pub messages: Vec<ChatMessage>,
    /// Maximum tokens to generate
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<i64>,
    /// Temperature (0.0 - 1.0)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
}

/// A turn in the conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn model(content: impl Into<String>) -> Self {
        Self {
            role: Role::Model,
            content: content.into(),
        }
    }
}

/// Unified chat response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    /// Provider name
    pub provider: String,
    /// Model used
    pub model: String,
    /// Response content
    pub content: String,
    /// Token usage
    pub usage: TokenUsage,
    /// Finish reason
    pub finish_reason: Option<String>,
    /// Response latency in milliseconds
    pub latency_ms: u64,
}

/// Token usage information.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub total_tokens: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_kinds() {
        let cases = vec![
            (ProviderErrorKind::Transport, true),
            (ProviderErrorKind::Status(429), true),
            (ProviderErrorKind::Status(503), true),
            (ProviderErrorKind::Status(400), false),
            (ProviderErrorKind::Status(403), false),
            (ProviderErrorKind::NotConfigured, false),
            (ProviderErrorKind::Blocked("SAFETY".into()), false),
            (ProviderErrorKind::Empty, false),
            (ProviderErrorKind::Parse, false),
        ];

        for (kind, expected) in cases {
            assert_eq!(kind.is_retryable(), expected, "{kind:?}");
        }
    }

    #[test]
    fn test_chat_request_serialization() {
        let request = ChatRequest {
            model: "gemini-2.5-flash".into(),
            messages: vec![ChatMessage::user("Hello"), ChatMessage::model("Hi")],
            max_tokens: Some(1000),
            temperature: None,
        };

        let json = serde_json::to_string(&request).unwrap();
        assert!(json.contains("gemini-2.5-flash"));
        assert!(json.contains("\"role\":\"model\""));
        assert!(!json.contains("temperature"));
    }

    #[test]
    fn test_error_display() {
        let err = ProviderError::new("gemini", "m", ProviderErrorKind::Empty, "no text");
        assert_eq!(err.to_string(), "[gemini:m] no text");
    }
}
