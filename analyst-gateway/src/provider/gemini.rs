//! Google Gemini provider.
//!
//! Calls the `generateContent` REST endpoint with an API key.

use super::{ChatRequest, ChatResponse, Provider, ProviderError, ProviderErrorKind, Role, TokenUsage};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Gemini provider authenticated by API key.
pub struct GeminiProvider {
    api_key: Option<String>,
    base_url: String,
    client: Client,
}

// ══════════════════════════════════════════════════════════════════════════════
// API REQUEST/RESPONSE TYPES
// ══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Serialize)]
struct GenerateContentRequest {
    contents: Vec<Content>,
    #[serde(rename = "safetySettings")]
    safety_settings: Vec<SafetySetting>,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct Content {
    role: &'static str,
    parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
struct Part {
    text: String,
}

#[derive(Debug, Serialize)]
struct SafetySetting {
    category: &'static str,
    threshold: &'static str,
}

#[derive(Debug, Serialize)]
struct GenerationConfig {
    temperature: f64,
    #[serde(rename = "maxOutputTokens")]
    max_output_tokens: i64,
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    candidates: Option<Vec<Candidate>>,
    error: Option<ApiError>,
    #[serde(rename = "usageMetadata")]
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
    #[serde(rename = "finishReason")]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    message: String,
}

#[derive(Debug, Deserialize)]
struct UsageMetadata {
    #[serde(rename = "promptTokenCount")]
    prompt_token_count: Option<i64>,
    #[serde(rename = "candidatesTokenCount")]
    candidates_token_count: Option<i64>,
    #[serde(rename = "totalTokenCount")]
    total_token_count: Option<i64>,
}

/// Harm categories sent with `BLOCK_NONE`.
const SAFETY_CATEGORIES: [&str; 4] = [
    "HARM_CATEGORY_HARASSMENT",
    "HARM_CATEGORY_HATE_SPEECH",
    "HARM_CATEGORY_SEXUALLY_EXPLICIT",
    "HARM_CATEGORY_DANGEROUS_CONTENT",
];

impl GeminiProvider {
    /// Create a new Gemini provider. A blank key counts as missing.
    pub fn new(api_key: Option<&str>) -> Self {
        Self::with_base_url(api_key, DEFAULT_BASE_URL)
    }

    /// Point the provider at a different API root (used by tests).
    pub fn with_base_url(api_key: Option<&str>, base_url: impl Into<String>) -> Self {
        Self {
            api_key: api_key
                .map(str::trim)
                .filter(|k| !k.is_empty())
                .map(String::from),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: Client::builder()
                .timeout(Duration::from_secs(120))
                .connect_timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_else(|_| Client::new()),
        }
    }

    /// Whether an API key is available.
    pub fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    fn error(&self, model: &str, kind: ProviderErrorKind, message: impl Into<String>) -> ProviderError {
        ProviderError::new("gemini", model, kind, message)
    }
}

#[async_trait]
impl Provider for GeminiProvider {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, ProviderError> {
        let start = Instant::now();

        let api_key = self.api_key.as_ref().ok_or_else(|| {
            self.error(
                &request.model,
                ProviderErrorKind::NotConfigured,
                "Gemini API key is not configured",
            )
        })?;

        let contents: Vec<Content> = request
            .messages
            .iter()
            .map(|msg| Content {
                role: match msg.role {
                    Role::User => "user",
                    Role::Model => "model",
                },
                parts: vec![Part {
                    text: msg.content.clone(),
                }],
            })
            .collect();

        let gemini_request = GenerateContentRequest {
            contents,
            safety_settings: SAFETY_CATEGORIES
                .iter()
                .map(|&category| SafetySetting {
                    category,
                    threshold: "BLOCK_NONE",
                })
                .collect(),
            generation_config: GenerationConfig {
                temperature: request.temperature.unwrap_or(0.7),
                max_output_tokens: request.max_tokens.unwrap_or(8192),
            },
        };

        let model_name = if request.model.starts_with("models/") {
            request.model.clone()
        } else {
            format!("models/{}", request.model)
        };
        let url = format!("{}/{model_name}:generateContent", self.base_url);

        let response = self
            .client
            .post(&url)
            .query(&[("key", api_key.as_str())])
            .json(&gemini_request)
            .send()
            .await
            .map_err(|e| {
                self.error(
                    &request.model,
                    ProviderErrorKind::Transport,
                    format!("Request failed: {}", e.without_url()),
                )
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(self.error(
                &request.model,
                ProviderErrorKind::Status(status.as_u16()),
                format!("API error ({}): {}", status.as_u16(), error_text),
            ));
        }

        let result: GenerateContentResponse = response.json().await.map_err(|e| {
            self.error(
                &request.model,
                ProviderErrorKind::Parse,
                format!("Failed to parse response: {e}"),
            )
        })?;

        if let Some(err) = result.error {
            return Err(self.error(
                &request.model,
                ProviderErrorKind::Parse,
                format!("API error: {}", err.message),
            ));
        }

        let candidate = result
            .candidates
            .and_then(|c| c.into_iter().next())
            .ok_or_else(|| {
                self.error(&request.model, ProviderErrorKind::Empty, "No candidates in response")
            })?;

        let finish_reason = candidate.finish_reason.unwrap_or_default();
        if !finish_reason.eq_ignore_ascii_case("STOP") {
            return Err(self.error(
                &request.model,
                ProviderErrorKind::Blocked(finish_reason.clone()),
                format!("stopped with reason: {finish_reason}"),
            ));
        }

        let content: String = candidate
            .content
            .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
            .unwrap_or_default();
        if content.trim().is_empty() {
            return Err(self.error(
                &request.model,
                ProviderErrorKind::Empty,
                "Response did not contain text",
            ));
        }

        let usage = result.usage_metadata.map_or(TokenUsage::default(), |u| TokenUsage {
            input_tokens: u.prompt_token_count.unwrap_or(0),
            output_tokens: u.candidates_token_count.unwrap_or(0),
            total_tokens: u.total_token_count.unwrap_or(0),
        });

        Ok(ChatResponse {
            provider: "gemini".into(),
            model: request.model,
            content,
            usage,
            finish_reason: Some(finish_reason),
            latency_ms: start.elapsed().as_millis() as u64,
        })
    }
}
