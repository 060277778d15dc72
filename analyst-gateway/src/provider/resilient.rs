//! Retrying provider wrapper.
//!
//! Retries retryable failures (transport, 429, 5xx) with exponential backoff.
//! Non-retryable failures return immediately.

use super::{ChatRequest, ChatResponse, Provider, ProviderError};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Configuration for resilient provider behavior.
#[derive(Debug, Clone)]
pub struct ResilienceConfig {
    /// Maximum number of retries after the first attempt.
    pub max_retries: u32,
    /// Base backoff delay in milliseconds (doubles with each retry).
    pub base_backoff_ms: u64,
    /// Maximum backoff delay in milliseconds.
    pub max_backoff_ms: u64,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_backoff_ms: 100,
            max_backoff_ms: 10_000,
        }
    }
}

/// Wraps a provider with retry and backoff.
pub struct ResilientProvider {
    inner: Arc<dyn Provider>,
    config: ResilienceConfig,
}

impl ResilientProvider {
    pub fn new(inner: Arc<dyn Provider>, config: ResilienceConfig) -> Self {
        Self { inner, config }
    }

    /// Calculate backoff delay for a given attempt.
    fn backoff_delay(&self, attempt: u32) -> Duration {
        let delay_ms = self
            .config
            .base_backoff_ms
            .saturating_mul(2_u64.saturating_pow(attempt))
            .min(self.config.max_backoff_ms);
        Duration::from_millis(delay_ms)
    }
}

#[async_trait]
impl Provider for ResilientProvider {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, ProviderError> {
        let provider_name = self.inner.name();
        let mut attempt = 0;

        loop {
            match self.inner.chat(request.clone()).await {
                Ok(response) => {
                    if attempt > 0 {
                        tracing::info!(
                            provider = provider_name,
                            attempt = attempt + 1,
                            "Provider recovered after retries"
                        );
                    }
                    return Ok(response);
                }
                Err(e) => {
                    let retryable = e.kind.is_retryable();
                    if !retryable || attempt >= self.config.max_retries {
                        tracing::warn!(
                            provider = provider_name,
                            attempt = attempt + 1,
                            retryable,
                            error = %e,
                            "Provider call failed"
                        );
                        return Err(e);
                    }

                    let delay = self.backoff_delay(attempt);
                    tracing::warn!(
                        provider = provider_name,
                        attempt = attempt + 1,
                        max_retries = self.config.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Provider call failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ProviderErrorKind;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Mock provider for testing
    struct MockProvider {
        name: &'static str,
        calls: Arc<AtomicUsize>,
        fail_until: usize,
        kind: ProviderErrorKind,
        response: &'static str,
    }

    impl MockProvider {
        fn new(
            name: &'static str,
            fail_until: usize,
            kind: ProviderErrorKind,
            response: &'static str,
        ) -> (Self, Arc<AtomicUsize>) {
            let calls = Arc::new(AtomicUsize::new(0));
            (
                Self {
                    name,
                    calls: Arc::clone(&calls),
                    fail_until,
                    kind,
                    response,
                },
                calls,
            )
        }
    }

    #[async_trait]
    impl Provider for MockProvider {
        fn name(&self) -> &str {
            self.name
        }

        async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, ProviderError> {
            let attempt = self.calls.fetch_add(1, Ordering::SeqCst) + 1;

            if attempt <= self.fail_until {
                return Err(ProviderError::new(
                    self.name,
                    request.model,
                    self.kind.clone(),
                    "mock failure",
                ));
            }

            Ok(ChatResponse {
                provider: self.name.to_string(),
                model: request.model,
                content: self.response.to_string(),
                usage: Default::default(),
                finish_reason: Some("STOP".to_string()),
                latency_ms: 100,
            })
        }
    }

    fn make_request() -> ChatRequest {
        ChatRequest {
            model: "test-model".to_string(),
            messages: vec![],
            max_tokens: None,
            temperature: None,
        }
    }

    fn fast_config(max_retries: u32) -> ResilienceConfig {
        ResilienceConfig {
            max_retries,
            base_backoff_ms: 1,
            max_backoff_ms: 10,
        }
    }

    #[tokio::test]
    async fn succeeds_without_retry() {
        let (provider, calls) =
            MockProvider::new("primary", 0, ProviderErrorKind::Transport, "success");
        let resilient = ResilientProvider::new(Arc::new(provider), fast_config(2));

        let result = resilient.chat(make_request()).await.unwrap();
        assert_eq!(result.content, "success");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_server_errors_then_succeeds() {
        let (provider, calls) =
            MockProvider::new("primary", 1, ProviderErrorKind::Status(503), "recovered");
        let resilient = ResilientProvider::new(Arc::new(provider), fast_config(2));

        let result = resilient.chat(make_request()).await.unwrap();
        assert_eq!(result.content, "recovered");
        assert_eq!(calls.load(Ordering::SeqCst), 2); // 1 fail + 1 success
    }

    #[tokio::test]
    async fn does_not_retry_client_errors() {
        let (provider, calls) =
            MockProvider::new("primary", usize::MAX, ProviderErrorKind::Status(400), "never");
        let resilient = ResilientProvider::new(Arc::new(provider), fast_config(3));

        let err = resilient.chat(make_request()).await.unwrap_err();
        assert_eq!(err.kind, ProviderErrorKind::Status(400));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn does_not_retry_blocked_replies() {
        let (provider, calls) = MockProvider::new(
            "primary",
            usize::MAX,
            ProviderErrorKind::Blocked("SAFETY".into()),
            "never",
        );
        let resilient = ResilientProvider::new(Arc::new(provider), fast_config(3));

        let err = resilient.chat(make_request()).await.unwrap_err();
        assert_eq!(err.kind, ProviderErrorKind::Blocked("SAFETY".into()));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn returns_last_error_when_retries_exhausted() {
        let (provider, calls) =
            MockProvider::new("primary", usize::MAX, ProviderErrorKind::Status(500), "never");
        let resilient = ResilientProvider::new(Arc::new(provider), fast_config(2));

        let err = resilient.chat(make_request()).await.unwrap_err();
        assert_eq!(err.provider, "primary");
        assert_eq!(err.kind, ProviderErrorKind::Status(500));
        assert_eq!(calls.load(Ordering::SeqCst), 3); // initial + 2 retries
    }

    #[tokio::test]
    async fn zero_retries_makes_one_attempt() {
        let (provider, calls) =
            MockProvider::new("primary", usize::MAX, ProviderErrorKind::Transport, "never");
        let resilient = ResilientProvider::new(Arc::new(provider), fast_config(0));

        assert!(resilient.chat(make_request()).await.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    fn idle() -> Arc<dyn Provider> {
        Arc::new(MockProvider::new("idle", 0, ProviderErrorKind::Transport, "").0)
    }

    #[test]
    fn backoff_doubles_with_attempts() {
        let resilient = ResilientProvider::new(idle(), ResilienceConfig::default());

        assert_eq!(resilient.backoff_delay(0).as_millis(), 100);
        assert_eq!(resilient.backoff_delay(1).as_millis(), 200);
        assert_eq!(resilient.backoff_delay(2).as_millis(), 400);
    }

    #[test]
    fn backoff_caps_at_max() {
        let resilient = ResilientProvider::new(
            idle(),
            ResilienceConfig {
                max_retries: 10,
                base_backoff_ms: 100,
                max_backoff_ms: 500,
            },
        );

        assert_eq!(resilient.backoff_delay(20).as_millis(), 500);
    }
}
