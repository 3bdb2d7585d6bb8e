use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use tracing::{info, warn};

use weft_core::config::RetryConfig;
use weft_core::error::{Result, WeftError};
use weft_core::traits::ChatModel;
use weft_core::types::{ChatCompletion, ChatRequest};

/// A chat model that retries transient failures, then tries fallback models in order.
pub struct RetryingClient {
    primary: Arc<dyn ChatModel>,
    fallbacks: Vec<(String, Arc<dyn ChatModel>)>,
    retry_config: RetryConfig,
}

impl RetryingClient {
    pub fn new(primary: Arc<dyn ChatModel>, retry_config: RetryConfig) -> Self {
        Self {
            primary,
            fallbacks: Vec::new(),
            retry_config,
        }
    }

    /// Add a fallback, labelled for logs.
    pub fn with_fallback(mut self, label: impl Into<String>, model: Arc<dyn ChatModel>) -> Self {
        self.fallbacks.push((label.into(), model));
        self
    }
}

fn is_retryable(e: &WeftError) -> bool {
    match e {
        WeftError::LlmRequest(msg) => {
            msg.contains("429")
                || msg.contains("500")
                || msg.contains("502")
                || msg.contains("503")
                || msg.contains("timeout")
                || msg.contains("connection")
        }
        WeftError::LlmStream(_) => true,
        _ => false,
    }
}

fn calculate_backoff(attempt: u32, config: &RetryConfig) -> Duration {
    let ms = config
        .initial_backoff_ms
        .saturating_mul(2u64.saturating_pow(attempt))
        .min(config.max_backoff_ms);
    // Jitter: 0.8x to 1.2x
    let jitter = 0.8 + rand::random::<f64>() * 0.4;
    Duration::from_millis((ms as f64 * jitter) as u64)
}

impl ChatModel for RetryingClient {
    fn generate(&self, request: ChatRequest) -> BoxFuture<'_, Result<ChatCompletion>> {
        Box::pin(async move {
            let max_retries = self.retry_config.max_retries;

            let mut last_err = None;
            for attempt in 0..=max_retries {
                match self.primary.generate(request.clone()).await {
                    Ok(completion) => return Ok(completion),
                    Err(e) if is_retryable(&e) && attempt < max_retries => {
                        let backoff = calculate_backoff(attempt, &self.retry_config);
                        warn!(
                            attempt = attempt + 1,
                            max_retries,
                            backoff_ms = backoff.as_millis() as u64,
                            error = %e,
                            "Retrying chat request"
                        );
                        tokio::time::sleep(backoff).await;
                        last_err = Some(e);
                    }
                    Err(e) => {
                        last_err = Some(e);
                        break;
                    }
                }
            }

            if !self.fallbacks.is_empty() {
                info!("Primary chat model exhausted, trying fallbacks");
            }
            for (label, fallback) in &self.fallbacks {
                match fallback.generate(request.clone()).await {
                    Ok(completion) => {
                        info!(model = %label, "Fell back to alternative model");
                        return Ok(completion);
                    }
                    Err(e) => {
                        warn!(model = %label, error = %e, "Fallback model also failed");
                    }
                }
            }

            Err(last_err.unwrap_or_else(|| WeftError::LlmRequest("All providers failed".into())))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Flaky {
        failures: u32,
        calls: AtomicU32,
        error: fn() -> WeftError,
    }

    impl ChatModel for Flaky {
        fn generate(&self, _request: ChatRequest) -> BoxFuture<'_, Result<ChatCompletion>> {
            Box::pin(async move {
                let n = self.calls.fetch_add(1, Ordering::SeqCst);
                if n < self.failures {
                    return Err((self.error)());
                }
                Ok(ChatCompletion {
                    text: "ok".into(),
                    model: "flaky".into(),
                    usage: None,
                })
            })
        }
    }

    fn fast_retry() -> RetryConfig {
        RetryConfig {
            max_retries: 2,
            initial_backoff_ms: 1,
            max_backoff_ms: 2,
        }
    }

    fn request() -> ChatRequest {
        ChatRequest {
            prompt: "hi".into(),
            system_message: None,
            temperature: 0.7,
            max_tokens: 16,
            model: None,
        }
    }

    #[test]
    fn test_backoff_is_capped() {
        let config = RetryConfig {
            max_retries: 10,
            initial_backoff_ms: 1000,
            max_backoff_ms: 5000,
        };
        let d = calculate_backoff(8, &config);
        assert!(d <= Duration::from_millis(6000));
        assert!(d >= Duration::from_millis(4000));
    }

    #[tokio::test]
    async fn test_retries_transient_errors() {
        let primary = Arc::new(Flaky {
            failures: 2,
            calls: AtomicU32::new(0),
            error: || WeftError::LlmRequest("HTTP 503: busy".into()),
        });
        let client = RetryingClient::new(primary.clone(), fast_retry());
        let completion = client.generate(request()).await.unwrap();
        assert_eq!(completion.text, "ok");
        assert_eq!(primary.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_error_goes_to_fallback() {
        let primary = Arc::new(Flaky {
            failures: u32::MAX,
            calls: AtomicU32::new(0),
            error: || WeftError::LlmRequest("HTTP 401: bad key".into()),
        });
        let fallback = Arc::new(Flaky {
            failures: 0,
            calls: AtomicU32::new(0),
            error: || WeftError::LlmRequest("unused".into()),
        });
        let client = RetryingClient::new(primary.clone(), fast_retry()).with_fallback("backup", fallback);
        let completion = client.generate(request()).await.unwrap();
        assert_eq!(completion.model, "flaky");
        assert_eq!(primary.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_all_failing_returns_primary_error() {
        let primary = Arc::new(Flaky {
            failures: u32::MAX,
            calls: AtomicU32::new(0),
            error: || WeftError::LlmRequest("HTTP 401: bad key".into()),
        });
        let err = RetryingClient::new(primary, fast_retry())
            .generate(request())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("401"));
    }
}
