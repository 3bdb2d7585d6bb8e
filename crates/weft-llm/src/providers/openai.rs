use futures::future::BoxFuture;
use futures::stream::{Stream, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use weft_core::config::ModelConfig;
use weft_core::error::{Result, WeftError};
use weft_core::traits::ChatModel;
use weft_core::types::{ChatCompletion, ChatRequest, TokenUsage};

use crate::streaming::{SseEvent, SseStream};

/// OpenAI-compatible streaming client. Works with OpenAI, Ollama, Groq, OpenRouter, etc.
pub struct OpenAiClient {
    http: Client,
    config: ModelConfig,
    endpoint: String,
}

impl OpenAiClient {
    pub fn new(config: ModelConfig) -> Result<Self> {
        let endpoint = match &config.base_url {
            Some(url) => url.clone(),
            None => super::default_endpoint(&config.provider)
                .ok_or_else(|| {
                    WeftError::Config(format!(
                        "provider '{}' needs an explicit base_url (built in: {})",
                        config.provider,
                        super::known_providers().join(", ")
                    ))
                })?
                .to_string(),
        };
        if super::needs_api_key(&config.provider) && config.api_key.is_none() {
            warn!(provider = %config.provider, "No API key configured for chat model");
        }
        Ok(Self {
            http: Client::new(),
            config,
            endpoint,
        })
    }

    pub fn model_id(&self) -> &str {
        &self.config.model_id
    }
}

// Request types
#[derive(Serialize)]
struct CompletionBody<'a> {
    model: &'a str,
    messages: Vec<OaiMessage<'a>>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    stream: bool,
    stream_options: StreamOptions,
}

#[derive(Serialize)]
struct OaiMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Serialize)]
struct StreamOptions {
    include_usage: bool,
}

// Response types
#[derive(Deserialize, Debug)]
struct StreamChunk {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    usage: Option<StreamUsage>,
}

#[derive(Deserialize, Debug)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDeltaContent,
}

#[derive(Deserialize, Debug, Default)]
struct StreamDeltaContent {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize, Debug)]
struct StreamUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

/// What a single SSE chunk contributes to the completion.
#[derive(Debug, Default, PartialEq)]
pub(crate) struct ChunkParts {
    pub text: Option<String>,
    pub model: Option<String>,
    pub usage: Option<TokenUsage>,
}

pub(crate) fn parse_chunk(event: &SseEvent) -> Option<ChunkParts> {
    if event.data.trim() == "[DONE]" {
        return None;
    }
    match serde_json::from_str::<StreamChunk>(&event.data) {
        Ok(chunk) => Some(ChunkParts {
            text: chunk
                .choices
                .into_iter()
                .next()
                .and_then(|c| c.delta.content)
                .filter(|t| !t.is_empty()),
            model: chunk.model,
            usage: chunk.usage.map(|u| TokenUsage {
                input_tokens: u.prompt_tokens,
                output_tokens: u.completion_tokens,
            }),
        }),
        Err(e) => {
            warn!(data = %event.data, error = %e, "Failed to parse OpenAI SSE chunk");
            None
        }
    }
}

/// Fold a stream of SSE events into one completion.
pub(crate) async fn collect_completion<S>(mut events: S, requested_model: &str) -> Result<ChatCompletion>
where
    S: Stream<Item = Result<SseEvent>> + Unpin,
{
    let mut text = String::new();
    let mut model = None;
    let mut usage = None;

    while let Some(event) = events.next().await {
        let event = event?;
        if event.data.trim() == "[DONE]" {
            break;
        }
        if let Some(parts) = parse_chunk(&event) {
            if let Some(delta) = parts.text {
                text.push_str(&delta);
            }
            if parts.model.is_some() {
                model = parts.model;
            }
            if parts.usage.is_some() {
                usage = parts.usage;
            }
        }
    }

    Ok(ChatCompletion {
        text,
        model: model.unwrap_or_else(|| requested_model.to_string()),
        usage,
    })
}

impl ChatModel for OpenAiClient {
    fn generate(&self, request: ChatRequest) -> BoxFuture<'_, Result<ChatCompletion>> {
        Box::pin(async move {
            let model = request.model.as_deref().unwrap_or(&self.config.model_id);

            let mut messages = Vec::with_capacity(2);
            if let Some(system) = request.system_message.as_deref() {
                messages.push(OaiMessage {
                    role: "system",
                    content: system,
                });
            }
            messages.push(OaiMessage {
                role: "user",
                content: &request.prompt,
            });

            let body = CompletionBody {
                model,
                messages,
                max_tokens: request.max_tokens,
                temperature: (request.temperature >= 0.0).then_some(request.temperature),
                stream: true,
                stream_options: StreamOptions {
                    include_usage: true,
                },
            };

            debug!(model, endpoint = %self.endpoint, "Sending chat completion request");

            let mut req = self.http.post(&self.endpoint).json(&body);
            if let Some(api_key) = &self.config.api_key {
                req = req.header("Authorization", format!("Bearer {}", api_key));
            }

            let response = req
                .send()
                .await
                .map_err(|e| WeftError::LlmRequest(e.to_string()))?;

            if !response.status().is_success() {
                let status = response.status();
                let body = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "unknown".to_string());
                return Err(WeftError::LlmRequest(format!("HTTP {}: {}", status, body)));
            }

            let events = SseStream::new(response.bytes_stream());
            collect_completion(events, model).await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(data: &str) -> Result<SseEvent> {
        Ok(SseEvent {
            event_type: None,
            data: data.to_string(),
        })
    }

    fn model_config(provider: &str, base_url: Option<&str>) -> ModelConfig {
        ModelConfig {
            provider: provider.into(),
            model_id: "gpt-4o-mini".into(),
            api_key: None,
            base_url: base_url.map(String::from),
            max_tokens: 1024,
            temperature: 0.7,
            retry: None,
        }
    }

    #[test]
    fn test_parse_text_chunk() {
        let parts = parse_chunk(&SseEvent {
            event_type: None,
            data: r#"{"model":"gpt-4o-mini","choices":[{"delta":{"content":"Hel"}}]}"#.into(),
        })
        .unwrap();
        assert_eq!(parts.text.as_deref(), Some("Hel"));
        assert_eq!(parts.model.as_deref(), Some("gpt-4o-mini"));
        assert!(parts.usage.is_none());
    }

    #[tokio::test]
    async fn test_collect_completion() {
        let events = futures::stream::iter(vec![
            event(r#"{"model":"m-1","choices":[{"delta":{"role":"assistant"}}]}"#),
            event(r#"{"choices":[{"delta":{"content":"Hello"}}]}"#),
            event(r#"{"choices":[{"delta":{"content":", world"}}]}"#),
            event("not json"),
            event(r#"{"choices":[],"usage":{"prompt_tokens":9,"completion_tokens":4}}"#),
            event("[DONE]"),
        ]);
        let completion = collect_completion(events, "requested").await.unwrap();
        assert_eq!(completion.text, "Hello, world");
        assert_eq!(completion.model, "m-1");
        assert_eq!(
            completion.usage,
            Some(TokenUsage {
                input_tokens: 9,
                output_tokens: 4
            })
        );
    }

    #[tokio::test]
    async fn test_collect_propagates_stream_error() {
        let events = futures::stream::iter(vec![
            event(r#"{"choices":[{"delta":{"content":"partial"}}]}"#),
            Err(WeftError::LlmStream("reset".into())),
        ]);
        let err = collect_completion(events, "m").await.unwrap_err();
        assert!(matches!(err, WeftError::LlmStream(_)));
    }

    #[test]
    fn test_endpoint_resolution() {
        let client = OpenAiClient::new(model_config("groq", None)).unwrap();
        assert!(client.endpoint.contains("groq.com"));

        let client = OpenAiClient::new(model_config("acme", Some("http://10.0.0.2/v1/chat/completions"))).unwrap();
        assert_eq!(client.endpoint, "http://10.0.0.2/v1/chat/completions");

        assert!(OpenAiClient::new(model_config("acme", None)).is_err());
    }
}
