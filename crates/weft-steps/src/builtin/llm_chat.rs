use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::{json, Map, Value};
use tracing::debug;

use weft_core::error::{Result, WeftError};
use weft_core::traits::ChatModel;
use weft_core::types::ChatRequest;

use crate::context::ExecutionContext;
use crate::handler::{output, StepHandler, StepOutput};

const STEP_TYPE: &str = "llm_chat";
const DEFAULT_TEMPERATURE: f64 = 0.7;
const DEFAULT_MAX_TOKENS: i64 = 1024;

/// Rough token estimate for providers that report no usage.
pub fn estimate_tokens(text: &str) -> u64 {
    (text.chars().count() as u64).div_ceil(4)
}

/// Single-turn completion against the configured chat model.
pub struct LlmChatStep {
    model: Arc<dyn ChatModel>,
}

impl LlmChatStep {
    pub fn new(model: Arc<dyn ChatModel>) -> Self {
        Self { model }
    }
}

impl StepHandler for LlmChatStep {
    fn step_type(&self) -> &'static str {
        STEP_TYPE
    }

    fn display_name(&self) -> &'static str {
        "LLM Chat"
    }

    fn description(&self) -> &'static str {
        "Send a prompt to the chat model and capture the response."
    }

    fn config_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "prompt": { "type": "string", "description": "User prompt; supports ${var}" },
                "systemMessage": { "type": "string" },
                "temperature": { "type": "number", "default": DEFAULT_TEMPERATURE },
                "maxTokens": { "type": "integer", "default": DEFAULT_MAX_TOKENS },
                "model": { "type": "string", "description": "Override the configured model id" }
            },
            "required": ["prompt"]
        })
    }

    fn validate_config(&self, config: &Map<String, Value>) -> Result<()> {
        match config.get("prompt").and_then(Value::as_str) {
            Some(p) if !p.trim().is_empty() => Ok(()),
            _ => Err(WeftError::invalid_config(STEP_TYPE, "prompt is required")),
        }
    }

    fn execute<'a>(&'a self, ctx: &'a mut ExecutionContext) -> BoxFuture<'a, Result<StepOutput>> {
        Box::pin(async move {
            let prompt = ctx.resolved_config("prompt").unwrap_or_default();
            if prompt.trim().is_empty() {
                return Err(WeftError::handler(STEP_TYPE, "prompt is empty"));
            }
            let system_message = ctx
                .resolved_config("systemMessage")
                .filter(|s| !s.trim().is_empty());
            let model = ctx
                .resolved_config("model")
                .filter(|s| !s.trim().is_empty());

            let request = ChatRequest {
                prompt,
                system_message,
                temperature: ctx.config_f64("temperature").unwrap_or(DEFAULT_TEMPERATURE) as f32,
                max_tokens: u32::try_from(
                    ctx.config_i64("maxTokens")
                        .filter(|n| *n > 0)
                        .unwrap_or(DEFAULT_MAX_TOKENS),
                )
                .unwrap_or(u32::MAX),
                model,
            };
            debug!(node_id = %ctx.node().id, max_tokens = request.max_tokens, "Sending chat request");

            let completion = self
                .model
                .generate(request)
                .await
                .map_err(|e| WeftError::handler(STEP_TYPE, e.to_string()))?;

            let token_count = match completion.usage {
                Some(usage) => usage.input_tokens + usage.output_tokens,
                None => estimate_tokens(&completion.text),
            };

            Ok(output(json!({
                "response": completion.text,
                "tokenCount": token_count,
                "model": completion.model,
            })))
        })
    }
}
