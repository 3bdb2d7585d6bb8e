pub mod providers;
pub mod retry;
pub mod streaming;

use std::sync::Arc;

use weft_core::config::ModelConfig;
use weft_core::error::Result;
use weft_core::traits::ChatModel;

pub use providers::OpenAiClient;
pub use retry::RetryingClient;

/// Create a chat model for one configured provider.
pub fn create_client(config: &ModelConfig) -> Result<Arc<dyn ChatModel>> {
    // Every supported provider speaks the OpenAI chat-completions protocol
    Ok(Arc::new(OpenAiClient::new(config.clone())?))
}

/// Primary model wrapped with retries and the configured fallbacks.
pub fn build_chat_model(
    primary: &ModelConfig,
    fallbacks: &[ModelConfig],
) -> Result<Arc<dyn ChatModel>> {
    let mut client = RetryingClient::new(
        create_client(primary)?,
        primary.retry.clone().unwrap_or_default(),
    );
    for fallback in fallbacks {
        let label = format!("{}/{}", fallback.provider, fallback.model_id);
        client = client.with_fallback(label, create_client(fallback)?);
    }
    Ok(Arc::new(client))
}
