pub mod openai;

pub use openai::OpenAiClient;

/// Chat-completions endpoint for a named OpenAI-compatible provider.
pub fn default_endpoint(provider: &str) -> Option<&'static str> {
    match provider {
        "openai" => Some("https://api.openai.com/v1/chat/completions"),
        "ollama" => Some("http://localhost:11434/v1/chat/completions"),
        "groq" => Some("https://api.groq.com/openai/v1/chat/completions"),
        "openrouter" => Some("https://openrouter.ai/api/v1/chat/completions"),
        "together" => Some("https://api.together.xyz/v1/chat/completions"),
        "mistral" => Some("https://api.mistral.ai/v1/chat/completions"),
        "deepseek" => Some("https://api.deepseek.com/v1/chat/completions"),
        _ => None,
    }
}

/// Local providers run without credentials.
pub fn needs_api_key(provider: &str) -> bool {
    !matches!(provider, "ollama")
}

/// Provider names with a built-in endpoint.
pub fn known_providers() -> &'static [&'static str] {
    &[
        "openai",
        "ollama",
        "groq",
        "openrouter",
        "together",
        "mistral",
        "deepseek",
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_known_provider_has_endpoint() {
        for name in known_providers() {
            assert!(default_endpoint(name).is_some(), "{name}");
        }
        assert!(default_endpoint("acme").is_none());
        assert!(!needs_api_key("ollama"));
        assert!(needs_api_key("groq"));
    }
}
