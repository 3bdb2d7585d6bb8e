use std::sync::Arc;

use futures::future::BoxFuture;

use weft_core::error::{Result, WeftError};
use weft_core::traits::{ChatModel, HttpClient, KnowledgeSearch, ScriptEvaluator};
use weft_core::types::*;

/// External boundaries the built-in handlers are constructed with.
#[derive(Clone)]
pub struct StepServices {
    pub http: Arc<dyn HttpClient>,
    pub chat: Arc<dyn ChatModel>,
    pub knowledge: Arc<dyn KnowledgeSearch>,
    pub scripts: Arc<dyn ScriptEvaluator>,
}

impl StepServices {
    /// Every boundary fails with `Unavailable` until replaced.
    pub fn unconfigured() -> Self {
        let disabled = Arc::new(Disabled);
        Self {
            http: disabled.clone(),
            chat: disabled.clone(),
            knowledge: disabled.clone(),
            scripts: disabled,
        }
    }

    pub fn with_http(mut self, http: Arc<dyn HttpClient>) -> Self {
        self.http = http;
        self
    }

    pub fn with_chat(mut self, chat: Arc<dyn ChatModel>) -> Self {
        self.chat = chat;
        self
    }

    pub fn with_knowledge(mut self, knowledge: Arc<dyn KnowledgeSearch>) -> Self {
        self.knowledge = knowledge;
        self
    }

    pub fn with_scripts(mut self, scripts: Arc<dyn ScriptEvaluator>) -> Self {
        self.scripts = scripts;
        self
    }
}

impl Default for StepServices {
    fn default() -> Self {
        Self::unconfigured()
    }
}

/// Placeholder for a boundary that was not configured.
pub struct Disabled;

impl HttpClient for Disabled {
    fn send(&self, _request: HttpRequest) -> BoxFuture<'_, Result<HttpResponse>> {
        Box::pin(async { Err(WeftError::Unavailable("HTTP client".into())) })
    }
}

impl ChatModel for Disabled {
    fn generate(&self, _request: ChatRequest) -> BoxFuture<'_, Result<ChatCompletion>> {
        Box::pin(async { Err(WeftError::Unavailable("Chat model".into())) })
    }
}

impl KnowledgeSearch for Disabled {
    fn search<'a>(
        &'a self,
        _knowledge_base_id: &'a str,
        _query: &'a str,
        _top_k: usize,
        _threshold: f32,
    ) -> BoxFuture<'a, Result<Vec<KnowledgeHit>>> {
        Box::pin(async { Err(WeftError::Unavailable("Knowledge search".into())) })
    }
}

impl ScriptEvaluator for Disabled {
    fn eval(&self, _request: ScriptRequest) -> BoxFuture<'_, Result<ScriptOutcome>> {
        Box::pin(async { Err(WeftError::Unavailable("Script evaluator".into())) })
    }
}
