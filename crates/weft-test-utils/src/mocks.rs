use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use futures::future::BoxFuture;
use serde_json::Value;
use tokio::sync::Notify;

use weft_core::error::{Result, WeftError};
use weft_core::traits::{ChatModel, HttpClient, KnowledgeSearch, ScriptEvaluator};
use weft_core::types::{
    ChatCompletion, ChatRequest, HttpRequest, HttpResponse, KnowledgeHit, ScriptOutcome,
    ScriptRequest, TokenUsage,
};

fn locked<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Chat model that replays scripted replies, then repeats a default.
pub struct MockChatModel {
    replies: Mutex<VecDeque<Result<String>>>,
    default_reply: String,
    usage: Option<TokenUsage>,
    requests: Mutex<Vec<ChatRequest>>,
}

impl MockChatModel {
    pub fn new(default_reply: impl Into<String>) -> Self {
        Self {
            replies: Mutex::new(VecDeque::new()),
            default_reply: default_reply.into(),
            usage: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Queue a reply served before the default.
    pub fn then_reply(self, text: impl Into<String>) -> Self {
        locked(&self.replies).push_back(Ok(text.into()));
        self
    }

    /// Queue a failure served before the default.
    pub fn then_fail(self, message: impl Into<String>) -> Self {
        locked(&self.replies).push_back(Err(WeftError::LlmRequest(message.into())));
        self
    }

    /// Report this usage with every completion.
    pub fn with_usage(mut self, input_tokens: u64, output_tokens: u64) -> Self {
        self.usage = Some(TokenUsage {
            input_tokens,
            output_tokens,
        });
        self
    }

    pub fn requests(&self) -> Vec<ChatRequest> {
        locked(&self.requests).clone()
    }
}

impl ChatModel for MockChatModel {
    fn generate(&self, request: ChatRequest) -> BoxFuture<'_, Result<ChatCompletion>> {
        let model = request.model.clone().unwrap_or_else(|| "mock-model".into());
        locked(&self.requests).push(request);
        let reply = locked(&self.replies)
            .pop_front()
            .unwrap_or_else(|| Ok(self.default_reply.clone()));
        let usage = self.usage;
        Box::pin(async move {
            Ok(ChatCompletion {
                text: reply?,
                model,
                usage,
            })
        })
    }
}

/// Chat model that blocks every call until [`GatedChatModel::release`].
///
/// [`GatedChatModel::entered`] resolves once a call is waiting, which lets a
/// test act while a node is in flight.
#[derive(Default)]
pub struct GatedChatModel {
    entered: Notify,
    gate: Notify,
}

impl GatedChatModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until a call is blocked on the gate.
    pub async fn entered(&self) {
        self.entered.notified().await;
    }

    /// Let one blocked (or the next) call through.
    pub fn release(&self) {
        self.gate.notify_one();
    }
}

impl ChatModel for GatedChatModel {
    fn generate(&self, request: ChatRequest) -> BoxFuture<'_, Result<ChatCompletion>> {
        Box::pin(async move {
            self.entered.notify_one();
            self.gate.notified().await;
            Ok(ChatCompletion {
                text: format!("released: {}", request.prompt),
                model: "gated".into(),
                usage: None,
            })
        })
    }
}

/// HTTP client answering every request with one canned response.
pub struct MockHttpClient {
    response: Result<HttpResponse>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl MockHttpClient {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            response: Ok(HttpResponse {
                status,
                headers: [("content-type".to_string(), "application/json".to_string())]
                    .into_iter()
                    .collect(),
                body: body.into(),
            }),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Every request fails at the transport level.
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            response: Err(WeftError::Http(message.into())),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        locked(&self.requests).clone()
    }
}

impl HttpClient for MockHttpClient {
    fn send(&self, request: HttpRequest) -> BoxFuture<'_, Result<HttpResponse>> {
        locked(&self.requests).push(request);
        let response = match &self.response {
            Ok(r) => Ok(r.clone()),
            Err(e) => Err(WeftError::Http(e.to_string())),
        };
        Box::pin(async move { response })
    }
}

/// Knowledge search over a fixed hit list, honoring `top_k` and `threshold`.
pub struct StaticKnowledge {
    hits: Vec<KnowledgeHit>,
}

impl StaticKnowledge {
    pub fn new(hits: Vec<KnowledgeHit>) -> Self {
        Self { hits }
    }

    /// Hits built from `(content, score)` pairs.
    pub fn scored(pairs: &[(&str, f32)]) -> Self {
        Self::new(
            pairs
                .iter()
                .map(|(content, score)| KnowledgeHit {
                    content: content.to_string(),
                    score: *score,
                    metadata: Value::Null,
                })
                .collect(),
        )
    }
}

impl KnowledgeSearch for StaticKnowledge {
    fn search<'a>(
        &'a self,
        _knowledge_base_id: &'a str,
        _query: &'a str,
        top_k: usize,
        threshold: f32,
    ) -> BoxFuture<'a, Result<Vec<KnowledgeHit>>> {
        Box::pin(async move {
            Ok(self
                .hits
                .iter()
                .filter(|h| h.score >= threshold)
                .take(top_k)
                .cloned()
                .collect())
        })
    }
}

/// Script evaluator that records requests and returns a fixed value.
pub struct RecordingScripts {
    value: Value,
    requests: Mutex<Vec<ScriptRequest>>,
}

impl RecordingScripts {
    pub fn returning(value: Value) -> Self {
        Self {
            value,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<ScriptRequest> {
        locked(&self.requests).clone()
    }
}

impl ScriptEvaluator for RecordingScripts {
    fn eval(&self, request: ScriptRequest) -> BoxFuture<'_, Result<ScriptOutcome>> {
        let outcome = ScriptOutcome {
            value: self.value.clone(),
            bindings: request.bindings.clone(),
        };
        locked(&self.requests).push(request);
        Box::pin(async move { Ok(outcome) })
    }
}
