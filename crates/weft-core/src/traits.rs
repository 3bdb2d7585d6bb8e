use futures::future::BoxFuture;

use crate::error::Result;
use crate::types::*;
use crate::workflow::WorkflowDefinition;

/// Definition store — source of workflow graphs.
pub trait DefinitionStore: Send + Sync + 'static {
    /// Load a definition by id; unknown ids fail with `WorkflowNotFound`.
    fn load(&self, id: &str) -> BoxFuture<'_, Result<WorkflowDefinition>>;

    /// Validate and store a definition, replacing any with the same id.
    fn save(&self, definition: WorkflowDefinition) -> BoxFuture<'_, Result<()>>;

    /// All stored definitions, ordered by id.
    fn list(&self) -> BoxFuture<'_, Result<Vec<WorkflowDefinition>>>;
}

/// Run store — persistence for runs and their step records.
pub trait RunStore: Send + Sync + 'static {
    /// Insert or replace a run keyed by its id.
    fn save_run(&self, run: &Run) -> BoxFuture<'_, Result<()>>;

    /// Insert or replace a step record keyed by its id.
    fn save_step(&self, step: &StepRecord) -> BoxFuture<'_, Result<()>>;

    fn get_run(&self, id: &RunId) -> BoxFuture<'_, Result<Option<Run>>>;

    /// Step records of a run in creation order.
    fn list_steps(&self, run_id: &RunId) -> BoxFuture<'_, Result<Vec<StepRecord>>>;

    /// Most recent runs first.
    fn list_runs(&self, limit: usize) -> BoxFuture<'_, Result<Vec<Run>>>;
}

/// Outbound HTTP boundary.
pub trait HttpClient: Send + Sync + 'static {
    fn send(&self, request: HttpRequest) -> BoxFuture<'_, Result<HttpResponse>>;
}

/// Single-turn chat completion boundary.
pub trait ChatModel: Send + Sync + 'static {
    fn generate(&self, request: ChatRequest) -> BoxFuture<'_, Result<ChatCompletion>>;
}

/// Similarity search over a knowledge base.
pub trait KnowledgeSearch: Send + Sync + 'static {
    fn search<'a>(
        &'a self,
        knowledge_base_id: &'a str,
        query: &'a str,
        top_k: usize,
        threshold: f32,
    ) -> BoxFuture<'a, Result<Vec<KnowledgeHit>>>;
}

/// Sandboxed script evaluation.
pub trait ScriptEvaluator: Send + Sync + 'static {
    fn eval(&self, request: ScriptRequest) -> BoxFuture<'_, Result<ScriptOutcome>>;
}
