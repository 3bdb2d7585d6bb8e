use futures::future::BoxFuture;
use serde_json::{Map, Value};

use weft_core::error::Result;

use crate::context::ExecutionContext;

/// Output map produced by a step.
pub type StepOutput = Map<String, Value>;

/// Step handler — executes one node type.
pub trait StepHandler: Send + Sync {
    /// Node type this handler serves (e.g. `"http_request"`).
    fn step_type(&self) -> &'static str;

    /// Human-readable name.
    fn display_name(&self) -> &'static str;

    fn description(&self) -> &'static str;

    /// JSON Schema for the node's `config`.
    fn config_schema(&self) -> Value;

    /// Authoring-time config check; failures are `ConfigValidation` errors.
    fn validate_config(&self, config: &Map<String, Value>) -> Result<()> {
        let _ = config;
        Ok(())
    }

    /// Whether a failed execution may be retried by a future policy.
    fn supports_retry(&self) -> bool {
        true
    }

    /// Execute the node against the run's context.
    fn execute<'a>(&'a self, ctx: &'a mut ExecutionContext) -> BoxFuture<'a, Result<StepOutput>>;
}

/// Handler metadata, as listed by the registry.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StepDescriptor {
    pub step_type: String,
    pub display_name: String,
    pub description: String,
    pub config_schema: Value,
    pub supports_retry: bool,
}

impl StepDescriptor {
    pub fn of(handler: &dyn StepHandler) -> Self {
        Self {
            step_type: handler.step_type().to_string(),
            display_name: handler.display_name().to_string(),
            description: handler.description().to_string(),
            config_schema: handler.config_schema(),
            supports_retry: handler.supports_retry(),
        }
    }
}

/// Build an output map from `json!({...})`. Non-object values yield an empty map.
pub(crate) fn output(value: Value) -> StepOutput {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}
