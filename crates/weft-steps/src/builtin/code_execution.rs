use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::BoxFuture;
use serde_json::{json, Map, Value};

use weft_core::error::{Result, WeftError};
use weft_core::traits::ScriptEvaluator;
use weft_core::types::ScriptRequest;

use crate::context::ExecutionContext;
use crate::handler::{output, StepHandler, StepOutput};

const STEP_TYPE: &str = "code_execution";
const DEFAULT_LANGUAGE: &str = "rhai";
const DEFAULT_TIMEOUT_SECS: i64 = 30;
pub const SUPPORTED_LANGUAGES: &[&str] = &["rhai"];
/// Script names that always hold the full variable map and the run input.
/// A run variable with one of these names is only reachable as `variables.<name>`.
const RESERVED_BINDINGS: &[&str] = &["variables", "input"];

/// Whether `name` can be bound as a script identifier.
fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Runs a sandboxed script with the run's variables in scope.
pub struct CodeExecutionStep {
    scripts: Arc<dyn ScriptEvaluator>,
}

impl CodeExecutionStep {
    pub fn new(scripts: Arc<dyn ScriptEvaluator>) -> Self {
        Self { scripts }
    }
}

impl StepHandler for CodeExecutionStep {
    fn step_type(&self) -> &'static str {
        STEP_TYPE
    }

    fn display_name(&self) -> &'static str {
        "Code Execution"
    }

    fn description(&self) -> &'static str {
        "Evaluate a script with workflow variables bound; returns its result."
    }

    fn config_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "language": { "type": "string", "enum": SUPPORTED_LANGUAGES, "default": DEFAULT_LANGUAGE },
                "code": { "type": "string", "description": "Script source; ${var} is expanded first" },
                "timeout": { "type": "integer", "default": DEFAULT_TIMEOUT_SECS }
            },
            "required": ["code"]
        })
    }

    fn validate_config(&self, config: &Map<String, Value>) -> Result<()> {
        match config.get("code").and_then(Value::as_str) {
            Some(code) if !code.trim().is_empty() => {}
            _ => return Err(WeftError::invalid_config(STEP_TYPE, "code is required")),
        }
        if let Some(language) = config.get("language").and_then(Value::as_str) {
            if !SUPPORTED_LANGUAGES.contains(&language) {
                return Err(WeftError::invalid_config(
                    STEP_TYPE,
                    format!("unsupported language '{}'", language),
                ));
            }
        }
        Ok(())
    }

    fn execute<'a>(&'a self, ctx: &'a mut ExecutionContext) -> BoxFuture<'a, Result<StepOutput>> {
        Box::pin(async move {
            let language = ctx
                .config_string("language")
                .unwrap_or_else(|| DEFAULT_LANGUAGE.to_string());
            if !SUPPORTED_LANGUAGES.contains(&language.as_str()) {
                return Err(WeftError::handler(
                    STEP_TYPE,
                    format!("unsupported language '{}'", language),
                ));
            }
            let code = ctx.resolved_config("code").unwrap_or_default();
            if code.trim().is_empty() {
                return Err(WeftError::handler(STEP_TYPE, "code is empty"));
            }
            let timeout = ctx
                .config_i64("timeout")
                .filter(|t| *t > 0)
                .unwrap_or(DEFAULT_TIMEOUT_SECS) as u64;

            let variables = ctx.variables_snapshot();
            let mut bindings: Map<String, Value> = variables
                .iter()
                .filter(|(name, _)| is_identifier(name) && !RESERVED_BINDINGS.contains(&name.as_str()))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            bindings.insert("variables".into(), Value::Object(variables));
            bindings.insert("input".into(), ctx.input().clone());

            let started = Instant::now();
            let outcome = self
                .scripts
                .eval(ScriptRequest {
                    language,
                    code,
                    bindings,
                    timeout: Duration::from_secs(timeout),
                })
                .await
                .map_err(|e| WeftError::handler(STEP_TYPE, e.to_string()))?;

            Ok(output(json!({
                "result": outcome.value,
                "executionTimeMs": started.elapsed().as_millis() as u64,
                "variables": outcome.bindings,
            })))
        })
    }
}
