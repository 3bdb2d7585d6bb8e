use std::time::{Duration, Instant};

use futures::future::BoxFuture;
use rhai::{Dynamic, Engine, EvalAltResult, Scope};
use serde_json::{Map, Value};
use tracing::debug;

use weft_core::config::ScriptConfig;
use weft_core::error::{Result, WeftError};
use weft_core::traits::ScriptEvaluator;
use weft_core::types::{ScriptOutcome, ScriptRequest};

/// `ScriptEvaluator` running Rhai on the blocking pool.
///
/// Each evaluation gets a fresh engine with an operation cap and a wall-clock
/// deadline enforced from the progress callback.
pub struct RhaiEvaluator {
    max_operations: u64,
    /// Upper bound on any requested timeout; `None` leaves requests as they are.
    max_timeout: Option<Duration>,
}

impl RhaiEvaluator {
    pub fn new(config: &ScriptConfig) -> Self {
        Self {
            max_operations: config.max_operations,
            max_timeout: (config.timeout_secs > 0).then(|| Duration::from_secs(config.timeout_secs)),
        }
    }
}

impl Default for RhaiEvaluator {
    fn default() -> Self {
        Self::new(&ScriptConfig::default())
    }
}

fn to_dynamic(value: &Value) -> Result<Dynamic> {
    rhai::serde::to_dynamic(value).map_err(|e| WeftError::Script(e.to_string()))
}

fn from_dynamic(value: &Dynamic) -> Value {
    rhai::serde::from_dynamic::<Value>(value).unwrap_or_else(|_| Value::String(value.to_string()))
}

fn evaluate(max_operations: u64, request: ScriptRequest) -> Result<ScriptOutcome> {
    let deadline = Instant::now() + request.timeout;
    let mut engine = Engine::new();
    if max_operations > 0 {
        engine.set_max_operations(max_operations);
    }
    engine.on_progress(move |_| {
        if Instant::now() >= deadline {
            Some(Dynamic::UNIT)
        } else {
            None
        }
    });

    let mut scope = Scope::new();
    for (name, value) in &request.bindings {
        scope.push_dynamic(name.clone(), to_dynamic(value)?);
    }

    let result = engine
        .eval_with_scope::<Dynamic>(&mut scope, &request.code)
        .map_err(|e| match *e {
            EvalAltResult::ErrorTerminated(..) => WeftError::Script(format!(
                "script timed out after {}s",
                request.timeout.as_secs()
            )),
            EvalAltResult::ErrorTooManyOperations(..) => {
                WeftError::Script("script exceeded the operation limit".into())
            }
            other => WeftError::Script(other.to_string()),
        })?;

    let mut bindings = Map::new();
    for (name, _constant, value) in scope.iter() {
        bindings.insert(name.to_string(), from_dynamic(&value));
    }

    Ok(ScriptOutcome {
        value: from_dynamic(&result),
        bindings,
    })
}

impl ScriptEvaluator for RhaiEvaluator {
    fn eval(&self, mut request: ScriptRequest) -> BoxFuture<'_, Result<ScriptOutcome>> {
        Box::pin(async move {
            if request.language != "rhai" {
                return Err(WeftError::Script(format!(
                    "unsupported language '{}'",
                    request.language
                )));
            }
            if let Some(cap) = self.max_timeout {
                request.timeout = request.timeout.min(cap);
            }
            let max_operations = self.max_operations;
            let started = Instant::now();
            let outcome = tokio::task::spawn_blocking(move || evaluate(max_operations, request))
                .await
                .map_err(|e| WeftError::Script(format!("script task failed: {}", e)))?;
            debug!(elapsed_ms = started.elapsed().as_millis() as u64, "Script evaluated");
            outcome
        })
    }
}

/// Convenience for tests and callers that build requests by hand.
pub fn rhai_request(code: &str, bindings: Map<String, Value>, timeout: Duration) -> ScriptRequest {
    ScriptRequest {
        language: "rhai".into(),
        code: code.into(),
        bindings,
        timeout,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn bindings(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_eval_with_bindings() {
        let evaluator = RhaiEvaluator::default();
        let outcome = evaluator
            .eval(rhai_request(
                "let total = a + b; total * 2",
                bindings(json!({"a": 2, "b": 3})),
                Duration::from_secs(5),
            ))
            .await
            .unwrap();
        assert_eq!(outcome.value, json!(10));
        assert_eq!(outcome.bindings["total"], json!(5));
        assert_eq!(outcome.bindings["a"], json!(2));
    }

    #[tokio::test]
    async fn test_maps_round_through_scope() {
        let evaluator = RhaiEvaluator::default();
        let outcome = evaluator
            .eval(rhai_request(
                "input.name + \"!\"",
                bindings(json!({"input": {"name": "Ada"}})),
                Duration::from_secs(5),
            ))
            .await
            .unwrap();
        assert_eq!(outcome.value, json!("Ada!"));
    }

    #[tokio::test]
    async fn test_script_error_reported() {
        let evaluator = RhaiEvaluator::default();
        let err = evaluator
            .eval(rhai_request("let x = ;", Map::new(), Duration::from_secs(5)))
            .await
            .unwrap_err();
        assert!(matches!(err, WeftError::Script(_)));
    }

    #[tokio::test]
    async fn test_operation_limit() {
        let evaluator = RhaiEvaluator::new(&ScriptConfig {
            max_operations: 1_000,
            timeout_secs: 5,
        });
        let err = evaluator
            .eval(rhai_request("loop { }", Map::new(), Duration::from_secs(5)))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("operation limit"));
    }

    #[tokio::test]
    async fn test_timeout() {
        let evaluator = RhaiEvaluator::new(&ScriptConfig {
            max_operations: 0,
            timeout_secs: 1,
        });
        let err = evaluator
            .eval(rhai_request("loop { }", Map::new(), Duration::from_secs(30)))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }

    #[tokio::test]
    async fn test_unsupported_language() {
        let mut request = rhai_request("1", Map::new(), Duration::from_secs(1));
        request.language = "python".into();
        let err = RhaiEvaluator::default().eval(request).await.unwrap_err();
        assert!(err.to_string().contains("unsupported language"));
    }
}
