use futures::future::BoxFuture;
use serde_json::{json, Map, Value};

use weft_core::error::{Result, WeftError};

use crate::context::ExecutionContext;
use crate::handler::{StepHandler, StepOutput};

const STEP_TYPE: &str = "end";

/// Terminal node: builds the run's final output.
pub struct EndStep;

impl StepHandler for EndStep {
    fn step_type(&self) -> &'static str {
        STEP_TYPE
    }

    fn display_name(&self) -> &'static str {
        "End"
    }

    fn description(&self) -> &'static str {
        "Terminates a branch and sets the run output from a message and output mapping."
    }

    fn config_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "message": { "type": "string", "description": "Final message; supports ${var}" },
                "outputData": { "type": "object", "description": "Output fields; text values support ${var}" }
            }
        })
    }

    fn validate_config(&self, config: &Map<String, Value>) -> Result<()> {
        match config.get("outputData") {
            None | Some(Value::Null) | Some(Value::Object(_)) => Ok(()),
            Some(_) => Err(WeftError::invalid_config(
                STEP_TYPE,
                "outputData must be an object",
            )),
        }
    }

    fn supports_retry(&self) -> bool {
        false
    }

    fn execute<'a>(&'a self, ctx: &'a mut ExecutionContext) -> BoxFuture<'a, Result<StepOutput>> {
        Box::pin(async move {
            let message = ctx.resolved_config("message").unwrap_or_default();

            let mut data = Map::new();
            if let Some(Value::Object(mapping)) = ctx.get_config("outputData") {
                for (key, value) in mapping {
                    let resolved = match value {
                        Value::String(text) => Value::String(ctx.resolve_variables(text)),
                        other => other.clone(),
                    };
                    data.insert(key.clone(), resolved);
                }
            }

            let mut out = Map::new();
            out.insert("message".into(), Value::String(message));
            out.insert("data".into(), Value::Object(data));
            ctx.set_run_output(out.clone());
            Ok(out)
        })
    }
}
