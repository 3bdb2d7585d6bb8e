use futures::future::BoxFuture;
use serde_json::{json, Map, Value};

use weft_core::error::{Result, WeftError};

use crate::coerce::{parse_bool, parse_number, to_text};
use crate::context::ExecutionContext;
use crate::handler::{StepHandler, StepOutput};

const STEP_TYPE: &str = "variable_set";

/// Writes one or more typed values into the run's shared variables.
pub struct VariableSetStep;

fn assignments(config: &Map<String, Value>) -> Result<&Vec<Value>> {
    let list = config
        .get("variables")
        .and_then(Value::as_array)
        .ok_or_else(|| WeftError::invalid_config(STEP_TYPE, "variables must be a list"))?;
    if list.is_empty() {
        return Err(WeftError::invalid_config(
            STEP_TYPE,
            "at least one variable is required",
        ));
    }
    for (i, item) in list.iter().enumerate() {
        let name = item.get("name").and_then(Value::as_str).unwrap_or("");
        if name.trim().is_empty() {
            return Err(WeftError::invalid_config(
                STEP_TYPE,
                format!("variable #{} has no name", i + 1),
            ));
        }
    }
    Ok(list)
}

/// Coerce resolved text to the declared type.
fn coerce(name: &str, text: String, kind: &str) -> Result<Value> {
    match kind {
        "number" => parse_number(&text).ok_or_else(|| {
            WeftError::handler(
                STEP_TYPE,
                format!("variable '{}': '{}' is not a number", name, text),
            )
        }),
        "boolean" => Ok(Value::Bool(parse_bool(&text))),
        "json" => serde_json::from_str(&text).map_err(|e| {
            WeftError::handler(
                STEP_TYPE,
                format!("variable '{}': invalid JSON: {}", name, e),
            )
        }),
        _ => Ok(Value::String(text)),
    }
}

impl StepHandler for VariableSetStep {
    fn step_type(&self) -> &'static str {
        STEP_TYPE
    }

    fn display_name(&self) -> &'static str {
        "Set Variables"
    }

    fn description(&self) -> &'static str {
        "Assign values (with ${var} expansion) to shared workflow variables."
    }

    fn config_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "variables": {
                    "type": "array",
                    "minItems": 1,
                    "items": {
                        "type": "object",
                        "properties": {
                            "name": { "type": "string" },
                            "value": {},
                            "type": { "type": "string", "enum": ["string", "number", "boolean", "json"] }
                        },
                        "required": ["name"]
                    }
                }
            },
            "required": ["variables"]
        })
    }

    fn validate_config(&self, config: &Map<String, Value>) -> Result<()> {
        assignments(config).map(|_| ())
    }

    fn execute<'a>(&'a self, ctx: &'a mut ExecutionContext) -> BoxFuture<'a, Result<StepOutput>> {
        Box::pin(async move {
            let list = assignments(&ctx.node().config)
                .map_err(|e| WeftError::handler(STEP_TYPE, e.to_string()))?
                .clone();

            let mut out = Map::new();
            for item in &list {
                let name = item.get("name").and_then(Value::as_str).unwrap_or_default();
                let raw = item.get("value").map(to_text).unwrap_or_default();
                let kind = item.get("type").and_then(Value::as_str).unwrap_or("string");
                let value = coerce(name, ctx.resolve_variables(&raw), kind)?;
                ctx.set_variable(name, value.clone());
                out.insert(name.to_string(), value);
            }
            Ok(out)
        })
    }
}
