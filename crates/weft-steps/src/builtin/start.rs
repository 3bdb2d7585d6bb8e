use chrono::Utc;
use futures::future::BoxFuture;
use serde_json::{json, Value};

use weft_core::error::Result;

use crate::context::ExecutionContext;
use crate::handler::{StepHandler, StepOutput};

/// Entry node: passes the run input through and seeds variables from node data.
pub struct StartStep;

impl StepHandler for StartStep {
    fn step_type(&self) -> &'static str {
        "start"
    }

    fn display_name(&self) -> &'static str {
        "Start"
    }

    fn description(&self) -> &'static str {
        "Entry point of a workflow. Outputs the run input plus run metadata."
    }

    fn config_schema(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    fn supports_retry(&self) -> bool {
        false
    }

    fn execute<'a>(&'a self, ctx: &'a mut ExecutionContext) -> BoxFuture<'a, Result<StepOutput>> {
        Box::pin(async move {
            let data = ctx.node().data.clone();
            for (name, value) in data {
                ctx.set_variable(name, value);
            }

            let mut out = ctx.input().as_object().cloned().unwrap_or_default();
            out.insert("runId".into(), Value::String(ctx.run_id().to_string()));
            out.insert(
                "workflowId".into(),
                Value::String(ctx.workflow_id().to_string()),
            );
            out.insert("startedAt".into(), Value::String(Utc::now().to_rfc3339()));
            Ok(out)
        })
    }
}
