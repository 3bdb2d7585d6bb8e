use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::{debug, warn};

use weft_core::error::{Result, WeftError};
use weft_core::event::EventBus;
use weft_core::traits::RunStore;
use weft_core::types::{RunEvent, RunId, StepRecord, StepStatus};
use weft_core::workflow::Node;
use weft_steps::{ExecutionContext, StepHandler, StepOutput, StepRegistry, VariableStore};

/// Everything the engine needs back after one node ran.
pub(crate) struct Dispatched {
    pub variables: VariableStore,
    pub run_output: Option<Map<String, Value>>,
    pub result: std::result::Result<StepOutput, WeftError>,
}

/// Shared, read-only handles used by every dispatch of a run.
pub(crate) struct Dispatcher<'a> {
    pub registry: &'a StepRegistry,
    pub runs: &'a dyn RunStore,
    pub events: &'a EventBus,
    pub run_id: &'a RunId,
    pub workflow_id: &'a str,
    pub input: &'a Arc<Value>,
}

/// Text stored on a failed record: the handler's own message where there is one.
pub(crate) fn failure_message(err: &WeftError) -> String {
    match err {
        WeftError::HandlerExecution { message, .. } => message.clone(),
        other => other.to_string(),
    }
}

impl Dispatcher<'_> {
    /// Run one node to completion.
    ///
    /// The outer `Result` carries store failures only; handler failures are
    /// returned in [`Dispatched::result`] after being recorded.
    pub async fn dispatch(&self, node: &Node, variables: VariableStore) -> Result<Dispatched> {
        let mut record = StepRecord::pending(
            self.run_id,
            &node.id,
            &node.node_type,
            node.display_name(),
            node.config.clone(),
        );
        record.input = variables.snapshot();
        record.transition(StepStatus::Running);
        self.runs.save_step(&record).await?;
        self.events.publish(RunEvent::StepStarted {
            run_id: self.run_id.clone(),
            node_id: node.id.clone(),
            node_type: node.node_type.clone(),
        });
        debug!(run_id = %self.run_id, node_id = %node.id, node_type = %node.node_type, "Dispatching node");

        let (mut variables, run_output, result) = match self.registry.get(&node.node_type) {
            Some(step) => {
                let mut ctx = ExecutionContext::new(
                    self.run_id.clone(),
                    self.workflow_id,
                    node.clone(),
                    variables,
                    Arc::clone(self.input),
                );
                let result = step.execute(&mut ctx).await;
                let (variables, run_output) = ctx.into_parts();
                (variables, run_output, result)
            }
            None => (
                variables,
                None,
                Err(WeftError::UnknownStepType(node.node_type.clone())),
            ),
        };

        match &result {
            Ok(output) => {
                variables.set(format!("{}_output", node.id), Value::Object(output.clone()));
                record.output = Some(output.clone());
                record.transition(StepStatus::Completed);
                self.runs.save_step(&record).await?;
                let duration_ms = record.duration_ms.unwrap_or(0);
                self.events.publish(RunEvent::StepCompleted {
                    run_id: self.run_id.clone(),
                    node_id: node.id.clone(),
                    duration_ms,
                });
                debug!(run_id = %self.run_id, node_id = %node.id, duration_ms, "Node completed");
            }
            Err(e) => {
                let message = failure_message(e);
                let continued = node.continue_on_error() && !e.is_unknown_step_type();
                record.error = Some(message.clone());
                record.transition(StepStatus::Failed);
                self.runs.save_step(&record).await?;
                self.events.publish(RunEvent::StepFailed {
                    run_id: self.run_id.clone(),
                    node_id: node.id.clone(),
                    error: message.clone(),
                    continued,
                });
                warn!(
                    run_id = %self.run_id,
                    node_id = %node.id,
                    continued,
                    error = %message,
                    "Node failed"
                );
            }
        }

        Ok(Dispatched {
            variables,
            run_output,
            result,
        })
    }

    /// Record a node that routing made unreachable.
    pub async fn skip(&self, node: &Node) -> Result<()> {
        let mut record = StepRecord::pending(
            self.run_id,
            &node.id,
            &node.node_type,
            node.display_name(),
            node.config.clone(),
        );
        record.transition(StepStatus::Skipped);
        self.runs.save_step(&record).await?;
        self.events.publish(RunEvent::StepSkipped {
            run_id: self.run_id.clone(),
            node_id: node.id.clone(),
        });
        debug!(run_id = %self.run_id, node_id = %node.id, "Node skipped");
        Ok(())
    }
}
