use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{Map, Value};
use tokio::sync::{broadcast, watch, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use weft_core::error::{Result, WeftError};
use weft_core::event::EventBus;
use weft_core::traits::{DefinitionStore, RunStore};
use weft_core::types::{Run, RunEvent, RunId, RunStatus, StepRecord};
use weft_core::workflow::{WorkflowDefinition, WorkflowStatus};
use weft_steps::{StepRegistry, VariableStore};

use crate::dispatch::{failure_message, Dispatcher};
use crate::plan::ExecutionPlan;
use crate::run_log::RunLogger;

/// Bookkeeping for a run that is still executing.
struct ActiveRun {
    cancel: CancellationToken,
    done: watch::Receiver<Option<Run>>,
}

/// How a traversal ended when no internal error got in the way.
enum Traversal {
    Finished { output: Map<String, Value> },
    Halted { error: String },
    Cancelled,
}

/// Workflow execution engine.
///
/// Each run executes on its own tokio task; nodes within a run are
/// dispatched one at a time in readiness order. Cloning is cheap and every
/// clone drives the same set of runs.
#[derive(Clone)]
pub struct Engine {
    registry: Arc<StepRegistry>,
    definitions: Arc<dyn DefinitionStore>,
    runs: Arc<dyn RunStore>,
    events: Arc<EventBus>,
    run_logger: Option<RunLogger>,
    active: Arc<Mutex<HashMap<RunId, ActiveRun>>>,
}

impl Engine {
    pub fn new(
        registry: Arc<StepRegistry>,
        definitions: Arc<dyn DefinitionStore>,
        runs: Arc<dyn RunStore>,
    ) -> Self {
        Self {
            registry,
            definitions,
            runs,
            events: Arc::new(EventBus::default()),
            run_logger: None,
            active: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Publish lifecycle events on `events` instead of a private bus.
    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = events;
        self
    }

    /// Write a JSONL log for every run.
    pub fn with_run_logger(mut self, logger: RunLogger) -> Self {
        self.run_logger = Some(logger);
        self
    }

    pub fn registry(&self) -> &StepRegistry {
        &self.registry
    }

    pub fn definitions(&self) -> &Arc<dyn DefinitionStore> {
        &self.definitions
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RunEvent> {
        self.events.subscribe()
    }

    /// Start a run and return as soon as it is persisted as RUNNING.
    ///
    /// Archived workflows and malformed definitions are rejected before any
    /// run exists.
    pub async fn start(
        &self,
        workflow_id: &str,
        input: Map<String, Value>,
        requested_by: Option<String>,
    ) -> Result<Run> {
        let definition = self.definitions.load(workflow_id).await?;
        if definition.status == WorkflowStatus::Archived {
            return Err(WeftError::Definition(format!(
                "workflow '{}' is archived",
                definition.id
            )));
        }
        let plan = ExecutionPlan::build(&definition)?;

        let mut run = Run::new(&definition.id, definition.version, input, requested_by);
        run.context.variables = definition.variables.clone();
        self.runs.save_run(&run).await?;

        let cancel = CancellationToken::new();
        let (done_tx, done_rx) = watch::channel(None);
        self.active.lock().await.insert(
            run.id.clone(),
            ActiveRun {
                cancel: cancel.clone(),
                done: done_rx,
            },
        );

        if let Some(logger) = &self.run_logger {
            logger.spawn(&self.events, run.id.clone());
        }
        self.events.publish(RunEvent::RunStarted {
            run_id: run.id.clone(),
            workflow_id: run.workflow_id.clone(),
            workflow_version: run.workflow_version,
        });
        info!(
            run_id = %run.id,
            workflow_id = %run.workflow_id,
            version = run.workflow_version,
            "Run started"
        );

        let engine = self.clone();
        let task_run = run.clone();
        tokio::spawn(async move {
            engine.drive(task_run, definition, plan, cancel, done_tx).await;
        });

        Ok(run)
    }

    /// Request cooperative cancellation. The in-flight node finishes; nothing
    /// new is dispatched.
    pub async fn cancel(&self, run_id: &RunId) -> Result<()> {
        let active = self.active.lock().await;
        match active.get(run_id) {
            Some(entry) => {
                entry.cancel.cancel();
                info!(run_id = %run_id, "Run cancellation requested");
                Ok(())
            }
            None => Err(WeftError::RunNotActive(run_id.to_string())),
        }
    }

    /// Resolve once the run is terminal.
    pub async fn wait(&self, run_id: &RunId) -> Result<Run> {
        let receiver = self
            .active
            .lock()
            .await
            .get(run_id)
            .map(|entry| entry.done.clone());

        if let Some(mut rx) = receiver {
            let finished = match rx.wait_for(Option::is_some).await {
                Ok(slot) => (*slot).clone(),
                Err(_) => None,
            };
            if let Some(run) = finished {
                return Ok(run);
            }
        }

        self.runs
            .get_run(run_id)
            .await?
            .ok_or_else(|| WeftError::RunNotFound(run_id.to_string()))
    }

    /// Start a run and wait for it.
    pub async fn execute(
        &self,
        workflow_id: &str,
        input: Map<String, Value>,
        requested_by: Option<String>,
    ) -> Result<Run> {
        let run = self.start(workflow_id, input, requested_by).await?;
        self.wait(&run.id).await
    }

    pub async fn get_run(&self, run_id: &RunId) -> Result<Option<Run>> {
        self.runs.get_run(run_id).await
    }

    pub async fn steps(&self, run_id: &RunId) -> Result<Vec<StepRecord>> {
        self.runs.list_steps(run_id).await
    }

    /// Most recent runs first.
    pub async fn history(&self, limit: usize) -> Result<Vec<Run>> {
        self.runs.list_runs(limit).await
    }

    /// Ids of runs currently executing.
    pub async fn active_runs(&self) -> Vec<RunId> {
        self.active.lock().await.keys().cloned().collect()
    }

    async fn drive(
        self,
        mut run: Run,
        definition: WorkflowDefinition,
        plan: ExecutionPlan,
        cancel: CancellationToken,
        done: watch::Sender<Option<Run>>,
    ) {
        let outcome = self.traverse(&mut run, &definition, plan, &cancel).await;
        match outcome {
            Ok(Traversal::Finished { output }) => {
                run.output = Some(output);
                run.finish(RunStatus::Completed, None);
            }
            Ok(Traversal::Halted { error }) => run.finish(RunStatus::Failed, Some(error)),
            Ok(Traversal::Cancelled) => run.finish(RunStatus::Cancelled, None),
            Err(e) => {
                error!(run_id = %run.id, error = %e, "Run aborted by internal error");
                run.finish(RunStatus::Failed, Some(e.to_string()));
            }
        }

        if let Err(e) = self.runs.save_run(&run).await {
            error!(run_id = %run.id, error = %e, "Failed to persist finished run");
        }

        let duration_ms = run.duration_ms.unwrap_or(0);
        self.events.publish(RunEvent::RunFinished {
            run_id: run.id.clone(),
            status: run.status,
            duration_ms,
            error: run.error.clone(),
        });
        match run.status {
            RunStatus::Completed => info!(run_id = %run.id, duration_ms, "Run completed"),
            status => warn!(
                run_id = %run.id,
                status = %status,
                error = run.error.as_deref().unwrap_or(""),
                "Run did not complete"
            ),
        }

        let run_id = run.id.clone();
        done.send_replace(Some(run));
        self.active.lock().await.remove(&run_id);
    }

    async fn traverse(
        &self,
        run: &mut Run,
        definition: &WorkflowDefinition,
        mut plan: ExecutionPlan,
        cancel: &CancellationToken,
    ) -> Result<Traversal> {
        let input = Arc::new(Value::Object(run.input.clone()));
        let run_id = run.id.clone();
        let dispatcher = Dispatcher {
            registry: &self.registry,
            runs: self.runs.as_ref(),
            events: &self.events,
            run_id: &run_id,
            workflow_id: &definition.id,
            input: &input,
        };

        let mut variables = VariableStore::from_map(&definition.variables);
        let mut end_output: Option<Map<String, Value>> = None;

        record_skipped(&dispatcher, definition, &mut plan).await?;

        loop {
            if cancel.is_cancelled() {
                info!(run_id = %run_id, "Run cancelled");
                return Ok(Traversal::Cancelled);
            }
            let Some(node_id) = plan.next_ready().map(str::to_string) else {
                break;
            };
            let node = definition
                .node(&node_id)
                .ok_or_else(|| WeftError::Definition(format!("node '{}' vanished", node_id)))?;

            let dispatched = dispatcher.dispatch(node, variables).await?;
            variables = dispatched.variables;
            if dispatched.run_output.is_some() {
                end_output = dispatched.run_output;
            }

            run.context.variables = variables.snapshot();
            self.runs.save_run(run).await?;

            let branch = match &dispatched.result {
                Ok(output) if node.is_condition() => output.get("result").and_then(Value::as_bool),
                Ok(_) => None,
                Err(e) => {
                    if e.is_unknown_step_type() || !node.continue_on_error() {
                        return Ok(Traversal::Halted {
                            error: format!("{}: {}", node.display_name(), failure_message(e)),
                        });
                    }
                    None
                }
            };

            if cancel.is_cancelled() {
                info!(run_id = %run_id, node_id = %node.id, "Run cancelled");
                return Ok(Traversal::Cancelled);
            }

            plan.resolve(&node_id, branch);
            record_skipped(&dispatcher, definition, &mut plan).await?;
        }

        Ok(Traversal::Finished {
            output: end_output.unwrap_or_else(|| variables.snapshot()),
        })
    }
}

async fn record_skipped(
    dispatcher: &Dispatcher<'_>,
    definition: &WorkflowDefinition,
    plan: &mut ExecutionPlan,
) -> Result<()> {
    for node_id in plan.drain_skipped() {
        if let Some(node) = definition.node(&node_id) {
            dispatcher.skip(node).await?;
        }
    }
    Ok(())
}
