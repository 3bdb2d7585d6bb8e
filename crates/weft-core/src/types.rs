use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Unique run identifier.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub String);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from_str(s: &str) -> Self {
        Self(s.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Running)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Running => "RUNNING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Cancelled => "CANCELLED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "RUNNING" => Some(Self::Running),
            "COMPLETED" => Some(Self::Completed),
            "FAILED" => Some(Self::Failed),
            "CANCELLED" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

impl StepStatus {
    /// Records only move forward: PENDING → RUNNING → COMPLETED | FAILED, or PENDING → SKIPPED.
    pub fn can_transition_to(self, next: StepStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Running)
                | (Self::Pending, Self::Skipped)
                | (Self::Running, Self::Completed)
                | (Self::Running, Self::Failed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Skipped)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Running => "RUNNING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Skipped => "SKIPPED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(Self::Pending),
            "RUNNING" => Some(Self::Running),
            "COMPLETED" => Some(Self::Completed),
            "FAILED" => Some(Self::Failed),
            "SKIPPED" => Some(Self::Skipped),
            _ => None,
        }
    }
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

/// Variables and input visible to a run, persisted with it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunContext {
    pub variables: Map<String, Value>,
    pub input_data: Map<String, Value>,
}

/// One execution of a workflow definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub id: RunId,
    pub workflow_id: String,
    pub workflow_version: u32,
    pub status: RunStatus,
    pub input: Map<String, Value>,
    pub output: Option<Map<String, Value>>,
    pub context: RunContext,
    pub requested_by: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<u64>,
    pub error: Option<String>,
}

impl Run {
    pub fn new(
        workflow_id: impl Into<String>,
        workflow_version: u32,
        input: Map<String, Value>,
        requested_by: Option<String>,
    ) -> Self {
        Self {
            id: RunId::new(),
            workflow_id: workflow_id.into(),
            workflow_version,
            status: RunStatus::Running,
            context: RunContext {
                variables: Map::new(),
                input_data: input.clone(),
            },
            input,
            output: None,
            requested_by,
            started_at: Utc::now(),
            completed_at: None,
            duration_ms: None,
            error: None,
        }
    }

    /// Move to a terminal status, stamping completion time and duration.
    pub fn finish(&mut self, status: RunStatus, error: Option<String>) {
        let now = Utc::now();
        self.status = status;
        self.error = error;
        self.completed_at = Some(now);
        self.duration_ms = Some(elapsed_ms(self.started_at, now));
    }
}

/// Execution record of one node within one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRecord {
    pub id: String,
    pub run_id: RunId,
    pub node_id: String,
    pub node_type: String,
    pub name: String,
    pub status: StepStatus,
    pub input: Map<String, Value>,
    pub output: Option<Map<String, Value>>,
    pub config: Map<String, Value>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<u64>,
    pub error: Option<String>,
    pub retry_count: u32,
}

impl StepRecord {
    pub fn pending(
        run_id: &RunId,
        node_id: impl Into<String>,
        node_type: impl Into<String>,
        name: impl Into<String>,
        config: Map<String, Value>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            run_id: run_id.clone(),
            node_id: node_id.into(),
            node_type: node_type.into(),
            name: name.into(),
            status: StepStatus::Pending,
            input: Map::new(),
            output: None,
            config,
            started_at: None,
            completed_at: None,
            duration_ms: None,
            error: None,
            retry_count: 0,
        }
    }

    /// Apply a status change; refused transitions leave the record untouched.
    pub fn transition(&mut self, next: StepStatus) -> bool {
        if !self.status.can_transition_to(next) {
            return false;
        }
        let now = Utc::now();
        match next {
            StepStatus::Running => self.started_at = Some(now),
            _ => {
                self.completed_at = Some(now);
                if let Some(started) = self.started_at {
                    self.duration_ms = Some(elapsed_ms(started, now));
                }
            }
        }
        self.status = next;
        true
    }
}

fn elapsed_ms(from: DateTime<Utc>, to: DateTime<Utc>) -> u64 {
    (to - from).num_milliseconds().max(0) as u64
}

/// Lifecycle notifications published on the [`EventBus`](crate::EventBus).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RunEvent {
    RunStarted {
        run_id: RunId,
        workflow_id: String,
        workflow_version: u32,
    },
    StepStarted {
        run_id: RunId,
        node_id: String,
        node_type: String,
    },
    StepCompleted {
        run_id: RunId,
        node_id: String,
        duration_ms: u64,
    },
    StepFailed {
        run_id: RunId,
        node_id: String,
        error: String,
        continued: bool,
    },
    StepSkipped {
        run_id: RunId,
        node_id: String,
    },
    RunFinished {
        run_id: RunId,
        status: RunStatus,
        duration_ms: u64,
        error: Option<String>,
    },
}

impl RunEvent {
    pub fn run_id(&self) -> &RunId {
        match self {
            Self::RunStarted { run_id, .. }
            | Self::StepStarted { run_id, .. }
            | Self::StepCompleted { run_id, .. }
            | Self::StepFailed { run_id, .. }
            | Self::StepSkipped { run_id, .. }
            | Self::RunFinished { run_id, .. } => run_id,
        }
    }
}

// ── Boundary payloads ──────────────────────────────────────────

/// Outbound request issued by `http_request` steps.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: String,
    pub url: String,
    pub headers: BTreeMap<String, String>,
    pub body: Option<String>,
    pub timeout: Duration,
}

#[derive(Debug, Clone, Default)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    pub body: String,
}

/// Single-turn completion request issued by `llm_chat` steps.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub prompt: String,
    pub system_message: Option<String>,
    pub temperature: f32,
    pub max_tokens: u32,
    /// Overrides the configured model id when set.
    pub model: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

#[derive(Debug, Clone)]
pub struct ChatCompletion {
    pub text: String,
    pub model: String,
    pub usage: Option<TokenUsage>,
}

/// A ranked chunk returned by a knowledge search.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeHit {
    pub content: String,
    pub score: f32,
    #[serde(default)]
    pub metadata: Value,
}

#[derive(Debug, Clone)]
pub struct ScriptRequest {
    pub language: String,
    pub code: String,
    /// Names bound in the script scope before evaluation.
    pub bindings: Map<String, Value>,
    pub timeout: Duration,
}

#[derive(Debug, Clone, Default)]
pub struct ScriptOutcome {
    pub value: Value,
    /// Scope contents after evaluation.
    pub bindings: Map<String, Value>,
}
