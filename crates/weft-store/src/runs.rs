use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, SecondsFormat, Utc};
use futures::future::BoxFuture;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde_json::{Map, Value};
use tokio::sync::RwLock;
use tracing::debug;

use weft_core::error::{Result, WeftError};
use weft_core::traits::RunStore;
use weft_core::types::{Run, RunContext, RunId, RunStatus, StepRecord, StepStatus};

// ── In-memory ──────────────────────────────────────────────────

#[derive(Default)]
struct MemoryState {
    runs: HashMap<RunId, (u64, Run)>,
    steps: HashMap<RunId, Vec<StepRecord>>,
    next_seq: u64,
}

/// Run store for tests and `backend = "memory"`.
#[derive(Default)]
pub struct InMemoryRunStore {
    state: RwLock<MemoryState>,
}

impl InMemoryRunStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RunStore for InMemoryRunStore {
    fn save_run(&self, run: &Run) -> BoxFuture<'_, Result<()>> {
        let run = run.clone();
        Box::pin(async move {
            let mut state = self.state.write().await;
            let existing = state.runs.get(&run.id).map(|(seq, _)| *seq);
            let seq = match existing {
                Some(seq) => seq,
                None => {
                    state.next_seq += 1;
                    state.next_seq
                }
            };
            state.runs.insert(run.id.clone(), (seq, run));
            Ok(())
        })
    }

    fn save_step(&self, step: &StepRecord) -> BoxFuture<'_, Result<()>> {
        let step = step.clone();
        Box::pin(async move {
            let mut state = self.state.write().await;
            let steps = state.steps.entry(step.run_id.clone()).or_default();
            match steps.iter_mut().find(|s| s.id == step.id) {
                Some(existing) => *existing = step,
                None => steps.push(step),
            }
            Ok(())
        })
    }

    fn get_run(&self, id: &RunId) -> BoxFuture<'_, Result<Option<Run>>> {
        let id = id.clone();
        Box::pin(async move {
            Ok(self
                .state
                .read()
                .await
                .runs
                .get(&id)
                .map(|(_, run)| run.clone()))
        })
    }

    fn list_steps(&self, run_id: &RunId) -> BoxFuture<'_, Result<Vec<StepRecord>>> {
        let run_id = run_id.clone();
        Box::pin(async move {
            Ok(self
                .state
                .read()
                .await
                .steps
                .get(&run_id)
                .cloned()
                .unwrap_or_default())
        })
    }

    fn list_runs(&self, limit: usize) -> BoxFuture<'_, Result<Vec<Run>>> {
        Box::pin(async move {
            let state = self.state.read().await;
            let mut all: Vec<&(u64, Run)> = state.runs.values().collect();
            all.sort_by(|a, b| {
                b.1.started_at
                    .cmp(&a.1.started_at)
                    .then_with(|| b.0.cmp(&a.0))
            });
            Ok(all.into_iter().take(limit).map(|(_, r)| r.clone()).collect())
        })
    }
}

// ── SQLite ─────────────────────────────────────────────────────

/// SQLite-backed run history.
pub struct SqliteRunStore {
    conn: Mutex<Connection>,
}

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS runs (
        id TEXT PRIMARY KEY,
        workflow_id TEXT NOT NULL,
        workflow_version INTEGER NOT NULL,
        status TEXT NOT NULL,
        input TEXT NOT NULL,
        output TEXT,
        context TEXT NOT NULL,
        requested_by TEXT,
        started_at TEXT NOT NULL,
        completed_at TEXT,
        duration_ms INTEGER,
        error TEXT
    );

    CREATE INDEX IF NOT EXISTS idx_runs_started
        ON runs(started_at);

    CREATE TABLE IF NOT EXISTS step_records (
        seq INTEGER PRIMARY KEY AUTOINCREMENT,
        id TEXT NOT NULL UNIQUE,
        run_id TEXT NOT NULL,
        node_id TEXT NOT NULL,
        node_type TEXT NOT NULL,
        name TEXT NOT NULL,
        status TEXT NOT NULL,
        input TEXT NOT NULL,
        output TEXT,
        config TEXT NOT NULL,
        started_at TEXT,
        completed_at TEXT,
        duration_ms INTEGER,
        error TEXT,
        retry_count INTEGER NOT NULL DEFAULT 0
    );

    CREATE INDEX IF NOT EXISTS idx_steps_run
        ON step_records(run_id, seq);
";

const RUN_COLUMNS: &str = "id, workflow_id, workflow_version, status, input, output, context,
     requested_by, started_at, completed_at, duration_ms, error";

const STEP_COLUMNS: &str = "id, run_id, node_id, node_type, name, status, input, output, config,
     started_at, completed_at, duration_ms, error, retry_count";

impl SqliteRunStore {
    /// Open or create a SQLite database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                WeftError::Database(format!("Failed to create db directory: {}", e))
            })?;
        }

        let conn = Connection::open(path).map_err(|e| WeftError::Database(e.to_string()))?;

        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(|e| WeftError::Database(e.to_string()))?;

        conn.execute_batch(SCHEMA)
            .map_err(|e| WeftError::Database(e.to_string()))?;

        debug!(path = %path.display(), "Run store opened");

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory store (for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| WeftError::Database(e.to_string()))?;
        conn.execute_batch(SCHEMA)
            .map_err(|e| WeftError::Database(e.to_string()))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| WeftError::Database(e.to_string()))
    }
}

fn timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| WeftError::Database(format!("bad timestamp '{}': {}", s, e)))
}

fn parse_optional_timestamp(s: Option<String>) -> Result<Option<DateTime<Utc>>> {
    s.as_deref().map(parse_timestamp).transpose()
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String> {
    Ok(serde_json::to_string(value)?)
}

fn parse_map(s: &str) -> Result<Map<String, Value>> {
    Ok(serde_json::from_str(s)?)
}

fn parse_optional_map(s: Option<String>) -> Result<Option<Map<String, Value>>> {
    s.as_deref().map(parse_map).transpose()
}

/// Column values as read, decoded after the statement borrow ends.
struct RunRow {
    id: String,
    workflow_id: String,
    workflow_version: i64,
    status: String,
    input: String,
    output: Option<String>,
    context: String,
    requested_by: Option<String>,
    started_at: String,
    completed_at: Option<String>,
    duration_ms: Option<i64>,
    error: Option<String>,
}

impl RunRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            workflow_id: row.get(1)?,
            workflow_version: row.get(2)?,
            status: row.get(3)?,
            input: row.get(4)?,
            output: row.get(5)?,
            context: row.get(6)?,
            requested_by: row.get(7)?,
            started_at: row.get(8)?,
            completed_at: row.get(9)?,
            duration_ms: row.get(10)?,
            error: row.get(11)?,
        })
    }

    fn decode(self) -> Result<Run> {
        let status = RunStatus::parse(&self.status)
            .ok_or_else(|| WeftError::Database(format!("unknown run status '{}'", self.status)))?;
        let context: RunContext = serde_json::from_str(&self.context)?;
        Ok(Run {
            id: RunId(self.id),
            workflow_id: self.workflow_id,
            workflow_version: self.workflow_version as u32,
            status,
            input: parse_map(&self.input)?,
            output: parse_optional_map(self.output)?,
            context,
            requested_by: self.requested_by,
            started_at: parse_timestamp(&self.started_at)?,
            completed_at: parse_optional_timestamp(self.completed_at)?,
            duration_ms: self.duration_ms.map(|d| d as u64),
            error: self.error,
        })
    }
}

struct StepRow {
    id: String,
    run_id: String,
    node_id: String,
    node_type: String,
    name: String,
    status: String,
    input: String,
    output: Option<String>,
    config: String,
    started_at: Option<String>,
    completed_at: Option<String>,
    duration_ms: Option<i64>,
    error: Option<String>,
    retry_count: i64,
}

impl StepRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            run_id: row.get(1)?,
            node_id: row.get(2)?,
            node_type: row.get(3)?,
            name: row.get(4)?,
            status: row.get(5)?,
            input: row.get(6)?,
            output: row.get(7)?,
            config: row.get(8)?,
            started_at: row.get(9)?,
            completed_at: row.get(10)?,
            duration_ms: row.get(11)?,
            error: row.get(12)?,
            retry_count: row.get(13)?,
        })
    }

    fn decode(self) -> Result<StepRecord> {
        let status = StepStatus::parse(&self.status)
            .ok_or_else(|| WeftError::Database(format!("unknown step status '{}'", self.status)))?;
        Ok(StepRecord {
            id: self.id,
            run_id: RunId(self.run_id),
            node_id: self.node_id,
            node_type: self.node_type,
            name: self.name,
            status,
            input: parse_map(&self.input)?,
            output: parse_optional_map(self.output)?,
            config: parse_map(&self.config)?,
            started_at: parse_optional_timestamp(self.started_at)?,
            completed_at: parse_optional_timestamp(self.completed_at)?,
            duration_ms: self.duration_ms.map(|d| d as u64),
            error: self.error,
            retry_count: self.retry_count as u32,
        })
    }
}

impl RunStore for SqliteRunStore {
    fn save_run(&self, run: &Run) -> BoxFuture<'_, Result<()>> {
        let run = run.clone();
        Box::pin(async move {
            let input = to_json(&run.input)?;
            let output = run.output.as_ref().map(to_json).transpose()?;
            let context = to_json(&run.context)?;
            let conn = self.lock()?;
            conn.execute(
                "INSERT INTO runs (id, workflow_id, workflow_version, status, input, output, context,
                                   requested_by, started_at, completed_at, duration_ms, error)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
                 ON CONFLICT(id) DO UPDATE SET
                    status = excluded.status,
                    output = excluded.output,
                    context = excluded.context,
                    completed_at = excluded.completed_at,
                    duration_ms = excluded.duration_ms,
                    error = excluded.error",
                params![
                    run.id.as_str(),
                    run.workflow_id,
                    run.workflow_version as i64,
                    run.status.as_str(),
                    input,
                    output,
                    context,
                    run.requested_by,
                    timestamp(&run.started_at),
                    run.completed_at.as_ref().map(timestamp),
                    run.duration_ms.map(|d| d as i64),
                    run.error,
                ],
            )
            .map_err(|e| WeftError::Database(e.to_string()))?;
            Ok(())
        })
    }

    fn save_step(&self, step: &StepRecord) -> BoxFuture<'_, Result<()>> {
        let step = step.clone();
        Box::pin(async move {
            let input = to_json(&step.input)?;
            let output = step.output.as_ref().map(to_json).transpose()?;
            let config = to_json(&step.config)?;
            let conn = self.lock()?;
            conn.execute(
                "INSERT INTO step_records (id, run_id, node_id, node_type, name, status, input, output,
                                           config, started_at, completed_at, duration_ms, error, retry_count)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
                 ON CONFLICT(id) DO UPDATE SET
                    status = excluded.status,
                    input = excluded.input,
                    output = excluded.output,
                    started_at = excluded.started_at,
                    completed_at = excluded.completed_at,
                    duration_ms = excluded.duration_ms,
                    error = excluded.error,
                    retry_count = excluded.retry_count",
                params![
                    step.id,
                    step.run_id.as_str(),
                    step.node_id,
                    step.node_type,
                    step.name,
                    step.status.as_str(),
                    input,
                    output,
                    config,
                    step.started_at.as_ref().map(timestamp),
                    step.completed_at.as_ref().map(timestamp),
                    step.duration_ms.map(|d| d as i64),
                    step.error,
                    step.retry_count as i64,
                ],
            )
            .map_err(|e| WeftError::Database(e.to_string()))?;
            Ok(())
        })
    }

    fn get_run(&self, id: &RunId) -> BoxFuture<'_, Result<Option<Run>>> {
        let id = id.clone();
        Box::pin(async move {
            let raw = {
                let conn = self.lock()?;
                conn.query_row(
                    &format!("SELECT {} FROM runs WHERE id = ?1", RUN_COLUMNS),
                    params![id.as_str()],
                    RunRow::read,
                )
                .optional()
                .map_err(|e| WeftError::Database(e.to_string()))?
            };
            raw.map(RunRow::decode).transpose()
        })
    }

    fn list_steps(&self, run_id: &RunId) -> BoxFuture<'_, Result<Vec<StepRecord>>> {
        let run_id = run_id.clone();
        Box::pin(async move {
            let raw = {
                let conn = self.lock()?;
                let mut stmt = conn
                    .prepare(&format!(
                        "SELECT {} FROM step_records WHERE run_id = ?1 ORDER BY seq ASC",
                        STEP_COLUMNS
                    ))
                    .map_err(|e| WeftError::Database(e.to_string()))?;
                let rows = stmt
                    .query_map(params![run_id.as_str()], StepRow::read)
                    .map_err(|e| WeftError::Database(e.to_string()))?;
                rows.collect::<rusqlite::Result<Vec<_>>>()
                    .map_err(|e| WeftError::Database(e.to_string()))?
            };
            raw.into_iter().map(StepRow::decode).collect()
        })
    }

    fn list_runs(&self, limit: usize) -> BoxFuture<'_, Result<Vec<Run>>> {
        Box::pin(async move {
            let raw = {
                let conn = self.lock()?;
                let mut stmt = conn
                    .prepare(&format!(
                        "SELECT {} FROM runs ORDER BY started_at DESC, rowid DESC LIMIT ?1",
                        RUN_COLUMNS
                    ))
                    .map_err(|e| WeftError::Database(e.to_string()))?;
                let rows = stmt
                    .query_map(params![limit as i64], RunRow::read)
                    .map_err(|e| WeftError::Database(e.to_string()))?;
                rows.collect::<rusqlite::Result<Vec<_>>>()
                    .map_err(|e| WeftError::Database(e.to_string()))?
            };
            raw.into_iter().map(RunRow::decode).collect()
        })
    }
}
