use std::path::PathBuf;

use chrono::Utc;
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use weft_core::event::EventBus;
use weft_core::types::{RunEvent, RunId};

/// JSONL run logger.
///
/// Follows one run on the EventBus and writes structured entries to
/// `{log_dir}/{run_id}.jsonl`, one JSON object per line, flushed per entry.
#[derive(Debug, Clone)]
pub struct RunLogger {
    log_dir: PathBuf,
    level: u8,
}

#[derive(Serialize)]
struct LogEntry {
    timestamp: String,
    run_id: String,
    event_type: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    node_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<serde_json::Value>,
}

impl RunLogger {
    /// `level` controls verbosity: 1=run summary, 2=+step results, 3=+step start/skip.
    pub fn new(log_dir: PathBuf, level: u8) -> Self {
        Self { log_dir, level }
    }

    pub fn log_path(&self, run_id: &RunId) -> PathBuf {
        self.log_dir.join(format!("{}.jsonl", run_id))
    }

    /// Subscribe now and write in the background.
    ///
    /// The subscription is taken before returning so no event published after
    /// this call is missed.
    pub fn spawn(&self, events: &EventBus, run_id: RunId) -> JoinHandle<()> {
        let rx = events.subscribe();
        let logger = self.clone();
        tokio::spawn(async move { logger.run(rx, run_id).await })
    }

    /// Write entries for `run_id` until its `RunFinished` event or the bus closes.
    pub async fn run(self, mut rx: broadcast::Receiver<RunEvent>, run_id: RunId) {
        if let Err(e) = tokio::fs::create_dir_all(&self.log_dir).await {
            error!(error = %e, "Failed to create log directory");
            return;
        }

        let log_path = self.log_path(&run_id);
        let file = match tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
            .await
        {
            Ok(f) => f,
            Err(e) => {
                error!(error = %e, path = %log_path.display(), "Failed to open log file");
                return;
            }
        };

        info!(path = %log_path.display(), "RunLogger started");
        let mut writer = tokio::io::BufWriter::new(file);

        loop {
            match rx.recv().await {
                Ok(event) => {
                    if event.run_id() != &run_id {
                        continue;
                    }
                    if let Some(entry) = self.event_to_entry(&event) {
                        if let Ok(json) = serde_json::to_string(&entry) {
                            let line = format!("{}\n", json);
                            if let Err(e) = writer.write_all(line.as_bytes()).await {
                                error!(error = %e, "Failed to write log entry");
                                break;
                            }
                            if let Err(e) = writer.flush().await {
                                error!(error = %e, "Failed to flush log");
                            }
                        }
                    }
                    if matches!(event, RunEvent::RunFinished { .. }) {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    debug!(skipped = n, "RunLogger lagged, skipped events");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("EventBus closed, RunLogger stopping");
                    break;
                }
            }
        }

        writer.flush().await.ok();
        debug!(path = %log_path.display(), "RunLogger finished");
    }

    /// Convert an event to a log entry (None if filtered by level).
    fn event_to_entry(&self, event: &RunEvent) -> Option<LogEntry> {
        let entry = |event_type, node_id: Option<&String>, detail| LogEntry {
            timestamp: Utc::now().to_rfc3339(),
            run_id: event.run_id().to_string(),
            event_type,
            node_id: node_id.cloned(),
            detail,
        };

        match event {
            // L1: run summary
            RunEvent::RunStarted {
                workflow_id,
                workflow_version,
                ..
            } => Some(entry(
                "run_started",
                None,
                Some(serde_json::json!({
                    "workflow_id": workflow_id,
                    "workflow_version": workflow_version,
                })),
            )),
            RunEvent::RunFinished {
                status,
                duration_ms,
                error,
                ..
            } => Some(entry(
                "run_finished",
                None,
                Some(serde_json::json!({
                    "status": status,
                    "duration_ms": duration_ms,
                    "error": error,
                })),
            )),

            // L2: step results
            RunEvent::StepCompleted {
                node_id,
                duration_ms,
                ..
            } if self.level >= 2 => Some(entry(
                "step_completed",
                Some(node_id),
                Some(serde_json::json!({ "duration_ms": duration_ms })),
            )),
            RunEvent::StepFailed {
                node_id,
                error,
                continued,
                ..
            } if self.level >= 2 => Some(entry(
                "step_failed",
                Some(node_id),
                Some(serde_json::json!({
                    "error": truncate_str(error, 500),
                    "continued": continued,
                })),
            )),

            // L3: step start and skip
            RunEvent::StepStarted {
                node_id, node_type, ..
            } if self.level >= 3 => Some(entry(
                "step_started",
                Some(node_id),
                Some(serde_json::json!({ "node_type": node_type })),
            )),
            RunEvent::StepSkipped { node_id, .. } if self.level >= 3 => {
                Some(entry("step_skipped", Some(node_id), None))
            }

            _ => None,
        }
    }
}

/// Truncate a string for logging, on a char boundary.
fn truncate_str(s: &str, max_len: usize) -> &str {
    if s.len() <= max_len {
        return s;
    }
    let mut end = max_len;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use weft_core::types::RunStatus;

    fn started(run_id: &RunId) -> RunEvent {
        RunEvent::RunStarted {
            run_id: run_id.clone(),
            workflow_id: "wf".into(),
            workflow_version: 1,
        }
    }

    fn skipped(run_id: &RunId) -> RunEvent {
        RunEvent::StepSkipped {
            run_id: run_id.clone(),
            node_id: "b".into(),
        }
    }

    fn completed(run_id: &RunId) -> RunEvent {
        RunEvent::StepCompleted {
            run_id: run_id.clone(),
            node_id: "a".into(),
            duration_ms: 3,
        }
    }

    fn finished(run_id: &RunId) -> RunEvent {
        RunEvent::RunFinished {
            run_id: run_id.clone(),
            status: RunStatus::Completed,
            duration_ms: 10,
            error: None,
        }
    }

    #[test]
    fn test_entry_skips_empty_fields() {
        let logger = RunLogger::new(PathBuf::from("/tmp"), 3);
        let run_id = RunId::from_str("run-1");
        let entry = logger.event_to_entry(&skipped(&run_id)).unwrap();
        let json = serde_json::to_string(&entry).unwrap();
        assert!(json.contains("\"event_type\":\"step_skipped\""));
        assert!(json.contains("\"run_id\":\"run-1\""));
        assert!(!json.contains("detail"));
    }

    #[test]
    fn test_event_level_filtering() {
        let run_id = RunId::new();

        let logger = RunLogger::new(PathBuf::from("/tmp"), 1);
        assert!(logger.event_to_entry(&started(&run_id)).is_some());
        assert!(logger.event_to_entry(&completed(&run_id)).is_none());
        assert!(logger.event_to_entry(&skipped(&run_id)).is_none());

        let logger = RunLogger::new(PathBuf::from("/tmp"), 2);
        assert!(logger.event_to_entry(&completed(&run_id)).is_some());
        assert!(logger.event_to_entry(&skipped(&run_id)).is_none());

        let logger = RunLogger::new(PathBuf::from("/tmp"), 3);
        assert!(logger.event_to_entry(&skipped(&run_id)).is_some());
    }

    #[test]
    fn test_truncate_respects_char_boundary() {
        assert_eq!(truncate_str("héllo", 2), "h");
        assert_eq!(truncate_str("abc", 10), "abc");
    }

    #[tokio::test]
    async fn test_writes_only_its_run() {
        let dir = tempfile::tempdir().unwrap();
        let logger = RunLogger::new(dir.path().to_path_buf(), 2);
        let bus = EventBus::new(16);
        let mine = RunId::new();
        let other = RunId::new();

        let handle = logger.spawn(&bus, mine.clone());
        bus.publish(started(&mine));
        bus.publish(completed(&other));
        bus.publish(completed(&mine));
        bus.publish(skipped(&mine));
        bus.publish(finished(&mine));
        handle.await.unwrap();

        let text = std::fs::read_to_string(logger.log_path(&mine)).unwrap();
        let kinds: Vec<String> = text
            .lines()
            .map(|l| {
                let v: serde_json::Value = serde_json::from_str(l).unwrap();
                v["event_type"].as_str().unwrap().to_string()
            })
            .collect();
        assert_eq!(kinds, vec!["run_started", "step_completed", "run_finished"]);
        assert!(!logger.log_path(&other).exists());
    }
}
