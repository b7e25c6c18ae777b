//! # Progress Events
//!
//! The small, stable vocabulary an observer sees: phase lifecycle, task
//! lifecycle and free-form log lines. Every event carries the run it belongs to.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStatus {
    Started,
    Completed,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PhaseEvent {
    pub phase_name: String,
    /// 1-based
    pub phase_index: usize,
    pub phase_total: usize,
    pub status: PhaseStatus,
    #[serde(default)]
    pub metadata: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskEvent {
    /// e.g. `execution`, `dependent_planning`
    pub task_type: String,
    pub task_id: String,
    /// 1-based
    pub task_index: usize,
    pub task_total: usize,
    pub title: String,
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TaskEvent {
    pub fn new(
        task_type: &str,
        task_id: &str,
        task_index: usize,
        task_total: usize,
        title: &str,
        status: TaskStatus,
    ) -> Self {
        Self {
            task_type: task_type.to_string(),
            task_id: task_id.to_string(),
            task_index,
            task_total,
            title: title.to_string(),
            status,
            error: None,
        }
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LogEvent {
    pub status: String,
    pub message: String,
    #[serde(default)]
    pub metadata: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventBody {
    Phase(PhaseEvent),
    Task(TaskEvent),
    Log(LogEvent),
}

/// An event stamped with its run and time of emission
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub id: String,
    pub run_id: String,
    pub timestamp: DateTime<Utc>,
    pub body: EventBody,
}

impl ProgressEvent {
    pub fn new(run_id: &str, body: EventBody) -> Self {
        Self {
            id: event_id(),
            run_id: run_id.to_string(),
            timestamp: Utc::now(),
            body,
        }
    }

    /// Name used for the SSE `event:` field
    pub fn kind(&self) -> &'static str {
        match self.body {
            EventBody::Phase(_) => "phase",
            EventBody::Task(_) => "task",
            EventBody::Log(_) => "log",
        }
    }
}

fn event_id() -> String {
    format!(
        "{:x}-{:08x}",
        Utc::now().timestamp_nanos_opt().unwrap_or_default(),
        rand::random::<u32>()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_event_serialization() {
        let event = ProgressEvent::new(
            "run-1",
            EventBody::Task(
                TaskEvent::new("execution", "a-2", 2, 3, "Margins", TaskStatus::Failed)
                    .with_error("boom"),
            ),
        );

        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["run_id"], "run-1");
        assert_eq!(value["body"]["kind"], "task");
        assert_eq!(value["body"]["status"], "failed");
        assert_eq!(value["body"]["error"], "boom");
        assert_eq!(event.kind(), "task");
    }

    #[test]
    fn test_running_task_has_no_error_field() {
        let event = TaskEvent::new("execution", "a-1", 1, 1, "Revenue", TaskStatus::Running);
        let value = serde_json::to_value(&event).unwrap();
        assert!(value.get("error").is_none());
    }
}
