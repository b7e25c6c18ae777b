//! Progress sinks and the tracker that fans events out to them.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::broadcast;

use super::events::{EventBody, LogEvent, PhaseEvent, PhaseStatus, ProgressEvent, TaskEvent};
use super::pipeline::PipelineStage;

/// Where progress events go
#[async_trait]
pub trait ProgressSink: Send + Sync {
    /// Establish the connection for a run; failure here aborts the run
    async fn open(&self, _run_id: &str) -> Result<()> {
        Ok(())
    }

    async fn emit(&self, event: &ProgressEvent) -> Result<()>;
}

/// Mirrors events into `tracing`
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

#[async_trait]
impl ProgressSink for TracingSink {
    async fn emit(&self, event: &ProgressEvent) -> Result<()> {
        match &event.body {
            EventBody::Phase(phase) => tracing::info!(
                run_id = %event.run_id,
                phase = %phase.phase_name,
                index = phase.phase_index,
                total = phase.phase_total,
                status = ?phase.status,
                "Phase"
            ),
            EventBody::Task(task) => tracing::info!(
                run_id = %event.run_id,
                task_type = %task.task_type,
                task_id = %task.task_id,
                index = task.task_index,
                total = task.task_total,
                status = ?task.status,
                error = task.error.as_deref().unwrap_or(""),
                "Task"
            ),
            EventBody::Log(log) => tracing::info!(
                run_id = %event.run_id,
                status = %log.status,
                "{}",
                log.message
            ),
        }
        Ok(())
    }
}

/// Publishes events on a broadcast channel (feeds the SSE endpoint)
#[derive(Clone)]
pub struct BroadcastSink {
    tx: broadcast::Sender<ProgressEvent>,
}

impl BroadcastSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.tx.subscribe()
    }
}

#[async_trait]
impl ProgressSink for BroadcastSink {
    async fn emit(&self, event: &ProgressEvent) -> Result<()> {
        // No subscribers is fine
        let _ = self.tx.send(event.clone());
        Ok(())
    }
}

/// Emits a run's events to every sink. Cheap to clone into tasks.
#[derive(Clone)]
pub struct ProgressTracker {
    run_id: String,
    sinks: Arc<Vec<Arc<dyn ProgressSink>>>,
}

impl ProgressTracker {
    pub fn new(run_id: impl Into<String>, sinks: Vec<Arc<dyn ProgressSink>>) -> Self {
        Self {
            run_id: run_id.into(),
            sinks: Arc::new(sinks),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Open every sink; the first failure is returned
    pub async fn open(&self) -> Result<()> {
        for sink in self.sinks.iter() {
            sink.open(&self.run_id).await.with_context(|| {
                format!("Failed to open progress stream for run {}", self.run_id)
            })?;
        }
        Ok(())
    }

    /// Best-effort delivery to every sink
    pub async fn emit(&self, body: EventBody) {
        let event = ProgressEvent::new(&self.run_id, body);
        for sink in self.sinks.iter() {
            if let Err(e) = sink.emit(&event).await {
                tracing::warn!(
                    run_id = %self.run_id,
                    error = %e,
                    "Progress sink failed, continuing"
                );
            }
        }
    }

    pub async fn phase(&self, stage: PipelineStage, status: PhaseStatus, metadata: Value) {
        let (Some(phase_name), Some(phase_index)) = (stage.phase_name(), stage.phase_index()) else {
            return;
        };
        self.emit(EventBody::Phase(PhaseEvent {
            phase_name: phase_name.to_string(),
            phase_index,
            phase_total: PipelineStage::PHASE_TOTAL,
            status,
            metadata,
        }))
        .await;
    }

    pub async fn task(&self, event: TaskEvent) {
        self.emit(EventBody::Task(event)).await;
    }

    pub async fn log(&self, status: &str, message: impl Into<String>, metadata: Value) {
        self.emit(EventBody::Log(LogEvent {
            status: status.to_string(),
            message: message.into(),
            metadata,
        }))
        .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::swarm::events::TaskStatus;
    use serde_json::json;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recording {
        events: Mutex<Vec<ProgressEvent>>,
    }

    #[async_trait]
    impl ProgressSink for Recording {
        async fn emit(&self, event: &ProgressEvent) -> Result<()> {
            self.events.lock().unwrap().push(event.clone());
            Ok(())
        }
    }

    struct Broken;

    #[async_trait]
    impl ProgressSink for Broken {
        async fn open(&self, _run_id: &str) -> Result<()> {
            anyhow::bail!("connection refused")
        }

        async fn emit(&self, _event: &ProgressEvent) -> Result<()> {
            anyhow::bail!("sink unavailable")
        }
    }

    #[tokio::test]
    async fn test_emit_failure_does_not_stop_other_sinks() {
        let recording = Arc::new(Recording::default());
        let tracker = ProgressTracker::new("run-1", vec![Arc::new(Broken), recording.clone()]);

        tracker
            .task(TaskEvent::new("execution", "a", 1, 1, "A", TaskStatus::Running))
            .await;
        tracker
            .phase(PipelineStage::ExecutingA, PhaseStatus::Started, json!({}))
            .await;

        let events = recording.events.lock().unwrap();
        assert_eq!(events.len(), 2);
        match &events[1].body {
            EventBody::Phase(phase) => {
                assert_eq!(phase.phase_name, "execution");
                assert_eq!(phase.phase_index, 2);
                assert_eq!(phase.phase_total, 5);
            }
            other => panic!("expected phase event, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_open_failure_is_reported() {
        let tracker = ProgressTracker::new("run-1", vec![Arc::new(Broken)]);
        let err = tracker.open().await.unwrap_err();
        assert!(format!("{:#}", err).contains("connection refused"));
    }

    #[tokio::test]
    async fn test_broadcast_sink_delivers() {
        let sink = BroadcastSink::new(8);
        let mut rx = sink.subscribe();
        let tracker = ProgressTracker::new("run-7", vec![Arc::new(sink)]);

        tracker.log("info", "hello", json!({})).await;

        let event = rx.recv().await.unwrap();
        assert_eq!(event.run_id, "run-7");
        assert_eq!(event.kind(), "log");
    }
}
