//! Fan-out / fan-in over one phase.
//!
//! Every item runs as its own task. One task failing, panicking or running
//! past the phase deadline never cancels its siblings; it becomes a
//! [`TaskFailure`] in the returned [`PhaseOutcome`].

use anyhow::Result;
use std::future::Future;
use tokio::time::{timeout_at, Instant};

use super::events::{TaskEvent, TaskStatus};
use super::progress::ProgressTracker;
use crate::models::{PhaseOutcome, TaskFailure};

/// Identity of one fan-out task, for events and failure records
#[derive(Debug, Clone)]
pub struct TaskLabel {
    pub id: String,
    pub title: String,
}

/// Run `work` over every item concurrently and gather all outcomes.
///
/// Successes come back in input order. Tasks still running at `deadline`
/// are dropped and reported as timed out.
pub async fn run_phase<I, T, F, Fut>(
    task_type: &str,
    items: Vec<(TaskLabel, I)>,
    deadline: Instant,
    tracker: &ProgressTracker,
    work: F,
) -> PhaseOutcome<T>
where
    I: Send + 'static,
    T: Send + 'static,
    F: Fn(I) -> Fut,
    Fut: Future<Output = Result<T>> + Send + 'static,
{
    let total = items.len();
    let mut handles = Vec::with_capacity(total);

    // SCATTER
    for (index, (label, item)) in items.into_iter().enumerate() {
        let tracker = tracker.clone();
        let task_type = task_type.to_string();
        let fut = work(item);
        let event_label = label.clone();

        let handle = tokio::spawn(async move {
            tracker
                .task(TaskEvent::new(
                    &task_type,
                    &event_label.id,
                    index + 1,
                    total,
                    &event_label.title,
                    TaskStatus::Running,
                ))
                .await;

            let result = match timeout_at(deadline, fut).await {
                Ok(result) => result,
                Err(_) => Err(anyhow::anyhow!("timed out: phase deadline reached")),
            };

            let event = TaskEvent::new(
                &task_type,
                &event_label.id,
                index + 1,
                total,
                &event_label.title,
                TaskStatus::Completed,
            );
            match &result {
                Ok(_) => tracker.task(event).await,
                Err(e) => {
                    let mut event = event.with_error(format!("{:#}", e));
                    event.status = TaskStatus::Failed;
                    tracker.task(event).await;
                }
            }

            result
        });

        handles.push((index, label, handle));
    }

    // GATHER
    let mut outcome = PhaseOutcome::default();
    for (index, label, handle) in handles {
        match handle.await {
            Ok(Ok(value)) => outcome.successes.push(value),
            Ok(Err(e)) => outcome.failures.push(TaskFailure {
                task_id: label.id,
                title: label.title,
                error: format!("{:#}", e),
            }),
            Err(e) => {
                let error = format!("Task panicked: {}", e);
                tracker
                    .task(
                        TaskEvent::new(
                            task_type,
                            &label.id,
                            index + 1,
                            total,
                            &label.title,
                            TaskStatus::Failed,
                        )
                        .with_error(error.clone()),
                    )
                    .await;
                outcome.failures.push(TaskFailure {
                    task_id: label.id,
                    title: label.title,
                    error,
                });
            }
        }
    }

    if !outcome.failures.is_empty() {
        tracing::warn!(
            task_type = %task_type,
            failed = outcome.failures.len(),
            total,
            "Phase had failures, continuing with successful results"
        );
    }

    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::swarm::events::{EventBody, ProgressEvent};
    use crate::swarm::progress::ProgressSink;
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

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

    fn labelled(n: usize) -> Vec<(TaskLabel, usize)> {
        (1..=n)
            .map(|i| {
                (
                    TaskLabel {
                        id: format!("item-{}", i),
                        title: format!("Item {}", i),
                    },
                    i,
                )
            })
            .collect()
    }

    fn far_deadline() -> Instant {
        Instant::now() + Duration::from_secs(60)
    }

    #[tokio::test]
    async fn test_one_failure_is_isolated() {
        let tracker = ProgressTracker::new("run", Vec::new());
        let outcome = run_phase("execution", labelled(5), far_deadline(), &tracker, |i| async move {
            if i == 3 {
                anyhow::bail!("item {} exploded", i);
            }
            Ok(i * 10)
        })
        .await;

        assert_eq!(outcome.successes, vec![10, 20, 40, 50]);
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].task_id, "item-3");
        assert!(outcome.failures[0].error.contains("exploded"));
    }

    #[tokio::test]
    async fn test_panic_becomes_failure() {
        let tracker = ProgressTracker::new("run", Vec::new());
        let outcome = run_phase("execution", labelled(2), far_deadline(), &tracker, |i| async move {
            if i == 1 {
                panic!("bad item");
            }
            Ok(i)
        })
        .await;

        assert_eq!(outcome.successes, vec![2]);
        assert!(outcome.failures[0].error.contains("panicked"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_fails_only_slow_tasks() {
        let tracker = ProgressTracker::new("run", Vec::new());
        let deadline = Instant::now() + Duration::from_secs(5);
        let outcome = run_phase("execution", labelled(3), deadline, &tracker, |i| async move {
            let wait = if i == 2 { 30 } else { 1 };
            tokio::time::sleep(Duration::from_secs(wait)).await;
            Ok(i)
        })
        .await;

        assert_eq!(outcome.successes, vec![1, 3]);
        assert_eq!(outcome.failures.len(), 1);
        assert!(outcome.failures[0].error.contains("timed out"));
    }

    #[tokio::test]
    async fn test_task_events_emitted() {
        let recording = Arc::new(Recording::default());
        let tracker = ProgressTracker::new("run", vec![recording.clone()]);
        run_phase("execution", labelled(2), far_deadline(), &tracker, |i| async move {
            if i == 2 {
                anyhow::bail!("no");
            }
            Ok(i)
        })
        .await;

        let events = recording.events.lock().unwrap();
        let statuses: Vec<(String, TaskStatus)> = events
            .iter()
            .filter_map(|e| match &e.body {
                EventBody::Task(t) => Some((t.task_id.clone(), t.status)),
                _ => None,
            })
            .collect();
        assert_eq!(statuses.len(), 4);
        assert!(statuses.contains(&("item-1".to_string(), TaskStatus::Completed)));
        assert!(statuses.contains(&("item-2".to_string(), TaskStatus::Failed)));
    }
}
