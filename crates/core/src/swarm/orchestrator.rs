//! # Orchestrator
//!
//! Runs one goal through the pipeline:
//!
//! ```text
//! PlanningA → ExecutingA(N) → PlanningB(per result) → ExecutingB(M) → Persisting → Done
//!     └──────────────── any phase-fatal error ───────────────────────→ Failed
//! ```
//!
//! Per-item failures never leave their phase; they are counted and reported
//! in the [`RunSummary`]. Persistence is best-effort: a run whose writes
//! partly failed still completes.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::time::Instant;

use super::events::PhaseStatus;
use super::fanout::{run_phase, TaskLabel};
use super::pipeline::{Pipeline, PipelineStage};
use super::progress::{ProgressSink, ProgressTracker};
use crate::agent::{
    AgentRunner, AgentTask, ExecutionOutput, InvocationContext, PlanOutput, RunIdentity,
};
use crate::budget::BudgetLimits;
use crate::compaction::CompactionConfig;
use crate::config::OrchestratorConfig;
use crate::models::{
    ChildResult, ChildWorkItem, PhaseCounts, PhaseOutcome, TaskFailure, WorkItem, WorkResult,
};
use crate::persistence::{DurableClient, PersistOutcome, ResultPersister};
use crate::state::{RunStatus, RunStatusStore};
use crate::tools::{PhaseTools, ToolBox, ToolSet};

/// A request to run one goal
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRequest {
    pub goal: String,
    /// Generated when absent
    #[serde(default)]
    pub run_id: Option<String>,
}

impl RunRequest {
    pub fn new(goal: impl Into<String>) -> Self {
        Self {
            goal: goal.into(),
            run_id: None,
        }
    }

    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = Some(run_id.into());
        self
    }
}

/// Counts per phase, returned to the caller and stored as the run's outputs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: String,
    pub status: RunStatus,
    pub planned: usize,
    pub executed: PhaseCounts,
    pub dependent_planning: PhaseCounts,
    pub dependent_executed: PhaseCounts,
    pub persisted: PhaseCounts,
    pub failures: Vec<String>,
}

pub struct Orchestrator {
    config: OrchestratorConfig,
    agent: Arc<dyn AgentRunner>,
    tools: ToolSet,
    client: DurableClient,
    sinks: Vec<Arc<dyn ProgressSink>>,
    status_store: Option<Arc<dyn RunStatusStore>>,
}

impl Orchestrator {
    pub fn new(
        config: OrchestratorConfig,
        agent: Arc<dyn AgentRunner>,
        tools: ToolSet,
        client: DurableClient,
    ) -> Self {
        Self {
            config,
            agent,
            tools,
            client,
            sinks: Vec::new(),
            status_store: None,
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn with_status_store(mut self, store: Arc<dyn RunStatusStore>) -> Self {
        self.status_store = Some(store);
        self
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Run a goal to a terminal status.
    ///
    /// Returns the summary on `Done`. On `Failed` the run record is updated
    /// (best-effort) and the error is returned.
    #[tracing::instrument(skip(self, request), fields(run_id))]
    pub async fn run(&self, request: RunRequest) -> Result<RunSummary> {
        let run_id = request.run_id.clone().unwrap_or_else(new_run_id);
        tracing::Span::current().record("run_id", run_id.as_str());

        let tracker = ProgressTracker::new(run_id.clone(), self.sinks.clone());
        let mut pipeline = Pipeline::new();

        match self.drive(&run_id, &request.goal, &tracker, &mut pipeline).await {
            Ok(summary) => {
                let outputs = serde_json::to_value(&summary).unwrap_or(Value::Null);
                self.mark(&run_id, RunStatus::Completed, &outputs).await;
                Ok(summary)
            }
            Err(e) => {
                let stage = pipeline.stage;
                pipeline.fail();
                tracing::error!(
                    run_id = %run_id,
                    stage = ?stage,
                    error = %format!("{:#}", e),
                    "Run failed"
                );
                tracker
                    .log(
                        "failed",
                        format!("Run failed: {:#}", e),
                        json!({ "stage": stage }),
                    )
                    .await;
                self.mark(
                    &run_id,
                    RunStatus::Failed,
                    &json!({ "error": format!("{:#}", e), "stage": stage }),
                )
                .await;
                Err(e)
            }
        }
    }

    async fn mark(&self, run_id: &str, status: RunStatus, outputs: &Value) {
        if let Some(store) = &self.status_store {
            if let Err(e) = store.mark(run_id, status, outputs).await {
                tracing::warn!(run_id = %run_id, error = %e, "Failed to update run status");
            }
        }
    }

    async fn drive(
        &self,
        run_id: &str,
        goal: &str,
        tracker: &ProgressTracker,
        pipeline: &mut Pipeline,
    ) -> Result<RunSummary> {
        tracker.open().await?;

        let invoker = Invoker {
            agent: Arc::clone(&self.agent),
            tools: self.tools.clone(),
            identity: RunIdentity {
                workspace_id: self.config.workspace_id.clone(),
                tenant_id: self.config.tenant_id.clone(),
                run_id: run_id.to_string(),
            },
            limits: self.config.budgets,
            compaction: self.config.compaction,
            planning_tools: self.config.planning_tools,
            execution_tools: self.config.execution_tools,
            max_children: self.config.max_children_per_parent,
        };
        let mut failures = Vec::new();

        // PlanningA
        tracker
            .phase(pipeline.stage, PhaseStatus::Started, json!({ "goal": goal }))
            .await;
        let mut planned = invoker
            .plan(goal, self.config.max_planned_items)
            .await
            .context("Planning phase failed")?;
        if planned.len() > self.config.max_planned_items {
            tracing::warn!(
                produced = planned.len(),
                max = self.config.max_planned_items,
                "Planner over-generated, truncating"
            );
            planned.truncate(self.config.max_planned_items);
        }
        let planned_count = planned.len();
        tracker
            .phase(pipeline.stage, PhaseStatus::Completed, json!({ "planned": planned_count }))
            .await;
        pipeline.advance();

        // ExecutingA
        let items: Vec<_> = planned
            .into_iter()
            .map(|item| (label(&item.id, &item.title), item))
            .collect();
        let executed = self
            .fan_out(pipeline.stage, tracker, items, |item| {
                let invoker = invoker.clone();
                async move { invoker.execute(item).await }
            })
            .await;
        collect_failures(&mut failures, pipeline.stage, &executed.failures);
        pipeline.advance();

        // PlanningB
        let parents: Vec<_> = executed
            .successes
            .iter()
            .map(|result| (label(&result.work_item_id, &result.title), result.clone()))
            .collect();
        let dependent = self
            .fan_out(pipeline.stage, tracker, parents, |parent| {
                let invoker = invoker.clone();
                async move { invoker.plan_dependent(parent).await }
            })
            .await;
        collect_failures(&mut failures, pipeline.stage, &dependent.failures);
        let dependent_planning = dependent.counts();
        let children: Vec<ChildWorkItem> = dependent.successes.into_iter().flatten().collect();
        pipeline.advance();

        // ExecutingB
        let child_items: Vec<_> = children
            .into_iter()
            .map(|child| {
                let id = format!("{}/{}", child.parent_id, child.item.id);
                (label(&id, &child.item.title), child)
            })
            .collect();
        let dependent_executed = self
            .fan_out(pipeline.stage, tracker, child_items, |child| {
                let invoker = invoker.clone();
                async move { invoker.execute_child(child).await }
            })
            .await;
        collect_failures(&mut failures, pipeline.stage, &dependent_executed.failures);
        pipeline.advance();

        // Persisting
        let persister = ResultPersister::new(
            self.client.clone(),
            run_id,
            self.config.persistence.max_attempts,
        );
        tracker
            .phase(
                pipeline.stage,
                PhaseStatus::Started,
                json!({ "trees": executed.successes.len() }),
            )
            .await;
        let (persisted, persist_failures) = persist_all(
            &persister,
            tracker,
            Instant::now() + self.config.phase_timeout(),
            executed.successes.clone(),
            dependent_executed.successes.clone(),
        )
        .await;
        if !persist_failures.is_empty() {
            tracing::warn!(
                failed = persisted.failed,
                "Some results were not fully persisted, completing anyway"
            );
        }
        failures.extend(persist_failures);
        tracker
            .phase(pipeline.stage, PhaseStatus::Completed, json!(persisted))
            .await;
        pipeline.advance();

        // Done
        let summary = RunSummary {
            run_id: run_id.to_string(),
            status: RunStatus::Completed,
            planned: planned_count,
            executed: executed.counts(),
            dependent_planning,
            dependent_executed: dependent_executed.counts(),
            persisted,
            failures,
        };
        tracker
            .log(
                "completed",
                "Run completed",
                serde_json::to_value(&summary).unwrap_or(Value::Null),
            )
            .await;

        Ok(summary)
    }

    /// One fan-out phase bracketed by phase events
    async fn fan_out<I, T, F, Fut>(
        &self,
        stage: PipelineStage,
        tracker: &ProgressTracker,
        items: Vec<(TaskLabel, I)>,
        work: F,
    ) -> PhaseOutcome<T>
    where
        I: Send + 'static,
        T: Send + 'static,
        F: Fn(I) -> Fut,
        Fut: std::future::Future<Output = Result<T>> + Send + 'static,
    {
        let task_type = stage.phase_name().unwrap_or("task");
        tracker
            .phase(stage, PhaseStatus::Started, json!({ "tasks": items.len() }))
            .await;

        let deadline = Instant::now() + self.config.phase_timeout();
        let outcome = run_phase(task_type, items, deadline, tracker, work).await;

        tracker
            .phase(stage, PhaseStatus::Completed, json!(outcome.counts()))
            .await;
        outcome
    }
}

/// Everything an agent invocation needs, cloned into each task
#[derive(Clone)]
struct Invoker {
    agent: Arc<dyn AgentRunner>,
    tools: ToolSet,
    identity: RunIdentity,
    limits: BudgetLimits,
    compaction: CompactionConfig,
    planning_tools: PhaseTools,
    execution_tools: PhaseTools,
    max_children: usize,
}

impl Invoker {
    /// Fresh budgets and a fresh compaction hook for every call
    fn context(&self, enabled: PhaseTools) -> InvocationContext {
        InvocationContext::new(
            self.identity.clone(),
            ToolBox::new(&self.tools, enabled, self.limits),
            self.compaction,
        )
    }

    async fn plan(&self, goal: &str, max_items: usize) -> Result<Vec<WorkItem>> {
        let ctx = self.context(self.planning_tools);
        let output = self.agent.run(&AgentTask::plan(goal, max_items), &ctx).await?;
        let mut items = PlanOutput::parse(output)?.items;
        make_ids_unique(&mut items);
        Ok(items)
    }

    async fn plan_dependent(&self, parent: WorkResult) -> Result<Vec<ChildWorkItem>> {
        let ctx = self.context(self.planning_tools);
        let output = self
            .agent
            .run(&AgentTask::plan_dependent(&parent, self.max_children), &ctx)
            .await?;
        let mut items = PlanOutput::parse(output)?.items;
        make_ids_unique(&mut items);

        if items.len() > self.max_children {
            tracing::warn!(
                parent = %parent.work_item_id,
                produced = items.len(),
                max = self.max_children,
                "Dependent planner over-generated, truncating"
            );
            items.truncate(self.max_children);
        }

        Ok(items
            .into_iter()
            .map(|item| ChildWorkItem {
                parent_id: parent.work_item_id.clone(),
                item,
            })
            .collect())
    }

    async fn execute(&self, item: WorkItem) -> Result<WorkResult> {
        let ctx = self.context(self.execution_tools);
        let output =
            ExecutionOutput::parse(self.agent.run(&AgentTask::execute(&item), &ctx).await?);

        Ok(WorkResult {
            work_item_id: item.id,
            title: output.title.unwrap_or(item.title),
            payload: output.payload,
            used_calls: ctx.tools.call_records().await,
        })
    }

    async fn execute_child(&self, child: ChildWorkItem) -> Result<ChildResult> {
        Ok(ChildResult {
            parent_id: child.parent_id,
            result: self.execute(child.item).await?,
        })
    }
}

/// Per-tree persistence tally
#[derive(Debug, Default)]
struct TreeReport {
    complete: usize,
    incomplete: usize,
    errors: Vec<String>,
}

impl TreeReport {
    fn record(&mut self, work_item_id: &str, outcome: PersistOutcome) {
        if outcome.is_complete() {
            self.complete += 1;
        } else {
            self.incomplete += 1;
            self.errors.extend(
                outcome
                    .failures
                    .iter()
                    .map(|f| format!("[persistence] {}: {}", work_item_id, f)),
            );
        }
    }
}

/// Persist every parent tree concurrently; children follow their parent
async fn persist_all(
    persister: &ResultPersister,
    tracker: &ProgressTracker,
    deadline: Instant,
    parents: Vec<WorkResult>,
    children: Vec<ChildResult>,
) -> (PhaseCounts, Vec<String>) {
    let mut by_parent: HashMap<String, Vec<ChildResult>> = HashMap::new();
    for child in children {
        by_parent.entry(child.parent_id.clone()).or_default().push(child);
    }
    let child_counts: HashMap<String, usize> =
        by_parent.iter().map(|(id, kids)| (id.clone(), kids.len())).collect();

    let trees: Vec<_> = parents
        .into_iter()
        .map(|parent| {
            let kids = by_parent.remove(&parent.work_item_id).unwrap_or_default();
            (label(&parent.work_item_id, &parent.title), (parent, kids))
        })
        .collect();

    let outcome = run_phase("persistence", trees, deadline, tracker, |(parent, kids)| {
        let persister = persister.clone();
        async move { persist_tree(persister, parent, kids).await }
    })
    .await;

    let mut counts = PhaseCounts::default();
    let mut errors = Vec::new();
    for report in outcome.successes {
        counts.succeeded += report.complete;
        counts.failed += report.incomplete;
        errors.extend(report.errors);
    }
    for failure in outcome.failures {
        // Nothing under this parent could be written
        counts.failed += 1 + child_counts.get(&failure.task_id).copied().unwrap_or(0);
        errors.push(format!("[persistence] {}", failure));
    }

    (counts, errors)
}

async fn persist_tree(
    persister: ResultPersister,
    parent: WorkResult,
    children: Vec<ChildResult>,
) -> Result<TreeReport> {
    let target = persister
        .create_target(&parent)
        .await
        .with_context(|| format!("Failed to create target for {}", parent.work_item_id))?;

    let mut report = TreeReport::default();
    report.record(
        &parent.work_item_id,
        persister.persist_result(&target, &parent).await,
    );
    for child in children {
        let outcome = persister.persist_child(&target, &child).await;
        report.record(&child.result.work_item_id, outcome);
    }

    Ok(report)
}

/// Planner ids key remote writes and group children under parents, so a
/// repeated id gets a `#n` suffix that no other item in the batch carries.
fn make_ids_unique(items: &mut [WorkItem]) {
    let planned: HashSet<String> = items.iter().map(|item| item.id.clone()).collect();
    let mut assigned: HashSet<String> = HashSet::with_capacity(items.len());

    for item in items.iter_mut() {
        if assigned.insert(item.id.clone()) {
            continue;
        }
        let mut n = 2;
        let unique = loop {
            let candidate = format!("{}#{}", item.id, n);
            if !planned.contains(&candidate) && !assigned.contains(&candidate) {
                break candidate;
            }
            n += 1;
        };
        tracing::warn!(id = %item.id, renamed = %unique, "Planner repeated an id, renaming");
        item.id = unique.clone();
        assigned.insert(unique);
    }
}

fn label(id: &str, title: &str) -> TaskLabel {
    TaskLabel {
        id: id.to_string(),
        title: title.to_string(),
    }
}

fn collect_failures(into: &mut Vec<String>, stage: PipelineStage, failures: &[TaskFailure]) {
    let phase = stage.phase_name().unwrap_or("task");
    into.extend(failures.iter().map(|f| format!("[{}] {}", phase, f)));
}

/// Sortable, unique enough for run records
pub fn new_run_id() -> String {
    format!(
        "run-{}-{:06x}",
        chrono::Utc::now().format("%Y%m%d%H%M%S"),
        rand::random::<u32>() & 0xff_ffff
    )
}
