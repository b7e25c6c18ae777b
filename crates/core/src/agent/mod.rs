//! # Agent Runs
//!
//! The reasoning loop is an external collaborator. The orchestrator hands it an
//! [`AgentTask`] plus a typed [`InvocationContext`] and gets back structured
//! JSON whose shape depends on the task kind.
//!
//! - `http` - step-wise runner against a remote model endpoint
//! - `prompts` - task instructions

pub mod http;
pub mod prompts;

pub use http::{AgentStep, HttpAgentRunner, StepRequest};

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::compaction::{CompactionConfig, Compactor, HistoryProcessor, Turn};
use crate::models::{WorkItem, WorkResult};
use crate::tools::ToolBox;

/// What a task asks the agent to produce
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    /// Goal → independent work items
    Plan,
    /// Executed result → dependent work items
    PlanDependent,
    /// Work item → result payload
    Execute,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentTask {
    pub kind: TaskKind,
    pub prompt: String,
    pub input: Value,
}

impl AgentTask {
    pub fn plan(goal: &str, max_items: usize) -> Self {
        Self {
            kind: TaskKind::Plan,
            prompt: prompts::PLANNER.to_string(),
            input: json!({ "goal": goal, "max_items": max_items }),
        }
    }

    /// Dependent planning sees the parent result and the evidence already gathered
    pub fn plan_dependent(result: &WorkResult, max_items: usize) -> Self {
        Self {
            kind: TaskKind::PlanDependent,
            prompt: prompts::DEPENDENT_PLANNER.to_string(),
            input: json!({
                "parent": {
                    "id": result.work_item_id,
                    "title": result.title,
                    "payload": result.payload,
                },
                "used_calls": result.used_calls,
                "max_items": max_items,
            }),
        }
    }

    pub fn execute(item: &WorkItem) -> Self {
        Self {
            kind: TaskKind::Execute,
            prompt: prompts::EXECUTOR.to_string(),
            input: json!({ "id": item.id, "title": item.title, "spec": item.spec }),
        }
    }
}

/// Identifiers scoping one run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunIdentity {
    pub workspace_id: String,
    pub tenant_id: String,
    pub run_id: String,
}

/// Everything one agent invocation may touch. Built fresh per invocation.
pub struct InvocationContext {
    pub identity: RunIdentity,
    pub tools: ToolBox,
    pub history_processors: Vec<Arc<dyn HistoryProcessor>>,
    pub compaction: CompactionConfig,
}

impl InvocationContext {
    /// Context with a compaction hook of its own
    pub fn new(identity: RunIdentity, tools: ToolBox, compaction: CompactionConfig) -> Self {
        Self {
            identity,
            tools,
            history_processors: vec![Arc::new(Compactor::new(compaction))],
            compaction,
        }
    }

    pub fn with_processor(mut self, processor: Arc<dyn HistoryProcessor>) -> Self {
        self.history_processors.push(processor);
        self
    }

    /// Run every history processor, in order
    pub fn process_history(&self, history: Vec<Turn>) -> Vec<Turn> {
        self.history_processors
            .iter()
            .fold(history, |history, processor| processor.process(history))
    }
}

/// The "run a task, get a structured result" capability
#[async_trait]
pub trait AgentRunner: Send + Sync {
    async fn run(&self, task: &AgentTask, ctx: &InvocationContext) -> Result<Value>;
}

/// Planning output: `{"items": [...]}` or a bare array
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanOutput {
    pub items: Vec<WorkItem>,
}

impl PlanOutput {
    pub fn parse(value: Value) -> Result<Self> {
        if value.is_array() {
            let items = serde_json::from_value(value).context("Invalid work item list")?;
            return Ok(Self { items });
        }
        serde_json::from_value(value).context("Planning output has no valid 'items' list")
    }
}

/// Execution output: `{"title"?, "payload"}`, or any other value taken as the payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionOutput {
    #[serde(default)]
    pub title: Option<String>,
    pub payload: Value,
}

impl ExecutionOutput {
    pub fn parse(value: Value) -> Self {
        match value.get("payload") {
            Some(_) => serde_json::from_value(value.clone()).unwrap_or(Self {
                title: None,
                payload: value,
            }),
            None => Self {
                title: None,
                payload: value,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::budget::BudgetLimits;
    use crate::tools::{PhaseTools, ToolSet};

    fn identity() -> RunIdentity {
        RunIdentity {
            workspace_id: "ws".to_string(),
            tenant_id: "tenant".to_string(),
            run_id: "run-1".to_string(),
        }
    }

    #[test]
    fn test_plan_output_shapes() {
        let wrapped = json!({ "items": [{ "id": "a", "title": "A" }] });
        assert_eq!(PlanOutput::parse(wrapped).unwrap().items[0].id, "a");

        let bare = json!([{ "id": "b", "title": "B", "spec": { "focus": "cost" } }]);
        let items = PlanOutput::parse(bare).unwrap().items;
        assert_eq!(items[0].spec["focus"], "cost");

        assert!(PlanOutput::parse(json!({ "nothing": true })).is_err());
    }

    #[test]
    fn test_execution_output_fallback() {
        let structured = ExecutionOutput::parse(json!({ "title": "T", "payload": { "x": 1 } }));
        assert_eq!(structured.title.as_deref(), Some("T"));
        assert_eq!(structured.payload["x"], 1);

        let raw = ExecutionOutput::parse(json!({ "finding": "flat" }));
        assert!(raw.title.is_none());
        assert_eq!(raw.payload["finding"], "flat");
    }

    #[test]
    fn test_context_carries_own_compactor() {
        let tools = ToolBox::new(&ToolSet::new(), PhaseTools::none(), BudgetLimits::default());
        let ctx = InvocationContext::new(identity(), tools, CompactionConfig::default());
        assert_eq!(ctx.history_processors.len(), 1);

        let history = vec![Turn::User {
            content: "hello".to_string(),
        }];
        assert_eq!(ctx.process_history(history.clone()), history);
    }

    #[test]
    fn test_dependent_task_includes_evidence() {
        let result = WorkResult {
            work_item_id: "a-1".to_string(),
            title: "Churn".to_string(),
            payload: json!({}),
            used_calls: Vec::new(),
        };
        let task = AgentTask::plan_dependent(&result, 3);
        assert_eq!(task.kind, TaskKind::PlanDependent);
        assert_eq!(task.input["parent"]["id"], "a-1");
        assert!(task.input["used_calls"].is_array());
    }
}
