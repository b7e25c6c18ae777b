//! Step-wise agent runner over HTTP.
//!
//! Each step POSTs the task, the available tools and the (processed) history.
//! The endpoint either asks for tool calls or returns the final output. The
//! loop is bounded; running out of steps is an error, never a silent retry.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::future::Future;
use std::time::Duration;

use super::{AgentRunner, AgentTask, InvocationContext, RunIdentity, TaskKind};
use crate::compaction::Turn;
use crate::tools::{ToolCall, ToolDefinition};

/// Body of one step request
#[derive(Debug, Clone, Serialize)]
pub struct StepRequest {
    pub kind: TaskKind,
    pub prompt: String,
    pub input: Value,
    pub identity: RunIdentity,
    pub tools: Vec<ToolDefinition>,
    pub history: Vec<Turn>,
}

/// What the endpoint answers with
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentStep {
    ToolCalls { calls: Vec<ToolCall> },
    Final { output: Value },
}

pub struct HttpAgentRunner {
    client: reqwest::Client,
    url: String,
    token: Option<String>,
    max_steps: usize,
}

impl HttpAgentRunner {
    pub fn new(url: impl Into<String>, token: Option<String>, max_steps: usize) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(300))
            .user_agent("tessera/0.1")
            .build()
            .context("Failed to create HTTP client for agent endpoint")?;

        Ok(Self {
            client,
            url: url.into(),
            token,
            max_steps,
        })
    }

    async fn step(&self, request: StepRequest) -> Result<AgentStep> {
        let mut builder = self.client.post(&self.url).json(&request);
        if let Some(token) = &self.token {
            builder = builder.bearer_auth(token);
        }

        let response = builder
            .send()
            .await
            .context("Agent endpoint unreachable")?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Agent endpoint returned {}: {}", status, body);
        }

        response
            .json::<AgentStep>()
            .await
            .context("Agent endpoint returned an unrecognised step")
    }
}

#[async_trait]
impl AgentRunner for HttpAgentRunner {
    #[tracing::instrument(skip_all, fields(kind = ?task.kind, run_id = %ctx.identity.run_id))]
    async fn run(&self, task: &AgentTask, ctx: &InvocationContext) -> Result<Value> {
        drive_steps(task, ctx, self.max_steps, |request| self.step(request)).await
    }
}

/// Run the step loop with an arbitrary step function
pub(crate) async fn drive_steps<F, Fut>(
    task: &AgentTask,
    ctx: &InvocationContext,
    max_steps: usize,
    mut step: F,
) -> Result<Value>
where
    F: FnMut(StepRequest) -> Fut,
    Fut: Future<Output = Result<AgentStep>>,
{
    let tools = ctx.tools.definitions();
    let mut history = vec![Turn::User {
        content: task.input.to_string(),
    }];

    for step_index in 1..=max_steps {
        history = ctx.process_history(history);

        let request = StepRequest {
            kind: task.kind,
            prompt: task.prompt.clone(),
            input: task.input.clone(),
            identity: ctx.identity.clone(),
            tools: tools.clone(),
            history: history.clone(),
        };

        match step(request).await? {
            AgentStep::Final { output } => {
                tracing::debug!(steps = step_index, "Agent finished");
                return Ok(output);
            }
            AgentStep::ToolCalls { calls } => {
                if calls.is_empty() {
                    anyhow::bail!(
                        "Agent requested an empty tool call batch at step {}",
                        step_index
                    );
                }
                for call in calls {
                    let response = ctx.tools.call(&call).await;
                    history.push(Turn::ToolCall {
                        call_id: call.call_id.clone(),
                        tool: call.name.clone(),
                        arguments: call.arguments.clone(),
                    });
                    history.push(Turn::ToolResult {
                        call_id: call.call_id,
                        tool: call.name,
                        content: response.to_content(),
                    });
                }
            }
        }
    }

    anyhow::bail!("Agent gave up after {} steps without a final answer", max_steps)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::budget::{BudgetLimits, ToolKind, ToolOutput};
    use crate::compaction::CompactionConfig;
    use crate::tools::{PhaseTools, QueryBackend, ToolBox, ToolSet};
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    struct Rows(usize);

    #[async_trait]
    impl QueryBackend for Rows {
        async fn execute(&self, _query: &str) -> Result<ToolOutput> {
            let rows: Vec<Value> = (0..self.0).map(|i| json!({ "id": i, "amount": i })).collect();
            Ok(ToolOutput {
                data: json!({ "results": rows }),
                result_count: self.0,
                truncated: false,
            })
        }
    }

    fn ctx(rows: usize, limits: BudgetLimits) -> InvocationContext {
        let tools = ToolSet::new().with_query(Arc::new(Rows(rows)));
        InvocationContext::new(
            RunIdentity {
                workspace_id: "ws".to_string(),
                tenant_id: "t".to_string(),
                run_id: "run-1".to_string(),
            },
            ToolBox::new(&tools, PhaseTools::all(), limits),
            CompactionConfig::default(),
        )
    }

    fn query_call(id: &str) -> ToolCall {
        ToolCall {
            call_id: id.to_string(),
            name: "run_query".to_string(),
            arguments: json!({ "query": format!("Q{}", id) }),
        }
    }

    fn task() -> AgentTask {
        AgentTask {
            kind: TaskKind::Execute,
            prompt: "go".to_string(),
            input: json!({ "id": "a" }),
        }
    }

    #[tokio::test]
    async fn test_tool_calls_then_final() {
        let ctx = ctx(3, BudgetLimits::default());
        let mut steps = vec![
            AgentStep::ToolCalls {
                calls: vec![query_call("1")],
            },
            AgentStep::Final {
                output: json!({ "payload": "done" }),
            },
        ]
        .into_iter();
        let seen = Mutex::new(Vec::new());

        let output = drive_steps(&task(), &ctx, 5, |request| {
            seen.lock().unwrap().push(request.history.len());
            let next = steps.next().unwrap();
            async move { Ok(next) }
        })
        .await
        .unwrap();

        assert_eq!(output["payload"], "done");
        // user turn, then user + call + result
        assert_eq!(*seen.lock().unwrap(), vec![1, 3]);
        assert_eq!(ctx.tools.budget(ToolKind::Query).await.calls_made, 1);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_steps() {
        let ctx = ctx(1, BudgetLimits::default());
        let mut counter = 0;

        let err = drive_steps(&task(), &ctx, 3, |_| {
            counter += 1;
            let call = query_call(&counter.to_string());
            async move { Ok(AgentStep::ToolCalls { calls: vec![call] }) }
        })
        .await
        .unwrap_err();

        assert!(err.to_string().contains("gave up after 3 steps"));
    }

    #[tokio::test]
    async fn test_budget_exhaustion_reaches_agent() {
        let limits = BudgetLimits {
            query_calls: 1,
            web_search_calls: 0,
        };
        let ctx = ctx(2, limits);
        let last_history = Mutex::new(Vec::new());
        let mut step_no = 0;

        drive_steps(&task(), &ctx, 5, |request| {
            step_no += 1;
            *last_history.lock().unwrap() = request.history;
            let next = if step_no <= 2 {
                AgentStep::ToolCalls {
                    calls: vec![query_call(&step_no.to_string())],
                }
            } else {
                AgentStep::Final { output: json!({}) }
            };
            async move { Ok(next) }
        })
        .await
        .unwrap();

        let history = last_history.lock().unwrap();
        match history.last() {
            Some(Turn::ToolResult { content, .. }) => {
                assert_eq!(content["budget_exhausted"], true)
            }
            other => panic!("unexpected last turn {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_large_results_compacted_on_replay() {
        let ctx = ctx(30, BudgetLimits::default());
        let histories = Mutex::new(Vec::new());
        let mut step_no = 0;

        drive_steps(&task(), &ctx, 5, |request| {
            step_no += 1;
            histories.lock().unwrap().push(request.history);
            let next = match step_no {
                1 => AgentStep::ToolCalls {
                    calls: vec![query_call("1")],
                },
                2 => AgentStep::ToolCalls {
                    calls: vec![query_call("2")],
                },
                _ => AgentStep::Final { output: json!({}) },
            };
            async move { Ok(next) }
        })
        .await
        .unwrap();

        let histories = histories.lock().unwrap();
        let content = |turn: &Turn| match turn {
            Turn::ToolResult { content, .. } => content.clone(),
            other => panic!("expected tool result, got {:?}", other),
        };
        // the freshest result is replayed in full once
        assert!(content(&histories[1][2]).get("_compacted").is_none());
        // and compacted on the following step
        assert_eq!(content(&histories[2][2])["_compacted"], true);
        assert_eq!(content(&histories[2][2])["original_query"], "Q1");
        assert!(content(&histories[2][4]).get("_compacted").is_none());
    }
}
