//! # Call Budget Guard
//!
//! Bounds how many external tool calls a single agent invocation may make.
//!
//! A [`BudgetState`] is created fresh for every work item execution and is
//! owned by that execution only. Once `calls_made` reaches the ceiling,
//! [`guard`] stops invoking the tool and hands back a
//! [`GuardOutcome::Exhausted`] value the agent can read and act on.

use serde::{Deserialize, Serialize};
use std::future::Future;

/// Maximum characters of a call's query kept in its [`CallRecord`]
pub const CALL_SUMMARY_CHARS: usize = 200;

/// Kind of external tool; each kind has its own budget
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolKind {
    /// Structured query execution
    Query,
    /// Web search
    WebSearch,
}

impl ToolKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Query => "run_query",
            Self::WebSearch => "web_search",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "run_query" => Some(Self::Query),
            "web_search" => Some(Self::WebSearch),
            _ => None,
        }
    }
}

/// Compact audit entry for one tool invocation. Never holds the full payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallRecord {
    pub tool: ToolKind,
    pub call_summary: String,
    pub result_count: usize,
    pub truncated: bool,
}

/// Per-invocation counter state for one tool kind
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BudgetState {
    pub calls_made: usize,
    pub total_results_returned: usize,
    pub calls: Vec<CallRecord>,
}

impl BudgetState {
    /// Fresh, zeroed state
    pub fn new() -> Self {
        Self::default()
    }

    pub fn remaining(&self, max_calls: usize) -> usize {
        max_calls.saturating_sub(self.calls_made)
    }

    pub fn is_exhausted(&self, max_calls: usize) -> bool {
        self.calls_made >= max_calls
    }

    fn record(&mut self, tool: ToolKind, summary: &str, output: &ToolOutput) {
        self.calls_made += 1;
        self.total_results_returned += output.result_count;
        self.calls.push(CallRecord {
            tool,
            call_summary: summary_prefix(summary),
            result_count: output.result_count,
            truncated: output.truncated,
        });
    }
}

/// Ceilings per tool kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BudgetLimits {
    #[serde(default = "default_query_calls")]
    pub query_calls: usize,
    #[serde(default = "default_web_search_calls")]
    pub web_search_calls: usize,
}

fn default_query_calls() -> usize {
    8
}

fn default_web_search_calls() -> usize {
    4
}

impl Default for BudgetLimits {
    fn default() -> Self {
        Self {
            query_calls: default_query_calls(),
            web_search_calls: default_web_search_calls(),
        }
    }
}

impl BudgetLimits {
    pub fn max_for(&self, kind: ToolKind) -> usize {
        match kind {
            ToolKind::Query => self.query_calls,
            ToolKind::WebSearch => self.web_search_calls,
        }
    }
}

/// What a tool call produced, before any compaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolOutput {
    pub data: serde_json::Value,
    pub result_count: usize,
    #[serde(default)]
    pub truncated: bool,
}

/// Sentinel returned instead of calling the tool once the budget is spent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BudgetExhausted {
    pub budget_exhausted: bool,
    pub tool: ToolKind,
    pub calls_made: usize,
    pub max_calls: usize,
    pub message: String,
}

impl BudgetExhausted {
    fn new(tool: ToolKind, calls_made: usize, max_calls: usize) -> Self {
        Self {
            budget_exhausted: true,
            tool,
            calls_made,
            max_calls,
            message: format!(
                "Call budget for {} exhausted ({} of {} calls used). \
                 Work with the evidence already gathered and finish the task.",
                tool.as_str(),
                calls_made,
                max_calls
            ),
        }
    }
}

/// Result of a guarded call
#[derive(Debug, Clone, PartialEq)]
pub enum GuardOutcome {
    Completed(ToolOutput),
    Exhausted(BudgetExhausted),
}

impl GuardOutcome {
    pub fn is_exhausted(&self) -> bool {
        matches!(self, Self::Exhausted(_))
    }
}

/// Run `call` only if `state` still has budget left.
///
/// Successful calls increment `calls_made`, add to `total_results_returned`
/// and append exactly one [`CallRecord`]. Failed calls leave the state
/// untouched and hand the error back to the caller.
pub async fn guard<F, Fut, E>(
    state: &mut BudgetState,
    max_calls: usize,
    tool: ToolKind,
    summary: &str,
    call: F,
) -> Result<GuardOutcome, E>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<ToolOutput, E>>,
{
    if state.is_exhausted(max_calls) {
        tracing::debug!(
            tool = tool.as_str(),
            calls_made = state.calls_made,
            max_calls,
            "Call budget exhausted, refusing tool call"
        );
        return Ok(GuardOutcome::Exhausted(BudgetExhausted::new(
            tool,
            state.calls_made,
            max_calls,
        )));
    }

    let output = call().await?;
    state.record(tool, summary, &output);
    Ok(GuardOutcome::Completed(output))
}

fn summary_prefix(summary: &str) -> String {
    summary.chars().take(CALL_SUMMARY_CHARS).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn output(rows: usize) -> ToolOutput {
        ToolOutput {
            data: serde_json::json!({ "results": [] }),
            result_count: rows,
            truncated: false,
        }
    }

    #[tokio::test]
    async fn test_at_most_max_calls_reach_the_tool() {
        let invoked = AtomicUsize::new(0);
        let mut state = BudgetState::new();

        let mut exhausted = 0;
        for _ in 0..7 {
            let outcome = guard(&mut state, 3, ToolKind::Query, "SELECT 1", || async {
                invoked.fetch_add(1, Ordering::SeqCst);
                Ok::<_, anyhow::Error>(output(2))
            })
            .await
            .unwrap();
            if outcome.is_exhausted() {
                exhausted += 1;
            }
        }

        assert_eq!(invoked.load(Ordering::SeqCst), 3);
        assert_eq!(exhausted, 4);
        assert_eq!(state.calls_made, 3);
        assert_eq!(state.calls.len(), 3);
        assert_eq!(state.total_results_returned, 6);
    }

    #[tokio::test]
    async fn test_exhausted_sentinel_is_readable() {
        let mut state = BudgetState::new();
        let outcome = guard(&mut state, 0, ToolKind::WebSearch, "rust", || async {
            Ok::<_, anyhow::Error>(output(1))
        })
        .await
        .unwrap();

        match outcome {
            GuardOutcome::Exhausted(sentinel) => {
                assert!(sentinel.budget_exhausted);
                assert_eq!(sentinel.max_calls, 0);
                assert!(sentinel.message.contains("web_search"));
            }
            other => panic!("expected exhausted, got {:?}", other),
        }
        assert_eq!(state, BudgetState::new());
    }

    #[tokio::test]
    async fn test_failed_calls_do_not_consume_budget() {
        let mut state = BudgetState::new();
        let result = guard(&mut state, 1, ToolKind::Query, "SELECT broken", || async {
            Err::<ToolOutput, _>(anyhow::anyhow!("syntax error"))
        })
        .await;

        assert!(result.is_err());
        assert_eq!(state.calls_made, 0);
        assert!(state.calls.is_empty());

        let outcome = guard(&mut state, 1, ToolKind::Query, "SELECT 1", || async {
            Ok::<_, anyhow::Error>(output(1))
        })
        .await
        .unwrap();
        assert!(!outcome.is_exhausted());
    }

    #[tokio::test]
    async fn test_call_summary_is_truncated() {
        let mut state = BudgetState::new();
        let long_query = "x".repeat(CALL_SUMMARY_CHARS * 3);
        guard(&mut state, 1, ToolKind::Query, &long_query, || async {
            Ok::<_, anyhow::Error>(output(0))
        })
        .await
        .unwrap();

        assert_eq!(state.calls[0].call_summary.chars().count(), CALL_SUMMARY_CHARS);
    }

    #[test]
    fn test_limits_per_kind() {
        let limits = BudgetLimits {
            query_calls: 5,
            web_search_calls: 2,
        };
        assert_eq!(limits.max_for(ToolKind::Query), 5);
        assert_eq!(limits.max_for(ToolKind::WebSearch), 2);
        assert_eq!(ToolKind::from_name("web_search"), Some(ToolKind::WebSearch));
        assert_eq!(ToolKind::from_name("shell"), None);
    }
}
