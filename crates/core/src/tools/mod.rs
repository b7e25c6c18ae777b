//! # Agent Tools
//!
//! Tool backends are injected per orchestrator through a [`ToolSet`]; there is
//! no global registry. Every agent invocation gets its own [`ToolBox`], which
//! binds the tool set to fresh budgets (one per tool kind) so that concurrent
//! invocations never share counters.
//!
//! - `query` - structured query execution
//! - `search` - web search (SearXNG)

pub mod query;
pub mod search;

pub use query::{HttpQueryBackend, QueryArgs, QueryBackend};
pub use search::{SearchBackend, SearxngSearch, WebSearchArgs};

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::budget::{
    guard, BudgetExhausted, BudgetLimits, BudgetState, CallRecord, GuardOutcome, ToolKind,
    ToolOutput,
};

/// Tool backends available to an orchestrator
#[derive(Clone, Default)]
pub struct ToolSet {
    pub query: Option<Arc<dyn QueryBackend>>,
    pub search: Option<Arc<dyn SearchBackend>>,
}

impl ToolSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_query(mut self, backend: Arc<dyn QueryBackend>) -> Self {
        self.query = Some(backend);
        self
    }

    pub fn with_search(mut self, backend: Arc<dyn SearchBackend>) -> Self {
        self.search = Some(backend);
        self
    }
}

/// Which tools a phase exposes to its agents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseTools {
    #[serde(default)]
    pub query: bool,
    #[serde(default)]
    pub web_search: bool,
}

impl PhaseTools {
    pub fn all() -> Self {
        Self {
            query: true,
            web_search: true,
        }
    }

    pub fn none() -> Self {
        Self {
            query: false,
            web_search: false,
        }
    }

    fn allows(&self, kind: ToolKind) -> bool {
        match kind {
            ToolKind::Query => self.query,
            ToolKind::WebSearch => self.web_search,
        }
    }
}

/// A tool invocation requested by the agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub call_id: String,
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

/// Tool description handed to the agent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// What the agent sees after a tool call. Only transport faults are `Err`
/// upstream of this; everything here is a readable value.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolResponse {
    Completed(ToolOutput),
    Exhausted(BudgetExhausted),
    Failed(String),
    Unavailable(String),
}

impl ToolResponse {
    /// Content recorded in the conversation history
    pub fn to_content(&self) -> Value {
        match self {
            Self::Completed(output) => output.data.clone(),
            Self::Exhausted(sentinel) => serde_json::to_value(sentinel)
                .unwrap_or_else(|_| json!({ "budget_exhausted": true })),
            Self::Failed(message) => json!({ "error": message }),
            Self::Unavailable(message) => json!({ "error": message, "unavailable": true }),
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed(_))
    }
}

impl From<GuardOutcome> for ToolResponse {
    fn from(outcome: GuardOutcome) -> Self {
        match outcome {
            GuardOutcome::Completed(output) => Self::Completed(output),
            GuardOutcome::Exhausted(sentinel) => Self::Exhausted(sentinel),
        }
    }
}

/// Tool set bound to the budgets of one agent invocation
pub struct ToolBox {
    tools: ToolSet,
    enabled: PhaseTools,
    limits: BudgetLimits,
    query_budget: Mutex<BudgetState>,
    search_budget: Mutex<BudgetState>,
    /// Successful calls across all kinds, in the order they completed
    call_log: Mutex<Vec<CallRecord>>,
}

impl ToolBox {
    /// Fresh budgets; never reuse a tool box across invocations
    pub fn new(tools: &ToolSet, enabled: PhaseTools, limits: BudgetLimits) -> Self {
        Self {
            tools: tools.clone(),
            enabled,
            limits,
            query_budget: Mutex::new(BudgetState::new()),
            search_budget: Mutex::new(BudgetState::new()),
            call_log: Mutex::new(Vec::new()),
        }
    }

    fn is_available(&self, kind: ToolKind) -> bool {
        self.enabled.allows(kind)
            && match kind {
                ToolKind::Query => self.tools.query.is_some(),
                ToolKind::WebSearch => self.tools.search.is_some(),
            }
    }

    fn budget_for(&self, kind: ToolKind) -> &Mutex<BudgetState> {
        match kind {
            ToolKind::Query => &self.query_budget,
            ToolKind::WebSearch => &self.search_budget,
        }
    }

    /// Definitions of the tools this invocation may call
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut definitions = Vec::new();
        if self.is_available(ToolKind::Query) {
            definitions.push(ToolDefinition {
                name: ToolKind::Query.as_str().to_string(),
                description: format!(
                    "Execute a structured query and return matching rows. \
                     At most {} calls are allowed for this task.",
                    self.limits.query_calls
                ),
                parameters: serde_json::to_value(schemars::schema_for!(QueryArgs))
                    .unwrap_or(Value::Null),
            });
        }
        if self.is_available(ToolKind::WebSearch) {
            definitions.push(ToolDefinition {
                name: ToolKind::WebSearch.as_str().to_string(),
                description: format!(
                    "Search the web. Returns titles, URLs and snippets. \
                     At most {} calls are allowed for this task.",
                    self.limits.web_search_calls
                ),
                parameters: serde_json::to_value(schemars::schema_for!(WebSearchArgs))
                    .unwrap_or(Value::Null),
            });
        }
        definitions
    }

    /// Run a structured query through the query budget
    pub async fn run_query(&self, query: &str) -> ToolResponse {
        let Some(backend) = self.tools.query.as_ref().filter(|_| self.enabled.query) else {
            return unavailable(ToolKind::Query);
        };

        let mut budget = self.query_budget.lock().await;
        match guard(
            &mut budget,
            self.limits.query_calls,
            ToolKind::Query,
            query,
            || backend.execute(query),
        )
        .await
        {
            Ok(outcome) => self.logged(outcome, &budget).await,
            Err(e) => {
                tracing::warn!(error = %e, "Query tool call failed");
                ToolResponse::Failed(e.to_string())
            }
        }
    }

    /// Run a web search through the search budget
    pub async fn web_search(&self, query: &str, max_results: usize) -> ToolResponse {
        let Some(backend) = self.tools.search.as_ref().filter(|_| self.enabled.web_search) else {
            return unavailable(ToolKind::WebSearch);
        };

        let mut budget = self.search_budget.lock().await;
        match guard(
            &mut budget,
            self.limits.web_search_calls,
            ToolKind::WebSearch,
            query,
            || backend.search(query, max_results),
        )
        .await
        {
            Ok(outcome) => self.logged(outcome, &budget).await,
            Err(e) => {
                tracing::warn!(error = %e, "Web search tool call failed");
                ToolResponse::Failed(e.to_string())
            }
        }
    }

    async fn logged(&self, outcome: GuardOutcome, budget: &BudgetState) -> ToolResponse {
        if !outcome.is_exhausted() {
            if let Some(record) = budget.calls.last() {
                self.call_log.lock().await.push(record.clone());
            }
        }
        outcome.into()
    }

    /// Dispatch a tool call by name
    pub async fn call(&self, call: &ToolCall) -> ToolResponse {
        match ToolKind::from_name(&call.name) {
            Some(ToolKind::Query) => {
                match serde_json::from_value::<QueryArgs>(call.arguments.clone()) {
                    Ok(args) => self.run_query(&args.query).await,
                    Err(e) => ToolResponse::Failed(format!("Invalid run_query arguments: {}", e)),
                }
            }
            Some(ToolKind::WebSearch) => {
                match serde_json::from_value::<WebSearchArgs>(call.arguments.clone()) {
                    Ok(args) => {
                        let max_results = args.max_results.unwrap_or(5) as usize;
                        self.web_search(&args.query, max_results).await
                    }
                    Err(e) => ToolResponse::Failed(format!("Invalid web_search arguments: {}", e)),
                }
            }
            None => ToolResponse::Unavailable(format!("Unknown tool '{}'", call.name)),
        }
    }

    /// Snapshot of the budget for one tool kind
    pub async fn budget(&self, kind: ToolKind) -> BudgetState {
        self.budget_for(kind).lock().await.clone()
    }

    /// Every successful call made through this tool box, in call order
    pub async fn call_records(&self) -> Vec<CallRecord> {
        self.call_log.lock().await.clone()
    }
}

fn unavailable(kind: ToolKind) -> ToolResponse {
    ToolResponse::Unavailable(format!(
        "Tool '{}' is not available for this task",
        kind.as_str()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeQuery {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl QueryBackend for FakeQuery {
        async fn execute(&self, query: &str) -> anyhow::Result<ToolOutput> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if query.contains("FAIL") {
                anyhow::bail!("backend rejected query");
            }
            Ok(ToolOutput {
                data: json!({ "query": query, "results": [{ "n": 1 }, { "n": 2 }] }),
                result_count: 2,
                truncated: false,
            })
        }
    }

    struct FakeSearch;

    #[async_trait]
    impl SearchBackend for FakeSearch {
        async fn search(&self, query: &str, _max_results: usize) -> anyhow::Result<ToolOutput> {
            Ok(ToolOutput {
                data: json!({ "query": query, "results": [] }),
                result_count: 0,
                truncated: false,
            })
        }
    }

    fn tool_set() -> (ToolSet, Arc<FakeQuery>) {
        let query = Arc::new(FakeQuery {
            calls: AtomicUsize::new(0),
        });
        let tools = ToolSet::new()
            .with_query(query.clone())
            .with_search(Arc::new(FakeSearch));
        (tools, query)
    }

    #[tokio::test]
    async fn test_budgets_are_independent_per_kind() {
        let (tools, _) = tool_set();
        let limits = BudgetLimits {
            query_calls: 1,
            web_search_calls: 2,
        };
        let toolbox = ToolBox::new(&tools, PhaseTools::all(), limits);

        assert!(toolbox.run_query("q1").await.is_completed());
        assert!(matches!(
            toolbox.run_query("q2").await,
            ToolResponse::Exhausted(_)
        ));

        // query exhaustion does not block search
        assert!(toolbox.web_search("rust", 3).await.is_completed());
        assert!(toolbox.web_search("tokio", 3).await.is_completed());
        assert!(matches!(
            toolbox.web_search("serde", 3).await,
            ToolResponse::Exhausted(_)
        ));

        assert_eq!(toolbox.call_records().await.len(), 3);
        assert_eq!(toolbox.budget(ToolKind::Query).await.total_results_returned, 2);
    }

    #[tokio::test]
    async fn test_call_records_keep_call_order_across_kinds() {
        let (tools, _) = tool_set();
        let toolbox = ToolBox::new(&tools, PhaseTools::all(), BudgetLimits::default());

        toolbox.web_search("market size", 3).await;
        toolbox.run_query("MATCH (c:Customer) RETURN c").await;
        toolbox.run_query("FAIL twice").await;
        toolbox.web_search("churn benchmarks", 3).await;

        let order: Vec<(ToolKind, String)> = toolbox
            .call_records()
            .await
            .into_iter()
            .map(|c| (c.tool, c.call_summary))
            .collect();
        assert_eq!(
            order,
            vec![
                (ToolKind::WebSearch, "market size".to_string()),
                (ToolKind::Query, "MATCH (c:Customer) RETURN c".to_string()),
                (ToolKind::WebSearch, "churn benchmarks".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_fresh_toolbox_has_fresh_budget() {
        let (tools, backend) = tool_set();
        let limits = BudgetLimits {
            query_calls: 1,
            web_search_calls: 0,
        };

        let first = ToolBox::new(&tools, PhaseTools::all(), limits);
        first.run_query("a").await;
        let second = ToolBox::new(&tools, PhaseTools::all(), limits);
        assert!(second.run_query("b").await.is_completed());
        assert_eq!(backend.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_disabled_tool_is_unavailable() {
        let (tools, backend) = tool_set();
        let toolbox = ToolBox::new(&tools, PhaseTools::none(), BudgetLimits::default());

        assert!(matches!(
            toolbox.run_query("q").await,
            ToolResponse::Unavailable(_)
        ));
        assert!(toolbox.definitions().is_empty());
        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_dispatch_by_name() {
        let (tools, _) = tool_set();
        let toolbox = ToolBox::new(&tools, PhaseTools::all(), BudgetLimits::default());

        let response = toolbox
            .call(&ToolCall {
                call_id: "c1".to_string(),
                name: "run_query".to_string(),
                arguments: json!({ "query": "MATCH (n) RETURN n" }),
            })
            .await;
        assert!(response.is_completed());

        let response = toolbox
            .call(&ToolCall {
                call_id: "c2".to_string(),
                name: "run_query".to_string(),
                arguments: json!({ "sql": "nope" }),
            })
            .await;
        assert!(matches!(response, ToolResponse::Failed(_)));

        let response = toolbox
            .call(&ToolCall {
                call_id: "c3".to_string(),
                name: "delete_everything".to_string(),
                arguments: Value::Null,
            })
            .await;
        assert!(matches!(response, ToolResponse::Unavailable(_)));
    }

    #[tokio::test]
    async fn test_backend_error_is_a_value() {
        let (tools, _) = tool_set();
        let toolbox = ToolBox::new(&tools, PhaseTools::all(), BudgetLimits::default());

        let response = toolbox.run_query("FAIL please").await;
        assert_eq!(
            response.to_content(),
            json!({ "error": "backend rejected query" })
        );
        assert_eq!(toolbox.budget(ToolKind::Query).await.calls_made, 0);
    }
}
