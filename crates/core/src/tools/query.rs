//! # Query Tool
//!
//! Structured query execution. The query language and the engine behind it
//! are external; this module only ships the query and bounds what comes back.

use anyhow::{Context, Result};
use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::budget::ToolOutput;

/// Arguments for running a structured query
#[derive(Debug, Deserialize, JsonSchema)]
pub struct QueryArgs {
    /// Query text, passed verbatim to the query engine
    pub query: String,
}

/// Executes structured queries
#[async_trait]
pub trait QueryBackend: Send + Sync {
    /// Returns `{query, results: [...], result_count, truncated}` in `data`
    async fn execute(&self, query: &str) -> Result<ToolOutput>;
}

/// Query backend reached over HTTP: `POST {url}` with `{"query": ...}`,
/// answering `{"results": [...]}`.
pub struct HttpQueryBackend {
    client: reqwest::Client,
    url: String,
    token: Option<String>,
    max_rows: usize,
}

impl HttpQueryBackend {
    pub fn new(url: impl Into<String>, token: Option<String>, max_rows: usize) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(60))
            .build()
            .context("Failed to create HTTP client for query backend")?;

        Ok(Self {
            client,
            url: url.into(),
            token,
            max_rows,
        })
    }
}

#[async_trait]
impl QueryBackend for HttpQueryBackend {
    async fn execute(&self, query: &str) -> Result<ToolOutput> {
        let mut request = self.client.post(&self.url).json(&json!({ "query": query }));
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.context("Query request failed")?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Query engine returned {}: {}", status, body);
        }

        let body: Value = response
            .json()
            .await
            .context("Failed to parse query engine response")?;

        Ok(bound_rows(query, body, self.max_rows))
    }
}

/// Cap the number of rows returned to the agent, flagging truncation
pub(crate) fn bound_rows(query: &str, body: Value, max_rows: usize) -> ToolOutput {
    let mut rows = match body {
        Value::Object(mut map) => match map.remove("results") {
            Some(Value::Array(rows)) => rows,
            _ => Vec::new(),
        },
        Value::Array(rows) => rows,
        _ => Vec::new(),
    };

    let result_count = rows.len();
    let truncated = result_count > max_rows;
    rows.truncate(max_rows);

    ToolOutput {
        data: json!({
            "query": query,
            "results": rows,
            "result_count": result_count,
            "truncated": truncated,
        }),
        result_count,
        truncated,
    }
}
