//! # Search Tool
//!
//! Web search through SearXNG instances.

use anyhow::{Context, Result};
use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::json;

use crate::budget::ToolOutput;

/// Arguments for web search
#[derive(Debug, Deserialize, JsonSchema)]
pub struct WebSearchArgs {
    /// Search query
    pub query: String,
    /// Maximum number of results (default: 5)
    pub max_results: Option<u32>,
}

/// Runs web searches
#[async_trait]
pub trait SearchBackend: Send + Sync {
    async fn search(&self, query: &str, max_results: usize) -> Result<ToolOutput>;
}

/// SearXNG JSON API client, trying each endpoint in turn
pub struct SearxngSearch {
    client: reqwest::Client,
    endpoints: Vec<String>,
}

impl SearxngSearch {
    /// Configured instance first, then local fallbacks
    pub fn new(custom_url: Option<&str>) -> Result<Self> {
        let mut endpoints: Vec<String> = Vec::new();

        if let Some(url) = custom_url {
            endpoints.push(format!("{}/search", url.trim_end_matches('/')));
        }

        endpoints.push("http://localhost:8888/search".to_string());
        endpoints.push("http://127.0.0.1:8888/search".to_string());

        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .context("Failed to create HTTP client for search")?;

        Ok(Self { client, endpoints })
    }

    async fn try_endpoint(
        &self,
        endpoint: &str,
        query: &str,
        max_results: usize,
    ) -> Option<Vec<serde_json::Value>> {
        let url = format!("{}?q={}&format=json", endpoint, urlencoding::encode(query));

        let response = self.client.get(&url).send().await.ok()?;
        let json = response.json::<serde_json::Value>().await.ok()?;
        let results = json.get("results").and_then(|r| r.as_array())?;

        Some(
            results
                .iter()
                .take(max_results)
                .map(|r| {
                    json!({
                        "title": r.get("title").and_then(|t| t.as_str()).unwrap_or(""),
                        "url": r.get("url").and_then(|u| u.as_str()).unwrap_or(""),
                        "snippet": r.get("content").and_then(|c| c.as_str()).unwrap_or("")
                    })
                })
                .collect(),
        )
    }
}

#[async_trait]
impl SearchBackend for SearxngSearch {
    async fn search(&self, query: &str, max_results: usize) -> Result<ToolOutput> {
        for endpoint in &self.endpoints {
            if let Some(results) = self.try_endpoint(endpoint, query, max_results).await {
                let result_count = results.len();
                return Ok(ToolOutput {
                    data: json!({
                        "query": query,
                        "source": "searxng",
                        "results": results
                    }),
                    result_count,
                    truncated: false,
                });
            }
            tracing::debug!(endpoint = %endpoint, "SearXNG endpoint unavailable");
        }

        anyhow::bail!("No search backend reachable for query '{}'", query)
    }
}
